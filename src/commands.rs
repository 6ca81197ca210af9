//! Fire-and-forget device commands.
//!
//! The firmware sends no acknowledgement for these, so a command counts as
//! delivered once the bytes are written without a transport error.

use std::io::{BufRead, Write};
use std::thread;
use std::time::Duration;

use tracing::debug;

use crate::console::Console;
use crate::error::{Error, Result};
use crate::transport::Transport;

pub const FORMAT_COMMAND: u8 = b'c';
pub const PAUSE_COMMAND: u8 = b'p';
pub const DELETE_COMMAND: u8 = b'd';

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    PrepareForFlight,
    Format,
    TogglePause,
    Delete,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Confirmation {
    /// Casual `yes`, case-insensitive.
    Yes,
    /// The exact word must be typed back, case-insensitive.
    Typed(&'static str),
}

#[derive(Debug)]
pub struct Step {
    pub byte: u8,
    pub announce: &'static str,
}

#[derive(Debug)]
pub struct CommandPlan {
    pub label: &'static str,
    pub warning: Option<&'static str>,
    pub confirmations: &'static [Confirmation],
    pub steps: &'static [Step],
    pub done: &'static str,
    pub next_steps: &'static [&'static str],
}

const FORMAT_STEP: Step = Step {
    byte: FORMAT_COMMAND,
    announce: "Sending erase command...",
};

const PAUSE_STEP: Step = Step {
    byte: PAUSE_COMMAND,
    announce: "Sending pause logging command...",
};

const CHARGING_STEPS: &[&str] = &[
    "- Ensure the power switch is ON while charging (towards the USB-C port).",
    "- Leave the device charging for at least 4 hours.",
    "- Before unplugging, switch the device OFF to avoid draining the battery.",
];

static PREPARE_FOR_FLIGHT: CommandPlan = CommandPlan {
    label: "Before Flight (Format + Charge Mode)",
    warning: Some("WARNING: This will ERASE all existing data on the device."),
    confirmations: &[Confirmation::Yes, Confirmation::Typed("ERASE")],
    steps: &[FORMAT_STEP, PAUSE_STEP],
    done: "Device successfully prepared for flight.",
    next_steps: CHARGING_STEPS,
};

static FORMAT: CommandPlan = CommandPlan {
    label: "Format storage",
    warning: Some("WARNING: This will ERASE all existing data on the device."),
    confirmations: &[Confirmation::Typed("ERASE")],
    steps: &[FORMAT_STEP],
    done: "Storage formatted.",
    next_steps: &[],
};

static TOGGLE_PAUSE: CommandPlan = CommandPlan {
    label: "Toggle charge mode (pause/resume logging)",
    warning: None,
    confirmations: &[Confirmation::Yes],
    steps: &[Step {
        byte: PAUSE_COMMAND,
        announce: "Sending pause/resume command...",
    }],
    done: "Charge mode toggled.",
    next_steps: &[],
};

static DELETE: CommandPlan = CommandPlan {
    label: "Delete data file",
    warning: Some("WARNING: This will delete the recorded data file on the device."),
    confirmations: &[Confirmation::Typed("DELETE")],
    steps: &[Step {
        byte: DELETE_COMMAND,
        announce: "Sending delete command...",
    }],
    done: "Data file deleted.",
    next_steps: &[],
};

impl Action {
    pub fn plan(self) -> &'static CommandPlan {
        match self {
            Action::PrepareForFlight => &PREPARE_FOR_FLIGHT,
            Action::Format => &FORMAT,
            Action::TogglePause => &TOGGLE_PAUSE,
            Action::Delete => &DELETE,
        }
    }
}

pub fn confirm<R: BufRead, W: Write>(
    console: &mut Console<R, W>,
    confirmations: &[Confirmation],
) -> Result<bool> {
    for confirmation in confirmations {
        let accepted = match confirmation {
            Confirmation::Yes => console
                .prompt("Are you sure you want to continue? (yes/no): ")?
                .eq_ignore_ascii_case("yes"),
            Confirmation::Typed(word) => console
                .prompt(&format!("Please type '{}' to confirm: ", word))?
                .eq_ignore_ascii_case(word),
        };
        if !accepted {
            return Ok(false);
        }
    }
    Ok(true)
}

/// Confirm, then open the transport and send every step of `action`.
/// Nothing is opened if confirmation is declined.
pub fn dispatch<R, W, T, F>(
    action: Action,
    console: &mut Console<R, W>,
    open: F,
    step_delay: Duration,
) -> Result<()>
where
    R: BufRead,
    W: Write,
    T: Transport,
    F: FnOnce() -> Result<T>,
{
    let plan = action.plan();
    if let Some(warning) = plan.warning {
        console.say("")?;
        console.say(warning)?;
    }
    if !confirm(console, plan.confirmations)? {
        return Err(Error::Cancelled);
    }

    {
        let mut transport = open()?;
        for (i, step) in plan.steps.iter().enumerate() {
            if i > 0 && !step_delay.is_zero() {
                thread::sleep(step_delay);
            }
            console.say(step.announce)?;
            transport.write_command(&[step.byte])?;
            let command = step.byte as char;
            debug!(%command, ?action, "command sent");
        }
    }

    console.say(plan.done)?;
    if !plan.next_steps.is_empty() {
        console.say("\nNext Steps:")?;
        for line in plan.next_steps {
            console.say(line)?;
        }
    }
    Ok(())
}
