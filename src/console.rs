use std::fmt::Display;
use std::io::{BufRead, Write};
use std::path::PathBuf;
use std::time::Duration;

use chrono::Local;
use tracing::{error, warn};

use crate::commands::{self, Action};
use crate::dump::{run_dump, DumpEvent, DumpObserver, DumpOptions, DumpOutcome};
use crate::error::{Error, Result};
use crate::sink::RecordSink;
use crate::transport::{decode_line, PortEntry, Transport};

const PROGRESS_EVERY: usize = 100;
const SPINNER: [char; 4] = ['|', '/', '-', '\\'];

pub struct Console<R, W> {
    input: R,
    output: W,
}

impl<R: BufRead, W: Write> Console<R, W> {
    pub fn new(input: R, output: W) -> Self {
        Console { input, output }
    }

    pub fn say(&mut self, text: impl Display) -> Result<()> {
        writeln!(self.output, "{}", text).map_err(Error::Console)
    }

    /// Print `question` and read one trimmed answer, decoded like device lines.
    /// EOF is [`Error::ConsoleClosed`].
    pub fn prompt(&mut self, question: &str) -> Result<String> {
        write!(self.output, "{}", question).map_err(Error::Console)?;
        self.output.flush().map_err(Error::Console)?;

        let mut answer = Vec::new();
        match self
            .input
            .read_until(b'\n', &mut answer)
            .map_err(Error::Console)?
        {
            0 => Err(Error::ConsoleClosed),
            _ => Ok(decode_line(&answer)),
        }
    }

    pub fn output_mut(&mut self) -> &mut W {
        &mut self.output
    }

    #[cfg(test)]
    pub fn into_output(self) -> W {
        self.output
    }
}

/// First frame at the first progress line, then one frame per line after that.
pub fn spinner_frame(rows: usize) -> char {
    SPINNER[(rows / PROGRESS_EVERY).saturating_sub(1) % SPINNER.len()]
}

/// Prints dump progress on a single console line.
pub struct Progress<'a, W: Write> {
    out: &'a mut W,
}

impl<'a, W: Write> Progress<'a, W> {
    pub fn new(out: &'a mut W) -> Self {
        Progress { out }
    }
}

impl<W: Write> DumpObserver for Progress<'_, W> {
    fn on_event(&mut self, event: DumpEvent) {
        let written = match event {
            DumpEvent::CommandSent => writeln!(self.out, "Requesting data from ESP32..."),
            DumpEvent::HeaderCaptured { .. } => {
                writeln!(self.out, "Header found. Starting data collection...")
            }
            DumpEvent::RowAccepted { rows } if rows % PROGRESS_EVERY == 0 => write!(
                self.out,
                "\rReading data: {} {}",
                rows,
                spinner_frame(rows)
            )
            .and_then(|_| self.out.flush()),
            DumpEvent::Idle { consecutive } => {
                writeln!(self.out, "\nWaiting for device... ({})", consecutive)
            }
            DumpEvent::Finished { .. } => writeln!(self.out, "\nData dump completed."),
            _ => Ok(()),
        };
        if let Err(e) = written {
            warn!(error = %e, "failed to print progress");
        }
    }
}

/// Keep asking until a listed port is picked. An empty answer re-enumerates.
pub fn select_port<R, W, L>(console: &mut Console<R, W>, mut list: L) -> Result<String>
where
    R: BufRead,
    W: Write,
    L: FnMut() -> Result<Vec<PortEntry>>,
{
    loop {
        let ports = list()?;
        console.say("\nAvailable USB Serial Ports:\n")?;
        if ports.is_empty() {
            console.say("No devices found. Plug in ESP32 and press Enter to refresh.")?;
        } else {
            for (i, port) in ports.iter().enumerate() {
                console.say(format!("[{}] {} - {}", i, port.path, port.description))?;
            }
            console.say("\nEnter number to select port, or press Enter to refresh:")?;
        }

        let choice = console.prompt("> ")?;
        if choice.is_empty() {
            continue;
        }
        match choice.parse::<usize>().ok().and_then(|i| ports.get(i)) {
            Some(port) => {
                console.say(format!("\nSelected port: {}", port.path))?;
                return Ok(port.path.clone());
            }
            None => console.say("Invalid selection. Try again.")?,
        }
    }
}

pub struct MenuSettings {
    pub dump: DumpOptions,
    pub output_dir: PathBuf,
    pub keep_partial: bool,
    pub step_delay: Duration,
}

const MENU: &[(&str, MenuItem)] = &[
    ("1", MenuItem::Command(Action::PrepareForFlight)),
    ("2", MenuItem::Download),
    ("3", MenuItem::Command(Action::Format)),
    ("4", MenuItem::Command(Action::TogglePause)),
    ("5", MenuItem::Command(Action::Delete)),
    ("6", MenuItem::Exit),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MenuItem {
    Command(Action),
    Download,
    Exit,
}

impl MenuItem {
    fn label(self) -> &'static str {
        match self {
            MenuItem::Command(action) => action.plan().label,
            MenuItem::Download => "After Flight (Download CSV)",
            MenuItem::Exit => "Exit",
        }
    }
}

/// The action loop. Every action opens its own transport through `open`.
pub struct Menu<'c, R, W, F> {
    console: &'c mut Console<R, W>,
    open: F,
    settings: MenuSettings,
    sink: RecordSink,
}

impl<'c, R, W, F, T> Menu<'c, R, W, F>
where
    R: BufRead,
    W: Write,
    F: FnMut() -> Result<T>,
    T: Transport,
{
    pub fn new(console: &'c mut Console<R, W>, open: F, settings: MenuSettings) -> Self {
        let sink = RecordSink::new(settings.output_dir.clone());
        Menu {
            console,
            open,
            settings,
            sink,
        }
    }

    /// Runs until the user exits. Only a closed console ends it with an error.
    pub fn run(&mut self) -> Result<()> {
        loop {
            self.console.say("\nChoose mode:")?;
            for (key, item) in MENU {
                self.console.say(format!("[{}] {}", key, item.label()))?;
            }

            let choice = self.console.prompt("> ")?;
            let item = match MENU.iter().find(|(key, _)| *key == choice) {
                Some((_, item)) => *item,
                None => {
                    self.console.say("Invalid option. Try again.")?;
                    continue;
                }
            };

            let result = match item {
                MenuItem::Exit => {
                    self.console.say("Exiting.")?;
                    return Ok(());
                }
                MenuItem::Download => self.download(),
                MenuItem::Command(action) => commands::dispatch(
                    action,
                    self.console,
                    &mut self.open,
                    self.settings.step_delay,
                ),
            };

            match result {
                Ok(()) => {}
                Err(e @ (Error::ConsoleClosed | Error::Console(_))) => return Err(e),
                Err(Error::Cancelled) => self.console.say("Operation cancelled.")?,
                Err(e) if e.is_connection() => {
                    self.console.say(format!("Serial communication error: {}", e))?
                }
                Err(e) => self.console.say(format!("Error: {}", e))?,
            }
        }
    }

    fn download(&mut self) -> Result<()> {
        let started = Local::now().naive_local();

        let outcome = {
            let mut transport = (self.open)()?;
            let mut progress = Progress::new(self.console.output_mut());
            run_dump(&mut transport, &self.settings.dump, &mut progress)
        };

        match outcome {
            DumpOutcome::Completed(result) => {
                let path = self.sink.save(&result, &started, false)?;
                self.console
                    .say(format!("\nData successfully saved to: {}", path.display()))?;
                self.console.say(
                    "You can now open the CSV in Excel, Google Sheets, or your preferred analysis tool.",
                )
            }
            DumpOutcome::NoData => self.console.say(
                "No data received from device. Please ensure the device is powered on and logging has occurred.",
            ),
            DumpOutcome::Aborted { error, partial } => {
                if let (true, Some(partial)) = (self.settings.keep_partial, partial) {
                    match self.sink.save(&partial, &started, true) {
                        Ok(path) => self.console.say(format!(
                            "\nSaved {} rows received before the failure to: {}",
                            partial.rows.len(),
                            path.display()
                        ))?,
                        Err(e) => {
                            error!(error = %e, "failed to save partial dump");
                            self.console
                                .say(format!("\nCould not save the partial data: {}", e))?;
                        }
                    }
                }
                Err(error)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dump::tests::ScriptedTransport;
    use std::cell::Cell;
    use std::fs;
    use std::io::Cursor;
    use std::path::Path;

    fn console(input: &str) -> Console<Cursor<Vec<u8>>, Vec<u8>> {
        console_bytes(input.as_bytes())
    }

    fn console_bytes(input: &[u8]) -> Console<Cursor<Vec<u8>>, Vec<u8>> {
        Console::new(Cursor::new(input.to_vec()), Vec::new())
    }

    fn settings(dir: &Path, keep_partial: bool) -> MenuSettings {
        MenuSettings {
            dump: DumpOptions {
                read_timeout: Duration::from_secs(5),
                idle_limit: 2,
            },
            output_dir: dir.to_path_buf(),
            keep_partial,
            step_delay: Duration::ZERO,
        }
    }

    fn csv_files(dir: &Path) -> Vec<String> {
        let mut names: Vec<String> = fs::read_dir(dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        names
    }

    const FULL_DUMP: &[&str] = &[
        "ESP32 logger v2",
        "timestamp_ms,ax,ay,az,gx,gy",
        "1,2,3,4,5,6",
        "# note",
        "7,8,9,10,11,12",
        "...End of binary file dump....",
    ];

    #[test]
    fn prompt_trims_and_detects_eof() {
        let mut c = console("  3 \n");
        assert_eq!(c.prompt("> ").unwrap(), "3");
        assert!(matches!(c.prompt("> "), Err(Error::ConsoleClosed)));
    }

    #[test]
    fn spinner_advances_per_hundred_rows() {
        assert_eq!(spinner_frame(100), '|');
        assert_eq!(spinner_frame(200), '/');
        assert_eq!(spinner_frame(400), '\\');
        assert_eq!(spinner_frame(500), '|');
    }

    #[test]
    fn selects_port_after_refresh_and_bad_input() {
        let calls = Cell::new(0);
        let mut c = console("\nx\n7\n1\n");
        let port = select_port(&mut c, || {
            calls.set(calls.get() + 1);
            Ok(vec![
                PortEntry {
                    path: "/dev/ttyS0".into(),
                    description: "n/a".into(),
                },
                PortEntry {
                    path: "/dev/ttyUSB0".into(),
                    description: "CP2102 (10c4:ea60)".into(),
                },
            ])
        })
        .unwrap();

        assert_eq!(port, "/dev/ttyUSB0");
        assert_eq!(calls.get(), 4);
        let out = String::from_utf8(c.into_output()).unwrap();
        assert!(out.contains("[1] /dev/ttyUSB0 - CP2102 (10c4:ea60)"));
        assert!(out.contains("Invalid selection. Try again."));
    }

    #[test]
    fn no_ports_asks_to_plug_in() {
        let mut c = console("");
        let err = select_port(&mut c, || Ok(Vec::new())).unwrap_err();
        assert!(matches!(err, Error::ConsoleClosed));
        let out = String::from_utf8(c.into_output()).unwrap();
        assert!(out.contains("No devices found."));
    }

    #[test]
    fn download_writes_csv() {
        let dir = tempfile::tempdir().unwrap();
        let mut c = console("2\n6\n");
        Menu::new(
            &mut c,
            || Ok(ScriptedTransport::lines(FULL_DUMP)),
            settings(dir.path(), false),
        )
        .run()
        .unwrap();

        let files = csv_files(dir.path());
        assert_eq!(files.len(), 1);
        assert!(files[0].starts_with("esp32_impact_data_"));
        let contents = fs::read_to_string(dir.path().join(&files[0])).unwrap();
        assert_eq!(
            contents,
            "timestamp_ms,ax,ay,az,gx,gy\n1,2,3,4,5,6\n7,8,9,10,11,12\n"
        );
        let out = String::from_utf8(c.into_output()).unwrap();
        assert!(out.contains("Header found. Starting data collection..."));
        assert!(out.contains("Data successfully saved to:"));
    }

    #[test]
    fn empty_dump_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let mut c = console("2\n6\n");
        Menu::new(
            &mut c,
            || {
                Ok(ScriptedTransport::lines(&[
                    "timestamp_ms,a,b,c,d,e",
                    "End of binary file dump.",
                ]))
            },
            settings(dir.path(), false),
        )
        .run()
        .unwrap();

        assert!(csv_files(dir.path()).is_empty());
        let out = String::from_utf8(c.into_output()).unwrap();
        assert!(out.contains("No data received from device."));
    }

    #[test]
    fn failed_dump_is_reported_and_menu_continues() {
        let dir = tempfile::tempdir().unwrap();
        let mut c = console("2\n6\n");
        Menu::new(
            &mut c,
            || Ok(ScriptedTransport::lines(&FULL_DUMP[..3])),
            settings(dir.path(), false),
        )
        .run()
        .unwrap();

        assert!(csv_files(dir.path()).is_empty());
        let out = String::from_utf8(c.into_output()).unwrap();
        assert!(out.contains("Serial communication error: device disconnected"));
        assert!(out.contains("Exiting."));
    }

    #[test]
    fn failed_dump_keeps_partial_when_asked() {
        let dir = tempfile::tempdir().unwrap();
        let mut c = console("2\n6\n");
        Menu::new(
            &mut c,
            || Ok(ScriptedTransport::lines(&FULL_DUMP[..3])),
            settings(dir.path(), true),
        )
        .run()
        .unwrap();

        let files = csv_files(dir.path());
        assert_eq!(files.len(), 1);
        assert!(files[0].ends_with("_partial.csv"));
    }

    #[test]
    fn open_failure_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let mut c = console("4\nyes\n6\n");
        Menu::new(
            &mut c,
            || -> Result<ScriptedTransport> { Err(Error::Disconnected) },
            settings(dir.path(), false),
        )
        .run()
        .unwrap();

        let out = String::from_utf8(c.into_output()).unwrap();
        assert!(out.contains("Serial communication error"));
    }

    #[test]
    fn cancel_and_invalid_options_keep_looping() {
        let dir = tempfile::tempdir().unwrap();
        let opened = Cell::new(0);
        let mut c = console("9\n5\nno\n6\n");
        Menu::new(
            &mut c,
            || {
                opened.set(opened.get() + 1);
                Ok(ScriptedTransport::default())
            },
            settings(dir.path(), false),
        )
        .run()
        .unwrap();

        assert_eq!(opened.get(), 0);
        let out = String::from_utf8(c.into_output()).unwrap();
        assert!(out.contains("Invalid option. Try again."));
        assert!(out.contains("Operation cancelled."));
    }

    #[test]
    fn invalid_utf8_answer_is_rejected_not_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let mut c = console_bytes(b"\xff\n6\n");
        Menu::new(
            &mut c,
            || Ok(ScriptedTransport::default()),
            settings(dir.path(), false),
        )
        .run()
        .unwrap();

        let out = String::from_utf8(c.into_output()).unwrap();
        assert!(out.contains("Invalid option. Try again."));
        assert!(out.contains("Exiting."));
    }

    #[test]
    fn failed_partial_save_still_reports_link_error() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("file");
        fs::write(&file, b"").unwrap();
        let mut c = console("2\n6\n");
        Menu::new(
            &mut c,
            || Ok(ScriptedTransport::lines(&FULL_DUMP[..3])),
            settings(&file.join("out"), true),
        )
        .run()
        .unwrap();

        let out = String::from_utf8(c.into_output()).unwrap();
        assert!(out.contains("Could not save the partial data"));
        assert!(out.contains("Serial communication error: device disconnected"));
        assert!(out.contains("Exiting."));
    }

    #[test]
    fn progress_reports_idle_waits() {
        let mut out = Vec::new();
        let mut progress = Progress::new(&mut out);
        progress.on_event(DumpEvent::Idle { consecutive: 2 });
        progress.on_event(DumpEvent::RowAccepted { rows: 100 });
        let out = String::from_utf8(out).unwrap();
        assert!(out.contains("Waiting for device... (2)"));
        assert!(out.contains("\rReading data: 100 |"));
    }

    #[test]
    fn closed_console_ends_menu() {
        let dir = tempfile::tempdir().unwrap();
        let mut c = console("");
        let err = Menu::new(
            &mut c,
            || Ok(ScriptedTransport::default()),
            settings(dir.path(), false),
        )
        .run()
        .unwrap_err();
        assert!(matches!(err, Error::ConsoleClosed));
    }
}
