//! Dump ingestion.
//!
//! [`Ingestor`] is the line-level state machine and never touches I/O.
//! [`run_dump`] drives it from a [`Transport`] until the device sends the
//! end-of-dump line, the link fails, or the device goes quiet for too long.

use std::time::Duration;

use tracing::{error, info, trace, warn};

use crate::classify::{classify, split_fields, LineTag};
use crate::error::Error;
use crate::transport::{ReadOutcome, Transport};

pub const DUMP_COMMAND: u8 = b'b';

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DumpState {
    AwaitingHeader,
    Collecting,
    Done,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DumpResult {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

#[derive(Debug)]
pub enum DumpOutcome {
    Completed(DumpResult),
    /// The dump terminated cleanly without a single data row.
    NoData,
    /// The run failed. `partial` holds whatever was collected after the header, if anything.
    Aborted {
        error: Error,
        partial: Option<DumpResult>,
    },
}

/// Progress notifications emitted while a dump runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DumpEvent {
    CommandSent,
    HeaderCaptured { fields: usize },
    RowAccepted { rows: usize },
    Idle { consecutive: u32 },
    Finished { rows: usize },
}

pub trait DumpObserver {
    fn on_event(&mut self, event: DumpEvent);
}

impl<F: FnMut(DumpEvent)> DumpObserver for F {
    fn on_event(&mut self, event: DumpEvent) {
        self(event)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct DumpOptions {
    pub read_timeout: Duration,
    /// Consecutive idle reads after which the run fails with a timeout.
    pub idle_limit: u32,
}

#[derive(Debug)]
pub struct Ingestor {
    state: DumpState,
    headers: Vec<String>,
    rows: Vec<Vec<String>>,
}

impl Default for Ingestor {
    fn default() -> Self {
        Self::new()
    }
}

impl Ingestor {
    pub fn new() -> Self {
        Ingestor {
            state: DumpState::AwaitingHeader,
            headers: Vec::new(),
            rows: Vec::new(),
        }
    }

    pub fn state(&self) -> DumpState {
        self.state
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    /// Apply one line. Lines fed after the terminator are ignored.
    pub fn feed(&mut self, line: &str) -> LineTag {
        let tag = classify(line, self.state != DumpState::AwaitingHeader);
        match (self.state, tag) {
            (DumpState::Done, _) => {}
            (_, LineTag::Terminator) => self.state = DumpState::Done,
            (DumpState::AwaitingHeader, LineTag::Header) => {
                self.headers = split_fields(line);
                self.state = DumpState::Collecting;
            }
            (DumpState::Collecting, LineTag::Data) => self.rows.push(split_fields(line)),
            _ => {}
        }
        tag
    }

    /// The collected result, or `None` when no row was accepted.
    pub fn finish(self) -> Option<DumpResult> {
        if self.rows.is_empty() {
            return None;
        }
        Some(DumpResult {
            headers: self.headers,
            rows: self.rows,
        })
    }
}

/// Send the dump command and ingest the response until it terminates.
pub fn run_dump<T, O>(transport: &mut T, options: &DumpOptions, observer: &mut O) -> DumpOutcome
where
    T: Transport + ?Sized,
    O: DumpObserver + ?Sized,
{
    let mut ingestor = Ingestor::new();

    if let Err(e) = transport.write_command(&[DUMP_COMMAND]) {
        return abort(e, ingestor);
    }
    observer.on_event(DumpEvent::CommandSent);

    let idle_limit = options.idle_limit.max(1);
    let mut idle = 0u32;

    while ingestor.state() != DumpState::Done {
        let line = match transport.read_line() {
            Ok(ReadOutcome::Line(line)) => {
                idle = 0;
                line
            }
            Ok(ReadOutcome::Idle) => {
                idle += 1;
                warn!(consecutive = idle, limit = idle_limit, "no data from device");
                observer.on_event(DumpEvent::Idle { consecutive: idle });
                if idle >= idle_limit {
                    return abort(Error::Timeout(options.read_timeout * idle), ingestor);
                }
                continue;
            }
            Err(e) => return abort(e, ingestor),
        };

        let tag = ingestor.feed(&line);
        trace!(?tag, %line, "classified line");

        match tag {
            LineTag::Header => {
                let fields = ingestor.headers.len();
                info!(fields, "header found, collecting data");
                observer.on_event(DumpEvent::HeaderCaptured { fields });
            }
            LineTag::Data if ingestor.state() == DumpState::Collecting => {
                observer.on_event(DumpEvent::RowAccepted {
                    rows: ingestor.row_count(),
                });
            }
            _ => {}
        }
    }

    let rows = ingestor.row_count();
    info!(rows, "dump completed");
    observer.on_event(DumpEvent::Finished { rows });

    match ingestor.finish() {
        Some(result) => DumpOutcome::Completed(result),
        None => DumpOutcome::NoData,
    }
}

fn abort(error: Error, ingestor: Ingestor) -> DumpOutcome {
    error!(%error, rows = ingestor.row_count(), "dump aborted");
    DumpOutcome::Aborted {
        error,
        partial: ingestor.finish(),
    }
}
