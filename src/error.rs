use std::io;
use std::path::PathBuf;
use std::time::Duration;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("failed to open serial port \"{port}\": {source}")]
    Open {
        port: String,
        #[source]
        source: serialport::Error,
    },
    #[error("failed to enumerate serial ports: {0}")]
    Enumerate(#[source] serialport::Error),
    #[error("serial write failed: {0}")]
    Write(#[source] io::Error),
    #[error("serial read failed: {0}")]
    Read(#[source] io::Error),
    #[error("device disconnected")]
    Disconnected,
    #[error("no data from device for {0:?}")]
    Timeout(Duration),
    #[error("operation cancelled")]
    Cancelled,
    #[error("console input closed")]
    ConsoleClosed,
    #[error("console I/O failed: {0}")]
    Console(#[source] io::Error),
    #[error("failed to write \"{}\": {source}", path.display())]
    Sink {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },
    #[error("failed to create output directory \"{}\": {source}", path.display())]
    CreateOutput {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl Error {
    /// Whether this error means the serial link itself failed.
    pub fn is_connection(&self) -> bool {
        matches!(
            self,
            Error::Open { .. }
                | Error::Write(_)
                | Error::Read(_)
                | Error::Disconnected
                | Error::Timeout(_)
        )
    }
}
