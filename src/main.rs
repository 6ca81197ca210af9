mod classify;
mod commands;
mod console;
mod dump;
mod error;
mod sink;
mod transport;

use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::time::Duration;

use clap::{Arg, Command};
use tracing::debug;
use tracing_subscriber::EnvFilter;

use console::{select_port, Console, Menu, MenuSettings};
use dump::DumpOptions;
use transport::SerialTransport;

const APP_NAME: &str = "ESP32 Impact Logger";

const DEFAULT_BAUD_RATE: &str = "115200";
const DEFAULT_TIMEOUT_SEC: &str = "5";
const DEFAULT_IDLE_READS: &str = "3";
const DEFAULT_SETTLE_MILISEC: &str = "2000";
const DEFAULT_OUTPUT_DIR: &str = ".";

const DEFAULT_LOG_FILTER: &str = "warn";

#[derive(Debug)]
struct Config {
    port_name: Option<String>,
    baud_rate: u32,
    timeout: Duration,
    idle_reads: u32,
    settle: Duration,
    output_dir: PathBuf,
    keep_partial: bool,
}

impl Config {
    fn new(matches: &clap::ArgMatches) -> Result<Self, String> {
        let port_name = matches.value_of("port").map(str::to_string);
        let baud_rate = value(matches, "baud")?
            .parse::<u32>()
            .map_err(|_| "Invalid baud rate".to_string())?;
        let timeout = value(matches, "timeout")?
            .parse::<u64>()
            .map_err(|_| "Invalid timeout".to_string())?;
        let idle_reads = value(matches, "idle_reads")?
            .parse::<u32>()
            .map_err(|_| "Invalid idle read count".to_string())?;
        let settle = value(matches, "settle_ms")?
            .parse::<u64>()
            .map_err(|_| "Invalid settle delay".to_string())?;
        let output_dir = PathBuf::from(value(matches, "output_dir")?);

        if timeout == 0 {
            return Err("Timeout must be at least 1 second".to_string());
        }
        if idle_reads == 0 {
            return Err("Idle read count must be at least 1".to_string());
        }

        Ok(Config {
            port_name,
            baud_rate,
            timeout: Duration::from_secs(timeout),
            idle_reads,
            settle: Duration::from_millis(settle),
            output_dir,
            keep_partial: matches.is_present("keep_partial"),
        })
    }

    fn validate_number(val: &str) -> Result<(), String> {
        val.parse::<u64>()
            .map(|_| ())
            .map_err(|_| format!("`{}` is not a valid number!", val))
    }

    fn valid_baud(val: &str) -> Result<(), String> {
        val.parse::<u32>()
            .map(|_| ())
            .map_err(|_| format!("Invalid baud rate '{}' specified", val))
    }

    fn menu_settings(&self) -> MenuSettings {
        MenuSettings {
            dump: DumpOptions {
                read_timeout: self.timeout,
                idle_limit: self.idle_reads,
            },
            output_dir: self.output_dir.clone(),
            keep_partial: self.keep_partial,
            step_delay: self.settle,
        }
    }
}

fn value<'a>(matches: &'a clap::ArgMatches, name: &str) -> Result<&'a str, String> {
    matches
        .value_of(name)
        .ok_or_else(|| format!("Missing value for '{}'", name))
}

fn command() -> Command<'static> {
    Command::new(APP_NAME)
        .about("Formats, pauses and downloads recorded data from an ESP32 impact logger over a serial port")
        .arg(
            Arg::new("port")
                .short('p')
                .long("port")
                .takes_value(true)
                .help("The device path to the serial port (prompts with a list of ports if omitted)"),
        )
        .arg(
            Arg::new("baud")
                .short('b')
                .long("baud")
                .takes_value(true)
                .help("The baud rate for communication")
                .default_value(DEFAULT_BAUD_RATE)
                .validator(Config::valid_baud),
        )
        .arg(
            Arg::new("timeout")
                .short('t')
                .long("timeout")
                .takes_value(true)
                .help("Seconds to wait for each line from the device")
                .default_value(DEFAULT_TIMEOUT_SEC)
                .validator(Config::validate_number),
        )
        .arg(
            Arg::new("idle_reads")
                .long("idle-reads")
                .takes_value(true)
                .help("Consecutive empty reads tolerated before a data dump is abandoned")
                .default_value(DEFAULT_IDLE_READS)
                .validator(Config::validate_number),
        )
        .arg(
            Arg::new("settle_ms")
                .long("settle-ms")
                .takes_value(true)
                .help("Milliseconds to wait after opening the port while the board resets")
                .default_value(DEFAULT_SETTLE_MILISEC)
                .validator(Config::validate_number),
        )
        .arg(
            Arg::new("output_dir")
                .short('o')
                .long("output-dir")
                .takes_value(true)
                .help("Directory the downloaded CSV files are written to")
                .default_value(DEFAULT_OUTPUT_DIR),
        )
        .arg(
            Arg::new("keep_partial")
                .long("keep-partial")
                .help("Save the rows received before a failed download to a *_partial.csv file"),
        )
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}

fn run<R: BufRead, W: Write>(config: &Config, console: &mut Console<R, W>) -> error::Result<()> {
    let port_name = match &config.port_name {
        Some(port_name) => port_name.clone(),
        None => select_port(console, transport::available_ports)?,
    };
    debug!(port = %port_name, ?config, "starting session");

    let (baud_rate, timeout, settle) = (config.baud_rate, config.timeout, config.settle);
    let open = || SerialTransport::open(&port_name, baud_rate, timeout, settle);
    Menu::new(console, open, config.menu_settings()).run()
}

fn main() {
    init_logging();
    let matches = command().get_matches();

    let config = match Config::new(&matches) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{}", e);
            std::process::exit(1);
        }
    };

    let mut console = Console::new(io::stdin().lock(), io::stdout());
    if let Err(e) = run(&config, &mut console) {
        eprintln!("{}", e);
        std::process::exit(1);
    }
}
