//! Initialisation of the program logger.
//!
//! The library itself only logs through the `log` facade; the command line front end installs the
//! `fern` dispatcher defined here. Messages are coloured when written to a terminal, and copies
//! can be written to log files in the output directory.
use anyhow::{Context, Result, bail};
use chrono::Local;
use fern::colors::{Color, ColoredLevelConfig};
use fern::{Dispatch, FormatCallback};
use log::{LevelFilter, Record};
use std::env;
use std::fmt::Arguments;
use std::fs::OpenOptions;
use std::io::IsTerminal;
use std::path::Path;
use std::sync::OnceLock;

/// Set once the logger has been installed
static LOGGER_INIT: OnceLock<()> = OnceLock::new();

/// Environment variable overriding the log level
pub const LOG_LEVEL_ENV_VAR: &str = "ENSYS_LOG_LEVEL";

/// The log level used if neither the environment nor the settings file name one
pub const DEFAULT_LOG_LEVEL: &str = "info";

/// Log file for messages about the ordinary operation of the program
const LOG_INFO_FILE_NAME: &str = "ensys_info.log";

/// Log file for warnings and errors
const LOG_WARN_FILE_NAME: &str = "ensys_warn.log";

/// Whether the program logger has been initialised
pub fn is_logger_initialised() -> bool {
    LOGGER_INIT.get().is_some()
}

/// Convert a log level name into a [`LevelFilter`]
pub fn parse_level(level: &str) -> Result<LevelFilter> {
    Ok(match level.to_lowercase().as_str() {
        "off" => LevelFilter::Off,
        "error" => LevelFilter::Error,
        "warn" => LevelFilter::Warn,
        "info" => LevelFilter::Info,
        "debug" => LevelFilter::Debug,
        "trace" => LevelFilter::Trace,
        unknown => bail!("Unknown log level: {unknown}"),
    })
}

/// Initialise the program logger.
///
/// The level is taken from the `ENSYS_LOG_LEVEL` environment variable, then from the settings
/// file and finally defaults to `info`. Warnings and errors go to stderr, everything else to
/// stdout.
///
/// # Arguments
///
/// * `log_level_from_settings` - The log level given in `settings.toml`
/// * `log_file_path` - Directory for the log files; no files are written if `None`
pub fn init(log_level_from_settings: Option<&str>, log_file_path: Option<&Path>) -> Result<()> {
    let level = match env::var(LOG_LEVEL_ENV_VAR) {
        Ok(level) => parse_level(&level)
            .with_context(|| format!("Invalid value for {LOG_LEVEL_ENV_VAR}"))?,
        Err(_) => parse_level(log_level_from_settings.unwrap_or(DEFAULT_LOG_LEVEL))?,
    };

    let mut dispatch = Dispatch::new().chain(terminal_dispatch(level));
    if let Some(dir) = log_file_path {
        dispatch = dispatch.chain(file_dispatch(dir, level)?);
    }
    dispatch.apply().context("Logger already initialised")?;
    LOGGER_INIT.get_or_init(|| ());

    Ok(())
}

/// Messages below warning level go to stdout, the rest to stderr
fn terminal_dispatch(level: LevelFilter) -> Dispatch {
    let colours = ColoredLevelConfig::new()
        .error(Color::Red)
        .warn(Color::Yellow)
        .info(Color::Green)
        .debug(Color::Blue)
        .trace(Color::Magenta);
    let stdout_colour = std::io::stdout().is_terminal().then_some(colours);
    let stderr_colour = std::io::stderr().is_terminal().then_some(colours);

    Dispatch::new()
        .chain(
            Dispatch::new()
                .level(level)
                .filter(|metadata| metadata.level() > LevelFilter::Warn)
                .format(move |out, message, record| {
                    format_record(out, message, record, stdout_colour.as_ref());
                })
                .chain(std::io::stdout()),
        )
        .chain(
            Dispatch::new()
                .level(level.min(LevelFilter::Warn))
                .format(move |out, message, record| {
                    format_record(out, message, record, stderr_colour.as_ref());
                })
                .chain(std::io::stderr()),
        )
}

/// Copies of the messages in `dir`, split into an info and a warning file
fn file_dispatch(dir: &Path, level: LevelFilter) -> Result<Dispatch> {
    let open = |file_name: &str| {
        let path = dir.join(file_name);
        OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&path)
            .with_context(|| format!("Could not create log file {}", path.display()))
    };
    Ok(Dispatch::new()
        .chain(
            Dispatch::new()
                .level(level.max(LevelFilter::Info))
                .filter(|metadata| metadata.level() > LevelFilter::Warn)
                .format(format_plain)
                .chain(open(LOG_INFO_FILE_NAME)?),
        )
        .chain(
            Dispatch::new()
                .level(LevelFilter::Warn)
                .format(format_plain)
                .chain(open(LOG_WARN_FILE_NAME)?),
        ))
}

fn format_plain(out: FormatCallback, message: &Arguments, record: &Record) {
    format_record(out, message, record, None);
}

fn format_record(
    out: FormatCallback,
    message: &Arguments,
    record: &Record,
    colours: Option<&ColoredLevelConfig>,
) {
    let timestamp = Local::now().format("%Y-%m-%d %H:%M:%S");
    let target = record.target();
    match colours {
        Some(colours) => {
            let level = colours.color(record.level());
            out.finish(format_args!("{timestamp} {level:<5} {target}: {message}"));
        }
        None => {
            let level = record.level();
            out.finish(format_args!("{timestamp} {level:<5} {target}: {message}"));
        }
    }
}
