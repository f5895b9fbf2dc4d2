//! Backend for the [`log`] facade that writes to the [console](crate::console).

use crate::console;
use core::fmt::{self, Write};
use log::{Level, LevelFilter, Log, Metadata, Record, SetLoggerError};
use owo_colors::OwoColorize;

static LOGGER: Logger = Logger;

/// The maximum level that will be printed.
#[cfg(any(debug_assertions, feature = "logging"))]
pub const MAX_LEVEL: LevelFilter = LevelFilter::Trace;
/// The maximum level that will be printed.
#[cfg(all(not(debug_assertions), not(feature = "logging")))]
pub const MAX_LEVEL: LevelFilter = LevelFilter::Info;

struct Logger;

impl Log for Logger {
    fn enabled(&self, metadata: &Metadata<'_>) -> bool {
        metadata.level() <= MAX_LEVEL
    }

    fn log(&self, record: &Record<'_>) {
        if !self.enabled(record.metadata()) {
            return;
        }

        let mod_path = record
            .module_path_static()
            .or_else(|| record.module_path())
            .unwrap_or("<n/a>");

        // console errors are dropped
        let mut guard = console::lock();
        let _ = write_record(&mut *guard, record.level(), mod_path, record.args());
    }

    fn flush(&self) {}
}

fn write_record(
    out: &mut impl Write,
    level: Level,
    module: &str,
    args: &fmt::Arguments<'_>,
) -> fmt::Result {
    write!(out, "[ ")?;
    match level {
        Level::Error => write!(out, "{:>5}", "ERROR".red())?,
        Level::Warn => write!(out, "{:>5}", "WARN".yellow())?,
        Level::Info => write!(out, "{:>5}", "INFO".cyan())?,
        Level::Debug => write!(out, "{:>5}", "DEBUG".magenta())?,
        Level::Trace => write!(out, "{:>5}", "TRACE".dimmed())?,
    }
    writeln!(out, " ] [{}] {}", module, args)
}

/// Install the console logger as the global logger of the [`log`] crate.
pub fn init() -> Result<(), SetLoggerError> {
    log::set_logger(&LOGGER)?;
    log::set_max_level(MAX_LEVEL);
    Ok(())
}
