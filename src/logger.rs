//! Forwards `log` records from `frame-core` to defmt.

use log::{Level, LevelFilter, Log, Metadata, Record};

struct DefmtLogger;

impl Log for DefmtLogger {
    fn enabled(&self, _metadata: &Metadata) -> bool {
        true
    }

    fn log(&self, record: &Record) {
        let target = record.target();
        let args = defmt::Display2Format(record.args());
        match record.level() {
            Level::Error => defmt::error!("[{}] {}", target, args),
            Level::Warn => defmt::warn!("[{}] {}", target, args),
            Level::Info => defmt::info!("[{}] {}", target, args),
            Level::Debug => defmt::debug!("[{}] {}", target, args),
            Level::Trace => defmt::trace!("[{}] {}", target, args),
        }
    }

    fn flush(&self) {}
}

static LOGGER: DefmtLogger = DefmtLogger;

/// Install the bridge. Call once, before any task is spawned.
pub fn init() {
    // SAFETY: runs first thing in `main`, before any other code can log.
    unsafe {
        if log::set_logger_racy(&LOGGER).is_ok() {
            log::set_max_level_racy(LevelFilter::Debug);
        }
    }
}
