//! Serial-backed implementation of the `log` facade
//!
//! Records are written straight to the UART console. The logger is
//! installed once during early boot; before that, raw `println!` is the
//! only output path.

use log::{LevelFilter, Log, Metadata, Record};

struct SerialLogger;

static LOGGER: SerialLogger = SerialLogger;

impl Log for SerialLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        crate::println!(
            "[{:5}] {}: {}",
            record.level(),
            record.target(),
            record.args()
        );
    }

    fn flush(&self) {}
}

/// Install the serial logger. Safe to call exactly once; a second call is
/// ignored because the facade rejects double initialization.
pub fn init() {
    if log::set_logger(&LOGGER).is_ok() {
        log::set_max_level(LevelFilter::Info);
    }
}

/// Raise or lower the global level, e.g. from the `loglevel=` command-line
/// option handed over by the boot loader.
pub fn set_level(level: LevelFilter) {
    log::set_max_level(level);
}
