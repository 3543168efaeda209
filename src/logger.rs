use chrono::{DateTime, Utc};
use log::{LevelFilter, Metadata, Record, SetLoggerError};
use std::str::FromStr;
use std::time::SystemTime;

struct SimpleLogger {
    level: LevelFilter,
}

impl log::Log for SimpleLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= self.level
    }

    fn log(&self, record: &Record) {
        if self.enabled(record.metadata()) {
            let now: DateTime<Utc> = SystemTime::now().into();
            println!(
                "[{}] {} {} - {}",
                now.to_rfc3339(),
                record.level(),
                record.target(),
                record.args()
            );
        }
    }

    fn flush(&self) {}
}

/// Parses a level name, falling back to `Info` for anything unrecognised.
pub fn parse_level(name: &str) -> LevelFilter {
    LevelFilter::from_str(name).unwrap_or(LevelFilter::Info)
}

pub fn init(level: LevelFilter) -> Result<(), SetLoggerError> {
    let logger = Box::new(SimpleLogger { level });
    log::set_boxed_logger(logger).map(|()| log::set_max_level(level))
}
