use console::Style;
use log::{Level, LevelFilter, Log, Metadata, Record};

/// Environment variable overriding the verbosity flags (`error` .. `trace`).
pub const LOG_ENV_VAR: &str = "DOCBRIDGE_LOG";

struct ConsoleLogger {
    level: LevelFilter,
}

impl Log for ConsoleLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= self.level
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let style = match record.level() {
            Level::Error => Style::new().red().bold(),
            Level::Warn => Style::new().yellow(),
            Level::Info => Style::new().cyan(),
            Level::Debug | Level::Trace => Style::new().dim(),
        };
        let tag = format!("[{:<5}]", record.level());
        eprintln!("{} {}: {}", style.apply_to(tag), record.target(), record.args());
    }

    fn flush(&self) {}
}

pub fn level_for(verbosity: u8) -> LevelFilter {
    if let Some(level) = std::env::var(LOG_ENV_VAR).ok().and_then(|raw| raw.parse::<LevelFilter>().ok()) {
        return level;
    }
    match verbosity {
        0 => LevelFilter::Warn,
        1 => LevelFilter::Info,
        2 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    }
}

/// Install the stderr logger. A second call keeps the first logger.
pub fn init(verbosity: u8) {
    let level = level_for(verbosity);
    let logger: &'static ConsoleLogger = Box::leak(Box::new(ConsoleLogger { level }));
    if log::set_logger(logger).is_ok() {
        log::set_max_level(level);
    }
}
