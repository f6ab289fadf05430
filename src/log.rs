use crate::error::Error;
use log::{LevelFilter, Log, Metadata, Record};
use std::fs::OpenOptions;
use std::path::Path;
use std::sync::{PoisonError, RwLock};

/// Default log file, used until the configured one is known.
pub const INITIAL_LOG_FILE: &str = "/tmp/xds-gdb.log";

/// Global logger that forwards records to a replaceable inner logger.
/// xds-gdb must never log into the terminal (stdout carries the debugger stream),
/// so logs always go into a file that may change once configuration is loaded.
pub struct LoggerSwitcher {
    inner: RwLock<Option<Box<dyn Log>>>,
}

pub static LOGGER_SWITCHER: LoggerSwitcher = LoggerSwitcher {
    inner: RwLock::new(None),
};

impl LoggerSwitcher {
    /// Install switcher as a global logger, no-op if already installed.
    pub fn install(&'static self) {
        _ = log::set_logger(self);
    }

    /// Replace the underlying logger and the maximum level.
    pub fn switch(&self, logger: impl Log + 'static, filter: LevelFilter) {
        let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(old) = inner.as_ref() {
            old.flush();
        }
        *inner = Some(Box::new(logger));
        log::set_max_level(filter);
    }
}

impl Log for LoggerSwitcher {
    fn enabled(&self, metadata: &Metadata) -> bool {
        let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        inner.as_ref().is_some_and(|l| l.enabled(metadata))
    }

    fn log(&self, record: &Record) {
        let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        if let Some(logger) = inner.as_ref() {
            logger.log(record)
        }
    }

    fn flush(&self) {
        let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        if let Some(logger) = inner.as_ref() {
            logger.flush()
        }
    }
}

/// Parse a level name, accepting the names used by XDS tools (`warning`, `fatal`, `panic`).
pub fn parse_level(level: &str) -> Result<LevelFilter, Error> {
    match level.trim().to_lowercase().as_str() {
        "panic" | "fatal" | "error" => Ok(LevelFilter::Error),
        "warn" | "warning" => Ok(LevelFilter::Warn),
        "info" => Ok(LevelFilter::Info),
        "debug" => Ok(LevelFilter::Debug),
        "trace" => Ok(LevelFilter::Trace),
        "off" => Ok(LevelFilter::Off),
        _ => Err(Error::InvalidLogLevel(level.to_string())),
    }
}

/// Create an `env_logger` logger writing into `path`.
///
/// # Arguments
///
/// * `path`: log file, created if missing
/// * `level`: maximum level of records
/// * `truncate`: discard previous file content, otherwise records are appended
pub fn file_logger(
    path: &Path,
    level: LevelFilter,
    truncate: bool,
) -> Result<env_logger::Logger, Error> {
    let mut options = OpenOptions::new();
    options.create(true);
    if truncate {
        options.write(true).truncate(true);
    } else {
        options.append(true);
    }
    let file = options
        .open(path)
        .map_err(|_| Error::LogFile(path.display().to_string()))?;

    Ok(env_logger::Builder::new()
        .filter_level(level)
        .target(env_logger::Target::Pipe(Box::new(file)))
        .write_style(env_logger::WriteStyle::Never)
        .format_timestamp_millis()
        .build())
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_parse_level() {
        assert_eq!(parse_level("warning").unwrap(), LevelFilter::Warn);
        assert_eq!(parse_level("Debug").unwrap(), LevelFilter::Debug);
        assert_eq!(parse_level("fatal").unwrap(), LevelFilter::Error);
        assert!(matches!(
            parse_level("verbose"),
            Err(Error::InvalidLogLevel(l)) if l == "verbose"
        ));
    }

    #[test]
    fn test_file_logger_reports_unwritable_path() {
        let err = file_logger(Path::new("/nonexistent-dir/xds.log"), LevelFilter::Info, true)
            .err()
            .unwrap();
        assert!(matches!(err, Error::LogFile(_)));
    }

    #[test]
    fn test_file_logger_appends() {
        let path = std::env::temp_dir().join(format!("xds-gdb-log-{}", std::process::id()));
        std::fs::write(&path, "first run\n").unwrap();

        let logger = file_logger(&path, LevelFilter::Info, false).unwrap();
        logger.log(
            &Record::builder()
                .args(format_args!("second run"))
                .level(log::Level::Info)
                .target("bridge")
                .build(),
        );
        logger.flush();

        let content = std::fs::read_to_string(&path).unwrap();
        assert!(content.starts_with("first run\n"));
        assert!(content.contains("second run"));
        std::fs::remove_file(&path).unwrap();
    }
}
