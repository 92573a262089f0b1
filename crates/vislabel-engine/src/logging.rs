use std::fs::OpenOptions;
use std::io::Write;
use std::path::PathBuf;

use anyhow::{Context, Result};
use env_logger::Target;
use log::LevelFilter;

/// Where log lines go. The backend used to write to `doubao_backend.log`;
/// the binary keeps that as the file sink default.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogSink {
    Stderr,
    File(PathBuf),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogConfig {
    pub level: LevelFilter,
    pub sink: LogSink,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: LevelFilter::Info,
            sink: LogSink::Stderr,
        }
    }
}

impl LogConfig {
    pub fn new(level: LevelFilter, sink: LogSink) -> Self {
        Self { level, sink }
    }
}

pub fn parse_level(raw: &str) -> Result<LevelFilter> {
    raw.trim()
        .parse::<LevelFilter>()
        .with_context(|| format!("unknown log level '{raw}'"))
}

/// Installs the process-wide logger. Call once from the binary; library code
/// only uses the `log` macros.
pub fn init_logging(config: &LogConfig) -> Result<()> {
    let target = open_target(&config.sink)?;
    env_logger::Builder::new()
        .format(|buf, record| {
            writeln!(
                buf,
                "{} - {} - {} - {}",
                chrono::Local::now().format("%Y-%m-%d %H:%M:%S,%3f"),
                record.target(),
                record.level(),
                record.args()
            )
        })
        .filter(None, config.level)
        .target(target)
        .try_init()
        .context("logger already initialized")
}

fn open_target(sink: &LogSink) -> Result<Target> {
    match sink {
        LogSink::Stderr => Ok(Target::Stderr),
        LogSink::File(path) => {
            if let Some(parent) = path.parent().filter(|dir| !dir.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("failed creating {}", parent.display()))?;
            }
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("failed opening log file {}", path.display()))?;
            Ok(Target::Pipe(Box::new(file)))
        }
    }
}

#[cfg(test)]
mod tests {
    use log::LevelFilter;

    use super::{open_target, parse_level, LogConfig, LogSink};

    #[test]
    fn parse_level_accepts_case_insensitive_names() -> anyhow::Result<()> {
        assert_eq!(parse_level("INFO")?, LevelFilter::Info);
        assert_eq!(parse_level(" debug ")?, LevelFilter::Debug);
        assert_eq!(parse_level("off")?, LevelFilter::Off);
        assert!(parse_level("loud").is_err());
        Ok(())
    }

    #[test]
    fn file_sink_creates_parent_directories() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("logs").join("backend.log");
        let _target = open_target(&LogSink::File(path.clone()))?;
        assert!(path.exists());
        Ok(())
    }

    #[test]
    fn default_config_logs_info_to_stderr() {
        let config = LogConfig::default();
        assert_eq!(config.level, LevelFilter::Info);
        assert_eq!(config.sink, LogSink::Stderr);
    }
}
