//! Log setup for the binary
//!
//! Logging is off unless `--log-level` or `TF_LOG` asks for it. Output goes
//! to `TF_LOG_PATH` or `<config dir>/tfotc/tfotc.log` through a
//! non-blocking writer; stdout and stderr stay free for results and
//! diagnostics.

use clap::ValueEnum;
use std::path::PathBuf;
use tracing::Level;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

pub const LOG_ENV: &str = "TF_LOG";
pub const LOG_PATH_ENV: &str = "TF_LOG_PATH";

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogLevel {
    Off,
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    pub fn to_tracing_level(self) -> Option<Level> {
        match self {
            LogLevel::Off => None,
            LogLevel::Error => Some(Level::ERROR),
            LogLevel::Warn => Some(Level::WARN),
            LogLevel::Info => Some(Level::INFO),
            LogLevel::Debug => Some(Level::DEBUG),
            LogLevel::Trace => Some(Level::TRACE),
        }
    }

    /// Parse a `TF_LOG` value (`TRACE`, `debug`, ...)
    pub fn from_env_value(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "" | "off" => Some(LogLevel::Off),
            "error" => Some(LogLevel::Error),
            "warn" => Some(LogLevel::Warn),
            "info" => Some(LogLevel::Info),
            "debug" => Some(LogLevel::Debug),
            "trace" | "json" => Some(LogLevel::Trace),
            _ => None,
        }
    }
}

/// Filter from `TF_LOG` when it holds a level or directive, else `level`
fn build_filter(level: Level, env_value: Option<&str>) -> EnvFilter {
    match env_value {
        Some(value) if LogLevel::from_env_value(value).is_none() => {
            EnvFilter::try_new(value).unwrap_or_else(|_| EnvFilter::new(level.to_string()))
        }
        _ => EnvFilter::new(level.to_string()),
    }
}

/// Effective level: an explicit `--log-level` wins over `TF_LOG`
fn effective_level(flag: LogLevel, env_value: Option<&str>) -> LogLevel {
    if flag != LogLevel::Off {
        return flag;
    }
    match env_value {
        Some(value) => LogLevel::from_env_value(value).unwrap_or(LogLevel::Trace),
        None => LogLevel::Off,
    }
}

pub fn setup_logging(flag: LogLevel) -> Option<WorkerGuard> {
    let env_value = std::env::var(LOG_ENV).ok();
    let level = effective_level(flag, env_value.as_deref());
    let tracing_level = level.to_tracing_level()?;

    let log_path = get_log_path();
    if let Some(parent) = log_path.parent() {
        let _ = std::fs::create_dir_all(parent);
    }

    let file = match std::fs::OpenOptions::new().create(true).append(true).open(&log_path) {
        Ok(file) => file,
        Err(err) => {
            eprintln!("Cannot open log file {}: {}", log_path.display(), err);
            return None;
        }
    };

    let (non_blocking, guard) = tracing_appender::non_blocking(file);
    let filter = if flag != LogLevel::Off {
        EnvFilter::new(tracing_level.to_string())
    } else {
        build_filter(tracing_level, env_value.as_deref())
    };

    let installed = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(non_blocking)
        .with_ansi(false)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(true)
        .with_line_number(true)
        .try_init();
    if installed.is_err() {
        return None;
    }

    tracing::info!("tfotc {} started with log level: {:?}", crate::VERSION, level);
    tracing::info!("Log file: {:?}", log_path);

    Some(guard)
}

pub fn get_log_path() -> PathBuf {
    if let Some(path) = std::env::var_os(LOG_PATH_ENV).filter(|p| !p.is_empty()) {
        return PathBuf::from(path);
    }
    if let Some(config_dir) = dirs::config_dir() {
        return config_dir.join("tfotc").join("tfotc.log");
    }
    if let Some(home) = dirs::home_dir() {
        return home.join(".tfotc").join("tfotc.log");
    }
    PathBuf::from("tfotc.log")
}
