use std::path::PathBuf;
use anyhow::Result;
use serde::{Deserialize, Serialize};
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{EnvFilter, Registry, fmt, prelude::*};

/// Target of the structured flow lifecycle events (started, completed, cancelled, ...).
pub const FLOW_EVENT_TARGET: &str = "flow_event";

const LOG_FILE: &str = "chatflow.log";
const EVENT_FILE: &str = "flow_events.json";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LogConfig {
    /// An `EnvFilter` directive, e.g. `info` or `chatflow=debug`.
    pub log_level: String,
    /// When set, logs also go to daily rolling files in this directory.
    pub log_dir: Option<PathBuf>,
}

impl LogConfig {
    pub fn new(log_level: impl Into<String>, log_dir: Option<PathBuf>) -> Self {
        Self {
            log_level: log_level.into(),
            log_dir,
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self::new("info", None)
    }
}

/// Installs the global subscriber.
///
/// Always logs to stderr (stdout belongs to the console transport). With a
/// log directory, a plain text file gets everything the filter lets through
/// and a JSON file gets only `flow_event` lines.
pub fn init_tracing(config: &LogConfig) -> Result<()> {
    let env_filter = EnvFilter::try_new(&config.log_level)?;
    let stderr_layer = fmt::layer().with_writer(std::io::stderr).with_target(true);

    let (txt_layer, json_layer) = match &config.log_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)?;
            let txt_appender = RollingFileAppender::new(Rotation::DAILY, dir, LOG_FILE);
            let txt_layer = fmt::layer().with_writer(txt_appender).with_ansi(false);

            let json_appender = RollingFileAppender::new(Rotation::DAILY, dir, EVENT_FILE);
            let json_layer = fmt::layer()
                .json()
                .with_writer(json_appender)
                .with_target(true)
                .with_filter(EnvFilter::new(format!("{FLOW_EVENT_TARGET}=info")));
            (Some(txt_layer), Some(json_layer))
        }
        None => (None, None),
    };

    Registry::default()
        .with(env_filter)
        .with(stderr_layer)
        .with(txt_layer)
        .with(json_layer)
        .try_init()?;
    Ok(())
}
