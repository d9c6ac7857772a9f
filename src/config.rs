use std::{env, fmt, fs, path::PathBuf, str::FromStr, sync::Arc, time::Duration};
use async_trait::async_trait;
use dashmap::DashMap;
use tracing::{debug, info, warn};

use crate::{logger::LogConfig, prompt::composer::DEFAULT_KEYBOARD_PLACEHOLDER};

pub const REAPER_INTERVAL_KEY: &str = "CHATFLOW_REAPER_INTERVAL_SECS";
pub const KEYBOARD_PLACEHOLDER_KEY: &str = "CHATFLOW_KEYBOARD_PLACEHOLDER";
pub const LOG_LEVEL_KEY: &str = "CHATFLOW_LOG_LEVEL";
pub const LOG_DIR_KEY: &str = "CHATFLOW_LOG_DIR";

const DEFAULT_REAPER_INTERVAL_SECS: u64 = 30;

/// Key/value configuration source.
#[async_trait]
pub trait ConfigManagerType: Send + Sync {
    async fn as_vec(&self) -> Vec<(String, String)> {
        let mut config = vec![];
        for key in self.keys().await {
            if let Some(value) = self.get(&key).await {
                config.push((key, value));
            }
        }
        config
    }
    async fn keys(&self) -> Vec<String>;
    async fn get(&self, key: &str) -> Option<String>;
    async fn del(&self, key: &str);
    async fn set(&self, key: &str, value: &str) -> Result<(), String>;
    fn debug_box(&self) -> String;
}

#[derive(Clone)]
pub struct ConfigManager(pub Arc<dyn ConfigManagerType>);

impl ConfigManager {
    pub fn new(inner: impl ConfigManagerType + 'static) -> Self {
        Self(Arc::new(inner))
    }

    pub async fn get(&self, key: &str) -> Option<String> {
        self.0.get(key).await
    }

    pub async fn set(&self, key: &str, value: &str) -> Result<(), String> {
        self.0.set(key, value).await
    }
}

impl fmt::Debug for ConfigManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0.debug_box())
    }
}

/// Process environment, seeded from an optional `.env` file that `set`/`del` write back to.
#[derive(Clone, Debug)]
pub struct EnvConfigManager {
    env_file: PathBuf,
}

impl EnvConfigManager {
    pub fn new(env_file: PathBuf) -> Self {
        if env_file.exists() {
            match dotenvy::from_path(&env_file) {
                Ok(()) => info!("Loaded .env from {}", env_file.display()),
                Err(err) => warn!("could not load .env from {}: {}", env_file.display(), err),
            }
        } else {
            debug!("no .env at {}, using the process environment", env_file.display());
        }

        Self { env_file }
    }

    fn rewrite_file(&self, key: &str, value: Option<&str>) -> std::io::Result<()> {
        let content = fs::read_to_string(&self.env_file).unwrap_or_default();
        let mut lines: Vec<String> = Vec::new();
        let mut found = false;

        for line in content.lines() {
            match line.split_once('=') {
                Some((k, _)) if k.trim() == key => {
                    found = true;
                    if let Some(value) = value {
                        lines.push(format!("{key}={value}"));
                    }
                }
                _ => lines.push(line.to_string()),
            }
        }
        if let (false, Some(value)) = (found, value) {
            lines.push(format!("{key}={value}"));
        }

        fs::write(&self.env_file, lines.join("\n"))
    }
}

#[async_trait]
impl ConfigManagerType for EnvConfigManager {
    async fn keys(&self) -> Vec<String> {
        env::vars().map(|(k, _)| k).collect()
    }

    async fn get(&self, key: &str) -> Option<String> {
        env::var(key).ok()
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), String> {
        unsafe {
            env::set_var(key, value);
        };
        self.rewrite_file(key, Some(value)).map_err(|e| e.to_string())
    }

    async fn del(&self, key: &str) {
        unsafe {
            env::remove_var(key);
        };
        if self.env_file.exists() {
            if let Err(err) = self.rewrite_file(key, None) {
                warn!("could not update {}: {}", self.env_file.display(), err);
            }
        }
    }

    fn debug_box(&self) -> String {
        format!("EnvConfigManager({})", self.env_file.display())
    }
}

/// In-memory configuration, mostly for tests and embedding.
#[derive(Debug, Default)]
pub struct MapConfigManager {
    map: DashMap<String, String>,
}

impl MapConfigManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(self, key: &str, value: &str) -> Self {
        self.map.insert(key.to_string(), value.to_string());
        self
    }
}

#[async_trait]
impl ConfigManagerType for MapConfigManager {
    async fn keys(&self) -> Vec<String> {
        self.map.iter().map(|entry| entry.key().clone()).collect()
    }

    async fn get(&self, key: &str) -> Option<String> {
        self.map.get(key).map(|v| v.clone())
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), String> {
        self.map.insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn del(&self, key: &str) {
        self.map.remove(key);
    }

    fn debug_box(&self) -> String {
        format!("MapConfigManager({} entries)", self.map.len())
    }
}

/// Engine settings read from a `ConfigManager`.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    pub reaper_interval: Duration,
    pub keyboard_placeholder: String,
    pub log: LogConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            reaper_interval: Duration::from_secs(DEFAULT_REAPER_INTERVAL_SECS),
            keyboard_placeholder: DEFAULT_KEYBOARD_PLACEHOLDER.to_string(),
            log: LogConfig::default(),
        }
    }
}

async fn parsed_or<T: FromStr>(config: &ConfigManager, key: &str, default: T) -> T {
    match config.get(key).await {
        None => default,
        Some(raw) => raw.trim().parse().unwrap_or_else(|_| {
            warn!(key, value = %raw, "unparseable config value, using default");
            default
        }),
    }
}

impl EngineConfig {
    pub async fn from_config(config: &ConfigManager) -> Self {
        let defaults = Self::default();

        let secs = parsed_or(config, REAPER_INTERVAL_KEY, DEFAULT_REAPER_INTERVAL_SECS).await;
        let reaper_interval = if secs == 0 {
            warn!(key = REAPER_INTERVAL_KEY, "reaper interval must be positive, using default");
            defaults.reaper_interval
        } else {
            Duration::from_secs(secs)
        };

        let keyboard_placeholder = config
            .get(KEYBOARD_PLACEHOLDER_KEY)
            .await
            .filter(|p| !p.is_empty())
            .unwrap_or(defaults.keyboard_placeholder);

        let log = LogConfig {
            log_level: config.get(LOG_LEVEL_KEY).await.unwrap_or(defaults.log.log_level),
            log_dir: config.get(LOG_DIR_KEY).await.filter(|d| !d.is_empty()).map(PathBuf::from),
        };

        Self {
            reaper_interval,
            keyboard_placeholder,
            log,
        }
    }
}
