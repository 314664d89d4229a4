use std::path::{Path, PathBuf};
use std::time::Duration;

use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};

use crate::error::{AppError, Result};

const APP_DIR: &str = "speedy-sync";

const DEFAULT_CONFIG: &str = r#"# speedy-sync configuration

# db_path = "/path/to/speedy-sync.sqlite"
# log_file = "/path/to/speedy-sync.log"

[freshrss]
# Google Reader API endpoint of your FreshRSS instance
host = "https://rss.example.com/api/greader.php"
username = "me"
# The password can be given literally, read from an environment variable
# ("$env:FRESHRSS_PASSWORD") or from a file ("file:./password", relative
# paths are resolved against this directory).
password = "$env:FRESHRSS_PASSWORD"

[sync]
# Items fetched per stream request
page_size = 1000
# Pending actions pushed per request
batch_size = 10
# Seconds between outbox pushes
worker_interval_secs = 5
# Seconds before a request to the server is abandoned
request_timeout_secs = 20
"#;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub freshrss: FreshRssConfig,

    #[serde(default = "default_db_path")]
    pub db_path: String,

    #[serde(default = "default_log_file")]
    pub log_file: String,

    #[serde(default)]
    pub sync: SyncConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FreshRssConfig {
    pub host: String,
    pub username: String,
    pub password: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    #[serde(default = "default_page_size")]
    pub page_size: usize,

    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    #[serde(default = "default_worker_interval")]
    pub worker_interval_secs: u64,

    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            page_size: default_page_size(),
            batch_size: default_batch_size(),
            worker_interval_secs: default_worker_interval(),
            request_timeout_secs: default_request_timeout(),
        }
    }
}

impl SyncConfig {
    pub fn worker_interval(&self) -> Duration {
        Duration::from_secs(self.worker_interval_secs.max(1))
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs.max(1))
    }
}

fn state_dir() -> PathBuf {
    dirs::state_dir()
        .or_else(dirs::data_local_dir)
        .unwrap_or_else(|| PathBuf::from("."))
        .join(APP_DIR)
}

fn default_db_path() -> String {
    state_dir().join("speedy-sync.sqlite").to_string_lossy().to_string()
}

fn default_log_file() -> String {
    state_dir().join("speedy-sync.log").to_string_lossy().to_string()
}

fn default_page_size() -> usize {
    1000
}

fn default_batch_size() -> usize {
    10
}

fn default_worker_interval() -> u64 {
    5
}

fn default_request_timeout() -> u64 {
    20
}

impl Config {
    /// Load the config file, resolving the password indirection.
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_path())
    }

    pub fn load_from(config_path: &Path) -> Result<Self> {
        if !config_path.exists() {
            return Err(AppError::Config(format!(
                "config is not initialized, run `speedy-sync init` to create {}",
                config_path.display()
            )));
        }

        let content = std::fs::read_to_string(config_path)?;
        let mut config: Config = toml::from_str(&content)?;

        url::Url::parse(&config.freshrss.host).map_err(|e| {
            AppError::Config(format!("invalid host {:?}: {}", config.freshrss.host, e))
        })?;

        let base_dir = config_path.parent().unwrap_or_else(|| Path::new("."));
        config.freshrss.password = resolve_password(&config.freshrss.password, base_dir)?;

        Ok(config)
    }

    /// Write the default config file. Refuses to overwrite an existing one.
    pub fn init() -> Result<PathBuf> {
        let config_path = Self::config_path();
        Self::init_at(&config_path)?;
        Ok(config_path)
    }

    pub fn init_at(config_path: &Path) -> Result<()> {
        if config_path.exists() {
            return Err(AppError::Config(format!(
                "config already exists at {}",
                config_path.display()
            )));
        }
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(config_path, DEFAULT_CONFIG)?;
        Ok(())
    }

    pub fn config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(APP_DIR)
            .join("config.toml")
    }
}

const ENV_PREFIX: &str = "$env:";
const FILE_PREFIX: &str = "file:";

/// Resolve `$env:NAME` and `file:PATH` password references.
///
/// Anything else is taken literally.
pub fn resolve_password(raw: &str, base_dir: &Path) -> Result<String> {
    if let Some(name) = raw.strip_prefix(ENV_PREFIX) {
        return match std::env::var(name) {
            Ok(value) if !value.is_empty() => Ok(value),
            _ => Err(AppError::Config(format!(
                "password environment variable {} is unset",
                name
            ))),
        };
    }

    if let Some(path) = raw.strip_prefix(FILE_PREFIX) {
        let mut path = PathBuf::from(expand_env(path));
        if path.as_os_str().is_empty() || (!path.is_absolute() && path.starts_with(".")) {
            path = base_dir.join(path);
        }
        if !path.is_file() {
            return Err(AppError::Config(format!(
                "password file {} not found",
                path.display()
            )));
        }

        let password = std::fs::read_to_string(&path)?.trim().to_string();
        if password.is_empty() {
            return Err(AppError::Config(format!(
                "password file {} is empty",
                path.display()
            )));
        }
        return Ok(password);
    }

    Ok(raw.to_string())
}

/// Expand `$VAR` and `${VAR}`; unset variables expand to nothing.
fn expand_env(input: &str) -> String {
    let Ok(re) = Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}|\$([A-Za-z_][A-Za-z0-9_]*)") else {
        return input.to_string();
    };
    re.replace_all(input, |caps: &Captures| {
        let name = caps
            .get(1)
            .or_else(|| caps.get(2))
            .map(|m| m.as_str())
            .unwrap_or_default();
        std::env::var(name).unwrap_or_default()
    })
    .into_owned()
}
