use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use config::builder::DefaultState;
use config::{Config, ConfigBuilder, Environment, File, FileFormat};
use serde::Deserialize;

use crate::fetch::DEFAULT_INDEX_URL;

pub const DEFAULT_CONFIG_PATH: &str = "./configs/config.yaml";
const DEFAULT_BUILDING: &str = "CPH";
const DEFAULT_POLL_MINUTES: u64 = 60;
const DEFAULT_SMTP_PORT: u16 = 587;
const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/87.0.4280.141 Safari/537.36";

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub buildings: Vec<String>,
    pub polling_interval_minutes: u64,
    pub source_url: String,
    pub state_path: PathBuf,
    pub max_concurrent_fetches: usize,
    pub request_timeout_secs: u64,
    pub user_agent: String,
    /// Mail delivery. Without it notices are only logged.
    #[serde(default)]
    pub email: Option<EmailSettings>,
}

#[derive(Clone, Deserialize)]
pub struct EmailSettings {
    pub sender: String,
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub recipients: Vec<String>,
    pub smtp_server: String,
    #[serde(default = "default_smtp_port")]
    pub smtp_port: u16,
}

fn default_smtp_port() -> u16 {
    DEFAULT_SMTP_PORT
}

impl fmt::Debug for EmailSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EmailSettings")
            .field("sender", &self.sender)
            .field("password", &"<redacted>")
            .field("recipients", &self.recipients)
            .field("smtp_server", &self.smtp_server)
            .field("smtp_port", &self.smtp_port)
            .finish()
    }
}

impl Settings {
    /// YAML file overlaid with `APSON_*` environment variables. Nested keys
    /// use a double underscore, e.g. `APSON_EMAIL__PASSWORD`.
    pub fn load(path: &Path) -> Result<Self> {
        let cfg = defaults()?
            .add_source(File::from(path).format(FileFormat::Yaml).required(true))
            .add_source(
                Environment::with_prefix("APSON")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("buildings")
                    .with_list_parse_key("email.recipients"),
            )
            .build()
            .with_context(|| format!("Failed to load config {:?}", path))?;
        Self::from_config(cfg)
    }

    #[cfg(test)]
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let cfg = defaults()?
            .add_source(File::from_str(yaml, FileFormat::Yaml))
            .build()
            .context("Failed to parse config")?;
        Self::from_config(cfg)
    }

    fn from_config(cfg: Config) -> Result<Self> {
        let settings: Settings = cfg.try_deserialize().context("Invalid config")?;
        Ok(settings.with_zero_defaults())
    }

    /// Zero and empty values mean "unset".
    fn with_zero_defaults(mut self) -> Self {
        self.buildings.retain(|b| !b.trim().is_empty());
        if self.buildings.is_empty() {
            self.buildings = vec![DEFAULT_BUILDING.to_string()];
        }
        if self.polling_interval_minutes == 0 {
            self.polling_interval_minutes = DEFAULT_POLL_MINUTES;
        }
        if self.max_concurrent_fetches == 0 {
            self.max_concurrent_fetches = 1;
        }
        self
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.polling_interval_minutes * 60)
    }

    pub fn request_timeout(&self) -> Option<Duration> {
        (self.request_timeout_secs > 0).then(|| Duration::from_secs(self.request_timeout_secs))
    }
}

fn defaults() -> Result<ConfigBuilder<DefaultState>> {
    Ok(Config::builder()
        .set_default("buildings", vec![DEFAULT_BUILDING])?
        .set_default("polling_interval_minutes", DEFAULT_POLL_MINUTES)?
        .set_default("source_url", DEFAULT_INDEX_URL)?
        .set_default("state_path", "notified.sqlite")?
        .set_default("max_concurrent_fetches", 4)?
        .set_default("request_timeout_secs", 30)?
        .set_default("user_agent", DEFAULT_USER_AGENT)?)
}
