use config::{Config, ConfigError, Environment, File, Source};
use serde::Deserialize;
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Deserialize, Clone)]
pub struct Settings {
    pub host: IpAddr,
    pub server_port: u16,
    pub log_level: String,
    pub icons_dir: PathBuf,
    pub notifications_enabled: bool,
    pub grace_delay_ms: u64,
    pub completion_display_secs: u64,
    pub summary_interval_ms: u64,
}

impl Settings {
    pub fn new() -> Result<Self, ConfigError> {
        Self::build(File::with_name("config").required(false))
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        Self::build(File::from(path))
    }

    fn build<S>(file: S) -> Result<Self, ConfigError>
    where
        S: Source + Send + Sync + 'static,
    {
        let builder = Config::builder()
            // Default settings
            .set_default("host", "127.0.0.1")?
            .set_default("server_port", 3000)?
            .set_default("log_level", "info")?
            .set_default("icons_dir", "./icons")?
            .set_default("notifications_enabled", true)?
            .set_default("grace_delay_ms", 1000)?
            .set_default("completion_display_secs", 5)?
            .set_default("summary_interval_ms", 1000)?
            .add_source(file)
            // Environment variables (e.g. PIRATE_SERVER_PORT=8080)
            .add_source(Environment::with_prefix("PIRATE"));

        builder.build()?.try_deserialize()
    }

    pub fn grace_delay(&self) -> Duration {
        Duration::from_millis(self.grace_delay_ms)
    }

    /// How long a completion notification stays up; `None` keeps it until dismissed.
    pub fn completion_display(&self) -> Option<Duration> {
        (self.completion_display_secs > 0).then(|| Duration::from_secs(self.completion_display_secs))
    }

    pub fn summary_interval(&self) -> Duration {
        Duration::from_millis(self.summary_interval_ms.max(1))
    }
}
