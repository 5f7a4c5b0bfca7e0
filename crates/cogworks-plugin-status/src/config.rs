use std::time::Duration;

use cogworks_core::{ChannelId, Result};
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct StatusConfig {
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
    /// Per-source poll timeout.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Output channel used until one is set by command.
    #[serde(default)]
    pub channel_id: Option<ChannelId>,
    #[serde(default = "default_retry_attempts")]
    pub retry_attempts: u32,
    #[serde(default)]
    pub status_page: Option<StatusPageConfig>,
    #[serde(default)]
    pub ping: Vec<HostProbe>,
    #[serde(default)]
    pub http: Vec<HttpProbe>,
    #[serde(default)]
    pub feeds: Vec<FeedConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StatusPageConfig {
    pub name: String,
    pub url: String,
    /// Allow-list of component names to report.
    pub components: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HostProbe {
    pub name: String,
    pub host: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HttpProbe {
    pub name: String,
    pub url: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FeedFormat {
    #[default]
    Json,
    Metrics,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FeedConfig {
    pub name: String,
    pub url: String,
    #[serde(default)]
    pub format: FeedFormat,
    /// Host pinged for the online badge. Without one the badge comes from
    /// the HTTP status of `url`.
    #[serde(default)]
    pub probe_host: Option<String>,
}

fn default_interval_secs() -> u64 {
    300
}

fn default_timeout_secs() -> u64 {
    5
}

fn default_retry_attempts() -> u32 {
    1
}

impl Default for StatusConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_interval_secs(),
            timeout_secs: default_timeout_secs(),
            channel_id: None,
            retry_attempts: default_retry_attempts(),
            status_page: None,
            ping: Vec::new(),
            http: Vec::new(),
            feeds: Vec::new(),
        }
    }
}

impl StatusConfig {
    pub fn from_table(table: toml::Value) -> Result<Self> {
        cogworks_core::parse_cog_config(table, "status")
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs.max(1))
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs.max(1))
    }

    pub fn feed(&self, name: &str) -> Option<&FeedConfig> {
        self.feeds.iter().find(|f| f.name.eq_ignore_ascii_case(name))
    }
}
