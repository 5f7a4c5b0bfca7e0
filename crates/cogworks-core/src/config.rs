use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::{CogError, Result};

pub fn load_config(path: &Path) -> Result<toml::Value> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        CogError::Config(format!("Failed to read config {}: {e}", path.display()))
    })?;
    let value: toml::Value = content.parse().map_err(|e| {
        CogError::Config(format!("Failed to parse config {}: {e}", path.display()))
    })?;
    Ok(value)
}

/// Top-level settings shared by every cog. Cog-specific settings live under
/// `[cogs.<id>]` and are handed out by [`cog_table`].
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    #[serde(default = "default_prefix")]
    pub prefix: String,
    #[serde(default = "default_state_path")]
    pub state_path: PathBuf,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default)]
    pub owners: Vec<u64>,
    #[serde(default)]
    pub moderators: Vec<u64>,
    #[serde(default)]
    pub discord: DiscordConfig,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct DiscordConfig {
    #[serde(default, flatten)]
    pub token: Secret,
}

fn default_prefix() -> String {
    "!".into()
}

fn default_state_path() -> PathBuf {
    PathBuf::from("cogworks-state.json")
}

fn default_log_level() -> String {
    "info".into()
}

impl AppConfig {
    pub fn from_value(value: &toml::Value) -> Result<Self> {
        value
            .clone()
            .try_into()
            .map_err(|e| CogError::Config(format!("Invalid top-level config: {e}")))
    }
}

/// Returns the `[cogs.<id>]` table, or an empty table when the cog has none.
pub fn cog_table(config: &toml::Value, id: &str) -> toml::Value {
    config
        .get("cogs")
        .and_then(|c| c.get(id))
        .cloned()
        .unwrap_or(toml::Value::Table(toml::map::Map::new()))
}

/// Deserializes a cog table into its typed settings.
pub fn parse_cog_config<T: serde::de::DeserializeOwned>(table: toml::Value, id: &str) -> Result<T> {
    table
        .try_into()
        .map_err(|e| CogError::Config(format!("Invalid config for cog '{id}': {e}")))
}

/// A secret given inline (`api_key = ".."`) or by environment variable
/// name (`api_key_env = "FOO_KEY"`). Inline wins.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Secret {
    #[serde(default, alias = "api_key")]
    pub token: Option<String>,
    #[serde(default, alias = "api_key_env")]
    pub token_env: Option<String>,
}

impl Secret {
    pub fn inline(value: impl Into<String>) -> Self {
        Self { token: Some(value.into()), token_env: None }
    }

    pub fn resolve(&self) -> Option<String> {
        if let Some(token) = self.token.as_deref().map(str::trim).filter(|t| !t.is_empty()) {
            return Some(token.to_string());
        }
        let var = self.token_env.as_deref()?;
        std::env::var(var)
            .ok()
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }
}
