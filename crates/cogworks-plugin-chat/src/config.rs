use std::collections::HashMap;

use cogworks_core::{CogError, Result, Secret, UserId};
use serde::Deserialize;

/// Discord returns at most this many messages per history request.
pub const MAX_HISTORY_DEPTH: u8 = 100;

#[derive(Debug, Clone, Deserialize)]
pub struct ChatConfig {
    #[serde(default = "default_history_depth")]
    pub history_depth: u8,
    #[serde(default = "default_max_output_tokens")]
    pub max_output_tokens: u32,
    #[serde(default = "default_model")]
    pub default_model: String,
    #[serde(default = "default_prompt")]
    pub default_prompt: String,
    #[serde(default)]
    pub default_global_prompt: String,
    #[serde(default = "default_scrollback_turns")]
    pub scrollback_turns: usize,
    #[serde(default = "default_true")]
    pub notify_operator: bool,
    /// Whether mention replies see channel history or only the trigger.
    #[serde(default = "default_true")]
    pub full_history: bool,
    /// Tried in order; later entries are fallbacks.
    #[serde(default)]
    pub providers: Vec<ProviderConfig>,
    #[serde(default)]
    pub image: Option<ImageConfig>,
    /// User id -> real name or title, keyed by the id as a string.
    #[serde(default)]
    pub whois: HashMap<String, String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    Openai,
    Gemini,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProviderConfig {
    pub kind: ProviderKind,
    pub base_url: String,
    #[serde(default, flatten)]
    pub api_key: Secret,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ImageConfig {
    pub base_url: String,
    #[serde(default, flatten)]
    pub api_key: Secret,
    #[serde(default = "default_image_model")]
    pub model: String,
    #[serde(default = "default_image_size")]
    pub size: String,
}

fn default_history_depth() -> u8 {
    20
}

fn default_max_output_tokens() -> u32 {
    2000
}

fn default_model() -> String {
    "gpt-4o-mini".into()
}

fn default_prompt() -> String {
    "You are a helpful assistant in a chat server.".into()
}

fn default_scrollback_turns() -> usize {
    10
}

fn default_true() -> bool {
    true
}

fn default_image_model() -> String {
    "dall-e-3".into()
}

fn default_image_size() -> String {
    "1024x1024".into()
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            history_depth: default_history_depth(),
            max_output_tokens: default_max_output_tokens(),
            default_model: default_model(),
            default_prompt: default_prompt(),
            default_global_prompt: String::new(),
            scrollback_turns: default_scrollback_turns(),
            notify_operator: true,
            full_history: true,
            providers: Vec::new(),
            image: None,
            whois: HashMap::new(),
        }
    }
}

impl ChatConfig {
    pub fn from_table(table: toml::Value) -> Result<Self> {
        let config: Self = cogworks_core::parse_cog_config(table, "chat")?;
        if config.history_depth > MAX_HISTORY_DEPTH {
            return Err(CogError::Config(format!(
                "history_depth {} is above the platform limit of {MAX_HISTORY_DEPTH}",
                config.history_depth
            )));
        }
        Ok(config)
    }

    /// The capability lookup table with parsed ids.
    pub fn names(&self) -> Result<HashMap<UserId, String>> {
        self.whois
            .iter()
            .map(|(id, name)| {
                id.parse::<UserId>()
                    .map(|id| (id, name.clone()))
                    .map_err(|e| CogError::Config(format!("Invalid user id '{id}' in whois: {e}")))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_table_uses_defaults() {
        let config = ChatConfig::from_table(toml::Value::Table(Default::default())).unwrap();
        assert_eq!(config.history_depth, 20);
        assert_eq!(config.max_output_tokens, 2000);
        assert_eq!(config.scrollback_turns, 10);
        assert!(config.notify_operator);
        assert!(config.providers.is_empty());
    }

    #[test]
    fn providers_keep_their_order() {
        let table: toml::Value = r#"
            default_model = "m1"
            [[providers]]
            kind = "openai"
            base_url = "https://a.example/v1"
            api_key_env = "A_KEY"
            [[providers]]
            kind = "gemini"
            base_url = "https://b.example/v1beta"
            api_key = "inline"
            [whois]
            "42" = "Ada (maintainer)"
        "#
        .parse()
        .unwrap();
        let config = ChatConfig::from_table(table).unwrap();
        assert_eq!(config.providers[0].kind, ProviderKind::Openai);
        assert_eq!(config.providers[1].kind, ProviderKind::Gemini);
        assert_eq!(config.providers[1].api_key.resolve().as_deref(), Some("inline"));
        assert_eq!(config.names().unwrap().get(&42).map(String::as_str), Some("Ada (maintainer)"));
    }

    #[test]
    fn history_depth_above_the_platform_limit_is_rejected() {
        let table: toml::Value = toml::from_str("history_depth = 150").unwrap();
        assert!(matches!(ChatConfig::from_table(table), Err(CogError::Config(_))));
        let table: toml::Value = toml::from_str("history_depth = 100").unwrap();
        assert_eq!(ChatConfig::from_table(table).unwrap().history_depth, 100);
    }

    #[test]
    fn bad_whois_id_is_a_config_error() {
        let config = ChatConfig {
            whois: HashMap::from([("nope".to_string(), "x".to_string())]),
            ..ChatConfig::default()
        };
        assert!(matches!(config.names(), Err(CogError::Config(_))));
    }
}
