//! Per-guild chat settings and system prompt composition.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use cogworks_core::{GuildId, Result, StateStore};
use serde::{Deserialize, Serialize};

/// Appended to the system prompt of mention replies.
pub const MENTION_INSTRUCTION: &str = "You are replying to the latest message in a chat \
channel. Earlier messages are context; answer the last one.";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GuildSettings {
    pub prompt: String,
    pub global_prompt: String,
    pub model: String,
}

pub struct SettingsStore {
    store: Arc<StateStore>,
    defaults: GuildSettings,
}

fn key(guild: Option<GuildId>) -> String {
    match guild {
        Some(id) => format!("guild:{id}"),
        None => "guild:dm".to_string(),
    }
}

impl SettingsStore {
    pub fn new(store: Arc<StateStore>, defaults: GuildSettings) -> Self {
        Self { store, defaults }
    }

    pub async fn get(&self, guild: Option<GuildId>) -> GuildSettings {
        self.store.get(&key(guild)).await.unwrap_or_else(|| self.defaults.clone())
    }

    pub async fn update(
        &self,
        guild: Option<GuildId>,
        change: impl FnOnce(&mut GuildSettings),
    ) -> Result<GuildSettings> {
        let mut settings = self.get(guild).await;
        change(&mut settings);
        self.store.put(&key(guild), &settings).await?;
        Ok(settings)
    }
}

/// Global prompt, guild prompt, known names, the current time and an optional
/// trailing instruction, separated by blank lines. Empty pieces are skipped.
pub fn compose_system_prompt(
    settings: &GuildSettings,
    display_names: &BTreeMap<String, String>,
    instruction: Option<&str>,
    now: DateTime<Utc>,
) -> String {
    let mut sections: Vec<String> = Vec::new();
    for piece in [settings.global_prompt.trim(), settings.prompt.trim()] {
        if !piece.is_empty() {
            sections.push(piece.to_string());
        }
    }

    let mut names = String::from("Users have names prefixed by an `@`.");
    if !display_names.is_empty() {
        names.push_str(" We know the real names of some of them:");
        for (handle, name) in display_names {
            names.push_str(&format!("\n- {handle}: {name}"));
        }
        names.push_str("\nUse their real names when you address them.");
    }
    sections.push(names);

    sections.push(format!("The current date and time is {} UTC.", now.format("%Y-%m-%d %H:%M")));

    if let Some(instruction) = instruction.map(str::trim).filter(|i| !i.is_empty()) {
        sections.push(instruction.to_string());
    }
    sections.join("\n\n")
}
