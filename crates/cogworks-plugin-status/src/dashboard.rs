//! Keeps one live message per dashboard section in the output channel.
//!
//! Message ids survive restarts through the state store, so a fresh process
//! edits the existing messages instead of posting new ones.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use cogworks_core::{
    ChannelId, CogError, Embed, MessageId, OutgoingMessage, Platform, Result, StateStore,
};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::render::Section;

pub const STATE_KEY: &str = "dashboard";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DashboardMessage {
    pub channel_id: ChannelId,
    pub message_id: MessageId,
    pub section: Section,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DashboardState {
    pub channel_id: Option<ChannelId>,
    #[serde(default)]
    pub messages: BTreeMap<Section, DashboardMessage>,
    #[serde(default)]
    pub disabled: BTreeSet<Section>,
}

impl DashboardState {
    pub fn is_enabled(&self, section: Section) -> bool {
        !self.disabled.contains(&section)
    }
}

/// What one reconciliation did to a section.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Edited(MessageId),
    Sent(MessageId),
    Removed,
    Unchanged,
}

pub struct Dashboard {
    store: Arc<StateStore>,
    state: Mutex<DashboardState>,
}

impl Dashboard {
    pub fn new(store: Arc<StateStore>) -> Self {
        Self { store, state: Mutex::new(DashboardState::default()) }
    }

    /// Loads persisted state. `fallback_channel` applies only when no channel
    /// was persisted.
    pub async fn restore(&self, fallback_channel: Option<ChannelId>) {
        let mut restored: DashboardState = self.store.get(STATE_KEY).await.unwrap_or_default();
        if restored.channel_id.is_none() {
            restored.channel_id = fallback_channel;
        }
        info!(
            channel_id = ?restored.channel_id,
            messages = restored.messages.len(),
            disabled = restored.disabled.len(),
            "Dashboard state restored"
        );
        *self.state.lock().await = restored;
    }

    pub async fn state(&self) -> DashboardState {
        self.state.lock().await.clone()
    }

    /// Writes the whole record, but only once a channel is known.
    async fn persist(&self, state: &DashboardState) -> Result<()> {
        if state.channel_id.is_none() {
            debug!("No dashboard channel yet, not persisting");
            return Ok(());
        }
        self.store.put(STATE_KEY, state).await
    }

    /// Edits the section's message in place, or sends a new one when there is
    /// none or the edit fails. A failed edit deletes the old message first.
    /// The new id replaces the persisted one.
    pub async fn send_or_update(
        &self,
        platform: &dyn Platform,
        section: Section,
        embed: Embed,
    ) -> Result<Outcome> {
        let mut state = self.state.lock().await;
        let channel = state
            .channel_id
            .ok_or_else(|| CogError::InvalidArgument("No status channel is set.".into()))?;

        if let Some(record) = state.messages.get(&section).copied() {
            if record.channel_id == channel {
                match platform
                    .edit(channel, record.message_id, OutgoingMessage::embed(embed.clone()))
                    .await
                {
                    Ok(()) => {
                        self.persist(&state).await?;
                        return Ok(Outcome::Edited(record.message_id));
                    }
                    Err(e) => {
                        let e = CogError::DashboardEdit(format!(
                            "{section} message {} in channel {channel}: {e}",
                            record.message_id
                        ));
                        warn!(%section, "{e}, sending a new message");
                    }
                }
            }
            // The old message may still be live after a failed edit.
            discard(platform, &record).await;
            state.messages.remove(&section);
        }

        let message_id = platform.send(channel, OutgoingMessage::embed(embed)).await?;
        state
            .messages
            .insert(section, DashboardMessage { channel_id: channel, message_id, section });
        self.persist(&state).await?;
        info!(%section, channel_id = channel, message_id, "Dashboard message sent");
        Ok(Outcome::Sent(message_id))
    }

    /// Deletes the section's message, if any, and forgets its id.
    pub async fn remove(&self, platform: &dyn Platform, section: Section) -> Result<Outcome> {
        let mut state = self.state.lock().await;
        let Some(record) = state.messages.remove(&section) else {
            return Ok(Outcome::Unchanged);
        };
        discard(platform, &record).await;
        self.persist(&state).await?;
        Ok(Outcome::Removed)
    }

    /// Brings every section in line with `rendered`. Disabled or empty
    /// sections lose their message. Errors stay with their section.
    pub async fn reconcile(
        &self,
        platform: &dyn Platform,
        rendered: Vec<(Section, Option<Embed>)>,
    ) -> Vec<(Section, Result<Outcome>)> {
        let disabled = self.state.lock().await.disabled.clone();
        let mut results = Vec::with_capacity(rendered.len());
        for (section, embed) in rendered {
            let outcome = match embed {
                Some(embed) if !disabled.contains(&section) => {
                    self.send_or_update(platform, section, embed).await
                }
                _ => self.remove(platform, section).await,
            };
            if let Err(e) = &outcome {
                warn!(%section, "Dashboard section not updated: {e}");
            }
            results.push((section, outcome));
        }
        results
    }

    pub async fn set_enabled(
        &self,
        platform: &dyn Platform,
        section: Section,
        enabled: bool,
    ) -> Result<()> {
        if enabled {
            let mut state = self.state.lock().await;
            state.disabled.remove(&section);
            self.persist(&state).await?;
        } else {
            self.state.lock().await.disabled.insert(section);
            if self.remove(platform, section).await? == Outcome::Unchanged {
                let state = self.state.lock().await;
                self.persist(&state).await?;
            }
        }
        info!(%section, enabled, "Dashboard section toggled");
        Ok(())
    }

    /// Moves the dashboard. Messages left in the old channel are deleted so
    /// the next cycle posts fresh ones.
    pub async fn set_channel(&self, platform: &dyn Platform, channel: ChannelId) -> Result<()> {
        let mut state = self.state.lock().await;
        if state.channel_id == Some(channel) {
            return Ok(());
        }
        let stale: Vec<DashboardMessage> = state.messages.values().copied().collect();
        for record in &stale {
            discard(platform, record).await;
        }
        state.messages.clear();
        state.channel_id = Some(channel);
        self.persist(&state).await?;
        info!(channel_id = channel, removed = stale.len(), "Dashboard channel changed");
        Ok(())
    }
}

async fn discard(platform: &dyn Platform, record: &DashboardMessage) {
    if let Err(e) = platform.delete(record.channel_id, record.message_id).await {
        debug!(
            section = %record.section,
            message_id = record.message_id,
            "Old dashboard message already gone: {e}"
        );
    }
}
