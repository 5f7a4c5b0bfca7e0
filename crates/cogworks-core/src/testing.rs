//! In-memory fakes for exercising cogs without a network.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::{CogError, Result};
use crate::platform::{
    Author, ChannelId, ChannelMessage, MessageId, MessageKind, OutgoingMessage, Platform, UserId,
};
use crate::retry::Sleeper;

/// Records requested delays instead of sleeping.
#[derive(Debug, Default)]
pub struct RecordingSleeper {
    slept: Mutex<Vec<Duration>>,
}

impl RecordingSleeper {
    pub fn recorded(&self) -> Vec<Duration> {
        self.slept.lock().unwrap().clone()
    }
}

#[async_trait]
impl Sleeper for RecordingSleeper {
    async fn sleep(&self, duration: Duration) {
        self.slept.lock().unwrap().push(duration);
    }
}

/// A plain user message in a guild channel.
pub fn incoming(author: UserId, channel: ChannelId, id: MessageId, content: &str) -> ChannelMessage {
    ChannelMessage {
        id,
        channel_id: channel,
        guild_id: Some(1),
        author: Author {
            id: author,
            name: format!("user{author}"),
            display_name: None,
            bot: false,
        },
        content: content.to_string(),
        attachments: Vec::new(),
        mentions: Vec::new(),
        has_embeds: false,
        kind: MessageKind::Default,
    }
}

#[derive(Debug, Default)]
pub struct FakePlatform {
    bot_id: UserId,
    next_id: AtomicU64,
    history: Mutex<HashMap<ChannelId, Vec<ChannelMessage>>>,
    live: Mutex<HashMap<ChannelId, Vec<(MessageId, OutgoingMessage)>>>,
    notifications: Mutex<Vec<String>>,
    deny_history: AtomicBool,
    fail_edits: AtomicBool,
    fail_sends: AtomicBool,
    sends: AtomicUsize,
    edits: AtomicUsize,
    deletes: AtomicUsize,
}

impl FakePlatform {
    pub fn new(bot_id: UserId) -> Self {
        Self { bot_id, next_id: AtomicU64::new(1000), ..Self::default() }
    }

    /// Seeds channel history, oldest first.
    pub fn seed_history(&self, channel: ChannelId, messages: Vec<ChannelMessage>) {
        self.history.lock().unwrap().insert(channel, messages);
    }

    pub fn deny_history(&self) {
        self.deny_history.store(true, Ordering::SeqCst);
    }

    /// Makes edits fail while leaving the target message in place, the way a
    /// 5xx or rate limit would.
    pub fn fail_edits(&self, on: bool) {
        self.fail_edits.store(on, Ordering::SeqCst);
    }

    pub fn fail_sends(&self, on: bool) {
        self.fail_sends.store(on, Ordering::SeqCst);
    }

    /// Simulates a message removed out-of-band.
    pub fn forget(&self, channel: ChannelId, message: MessageId) {
        if let Some(msgs) = self.live.lock().unwrap().get_mut(&channel) {
            msgs.retain(|(id, _)| *id != message);
        }
    }

    pub fn live(&self, channel: ChannelId) -> Vec<(MessageId, OutgoingMessage)> {
        self.live.lock().unwrap().get(&channel).cloned().unwrap_or_default()
    }

    pub fn live_message(&self, channel: ChannelId, message: MessageId) -> Option<OutgoingMessage> {
        self.live(channel).into_iter().find(|(id, _)| *id == message).map(|(_, m)| m)
    }

    pub fn sent_texts(&self, channel: ChannelId) -> Vec<String> {
        self.live(channel).into_iter().filter_map(|(_, m)| m.content).collect()
    }

    pub fn notifications(&self) -> Vec<String> {
        self.notifications.lock().unwrap().clone()
    }

    pub fn send_count(&self) -> usize {
        self.sends.load(Ordering::SeqCst)
    }

    pub fn edit_count(&self) -> usize {
        self.edits.load(Ordering::SeqCst)
    }

    pub fn delete_count(&self) -> usize {
        self.deletes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Platform for FakePlatform {
    fn bot_user_id(&self) -> UserId {
        self.bot_id
    }

    async fn channel_name(&self, channel: ChannelId) -> Result<String> {
        Ok(format!("channel-{channel}"))
    }

    async fn history_before(
        &self,
        channel: ChannelId,
        before: MessageId,
        limit: u8,
    ) -> Result<Vec<ChannelMessage>> {
        if self.deny_history.load(Ordering::SeqCst) {
            return Err(CogError::Platform("Missing Access".into()));
        }
        let history = self.history.lock().unwrap();
        let messages = history.get(&channel).cloned().unwrap_or_default();
        Ok(messages
            .into_iter()
            .rev()
            .filter(|m| m.id < before)
            .take(usize::from(limit))
            .collect())
    }

    async fn send(&self, channel: ChannelId, message: OutgoingMessage) -> Result<MessageId> {
        if self.fail_sends.load(Ordering::SeqCst) {
            return Err(CogError::Platform("HTTP 503".into()));
        }
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.live.lock().unwrap().entry(channel).or_default().push((id, message));
        self.sends.fetch_add(1, Ordering::SeqCst);
        Ok(id)
    }

    async fn edit(&self, channel: ChannelId, message: MessageId, update: OutgoingMessage) -> Result<()> {
        if self.fail_edits.load(Ordering::SeqCst) {
            return Err(CogError::Platform("HTTP 503".into()));
        }
        let mut live = self.live.lock().unwrap();
        let slot = live
            .get_mut(&channel)
            .and_then(|msgs| msgs.iter_mut().find(|(id, _)| *id == message))
            .ok_or_else(|| CogError::Platform("Unknown Message".into()))?;
        slot.1 = update;
        self.edits.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn delete(&self, channel: ChannelId, message: MessageId) -> Result<()> {
        let mut live = self.live.lock().unwrap();
        let msgs = live
            .get_mut(&channel)
            .ok_or_else(|| CogError::Platform("Unknown Channel".into()))?;
        let before = msgs.len();
        msgs.retain(|(id, _)| *id != message);
        if msgs.len() == before {
            return Err(CogError::Platform("Unknown Message".into()));
        }
        self.deletes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn typing(&self, _channel: ChannelId) {}

    async fn notify_operator(&self, text: &str) -> Result<()> {
        self.notifications.lock().unwrap().push(text.to_string());
        Ok(())
    }
}
