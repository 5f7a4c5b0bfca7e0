//! The seam between cogs and the chat platform.
//!
//! Cogs only ever see these platform-neutral types; the gateway crate maps
//! them to and from the concrete client library.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;

pub type ChannelId = u64;
pub type MessageId = u64;
pub type UserId = u64;
pub type GuildId = u64;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Author {
    pub id: UserId,
    /// Account handle, unique on the platform.
    pub name: String,
    pub display_name: Option<String>,
    pub bot: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attachment {
    pub url: String,
    pub filename: String,
    pub content_type: Option<String>,
}

impl Attachment {
    pub fn is_image(&self) -> bool {
        self.content_type
            .as_deref()
            .map(|ct| ct.to_ascii_lowercase().starts_with("image/"))
            .unwrap_or(false)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    /// Plain messages and inline replies.
    Default,
    /// Thread creation, channel rename and other system notices that start a
    /// new topic. History walks stop here.
    Boundary,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelMessage {
    pub id: MessageId,
    pub channel_id: ChannelId,
    pub guild_id: Option<GuildId>,
    pub author: Author,
    pub content: String,
    pub attachments: Vec<Attachment>,
    pub mentions: Vec<UserId>,
    pub has_embeds: bool,
    pub kind: MessageKind,
}

impl ChannelMessage {
    pub fn mentions_user(&self, user: UserId) -> bool {
        self.mentions.contains(&user)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmbedField {
    pub name: String,
    pub value: String,
    pub inline: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Embed {
    pub title: String,
    pub description: Option<String>,
    pub color: u32,
    pub fields: Vec<EmbedField>,
    pub footer: Option<String>,
}

impl Embed {
    pub fn new(title: impl Into<String>, color: u32) -> Self {
        Self { title: title.into(), color, ..Self::default() }
    }

    pub fn field(mut self, name: impl Into<String>, value: impl Into<String>, inline: bool) -> Self {
        self.fields.push(EmbedField { name: name.into(), value: value.into(), inline });
        self
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn footer(mut self, footer: impl Into<String>) -> Self {
        self.footer = Some(footer.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileUpload {
    pub filename: String,
    pub bytes: Vec<u8>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OutgoingMessage {
    pub content: Option<String>,
    pub embed: Option<Embed>,
    pub file: Option<FileUpload>,
}

impl OutgoingMessage {
    pub fn text(content: impl Into<String>) -> Self {
        Self { content: Some(content.into()), ..Self::default() }
    }

    pub fn embed(embed: Embed) -> Self {
        Self { embed: Some(embed), ..Self::default() }
    }

    pub fn file(filename: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self { file: Some(FileUpload { filename: filename.into(), bytes }), ..Self::default() }
    }

    pub fn with_content(mut self, content: impl Into<String>) -> Self {
        self.content = Some(content.into());
        self
    }
}

#[async_trait]
pub trait Platform: Send + Sync {
    fn bot_user_id(&self) -> UserId;

    async fn channel_name(&self, channel: ChannelId) -> Result<String>;

    /// Up to `limit` messages posted before `before`, newest first.
    async fn history_before(
        &self,
        channel: ChannelId,
        before: MessageId,
        limit: u8,
    ) -> Result<Vec<ChannelMessage>>;

    async fn send(&self, channel: ChannelId, message: OutgoingMessage) -> Result<MessageId>;

    /// Fetches `message` and replaces its content. Fails if the message is gone.
    async fn edit(&self, channel: ChannelId, message: MessageId, update: OutgoingMessage) -> Result<()>;

    async fn delete(&self, channel: ChannelId, message: MessageId) -> Result<()>;

    async fn typing(&self, channel: ChannelId);

    /// Direct message to the bot operator.
    async fn notify_operator(&self, text: &str) -> Result<()>;
}
