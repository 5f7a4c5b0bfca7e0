pub mod config;
pub mod context;
pub mod image;
pub mod pager;
pub mod query;
pub mod scrollback;
pub mod settings;

#[cfg(test)]
mod testing;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use cogworks_core::{
    ChannelId, ChannelMessage, Cog, CogContext, CogError, CogHealth, CogMeta, CommandInvocation,
    CommandSpec, ConversationMessage, HealthStatus, OutgoingMessage, Platform, Privilege,
    QueryRequest, Result, Sleeper, StateStore, TokioSleeper, UserId,
};
use reqwest::Client;
use tracing::{info, warn};

use crate::config::ChatConfig;
use crate::context::{extract_conversation, single_turn, strip_mentions, ContextRequest};
use crate::image::ImageRequest;
use crate::pager::PagedReply;
use crate::query::{CompletionClient, Query, QueryOutput};
use crate::scrollback::Scrollback;
use crate::settings::{compose_system_prompt, GuildSettings, SettingsStore, MENTION_INSTRUCTION};

pub const EMPTY_MENTION_REPLY: &str = "Please say something after mentioning me!";

/// Builds a completion client from the current config. Called per request so
/// keys set in the environment after startup are picked up.
pub type ClientFactory = Box<dyn Fn(&ChatConfig) -> CompletionClient + Send + Sync>;

pub struct ChatCog {
    config: ChatConfig,
    names: HashMap<UserId, String>,
    settings: SettingsStore,
    scrollback: Scrollback,
    client_factory: ClientFactory,
}

impl ChatCog {
    pub fn new(table: toml::Value, store: Arc<StateStore>) -> Result<Self> {
        let config = ChatConfig::from_table(table)?;
        let http = Client::new();
        let sleeper: Arc<dyn Sleeper> = Arc::new(TokioSleeper);
        Self::with_client_factory(
            config,
            store,
            Box::new(move |config| CompletionClient::from_config(config, &http, Arc::clone(&sleeper))),
        )
    }

    pub fn with_client_factory(
        config: ChatConfig,
        store: Arc<StateStore>,
        client_factory: ClientFactory,
    ) -> Result<Self> {
        let names = config.names()?;
        let defaults = GuildSettings {
            prompt: config.default_prompt.clone(),
            global_prompt: config.default_global_prompt.clone(),
            model: config.default_model.clone(),
        };
        Ok(Self {
            names,
            settings: SettingsStore::new(store, defaults),
            scrollback: Scrollback::new(config.scrollback_turns),
            client_factory,
            config,
        })
    }

    fn client(&self) -> CompletionClient {
        (self.client_factory)(&self.config)
    }

    async fn query_text(
        &self,
        platform: &dyn Platform,
        channel: ChannelId,
        client: &CompletionClient,
        request: QueryRequest,
    ) -> Result<PagedReply> {
        match client.construct_async_query(Query::Text(request)).await {
            Ok(QueryOutput::Text(pages)) => Ok(pages),
            Ok(QueryOutput::Image(_)) => {
                Err(CogError::Transport("Expected text, got an image".into()))
            }
            Err(e) => Err(self.report_failure(platform, channel, e).await),
        }
    }

    async fn report_failure(&self, platform: &dyn Platform, channel: ChannelId, e: CogError) -> CogError {
        if let CogError::QueryTimeout(detail) = &e {
            if self.config.notify_operator {
                let note = format!("Completion failed in channel {channel}: {detail}");
                if let Err(notify_err) = platform.notify_operator(&note).await {
                    warn!("Failed to notify operator: {notify_err}");
                }
            }
        }
        e
    }

    async fn reply_mention(&self, ctx: &CogContext, message: &ChannelMessage) -> Result<()> {
        let platform = ctx.platform.as_ref();
        let bot_id = platform.bot_user_id();
        let client = self.client();
        client.ensure_text_credentials()?;
        platform.typing(message.channel_id).await;

        let request = ContextRequest {
            trigger: message,
            names: Some(&self.names),
            full_history: self.config.full_history,
            depth: self.config.history_depth,
        };
        let (messages, display_names) = match extract_conversation(platform, request).await {
            Ok(conversation) => {
                info!(
                    channel_id = message.channel_id,
                    title = %conversation.title,
                    turns = conversation.messages.len(),
                    "Answering mention"
                );
                (conversation.messages, conversation.display_names)
            }
            Err(e) => {
                warn!(channel_id = message.channel_id, "Falling back to single turn: {e}");
                match single_turn(message, bot_id) {
                    Some(turn) => (vec![turn], Default::default()),
                    None => {
                        platform
                            .send(message.channel_id, OutgoingMessage::text(EMPTY_MENTION_REPLY))
                            .await?;
                        return Ok(());
                    }
                }
            }
        };

        let settings = self.settings.get(message.guild_id).await;
        let request = QueryRequest {
            model_id: settings.model.clone(),
            system_prompt: compose_system_prompt(
                &settings,
                &display_names,
                Some(MENTION_INSTRUCTION),
                Utc::now(),
            ),
            messages,
            max_output_tokens: self.config.max_output_tokens,
        };
        let pages = self.query_text(platform, message.channel_id, &client, request).await?;
        let reply = send_pages(platform, message.channel_id, pages).await?;

        let asked = strip_mentions(&message.content, bot_id);
        if !asked.is_empty() {
            self.scrollback.push_exchange(
                message.channel_id,
                speaker_turn(message, &asked),
                ConversationMessage::assistant(reply),
            );
        }
        Ok(())
    }

    async fn chat(&self, ctx: &CogContext, message: &ChannelMessage, text: &str) -> Result<()> {
        if text.is_empty() {
            return Err(CogError::InvalidArgument("Usage: chat <message>".into()));
        }
        let platform = ctx.platform.as_ref();
        let client = self.client();
        client.ensure_text_credentials()?;
        platform.typing(message.channel_id).await;

        let channel = message.channel_id;
        let asked = speaker_turn(message, text);
        let mut messages = self.scrollback.recent(channel);
        messages.push(asked.clone());
        let settings = self.settings.get(message.guild_id).await;
        let request = QueryRequest {
            model_id: settings.model.clone(),
            system_prompt: compose_system_prompt(&settings, &Default::default(), None, Utc::now()),
            messages,
            max_output_tokens: self.config.max_output_tokens,
        };

        // Nothing is remembered unless the whole reply went out.
        let pages = self.query_text(platform, channel, &client, request).await?;
        let reply = send_pages(platform, channel, pages).await?;
        self.scrollback.push_exchange(channel, asked, ConversationMessage::assistant(reply));
        Ok(())
    }

    async fn imagine(&self, ctx: &CogContext, message: &ChannelMessage, prompt: &str) -> Result<()> {
        if prompt.is_empty() {
            return Err(CogError::InvalidArgument("Usage: imagine <prompt>".into()));
        }
        let platform = ctx.platform.as_ref();
        platform.typing(message.channel_id).await;
        let request = ImageRequest { prompt: prompt.to_string() };
        match self.client().construct_async_query(Query::Image(request)).await {
            Ok(QueryOutput::Image(bytes)) => {
                platform
                    .send(
                        message.channel_id,
                        OutgoingMessage::file("image.png", bytes).with_content(prompt),
                    )
                    .await?;
                Ok(())
            }
            Ok(QueryOutput::Text(_)) => Err(CogError::Transport("Expected an image".into())),
            Err(e) => Err(self.report_failure(platform, message.channel_id, e).await),
        }
    }

    async fn models(&self, ctx: &CogContext, message: &ChannelMessage) -> Result<()> {
        let models = self.client().list_models().await?;
        let listing = if models.is_empty() {
            "No models available.".to_string()
        } else {
            models.iter().map(|m| format!("- {m}")).collect::<Vec<_>>().join("\n")
        };
        send_pages(ctx.platform.as_ref(), message.channel_id, PagedReply::new(listing)).await?;
        Ok(())
    }

    async fn show(&self, ctx: &CogContext, message: &ChannelMessage, label: &str, value: String) -> Result<()> {
        let text = if value.trim().is_empty() {
            format!("No {label} is set.")
        } else {
            format!("Current {label}:\n{value}")
        };
        send_pages(ctx.platform.as_ref(), message.channel_id, PagedReply::new(text)).await?;
        Ok(())
    }

    async fn set(
        &self,
        ctx: &CogContext,
        message: &ChannelMessage,
        label: &str,
        change: impl FnOnce(&mut GuildSettings),
    ) -> Result<()> {
        ctx.access.require(message.author.id, Privilege::Owner)?;
        self.settings.update(message.guild_id, change).await?;
        info!(guild_id = ?message.guild_id, "Updated {label}");
        ctx.platform
            .send(message.channel_id, OutgoingMessage::text(format!("Updated the {label}.")))
            .await?;
        Ok(())
    }
}

/// A user turn as kept in scrollback, tagged with the author's handle.
fn speaker_turn(message: &ChannelMessage, text: &str) -> ConversationMessage {
    ConversationMessage::user(format!("@{}: {text}", message.author.name))
}

/// Sends every page in order and returns the full text sent.
async fn send_pages(platform: &dyn Platform, channel: ChannelId, pages: PagedReply) -> Result<String> {
    let mut sent = String::new();
    for page in pages {
        platform.send(channel, OutgoingMessage::text(page.clone())).await?;
        sent.push_str(&page);
    }
    Ok(sent)
}

#[async_trait]
impl Cog for ChatCog {
    fn meta(&self) -> CogMeta {
        CogMeta { id: "chat".into(), name: "Chat".into(), version: env!("CARGO_PKG_VERSION").into() }
    }

    async fn start(&self) -> Result<()> {
        info!(
            providers = self.config.providers.len(),
            history_depth = self.config.history_depth,
            "Chat cog started"
        );
        Ok(())
    }

    fn commands(&self) -> Vec<CommandSpec> {
        vec![
            CommandSpec { name: "chat", help: "talk to the bot with recent channel turns as context" },
            CommandSpec { name: "imagine", help: "generate an image from a prompt" },
            CommandSpec { name: "models", help: "list available models" },
            CommandSpec { name: "setprompt", help: "set this server's prompt (owner)" },
            CommandSpec { name: "showprompt", help: "show this server's prompt" },
            CommandSpec { name: "setglobalprompt", help: "set the global prompt (owner)" },
            CommandSpec { name: "showglobalprompt", help: "show the global prompt" },
            CommandSpec { name: "setmodel", help: "set this server's model (owner)" },
            CommandSpec { name: "showmodel", help: "show this server's model" },
        ]
    }

    async fn on_command(
        &self,
        ctx: &CogContext,
        message: &ChannelMessage,
        command: &CommandInvocation,
    ) -> Result<()> {
        let args = command.args.trim();
        match command.name.as_str() {
            "chat" => self.chat(ctx, message, args).await,
            "imagine" => self.imagine(ctx, message, args).await,
            "models" => self.models(ctx, message).await,
            "setprompt" => {
                let value = args.to_string();
                self.set(ctx, message, "prompt", move |s| s.prompt = value).await
            }
            "setglobalprompt" => {
                let value = args.to_string();
                self.set(ctx, message, "global prompt", move |s| s.global_prompt = value).await
            }
            "setmodel" => {
                if args.is_empty() {
                    return Err(CogError::InvalidArgument("Usage: setmodel <model id>".into()));
                }
                let value = args.to_string();
                self.set(ctx, message, "model", move |s| s.model = value).await
            }
            "showprompt" => {
                let settings = self.settings.get(message.guild_id).await;
                self.show(ctx, message, "prompt", settings.prompt).await
            }
            "showglobalprompt" => {
                let settings = self.settings.get(message.guild_id).await;
                self.show(ctx, message, "global prompt", settings.global_prompt).await
            }
            "showmodel" => {
                let settings = self.settings.get(message.guild_id).await;
                self.show(ctx, message, "model", settings.model).await
            }
            other => Err(CogError::CogNotFound(format!("chat has no command '{other}'"))),
        }
    }

    async fn on_mention(&self, ctx: &CogContext, message: &ChannelMessage) -> Result<bool> {
        if !message.mentions_user(ctx.platform.bot_user_id()) {
            return Ok(false);
        }
        self.reply_mention(ctx, message).await?;
        Ok(true)
    }

    async fn health(&self) -> CogHealth {
        let mut health = CogHealth::healthy();
        health
            .metrics
            .insert("scrollback_channels".into(), self.scrollback.channel_count().into());
        if self.config.providers.is_empty() {
            health.status = HealthStatus::Degraded;
            health.message = "No completion providers configured".into();
        }
        health
    }
}
