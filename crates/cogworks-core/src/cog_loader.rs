use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, info, warn};

use crate::cog_trait::{AccessControl, Cog, CogContext, Privilege};
use crate::error::{CogError, Result};
use crate::platform::{ChannelMessage, OutgoingMessage, Platform};
use crate::router::{handle_incoming, Action};

/// Owns the registered cogs and routes platform events to them.
pub struct CogRegistry {
    cogs: Vec<Arc<dyn Cog>>,
    commands: HashMap<String, usize>,
    prefix: String,
    access: AccessControl,
}

impl CogRegistry {
    pub fn new(prefix: impl Into<String>, access: AccessControl) -> Self {
        Self { cogs: Vec::new(), commands: HashMap::new(), prefix: prefix.into(), access }
    }

    pub fn register(&mut self, cog: Arc<dyn Cog>) -> Result<()> {
        let meta = cog.meta();
        let index = self.cogs.len();
        for spec in cog.commands() {
            if let Some(&owner) = self.commands.get(spec.name) {
                return Err(CogError::Config(format!(
                    "Command '{}' of cog '{}' is already provided by cog '{}'",
                    spec.name,
                    meta.id,
                    self.cogs[owner].meta().id
                )));
            }
            self.commands.insert(spec.name.to_string(), index);
        }
        info!("Registered cog: {} ({})", meta.name, meta.id);
        self.cogs.push(cog);
        Ok(())
    }

    pub fn context(&self, platform: Arc<dyn Platform>) -> CogContext {
        CogContext { platform, access: self.access.clone() }
    }

    pub async fn start_all(&self) -> Result<()> {
        for cog in &self.cogs {
            let id = cog.meta().id;
            info!("Starting cog: {id}");
            cog.start().await?;
        }
        Ok(())
    }

    pub async fn stop_all(&self) -> Result<()> {
        for cog in self.cogs.iter().rev() {
            let id = cog.meta().id;
            info!("Stopping cog: {id}");
            if let Err(e) = cog.stop().await {
                warn!("Error stopping cog {id}: {e}");
            }
        }
        Ok(())
    }

    /// Cogs that want periodic ticks, with their interval.
    pub fn tickers(&self) -> Vec<(Arc<dyn Cog>, Duration)> {
        self.cogs
            .iter()
            .filter_map(|cog| cog.tick_interval().map(|every| (Arc::clone(cog), every)))
            .collect()
    }

    /// Routes one incoming message. Returns the action taken, if any.
    ///
    /// Cog errors never escape: they are logged and turned into a reply.
    pub async fn dispatch(
        &self,
        platform: Arc<dyn Platform>,
        message: &ChannelMessage,
    ) -> Option<Action> {
        let action = handle_incoming(message, platform.bot_user_id(), &self.prefix)?;
        let ctx = self.context(Arc::clone(&platform));

        let outcome = match &action {
            Action::Command(command) if command.name == "help" => {
                platform
                    .send(message.channel_id, OutgoingMessage::text(self.help_text()))
                    .await
                    .map(|_| ())
            }
            Action::Command(command) if command.name == "health" => {
                self.send_health(&ctx, message).await
            }
            Action::Command(command) => match self.commands.get(&command.name) {
                Some(&index) => {
                    debug!(command = %command.name, author = message.author.id, "Dispatching command");
                    self.cogs[index].on_command(&ctx, message, command).await
                }
                None => {
                    debug!(command = %command.name, "Unknown command, ignoring");
                    return None;
                }
            },
            Action::Mention => self.dispatch_mention(&ctx, message).await,
        };

        if let Err(e) = outcome {
            match &e {
                CogError::PermissionDenied(detail) => warn!(channel_id = message.channel_id, "{detail}"),
                _ => error!(channel_id = message.channel_id, "Handling {action:?} failed: {e}"),
            }
            if let Err(send_err) = platform
                .send(message.channel_id, OutgoingMessage::text(e.user_message()))
                .await
            {
                error!("Failed to send error reply: {send_err}");
            }
        }
        Some(action)
    }

    async fn dispatch_mention(&self, ctx: &CogContext, message: &ChannelMessage) -> Result<()> {
        for cog in &self.cogs {
            if cog.on_mention(ctx, message).await? {
                return Ok(());
            }
        }
        debug!("Mention not handled by any cog");
        Ok(())
    }

    fn help_text(&self) -> String {
        let mut lines = vec!["**Commands**".to_string()];
        for cog in &self.cogs {
            for spec in cog.commands() {
                lines.push(format!("`{}{}` - {}", self.prefix, spec.name, spec.help));
            }
        }
        lines.push(format!("`{}health` - cog health (moderator)", self.prefix));
        lines.join("\n")
    }

    /// One line per cog: status, message and sorted metrics.
    async fn send_health(&self, ctx: &CogContext, message: &ChannelMessage) -> Result<()> {
        ctx.access.require(message.author.id, Privilege::Moderator)?;
        let mut lines = vec!["**Cog health**".to_string()];
        for cog in &self.cogs {
            let health = cog.health().await;
            let mut metrics: Vec<String> =
                health.metrics.iter().map(|(k, v)| format!("{k}={v}")).collect();
            metrics.sort();
            let mut line = format!("`{}` {:?}: {}", cog.meta().id, health.status, health.message);
            if !metrics.is_empty() {
                line.push_str(&format!(" ({})", metrics.join(", ")));
            }
            lines.push(line);
        }
        ctx.platform
            .send(message.channel_id, OutgoingMessage::text(lines.join("\n")))
            .await
            .map(|_| ())
    }
}
