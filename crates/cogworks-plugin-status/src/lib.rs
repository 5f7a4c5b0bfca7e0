pub mod config;
pub mod dashboard;
pub mod probe;
pub mod render;
pub mod sources;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use cogworks_core::{
    ChannelId, ChannelMessage, Cog, CogContext, CogError, CogHealth, CogMeta, CommandInvocation,
    CommandSpec, HealthStatus, OutgoingMessage, Platform, Privilege, Result, RetryPolicy, Sleeper,
    StateStore, TokioSleeper,
};
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::config::StatusConfig;
use crate::dashboard::Dashboard;
use crate::probe::{NetProber, Prober};
use crate::render::{render, Section};
use crate::sources::{PollReport, Poller};

const USAGE: &str = "**status** subcommands:\n\
`refresh` - poll every source now\n\
`channel <id>` - post the dashboard in another channel (moderator)\n\
`enable <section>` / `disable <section>` - toggle main, secondary or alert (moderator)\n\
`debug <region>` - raw payload of a feed (moderator)";

pub struct StatusCog {
    config: StatusConfig,
    prober: Arc<dyn Prober>,
    sleeper: Arc<dyn Sleeper>,
    dashboard: Dashboard,
    last_report: Mutex<Option<PollReport>>,
}

impl StatusCog {
    pub fn new(table: toml::Value, store: Arc<StateStore>) -> Result<Self> {
        let config = StatusConfig::from_table(table)?;
        let prober = Arc::new(NetProber::new(config.timeout()));
        Ok(Self::with_prober(config, store, prober, Arc::new(TokioSleeper)))
    }

    pub fn with_prober(
        config: StatusConfig,
        store: Arc<StateStore>,
        prober: Arc<dyn Prober>,
        sleeper: Arc<dyn Sleeper>,
    ) -> Self {
        Self {
            config,
            prober,
            sleeper,
            dashboard: Dashboard::new(store),
            last_report: Mutex::new(None),
        }
    }

    /// Polls every source and reconciles every section.
    pub async fn run_cycle(&self, platform: &dyn Platform) -> PollReport {
        let poller = Poller {
            prober: self.prober.as_ref(),
            sleeper: self.sleeper.as_ref(),
            policy: RetryPolicy::quadratic(self.config.retry_attempts),
        };
        let report = poller.poll_all(&self.config, Utc::now()).await;
        let rendered: Vec<(Section, Option<_>)> =
            Section::ALL.iter().map(|&section| (section, render(section, &report))).collect();

        let results = self.dashboard.reconcile(platform, rendered).await;
        let failed = results.iter().filter(|(_, r)| r.is_err()).count();
        info!(
            sources = report.components.len() + report.probes.len() + report.feeds.len(),
            sections_failed = failed,
            "Status cycle finished"
        );
        *self.last_report.lock().await = Some(report.clone());
        report
    }

    async fn reply(&self, platform: &dyn Platform, message: &ChannelMessage, text: impl Into<String>) -> Result<()> {
        platform.send(message.channel_id, OutgoingMessage::text(text)).await?;
        Ok(())
    }

    async fn debug_dump(&self, platform: &dyn Platform, message: &ChannelMessage, region: &str) -> Result<()> {
        let feed = self.config.feed(region).ok_or_else(|| {
            let known: Vec<&str> = self.config.feeds.iter().map(|f| f.name.as_str()).collect();
            CogError::InvalidArgument(format!(
                "Unknown region '{region}'. Known regions: {}",
                if known.is_empty() { "none".to_string() } else { known.join(", ") }
            ))
        })?;
        let body = match self.prober.fetch_text(&feed.url).await {
            Ok(body) => body,
            Err(e) => format!("Fetching {} failed: {e}", feed.url),
        };
        let filename = format!("{}-debug.txt", feed.name.to_lowercase().replace(' ', "-"));
        platform
            .send(
                message.channel_id,
                OutgoingMessage::file(filename, body.into_bytes())
                    .with_content(format!("Raw payload for {}", feed.name)),
            )
            .await?;
        Ok(())
    }
}

#[async_trait]
impl Cog for StatusCog {
    fn meta(&self) -> CogMeta {
        CogMeta {
            id: "status".into(),
            name: "Status Dashboard".into(),
            version: env!("CARGO_PKG_VERSION").into(),
        }
    }

    async fn start(&self) -> Result<()> {
        self.dashboard.restore(self.config.channel_id).await;
        Ok(())
    }

    fn commands(&self) -> Vec<CommandSpec> {
        vec![CommandSpec { name: "status", help: "status dashboard controls, `status` for usage" }]
    }

    async fn on_command(
        &self,
        ctx: &CogContext,
        message: &ChannelMessage,
        command: &CommandInvocation,
    ) -> Result<()> {
        let platform = ctx.platform.as_ref();
        let (sub, rest) = command.subcommand();
        match sub.to_ascii_lowercase().as_str() {
            "" => {
                let state = self.dashboard.state().await;
                let sections: Vec<String> = Section::ALL
                    .iter()
                    .map(|&s| format!("{s}: {}", if state.is_enabled(s) { "on" } else { "off" }))
                    .collect();
                let channel = state
                    .channel_id
                    .map(|c| format!("<#{c}>"))
                    .unwrap_or_else(|| "not set".into());
                self.reply(
                    platform,
                    message,
                    format!("{USAGE}\n\nChannel: {channel}\nSections: {}", sections.join(", ")),
                )
                .await
            }
            "refresh" => {
                if self.dashboard.state().await.channel_id.is_none() {
                    return Err(CogError::InvalidArgument(
                        "No status channel is set. Use `status channel <id>` first.".into(),
                    ));
                }
                self.run_cycle(platform).await;
                self.reply(platform, message, "Status refreshed.").await
            }
            "channel" => {
                ctx.access.require(message.author.id, Privilege::Moderator)?;
                let channel = rest
                    .trim_start_matches("<#")
                    .trim_end_matches('>')
                    .parse::<ChannelId>()
                    .map_err(|_| CogError::InvalidArgument("Usage: status channel <channel id>".into()))?;
                self.dashboard.set_channel(platform, channel).await?;
                self.reply(platform, message, format!("Status updates will be posted in <#{channel}>."))
                    .await?;
                self.run_cycle(platform).await;
                Ok(())
            }
            "enable" | "disable" => {
                ctx.access.require(message.author.id, Privilege::Moderator)?;
                let section: Section = rest.parse()?;
                let enabled = sub.eq_ignore_ascii_case("enable");
                self.dashboard.set_enabled(platform, section, enabled).await?;
                let word = if enabled { "enabled" } else { "disabled" };
                self.reply(platform, message, format!("Section {section} {word}.")).await
            }
            "debug" => {
                ctx.access.require(message.author.id, Privilege::Moderator)?;
                if rest.is_empty() {
                    return Err(CogError::InvalidArgument("Usage: status debug <region>".into()));
                }
                self.debug_dump(platform, message, rest).await
            }
            other => Err(CogError::InvalidArgument(format!("Unknown subcommand '{other}'.\n{USAGE}"))),
        }
    }

    fn tick_interval(&self) -> Option<Duration> {
        Some(self.config.interval())
    }

    async fn on_tick(&self, ctx: &CogContext) -> Result<()> {
        if self.dashboard.state().await.channel_id.is_none() {
            warn!("Status tick skipped: no output channel");
            return Ok(());
        }
        self.run_cycle(ctx.platform.as_ref()).await;
        Ok(())
    }

    async fn health(&self) -> CogHealth {
        let state = self.dashboard.state().await;
        let mut health = CogHealth::healthy();
        health.metrics.insert("live_messages".into(), state.messages.len().into());
        if let Some(report) = self.last_report.lock().await.as_ref() {
            health.metrics.insert("last_checked".into(), report.checked_at.to_rfc3339().into());
        }
        if state.channel_id.is_none() {
            health.status = HealthStatus::Degraded;
            health.message = "No output channel".into();
        }
        health
    }
}
