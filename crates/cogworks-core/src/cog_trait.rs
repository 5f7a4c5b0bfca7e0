use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{CogError, Result};
use crate::platform::{ChannelMessage, Platform, UserId};
use crate::router::CommandInvocation;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CogMeta {
    pub id: String,
    pub name: String,
    pub version: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CogHealth {
    pub status: HealthStatus,
    pub message: String,
    pub metrics: HashMap<String, serde_json::Value>,
}

impl CogHealth {
    pub fn healthy() -> Self {
        Self { status: HealthStatus::Healthy, message: "OK".into(), metrics: HashMap::new() }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Privilege {
    Everyone,
    Moderator,
    Owner,
}

#[derive(Debug, Clone, Default)]
pub struct AccessControl {
    pub owners: Vec<UserId>,
    pub moderators: Vec<UserId>,
}

impl AccessControl {
    pub fn privilege_of(&self, user: UserId) -> Privilege {
        if self.owners.contains(&user) {
            Privilege::Owner
        } else if self.moderators.contains(&user) {
            Privilege::Moderator
        } else {
            Privilege::Everyone
        }
    }

    pub fn require(&self, user: UserId, needed: Privilege) -> Result<()> {
        if self.privilege_of(user) >= needed {
            Ok(())
        } else {
            Err(CogError::PermissionDenied(format!("user {user} needs {needed:?}")))
        }
    }
}

/// What a cog gets to work with on every trigger.
#[derive(Clone)]
pub struct CogContext {
    pub platform: Arc<dyn Platform>,
    pub access: AccessControl,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandSpec {
    pub name: &'static str,
    pub help: &'static str,
}

/// A pluggable module of commands, mention handling and periodic work.
///
/// One method per trigger type; cogs opt into the triggers they care about.
#[async_trait]
pub trait Cog: Send + Sync {
    fn meta(&self) -> CogMeta;

    async fn start(&self) -> Result<()> {
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        Ok(())
    }

    fn commands(&self) -> Vec<CommandSpec> {
        Vec::new()
    }

    async fn on_command(
        &self,
        _ctx: &CogContext,
        _message: &ChannelMessage,
        _command: &CommandInvocation,
    ) -> Result<()> {
        Ok(())
    }

    /// Returns `true` if the mention was handled and no later cog should see it.
    async fn on_mention(&self, _ctx: &CogContext, _message: &ChannelMessage) -> Result<bool> {
        Ok(false)
    }

    /// Interval for [`Cog::on_tick`]; `None` means the cog is never ticked.
    fn tick_interval(&self) -> Option<Duration> {
        None
    }

    async fn on_tick(&self, _ctx: &CogContext) -> Result<()> {
        Ok(())
    }

    async fn health(&self) -> CogHealth {
        CogHealth::healthy()
    }
}
