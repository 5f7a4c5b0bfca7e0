use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use cogworks_core::{cog_table, load_config, AccessControl, AppConfig, CogRegistry, StateStore};
use cogworks_plugin_chat::ChatCog;
use cogworks_plugin_status::StatusCog;
use tracing_subscriber::EnvFilter;

fn config_path() -> PathBuf {
    std::env::args()
        .nth(1)
        .or_else(|| std::env::var("COGWORKS_CONFIG").ok())
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("cogworks.toml"))
}

#[tokio::main]
async fn main() -> Result<()> {
    let path = config_path();
    let raw = load_config(&path).with_context(|| format!("loading {}", path.display()))?;
    let app = AppConfig::from_value(&raw)?;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&app.log_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();
    tracing::info!("cogworks starting with {}", path.display());

    let store = Arc::new(StateStore::open(app.state_path.clone()).await?);
    let access = AccessControl { owners: app.owners.clone(), moderators: app.moderators.clone() };
    let mut registry = CogRegistry::new(app.prefix.clone(), access);
    registry.register(Arc::new(ChatCog::new(cog_table(&raw, "chat"), Arc::clone(&store))?))?;
    registry.register(Arc::new(StatusCog::new(cog_table(&raw, "status"), Arc::clone(&store))?))?;
    let registry = Arc::new(registry);
    registry.start_all().await?;

    let token = app
        .discord
        .token
        .resolve()
        .context("No Discord token: set `token` or `token_env` under [discord]")?;
    let operator = app.owners.first().copied();

    tokio::select! {
        result = cogworks_plugin_gateway_discord::start_discord_bot(token, Arc::clone(&registry), operator) => {
            if let Err(e) = result {
                tracing::error!("Gateway stopped: {e:#}");
            }
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Shutting down...");
        }
    }

    registry.stop_all().await?;
    Ok(())
}
