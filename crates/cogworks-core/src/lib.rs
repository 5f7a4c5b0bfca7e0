pub mod cog_loader;
pub mod cog_trait;
pub mod config;
pub mod error;
pub mod platform;
pub mod retry;
pub mod router;
pub mod state;
pub mod types;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use cog_loader::CogRegistry;
pub use cog_trait::{
    AccessControl, Cog, CogContext, CogHealth, CogMeta, CommandSpec, HealthStatus, Privilege,
};
pub use config::{cog_table, load_config, parse_cog_config, AppConfig, Secret};
pub use error::{CogError, Result};
pub use platform::{
    Attachment, Author, ChannelId, ChannelMessage, Embed, EmbedField, FileUpload, GuildId,
    MessageId, MessageKind, OutgoingMessage, Platform, UserId,
};
pub use retry::{retry_with_backoff, RetryExhausted, RetryPolicy, Sleeper, TokioSleeper};
pub use router::{handle_incoming, Action, CommandInvocation};
pub use state::StateStore;
pub use types::{ContentPart, ConversationMessage, ImageUrl, MessageContent, QueryRequest, Role};
