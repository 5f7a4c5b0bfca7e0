use thiserror::Error;

#[derive(Debug, Error)]
pub enum CogError {
    #[error("Cog not found: {0}")]
    CogNotFound(String),

    #[error("Config error: {0}")]
    Config(String),

    #[error("State store error: {0}")]
    State(String),

    #[error("Platform error: {0}")]
    Platform(String),

    #[error("Credentials missing: {0}")]
    CredentialsMissing(String),

    #[error("History extraction error: {0}")]
    HistoryExtraction(String),

    #[error("Query timed out: {0}")]
    QueryTimeout(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Dashboard edit error: {0}")]
    DashboardEdit(String),

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    SerdeJson(#[from] serde_json::Error),
}

impl CogError {
    /// Text shown in the channel when a command or mention fails with this error.
    pub fn user_message(&self) -> String {
        match self {
            CogError::CredentialsMissing(detail) => detail.clone(),
            CogError::PermissionDenied(_) => "You don't have permission to do that.".into(),
            CogError::InvalidArgument(detail) => detail.clone(),
            CogError::QueryTimeout(_) => {
                "Sorry, I couldn't get a response right now. Please try again later.".into()
            }
            _ => "Something went wrong while handling that.".into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, CogError>;
