use thiserror::Error;

const SIGN_IN_MESSAGE: &str = "please sign in";
const RELOAD_MESSAGE: &str = "could not reach the schedule store, please reload";

#[derive(Debug, Error)]
pub enum InfraError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("Invalid config: {0}")]
    InvalidConfig(String),
    #[error("{0}")]
    Validation(String),
    #[error("not authenticated")]
    NotAuthenticated,
    #[error("not found: {0}")]
    NotFound(String),
    #[error("event is finalized: {0}")]
    EventFinalized(String),
    #[error("blocking task failed: {0}")]
    Join(String),
    #[error("batch write failed: {0}")]
    BatchWrite(String),
}

impl InfraError {
    /// Message safe to hand back to the calling client.
    pub fn public_message(&self) -> String {
        match self {
            Self::Validation(message) => message.clone(),
            Self::NotAuthenticated => SIGN_IN_MESSAGE.to_string(),
            Self::NotFound(_) => "event not found".to_string(),
            Self::EventFinalized(_) => {
                "this event is finalized and can no longer be synced".to_string()
            }
            Self::BatchWrite(_) => {
                "the event was not updated, please reload and try again".to_string()
            }
            Self::Io(_)
            | Self::Json(_)
            | Self::Sqlite(_)
            | Self::InvalidConfig(_)
            | Self::Join(_) => RELOAD_MESSAGE.to_string(),
        }
    }

    pub fn is_data_source_failure(&self) -> bool {
        matches!(
            self,
            Self::Io(_)
                | Self::Json(_)
                | Self::Sqlite(_)
                | Self::InvalidConfig(_)
                | Self::Join(_)
                | Self::BatchWrite(_)
        )
    }
}
