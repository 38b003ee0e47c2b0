//! Top-level error types for Docchat.

use std::sync::Arc;

/// Crate-wide result type alias.
pub type Result<T> = std::result::Result<T, Error>;

/// Top-level error enum wrapping domain-specific errors.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// No session token. Callers turn this into a login prompt, never a retry.
    #[error("not authenticated")]
    NotAuthenticated,

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Api(#[from] ApiError),

    #[error(transparent)]
    Channel(#[from] ChannelError),

    #[error(transparent)]
    Chat(#[from] ChatError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl Error {
    pub fn is_not_authenticated(&self) -> bool {
        matches!(self, Error::NotAuthenticated)
    }

    /// The string a surface shows inline for this error.
    pub fn user_message(&self) -> String {
        match self {
            Error::NotAuthenticated => "You need to sign in to use chat.".into(),
            Error::Api(ApiError::Status { message, .. }) => message.clone(),
            Error::Api(ApiError::Request(_)) => {
                "Could not reach the server. Check your connection.".into()
            }
            Error::Api(ApiError::Decode(_)) => "The server sent an unexpected response.".into(),
            Error::Channel(_) => "Could not send the message.".into(),
            Error::Chat(error) => error.to_string(),
            Error::Config(error) => error.to_string(),
            Error::Io(error) => error.to_string(),
            Error::Other(error) => error.to_string(),
        }
    }
}

/// Configuration loading errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to load config from {path}: {source}")]
    Load {
        path: String,
        source: Arc<std::io::Error>,
    },

    #[error("failed to parse config file {path}: {message}")]
    Parse { path: String, message: String },

    #[error("invalid configuration: {0}")]
    Invalid(String),

    #[error("missing required config key: {0}")]
    MissingKey(String),
}

/// REST endpoint errors.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// Non-success status. `message` is the server's `error` field when present.
    #[error("server returned {status}: {message}")]
    Status { status: u16, message: String },

    #[error("failed to decode response: {0}")]
    Decode(String),
}

/// Channel connection and framing errors.
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    #[error("failed to connect channel: {0}")]
    Connect(String),

    #[error("channel is closed")]
    Closed,

    #[error("failed to encode frame: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("failed to decode frame: {0}")]
    Decode(String),
}

/// Conversation-level failures. Display strings are user-facing.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ChatError {
    #[error("chat is unavailable: {0}")]
    Unavailable(String),

    #[error("cannot determine the recipient")]
    MissingPartner,

    #[error("{0}")]
    HistoryLoad(String),

    #[error("{0}")]
    Upload(String),

    /// The channel refused an emission.
    #[error("{0}")]
    Send(String),

    #[error("invalid image: {0}")]
    InvalidImage(String),

    /// Error pushed by the server over the channel.
    #[error("{0}")]
    Remote(String),

    #[error("message was not delivered: {preview}")]
    Undelivered { preview: String },

    #[error("could not join the conversation")]
    JoinFailed,

    #[error("chat connection lost")]
    Disconnected,
}
