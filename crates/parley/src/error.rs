use thiserror::Error;

use parley_client::ClientError;
use parley_common::TranscriptError;

#[derive(Error, Debug)]
#[non_exhaustive]
pub enum SessionError {
    /// Missing or unusable credential or endpoint. Never retried.
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Provider error: {0}")]
    Provider(#[source] ClientError),

    #[error("Unknown tool '{name}' requested by call {call_id}")]
    UnknownTool { name: String, call_id: String },

    #[error("Stream interrupted: {0}")]
    StreamInterrupted(#[source] ClientError),

    #[error("Invalid transcript: {0}")]
    InvalidTranscript(#[from] TranscriptError),

    #[error("Invalid session state: {0}")]
    InvalidState(String),

    #[error("Maximum turns exceeded: {0}")]
    MaxTurnsExceeded(u32),
}

impl From<ClientError> for SessionError {
    fn from(error: ClientError) -> Self {
        match error {
            ClientError::ConfigurationError(message) => Self::Config(message),
            other => Self::Provider(other),
        }
    }
}

impl SessionError {
    /// The underlying client error, if any.
    #[must_use]
    pub const fn client_error(&self) -> Option<&ClientError> {
        match self {
            Self::Provider(e) | Self::StreamInterrupted(e) => Some(e),
            _ => None,
        }
    }

    #[must_use]
    pub const fn is_config_error(&self) -> bool {
        matches!(self, Self::Config(_))
    }
}
