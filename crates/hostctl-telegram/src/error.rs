//! Transport error types

use thiserror::Error;

/// Transport-specific errors
#[derive(Debug, Error)]
pub enum TransportError {
    /// Request could not be sent or its response could not be read
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The Bot API answered with `ok: false`
    #[error("Telegram API error {code}: {description}")]
    Api {
        /// `error_code` from the response
        code: i64,
        /// `description` from the response
        description: String,
    },

    /// The response did not have the expected shape
    #[error("Malformed response: {0}")]
    Malformed(String),
}

impl TransportError {
    /// Whether retrying later may help
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Http(_) => true,
            Self::Api { code, .. } => *code == 429 || *code >= 500,
            Self::Malformed(_) => false,
        }
    }
}
