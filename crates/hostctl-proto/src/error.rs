//! Error types for command parsing

use thiserror::Error;

/// Errors raised while turning chat text into a [`crate::Command`]
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    /// Text does not start with a `/command` token
    #[error("Not a command")]
    NotACommand,
    
    /// Command name is not one the agent understands
    #[error("Unknown command: /{0}")]
    UnknownCommand(String),
}
