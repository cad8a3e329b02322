//! # hostctl Protocol
//!
//! Command and reply types exchanged between the chat transport and the agent.

#![warn(missing_docs)]

/// Command and reply types
pub mod message;

/// Error types for command parsing
pub mod error;

pub use message::{CallerId, Command, CommandKind, Reply};
pub use error::ProtocolError;
