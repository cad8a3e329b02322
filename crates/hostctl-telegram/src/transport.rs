//! Transport abstraction

use async_trait::async_trait;
use hostctl_proto::{Command, Reply};

use crate::Result;

/// A command together with the chat it came from
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Inbound {
    /// Chat to reply into
    pub chat_id: i64,
    /// Parsed command, carrying the sender's identity
    pub command: Command,
}

/// Chat transport
#[async_trait]
pub trait Transport: Send + Sync {
    /// Wait for the next batch of commands (may be empty after a poll timeout)
    async fn next_commands(&self) -> Result<Vec<Inbound>>;

    /// Deliver a reply
    async fn send(&self, chat_id: i64, reply: &Reply) -> Result<()>;

    /// Confirm everything received so far so it is not delivered again
    async fn acknowledge(&self) -> Result<()>;
}
