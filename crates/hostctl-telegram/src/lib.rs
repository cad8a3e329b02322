//! # hostctl Telegram Transport
//!
//! Chat transport abstraction and its Telegram Bot API implementation.

#![warn(missing_docs)]

/// Transport abstraction
pub mod transport;

/// Telegram Bot API client
pub mod telegram;

/// Transport error types
pub mod error;

pub use transport::{Inbound, Transport};
pub use telegram::TelegramTransport;
pub use error::TransportError;

/// Result type alias for transport operations
pub type Result<T> = std::result::Result<T, TransportError>;
