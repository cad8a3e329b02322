//! # hostctl-agent
//!
//! Chat-driven remote-control agent. Polls the chat transport, gates every
//! command on the configured caller, and turns commands into host actions
//! through the fallback strategy executor.

#![warn(missing_docs)]

/// Startup configuration
pub mod config;

/// Log subscriber setup
pub mod logging;

/// Single-instance marker
pub mod instance;

/// Caller authorization
pub mod auth;

/// Poll loop and stop handle
pub mod agent;

/// Command dispatch
pub mod router;

/// Command handlers
pub mod handlers;

pub use agent::{AgentLoop, Handler, StopHandle};
pub use auth::Authorizer;
pub use config::{AgentConfig, Cli, ConfigError};
pub use handlers::HostContext;
pub use instance::{InstanceError, InstanceGuard};
pub use router::Dispatcher;

#[cfg(test)]
pub(crate) mod testing;
