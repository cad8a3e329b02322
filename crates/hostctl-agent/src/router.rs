//! Command dispatch: authorization, argument checks, handler routing

use std::collections::HashMap;
use std::sync::Arc;

use hostctl_proto::{Command, CommandKind, Reply};
use hostctl_telegram::{Inbound, Transport};
use tracing::{debug, error, info, warn};

use crate::agent::Handler;
use crate::auth::Authorizer;

/// Reply sent to callers other than the allowed one
pub const UNAUTHORIZED: &str = "❌ Unauthorized user.";

/// Routes inbound commands to their handlers and sends the replies
pub struct Dispatcher {
    /// Caller gate
    authorizer: Authorizer,
    /// Device name used in replies
    device: String,
    /// Registered handlers by command kind
    handlers: HashMap<CommandKind, Arc<dyn Handler>>,
    /// Where replies go
    transport: Arc<dyn Transport>,
}

impl Dispatcher {
    /// Create a dispatcher with no handlers
    pub fn new(authorizer: Authorizer, device: impl Into<String>, transport: Arc<dyn Transport>) -> Self {
        Self {
            authorizer,
            device: device.into(),
            handlers: HashMap::new(),
            transport,
        }
    }

    /// Register a handler for a command kind
    pub fn register(&mut self, kind: CommandKind, handler: Arc<dyn Handler>) {
        debug!("Registered handler for {}", kind);
        self.handlers.insert(kind, handler);
    }

    /// Device name used in replies
    pub fn device(&self) -> &str {
        &self.device
    }

    /// Handle one inbound command end to end
    ///
    /// Every command gets at least one reply; failures to send are logged.
    pub async fn dispatch(&self, inbound: &Inbound) {
        let command = &inbound.command;
        info!(
            "caller={} command={} args={:?} id={}",
            command.caller(),
            command.kind(),
            command.args(),
            command.id()
        );

        let reply = self.route(inbound.chat_id, command).await;
        self.send(inbound.chat_id, &reply).await;
    }

    async fn route(&self, chat_id: i64, command: &Command) -> Reply {
        if !self.authorizer.authorize(command.caller()) {
            warn!("Rejected {} from unauthorized caller {}", command.kind(), command.caller());
            return Reply::text(UNAUTHORIZED);
        }

        if let Some(usage) = validate(command) {
            return Reply::text(usage);
        }

        let Some(handler) = self.handlers.get(&command.kind()) else {
            warn!("No handler registered for {}", command.kind());
            return Reply::text(format!("❌ {} is not supported on {}.", command.kind(), self.device));
        };

        if let Some(ack) = handler.acknowledgement() {
            self.send(chat_id, &Reply::text(ack)).await;
        }

        match handler.handle(command).await {
            Ok(reply) => reply,
            Err(e) => {
                error!("Handler for {} failed: {:#}", command.kind(), e);
                Reply::text(format!(
                    "❌ {} failed on {}. Check the agent log for details.",
                    command.kind(),
                    self.device
                ))
            }
        }
    }

    async fn send(&self, chat_id: i64, reply: &Reply) {
        if let Err(e) = self.transport.send(chat_id, reply).await {
            error!("Failed to send reply to chat {}: {}", chat_id, e);
        }
    }
}

/// Usage text when the arguments do not fit the command
pub fn validate(command: &Command) -> Option<&'static str> {
    match command.kind() {
        CommandKind::ShutdownIn => match command.args() {
            [seconds] if seconds.parse::<i64>().is_ok_and(|s| s > 0) => None,
            _ => Some("Usage: /shutdown_in <seconds>"),
        },
        CommandKind::Say if command.args().is_empty() => Some("Usage: /say <text>"),
        _ => None,
    }
}
