//! Agent poll loop

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use hostctl_proto::{Command, Reply};
use hostctl_telegram::Transport;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::router::Dispatcher;

/// Upper bound on the delay between failed polls
pub const MAX_BACKOFF: Duration = Duration::from_secs(60);

/// Handler trait for processing commands
#[async_trait::async_trait]
pub trait Handler: Send + Sync {
    /// Text sent before the command runs, if any
    fn acknowledgement(&self) -> Option<String> {
        None
    }

    /// Handle a command and return the reply
    async fn handle(&self, command: &Command) -> Result<Reply>;
}

/// Requests a graceful stop of the poll loop
///
/// Clones share one flag; once requested it stays requested.
#[derive(Debug, Clone)]
pub struct StopHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl StopHandle {
    /// New handle, not yet requested
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    /// Ask the loop to stop after the current command
    pub fn request(&self) {
        if !self.tx.send_replace(true) {
            info!("Stop requested");
        }
    }

    /// Whether a stop was requested
    pub fn is_requested(&self) -> bool {
        *self.tx.borrow()
    }

    /// Receiver notified when a stop is requested
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }
}

impl Default for StopHandle {
    fn default() -> Self {
        Self::new()
    }
}

/// Main agent loop: poll, dispatch, repeat until stopped
pub struct AgentLoop {
    /// Chat transport
    transport: Arc<dyn Transport>,
    /// Routes each command to its handler
    dispatcher: Dispatcher,
    /// Stop flag shared with handlers and signal listeners
    stop: StopHandle,
    /// Cap on the retry delay after poll failures
    max_backoff: Duration,
}

impl AgentLoop {
    /// Create a loop over `transport`
    pub fn new(transport: Arc<dyn Transport>, dispatcher: Dispatcher, stop: StopHandle) -> Self {
        Self {
            transport,
            dispatcher,
            stop,
            max_backoff: MAX_BACKOFF,
        }
    }

    /// Cap the retry delay after poll failures
    pub fn with_max_backoff(mut self, max_backoff: Duration) -> Self {
        self.max_backoff = max_backoff;
        self
    }

    /// Run until a stop is requested
    ///
    /// Poll failures are retried with exponential backoff. After stopping,
    /// the consumed updates are confirmed so they are not redelivered.
    pub async fn run(&self) -> Result<()> {
        info!("Starting agent loop");

        let mut stop_rx = self.stop.subscribe();
        let mut failures: u32 = 0;

        while !self.stop.is_requested() {
            tokio::select! {
                changed = stop_rx.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }

                polled = self.transport.next_commands() => {
                    match polled {
                        Ok(batch) => {
                            failures = 0;
                            self.dispatch_batch(batch).await;
                        }
                        Err(e) => {
                            failures = failures.saturating_add(1);
                            let delay = self.backoff(failures);
                            if e.is_transient() {
                                warn!("Polling failed ({}), retrying in {:?}", e, delay);
                            } else {
                                error!("Polling failed ({}), retrying in {:?}", e, delay);
                            }
                            tokio::select! {
                                _ = stop_rx.changed() => {}
                                _ = tokio::time::sleep(delay) => {}
                            }
                        }
                    }
                }
            }
        }

        info!("Received stop request, stopping agent loop");
        if let Err(e) = self.transport.acknowledge().await {
            warn!("Failed to confirm processed updates: {}", e);
        }

        info!("Agent loop stopped");
        Ok(())
    }

    async fn dispatch_batch(&self, batch: Vec<hostctl_telegram::Inbound>) {
        let total = batch.len();
        for (index, inbound) in batch.iter().enumerate() {
            self.dispatcher.dispatch(inbound).await;
            if self.stop.is_requested() {
                let skipped = total - index - 1;
                if skipped > 0 {
                    warn!("Dropping {} command(s) received after the stop request", skipped);
                }
                return;
            }
        }
        debug!("Dispatched {} command(s)", total);
    }

    fn backoff(&self, failures: u32) -> Duration {
        let seconds = 2u64.saturating_pow(failures.min(16));
        Duration::from_secs(seconds).min(self.max_backoff)
    }
}
