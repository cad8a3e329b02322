//! Command handlers

use std::sync::Arc;

use anyhow::{Context, Result};
use hostctl::{
    discover_devices, CancelOutcome, Capability, Executor, FailureReport, HostError, HostStatus,
    Identity, Invocation, Outcome, Scheduler, SessionEnvironment, StrategyTable,
};
use hostctl_proto::{Command, CommandKind, Reply};
use tracing::{info, warn};

use crate::agent::{Handler, StopHandle};
use crate::router::Dispatcher;

/// Host-side services shared by the handlers
#[derive(Debug)]
pub struct HostContext {
    /// Device name used in replies
    pub device: String,
    /// Strategy executor
    pub executor: Arc<Executor>,
    /// Platform strategy table
    pub table: Arc<StrategyTable>,
    /// Delayed shutdown scheduler
    pub scheduler: Arc<Scheduler>,
}

impl HostContext {
    /// Context for `table`, with a scheduler built from its schedule recipes
    pub fn new(device: impl Into<String>, executor: Arc<Executor>, table: Arc<StrategyTable>) -> Self {
        let scheduler = Arc::new(Scheduler::new(executor.clone(), table.schedule().clone()));
        Self {
            device: device.into(),
            executor,
            table,
            scheduler,
        }
    }
}

/// Register every command handler on `dispatcher`
pub fn register_all(dispatcher: &mut Dispatcher, context: Arc<HostContext>, stop: StopHandle) {
    for (kind, capability) in [
        (CommandKind::Shutdown, Capability::Shutdown),
        (CommandKind::Restart, Capability::Restart),
        (CommandKind::Lock, Capability::Lock),
        (CommandKind::Screenshot, Capability::Screenshot),
        (CommandKind::Say, Capability::Speech),
    ] {
        dispatcher.register(kind, Arc::new(ActionHandler::new(context.clone(), capability)));
    }

    dispatcher.register(CommandKind::ShutdownIn, Arc::new(ScheduleHandler(context.clone())));
    dispatcher.register(CommandKind::CancelShutdown, Arc::new(CancelHandler(context.clone())));
    dispatcher.register(CommandKind::Status, Arc::new(StatusHandler(context.clone())));
    dispatcher.register(CommandKind::Whoami, Arc::new(WhoamiHandler(context.clone())));
    dispatcher.register(CommandKind::Camera, Arc::new(CameraHandler(context.clone())));
    dispatcher.register(
        CommandKind::ShutdownBot,
        Arc::new(ShutdownBotHandler {
            device: context.device.clone(),
            stop,
        }),
    );
}

/// Runs a capability's strategy list
pub struct ActionHandler {
    context: Arc<HostContext>,
    capability: Capability,
}

impl ActionHandler {
    /// Handler for `capability`
    pub fn new(context: Arc<HostContext>, capability: Capability) -> Self {
        Self { context, capability }
    }

    fn title(&self) -> &'static str {
        match self.capability {
            Capability::Shutdown => "Shutdown",
            Capability::Restart => "Restart",
            Capability::Lock => "Screen lock",
            Capability::Screenshot => "Screenshot",
            Capability::Speech => "Speech",
            Capability::Camera => "Camera capture",
        }
    }
}

#[async_trait::async_trait]
impl Handler for ActionHandler {
    fn acknowledgement(&self) -> Option<String> {
        let device = &self.context.device;
        match self.capability {
            Capability::Shutdown => Some(format!("{}: Attempting to shut down now... 🧨💤", device)),
            Capability::Restart => Some(format!("{}: Attempting to restart now... 🔁💻", device)),
            Capability::Lock => Some(format!("{}: Attempting to lock screen now... 🔒", device)),
            Capability::Screenshot => Some(format!("{}: Taking screenshot... 📸", device)),
            Capability::Speech | Capability::Camera => None,
        }
    }

    async fn handle(&self, command: &Command) -> Result<Reply> {
        let mut invocation = Invocation::for_capability(self.capability);
        if command.kind().is_session_bound() {
            let env = SessionEnvironment::resolve();
            info!("Session environment for {}:\n{}", self.capability, env.describe());
            invocation = invocation.with_environment(env);
        }
        let text = command.joined_args();
        if self.capability == Capability::Speech {
            invocation = invocation.with_payload(text.clone());
        }

        let strategies = self.context.table.strategies(self.capability);
        let outcome = self.context.executor.execute(strategies, &invocation).await;

        let device = &self.context.device;
        let (winner, artifact) = match outcome {
            Outcome::Succeeded { winner, artifact, .. } => (winner, artifact),
            Outcome::Failed(report) => {
                return Ok(Reply::text(failure_text(self.title(), device, &report)));
            }
        };

        let reply = match self.capability {
            Capability::Shutdown => Reply::text(format!("{}: Shutdown initiated via {}.", device, winner)),
            Capability::Restart => Reply::text(format!("{}: Restart initiated via {}.", device, winner)),
            Capability::Lock => {
                Reply::text(format!("{}: ✅ Screen lock initiated (via {}).", device, winner))
            }
            Capability::Screenshot => {
                let image = artifact.context("Screenshot succeeded without an image")?;
                Reply::photo(image, format!("Screenshot from {} via {}", device, winner))
            }
            Capability::Camera => {
                let image = artifact.context("Camera capture succeeded without an image")?;
                Reply::photo(image, format!("Camera image from {} via {}", device, winner))
            }
            Capability::Speech => Reply::text(format!("{} 📢: '{}' (via {})", device, text, winner)),
        };
        Ok(reply)
    }
}

/// `/shutdown_in <seconds>`
pub struct ScheduleHandler(Arc<HostContext>);

#[async_trait::async_trait]
impl Handler for ScheduleHandler {
    async fn handle(&self, command: &Command) -> Result<Reply> {
        let delay: i64 = command
            .args()
            .first()
            .context("Missing delay argument")?
            .parse()
            .context("Delay is not an integer")?;

        let device = &self.0.device;
        let reply = match self.0.scheduler.schedule(delay).await {
            Ok(receipt) => {
                let mut text = format!("{}: Scheduled shutdown in {} seconds... ⏳", device, receipt.delay);
                if receipt.replaced {
                    text.push_str("\nThe previously pending shutdown was replaced.");
                }
                text
            }
            Err(HostError::InvalidDelay(_)) => "Usage: /shutdown_in <seconds>".to_string(),
            Err(e) => {
                warn!("Scheduling failed: {}", e);
                format!("❌ Scheduled shutdown failed to start: {}", e)
            }
        };
        Ok(Reply::text(reply))
    }
}

/// `/cancel_shutdown`
pub struct CancelHandler(Arc<HostContext>);

#[async_trait::async_trait]
impl Handler for CancelHandler {
    async fn handle(&self, _command: &Command) -> Result<Reply> {
        let device = &self.0.device;
        let text = match self.0.scheduler.cancel().await {
            CancelOutcome::Cancelled { mechanisms } => {
                info!("Cancelled pending shutdown via {}", mechanisms.join(", "));
                format!("{}: ✅ Shutdown canceled.", device)
            }
            CancelOutcome::NothingPending { notes } => {
                info!("Nothing to cancel: {}", notes.join("; "));
                format!("{}: ❓ No pending shutdown found.", device)
            }
            CancelOutcome::Failed { diagnostics } => {
                format!("❌ Cancellation failed: {}", diagnostics.join("; "))
            }
        };
        Ok(Reply::text(text))
    }
}

/// `/status`
pub struct StatusHandler(Arc<HostContext>);

#[async_trait::async_trait]
impl Handler for StatusHandler {
    async fn handle(&self, _command: &Command) -> Result<Reply> {
        let status = HostStatus::gather().await;
        Ok(Reply::text(status.render(&self.0.device)))
    }
}

/// `/whoami`
pub struct WhoamiHandler(Arc<HostContext>);

#[async_trait::async_trait]
impl Handler for WhoamiHandler {
    async fn handle(&self, _command: &Command) -> Result<Reply> {
        let identity = tokio::task::spawn_blocking(Identity::current)
            .await
            .context("Identity lookup panicked")?;
        Ok(Reply::text(identity.render(&self.0.device)))
    }
}

/// `/camera`
pub struct CameraHandler(Arc<HostContext>);

#[async_trait::async_trait]
impl Handler for CameraHandler {
    fn acknowledgement(&self) -> Option<String> {
        Some(format!("{}: Accessing camera...", self.0.device))
    }

    async fn handle(&self, _command: &Command) -> Result<Reply> {
        let device = &self.0.device;
        if self.0.table.strategies(Capability::Camera).is_empty() {
            return Ok(Reply::text(format!(
                "❌ Camera capture failed on {}: not supported on this platform.",
                device
            )));
        }
        let cameras = discover_devices(&self.0.executor, self.0.table.camera()).await;
        if cameras.is_empty() {
            return Ok(Reply::text(format!("❌ No camera devices found on {}.", device)));
        }

        let strategies = self.0.table.camera_strategies(&cameras);
        let invocation = Invocation::for_capability(Capability::Camera);
        match self.0.executor.execute(&strategies, &invocation).await {
            Outcome::Succeeded { winner, artifact, .. } => {
                let image = artifact.context("Camera capture succeeded without an image")?;
                Ok(Reply::photo(image, format!("Camera image from {} via {}", device, winner)))
            }
            Outcome::Failed(report) => Ok(Reply::text(failure_text("Camera capture", device, &report))),
        }
    }
}

/// `/shutdown_bot`
pub struct ShutdownBotHandler {
    /// Device name used in the reply
    pub device: String,
    /// Stops the poll loop
    pub stop: StopHandle,
}

#[async_trait::async_trait]
impl Handler for ShutdownBotHandler {
    async fn handle(&self, _command: &Command) -> Result<Reply> {
        self.stop.request();
        Ok(Reply::text(format!("{}: 🛑 Bot is shutting down...", self.device)))
    }
}

/// Failure reply separating "nothing installed" from "installed but failed"
pub fn failure_text(title: &str, device: &str, report: &FailureReport) -> String {
    let headline = if report.nothing_installed() {
        let missing = report.missing();
        if missing.is_empty() {
            format!("❌ {} failed on {}: not supported on this platform.", title, device)
        } else {
            format!(
                "❌ {} failed on {}: no suitable tool is installed.\nInstall one of: {}",
                title,
                device,
                missing.join(", ")
            )
        }
    } else {
        format!("❌ {} failed on {}: a tool was found but failed.", title, device)
    };
    format!("{}\n\n{}", headline, report.summary())
}

#[cfg(all(test, unix))]
mod tests;
