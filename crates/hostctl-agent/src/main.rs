//! hostctl agent binary
//!
//! Polls the chat for commands from the allowed caller and runs them on this
//! host.

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use hostctl::{Executor, StrategyTable, ToolProbe};
use hostctl_agent::handlers::{self, HostContext};
use hostctl_agent::{logging, AgentConfig, AgentLoop, Authorizer, Cli, Dispatcher, InstanceGuard, StopHandle};
use hostctl_telegram::{TelegramTransport, Transport};
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = AgentConfig::load(&cli).context("Failed to load configuration")?;

    let _log_guard = logging::init(&config.state_dir)?;
    info!("Starting hostctl agent on {}", config.device_name);
    info!("Logging to {}", config.log_file().display());

    if let Err(e) = run(config).await {
        error!("Agent error: {:#}", e);
        return Err(e);
    }

    info!("Agent shutting down");
    Ok(())
}

async fn run(config: AgentConfig) -> Result<()> {
    let instance = InstanceGuard::acquire(config.pidfile())?;
    instance.install_panic_hook();

    let probe = match &config.search_path {
        Some(path) => ToolProbe::with_search_path(path),
        None => ToolProbe::new(),
    };
    let mut executor = Executor::new(probe);
    if let Some(dir) = &config.scratch_dir {
        executor = executor.with_scratch_root(dir);
    }
    let table = StrategyTable::for_host();
    info!("Using {} strategy table", table.platform());
    let context = Arc::new(HostContext::new(
        config.device_name.clone(),
        Arc::new(executor),
        Arc::new(table),
    ));

    let telegram = TelegramTransport::new(config.bot_token.clone()).context("Failed to create chat client")?;
    if let Err(e) = telegram.drop_pending().await {
        warn!("Could not skip pending updates: {}", e);
    }
    let transport: Arc<dyn Transport> = Arc::new(telegram);

    let stop = StopHandle::new();
    let mut dispatcher = Dispatcher::new(
        Authorizer::new(config.allowed_user),
        config.device_name.clone(),
        transport.clone(),
    );
    handlers::register_all(&mut dispatcher, context, stop.clone());
    info!("All handlers registered, authorized caller {}", config.allowed_user);

    spawn_signal_listener(stop.clone());

    AgentLoop::new(transport, dispatcher, stop).run().await?;

    drop(instance);
    Ok(())
}

fn spawn_signal_listener(stop: StopHandle) {
    tokio::spawn(async move {
        wait_for_signal().await;
        info!("Termination signal received");
        stop.request();
    });
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    match signal(SignalKind::terminate()) {
        Ok(mut terminate) => {
            tokio::select! {
                _ = ctrl_c() => {}
                _ = terminate.recv() => {}
            }
        }
        Err(e) => {
            warn!("Cannot listen for SIGTERM: {}", e);
            ctrl_c().await;
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    ctrl_c().await;
}

async fn ctrl_c() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Cannot listen for Ctrl-C: {}", e);
        std::future::pending::<()>().await;
    }
}
