//! Ordered fallback execution of strategies
//!
//! The executor walks a strategy list in order. Strategies whose tools are not
//! installed are skipped without spending any time budget; the rest are run
//! under their timeout and classified. The first success ends the walk.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use bytes::Bytes;
use tempfile::TempDir;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tokio::time::{timeout, timeout_at, Instant};
use tracing::{debug, info, warn};

use crate::env::{EnvDecision, SessionEnvironment};
use crate::probe::ToolProbe;
use crate::strategy::{Bindings, Recipe, Step, Strategy};
use crate::table::Capability;

/// Longest stderr excerpt kept in a diagnostic
const DIAGNOSTIC_LIMIT: usize = 300;

/// How long to wait for output pipes to drain after a tool exits
const OUTPUT_GRACE: Duration = Duration::from_millis(500);

/// Result class of one attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptStatus {
    /// Tool ran and satisfied the success criteria
    Succeeded,
    /// A required tool is not on the search path
    ToolNotFound,
    /// Tool ran but failed
    Failed {
        /// Exit code, if the tool exited normally
        exit_code: Option<i32>,
    },
    /// Tool exceeded its timeout and was killed
    TimedOut,
    /// The attempt could not be carried out
    UnexpectedError,
}

impl fmt::Display for AttemptStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Succeeded => f.write_str("succeeded"),
            Self::ToolNotFound => f.write_str("tool not found"),
            Self::Failed { exit_code: Some(code) } => write!(f, "failed (exit {})", code),
            Self::Failed { exit_code: None } => f.write_str("failed"),
            Self::TimedOut => f.write_str("timed out"),
            Self::UnexpectedError => f.write_str("unexpected error"),
        }
    }
}

/// Record of one strategy attempt
#[derive(Debug, Clone)]
pub struct Attempt {
    /// Strategy name
    pub strategy: String,
    /// Result class
    pub status: AttemptStatus,
    /// Human-readable detail (stderr excerpt, missing tools, timeout)
    pub diagnostic: String,
    /// Captured standard output
    pub stdout: String,
    /// Wall time spent
    pub duration: Duration,
}

/// Aggregate of a fully exhausted strategy list
#[derive(Debug, Clone, Default)]
pub struct FailureReport {
    /// Every attempt, in order
    pub attempts: Vec<Attempt>,
    /// Session environment decisions in effect
    pub environment: Vec<EnvDecision>,
}

impl FailureReport {
    /// Strategies skipped because a tool is missing
    pub fn missing(&self) -> Vec<&str> {
        self.attempts
            .iter()
            .filter(|a| a.status == AttemptStatus::ToolNotFound)
            .map(|a| a.strategy.as_str())
            .collect()
    }

    /// Strategies that were found but did not succeed
    pub fn failed(&self) -> Vec<&Attempt> {
        self.attempts
            .iter()
            .filter(|a| a.status != AttemptStatus::ToolNotFound)
            .collect()
    }

    /// Whether no strategy's tools were installed at all
    pub fn nothing_installed(&self) -> bool {
        self.attempts.iter().all(|a| a.status == AttemptStatus::ToolNotFound)
    }

    /// Multi-line summary partitioned into missing and failed strategies
    pub fn summary(&self) -> String {
        if self.attempts.is_empty() {
            return "No strategies are available on this platform.".to_string();
        }

        let mut lines = Vec::new();
        let missing = self.missing();
        if !missing.is_empty() {
            lines.push(format!("Not installed: {}", missing.join(", ")));
        }

        let failed = self.failed();
        if !failed.is_empty() {
            lines.push("Found but failed:".to_string());
            for attempt in failed {
                lines.push(format!("  - {}: {}", attempt.strategy, attempt.diagnostic));
            }
        }

        if !self.environment.is_empty() {
            lines.push("Session environment:".to_string());
            for decision in &self.environment {
                lines.push(format!("  - {}", decision));
            }
        }

        lines.join("\n")
    }
}

/// Final result of an execution
#[derive(Debug, Clone)]
pub enum Outcome {
    /// A strategy succeeded
    Succeeded {
        /// Name of the successful strategy
        winner: String,
        /// Artifact bytes for artifact-producing strategies
        artifact: Option<Bytes>,
        /// Every attempt up to and including the winner
        attempts: Vec<Attempt>,
    },
    /// Every strategy failed or was skipped
    Failed(FailureReport),
}

impl Outcome {
    /// Whether a strategy succeeded
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Succeeded { .. })
    }

    /// Name of the successful strategy
    pub fn winner(&self) -> Option<&str> {
        match self {
            Self::Succeeded { winner, .. } => Some(winner),
            Self::Failed(_) => None,
        }
    }

    /// Standard output of the successful strategy
    pub fn output(&self) -> Option<&str> {
        match self {
            Self::Succeeded { attempts, .. } => attempts.last().map(|a| a.stdout.as_str()),
            Self::Failed(_) => None,
        }
    }

    /// Every attempt made
    pub fn attempts(&self) -> &[Attempt] {
        match self {
            Self::Succeeded { attempts, .. } => attempts,
            Self::Failed(report) => &report.attempts,
        }
    }
}

/// Per-invocation inputs
#[derive(Debug, Clone)]
pub struct Invocation {
    /// Label for logs
    label: String,
    /// Environment overlay
    env: SessionEnvironment,
    /// Speech text
    payload: Option<String>,
    /// Delay in seconds
    delay: Option<u64>,
    /// File name for artifacts, suffix included
    artifact_name: String,
}

impl Invocation {
    /// Headless invocation without payload
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            env: SessionEnvironment::empty(),
            payload: None,
            delay: None,
            artifact_name: "artifact".to_string(),
        }
    }

    /// Invocation labelled and named after `capability`
    pub fn for_capability(capability: Capability) -> Self {
        let mut invocation = Self::new(capability.label());
        if let Some(name) = capability.artifact_name() {
            invocation.artifact_name = name.to_string();
        }
        invocation
    }

    /// Overlay a session environment
    pub fn with_environment(mut self, env: SessionEnvironment) -> Self {
        self.env = env;
        self
    }

    /// Set the payload
    pub fn with_payload(mut self, payload: impl Into<String>) -> Self {
        self.payload = Some(payload.into());
        self
    }

    /// Set the delay
    pub fn with_delay(mut self, seconds: u64) -> Self {
        self.delay = Some(seconds);
        self
    }

    /// Set the artifact file name
    pub fn with_artifact_name(mut self, name: impl Into<String>) -> Self {
        self.artifact_name = name.into();
        self
    }

    /// Label
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Environment overlay
    pub fn environment(&self) -> &SessionEnvironment {
        &self.env
    }
}

/// Result of running one step or recipe
struct Run {
    status: AttemptStatus,
    diagnostic: String,
    stdout: String,
    artifact: Option<Bytes>,
}

impl Run {
    fn new(status: AttemptStatus, diagnostic: impl Into<String>) -> Self {
        Self {
            status,
            diagnostic: diagnostic.into(),
            stdout: String::new(),
            artifact: None,
        }
    }

    fn unexpected(diagnostic: impl Into<String>) -> Self {
        Self::new(AttemptStatus::UnexpectedError, diagnostic)
    }

    fn succeeded(&self) -> bool {
        self.status == AttemptStatus::Succeeded
    }
}

/// Runs strategy lists with fallback
#[derive(Debug, Clone)]
pub struct Executor {
    /// Tool resolution
    probe: ToolProbe,
    /// Parent directory of per-invocation scratch directories
    scratch_root: PathBuf,
}

impl Executor {
    /// Executor using the system temp directory for scratch space
    pub fn new(probe: ToolProbe) -> Self {
        Self {
            probe,
            scratch_root: std::env::temp_dir(),
        }
    }

    /// Use `root` for scratch directories
    pub fn with_scratch_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.scratch_root = root.into();
        self
    }

    /// Tool probe
    pub fn probe(&self) -> &ToolProbe {
        &self.probe
    }

    /// Scratch root
    pub fn scratch_root(&self) -> &Path {
        &self.scratch_root
    }

    /// Try `strategies` in order until one succeeds
    pub async fn execute(&self, strategies: &[Strategy], invocation: &Invocation) -> Outcome {
        let mut attempts = Vec::with_capacity(strategies.len());
        let mut scratch: Option<TempDir> = None;

        for (index, strategy) in strategies.iter().enumerate() {
            let started = Instant::now();

            let mut resolved = HashMap::new();
            let mut missing = Vec::new();
            for tool in strategy.tools() {
                match self.probe.locate(tool) {
                    Some(path) => {
                        resolved.insert(tool.to_string(), path);
                    }
                    None => missing.push(tool),
                }
            }

            if !missing.is_empty() {
                debug!("Skipping {} strategy {}: {} not installed", invocation.label, strategy.name(), missing.join(", "));
                attempts.push(Attempt {
                    strategy: strategy.name().to_string(),
                    status: AttemptStatus::ToolNotFound,
                    diagnostic: format!("not found on search path: {}", missing.join(", ")),
                    stdout: String::new(),
                    duration: started.elapsed(),
                });
                continue;
            }

            if strategy.needs_scratch() && scratch.is_none() {
                match self.create_scratch() {
                    Ok(dir) => scratch = Some(dir),
                    Err(e) => {
                        warn!("Cannot create scratch directory in {}: {}", self.scratch_root.display(), e);
                        attempts.push(Attempt {
                            strategy: strategy.name().to_string(),
                            status: AttemptStatus::UnexpectedError,
                            diagnostic: format!("cannot create scratch directory: {}", e),
                            stdout: String::new(),
                            duration: started.elapsed(),
                        });
                        continue;
                    }
                }
            }

            info!(
                "Trying {} strategy {} ({}/{})",
                invocation.label,
                strategy.name(),
                index + 1,
                strategies.len()
            );

            let scratch_dir = scratch.as_ref().map(TempDir::path);
            let run = self.run_strategy(index, strategy, invocation, &resolved, scratch_dir).await;
            let attempt = Attempt {
                strategy: strategy.name().to_string(),
                status: run.status,
                diagnostic: run.diagnostic,
                stdout: run.stdout,
                duration: started.elapsed(),
            };

            if attempt.status == AttemptStatus::Succeeded {
                info!("{} succeeded via {} in {:?}", invocation.label, attempt.strategy, attempt.duration);
                let winner = attempt.strategy.clone();
                attempts.push(attempt);
                close_scratch(scratch);
                return Outcome::Succeeded {
                    winner,
                    artifact: run.artifact,
                    attempts,
                };
            }

            warn!(
                "{} strategy {} {}: {}",
                invocation.label, attempt.strategy, attempt.status, attempt.diagnostic
            );
            attempts.push(attempt);
        }

        close_scratch(scratch);
        warn!("All {} strategies for {} failed", strategies.len(), invocation.label);
        Outcome::Failed(FailureReport {
            attempts,
            environment: invocation.env.trail().to_vec(),
        })
    }

    fn create_scratch(&self) -> std::io::Result<TempDir> {
        tempfile::Builder::new()
            .prefix("hostctl-")
            .tempdir_in(&self.scratch_root)
    }

    async fn run_strategy(
        &self,
        index: usize,
        strategy: &Strategy,
        invocation: &Invocation,
        resolved: &HashMap<String, PathBuf>,
        scratch: Option<&Path>,
    ) -> Run {
        let mut bindings = Bindings {
            payload: invocation.payload.clone(),
            delay: invocation.delay,
            ..Default::default()
        };

        let artifact_name = format!("{}-{}", index, invocation.artifact_name);
        let artifact_path = scratch.map(|dir| dir.join(&artifact_name));
        if let (Some(dir), Some(path)) = (scratch, &artifact_path) {
            bindings.artifact = Some(path.to_string_lossy().into_owned());
            bindings.artifact_dir = Some(dir.to_string_lossy().into_owned());
            bindings.artifact_name = Some(artifact_name.clone());
        }

        let deadline = Instant::now() + strategy.timeout();
        let overlay = invocation.env.overlay();

        let mut run = match strategy.recipe() {
            Recipe::Exec(step) => {
                let program = program_path(step, resolved);
                run_step(step, &program, &bindings, overlay, None, deadline, strategy.timeout()).await
            }
            Recipe::Stdin(step) => match &invocation.payload {
                Some(payload) => {
                    let program = program_path(step, resolved);
                    run_step(step, &program, &bindings, overlay, Some(payload.clone()), deadline, strategy.timeout())
                        .await
                }
                None => Run::unexpected("no payload to write to stdin"),
            },
            Recipe::Pipeline {
                producer,
                consumer,
                intermediate,
            } => {
                let intermediate_path = scratch.map(|dir| dir.join(format!("{}-{}", index, intermediate)));
                bindings.intermediate = intermediate_path
                    .as_ref()
                    .map(|p| p.to_string_lossy().into_owned());

                let first = run_step(
                    producer,
                    &program_path(producer, resolved),
                    &bindings,
                    overlay,
                    None,
                    deadline,
                    strategy.timeout(),
                )
                .await;

                let run = if first.succeeded() {
                    let mut second = run_step(
                        consumer,
                        &program_path(consumer, resolved),
                        &bindings,
                        overlay,
                        None,
                        deadline,
                        strategy.timeout(),
                    )
                    .await;
                    if !second.succeeded() {
                        second.diagnostic = format!("{}: {}", consumer.program(), second.diagnostic);
                    }
                    second
                } else {
                    let mut first = first;
                    first.diagnostic = format!("{}: {}", producer.program(), first.diagnostic);
                    first
                };

                if let Some(path) = &intermediate_path {
                    remove_quietly(path).await;
                }
                run
            }
            Recipe::Resident { step, settle } => {
                let program = program_path(step, resolved);
                run_resident(step, &program, &bindings, overlay, *settle).await
            }
        };

        if strategy.produces_artifact() {
            if let Some(path) = &artifact_path {
                if run.succeeded() {
                    match tokio::fs::read(path).await {
                        Ok(bytes) if !bytes.is_empty() => run.artifact = Some(Bytes::from(bytes)),
                        _ => {
                            run.status = AttemptStatus::Failed { exit_code: Some(0) };
                            run.diagnostic = "exited 0 but produced no output file".to_string();
                        }
                    }
                }
                remove_quietly(path).await;
            }
        }

        run
    }
}

fn program_path(step: &Step, resolved: &HashMap<String, PathBuf>) -> PathBuf {
    resolved
        .get(step.program())
        .cloned()
        .unwrap_or_else(|| PathBuf::from(step.program()))
}

fn close_scratch(scratch: Option<TempDir>) {
    if let Some(dir) = scratch {
        let path = dir.path().to_path_buf();
        if let Err(e) = dir.close() {
            warn!("Failed to remove scratch directory {}: {}", path.display(), e);
        }
    }
}

async fn remove_quietly(path: &Path) {
    if let Err(e) = tokio::fs::remove_file(path).await {
        if e.kind() != std::io::ErrorKind::NotFound {
            debug!("Failed to remove {}: {}", path.display(), e);
        }
    }
}

fn build_command(
    step: &Step,
    program: &Path,
    bindings: &Bindings,
    overlay: &BTreeMap<String, String>,
) -> crate::Result<Command> {
    let args = step.bind_args(bindings)?;
    let env = step.bind_env(bindings)?;

    let mut command = Command::new(program);
    command.args(&args).envs(overlay).envs(env);
    #[cfg(unix)]
    command.process_group(0);

    debug!("Spawning {} {:?}", program.display(), args);
    Ok(command)
}

async fn run_step(
    step: &Step,
    program: &Path,
    bindings: &Bindings,
    overlay: &BTreeMap<String, String>,
    stdin: Option<String>,
    deadline: Instant,
    budget: Duration,
) -> Run {
    let mut command = match build_command(step, program, bindings, overlay) {
        Ok(command) => command,
        Err(e) => return Run::unexpected(e.to_string()),
    };
    command
        .stdin(if stdin.is_some() { Stdio::piped() } else { Stdio::null() })
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let mut child = match command.spawn() {
        Ok(child) => child,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Run::new(AttemptStatus::ToolNotFound, format!("{} vanished before spawn", step.program()));
        }
        Err(e) => return Run::unexpected(format!("spawn failed: {}", e)),
    };
    let pid = child.id();

    if let (Some(input), Some(mut pipe)) = (stdin, child.stdin.take()) {
        tokio::spawn(async move {
            if let Err(e) = pipe.write_all(input.as_bytes()).await {
                debug!("Writing stdin failed: {}", e);
            }
        });
    }

    let stdout = child.stdout.take().map(|pipe| tokio::spawn(read_all(pipe)));
    let stderr = child.stderr.take().map(|pipe| tokio::spawn(read_all(pipe)));

    match timeout_at(deadline, child.wait()).await {
        Ok(Ok(status)) => {
            let stdout = collect(stdout).await;
            let stderr = collect(stderr).await;
            let mut run = if status.success() {
                Run::new(AttemptStatus::Succeeded, String::new())
            } else {
                Run::new(
                    AttemptStatus::Failed { exit_code: status.code() },
                    describe_exit(status, &stderr),
                )
            };
            run.stdout = stdout;
            run
        }
        Ok(Err(e)) => Run::unexpected(format!("waiting for {} failed: {}", step.program(), e)),
        Err(_) => {
            terminate(&mut child, pid).await;
            for task in [stdout, stderr].into_iter().flatten() {
                task.abort();
            }
            Run::new(AttemptStatus::TimedOut, format!("timed out after {}s", budget.as_secs_f32()))
        }
    }
}

async fn run_resident(
    step: &Step,
    program: &Path,
    bindings: &Bindings,
    overlay: &BTreeMap<String, String>,
    settle: Duration,
) -> Run {
    let mut command = match build_command(step, program, bindings, overlay) {
        Ok(command) => command,
        Err(e) => return Run::unexpected(e.to_string()),
    };
    // Output pipes would break the tool once we stop reading them
    command
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .kill_on_drop(false);

    let mut child = match command.spawn() {
        Ok(child) => child,
        Err(e) => return Run::unexpected(format!("spawn failed: {}", e)),
    };
    let pid = child.id().unwrap_or_default();

    match timeout(settle, child.wait()).await {
        Ok(Ok(status)) if status.success() => Run::new(AttemptStatus::Succeeded, "exited cleanly"),
        Ok(Ok(status)) => Run::new(
            AttemptStatus::Failed { exit_code: status.code() },
            format!("{} during settle window", status),
        ),
        Ok(Err(e)) => Run::unexpected(format!("waiting for {} failed: {}", step.program(), e)),
        Err(_) => {
            debug!("{} still running as pid {}", step.program(), pid);
            Run::new(
                AttemptStatus::Succeeded,
                format!("still running after {}s (pid {})", settle.as_secs_f32(), pid),
            )
        }
    }
}

/// Kill the whole process group, then the child itself, and reap it
async fn terminate(child: &mut Child, pid: Option<u32>) {
    #[cfg(unix)]
    if let Some(pid) = pid {
        if let Err(e) = crate::process::signal_group(pid, crate::process::Signal::SIGKILL) {
            warn!("Failed to kill process group {}: {}", pid, e);
        }
    }
    #[cfg(not(unix))]
    let _ = pid;

    if let Err(e) = child.kill().await {
        debug!("Killing timed-out child failed: {}", e);
    }
}

async fn read_all<R: AsyncRead + Unpin>(mut reader: R) -> Vec<u8> {
    let mut buf = Vec::new();
    if let Err(e) = reader.read_to_end(&mut buf).await {
        debug!("Reading tool output failed: {}", e);
    }
    buf
}

async fn collect(task: Option<JoinHandle<Vec<u8>>>) -> String {
    let Some(task) = task else {
        return String::new();
    };
    let abort = task.abort_handle();
    match timeout(OUTPUT_GRACE, task).await {
        Ok(Ok(bytes)) => String::from_utf8_lossy(&bytes).trim().to_string(),
        _ => {
            abort.abort();
            String::new()
        }
    }
}

fn describe_exit(status: ExitStatus, stderr: &str) -> String {
    if stderr.is_empty() {
        format!("{} with no error output", status)
    } else {
        format!("{}: {}", status, truncate(stderr, DIAGNOSTIC_LIMIT))
    }
}

fn truncate(text: &str, limit: usize) -> String {
    match text.char_indices().nth(limit) {
        Some((cut, _)) => format!("{}...", &text[..cut]),
        None => text.to_string(),
    }
}
