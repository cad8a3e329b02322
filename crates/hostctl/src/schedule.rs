//! Delayed, cancelable actions
//!
//! At most one action is pending at a time. Detached actions run in their own
//! process group so that cancelling kills the sleeper and never the agent.

use std::process::Stdio;
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::executor::{AttemptStatus, Executor, Invocation, Outcome};
use crate::strategy::{Step, Strategy};
use crate::table::{ScheduleMode, ScheduleSpec, SCHEDULED_ACTION_TITLE};
use crate::{HostError, Result};

/// Shell used to host the detached sleeper
const SHELL: &str = "/bin/sh";

/// Sleeps for `$1` seconds, then replaces itself with the remaining arguments
const SLEEPER_SCRIPT: &str = r#"sleep "$1" && shift && exec "$@""#;

/// Action armed by this process
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PendingAction {
    /// Detached sleeper leading its own process group
    Detached {
        /// Process and group ID
        pid: u32,
    },
    /// OS-native timer
    Native,
}

/// Confirmation of a scheduled action
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduleReceipt {
    /// Delay in seconds
    pub delay: u64,
    /// Whether a previously pending action was cancelled first
    pub replaced: bool,
    /// Sleeper PID for detached actions
    pub pid: Option<u32>,
    /// Mechanism that armed the action
    pub via: String,
}

/// Result of a cancellation request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CancelOutcome {
    /// At least one mechanism cancelled something
    Cancelled {
        /// Mechanisms that matched
        mechanisms: Vec<String>,
    },
    /// Nothing was pending
    NothingPending {
        /// What was checked
        notes: Vec<String>,
    },
    /// A mechanism matched but could not cancel
    Failed {
        /// Failure details
        diagnostics: Vec<String>,
    },
}

/// Arms and cancels the delayed terminal action
#[derive(Debug)]
pub struct Scheduler {
    /// Runs cancellation and native strategies
    executor: Arc<Executor>,
    /// Platform recipes
    spec: ScheduleSpec,
    /// Pending-action slot
    pending: Mutex<Option<PendingAction>>,
}

impl Scheduler {
    /// Create a scheduler for `spec`
    pub fn new(executor: Arc<Executor>, spec: ScheduleSpec) -> Self {
        Self {
            executor,
            spec,
            pending: Mutex::new(None),
        }
    }

    /// Whether this process has an action armed
    pub async fn has_pending(&self) -> bool {
        self.pending.lock().await.is_some()
    }

    /// Arm the terminal action to run after `delay` seconds
    ///
    /// A pending action is cancelled and replaced.
    pub async fn schedule(&self, delay: i64) -> Result<ScheduleReceipt> {
        let seconds = u64::try_from(delay)
            .ok()
            .filter(|d| *d > 0)
            .ok_or(HostError::InvalidDelay(delay))?;

        let mut pending = self.pending.lock().await;

        let replaced = match pending.take() {
            Some(previous) => {
                info!("Replacing pending action {:?}", previous);
                match self.cancel_pending(previous).await {
                    Ok(_) => {}
                    Err(diagnostic) => warn!("Could not cancel previous action: {}", diagnostic),
                }
                true
            }
            None => false,
        };

        let (action, via, pid) = match &self.spec.mode {
            ScheduleMode::Detached { actions } => {
                let (pid, via) = self.spawn_detached(actions, seconds)?;
                (PendingAction::Detached { pid }, via, Some(pid))
            }
            ScheduleMode::Native { schedule } => {
                let via = self.arm_native(schedule, seconds).await?;
                (PendingAction::Native, via, None)
            }
        };

        *pending = Some(action);
        info!("Scheduled shutdown in {}s via {}", seconds, via);

        Ok(ScheduleReceipt {
            delay: seconds,
            replaced,
            pid,
            via,
        })
    }

    /// Cancel the pending action
    ///
    /// Cancels an action armed by this process, else one left by a previous
    /// instance, and also tries the OS-native cancellation.
    pub async fn cancel(&self) -> CancelOutcome {
        let mut mechanisms = Vec::new();
        let mut notes = Vec::new();
        let mut diagnostics = Vec::new();

        let retained = self.pending.lock().await.take();
        let native_tried = matches!(retained, Some(PendingAction::Native));
        match retained {
            Some(action) => match self.cancel_pending(action).await {
                Ok(Some(mechanism)) => mechanisms.push(mechanism),
                Ok(None) => notes.push("retained action had already finished".to_string()),
                Err(diagnostic) => diagnostics.push(diagnostic),
            },
            None => {
                for strategy in &self.spec.signature_cancel {
                    let outcome = self.run_single(strategy).await;
                    classify_signature(strategy, &outcome, &mut mechanisms, &mut notes, &mut diagnostics);
                }
            }
        }

        // `shutdown -c` exits 0 with nothing pending, so under a detached
        // schedule its success only counts when the OS timer is the schedule.
        let native_is_authoritative = matches!(self.spec.mode, ScheduleMode::Native { .. });
        if mechanisms.is_empty() && !native_tried {
            for strategy in &self.spec.native_cancel {
                let outcome = self.run_single(strategy).await;
                match &outcome {
                    Outcome::Succeeded { winner, .. } if native_is_authoritative => {
                        mechanisms.push(winner.clone())
                    }
                    Outcome::Succeeded { winner, .. } => {
                        debug!("Native cancel {} exited 0", winner);
                        notes.push(format!("{}: ran, no retained or matching action", winner));
                    }
                    Outcome::Failed(report) => {
                        for attempt in &report.attempts {
                            debug!("Native cancel {} {}: {}", attempt.strategy, attempt.status, attempt.diagnostic);
                            notes.push(format!("{}: {}", attempt.strategy, attempt.status));
                        }
                    }
                }
            }
        }

        if !mechanisms.is_empty() {
            info!("Cancelled pending shutdown via {}", mechanisms.join(", "));
            CancelOutcome::Cancelled { mechanisms }
        } else if !diagnostics.is_empty() {
            warn!("Cancellation failed: {}", diagnostics.join("; "));
            CancelOutcome::Failed { diagnostics }
        } else {
            info!("No pending shutdown found");
            CancelOutcome::NothingPending { notes }
        }
    }

    fn spawn_detached(&self, actions: &[Step], seconds: u64) -> Result<(u32, String)> {
        let (step, program) = actions
            .iter()
            .find_map(|step| self.executor.probe().locate(step.program()).map(|path| (step, path)))
            .ok_or_else(|| {
                let names: Vec<&str> = actions.iter().map(|s| s.program()).collect();
                HostError::Schedule(format!("none of {} is installed", names.join(", ")))
            })?;

        let args = step.bind_args(&Default::default())?;

        let mut command = tokio::process::Command::new(SHELL);
        command
            .arg("-c")
            .arg(SLEEPER_SCRIPT)
            .arg(SCHEDULED_ACTION_TITLE)
            .arg(seconds.to_string())
            .arg(&program)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(false);
        #[cfg(unix)]
        command.process_group(0);

        let child = command
            .spawn()
            .map_err(|e| HostError::Schedule(format!("cannot start {}: {}", SHELL, e)))?;
        let pid = child
            .id()
            .ok_or_else(|| HostError::Schedule("sleeper exited immediately".to_string()))?;

        debug!("Detached sleeper pid {} will run {}", pid, program.display());
        Ok((pid, step.program().to_string()))
    }

    async fn arm_native(&self, schedule: &Strategy, seconds: u64) -> Result<String> {
        let invocation = Invocation::new("schedule").with_delay(seconds);
        match self.executor.execute(std::slice::from_ref(schedule), &invocation).await {
            Outcome::Succeeded { winner, .. } => Ok(winner),
            Outcome::Failed(report) => Err(HostError::Schedule(report.summary())),
        }
    }

    /// `Ok(Some(mechanism))` if something was cancelled, `Ok(None)` if it was already gone
    async fn cancel_pending(&self, action: PendingAction) -> std::result::Result<Option<String>, String> {
        match action {
            PendingAction::Detached { pid } => terminate_sleeper(pid),
            PendingAction::Native => {
                let mut diagnostics = Vec::new();
                for strategy in &self.spec.native_cancel {
                    match self.run_single(strategy).await {
                        Outcome::Succeeded { winner, .. } => return Ok(Some(winner)),
                        Outcome::Failed(report) => diagnostics.push(report.summary()),
                    }
                }
                Err(diagnostics.join("; "))
            }
        }
    }

    async fn run_single(&self, strategy: &Strategy) -> Outcome {
        self.executor
            .execute(std::slice::from_ref(strategy), &Invocation::new("cancel"))
            .await
    }
}

#[cfg(unix)]
fn terminate_sleeper(pid: u32) -> std::result::Result<Option<String>, String> {
    use crate::process::{is_alive, signal_group, Signal};

    if !is_alive(pid) {
        return Ok(None);
    }
    match signal_group(pid, Signal::SIGTERM) {
        Ok(true) => Ok(Some(format!("scheduled action (pid {})", pid))),
        Ok(false) => Ok(None),
        Err(e) => Err(format!("cannot signal pid {}: {}", pid, e)),
    }
}

#[cfg(not(unix))]
fn terminate_sleeper(pid: u32) -> std::result::Result<Option<String>, String> {
    Err(format!("cannot signal pid {} on this platform", pid))
}

/// Signature matchers exit 1 when no process matched
fn classify_signature(
    strategy: &Strategy,
    outcome: &Outcome,
    mechanisms: &mut Vec<String>,
    notes: &mut Vec<String>,
    diagnostics: &mut Vec<String>,
) {
    match outcome {
        Outcome::Succeeded { .. } => mechanisms.push(strategy.name().to_string()),
        Outcome::Failed(report) => {
            for attempt in &report.attempts {
                match attempt.status {
                    AttemptStatus::Failed { exit_code: Some(1) } => {
                        notes.push(format!("{}: no matching process", attempt.strategy));
                    }
                    AttemptStatus::ToolNotFound => {
                        notes.push(format!("{}: not installed", attempt.strategy));
                    }
                    _ => diagnostics.push(format!("{}: {}", attempt.strategy, attempt.diagnostic)),
                }
            }
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::probe::ToolProbe;
    use crate::strategy::{Arg, QUICK_TIMEOUT};
    use std::os::unix::fs::PermissionsExt;
    use std::path::Path;
    use std::time::Duration;
    use tempfile::TempDir;

    fn install(dir: &Path, name: &str, body: &str) {
        let path = dir.join(name);
        std::fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    }

    fn scheduler(bin: &TempDir, marker: &Path) -> Scheduler {
        scheduler_with_native(bin, marker, Vec::new())
    }

    fn scheduler_with_native(bin: &TempDir, marker: &Path, native_cancel: Vec<Strategy>) -> Scheduler {
        install(bin.path(), "fake-poweroff", "touch \"$1\"");
        let executor = Arc::new(Executor::new(ToolProbe::with_search_path(bin.path())));
        let spec = ScheduleSpec {
            mode: ScheduleMode::Detached {
                actions: vec![
                    Step::new("missing-poweroff"),
                    Step::new("fake-poweroff").arg(marker.to_string_lossy().into_owned()),
                ],
            },
            signature_cancel: vec![Strategy::exec(Step::new("fake-pkill"), QUICK_TIMEOUT)],
            native_cancel,
        };
        Scheduler::new(executor, spec)
    }

    #[tokio::test]
    async fn test_rejects_non_positive_delay() {
        let bin = tempfile::tempdir().unwrap();
        let scheduler = scheduler(&bin, &bin.path().join("never"));

        for delay in [0, -5] {
            match scheduler.schedule(delay).await {
                Err(HostError::InvalidDelay(d)) => assert_eq!(d, delay),
                other => panic!("expected usage error, got {:?}", other),
            }
        }
        assert!(!scheduler.has_pending().await);
    }

    #[tokio::test]
    async fn test_cancelled_action_never_runs() {
        let bin = tempfile::tempdir().unwrap();
        let marker = bin.path().join("powered-off");
        let scheduler = scheduler(&bin, &marker);

        let receipt = scheduler.schedule(2).await.unwrap();
        assert_eq!(receipt.delay, 2);
        assert_eq!(receipt.via, "fake-poweroff");
        assert!(!receipt.replaced);
        let pid = receipt.pid.unwrap();

        match scheduler.cancel().await {
            CancelOutcome::Cancelled { mechanisms } => {
                assert_eq!(mechanisms, [format!("scheduled action (pid {})", pid)]);
            }
            other => panic!("expected cancellation, got {:?}", other),
        }

        tokio::time::sleep(Duration::from_secs(4)).await;
        assert!(!marker.exists());
    }

    #[tokio::test]
    async fn test_uncancelled_action_runs() {
        let bin = tempfile::tempdir().unwrap();
        let marker = bin.path().join("powered-off");
        let scheduler = scheduler(&bin, &marker);

        scheduler.schedule(1).await.unwrap();
        for _ in 0..40 {
            if marker.exists() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        assert!(marker.exists());
    }

    #[tokio::test]
    async fn test_reschedule_replaces_pending() {
        let bin = tempfile::tempdir().unwrap();
        let marker = bin.path().join("powered-off");
        let scheduler = scheduler(&bin, &marker);

        let first = scheduler.schedule(30).await.unwrap();
        let second = scheduler.schedule(30).await.unwrap();
        assert!(second.replaced);
        assert_ne!(first.pid, second.pid);
        assert!(scheduler.has_pending().await);

        assert!(matches!(scheduler.cancel().await, CancelOutcome::Cancelled { .. }));
    }

    #[tokio::test]
    async fn test_nothing_pending_when_signature_does_not_match() {
        let bin = tempfile::tempdir().unwrap();
        let scheduler = scheduler(&bin, &bin.path().join("never"));
        install(bin.path(), "fake-pkill", "exit 1");

        match scheduler.cancel().await {
            CancelOutcome::NothingPending { notes } => {
                assert_eq!(notes, ["fake-pkill: no matching process"]);
            }
            other => panic!("expected nothing pending, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_native_success_is_informational_for_detached_schedules() {
        let bin = tempfile::tempdir().unwrap();
        let native_ran = bin.path().join("native-ran");
        install(bin.path(), "fake-pkill", "exit 1");
        install(bin.path(), "fake-shutdown", "touch \"$1\"");
        let native = Step::new("fake-shutdown").arg(native_ran.to_string_lossy().into_owned());
        let scheduler = scheduler_with_native(
            &bin,
            &bin.path().join("never"),
            vec![Strategy::exec(native, QUICK_TIMEOUT)],
        );

        match scheduler.cancel().await {
            CancelOutcome::NothingPending { notes } => {
                assert_eq!(notes.len(), 2);
                assert!(notes[1].starts_with("fake-shutdown: ran"));
            }
            other => panic!("expected nothing pending, got {:?}", other),
        }
        assert!(native_ran.exists());
    }

    #[tokio::test]
    async fn test_native_cancel_skipped_after_signature_match() {
        let bin = tempfile::tempdir().unwrap();
        let native_ran = bin.path().join("native-ran");
        install(bin.path(), "fake-pkill", "exit 0");
        install(bin.path(), "fake-shutdown", "touch \"$1\"");
        let native = Step::new("fake-shutdown").arg(native_ran.to_string_lossy().into_owned());
        let scheduler = scheduler_with_native(
            &bin,
            &bin.path().join("never"),
            vec![Strategy::exec(native, QUICK_TIMEOUT)],
        );

        assert!(matches!(scheduler.cancel().await, CancelOutcome::Cancelled { .. }));
        assert!(!native_ran.exists());
    }

    #[tokio::test]
    async fn test_native_schedule_cancel_is_authoritative() {
        let bin = tempfile::tempdir().unwrap();
        install(bin.path(), "fake-shutdown", "exit 0");
        let executor = Arc::new(Executor::new(ToolProbe::with_search_path(bin.path())));
        let spec = ScheduleSpec {
            mode: ScheduleMode::Native {
                schedule: Strategy::exec(Step::new("fake-shutdown").arg(Arg::Delay), QUICK_TIMEOUT),
            },
            signature_cancel: Vec::new(),
            native_cancel: vec![Strategy::exec(Step::new("fake-shutdown"), QUICK_TIMEOUT)],
        };
        let scheduler = Scheduler::new(executor, spec);

        assert_eq!(
            scheduler.cancel().await,
            CancelOutcome::Cancelled {
                mechanisms: vec!["fake-shutdown".to_string()]
            }
        );
    }

    #[tokio::test]
    async fn test_signature_match_counts_as_cancelled() {
        let bin = tempfile::tempdir().unwrap();
        let scheduler = scheduler(&bin, &bin.path().join("never"));
        install(bin.path(), "fake-pkill", "exit 0");

        assert_eq!(
            scheduler.cancel().await,
            CancelOutcome::Cancelled {
                mechanisms: vec!["fake-pkill".to_string()]
            }
        );
    }

    #[tokio::test]
    async fn test_signature_error_is_a_failure() {
        let bin = tempfile::tempdir().unwrap();
        let scheduler = scheduler(&bin, &bin.path().join("never"));
        install(bin.path(), "fake-pkill", "echo 'bad pattern' >&2; exit 2");

        match scheduler.cancel().await {
            CancelOutcome::Failed { diagnostics } => assert!(diagnostics[0].contains("bad pattern")),
            other => panic!("expected failure, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_no_installed_action_is_a_schedule_error() {
        let bin = tempfile::tempdir().unwrap();
        let executor = Arc::new(Executor::new(ToolProbe::with_search_path(bin.path())));
        let spec = ScheduleSpec {
            mode: ScheduleMode::Detached {
                actions: vec![Step::new("loginctl-missing")],
            },
            signature_cancel: Vec::new(),
            native_cancel: Vec::new(),
        };
        let scheduler = Scheduler::new(executor, spec);

        assert!(matches!(scheduler.schedule(10).await, Err(HostError::Schedule(_))));
        assert!(!scheduler.has_pending().await);
    }
}
