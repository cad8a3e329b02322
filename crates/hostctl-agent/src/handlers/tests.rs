//! Handler tests against fake host tools

use std::os::unix::fs::PermissionsExt;
use std::time::Duration;

use super::*;
use hostctl::{CameraSpec, ScheduleMode, ScheduleSpec, Step, ToolProbe};
use hostctl_proto::CallerId;
use tempfile::TempDir;

struct FakeHost {
    bin: TempDir,
    scratch: TempDir,
    marks: TempDir,
}

impl FakeHost {
    fn new() -> Self {
        Self {
            bin: tempfile::tempdir().unwrap(),
            scratch: tempfile::tempdir().unwrap(),
            marks: tempfile::tempdir().unwrap(),
        }
    }

    fn install(&self, name: &str, body: &str) {
        let path = self.bin.path().join(name);
        std::fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    }

    fn mark(&self, name: &str) -> String {
        self.marks.path().join(name).to_string_lossy().into_owned()
    }

    fn context(&self, table: StrategyTable) -> Arc<HostContext> {
        let executor = Executor::new(ToolProbe::with_search_path(self.bin.path()))
            .with_scratch_root(self.scratch.path());
        Arc::new(HostContext::new("box", Arc::new(executor), Arc::new(table)))
    }

    fn scratch_is_empty(&self) -> bool {
        std::fs::read_dir(self.scratch.path()).unwrap().next().is_none()
    }
}

fn command(text: &str) -> Command {
    Command::parse(text, CallerId(42)).unwrap()
}

#[tokio::test]
async fn test_lock_reports_winner() {
    let host = FakeHost::new();
    host.install("swaylock", "exit 0");
    let handler = ActionHandler::new(host.context(StrategyTable::linux()), Capability::Lock);

    assert_eq!(
        handler.acknowledgement().as_deref(),
        Some("box: Attempting to lock screen now... 🔒")
    );
    let reply = handler.handle(&command("/lock")).await.unwrap();
    assert_eq!(reply.as_text(), "box: ✅ Screen lock initiated (via swaylock).");
}

#[tokio::test]
async fn test_lock_with_nothing_installed() {
    let host = FakeHost::new();
    let handler = ActionHandler::new(host.context(StrategyTable::linux()), Capability::Lock);

    let reply = handler.handle(&command("/lock")).await.unwrap();
    let text = reply.as_text();
    assert!(text.starts_with("❌ Screen lock failed on box: no suitable tool is installed."));
    assert!(text.contains("Install one of: hyprlock, swaylock, hyprctl dispatch, loginctl"));
    assert!(!text.contains("Found but failed"));
    assert!(text.contains("Session environment:"));
}

#[tokio::test]
async fn test_power_actions_skip_session_environment() {
    let host = FakeHost::new();
    let handler = ActionHandler::new(host.context(StrategyTable::linux()), Capability::Restart);

    let reply = handler.handle(&command("/restart")).await.unwrap();
    let text = reply.as_text();
    assert!(text.starts_with("❌ Restart failed on box: no suitable tool is installed."));
    assert!(!text.contains("Session environment:"));
}

#[tokio::test]
async fn test_lock_found_but_failed() {
    let host = FakeHost::new();
    host.install("swaylock", "echo 'no compositor' >&2; exit 1");
    let handler = ActionHandler::new(host.context(StrategyTable::linux()), Capability::Lock);

    let reply = handler.handle(&command("/lock")).await.unwrap();
    let text = reply.as_text();
    assert!(text.starts_with("❌ Screen lock failed on box: a tool was found but failed."));
    assert!(text.contains("swaylock"));
    assert!(text.contains("no compositor"));
}

#[tokio::test]
async fn test_screenshot_returns_photo() {
    let host = FakeHost::new();
    host.install("grim", "printf '\\211PNG-fake' > \"$1\"");
    let handler = ActionHandler::new(host.context(StrategyTable::linux()), Capability::Screenshot);

    let reply = handler.handle(&command("/screenshot")).await.unwrap();
    match reply {
        Reply::Photo { bytes, caption } => {
            assert!(bytes.starts_with(b"\x89PNG"));
            assert_eq!(caption, "Screenshot from box via grim");
        }
        other => panic!("expected photo, got {:?}", other),
    }
    assert!(host.scratch_is_empty());
}

#[tokio::test]
async fn test_say_speaks_joined_text() {
    let host = FakeHost::new();
    let spoken = host.mark("spoken");
    host.install("espeak-ng", &format!("for last; do :; done; printf '%s' \"$last\" > {}", spoken));
    let handler = ActionHandler::new(host.context(StrategyTable::linux()), Capability::Speech);

    assert!(handler.acknowledgement().is_none());
    let reply = handler.handle(&command("/say hello   world")).await.unwrap();
    assert_eq!(reply.as_text(), "box 📢: 'hello world' (via espeak-ng)");
    assert_eq!(std::fs::read_to_string(spoken).unwrap(), "hello world");
}

#[tokio::test]
async fn test_power_acknowledgements() {
    let host = FakeHost::new();
    let context = host.context(StrategyTable::linux());
    let shutdown = ActionHandler::new(context.clone(), Capability::Shutdown);
    let restart = ActionHandler::new(context, Capability::Restart);

    assert_eq!(
        shutdown.acknowledgement().as_deref(),
        Some("box: Attempting to shut down now... 🧨💤")
    );
    assert_eq!(
        restart.acknowledgement().as_deref(),
        Some("box: Attempting to restart now... 🔁💻")
    );
}

#[tokio::test]
async fn test_shutdown_via_first_installed_tool() {
    let host = FakeHost::new();
    let calls = host.mark("poweroff");
    host.install("systemctl", &format!("echo \"$@\" > {}", calls));
    let handler = ActionHandler::new(host.context(StrategyTable::linux()), Capability::Shutdown);

    let reply = handler.handle(&command("/shutdown")).await.unwrap();
    assert_eq!(reply.as_text(), "box: Shutdown initiated via systemctl.");
    assert_eq!(std::fs::read_to_string(calls).unwrap().trim(), "poweroff");
}

fn schedule_table(host: &FakeHost) -> StrategyTable {
    host.install("fake-poweroff", &format!("touch {}", host.mark("powered-off")));
    StrategyTable::linux().with_schedule(ScheduleSpec {
        mode: ScheduleMode::Detached {
            actions: vec![Step::new("fake-poweroff")],
        },
        signature_cancel: Vec::new(),
        native_cancel: Vec::new(),
    })
}

#[tokio::test]
async fn test_schedule_then_cancel() {
    let host = FakeHost::new();
    let context = host.context(schedule_table(&host));
    let schedule = ScheduleHandler(context.clone());
    let cancel = CancelHandler(context);

    let reply = schedule.handle(&command("/shutdown_in 2")).await.unwrap();
    assert_eq!(reply.as_text(), "box: Scheduled shutdown in 2 seconds... ⏳");

    let reply = cancel.handle(&command("/cancel_shutdown")).await.unwrap();
    assert_eq!(reply.as_text(), "box: ✅ Shutdown canceled.");

    tokio::time::sleep(Duration::from_millis(2500)).await;
    assert!(!std::path::Path::new(&host.mark("powered-off")).exists());

    let reply = cancel.handle(&command("/cancel_shutdown")).await.unwrap();
    assert_eq!(reply.as_text(), "box: ❓ No pending shutdown found.");
}

#[tokio::test]
async fn test_reschedule_mentions_replacement() {
    let host = FakeHost::new();
    let context = host.context(schedule_table(&host));
    let schedule = ScheduleHandler(context.clone());

    schedule.handle(&command("/shutdown_in 300")).await.unwrap();
    let reply = schedule.handle(&command("/shutdown_in 600")).await.unwrap();
    assert!(reply.as_text().starts_with("box: Scheduled shutdown in 600 seconds... ⏳"));
    assert!(reply.as_text().contains("replaced"));

    CancelHandler(context).handle(&command("/cancel_shutdown")).await.unwrap();
}

#[tokio::test]
async fn test_schedule_without_action_tool() {
    let host = FakeHost::new();
    let context = host.context(StrategyTable::linux());

    let reply = ScheduleHandler(context).handle(&command("/shutdown_in 60")).await.unwrap();
    assert!(reply.as_text().starts_with("❌ Scheduled shutdown failed to start:"));
    assert!(reply.as_text().contains("loginctl"));
}

#[tokio::test]
async fn test_schedule_rejects_non_positive_delay() {
    let host = FakeHost::new();
    let context = host.context(schedule_table(&host));

    let reply = ScheduleHandler(context).handle(&command("/shutdown_in 0")).await.unwrap();
    assert_eq!(reply.as_text(), "Usage: /shutdown_in <seconds>");
}

#[tokio::test]
async fn test_camera_without_devices() {
    let host = FakeHost::new();
    let handler = CameraHandler(host.context(StrategyTable::linux().with_camera(CameraSpec::default())));

    assert_eq!(handler.acknowledgement().as_deref(), Some("box: Accessing camera..."));
    let reply = handler.handle(&command("/camera")).await.unwrap();
    assert_eq!(reply.as_text(), "❌ No camera devices found on box.");
}

#[tokio::test]
async fn test_camera_without_strategies_is_unsupported() {
    let host = FakeHost::new();
    host.install("v4l2-ctl", &format!("touch {}", host.mark("listed")));
    let table = StrategyTable::linux().with_strategies(Capability::Camera, Vec::new());
    let handler = CameraHandler(host.context(table));

    let reply = handler.handle(&command("/camera")).await.unwrap();
    assert_eq!(
        reply.as_text(),
        "❌ Camera capture failed on box: not supported on this platform."
    );
    assert!(!std::path::Path::new(&host.mark("listed")).exists());
}

#[tokio::test]
async fn test_camera_captures_from_discovered_device() {
    let host = FakeHost::new();
    host.install("v4l2-ctl", "printf 'Cam (usb):\\n\\t/dev/video7\\n'");
    host.install("fswebcam", "for out; do :; done; printf 'JPEGDATA' > \"$out\"");
    let handler = CameraHandler(host.context(StrategyTable::linux()));

    let reply = handler.handle(&command("/camera")).await.unwrap();
    match reply {
        Reply::Photo { bytes, caption } => {
            assert_eq!(&bytes[..], b"JPEGDATA");
            assert_eq!(caption, "Camera image from box via fswebcam (/dev/video7)");
        }
        other => panic!("expected photo, got {:?}", other),
    }
    assert!(host.scratch_is_empty());
}

#[tokio::test]
async fn test_shutdown_bot_requests_stop() {
    let stop = StopHandle::new();
    let handler = ShutdownBotHandler {
        device: "box".to_string(),
        stop: stop.clone(),
    };

    let reply = handler.handle(&command("/shutdown_bot")).await.unwrap();
    assert_eq!(reply.as_text(), "box: 🛑 Bot is shutting down...");
    assert!(stop.is_requested());
}

#[tokio::test]
async fn test_status_and_whoami_render() {
    let host = FakeHost::new();
    let context = host.context(StrategyTable::linux());

    let status = StatusHandler(context.clone()).handle(&command("/status")).await.unwrap();
    assert!(status.as_text().contains("Status for box"));
    assert!(status.as_text().contains("Uptime:"));

    let whoami = WhoamiHandler(context).handle(&command("/whoami")).await.unwrap();
    assert!(whoami.as_text().contains("User Info on box"));
    assert!(whoami.as_text().contains("Username:"));
}

#[test]
fn test_failure_text_without_strategies() {
    let text = failure_text("Camera capture", "box", &FailureReport::default());
    assert!(text.starts_with("❌ Camera capture failed on box: not supported on this platform."));
    assert!(text.ends_with("No strategies are available on this platform."));
}
