//! Built-in per-platform strategy tables

use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;

use crate::strategy::{Arg, Step, Strategy, CAPTURE_TIMEOUT, QUICK_TIMEOUT};

/// Title of the detached scheduled-action process, used for signature cancellation
pub const SCHEDULED_ACTION_TITLE: &str = "hostctl-scheduled-action";

/// Environment variable carrying the artifact path to script-based strategies
pub const ARTIFACT_ENV: &str = "HOSTCTL_ARTIFACT";

/// Named class of host action
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Capability {
    /// Power off
    Shutdown,
    /// Reboot
    Restart,
    /// Lock the session
    Lock,
    /// Capture the screen
    Screenshot,
    /// Text to speech
    Speech,
    /// Capture a camera frame
    Camera,
}

impl Capability {
    /// Lowercase label for logs
    pub fn label(self) -> &'static str {
        match self {
            Self::Shutdown => "shutdown",
            Self::Restart => "restart",
            Self::Lock => "lock",
            Self::Screenshot => "screenshot",
            Self::Speech => "speech",
            Self::Camera => "camera",
        }
    }

    /// Artifact file name for capabilities that produce one
    pub fn artifact_name(self) -> Option<&'static str> {
        match self {
            Self::Screenshot => Some("screenshot.png"),
            Self::Camera => Some("camera.jpg"),
            _ => None,
        }
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// How a delayed shutdown is armed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScheduleMode {
    /// Detached sleeper that performs the first available action
    Detached {
        /// Candidate terminal actions, in preference order
        actions: Vec<Step>,
    },
    /// OS-native delayed shutdown taking a `{delay}` argument
    Native {
        /// Strategy that arms the timer
        schedule: Strategy,
    },
}

/// Scheduling and cancellation recipes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduleSpec {
    /// Arming mode
    pub mode: ScheduleMode,
    /// Cancels sleepers left by a previous agent instance; exit 1 means no match
    pub signature_cancel: Vec<Strategy>,
    /// OS-native cancellation, tried when nothing above matched; success counts only for native schedules
    pub native_cancel: Vec<Strategy>,
}

/// Output format of the camera discovery strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DeviceListing {
    /// `v4l2-ctl --list-devices` groups
    #[default]
    V4l2,
    /// One device name per line
    NamePerLine,
}

/// Camera device discovery settings
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CameraSpec {
    /// Lists devices on stdout
    pub discovery: Option<Strategy>,
    /// How to read the discovery output
    pub listing: DeviceListing,
    /// Device nodes checked when discovery finds nothing
    pub probe_paths: Vec<PathBuf>,
}

/// Capability to ordered strategies, plus scheduling and camera settings
#[derive(Debug, Clone)]
pub struct StrategyTable {
    /// Platform name for logs
    platform: &'static str,
    /// Ordered strategies per capability
    strategies: HashMap<Capability, Vec<Strategy>>,
    /// Delayed shutdown recipes
    schedule: ScheduleSpec,
    /// Camera discovery
    camera: CameraSpec,
}

impl StrategyTable {
    /// Table for the platform this binary was built for
    pub fn for_host() -> Self {
        if cfg!(windows) {
            Self::windows()
        } else {
            Self::linux()
        }
    }

    /// Linux desktop table (Wayland tools first, then X11 and systemd)
    pub fn linux() -> Self {
        let mut strategies = HashMap::new();

        strategies.insert(Capability::Shutdown, power_strategies("poweroff", "PowerOff"));
        strategies.insert(Capability::Restart, power_strategies("reboot", "Reboot"));

        strategies.insert(
            Capability::Lock,
            vec![
                Strategy::resident(Step::new("hyprlock"), QUICK_TIMEOUT),
                Strategy::exec(Step::new("swaylock").arg("-f"), QUICK_TIMEOUT),
                Strategy::exec(
                    Step::new("hyprctl").args(["dispatch", "exec", "hyprlock"]),
                    QUICK_TIMEOUT,
                )
                .named("hyprctl dispatch"),
                Strategy::exec(Step::new("loginctl").arg("lock-session"), QUICK_TIMEOUT),
            ],
        );

        strategies.insert(
            Capability::Screenshot,
            vec![
                Strategy::exec(
                    Step::new("grimblast").args(["save", "screen"]).arg(Arg::Artifact),
                    CAPTURE_TIMEOUT,
                )
                .producing_artifact(),
                Strategy::exec(
                    Step::new("hyprshot")
                        .args(["-m", "output", "-o"])
                        .arg(Arg::ArtifactDir)
                        .arg("-f")
                        .arg(Arg::ArtifactName),
                    CAPTURE_TIMEOUT,
                )
                .producing_artifact(),
                Strategy::exec(Step::new("grim").arg(Arg::Artifact), CAPTURE_TIMEOUT)
                    .producing_artifact(),
                Strategy::exec(Step::new("scrot").arg("-o").arg(Arg::Artifact), CAPTURE_TIMEOUT)
                    .producing_artifact(),
            ],
        );

        strategies.insert(
            Capability::Speech,
            vec![
                Strategy::exec(
                    Step::new("espeak-ng").args(["-a", "150", "-s", "160"]).arg(Arg::Payload),
                    CAPTURE_TIMEOUT,
                ),
                Strategy::pipeline(
                    Step::new("pico2wave").arg("--wave").arg(Arg::Intermediate).arg(Arg::Payload),
                    Step::new("aplay").arg("-q").arg(Arg::Intermediate),
                    "speech.wav",
                    CAPTURE_TIMEOUT,
                ),
                Strategy::exec(
                    Step::new("espeak").args(["-a", "150", "-s", "160"]).arg(Arg::Payload),
                    CAPTURE_TIMEOUT,
                ),
                Strategy::stdin(Step::new("festival").arg("--tts"), CAPTURE_TIMEOUT),
            ],
        );

        strategies.insert(
            Capability::Camera,
            vec![
                Strategy::exec(
                    Step::new("ffmpeg")
                        .args(["-y", "-loglevel", "error", "-f", "v4l2", "-i"])
                        .arg(Arg::Device)
                        .args(["-frames:v", "1"])
                        .arg(Arg::Artifact),
                    CAPTURE_TIMEOUT,
                )
                .producing_artifact(),
                Strategy::exec(
                    Step::new("fswebcam")
                        .args(["-q", "--no-banner", "-d"])
                        .arg(Arg::Device)
                        .arg(Arg::Artifact),
                    CAPTURE_TIMEOUT,
                )
                .producing_artifact(),
            ],
        );

        let schedule = ScheduleSpec {
            mode: ScheduleMode::Detached {
                actions: vec![
                    Step::new("loginctl").arg("poweroff"),
                    Step::new("systemctl").arg("poweroff"),
                ],
            },
            signature_cancel: vec![Strategy::exec(
                Step::new("pkill").args(["-f", SCHEDULED_ACTION_TITLE]),
                QUICK_TIMEOUT,
            )],
            native_cancel: vec![Strategy::exec(Step::new("shutdown").arg("-c"), QUICK_TIMEOUT)],
        };

        let camera = CameraSpec {
            discovery: Some(Strategy::exec(
                Step::new("v4l2-ctl").arg("--list-devices"),
                QUICK_TIMEOUT,
            )),
            listing: DeviceListing::V4l2,
            probe_paths: (0..10).map(|i| PathBuf::from(format!("/dev/video{}", i))).collect(),
        };

        Self {
            platform: "linux",
            strategies,
            schedule,
            camera,
        }
    }

    /// Windows table (built-in OS tools and PowerShell)
    pub fn windows() -> Self {
        let mut strategies = HashMap::new();

        strategies.insert(
            Capability::Shutdown,
            vec![Strategy::exec(Step::new("shutdown").args(["/s", "/t", "1"]), QUICK_TIMEOUT)],
        );
        strategies.insert(
            Capability::Restart,
            vec![Strategy::exec(Step::new("shutdown").args(["/r", "/t", "1"]), QUICK_TIMEOUT)],
        );
        strategies.insert(
            Capability::Lock,
            vec![Strategy::exec(
                Step::new("rundll32").arg("user32.dll,LockWorkStation"),
                QUICK_TIMEOUT,
            )],
        );
        strategies.insert(
            Capability::Screenshot,
            vec![Strategy::exec(
                powershell(concat!(
                    "Add-Type -AssemblyName System.Windows.Forms,System.Drawing; ",
                    "$b = [System.Windows.Forms.SystemInformation]::VirtualScreen; ",
                    "$bmp = New-Object System.Drawing.Bitmap $b.Width, $b.Height; ",
                    "$g = [System.Drawing.Graphics]::FromImage($bmp); ",
                    "$g.CopyFromScreen($b.Left, $b.Top, 0, 0, $bmp.Size); ",
                    "$bmp.Save($env:HOSTCTL_ARTIFACT, [System.Drawing.Imaging.ImageFormat]::Png)",
                ))
                .env(ARTIFACT_ENV, Arg::Artifact),
                CAPTURE_TIMEOUT,
            )
            .named("powershell screen capture")
            .producing_artifact()],
        );
        strategies.insert(
            Capability::Speech,
            vec![Strategy::stdin(
                powershell(concat!(
                    "Add-Type -AssemblyName System.Speech; ",
                    "(New-Object System.Speech.Synthesis.SpeechSynthesizer)",
                    ".Speak([Console]::In.ReadToEnd())",
                )),
                CAPTURE_TIMEOUT,
            )
            .named("powershell speech")],
        );
        strategies.insert(
            Capability::Camera,
            vec![Strategy::exec(
                Step::new("ffmpeg")
                    .args(["-y", "-loglevel", "error", "-f", "dshow", "-i"])
                    .arg(Arg::PrefixedDevice("video=".into()))
                    .args(["-frames:v", "1"])
                    .arg(Arg::Artifact),
                CAPTURE_TIMEOUT,
            )
            .producing_artifact()],
        );

        let schedule = ScheduleSpec {
            mode: ScheduleMode::Native {
                schedule: Strategy::exec(
                    Step::new("shutdown").args(["/s", "/t"]).arg(Arg::Delay),
                    QUICK_TIMEOUT,
                ),
            },
            signature_cancel: Vec::new(),
            native_cancel: vec![Strategy::exec(Step::new("shutdown").arg("/a"), QUICK_TIMEOUT)],
        };

        Self {
            platform: "windows",
            strategies,
            schedule,
            camera: CameraSpec {
                discovery: Some(Strategy::exec(
                    powershell(concat!(
                        "Get-CimInstance Win32_PnPEntity | ",
                        "Where-Object { $_.PNPClass -in 'Camera','Image' -and $_.Status -eq 'OK' } | ",
                        "ForEach-Object { $_.Name }",
                    )),
                    QUICK_TIMEOUT,
                )
                .named("powershell camera listing")),
                listing: DeviceListing::NamePerLine,
                probe_paths: Vec::new(),
            },
        }
    }

    /// Replace the strategies of one capability
    pub fn with_strategies(mut self, capability: Capability, strategies: Vec<Strategy>) -> Self {
        self.strategies.insert(capability, strategies);
        self
    }

    /// Replace the scheduling recipes
    pub fn with_schedule(mut self, schedule: ScheduleSpec) -> Self {
        self.schedule = schedule;
        self
    }

    /// Replace the camera discovery settings
    pub fn with_camera(mut self, camera: CameraSpec) -> Self {
        self.camera = camera;
        self
    }

    /// Platform name
    pub fn platform(&self) -> &'static str {
        self.platform
    }

    /// Ordered strategies for `capability`
    pub fn strategies(&self, capability: Capability) -> &[Strategy] {
        self.strategies
            .get(&capability)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Scheduling recipes
    pub fn schedule(&self) -> &ScheduleSpec {
        &self.schedule
    }

    /// Camera discovery settings
    pub fn camera(&self) -> &CameraSpec {
        &self.camera
    }

    /// Camera templates bound to each device, device by device
    pub fn camera_strategies(&self, devices: &[String]) -> Vec<Strategy> {
        let templates = self.strategies(Capability::Camera);
        devices
            .iter()
            .flat_map(|device| templates.iter().map(move |t| t.bind_device(device)))
            .collect()
    }
}

fn power_strategies(verb: &str, method: &str) -> Vec<Strategy> {
    vec![
        Strategy::exec(Step::new("loginctl").arg(verb), QUICK_TIMEOUT),
        Strategy::exec(Step::new("systemctl").arg(verb), QUICK_TIMEOUT),
        Strategy::exec(
            Step::new("dbus-send")
                .args([
                    "--system",
                    "--print-reply",
                    "--dest=org.freedesktop.login1",
                    "/org/freedesktop/login1",
                ])
                .arg(format!("org.freedesktop.login1.Manager.{}", method))
                .arg("boolean:false"),
            QUICK_TIMEOUT,
        ),
    ]
}

fn powershell(script: &str) -> Step {
    Step::new("powershell").args(["-NoProfile", "-NonInteractive", "-Command", script])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::strategy::Recipe;

    #[test]
    fn test_linux_lock_order() {
        let table = StrategyTable::linux();
        let names: Vec<&str> = table.strategies(Capability::Lock).iter().map(|s| s.name()).collect();
        assert_eq!(names, ["hyprlock", "swaylock", "hyprctl dispatch", "loginctl"]);
        assert!(matches!(
            table.strategies(Capability::Lock)[0].recipe(),
            Recipe::Resident { .. }
        ));
    }

    #[test]
    fn test_capture_strategies_require_artifacts() {
        let table = StrategyTable::linux();
        for capability in [Capability::Screenshot, Capability::Camera] {
            let strategies = table.strategies(capability);
            assert!(!strategies.is_empty());
            assert!(strategies.iter().all(|s| s.produces_artifact()));
            assert!(strategies.iter().all(|s| s.timeout() == CAPTURE_TIMEOUT));
        }
        assert!(table
            .strategies(Capability::Shutdown)
            .iter()
            .all(|s| s.timeout() == QUICK_TIMEOUT));
    }

    #[test]
    fn test_camera_strategies_are_device_major() {
        let table = StrategyTable::linux();
        let devices = vec!["/dev/video0".to_string(), "/dev/video2".to_string()];
        let names: Vec<String> = table
            .camera_strategies(&devices)
            .iter()
            .map(|s| s.name().to_string())
            .collect();
        assert_eq!(
            names,
            [
                "ffmpeg (/dev/video0)",
                "fswebcam (/dev/video0)",
                "ffmpeg (/dev/video2)",
                "fswebcam (/dev/video2)",
            ]
        );
    }

    #[test]
    fn test_windows_uses_native_schedule() {
        let table = StrategyTable::windows();
        assert!(matches!(table.schedule().mode, ScheduleMode::Native { .. }));
        assert_eq!(table.schedule().native_cancel[0].recipe().steps()[0].display(), "shutdown /a");
    }

    #[test]
    fn test_windows_camera_uses_dshow() {
        let table = StrategyTable::windows();
        assert_eq!(table.camera().listing, DeviceListing::NamePerLine);
        assert!(table.camera().discovery.is_some());

        let bound = table.camera_strategies(&["Integrated Camera".to_string()]);
        assert_eq!(bound.len(), 1);
        assert_eq!(bound[0].name(), "ffmpeg (Integrated Camera)");
        assert!(bound[0].produces_artifact());
        assert_eq!(
            bound[0].recipe().steps()[0].display(),
            "ffmpeg -y -loglevel error -f dshow -i video=Integrated Camera -frames:v 1 {artifact}"
        );
    }

    #[test]
    fn test_override_replaces_capability() {
        let table = StrategyTable::linux().with_strategies(Capability::Lock, Vec::new());
        assert!(table.strategies(Capability::Lock).is_empty());
        assert_eq!(table.strategies(Capability::Restart).len(), 3);
    }
}
