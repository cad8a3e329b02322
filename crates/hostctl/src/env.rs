//! Session environment reconstruction
//!
//! Session-bound tools (lockers, screenshot tools, speech engines) need the
//! display server and session bus of the logged-in user. When the agent runs
//! as a service those variables are usually missing, so they are rebuilt from
//! the runtime directory. The process environment itself is never modified;
//! the result is an overlay handed to each spawned tool.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::Path;
use tracing::debug;

/// Runtime directory variable
pub const XDG_RUNTIME_DIR: &str = "XDG_RUNTIME_DIR";
/// Wayland socket name variable
pub const WAYLAND_DISPLAY: &str = "WAYLAND_DISPLAY";
/// X11 display variable
pub const DISPLAY: &str = "DISPLAY";
/// Session bus variable
pub const DBUS_SESSION_BUS_ADDRESS: &str = "DBUS_SESSION_BUS_ADDRESS";
/// Hyprland instance variable, reported but never synthesized
pub const HYPRLAND_INSTANCE_SIGNATURE: &str = "HYPRLAND_INSTANCE_SIGNATURE";

/// Wayland socket used when none can be detected
pub const DEFAULT_WAYLAND_DISPLAY: &str = "wayland-0";
/// X11 display used when none is set
pub const DEFAULT_DISPLAY: &str = ":0";

/// Where a session variable's value came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnvSource {
    /// Already present in the inherited environment
    Existing,
    /// Found by inspecting the runtime directory
    Detected,
    /// Filled with a fixed fallback
    Defaulted,
    /// Left unset
    Unset,
}

/// One entry of the diagnostic trail
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvDecision {
    /// Variable name
    pub var: &'static str,
    /// How the value was obtained
    pub source: EnvSource,
    /// Value in effect, if any
    pub value: Option<String>,
    /// Extra context for failure reports
    pub note: Option<String>,
}

impl fmt::Display for EnvDecision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let value = self.value.as_deref().unwrap_or("-");
        match self.source {
            EnvSource::Existing => write!(f, "{}: using existing value {}", self.var, value)?,
            EnvSource::Detected => write!(f, "{}: detected {}", self.var, value)?,
            EnvSource::Defaulted => write!(f, "{}: defaulted to {}", self.var, value)?,
            EnvSource::Unset => write!(f, "{}: not set", self.var)?,
        }
        if let Some(note) = &self.note {
            write!(f, " ({})", note)?;
        }
        Ok(())
    }
}

/// Environment overlay for session-bound tools
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionEnvironment {
    /// Variables to add on top of the inherited environment
    overlay: BTreeMap<String, String>,
    /// Decision trail, one entry per inspected variable
    trail: Vec<EnvDecision>,
}

impl SessionEnvironment {
    /// Empty overlay, for headless operations
    pub fn empty() -> Self {
        Self::default()
    }

    /// Resolve from the current process environment and user
    #[cfg(unix)]
    pub fn resolve() -> Self {
        let inherited: HashMap<String, String> = std::env::vars().collect();
        let uid = nix::unistd::getuid().as_raw();
        Self::resolve_from(&inherited, uid)
    }

    /// Resolve from the current process environment and user
    #[cfg(not(unix))]
    pub fn resolve() -> Self {
        Self::empty()
    }

    /// Resolve against an explicit inherited environment and numeric user ID
    pub fn resolve_from(inherited: &HashMap<String, String>, uid: u32) -> Self {
        let mut env = Self::default();

        let runtime_dir = match inherited.get(XDG_RUNTIME_DIR) {
            Some(existing) => {
                env.record(XDG_RUNTIME_DIR, EnvSource::Existing, Some(existing.clone()), None);
                existing.clone()
            }
            None => {
                let derived = format!("/run/user/{}", uid);
                env.fill(XDG_RUNTIME_DIR, EnvSource::Defaulted, derived.clone(), None);
                derived
            }
        };
        let runtime_dir = Path::new(&runtime_dir);

        match inherited.get(WAYLAND_DISPLAY) {
            Some(existing) => {
                env.record(WAYLAND_DISPLAY, EnvSource::Existing, Some(existing.clone()), None);
            }
            None => match detect_wayland_socket(runtime_dir) {
                Ok(Some(socket)) => {
                    let note = format!("found in {}", runtime_dir.display());
                    env.fill(WAYLAND_DISPLAY, EnvSource::Detected, socket, Some(note));
                }
                Ok(None) => {
                    let note = format!("no wayland-* socket in {}", runtime_dir.display());
                    env.fill(WAYLAND_DISPLAY, EnvSource::Defaulted, DEFAULT_WAYLAND_DISPLAY.to_string(), Some(note));
                }
                Err(e) => {
                    let note = format!("cannot read {}: {}", runtime_dir.display(), e);
                    env.fill(WAYLAND_DISPLAY, EnvSource::Defaulted, DEFAULT_WAYLAND_DISPLAY.to_string(), Some(note));
                }
            },
        }

        match inherited.get(DISPLAY) {
            Some(existing) => env.record(DISPLAY, EnvSource::Existing, Some(existing.clone()), None),
            None => env.fill(DISPLAY, EnvSource::Defaulted, DEFAULT_DISPLAY.to_string(), None),
        }

        match inherited.get(DBUS_SESSION_BUS_ADDRESS) {
            Some(existing) => {
                env.record(DBUS_SESSION_BUS_ADDRESS, EnvSource::Existing, Some(existing.clone()), None);
            }
            None => {
                let bus = runtime_dir.join("bus");
                if is_socket(&bus) {
                    let address = format!("unix:path={}", bus.display());
                    env.fill(DBUS_SESSION_BUS_ADDRESS, EnvSource::Detected, address, None);
                } else {
                    let note = format!("{} is not a socket; session tools may fail", bus.display());
                    env.record(DBUS_SESSION_BUS_ADDRESS, EnvSource::Unset, None, Some(note));
                }
            }
        }

        match inherited.get(HYPRLAND_INSTANCE_SIGNATURE) {
            Some(existing) => {
                env.record(HYPRLAND_INSTANCE_SIGNATURE, EnvSource::Existing, Some(existing.clone()), None);
            }
            None => env.record(
                HYPRLAND_INSTANCE_SIGNATURE,
                EnvSource::Unset,
                None,
                Some("Hyprland-specific tools may fail".to_string()),
            ),
        }

        debug!("Resolved session environment:\n{}", env.describe());
        env
    }

    /// Variables to add to each spawned tool
    pub fn overlay(&self) -> &BTreeMap<String, String> {
        &self.overlay
    }

    /// Value added by the overlay for `var`
    pub fn get(&self, var: &str) -> Option<&str> {
        self.overlay.get(var).map(String::as_str)
    }

    /// Decision trail
    pub fn trail(&self) -> &[EnvDecision] {
        &self.trail
    }

    /// Decision for `var`
    pub fn decision(&self, var: &str) -> Option<&EnvDecision> {
        self.trail.iter().find(|d| d.var == var)
    }

    /// Trail rendered one decision per line
    pub fn describe(&self) -> String {
        self.trail
            .iter()
            .map(|d| format!("  - {}", d))
            .collect::<Vec<_>>()
            .join("\n")
    }

    fn fill(&mut self, var: &'static str, source: EnvSource, value: String, note: Option<String>) {
        self.overlay.insert(var.to_string(), value.clone());
        self.record(var, source, Some(value), note);
    }

    fn record(&mut self, var: &'static str, source: EnvSource, value: Option<String>, note: Option<String>) {
        self.trail.push(EnvDecision { var, source, value, note });
    }
}

/// First `wayland-*` socket or symlink in `runtime_dir`, sorted by name
fn detect_wayland_socket(runtime_dir: &Path) -> std::io::Result<Option<String>> {
    let mut candidates = Vec::new();

    for entry in std::fs::read_dir(runtime_dir)? {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().to_string();
        if !name.starts_with("wayland-") {
            continue;
        }

        let path = entry.path();
        let is_link = std::fs::symlink_metadata(&path)
            .map(|m| m.file_type().is_symlink())
            .unwrap_or(false);
        if is_link || is_socket(&path) {
            candidates.push(name);
        }
    }

    candidates.sort();
    Ok(candidates.into_iter().next())
}

#[cfg(unix)]
fn is_socket(path: &Path) -> bool {
    use std::os::unix::fs::FileTypeExt;
    std::fs::metadata(path)
        .map(|m| m.file_type().is_socket())
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_socket(_path: &Path) -> bool {
    false
}
