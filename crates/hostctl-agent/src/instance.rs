//! Single-instance marker
//!
//! The marker file holds the PID of the running agent. A second agent started
//! while that process is alive refuses to run and leaves the marker alone.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use hostctl::process::is_alive;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Instance guard failures
#[derive(Debug, Error)]
pub enum InstanceError {
    /// Another agent is running
    #[error("Another agent is already running (pid {pid}, marker {path})")]
    AlreadyRunning {
        /// PID recorded in the marker
        pid: u32,
        /// Marker path
        path: PathBuf,
    },

    /// Marker could not be written
    #[error("Failed to write instance marker {path}: {source}")]
    Io {
        /// Marker path
        path: PathBuf,
        /// Underlying error
        #[source]
        source: io::Error,
    },
}

/// Holds the instance marker for the life of the agent
///
/// Dropping the guard removes the marker if it still records this process.
#[derive(Debug)]
pub struct InstanceGuard {
    /// Marker path
    path: PathBuf,
    /// PID written to the marker
    pid: u32,
}

impl InstanceGuard {
    /// Claim the marker at `path` for the current process
    pub fn acquire(path: impl Into<PathBuf>) -> Result<Self, InstanceError> {
        let path = path.into();
        let pid = std::process::id();

        claim(&path, pid)?;
        info!("Instance marker {} written (pid {})", path.display(), pid);

        Ok(Self { path, pid })
    }

    /// Marker path
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// PID recorded in the marker
    pub fn pid(&self) -> u32 {
        self.pid
    }

    /// Also release the marker when a panic on the calling thread ends the process
    ///
    /// Call this from the thread that drives the agent. Panics on other
    /// threads are caught by the runtime and leave the marker in place.
    pub fn install_panic_hook(&self) {
        let path = self.path.clone();
        let pid = self.pid;
        let owner = std::thread::current().id();
        let previous = std::panic::take_hook();
        std::panic::set_hook(Box::new(move |info| {
            if std::thread::current().id() == owner {
                release(&path, pid);
            }
            previous(info);
        }));
    }
}

impl Drop for InstanceGuard {
    fn drop(&mut self) {
        release(&self.path, self.pid);
    }
}

enum Marker {
    Absent,
    Live(u32),
    Stale(u32),
    Malformed(String),
}

const CLAIM_ATTEMPTS: usize = 3;

fn read_marker(path: &Path) -> Marker {
    let content = match fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Marker::Absent,
        Err(e) => return Marker::Malformed(e.to_string()),
    };

    match content.trim().parse::<u32>() {
        Ok(pid) if is_alive(pid) => Marker::Live(pid),
        Ok(pid) => Marker::Stale(pid),
        Err(_) => Marker::Malformed(content),
    }
}

/// Create the marker holding `pid`, never overwriting one that appeared meanwhile
///
/// The PID is written to a private file first and hard-linked into place, so
/// the marker is never observed empty and the link fails if the path exists.
fn claim(path: &Path, pid: u32) -> Result<(), InstanceError> {
    let io_error = |source| InstanceError::Io {
        path: path.to_path_buf(),
        source,
    };

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(io_error)?;
    }
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(format!(".{}.tmp", pid));
    let tmp = PathBuf::from(tmp);
    fs::write(&tmp, pid.to_string()).map_err(io_error)?;

    let result = link_marker(path, &tmp);
    let _ = fs::remove_file(&tmp);
    result
}

fn link_marker(path: &Path, tmp: &Path) -> Result<(), InstanceError> {
    let mut attempt = 0;
    loop {
        attempt += 1;
        let source = match fs::hard_link(tmp, path) {
            Ok(()) => return Ok(()),
            Err(e) => e,
        };
        if source.kind() != io::ErrorKind::AlreadyExists || attempt >= CLAIM_ATTEMPTS {
            return Err(InstanceError::Io {
                path: path.to_path_buf(),
                source,
            });
        }

        match read_marker(path) {
            Marker::Live(existing) => {
                return Err(InstanceError::AlreadyRunning {
                    pid: existing,
                    path: path.to_path_buf(),
                })
            }
            Marker::Stale(existing) => {
                warn!("Replacing stale instance marker for dead pid {}", existing);
                remove_unless_changed(path, &existing.to_string());
            }
            Marker::Malformed(content) => {
                warn!("Replacing malformed instance marker {:?}", content);
                remove_unless_changed(path, content.trim());
            }
            Marker::Absent => {}
        }
    }
}

/// Remove the marker only while it still holds `expected`
fn remove_unless_changed(path: &Path, expected: &str) {
    match fs::read_to_string(path) {
        Ok(content) if content.trim() == expected => {
            if let Err(e) = fs::remove_file(path) {
                debug!("Could not remove old instance marker {}: {}", path.display(), e);
            }
        }
        _ => {}
    }
}

/// Remove the marker if it still holds `pid`
fn release(path: &Path, pid: u32) {
    match fs::read_to_string(path) {
        Ok(content) if content.trim() == pid.to_string() => match fs::remove_file(path) {
            Ok(()) => info!("Instance marker {} removed", path.display()),
            Err(e) => warn!("Failed to remove instance marker {}: {}", path.display(), e),
        },
        Ok(content) => debug!("Instance marker now holds {:?}; leaving it", content.trim()),
        Err(_) => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_acquire_writes_pid_and_drop_removes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hostctl.pid");

        let guard = InstanceGuard::acquire(&path).unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), std::process::id().to_string());
        assert_eq!(guard.pid(), std::process::id());

        drop(guard);
        assert!(!path.exists());
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_live_duplicate_is_refused() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hostctl.pid");
        // Our own PID is certainly alive.
        let recorded = format!("{}\n", std::process::id());
        fs::write(&path, &recorded).unwrap();

        match InstanceGuard::acquire(&path) {
            Err(InstanceError::AlreadyRunning { pid, .. }) => assert_eq!(pid, std::process::id()),
            other => panic!("expected refusal, got {:?}", other),
        }
        assert_eq!(fs::read_to_string(&path).unwrap(), recorded);
    }

    #[cfg(unix)]
    #[test]
    fn test_stale_marker_is_overwritten() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hostctl.pid");

        let mut child = std::process::Command::new("true").spawn().unwrap();
        let dead = child.id();
        child.wait().unwrap();
        fs::write(&path, dead.to_string()).unwrap();

        let _guard = InstanceGuard::acquire(&path).unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), std::process::id().to_string());
    }

    #[test]
    fn test_malformed_marker_is_overwritten() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hostctl.pid");
        fs::write(&path, "not a pid").unwrap();

        let _guard = InstanceGuard::acquire(&path).unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), std::process::id().to_string());
    }

    #[test]
    fn test_drop_leaves_foreign_marker() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hostctl.pid");

        let guard = InstanceGuard::acquire(&path).unwrap();
        fs::write(&path, "1").unwrap();
        drop(guard);
        assert_eq!(fs::read_to_string(&path).unwrap(), "1");
    }

    #[test]
    fn test_claim_never_replaces_a_live_marker() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hostctl.pid");
        let owner = std::process::id().to_string();
        fs::write(&path, &owner).unwrap();

        match claim(&path, 4_000_000) {
            Err(InstanceError::AlreadyRunning { pid, .. }) => assert_eq!(pid, std::process::id()),
            other => panic!("expected refusal, got {:?}", other),
        }
        assert_eq!(fs::read_to_string(&path).unwrap(), owner);
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[test]
    fn test_empty_marker_is_replaced() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hostctl.pid");
        fs::write(&path, "").unwrap();

        let _guard = InstanceGuard::acquire(&path).unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), std::process::id().to_string());
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[tokio::test]
    async fn test_caught_task_panic_keeps_marker() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hostctl.pid");
        let guard = InstanceGuard::acquire(&path).unwrap();
        guard.install_panic_hook();

        let joined = tokio::task::spawn_blocking(|| panic!("identity lookup failed")).await;
        assert!(joined.unwrap_err().is_panic());
        assert_eq!(fs::read_to_string(&path).unwrap(), std::process::id().to_string());
        assert!(matches!(
            InstanceGuard::acquire(&path),
            Err(InstanceError::AlreadyRunning { .. })
        ));

        // A panic on the driving thread releases the marker.
        let caught = std::panic::catch_unwind(|| panic!("agent loop failed"));
        assert!(caught.is_err());
        assert!(!path.exists());
        drop(guard);
    }

    #[test]
    fn test_creates_state_directory() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state").join("hostctl.pid");
        let guard = InstanceGuard::acquire(&path).unwrap();
        assert!(guard.path().exists());
    }
}
