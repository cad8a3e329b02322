//! Camera device discovery

use tracing::{debug, info, warn};

use crate::executor::{Executor, Invocation, Outcome};
use crate::table::{CameraSpec, DeviceListing};

/// Device paths from `v4l2-ctl --list-devices` output
///
/// The listing groups tab-indented device nodes under a name line; only
/// `/dev/video*` nodes are kept, in order and without duplicates.
pub fn parse_v4l2_listing(output: &str) -> Vec<String> {
    let mut devices: Vec<String> = Vec::new();
    for line in output.lines() {
        if !line.starts_with(char::is_whitespace) {
            continue;
        }
        let node = line.trim();
        if node.starts_with("/dev/video") && !devices.iter().any(|d| d == node) {
            devices.push(node.to_string());
        }
    }
    devices
}

/// Device names listed one per line, blank lines and duplicates dropped
pub fn parse_device_lines(output: &str) -> Vec<String> {
    let mut devices: Vec<String> = Vec::new();
    for name in output.lines().map(str::trim).filter(|l| !l.is_empty()) {
        if !devices.iter().any(|d| d == name) {
            devices.push(name.to_string());
        }
    }
    devices
}

/// Capture devices present on this host
pub async fn discover_devices(executor: &Executor, spec: &CameraSpec) -> Vec<String> {
    if let Some(discovery) = &spec.discovery {
        let outcome = executor
            .execute(std::slice::from_ref(discovery), &Invocation::new("camera discovery"))
            .await;
        match &outcome {
            Outcome::Succeeded { .. } => {
                let output = outcome.output().unwrap_or_default();
                let devices = match spec.listing {
                    DeviceListing::V4l2 => parse_v4l2_listing(output),
                    DeviceListing::NamePerLine => parse_device_lines(output),
                };
                if !devices.is_empty() {
                    info!("Discovered cameras: {}", devices.join(", "));
                    return devices;
                }
                debug!("Device listing contained no capture nodes");
            }
            Outcome::Failed(report) => {
                warn!("Camera discovery failed:\n{}", report.summary());
            }
        }
    }

    let devices: Vec<String> = spec
        .probe_paths
        .iter()
        .filter(|path| path.exists())
        .map(|path| path.to_string_lossy().into_owned())
        .collect();

    if devices.is_empty() {
        warn!("No camera devices found");
    } else {
        info!("Probed cameras: {}", devices.join(", "));
    }
    devices
}
