//! Host status and identity reports
//!
//! Every field is gathered independently and degrades to "N/A" on its own.

use std::path::Path;
use std::time::Duration;

use sysinfo::{Components, System, MINIMUM_CPU_UPDATE_INTERVAL};
use tracing::{debug, warn};

/// Where the kernel exposes batteries
pub const POWER_SUPPLY_ROOT: &str = "/sys/class/power_supply";

/// Battery directory names checked in order
const BATTERY_NAMES: [&str; 3] = ["BAT0", "BAT1", "battery"];

/// PowerShell query printing `<charge> <status code>` for the first battery
pub const WINDOWS_BATTERY_QUERY: &str = concat!(
    "Get-CimInstance Win32_Battery | Select-Object -First 1 | ",
    "ForEach-Object { \"$($_.EstimatedChargeRemaining) $($_.BatteryStatus)\" }",
);

/// CPU load sampling window
const CPU_SAMPLE: Duration = Duration::from_secs(1);

const GIB: f64 = 1024.0 * 1024.0 * 1024.0;

const NOT_AVAILABLE: &str = "N/A";

/// Battery charge and power state
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatteryInfo {
    /// Charge, e.g. "87%"
    pub percent: String,
    /// Power state, e.g. "⚡ Charging"
    pub power: String,
}

/// Snapshot for the status command
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HostStatus {
    /// Formatted uptime
    pub uptime: Option<String>,
    /// Global CPU usage in percent
    pub cpu_load: Option<f32>,
    /// Formatted CPU temperature
    pub cpu_temperature: Option<String>,
    /// Formatted memory usage
    pub memory: Option<String>,
    /// Battery, if the host has one
    pub battery: Option<BatteryInfo>,
}

impl HostStatus {
    /// Gather a fresh snapshot; takes about one second for the CPU sample
    pub async fn gather() -> Self {
        let mut system = System::new();

        system.refresh_cpu();
        tokio::time::sleep(CPU_SAMPLE.max(MINIMUM_CPU_UPDATE_INTERVAL)).await;
        system.refresh_cpu();
        let usage = system.global_cpu_info().cpu_usage();
        let cpu_load = usage.is_finite().then_some(usage);

        system.refresh_memory();
        let memory = format_memory(system.used_memory(), system.total_memory());

        let uptime = match System::uptime() {
            0 => {
                warn!("Uptime unavailable");
                None
            }
            seconds => Some(format_uptime(seconds)),
        };

        let components = Components::new_with_refreshed_list();
        let readings: Vec<(String, f32)> = components
            .iter()
            .map(|c| (c.label().to_string(), c.temperature()))
            .collect();
        let cpu_temperature = pick_temperature(&readings);

        #[cfg(windows)]
        let battery = query_windows_battery().await;
        #[cfg(not(windows))]
        let battery = read_battery(Path::new(POWER_SUPPLY_ROOT));

        Self {
            uptime,
            cpu_load,
            cpu_temperature,
            memory,
            battery,
        }
    }

    /// Reply text
    pub fn render(&self, device: &str) -> String {
        let (battery, power) = match &self.battery {
            Some(info) => (info.percent.as_str(), info.power.as_str()),
            None => (NOT_AVAILABLE, NOT_AVAILABLE),
        };
        let cpu = self
            .cpu_load
            .map(|load| format!("{:.1}%", load))
            .unwrap_or_else(|| NOT_AVAILABLE.to_string());

        format!(
            "💻 Status for {}:\n\n\
             🕰️ Uptime: {}\n\
             ⚡ CPU Load: {}\n\
             🌡️ CPU Temp: {}\n\
             🧠 Memory: {}\n\
             🔋 Battery: {}\n\
             🔌 Power: {}",
            device,
            self.uptime.as_deref().unwrap_or(NOT_AVAILABLE),
            cpu,
            self.cpu_temperature.as_deref().unwrap_or(NOT_AVAILABLE),
            self.memory.as_deref().unwrap_or(NOT_AVAILABLE),
            battery,
            power,
        )
    }
}

/// `1d 02h 03m 04s`, leaving out days and hours while they are zero
pub fn format_uptime(seconds: u64) -> String {
    let days = seconds / 86_400;
    let hours = seconds % 86_400 / 3_600;
    let minutes = seconds % 3_600 / 60;
    let secs = seconds % 60;

    let mut parts = Vec::new();
    if days > 0 {
        parts.push(format!("{}d", days));
    }
    if days > 0 || hours > 0 {
        parts.push(format!("{:02}h", hours));
    }
    parts.push(format!("{:02}m", minutes));
    parts.push(format!("{:02}s", secs));
    parts.join(" ")
}

fn format_memory(used: u64, total: u64) -> Option<String> {
    if total == 0 {
        return None;
    }
    let percent = used as f64 / total as f64 * 100.0;
    Some(format!(
        "{:.1}GB / {:.1}GB ({:.1}%)",
        used as f64 / GIB,
        total as f64 / GIB,
        percent
    ))
}

/// CPU package temperature, else the first sensor labelled with its name
pub fn pick_temperature(readings: &[(String, f32)]) -> Option<String> {
    let valid: Vec<&(String, f32)> = readings.iter().filter(|(_, t)| t.is_finite()).collect();

    let cpu = valid.iter().find(|(label, _)| {
        let label = label.to_ascii_lowercase();
        ["package", "tctl", "tccd", "cpu"].iter().any(|key| label.contains(key))
    });

    match cpu {
        Some((_, temp)) => Some(format!("{:.1}°C", temp)),
        None => valid
            .first()
            .map(|(label, temp)| format!("{:.1}°C (sensor: {})", temp, label)),
    }
}

/// First battery under `root` exposing both capacity and status
pub fn read_battery(root: &Path) -> Option<BatteryInfo> {
    for name in BATTERY_NAMES {
        let dir = root.join(name);
        let capacity = dir.join("capacity");
        let status = dir.join("status");
        if !capacity.exists() || !status.exists() {
            continue;
        }

        match (std::fs::read_to_string(&capacity), std::fs::read_to_string(&status)) {
            (Ok(capacity), Ok(status)) => {
                return Some(BatteryInfo {
                    percent: format!("{}%", capacity.trim()),
                    power: describe_power(status.trim()),
                });
            }
            (Err(e), _) | (_, Err(e)) => {
                warn!("Failed to read battery info from {}: {}", dir.display(), e);
            }
        }
    }
    debug!("No battery under {}", root.display());
    None
}

/// Battery from [`WINDOWS_BATTERY_QUERY`] output; empty output means no battery
pub fn parse_win32_battery(output: &str) -> Option<BatteryInfo> {
    let mut fields = output.split_whitespace();
    let charge: u8 = fields.next()?.parse().ok()?;
    let status = match fields.next().and_then(|code| code.parse::<u16>().ok()) {
        Some(1 | 4 | 5) => "discharging",
        Some(2 | 6..=9) => "charging",
        Some(3) => "full",
        Some(11) => "not charging",
        _ => "",
    };
    Some(BatteryInfo {
        percent: format!("{}%", charge),
        power: describe_power(status),
    })
}

#[cfg(windows)]
async fn query_windows_battery() -> Option<BatteryInfo> {
    const QUERY_TIMEOUT: Duration = Duration::from_secs(10);

    let query = tokio::process::Command::new("powershell")
        .args(["-NoProfile", "-NonInteractive", "-Command", WINDOWS_BATTERY_QUERY])
        .kill_on_drop(true)
        .output();
    match tokio::time::timeout(QUERY_TIMEOUT, query).await {
        Ok(Ok(output)) if output.status.success() => {
            let battery = parse_win32_battery(&String::from_utf8_lossy(&output.stdout));
            if battery.is_none() {
                debug!("No battery reported by Win32_Battery");
            }
            battery
        }
        Ok(Ok(output)) => {
            warn!("Battery query exited with {}", output.status);
            None
        }
        Ok(Err(e)) => {
            warn!("Failed to run battery query: {}", e);
            None
        }
        Err(_) => {
            warn!("Battery query timed out");
            None
        }
    }
}

/// Human power state for a sysfs battery status value
pub fn describe_power(status: &str) -> String {
    match status.to_ascii_lowercase().as_str() {
        "charging" => "⚡ Charging".to_string(),
        "discharging" => "🔋 Discharging".to_string(),
        "full" => "🔌 Fully Charged".to_string(),
        "not charging" => "🔌 Not Charging (Plugged In)".to_string(),
        other => {
            let mut chars = other.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect(),
                None => NOT_AVAILABLE.to_string(),
            }
        }
    }
}

/// Account the agent runs as
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Identity {
    /// Login name
    pub username: Option<String>,
    /// Numeric user ID
    pub uid: Option<u32>,
    /// Numeric primary group ID
    pub gid: Option<u32>,
    /// Sorted unique group names
    pub groups: Option<Vec<String>>,
}

impl Identity {
    /// Identity of the current process
    #[cfg(unix)]
    pub fn current() -> Self {
        use nix::unistd::{getgid, getuid, Group, User};

        let uid = getuid();
        let gid = getgid();

        let username = match User::from_uid(uid) {
            Ok(Some(user)) => Some(user.name),
            Ok(None) | Err(_) => env_username(),
        };

        let mut gids = vec![gid];
        gids.extend(supplementary_groups());

        let mut names = Vec::new();
        for gid in gids {
            match Group::from_gid(gid) {
                Ok(Some(group)) => names.push(group.name),
                Ok(None) => names.push(gid.to_string()),
                Err(e) => warn!("Could not resolve group {}: {}", gid, e),
            }
        }
        names.sort();
        names.dedup();

        Self {
            username,
            uid: Some(uid.as_raw()),
            gid: Some(gid.as_raw()),
            groups: (!names.is_empty()).then_some(names),
        }
    }

    /// Identity of the current process
    #[cfg(not(unix))]
    pub fn current() -> Self {
        Self {
            username: env_username(),
            ..Default::default()
        }
    }

    /// Reply text
    pub fn render(&self, device: &str) -> String {
        let number = |n: Option<u32>| n.map(|n| n.to_string()).unwrap_or_else(|| NOT_AVAILABLE.to_string());
        let groups = self
            .groups
            .as_ref()
            .map(|g| g.join(", "))
            .unwrap_or_else(|| NOT_AVAILABLE.to_string());

        [
            format!("👤 User Info on {}:", device),
            format!("   - Username: {}", self.username.as_deref().unwrap_or(NOT_AVAILABLE)),
            format!("   - User ID (UID): {}", number(self.uid)),
            format!("   - Group ID (GID): {}", number(self.gid)),
            format!("   - Groups: {}", groups),
        ]
        .join("\n")
    }
}

#[cfg(target_os = "linux")]
fn supplementary_groups() -> Vec<nix::unistd::Gid> {
    nix::unistd::getgroups().unwrap_or_else(|e| {
        warn!("Could not list supplementary groups: {}", e);
        Vec::new()
    })
}

#[cfg(all(unix, not(target_os = "linux")))]
fn supplementary_groups() -> Vec<nix::unistd::Gid> {
    Vec::new()
}

fn env_username() -> Option<String> {
    ["USER", "LOGNAME", "USERNAME"]
        .iter()
        .find_map(|var| std::env::var(var).ok().filter(|v| !v.is_empty()))
}
