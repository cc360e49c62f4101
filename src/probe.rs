//! Host telemetry: machine identity, power state, load, notifications.

#[cfg(not(target_os = "macos"))]
use std::path::PathBuf;
use std::process::Command;

use sha2::{Digest, Sha256};

use crate::paths;

/// Host facts the daemon consults before doing work.
///
/// Implemented by [`HostProbe`] for real hosts; tests substitute fixed
/// values to drive gating branches.
pub trait SystemProbe: Send + Sync {
    /// Stable identity for this host, safe to use as a ref path segment.
    fn machine_id(&self) -> String;

    /// `(percent, on_ac_power)`. Hosts without a battery report `(100, true)`.
    fn battery(&self) -> (u8, bool);

    /// Whether the 1-minute load average exceeds 2.5x the CPU count.
    fn under_load(&self) -> bool;

    /// Desktop notification; absence of a notifier is non-fatal.
    fn notify(&self, title: &str, body: &str);

    /// Unix seconds.
    fn now(&self) -> i64 {
        time::OffsetDateTime::now_utc().unix_timestamp()
    }
}

/// Probe backed by OS primitives.
#[derive(Debug, Default)]
pub struct HostProbe;

impl SystemProbe for HostProbe {
    fn machine_id(&self) -> String {
        let cache = paths::machine_id_path();
        if let Ok(cached) = std::fs::read_to_string(&cache) {
            let cached = cached.trim();
            if !cached.is_empty() {
                return cached.to_string();
            }
        }

        let id = resolve_machine_id();
        if let Some(dir) = cache.parent() {
            let _ = std::fs::create_dir_all(dir);
        }
        let _ = std::fs::write(&cache, &id);
        id
    }

    fn battery(&self) -> (u8, bool) {
        battery_status().unwrap_or((100, true))
    }

    fn under_load(&self) -> bool {
        let Some(load1) = load_1m() else {
            return false;
        };
        let cpus = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        load1 > cpus as f64 * 2.5
    }

    fn notify(&self, title: &str, body: &str) {
        #[cfg(target_os = "macos")]
        {
            // Quotes would break the AppleScript literal.
            let body = body.replace('"', "'");
            let title = title.replace('"', "'");
            let script = format!("display notification \"{body}\" with title \"{title}\"");
            let _ = Command::new("osascript")
                .args(["-e", &script])
                .output();
        }

        #[cfg(not(target_os = "macos"))]
        {
            let _ = Command::new("notify-send").args([title, body]).output();
        }
    }
}

/// Resolve a raw host identity and fold it into a ref-safe slug.
///
/// Order: macOS IOPlatformUUID, Linux machine-id (systemd then dbus), DMI
/// product uuid, then a hostname+username hash. The slug prefixes a short
/// hostname for readable ref listings.
fn resolve_machine_id() -> String {
    let raw = platform_raw_id().unwrap_or_else(fallback_raw_id);
    let digest = Sha256::digest(raw.as_bytes());
    let short: String = digest.iter().take(6).map(|b| format!("{b:02x}")).collect();
    format!("{}-{}", sanitize_segment(&short_hostname()), short)
}

#[cfg(target_os = "macos")]
fn platform_raw_id() -> Option<String> {
    let out = Command::new("ioreg")
        .args(["-rd1", "-c", "IOPlatformExpertDevice"])
        .output()
        .ok()?;
    let text = String::from_utf8_lossy(&out.stdout);
    for line in text.lines() {
        if line.contains("IOPlatformUUID") {
            let uuid = line.split('"').nth(3)?;
            if !uuid.is_empty() {
                return Some(uuid.to_string());
            }
        }
    }
    None
}

#[cfg(not(target_os = "macos"))]
fn platform_raw_id() -> Option<String> {
    for p in [
        "/etc/machine-id",
        "/var/lib/dbus/machine-id",
        "/sys/class/dmi/id/product_uuid",
    ] {
        if let Ok(contents) = std::fs::read_to_string(p) {
            let id = contents.trim();
            if !id.is_empty() {
                return Some(id.to_string());
            }
        }
    }
    None
}

fn fallback_raw_id() -> String {
    format!("{}@{}", whoami::username(), hostname())
}

fn hostname() -> String {
    whoami::fallible::hostname().unwrap_or_else(|_| "unknown".into())
}

fn short_hostname() -> String {
    let host = hostname();
    host.split('.').next().unwrap_or("host").to_string()
}

/// Keep only characters valid in a single ref path segment.
fn sanitize_segment(s: &str) -> String {
    let cleaned: String = s
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '-'
            }
        })
        .collect();
    let trimmed = cleaned.trim_matches('-');
    if trimmed.is_empty() {
        "host".to_string()
    } else {
        trimmed.to_ascii_lowercase()
    }
}

#[cfg(target_os = "macos")]
fn battery_status() -> Option<(u8, bool)> {
    let out = Command::new("pmset").args(["-g", "batt"]).output().ok()?;
    let text = String::from_utf8_lossy(&out.stdout);
    let plugged = text.contains("AC Power");
    let percent = text
        .split_whitespace()
        .find_map(|word| word.strip_suffix("%;").or_else(|| word.strip_suffix('%')))
        .and_then(|n| n.parse().ok())
        .unwrap_or(100);
    Some((percent, plugged))
}

#[cfg(not(target_os = "macos"))]
fn battery_status() -> Option<(u8, bool)> {
    for bat in ["BAT0", "BAT1"] {
        let base = PathBuf::from("/sys/class/power_supply").join(bat);
        let Ok(capacity) = std::fs::read_to_string(base.join("capacity")) else {
            continue;
        };
        let percent: u8 = capacity.trim().parse().ok()?;
        let plugged = std::fs::read_to_string(base.join("status"))
            .map(|s| s.trim() != "Discharging")
            .unwrap_or(true);
        return Some((percent, plugged));
    }
    None
}

#[cfg(target_os = "macos")]
fn load_1m() -> Option<f64> {
    let out = Command::new("sysctl")
        .args(["-n", "vm.loadavg"])
        .output()
        .ok()?;
    let text = String::from_utf8_lossy(&out.stdout);
    text.split_whitespace().nth(1)?.parse().ok()
}

#[cfg(not(target_os = "macos"))]
fn load_1m() -> Option<f64> {
    let contents = std::fs::read_to_string("/proc/loadavg").ok()?;
    contents.split_whitespace().next()?.parse().ok()
}
