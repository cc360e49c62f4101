//! Config cascade: defaults → global → repo-local.
//!
//! Merge order is hardcoded defaults, then `~/.config/git-pulsar/config.toml`,
//! then `<repo>/pulsar.toml`, then `[tool.git-pulsar]` in `<repo>/pyproject.toml`.
//! Scalars override; `files.ignore` concatenates with first-occurrence dedup.
//! A `daemon.preset` expands into concrete intervals before later layers
//! apply, so a later layer's explicit interval wins over an earlier preset.
//! Unknown keys fail the load, naming the key and the file.

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use serde::de::{self, Deserializer};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::paths;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path:?}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("config error in {path:?}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Config {
    pub core: CoreConfig,
    pub daemon: DaemonConfig,
    pub limits: LimitsConfig,
    pub files: FilesConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            core: CoreConfig::default(),
            daemon: DaemonConfig::default(),
            limits: LimitsConfig::default(),
            files: FilesConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct CoreConfig {
    /// Remote that shadow refs are pushed to and fetched from.
    pub remote_name: String,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            remote_name: "origin".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct DaemonConfig {
    /// Seconds between local snapshots.
    pub commit_interval: u64,
    /// Seconds between remote pushes.
    pub push_interval: u64,
    /// Seconds between per-repo drift checks.
    pub drift_poll_interval: u64,
    /// Battery floor for pushes while discharging.
    pub eco_mode_percent: u8,
    /// Battery floor for snapshots while discharging.
    pub min_battery_percent: u8,
    /// Worker pool size for the daemon loop.
    pub workers: usize,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            commit_interval: 600,
            push_interval: 3600,
            drift_poll_interval: 900,
            eco_mode_percent: 20,
            min_battery_percent: 10,
            workers: 2,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct LimitsConfig {
    /// A snapshot aborts if any candidate file exceeds this many bytes.
    pub large_file_threshold: u64,
    /// Size cap for the rotating daemon log.
    pub max_log_size: u64,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            large_file_threshold: 100 * 1024 * 1024,
            max_log_size: 5 * 1024 * 1024,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(default)]
pub struct FilesConfig {
    /// Extra path patterns excluded from snapshots, appended across layers.
    pub ignore: Vec<String>,
}

/// Interval presets; expansion happens at the layer that names the preset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Preset {
    Paranoid,
    Aggressive,
    Balanced,
    Lazy,
}

impl Preset {
    /// (commit_interval, push_interval) in seconds.
    pub fn intervals(self) -> (u64, u64) {
        match self {
            Preset::Paranoid => (300, 300),
            Preset::Aggressive => (300, 900),
            Preset::Balanced => (600, 3600),
            Preset::Lazy => (1800, 7200),
        }
    }
}

impl Config {
    /// Load the full cascade for a repo (or just the global scope).
    pub fn load(repo: Option<&Path>) -> Result<Config, ConfigError> {
        let mut cfg = Config::default();
        for path in Self::cascade_paths(repo) {
            if !path.exists() {
                continue;
            }
            let layer = load_layer(&path)?;
            cfg.merge(layer);
        }
        Ok(cfg)
    }

    /// Files participating in the cascade, in merge order.
    pub fn cascade_paths(repo: Option<&Path>) -> Vec<PathBuf> {
        let mut out = vec![paths::global_config_path()];
        if let Some(repo) = repo {
            out.push(repo.join("pulsar.toml"));
            out.push(repo.join("pyproject.toml"));
        }
        out
    }

    fn merge(&mut self, layer: Layer) {
        if let Some(core) = layer.core
            && let Some(remote) = core.remote_name
        {
            self.core.remote_name = remote;
        }

        if let Some(daemon) = layer.daemon {
            // Preset first, explicit keys from the same layer override it.
            if let Some(preset) = daemon.preset {
                let (commit, push) = preset.intervals();
                self.daemon.commit_interval = commit;
                self.daemon.push_interval = push;
            }
            if let Some(v) = daemon.commit_interval {
                self.daemon.commit_interval = v.0;
            }
            if let Some(v) = daemon.push_interval {
                self.daemon.push_interval = v.0;
            }
            if let Some(v) = daemon.drift_poll_interval {
                self.daemon.drift_poll_interval = v.0;
            }
            if let Some(v) = daemon.eco_mode_percent {
                self.daemon.eco_mode_percent = v;
            }
            if let Some(v) = daemon.min_battery_percent {
                self.daemon.min_battery_percent = v;
            }
            if let Some(v) = daemon.workers {
                self.daemon.workers = v;
            }
        }

        if let Some(limits) = layer.limits {
            if let Some(v) = limits.large_file_threshold {
                self.limits.large_file_threshold = v.0;
            }
            if let Some(v) = limits.max_log_size {
                self.limits.max_log_size = v.0;
            }
        }

        if let Some(files) = layer.files
            && let Some(ignore) = files.ignore
        {
            for pattern in ignore {
                if !self.files.ignore.contains(&pattern) {
                    self.files.ignore.push(pattern);
                }
            }
        }
    }
}

/// One cascade layer; every key optional, unknown keys rejected.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct Layer {
    core: Option<CoreLayer>,
    daemon: Option<DaemonLayer>,
    limits: Option<LimitsLayer>,
    files: Option<FilesLayer>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct CoreLayer {
    remote_name: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct DaemonLayer {
    preset: Option<Preset>,
    commit_interval: Option<Span>,
    push_interval: Option<Span>,
    drift_poll_interval: Option<Span>,
    eco_mode_percent: Option<u8>,
    min_battery_percent: Option<u8>,
    workers: Option<usize>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct LimitsLayer {
    large_file_threshold: Option<ByteSize>,
    max_log_size: Option<ByteSize>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct FilesLayer {
    ignore: Option<Vec<String>>,
}

fn load_layer(path: &Path) -> Result<Layer, ConfigError> {
    let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;

    let wrap = |source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    };

    if path.file_name().is_some_and(|n| n == "pyproject.toml") {
        // Only the [tool.git-pulsar] table participates; the rest of the
        // project file is not ours to validate.
        let doc: toml::Value = toml::from_str(&contents).map_err(wrap)?;
        let Some(table) = doc
            .get("tool")
            .and_then(|t| t.get("git-pulsar"))
            .cloned()
        else {
            return Ok(Layer::default());
        };
        return Layer::deserialize(table).map_err(wrap);
    }

    toml::from_str(&contents).map_err(wrap)
}

/// Byte count, accepted as an integer or a human form like `"100MB"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct ByteSize(u64);

impl<'de> Deserialize<'de> for ByteSize {
    fn deserialize<D: Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
        match IntOrStr::deserialize(d)? {
            IntOrStr::Int(n) => Ok(ByteSize(n)),
            IntOrStr::Str(s) => parse_size(&s).map(ByteSize).map_err(de::Error::custom),
        }
    }
}

/// Duration in seconds, accepted as an integer or a human form like `"15m"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Span(u64);

impl<'de> Deserialize<'de> for Span {
    fn deserialize<D: Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
        match IntOrStr::deserialize(d)? {
            IntOrStr::Int(n) => Ok(Span(n)),
            IntOrStr::Str(s) => parse_duration(&s).map(Span).map_err(de::Error::custom),
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum IntOrStr {
    Int(u64),
    Str(String),
}

struct Unparseable(&'static str, String);

impl fmt::Display for Unparseable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid {} format {:?}", self.0, self.1)
    }
}

fn parse_size(value: &str) -> Result<u64, Unparseable> {
    let v = value.trim().to_ascii_lowercase();
    let err = || Unparseable("size", value.to_string());
    let (num, unit) = split_unit(&v).ok_or_else(err)?;
    let mult: u64 = match unit {
        "k" | "kb" => 1024,
        "m" | "mb" => 1024 * 1024,
        "g" | "gb" => 1024 * 1024 * 1024,
        "" | "b" => 1,
        _ => return Err(err()),
    };
    Ok((num * mult as f64) as u64)
}

fn parse_duration(value: &str) -> Result<u64, Unparseable> {
    let v = value.trim().to_ascii_lowercase();
    let err = || Unparseable("duration", value.to_string());
    let (num, unit) = split_unit(&v).ok_or_else(err)?;
    let unit = unit.strip_suffix('s').filter(|u| !u.is_empty()).unwrap_or(unit);
    let mult: u64 = match unit {
        "" | "s" | "sec" => 1,
        "m" | "min" => 60,
        "h" | "hr" => 3600,
        _ => return Err(err()),
    };
    Ok((num * mult as f64) as u64)
}

fn split_unit(v: &str) -> Option<(f64, &str)> {
    let digits_end = v
        .find(|c: char| !c.is_ascii_digit() && c != '.')
        .unwrap_or(v.len());
    let num: f64 = v[..digits_end].parse().ok()?;
    Some((num, v[digits_end..].trim()))
}

/// Cascade file mtimes, used by the daemon to reload config when edited.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CascadeFingerprint(Vec<(PathBuf, Option<SystemTime>)>);

impl CascadeFingerprint {
    pub fn capture(repo: Option<&Path>) -> Self {
        Self(
            Config::cascade_paths(repo)
                .into_iter()
                .map(|p| {
                    let mtime = std::fs::metadata(&p).and_then(|m| m.modified()).ok();
                    (p, mtime)
                })
                .collect(),
        )
    }
}
