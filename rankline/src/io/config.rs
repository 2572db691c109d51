//! Launcher configuration stored in `rankline.toml`.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

/// Default config file name, resolved against the working directory.
pub const DEFAULT_CONFIG_FILE: &str = "rankline.toml";

/// Launcher configuration (TOML).
///
/// Missing fields default to a single-participant group on loopback with no
/// watchdog. Command-line flags override file values.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct LaunchConfig {
    /// Number of participants to form the group with.
    pub np: usize,

    /// Kill participants still running after this many seconds.
    ///
    /// Unset means wait forever, as a stalled group would.
    pub timeout_secs: Option<u64>,

    /// Address the barrier rendezvous listens on. Port 0 picks a free port.
    pub bind_addr: String,

    /// Extra environment variables for every participant.
    pub env: BTreeMap<String, String>,
}

impl Default for LaunchConfig {
    fn default() -> Self {
        Self {
            np: 1,
            timeout_secs: None,
            bind_addr: "127.0.0.1:0".to_string(),
            env: BTreeMap::new(),
        }
    }
}

impl LaunchConfig {
    pub fn validate(&self) -> Result<()> {
        if self.np == 0 {
            return Err(anyhow!("np must be > 0"));
        }
        if self.timeout_secs == Some(0) {
            return Err(anyhow!("timeout_secs must be > 0 when set"));
        }
        if self.bind_addr.trim().is_empty() {
            return Err(anyhow!("bind_addr must be non-empty"));
        }
        for key in self.env.keys() {
            if key.trim().is_empty() || key.contains('=') {
                return Err(anyhow!("env key {key:?} is not a valid variable name"));
            }
            if key.starts_with(crate::io::env::VAR_PREFIX) {
                return Err(anyhow!("env key {key} is reserved for the launcher"));
            }
        }
        Ok(())
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_secs.map(Duration::from_secs)
    }
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `LaunchConfig::default()`.
pub fn load_config(path: &Path) -> Result<LaunchConfig> {
    if !path.exists() {
        let cfg = LaunchConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: LaunchConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()
        .with_context(|| format!("validate {}", path.display()))?;
    Ok(cfg)
}

/// Atomically write config to disk (temp file + rename).
pub fn write_config(path: &Path, cfg: &LaunchConfig) -> Result<()> {
    cfg.validate()?;
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    buf.push('\n');
    write_atomic(path, &buf)
}

fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let parent = path
        .parent()
        .with_context(|| format!("config path missing parent {}", path.display()))?;
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    let tmp_path = path.with_extension("toml.tmp");
    fs::write(&tmp_path, contents)
        .with_context(|| format!("write temp config {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace config {}", path.display()))?;
    Ok(())
}
