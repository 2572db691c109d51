//! Building and launching the rankline binary for a case.

use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use rankline::io::process::{CapturedRun, run_captured};

use crate::case::GroupSpec;

/// Captured output above this is dropped; a large transcript is still judged on its prefix.
pub const CAPTURE_LIMIT_BYTES: usize = 1 << 20;

/// Extra time the capture timeout allows beyond the launcher's watchdog.
const CAPTURE_SLACK: Duration = Duration::from_secs(30);

/// Capture timeout when the case has no watchdog.
const DEFAULT_CAPTURE_TIMEOUT: Duration = Duration::from_secs(300);

pub fn build_rankline_binary(repo_root: &Path) -> Result<PathBuf> {
    let output = Command::new("cargo")
        .arg("build")
        .arg("-p")
        .arg("rankline")
        .current_dir(repo_root)
        .output()
        .context("build rankline binary")?;
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        bail!("rankline build failed: {}", stderr.trim());
    }
    Ok(rankline_binary_path(repo_root))
}

pub fn rankline_binary_path(repo_root: &Path) -> PathBuf {
    let binary = format!("rankline{}", std::env::consts::EXE_SUFFIX);
    repo_root.join("target").join("debug").join(binary)
}

/// `rankline launch` invocation running `rankline hello` for `group`.
pub fn launch_command(binary: &Path, config: &Path, report: &Path, group: &GroupSpec) -> Command {
    let mut cmd = Command::new(binary);
    cmd.arg("launch")
        .arg("--config")
        .arg(config)
        .arg("--report")
        .arg(report)
        .arg("--")
        .arg(binary)
        .arg("hello")
        .arg("--repeat")
        .arg(group.repeat.to_string());
    if let Some(rank) = group.omit_final_sync {
        cmd.arg("--omit-final-sync").arg(rank.to_string());
    }
    cmd
}

/// How long to wait for the whole launch before giving up on it.
pub fn capture_timeout(watchdog_secs: Option<u64>) -> Duration {
    match watchdog_secs {
        Some(secs) => Duration::from_secs(secs) + CAPTURE_SLACK,
        None => DEFAULT_CAPTURE_TIMEOUT,
    }
}

/// Run the launch in `workdir`, capturing the merged transcript.
pub fn run_launch(mut cmd: Command, workdir: &Path, timeout: Duration) -> Result<CapturedRun> {
    cmd.current_dir(workdir);
    run_captured(cmd, timeout, CAPTURE_LIMIT_BYTES).context("run rankline launch")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rankline_binary_path_is_deterministic() {
        let root = Path::new("/repo/root");
        let path = rankline_binary_path(root);
        let expected = format!(
            "/repo/root/target/debug/rankline{}",
            std::env::consts::EXE_SUFFIX
        );
        assert_eq!(path, PathBuf::from(expected));
    }

    #[test]
    fn launch_command_passes_fault_to_participants() {
        let group = GroupSpec {
            size: 3,
            repeat: 2,
            omit_final_sync: Some(1),
        };
        let cmd = launch_command(
            Path::new("/bin/rankline"),
            Path::new("cfg.toml"),
            Path::new("launch.json"),
            &group,
        );
        let args: Vec<String> = cmd
            .get_args()
            .map(|arg| arg.to_string_lossy().into_owned())
            .collect();
        assert_eq!(
            args,
            vec![
                "launch",
                "--config",
                "cfg.toml",
                "--report",
                "launch.json",
                "--",
                "/bin/rankline",
                "hello",
                "--repeat",
                "2",
                "--omit-final-sync",
                "1",
            ]
        );
    }

    #[test]
    fn capture_outlasts_the_watchdog() {
        assert!(capture_timeout(Some(3)) > Duration::from_secs(3));
        assert_eq!(capture_timeout(None), DEFAULT_CAPTURE_TIMEOUT);
    }
}
