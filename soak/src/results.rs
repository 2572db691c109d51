//! Result capture and persistence.
//!
//! Each run gets `soak/results/<case>/<run-id>/` holding the launcher config,
//! the merged transcript, launcher stderr, the launch report, and metadata.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rand::{Rng, distributions::Alphanumeric};
use rankline::io::process::CapturedRun;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, instrument, warn};

use crate::outcome::Outcome;

pub const TRANSCRIPT_FILE: &str = "transcript.txt";
pub const STDERR_FILE: &str = "stderr.log";
pub const META_FILE: &str = "meta.json";
pub const CHECKS_FILE: &str = "checks.json";
pub const LAUNCH_REPORT_FILE: &str = "launch.json";
pub const CONFIG_FILE: &str = "rankline.toml";

/// Input for capturing results from a finished launch.
#[derive(Debug)]
pub struct CaptureInput<'a> {
    pub case_id: &'a str,
    pub case_path: &'a Path,
    pub run_id: &'a str,
    pub rankline_binary: &'a Path,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub captured: &'a CapturedRun,
}

/// Metadata for a soak run, persisted to `meta.json`.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct SoakMeta {
    pub case_id: String,
    pub run_id: String,
    /// SHA-256 hash of the case file for reproducibility tracking.
    pub case_hash: String,
    pub rankline_binary: String,
    pub outcome: Option<Outcome>,
    pub start_time: String,
    pub end_time: String,
    pub duration_secs: f64,
    pub exit_code: Option<i32>,
    /// The capture timeout killed the launcher.
    pub capture_timed_out: bool,
    pub transcript_lines: usize,
    pub transcript_truncated: bool,
    /// Non-fatal errors encountered during capture.
    pub errors: Vec<String>,
}

/// Run id: UTC timestamp plus a random suffix so parallel runs never collide.
pub fn generate_run_id(now: DateTime<Utc>) -> String {
    let suffix: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(6)
        .map(char::from)
        .collect();
    format!(
        "soak-{}-{}",
        now.format("%Y%m%d_%H%M%S"),
        suffix.to_ascii_lowercase()
    )
}

pub fn results_dir(base_dir: &Path, case_id: &str, run_id: &str) -> PathBuf {
    base_dir.join(case_id).join(run_id)
}

/// Write the transcript, stderr, and metadata of a finished launch.
#[instrument(skip_all, fields(case_id = %input.case_id, run_id = %input.run_id))]
pub fn capture_results(results_dir: &Path, input: &CaptureInput<'_>) -> Result<()> {
    fs::create_dir_all(results_dir)
        .with_context(|| format!("create results dir {}", results_dir.display()))?;

    let mut errors = Vec::new();
    let case_hash = match file_sha256(input.case_path) {
        Ok(hash) => hash,
        Err(err) => {
            errors.push(format!("case hash: {err}"));
            String::new()
        }
    };

    let captured = input.captured;
    let transcript_path = results_dir.join(TRANSCRIPT_FILE);
    fs::write(&transcript_path, &captured.stdout)
        .with_context(|| format!("write {}", transcript_path.display()))?;
    let stderr_path = results_dir.join(STDERR_FILE);
    if let Err(err) = fs::write(&stderr_path, &captured.stderr) {
        errors.push(format!("{STDERR_FILE}: {err}"));
    }
    if !results_dir.join(LAUNCH_REPORT_FILE).exists() {
        errors.push(format!("{LAUNCH_REPORT_FILE}: launcher wrote no report"));
    }

    if !errors.is_empty() {
        warn!(errors = ?errors, "artifact capture had errors");
    }

    let duration = input.finished_at - input.started_at;
    let meta = SoakMeta {
        case_id: input.case_id.to_string(),
        run_id: input.run_id.to_string(),
        case_hash,
        rankline_binary: input.rankline_binary.display().to_string(),
        outcome: None,
        start_time: input.started_at.to_rfc3339(),
        end_time: input.finished_at.to_rfc3339(),
        duration_secs: duration.num_milliseconds() as f64 / 1000.0,
        exit_code: captured.exit_code(),
        capture_timed_out: captured.timed_out,
        transcript_lines: captured.stdout_lines().len(),
        transcript_truncated: captured.stdout_dropped > 0,
        errors,
    };

    write_meta(&results_dir.join(META_FILE), &meta)?;
    debug!(results_dir = %results_dir.display(), "results captured");
    Ok(())
}

pub fn update_outcome(results_dir: &Path, outcome: Outcome) -> Result<()> {
    let meta_path = results_dir.join(META_FILE);
    let mut meta = read_meta(&meta_path)?;
    meta.outcome = Some(outcome);
    write_meta(&meta_path, &meta)?;
    Ok(())
}

pub fn read_meta(path: &Path) -> Result<SoakMeta> {
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    serde_json::from_str(&contents).context("parse meta")
}

fn write_meta(path: &Path, meta: &SoakMeta) -> Result<()> {
    let contents = serde_json::to_string_pretty(meta).context("serialize meta")?;
    fs::write(path, format!("{contents}\n"))
        .with_context(|| format!("write meta {}", path.display()))?;
    Ok(())
}

fn file_sha256(path: &Path) -> Result<String> {
    let contents = fs::read(path).with_context(|| format!("read {}", path.display()))?;
    let mut hasher = Sha256::new();
    hasher.update(contents);
    let digest = hasher.finalize();
    Ok(hex::encode(digest))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::process::Command;
    use std::time::Duration;
    use tempfile::tempdir;

    #[test]
    fn results_dir_is_stable() {
        let base = Path::new("/tmp/results");
        let dir = results_dir(base, "case", "run-1");
        assert_eq!(dir, PathBuf::from("/tmp/results/case/run-1"));
    }

    #[test]
    fn run_ids_are_unique_and_sortable() {
        let now = Utc::now();
        let first = generate_run_id(now);
        let second = generate_run_id(now);
        assert!(first.starts_with("soak-"));
        assert_eq!(first.len(), second.len());
        assert_ne!(first, second);
    }

    #[cfg(unix)]
    #[test]
    fn writes_transcript_and_meta() {
        let temp = tempdir().expect("tempdir");
        let case_path = temp.path().join("case.toml");
        fs::write(&case_path, "[case]\nid = 'case'\n").expect("case");

        let mut cmd = Command::new("sh");
        cmd.args(["-c", "printf 'size 1\\nRank 0\\n'"]);
        let captured = rankline::io::process::run_captured(cmd, Duration::from_secs(10), 1024)
            .expect("run");

        let dir = temp.path().join("results").join("case").join("run-1");
        let input = CaptureInput {
            case_id: "case",
            case_path: &case_path,
            run_id: "run-1",
            rankline_binary: Path::new("/bin/rankline"),
            started_at: Utc::now(),
            finished_at: Utc::now(),
            captured: &captured,
        };
        capture_results(&dir, &input).expect("capture");
        update_outcome(&dir, Outcome::Success).expect("outcome");

        assert_eq!(
            fs::read_to_string(dir.join(TRANSCRIPT_FILE)).expect("transcript"),
            "size 1\nRank 0\n"
        );
        let meta = read_meta(&dir.join(META_FILE)).expect("meta");
        assert_eq!(meta.outcome, Some(Outcome::Success));
        assert_eq!(meta.exit_code, Some(0));
        assert_eq!(meta.transcript_lines, 2);
        assert_eq!(meta.case_hash.len(), 64);
        assert_eq!(meta.errors.len(), 1, "no launch report was written");
    }
}
