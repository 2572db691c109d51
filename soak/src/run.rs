//! Case execution orchestration.
//!
//! Builds the binary, writes the case's launcher config, launches the group
//! under a capture timeout, judges the transcript, and records results.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use chrono::Utc;
use rankline::io::config::{LaunchConfig, write_config};
use tracing::{debug, info, instrument};

use crate::case::CaseFile;
use crate::config::apply_case_config;
use crate::harness::{build_rankline_binary, capture_timeout, launch_command, run_launch};
use crate::judge::{run_checks, write_judgment};
use crate::outcome::{Outcome, classify_outcome};
use crate::results::{
    CHECKS_FILE, CONFIG_FILE, CaptureInput, LAUNCH_REPORT_FILE, capture_results,
    generate_run_id, results_dir, update_outcome,
};

/// Result of running a single case.
#[derive(Debug)]
pub struct RunOutcome {
    pub run_id: String,
    pub results_dir: PathBuf,
    pub outcome: Outcome,
}

/// Run a case end-to-end.
#[instrument(skip_all, fields(case_id = %case.case.id))]
pub fn run_case(repo_root: &Path, case_path: &Path, case: &CaseFile) -> Result<RunOutcome> {
    info!("case run started");

    debug!("building rankline binary");
    let rankline_binary = build_rankline_binary(repo_root)?;
    if !rankline_binary.exists() {
        bail!("rankline binary not found at {}", rankline_binary.display());
    }

    let started_at = Utc::now();
    let run_id = generate_run_id(started_at);
    let results_dir = results_dir(
        &repo_root.join("soak").join("results"),
        &case.case.id,
        &run_id,
    );
    std::fs::create_dir_all(&results_dir)
        .with_context(|| format!("create {}", results_dir.display()))?;

    let cfg = apply_case_config(LaunchConfig::default(), case)?;
    let config_path = results_dir.join(CONFIG_FILE);
    write_config(&config_path, &cfg).context("write launcher config")?;

    debug!(size = case.group.size, repeat = case.group.repeat, "launching group");
    let cmd = launch_command(
        &rankline_binary,
        &config_path,
        &results_dir.join(LAUNCH_REPORT_FILE),
        &case.group,
    );
    let captured = run_launch(cmd, &results_dir, capture_timeout(cfg.timeout_secs))?;
    let finished_at = Utc::now();

    let exit_code = captured.exit_code();
    info!(
        exit_code = ?exit_code,
        duration_secs = (finished_at - started_at).num_milliseconds() as f64 / 1000.0,
        "launch finished"
    );

    let capture_input = CaptureInput {
        case_id: &case.case.id,
        case_path,
        run_id: &run_id,
        rankline_binary: &rankline_binary,
        started_at,
        finished_at,
        captured: &captured,
    };
    capture_results(&results_dir, &capture_input).context("capture results")?;

    let judgment = run_checks(
        &case.checks,
        &case.group,
        &captured.stdout_lines(),
        exit_code,
    );
    write_judgment(&results_dir.join(CHECKS_FILE), &judgment).context("write checks")?;

    let outcome = classify_outcome(exit_code, &judgment);
    update_outcome(&results_dir, outcome).context("update outcome")?;

    info!(outcome = ?outcome, results_dir = %results_dir.display(), "case run complete");

    Ok(RunOutcome {
        run_id,
        results_dir,
        outcome,
    })
}
