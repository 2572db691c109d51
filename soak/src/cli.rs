//! CLI command implementations.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use tracing::{debug, info};

use crate::case::{CaseFile, discover_cases};
use crate::report::aggregate;
use crate::run::run_case;

fn cases_dir(repo_root: &Path) -> PathBuf {
    repo_root.join("soak").join("cases")
}

fn case_results_dir(repo_root: &Path, case_id: &str) -> PathBuf {
    repo_root.join("soak").join("results").join(case_id)
}

/// List all available cases.
pub fn list_cases(repo_root: &Path) -> Result<()> {
    for case in discover_cases(&cases_dir(repo_root))? {
        println!(
            "{} size={} repeat={} {}",
            case.case.id, case.group.size, case.group.repeat, case.case.description
        );
    }
    Ok(())
}

/// Run a case by id (optionally multiple times).
pub fn run_case_by_id(repo_root: &Path, case_id: &str, runs: u32) -> Result<()> {
    let case_path = cases_dir(repo_root).join(format!("{case_id}.toml"));
    if !case_path.exists() {
        bail!("case {} not found at {}", case_id, case_path.display());
    }
    let case = CaseFile::load(&case_path).context("load case")?;
    if case.case.id != case_id {
        bail!("case file {} declares id {}", case_path.display(), case.case.id);
    }
    debug!(case_id, runs, "case loaded");

    info!(case_id, runs, "starting runs");
    for run_num in 1..=runs {
        debug!(case_id, run_num, runs, "starting run");
        let outcome = run_case(repo_root, &case_path, &case).context("run case")?;
        println!(
            "run: case={} run_id={} outcome={:?} results={}",
            case_id,
            outcome.run_id,
            outcome.outcome,
            outcome.results_dir.display()
        );
    }
    Ok(())
}

/// Show aggregated results for a case.
pub fn report_case(repo_root: &Path, case_id: &str) -> Result<()> {
    let (summary, warnings) = aggregate(&case_results_dir(repo_root, case_id))?;
    println!("report: case={} runs={}", case_id, summary.runs);
    println!(
        "report: success={} fail={} stalled={} error={}",
        summary.success, summary.fail, summary.stalled, summary.error
    );
    if let (Some(avg), Some(max)) = (summary.avg_duration_secs, summary.max_duration_secs) {
        println!("report: avg_duration_secs={avg:.2} max_duration_secs={max:.2}");
    }
    for (label, (passed, total)) in summary.check_pass_rates {
        println!("report: check {label} {passed}/{total}");
    }
    for warning in warnings {
        eprintln!("warning: {warning}");
    }
    Ok(())
}

/// Remove results for a case.
pub fn clean_case(repo_root: &Path, case_id: &str) -> Result<()> {
    let case_results = case_results_dir(repo_root, case_id);
    if case_results.exists() {
        std::fs::remove_dir_all(&case_results)
            .with_context(|| format!("remove {}", case_results.display()))?;
    }
    println!("clean: case={} results={}", case_id, case_results.display());
    Ok(())
}
