use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use crate::judge::Judgment;
use crate::outcome::Outcome;
use crate::results::{CHECKS_FILE, META_FILE, read_meta};

#[derive(Debug, Default)]
pub struct ReportSummary {
    pub runs: usize,
    pub success: usize,
    pub fail: usize,
    pub stalled: usize,
    pub error: usize,
    pub avg_duration_secs: Option<f64>,
    pub max_duration_secs: Option<f64>,
    /// Check label to (passed, total).
    pub check_pass_rates: BTreeMap<String, (usize, usize)>,
}

pub fn load_run_dirs(case_results_dir: &Path) -> Result<Vec<PathBuf>> {
    if !case_results_dir.exists() {
        return Ok(Vec::new());
    }
    let mut dirs = Vec::new();
    for entry in fs::read_dir(case_results_dir)
        .with_context(|| format!("read {}", case_results_dir.display()))?
    {
        let entry = entry.context("read entry")?;
        if entry.path().is_dir() {
            dirs.push(entry.path());
        }
    }
    dirs.sort();
    Ok(dirs)
}

/// Summarize every run under a case's results directory.
///
/// Runs with unreadable artifacts are skipped and reported as warnings.
pub fn aggregate(case_results_dir: &Path) -> Result<(ReportSummary, Vec<String>)> {
    let mut summary = ReportSummary::default();
    let mut warnings = Vec::new();

    for run_dir in load_run_dirs(case_results_dir)? {
        let meta = match read_meta(&run_dir.join(META_FILE)) {
            Ok(meta) => meta,
            Err(err) => {
                warnings.push(format!(
                    "skip {}: {META_FILE} invalid ({err:#})",
                    run_dir.display()
                ));
                continue;
            }
        };

        let checks_path = run_dir.join(CHECKS_FILE);
        let judgment: Judgment = match fs::read_to_string(&checks_path)
            .with_context(|| format!("read {}", checks_path.display()))
            .and_then(|contents| serde_json::from_str(&contents).context("parse checks"))
        {
            Ok(judgment) => judgment,
            Err(err) => {
                warnings.push(format!(
                    "skip {}: {CHECKS_FILE} invalid ({err:#})",
                    run_dir.display()
                ));
                continue;
            }
        };

        summary.runs += 1;
        match meta.outcome {
            Some(Outcome::Success) => summary.success += 1,
            Some(Outcome::Fail) => summary.fail += 1,
            Some(Outcome::Stalled) => summary.stalled += 1,
            Some(Outcome::Error) | None => summary.error += 1,
        }

        summary.avg_duration_secs = Some(match summary.avg_duration_secs {
            None => meta.duration_secs,
            Some(avg) => {
                let total = avg * (summary.runs as f64 - 1.0) + meta.duration_secs;
                total / summary.runs as f64
            }
        });
        summary.max_duration_secs = Some(
            summary
                .max_duration_secs
                .map_or(meta.duration_secs, |max| max.max(meta.duration_secs)),
        );

        for check in &judgment.checks {
            let entry = summary.check_pass_rates.entry(check.label()).or_insert((0, 0));
            if check.passed() {
                entry.0 += 1;
            }
            entry.1 += 1;
        }
    }

    Ok((summary, warnings))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::judge::CheckOutcome;
    use crate::results::SoakMeta;
    use tempfile::tempdir;

    fn write_run(dir: &Path, outcome: Outcome, duration: f64, ordered: bool) {
        fs::create_dir_all(dir).expect("run dir");
        let meta = SoakMeta {
            case_id: "case".to_string(),
            run_id: "run".to_string(),
            case_hash: "hash".to_string(),
            rankline_binary: "/bin/rankline".to_string(),
            outcome: Some(outcome),
            start_time: "now".to_string(),
            end_time: "later".to_string(),
            duration_secs: duration,
            exit_code: Some(0),
            capture_timed_out: false,
            transcript_lines: 5,
            transcript_truncated: false,
            errors: Vec::new(),
        };
        let contents = serde_json::to_string_pretty(&meta).expect("meta json");
        fs::write(dir.join(META_FILE), format!("{contents}\n")).expect("write meta");

        let judgment = Judgment {
            checks: vec![
                CheckOutcome::TranscriptOrdered {
                    passed: ordered,
                    violations: Vec::new(),
                },
                CheckOutcome::ExitCode {
                    passed: true,
                    expected: 0,
                    actual: Some(0),
                },
            ],
        };
        let contents = serde_json::to_string_pretty(&judgment).expect("checks json");
        fs::write(dir.join(CHECKS_FILE), format!("{contents}\n")).expect("write checks");
    }

    #[test]
    fn aggregates_runs() {
        let temp = tempdir().expect("tempdir");
        write_run(&temp.path().join("run1"), Outcome::Success, 5.0, true);
        write_run(&temp.path().join("run2"), Outcome::Fail, 15.0, false);

        let (summary, warnings) = aggregate(temp.path()).expect("aggregate");
        assert!(warnings.is_empty());
        assert_eq!(summary.runs, 2);
        assert_eq!(summary.success, 1);
        assert_eq!(summary.fail, 1);
        assert_eq!(summary.avg_duration_secs, Some(10.0));
        assert_eq!(summary.max_duration_secs, Some(15.0));
        assert_eq!(
            summary.check_pass_rates.get("transcript_ordered"),
            Some(&(1, 2))
        );
        assert_eq!(summary.check_pass_rates.get("exit_code(0)"), Some(&(2, 2)));
    }

    #[test]
    fn broken_runs_become_warnings() {
        let temp = tempdir().expect("tempdir");
        write_run(&temp.path().join("run1"), Outcome::Stalled, 3.0, true);
        fs::create_dir_all(temp.path().join("run2")).expect("empty run");

        let (summary, warnings) = aggregate(temp.path()).expect("aggregate");
        assert_eq!(summary.runs, 1);
        assert_eq!(summary.stalled, 1);
        assert_eq!(warnings.len(), 1);
    }

    #[test]
    fn missing_case_dir_is_empty_report() {
        let temp = tempdir().expect("tempdir");
        let (summary, warnings) = aggregate(&temp.path().join("absent")).expect("aggregate");
        assert_eq!(summary.runs, 0);
        assert!(warnings.is_empty());
    }
}
