//! Check execution and outcome recording.
//!
//! Judges a finished launch by its transcript and exit code.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use rankline::core::ordering::{rank_sequence, verify_transcript};
use rankline::core::script::HelloScript;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use crate::case::{Check, GroupSpec};

/// Collected check outcomes for a run.
#[derive(Debug, Serialize, Deserialize)]
pub struct Judgment {
    pub checks: Vec<CheckOutcome>,
}

/// Result of running a single check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CheckOutcome {
    TranscriptOrdered {
        passed: bool,
        violations: Vec<String>,
    },
    ExitCode {
        passed: bool,
        expected: i32,
        actual: Option<i32>,
    },
    AllRanksEmitted {
        passed: bool,
        /// Ranks that printed fewer lines than passes.
        missing: Vec<usize>,
    },
}

impl CheckOutcome {
    pub fn passed(&self) -> bool {
        match self {
            CheckOutcome::TranscriptOrdered { passed, .. }
            | CheckOutcome::ExitCode { passed, .. }
            | CheckOutcome::AllRanksEmitted { passed, .. } => *passed,
        }
    }

    /// Stable label used to aggregate pass rates across runs.
    pub fn label(&self) -> String {
        match self {
            CheckOutcome::TranscriptOrdered { .. } => "transcript_ordered".to_string(),
            CheckOutcome::ExitCode { expected, .. } => format!("exit_code({expected})"),
            CheckOutcome::AllRanksEmitted { .. } => "all_ranks_emitted".to_string(),
        }
    }
}

impl Judgment {
    pub fn all_passed(&self) -> bool {
        self.checks.iter().all(CheckOutcome::passed)
    }
}

/// Run all checks against a captured transcript.
#[instrument(skip_all, fields(check_count = checks.len(), size = group.size))]
pub fn run_checks(
    checks: &[Check],
    group: &GroupSpec,
    transcript: &[String],
    exit_code: Option<i32>,
) -> Judgment {
    let outcomes = checks
        .iter()
        .map(|check| {
            let outcome = match check {
                Check::TranscriptOrdered => {
                    let violations =
                        verify_transcript(transcript, group.size, group.repeat, &HelloScript);
                    CheckOutcome::TranscriptOrdered {
                        passed: violations.is_empty(),
                        violations,
                    }
                }
                Check::ExitCode { code } => CheckOutcome::ExitCode {
                    passed: exit_code == Some(*code),
                    expected: *code,
                    actual: exit_code,
                },
                Check::AllRanksEmitted => {
                    let missing = missing_ranks(transcript, group);
                    CheckOutcome::AllRanksEmitted {
                        passed: missing.is_empty(),
                        missing,
                    }
                }
            };
            debug!(check = %outcome.label(), passed = outcome.passed(), "check result");
            outcome
        })
        .collect();
    Judgment { checks: outcomes }
}

fn missing_ranks(transcript: &[String], group: &GroupSpec) -> Vec<usize> {
    let mut counts = vec![0usize; group.size];
    for rank in rank_sequence(transcript) {
        if let Some(count) = counts.get_mut(rank) {
            *count += 1;
        }
    }
    counts
        .iter()
        .enumerate()
        .filter(|(_, count)| **count < group.repeat)
        .map(|(rank, _)| rank)
        .collect()
}

pub fn write_judgment(path: &Path, judgment: &Judgment) -> Result<()> {
    let contents = serde_json::to_string_pretty(judgment).context("serialize checks")?;
    fs::write(path, format!("{contents}\n"))
        .with_context(|| format!("write {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn group(size: usize, repeat: usize) -> GroupSpec {
        GroupSpec {
            size,
            repeat,
            omit_final_sync: None,
        }
    }

    fn lines(raw: &[&str]) -> Vec<String> {
        raw.iter().map(|line| line.to_string()).collect()
    }

    #[test]
    fn ordered_transcript_passes_every_check() {
        let transcript = lines(&["size 3", "Rank 0", "Rank 1", "Rank 2"]);
        let checks = vec![
            Check::TranscriptOrdered,
            Check::ExitCode { code: 0 },
            Check::AllRanksEmitted,
        ];
        let judgment = run_checks(&checks, &group(3, 1), &transcript, Some(0));
        assert!(judgment.all_passed(), "{judgment:?}");
    }

    #[test]
    fn swapped_ranks_fail_ordering_but_not_emission() {
        let transcript = lines(&["size 3", "Rank 0", "Rank 2", "Rank 1"]);
        let checks = vec![Check::TranscriptOrdered, Check::AllRanksEmitted];
        let judgment = run_checks(&checks, &group(3, 1), &transcript, Some(0));
        assert!(!judgment.checks[0].passed());
        assert!(judgment.checks[1].passed());
    }

    #[test]
    fn missing_rank_is_named() {
        let transcript = lines(&["size 2", "Rank 0", "Rank 1", "size 2", "Rank 0"]);
        let judgment = run_checks(&[Check::AllRanksEmitted], &group(2, 2), &transcript, None);
        assert_eq!(
            judgment.checks[0],
            CheckOutcome::AllRanksEmitted {
                passed: false,
                missing: vec![1],
            }
        );
    }

    #[test]
    fn exit_code_check_records_actual_code() {
        let judgment = run_checks(&[Check::ExitCode { code: 3 }], &group(1, 1), &[], None);
        assert_eq!(
            judgment.checks[0],
            CheckOutcome::ExitCode {
                passed: false,
                expected: 3,
                actual: None,
            }
        );
        assert_eq!(judgment.checks[0].label(), "exit_code(3)");
    }

    #[test]
    fn judgment_is_written_as_tagged_json() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("checks.json");
        let transcript = lines(&["size 1", "Rank 0"]);
        let judgment = run_checks(&[Check::TranscriptOrdered], &group(1, 1), &transcript, Some(0));
        write_judgment(&path, &judgment).expect("write");

        let raw = fs::read_to_string(&path).expect("read");
        let value: serde_json::Value = serde_json::from_str(&raw).expect("json");
        assert_eq!(value["checks"][0]["type"], "transcript_ordered");
        assert_eq!(value["checks"][0]["passed"], true);
    }
}
