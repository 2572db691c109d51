use rankline::exit_codes;
use serde::{Deserialize, Serialize};

use crate::judge::Judgment;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    /// Every check passed, whatever the exit code.
    Success,
    /// The group ran to completion but a check failed.
    Fail,
    /// The group stalled when the case did not expect it to.
    Stalled,
    /// The launch itself failed.
    Error,
}

pub fn classify_outcome(launch_exit_code: Option<i32>, judgment: &Judgment) -> Outcome {
    if judgment.all_passed() {
        return Outcome::Success;
    }
    match launch_exit_code {
        Some(exit_codes::STALLED) => Outcome::Stalled,
        Some(exit_codes::OK | exit_codes::PARTICIPANT_FAILED) => Outcome::Fail,
        Some(_) | None => Outcome::Error,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::judge::CheckOutcome;

    fn judgment(pass: bool) -> Judgment {
        Judgment {
            checks: vec![CheckOutcome::TranscriptOrdered {
                passed: pass,
                violations: Vec::new(),
            }],
        }
    }

    #[test]
    fn success_when_checks_pass_even_if_stalled() {
        assert_eq!(classify_outcome(Some(0), &judgment(true)), Outcome::Success);
        assert_eq!(classify_outcome(Some(3), &judgment(true)), Outcome::Success);
    }

    #[test]
    fn fail_when_group_finished_but_checks_fail() {
        assert_eq!(classify_outcome(Some(0), &judgment(false)), Outcome::Fail);
        assert_eq!(classify_outcome(Some(4), &judgment(false)), Outcome::Fail);
    }

    #[test]
    fn stalled_when_watchdog_fired_unexpectedly() {
        assert_eq!(classify_outcome(Some(3), &judgment(false)), Outcome::Stalled);
    }

    #[test]
    fn error_when_launch_failed_or_was_killed() {
        assert_eq!(classify_outcome(Some(1), &judgment(false)), Outcome::Error);
        assert_eq!(classify_outcome(Some(2), &judgment(false)), Outcome::Error);
        assert_eq!(classify_outcome(None, &judgment(false)), Outcome::Error);
    }
}
