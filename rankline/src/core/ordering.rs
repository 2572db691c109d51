//! Transcript verification for rank-ordered runs.
//!
//! A transcript is the merged stream of lines as an outside observer saw them.
//! A correct run of `repeat` passes over `size` ranks reads, per pass, the
//! optional leader line followed by the rank lines in ascending rank order.

use std::sync::LazyLock;

use regex::Regex;

use crate::core::script::RankScript;

static RANK_LINE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^Rank (\d+)$").expect("valid rank regex"));
static SIZE_LINE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^size (\d+)$").expect("valid size regex"));

/// Missing lines listed by name before the rest are only counted.
const MISSING_SHOWN: usize = 8;

/// Line sequence a correct run must produce.
pub fn expected_transcript<S: RankScript + ?Sized>(
    size: usize,
    repeat: usize,
    script: &S,
) -> Vec<String> {
    expected_lines(size, repeat, script).collect()
}

/// Lazy form of [`expected_transcript`]; nothing is allocated up front.
pub fn expected_lines<S: RankScript + ?Sized>(
    size: usize,
    repeat: usize,
    script: &S,
) -> impl Iterator<Item = String> + '_ {
    (0..repeat).flat_map(move |_| {
        script
            .leader_line(size)
            .into_iter()
            .chain((0..size).map(move |rank| script.rank_line(rank)))
    })
}

/// Number of lines a correct run produces, or `None` if it overflows `usize`.
pub fn expected_len<S: RankScript + ?Sized>(
    size: usize,
    repeat: usize,
    script: &S,
) -> Option<usize> {
    let leader = usize::from(script.leader_line(size).is_some());
    size.checked_add(leader)?.checked_mul(repeat)
}

/// Rank numbers of every `Rank <n>` line, in observed order.
pub fn rank_sequence<L: AsRef<str>>(lines: &[L]) -> Vec<usize> {
    lines
        .iter()
        .filter_map(|line| parse_rank(line.as_ref()))
        .collect()
}

/// Compare a transcript with the expected sequence.
///
/// Returns human-readable violations; empty means the transcript is exactly
/// what a correctly ordered run produces. Trailing carriage returns are ignored.
/// The expected lines are generated one at a time, so a huge `size` or
/// `repeat` costs no more than the observed transcript.
pub fn verify_transcript<L, S>(lines: &[L], size: usize, repeat: usize, script: &S) -> Vec<String>
where
    L: AsRef<str>,
    S: RankScript + ?Sized,
{
    let observed: Vec<&str> = lines
        .iter()
        .map(|line| line.as_ref().trim_end_matches('\r'))
        .collect();
    let mut expected = expected_lines(size, repeat, script);
    let mut errors = Vec::new();
    let mut mismatched = false;

    for (index, got) in observed.iter().enumerate() {
        let Some(want) = expected.next() else {
            let extra = &observed[index..];
            errors.push(format!(
                "{} unexpected trailing lines: {}",
                extra.len(),
                extra.join(", ")
            ));
            break;
        };
        if !mismatched && want.as_str() != *got {
            errors.push(describe_mismatch(index + 1, &want, got));
            mismatched = true;
        }
    }

    let shown: Vec<String> = expected.by_ref().take(MISSING_SHOWN).collect();
    if !shown.is_empty() {
        let rest = match expected_len(size, repeat, script) {
            Some(total) => {
                let unshown = total.saturating_sub(observed.len() + shown.len());
                (unshown > 0).then(|| format!(" and {unshown} more"))
            }
            None => Some(" and more than fit in a usize".to_string()),
        };
        errors.push(format!(
            "transcript ended after {} lines; missing {}{}",
            observed.len(),
            shown.join(", "),
            rest.unwrap_or_default()
        ));
    }

    errors.extend(out_of_order_ranks(&observed));
    errors
}

fn describe_mismatch(line_no: usize, want: &str, got: &str) -> String {
    match (parse_rank(want), parse_rank(got)) {
        (Some(w), Some(g)) if g > w => format!(
            "line {line_no}: rank {g} emitted before rank {w} (expected `{want}`, found `{got}`)"
        ),
        _ if SIZE_LINE.is_match(got) && !SIZE_LINE.is_match(want) => {
            format!("line {line_no}: leader line `{got}` where `{want}` was expected")
        }
        _ => format!("line {line_no}: expected `{want}`, found `{got}`"),
    }
}

/// Report every adjacent pair of rank lines that goes backwards within a pass.
///
/// A drop back to rank 0 starts a new pass and is not a violation.
fn out_of_order_ranks(lines: &[&str]) -> Vec<String> {
    let ranks = rank_sequence(lines);
    ranks
        .windows(2)
        .filter(|pair| pair[1] != 0 && pair[1] <= pair[0])
        .map(|pair| format!("rank {} followed rank {}", pair[1], pair[0]))
        .collect()
}

fn parse_rank(line: &str) -> Option<usize> {
    RANK_LINE
        .captures(line.trim_end_matches('\r'))
        .and_then(|caps| caps.get(1))
        .and_then(|m| m.as_str().parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::script::{HelloScript, RanksOnly};

    #[test]
    fn expected_transcript_for_four_ranks() {
        assert_eq!(
            expected_transcript(4, 1, &HelloScript),
            vec!["size 4", "Rank 0", "Rank 1", "Rank 2", "Rank 3"]
        );
    }

    #[test]
    fn expected_transcript_repeats_leader_per_pass() {
        assert_eq!(
            expected_transcript(2, 2, &HelloScript),
            vec!["size 2", "Rank 0", "Rank 1", "size 2", "Rank 0", "Rank 1"]
        );
        assert_eq!(expected_transcript(1, 1, &RanksOnly), vec!["Rank 0"]);
    }

    #[test]
    fn accepts_exact_transcript_with_crlf() {
        let lines = ["size 2\r", "Rank 0\r", "Rank 1"];
        assert!(verify_transcript(&lines, 2, 1, &HelloScript).is_empty());
    }

    #[test]
    fn reports_rank_race() {
        let lines = ["size 3", "Rank 0", "Rank 2", "Rank 1"];
        let errors = verify_transcript(&lines, 3, 1, &HelloScript);
        assert!(
            errors
                .iter()
                .any(|err| err.contains("rank 2 emitted before rank 1")),
            "{errors:?}"
        );
        assert!(errors.iter().any(|err| err == "rank 1 followed rank 2"));
    }

    #[test]
    fn reports_missing_and_extra_lines() {
        let short = verify_transcript(&["size 3", "Rank 0"], 3, 1, &HelloScript);
        assert_eq!(
            short,
            vec!["transcript ended after 2 lines; missing Rank 1, Rank 2"]
        );

        let long = verify_transcript(&["Rank 0", "Rank 0"], 1, 1, &RanksOnly);
        assert_eq!(long, vec!["1 unexpected trailing lines: Rank 0"]);
    }

    #[test]
    fn huge_groups_are_reported_without_materializing() {
        let errors = verify_transcript(&["size 3", "Rank 0"], usize::MAX, 1, &HelloScript);
        assert!(
            errors[0].starts_with("line 1: expected `size 18446744073709551615`"),
            "{errors:?}"
        );
        assert!(
            errors[1].ends_with("and more than fit in a usize"),
            "{errors:?}"
        );

        let errors = verify_transcript(&["size 3"], 1_000_000_000_000, 1, &HelloScript);
        assert_eq!(
            errors.last().map(String::as_str),
            Some(
                "transcript ended after 1 lines; missing Rank 0, Rank 1, Rank 2, Rank 3, \
                 Rank 4, Rank 5, Rank 6, Rank 7 and 999999999992 more"
            )
        );
        assert_eq!(expected_len(usize::MAX, 1, &HelloScript), None);
        assert_eq!(expected_len(3, 2, &HelloScript), Some(8));
    }

    #[test]
    fn rank_sequence_skips_other_lines() {
        let lines = ["size 2", "Rank 0", "noise", "Rank 1"];
        assert_eq!(rank_sequence(&lines), vec![0, 1]);
    }
}
