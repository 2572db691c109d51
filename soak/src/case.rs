//! Case file parsing and validation.
//!
//! A case is a TOML file describing one group launch and the checks its
//! transcript must pass. See `soak/cases/` for examples.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result, anyhow, bail};
use serde::Deserialize;

/// A parsed case file.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct CaseFile {
    pub case: CaseMeta,
    pub group: GroupSpec,
    #[serde(default)]
    pub limits: Limits,
    /// Extra environment for every participant.
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    #[serde(default)]
    pub checks: Vec<Check>,
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct CaseMeta {
    /// Unique identifier (slug format: `[a-z0-9_-]+`).
    pub id: String,
    #[serde(default)]
    pub description: String,
}

/// The group to launch.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct GroupSpec {
    pub size: usize,
    #[serde(default = "default_repeat")]
    pub repeat: usize,
    /// Rank that skips its final barrier.
    pub omit_final_sync: Option<usize>,
}

fn default_repeat() -> usize {
    1
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
pub struct Limits {
    /// Launcher watchdog, in seconds.
    pub timeout_secs: Option<u64>,
}

/// Verification run against a finished launch.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Check {
    /// The transcript is exactly the rank-ordered output.
    TranscriptOrdered,
    /// The launcher exited with `code`.
    ExitCode { code: i32 },
    /// Every rank printed its line once per pass.
    AllRanksEmitted,
}

impl CaseFile {
    /// Load and validate a case file from the given path.
    pub fn load(path: &Path) -> Result<Self> {
        let contents =
            fs::read_to_string(path).with_context(|| format!("read case {}", path.display()))?;
        let case: CaseFile =
            toml::from_str(&contents).with_context(|| format!("parse case {}", path.display()))?;
        case.validate()
            .with_context(|| format!("validate case {}", path.display()))?;
        Ok(case)
    }

    #[cfg(test)]
    pub fn parse_str(contents: &str) -> Result<Self> {
        let case: CaseFile = toml::from_str(contents).context("parse case")?;
        case.validate()?;
        Ok(case)
    }

    fn validate(&self) -> Result<()> {
        validate_case_id(&self.case.id)?;
        if self.group.size == 0 {
            bail!("group.size must be > 0");
        }
        if self.group.repeat == 0 {
            bail!("group.repeat must be > 0");
        }
        if let Some(rank) = self.group.omit_final_sync {
            if rank >= self.group.size {
                bail!(
                    "group.omit_final_sync {rank} is outside 0..{}",
                    self.group.size
                );
            }
            if self.limits.timeout_secs.is_none() {
                bail!("limits.timeout_secs is required when group.omit_final_sync is set");
            }
        }
        if self.limits.timeout_secs == Some(0) {
            bail!("limits.timeout_secs must be > 0");
        }
        if self.checks.is_empty() {
            bail!("checks must be a non-empty array");
        }
        for key in self.env.keys() {
            if key.trim().is_empty() {
                bail!("env key must be non-empty");
            }
        }
        Ok(())
    }
}

/// Discover and load all case files from a directory.
///
/// Returns cases sorted by id. Errors if duplicate ids are found.
pub fn discover_cases(dir: &Path) -> Result<Vec<CaseFile>> {
    if !dir.exists() {
        return Ok(Vec::new());
    }
    let mut cases = Vec::new();
    for entry in fs::read_dir(dir).with_context(|| format!("read cases dir {}", dir.display()))? {
        let entry = entry.context("read case entry")?;
        let path = entry.path();
        if path.extension().and_then(|ext| ext.to_str()) != Some("toml") {
            continue;
        }
        cases.push(CaseFile::load(&path)?);
    }
    cases.sort_by(|left, right| left.case.id.cmp(&right.case.id));
    for pair in cases.windows(2) {
        if pair[0].case.id == pair[1].case.id {
            return Err(anyhow!("duplicate case.id {}", pair[0].case.id));
        }
    }
    Ok(cases)
}

fn validate_case_id(id: &str) -> Result<()> {
    if id.trim().is_empty() {
        bail!("case.id must be non-empty");
    }
    if !id
        .chars()
        .all(|ch| ch.is_ascii_lowercase() || ch.is_ascii_digit() || ch == '-' || ch == '_')
    {
        bail!("case.id must use [a-z0-9_-] only");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_stall_case() {
        let input = r#"
[case]
id = "omitted-barrier"

[group]
size = 3
omit_final_sync = 1

[limits]
timeout_secs = 3

[[checks]]
type = "exit_code"
code = 3

[[checks]]
type = "transcript_ordered"
"#;
        let case = CaseFile::parse_str(input).expect("case parses");
        assert_eq!(case.group.repeat, 1);
        assert_eq!(case.group.omit_final_sync, Some(1));
        assert_eq!(
            case.checks,
            vec![Check::ExitCode { code: 3 }, Check::TranscriptOrdered]
        );
    }

    #[test]
    fn rejects_invalid_id() {
        let input = r#"
[case]
id = "bad/id"

[group]
size = 2

[[checks]]
type = "transcript_ordered"
"#;
        let err = CaseFile::parse_str(input).expect_err("invalid id");
        assert!(err.to_string().contains("case.id"));
    }

    #[test]
    fn stall_without_watchdog_is_rejected() {
        let input = r#"
[case]
id = "hang"

[group]
size = 2
omit_final_sync = 0

[[checks]]
type = "all_ranks_emitted"
"#;
        let err = CaseFile::parse_str(input).expect_err("missing watchdog");
        assert!(err.to_string().contains("timeout_secs"));
    }

    #[test]
    fn rejects_omitted_rank_outside_group() {
        let input = r#"
[case]
id = "outside"

[group]
size = 2
omit_final_sync = 2

[limits]
timeout_secs = 1

[[checks]]
type = "all_ranks_emitted"
"#;
        let _err = CaseFile::parse_str(input).expect_err("rank outside group");
    }

    #[test]
    fn shipped_cases_load() {
        let dir = Path::new(env!("CARGO_MANIFEST_DIR")).join("cases");
        let cases = discover_cases(&dir).expect("discover");
        let ids: Vec<&str> = cases.iter().map(|case| case.case.id.as_str()).collect();
        assert_eq!(
            ids,
            vec!["omitted-barrier", "repeat-eight", "scenario-a", "scenario-b"]
        );
    }
}
