//! Launcher configuration for a case.
//!
//! Applies the case's group and limits to the default `LaunchConfig`.

use anyhow::Result;
use rankline::io::config::LaunchConfig;

use crate::case::CaseFile;

/// Apply case settings to the base launcher config.
pub fn apply_case_config(mut base: LaunchConfig, case: &CaseFile) -> Result<LaunchConfig> {
    base.np = case.group.size;
    if case.limits.timeout_secs.is_some() {
        base.timeout_secs = case.limits.timeout_secs;
    }
    base.env.extend(
        case.env
            .iter()
            .map(|(key, value)| (key.clone(), value.clone())),
    );
    base.validate()?;
    Ok(base)
}
