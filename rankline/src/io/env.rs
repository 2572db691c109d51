//! Environment contract between the launcher and its participants.
//!
//! The launcher sets three variables on every child. A process started
//! without any of them runs as a singleton group.

use std::net::SocketAddr;
use std::process::Command;

use serde::Serialize;

use crate::core::group::{FormationError, validate_membership};

pub const VAR_PREFIX: &str = "RANKLINE_";
pub const RANK_VAR: &str = "RANKLINE_RANK";
pub const SIZE_VAR: &str = "RANKLINE_SIZE";
pub const RENDEZVOUS_VAR: &str = "RANKLINE_RENDEZVOUS";

/// A participant's assignment as handed out by the launcher.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GroupEnv {
    pub rank: usize,
    pub size: usize,
    pub rendezvous: SocketAddr,
}

impl GroupEnv {
    /// Read the assignment from the process environment.
    ///
    /// `Ok(None)` when none of the variables are set.
    pub fn from_env() -> Result<Option<Self>, FormationError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Read the assignment through `lookup`, which maps a variable name to its value.
    pub fn from_lookup<F>(lookup: F) -> Result<Option<Self>, FormationError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let rank = lookup(RANK_VAR);
        let size = lookup(SIZE_VAR);
        let rendezvous = lookup(RENDEZVOUS_VAR);
        if rank.is_none() && size.is_none() && rendezvous.is_none() {
            return Ok(None);
        }

        let rank: usize = parse_var(RANK_VAR, rank)?;
        let size: usize = parse_var(SIZE_VAR, size)?;
        let rendezvous: SocketAddr = parse_var(RENDEZVOUS_VAR, rendezvous)?;
        validate_membership(rank, size)?;
        Ok(Some(Self {
            rank,
            size,
            rendezvous,
        }))
    }

    /// Set the contract variables on a child command.
    pub fn apply(&self, cmd: &mut Command) {
        cmd.env(RANK_VAR, self.rank.to_string())
            .env(SIZE_VAR, self.size.to_string())
            .env(RENDEZVOUS_VAR, self.rendezvous.to_string());
    }
}

fn parse_var<T: std::str::FromStr>(var: &str, value: Option<String>) -> Result<T, FormationError> {
    let value = value.ok_or_else(|| FormationError::MissingEnv {
        var: var.to_string(),
    })?;
    value.trim().parse().map_err(|_| FormationError::InvalidEnv {
        var: var.to_string(),
        value,
    })
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |var| map.get(var).cloned()
    }

    #[test]
    fn no_variables_means_singleton() {
        assert_eq!(GroupEnv::from_lookup(lookup(&[])), Ok(None));
    }

    #[test]
    fn parses_full_assignment() {
        let env = GroupEnv::from_lookup(lookup(&[
            (RANK_VAR, "2"),
            (SIZE_VAR, "4"),
            (RENDEZVOUS_VAR, "127.0.0.1:4000"),
        ]))
        .expect("parse")
        .expect("assignment");
        assert_eq!(env.rank, 2);
        assert_eq!(env.size, 4);
        assert_eq!(env.rendezvous.port(), 4000);
    }

    #[test]
    fn partial_assignment_is_a_formation_failure() {
        let err = GroupEnv::from_lookup(lookup(&[(RANK_VAR, "0")])).unwrap_err();
        assert_eq!(
            err,
            FormationError::MissingEnv {
                var: SIZE_VAR.to_string()
            }
        );
    }

    #[test]
    fn rejects_unparsable_and_out_of_range_values() {
        let err = GroupEnv::from_lookup(lookup(&[
            (RANK_VAR, "one"),
            (SIZE_VAR, "4"),
            (RENDEZVOUS_VAR, "127.0.0.1:4000"),
        ]))
        .unwrap_err();
        assert!(matches!(err, FormationError::InvalidEnv { .. }));

        let err = GroupEnv::from_lookup(lookup(&[
            (RANK_VAR, "4"),
            (SIZE_VAR, "4"),
            (RENDEZVOUS_VAR, "127.0.0.1:4000"),
        ]))
        .unwrap_err();
        assert_eq!(err, FormationError::RankOutOfRange { rank: 4, size: 4 });
    }
}
