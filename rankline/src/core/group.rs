//! Process group contract and formation rules.
//!
//! A group is a fixed set of `size` participants with ranks `0..size`. The
//! group is formed once before any ordering logic runs and dissolved once after
//! it finishes. Formation problems are surfaced as [`FormationError`] so callers
//! can abort before the sequencer starts.

use std::collections::BTreeSet;

use anyhow::Result;
use thiserror::Error;

/// Capability handed to each participant by whoever formed the group.
pub trait ProcessGroup {
    /// This participant's rank, unique within `0..size()`.
    fn rank(&self) -> usize;

    /// Number of participants. Every member observes the same value.
    fn size(&self) -> usize;

    /// Block until every participant has called `synchronize` at the matching point.
    ///
    /// There is no timeout: if one participant never arrives, every other
    /// participant blocks forever. Errors report transport failures only.
    fn synchronize(&self) -> Result<()>;
}

/// Reasons a group could not be established.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FormationError {
    #[error("group size must be at least 1")]
    EmptyGroup,
    #[error("rank {rank} is outside 0..{size}")]
    RankOutOfRange { rank: usize, size: usize },
    #[error("rank {rank} joined more than once")]
    DuplicateRank { rank: usize },
    #[error("rank {rank} reported size {reported}, group size is {expected}")]
    SizeMismatch {
        rank: usize,
        reported: usize,
        expected: usize,
    },
    #[error("missing environment variable {var}")]
    MissingEnv { var: String },
    #[error("invalid value {value:?} for {var}")]
    InvalidEnv { var: String, value: String },
    #[error("rendezvous {addr} unreachable: {reason}")]
    Unreachable { addr: String, reason: String },
    #[error("rendezvous rejected join: {reason}")]
    Rejected { reason: String },
    #[error("failed to spawn rank {rank}: {reason}")]
    Spawn { rank: usize, reason: String },
    #[error("only {joined} of {size} participants joined before the group exited")]
    Incomplete { joined: usize, size: usize },
}

/// Check that `rank` may belong to a group of `size` participants.
pub fn validate_membership(rank: usize, size: usize) -> Result<(), FormationError> {
    if size == 0 {
        return Err(FormationError::EmptyGroup);
    }
    if rank >= size {
        return Err(FormationError::RankOutOfRange { rank, size });
    }
    Ok(())
}

/// Tracks joins while a group is being formed.
///
/// Guarantees the contiguous-rank invariant: once [`Roster::is_complete`]
/// returns true, ranks `0..size` have each joined exactly once.
#[derive(Debug, Clone)]
pub struct Roster {
    size: usize,
    joined: BTreeSet<usize>,
}

impl Roster {
    pub fn new(size: usize) -> Result<Self, FormationError> {
        if size == 0 {
            return Err(FormationError::EmptyGroup);
        }
        Ok(Self {
            size,
            joined: BTreeSet::new(),
        })
    }

    /// Record a join request carrying the participant's view of rank and size.
    pub fn admit(&mut self, rank: usize, reported_size: usize) -> Result<(), FormationError> {
        if reported_size != self.size {
            return Err(FormationError::SizeMismatch {
                rank,
                reported: reported_size,
                expected: self.size,
            });
        }
        validate_membership(rank, self.size)?;
        if !self.joined.insert(rank) {
            return Err(FormationError::DuplicateRank { rank });
        }
        Ok(())
    }

    pub fn joined(&self) -> usize {
        self.joined.len()
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn is_complete(&self) -> bool {
        self.joined.len() == self.size
    }
}
