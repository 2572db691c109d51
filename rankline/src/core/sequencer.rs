//! Barrier sequencer: turns `size` unordered participants into one rank-ordered stream.
//!
//! Every participant runs the same loop. In round `k` only rank `k` emits its
//! line, then everyone meets at the barrier. Nobody can enter round `k + 1`
//! before round `k`'s barrier opens, so lines appear strictly in rank order
//! without any participant observing another except through the barrier.
//!
//! The ordering holds for *visible* output only if each line is flushed before
//! the following barrier. [`LineSink::emit_line`] carries that contract.

use anyhow::{Context, Result};
use tracing::{debug, instrument, warn};

use crate::core::group::{ProcessGroup, validate_membership};
use crate::core::script::RankScript;

/// Destination for a participant's lines.
///
/// Contract: when `emit_line` returns `Ok`, the line is externally visible
/// (written and flushed). A sink that buffers past that point weakens the
/// ordering guarantee from "action order" to "intended order".
pub trait LineSink {
    fn emit_line(&mut self, line: &str) -> Result<()>;
}

impl<S: LineSink + ?Sized> LineSink for &mut S {
    fn emit_line(&mut self, line: &str) -> Result<()> {
        (**self).emit_line(line)
    }
}

/// Per-participant round counter.
///
/// Starts at target 0 and only moves forward; terminal once the target
/// reaches `size`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SequencerState {
    current_target: usize,
    size: usize,
}

impl SequencerState {
    pub fn new(size: usize) -> Self {
        Self {
            current_target: 0,
            size,
        }
    }

    /// Rank allowed to act in the current round.
    pub fn current_target(&self) -> usize {
        self.current_target
    }

    pub fn is_terminal(&self) -> bool {
        self.current_target >= self.size
    }

    pub fn is_final_round(&self) -> bool {
        self.current_target + 1 == self.size
    }

    /// Whether `rank` performs its action in the current round.
    pub fn acts(&self, rank: usize) -> bool {
        !self.is_terminal() && rank == self.current_target
    }

    pub fn advance(&mut self) {
        if !self.is_terminal() {
            self.current_target += 1;
        }
    }
}

/// Knobs for a sequencer pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SequencerOptions {
    /// Fault injection: skip the final `synchronize` call. Every other
    /// participant then blocks at its last barrier indefinitely.
    pub omit_final_sync: bool,
}

/// What one participant did during one pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SequenceReport {
    pub rank: usize,
    pub size: usize,
    pub lines_emitted: usize,
    pub barriers_passed: usize,
}

/// Drives one participant through the ordering rounds.
pub struct BarrierSequencer<'g, G: ProcessGroup + ?Sized> {
    group: &'g G,
    options: SequencerOptions,
}

impl<'g, G: ProcessGroup + ?Sized> BarrierSequencer<'g, G> {
    pub fn new(group: &'g G) -> Self {
        Self {
            group,
            options: SequencerOptions::default(),
        }
    }

    pub fn with_options(mut self, options: SequencerOptions) -> Self {
        self.options = options;
        self
    }

    /// Run one full pass: optional leader line, then `size` rounds.
    ///
    /// Fails before the first round if the group's rank/size are inconsistent.
    #[instrument(skip_all, fields(rank = self.group.rank(), size = self.group.size()))]
    pub fn run<S, K>(&self, script: &S, sink: &mut K) -> Result<SequenceReport>
    where
        S: RankScript + ?Sized,
        K: LineSink + ?Sized,
    {
        let rank = self.group.rank();
        let size = self.group.size();
        validate_membership(rank, size)?;

        let mut lines_emitted = 0usize;
        let mut barriers_passed = 0usize;

        if rank == 0
            && let Some(line) = script.leader_line(size)
        {
            sink.emit_line(&line).context("emit leader line")?;
            lines_emitted += 1;
        }

        let mut state = SequencerState::new(size);
        while !state.is_terminal() {
            let round = state.current_target();
            if state.acts(rank) {
                debug!(round, "emitting rank line");
                sink.emit_line(&script.rank_line(rank))
                    .with_context(|| format!("emit line for round {round}"))?;
                lines_emitted += 1;
            }

            if self.options.omit_final_sync && state.is_final_round() {
                warn!(round, "skipping final barrier (fault injection)");
            } else {
                self.group
                    .synchronize()
                    .with_context(|| format!("barrier for round {round}"))?;
                barriers_passed += 1;
            }
            state.advance();
        }

        debug!(lines_emitted, barriers_passed, "sequence complete");
        Ok(SequenceReport {
            rank,
            size,
            lines_emitted,
            barriers_passed,
        })
    }
}
