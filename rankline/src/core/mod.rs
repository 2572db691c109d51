//! Deterministic, transport-free logic for rank-ordered output.
//!
//! Core modules must be free of I/O side effects beyond the [`group::ProcessGroup`]
//! and [`sequencer::LineSink`] seams. They operate on in-memory data and return
//! deterministic outputs suitable for tests.

pub mod group;
pub mod ordering;
pub mod script;
pub mod sequencer;
