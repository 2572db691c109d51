//! Collective rank-ordered output over a barrier-synchronized process group.
//!
//! Every participant of a group of `size` members prints one line, and an
//! observer of the merged output sees them in ascending rank order. Ordering
//! comes only from barriers: in round `k` the participant with rank `k` writes
//! and then everyone synchronizes.
//!
//! - **[`core`]**: Pure logic. The [`core::group::ProcessGroup`] capability, the
//!   barrier sequencer, scripts, and transcript verification.
//! - **[`io`]**: Transports (thread group, rendezvous hub and socket members),
//!   the launcher that forms and dissolves process groups, config, and sinks.

pub mod core;
pub mod exit_codes;
pub mod io;
pub mod logging;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
