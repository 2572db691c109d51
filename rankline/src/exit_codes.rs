//! Stable exit codes for rankline commands.

/// Command succeeded; for `launch`, every participant exited 0.
pub const OK: i32 = 0;
/// Invalid usage or config, or any error without a more specific code.
pub const INVALID: i32 = 1;
/// The group could not be formed (bad environment, rejected join, spawn failure).
pub const FORMATION: i32 = 2;
/// The group stalled: the watchdog fired or participants left mid-barrier.
pub const STALLED: i32 = 3;
/// At least one participant exited unsuccessfully.
pub const PARTICIPANT_FAILED: i32 = 4;
/// `verify` found the transcript out of order.
pub const UNORDERED: i32 = 5;
