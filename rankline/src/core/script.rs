//! Output scripts: what each rank says when its turn comes.

/// Lines produced by the participants of one ordering pass.
pub trait RankScript {
    /// Line emitted once by rank 0 before the first round, if any.
    fn leader_line(&self, _size: usize) -> Option<String> {
        None
    }

    /// Line emitted by `rank` during its round.
    fn rank_line(&self, rank: usize) -> String;
}

/// Reference script: rank 0 reports the group size, then every rank greets.
///
/// For four participants the merged stream reads `size 4`, `Rank 0` … `Rank 3`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HelloScript;

impl RankScript for HelloScript {
    fn leader_line(&self, size: usize) -> Option<String> {
        Some(format!("size {size}"))
    }

    fn rank_line(&self, rank: usize) -> String {
        format!("Rank {rank}")
    }
}

/// Script without a leader action; only the per-rank lines are emitted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RanksOnly;

impl RankScript for RanksOnly {
    fn rank_line(&self, rank: usize) -> String {
        HelloScript.rank_line(rank)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hello_script_lines() {
        assert_eq!(HelloScript.leader_line(4).as_deref(), Some("size 4"));
        assert_eq!(HelloScript.rank_line(2), "Rank 2");
    }

    #[test]
    fn ranks_only_has_no_leader_line() {
        assert_eq!(RanksOnly.leader_line(4), None);
        assert_eq!(RanksOnly.rank_line(0), "Rank 0");
    }
}
