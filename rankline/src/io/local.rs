//! In-process group of cooperating threads.
//!
//! Stands in for a real multi-process group in tests and in `rankline demo`.
//! Members share a [`CountingBarrier`] that also reports how many members are
//! parked, which lets tests observe a stalled group instead of hanging on it.

use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::thread;

use anyhow::{Result, anyhow};
use tracing::{debug, instrument};

use crate::core::group::{FormationError, ProcessGroup};
use crate::core::script::RankScript;
use crate::core::sequencer::BarrierSequencer;
use crate::io::sink::SharedTranscript;

#[derive(Debug, Default)]
struct BarrierState {
    arrived: usize,
    generation: u64,
}

/// Reusable barrier for a fixed number of parties.
///
/// A generation counter separates consecutive rounds so a fast member cannot
/// slip through the next round's barrier on a stale wakeup.
#[derive(Debug)]
pub struct CountingBarrier {
    parties: usize,
    state: Mutex<BarrierState>,
    released: Condvar,
}

impl CountingBarrier {
    pub fn new(parties: usize) -> Result<Self, FormationError> {
        if parties == 0 {
            return Err(FormationError::EmptyGroup);
        }
        Ok(Self {
            parties,
            state: Mutex::new(BarrierState::default()),
            released: Condvar::new(),
        })
    }

    /// Block until all parties have called `wait` for the current generation.
    pub fn wait(&self) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        let generation = state.generation;
        state.arrived += 1;
        if state.arrived == self.parties {
            state.arrived = 0;
            state.generation += 1;
            self.released.notify_all();
            return;
        }
        while state.generation == generation {
            state = self
                .released
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// Number of parties currently parked in `wait`.
    pub fn waiting(&self) -> usize {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .arrived
    }

    /// Number of barriers that have opened so far.
    pub fn generation(&self) -> u64 {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .generation
    }
}

/// One member of a [`LocalGroup`]; moved into the member's thread.
#[derive(Debug, Clone)]
pub struct LocalMember {
    rank: usize,
    size: usize,
    barrier: Arc<CountingBarrier>,
}

impl ProcessGroup for LocalMember {
    fn rank(&self) -> usize {
        self.rank
    }

    fn size(&self) -> usize {
        self.size
    }

    fn synchronize(&self) -> Result<()> {
        self.barrier.wait();
        Ok(())
    }
}

/// A formed group of `size` in-process members.
#[derive(Debug)]
pub struct LocalGroup {
    barrier: Arc<CountingBarrier>,
    members: Vec<LocalMember>,
}

impl LocalGroup {
    pub fn form(size: usize) -> Result<Self, FormationError> {
        let barrier = Arc::new(CountingBarrier::new(size)?);
        let members = (0..size)
            .map(|rank| LocalMember {
                rank,
                size,
                barrier: Arc::clone(&barrier),
            })
            .collect();
        Ok(Self { barrier, members })
    }

    /// Group of one; its barrier opens immediately.
    pub fn solo() -> LocalMember {
        LocalMember {
            rank: 0,
            size: 1,
            barrier: Arc::new(CountingBarrier {
                parties: 1,
                state: Mutex::new(BarrierState::default()),
                released: Condvar::new(),
            }),
        }
    }

    pub fn barrier(&self) -> Arc<CountingBarrier> {
        Arc::clone(&self.barrier)
    }

    pub fn into_members(self) -> Vec<LocalMember> {
        self.members
    }
}

/// Run `repeat` ordering passes on a thread group and return the merged transcript.
#[instrument(skip(script))]
pub fn run_local<S>(size: usize, repeat: usize, script: &S) -> Result<Vec<String>>
where
    S: RankScript + Sync + ?Sized,
{
    let group = LocalGroup::form(size)?;
    let transcript = SharedTranscript::new();

    thread::scope(|scope| -> Result<()> {
        let handles: Vec<_> = group
            .into_members()
            .into_iter()
            .map(|member| {
                let mut sink = transcript.clone();
                scope.spawn(move || -> Result<()> {
                    for _ in 0..repeat {
                        BarrierSequencer::new(&member).run(script, &mut sink)?;
                    }
                    debug!(rank = member.rank, "member finished");
                    Ok(())
                })
            })
            .collect();

        for handle in handles {
            handle
                .join()
                .map_err(|_| anyhow!("group member panicked"))??;
        }
        Ok(())
    })?;

    transcript.lines()
}
