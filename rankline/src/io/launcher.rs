//! Group formation and dissolution for OS processes.
//!
//! `launch` binds a rendezvous hub, spawns one child per rank with the
//! [`GroupEnv`] variables set, waits for every child, and tears the hub down.
//! Children inherit the launcher's stdout and stderr, so a line a participant
//! flushes is visible in the shared stream before its next barrier.

use std::collections::BTreeMap;
use std::process::{Child, Command, Stdio};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result, anyhow, bail};
use serde::Serialize;
use tracing::{debug, error, info, instrument, warn};

use crate::core::group::FormationError;
use crate::io::config::LaunchConfig;
use crate::io::env::GroupEnv;
use crate::io::hub::{HubReport, RendezvousHub};

const WAIT_POLL: Duration = Duration::from_millis(10);

/// Parameters for one launch.
#[derive(Debug, Clone)]
pub struct LaunchRequest {
    /// Number of participants.
    pub size: usize,
    /// Program and arguments run once per rank.
    pub program: Vec<String>,
    /// Watchdog: kill participants still running after this long.
    pub timeout: Option<Duration>,
    /// Address the rendezvous hub binds.
    pub bind_addr: String,
    /// Extra environment for every participant.
    pub env: BTreeMap<String, String>,
}

impl LaunchRequest {
    pub fn from_config(cfg: &LaunchConfig, program: Vec<String>) -> Self {
        Self {
            size: cfg.np,
            program,
            timeout: cfg.timeout(),
            bind_addr: cfg.bind_addr.clone(),
            env: cfg.env.clone(),
        }
    }
}

/// What happened to the group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LaunchOutcome {
    pub size: usize,
    /// Exit code per rank; `None` when killed or terminated by a signal.
    pub exit_codes: Vec<Option<i32>>,
    /// Whether the watchdog fired.
    pub timed_out: bool,
    /// Ranks the watchdog found still running (and killed).
    pub still_running: Vec<usize>,
    pub hub: HubReport,
}

impl LaunchOutcome {
    pub fn is_stalled(&self) -> bool {
        self.timed_out || matches!(self.hub, HubReport::Stalled { .. })
    }

    /// Ranks that exited on their own with a non-zero code.
    pub fn failed_ranks(&self) -> Vec<usize> {
        self.exit_codes
            .iter()
            .enumerate()
            .filter(|(rank, code)| !self.still_running.contains(rank) && **code != Some(0))
            .map(|(rank, _)| rank)
            .collect()
    }
}

/// Form a group of `request.size` processes, run them, and dissolve the group.
///
/// Without a watchdog this blocks for as long as any participant does, including
/// forever when the group stalls. Once any child exits before the group has
/// formed, formation is abandoned and participants that already joined are
/// rejected.
#[instrument(
    skip_all,
    fields(size = request.size, timeout_secs = request.timeout.map(|t| t.as_secs()))
)]
pub fn launch(request: &LaunchRequest) -> Result<LaunchOutcome> {
    let Some((program, args)) = request.program.split_first() else {
        bail!("launch program must be non-empty");
    };
    if program.trim().is_empty() {
        bail!("launch program must be non-empty");
    }
    if request.size == 0 {
        return Err(FormationError::EmptyGroup.into());
    }

    let mut hub = RendezvousHub::bind(&request.bind_addr, request.size)?;
    let rendezvous = hub.local_addr();
    let abandon = Arc::new(AtomicBool::new(false));
    let hub_thread = {
        let abandon = Arc::clone(&abandon);
        thread::Builder::new()
            .name("rendezvous".to_string())
            .spawn(move || {
                let report = hub.run(&abandon);
                (hub, report)
            })
            .context("spawn rendezvous thread")?
    };
    info!(%rendezvous, program = %program, "launching group");

    let mut children: Vec<Child> = Vec::with_capacity(request.size);
    for rank in 0..request.size {
        let mut cmd = Command::new(program);
        cmd.args(args)
            .envs(&request.env)
            .stdin(Stdio::null())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit());
        GroupEnv {
            rank,
            size: request.size,
            rendezvous,
        }
        .apply(&mut cmd);

        match cmd.spawn() {
            Ok(child) => {
                debug!(rank, pid = child.id(), "participant spawned");
                children.push(child);
            }
            Err(err) => {
                error!(rank, err = %err, "failed to spawn participant");
                kill_all(&mut children);
                abandon.store(true, Ordering::Release);
                let _ = hub_thread.join();
                return Err(FormationError::Spawn {
                    rank,
                    reason: err.to_string(),
                }
                .into());
            }
        }
    }

    let mut exit_codes = vec![None; request.size];
    let mut running: Vec<usize> = (0..request.size).collect();
    let deadline = request.timeout.map(|timeout| Instant::now() + timeout);
    let mut timed_out = false;
    while !running.is_empty() {
        let mut still = Vec::with_capacity(running.len());
        for rank in running {
            match children[rank]
                .try_wait()
                .with_context(|| format!("wait for rank {rank}"))?
            {
                Some(status) => {
                    debug!(rank, exit_code = ?status.code(), "participant exited");
                    exit_codes[rank] = status.code();
                    // A group cannot form once any member is gone.
                    abandon.store(true, Ordering::Release);
                }
                None => still.push(rank),
            }
        }
        running = still;
        if running.is_empty() {
            break;
        }
        if deadline.is_some_and(|deadline| Instant::now() >= deadline) {
            timed_out = true;
            break;
        }
        thread::sleep(WAIT_POLL);
    }

    let mut still_running = Vec::new();
    if timed_out {
        warn!("watchdog fired; killing participants still running");
        for (rank, child) in children.iter_mut().enumerate() {
            if !running.contains(&rank) {
                continue;
            }
            if let Some(status) = child
                .try_wait()
                .with_context(|| format!("poll rank {rank}"))?
            {
                exit_codes[rank] = status.code();
                continue;
            }
            still_running.push(rank);
            child.kill().with_context(|| format!("kill rank {rank}"))?;
            child.wait().with_context(|| format!("reap rank {rank}"))?;
        }
        warn!(still_running = ?still_running, "participants killed by watchdog");
    }

    abandon.store(true, Ordering::Release);
    let (hub, report) = hub_thread
        .join()
        .map_err(|_| anyhow!("rendezvous thread panicked"))?;
    drop(hub);
    let hub = report.context("rendezvous")?;

    if let HubReport::NotFormed { joined } = hub
        && joined > 0
    {
        return Err(FormationError::Incomplete {
            joined,
            size: request.size,
        }
        .into());
    }

    info!(hub = ?hub, timed_out, "group dissolved");
    Ok(LaunchOutcome {
        size: request.size,
        exit_codes,
        timed_out,
        still_running,
        hub,
    })
}

fn kill_all(children: &mut [Child]) {
    for child in children {
        if let Err(err) = child.kill() {
            warn!(pid = child.id(), err = %err, "failed to kill participant");
        }
        let _ = child.wait();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn outcome(exit_codes: Vec<Option<i32>>, still_running: Vec<usize>) -> LaunchOutcome {
        LaunchOutcome {
            size: exit_codes.len(),
            exit_codes,
            timed_out: !still_running.is_empty(),
            still_running,
            hub: HubReport::Dissolved { rounds: 0 },
        }
    }

    #[test]
    fn failed_ranks_skip_killed_participants() {
        let outcome = outcome(vec![Some(0), Some(2), None, None], vec![3]);
        assert_eq!(outcome.failed_ranks(), vec![1, 2]);
        assert!(outcome.is_stalled());
    }

    #[test]
    fn request_takes_config_values() {
        let cfg = LaunchConfig {
            np: 3,
            timeout_secs: Some(5),
            ..LaunchConfig::default()
        };
        let request = LaunchRequest::from_config(&cfg, vec!["true".to_string()]);
        assert_eq!(request.size, 3);
        assert_eq!(request.timeout, Some(Duration::from_secs(5)));
        assert_eq!(request.bind_addr, "127.0.0.1:0");
    }

    #[test]
    fn rejects_empty_program() {
        let request = LaunchRequest::from_config(&LaunchConfig::default(), Vec::new());
        assert!(launch(&request).is_err());
    }

    #[cfg(unix)]
    #[test]
    fn programs_that_never_join_are_allowed() {
        let cfg = LaunchConfig {
            np: 2,
            ..LaunchConfig::default()
        };
        let request = LaunchRequest::from_config(&cfg, vec!["true".to_string()]);
        let outcome = launch(&request).expect("launch");
        assert_eq!(outcome.exit_codes, vec![Some(0), Some(0)]);
        assert_eq!(outcome.hub, HubReport::NotFormed { joined: 0 });
        assert!(!outcome.is_stalled());
    }
}
