//! Run a command to completion under a deadline, capturing bounded output.
//!
//! Used to observe a whole launch from the outside: the merged stdout of a
//! group is the transcript that ordering checks run against.

use std::io::Read;
use std::process::{Command, ExitStatus, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result, anyhow};
use tracing::{debug, instrument, warn};
use wait_timeout::ChildExt;

/// Output of a captured run.
#[derive(Debug)]
pub struct CapturedRun {
    pub status: ExitStatus,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    /// Bytes dropped from stdout beyond the capture limit.
    pub stdout_dropped: usize,
    /// Bytes dropped from stderr beyond the capture limit.
    pub stderr_dropped: usize,
    /// The deadline passed and the process was killed.
    pub timed_out: bool,
    pub elapsed: Duration,
}

impl CapturedRun {
    /// Captured stdout split into lines, lossily decoded.
    pub fn stdout_lines(&self) -> Vec<String> {
        String::from_utf8_lossy(&self.stdout)
            .lines()
            .map(str::to_string)
            .collect()
    }

    /// Exit code, or `None` if the process was killed or signalled.
    pub fn exit_code(&self) -> Option<i32> {
        if self.timed_out {
            None
        } else {
            self.status.code()
        }
    }
}

/// Spawn `cmd`, drain stdout/stderr on reader threads, and wait up to `timeout`.
///
/// At most `limit_bytes` of each stream are kept; the rest is drained and
/// counted so the child never blocks on a full pipe. A child still running at
/// the deadline is killed.
///
/// Killing the launcher does not kill the participants it spawned; they
/// inherit the captured pipes, so draining only finishes once they exit too.
#[instrument(skip_all, fields(timeout_secs = timeout.as_secs(), limit_bytes))]
pub fn run_captured(
    mut cmd: Command,
    timeout: Duration,
    limit_bytes: usize,
) -> Result<CapturedRun> {
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    let started = Instant::now();
    let mut child = cmd.spawn().context("spawn command")?;
    debug!(pid = child.id(), "command spawned");

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| anyhow!("stdout was not piped"))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| anyhow!("stderr was not piped"))?;
    let stdout_reader = thread::spawn(move || drain_limited(stdout, limit_bytes));
    let stderr_reader = thread::spawn(move || drain_limited(stderr, limit_bytes));

    let (status, timed_out) = match child.wait_timeout(timeout).context("wait for command")? {
        Some(status) => (status, false),
        None => {
            warn!(timeout_secs = timeout.as_secs(), "command timed out, killing");
            child.kill().context("kill command")?;
            (child.wait().context("reap command")?, true)
        }
    };

    let (stdout, stdout_dropped) = join_reader(stdout_reader).context("collect stdout")?;
    let (stderr, stderr_dropped) = join_reader(stderr_reader).context("collect stderr")?;
    if stdout_dropped > 0 || stderr_dropped > 0 {
        warn!(stdout_dropped, stderr_dropped, "captured output truncated");
    }

    let elapsed = started.elapsed();
    debug!(
        exit_code = ?status.code(),
        timed_out,
        elapsed_ms = elapsed.as_millis() as u64,
        "command finished"
    );
    Ok(CapturedRun {
        status,
        stdout,
        stderr,
        stdout_dropped,
        stderr_dropped,
        timed_out,
        elapsed,
    })
}

fn join_reader(handle: thread::JoinHandle<Result<(Vec<u8>, usize)>>) -> Result<(Vec<u8>, usize)> {
    handle
        .join()
        .map_err(|_| anyhow!("output reader thread panicked"))?
}

fn drain_limited<R: Read>(mut reader: R, limit: usize) -> Result<(Vec<u8>, usize)> {
    let mut kept = Vec::new();
    let mut dropped = 0usize;
    let mut chunk = [0u8; 8192];
    loop {
        let n = reader.read(&mut chunk).context("read output")?;
        if n == 0 {
            return Ok((kept, dropped));
        }
        let room = limit.saturating_sub(kept.len()).min(n);
        kept.extend_from_slice(&chunk[..room]);
        dropped += n - room;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn drain_keeps_prefix_and_counts_rest() {
        let input: &[u8] = b"size 2\nRank 0\nRank 1\n";
        let (kept, dropped) = drain_limited(input, 7).expect("drain");
        assert_eq!(kept, b"size 2\n");
        assert_eq!(dropped, input.len() - 7);
    }

    #[cfg(unix)]
    #[test]
    fn captures_stdout_lines() {
        let mut cmd = Command::new("sh");
        cmd.args(["-c", "echo 'Rank 0'; echo 'Rank 1'"]);
        let run = run_captured(cmd, Duration::from_secs(10), 1024).expect("run");
        assert_eq!(run.exit_code(), Some(0));
        assert_eq!(run.stdout_lines(), vec!["Rank 0", "Rank 1"]);
    }

    #[cfg(unix)]
    #[test]
    fn kills_on_deadline() {
        let mut cmd = Command::new("sleep");
        cmd.arg("5");
        let run = run_captured(cmd, Duration::from_millis(100), 1024).expect("run");
        assert!(run.timed_out);
        assert_eq!(run.exit_code(), None);
    }
}
