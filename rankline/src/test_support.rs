//! Test-only fakes and helpers for driving the sequencer without real processes.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;

use anyhow::{Context, Result, bail};

use crate::core::group::ProcessGroup;
use crate::core::script::RankScript;
use crate::core::sequencer::{BarrierSequencer, LineSink, SequencerOptions};
use crate::io::config::{DEFAULT_CONFIG_FILE, LaunchConfig, write_config};
use crate::io::local::{CountingBarrier, LocalGroup};
use crate::io::sink::SharedTranscript;

/// Observable step taken by a participant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Emit(String),
    Sync,
}

/// Single participant whose barrier returns immediately and records every call.
///
/// Emits made through [`RecordingGroup::sink`] land in the same log, so tests
/// can assert each line is emitted before the barrier that follows it.
#[derive(Debug, Clone)]
pub struct RecordingGroup {
    rank: usize,
    size: usize,
    events: Arc<Mutex<Vec<Event>>>,
}

impl RecordingGroup {
    pub fn new(rank: usize, size: usize) -> Self {
        Self {
            rank,
            size,
            events: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn sink(&self) -> RecordingSink {
        RecordingSink {
            events: Arc::clone(&self.events),
        }
    }

    pub fn events(&self) -> Vec<Event> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl ProcessGroup for RecordingGroup {
    fn rank(&self) -> usize {
        self.rank
    }

    fn size(&self) -> usize {
        self.size
    }

    fn synchronize(&self) -> Result<()> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Event::Sync);
        Ok(())
    }
}

/// Sink that records into a [`RecordingGroup`]'s event log.
#[derive(Debug, Clone)]
pub struct RecordingSink {
    events: Arc<Mutex<Vec<Event>>>,
}

impl LineSink for RecordingSink {
    fn emit_line(&mut self, line: &str) -> Result<()> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Event::Emit(line.to_string()));
        Ok(())
    }
}

/// Sink whose writes always fail.
#[derive(Debug, Clone, Copy)]
pub struct FailingSink;

impl LineSink for FailingSink {
    fn emit_line(&mut self, _line: &str) -> Result<()> {
        bail!("sink closed")
    }
}

/// Handles to a thread group whose members run without being joined.
pub struct DetachedGroup {
    pub barrier: Arc<CountingBarrier>,
    pub transcript: SharedTranscript,
    pub handles: Vec<thread::JoinHandle<Result<()>>>,
}

/// Spawn one pass on detached member threads; the member whose rank equals
/// `omit_final_sync` skips its last barrier.
///
/// The caller can watch members parked at the final barrier through
/// [`DetachedGroup::barrier`]. Stalled threads are never joined.
pub fn spawn_detached<S>(
    size: usize,
    script: S,
    omit_final_sync: Option<usize>,
) -> Result<DetachedGroup>
where
    S: RankScript + Clone + Send + 'static,
{
    let group = LocalGroup::form(size)?;
    let barrier = group.barrier();
    let transcript = SharedTranscript::new();

    let handles = group
        .into_members()
        .into_iter()
        .map(|member| {
            let mut sink = transcript.clone();
            let script = script.clone();
            let options = SequencerOptions {
                omit_final_sync: omit_final_sync == Some(member.rank()),
            };
            thread::spawn(move || -> Result<()> {
                BarrierSequencer::new(&member)
                    .with_options(options)
                    .run(&script, &mut sink)?;
                Ok(())
            })
        })
        .collect();

    Ok(DetachedGroup {
        barrier,
        transcript,
        handles,
    })
}

/// Scratch directory for CLI tests that need a config file.
pub struct TempWorkspace {
    dir: tempfile::TempDir,
}

impl TempWorkspace {
    pub fn new() -> Result<Self> {
        let dir = tempfile::tempdir().context("create tempdir")?;
        Ok(Self { dir })
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Write `cfg` as `rankline.toml` and return its path.
    pub fn write_config(&self, cfg: &LaunchConfig) -> Result<PathBuf> {
        let path = self.dir.path().join(DEFAULT_CONFIG_FILE);
        write_config(&path, cfg)?;
        Ok(path)
    }
}
