//! Line sinks that satisfy the flush-before-barrier contract.

use std::io::Write;
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result, anyhow};

use crate::core::sequencer::LineSink;

/// Writes each line to `W` and flushes before returning.
#[derive(Debug)]
pub struct FlushingSink<W: Write> {
    writer: W,
}

impl<W: Write> FlushingSink<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl<W: Write> LineSink for FlushingSink<W> {
    fn emit_line(&mut self, line: &str) -> Result<()> {
        writeln!(self.writer, "{line}").context("write line")?;
        self.writer.flush().context("flush line")?;
        Ok(())
    }
}

/// In-memory transcript shared by every member of a thread group.
///
/// A line is visible to all readers as soon as `emit_line` returns.
#[derive(Debug, Clone, Default)]
pub struct SharedTranscript {
    lines: Arc<Mutex<Vec<String>>>,
}

impl SharedTranscript {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lines(&self) -> Result<Vec<String>> {
        let lines = self
            .lines
            .lock()
            .map_err(|_| anyhow!("transcript lock poisoned"))?;
        Ok(lines.clone())
    }
}

impl LineSink for SharedTranscript {
    fn emit_line(&mut self, line: &str) -> Result<()> {
        self.lines
            .lock()
            .map_err(|_| anyhow!("transcript lock poisoned"))?
            .push(line.to_string());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flushing_sink_terminates_lines() {
        let mut sink = FlushingSink::new(Vec::new());
        sink.emit_line("size 2").expect("emit");
        sink.emit_line("Rank 0").expect("emit");
        assert_eq!(sink.into_inner(), b"size 2\nRank 0\n");
    }

    #[test]
    fn shared_transcript_clones_see_each_other() {
        let transcript = SharedTranscript::new();
        let mut writer = transcript.clone();
        writer.emit_line("Rank 0").expect("emit");
        assert_eq!(transcript.lines().expect("lines"), vec!["Rank 0"]);
    }
}
