//! Participant side of the launcher's barrier transport.
//!
//! Each launched process holds one TCP connection to the rendezvous hub.
//! A barrier is `ARRIVE <epoch>` followed by a blocking read of
//! `RELEASE <epoch>`; no payload crosses it.

use std::io::{BufRead, BufReader, Write};
use std::net::TcpStream;
use std::sync::Mutex;

use anyhow::{Context, Result, anyhow, bail};
use tracing::{debug, instrument, warn};

use crate::core::group::{FormationError, ProcessGroup};
use crate::io::env::GroupEnv;
use crate::io::wire::{HubMessage, MemberMessage};

struct Channel {
    reader: BufReader<TcpStream>,
    writer: TcpStream,
    epoch: u64,
}

impl Channel {
    fn send(&mut self, message: &MemberMessage) -> Result<()> {
        writeln!(self.writer, "{message}").context("write to rendezvous")?;
        self.writer.flush().context("flush rendezvous stream")?;
        Ok(())
    }

    fn recv(&mut self) -> Result<Option<HubMessage>> {
        let mut line = String::new();
        let n = self
            .reader
            .read_line(&mut line)
            .context("read from rendezvous")?;
        if n == 0 {
            return Ok(None);
        }
        HubMessage::parse(&line).map(Some)
    }
}

/// Group membership backed by the launcher's rendezvous hub.
pub struct SocketGroup {
    rank: usize,
    size: usize,
    channel: Mutex<Channel>,
}

impl SocketGroup {
    /// Connect to the hub, announce this participant, and wait for the group to form.
    ///
    /// Blocks until every participant has joined.
    #[instrument(skip_all, fields(rank = env.rank, size = env.size, rendezvous = %env.rendezvous))]
    pub fn join(env: &GroupEnv) -> Result<Self> {
        let stream =
            TcpStream::connect(env.rendezvous).map_err(|err| FormationError::Unreachable {
                addr: env.rendezvous.to_string(),
                reason: err.to_string(),
            })?;
        stream.set_nodelay(true).context("set TCP_NODELAY")?;
        let reader = BufReader::new(stream.try_clone().context("clone rendezvous stream")?);
        let mut channel = Channel {
            reader,
            writer: stream,
            epoch: 0,
        };

        channel.send(&MemberMessage::Join {
            rank: env.rank,
            size: env.size,
        })?;
        debug!("join sent, waiting for group formation");

        match channel.recv()? {
            Some(HubMessage::Welcome { size }) if size == env.size => {}
            Some(HubMessage::Welcome { size }) => {
                return Err(FormationError::SizeMismatch {
                    rank: env.rank,
                    reported: env.size,
                    expected: size,
                }
                .into());
            }
            Some(HubMessage::Reject { reason }) => {
                return Err(FormationError::Rejected { reason }.into());
            }
            Some(other) => bail!("unexpected {other} during formation"),
            None => {
                return Err(FormationError::Rejected {
                    reason: "rendezvous closed before the group formed".to_string(),
                }
                .into());
            }
        }

        debug!("group formed");
        Ok(Self {
            rank: env.rank,
            size: env.size,
            channel: Mutex::new(channel),
        })
    }
}

impl ProcessGroup for SocketGroup {
    fn rank(&self) -> usize {
        self.rank
    }

    fn size(&self) -> usize {
        self.size
    }

    fn synchronize(&self) -> Result<()> {
        let mut channel = self
            .channel
            .lock()
            .map_err(|_| anyhow!("rendezvous channel poisoned"))?;
        let epoch = channel.epoch;
        channel.send(&MemberMessage::Arrive { epoch })?;
        match channel.recv()? {
            Some(HubMessage::Release { epoch: released }) if released == epoch => {
                channel.epoch += 1;
                Ok(())
            }
            Some(other) => Err(anyhow!("expected release of barrier {epoch}, got {other}")),
            None => Err(anyhow!("rendezvous closed while waiting at barrier {epoch}")),
        }
    }
}

impl Drop for SocketGroup {
    fn drop(&mut self) {
        let channel = match self.channel.get_mut() {
            Ok(channel) => channel,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Err(err) = channel.send(&MemberMessage::Leave) {
            warn!(rank = self.rank, err = %err, "failed to announce departure");
        }
    }
}
