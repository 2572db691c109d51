//! Launcher side of the barrier transport.
//!
//! The hub forms the group (every rank joins exactly once), then opens one
//! barrier per epoch once every participant has arrived. It never times out:
//! if a participant leaves while others wait, the hub stops releasing and
//! keeps the waiting connections open, so those participants stay blocked.

use std::io::{self, BufRead, BufReader, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result, bail};
use serde::Serialize;
use tracing::{debug, error, info, instrument, warn};

use crate::core::group::{FormationError, Roster};
use crate::io::wire::{HubMessage, MemberMessage};

const ACCEPT_POLL: Duration = Duration::from_millis(10);
/// How long a connection may stay silent before its JOIN.
pub const JOIN_TIMEOUT: Duration = Duration::from_secs(10);

/// How the hub finished.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum HubReport {
    /// Every participant left after `rounds` barriers.
    Dissolved { rounds: u64 },
    /// Some participants left while the rest waited at barrier `epoch`.
    Stalled {
        epoch: u64,
        departed: Vec<usize>,
        waiting: Vec<usize>,
    },
    /// Formation was abandoned after `joined` participants had joined.
    NotFormed { joined: usize },
}

struct Member {
    rank: usize,
    reader: BufReader<TcpStream>,
    writer: TcpStream,
}

impl Member {
    fn send(&mut self, message: &HubMessage) -> io::Result<()> {
        writeln!(self.writer, "{message}")?;
        self.writer.flush()
    }

    /// Next message, or `None` once the participant is gone.
    fn recv(&mut self) -> Result<Option<MemberMessage>> {
        let mut line = String::new();
        match self.reader.read_line(&mut line) {
            Ok(0) => Ok(None),
            Ok(_) => MemberMessage::parse(&line).map(Some),
            Err(err)
                if matches!(
                    err.kind(),
                    io::ErrorKind::ConnectionReset
                        | io::ErrorKind::ConnectionAborted
                        | io::ErrorKind::BrokenPipe
                ) =>
            {
                Ok(None)
            }
            Err(err) => Err(err).with_context(|| format!("read from rank {}", self.rank)),
        }
    }
}

/// A connection that has not sent its JOIN yet.
struct Pending {
    peer: SocketAddr,
    reader: BufReader<TcpStream>,
    writer: TcpStream,
    line: String,
    since: Instant,
}

enum JoinRead {
    Line(String),
    Waiting,
    Gone,
}

impl Pending {
    fn new(stream: TcpStream, peer: SocketAddr) -> Result<Self> {
        stream
            .set_nonblocking(true)
            .context("set participant stream nonblocking")?;
        stream.set_nodelay(true).context("set TCP_NODELAY")?;
        let reader = BufReader::new(stream.try_clone().context("clone participant stream")?);
        Ok(Self {
            peer,
            reader,
            writer: stream,
            line: String::new(),
            since: Instant::now(),
        })
    }

    /// Nonblocking read of the JOIN line; partial input is kept for the next poll.
    fn poll(&mut self) -> JoinRead {
        match self.reader.read_line(&mut self.line) {
            Ok(0) if self.line.is_empty() => JoinRead::Gone,
            Ok(_) => JoinRead::Line(std::mem::take(&mut self.line)),
            Err(err) if err.kind() == io::ErrorKind::WouldBlock => JoinRead::Waiting,
            Err(err) if err.kind() == io::ErrorKind::Interrupted => JoinRead::Waiting,
            Err(err) => {
                debug!(peer = %self.peer, err = %err, "join read failed");
                JoinRead::Gone
            }
        }
    }
}

/// Rendezvous point for a group of `size` participants.
pub struct RendezvousHub {
    listener: Option<TcpListener>,
    addr: SocketAddr,
    roster: Roster,
    members: Vec<Member>,
}

impl RendezvousHub {
    pub fn bind(addr: &str, size: usize) -> Result<Self> {
        let roster = Roster::new(size)?;
        let listener =
            TcpListener::bind(addr).with_context(|| format!("bind rendezvous on {addr}"))?;
        let addr = listener.local_addr().context("rendezvous local address")?;
        debug!(%addr, size, "rendezvous bound");
        Ok(Self {
            listener: Some(listener),
            addr,
            roster,
            members: Vec::with_capacity(size),
        })
    }

    /// Address participants connect to.
    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    /// Form the group, then serve barriers until it dissolves or stalls.
    pub fn run(&mut self, abandon: &AtomicBool) -> Result<HubReport> {
        if !self.form(abandon)? {
            return Ok(HubReport::NotFormed {
                joined: self.roster.joined(),
            });
        }
        self.serve()
    }

    /// Accept joins until every rank is present, then welcome everyone.
    ///
    /// Returns `Ok(false)` if `abandon` was raised first; participants that had
    /// already joined are rejected. Any invalid join rejects every participant
    /// and fails formation. Connections that send no JOIN within
    /// [`JOIN_TIMEOUT`] are dropped without affecting the roster.
    #[instrument(skip_all, fields(size = self.roster.size()))]
    pub fn form(&mut self, abandon: &AtomicBool) -> Result<bool> {
        let Some(listener) = self.listener.as_ref() else {
            bail!("rendezvous is no longer accepting joins");
        };
        listener
            .set_nonblocking(true)
            .context("set rendezvous nonblocking")?;

        let mut pending: Vec<Pending> = Vec::new();
        while !self.roster.is_complete() {
            if abandon.load(Ordering::Acquire) {
                info!(
                    joined = self.roster.joined(),
                    pending = pending.len(),
                    "formation abandoned"
                );
                self.listener = None;
                self.reject_all(&FormationError::Incomplete {
                    joined: self.roster.joined(),
                    size: self.roster.size(),
                });
                return Ok(false);
            }
            let accepted = match self.listener.as_ref() {
                Some(listener) => listener.accept(),
                None => bail!("rendezvous listener closed during formation"),
            };
            let mut progressed = false;
            match accepted {
                Ok((stream, peer)) => {
                    debug!(%peer, "participant connected");
                    pending.push(Pending::new(stream, peer)?);
                    progressed = true;
                }
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => {}
                Err(err) => return Err(err).context("accept participant"),
            }
            if let Err(err) = self.poll_pending(&mut pending, &mut progressed) {
                self.listener = None;
                return Err(err);
            }
            if !progressed {
                thread::sleep(ACCEPT_POLL);
            }
        }
        self.listener = None;

        self.members.sort_by_key(|member| member.rank);
        let size = self.roster.size();
        for member in &mut self.members {
            member
                .send(&HubMessage::Welcome { size })
                .with_context(|| format!("welcome rank {}", member.rank))?;
        }
        info!(size, "group formed");
        Ok(true)
    }

    /// Read whatever JOIN lines have arrived and admit their senders.
    fn poll_pending(&mut self, pending: &mut Vec<Pending>, progressed: &mut bool) -> Result<()> {
        let mut index = 0;
        while index < pending.len() {
            match pending[index].poll() {
                JoinRead::Line(line) => {
                    let conn = pending.swap_remove(index);
                    *progressed = true;
                    self.admit(conn, &line)?;
                }
                JoinRead::Waiting if pending[index].since.elapsed() >= JOIN_TIMEOUT => {
                    let conn = pending.swap_remove(index);
                    warn!(peer = %conn.peer, "connection sent no JOIN; dropping it");
                }
                JoinRead::Waiting => index += 1,
                JoinRead::Gone => {
                    let conn = pending.swap_remove(index);
                    debug!(peer = %conn.peer, "connection closed before joining");
                }
            }
        }
        Ok(())
    }

    fn admit(&mut self, conn: Pending, line: &str) -> Result<()> {
        conn.writer
            .set_nonblocking(false)
            .context("set participant stream blocking")?;
        let admitted = match MemberMessage::parse(line) {
            Ok(MemberMessage::Join { rank, size }) => self.roster.admit(rank, size).map(|()| rank),
            Ok(other) => Err(FormationError::Rejected {
                reason: format!("expected JOIN, got {other}"),
            }),
            Err(err) => Err(FormationError::Rejected {
                reason: format!("{err:#}"),
            }),
        };

        match admitted {
            Ok(rank) => {
                debug!(rank, joined = self.roster.joined(), "participant admitted");
                self.members.push(Member {
                    rank,
                    reader: conn.reader,
                    writer: conn.writer,
                });
                Ok(())
            }
            Err(err) => {
                error!(err = %err, "formation failed");
                self.members.push(Member {
                    rank: usize::MAX,
                    reader: conn.reader,
                    writer: conn.writer,
                });
                self.reject_all(&err);
                Err(err.into())
            }
        }
    }

    /// Send `REJECT` to every connected participant and close the connections.
    fn reject_all(&mut self, reason: &FormationError) {
        let reject = HubMessage::Reject {
            reason: reason.to_string(),
        };
        for member in &mut self.members {
            if let Err(err) = member.send(&reject) {
                warn!(rank = member.rank, err = %err, "failed to deliver rejection");
            }
        }
        self.members.clear();
    }

    /// Open barriers epoch by epoch until the group dissolves or stalls.
    #[instrument(skip_all, fields(size = self.members.len()))]
    pub fn serve(&mut self) -> Result<HubReport> {
        let mut epoch = 0u64;
        loop {
            let mut arrived = Vec::new();
            let mut departed = Vec::new();
            for member in &mut self.members {
                match member.recv()? {
                    Some(MemberMessage::Arrive { epoch: at }) if at == epoch => {
                        arrived.push(member.rank);
                    }
                    Some(MemberMessage::Arrive { epoch: at }) => bail!(
                        "rank {} arrived at barrier {at} while the group is at {epoch}",
                        member.rank
                    ),
                    Some(MemberMessage::Leave) | None => departed.push(member.rank),
                    Some(MemberMessage::Join { .. }) => {
                        bail!("rank {} sent JOIN after formation", member.rank)
                    }
                }
            }

            if departed.len() == self.members.len() {
                info!(rounds = epoch, "group dissolved");
                return Ok(HubReport::Dissolved { rounds: epoch });
            }
            if !departed.is_empty() {
                error!(
                    epoch,
                    departed = ?departed,
                    waiting = ?arrived,
                    "participants left while others wait; group stalled"
                );
                return Ok(HubReport::Stalled {
                    epoch,
                    departed,
                    waiting: arrived,
                });
            }

            debug!(epoch, "releasing barrier");
            for member in &mut self.members {
                if let Err(err) = member.send(&HubMessage::Release { epoch }) {
                    warn!(rank = member.rank, err = %err, "failed to release participant");
                }
            }
            epoch += 1;
        }
    }
}
