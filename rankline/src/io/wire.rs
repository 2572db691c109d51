//! Line protocol spoken between participants and the rendezvous hub.
//!
//! Every message is one newline-terminated ASCII line. Messages carry only
//! sequencing metadata.

use std::fmt;

use anyhow::{Context, Result, anyhow, bail};

/// Participant → hub.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MemberMessage {
    Join { rank: usize, size: usize },
    Arrive { epoch: u64 },
    Leave,
}

/// Hub → participant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HubMessage {
    Welcome { size: usize },
    Reject { reason: String },
    Release { epoch: u64 },
}

impl fmt::Display for MemberMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MemberMessage::Join { rank, size } => write!(f, "JOIN {rank} {size}"),
            MemberMessage::Arrive { epoch } => write!(f, "ARRIVE {epoch}"),
            MemberMessage::Leave => f.write_str("LEAVE"),
        }
    }
}

impl fmt::Display for HubMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HubMessage::Welcome { size } => write!(f, "WELCOME {size}"),
            HubMessage::Reject { reason } => write!(f, "REJECT {}", reason.replace('\n', " ")),
            HubMessage::Release { epoch } => write!(f, "RELEASE {epoch}"),
        }
    }
}

impl MemberMessage {
    pub fn parse(line: &str) -> Result<Self> {
        let mut parts = line.split_whitespace();
        let verb = parts.next().ok_or_else(|| anyhow!("empty message"))?;
        let message = match verb {
            "JOIN" => MemberMessage::Join {
                rank: number(parts.next(), "JOIN rank")?,
                size: number(parts.next(), "JOIN size")?,
            },
            "ARRIVE" => MemberMessage::Arrive {
                epoch: number(parts.next(), "ARRIVE epoch")?,
            },
            "LEAVE" => MemberMessage::Leave,
            other => bail!("unknown participant message {other:?}"),
        };
        if parts.next().is_some() {
            bail!("trailing fields in {:?}", line.trim_end());
        }
        Ok(message)
    }
}

impl HubMessage {
    pub fn parse(line: &str) -> Result<Self> {
        let line = line.trim_end();
        let (verb, rest) = line.split_once(' ').unwrap_or((line, ""));
        match verb {
            "WELCOME" => Ok(HubMessage::Welcome {
                size: number(Some(rest), "WELCOME size")?,
            }),
            "REJECT" => Ok(HubMessage::Reject {
                reason: rest.to_string(),
            }),
            "RELEASE" => Ok(HubMessage::Release {
                epoch: number(Some(rest), "RELEASE epoch")?,
            }),
            other => bail!("unknown hub message {other:?}"),
        }
    }
}

fn number<T: std::str::FromStr>(field: Option<&str>, what: &str) -> Result<T>
where
    T::Err: std::error::Error + Send + Sync + 'static,
{
    let field = field.ok_or_else(|| anyhow!("missing {what}"))?;
    field
        .trim()
        .parse()
        .with_context(|| format!("parse {what} from {field:?}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_participant_lines() {
        assert_eq!(
            MemberMessage::parse("JOIN 3 8\n").expect("join"),
            MemberMessage::Join { rank: 3, size: 8 }
        );
        assert_eq!(
            MemberMessage::parse("ARRIVE 12\r\n").expect("arrive"),
            MemberMessage::Arrive { epoch: 12 }
        );
        assert_eq!(MemberMessage::Arrive { epoch: 12 }.to_string(), "ARRIVE 12");
    }

    #[test]
    fn hub_reject_keeps_reason_on_one_line() {
        let message = HubMessage::Reject {
            reason: "rank 4 is outside 0..4\nbye".to_string(),
        };
        let line = message.to_string();
        assert_eq!(line, "REJECT rank 4 is outside 0..4 bye");
        assert_eq!(
            HubMessage::parse(&line).expect("parse"),
            HubMessage::Reject {
                reason: "rank 4 is outside 0..4 bye".to_string()
            }
        );
    }

    #[test]
    fn rejects_garbage() {
        assert!(MemberMessage::parse("").is_err());
        assert!(MemberMessage::parse("JOIN 1").is_err());
        assert!(MemberMessage::parse("ARRIVE 1 2").is_err());
        assert!(MemberMessage::parse("HELLO").is_err());
        assert!(HubMessage::parse("RELEASE soon").is_err());
    }
}
