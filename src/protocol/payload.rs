//! Tagged payloads carried by messages.
//!
//! Protocol traffic is typed from the moment it is created. The text form
//! (`SYNC 500 200 60`, `RTS`, `FLOOD 3`, ...) only appears in archive
//! records and is parsed back once, at that boundary.

use std::fmt;
use std::str::FromStr;

use crate::simulation::types::Round;

/// Handshake and announcement frames of the schedule-synchronized MAC.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum FrameKind {
    Sync,
    Rts,
    Cts,
    Data,
    Ack,
}

impl FrameKind {
    pub fn tag(&self) -> &'static str {
        match self {
            FrameKind::Sync => "SYNC",
            FrameKind::Rts => "RTS",
            FrameKind::Cts => "CTS",
            FrameKind::Data => "DATA",
            FrameKind::Ack => "ACK",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    /// Untagged application text.
    Text(String),
    /// Schedule announcement: sleep/listen lengths and the absolute round
    /// at which the first sleep starts.
    Sync {
        sleep_period: Round,
        listen_period: Round,
        sleep_start: Round,
    },
    Rts,
    Cts,
    Data,
    Ack,
    /// Flooded application message, identified per origin by `seq`.
    Flood { seq: u32 },
}

impl Payload {
    /// Frame kind for S-MAC traffic, `None` for anything else.
    pub fn frame_kind(&self) -> Option<FrameKind> {
        match self {
            Payload::Sync { .. } => Some(FrameKind::Sync),
            Payload::Rts => Some(FrameKind::Rts),
            Payload::Cts => Some(FrameKind::Cts),
            Payload::Data => Some(FrameKind::Data),
            Payload::Ack => Some(FrameKind::Ack),
            Payload::Text(_) | Payload::Flood { .. } => None,
        }
    }
}

/// Marks free text that would otherwise read back as a tagged frame.
const TEXT_PREFIX: &str = "TEXT ";

const TAGS: [&str; 7] = ["SYNC", "RTS", "CTS", "DATA", "ACK", "FLOOD", "TEXT"];

fn needs_escape(text: &str) -> bool {
    text.split_whitespace().next().is_some_and(|word| TAGS.contains(&word))
}

impl fmt::Display for Payload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Payload::Text(text) if needs_escape(text) => write!(f, "{}{}", TEXT_PREFIX, text),
            Payload::Text(text) => write!(f, "{}", text),
            Payload::Sync {
                sleep_period,
                listen_period,
                sleep_start,
            } => write!(f, "SYNC {} {} {}", sleep_period, listen_period, sleep_start),
            Payload::Rts => write!(f, "RTS"),
            Payload::Cts => write!(f, "CTS"),
            Payload::Data => write!(f, "DATA"),
            Payload::Ack => write!(f, "ACK"),
            Payload::Flood { seq } => write!(f, "FLOOD {}", seq),
        }
    }
}

/// Error type for tagged payloads with missing or malformed arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PayloadError {
    MissingArgument { tag: &'static str, index: usize },
    InvalidArgument { tag: &'static str, value: String },
    TrailingArguments { tag: &'static str },
}

impl fmt::Display for PayloadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PayloadError::MissingArgument { tag, index } => write!(f, "{} is missing argument {}", tag, index),
            PayloadError::InvalidArgument { tag, value } => write!(f, "{} has invalid argument {:?}", tag, value),
            PayloadError::TrailingArguments { tag } => write!(f, "{} has unexpected trailing arguments", tag),
        }
    }
}

impl std::error::Error for PayloadError {}

fn next_number<'a, T: FromStr>(tag: &'static str, index: usize, args: &mut impl Iterator<Item = &'a str>) -> Result<T, PayloadError> {
    let value = args.next().ok_or(PayloadError::MissingArgument { tag, index })?;
    value.parse().map_err(|_| PayloadError::InvalidArgument {
        tag,
        value: value.to_string(),
    })
}

fn no_more<'a>(tag: &'static str, args: &mut impl Iterator<Item = &'a str>) -> Result<(), PayloadError> {
    match args.next() {
        Some(_) => Err(PayloadError::TrailingArguments { tag }),
        None => Ok(()),
    }
}

impl FromStr for Payload {
    type Err = PayloadError;

    /// Tagged forms must be well formed; anything without a known tag is
    /// plain text. `TEXT <text>` is always plain text.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if let Some(text) = s.strip_prefix(TEXT_PREFIX) {
            return Ok(Payload::Text(text.to_string()));
        }
        let mut parts = s.split_whitespace();
        let payload = match parts.next() {
            Some("SYNC") => Payload::Sync {
                sleep_period: next_number("SYNC", 0, &mut parts)?,
                listen_period: next_number("SYNC", 1, &mut parts)?,
                sleep_start: next_number("SYNC", 2, &mut parts)?,
            },
            Some("RTS") => Payload::Rts,
            Some("CTS") => Payload::Cts,
            Some("DATA") => Payload::Data,
            Some("ACK") => Payload::Ack,
            Some("FLOOD") => Payload::Flood {
                seq: next_number("FLOOD", 0, &mut parts)?,
            },
            _ => return Ok(Payload::Text(s.to_string())),
        };

        let tag = payload.frame_kind().map_or("FLOOD", |kind| kind.tag());
        no_more(tag, &mut parts)?;
        Ok(payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tagged_payloads_parse() {
        assert_eq!(
            "SYNC 500 200 60".parse::<Payload>().unwrap(),
            Payload::Sync {
                sleep_period: 500,
                listen_period: 200,
                sleep_start: 60
            }
        );
        assert_eq!("RTS".parse::<Payload>().unwrap(), Payload::Rts);
        assert_eq!("ACK".parse::<Payload>().unwrap(), Payload::Ack);
        assert_eq!("FLOOD 12".parse::<Payload>().unwrap(), Payload::Flood { seq: 12 });
        assert_eq!("hello".parse::<Payload>().unwrap(), Payload::Text("hello".to_string()));
    }

    #[test]
    fn malformed_tags_are_errors() {
        assert_eq!(
            "SYNC 1 x 3".parse::<Payload>(),
            Err(PayloadError::InvalidArgument {
                tag: "SYNC",
                value: "x".to_string()
            })
        );
        assert_eq!("SYNC 1 2".parse::<Payload>(), Err(PayloadError::MissingArgument { tag: "SYNC", index: 2 }));
        assert_eq!("CTS now".parse::<Payload>(), Err(PayloadError::TrailingArguments { tag: "CTS" }));
        assert!("FLOOD".parse::<Payload>().is_err());
    }

    #[test]
    fn text_that_looks_like_a_frame_reads_back_as_text() {
        for text in ["RTS", "FLOOD 3", "SYNC x", "TEXT", "TEXT hello", " ACK later", ""] {
            let payload = Payload::Text(text.to_string());
            assert_eq!(payload.to_string().parse::<Payload>(), Ok(payload.clone()), "text {:?}", text);
        }
        assert_eq!(Payload::Text("RTS".into()).to_string(), "TEXT RTS");
        // Ordinary text keeps its bare form
        assert_eq!(Payload::Text("hello there".into()).to_string(), "hello there");
        assert_eq!(Payload::Text("RTSX".into()).to_string(), "RTSX");
    }

    #[test]
    fn display_matches_wire_text() {
        let sync = Payload::Sync {
            sleep_period: 600,
            listen_period: 150,
            sleep_start: 92,
        };
        assert_eq!(sync.to_string(), "SYNC 600 150 92");
        assert_eq!(sync.frame_kind(), Some(FrameKind::Sync));
        assert_eq!(Payload::Data.to_string(), "DATA");
        assert_eq!(Payload::Text("x".into()).frame_kind(), None);
    }
}
