//! Type definitions for the simulation.
//!
//! Contains the data structures shared by the engine and the protocols:
//! - Host identifiers, rounds and 2D positions
//! - Message records and their destinations
//! - Per-host metrics counters

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::rc::Rc;
use std::str::FromStr;

use crate::protocol::payload::{Payload, PayloadError};

/// Stable integer identifier of a host inside one simulation.
pub type HostId = u32;

/// Discrete simulation time. Every host evaluates exactly once per round.
pub type Round = u64;

/// Shared handle to a message. The same allocation sits in every channel
/// store the transmission reached and, once delivered, in the receiver's
/// input queue.
pub type MessageRef = Rc<Message>;

/// Simple 2D point
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

/// Addressing of a transmission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Destination {
    /// Exactly one receiver.
    Host(HostId),
    /// Every listed receiver (used by forwarded traffic).
    Multicast(BTreeSet<HostId>),
    /// Every host that physically hears the transmission.
    Broadcast,
}

impl Destination {
    /// Whether a host with the given id is addressed by this destination.
    pub fn includes(&self, host: HostId) -> bool {
        match self {
            Destination::Host(id) => *id == host,
            Destination::Multicast(ids) => ids.contains(&host),
            Destination::Broadcast => true,
        }
    }
}

impl fmt::Display for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Destination::Host(id) => write!(f, "{}", id),
            Destination::Broadcast => write!(f, "*"),
            Destination::Multicast(ids) => {
                let joined: Vec<String> = ids.iter().map(|id| id.to_string()).collect();
                write!(f, "{{{}}}", joined.join(","))
            }
        }
    }
}

impl FromStr for Destination {
    type Err = MessageParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s == "*" {
            return Ok(Destination::Broadcast);
        }
        if let Some(inner) = s.strip_prefix('{').and_then(|rest| rest.strip_suffix('}')) {
            let mut ids = BTreeSet::new();
            for part in inner.split(',').filter(|p| !p.is_empty()) {
                ids.insert(parse_field::<HostId>("dst", part)?);
            }
            return Ok(Destination::Multicast(ids));
        }
        Ok(Destination::Host(parse_field("dst", s)?))
    }
}

/// Hop budget of forwarded traffic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ttl {
    pub initial: u8,
    pub remaining: u8,
}

impl Ttl {
    pub fn new(initial: u8) -> Self {
        Self { initial, remaining: initial }
    }

    /// Hops consumed so far.
    pub fn consumed(&self) -> u8 {
        self.initial.saturating_sub(self.remaining)
    }

    /// Budget for the next hop, `None` when exhausted.
    pub fn decremented(&self) -> Option<Ttl> {
        if self.remaining <= 1 {
            return None;
        }
        Some(Ttl {
            initial: self.initial,
            remaining: self.remaining - 1,
        })
    }
}

/// One transmission attempt occupying the half-open window
/// `[start_time, end_time)`.
///
/// The window is fixed once the message is deposited in a channel store.
/// Forwarding builds a fresh copy through [`Message::forwarded`] instead of
/// mutating a shared message.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    /// Simulation-wide identifier, assigned when the message is deposited.
    pub id: u64,
    /// Host transmitting this hop.
    pub source: HostId,
    /// Host that created the message. Equals `source` unless forwarded.
    pub origin: HostId,
    pub destination: Destination,
    /// Final target of forwarded traffic.
    pub end_destination: Option<HostId>,
    pub start_time: Round,
    pub end_time: Round,
    pub payload: Payload,
    pub ttl: Option<Ttl>,
}

impl Message {
    /// Create a single-hop message. The id is filled in by the simulator.
    pub fn new(source: HostId, destination: Destination, start_time: Round, end_time: Round, payload: Payload) -> Self {
        debug_assert!(end_time > start_time, "message window must not be empty");
        Self {
            id: 0,
            source,
            origin: source,
            destination,
            end_destination: None,
            start_time,
            end_time,
            payload,
            ttl: None,
        }
    }

    pub fn with_end_destination(mut self, end_destination: HostId, ttl: Ttl) -> Self {
        self.end_destination = Some(end_destination);
        self.ttl = Some(ttl);
        self
    }

    pub fn duration(&self) -> Round {
        self.end_time - self.start_time
    }

    /// True for traffic relayed by a host other than its creator.
    pub fn is_forward(&self) -> bool {
        self.origin != self.source
    }

    /// Inclusive-bounds overlap test used by both delivery and cleanup.
    ///
    /// Touching windows (`[0,5)` and `[5,10)`) count as overlapping.
    pub fn overlaps(&self, other: &Message) -> bool {
        other.end_time >= self.start_time && other.start_time <= self.end_time
    }

    /// Copy of this message relayed by `relay`, with the window moved to
    /// start at `start_time` (duration preserved) and the hop budget spent.
    ///
    /// Returns `None` when the TTL is exhausted or absent.
    pub fn forwarded(&self, relay: HostId, destination: Destination, start_time: Round) -> Option<Message> {
        let ttl = self.ttl?.decremented()?;
        Some(Message {
            id: 0,
            source: relay,
            origin: self.origin,
            destination,
            end_destination: self.end_destination,
            start_time,
            end_time: start_time + self.duration(),
            payload: self.payload.clone(),
            ttl: Some(ttl),
        })
    }
}

/// Text form used by archive records:
/// `#<id> <start>..<end> src=<s> origin=<o> dst=<d> end_dst=<d|-> ttl=<rem>/<init>|- payload=<payload>`.
///
/// The payload goes last because free text may contain spaces.
impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "#{} {}..{} src={} origin={} dst={} end_dst=",
            self.id, self.start_time, self.end_time, self.source, self.origin, self.destination
        )?;
        match self.end_destination {
            Some(id) => write!(f, "{}", id)?,
            None => write!(f, "-")?,
        }
        match self.ttl {
            Some(ttl) => write!(f, " ttl={}/{}", ttl.remaining, ttl.initial)?,
            None => write!(f, " ttl=-")?,
        }
        write!(f, " payload={}", self.payload)
    }
}

/// Error type for rebuilding a message from its archived text form.
#[derive(Debug, PartialEq)]
pub enum MessageParseError {
    MissingField(&'static str),
    InvalidField(&'static str, String),
    Payload(PayloadError),
}

impl fmt::Display for MessageParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MessageParseError::MissingField(name) => write!(f, "Missing field: {}", name),
            MessageParseError::InvalidField(name, value) => write!(f, "Invalid value for {}: {:?}", name, value),
            MessageParseError::Payload(err) => write!(f, "Invalid payload: {}", err),
        }
    }
}

impl std::error::Error for MessageParseError {}

fn parse_field<T: FromStr>(name: &'static str, value: &str) -> Result<T, MessageParseError> {
    value
        .parse::<T>()
        .map_err(|_| MessageParseError::InvalidField(name, value.to_string()))
}

fn strip_key<'a>(name: &'static str, token: Option<&'a str>) -> Result<&'a str, MessageParseError> {
    let token = token.ok_or(MessageParseError::MissingField(name))?;
    token
        .strip_prefix(name)
        .and_then(|rest| rest.strip_prefix('='))
        .ok_or_else(|| MessageParseError::InvalidField(name, token.to_string()))
}

impl FromStr for Message {
    type Err = MessageParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (head, payload) = s.split_once(" payload=").ok_or(MessageParseError::MissingField("payload"))?;
        let mut tokens = head.split_whitespace();

        let id_token = tokens.next().ok_or(MessageParseError::MissingField("id"))?;
        let id = parse_field("id", id_token.trim_start_matches('#'))?;

        let window = tokens.next().ok_or(MessageParseError::MissingField("window"))?;
        let (start, end) = window
            .split_once("..")
            .ok_or_else(|| MessageParseError::InvalidField("window", window.to_string()))?;
        let start_time = parse_field("window", start)?;
        let end_time = parse_field("window", end)?;

        let source = parse_field("src", strip_key("src", tokens.next())?)?;
        let origin = parse_field("origin", strip_key("origin", tokens.next())?)?;
        let destination = strip_key("dst", tokens.next())?.parse()?;
        let end_destination = match strip_key("end_dst", tokens.next())? {
            "-" => None,
            value => Some(parse_field("end_dst", value)?),
        };
        let ttl = match strip_key("ttl", tokens.next())? {
            "-" => None,
            value => {
                let (remaining, initial) = value
                    .split_once('/')
                    .ok_or_else(|| MessageParseError::InvalidField("ttl", value.to_string()))?;
                Some(Ttl {
                    initial: parse_field("ttl", initial)?,
                    remaining: parse_field("ttl", remaining)?,
                })
            }
        };

        Ok(Message {
            id,
            source,
            origin,
            destination,
            end_destination,
            start_time,
            end_time,
            payload: payload.parse().map_err(MessageParseError::Payload)?,
            ttl,
        })
    }
}

/// Aggregated hop consumption of TTL-bearing traffic that reached its end
/// destination.
#[derive(Debug, Clone, Default, Serialize)]
pub struct TtlStats {
    pub samples: u64,
    pub total: u64,
    pub highest: Option<u8>,
    pub lowest: Option<u8>,
}

impl TtlStats {
    pub fn record(&mut self, consumed: u8) {
        self.samples += 1;
        self.total += consumed as u64;
        self.highest = Some(self.highest.map_or(consumed, |h| h.max(consumed)));
        self.lowest = Some(self.lowest.map_or(consumed, |l| l.min(consumed)));
    }

    pub fn average(&self) -> Option<f64> {
        if self.samples == 0 {
            return None;
        }
        Some(self.total as f64 / self.samples as f64)
    }
}

/// Per-host counters maintained by the engine and the host itself.
///
/// `failed_to_deliver` is the collision total; it always equals
/// `messages_failed + forward_messages_failed`.
#[derive(Debug, Clone, Default, Serialize)]
pub struct HostMetrics {
    pub messages_sent: u64,
    pub successfully_delivered: u64,
    pub failed_to_deliver: u64,
    pub messages_received: u64,
    pub forward_messages_received: u64,
    pub messages_failed: u64,
    pub forward_messages_failed: u64,
    pub messages_forwarded: u64,
    pub messages_expired: u64,
    pub ttl: TtlStats,
}

impl HostMetrics {
    /// Record a message that could not be delivered to this host.
    pub fn record_failure(&mut self, message: &Message) {
        self.failed_to_deliver += 1;
        if message.is_forward() {
            self.forward_messages_failed += 1;
        } else {
            self.messages_failed += 1;
        }
    }

    /// Counter name to count. The average TTL is rounded down.
    pub fn as_map(&self) -> BTreeMap<&'static str, u64> {
        let mut map = BTreeMap::new();
        map.insert("messages sent", self.messages_sent);
        map.insert("successfully delivered", self.successfully_delivered);
        map.insert("failed to deliver", self.failed_to_deliver);
        map.insert("messages received", self.messages_received);
        map.insert("forward-messages received", self.forward_messages_received);
        map.insert("messages failed", self.messages_failed);
        map.insert("forward-messages failed", self.forward_messages_failed);
        map.insert("messages forwarded", self.messages_forwarded);
        map.insert("messages expired", self.messages_expired);
        map.insert("average ttl", self.ttl.average().map_or(0, |avg| avg as u64));
        map.insert("highest ttl", self.ttl.highest.unwrap_or(0) as u64);
        map.insert("lowest ttl", self.ttl.lowest.unwrap_or(0) as u64);
        map
    }
}
