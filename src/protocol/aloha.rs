//! Pure ALOHA random access.
//!
//! A host transmits whenever it is eligible, picking the start of its next
//! window at random inside a jitter interval placed after the end of its
//! previous window, or after the current round when that end has already
//! passed. There is no carrier sensing and no acknowledgment;
//! collisions are left entirely to the channel.

use log::trace;
use rand::Rng;
use rand::seq::SliceRandom;
use serde::Deserialize;

use super::DecisionContext;
use super::payload::Payload;
use crate::simulation::types::{Destination, Message, Round};

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct AlohaConfig {
    /// Airtime of every message, in rounds.
    pub message_length: Round,
    /// `(min_gap, max_gap)` added to the earliest allowed start.
    pub send_freq_interval: (Round, Round),
}

impl Default for AlohaConfig {
    fn default() -> Self {
        Self {
            message_length: 5,
            send_freq_interval: (0, 10),
        }
    }
}

impl AlohaConfig {
    pub fn validate(&self) -> Result<(), String> {
        let (min_gap, max_gap) = self.send_freq_interval;
        if min_gap > max_gap {
            return Err(format!("Invalid send_freq_interval ({}, {}): min_gap must not exceed max_gap", min_gap, max_gap));
        }
        // A one-round message sent right after its predecessor would already be over.
        if self.message_length < 2 {
            return Err(format!("Invalid message_length {}, must be at least 2", self.message_length));
        }
        Ok(())
    }
}

/// Per-host ALOHA state.
#[derive(Debug, Clone)]
pub struct Aloha {
    config: AlohaConfig,
    next_allowed_start: Round,
    /// Start of the outstanding message; cleared once the round passes it.
    in_flight_start: Option<Round>,
}

impl Aloha {
    pub fn new(config: AlohaConfig) -> Self {
        Self {
            config,
            next_allowed_start: 0,
            in_flight_start: None,
        }
    }

    pub fn next_allowed_start(&self) -> Round {
        self.next_allowed_start
    }

    /// Whether the previous transmission still blocks a new one.
    pub fn is_sending(&self) -> bool {
        self.in_flight_start.is_some()
    }

    pub fn decide(&mut self, ctx: &mut DecisionContext<'_>) -> Option<Message> {
        if let Some(start) = self.in_flight_start {
            if ctx.round > start + 1 {
                self.in_flight_start = None;
            }
        }

        // Reception only ever costs the host its turn.
        if ctx.incoming.is_some() || self.in_flight_start.is_some() {
            return None;
        }

        let destination = *ctx.neighbors.choose(&mut *ctx.rng)?;

        // After suppressed turns the previous end may lie in the past; never
        // open a window that started before the current round.
        let base = self.next_allowed_start.max(ctx.round);
        let (min_gap, max_gap) = self.config.send_freq_interval;
        let start_time = ctx.rng.gen_range(base + min_gap..=base + max_gap);
        let end_time = start_time + self.config.message_length;

        self.next_allowed_start = end_time;
        self.in_flight_start = Some(start_time);

        trace!("[{}] ALOHA scheduled [{}, {}) to {} at round {}", ctx.host, start_time, end_time, destination, ctx.round);
        Some(Message::new(
            ctx.host,
            Destination::Host(destination),
            start_time,
            end_time,
            Payload::Text("hello".to_string()),
        ))
    }
}
