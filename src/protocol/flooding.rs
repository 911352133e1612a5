//! TTL-bounded flooding of application messages.
//!
//! Every host occasionally originates a message for a random end
//! destination and multicasts it to its neighbors. Hosts relay each flood
//! message they see for the first time until its hop budget runs out.

use std::collections::{BTreeSet, HashSet};

use log::trace;
use rand::Rng;
use rand::seq::SliceRandom;
use serde::Deserialize;

use super::DecisionContext;
use super::payload::Payload;
use crate::simulation::types::{Destination, HostId, Message, Round, Ttl};

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct FloodingConfig {
    /// Chance per round to originate a new message.
    pub message_chance: f64,
    pub duration_range: (Round, Round),
    pub initial_ttl: u8,
}

impl Default for FloodingConfig {
    fn default() -> Self {
        Self {
            message_chance: 0.1,
            duration_range: (10, 150),
            initial_ttl: 64,
        }
    }
}

impl FloodingConfig {
    pub fn validate(&self) -> Result<(), String> {
        if !(0.0..=1.0).contains(&self.message_chance) {
            return Err(format!("Invalid message_chance {}, must be within [0, 1]", self.message_chance));
        }
        let (min, max) = self.duration_range;
        if min == 0 || min > max {
            return Err(format!("Invalid duration_range ({}, {})", min, max));
        }
        if self.initial_ttl == 0 {
            return Err("initial_ttl must be positive".to_string());
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct Flooding {
    config: FloodingConfig,
    /// `(origin, seq)` of every flood message handled so far.
    seen: HashSet<(HostId, u32)>,
    next_seq: u32,
    next_free_round: Round,
}

impl Flooding {
    pub fn new(config: FloodingConfig) -> Self {
        Self {
            config,
            seen: HashSet::new(),
            next_seq: 0,
            next_free_round: 0,
        }
    }

    pub fn has_seen(&self, origin: HostId, seq: u32) -> bool {
        self.seen.contains(&(origin, seq))
    }

    pub fn decide(&mut self, ctx: &mut DecisionContext<'_>) -> Option<Message> {
        if ctx.neighbors.is_empty() {
            return None;
        }

        let incoming = ctx.incoming;
        if let Some(message) = incoming {
            if let Some(relay) = self.relay(ctx, message) {
                return Some(relay);
            }
        }

        if !ctx.rng.gen_bool(self.config.message_chance) {
            return None;
        }
        self.originate(ctx)
    }

    fn relay(&mut self, ctx: &mut DecisionContext<'_>, message: &Message) -> Option<Message> {
        let Payload::Flood { seq } = message.payload else {
            trace!("[{}] not relaying non-flood payload from {}", ctx.host, message.source);
            return None;
        };

        let first_time = self.seen.insert((message.origin, seq));
        if message.end_destination == Some(ctx.host) || !first_time || message.origin == ctx.host {
            return None;
        }

        let start_time = self.next_start(ctx.round);
        let relay = message.forwarded(ctx.host, multicast(ctx.neighbors), start_time)?;
        self.next_free_round = relay.end_time;
        trace!(
            "[{}] relaying FLOOD {} of {} [{}, {}) ttl {:?}",
            ctx.host, seq, relay.origin, relay.start_time, relay.end_time, relay.ttl
        );
        Some(relay)
    }

    fn originate(&mut self, ctx: &mut DecisionContext<'_>) -> Option<Message> {
        let others: Vec<HostId> = ctx.hosts.iter().copied().filter(|h| *h != ctx.host).collect();
        let end_destination = *others.choose(&mut *ctx.rng)?;

        let (min, max) = self.config.duration_range;
        let duration = ctx.rng.gen_range(min..=max);
        let start_time = self.next_start(ctx.round);
        self.next_free_round = start_time + duration;

        let seq = self.next_seq;
        self.next_seq += 1;
        self.seen.insert((ctx.host, seq));

        trace!("[{}] originating FLOOD {} for {} [{}, {})", ctx.host, seq, end_destination, start_time, start_time + duration);
        Some(
            Message::new(
                ctx.host,
                multicast(ctx.neighbors),
                start_time,
                start_time + duration,
                Payload::Flood { seq },
            )
            .with_end_destination(end_destination, Ttl::new(self.config.initial_ttl)),
        )
    }

    /// Earliest start that does not overlap our own previous transmission.
    fn next_start(&self, round: Round) -> Round {
        (round + 1).max(self.next_free_round)
    }
}

fn multicast(neighbors: &[HostId]) -> Destination {
    Destination::Multicast(neighbors.iter().copied().collect::<BTreeSet<_>>())
}
