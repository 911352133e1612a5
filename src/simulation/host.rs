//! A single network participant.
//!
//! A host owns its position, reach, protocol state, input queue, counters
//! and random source. The simulator asks it once per round what to send and
//! hands it delivered messages through [`Host::enqueue`].

use std::collections::VecDeque;

use log::{trace, warn};
use rand::Rng;
use rand::rngs::StdRng;
use serde::Deserialize;

use super::geometry::{Region, within_reach};
use super::types::{HostId, HostMetrics, Message, MessageRef, Point, Round};
use crate::protocol::{Algorithm, DecisionContext};

/// Random-waypoint movement parameters.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct MobilityConfig {
    /// Chance per idle round to start a new move.
    pub movement_frequency: f64,
    /// Largest displacement per axis of one move is `max_move / 2`.
    pub max_move: f64,
    /// Rounds a single move takes.
    pub duration_range: (Round, Round),
}

impl Default for MobilityConfig {
    fn default() -> Self {
        Self {
            movement_frequency: 0.01,
            max_move: 50.0,
            duration_range: (500, 2000),
        }
    }
}

impl MobilityConfig {
    pub fn validate(&self) -> Result<(), String> {
        if !(0.0..=1.0).contains(&self.movement_frequency) {
            return Err(format!("Invalid movement_frequency {}, must be within [0, 1]", self.movement_frequency));
        }
        if self.max_move.is_nan() || self.max_move < 0.0 {
            return Err(format!("Invalid max_move {}, must be non-negative", self.max_move));
        }
        let (min, max) = self.duration_range;
        if min == 0 || min > max {
            return Err(format!("Invalid mobility duration_range ({}, {})", min, max));
        }
        Ok(())
    }
}

/// Movement state of a mobile host.
#[derive(Debug, Clone)]
pub struct Mobility {
    config: MobilityConfig,
    region: Region,
    step: (f64, f64),
    turns_remaining: Round,
}

impl Mobility {
    pub fn new(config: MobilityConfig, region: Region) -> Self {
        Self {
            config,
            region,
            step: (0.0, 0.0),
            turns_remaining: 0,
        }
    }

    pub fn is_moving(&self) -> bool {
        self.turns_remaining > 0
    }

    /// Position after one more round.
    fn advance(&mut self, position: Point, rng: &mut StdRng) -> Point {
        if self.turns_remaining == 0 {
            if !rng.gen_bool(self.config.movement_frequency) {
                return position;
            }
            let half = self.config.max_move / 2.0;
            let target = self.region.clamp(Point {
                x: position.x + rng.gen_range(-half..=half),
                y: position.y + rng.gen_range(-half..=half),
            });
            let (min, max) = self.config.duration_range;
            let turns = rng.gen_range(min..=max);
            self.step = ((target.x - position.x) / turns as f64, (target.y - position.y) / turns as f64);
            self.turns_remaining = turns;
            return position;
        }

        self.turns_remaining -= 1;
        self.region.clamp(Point {
            x: position.x + self.step.0,
            y: position.y + self.step.1,
        })
    }
}

#[derive(Debug)]
pub struct Host {
    id: HostId,
    position: Point,
    reach: f64,
    algorithm: Algorithm,
    input_queue: VecDeque<MessageRef>,
    metrics: HostMetrics,
    mobility: Option<Mobility>,
    rng: StdRng,
}

impl Host {
    pub fn new(id: HostId, position: Point, reach: f64, algorithm: Algorithm, rng: StdRng) -> Self {
        Self {
            id,
            position,
            reach,
            algorithm,
            input_queue: VecDeque::new(),
            metrics: HostMetrics::default(),
            mobility: None,
            rng,
        }
    }

    pub fn with_mobility(mut self, mobility: Mobility) -> Self {
        self.mobility = Some(mobility);
        self
    }

    pub fn id(&self) -> HostId {
        self.id
    }

    pub fn position(&self) -> Point {
        self.position
    }

    pub fn reach(&self) -> f64 {
        self.reach
    }

    pub fn algorithm(&self) -> &Algorithm {
        &self.algorithm
    }

    pub fn metrics(&self) -> &HostMetrics {
        &self.metrics
    }

    pub fn metrics_mut(&mut self) -> &mut HostMetrics {
        &mut self.metrics
    }

    pub fn pending(&self) -> usize {
        self.input_queue.len()
    }

    /// Whether a transmission from this host covers `to`.
    pub fn reaches(&self, to: &Point) -> bool {
        within_reach(&self.position, self.reach, to)
    }

    /// Queue a delivered message for the next evaluation.
    pub fn enqueue(&mut self, message: MessageRef) {
        self.input_queue.push_back(message);
    }

    /// Phase-one work of a round.
    ///
    /// Takes at most one message from the input queue, lets the algorithm
    /// decide, and screens the decision before it reaches the channel.
    ///
    /// # Parameters
    ///
    /// * `round` - Current round
    /// * `neighbors` - Hosts this host reaches right now
    /// * `hosts` - Every host of the simulation
    ///
    /// # Returns
    ///
    /// The message to deposit, or `None`. Windows starting before `round`
    /// or ending at or before `round + 1` are counted as expired.
    pub fn evaluate_round(&mut self, round: Round, neighbors: &[HostId], hosts: &[HostId]) -> Option<Message> {
        let incoming = self.input_queue.pop_front();
        if let Some(message) = &incoming {
            self.record_reception(message);
        }

        let mut ctx = DecisionContext {
            host: self.id,
            round,
            neighbors,
            hosts,
            incoming: incoming.as_deref(),
            rng: &mut self.rng,
        };
        let message = self.algorithm.decide(&mut ctx)?;

        // A window opened before this round could overlap messages that
        // cleanup already evicted.
        if message.start_time < round || message.end_time <= round + 1 {
            warn!(
                "[{}] dropping message with elapsed window [{}, {}) at round {}",
                self.id, message.start_time, message.end_time, round
            );
            self.metrics.messages_expired += 1;
            return None;
        }

        if message.is_forward() {
            self.metrics.messages_forwarded += 1;
        } else {
            self.metrics.messages_sent += 1;
        }
        Some(message)
    }

    fn record_reception(&mut self, message: &Message) {
        match message.end_destination {
            Some(target) if target != self.id => {
                self.metrics.forward_messages_received += 1;
            }
            _ => {
                self.metrics.messages_received += 1;
                if let Some(ttl) = message.ttl {
                    self.metrics.ttl.record(ttl.consumed());
                }
            }
        }
        trace!("[{}] received {}", self.id, message);
    }

    /// Move one step if mobile. Returns whether the position changed.
    pub fn advance_position(&mut self) -> bool {
        let Some(mobility) = self.mobility.as_mut() else {
            return false;
        };
        let next = mobility.advance(self.position, &mut self.rng);
        let moved = next != self.position;
        self.position = next;
        moved
    }
}
