//! Link-layer algorithms deciding when a host transmits.
//!
//! The set of algorithms is closed: every host owns one [`Algorithm`]
//! value holding its private protocol state. Each round the host hands the
//! algorithm a [`DecisionContext`] with at most one incoming message and
//! gets back at most one message to transmit.
//!
//! ## Module Organization
//!
//! - `payload`: Tagged payloads (`SYNC`, `RTS`, `FLOOD`, ...)
//! - `aloha`: Random access with a jittered start window
//! - `smac`: Sleep/listen schedule synchronization with RTS/CTS/DATA/ACK
//! - `flooding`: TTL-bounded relaying of application messages

pub mod aloha;
pub mod flooding;
pub mod payload;
pub mod smac;

use rand::rngs::StdRng;
use serde::Deserialize;

use crate::simulation::types::{HostId, Message, Round};

pub use aloha::{Aloha, AlohaConfig};
pub use flooding::{Flooding, FloodingConfig};
pub use payload::{FrameKind, Payload};
pub use smac::{MacState, Role, Schedule, Smac, SmacConfig};

/// Everything an algorithm may look at while deciding a round.
pub struct DecisionContext<'a> {
    /// The deciding host.
    pub host: HostId,
    pub round: Round,
    /// Hosts the deciding host reaches this round.
    pub neighbors: &'a [HostId],
    /// Every host of the simulation (end destinations for relayed traffic).
    pub hosts: &'a [HostId],
    /// Message taken from the input queue this round, if any.
    pub incoming: Option<&'a Message>,
    /// The host's own random source.
    pub rng: &'a mut StdRng,
}

/// Protocol state of one host.
#[derive(Debug, Clone)]
pub enum Algorithm {
    Aloha(Aloha),
    ScheduleSync(Smac),
    Flooding(Flooding),
}

impl Algorithm {
    /// Run one round of the protocol.
    ///
    /// Returns the message to transmit, if any. A host without neighbors
    /// never transmits; that is not an error.
    pub fn decide(&mut self, ctx: &mut DecisionContext<'_>) -> Option<Message> {
        match self {
            Algorithm::Aloha(aloha) => aloha.decide(ctx),
            Algorithm::ScheduleSync(smac) => smac.decide(ctx),
            Algorithm::Flooding(flooding) => flooding.decide(ctx),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Algorithm::Aloha(_) => "aloha",
            Algorithm::ScheduleSync(_) => "smac",
            Algorithm::Flooding(_) => "flooding",
        }
    }
}

/// Algorithm block of a scene file, tagged by `"type"`.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AlgorithmConfig {
    Aloha(AlohaConfig),
    Smac(SmacConfig),
    Flooding(FloodingConfig),
}

impl AlgorithmConfig {
    /// Fresh per-host state. Every host gets its own instance; nothing is
    /// shared between hosts.
    pub fn instantiate(&self) -> Algorithm {
        match self {
            AlgorithmConfig::Aloha(config) => Algorithm::Aloha(Aloha::new(config.clone())),
            AlgorithmConfig::Smac(config) => Algorithm::ScheduleSync(Smac::new(config.clone())),
            AlgorithmConfig::Flooding(config) => Algorithm::Flooding(Flooding::new(config.clone())),
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        match self {
            AlgorithmConfig::Aloha(config) => config.validate(),
            AlgorithmConfig::Smac(config) => config.validate(),
            AlgorithmConfig::Flooding(config) => config.validate(),
        }
    }
}
