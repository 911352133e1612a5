//! Discrete, round-based simulator of a shared wireless medium.
//!
//! Hosts on a 2D plane exchange timed messages over a collision-prone
//! channel. A pluggable link-layer algorithm (ALOHA, an S-MAC style
//! sleep/listen protocol, or TTL-bounded flooding) decides when each host
//! transmits; the simulator decides whether a transmission is delivered,
//! collides, or is dropped.

pub mod common;
pub mod protocol;
pub mod simulation;
