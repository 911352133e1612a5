//! Network simulation core module.
//!
//! This module provides the round-based simulation of a shared wireless
//! medium. It integrates:
//! - Hosts with position, reach, protocol state and counters
//! - Per-host channel stores of overlapping transmissions
//! - The collision rule and incremental cleanup of elapsed messages
//! - Archival of evicted messages
//!
//! ## Module Organization
//!
//! - `types`: Core data structures (messages, destinations, metrics)
//! - `geometry`: Reachability and placement region
//! - `channel`: Channel store, delivery test and cleanup
//! - `host`: Host state, per-round evaluation, mobility
//! - `archive`: Sinks for evicted messages
//! - `network`: The [`Simulator`] driving the round loop
//!
//! ## Public API
//!
//! Build hosts (usually through `common::scene`), hand them to
//! [`Simulator::new`] together with an archive sink, then call
//! [`Simulator::begin_loop`] and read the counters back with
//! [`Simulator::get_metrics`] or [`Simulator::report`].

pub mod archive;
pub mod channel;
pub mod geometry;
pub mod host;
pub mod network;
pub mod types;

pub use archive::{ArchiveSink, ArchivedRecord, FileArchive, LogArchive, MemoryArchive};
pub use host::{Host, Mobility, MobilityConfig};
pub use network::{RunReport, Simulator};
pub use types::{Destination, HostId, Message, MessageRef, Point, Round};
