//! Round-synchronous simulation driver.
//!
//! The [`Simulator`] owns every host, one channel store per host and the
//! archive sink. Each round runs in three passes:
//!
//! 1. **Evaluate**: every host decides against the previous round's state;
//!    emitted messages are deposited in the sender's store and in the store
//!    of every host the sender reaches right now.
//! 2. **Deliver and clean**: every store is checked for messages due at
//!    `round + 1`, the collision rule is applied, and elapsed messages are
//!    evicted to the archive.
//! 3. **Move**: mobile hosts advance one step.
//!
//! A message sent in round `r` can never be delivered in round `r`; the
//! host rejects windows that end at or before `r + 1`.

use std::collections::BTreeMap;
use std::rc::Rc;

use log::{debug, info, trace, warn};
use serde::Serialize;

use super::archive::{ArchiveSink, MemoryArchive};
use super::channel::{ChannelStore, Delivery};
use super::geometry::find_neighbors;
use super::host::Host;
use super::types::{HostId, Message, MessageRef, Point, Round};

/// Per-host part of a [`RunReport`].
#[derive(Debug, Clone, Serialize)]
pub struct HostReport {
    pub algorithm: &'static str,
    pub position: Point,
    pub metrics: BTreeMap<&'static str, u64>,
    /// Exact average, unlike the rounded `average ttl` counter.
    pub average_ttl: Option<f64>,
    /// Messages still sitting in the host's channel store.
    pub stored_messages: usize,
}

/// Summary of a finished (or interrupted) run.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub rounds: Round,
    pub timeout: Round,
    pub messages_deposited: u64,
    pub messages_archived: u64,
    /// Sum of every plain counter over all hosts.
    pub totals: BTreeMap<&'static str, u64>,
    pub hosts: BTreeMap<HostId, HostReport>,
}

/// Counters that make no sense summed across hosts.
const PER_HOST_ONLY: [&str; 3] = ["average ttl", "highest ttl", "lowest ttl"];

pub struct Simulator<S: ArchiveSink = MemoryArchive> {
    round: Round,
    timeout: Round,
    hosts: BTreeMap<HostId, Host>,
    channels: BTreeMap<HostId, ChannelStore>,
    archive: S,
    next_message_id: u64,
    archived: u64,
}

impl<S: ArchiveSink> Simulator<S> {
    /// Build a simulation over `hosts`. Ids are expected to be unique; a
    /// later host with an already used id replaces the earlier one.
    pub fn new(hosts: Vec<Host>, timeout: Round, archive: S) -> Self {
        let mut by_id = BTreeMap::new();
        let mut channels = BTreeMap::new();
        for host in hosts {
            let id = host.id();
            if by_id.insert(id, host).is_some() {
                warn!("[{}] duplicate host id, keeping the last definition", id);
            }
            channels.insert(id, ChannelStore::new());
        }

        Self {
            round: 0,
            timeout,
            hosts: by_id,
            channels,
            archive,
            next_message_id: 0,
            archived: 0,
        }
    }

    pub fn round(&self) -> Round {
        self.round
    }

    pub fn timeout(&self) -> Round {
        self.timeout
    }

    pub fn is_finished(&self) -> bool {
        self.hosts.is_empty() || self.round >= self.timeout
    }

    pub fn host_ids(&self) -> Vec<HostId> {
        self.hosts.keys().copied().collect()
    }

    pub fn host(&self, id: HostId) -> Option<&Host> {
        self.hosts.get(&id)
    }

    pub fn channel(&self, id: HostId) -> Option<&ChannelStore> {
        self.channels.get(&id)
    }

    pub fn archive(&self) -> &S {
        &self.archive
    }

    pub fn archive_mut(&mut self) -> &mut S {
        &mut self.archive
    }

    pub fn into_archive(self) -> S {
        self.archive
    }

    /// Number of messages deposited so far; ids run from 0 to this value.
    pub fn messages_deposited(&self) -> u64 {
        self.next_message_id
    }

    /// Counter name to count for one host.
    pub fn get_metrics(&self, id: HostId) -> Option<BTreeMap<&'static str, u64>> {
        self.hosts.get(&id).map(|host| host.metrics().as_map())
    }

    /// Hosts that `id` reaches with its current position and reach.
    pub fn neighbors_of(&self, id: HostId) -> Vec<HostId> {
        let Some(host) = self.hosts.get(&id) else {
            return Vec::new();
        };
        let positions: Vec<(HostId, Point)> = self.hosts.values().map(|h| (h.id(), h.position())).collect();
        find_neighbors(id, &host.position(), host.reach(), positions.iter().map(|(other, p)| (*other, p)))
    }

    /// Run rounds until the timeout.
    ///
    /// An empty host list or a zero timeout makes this a no-op. The archive
    /// is flushed at the end; a flush failure is logged, not returned.
    pub fn begin_loop(&mut self) {
        if self.hosts.is_empty() {
            warn!("No hosts to simulate, nothing to do");
            return;
        }
        if self.timeout == 0 {
            warn!("Timeout is zero, nothing to do");
            return;
        }

        info!("Simulation started: {} hosts, {} rounds", self.hosts.len(), self.timeout);
        let progress_step = (self.timeout / 10).max(1);

        while !self.is_finished() {
            self.step();
            if self.round % progress_step == 0 || self.round == self.timeout {
                info!(
                    "Round {}/{} ({}%), {} messages deposited, {} archived",
                    self.round,
                    self.timeout,
                    self.round * 100 / self.timeout,
                    self.next_message_id,
                    self.archived
                );
            }
        }

        if let Err(err) = self.archive.flush() {
            warn!("Archive flush failed: {:#}", err);
        }
        info!("Simulation finished after {} rounds", self.round);
    }

    /// Run exactly one round. Does nothing once the run is finished.
    pub fn step(&mut self) {
        if self.is_finished() {
            return;
        }
        let round = self.round;
        let ids = self.host_ids();

        // Neighbor sets from the positions at the start of the round
        let neighbors: BTreeMap<HostId, Vec<HostId>> = ids.iter().map(|id| (*id, self.neighbors_of(*id))).collect();

        for id in &ids {
            let reachable = neighbors.get(id).map(Vec::as_slice).unwrap_or(&[]);
            let decision = match self.hosts.get_mut(id) {
                Some(host) => host.evaluate_round(round, reachable, &ids),
                None => None,
            };
            if let Some(message) = decision {
                self.deposit(message, reachable);
            }
        }

        for id in &ids {
            self.deliver(*id, round);
            self.clean(*id, round);
        }

        for host in self.hosts.values_mut() {
            if host.advance_position() {
                trace!("[{}] moved to ({:.1}, {:.1})", host.id(), host.position().x, host.position().y);
            }
        }

        self.round += 1;
    }

    /// Put a message on the air as if its source had sent it this round.
    ///
    /// The message bypasses the source's algorithm and counters. Returns
    /// `None` for an unknown source or a window that already started.
    pub fn inject(&mut self, message: Message) -> Option<MessageRef> {
        let elapsed = message.start_time < self.round || message.end_time <= self.round + 1;
        if !self.hosts.contains_key(&message.source) || elapsed {
            warn!(
                "[{}] refusing to inject message [{}, {}) at round {}",
                message.source, message.start_time, message.end_time, self.round
            );
            return None;
        }
        let reachable = self.neighbors_of(message.source);
        Some(self.deposit(message, &reachable))
    }

    fn deposit(&mut self, mut message: Message, reachable: &[HostId]) -> MessageRef {
        message.id = self.next_message_id;
        self.next_message_id += 1;

        let message = Rc::new(message);
        trace!("[{}] on air: {}", message.source, message);

        for id in std::iter::once(&message.source).chain(reachable) {
            if let Some(store) = self.channels.get_mut(id) {
                store.push(Rc::clone(&message));
            }
        }
        message
    }

    fn deliver(&mut self, id: HostId, round: Round) {
        let Some(store) = self.channels.get(&id) else {
            return;
        };
        let outcome = store.due_for(id, round);

        let Some(receiver_position) = self.hosts.get(&id).map(Host::position) else {
            return;
        };

        match outcome {
            Delivery::Idle => {}
            Delivery::Delivered(message) => {
                let still_reachable = self
                    .hosts
                    .get(&message.source)
                    .is_some_and(|source| source.reaches(&receiver_position));
                let Some(host) = self.hosts.get_mut(&id) else {
                    return;
                };
                if still_reachable {
                    trace!("[{}] delivered #{} from {} at round {}", id, message.id, message.source, round);
                    host.metrics_mut().successfully_delivered += 1;
                    host.enqueue(message);
                } else {
                    debug!("[{}] #{} from {} unreachable at round {}", id, message.id, message.source, round);
                    host.metrics_mut().record_failure(&message);
                }
            }
            Delivery::Collision(messages) => {
                debug!("[{}] collision of {} messages at round {}", id, messages.len(), round);
                if let Some(host) = self.hosts.get_mut(&id) {
                    for message in &messages {
                        host.metrics_mut().record_failure(message);
                    }
                }
            }
            Delivery::Blocked { message, blockers } => {
                debug!(
                    "[{}] #{} from {} blocked by {} overlapping messages at round {}",
                    id, message.id, message.source, blockers, round
                );
                if let Some(host) = self.hosts.get_mut(&id) {
                    host.metrics_mut().record_failure(&message);
                }
            }
        }
    }

    fn clean(&mut self, id: HostId, round: Round) {
        let Some(store) = self.channels.get_mut(&id) else {
            return;
        };
        let archive = &mut self.archive;
        let evicted = store.clean(round, |message| archive.archive(id, round, &message.to_string()));
        self.archived += evicted as u64;
    }

    /// Snapshot of every host's counters.
    pub fn report(&self) -> RunReport {
        let mut totals: BTreeMap<&'static str, u64> = BTreeMap::new();
        let mut hosts = BTreeMap::new();

        for (id, host) in &self.hosts {
            let metrics = host.metrics().as_map();
            for (name, value) in &metrics {
                if !PER_HOST_ONLY.contains(name) {
                    *totals.entry(*name).or_insert(0) += *value;
                }
            }
            hosts.insert(
                *id,
                HostReport {
                    algorithm: host.algorithm().name(),
                    position: host.position(),
                    metrics,
                    average_ttl: host.metrics().ttl.average(),
                    stored_messages: self.channels.get(id).map_or(0, ChannelStore::len),
                },
            );
        }

        RunReport {
            rounds: self.round,
            timeout: self.timeout,
            messages_deposited: self.next_message_id,
            messages_archived: self.archived,
            totals,
            hosts,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::payload::Payload;
    use crate::protocol::{AlgorithmConfig, AlohaConfig, FloodingConfig};
    use crate::simulation::types::Destination;
    use rand::SeedableRng;
    use rand::rngs::StdRng;
    use std::collections::{BTreeSet, HashSet};

    fn aloha(length: Round, gap: (Round, Round)) -> AlgorithmConfig {
        AlgorithmConfig::Aloha(AlohaConfig {
            message_length: length,
            send_freq_interval: gap,
        })
    }

    /// Hosts that never originate anything.
    fn passive() -> AlgorithmConfig {
        AlgorithmConfig::Flooding(FloodingConfig {
            message_chance: 0.0,
            ..FloodingConfig::default()
        })
    }

    fn host(id: HostId, x: f64, y: f64, reach: f64, algorithm: &AlgorithmConfig) -> Host {
        Host::new(id, Point { x, y }, reach, algorithm.instantiate(), StdRng::seed_from_u64(1000 + id as u64))
    }

    fn text(source: HostId, destination: Destination, start: Round, end: Round) -> Message {
        Message::new(source, destination, start, end, Payload::Text("hello".to_string()))
    }

    #[test]
    fn aloha_pair_end_to_end() {
        let config = aloha(5, (0, 0));
        let mut sim = Simulator::new(vec![host(0, 0.0, 0.0, 100.0, &config), host(1, 10.0, 0.0, 100.0, &config)], 20, MemoryArchive::new());
        sim.begin_loop();
        assert_eq!(sim.round(), 20);

        let mut delivered = 0;
        for id in [0, 1] {
            let m = sim.get_metrics(id).unwrap();
            // Windows [0,5) [5,10) [10,15) [15,20) [20,25); the last is still on air
            assert_eq!(m["messages sent"], 5);
            let in_flight = 1;
            assert_eq!(m["messages sent"], m["successfully delivered"] + m["failed to deliver"] + in_flight);
            assert_eq!(m["failed to deliver"], m["messages failed"] + m["forward-messages failed"]);
            delivered += m["successfully delivered"];
        }
        // Both hosts use identical windows, so none is free of a competitor
        assert_eq!(delivered, 0);
        assert_eq!(sim.messages_deposited(), 10);
    }

    #[test]
    fn one_way_traffic_is_delivered() {
        let config = aloha(5, (1, 1));
        // Host 1 hears host 0 but reaches nobody itself
        let mut sim = Simulator::new(vec![host(0, 0.0, 0.0, 100.0, &config), host(1, 10.0, 0.0, 0.0, &config)], 20, MemoryArchive::new());
        sim.begin_loop();

        let sender = sim.get_metrics(0).unwrap();
        let receiver = sim.get_metrics(1).unwrap();
        // [1,6) [7,12) [13,18) [19,24)
        assert_eq!(sender["messages sent"], 4);
        assert_eq!(sender["successfully delivered"], 0);
        assert_eq!(receiver["messages sent"], 0);
        assert_eq!(receiver["successfully delivered"], 3);
        assert_eq!(receiver["failed to deliver"], 0);
        assert_eq!(receiver["messages received"], 3);
    }

    #[test]
    fn overlapping_windows_both_fail() {
        let p = passive();
        let mut sim = Simulator::new(
            vec![host(0, 0.0, 0.0, 10.0, &p), host(1, 5.0, 0.0, 10.0, &p), host(2, 0.0, 5.0, 10.0, &p)],
            25,
            MemoryArchive::new(),
        );
        sim.inject(text(1, Destination::Host(0), 10, 15)).unwrap();
        sim.inject(text(2, Destination::Host(0), 12, 18)).unwrap();
        sim.begin_loop();

        let m = sim.get_metrics(0).unwrap();
        assert_eq!(m["failed to deliver"], 2);
        assert_eq!(m["messages failed"], 2);
        assert_eq!(m["successfully delivered"], 0);
        assert_eq!(m["messages received"], 0);
    }

    #[test]
    fn disjoint_windows_are_delivered_once_each() {
        let p = passive();
        let mut sim = Simulator::new(
            vec![host(0, 0.0, 0.0, 10.0, &p), host(1, 5.0, 0.0, 10.0, &p), host(2, 0.0, 5.0, 10.0, &p)],
            25,
            MemoryArchive::new(),
        );
        sim.inject(text(1, Destination::Host(0), 10, 15)).unwrap();
        sim.inject(text(2, Destination::Host(0), 16, 20)).unwrap();
        sim.begin_loop();

        let m = sim.get_metrics(0).unwrap();
        assert_eq!(m["successfully delivered"], 2);
        assert_eq!(m["failed to deliver"], 0);
        assert_eq!(m["messages received"], 2);
        // Overheard by nobody else as a candidate
        assert_eq!(sim.get_metrics(1).unwrap()["successfully delivered"], 0);
        assert_eq!(sim.get_metrics(2).unwrap()["successfully delivered"], 0);
    }

    #[test]
    fn broadcast_collision_counts_every_candidate() {
        let p = passive();
        let mut sim = Simulator::new(
            vec![host(0, 0.0, 0.0, 10.0, &p), host(1, 5.0, 0.0, 10.0, &p), host(2, 0.0, 5.0, 10.0, &p)],
            15,
            MemoryArchive::new(),
        );
        sim.inject(text(1, Destination::Broadcast, 2, 9)).unwrap();
        sim.inject(text(2, Destination::Host(0), 4, 9)).unwrap();
        sim.begin_loop();

        assert_eq!(sim.get_metrics(0).unwrap()["failed to deliver"], 2);
        // Host 2 transmitted on top of the broadcast itself
        assert_eq!(sim.get_metrics(2).unwrap()["failed to deliver"], 1);
    }

    /// Host 0 (ALOHA, length 8, gap 1) is kept busy by 11 queued receptions
    /// and only gets its turn at round 11. Host 2 sends `[2, end)` to host 1.
    fn late_sender_run(competitor_end: Round) -> Simulator {
        let config = aloha(8, (1, 1));
        let p = passive();
        let mut busy = host(0, 0.0, 0.0, 10.0, &config);
        for _ in 0..11 {
            busy.enqueue(Rc::new(text(1, Destination::Host(0), 0, 5)));
        }
        // 0 reaches only 1; 2 reaches only 1
        let mut sim = Simulator::new(
            vec![busy, host(1, 5.0, 0.0, 10.0, &p), host(2, 12.0, 0.0, 10.0, &p)],
            25,
            MemoryArchive::new(),
        );
        sim.inject(text(2, Destination::Host(1), 2, competitor_end)).unwrap();
        sim.begin_loop();
        sim
    }

    fn windows_from(sim: &Simulator, receiver: HostId, source: HostId) -> Vec<(Round, Round)> {
        let archived = sim
            .archive()
            .records()
            .filter(|r| r.host == receiver)
            .map(|r| r.message().unwrap());
        let stored = sim.channel(receiver).unwrap().iter().map(|m| (**m).clone());
        archived
            .chain(stored)
            .filter(|m| m.source == source)
            .map(|m| (m.start_time, m.end_time))
            .collect()
    }

    #[test]
    fn late_turn_after_suppressed_rounds_starts_in_the_present() {
        let sim = late_sender_run(10);
        let sender = sim.get_metrics(0).unwrap();
        assert_eq!(sender["messages received"], 11);
        assert_eq!(sender["messages sent"], 1);
        assert_eq!(sender["messages expired"], 0);

        // Decided at round 11, so it cannot start before it
        assert_eq!(windows_from(&sim, 1, 0), vec![(12, 20)]);
        let receiver = sim.get_metrics(1).unwrap();
        assert_eq!(receiver["successfully delivered"], 2);
        assert_eq!(receiver["failed to deliver"], 0);
    }

    #[test]
    fn late_turn_still_collides_with_an_overlapping_window() {
        // [2, 13) overlaps the late window [12, 20)
        let sim = late_sender_run(13);
        assert_eq!(windows_from(&sim, 1, 0), vec![(12, 20)]);
        let receiver = sim.get_metrics(1).unwrap();
        assert_eq!(receiver["successfully delivered"], 0);
        assert_eq!(receiver["failed to deliver"], 2);
    }

    #[test]
    fn inject_rejects_elapsed_windows_and_unknown_sources() {
        let p = passive();
        let mut sim = Simulator::new(vec![host(0, 0.0, 0.0, 10.0, &p)], 5, MemoryArchive::new());
        assert!(sim.inject(text(0, Destination::Broadcast, 0, 1)).is_none());
        assert!(sim.inject(text(9, Destination::Broadcast, 3, 8)).is_none());
        assert_eq!(sim.messages_deposited(), 0);

        sim.step();
        assert!(sim.inject(text(0, Destination::Broadcast, 0, 8)).is_none());
        assert!(sim.inject(text(0, Destination::Broadcast, 1, 8)).is_some());
    }

    #[test]
    fn cleanup_archives_each_stored_message_exactly_once() {
        let config = aloha(4, (0, 6));
        let hosts = vec![
            host(0, 0.0, 0.0, 30.0, &config),
            host(1, 20.0, 0.0, 30.0, &config),
            host(2, 40.0, 0.0, 25.0, &config),
            host(3, 20.0, 25.0, 15.0, &config),
            host(4, 100.0, 100.0, 10.0, &config),
        ];
        let mut sim = Simulator::new(hosts, 400, MemoryArchive::new());
        let neighbors: BTreeMap<HostId, Vec<HostId>> = sim.host_ids().into_iter().map(|id| (id, sim.neighbors_of(id))).collect();

        // Messages put on the air must never overlap anything a store already evicted
        let mut evicted: Vec<(HostId, Message)> = Vec::new();
        while !sim.is_finished() {
            let round = sim.round();
            let first_new = sim.messages_deposited();
            let seen = evicted.len();
            evicted.extend(sim.archive().records().skip(seen).map(|r| (r.host, r.message().unwrap())));

            sim.step();

            for id in sim.host_ids() {
                for message in sim.channel(id).unwrap().iter().filter(|m| m.id >= first_new) {
                    assert!(message.start_time >= round, "#{} sent at round {} starts at {}", message.id, round, message.start_time);
                    for (_, old) in evicted.iter().filter(|(host, _)| *host == id) {
                        assert!(!message.overlaps(old), "#{} overlaps #{} evicted earlier by host {}", message.id, old.id, id);
                    }
                }
            }
        }

        let mut per_host: BTreeMap<HostId, Vec<u64>> = BTreeMap::new();
        let mut all: BTreeMap<u64, Message> = BTreeMap::new();

        for record in sim.archive().records() {
            let message = record.message().unwrap();
            assert!(message.end_time < record.round, "#{} evicted at {} before it elapsed", message.id, record.round);
            per_host.entry(record.host).or_default().push(message.id);
            all.insert(message.id, message);
        }
        for id in sim.host_ids() {
            for message in sim.channel(id).unwrap().iter() {
                per_host.entry(id).or_default().push(message.id);
                all.insert(message.id, (**message).clone());
            }
        }

        // No omissions overall
        assert_eq!(all.keys().copied().collect::<Vec<_>>(), (0..sim.messages_deposited()).collect::<Vec<_>>());
        assert!(sim.messages_deposited() > 50);

        for id in sim.host_ids() {
            let seen = per_host.remove(&id).unwrap_or_default();
            let unique: HashSet<u64> = seen.iter().copied().collect();
            assert_eq!(unique.len(), seen.len(), "duplicates for host {}", id);

            let expected: BTreeSet<u64> = all
                .values()
                .filter(|m| m.source == id || neighbors[&m.source].contains(&id))
                .map(|m| m.id)
                .collect();
            assert_eq!(unique.into_iter().collect::<BTreeSet<_>>(), expected, "store contents of host {}", id);
        }

        let report = sim.report();
        assert_eq!(report.messages_archived as usize, sim.archive().len());
        assert_eq!(report.hosts.len(), 5);
    }

    #[test]
    fn empty_or_zero_timeout_runs_are_noops() {
        let mut empty: Simulator = Simulator::new(Vec::new(), 10, MemoryArchive::new());
        empty.begin_loop();
        assert_eq!(empty.round(), 0);
        assert!(empty.get_metrics(0).is_none());

        let config = aloha(5, (0, 0));
        let mut idle = Simulator::new(vec![host(0, 0.0, 0.0, 10.0, &config), host(1, 1.0, 0.0, 10.0, &config)], 0, MemoryArchive::new());
        idle.begin_loop();
        idle.step();
        assert_eq!(idle.round(), 0);
        assert_eq!(idle.get_metrics(0).unwrap()["messages sent"], 0);
    }

    #[test]
    fn report_sums_plain_counters() {
        let config = aloha(5, (0, 0));
        let mut sim = Simulator::new(vec![host(0, 0.0, 0.0, 100.0, &config), host(1, 10.0, 0.0, 100.0, &config)], 20, MemoryArchive::new());
        sim.begin_loop();
        let report = sim.report();
        assert_eq!(report.totals["messages sent"], 10);
        assert!(!report.totals.contains_key("highest ttl"));
        assert_eq!(report.hosts[&0].algorithm, "aloha");

        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["hosts"]["1"]["metrics"]["messages sent"], 5);
    }
}
