//! Schedule-synchronized MAC in the style of S-MAC.
//!
//! A node first waits a random time for a neighbor's schedule announcement.
//! If one arrives it adopts it (follower); otherwise it draws its own
//! schedule and broadcasts it (synchronizer). From then on the node
//! alternates between sleeping and listening, listening whenever any known
//! schedule says so. While awake it answers the RTS/CTS/DATA/ACK handshake.
//!
//! ```text
//! INIT -> SYNC_INIT -> SYNC_SCHEDULE -> SLEEP <-> LISTEN
//! ```

use std::collections::BTreeMap;

use log::{debug, trace, warn};
use rand::Rng;
use rand::seq::SliceRandom;
use rand_distr::{Distribution, Normal};
use serde::Deserialize;

use super::DecisionContext;
use super::payload::{FrameKind, Payload};
use crate::simulation::types::{Destination, HostId, Message, Round};

/// Airtime of each frame type, in rounds.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct FrameDurations {
    pub sync: Round,
    pub rts: Round,
    pub cts: Round,
    pub data: Round,
    pub ack: Round,
}

impl Default for FrameDurations {
    fn default() -> Self {
        Self {
            sync: 15,
            rts: 10,
            cts: 10,
            data: 20,
            ack: 5,
        }
    }
}

impl FrameDurations {
    pub fn of(&self, kind: FrameKind) -> Round {
        match kind {
            FrameKind::Sync => self.sync,
            FrameKind::Rts => self.rts,
            FrameKind::Cts => self.cts,
            FrameKind::Data => self.data,
            FrameKind::Ack => self.ack,
        }
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct SmacConfig {
    /// Mean of the initial wait for a neighbor's SYNC, in rounds.
    pub sync_wait_mean: f64,
    pub sync_wait_std_dev: f64,
    pub sleep_period_range: (Round, Round),
    pub listen_period_range: (Round, Round),
    /// Delay between announcing a schedule and its first sleep.
    pub sleep_start_delay_range: (Round, Round),
    /// Chance per listening round to open a handshake.
    pub rts_probability: f64,
    /// Random backoff added in front of every transmission.
    pub contention_window: Round,
    pub frame_durations: FrameDurations,
}

impl Default for SmacConfig {
    fn default() -> Self {
        Self {
            sync_wait_mean: 30.0,
            sync_wait_std_dev: 10.0,
            sleep_period_range: (400, 600),
            listen_period_range: (100, 200),
            sleep_start_delay_range: (40, 90),
            rts_probability: 0.02,
            contention_window: 5,
            frame_durations: FrameDurations::default(),
        }
    }
}

fn check_range(name: &str, (min, max): (Round, Round)) -> Result<(), String> {
    if min == 0 {
        return Err(format!("Invalid {} ({}, {}): periods must be positive", name, min, max));
    }
    if min > max {
        return Err(format!("Invalid {} ({}, {}): min must not exceed max", name, min, max));
    }
    Ok(())
}

impl SmacConfig {
    pub fn validate(&self) -> Result<(), String> {
        if !self.sync_wait_mean.is_finite() || !self.sync_wait_std_dev.is_finite() || self.sync_wait_std_dev < 0.0 {
            return Err(format!(
                "Invalid sync wait distribution (mean {}, std-dev {})",
                self.sync_wait_mean, self.sync_wait_std_dev
            ));
        }
        check_range("sleep_period_range", self.sleep_period_range)?;
        check_range("listen_period_range", self.listen_period_range)?;
        check_range("sleep_start_delay_range", self.sleep_start_delay_range)?;
        if !(0.0..=1.0).contains(&self.rts_probability) {
            return Err(format!("Invalid rts_probability {}, must be within [0, 1]", self.rts_probability));
        }
        let d = &self.frame_durations;
        if [d.sync, d.rts, d.cts, d.data, d.ack].contains(&0) {
            return Err("Frame durations must be positive".to_string());
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MacState {
    Init,
    /// Waiting for a neighbor's schedule until `deadline`.
    SyncInit { deadline: Round },
    SyncSchedule,
    Sleep,
    Listen,
}

impl MacState {
    pub fn is_awake(&self) -> bool {
        matches!(self, MacState::SyncSchedule | MacState::Listen)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Follower,
    Synchronizer,
}

/// One entry of the schedule table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Schedule {
    pub sleep_period: Round,
    pub listen_period: Round,
    /// Absolute round of the first sleep.
    pub sleep_start: Round,
    pub next_sleep_round: Round,
    pub next_listen_round: Round,
}

impl Schedule {
    pub fn new(sleep_period: Round, listen_period: Round, sleep_start: Round) -> Self {
        Self {
            sleep_period,
            listen_period,
            sleep_start,
            next_sleep_round: sleep_start,
            next_listen_round: sleep_start + sleep_period,
        }
    }

    /// Schedule announced by a neighbor, or `None` when its periods are zero
    /// or its boundaries would overflow the round counter.
    pub fn checked(sleep_period: Round, listen_period: Round, sleep_start: Round) -> Option<Self> {
        if sleep_period == 0 || listen_period == 0 {
            return None;
        }
        let cycle = sleep_period.checked_add(listen_period)?;
        sleep_start.checked_add(cycle)?.checked_add(cycle)?;
        Some(Self::new(sleep_period, listen_period, sleep_start))
    }

    pub fn cycle(&self) -> Round {
        self.sleep_period + self.listen_period
    }

    pub fn started(&self, round: Round) -> bool {
        round >= self.sleep_start
    }

    /// Move both boundaries past `round`, one full cycle at a time.
    pub fn advance(&mut self, round: Round) {
        let cycle = self.cycle();
        while round >= self.next_sleep_round {
            self.next_sleep_round += cycle;
        }
        while round >= self.next_listen_round {
            self.next_listen_round += cycle;
        }
    }

    /// Listening means the next boundary ahead is a sleep start. Only
    /// meaningful after [`Schedule::advance`] for the same round.
    pub fn is_listening(&self, round: Round) -> bool {
        self.started(round) && self.next_sleep_round < self.next_listen_round
    }
}

/// Per-host S-MAC state.
#[derive(Debug, Clone)]
pub struct Smac {
    config: SmacConfig,
    state: MacState,
    role: Role,
    schedules: BTreeMap<HostId, Schedule>,
    /// End of the last transmission; nothing new starts before it.
    next_free_round: Round,
}

impl Smac {
    pub fn new(config: SmacConfig) -> Self {
        Self {
            config,
            state: MacState::Init,
            role: Role::Follower,
            schedules: BTreeMap::new(),
            next_free_round: 0,
        }
    }

    pub fn state(&self) -> MacState {
        self.state
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn schedules(&self) -> &BTreeMap<HostId, Schedule> {
        &self.schedules
    }

    /// Run one round of the state machine.
    ///
    /// # Parameters
    ///
    /// * `ctx` - Round context; `ctx.incoming` is at most one delivered message
    ///
    /// # Returns
    ///
    /// A frame to transmit, if the node decided to send this round.
    pub fn decide(&mut self, ctx: &mut DecisionContext<'_>) -> Option<Message> {
        let incoming = ctx.incoming;

        if let Some(message) = incoming {
            if let Payload::Sync {
                sleep_period,
                listen_period,
                sleep_start,
            } = message.payload
            {
                match Schedule::checked(sleep_period, listen_period, sleep_start) {
                    Some(schedule) => self.merge_schedule(ctx.host, message.source, schedule),
                    None => warn!(
                        "[{}] ignoring invalid SYNC {} {} {} from {}",
                        ctx.host, sleep_period, listen_period, sleep_start, message.source
                    ),
                }
            }
        }

        match self.state {
            MacState::Init => {
                let wait = self.draw_sync_wait(ctx);
                let deadline = ctx.round + wait;
                debug!("[{}] INIT -> SYNC_INIT, waiting for SYNC until round {}", ctx.host, deadline);
                self.state = MacState::SyncInit { deadline };
                return None;
            }
            MacState::SyncInit { deadline } if ctx.round >= deadline => {
                let (sleep_period, listen_period, wait) = {
                    let rng = &mut *ctx.rng;
                    (
                        draw(rng, self.config.sleep_period_range),
                        draw(rng, self.config.listen_period_range),
                        draw(rng, self.config.sleep_start_delay_range),
                    )
                };
                return self.announce_schedule(ctx, sleep_period, listen_period, wait);
            }
            MacState::SyncInit { .. } => return None,
            _ => {}
        }

        self.update_duty_cycle(ctx.host, ctx.round);

        if let Some(message) = incoming {
            if let Some(reply) = self.reply_to(ctx, message) {
                return Some(reply);
            }
        }

        if self.state == MacState::Listen && !ctx.neighbors.is_empty() && ctx.rng.gen_bool(self.config.rts_probability) {
            let target = *ctx.neighbors.choose(&mut *ctx.rng)?;
            trace!("[{}] opening handshake with {} at round {}", ctx.host, target, ctx.round);
            return self.transmit(ctx, Destination::Host(target), Payload::Rts);
        }

        None
    }

    /// Become synchronizer with the given schedule and broadcast it.
    ///
    /// `wait` is counted from the current round to the first sleep.
    pub(crate) fn announce_schedule(&mut self, ctx: &mut DecisionContext<'_>, sleep_period: Round, listen_period: Round, wait: Round) -> Option<Message> {
        let sleep_start = ctx.round + wait;
        self.schedules
            .insert(ctx.host, Schedule::new(sleep_period, listen_period, sleep_start));
        self.role = Role::Synchronizer;
        self.state = MacState::SyncSchedule;
        debug!(
            "[{}] SYNC_INIT -> SYNC_SCHEDULE as synchronizer (sleep {}, listen {}, first sleep at {})",
            ctx.host, sleep_period, listen_period, sleep_start
        );

        if ctx.neighbors.is_empty() {
            return None;
        }
        self.transmit(
            ctx,
            Destination::Broadcast,
            Payload::Sync {
                sleep_period,
                listen_period,
                sleep_start,
            },
        )
    }

    fn merge_schedule(&mut self, host: HostId, announcer: HostId, schedule: Schedule) {
        trace!(
            "[{}] merged schedule of {} (sleep {}, listen {}, first sleep at {})",
            host, announcer, schedule.sleep_period, schedule.listen_period, schedule.sleep_start
        );
        self.schedules.insert(announcer, schedule);

        if matches!(self.state, MacState::Init | MacState::SyncInit { .. }) {
            debug!("[{}] adopted schedule of {}, now follower", host, announcer);
            self.role = Role::Follower;
            self.state = MacState::SyncSchedule;
        }
    }

    fn update_duty_cycle(&mut self, host: HostId, round: Round) {
        if self.state == MacState::SyncSchedule {
            let earliest = self.schedules.values().map(|s| s.sleep_start).min();
            match earliest {
                Some(start) if round >= start => {
                    debug!("[{}] SYNC_SCHEDULE -> SLEEP at round {}", host, round);
                    self.state = MacState::Sleep;
                }
                _ => return,
            }
        }

        let mut listening = false;
        for schedule in self.schedules.values_mut() {
            if schedule.started(round) {
                schedule.advance(round);
                listening |= schedule.is_listening(round);
            }
        }

        let next = if listening { MacState::Listen } else { MacState::Sleep };
        if next != self.state {
            debug!("[{}] {:?} -> {:?} at round {}", host, self.state, next, round);
            self.state = next;
        }
    }

    fn reply_to(&mut self, ctx: &mut DecisionContext<'_>, message: &Message) -> Option<Message> {
        let Some(kind) = message.payload.frame_kind() else {
            debug!("[{}] ignoring non-MAC payload {:?} from {}", ctx.host, message.payload.to_string(), message.source);
            return None;
        };

        if kind == FrameKind::Sync {
            return None;
        }
        if !self.state.is_awake() {
            trace!("[{}] asleep, dropped {} from {}", ctx.host, kind.tag(), message.source);
            return None;
        }

        let reply = match kind {
            FrameKind::Rts => Payload::Cts,
            FrameKind::Cts => Payload::Data,
            FrameKind::Data => Payload::Ack,
            FrameKind::Ack => {
                trace!("[{}] handshake with {} complete at round {}", ctx.host, message.source, ctx.round);
                return None;
            }
            FrameKind::Sync => return None,
        };

        if ctx.neighbors.is_empty() {
            return None;
        }
        self.transmit(ctx, Destination::Host(message.source), reply)
    }

    /// Half duplex: refuse while the previous frame is still on air.
    fn transmit(&mut self, ctx: &mut DecisionContext<'_>, destination: Destination, payload: Payload) -> Option<Message> {
        if ctx.round < self.next_free_round {
            trace!("[{}] still transmitting until {}, dropped {}", ctx.host, self.next_free_round, payload);
            return None;
        }
        let kind = payload.frame_kind()?;
        let start_time = ctx.round + 1 + ctx.rng.gen_range(0..=self.config.contention_window);
        let end_time = start_time + self.config.frame_durations.of(kind);
        self.next_free_round = end_time;

        trace!("[{}] sending {} [{}, {}) to {}", ctx.host, payload, start_time, end_time, destination);
        Some(Message::new(ctx.host, destination, start_time, end_time, payload))
    }

    fn draw_sync_wait(&self, ctx: &mut DecisionContext<'_>) -> Round {
        let sample = Normal::new(self.config.sync_wait_mean, self.config.sync_wait_std_dev)
            .map(|normal| normal.sample(&mut *ctx.rng))
            .unwrap_or(self.config.sync_wait_mean);
        sample.round().max(1.0) as Round
    }
}

fn draw<R: Rng>(rng: &mut R, (min, max): (Round, Round)) -> Round {
    rng.gen_range(min..=max)
}
