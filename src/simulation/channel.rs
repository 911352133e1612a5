//! Per-host view of the shared medium.
//!
//! Every transmission is appended to the store of its sender and of every
//! host the sender reached at insertion time. The store is insertion
//! ordered, not time ordered. Delivery decisions and the incremental
//! cleanup both work from this list.

use std::collections::VecDeque;
use std::rc::Rc;

use super::types::{HostId, MessageRef, Round};

/// Result of the delivery test for one host in one round.
#[derive(Debug)]
pub enum Delivery {
    /// No message addressed to the host ends this round.
    Idle,
    /// Exactly one due message and nothing overlapping it.
    Delivered(MessageRef),
    /// Several due messages at once; all of them are lost.
    Collision(Vec<MessageRef>),
    /// One due message whose window overlaps at least one other message.
    Blocked { message: MessageRef, blockers: usize },
}

/// Insertion-ordered list of the transmissions a host physically overlaps.
#[derive(Debug, Default)]
pub struct ChannelStore {
    entries: VecDeque<MessageRef>,
    /// Cleanup is skipped while the round is at or below this value.
    recheck_not_before: Round,
}

impl ChannelStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, message: MessageRef) {
        self.entries.push_back(message);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &MessageRef> {
        self.entries.iter()
    }

    /// Round up to which cleanup will not look at this store again.
    pub fn recheck_not_before(&self) -> Round {
        self.recheck_not_before
    }

    /// Other messages in the store whose window overlaps `message`
    /// (inclusive bounds, identity excluded).
    pub fn conflicting<'a>(&'a self, message: &'a MessageRef) -> impl Iterator<Item = &'a MessageRef> + 'a {
        self.entries
            .iter()
            .filter(move |other| !Rc::ptr_eq(other, message) && message.overlaps(other))
    }

    /// Delivery test for `host` in `round`.
    ///
    /// Candidates are messages addressed to the host (directly, by multicast
    /// or by broadcast) whose window ends at `round + 1`. The host's own
    /// transmissions are never candidates but still block reception.
    ///
    /// # Parameters
    ///
    /// * `host` - ID of the host owning this store
    /// * `round` - Current round
    ///
    /// # Returns
    ///
    /// The delivery outcome. The store itself is not modified.
    pub fn due_for(&self, host: HostId, round: Round) -> Delivery {
        let mut candidates: Vec<MessageRef> = self
            .entries
            .iter()
            .filter(|m| m.end_time == round + 1 && m.source != host && m.destination.includes(host))
            .cloned()
            .collect();

        match candidates.len() {
            0 => Delivery::Idle,
            1 => {
                let message = candidates.remove(0);
                let blockers = self.conflicting(&message).count();
                if blockers > 0 {
                    Delivery::Blocked { message, blockers }
                } else {
                    Delivery::Delivered(message)
                }
            }
            _ => Delivery::Collision(candidates),
        }
    }

    /// Incrementally evict messages that can no longer affect any delivery.
    ///
    /// Looks only at the head (oldest inserted) entry. The head is evicted
    /// once it has elapsed and every overlapping peer has elapsed too; then
    /// the new head is examined. When the head cannot go yet, the earliest
    /// round at which that could change is remembered and the store is left
    /// alone until the round counter passes it.
    ///
    /// # Parameters
    ///
    /// * `round` - Current round
    /// * `on_evict` - Receives every evicted message, in eviction order
    ///
    /// # Returns
    ///
    /// The number of evicted messages.
    pub fn clean(&mut self, round: Round, mut on_evict: impl FnMut(&MessageRef)) -> usize {
        let mut evicted = 0;

        while round > self.recheck_not_before {
            let Some(head) = self.entries.front() else {
                break;
            };

            // Still on air ourselves
            if head.end_time >= round {
                self.recheck_not_before = head.end_time;
                break;
            }

            let pending = self.conflicting(head).filter(|m| m.end_time >= round).map(|m| m.end_time).min();
            if let Some(end_time) = pending {
                self.recheck_not_before = end_time;
                break;
            }

            if let Some(head) = self.entries.pop_front() {
                on_evict(&head);
                evicted += 1;
            }
        }

        evicted
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::payload::Payload;
    use crate::simulation::types::{Destination, Message};

    fn msg(id: u64, source: HostId, destination: Destination, start: Round, end: Round) -> MessageRef {
        let mut m = Message::new(source, destination, start, end, Payload::Text("hello".to_string()));
        m.id = id;
        Rc::new(m)
    }

    #[test]
    fn overlapping_windows_block_each_other() {
        let mut store = ChannelStore::new();
        store.push(msg(1, 1, Destination::Host(0), 10, 15));
        store.push(msg(2, 2, Destination::Host(0), 12, 18));

        assert!(matches!(store.due_for(0, 14), Delivery::Blocked { blockers: 1, .. }));
        assert!(matches!(store.due_for(0, 17), Delivery::Blocked { blockers: 1, .. }));
    }

    #[test]
    fn disjoint_windows_are_delivered_independently() {
        let mut store = ChannelStore::new();
        store.push(msg(1, 1, Destination::Host(0), 10, 15));
        store.push(msg(2, 2, Destination::Host(0), 16, 20));

        match store.due_for(0, 14) {
            Delivery::Delivered(m) => assert_eq!(m.id, 1),
            other => panic!("unexpected {:?}", other),
        }
        match store.due_for(0, 19) {
            Delivery::Delivered(m) => assert_eq!(m.id, 2),
            other => panic!("unexpected {:?}", other),
        }
        assert!(matches!(store.due_for(0, 15), Delivery::Idle));
    }

    #[test]
    fn simultaneous_arrivals_collide() {
        let mut store = ChannelStore::new();
        store.push(msg(1, 1, Destination::Host(0), 2, 9));
        store.push(msg(2, 2, Destination::Broadcast, 4, 9));
        match store.due_for(0, 8) {
            Delivery::Collision(all) => assert_eq!(all.len(), 2),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn messages_for_others_and_own_transmissions_only_block() {
        let mut store = ChannelStore::new();
        store.push(msg(1, 0, Destination::Broadcast, 0, 5));
        store.push(msg(2, 3, Destination::Host(4), 20, 25));
        store.push(msg(3, 5, Destination::Multicast([0, 4].into_iter().collect()), 20, 30));

        // Own broadcast is never delivered back to the sender
        assert!(matches!(store.due_for(0, 4), Delivery::Idle));
        // Not addressed to host 0
        assert!(matches!(store.due_for(0, 24), Delivery::Idle));
        // Addressed by multicast, but blocked by the overheard message 2
        assert!(matches!(store.due_for(0, 29), Delivery::Blocked { blockers: 1, .. }));
    }

    #[test]
    fn cleanup_waits_for_overlapping_peers() {
        let mut store = ChannelStore::new();
        store.push(msg(1, 1, Destination::Host(0), 10, 15));
        store.push(msg(2, 2, Destination::Host(0), 12, 18));
        store.push(msg(3, 3, Destination::Host(0), 30, 35));

        let mut evicted = Vec::new();
        // Head still on air
        assert_eq!(store.clean(15, |m| evicted.push(m.id)), 0);
        assert_eq!(store.recheck_not_before(), 15);

        // Head elapsed but its peer ends at 18
        assert_eq!(store.clean(16, |m| evicted.push(m.id)), 0);
        assert_eq!(store.recheck_not_before(), 18);

        // Nothing is rescanned until the peer elapsed
        assert_eq!(store.clean(18, |m| evicted.push(m.id)), 0);

        // Both go together; the third is still ahead
        assert_eq!(store.clean(19, |m| evicted.push(m.id)), 2);
        assert_eq!(evicted, vec![1, 2]);
        assert_eq!(store.len(), 1);
        assert_eq!(store.recheck_not_before(), 35);
    }

    #[test]
    fn cleanup_on_empty_store_is_noop() {
        let mut store = ChannelStore::new();
        assert_eq!(store.clean(100, |_| panic!("nothing to evict")), 0);
        assert!(store.is_empty());
    }
}
