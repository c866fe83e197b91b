use std::{
    cmp::Reverse,
    collections::{BinaryHeap, HashMap},
};

use crate::types::{ActuatorId, NodeId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TimerKey {
    ActuatorOff(ActuatorId),
    BoostExpiry(NodeId),
    KeepAlive,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
struct ScheduledEvent {
    fire_at_ms: u64,
    seq: u64,
    key: TimerKey,
}

#[derive(Debug, Clone, Copy)]
struct LiveEntry {
    seq: u64,
    fire_at_ms: u64,
}

#[derive(Debug, Clone, Default)]
pub struct TimerQueue {
    heap: BinaryHeap<Reverse<ScheduledEvent>>,
    live: HashMap<TimerKey, LiveEntry>,
    next_seq: u64,
}

impl TimerQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn schedule(&mut self, key: TimerKey, fire_at_ms: u64) {
        let seq = self.next_seq;
        self.next_seq = self.next_seq.wrapping_add(1);
        self.live.insert(key, LiveEntry { seq, fire_at_ms });
        self.heap.push(Reverse(ScheduledEvent {
            fire_at_ms,
            seq,
            key,
        }));
    }

    pub fn cancel(&mut self, key: TimerKey) -> bool {
        self.live.remove(&key).is_some()
    }

    pub fn deadline(&self, key: TimerKey) -> Option<u64> {
        self.live.get(&key).map(|entry| entry.fire_at_ms)
    }

    pub fn next_deadline(&mut self) -> Option<u64> {
        self.prune_stale();
        self.heap.peek().map(|Reverse(event)| event.fire_at_ms)
    }

    pub fn pop_due(&mut self, now_ms: u64) -> Option<(TimerKey, u64)> {
        self.prune_stale();
        let Reverse(event) = self.heap.peek().copied()?;
        if event.fire_at_ms > now_ms {
            return None;
        }
        self.heap.pop();
        self.live.remove(&event.key);
        Some((event.key, event.fire_at_ms))
    }

    pub fn len(&self) -> usize {
        self.live.len()
    }

    pub fn is_empty(&self) -> bool {
        self.live.is_empty()
    }

    pub fn clear(&mut self) {
        self.heap.clear();
        self.live.clear();
    }

    fn prune_stale(&mut self) {
        while let Some(Reverse(event)) = self.heap.peek() {
            let is_live = self
                .live
                .get(&event.key)
                .map(|entry| entry.seq == event.seq)
                .unwrap_or(false);
            if is_live {
                break;
            }
            self.heap.pop();
        }
    }
}
