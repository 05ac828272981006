use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::time::{Duration, Instant};

use super::stats::PacketLossSimulation;
use super::transport::{NetworkEvent, Reliability};

#[derive(Debug)]
struct DelayedEvent {
    release_time: Instant,
    order: u64,
    event: NetworkEvent,
}

impl PartialEq for DelayedEvent {
    fn eq(&self, other: &Self) -> bool {
        self.release_time == other.release_time && self.order == other.order
    }
}

impl Eq for DelayedEvent {}

impl PartialOrd for DelayedEvent {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for DelayedEvent {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reverse order for min-heap; arrival order breaks ties.
        other
            .release_time
            .cmp(&self.release_time)
            .then_with(|| other.order.cmp(&self.order))
    }
}

/// Holds incoming events until their fake-lag release time, dropping
/// unreliable payloads at the configured loss rate.
#[derive(Debug, Default)]
pub struct NetworkSimulator {
    lag: Duration,
    loss: PacketLossSimulation,
    queue: BinaryHeap<DelayedEvent>,
    next_order: u64,
}

impl NetworkSimulator {
    pub fn new(lag: Duration, loss: PacketLossSimulation) -> Self {
        Self {
            lag,
            loss,
            queue: BinaryHeap::new(),
            next_order: 0,
        }
    }

    /// Queues `event`, returning false if it was dropped.
    pub fn enqueue(&mut self, event: NetworkEvent) -> bool {
        let droppable = matches!(
            event,
            NetworkEvent::Packet {
                reliability: Reliability::Unreliable,
                ..
            }
        );
        if droppable && self.loss.should_drop() {
            return false;
        }

        self.queue.push(DelayedEvent {
            release_time: Instant::now() + self.lag,
            order: self.next_order,
            event,
        });
        self.next_order += 1;
        true
    }

    pub fn take_ready(&mut self) -> Option<NetworkEvent> {
        self.take_ready_at(Instant::now())
    }

    fn take_ready_at(&mut self, now: Instant) -> Option<NetworkEvent> {
        if self.queue.peek()?.release_time > now {
            return None;
        }
        self.queue.pop().map(|delayed| delayed.event)
    }

    pub fn pending(&self) -> usize {
        self.queue.len()
    }

    pub fn clear(&mut self) {
        self.queue.clear();
    }
}
