use std::collections::VecDeque;
use std::time::Instant;

use crate::sequence::{TIME_STEP_MAX, more_recent_ack};

const ACK_WINDOW: u16 = 32;
const RECENT_CAPACITY: usize = 128;

/// Whether `sequence` is covered by an `(ack, ack_bits)` pair.
pub fn is_acked(sequence: u16, ack: u16, ack_bits: u32) -> bool {
    if sequence == ack {
        return true;
    }
    if !more_recent_ack(sequence, ack, TIME_STEP_MAX) {
        return false;
    }

    let diff = ack.wrapping_sub(sequence);
    diff <= ACK_WINDOW && ack_bits & (1 << (diff - 1)) != 0
}

#[derive(Debug, Clone)]
pub struct PendingPacket {
    pub sequence: u16,
    pub send_time: Instant,
    pub acked: bool,
}

/// Sent sequences awaiting acknowledgement, and the smoothed RTT they yield.
#[derive(Debug)]
pub struct AckTracker {
    pending: VecDeque<PendingPacket>,
    max_pending: usize,
    srtt: f32,
    rtt_var: f32,
}

impl AckTracker {
    pub fn new(max_pending: usize) -> Self {
        Self {
            pending: VecDeque::with_capacity(max_pending),
            max_pending,
            srtt: 100.0,
            rtt_var: 50.0,
        }
    }

    pub fn track_packet(&mut self, sequence: u16) {
        while self.pending.len() >= self.max_pending {
            self.pending.pop_front();
        }

        self.pending.push_back(PendingPacket {
            sequence,
            send_time: Instant::now(),
            acked: false,
        });
    }

    pub fn process_ack(&mut self, ack: u16, ack_bits: u32) -> Vec<u16> {
        let mut acked_sequences = Vec::new();
        let mut rtt_samples = Vec::new();
        let now = Instant::now();

        for pending in self.pending.iter_mut().filter(|p| !p.acked) {
            if is_acked(pending.sequence, ack, ack_bits) {
                pending.acked = true;
                acked_sequences.push(pending.sequence);
                rtt_samples.push(now.duration_since(pending.send_time).as_secs_f32() * 1000.0);
            }
        }

        for rtt in rtt_samples {
            self.update_rtt(rtt);
        }

        while self.pending.front().is_some_and(|p| p.acked) {
            self.pending.pop_front();
        }

        acked_sequences
    }

    fn update_rtt(&mut self, rtt: f32) {
        const ALPHA: f32 = 0.125;
        const BETA: f32 = 0.25;

        let diff = (rtt - self.srtt).abs();
        self.rtt_var = (1.0 - BETA) * self.rtt_var + BETA * diff;
        self.srtt = (1.0 - ALPHA) * self.srtt + ALPHA * rtt;
    }

    pub fn srtt(&self) -> f32 {
        self.srtt
    }

    pub fn rtt_var(&self) -> f32 {
        self.rtt_var
    }

    pub fn unacked_count(&self) -> usize {
        self.pending.iter().filter(|p| !p.acked).count()
    }
}

/// Received sequences: duplicate filter plus the ack data echoed back.
#[derive(Debug)]
pub struct ReceiveTracker {
    last_received: u16,
    received_bits: u32,
    recent: VecDeque<u16>,
    started: bool,
}

impl Default for ReceiveTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl ReceiveTracker {
    pub fn new() -> Self {
        Self {
            last_received: 0,
            received_bits: 0,
            recent: VecDeque::with_capacity(RECENT_CAPACITY),
            started: false,
        }
    }

    /// Returns false for a duplicate.
    pub fn record_received(&mut self, sequence: u16) -> bool {
        if self.recent.contains(&sequence) {
            return false;
        }

        if self.recent.len() >= RECENT_CAPACITY {
            self.recent.pop_front();
        }
        self.recent.push_back(sequence);

        if !self.started {
            self.started = true;
            self.last_received = sequence;
            return true;
        }

        if more_recent_ack(self.last_received, sequence, TIME_STEP_MAX) {
            let diff = sequence.wrapping_sub(self.last_received);
            self.received_bits = if diff <= ACK_WINDOW {
                self.received_bits.checked_shl(u32::from(diff)).unwrap_or(0) | (1 << (diff - 1))
            } else {
                0
            };
            self.last_received = sequence;
        } else {
            let diff = self.last_received.wrapping_sub(sequence);
            if diff > 0 && diff <= ACK_WINDOW {
                self.received_bits |= 1 << (diff - 1);
            }
        }

        true
    }

    pub fn ack_data(&self) -> (u16, u32) {
        (self.last_received, self.received_bits)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_receive_tracker_bitfield() {
        let mut tracker = ReceiveTracker::new();

        tracker.record_received(1);
        tracker.record_received(2);
        tracker.record_received(3);

        let (ack, bits) = tracker.ack_data();
        assert_eq!(ack, 3);
        assert_eq!(bits & 0b11, 0b11);
        assert!(is_acked(1, ack, bits));
        assert!(is_acked(2, ack, bits));
    }

    #[test]
    fn test_receive_tracker_out_of_order() {
        let mut tracker = ReceiveTracker::new();

        tracker.record_received(3);
        tracker.record_received(1);
        tracker.record_received(2);

        let (ack, bits) = tracker.ack_data();
        assert_eq!(ack, 3);
        assert_eq!(bits & 0b11, 0b11);
    }

    #[test]
    fn test_receive_tracker_wraps() {
        let mut tracker = ReceiveTracker::new();

        tracker.record_received(65_535);
        tracker.record_received(1);

        let (ack, bits) = tracker.ack_data();
        assert_eq!(ack, 1);
        assert!(is_acked(65_535, ack, bits));
        assert!(!is_acked(0, ack, bits));
    }

    #[test]
    fn test_duplicate_detection() {
        let mut tracker = ReceiveTracker::new();

        assert!(tracker.record_received(1));
        assert!(!tracker.record_received(1));
        assert!(tracker.record_received(2));
    }

    #[test]
    fn test_ack_tracker_rtt() {
        let mut tracker = AckTracker::new(32);

        tracker.track_packet(1);
        std::thread::sleep(Duration::from_millis(10));

        assert_eq!(tracker.process_ack(1, 0), vec![1]);
        assert!(tracker.srtt() > 0.0);
        assert_eq!(tracker.unacked_count(), 0);
    }

    #[test]
    fn newer_sequences_are_not_acked() {
        assert!(!is_acked(10, 5, u32::MAX));
        assert!(!is_acked(1, 40, u32::MAX));
    }
}
