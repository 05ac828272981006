use std::io;
use std::time::Duration;

use thiserror::Error;

use super::stats::NetworkStats;

/// Transport-assigned peer handle. A client sees its server as [`SERVER_PEER`].
pub type PeerId = u32;

pub const SERVER_PEER: PeerId = 0;

pub const DEFAULT_NETWORK_RATE: f32 = 1.0 / 20.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reliability {
    Unreliable,
    Reliable,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NetworkEvent {
    Connect(PeerId),
    Disconnect(PeerId),
    Packet {
        peer: PeerId,
        channel: u8,
        reliability: Reliability,
        data: Vec<u8>,
    },
}

impl NetworkEvent {
    pub fn peer(&self) -> PeerId {
        match self {
            Self::Connect(peer) | Self::Disconnect(peer) => *peer,
            Self::Packet { peer, .. } => *peer,
        }
    }
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("socket error: {0}")]
    Io(#[from] io::Error),
    #[error("unknown peer {0}")]
    UnknownPeer(PeerId),
    #[error("payload of {0} bytes exceeds MTU")]
    Oversize(usize),
    #[error("transport closed")]
    Closed,
    #[error("server full")]
    ServerFull,
}

/// Settings shared by every transport implementation.
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// Seconds between `needs_update` firings.
    pub network_rate: f32,
    /// Delay added to every incoming event.
    pub fake_lag: Duration,
    /// Fraction of incoming unreliable payloads dropped.
    pub packet_loss: f32,
    pub max_peers: usize,
    pub timeout: Duration,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            network_rate: DEFAULT_NETWORK_RATE,
            fake_lag: Duration::ZERO,
            packet_loss: 0.0,
            max_peers: 32,
            timeout: Duration::from_secs(10),
        }
    }
}

/// Packet channel between the simulation loops and the network.
///
/// Implementations are polled from their owning loop: `update` pumps I/O and
/// timers, then `next_event` drains whatever has become ready.
pub trait Transport {
    fn update(&mut self, dt: f32);

    fn next_event(&mut self) -> Option<NetworkEvent>;

    fn send_packet(
        &mut self,
        peer: PeerId,
        data: &[u8],
        reliability: Reliability,
        channel: u8,
    ) -> Result<(), TransportError>;

    fn disconnect(&mut self, peer: PeerId);

    /// True once per `network_rate` interval until reset.
    fn needs_update(&self) -> bool;

    fn reset_update_timer(&mut self);

    fn stats(&self) -> &NetworkStats;
}

/// Fixed-interval gate behind [`Transport::needs_update`].
#[derive(Debug, Clone)]
pub struct UpdateTimer {
    interval: f32,
    elapsed: f32,
}

impl UpdateTimer {
    pub fn new(interval: f32) -> Self {
        Self {
            interval,
            elapsed: 0.0,
        }
    }

    pub fn interval(&self) -> f32 {
        self.interval
    }

    pub fn advance(&mut self, dt: f32) {
        self.elapsed += dt;
    }

    pub fn is_ready(&self) -> bool {
        self.elapsed >= self.interval
    }

    /// Keeps the overshoot so the long-run rate stays at `interval`.
    pub fn reset(&mut self) {
        if self.elapsed >= self.interval {
            self.elapsed = (self.elapsed - self.interval).min(self.interval);
        }
    }
}
