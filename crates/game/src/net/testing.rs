use std::collections::VecDeque;

use super::buffer::{PacketReader, PacketWriter};
use super::protocol::PacketType;
use super::stats::NetworkStats;
use super::transport::{NetworkEvent, PeerId, Reliability, Transport, TransportError};

/// In-memory transport for driving a simulation loop by hand.
#[derive(Debug, Default)]
pub struct MockTransport {
    pub inbox: VecDeque<NetworkEvent>,
    pub sent: Vec<(PeerId, Vec<u8>, Reliability)>,
    pub disconnected: Vec<PeerId>,
    pub ready: bool,
    stats: NetworkStats,
}

impl MockTransport {
    pub fn push(&mut self, event: NetworkEvent) {
        self.inbox.push_back(event);
    }

    pub fn push_packet(&mut self, peer: PeerId, writer: PacketWriter) {
        self.push(NetworkEvent::Packet {
            peer,
            channel: 0,
            reliability: Reliability::Unreliable,
            data: writer.into_bytes(),
        });
    }

    /// Payloads of `packet_type` sent to `peer`, oldest first.
    pub fn sent_to(&self, peer: PeerId, packet_type: PacketType) -> Vec<(&[u8], Reliability)> {
        self.sent
            .iter()
            .filter(|(to, data, _)| {
                *to == peer && PacketReader::new(data).read_type().ok() == Some(packet_type)
            })
            .map(|(_, data, reliability)| (data.as_slice(), *reliability))
            .collect()
    }
}

impl Transport for MockTransport {
    fn update(&mut self, _dt: f32) {}

    fn next_event(&mut self) -> Option<NetworkEvent> {
        self.inbox.pop_front()
    }

    fn send_packet(
        &mut self,
        peer: PeerId,
        data: &[u8],
        reliability: Reliability,
        _channel: u8,
    ) -> Result<(), TransportError> {
        self.sent.push((peer, data.to_vec(), reliability));
        Ok(())
    }

    fn disconnect(&mut self, peer: PeerId) {
        self.disconnected.push(peer);
    }

    fn needs_update(&self) -> bool {
        self.ready
    }

    fn reset_update_timer(&mut self) {}

    fn stats(&self) -> &NetworkStats {
        &self.stats
    }
}
