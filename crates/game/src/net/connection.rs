use std::collections::{HashMap, VecDeque};
use std::net::SocketAddr;
use std::time::{Duration, Instant};

use super::endpoint::{PacketHeader, PacketKind};
use super::tracking::{AckTracker, ReceiveTracker, is_acked};
use super::transport::{PeerId, TransportError};

const MAX_PENDING_ACKS: usize = 256;
const MIN_RESEND_INTERVAL: Duration = Duration::from_millis(100);
const MAX_RESENDS: u32 = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Connected,
}

#[derive(Debug)]
struct ReliablePayload {
    sequence: u16,
    datagram: Vec<u8>,
    last_sent: Instant,
    resends: u32,
}

#[derive(Debug)]
pub struct Connection {
    pub addr: SocketAddr,
    pub peer: PeerId,
    pub state: ConnectionState,
    pub last_receive_time: Instant,
    pub last_send_time: Instant,
    send_sequence: u16,
    acks: AckTracker,
    received: ReceiveTracker,
    reliable: VecDeque<ReliablePayload>,
}

impl Connection {
    pub fn new(addr: SocketAddr, peer: PeerId) -> Self {
        let now = Instant::now();
        Self {
            addr,
            peer,
            state: ConnectionState::Connecting,
            last_receive_time: now,
            last_send_time: now,
            send_sequence: 0,
            acks: AckTracker::new(MAX_PENDING_ACKS),
            received: ReceiveTracker::new(),
            reliable: VecDeque::new(),
        }
    }

    pub fn is_connected(&self) -> bool {
        self.state == ConnectionState::Connected
    }

    pub fn is_timed_out(&self, timeout: Duration) -> bool {
        self.last_receive_time.elapsed() > timeout
    }

    pub fn srtt(&self) -> f32 {
        self.acks.srtt()
    }

    /// Stamps a fresh sequence and the current ack data.
    pub fn next_header(&mut self, kind: PacketKind) -> PacketHeader {
        let sequence = self.send_sequence;
        self.send_sequence = self.send_sequence.wrapping_add(1);
        self.acks.track_packet(sequence);
        self.last_send_time = Instant::now();

        let (ack, ack_bits) = self.received.ack_data();
        PacketHeader::new(kind, sequence, ack, ack_bits)
    }

    /// Applies the ack data of an incoming header. Returns false if its
    /// sequence was already seen.
    pub fn process_header(&mut self, header: &PacketHeader) -> bool {
        self.last_receive_time = Instant::now();

        self.acks.process_ack(header.ack, header.ack_bits);
        self.reliable
            .retain(|pending| !is_acked(pending.sequence, header.ack, header.ack_bits));

        self.received.record_received(header.sequence)
    }

    pub fn queue_reliable(&mut self, sequence: u16, datagram: Vec<u8>) {
        self.reliable.push_back(ReliablePayload {
            sequence,
            datagram,
            last_sent: Instant::now(),
            resends: 0,
        });
    }

    pub fn unacked_reliable(&self) -> usize {
        self.reliable.len()
    }

    /// Datagrams whose resend interval has elapsed. They keep their original
    /// sequence so the receiver can filter duplicates.
    pub fn due_resends(&mut self) -> Vec<Vec<u8>> {
        let interval = Duration::from_secs_f32(self.srtt() * 1.5 / 1000.0).max(MIN_RESEND_INTERVAL);
        let peer = self.peer;
        let mut due = Vec::new();

        self.reliable.retain_mut(|pending| {
            if pending.last_sent.elapsed() < interval {
                return true;
            }
            if pending.resends >= MAX_RESENDS {
                log::warn!("giving up on reliable sequence {} to peer {}", pending.sequence, peer);
                return false;
            }

            pending.resends += 1;
            pending.last_sent = Instant::now();
            due.push(pending.datagram.clone());
            true
        });

        if !due.is_empty() {
            self.last_send_time = Instant::now();
        }
        due
    }
}

#[derive(Debug)]
pub struct ConnectionManager {
    peers_by_addr: HashMap<SocketAddr, PeerId>,
    connections: HashMap<PeerId, Connection>,
    next_peer: PeerId,
    max_peers: usize,
    timeout: Duration,
}

impl ConnectionManager {
    /// Peer ids are handed out from `first_peer` upward.
    pub fn new(max_peers: usize, timeout: Duration, first_peer: PeerId) -> Self {
        Self {
            peers_by_addr: HashMap::new(),
            connections: HashMap::new(),
            next_peer: first_peer,
            max_peers,
            timeout,
        }
    }

    /// Returns the connection for `addr`, creating it if there is room. The
    /// flag is true for a newly created connection.
    pub fn get_or_create(&mut self, addr: SocketAddr) -> Result<(&mut Connection, bool), TransportError> {
        let created = !self.peers_by_addr.contains_key(&addr);
        if created {
            if self.connections.len() >= self.max_peers {
                return Err(TransportError::ServerFull);
            }

            let peer = self.next_peer;
            self.next_peer = self.next_peer.wrapping_add(1);
            self.connections.insert(peer, Connection::new(addr, peer));
            self.peers_by_addr.insert(addr, peer);
        }

        self.get_by_addr_mut(&addr)
            .map(|connection| (connection, created))
            .ok_or(TransportError::ServerFull)
    }

    pub fn get_by_addr_mut(&mut self, addr: &SocketAddr) -> Option<&mut Connection> {
        let peer = self.peers_by_addr.get(addr)?;
        self.connections.get_mut(peer)
    }

    pub fn get(&self, peer: PeerId) -> Option<&Connection> {
        self.connections.get(&peer)
    }

    pub fn get_mut(&mut self, peer: PeerId) -> Option<&mut Connection> {
        self.connections.get_mut(&peer)
    }

    pub fn remove(&mut self, peer: PeerId) -> Option<Connection> {
        let connection = self.connections.remove(&peer)?;
        self.peers_by_addr.remove(&connection.addr);
        Some(connection)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Connection> {
        self.connections.values()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Connection> {
        self.connections.values_mut()
    }

    pub fn peers(&self) -> Vec<PeerId> {
        self.connections.keys().copied().collect()
    }

    /// Removes connections that have been silent past the timeout.
    pub fn cleanup_timed_out(&mut self) -> Vec<Connection> {
        let timed_out: Vec<PeerId> = self
            .connections
            .values()
            .filter(|c| c.is_timed_out(self.timeout))
            .map(|c| c.peer)
            .collect();

        timed_out.into_iter().filter_map(|peer| self.remove(peer)).collect()
    }

    pub fn connected_count(&self) -> usize {
        self.connections.values().filter(|c| c.is_connected()).count()
    }

    pub fn total_count(&self) -> usize {
        self.connections.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(port: u16) -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], port))
    }

    #[test]
    fn peers_are_reused_per_address() {
        let mut manager = ConnectionManager::new(4, Duration::from_secs(1), 1);

        let (first, created) = manager.get_or_create(addr(5000)).unwrap();
        assert!(created);
        assert_eq!(first.peer, 1);

        let (again, created) = manager.get_or_create(addr(5000)).unwrap();
        assert!(!created);
        assert_eq!(again.peer, 1);

        let (second, _) = manager.get_or_create(addr(5001)).unwrap();
        assert_eq!(second.peer, 2);
        assert_eq!(manager.total_count(), 2);
    }

    #[test]
    fn full_manager_refuses_new_addresses() {
        let mut manager = ConnectionManager::new(1, Duration::from_secs(1), 1);
        manager.get_or_create(addr(5000)).unwrap();

        assert!(matches!(manager.get_or_create(addr(5001)), Err(TransportError::ServerFull)));
        assert!(manager.get_or_create(addr(5000)).is_ok());
    }

    #[test]
    fn acked_reliable_payloads_are_released() {
        let mut sender = Connection::new(addr(5000), 1);
        let mut receiver = Connection::new(addr(5001), 0);

        let header = sender.next_header(PacketKind::Payload);
        sender.queue_reliable(header.sequence, header.encode(&[1]));
        assert!(receiver.process_header(&header));
        assert!(!receiver.process_header(&header));

        let reply = receiver.next_header(PacketKind::KeepAlive);
        sender.process_header(&reply);
        assert_eq!(sender.unacked_reliable(), 0);
    }

    #[test]
    fn timed_out_connections_are_removed() {
        let mut manager = ConnectionManager::new(4, Duration::ZERO, 1);
        manager.get_or_create(addr(5000)).unwrap();
        std::thread::sleep(Duration::from_millis(5));

        let removed = manager.cleanup_timed_out();
        assert_eq!(removed.len(), 1);
        assert_eq!(manager.total_count(), 0);
    }
}
