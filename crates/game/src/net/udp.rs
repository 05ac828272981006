use std::net::{SocketAddr, ToSocketAddrs};
use std::time::{Duration, Instant};

use super::connection::{ConnectionManager, ConnectionState};
use super::endpoint::{NetworkEndpoint, PAYLOAD_PREFIX, PacketHeader, PacketKind};
use super::protocol::MAX_PACKET_SIZE;
use super::simulator::NetworkSimulator;
use super::stats::{NetworkStats, PacketLossSimulation};
use super::transport::{
    NetworkEvent, PeerId, Reliability, SERVER_PEER, Transport, TransportConfig, TransportError,
    UpdateTimer,
};

const CONNECT_RETRY: Duration = Duration::from_millis(250);
const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(1);
const DISCONNECT_REPEATS: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Role {
    Client { server: SocketAddr },
    Server,
}

/// UDP transport with a small connection handshake, sequence acks and
/// resend of reliable payloads.
#[derive(Debug)]
pub struct UdpTransport {
    endpoint: NetworkEndpoint,
    role: Role,
    connections: ConnectionManager,
    simulator: NetworkSimulator,
    timer: UpdateTimer,
    stats: NetworkStats,
    last_connect_attempt: Option<Instant>,
}

impl UdpTransport {
    /// Binds a server socket on `addr`.
    pub fn listen<A: ToSocketAddrs>(addr: A, config: &TransportConfig) -> Result<Self, TransportError> {
        let endpoint = NetworkEndpoint::bind(addr)?;
        log::info!("Listening on {}", endpoint.local_addr());

        Ok(Self::new(
            endpoint,
            Role::Server,
            ConnectionManager::new(config.max_peers, config.timeout, SERVER_PEER + 1),
            config,
        ))
    }

    /// Binds an ephemeral socket and starts the handshake with `server`.
    /// `Connect` is delivered once the server accepts.
    pub fn connect(server: SocketAddr, config: &TransportConfig) -> Result<Self, TransportError> {
        let bind_addr: SocketAddr = if server.is_ipv4() {
            ([0, 0, 0, 0], 0).into()
        } else {
            ([0u16; 8], 0).into()
        };
        let endpoint = NetworkEndpoint::bind(bind_addr)?;

        let mut connections = ConnectionManager::new(1, config.timeout, SERVER_PEER);
        connections.get_or_create(server)?;

        let mut transport = Self::new(endpoint, Role::Client { server }, connections, config);
        transport.send_connect();
        Ok(transport)
    }

    fn new(
        endpoint: NetworkEndpoint,
        role: Role,
        connections: ConnectionManager,
        config: &TransportConfig,
    ) -> Self {
        Self {
            endpoint,
            role,
            connections,
            simulator: NetworkSimulator::new(config.fake_lag, PacketLossSimulation::new(config.packet_loss)),
            timer: UpdateTimer::new(config.network_rate),
            stats: NetworkStats::default(),
            last_connect_attempt: None,
        }
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.endpoint.local_addr()
    }

    pub fn connected_peers(&self) -> usize {
        self.connections.connected_count()
    }

    pub fn is_connected(&self, peer: PeerId) -> bool {
        self.connections.get(peer).is_some_and(|c| c.is_connected())
    }

    fn send_control(&mut self, peer: PeerId, kind: PacketKind) {
        let Some(connection) = self.connections.get_mut(peer) else {
            return;
        };
        let addr = connection.addr;
        let datagram = connection.next_header(kind).encode(&[]);

        if let Err(e) = self.endpoint.send_to(&datagram, addr) {
            log::warn!("Failed to send {:?} to {}: {}", kind, addr, e);
        }
    }

    fn send_connect(&mut self) {
        self.last_connect_attempt = Some(Instant::now());
        self.send_control(SERVER_PEER, PacketKind::Connect);
    }

    fn deny(&mut self, addr: SocketAddr) {
        let datagram = PacketHeader::new(PacketKind::Deny, 0, 0, 0).encode(&[]);
        if let Err(e) = self.endpoint.send_to(&datagram, addr) {
            log::warn!("Failed to deny {}: {}", addr, e);
        }
    }

    fn lose_peer(&mut self, peer: PeerId) {
        if self.connections.remove(peer).is_some() {
            self.simulator.enqueue(NetworkEvent::Disconnect(peer));
        }
    }

    fn receive_datagrams(&mut self) {
        let datagrams = match self.endpoint.receive() {
            Ok(datagrams) => datagrams,
            Err(e) => {
                log::warn!("Socket receive failed: {}", e);
                if let Role::Client { .. } = self.role {
                    self.lose_peer(SERVER_PEER);
                }
                return;
            }
        };

        for (datagram, addr) in datagrams {
            match PacketHeader::decode(&datagram) {
                Ok((header, body)) => self.handle_datagram(header, body, addr),
                Err(e) => log::trace!("Dropping datagram from {}: {}", addr, e),
            }
        }
    }

    fn handle_datagram(&mut self, header: PacketHeader, body: &[u8], addr: SocketAddr) {
        if self.role == Role::Server && header.kind == PacketKind::Connect {
            self.accept(addr);
        }

        let Some(connection) = self.connections.get_by_addr_mut(&addr) else {
            log::trace!("Ignoring {:?} from unknown address {}", header.kind, addr);
            return;
        };
        let peer = connection.peer;
        let fresh = connection.process_header(&header);

        match header.kind {
            PacketKind::Accept => {
                if connection.state == ConnectionState::Connecting {
                    connection.state = ConnectionState::Connected;
                    log::info!("Connected to {}", addr);
                    self.simulator.enqueue(NetworkEvent::Connect(peer));
                }
            }
            PacketKind::Deny => {
                log::warn!("Connection to {} denied", addr);
                self.lose_peer(peer);
            }
            PacketKind::Disconnect => {
                log::info!("Peer {} disconnected", peer);
                self.lose_peer(peer);
            }
            PacketKind::Payload if fresh && connection.is_connected() => {
                self.deliver_payload(peer, body);
            }
            PacketKind::Payload | PacketKind::Connect | PacketKind::KeepAlive => {}
        }
    }

    fn accept(&mut self, addr: SocketAddr) {
        match self.connections.get_or_create(addr) {
            Ok((connection, created)) => {
                let peer = connection.peer;
                if created {
                    connection.state = ConnectionState::Connected;
                    log::info!("Peer {} connected from {}", peer, addr);
                    self.simulator.enqueue(NetworkEvent::Connect(peer));
                }
                self.send_control(peer, PacketKind::Accept);
            }
            Err(e) => {
                log::warn!("Refusing {}: {}", addr, e);
                self.deny(addr);
            }
        }
    }

    fn deliver_payload(&mut self, peer: PeerId, body: &[u8]) {
        if body.len() < PAYLOAD_PREFIX {
            log::warn!("Truncated payload from peer {}", peer);
            return;
        }

        let reliability = if body[1] != 0 {
            Reliability::Reliable
        } else {
            Reliability::Unreliable
        };
        let event = NetworkEvent::Packet {
            peer,
            channel: body[0],
            reliability,
            data: body[PAYLOAD_PREFIX..].to_vec(),
        };

        if !self.simulator.enqueue(event) {
            self.stats.packets_dropped += 1;
        }
    }

    fn service_connections(&mut self) {
        for connection in self.connections.cleanup_timed_out() {
            log::info!("Peer {} timed out", connection.peer);
            self.simulator.enqueue(NetworkEvent::Disconnect(connection.peer));
        }

        if let Role::Client { .. } = self.role {
            let connecting = self
                .connections
                .get(SERVER_PEER)
                .is_some_and(|c| c.state == ConnectionState::Connecting);
            let retry_due = self
                .last_connect_attempt
                .is_none_or(|at| at.elapsed() >= CONNECT_RETRY);
            if connecting && retry_due {
                self.send_connect();
            }
        }

        let mut outgoing = Vec::new();
        for connection in self.connections.iter_mut() {
            for datagram in connection.due_resends() {
                outgoing.push((datagram, connection.addr));
            }
        }
        for (datagram, addr) in outgoing {
            if let Err(e) = self.endpoint.send_to(&datagram, addr) {
                log::warn!("Resend to {} failed: {}", addr, e);
            }
        }

        let idle: Vec<PeerId> = self
            .connections
            .iter()
            .filter(|c| c.is_connected() && c.last_send_time.elapsed() >= KEEPALIVE_INTERVAL)
            .map(|c| c.peer)
            .collect();
        for peer in idle {
            self.send_control(peer, PacketKind::KeepAlive);
        }
    }

    fn refresh_stats(&mut self, dt: f32) {
        let endpoint = self.endpoint.stats();
        self.stats.packets_sent = endpoint.packets_sent;
        self.stats.packets_received = endpoint.packets_received;
        self.stats.bytes_sent = endpoint.bytes_sent;
        self.stats.bytes_received = endpoint.bytes_received;

        self.endpoint.stats_mut().update(dt);
        let endpoint = self.endpoint.stats();
        self.stats.send_rate = endpoint.send_rate;
        self.stats.receive_rate = endpoint.receive_rate;

        let connected = self.connections.connected_count();
        if connected > 0 {
            let total: f32 = self
                .connections
                .iter()
                .filter(|c| c.is_connected())
                .map(|c| c.srtt())
                .sum();
            self.stats.rtt_ms = total / connected as f32;
        }
    }
}

impl Transport for UdpTransport {
    fn update(&mut self, dt: f32) {
        self.receive_datagrams();
        self.service_connections();
        self.timer.advance(dt);
        self.refresh_stats(dt);
    }

    fn next_event(&mut self) -> Option<NetworkEvent> {
        self.simulator.take_ready()
    }

    fn send_packet(
        &mut self,
        peer: PeerId,
        data: &[u8],
        reliability: Reliability,
        channel: u8,
    ) -> Result<(), TransportError> {
        if data.len() > MAX_PACKET_SIZE {
            return Err(TransportError::Oversize(data.len()));
        }

        let connection = self
            .connections
            .get_mut(peer)
            .ok_or(TransportError::UnknownPeer(peer))?;
        if !connection.is_connected() {
            return Err(TransportError::Closed);
        }

        let mut body = Vec::with_capacity(PAYLOAD_PREFIX + data.len());
        body.push(channel);
        body.push(u8::from(reliability == Reliability::Reliable));
        body.extend_from_slice(data);

        let header = connection.next_header(PacketKind::Payload);
        let datagram = header.encode(&body);
        let addr = connection.addr;
        if reliability == Reliability::Reliable {
            connection.queue_reliable(header.sequence, datagram.clone());
        }

        self.endpoint.send_to(&datagram, addr)?;
        Ok(())
    }

    fn disconnect(&mut self, peer: PeerId) {
        for _ in 0..DISCONNECT_REPEATS {
            self.send_control(peer, PacketKind::Disconnect);
        }
        self.connections.remove(peer);
    }

    fn needs_update(&self) -> bool {
        self.timer.is_ready()
    }

    fn reset_update_timer(&mut self) {
        self.timer.reset();
    }

    fn stats(&self) -> &NetworkStats {
        &self.stats
    }
}
