use std::io;
use std::net::{SocketAddr, ToSocketAddrs, UdpSocket};

use byteorder::{ByteOrder, LittleEndian};

use super::protocol::{MAX_PACKET_SIZE, PacketError};
use super::stats::NetworkStats;

pub const PROTOCOL_ID: u32 = 0x6165_0001;
pub const HEADER_SIZE: usize = 13;
/// Channel and reliability bytes ahead of the payload.
pub const PAYLOAD_PREFIX: usize = 2;
pub const MAX_DATAGRAM_SIZE: usize = HEADER_SIZE + PAYLOAD_PREFIX + MAX_PACKET_SIZE;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PacketKind {
    Connect = 1,
    Accept = 2,
    Deny = 3,
    Payload = 4,
    Disconnect = 5,
    KeepAlive = 6,
}

impl TryFrom<u8> for PacketKind {
    type Error = PacketError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(Self::Connect),
            2 => Ok(Self::Accept),
            3 => Ok(Self::Deny),
            4 => Ok(Self::Payload),
            5 => Ok(Self::Disconnect),
            6 => Ok(Self::KeepAlive),
            other => Err(PacketError::UnknownKind(other)),
        }
    }
}

/// `{ protocol_id: u32, kind: u8, sequence: u16, ack: u16, ack_bits: u32 }`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketHeader {
    pub kind: PacketKind,
    pub sequence: u16,
    pub ack: u16,
    pub ack_bits: u32,
}

impl PacketHeader {
    pub fn new(kind: PacketKind, sequence: u16, ack: u16, ack_bits: u32) -> Self {
        Self {
            kind,
            sequence,
            ack,
            ack_bits,
        }
    }

    pub fn encode(&self, body: &[u8]) -> Vec<u8> {
        let mut header = [0u8; HEADER_SIZE];
        LittleEndian::write_u32(&mut header[0..4], PROTOCOL_ID);
        header[4] = self.kind as u8;
        LittleEndian::write_u16(&mut header[5..7], self.sequence);
        LittleEndian::write_u16(&mut header[7..9], self.ack);
        LittleEndian::write_u32(&mut header[9..13], self.ack_bits);

        let mut datagram = Vec::with_capacity(HEADER_SIZE + body.len());
        datagram.extend_from_slice(&header);
        datagram.extend_from_slice(body);
        datagram
    }

    /// Splits a datagram into its header and body.
    pub fn decode(datagram: &[u8]) -> Result<(Self, &[u8]), PacketError> {
        if datagram.len() < HEADER_SIZE {
            return Err(PacketError::Truncated);
        }

        let protocol_id = LittleEndian::read_u32(&datagram[0..4]);
        if protocol_id != PROTOCOL_ID {
            return Err(PacketError::ProtocolMismatch(protocol_id));
        }

        let header = Self {
            kind: PacketKind::try_from(datagram[4])?,
            sequence: LittleEndian::read_u16(&datagram[5..7]),
            ack: LittleEndian::read_u16(&datagram[7..9]),
            ack_bits: LittleEndian::read_u32(&datagram[9..13]),
        };

        Ok((header, &datagram[HEADER_SIZE..]))
    }
}

/// Non-blocking UDP socket with send/receive accounting.
#[derive(Debug)]
pub struct NetworkEndpoint {
    socket: UdpSocket,
    local_addr: SocketAddr,
    stats: NetworkStats,
    recv_buffer: [u8; MAX_DATAGRAM_SIZE],
}

impl NetworkEndpoint {
    pub fn bind<A: ToSocketAddrs>(addr: A) -> io::Result<Self> {
        let socket = UdpSocket::bind(addr)?;
        socket.set_nonblocking(true)?;

        let local_addr = socket.local_addr()?;

        Ok(Self {
            socket,
            local_addr,
            stats: NetworkStats::default(),
            recv_buffer: [0u8; MAX_DATAGRAM_SIZE],
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn stats(&self) -> &NetworkStats {
        &self.stats
    }

    pub fn stats_mut(&mut self) -> &mut NetworkStats {
        &mut self.stats
    }

    pub fn send_to(&mut self, datagram: &[u8], addr: SocketAddr) -> io::Result<usize> {
        if datagram.len() > MAX_DATAGRAM_SIZE {
            return Err(io::Error::new(io::ErrorKind::InvalidData, "Packet exceeds MTU"));
        }

        let bytes = self.socket.send_to(datagram, addr)?;
        self.stats.record_sent(bytes);

        Ok(bytes)
    }

    /// Drains every datagram currently queued on the socket.
    pub fn receive(&mut self) -> io::Result<Vec<(Vec<u8>, SocketAddr)>> {
        let mut datagrams = Vec::new();

        loop {
            match self.socket.recv_from(&mut self.recv_buffer) {
                Ok((size, addr)) => {
                    if size < HEADER_SIZE {
                        continue;
                    }

                    self.stats.record_received(size);
                    datagrams.push((self.recv_buffer[..size].to_vec(), addr));
                }
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) => return Err(e),
            }
        }

        Ok(datagrams)
    }
}
