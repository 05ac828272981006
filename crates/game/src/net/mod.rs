mod buffer;
mod connection;
mod endpoint;
mod loopback;
mod protocol;
mod simulator;
mod stats;
#[cfg(test)]
pub(crate) mod testing;
mod tracking;
mod transport;
mod udp;

pub use buffer::{PacketReader, PacketWriter};
pub use connection::{Connection, ConnectionManager, ConnectionState};
pub use endpoint::{
    HEADER_SIZE, MAX_DATAGRAM_SIZE, NetworkEndpoint, PROTOCOL_ID, PacketHeader, PacketKind,
};
pub use loopback::{LOOPBACK_CLIENT_PEER, LoopbackTransport};
pub use protocol::{
    DEFAULT_PORT, InputPacket, JoinPacket, MAX_PACKET_SIZE, ObjectDeletePacket, ObjectListPacket,
    ObjectSpawn, ObjectState, ObjectUpdatesPacket, PacketError, PacketType,
};
pub use simulator::NetworkSimulator;
pub use stats::{NetworkStats, PacketLossSimulation};
pub use tracking::{AckTracker, ReceiveTracker, is_acked};
pub use transport::{
    DEFAULT_NETWORK_RATE, NetworkEvent, PeerId, Reliability, SERVER_PEER, Transport,
    TransportConfig, TransportError, UpdateTimer,
};
pub use udp::UdpTransport;
