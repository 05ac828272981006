use crate::net::PeerId;
use crate::world::NetworkId;

#[derive(Debug, Clone, PartialEq)]
pub enum ServerEvent {
    PeerConnected {
        peer: PeerId,
    },
    PlayerJoined {
        peer: PeerId,
        object_id: NetworkId,
        map_name: String,
    },
    PeerDisconnected {
        peer: PeerId,
        reason: DisconnectReason,
    },
    PacketRejected {
        peer: PeerId,
        message: String,
    },
    Error {
        message: String,
    },
}

impl ServerEvent {
    pub fn log(&self) {
        match self {
            ServerEvent::PeerConnected { peer } => {
                log::info!("Peer {} connected", peer);
            }
            ServerEvent::PlayerJoined {
                peer,
                object_id,
                map_name,
            } => {
                log::info!("Peer {} joined '{}' as object {}", peer, map_name, object_id);
            }
            ServerEvent::PeerDisconnected { peer, reason } => {
                log::info!("Peer {} {}", peer, reason.as_str());
            }
            ServerEvent::PacketRejected { peer, message } => {
                log::warn!("Dropping packet from peer {}: {}", peer, message);
            }
            ServerEvent::Error { message } => {
                log::warn!("{}", message);
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectReason {
    /// The peer left or its transport timed out.
    Remote,
    Shutdown,
}

impl DisconnectReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            DisconnectReason::Remote => "disconnected",
            DisconnectReason::Shutdown => "server shutdown",
        }
    }
}
