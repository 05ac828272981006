use crossbeam_channel::{Receiver, Sender, TryRecvError, unbounded};

use super::protocol::MAX_PACKET_SIZE;
use super::simulator::NetworkSimulator;
use super::stats::{NetworkStats, PacketLossSimulation};
use super::transport::{
    NetworkEvent, PeerId, Reliability, SERVER_PEER, Transport, TransportConfig, TransportError,
    UpdateTimer,
};

/// Peer id the server side of a loopback pair sees for its client.
pub const LOOPBACK_CLIENT_PEER: PeerId = 1;

#[derive(Debug)]
enum Frame {
    Connect,
    Disconnect,
    Payload {
        channel: u8,
        reliability: Reliability,
        data: Vec<u8>,
    },
}

/// One end of an in-process transport pair, for a client hosting its own
/// server thread.
#[derive(Debug)]
pub struct LoopbackTransport {
    tx: Sender<Frame>,
    rx: Receiver<Frame>,
    remote: PeerId,
    connected: bool,
    simulator: NetworkSimulator,
    timer: UpdateTimer,
    stats: NetworkStats,
}

impl LoopbackTransport {
    /// Returns `(client, server)`. Each side receives `Connect` for the other
    /// on its first update.
    pub fn pair(client: &TransportConfig, server: &TransportConfig) -> (Self, Self) {
        let (to_server, server_rx) = unbounded();
        let (to_client, client_rx) = unbounded();

        let client = Self::new(to_server, client_rx, SERVER_PEER, client);
        let server = Self::new(to_client, server_rx, LOOPBACK_CLIENT_PEER, server);

        for end in [&client, &server] {
            let _ = end.send_frame(Frame::Connect);
        }
        (client, server)
    }

    fn new(tx: Sender<Frame>, rx: Receiver<Frame>, remote: PeerId, config: &TransportConfig) -> Self {
        let mut stats = NetworkStats::default();
        stats.rtt_ms = config.fake_lag.as_secs_f32() * 2000.0;

        Self {
            tx,
            rx,
            remote,
            connected: true,
            simulator: NetworkSimulator::new(config.fake_lag, PacketLossSimulation::new(config.packet_loss)),
            timer: UpdateTimer::new(config.network_rate),
            stats,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    fn send_frame(&self, frame: Frame) -> Result<(), TransportError> {
        self.tx.send(frame).map_err(|_| TransportError::Closed)
    }

    fn receive_frames(&mut self) {
        loop {
            let frame = match self.rx.try_recv() {
                Ok(frame) => frame,
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    if self.connected {
                        log::debug!("loopback peer {} dropped", self.remote);
                        self.connected = false;
                        self.simulator.enqueue(NetworkEvent::Disconnect(self.remote));
                    }
                    break;
                }
            };

            let event = match frame {
                Frame::Connect => NetworkEvent::Connect(self.remote),
                Frame::Disconnect => {
                    self.connected = false;
                    NetworkEvent::Disconnect(self.remote)
                }
                Frame::Payload {
                    channel,
                    reliability,
                    data,
                } => {
                    self.stats.record_received(data.len());
                    NetworkEvent::Packet {
                        peer: self.remote,
                        channel,
                        reliability,
                        data,
                    }
                }
            };

            if !self.simulator.enqueue(event) {
                self.stats.record_dropped();
            }
        }
    }
}

impl Transport for LoopbackTransport {
    fn update(&mut self, dt: f32) {
        self.receive_frames();
        self.timer.advance(dt);
        self.stats.update(dt);
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
        if peer != self.remote {
            return Err(TransportError::UnknownPeer(peer));
        }
        if data.len() > MAX_PACKET_SIZE {
            return Err(TransportError::Oversize(data.len()));
        }
        if !self.connected {
            return Err(TransportError::Closed);
        }

        self.send_frame(Frame::Payload {
            channel,
            reliability,
            data: data.to_vec(),
        })?;
        self.stats.record_sent(data.len());
        Ok(())
    }

    fn disconnect(&mut self, peer: PeerId) {
        if peer == self.remote && self.connected {
            let _ = self.send_frame(Frame::Disconnect);
            self.connected = false;
        }
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

impl Drop for LoopbackTransport {
    fn drop(&mut self) {
        if self.connected {
            let _ = self.send_frame(Frame::Disconnect);
        }
    }
}
