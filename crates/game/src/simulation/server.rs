use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use crate::components::{Controller, Physics, PhysicsMode};
use crate::config::ServerConfig;
use crate::net::{
    InputPacket, JoinPacket, MAX_PACKET_SIZE, NetworkEvent, ObjectDeletePacket, ObjectListPacket, ObjectSpawn,
    ObjectState, ObjectUpdatesPacket, PacketError, PacketReader, PacketType, PacketWriter, PeerId,
    Reliability, Transport,
};
use crate::sequence::{SequenceClock, TimeStep};
use crate::world::{MapRegistry, NetworkId, Object, ObjectManager};

use super::events::{DisconnectReason, ServerEvent};
use super::tick::FixedTimestep;

/// Inputs simulated per controlled object per tick; a client that falls
/// behind catches up at this rate.
pub const MAX_INPUTS_PER_TICK: usize = 3;

/// Objects per `ObjectUpdates` datagram, well inside the MTU.
const UPDATES_PER_PACKET: usize = 64;

pub const PLAYER_IDENTIFIER: &str = "player";

#[derive(Debug, Default)]
struct PeerState {
    object_id: Option<NetworkId>,
    map_id: Option<u16>,
    /// Newest input tick accepted from this peer. Unset until its first
    /// input packet, which anchors the window.
    last_ack: Option<TimeStep>,
}

/// Authoritative simulation: owns the objects, consumes client input and
/// broadcasts state at the network rate.
pub struct ServerSimulation<T: Transport> {
    transport: T,
    config: ServerConfig,
    timestep: FixedTimestep,
    clock: SequenceClock,
    objects: ObjectManager,
    maps: MapRegistry,
    peers: BTreeMap<PeerId, PeerState>,
    pending_events: VecDeque<ServerEvent>,
    running: Arc<AtomicBool>,
    last_tick_time: Instant,
}

impl<T: Transport> ServerSimulation<T> {
    pub fn new(transport: T, config: ServerConfig) -> Self {
        let mut maps = MapRegistry::new();
        for name in config.map_names() {
            if maps.open(name).is_none() {
                log::warn!("Map '{}' not opened", name);
            }
        }

        Self {
            transport,
            timestep: FixedTimestep::new(config.time_step),
            clock: SequenceClock::default(),
            objects: ObjectManager::new(),
            maps,
            peers: BTreeMap::new(),
            pending_events: VecDeque::new(),
            running: Arc::new(AtomicBool::new(true)),
            last_tick_time: Instant::now(),
            config,
        }
    }

    pub fn running(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.running)
    }

    pub fn time_step(&self) -> TimeStep {
        self.clock.now()
    }

    pub fn objects(&self) -> &ObjectManager {
        &self.objects
    }

    pub fn maps(&self) -> &MapRegistry {
        &self.maps
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    pub fn peer_count(&self) -> usize {
        self.peers.len()
    }

    pub fn player_object(&self, peer: PeerId) -> Option<&Object> {
        let id = self.peers.get(&peer)?.object_id?;
        self.objects.get(id)
    }

    pub fn drain_events(&mut self) -> impl Iterator<Item = ServerEvent> + '_ {
        self.pending_events.drain(..)
    }

    /// Ticks at the configured rate until the running flag is cleared, then
    /// disconnects every peer. Events are logged rather than queued.
    pub fn run(&mut self) {
        log::info!(
            "Server loop started: step {:.3}s, network rate {:.3}s",
            self.config.time_step,
            self.config.network_rate
        );

        self.last_tick_time = Instant::now();
        while self.running.load(Ordering::SeqCst) {
            self.tick_once();
            self.pending_events.drain(..).for_each(|event| event.log());
            std::thread::sleep(Duration::from_millis(1));
        }

        self.shutdown_connections();
        self.pending_events.drain(..).for_each(|event| event.log());
        log::info!("Server loop stopped at time step {}", self.clock.now());
    }

    /// Runs every fixed step owed since the previous call.
    pub fn tick_once(&mut self) -> u32 {
        let now = Instant::now();
        self.timestep
            .accumulate((now - self.last_tick_time).as_secs_f32());
        self.last_tick_time = now;

        let mut ticks = 0;
        while self.timestep.consume_tick() {
            self.step();
            ticks += 1;
        }
        ticks
    }

    /// Advances the simulation by exactly one fixed step.
    pub fn step(&mut self) {
        let dt = self.timestep.dt();

        self.transport.update(dt);
        while let Some(event) = self.transport.next_event() {
            self.handle_event(event);
        }

        self.apply_inputs(dt);
        self.update_objects(dt);
        self.clock.advance();

        if self.transport.needs_update() {
            self.broadcast_updates();
            self.transport.reset_update_timer();
        }
    }

    pub fn shutdown_connections(&mut self) {
        let peers: Vec<PeerId> = self.peers.keys().copied().collect();
        for peer in peers {
            self.transport.disconnect(peer);
            self.remove_peer(peer, DisconnectReason::Shutdown);
        }
    }

    /// Adds an uncontrolled object to `map_name`, which must be one of the
    /// configured maps.
    pub fn spawn_object(&mut self, map_name: &str, identifier: &str, physics: Physics) -> Option<NetworkId> {
        let map = self.maps.find_mut(map_name)?;
        let id = self.objects.allocate_id()?;

        let mut object = Object::new(id, identifier, map.id, physics);
        object.physics.enter_grid(id, &mut map.grid);
        map.add_object(id);
        self.objects.insert(object);

        Some(id)
    }

    fn handle_event(&mut self, event: NetworkEvent) {
        match event {
            NetworkEvent::Connect(peer) => {
                self.peers.insert(peer, PeerState::default());
                self.pending_events
                    .push_back(ServerEvent::PeerConnected { peer });
            }
            NetworkEvent::Disconnect(peer) => {
                self.remove_peer(peer, DisconnectReason::Remote);
            }
            NetworkEvent::Packet { peer, data, .. } => {
                if let Err(e) = self.handle_packet(peer, &data) {
                    self.pending_events.push_back(ServerEvent::PacketRejected {
                        peer,
                        message: e.to_string(),
                    });
                }
            }
        }
    }

    fn handle_packet(&mut self, peer: PeerId, data: &[u8]) -> Result<(), PacketError> {
        let mut reader = PacketReader::new(data);

        match reader.read_type()? {
            PacketType::Join => {
                let join = JoinPacket::decode(&mut reader)?;
                self.handle_join(peer, join);
            }
            PacketType::Input => {
                let input = InputPacket::decode(&mut reader)?;
                self.handle_client_input(peer, input);
            }
            other => return Err(PacketError::Unexpected(other)),
        }

        Ok(())
    }

    fn handle_join(&mut self, peer: PeerId, join: JoinPacket) {
        let Some(state) = self.peers.get(&peer) else {
            log::debug!("Join from unknown peer {}", peer);
            return;
        };
        if state.object_id.is_some() {
            log::debug!("Peer {} joined twice", peer);
            return;
        }

        let map_name = if self.maps.id_of(&join.map_name).is_some() {
            join.map_name
        } else {
            if !join.map_name.is_empty() {
                log::warn!(
                    "Peer {} asked for unknown map '{}', using '{}'",
                    peer,
                    join.map_name,
                    self.config.map_name
                );
            }
            self.config.map_name.clone()
        };

        let Some(spawn) = self.maps.find(&map_name).map(|map| map.spawn_point()) else {
            log::warn!("Default map '{}' is not open", map_name);
            return;
        };
        let physics = Physics::new(PhysicsMode::Authoritative, spawn);
        let Some(id) = self.spawn_object(&map_name, PLAYER_IDENTIFIER, physics) else {
            log::warn!("No free object id for peer {}", peer);
            return;
        };
        if let Some(object) = self.objects.get_mut(id) {
            object.controller = Some(Controller::new(self.config.player_speed));
        }

        let Some(map_id) = self.objects.get(id).map(|object| object.map_id) else {
            return;
        };
        if let Some(state) = self.peers.get_mut(&peer) {
            state.object_id = Some(id);
            state.map_id = Some(map_id);
        }

        self.pending_events.push_back(ServerEvent::PlayerJoined {
            peer,
            object_id: id,
            map_name,
        });

        for part in self.object_list(map_id, id, None).split(MAX_PACKET_SIZE) {
            self.send(peer, part.encode(), Reliability::Reliable);
        }

        // Everyone else on the map learns about the newcomer.
        for other in self.peers_on_map(map_id) {
            let Some(other_id) = self.peers.get(&other).and_then(|state| state.object_id) else {
                continue;
            };
            if other != peer {
                let spawn = self.object_list(map_id, other_id, Some(id));
                self.send(other, spawn.encode(), Reliability::Reliable);
            }
        }
    }

    fn handle_client_input(&mut self, peer: PeerId, input: InputPacket) {
        let Some(state) = self.peers.get_mut(&peer) else {
            return;
        };
        let Some(object) = state.object_id.and_then(|id| self.objects.get_mut(id)) else {
            log::debug!("Input from peer {} before join", peer);
            return;
        };
        let Some(controller) = object.controller.as_mut() else {
            return;
        };
        let Some(first) = input.records.first() else {
            return;
        };

        let last_ack = state
            .last_ack
            .get_or_insert_with(|| first.time.wrapping_sub(1));
        let accepted = controller.accept_inputs(&input.records, last_ack);
        object.physics.rotation = input.rotation;

        log::trace!(
            "Peer {}: accepted {}/{} inputs, ack {}",
            peer,
            accepted,
            input.records.len(),
            last_ack
        );
    }

    fn apply_inputs(&mut self, dt: f32) {
        let controlled: Vec<NetworkId> = self
            .peers
            .values()
            .filter_map(|state| state.object_id)
            .collect();

        for id in controlled {
            let Some(map_id) = self.objects.get(id).map(|object| object.map_id) else {
                continue;
            };
            let obstacles = self.objects.obstacles(map_id, id);
            let mut grid = self.maps.get_mut(map_id).map(|map| &mut map.grid);

            let Some(object) = self.objects.get_mut(id) else {
                continue;
            };
            let Some(controller) = object.controller.as_mut() else {
                continue;
            };

            for _ in 0..MAX_INPUTS_PER_TICK {
                let Some(input) = controller.next_input() else {
                    break;
                };
                controller.handle_input(&input, &mut object.physics, false);
                object
                    .physics
                    .update_authoritative(id, dt, &obstacles, grid.as_deref_mut());
                controller.last_input_time = input.time;
            }
        }
    }

    fn update_objects(&mut self, dt: f32) {
        let uncontrolled: Vec<(NetworkId, u16)> = self
            .objects
            .iter()
            .filter(|object| !object.has_controller())
            .map(|object| (object.id, object.map_id))
            .collect();

        for (id, map_id) in uncontrolled {
            let obstacles = self.objects.obstacles(map_id, id);
            let grid = self.maps.get_mut(map_id).map(|map| &mut map.grid);
            if let Some(object) = self.objects.get_mut(id) {
                object.physics.update_authoritative(id, dt, &obstacles, grid);
            }
        }
    }

    fn broadcast_updates(&mut self) {
        let map_ids: Vec<u16> = self.peers.values().filter_map(|state| state.map_id).collect();
        let mut sent = Vec::new();

        for map_id in map_ids {
            if sent.contains(&map_id) {
                continue;
            }
            sent.push(map_id);

            let states = self.object_states(map_id);
            let peers = self.peers_on_map(map_id);

            for chunk in states.chunks(UPDATES_PER_PACKET) {
                let packet = ObjectUpdatesPacket {
                    map_id,
                    server_time_step: self.clock.now(),
                    objects: chunk.to_vec(),
                };
                let writer = packet.encode();
                for &peer in &peers {
                    self.send(peer, writer.clone(), Reliability::Unreliable);
                }
            }
        }
    }

    fn remove_peer(&mut self, peer: PeerId, reason: DisconnectReason) {
        let Some(state) = self.peers.remove(&peer) else {
            return;
        };

        if let Some(id) = state.object_id {
            self.remove_object(id);
            if let Some(map_id) = state.map_id {
                let delete = ObjectDeletePacket { id };
                for other in self.peers_on_map(map_id) {
                    self.send(other, delete.encode(), Reliability::Reliable);
                }
            }
        }

        self.pending_events
            .push_back(ServerEvent::PeerDisconnected { peer, reason });
    }

    fn remove_object(&mut self, id: NetworkId) {
        let Some(mut object) = self.objects.remove(id) else {
            return;
        };
        if let Some(map) = self.maps.get_mut(object.map_id) {
            object.physics.leave_grid(id, &mut map.grid);
            map.remove_object(id);
        }
    }

    fn peers_on_map(&self, map_id: u16) -> Vec<PeerId> {
        self.peers
            .iter()
            .filter(|(_, state)| state.map_id == Some(map_id))
            .map(|(&peer, _)| peer)
            .collect()
    }

    fn object_state(object: &Object) -> ObjectState {
        ObjectState {
            id: object.id,
            controller_ack: object
                .controller
                .as_ref()
                .map(|controller| controller.last_input_time),
            position: object.physics.position,
            rotation: object.physics.rotation,
        }
    }

    fn object_states(&self, map_id: u16) -> Vec<ObjectState> {
        let mut states: Vec<ObjectState> = self
            .objects
            .iter()
            .filter(|object| object.map_id == map_id)
            .map(Self::object_state)
            .collect();
        states.sort_by_key(|state| state.id);
        states
    }

    /// Spawn list for `map_id`, or just `only` when given.
    fn object_list(&self, map_id: u16, client_object_id: NetworkId, only: Option<NetworkId>) -> ObjectListPacket {
        let mut objects: Vec<ObjectSpawn> = self
            .objects
            .iter()
            .filter(|object| object.map_id == map_id)
            .filter(|object| only.is_none_or(|id| id == object.id))
            .map(|object| ObjectSpawn {
                identifier: object.identifier.clone(),
                state: Self::object_state(object),
            })
            .collect();
        objects.sort_by_key(|spawn| spawn.state.id);

        ObjectListPacket {
            map_id,
            server_time_step: self.clock.now(),
            client_object_id,
            objects,
        }
    }

    fn send(&mut self, peer: PeerId, writer: PacketWriter, reliability: Reliability) {
        if let Err(e) = self
            .transport
            .send_packet(peer, writer.as_slice(), reliability, 0)
        {
            self.pending_events.push_back(ServerEvent::Error {
                message: format!("send to peer {peer}: {e}"),
            });
        }
    }
}
