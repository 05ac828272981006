use crate::components::{Controller, Physics, PhysicsMode};
use crate::config::ClientConfig;
use crate::input::{ActionState, InputRecord};
use crate::net::{
    JoinPacket, NetworkEvent, ObjectDeletePacket, ObjectListPacket, ObjectSpawn,
    ObjectUpdatesPacket, PacketError, PacketReader, PacketType, PacketWriter, Reliability,
    SERVER_PEER, Transport,
};
use crate::sequence::{SequenceClock, TIME_STEP_MAX, TimeStep, more_recent_ack};
use crate::world::{ARENA_SIZE, Map, NetworkId, Object, ObjectManager};

use super::tick::FixedTimestep;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientState {
    Connecting,
    /// Join sent, waiting for the object list.
    Joining,
    Playing,
    Disconnected,
}

/// Predicting client: applies local input immediately, reconciles against
/// server updates and interpolates everyone else.
pub struct ClientSimulation<T: Transport> {
    transport: T,
    config: ClientConfig,
    timestep: FixedTimestep,
    state: ClientState,
    /// Stamps local input records.
    clock: SequenceClock,
    /// Estimate of the server tick, driving remote interpolation.
    server_clock: SequenceClock,
    last_server_time: Option<TimeStep>,
    objects: ObjectManager,
    map: Option<Map>,
    own_id: Option<NetworkId>,
    rotation: f32,
    replays: u64,
}

impl<T: Transport> ClientSimulation<T> {
    pub fn new(transport: T, config: ClientConfig) -> Self {
        Self {
            transport,
            timestep: FixedTimestep::new(config.time_step),
            state: ClientState::Connecting,
            clock: SequenceClock::default(),
            server_clock: SequenceClock::default(),
            last_server_time: None,
            objects: ObjectManager::new(),
            map: None,
            own_id: None,
            rotation: 0.0,
            replays: 0,
            config,
        }
    }

    pub fn state(&self) -> ClientState {
        self.state
    }

    pub fn is_playing(&self) -> bool {
        self.state == ClientState::Playing
    }

    pub fn objects(&self) -> &ObjectManager {
        &self.objects
    }

    pub fn own_id(&self) -> Option<NetworkId> {
        self.own_id
    }

    pub fn own_object(&self) -> Option<&Object> {
        self.objects.get(self.own_id?)
    }

    pub fn time_step(&self) -> TimeStep {
        self.clock.now()
    }

    pub fn server_time_step(&self) -> TimeStep {
        self.server_clock.now()
    }

    /// Number of corrections replayed so far.
    pub fn replay_count(&self) -> u64 {
        self.replays
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    pub fn set_rotation(&mut self, rotation: f32) {
        self.rotation = rotation.rem_euclid(360.0);
    }

    /// Runs every fixed step owed for `delta` seconds of wall time with
    /// `actions` held throughout.
    pub fn update(&mut self, delta: f32, actions: ActionState) -> u32 {
        self.timestep.accumulate(delta);

        let mut ticks = 0;
        while self.timestep.consume_tick() {
            self.step(actions);
            ticks += 1;
        }
        ticks
    }

    /// Advances exactly one fixed step.
    pub fn step(&mut self, actions: ActionState) {
        let dt = self.timestep.dt();

        self.transport.update(dt);
        while let Some(event) = self.transport.next_event() {
            self.handle_event(event);
        }

        if self.state == ClientState::Playing {
            self.predict(actions, dt);
            self.interpolate_remotes();
        }

        self.clock.advance();
        self.server_clock.advance();

        if self.transport.needs_update() {
            self.send_input();
            self.transport.reset_update_timer();
        }
    }

    pub fn disconnect(&mut self) {
        if self.state != ClientState::Disconnected {
            self.transport.disconnect(SERVER_PEER);
            self.reset(ClientState::Disconnected);
        }
    }

    fn reset(&mut self, state: ClientState) {
        self.state = state;
        self.objects.clear();
        self.map = None;
        self.own_id = None;
        self.last_server_time = None;
    }

    fn handle_event(&mut self, event: NetworkEvent) {
        match event {
            NetworkEvent::Connect(_) => {
                log::info!("Connected, joining '{}'", self.config.map_name);
                let join = JoinPacket {
                    map_name: self.config.map_name.clone(),
                };
                self.send(join.encode(), Reliability::Reliable);
                self.state = ClientState::Joining;
            }
            NetworkEvent::Disconnect(_) => {
                log::info!("Disconnected from server");
                self.reset(ClientState::Disconnected);
            }
            NetworkEvent::Packet { data, .. } => {
                if let Err(e) = self.handle_packet(&data) {
                    log::warn!("Dropping server packet: {}", e);
                }
            }
        }
    }

    fn handle_packet(&mut self, data: &[u8]) -> Result<(), PacketError> {
        let mut reader = PacketReader::new(data);

        match reader.read_type()? {
            PacketType::ObjectList => {
                let list = ObjectListPacket::decode(&mut reader)?;
                self.handle_object_list(list);
            }
            PacketType::ObjectUpdates => {
                let objects = &self.objects;
                let updates = ObjectUpdatesPacket::decode(&mut reader, |id| {
                    objects.get(id).map(Object::has_controller)
                })?;
                self.handle_object_updates(updates);
            }
            PacketType::ObjectDelete => {
                let delete = ObjectDeletePacket::decode(&mut reader)?;
                self.handle_object_delete(delete);
            }
            other => return Err(PacketError::Unexpected(other)),
        }

        Ok(())
    }

    fn handle_object_list(&mut self, list: ObjectListPacket) {
        if self.map.as_ref().is_some_and(|map| map.id != list.map_id) {
            log::debug!("Object list for map {} ignored", list.map_id);
            return;
        }

        let map = self
            .map
            .get_or_insert_with(|| Map::arena(list.map_id, self.config.map_name.as_str(), ARENA_SIZE));

        if self.own_id.is_none() {
            self.own_id = Some(list.client_object_id);
            self.server_clock.set(list.server_time_step);
            self.last_server_time = Some(list.server_time_step);
            log::info!(
                "Playing as object {} on map {} at server step {}",
                list.client_object_id,
                list.map_id,
                list.server_time_step
            );
        }

        for spawn in list.objects {
            if self.objects.contains(spawn.state.id) {
                continue;
            }
            let object = spawn_object(
                spawn,
                list.map_id,
                self.own_id,
                list.server_time_step,
                self.config.player_speed,
            );
            let id = object.id;
            self.objects.insert(object);
            map.add_object(id);
        }

        self.state = ClientState::Playing;
    }

    fn handle_object_updates(&mut self, updates: ObjectUpdatesPacket) {
        let Some(map) = self.map.as_ref() else {
            return;
        };
        if map.id != updates.map_id {
            log::debug!("Update for map {} ignored", updates.map_id);
            return;
        }

        if let Some(last) = self.last_server_time {
            if !more_recent_ack(last, updates.server_time_step, TIME_STEP_MAX) {
                log::trace!("Stale update {} (last {})", updates.server_time_step, last);
                return;
            }
        }
        self.last_server_time = Some(updates.server_time_step);
        self.server_clock.set(updates.server_time_step);

        let frame_time = self.timestep.dt();
        for state in updates.objects {
            let Some(object) = self.objects.get_mut(state.id) else {
                continue;
            };

            if Some(state.id) == self.own_id {
                object.physics.network_position = state.position;
                let Some(controller) = object.controller.as_mut() else {
                    continue;
                };
                if let Some(ack) = state.controller_ack {
                    controller.last_input_time = ack;
                }
                if controller.replay_input(&mut object.physics, frame_time, Some(&map.grid)) {
                    self.replays += 1;
                }
            } else {
                object
                    .physics
                    .apply_network_update(state.position, state.rotation, updates.server_time_step);
            }
        }
    }

    fn handle_object_delete(&mut self, delete: ObjectDeletePacket) {
        if self.objects.remove(delete.id).is_none() {
            return;
        }
        if let Some(map) = self.map.as_mut() {
            map.remove_object(delete.id);
        }
        if Some(delete.id) == self.own_id {
            log::warn!("Server removed our object {}", delete.id);
            self.own_id = None;
        }
    }

    fn predict(&mut self, actions: ActionState, dt: f32) {
        let Some(id) = self.own_id else {
            return;
        };
        let obstacles = match self.objects.get(id) {
            Some(object) => self.objects.obstacles(object.map_id, id),
            None => return,
        };
        let grid = self.map.as_mut().map(|map| &mut map.grid);

        let Some(object) = self.objects.get_mut(id) else {
            return;
        };
        let Some(controller) = object.controller.as_mut() else {
            return;
        };

        let input = InputRecord::new(self.clock.now(), actions);
        controller.handle_input(&input, &mut object.physics, false);
        controller.record_input(input);
        object.physics.rotation = self.rotation;
        object.physics.update_authoritative(id, dt, &obstacles, grid);
    }

    fn interpolate_remotes(&mut self) {
        let time_step = self.server_clock.now();
        for object in self.objects.iter_mut() {
            if object.physics.is_interpolated() {
                object.physics.update_interpolated(time_step);
            }
        }
    }

    fn send_input(&mut self) {
        let Some(controller) = self
            .own_id
            .and_then(|id| self.objects.get(id))
            .and_then(|object| object.controller.as_ref())
        else {
            return;
        };

        let mut writer = PacketWriter::new(PacketType::Input);
        if controller.network_serialize_history(self.rotation, &mut writer) {
            self.send(writer, Reliability::Unreliable);
        }
    }

    fn send(&mut self, writer: PacketWriter, reliability: Reliability) {
        if let Err(e) = self
            .transport
            .send_packet(SERVER_PEER, writer.as_slice(), reliability, 0)
        {
            log::warn!("Send to server failed: {}", e);
        }
    }
}

fn spawn_object(
    spawn: ObjectSpawn,
    map_id: u16,
    own_id: Option<NetworkId>,
    time: TimeStep,
    speed: f32,
) -> Object {
    let ObjectSpawn { identifier, state } = spawn;
    let own = Some(state.id) == own_id;

    let mode = if own {
        PhysicsMode::Authoritative
    } else {
        PhysicsMode::Interpolated
    };
    let mut physics = Physics::new(mode, state.position);
    physics.rotation = state.rotation;
    physics.interpolated_rotation = state.rotation;
    if !own {
        physics.apply_network_update(state.position, state.rotation, time);
    }

    let object = Object::new(state.id, identifier, map_id, physics);
    match state.controller_ack {
        Some(ack) => {
            let mut controller = Controller::new(speed);
            controller.last_input_time = ack;
            object.with_controller(controller)
        }
        None => object,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::ObjectState;
    use crate::net::testing::MockTransport;
    use glam::Vec3;

    const OWN: NetworkId = 1;
    const REMOTE: NetworkId = 5;
    const SPAWN: Vec3 = Vec3::new(16.0, 16.0, 0.0);

    fn client() -> ClientSimulation<MockTransport> {
        ClientSimulation::new(MockTransport::default(), ClientConfig::default())
    }

    fn state(id: NetworkId, ack: Option<TimeStep>, x: f32) -> ObjectState {
        ObjectState {
            id,
            controller_ack: ack,
            position: Vec3::new(x, SPAWN.y, 0.0),
            rotation: 0.0,
        }
    }

    fn joined_client(server_time_step: TimeStep) -> ClientSimulation<MockTransport> {
        let mut client = client();
        let list = ObjectListPacket {
            map_id: 0,
            server_time_step,
            client_object_id: OWN,
            objects: vec![
                ObjectSpawn {
                    identifier: "player".into(),
                    state: state(OWN, Some(0), SPAWN.x),
                },
                ObjectSpawn {
                    identifier: "crate".into(),
                    state: state(REMOTE, None, 4.0),
                },
            ],
        };

        let transport = client.transport_mut();
        transport.push(NetworkEvent::Connect(SERVER_PEER));
        transport.push_packet(SERVER_PEER, list.encode());
        client
    }

    fn push_updates(client: &mut ClientSimulation<MockTransport>, server_time_step: TimeStep, objects: Vec<ObjectState>) {
        let packet = ObjectUpdatesPacket {
            map_id: 0,
            server_time_step,
            objects,
        };
        client.transport_mut().push_packet(SERVER_PEER, packet.encode());
    }

    #[test]
    fn connect_sends_reliable_join() {
        let mut client = client();
        client.transport_mut().push(NetworkEvent::Connect(SERVER_PEER));
        client.step(ActionState::empty());

        assert_eq!(client.state(), ClientState::Joining);
        let joins = client.transport().sent_to(SERVER_PEER, PacketType::Join);
        assert_eq!(joins.len(), 1);
        assert_eq!(joins[0].1, Reliability::Reliable);
    }

    #[test]
    fn object_list_assigns_roles() {
        let mut client = joined_client(100);
        client.step(ActionState::empty());

        assert!(client.is_playing());
        let own = client.own_object().unwrap();
        assert_eq!(own.physics.mode(), PhysicsMode::Authoritative);
        assert!(own.has_controller());

        let remote = client.objects().get(REMOTE).unwrap();
        assert!(remote.physics.is_interpolated());
        assert!(!remote.has_controller());
        assert_eq!(remote.physics.history.size(), 1);
    }

    #[test]
    fn stale_updates_are_dropped() {
        let mut client = joined_client(100);
        client.step(ActionState::empty());

        push_updates(&mut client, 105, vec![state(REMOTE, None, 5.0)]);
        client.step(ActionState::empty());
        push_updates(&mut client, 103, vec![state(REMOTE, None, 9.0)]);
        push_updates(&mut client, 105, vec![state(REMOTE, None, 9.0)]);
        client.step(ActionState::empty());

        let remote = client.objects().get(REMOTE).unwrap();
        assert_eq!(remote.physics.history.size(), 2);
        assert_eq!(remote.physics.history.back(0).position.x, 5.0);
    }

    #[test]
    fn update_for_unknown_object_is_dropped_whole() {
        let mut client = joined_client(100);
        client.step(ActionState::empty());

        push_updates(&mut client, 105, vec![state(REMOTE, None, 5.0), state(42, None, 1.0)]);
        client.step(ActionState::empty());

        assert_eq!(client.objects().get(REMOTE).unwrap().physics.history.size(), 1);
    }

    #[test]
    fn acknowledged_state_is_replayed() {
        let mut client = joined_client(100);
        for _ in 0..5 {
            client.step(ActionState::RIGHT);
        }
        let predicted = client.own_object().unwrap().physics.position;
        assert!(predicted.abs_diff_eq(SPAWN + Vec3::new(0.25, 0.0, 0.0), 1e-4));

        // Server has simulated ticks 0..=2 of the five predicted.
        push_updates(&mut client, 110, vec![state(OWN, Some(2), SPAWN.x + 0.15)]);
        client.step(ActionState::RIGHT);

        let own = client.own_object().unwrap();
        assert!(own.physics.position.abs_diff_eq(SPAWN + Vec3::new(0.30, 0.0, 0.0), 1e-4));
        let pending: Vec<_> = own.controller.as_ref().unwrap().history.iter().map(|input| input.time).collect();
        assert_eq!(pending, vec![3, 4, 5]);
        assert_eq!(client.replay_count(), 1);
    }

    #[test]
    fn server_correction_overrides_prediction() {
        let mut client = joined_client(100);
        for _ in 0..4 {
            client.step(ActionState::RIGHT);
        }

        // Blocked on the server after one tick.
        push_updates(&mut client, 110, vec![state(OWN, Some(3), SPAWN.x + 0.05)]);
        client.step(ActionState::empty());

        let own = client.own_object().unwrap();
        assert!(own.physics.position.abs_diff_eq(SPAWN + Vec3::new(0.05, 0.0, 0.0), 1e-4));
    }

    #[test]
    fn input_history_sent_when_due() {
        let mut client = joined_client(100);
        client.step(ActionState::UP);
        assert!(client.transport().sent_to(SERVER_PEER, PacketType::Input).is_empty());

        client.transport_mut().ready = true;
        client.step(ActionState::UP);

        let inputs = client.transport().sent_to(SERVER_PEER, PacketType::Input);
        assert_eq!(inputs.len(), 1);
        assert_eq!(inputs[0].1, Reliability::Unreliable);

        let mut reader = PacketReader::new(inputs[0].0);
        reader.read_type().unwrap();
        let packet = crate::net::InputPacket::decode(&mut reader).unwrap();
        assert_eq!(packet.base_time, 0);
        assert_eq!(packet.records.len(), 2);
        assert!(packet.records.iter().all(|record| record.action_state == ActionState::UP));
    }

    #[test]
    fn remotes_trail_by_render_delay() {
        let mut client = joined_client(100);
        client.step(ActionState::empty());
        push_updates(&mut client, 110, vec![state(REMOTE, None, 14.0)]);
        client.step(ActionState::empty());

        // Samples at 100 (x=4) and 110 (x=14); drawn at 110 - 6 = 104.
        let remote = client.objects().get(REMOTE).unwrap();
        assert!((remote.physics.position.x - 8.0).abs() < 1e-4);
    }

    #[test]
    fn disconnect_clears_world() {
        let mut client = joined_client(100);
        client.step(ActionState::empty());
        client.transport_mut().push(NetworkEvent::Disconnect(SERVER_PEER));
        client.step(ActionState::empty());

        assert_eq!(client.state(), ClientState::Disconnected);
        assert!(client.objects().is_empty());
        assert_eq!(client.own_id(), None);
    }
}
