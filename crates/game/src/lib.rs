pub mod components;
pub mod config;
pub mod history;
pub mod input;
pub mod net;
pub mod sequence;
pub mod simulation;
pub mod world;

pub use components::{Controller, Obstacle, Physics, PhysicsMode, RENDER_DELAY};
pub use config::{ClientConfig, ConfigError, GAME_TIMESTEP, ServerConfig};
pub use history::CircularHistoryBuffer;
pub use input::{ActionState, InputRecord};
pub use net::{
    LoopbackTransport, NetworkEvent, NetworkStats, PacketError, PeerId, Reliability, Transport,
    TransportConfig, TransportError, UdpTransport,
};
pub use sequence::{SequenceClock, TIME_STEP_MAX, TimeStep, more_recent_ack};
pub use simulation::{
    ClientSimulation, ClientState, DisconnectReason, FixedTimestep, MAX_INPUTS_PER_TICK,
    ServerEvent, ServerSimulation,
};
pub use world::{Map, MapRegistry, NetworkId, Object, ObjectManager};
