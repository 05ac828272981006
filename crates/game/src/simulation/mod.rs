mod client;
mod events;
mod server;
mod tick;

pub use client::{ClientSimulation, ClientState};
pub use events::{DisconnectReason, ServerEvent};
pub use server::{MAX_INPUTS_PER_TICK, PLAYER_IDENTIFIER, ServerSimulation};
pub use tick::FixedTimestep;
