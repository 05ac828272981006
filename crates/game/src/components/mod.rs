mod controller;
mod physics;

pub use controller::{Controller, DEFAULT_PLAYER_SPEED, INPUT_HISTORY_SIZE, movement_direction};
pub use physics::{
    Animation, Obstacle, POSITION_HISTORY_SIZE, PositionSample, Physics, PhysicsMode, RENDER_DELAY,
};
