mod grid;
mod map;
mod object;

pub use grid::Grid;
pub use map::{ARENA_SIZE, MAX_MAPS, Map, MapRegistry};
pub use object::{NetworkId, Object, ObjectManager};
