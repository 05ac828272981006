use std::collections::HashMap;

use glam::{IVec2, Vec3};

use super::grid::Grid;
use super::NetworkId;

pub const ARENA_SIZE: i32 = 32;

/// Every map id a `u16` can name.
pub const MAX_MAPS: usize = u16::MAX as usize + 1;

#[derive(Debug, Clone)]
pub struct Map {
    pub id: u16,
    pub name: String,
    pub grid: Grid,
    objects: Vec<NetworkId>,
}

impl Map {
    /// Walled square arena. Client and server build identical grids from the
    /// same name, so replayed movement collides the same way on both sides.
    pub fn arena(id: u16, name: impl Into<String>, size: i32) -> Self {
        let mut grid = Grid::new(size, size, 1.0);
        for i in 0..size {
            grid.set_wall(IVec2::new(i, 0), true);
            grid.set_wall(IVec2::new(i, size - 1), true);
            grid.set_wall(IVec2::new(0, i), true);
            grid.set_wall(IVec2::new(size - 1, i), true);
        }

        Self {
            id,
            name: name.into(),
            grid,
            objects: Vec::new(),
        }
    }

    pub fn spawn_point(&self) -> Vec3 {
        let tile_size = self.grid.tile_size();
        Vec3::new(
            self.grid.width() as f32 * tile_size / 2.0,
            self.grid.height() as f32 * tile_size / 2.0,
            0.0,
        )
    }

    pub fn add_object(&mut self, id: NetworkId) {
        if !self.objects.contains(&id) {
            self.objects.push(id);
        }
    }

    pub fn remove_object(&mut self, id: NetworkId) {
        self.objects.retain(|&other| other != id);
    }

    pub fn objects(&self) -> &[NetworkId] {
        &self.objects
    }
}

/// Maps opened on a server, looked up by name or id. Maps stay open for
/// the life of the registry, so ids are never reused.
#[derive(Debug)]
pub struct MapRegistry {
    maps: HashMap<u16, Map>,
    by_name: HashMap<String, u16>,
    limit: usize,
}

impl Default for MapRegistry {
    fn default() -> Self {
        Self::with_limit(MAX_MAPS)
    }
}

impl MapRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry that refuses to open more than `limit` maps.
    pub fn with_limit(limit: usize) -> Self {
        Self {
            maps: HashMap::new(),
            by_name: HashMap::new(),
            limit: limit.min(MAX_MAPS),
        }
    }

    /// Returns the map called `name`, opening it if needed. `None` once the
    /// limit is reached.
    pub fn open(&mut self, name: &str) -> Option<&mut Map> {
        let id = match self.by_name.get(name) {
            Some(&id) => id,
            None => {
                if self.maps.len() >= self.limit {
                    log::warn!("Cannot open map '{}': {} maps already open", name, self.maps.len());
                    return None;
                }
                let id = u16::try_from(self.maps.len()).ok()?;
                log::info!("Opening map '{}' as id {}", name, id);
                self.by_name.insert(name.to_string(), id);
                self.maps.insert(id, Map::arena(id, name, ARENA_SIZE));
                id
            }
        };

        self.maps.get_mut(&id)
    }

    pub fn id_of(&self, name: &str) -> Option<u16> {
        self.by_name.get(name).copied()
    }

    pub fn find(&self, name: &str) -> Option<&Map> {
        self.maps.get(&self.id_of(name)?)
    }

    pub fn find_mut(&mut self, name: &str) -> Option<&mut Map> {
        let id = self.id_of(name)?;
        self.maps.get_mut(&id)
    }

    pub fn get(&self, id: u16) -> Option<&Map> {
        self.maps.get(&id)
    }

    pub fn get_mut(&mut self, id: u16) -> Option<&mut Map> {
        self.maps.get_mut(&id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Map> {
        self.maps.values()
    }

    pub fn len(&self) -> usize {
        self.maps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.maps.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn arena_has_border_walls() {
        let map = Map::arena(0, "test", 8);
        assert!(map.grid.is_wall(IVec2::new(0, 3)));
        assert!(map.grid.is_wall(IVec2::new(7, 7)));
        assert!(!map.grid.is_wall(map.grid.tile_at(map.spawn_point())));
    }

    #[test]
    fn registry_reuses_maps_by_name() {
        let mut maps = MapRegistry::new();
        let first = maps.open("arena").unwrap().id;
        let second = maps.open("arena").unwrap().id;
        let other = maps.open("pit").unwrap().id;

        assert_eq!(first, second);
        assert_ne!(first, other);
        assert_eq!(maps.len(), 2);
        assert_eq!(maps.find("pit").unwrap().name, "pit");
    }

    #[test]
    fn registry_refuses_new_names_past_limit() {
        let mut maps = MapRegistry::with_limit(2);
        maps.open("a").unwrap();
        maps.open("b").unwrap();

        assert!(maps.open("c").is_none());
        assert_eq!(maps.id_of("c"), None);
        assert_eq!(maps.open("b").unwrap().name, "b");
        assert_eq!(maps.len(), 2);
    }

    #[test]
    fn map_ids_are_unique_per_name() {
        let mut maps = MapRegistry::new();
        for i in 0..300 {
            let name = format!("m{i}");
            let map = maps.open(&name).unwrap();
            assert_eq!(map.name, name);
            assert_eq!(map.id, i as u16);
        }
    }
}
