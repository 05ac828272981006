use std::collections::HashMap;

use glam::{IVec2, Vec3};

use super::NetworkId;

/// Tile grid for a map: wall flags plus which objects occupy each cell.
#[derive(Debug, Clone)]
pub struct Grid {
    width: i32,
    height: i32,
    tile_size: f32,
    walls: Vec<bool>,
    cells: HashMap<IVec2, Vec<NetworkId>>,
}

impl Grid {
    pub fn new(width: i32, height: i32, tile_size: f32) -> Self {
        let width = width.max(1);
        let height = height.max(1);

        Self {
            width,
            height,
            tile_size,
            walls: vec![false; (width * height) as usize],
            cells: HashMap::new(),
        }
    }

    pub fn width(&self) -> i32 {
        self.width
    }

    pub fn height(&self) -> i32 {
        self.height
    }

    pub fn tile_size(&self) -> f32 {
        self.tile_size
    }

    pub fn set_wall(&mut self, tile: IVec2, wall: bool) {
        if let Some(index) = self.index(tile) {
            self.walls[index] = wall;
        }
    }

    /// Tiles outside the grid count as walls.
    pub fn is_wall(&self, tile: IVec2) -> bool {
        self.index(tile).is_none_or(|index| self.walls[index])
    }

    pub fn tile_at(&self, position: Vec3) -> IVec2 {
        IVec2::new(
            (position.x / self.tile_size).floor() as i32,
            (position.y / self.tile_size).floor() as i32,
        )
    }

    /// True if a circle's bounding box touches any wall tile.
    pub fn overlaps_wall(&self, center: Vec3, radius: f32) -> bool {
        let min = self.tile_at(center - Vec3::new(radius, radius, 0.0));
        let max = IVec2::new(
            ((center.x + radius) / self.tile_size).ceil() as i32 - 1,
            ((center.y + radius) / self.tile_size).ceil() as i32 - 1,
        );

        (min.y..=max.y).any(|y| (min.x..=max.x).any(|x| self.is_wall(IVec2::new(x, y))))
    }

    pub fn add_object(&mut self, id: NetworkId, tile: IVec2) {
        let cell = self.cells.entry(tile).or_default();
        if !cell.contains(&id) {
            cell.push(id);
        }
    }

    pub fn remove_object(&mut self, id: NetworkId, tile: IVec2) {
        if let Some(cell) = self.cells.get_mut(&tile) {
            cell.retain(|&other| other != id);
            if cell.is_empty() {
                self.cells.remove(&tile);
            }
        }
    }

    pub fn objects_at(&self, tile: IVec2) -> &[NetworkId] {
        self.cells.get(&tile).map_or(&[], Vec::as_slice)
    }

    fn index(&self, tile: IVec2) -> Option<usize> {
        if tile.x < 0 || tile.y < 0 || tile.x >= self.width || tile.y >= self.height {
            return None;
        }
        Some((tile.y * self.width + tile.x) as usize)
    }
}
