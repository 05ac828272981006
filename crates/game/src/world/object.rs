use std::collections::HashMap;

use crate::components::{Controller, Obstacle, Physics};

/// Stable object id shared by client and server.
pub type NetworkId = u16;

/// A simulated entity. Components are typed optional fields; the simulation
/// loops coordinate them, components never reference each other.
#[derive(Debug, Clone)]
pub struct Object {
    pub id: NetworkId,
    pub identifier: String,
    pub map_id: u16,
    pub physics: Physics,
    pub controller: Option<Controller>,
}

impl Object {
    pub fn new(id: NetworkId, identifier: impl Into<String>, map_id: u16, physics: Physics) -> Self {
        Self {
            id,
            identifier: identifier.into(),
            map_id,
            physics,
            controller: None,
        }
    }

    pub fn with_controller(mut self, controller: Controller) -> Self {
        self.controller = Some(controller);
        self
    }

    pub fn has_controller(&self) -> bool {
        self.controller.is_some()
    }

    pub fn obstacle(&self) -> Obstacle {
        Obstacle {
            id: self.id,
            position: self.physics.position,
            radius: self.physics.radius,
        }
    }
}

/// Arena of objects keyed by [`NetworkId`].
#[derive(Debug)]
pub struct ObjectManager {
    objects: HashMap<NetworkId, Object>,
    next_id: NetworkId,
}

impl Default for ObjectManager {
    fn default() -> Self {
        Self::new()
    }
}

impl ObjectManager {
    pub fn new() -> Self {
        Self {
            objects: HashMap::new(),
            next_id: 1,
        }
    }

    /// Allocates a free id, or `None` if all 65535 are taken.
    pub fn allocate_id(&mut self) -> Option<NetworkId> {
        for _ in 0..u16::MAX {
            let id = self.next_id;
            self.next_id = self.next_id.wrapping_add(1).max(1);
            if !self.objects.contains_key(&id) {
                return Some(id);
            }
        }
        None
    }

    pub fn insert(&mut self, object: Object) -> NetworkId {
        let id = object.id;
        self.objects.insert(id, object);
        id
    }

    pub fn remove(&mut self, id: NetworkId) -> Option<Object> {
        self.objects.remove(&id)
    }

    pub fn get(&self, id: NetworkId) -> Option<&Object> {
        self.objects.get(&id)
    }

    pub fn get_mut(&mut self, id: NetworkId) -> Option<&mut Object> {
        self.objects.get_mut(&id)
    }

    pub fn contains(&self, id: NetworkId) -> bool {
        self.objects.contains_key(&id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Object> {
        self.objects.values()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Object> {
        self.objects.values_mut()
    }

    /// Obstacles on `map_id` other than `exclude`.
    pub fn obstacles(&self, map_id: u16, exclude: NetworkId) -> Vec<Obstacle> {
        self.objects
            .values()
            .filter(|object| object.map_id == map_id && object.id != exclude)
            .map(Object::obstacle)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    pub fn clear(&mut self) {
        self.objects.clear();
    }
}
