use glam::{IVec2, Vec3};

use crate::history::CircularHistoryBuffer;
use crate::sequence::{TimeStep, time_step_delta};
use crate::world::{Grid, NetworkId};

pub const POSITION_HISTORY_SIZE: usize = 20;

/// Ticks remote entities are drawn behind the newest server sample.
pub const RENDER_DELAY: TimeStep = 6;

pub const ROTATION_SMOOTHING: f32 = 0.4;
pub const DEFAULT_RADIUS: f32 = 0.4;

/// Cap on how far past the newest sample a remote entity is extrapolated,
/// as a fraction of the last sample interval.
const MAX_EXTRAPOLATION: f32 = 1.5;
const MOVE_EPSILON: f32 = 1e-6;

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct PositionSample {
    pub position: Vec3,
    pub time: TimeStep,
}

/// Fixed per entity role at creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PhysicsMode {
    /// Server objects and the locally predicted player: integrate directly.
    Authoritative,
    /// Remote objects on a client: follow the server sample history.
    Interpolated,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Animation {
    #[default]
    Idle,
    Moving,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Obstacle {
    pub id: NetworkId,
    pub position: Vec3,
    pub radius: f32,
}

#[derive(Debug, Clone)]
pub struct Physics {
    pub position: Vec3,
    pub last_position: Vec3,
    pub network_position: Vec3,
    pub velocity: Vec3,
    /// Degrees.
    pub rotation: f32,
    pub interpolated_rotation: f32,
    pub history: CircularHistoryBuffer<PositionSample>,
    pub collision_response: bool,
    pub radius: f32,
    pub animation: Animation,
    mode: PhysicsMode,
    tile: Option<IVec2>,
}

impl Physics {
    pub fn new(mode: PhysicsMode, position: Vec3) -> Self {
        Self {
            position,
            last_position: position,
            network_position: position,
            velocity: Vec3::ZERO,
            rotation: 0.0,
            interpolated_rotation: 0.0,
            history: CircularHistoryBuffer::new(POSITION_HISTORY_SIZE),
            collision_response: true,
            radius: DEFAULT_RADIUS,
            animation: Animation::Idle,
            mode,
            tile: None,
        }
    }

    pub fn mode(&self) -> PhysicsMode {
        self.mode
    }

    pub fn is_interpolated(&self) -> bool {
        self.mode == PhysicsMode::Interpolated
    }

    pub fn tile(&self) -> Option<IVec2> {
        self.tile
    }

    /// Stores an authoritative sample received from the server.
    pub fn apply_network_update(&mut self, position: Vec3, rotation: f32, time: TimeStep) {
        self.network_position = position;
        self.rotation = rotation;

        if self.is_interpolated() {
            self.history.push_back(PositionSample { position, time });
        }
    }

    /// Server-side and predicted movement for one tick: push out of
    /// overlapping obstacles, integrate, resolve walls, then refresh grid
    /// membership if the tile changed.
    pub fn update_authoritative(
        &mut self,
        id: NetworkId,
        frame_time: f32,
        obstacles: &[Obstacle],
        mut grid: Option<&mut Grid>,
    ) {
        self.last_position = self.position;

        self.push_out(obstacles);
        self.integrate(frame_time, grid.as_deref());

        if let Some(grid) = grid.as_deref_mut() {
            self.update_tile(id, grid);
        }

        self.update_animation();
    }

    /// One fixed step of `position += velocity * frame_time` with wall
    /// resolution. Used directly when replaying input.
    pub fn integrate(&mut self, frame_time: f32, grid: Option<&Grid>) {
        let target = self.position + self.velocity * frame_time;

        self.position = match grid {
            Some(grid) if self.collision_response => self.resolve_walls(target, grid),
            _ => target,
        };
    }

    pub fn update_interpolated(&mut self, time_step: TimeStep) {
        self.last_position = self.position;

        let render_time = time_step.wrapping_sub(RENDER_DELAY);
        if let Some(position) = self.interpolate_at(render_time) {
            self.position = position;
        }

        self.smooth_rotation();
        self.update_animation();
    }

    /// Position at `render_time` from the sample history, scanning newest
    /// first for the pair of samples that straddles it.
    pub fn interpolate_at(&self, render_time: TimeStep) -> Option<Vec3> {
        let size = self.history.size();
        match size {
            0 => return None,
            1 => return Some(self.history.back(0).position),
            _ => {}
        }

        for depth in 0..size - 1 {
            let newer = self.history.back(depth);
            let older = self.history.back(depth + 1);

            if time_step_delta(older.time, render_time) >= 0
                && time_step_delta(render_time, newer.time) >= 0
            {
                return Some(blend(older, newer, render_time, 1.0));
            }
        }

        let newest = self.history.back(0);
        if time_step_delta(newest.time, render_time) > 0 {
            Some(blend(self.history.back(1), newest, render_time, MAX_EXTRAPOLATION))
        } else {
            Some(blend(self.history.front(0), self.history.front(1), render_time, 0.0))
        }
    }

    pub fn moved(&self) -> bool {
        self.position.distance_squared(self.last_position) > MOVE_EPSILON
    }

    fn push_out(&mut self, obstacles: &[Obstacle]) {
        for obstacle in obstacles {
            let offset = self.position - obstacle.position;
            let min_distance = self.radius + obstacle.radius;
            let distance_sq = offset.length_squared();

            if distance_sq >= min_distance * min_distance || distance_sq <= f32::EPSILON {
                continue;
            }

            let normal = offset / distance_sq.sqrt();
            let into = self.velocity.dot(normal);
            if into < 0.0 {
                self.velocity -= normal * into;
            }
        }
    }

    fn resolve_walls(&self, target: Vec3, grid: &Grid) -> Vec3 {
        let mut resolved = self.position;

        let step_x = Vec3::new(target.x, resolved.y, resolved.z);
        if !grid.overlaps_wall(step_x, self.radius) {
            resolved.x = target.x;
        }

        let step_y = Vec3::new(resolved.x, target.y, resolved.z);
        if !grid.overlaps_wall(step_y, self.radius) {
            resolved.y = target.y;
        }

        resolved
    }

    fn update_tile(&mut self, id: NetworkId, grid: &mut Grid) {
        let tile = grid.tile_at(self.position);
        if self.tile == Some(tile) {
            return;
        }

        if let Some(previous) = self.tile {
            grid.remove_object(id, previous);
        }
        grid.add_object(id, tile);
        self.tile = Some(tile);
    }

    /// Registers with the cell under the current position.
    pub fn enter_grid(&mut self, id: NetworkId, grid: &mut Grid) {
        self.update_tile(id, grid);
    }

    /// Detaches from the grid, e.g. when the owning object is removed.
    pub fn leave_grid(&mut self, id: NetworkId, grid: &mut Grid) {
        if let Some(tile) = self.tile.take() {
            grid.remove_object(id, tile);
        }
    }

    fn smooth_rotation(&mut self) {
        let target = self.rotation;
        let mut current = self.interpolated_rotation;

        if target - current > 180.0 {
            current += 360.0;
        } else if target - current < -180.0 {
            current -= 360.0;
        }

        current += (target - current) * ROTATION_SMOOTHING;
        self.interpolated_rotation = current.rem_euclid(360.0);
    }

    fn update_animation(&mut self) {
        self.animation = if self.moved() {
            Animation::Moving
        } else {
            Animation::Idle
        };
    }
}

fn blend(older: &PositionSample, newer: &PositionSample, render_time: TimeStep, max: f32) -> Vec3 {
    let span = time_step_delta(older.time, newer.time);
    let percentage = if span == 0 {
        0.0
    } else {
        time_step_delta(older.time, render_time) as f32 / span as f32
    };

    older
        .position
        .lerp(newer.position, percentage.clamp(0.0, max))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::world::Map;

    fn remote_with(samples: &[(TimeStep, f32)]) -> Physics {
        let mut physics = Physics::new(PhysicsMode::Interpolated, Vec3::ZERO);
        for &(time, x) in samples {
            physics.apply_network_update(Vec3::new(x, 0.0, 0.0), 0.0, time);
        }
        physics
    }

    #[test]
    fn interpolation_brackets() {
        let physics = remote_with(&[(10, 0.0), (20, 10.0)]);

        assert_eq!(physics.interpolate_at(15), Some(Vec3::new(5.0, 0.0, 0.0)));
        assert_eq!(physics.interpolate_at(10), Some(Vec3::ZERO));
        assert_eq!(physics.interpolate_at(20), Some(Vec3::new(10.0, 0.0, 0.0)));
    }

    #[test]
    fn interpolation_picks_correct_pair() {
        let physics = remote_with(&[(0, 0.0), (5, 5.0), (10, 5.0), (15, 20.0)]);

        for (render_time, expected) in [(3, 3.0), (7, 5.0), (12, 11.0)] {
            let position = physics.interpolate_at(render_time).unwrap();
            assert!(
                position.abs_diff_eq(Vec3::new(expected, 0.0, 0.0), 1e-5),
                "render {render_time}: {position}"
            );
        }
    }

    #[test]
    fn duplicate_times_do_not_divide_by_zero() {
        let physics = remote_with(&[(10, 4.0), (10, 8.0)]);
        let position = physics.interpolate_at(10).unwrap();
        assert!(position.x.is_finite());
        assert_eq!(position.x, 4.0);
    }

    #[test]
    fn render_time_before_history_holds_oldest() {
        let physics = remote_with(&[(10, 1.0), (20, 2.0)]);
        assert_eq!(physics.interpolate_at(2), Some(Vec3::new(1.0, 0.0, 0.0)));
    }

    #[test]
    fn render_time_after_history_extrapolates_capped() {
        let physics = remote_with(&[(10, 0.0), (20, 10.0)]);
        assert_eq!(physics.interpolate_at(25), Some(Vec3::new(15.0, 0.0, 0.0)));
        assert_eq!(physics.interpolate_at(60), Some(Vec3::new(15.0, 0.0, 0.0)));
    }

    #[test]
    fn interpolation_across_wrap() {
        let physics = remote_with(&[(65_530, 0.0), (4, 10.0)]);
        assert_eq!(physics.interpolate_at(65_535), Some(Vec3::new(5.0, 0.0, 0.0)));
    }

    #[test]
    fn update_interpolated_applies_render_delay() {
        let mut physics = remote_with(&[(10, 0.0), (20, 10.0)]);
        physics.update_interpolated(15 + RENDER_DELAY);

        assert_eq!(physics.position, Vec3::new(5.0, 0.0, 0.0));
        assert_eq!(physics.animation, Animation::Moving);
    }

    #[test]
    fn rotation_wraps_the_short_way() {
        let mut physics = Physics::new(PhysicsMode::Interpolated, Vec3::ZERO);
        physics.interpolated_rotation = 10.0;
        physics.rotation = 350.0;
        physics.smooth_rotation();

        assert!((physics.interpolated_rotation - 2.0).abs() < 1e-4);
    }

    #[test]
    fn authoritative_samples_skip_history() {
        let mut physics = Physics::new(PhysicsMode::Authoritative, Vec3::ZERO);
        physics.apply_network_update(Vec3::ONE, 90.0, 3);

        assert!(physics.history.is_empty());
        assert_eq!(physics.network_position, Vec3::ONE);
    }

    #[test]
    fn velocity_into_obstacle_slides() {
        let mut physics = Physics::new(PhysicsMode::Authoritative, Vec3::ZERO);
        physics.velocity = Vec3::new(1.0, 1.0, 0.0);
        let obstacle = Obstacle {
            id: 2,
            position: Vec3::new(0.5, 0.0, 0.0),
            radius: 0.4,
        };

        physics.update_authoritative(1, 0.1, &[obstacle], None);

        assert_eq!(physics.velocity, Vec3::new(0.0, 1.0, 0.0));
        assert!((physics.position.y - 0.1).abs() < 1e-6);
    }

    #[test]
    fn walls_block_per_axis() {
        let mut map = Map::arena(0, "walls", 8);
        let mut physics = Physics::new(PhysicsMode::Authoritative, Vec3::new(1.5, 3.5, 0.0));
        physics.velocity = Vec3::new(-1.0, 1.0, 0.0);

        physics.update_authoritative(1, 0.5, &[], Some(&mut map.grid));

        assert_eq!(physics.position.x, 1.5);
        assert_eq!(physics.position.y, 4.0);
        assert_eq!(map.grid.objects_at(IVec2::new(1, 4)), &[1]);
    }

    #[test]
    fn membership_moves_with_tile() {
        let mut map = Map::arena(0, "cells", 8);
        let mut physics = Physics::new(PhysicsMode::Authoritative, Vec3::new(2.5, 2.5, 0.0));
        physics.velocity = Vec3::new(1.0, 0.0, 0.0);

        physics.update_authoritative(9, 0.1, &[], Some(&mut map.grid));
        assert_eq!(physics.tile(), Some(IVec2::new(2, 2)));

        physics.update_authoritative(9, 1.0, &[], Some(&mut map.grid));
        assert_eq!(physics.tile(), Some(IVec2::new(3, 2)));
        assert!(map.grid.objects_at(IVec2::new(2, 2)).is_empty());
        assert_eq!(map.grid.objects_at(IVec2::new(3, 2)), &[9]);
    }

    #[test]
    fn idle_when_not_moving() {
        let mut physics = Physics::new(PhysicsMode::Authoritative, Vec3::ZERO);
        physics.update_authoritative(1, 0.01, &[], None);
        assert_eq!(physics.animation, Animation::Idle);
    }
}
