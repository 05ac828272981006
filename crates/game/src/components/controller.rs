use glam::Vec3;

use crate::history::CircularHistoryBuffer;
use crate::input::{ActionState, InputRecord, write_runs};
use crate::net::PacketWriter;
use crate::sequence::{TIME_STEP_MAX, TimeStep, more_recent_ack};
use crate::world::Grid;

use super::physics::Physics;

pub const INPUT_HISTORY_SIZE: usize = 200;
pub const DEFAULT_PLAYER_SPEED: f32 = 5.0;

/// Owns the input history of one controlled object.
///
/// On the client the history holds every input not yet acknowledged by the
/// server; it is resent in full each send interval and trimmed on ack. On
/// the server it is the backlog of accepted inputs waiting to be simulated.
#[derive(Debug, Clone)]
pub struct Controller {
    pub history: CircularHistoryBuffer<InputRecord>,
    /// Last input tick the server has simulated.
    pub last_input_time: TimeStep,
    /// Actions held on the most recent live (non-replayed) input.
    pub action_state: ActionState,
    speed: f32,
}

impl Default for Controller {
    fn default() -> Self {
        Self::new(DEFAULT_PLAYER_SPEED)
    }
}

impl Controller {
    pub fn new(speed: f32) -> Self {
        Self {
            history: CircularHistoryBuffer::new(INPUT_HISTORY_SIZE),
            last_input_time: 0,
            action_state: ActionState::empty(),
            speed,
        }
    }

    pub fn speed(&self) -> f32 {
        self.speed
    }

    /// Derives velocity from the movement bits of `input`. A replayed input
    /// touches nothing but `physics.velocity`.
    pub fn handle_input(&mut self, input: &InputRecord, physics: &mut Physics, replay: bool) {
        physics.velocity = movement_direction(input.action_state) * self.speed;

        if !replay {
            self.action_state = input.action_state;
        }
    }

    pub fn record_input(&mut self, input: InputRecord) {
        self.history.push_back(input);
    }

    /// Writes `rotation`, the oldest buffered tick, then the run-length
    /// encoded action states. Returns false and writes nothing when there
    /// is no buffered input.
    pub fn network_serialize_history(&self, rotation: f32, writer: &mut PacketWriter) -> bool {
        if self.history.is_empty() {
            return false;
        }

        writer.write_f32(rotation);
        writer.write_u16(self.history.front(0).time);
        write_runs(self.history.iter().map(|input| input.action_state), writer);
        true
    }

    /// Appends every record newer than `last_ack`, advancing it as it goes.
    /// Records already received, including repeats inside one packet, are
    /// skipped. Returns how many were accepted.
    pub fn accept_inputs(&mut self, records: &[InputRecord], last_ack: &mut TimeStep) -> usize {
        let mut accepted = 0;

        for record in records {
            if more_recent_ack(*last_ack, record.time, TIME_STEP_MAX) {
                self.history.push_back(*record);
                *last_ack = record.time;
                accepted += 1;
            }
        }

        accepted
    }

    /// Pops the oldest pending input for simulation.
    pub fn next_input(&mut self) -> Option<InputRecord> {
        self.history.pop()
    }

    /// Rewinds to `physics.network_position` and replays every input newer
    /// than `last_input_time`, then drops acknowledged inputs.
    ///
    /// Returns false, changing nothing, if the acknowledged tick is no
    /// longer in the history.
    pub fn replay_input(&mut self, physics: &mut Physics, frame_time: f32, grid: Option<&Grid>) -> bool {
        let Some(match_depth) = self.find_acknowledged() else {
            log::trace!(
                "ack {} not in input history ({} entries), skipping replay",
                self.last_input_time,
                self.history.size()
            );
            return false;
        };

        physics.position = physics.network_position;

        for depth in (0..match_depth).rev() {
            let input = *self.history.back(depth);
            self.handle_input(&input, physics, true);
            physics.integrate(frame_time, grid);
        }

        self.discard_acknowledged();
        true
    }

    fn find_acknowledged(&self) -> Option<usize> {
        (0..self.history.size()).find(|&depth| self.history.back(depth).time == self.last_input_time)
    }

    fn discard_acknowledged(&mut self) {
        while !self.history.is_empty()
            && !more_recent_ack(self.last_input_time, self.history.front(0).time, TIME_STEP_MAX)
        {
            self.history.pop();
        }
    }
}

/// Unit direction for the held movement bits; screen space, so UP is -y.
pub fn movement_direction(state: ActionState) -> Vec3 {
    let mut direction = Vec3::ZERO;

    if state.contains(ActionState::UP) {
        direction.y -= 1.0;
    }
    if state.contains(ActionState::DOWN) {
        direction.y += 1.0;
    }
    if state.contains(ActionState::LEFT) {
        direction.x -= 1.0;
    }
    if state.contains(ActionState::RIGHT) {
        direction.x += 1.0;
    }

    direction.normalize_or_zero()
}
