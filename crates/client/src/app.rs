use std::thread;
use std::time::{Duration, Instant};

use ae::{ActionState, ClientSimulation, ClientState, Transport};

use crate::input::InputScript;

const REPORT_INTERVAL: Duration = Duration::from_secs(1);

/// Drives a client simulation from wall-clock time, feeding it a scripted
/// input sequence and periodically logging prediction state.
pub struct App<T: Transport> {
    simulation: ClientSimulation<T>,
    script: InputScript,
    /// Upper bound on run time; `None` stops when the script ends.
    duration: Option<Duration>,
}

impl<T: Transport> App<T> {
    pub fn new(simulation: ClientSimulation<T>, script: InputScript, duration: Option<Duration>) -> Self {
        Self {
            simulation,
            script,
            duration,
        }
    }

    pub fn run(&mut self) {
        let start = Instant::now();
        let mut last_frame = start;
        let mut last_report = start;
        let mut script_start: Option<Instant> = None;

        loop {
            let now = Instant::now();
            let delta = (now - last_frame).as_secs_f32();
            last_frame = now;

            if self.duration.is_some_and(|limit| now - start >= limit) {
                break;
            }

            let actions = if self.simulation.is_playing() {
                let began = *script_start.get_or_insert(now);
                match self.script.actions_at((now - began).as_secs_f32()) {
                    Some(actions) => actions,
                    None if self.duration.is_none() => break,
                    None => ActionState::empty(),
                }
            } else {
                ActionState::empty()
            };

            self.simulation.update(delta, actions);

            if self.simulation.state() == ClientState::Disconnected {
                log::warn!("Lost connection to server");
                return;
            }

            if now - last_report >= REPORT_INTERVAL {
                self.report();
                last_report = now;
            }

            thread::sleep(Duration::from_millis(1));
        }

        self.report();
        self.simulation.disconnect();
        log::info!("Disconnected");
    }

    fn report(&self) {
        let stats = self.simulation.transport().stats();
        match self.simulation.own_object() {
            Some(player) => log::info!(
                "t={} server={} pos=({:.2}, {:.2}) replays={} objects={} rtt={:.1}ms sent={} recv={} dropped={}",
                self.simulation.time_step(),
                self.simulation.server_time_step(),
                player.physics.position.x,
                player.physics.position.y,
                self.simulation.replay_count(),
                self.simulation.objects().len(),
                stats.rtt_ms,
                stats.packets_sent,
                stats.packets_received,
                stats.packets_dropped,
            ),
            None => log::info!("State {:?}, waiting for player", self.simulation.state()),
        }
    }
}
