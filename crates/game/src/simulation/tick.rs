/// Longest frame delta accepted in one call, so a stall does not trigger a
/// burst of catch-up ticks.
const MAX_FRAME_DELTA: f32 = 0.25;

/// Accumulates wall-clock time and releases it in fixed steps.
#[derive(Debug, Clone)]
pub struct FixedTimestep {
    dt: f32,
    accumulator: f32,
}

impl FixedTimestep {
    pub fn new(dt: f32) -> Self {
        Self {
            dt,
            accumulator: 0.0,
        }
    }

    pub fn dt(&self) -> f32 {
        self.dt
    }

    pub fn accumulate(&mut self, delta: f32) {
        self.accumulator += delta.min(MAX_FRAME_DELTA);
    }

    pub fn should_tick(&self) -> bool {
        self.accumulator >= self.dt
    }

    pub fn consume_tick(&mut self) -> bool {
        if self.accumulator >= self.dt {
            self.accumulator -= self.dt;
            true
        } else {
            false
        }
    }

    pub fn alpha(&self) -> f32 {
        self.accumulator / self.dt
    }

    pub fn reset(&mut self) {
        self.accumulator = 0.0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_timestep_accumulation() {
        let mut ts = FixedTimestep::new(1.0 / 60.0);

        ts.accumulate(1.0 / 30.0 + 1e-4);
        assert!(ts.should_tick());
        assert!(ts.consume_tick());
        assert!(ts.consume_tick());
        assert!(!ts.consume_tick());
    }

    #[test]
    fn long_frames_are_clamped() {
        let mut ts = FixedTimestep::new(0.01);
        ts.accumulate(5.0);

        let mut ticks = 0;
        while ts.consume_tick() {
            ticks += 1;
        }
        assert!((24..=25).contains(&ticks));
        assert!(ts.alpha() < 1.0);
    }
}
