/// One tick of the fixed-rate simulation clock.
pub type TimeStep = u16;

/// Wraparound modulus passed to [`more_recent_ack`] for [`TimeStep`] values.
pub const TIME_STEP_MAX: u16 = u16::MAX;

/// Returns true if `current` should be treated as chronologically after
/// `previous`, given the wraparound modulus `max`.
///
/// Values more than `max / 2` apart are ambiguous; callers must keep the
/// compared values within half the sequence space of each other.
#[inline]
pub fn more_recent_ack(previous: u16, current: u16, max: u16) -> bool {
    let half = u32::from(max) / 2;
    let (previous, current) = (u32::from(previous), u32::from(current));

    (current > previous && current - previous <= half)
        || (previous > current && previous - current > half)
}

/// Signed distance from `from` to `to` around the 16-bit circle.
#[inline]
pub fn time_step_delta(from: TimeStep, to: TimeStep) -> i32 {
    i32::from(to.wrapping_sub(from) as i16)
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SequenceClock {
    current: TimeStep,
}

impl SequenceClock {
    pub fn new(start: TimeStep) -> Self {
        Self { current: start }
    }

    pub fn now(&self) -> TimeStep {
        self.current
    }

    pub fn set(&mut self, time: TimeStep) {
        self.current = time;
    }

    /// Advances one tick and returns the new value.
    pub fn advance(&mut self) -> TimeStep {
        self.current = self.current.wrapping_add(1);
        self.current
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sequence_comparison() {
        assert!(more_recent_ack(1, 2, TIME_STEP_MAX));
        assert!(!more_recent_ack(2, 1, TIME_STEP_MAX));
        assert!(more_recent_ack(u16::MAX, 0, TIME_STEP_MAX));
        assert!(!more_recent_ack(0, u16::MAX, TIME_STEP_MAX));
        assert!(!more_recent_ack(7, 7, TIME_STEP_MAX));
    }

    #[test]
    fn comparator_is_asymmetric_away_from_antipode() {
        for a in (0..=u16::MAX).step_by(97) {
            for offset in [1u16, 2, 5, 100, 1000, 32_767, 32_769, 40_000, 65_535] {
                let b = a.wrapping_add(offset);
                assert_ne!(
                    more_recent_ack(a, b, TIME_STEP_MAX),
                    more_recent_ack(b, a, TIME_STEP_MAX),
                    "a={a} b={b}"
                );
            }
        }
    }

    #[test]
    fn clock_wraps() {
        let mut clock = SequenceClock::new(u16::MAX);
        assert_eq!(clock.advance(), 0);
        assert_eq!(clock.advance(), 1);
    }

    #[test]
    fn delta_crosses_wrap() {
        assert_eq!(time_step_delta(65_530, 4), 10);
        assert_eq!(time_step_delta(4, 65_530), -10);
    }
}
