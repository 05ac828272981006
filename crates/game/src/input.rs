use bitflags::bitflags;

use crate::net::{PacketError, PacketReader, PacketWriter};
use crate::sequence::TimeStep;

/// Longest run a single encoded byte can describe.
pub const MAX_RUN_LENGTH: u8 = 16;

bitflags! {
    /// Actions held during one tick.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ActionState: u8 {
        const UP = 1 << 0;
        const DOWN = 1 << 1;
        const LEFT = 1 << 2;
        const RIGHT = 1 << 3;
        const FIRE = 1 << 4;
        const USE = 1 << 5;
    }
}

impl ActionState {
    pub const MOVEMENT: Self = Self::UP
        .union(Self::DOWN)
        .union(Self::LEFT)
        .union(Self::RIGHT);

    /// Bits carried by the run-length encoding. A run byte has one nibble
    /// for state, so at most 16 distinct states go over the wire.
    pub const NETWORK_MASK: u8 = 0x0F;

    pub fn network_bits(self) -> u8 {
        self.bits() & Self::NETWORK_MASK
    }
}

impl Default for ActionState {
    fn default() -> Self {
        Self::empty()
    }
}

/// Actions held during tick `time`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InputRecord {
    pub time: TimeStep,
    pub action_state: ActionState,
}

impl InputRecord {
    pub fn new(time: TimeStep, action_state: ActionState) -> Self {
        Self { time, action_state }
    }
}

/// Writes consecutive action states as `((count - 1) << 4) | state` bytes.
///
/// A new byte starts when the state changes or the run reaches
/// [`MAX_RUN_LENGTH`]. Returns the number of bytes written.
pub fn write_runs<I>(states: I, writer: &mut PacketWriter) -> usize
where
    I: IntoIterator<Item = ActionState>,
{
    let mut written = 0;
    let mut run: Option<(u8, u8)> = None;

    for state in states {
        let bits = state.network_bits();
        run = match run {
            Some((current, count)) if current == bits && count < MAX_RUN_LENGTH => {
                Some((current, count + 1))
            }
            Some((current, count)) => {
                writer.write_u8(run_byte(current, count));
                written += 1;
                Some((bits, 1))
            }
            None => Some((bits, 1)),
        };
    }

    if let Some((current, count)) = run {
        writer.write_u8(run_byte(current, count));
        written += 1;
    }

    written
}

/// Expands run bytes until the reader is exhausted, stamping one record per
/// tick starting at `base_time`.
pub fn read_runs(
    base_time: TimeStep,
    reader: &mut PacketReader<'_>,
) -> Result<Vec<InputRecord>, PacketError> {
    let mut records = Vec::new();
    let mut time = base_time;

    while !reader.is_empty() {
        let byte = reader.read_u8()?;
        let count = (byte >> 4) + 1;
        let state = ActionState::from_bits_truncate(byte & ActionState::NETWORK_MASK);

        for _ in 0..count {
            records.push(InputRecord::new(time, state));
            time = time.wrapping_add(1);
        }
    }

    Ok(records)
}

#[inline]
fn run_byte(state: u8, count: u8) -> u8 {
    ((count - 1) << 4) | state
}
