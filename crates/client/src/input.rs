use std::str::FromStr;

use anyhow::{Context, Result, anyhow, bail};

use ae::ActionState;

/// A timed sequence of held actions, written as `keys:seconds` segments
/// separated by commas, e.g. `right:1.5,up+left:0.5,idle:1`.
#[derive(Debug, Clone, PartialEq)]
pub struct InputScript {
    segments: Vec<(ActionState, f32)>,
}

impl InputScript {
    pub fn idle() -> Self {
        Self {
            segments: Vec::new(),
        }
    }

    pub fn duration(&self) -> f32 {
        self.segments.iter().map(|(_, seconds)| seconds).sum()
    }

    /// Actions held `elapsed` seconds into the script, or `None` once it
    /// has run out.
    pub fn actions_at(&self, elapsed: f32) -> Option<ActionState> {
        let mut end = 0.0;
        for (actions, seconds) in &self.segments {
            end += seconds;
            if elapsed < end {
                return Some(*actions);
            }
        }
        None
    }
}

fn parse_action(name: &str) -> Result<ActionState> {
    Ok(match name.trim().to_ascii_lowercase().as_str() {
        "up" | "w" => ActionState::UP,
        "down" | "s" => ActionState::DOWN,
        "left" | "a" => ActionState::LEFT,
        "right" | "d" => ActionState::RIGHT,
        "fire" => ActionState::FIRE,
        "use" => ActionState::USE,
        "idle" | "" => ActionState::empty(),
        other => bail!("unknown action '{}'", other),
    })
}

impl FromStr for InputScript {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        let mut segments = Vec::new();

        for segment in s.split(',').map(str::trim).filter(|seg| !seg.is_empty()) {
            let (keys, seconds) = segment
                .rsplit_once(':')
                .ok_or_else(|| anyhow!("segment '{}' is missing ':seconds'", segment))?;

            let seconds: f32 = seconds
                .trim()
                .parse()
                .with_context(|| format!("bad duration in '{}'", segment))?;
            if !(seconds > 0.0) {
                bail!("duration in '{}' must be positive", segment);
            }

            let mut actions = ActionState::empty();
            for key in keys.split('+') {
                actions |= parse_action(key)?;
            }
            segments.push((actions, seconds));
        }

        Ok(Self { segments })
    }
}
