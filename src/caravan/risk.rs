//! Ambush risk model and the injectable random source behind every roll.

use std::collections::VecDeque;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Chance that an in-transit caravan is ambushed during one tick.
///
/// `danger_rating * base_rate - escort_bonus / 100`, clamped to `[0, 1]`.
pub fn ambush_chance(danger_rating: u8, base_rate_per_danger: f64, escort_bonus_percent: u32) -> f64 {
    let raw = danger_rating as f64 * base_rate_per_danger - escort_bonus_percent as f64 / 100.0;
    raw.clamp(0.0, 1.0)
}

/// Source of uniform rolls in `[0, 1)`.
pub trait RollSource: Send {
    fn roll(&mut self) -> f64;
}

/// Production source; seeded from the OS unless a seed is given.
pub struct RandomRolls {
    rng: StdRng,
}

impl RandomRolls {
    pub fn from_entropy() -> Self {
        Self {
            rng: StdRng::from_entropy(),
        }
    }

    pub fn seeded(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
        }
    }
}

impl RollSource for RandomRolls {
    fn roll(&mut self) -> f64 {
        self.rng.gen::<f64>()
    }
}

/// Replays a fixed list of rolls, then repeats `fallback`.
pub struct ScriptedRolls {
    queue: VecDeque<f64>,
    fallback: f64,
}

impl ScriptedRolls {
    pub fn new(rolls: impl IntoIterator<Item = f64>) -> Self {
        Self {
            queue: rolls.into_iter().collect(),
            fallback: 0.999,
        }
    }

    /// Every roll returns `value`.
    pub fn always(value: f64) -> Self {
        Self {
            queue: VecDeque::new(),
            fallback: value,
        }
    }
}

impl RollSource for ScriptedRolls {
    fn roll(&mut self) -> f64 {
        self.queue.pop_front().unwrap_or(self.fallback)
    }
}
