//! Loudness-driven note density.
//!
//! Each beat gets a rate, the number of evenly spaced note slots inside it,
//! drawn from a per-difficulty table indexed by how loud the surrounding
//! beats are.

use rand::{
    distributions::{Distribution, WeightedIndex},
    Rng,
};
use tracing::debug;

use crate::config::Difficulty;

/// Allowed slot counts per beat.
pub const RATES: [u32; 6] = [0, 1, 2, 4, 8, 16];

/// Draws per beat before falling back to the closest permitted rate.
const MAX_REDRAWS: usize = 100;

type RateTable = [[f64; 6]; 5];

const EASY: RateTable = [
    [0.3, 0.6, 0.1, 0.0, 0.0, 0.0],
    [0.4, 0.5, 0.1, 0.0, 0.0, 0.0],
    [0.8, 0.2, 0.0, 0.0, 0.0, 0.0],
    [0.9, 0.1, 0.0, 0.0, 0.0, 0.0],
    [0.95, 0.05, 0.0, 0.0, 0.0, 0.0],
];

const NORMAL: RateTable = [
    [0.05, 0.7, 0.25, 0.0, 0.0, 0.0],
    [0.2, 0.7, 0.1, 0.0, 0.0, 0.0],
    [0.3, 0.7, 0.0, 0.0, 0.0, 0.0],
    [0.5, 0.5, 0.0, 0.0, 0.0, 0.0],
    [0.95, 0.05, 0.0, 0.0, 0.0, 0.0],
];

const HARD: RateTable = [
    [0.05, 0.35, 0.6, 0.0, 0.0, 0.0],
    [0.1, 0.5, 0.4, 0.0, 0.0, 0.0],
    [0.2, 0.6, 0.2, 0.0, 0.0, 0.0],
    [0.5, 0.5, 0.0, 0.0, 0.0, 0.0],
    [0.95, 0.05, 0.0, 0.0, 0.0, 0.0],
];

const EXPERT: RateTable = [
    [0.8, 0.2, 0.0, 0.0, 0.0, 0.0],
    [0.2, 0.7, 0.1, 0.0, 0.0, 0.0],
    [0.1, 0.4, 0.3, 0.2, 0.0, 0.0],
    [0.0, 0.05, 0.6, 0.35, 0.0, 0.0],
    [0.0, 0.0, 0.35, 0.65, 0.0, 0.0],
];

const EXPERT_PLUS: RateTable = [
    [0.0, 0.0, 0.0, 0.5, 0.3, 0.2],
    [0.0, 0.05, 0.1, 0.6, 0.25, 0.0],
    [0.0, 0.1, 0.6, 0.3, 0.0, 0.0],
    [0.0, 0.3, 0.6, 0.1, 0.0, 0.0],
    [0.0, 0.5, 0.4, 0.1, 0.0, 0.0],
];

/// Maps a beat's dB level (relative to the loudest point, so `<= 0`) to a
/// table row. Row 0 is the loudest material.
pub fn loudness_bucket(db: f64) -> usize {
    let level = db.abs();
    if level > 70.0 {
        4
    } else if level > 55.0 {
        3
    } else if level > 45.0 {
        2
    } else if level > 35.0 {
        1
    } else {
        0
    }
}

pub fn rate_probabilities(difficulty: Difficulty, bucket: usize) -> &'static [f64; 6] {
    let table = match difficulty {
        Difficulty::Easy => &EASY,
        Difficulty::Normal => &NORMAL,
        Difficulty::Hard => &HARD,
        Difficulty::Expert => &EXPERT,
        Difficulty::ExpertPlus => &EXPERT_PLUS,
    };
    &table[bucket.min(4)]
}

/// Largest allowed rate change between consecutive beats.
pub fn max_rate_step(difficulty: Difficulty) -> u32 {
    match difficulty {
        Difficulty::Expert => 4,
        Difficulty::ExpertPlus => 8,
        _ => 2,
    }
}

fn sample<R: Rng + ?Sized>(probabilities: &[f64; 6], rng: &mut R) -> u32 {
    match WeightedIndex::new(probabilities) {
        Ok(dist) => RATES[dist.sample(rng)],
        // An all-zero row places no notes.
        Err(_) => 0,
    }
}

#[derive(Debug, Clone, Copy)]
pub struct RateModulator {
    difficulty: Difficulty,
}

impl RateModulator {
    pub fn new(difficulty: Difficulty) -> Self {
        Self { difficulty }
    }

    pub fn choose_rate<R: Rng + ?Sized>(&self, db: f64, rng: &mut R) -> u32 {
        sample(rate_probabilities(self.difficulty, loudness_bucket(db)), rng)
    }

    /// One rate per beat except the last. The first beat is always empty.
    pub fn select_rates<R: Rng + ?Sized>(&self, loudness_db: &[f64], rng: &mut R) -> Vec<u32> {
        let n = loudness_db.len();
        if n < 2 {
            return Vec::new();
        }
        let cap = max_rate_step(self.difficulty);

        let mut rates = vec![0u32];
        for beat in 1..n - 1 {
            let window = (loudness_db[beat - 1] + loudness_db[beat] + loudness_db[beat + 1]) / 3.0;
            let prev = rates[beat - 1];

            let mut rate = self.choose_rate(window, rng);
            let mut draws = 1;
            while rate.abs_diff(prev) > cap && draws < MAX_REDRAWS {
                rate = self.choose_rate(window, rng);
                draws += 1;
            }
            if rate.abs_diff(prev) > cap {
                rate = self.closest_permitted(window, prev);
                debug!(beat, prev, rate, "rate redraw budget exhausted");
            }
            if rate == 4 && prev == 4 {
                rate = [0, 1, 2][rng.gen_range(0..3)];
            }
            rates.push(rate);
        }
        rates
    }

    /// Fractional beat positions that receive a note.
    pub fn modulate<R: Rng + ?Sized>(&self, loudness_db: &[f64], rng: &mut R) -> Vec<f64> {
        expand_rates(&self.select_rates(loudness_db, rng))
    }

    fn closest_permitted(&self, db: f64, prev: u32) -> u32 {
        RATES
            .iter()
            .zip(rate_probabilities(self.difficulty, loudness_bucket(db)))
            .filter(|(_, p)| **p > 0.0)
            .map(|(rate, _)| *rate)
            .min_by_key(|rate| rate.abs_diff(prev))
            .unwrap_or(0)
    }
}

/// Expands per-beat rates into sorted, duplicate-free positions inside
/// `[beat, beat + 1)`.
pub fn expand_rates(rates: &[u32]) -> Vec<f64> {
    let mut positions: Vec<f64> = rates
        .iter()
        .enumerate()
        .flat_map(|(beat, &rate)| {
            (0..rate).map(move |slot| beat as f64 + slot as f64 / rate as f64)
        })
        .collect();
    positions.sort_by(f64::total_cmp);
    positions.dedup();
    positions
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rng::create_rng;

    #[test]
    fn buckets_follow_absolute_level() {
        assert_eq!(loudness_bucket(-10.0), 0);
        assert_eq!(loudness_bucket(-40.0), 1);
        assert_eq!(loudness_bucket(-50.0), 2);
        assert_eq!(loudness_bucket(-60.0), 3);
        assert_eq!(loudness_bucket(-75.0), 4);
    }

    #[test]
    fn tables_are_distributions() {
        for difficulty in Difficulty::ALL {
            for bucket in 0..5 {
                let sum: f64 = rate_probabilities(difficulty, bucket).iter().sum();
                assert!((sum - 1.0).abs() < 1e-9, "{difficulty} row {bucket}");
            }
        }
    }

    #[test]
    fn zero_weight_rates_are_never_drawn() {
        let mut rng = create_rng(12);
        let only_two = [0.0, 0.0, 1.0, 0.0, 0.0, 0.0];
        assert!((0..100).all(|_| sample(&only_two, &mut rng) == 2));
        assert_eq!(sample(&[0.0; 6], &mut rng), 0);
    }

    #[test]
    fn expansion_stays_inside_owning_beat() {
        let positions = expand_rates(&[0, 1, 4, 0, 2]);
        assert_eq!(positions, vec![1.0, 2.0, 2.25, 2.5, 2.75, 4.0, 4.5]);
    }

    #[test]
    fn consecutive_rates_respect_step_cap() {
        let mut rng = create_rng(99);
        let loudness: Vec<f64> = (0..400).map(|i| -((i * 37) % 80) as f64).collect();
        let modulator = RateModulator::new(Difficulty::Expert);
        let rates = modulator.select_rates(&loudness, &mut rng);

        assert_eq!(rates.len(), loudness.len() - 1);
        assert_eq!(rates[0], 0);
        for pair in rates.windows(2) {
            assert!(pair[1].abs_diff(pair[0]) <= 4, "{pair:?}");
            assert!(!(pair[0] == 4 && pair[1] == 4));
        }
    }

    #[test]
    fn modulated_positions_sorted_and_unique() {
        let mut rng = create_rng(5);
        let loudness = vec![-20.0; 64];
        let positions = RateModulator::new(Difficulty::ExpertPlus).modulate(&loudness, &mut rng);

        assert!(!positions.is_empty());
        assert!(positions.windows(2).all(|w| w[0] < w[1]));
        assert!(positions.iter().all(|p| *p >= 1.0 && *p < 63.0));
    }
}
