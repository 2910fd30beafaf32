use serde::Serialize;
use tracing::{debug, warn};

use super::FrameFeatures;
use crate::{config::AnalysisConfig, BeatMapError, Result};

/// Autocorrelation peaks weaker than this fraction of the zero-lag energy are
/// treated as "no pulse".
const PULSE_THRESHOLD: f64 = 0.1;
const ONSET_SMOOTHING_SIGMA: f64 = 1.0;

/// Global tempo plus the timestamps of every detected beat.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BeatGrid {
    bpm: f64,
    beat_times: Vec<f64>,
}

impl BeatGrid {
    /// Validates and wraps a tempo and strictly increasing beat times.
    pub fn new(bpm: f64, beat_times: Vec<f64>) -> Result<Self> {
        if !(bpm.is_finite() && bpm > 0.0) {
            return Err(BeatMapError::InvalidInput("bpm must be positive"));
        }
        if beat_times.is_empty() {
            return Err(BeatMapError::InvalidInput("beat grid needs at least one beat"));
        }
        if beat_times.windows(2).any(|pair| pair[1] <= pair[0]) {
            return Err(BeatMapError::InvalidInput(
                "beat times must be strictly increasing",
            ));
        }

        Ok(Self { bpm, beat_times })
    }

    /// Evenly spaced beats from `t = 0` up to (not including) `duration`.
    pub fn uniform(bpm: f64, duration: f64) -> Result<Self> {
        if !(bpm.is_finite() && bpm > 0.0) {
            return Err(BeatMapError::InvalidInput("bpm must be positive"));
        }
        let period = 60.0 / bpm;
        let count = ((duration / period).ceil() as usize).max(1);
        Self::new(bpm, (0..count).map(|i| i as f64 * period).collect())
    }

    pub fn bpm(&self) -> f64 {
        self.bpm
    }

    pub fn beat_times(&self) -> &[f64] {
        &self.beat_times
    }

    pub fn len(&self) -> usize {
        self.beat_times.len()
    }

    pub fn is_empty(&self) -> bool {
        self.beat_times.is_empty()
    }

    pub fn seconds_to_beats(&self, seconds: f64) -> f64 {
        seconds * self.bpm / 60.0
    }

    /// Every beat time expressed in beats at the global tempo.
    pub fn beat_positions(&self) -> Vec<f64> {
        self.beat_times
            .iter()
            .map(|t| self.seconds_to_beats(*t))
            .collect()
    }

    /// Maps a fractional beat index to a time in beats, interpolating between
    /// detected beats and extrapolating past either end with the nearest
    /// inter-beat interval.
    pub fn position_to_beats(&self, position: f64) -> f64 {
        let times = &self.beat_times;
        let n = times.len();
        let seconds = if n == 1 {
            times[0] + position * 60.0 / self.bpm
        } else if position <= 0.0 {
            times[0] + position * (times[1] - times[0])
        } else if position >= (n - 1) as f64 {
            let last = n - 1;
            times[last] + (position - last as f64) * (times[last] - times[last - 1])
        } else {
            let index = position.floor() as usize;
            let frac = position - index as f64;
            times[index] + frac * (times[index + 1] - times[index])
        };

        self.seconds_to_beats(seconds)
    }

    /// Two seconds of lead-in expressed in beats.
    pub fn lead_in_beats(&self) -> f64 {
        crate::validate::lead_in_beats(self.bpm)
    }
}

/// Spectral-flux onset envelope: mean positive dB increase per frame.
pub fn onset_strength(mel_db: &[Vec<f64>]) -> Vec<f64> {
    let mut onset = Vec::with_capacity(mel_db.len());
    if mel_db.is_empty() {
        return onset;
    }

    onset.push(0.0);
    for pair in mel_db.windows(2) {
        let (prev, cur) = (&pair[0], &pair[1]);
        let flux: f64 = cur
            .iter()
            .zip(prev)
            .map(|(c, p)| (c - p).max(0.0))
            .sum();
        onset.push(flux / cur.len().max(1) as f64);
    }
    onset
}

/// Tempo estimator and dynamic-programming beat tracker.
#[derive(Debug, Clone)]
pub struct BeatTracker {
    config: AnalysisConfig,
}

impl BeatTracker {
    pub fn new(config: &AnalysisConfig) -> Self {
        Self {
            config: config.clone(),
        }
    }

    /// Tracks beats across the whole track. Edge beats are never trimmed.
    ///
    /// A track without a measurable pulse yields a uniform grid at the
    /// configured fallback tempo.
    pub fn track(&self, features: &FrameFeatures) -> Result<BeatGrid> {
        let frame_rate = features.frame_rate();
        let onset = &features.onset;

        let Some(bpm) = self.estimate_tempo(onset, frame_rate) else {
            warn!(
                fallback_bpm = self.config.fallback_bpm,
                "no rhythmic pulse detected, using a uniform beat grid"
            );
            return BeatGrid::uniform(self.config.fallback_bpm, features.duration);
        };

        let frames = self.dp_beats(onset, frame_rate, bpm);
        if frames.len() < 2 {
            warn!(bpm, "beat tracker found fewer than two beats, using a uniform grid");
            return BeatGrid::uniform(bpm, features.duration);
        }

        let times = frames
            .iter()
            .map(|frame| features.frame_time(*frame))
            .collect();
        debug!(bpm, beats = frames.len(), "tracked beats");
        BeatGrid::new(bpm, times)
    }

    /// Global tempo from the prior-weighted onset autocorrelation.
    pub fn estimate_tempo(&self, onset: &[f64], frame_rate: f64) -> Option<f64> {
        let smoothed = gaussian_smooth(onset, ONSET_SMOOTHING_SIGMA);
        let min_lag = ((60.0 * frame_rate / self.config.max_bpm).floor() as usize).max(1);
        let max_lag = (60.0 * frame_rate / self.config.min_bpm).ceil() as usize;
        if smoothed.len() <= min_lag + 1 {
            return None;
        }
        let max_lag = max_lag.min(smoothed.len() - 1);

        let energy: f64 = smoothed.iter().map(|v| v * v).sum();
        if energy <= f64::EPSILON {
            return None;
        }

        let autocorr = |lag: usize| -> f64 {
            smoothed
                .iter()
                .zip(&smoothed[lag..])
                .map(|(a, b)| a * b)
                .sum()
        };

        let scores: Vec<(usize, f64, f64)> = (min_lag..=max_lag)
            .map(|lag| {
                let ac = autocorr(lag);
                let bpm = 60.0 * frame_rate / lag as f64;
                let octaves = (bpm / self.config.prior_bpm).log2();
                (lag, ac, ac * (-0.5 * octaves * octaves).exp())
            })
            .collect();

        let best = scores
            .iter()
            .enumerate()
            .max_by(|a, b| a.1 .2.total_cmp(&b.1 .2))
            .map(|(index, _)| index)?;
        let (lag, ac, _) = scores[best];
        if ac / energy < PULSE_THRESHOLD {
            return None;
        }

        let mut refined = lag as f64;
        if best > 0 && best + 1 < scores.len() {
            let (left, mid, right) = (scores[best - 1].2, scores[best].2, scores[best + 1].2);
            let denom = left - 2.0 * mid + right;
            if denom < 0.0 {
                refined += (0.5 * (left - right) / denom).clamp(-0.5, 0.5);
            }
        }

        Some(60.0 * frame_rate / refined)
    }

    /// Ellis-style dynamic programming over the onset envelope.
    fn dp_beats(&self, onset: &[f64], frame_rate: f64, bpm: f64) -> Vec<usize> {
        let n = onset.len();
        let period = 60.0 * frame_rate / bpm;

        let std = std_dev(onset);
        if std <= f64::EPSILON || n == 0 {
            return Vec::new();
        }
        let normalized: Vec<f64> = onset.iter().map(|v| v / std).collect();

        let radius = period.round() as isize;
        let kernel: Vec<f64> = (-radius..=radius)
            .map(|k| (-0.5 * (k as f64 * 32.0 / period).powi(2)).exp())
            .collect();
        let local = convolve_same(&normalized, &kernel);

        let min_lag = ((period / 2.0).round() as usize).max(1);
        let max_lag = ((2.0 * period).round() as usize).max(min_lag);
        let mut cumscore = vec![0.0f64; n];
        let mut backlink: Vec<Option<usize>> = vec![None; n];

        for t in 0..n {
            let mut best: Option<(usize, f64)> = None;
            for lag in min_lag..=max_lag {
                if lag > t {
                    break;
                }
                let prev = t - lag;
                let penalty = (lag as f64 / period).ln().powi(2);
                let score = cumscore[prev] - self.config.tightness * penalty;
                if best.map(|(_, s)| score > s).unwrap_or(true) {
                    best = Some((prev, score));
                }
            }
            match best {
                Some((prev, score)) if score > 0.0 => {
                    cumscore[t] = local[t] + score;
                    backlink[t] = Some(prev);
                }
                _ => cumscore[t] = local[t],
            }
        }

        let Some(last) = last_beat(&cumscore) else {
            return Vec::new();
        };

        let mut beats = vec![last];
        let mut cursor = last;
        while let Some(prev) = backlink[cursor] {
            beats.push(prev);
            cursor = prev;
        }
        beats.reverse();
        beats
    }
}

/// Last local maximum of the cumulative score that clears half the median
/// of all local maxima.
fn last_beat(cumscore: &[f64]) -> Option<usize> {
    let n = cumscore.len();
    let maxima: Vec<usize> = (0..n)
        .filter(|&t| {
            let left = t == 0 || cumscore[t] > cumscore[t - 1];
            let right = t + 1 == n || cumscore[t] >= cumscore[t + 1];
            left && right
        })
        .collect();
    if maxima.is_empty() {
        return None;
    }

    let mut values: Vec<f64> = maxima.iter().map(|&t| cumscore[t]).collect();
    values.sort_by(f64::total_cmp);
    let threshold = 0.5 * values[values.len() / 2];

    maxima.into_iter().rev().find(|&t| cumscore[t] >= threshold)
}

fn std_dev(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let mean = values.iter().sum::<f64>() / values.len() as f64;
    let var = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (values.len() - 1) as f64;
    var.sqrt()
}

fn gaussian_smooth(values: &[f64], sigma: f64) -> Vec<f64> {
    let radius = (3.0 * sigma).ceil() as isize;
    let kernel: Vec<f64> = (-radius..=radius)
        .map(|k| (-0.5 * (k as f64 / sigma).powi(2)).exp())
        .collect();
    convolve_same(values, &kernel)
}

fn convolve_same(values: &[f64], kernel: &[f64]) -> Vec<f64> {
    let n = values.len() as isize;
    let half = (kernel.len() / 2) as isize;
    (0..n)
        .map(|t| {
            kernel
                .iter()
                .enumerate()
                .filter_map(|(k, w)| {
                    let index = t + k as isize - half;
                    (0..n).contains(&index).then(|| w * values[index as usize])
                })
                .sum()
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{analysis::FeatureExtractor, AudioTrack};

    fn click_track(bpm: f64, seconds: f64, sample_rate: u32) -> AudioTrack {
        let len = (seconds * sample_rate as f64) as usize;
        let period = (60.0 / bpm * sample_rate as f64) as usize;
        let click_len = (0.02 * sample_rate as f64) as usize;
        let mut samples = vec![0.0f32; len];
        for start in (0..len).step_by(period) {
            for i in 0..click_len.min(len - start) {
                let decay = (-(i as f32) / (click_len as f32 / 5.0)).exp();
                let phase = 2.0 * std::f32::consts::PI * 1_000.0 * i as f32 / sample_rate as f32;
                samples[start + i] = 0.8 * decay * phase.sin();
            }
        }
        AudioTrack::new(samples, sample_rate).unwrap()
    }

    #[test]
    fn rejects_non_monotonic_grids() {
        assert!(BeatGrid::new(120.0, vec![0.0, 0.5, 0.5]).is_err());
        assert!(BeatGrid::new(0.0, vec![0.0]).is_err());
        assert!(BeatGrid::new(120.0, vec![0.1, 0.6]).is_ok());
    }

    #[test]
    fn interpolates_fractional_positions() {
        let grid = BeatGrid::new(120.0, vec![1.0, 1.5, 2.0]).unwrap();

        assert!((grid.position_to_beats(0.0) - 2.0).abs() < 1e-9);
        assert!((grid.position_to_beats(0.5) - 2.5).abs() < 1e-9);
        assert!((grid.position_to_beats(3.0) - 5.0).abs() < 1e-9);
        assert!((grid.lead_in_beats() - 4.0).abs() < 1e-9);
    }

    #[test]
    fn uniform_grid_starts_at_zero() {
        let grid = BeatGrid::uniform(120.0, 2.0).unwrap();
        assert_eq!(grid.beat_times(), &[0.0, 0.5, 1.0, 1.5]);
    }

    #[test]
    fn onset_is_zero_for_static_frames() {
        let frames = vec![vec![-20.0; 4]; 5];
        assert!(onset_strength(&frames).iter().all(|v| *v == 0.0));
    }

    #[test]
    fn finds_tempo_of_click_track() {
        let config = AnalysisConfig::default();
        let track = click_track(120.0, 20.0, 22_050);
        let features = FeatureExtractor::new(&config)
            .unwrap()
            .extract(&track)
            .unwrap();
        let grid = BeatTracker::new(&config).track(&features).unwrap();

        assert!((grid.bpm() - 120.0).abs() < 6.0, "bpm {}", grid.bpm());
        assert!(grid.len() > 30);
        let last = grid.beat_times().last().copied().unwrap();
        assert!(last > 18.0, "edge beats should be kept, last beat at {last}");
    }

    #[test]
    fn silence_falls_back_to_uniform_grid() {
        let config = AnalysisConfig::default();
        let track = AudioTrack::new(vec![0.0; 22_050 * 4], 22_050).unwrap();
        let features = FeatureExtractor::new(&config)
            .unwrap()
            .extract(&track)
            .unwrap();
        let grid = BeatTracker::new(&config).track(&features).unwrap();

        assert_eq!(grid.bpm(), config.fallback_bpm);
        assert_eq!(grid.beat_times()[0], 0.0);
        assert_eq!(grid.len(), 8);
    }
}
