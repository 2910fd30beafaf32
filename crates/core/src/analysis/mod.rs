//! Spectral features and beat tracking.

pub mod beat;
pub mod spectrum;

use serde::Serialize;
use tracing::debug;

pub use beat::{onset_strength, BeatGrid, BeatTracker};
pub use spectrum::{Dct, LogFrequencyBank, MelFilterBank, SpectralAnalyzer, Spectrogram};

use crate::{config::AnalysisConfig, AudioTrack, BeatMapError, Result};

/// Frame-level features for a whole track. Every matrix is `[frame][dim]`.
#[derive(Debug, Clone)]
pub struct FrameFeatures {
    pub sample_rate: u32,
    pub hop_length: usize,
    /// Track duration in seconds.
    pub duration: f64,
    pub mel_db: Vec<Vec<f64>>,
    /// Semitone-spaced spectrum in dB, used as the pitch/chroma view.
    pub pitch_db: Vec<Vec<f64>>,
    pub mfcc: Vec<Vec<f64>>,
    /// Mean magnitude in dB across all bins, relative to the loudest cell.
    pub loudness_db: Vec<f64>,
    pub onset: Vec<f64>,
}

impl FrameFeatures {
    pub fn n_frames(&self) -> usize {
        self.onset.len()
    }

    pub fn frame_rate(&self) -> f64 {
        self.sample_rate as f64 / self.hop_length as f64
    }

    pub fn frame_time(&self, frame: usize) -> f64 {
        frame as f64 / self.frame_rate()
    }

    pub fn time_to_frame(&self, seconds: f64) -> usize {
        let frame = (seconds * self.frame_rate()).round().max(0.0) as usize;
        frame.min(self.n_frames().saturating_sub(1))
    }
}

/// Computes [`FrameFeatures`] from decoded audio.
#[derive(Debug)]
pub struct FeatureExtractor {
    config: AnalysisConfig,
    analyzer: SpectralAnalyzer,
}

impl FeatureExtractor {
    pub fn new(config: &AnalysisConfig) -> Result<Self> {
        if config.n_mels == 0 || config.target_sample_rate == 0 {
            return Err(BeatMapError::InvalidInput(
                "feature extraction needs mel bands and a sample rate",
            ));
        }

        Ok(Self {
            config: config.clone(),
            analyzer: SpectralAnalyzer::new(config.n_fft, config.hop_length)?,
        })
    }

    pub fn extract(&mut self, track: &AudioTrack) -> Result<FrameFeatures> {
        let track = track.resampled(self.config.target_sample_rate)?;
        let sample_rate = track.sample_rate();
        let spectrogram = self
            .analyzer
            .power_spectrogram(track.samples(), sample_rate)?;

        let mel_bank = MelFilterBank::new(sample_rate, self.config.n_fft, self.config.n_mels);
        let pitch_bank = LogFrequencyBank::new(sample_rate, self.config.n_fft);
        let dct = Dct::new(self.config.n_mels, self.config.n_mfcc);

        let mel_power: Vec<Vec<f64>> = spectrogram
            .frames
            .iter()
            .map(|frame| mel_bank.apply(frame))
            .collect();
        let pitch_power: Vec<Vec<f64>> = spectrogram
            .frames
            .iter()
            .map(|frame| pitch_bank.apply(frame))
            .collect();
        let magnitudes: Vec<Vec<f64>> = spectrogram
            .frames
            .iter()
            .map(|frame| frame.iter().map(|p| (*p as f64).sqrt()).collect())
            .collect();

        let mel_db = spectrum::power_to_db(&mel_power);
        let pitch_db = spectrum::power_to_db(&pitch_power);
        let mfcc = mel_db.iter().map(|row| dct.apply(row)).collect();
        let loudness_db = spectrum::amplitude_to_db(&magnitudes)
            .iter()
            .map(|row| mean(row))
            .collect();
        let onset = onset_strength(&mel_db);

        debug!(
            frames = spectrogram.n_frames(),
            sample_rate,
            "extracted frame features"
        );

        Ok(FrameFeatures {
            sample_rate,
            hop_length: self.config.hop_length,
            duration: track.duration_seconds(),
            mel_db,
            pitch_db,
            mfcc,
            loudness_db,
            onset,
        })
    }
}

/// How frames inside one beat are collapsed into a single row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Aggregate {
    Mean,
    Median,
}

/// Collapses frame rows into one row per beat.
///
/// Beat `i` owns frames `[beat_frames[i], beat_frames[i + 1])`; the last beat
/// runs to the end of the track. A beat whose interval is empty falls back to
/// its starting frame.
pub fn sync_to_beats(rows: &[Vec<f64>], beat_frames: &[usize], aggregate: Aggregate) -> Vec<Vec<f64>> {
    let n = rows.len();
    if n == 0 {
        return Vec::new();
    }
    let width = rows[0].len();

    beat_frames
        .iter()
        .enumerate()
        .map(|(i, &start)| {
            let start = start.min(n - 1);
            let end = beat_frames
                .get(i + 1)
                .copied()
                .unwrap_or(n)
                .clamp(start + 1, n);
            let slice = &rows[start..end];
            (0..width)
                .map(|dim| {
                    let mut column: Vec<f64> = slice.iter().map(|row| row[dim]).collect();
                    match aggregate {
                        Aggregate::Mean => mean(&column),
                        Aggregate::Median => median(&mut column),
                    }
                })
                .collect()
        })
        .collect()
}

/// Beat-synchronous views of the frame features.
#[derive(Debug, Clone, Serialize)]
pub struct BeatFeatures {
    pub beat_frames: Vec<usize>,
    /// Median-aggregated pitch spectrum per beat.
    pub chroma: Vec<Vec<f64>>,
    /// Mean MFCCs per beat.
    pub timbre: Vec<Vec<f64>>,
    /// Mean mel dB per beat.
    pub mel: Vec<Vec<f64>>,
    /// Mean loudness per beat.
    pub loudness_db: Vec<f64>,
}

impl BeatFeatures {
    pub fn from_frames(features: &FrameFeatures, grid: &BeatGrid) -> Self {
        let beat_frames: Vec<usize> = grid
            .beat_times()
            .iter()
            .map(|t| features.time_to_frame(*t))
            .collect();
        let loudness: Vec<Vec<f64>> = features.loudness_db.iter().map(|v| vec![*v]).collect();

        Self {
            chroma: sync_to_beats(&features.pitch_db, &beat_frames, Aggregate::Median),
            timbre: sync_to_beats(&features.mfcc, &beat_frames, Aggregate::Mean),
            mel: sync_to_beats(&features.mel_db, &beat_frames, Aggregate::Mean),
            loudness_db: sync_to_beats(&loudness, &beat_frames, Aggregate::Mean)
                .into_iter()
                .map(|row| row[0])
                .collect(),
            beat_frames,
        }
    }

    pub fn n_beats(&self) -> usize {
        self.beat_frames.len()
    }
}

pub(crate) fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        0.0
    } else {
        values.iter().sum::<f64>() / values.len() as f64
    }
}

/// Median with the upper-middle element for even lengths averaged in.
pub(crate) fn median(values: &mut [f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.sort_by(f64::total_cmp);
    let mid = values.len() / 2;
    if values.len() % 2 == 0 {
        0.5 * (values[mid - 1] + values[mid])
    } else {
        values[mid]
    }
}
