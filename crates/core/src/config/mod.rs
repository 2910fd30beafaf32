use std::{fmt, path::Path, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::{BeatMapError, Result};

/// Top-level configuration structure for the generator.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SynthConfig {
    pub analysis: AnalysisConfig,
    pub segmentation: SegmentationConfig,
    pub walk: WalkConfig,
    pub lighting: LightingConfig,
}

impl SynthConfig {
    /// Reads a JSON configuration file. Missing keys keep their defaults.
    pub fn load(path: &Path) -> Result<Self> {
        let data = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&data)?)
    }
}

/// Configuration for the spectral front-end and beat tracker.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    pub target_sample_rate: u32,
    pub n_fft: usize,
    pub hop_length: usize,
    pub n_mels: usize,
    pub n_mfcc: usize,
    pub min_bpm: f64,
    pub max_bpm: f64,
    /// Centre of the log-normal tempo prior.
    pub prior_bpm: f64,
    /// Tempo used for the uniform grid when the track has no detectable pulse.
    pub fallback_bpm: f64,
    /// DP beat tracker penalty for deviating from the global tempo.
    pub tightness: f64,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            target_sample_rate: 22_050,
            n_fft: 2048,
            hop_length: 512,
            n_mels: 128,
            n_mfcc: 20,
            min_bpm: 30.0,
            max_bpm: 300.0,
            prior_bpm: 120.0,
            fallback_bpm: 120.0,
            tightness: 100.0,
        }
    }
}

/// Configuration for the Laplacian segmenter.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SegmentationConfig {
    /// Fixed segment count. `None` estimates it from the track.
    pub k: Option<usize>,
    pub recurrence_width: usize,
    pub timelag_filter: usize,
    pub eigen_median: usize,
    pub default_k: usize,
    pub max_scan_k: usize,
    pub kmeans_restarts: usize,
    pub estimation_restarts: usize,
}

impl Default for SegmentationConfig {
    fn default() -> Self {
        Self {
            k: None,
            recurrence_width: 3,
            timelag_filter: 7,
            eigen_median: 9,
            default_k: 5,
            max_scan_k: 11,
            kmeans_restarts: 10,
            estimation_restarts: 4,
        }
    }
}

/// Configuration for the Markov walk predictor.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WalkConfig {
    /// Number of trailing tokens used to condition a continuation walk.
    pub tail_len: usize,
    /// Upper bound on re-sampled walks before giving up on a length.
    pub max_attempts: usize,
    pub model_version: u32,
}

impl Default for WalkConfig {
    fn default() -> Self {
        Self {
            tail_len: 5,
            max_attempts: 10_000,
            model_version: 2,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LightingConfig {
    /// 0..=10, higher values swap colours more often.
    pub lights_intensity: f64,
}

impl Default for LightingConfig {
    fn default() -> Self {
        Self {
            lights_intensity: 9.0,
        }
    }
}

impl LightingConfig {
    /// Seconds between primary light changes.
    pub fn color_swap_offset(&self) -> f64 {
        11.5 - self.lights_intensity
    }
}

/// Difficulty tiers, ordered from easiest to hardest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Difficulty {
    Easy,
    Normal,
    Hard,
    Expert,
    ExpertPlus,
}

impl Difficulty {
    pub const ALL: [Difficulty; 5] = [
        Difficulty::Easy,
        Difficulty::Normal,
        Difficulty::Hard,
        Difficulty::Expert,
        Difficulty::ExpertPlus,
    ];

    /// Lower-case identifier used for model and level file names.
    pub fn as_str(self) -> &'static str {
        match self {
            Difficulty::Easy => "easy",
            Difficulty::Normal => "normal",
            Difficulty::Hard => "hard",
            Difficulty::Expert => "expert",
            Difficulty::ExpertPlus => "expertplus",
        }
    }

    /// Name shown by the game.
    pub fn display_name(self) -> &'static str {
        match self {
            Difficulty::Easy => "Easy",
            Difficulty::Normal => "Normal",
            Difficulty::Hard => "Hard",
            Difficulty::Expert => "Expert",
            Difficulty::ExpertPlus => "ExpertPlus",
        }
    }

    /// Position of the tier in the 5-tier lookup tables.
    pub fn tier(self) -> usize {
        self as usize
    }

    pub fn rank(self) -> u8 {
        self.tier() as u8 * 2 + 1
    }

    pub fn note_jump_speed(self) -> u8 {
        8 + self.tier() as u8 * 2
    }
}

impl fmt::Display for Difficulty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Difficulty {
    type Err = BeatMapError;

    fn from_str(s: &str) -> Result<Self> {
        Difficulty::ALL
            .into_iter()
            .find(|d| d.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| BeatMapError::msg(format!("unknown difficulty `{s}`")))
    }
}

/// Which difficulties a run should produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DifficultySelection {
    Single(Difficulty),
    All,
}

impl DifficultySelection {
    pub fn difficulties(self) -> Vec<Difficulty> {
        match self {
            DifficultySelection::Single(difficulty) => vec![difficulty],
            DifficultySelection::All => Difficulty::ALL.to_vec(),
        }
    }
}

impl FromStr for DifficultySelection {
    type Err = BeatMapError;

    fn from_str(s: &str) -> Result<Self> {
        if s.eq_ignore_ascii_case("all") {
            Ok(DifficultySelection::All)
        } else {
            s.parse().map(DifficultySelection::Single)
        }
    }
}

/// Note generation strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ModelKind {
    #[serde(rename = "random")]
    Random,
    #[serde(rename = "HMM")]
    Hmm,
    #[serde(rename = "segmented_HMM")]
    SegmentedHmm,
    #[serde(rename = "rate_modulated_segmented_HMM")]
    RateModulatedSegmentedHmm,
}

impl ModelKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ModelKind::Random => "random",
            ModelKind::Hmm => "HMM",
            ModelKind::SegmentedHmm => "segmented_HMM",
            ModelKind::RateModulatedSegmentedHmm => "rate_modulated_segmented_HMM",
        }
    }

    /// Whether the strategy walks a Markov model.
    pub fn needs_markov_model(self) -> bool {
        !matches!(self, ModelKind::Random)
    }

    /// Whether the strategy consumes the song segmentation.
    pub fn needs_segments(self) -> bool {
        matches!(
            self,
            ModelKind::SegmentedHmm | ModelKind::RateModulatedSegmentedHmm
        )
    }
}

impl fmt::Display for ModelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ModelKind {
    type Err = BeatMapError;

    fn from_str(s: &str) -> Result<Self> {
        [
            ModelKind::Random,
            ModelKind::Hmm,
            ModelKind::SegmentedHmm,
            ModelKind::RateModulatedSegmentedHmm,
        ]
        .into_iter()
        .find(|m| m.as_str().eq_ignore_ascii_case(s))
        .ok_or_else(|| BeatMapError::msg(format!("unknown model `{s}`")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_cli_spellings() {
        assert_eq!("ExpertPlus".parse::<Difficulty>().unwrap(), Difficulty::ExpertPlus);
        assert_eq!(
            "all".parse::<DifficultySelection>().unwrap(),
            DifficultySelection::All
        );
        assert_eq!(
            "segmented_hmm".parse::<ModelKind>().unwrap(),
            ModelKind::SegmentedHmm
        );
        assert!("legendary".parse::<Difficulty>().is_err());
    }

    #[test]
    fn difficulty_metadata_matches_game_table() {
        let ranks: Vec<u8> = Difficulty::ALL.iter().map(|d| d.rank()).collect();
        let speeds: Vec<u8> = Difficulty::ALL.iter().map(|d| d.note_jump_speed()).collect();
        assert_eq!(ranks, vec![1, 3, 5, 7, 9]);
        assert_eq!(speeds, vec![8, 10, 12, 14, 16]);
    }

    #[test]
    fn partial_json_keeps_defaults() {
        let config: SynthConfig =
            serde_json::from_str(r#"{ "segmentation": { "k": 4 } }"#).unwrap();
        assert_eq!(config.segmentation.k, Some(4));
        assert_eq!(config.segmentation.recurrence_width, 3);
        assert_eq!(config.analysis.hop_length, 512);
        assert!((config.lighting.color_swap_offset() - 2.5).abs() < 1e-9);
    }
}
