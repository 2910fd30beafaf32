//! Song-level orchestration: analyse once, then generate every requested
//! difficulty independently.

pub mod strategy;
pub mod track;

use rand::Rng;
use serde::Serialize;
use tracing::{info, warn};

pub use strategy::{
    hmm_notes, random_notes, rate_modulated_segmented_hmm_notes, segmented_hmm_notes,
    ModulatedNotes,
};
pub use track::{DifficultyTrack, Obstacle, Stage};

use crate::{
    analysis::{BeatFeatures, BeatGrid, BeatTracker, FeatureExtractor},
    config::{Difficulty, DifficultySelection, ModelKind, SynthConfig},
    markov::ModelSource,
    rng::song_rng,
    segment::{Segment, Segmenter},
    AudioTrack, Result,
};

/// What to generate for one song.
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    /// Seeds the run. Equal names give identical output.
    pub song_name: String,
    pub difficulties: DifficultySelection,
    pub model: ModelKind,
    /// Overrides the configured segment count.
    pub k: Option<usize>,
}

impl GenerationRequest {
    pub fn new(song_name: impl Into<String>, difficulties: DifficultySelection, model: ModelKind) -> Self {
        Self {
            song_name: song_name.into(),
            difficulties,
            model,
            k: None,
        }
    }

    pub fn with_k(mut self, k: usize) -> Self {
        self.k = Some(k);
        self
    }
}

/// Beat grid and beat-synchronous features for one decoded song.
#[derive(Debug, Clone, Serialize)]
pub struct SongAnalysis {
    pub duration: f64,
    pub grid: BeatGrid,
    pub features: BeatFeatures,
}

impl SongAnalysis {
    pub fn bpm(&self) -> f64 {
        self.grid.bpm()
    }
}

/// Runs the spectral front-end and beat tracker.
pub fn analyze(track: &AudioTrack, config: &SynthConfig) -> Result<SongAnalysis> {
    let frames = FeatureExtractor::new(&config.analysis)?.extract(track)?;
    let grid = BeatTracker::new(&config.analysis).track(&frames)?;
    let features = BeatFeatures::from_frames(&frames, &grid);
    info!(
        bpm = grid.bpm(),
        beats = grid.len(),
        duration = frames.duration,
        "analysed track"
    );

    Ok(SongAnalysis {
        duration: frames.duration,
        grid,
        features,
    })
}

/// Segments an analysed song.
pub fn segment_song<R: Rng + ?Sized>(
    analysis: &SongAnalysis,
    config: &SynthConfig,
    k: Option<usize>,
    rng: &mut R,
) -> Result<Vec<Segment>> {
    let mut segmentation = config.segmentation.clone();
    if k.is_some() {
        segmentation.k = k;
    }
    Segmenter::new(&segmentation).segment(&analysis.features, &analysis.grid, analysis.duration, rng)
}

/// A difficulty that could not be generated, with the reason.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DifficultyFailure {
    pub difficulty: Difficulty,
    pub reason: String,
}

/// Everything produced for one song.
#[derive(Debug, Clone, Serialize)]
pub struct Beatmap {
    pub song_name: String,
    pub bpm: f64,
    pub model: ModelKind,
    pub segments: Vec<Segment>,
    pub tracks: Vec<DifficultyTrack>,
    pub failures: Vec<DifficultyFailure>,
}

impl Beatmap {
    pub fn track(&self, difficulty: Difficulty) -> Option<&DifficultyTrack> {
        self.tracks.iter().find(|t| t.difficulty() == difficulty)
    }
}

/// Analyses `track` and generates every requested difficulty.
///
/// Analysis and segmentation failures abort the song. A difficulty whose
/// model cannot be loaded or whose walk cannot be satisfied is recorded in
/// [`Beatmap::failures`] and the remaining difficulties still run.
pub fn generate(
    track: &AudioTrack,
    request: &GenerationRequest,
    models: &dyn ModelSource,
    config: &SynthConfig,
) -> Result<Beatmap> {
    let analysis = analyze(track, config)?;
    generate_from_analysis(&analysis, request, models, config)
}

/// [`generate`] for callers that already hold an analysis.
pub fn generate_from_analysis(
    analysis: &SongAnalysis,
    request: &GenerationRequest,
    models: &dyn ModelSource,
    config: &SynthConfig,
) -> Result<Beatmap> {
    let mut rng = song_rng(&request.song_name);
    info!(
        song = %request.song_name,
        model = %request.model,
        "generating beatmap"
    );

    let segments = if request.model.needs_segments() {
        segment_song(analysis, config, request.k, &mut rng)?
    } else {
        Vec::new()
    };

    let mut beatmap = Beatmap {
        song_name: request.song_name.clone(),
        bpm: analysis.bpm(),
        model: request.model,
        segments,
        tracks: Vec::new(),
        failures: Vec::new(),
    };

    for difficulty in request.difficulties.difficulties() {
        let outcome = generate_difficulty(
            analysis,
            &beatmap.segments,
            difficulty,
            request.model,
            models,
            config,
            &mut rng,
        );
        match outcome {
            Ok(track) => beatmap.tracks.push(track),
            Err(err) => {
                warn!(%difficulty, %err, "difficulty failed, continuing with the rest");
                beatmap.failures.push(DifficultyFailure {
                    difficulty,
                    reason: err.to_string(),
                });
            }
        }
    }

    Ok(beatmap)
}

fn generate_difficulty<R: Rng + ?Sized>(
    analysis: &SongAnalysis,
    segments: &[Segment],
    difficulty: Difficulty,
    model: ModelKind,
    models: &dyn ModelSource,
    config: &SynthConfig,
    rng: &mut R,
) -> Result<DifficultyTrack> {
    let grid = &analysis.grid;
    let walk = &config.walk;
    let mut track = DifficultyTrack::new(difficulty);

    let (notes, positions) = match model {
        ModelKind::Random => (random_notes(grid, difficulty, rng), Vec::new()),
        ModelKind::Hmm => {
            let chain = models.load_model(difficulty, walk.model_version)?;
            (hmm_notes(grid, difficulty, &chain, walk, rng)?, Vec::new())
        }
        ModelKind::SegmentedHmm => {
            let chain = models.load_model(difficulty, walk.model_version)?;
            (segmented_hmm_notes(grid, segments, &chain, walk, rng)?, Vec::new())
        }
        ModelKind::RateModulatedSegmentedHmm => {
            let chain = models.load_model(difficulty, walk.model_version)?;
            let out = rate_modulated_segmented_hmm_notes(
                grid,
                segments,
                &analysis.features.loudness_db,
                difficulty,
                &chain,
                walk,
                rng,
            )?;
            (out.notes, out.positions)
        }
    };

    track.set_notes(notes, positions)?;
    track.write_events(grid.bpm(), &config.lighting)?;
    track.write_obstacles()?;
    Ok(track)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::markov::StaticModelStore;

    fn steady_track(seconds: f64) -> AudioTrack {
        let sr = 22_050;
        let samples = (0..(seconds * sr as f64) as usize)
            .map(|i| {
                let t = i as f64 / sr as f64;
                let beat_phase = (t * 2.0).fract();
                let click = if beat_phase < 0.02 { 0.8 } else { 0.0 };
                (click + 0.1 * (t * 440.0 * std::f64::consts::TAU).sin()) as f32
            })
            .collect();
        AudioTrack::new(samples, sr).unwrap()
    }

    #[test]
    fn missing_model_fails_only_that_difficulty() {
        let track = steady_track(20.0);
        let request = GenerationRequest::new("song", DifficultySelection::All, ModelKind::Hmm);
        let models = StaticModelStore::new();

        let beatmap = generate(&track, &request, &models, &SynthConfig::default()).unwrap();
        assert!(beatmap.tracks.is_empty());
        assert_eq!(beatmap.failures.len(), Difficulty::ALL.len());
        assert!(beatmap.failures[0].reason.contains("HMM_easy_v2.json"));
    }

    #[test]
    fn random_model_produces_every_requested_track() {
        let track = steady_track(20.0);
        let request = GenerationRequest::new("song", DifficultySelection::All, ModelKind::Random);

        let beatmap =
            generate(&track, &request, &StaticModelStore::new(), &SynthConfig::default()).unwrap();
        assert!(beatmap.failures.is_empty());
        assert_eq!(beatmap.tracks.len(), 5);
        for track in &beatmap.tracks {
            assert_eq!(track.stage(), Stage::ObstaclesWritten);
            assert!(!track.events().is_empty());
        }
        assert!(beatmap.segments.is_empty());
    }
}
