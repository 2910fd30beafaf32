//! The four note generation strategies. Each one is callable on its own
//! given a beat grid (and segments where needed) so callers can run single
//! phases without re-analysing audio.

use rand::Rng;
use tracing::info;

use crate::{
    analysis::BeatGrid,
    config::{Difficulty, WalkConfig},
    markov::{MarkovModel, WalkPredictor},
    notes::{materialize, Note, NoteType, RawNote},
    rate::RateModulator,
    segment::Segment,
    timeline::{align_tokens, hmm_cadence, modulated_demands, segment_demands},
    validate::NoteValidator,
    Result,
};

const RANDOM_TYPES: [NoteType; 3] = [NoteType::Left, NoteType::Right, NoteType::Bomb];

/// Notes plus the sub-beat positions they were placed on.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ModulatedNotes {
    pub notes: Vec<Note>,
    pub positions: Vec<f64>,
}

fn random_note<R: Rng + ?Sized>(time: f64, rng: &mut R) -> RawNote {
    let line_index = rng.gen_range(0..4);
    let line_layer = rng.gen_range(0..3);
    let note_type = RANDOM_TYPES[rng.gen_range(0..RANDOM_TYPES.len())];
    // Dots are never drawn.
    let cut_direction = rng.gen_range(0..8);
    RawNote {
        time,
        line_index: Some(line_index),
        line_layer: Some(line_layer),
        note_type,
        cut_direction: Some(cut_direction),
    }
}

/// Baseline without any model: easier tiers fill each beat with a coin flip,
/// harder tiers place a note on every beat and double up a random subset.
pub fn random_notes<R: Rng + ?Sized>(grid: &BeatGrid, difficulty: Difficulty, rng: &mut R) -> Vec<Note> {
    let beats = grid.beat_positions();
    let mut raw = Vec::with_capacity(beats.len());

    match difficulty {
        Difficulty::Easy | Difficulty::Normal => {
            for beat in &beats {
                if rng.gen_range(0..2) == 1 {
                    raw.push(random_note(*beat, rng));
                }
            }
        }
        _ => {
            let extra = rng.gen_range(0..beats.len().max(1));
            let mut times = beats.clone();
            for _ in 0..extra {
                times.push(beats[rng.gen_range(0..beats.len())]);
            }
            times.sort_by(f64::total_cmp);
            for time in times {
                raw.push(random_note(time, rng));
            }
        }
    }

    let notes = NoteValidator::new(grid.bpm()).validate(raw, rng);
    info!(%difficulty, notes = notes.len(), "random notes written");
    notes
}

fn tokens_to_notes<R: Rng + ?Sized>(
    grid: &BeatGrid,
    times: &[f64],
    tokens: Vec<String>,
    rng: &mut R,
) -> Vec<Note> {
    let rows = align_tokens(times, tokens);
    NoteValidator::new(grid.bpm()).validate(materialize(&rows), rng)
}

/// One unconditioned walk laid over a flat per-difficulty cadence.
pub fn hmm_notes<R: Rng + ?Sized>(
    grid: &BeatGrid,
    difficulty: Difficulty,
    model: &MarkovModel,
    walk: &WalkConfig,
    rng: &mut R,
) -> Result<Vec<Note>> {
    let times: Vec<f64> = hmm_cadence(difficulty, grid.len())
        .into_iter()
        .map(|beat| grid.position_to_beats(beat as f64))
        .collect();
    let tokens = WalkPredictor::new(model, walk).predict(times.len(), rng)?;

    let notes = tokens_to_notes(grid, &times, tokens, rng);
    info!(%difficulty, notes = notes.len(), "HMM notes written");
    Ok(notes)
}

/// One token per beat, with repeated segments replaying earlier walks.
pub fn segmented_hmm_notes<R: Rng + ?Sized>(
    grid: &BeatGrid,
    segments: &[Segment],
    model: &MarkovModel,
    walk: &WalkConfig,
    rng: &mut R,
) -> Result<Vec<Note>> {
    let demands = segment_demands(segments);
    let predicted = WalkPredictor::new(model, walk).predict_segments(&demands, rng)?;

    let notes = tokens_to_notes(grid, &grid.beat_positions(), predicted.tokens, rng);
    info!(segments = segments.len(), notes = notes.len(), "segmented HMM notes written");
    Ok(notes)
}

/// Like [`segmented_hmm_notes`] but with per-beat density chosen from
/// loudness, so tokens land on sub-beat positions.
pub fn rate_modulated_segmented_hmm_notes<R: Rng + ?Sized>(
    grid: &BeatGrid,
    segments: &[Segment],
    beat_loudness_db: &[f64],
    difficulty: Difficulty,
    model: &MarkovModel,
    walk: &WalkConfig,
    rng: &mut R,
) -> Result<ModulatedNotes> {
    let positions = RateModulator::new(difficulty).modulate(beat_loudness_db, rng);
    let demands = modulated_demands(segments, &positions);
    let predicted = WalkPredictor::new(model, walk).predict_segments(&demands, rng)?;

    let times: Vec<f64> = positions
        .iter()
        .map(|position| grid.position_to_beats(*position))
        .collect();
    let notes = tokens_to_notes(grid, &times, predicted.tokens, rng);
    info!(
        %difficulty,
        positions = positions.len(),
        notes = notes.len(),
        "rate modulated segmented HMM notes written"
    );
    Ok(ModulatedNotes { notes, positions })
}
