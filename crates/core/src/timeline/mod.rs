//! Placement timelines: which beat positions receive a walk token.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{config::Difficulty, markov::SegmentDemand, segment::Segment};

/// One walk token pinned to a time in beats.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenRow {
    pub time: f64,
    pub token: String,
}

impl TokenRow {
    pub fn new(time: f64, token: impl Into<String>) -> Self {
        Self {
            time,
            token: token.into(),
        }
    }
}

/// Pairs times with tokens in order. Surplus entries on either side are
/// discarded.
pub fn align_tokens(times: &[f64], tokens: Vec<String>) -> Vec<TokenRow> {
    if times.len() != tokens.len() {
        debug!(
            times = times.len(),
            tokens = tokens.len(),
            "token and time counts differ, truncating to the shorter"
        );
    }
    let mut rows: Vec<TokenRow> = times
        .iter()
        .zip(tokens)
        .map(|(time, token)| TokenRow::new(*time, token))
        .collect();
    rows.sort_by(|a, b| a.time.total_cmp(&b.time));
    rows
}

/// Beats between placements for the flat cadence.
pub fn cadence_step(difficulty: Difficulty) -> usize {
    match difficulty {
        Difficulty::Easy => 3,
        Difficulty::Normal => 2,
        _ => 1,
    }
}

/// Beat indices used by the plain HMM strategy: every `cadence_step` beats
/// starting at beat 2.
pub fn hmm_cadence(difficulty: Difficulty, n_beats: usize) -> Vec<usize> {
    (2..n_beats).step_by(cadence_step(difficulty)).collect()
}

/// One demand per segment, one token per beat.
pub fn segment_demands(segments: &[Segment]) -> Vec<SegmentDemand> {
    segments
        .iter()
        .map(|segment| SegmentDemand {
            label: segment.label,
            length: segment.beat_len(),
        })
        .collect()
}

/// One demand per segment, one token per modulated position inside the
/// segment's beat range.
pub fn modulated_demands(segments: &[Segment], positions: &[f64]) -> Vec<SegmentDemand> {
    segments
        .iter()
        .map(|segment| {
            let start = segment.start_beat as f64;
            let end = segment.end_beat as f64;
            SegmentDemand {
                label: segment.label,
                length: positions.iter().filter(|p| **p >= start && **p < end).count(),
            }
        })
        .collect()
}
