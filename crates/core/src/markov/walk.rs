use std::{collections::BTreeMap, ops::Range};

use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::MarkovModel;
use crate::{config::WalkConfig, BeatMapError, Result};

/// Token budget requested for one segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SegmentDemand {
    pub label: usize,
    pub length: usize,
}

/// Concatenated tokens for a run of segments plus the slice each segment
/// occupies.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SegmentWalk {
    pub tokens: Vec<String>,
    pub spans: Vec<Range<usize>>,
}

/// Samples walks of a required length from a borrowed model.
#[derive(Debug, Clone, Copy)]
pub struct WalkPredictor<'m> {
    model: &'m MarkovModel,
    max_attempts: usize,
    tail_len: usize,
}

impl<'m> WalkPredictor<'m> {
    pub fn new(model: &'m MarkovModel, config: &WalkConfig) -> Self {
        Self {
            model,
            max_attempts: config.max_attempts.max(1),
            tail_len: config.tail_len.max(1),
        }
    }

    /// Re-samples until a walk has at least `required` tokens.
    ///
    /// A tail the model cannot continue from, or one that never yields a
    /// long enough continuation, degrades to unconditioned walks.
    pub fn walk_at_least<R: Rng + ?Sized>(
        &self,
        required: usize,
        tail: Option<&[String]>,
        rng: &mut R,
    ) -> Result<Vec<String>> {
        if let Some(tail) = tail {
            if self.model.has_state(tail) {
                match self.sample_until(required, tail, rng) {
                    Ok(walk) => return Ok(walk),
                    Err(BeatMapError::WalkLengthUnsatisfiable { .. }) => {
                        warn!(required, "conditioned walks stayed too short, walking unconditioned");
                    }
                    Err(err) => return Err(err),
                }
            } else {
                warn!(
                    state = ?self.model.state_for(tail),
                    "no transition from tail state, walking unconditioned"
                );
            }
        }

        self.sample_until(required, &[], rng)
    }

    fn sample_until<R: Rng + ?Sized>(
        &self,
        required: usize,
        tail: &[String],
        rng: &mut R,
    ) -> Result<Vec<String>> {
        for attempt in 1..=self.max_attempts {
            let walk = self.model.walk_from(tail, rng)?;
            if walk.len() >= required {
                debug!(required, attempt, len = walk.len(), "walk accepted");
                return Ok(walk);
            }
        }

        Err(BeatMapError::WalkLengthUnsatisfiable {
            required,
            attempts: self.max_attempts,
        })
    }

    /// Exactly `length` tokens from an unconditioned walk.
    pub fn predict<R: Rng + ?Sized>(&self, length: usize, rng: &mut R) -> Result<Vec<String>> {
        let mut walk = self.walk_at_least(length, None, rng)?;
        walk.truncate(length);
        Ok(walk)
    }

    /// Generates tokens for segments in time order, replaying earlier walks
    /// for repeated labels.
    ///
    /// A repeat no longer than the recorded span copies its prefix and draws
    /// no randomness. A longer repeat replays the whole span, extends it from
    /// the span's own tail, and becomes the new recorded span for its label.
    pub fn predict_segments<R: Rng + ?Sized>(
        &self,
        demands: &[SegmentDemand],
        rng: &mut R,
    ) -> Result<SegmentWalk> {
        let mut out = SegmentWalk::default();
        let mut recorded: BTreeMap<usize, Range<usize>> = BTreeMap::new();

        for demand in demands {
            let start = out.tokens.len();
            let length = demand.length;
            if length == 0 {
                out.spans.push(start..start);
                continue;
            }

            match recorded.get(&demand.label).cloned() {
                None => {
                    let tail = (!out.tokens.is_empty()).then(|| self.tail_of(&out.tokens));
                    let walk = self.walk_at_least(length, tail, rng)?;
                    out.tokens.extend_from_slice(&walk[..length]);
                    recorded.insert(demand.label, start..start + length);
                }
                Some(span) if span.len() >= length => {
                    let replay = out.tokens[span.start..span.start + length].to_vec();
                    out.tokens.extend(replay);
                }
                Some(span) => {
                    let replay = out.tokens[span].to_vec();
                    let needed = length - replay.len();
                    let extension = self.walk_at_least(needed, Some(self.tail_of(&replay)), rng)?;
                    out.tokens.extend(replay);
                    out.tokens.extend_from_slice(&extension[..needed]);
                    recorded.insert(demand.label, start..start + length);
                }
            }

            out.spans.push(start..start + length);
        }

        Ok(out)
    }

    fn tail_of<'t>(&self, tokens: &'t [String]) -> &'t [String] {
        &tokens[tokens.len().saturating_sub(self.tail_len)..]
    }
}

#[cfg(test)]
mod tests {
    use rand::RngCore;

    use super::*;
    use crate::rng::create_rng;

    fn training_model() -> MarkovModel {
        let runs: Vec<Vec<String>> = (0..3)
            .map(|r| (0..200).map(|i| format!("t{}", (i * 7 + r * 3 + i / 5) % 6)).collect())
            .collect();
        MarkovModel::train(&runs, 1).unwrap()
    }

    fn demands(items: &[(usize, usize)]) -> Vec<SegmentDemand> {
        items
            .iter()
            .map(|&(label, length)| SegmentDemand { label, length })
            .collect()
    }

    #[test]
    fn repeat_within_recorded_span_is_a_prefix_copy() {
        let model = training_model();
        let predictor = WalkPredictor::new(&model, &WalkConfig::default());

        let mut with_repeat = create_rng(21);
        let walk = predictor
            .predict_segments(&demands(&[(0, 5), (1, 4), (0, 3)]), &mut with_repeat)
            .unwrap();
        assert_eq!(walk.tokens.len(), 12);
        assert_eq!(walk.tokens[9..12], walk.tokens[0..3]);
        assert_eq!(walk.spans[2], 9..12);

        // The replay must not draw from the generator.
        let mut without_repeat = create_rng(21);
        predictor
            .predict_segments(&demands(&[(0, 5), (1, 4)]), &mut without_repeat)
            .unwrap();
        assert_eq!(with_repeat.next_u32(), without_repeat.next_u32());
    }

    #[test]
    fn longer_repeat_extends_and_replaces_recorded_span() {
        let model = training_model();
        let predictor = WalkPredictor::new(&model, &WalkConfig::default());
        let mut rng = create_rng(8);

        let walk = predictor
            .predict_segments(&demands(&[(0, 3), (1, 2), (0, 6), (0, 5)]), &mut rng)
            .unwrap();

        assert_eq!(walk.tokens.len(), 16);
        assert_eq!(walk.tokens[5..8], walk.tokens[0..3]);
        assert_eq!(walk.spans[2], 5..11);
        assert_eq!(walk.tokens[11..16], walk.tokens[5..10]);
    }

    #[test]
    fn zero_length_segments_are_skipped() {
        let model = training_model();
        let predictor = WalkPredictor::new(&model, &WalkConfig::default());
        let mut rng = create_rng(4);

        let walk = predictor
            .predict_segments(&demands(&[(0, 0), (1, 3)]), &mut rng)
            .unwrap();
        assert_eq!(walk.spans, vec![0..0, 0..3]);
    }

    #[test]
    fn unknown_tail_falls_back_to_unconditioned_walk() {
        let model = training_model();
        let predictor = WalkPredictor::new(&model, &WalkConfig::default());
        let mut rng = create_rng(6);

        let tail = vec!["never-seen".to_string()];
        let walk = predictor.walk_at_least(4, Some(&tail), &mut rng).unwrap();
        assert!(walk.len() >= 4);
    }

    #[test]
    fn exhausted_attempts_are_reported() {
        let model = MarkovModel::train(&[vec!["a", "b"]], 1).unwrap();
        let config = WalkConfig {
            max_attempts: 3,
            ..WalkConfig::default()
        };
        let predictor = WalkPredictor::new(&model, &config);
        let mut rng = create_rng(0);

        let err = predictor.predict(5, &mut rng).unwrap_err();
        assert!(matches!(
            err,
            BeatMapError::WalkLengthUnsatisfiable { required: 5, attempts: 3 }
        ));
    }
}
