//! Discrete Markov chain over note tokens.
//!
//! Models are JSON chain files: a `state_size` and a list of
//! `[state, {next_token: count}]` pairs, where a state is the last
//! `state_size` tokens and walks start from a state made of [`BEGIN`]
//! sentinels and stop at [`END`].

pub mod walk;

use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
    sync::Arc,
};

use rand::{
    distributions::{Distribution, WeightedIndex},
    Rng,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

pub use walk::{SegmentDemand, SegmentWalk, WalkPredictor};

use crate::{config::Difficulty, BeatMapError, Result};

pub const BEGIN: &str = "___BEGIN__";
pub const END: &str = "___END__";

/// Hard stop for walks through a model whose cycles never reach [`END`].
const MAX_WALK_TOKENS: usize = 100_000;

type State = Vec<String>;

/// On-disk form of a chain.
#[derive(Debug, Serialize, Deserialize)]
struct ChainFile {
    state_size: usize,
    chain: Vec<(State, BTreeMap<String, u64>)>,
}

/// Weighted successors of one state.
#[derive(Debug, Clone, PartialEq)]
struct Choices {
    tokens: Vec<String>,
    counts: Vec<u64>,
    weights: WeightedIndex<u64>,
}

impl Choices {
    fn from_counts(counts: BTreeMap<String, u64>) -> Option<Self> {
        let (tokens, counts): (Vec<String>, Vec<u64>) =
            counts.into_iter().filter(|(_, count)| *count > 0).unzip();
        let weights = WeightedIndex::new(&counts).ok()?;
        Some(Self {
            tokens,
            counts,
            weights,
        })
    }

    fn counts(&self) -> BTreeMap<String, u64> {
        self.tokens
            .iter()
            .cloned()
            .zip(self.counts.iter().copied())
            .collect()
    }

    fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> &str {
        &self.tokens[self.weights.sample(rng)]
    }
}

/// Read-only transition model used by the walk predictor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "ChainFile", into = "ChainFile")]
pub struct MarkovModel {
    state_size: usize,
    transitions: BTreeMap<State, Choices>,
}

impl TryFrom<ChainFile> for MarkovModel {
    type Error = BeatMapError;

    fn try_from(file: ChainFile) -> Result<Self> {
        if file.state_size == 0 {
            return Err(BeatMapError::msg("markov state size must be positive"));
        }

        let mut transitions = BTreeMap::new();
        for (state, counts) in file.chain {
            if state.len() != file.state_size {
                return Err(BeatMapError::msg(format!(
                    "state {state:?} does not have {} tokens",
                    file.state_size
                )));
            }
            if let Some(choices) = Choices::from_counts(counts) {
                transitions.insert(state, choices);
            }
        }

        Ok(Self {
            state_size: file.state_size,
            transitions,
        })
    }
}

impl From<MarkovModel> for ChainFile {
    fn from(model: MarkovModel) -> Self {
        ChainFile {
            state_size: model.state_size,
            chain: model
                .transitions
                .iter()
                .map(|(state, choices)| (state.clone(), choices.counts()))
                .collect(),
        }
    }
}

impl MarkovModel {
    /// Builds a chain from token runs, each run being one training map.
    pub fn train<S: AsRef<str>>(runs: &[Vec<S>], state_size: usize) -> Result<Self> {
        if state_size == 0 {
            return Err(BeatMapError::InvalidInput("markov state size must be positive"));
        }

        let mut counts: BTreeMap<State, BTreeMap<String, u64>> = BTreeMap::new();
        for run in runs {
            let items: Vec<String> = std::iter::repeat(BEGIN.to_string())
                .take(state_size)
                .chain(run.iter().map(|token| token.as_ref().to_string()))
                .chain(std::iter::once(END.to_string()))
                .collect();
            for window in items.windows(state_size + 1) {
                let (state, follow) = window.split_at(state_size);
                *counts
                    .entry(state.to_vec())
                    .or_default()
                    .entry(follow[0].clone())
                    .or_default() += 1;
            }
        }

        let transitions = counts
            .into_iter()
            .filter_map(|(state, counts)| Choices::from_counts(counts).map(|c| (state, c)))
            .collect();
        Ok(Self {
            state_size,
            transitions,
        })
    }

    /// Reads a JSON chain file.
    pub fn load(path: &Path) -> Result<Self> {
        let name = path.display().to_string();
        let data = std::fs::read_to_string(path).map_err(|e| BeatMapError::ModelLoad {
            name: name.clone(),
            reason: e.to_string(),
        })?;
        serde_json::from_str(&data).map_err(|e| BeatMapError::ModelLoad {
            name,
            reason: e.to_string(),
        })
    }

    pub fn state_size(&self) -> usize {
        self.state_size
    }

    pub fn n_states(&self) -> usize {
        self.transitions.len()
    }

    /// Builds the state a walk would continue from after `tail`.
    pub fn state_for(&self, tail: &[String]) -> State {
        let take = tail.len().min(self.state_size);
        std::iter::repeat(BEGIN.to_string())
            .take(self.state_size - take)
            .chain(tail[tail.len() - take..].iter().cloned())
            .collect()
    }

    /// Whether a walk can continue after `tail`.
    pub fn has_state(&self, tail: &[String]) -> bool {
        self.transitions.contains_key(&self.state_for(tail))
    }

    /// Samples a walk from the start state.
    pub fn walk<R: Rng + ?Sized>(&self, rng: &mut R) -> Result<Vec<String>> {
        self.walk_from(&[], rng)
    }

    /// Samples a continuation of `tail`. The tail itself is not repeated in
    /// the output.
    pub fn walk_from<R: Rng + ?Sized>(&self, tail: &[String], rng: &mut R) -> Result<Vec<String>> {
        let mut state = self.state_for(tail);
        if !self.transitions.contains_key(&state) {
            return Err(BeatMapError::UnknownMarkovState(state));
        }

        let mut tokens = Vec::new();
        while tokens.len() < MAX_WALK_TOKENS {
            let Some(choices) = self.transitions.get(&state) else {
                debug!("walk reached a state with no successors");
                break;
            };
            let next = choices.sample(rng);
            if next == END {
                break;
            }
            tokens.push(next.to_string());
            state.remove(0);
            state.push(next.to_string());
        }
        Ok(tokens)
    }
}

/// Where the pipeline gets one model per difficulty and version from.
pub trait ModelSource {
    fn load_model(&self, difficulty: Difficulty, version: u32) -> Result<Arc<MarkovModel>>;
}

/// File name of a stored model.
pub fn model_file_name(difficulty: Difficulty, version: u32) -> String {
    format!("HMM_{}_v{}.json", difficulty.as_str(), version)
}

/// Models stored as `HMM_<difficulty>_v<version>.json` in one directory.
#[derive(Debug, Clone)]
pub struct DirectoryModelStore {
    root: PathBuf,
}

impl DirectoryModelStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn path_for(&self, difficulty: Difficulty, version: u32) -> PathBuf {
        self.root.join(model_file_name(difficulty, version))
    }

    /// Writes a model where [`ModelSource::load_model`] will find it.
    pub fn save(&self, difficulty: Difficulty, version: u32, model: &MarkovModel) -> Result<()> {
        std::fs::create_dir_all(&self.root)?;
        let data = serde_json::to_string(model)?;
        std::fs::write(self.path_for(difficulty, version), data)?;
        Ok(())
    }
}

impl ModelSource for DirectoryModelStore {
    fn load_model(&self, difficulty: Difficulty, version: u32) -> Result<Arc<MarkovModel>> {
        let path = self.path_for(difficulty, version);
        let model = MarkovModel::load(&path)?;
        info!(
            path = %path.display(),
            states = model.n_states(),
            "loaded markov model"
        );
        Ok(Arc::new(model))
    }
}

/// In-memory models, mainly for tests and embedding callers.
#[derive(Debug, Clone, Default)]
pub struct StaticModelStore {
    models: BTreeMap<(Difficulty, u32), Arc<MarkovModel>>,
}

impl StaticModelStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, difficulty: Difficulty, version: u32, model: MarkovModel) {
        self.models.insert((difficulty, version), Arc::new(model));
    }

    pub fn with_model(mut self, difficulty: Difficulty, version: u32, model: MarkovModel) -> Self {
        self.insert(difficulty, version, model);
        self
    }
}

impl ModelSource for StaticModelStore {
    fn load_model(&self, difficulty: Difficulty, version: u32) -> Result<Arc<MarkovModel>> {
        self.models
            .get(&(difficulty, version))
            .cloned()
            .ok_or_else(|| BeatMapError::ModelLoad {
                name: model_file_name(difficulty, version),
                reason: "no such model".into(),
            })
    }
}
