//! Core library for the BeatMap Synth generator.
//!
//! Audio is decoded into an [`AudioTrack`], analysed into a beat grid and
//! beat-synchronous features, optionally segmented into repeated sections,
//! and turned into per-difficulty note lists by one of four strategies. Every
//! note list passes through the validator before lighting events are derived
//! and the result is handed to an output sink.

pub mod analysis;
pub mod audio;
pub mod config;
pub mod error;
pub mod export;
pub mod lighting;
pub mod markov;
pub mod notes;
pub mod pipeline;
pub mod rate;
pub mod rng;
pub mod segment;
pub mod timeline;
pub mod validate;

pub use analysis::{BeatFeatures, BeatGrid, BeatTracker, FeatureExtractor, FrameFeatures};
pub use audio::{decode, AudioTrack};
pub use config::{Difficulty, DifficultySelection, ModelKind, SynthConfig};
pub use error::{BeatMapError, Result};
pub use export::{export, DirectorySink, OutputSink, SongMetadata};
pub use lighting::{write_events, Event};
pub use markov::{DirectoryModelStore, MarkovModel, ModelSource, StaticModelStore};
pub use notes::{CutDirection, Note, NoteToken, NoteType, RawNote};
pub use pipeline::{
    analyze, generate, generate_from_analysis, Beatmap, DifficultyTrack, GenerationRequest,
    SongAnalysis, Stage,
};
pub use rng::{song_rng, SynthRng};
pub use segment::{Segment, Segmenter};
pub use timeline::TokenRow;
pub use validate::NoteValidator;
