//! Writing finished beatmaps out as level files.

use std::{
    fs,
    path::{Path, PathBuf},
};

use serde::Serialize;
use tracing::{info, warn};

use crate::{
    config::Difficulty,
    lighting::Event,
    notes::Note,
    pipeline::{Beatmap, DifficultyTrack, Obstacle},
    BeatMapError, Result,
};

pub const FORMAT_VERSION: &str = "2.0.0";
pub const SONG_FILE: &str = "song.egg";
pub const COVER_FILE: &str = "cover.jpg";

/// Metadata that is not derived from the audio.
#[derive(Debug, Clone)]
pub struct SongMetadata {
    pub environment: String,
    pub level_author: String,
}

impl Default for SongMetadata {
    fn default() -> Self {
        Self {
            environment: "DefaultEnvironment".into(),
            level_author: "BeatMapSynth".into(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct DifficultyEntry {
    #[serde(rename = "_difficulty")]
    pub difficulty: String,
    #[serde(rename = "_difficultyRank")]
    pub rank: u8,
    #[serde(rename = "_beatmapFilename")]
    pub file_name: String,
    #[serde(rename = "_noteJumpMovementSpeed")]
    pub note_jump_speed: u8,
    #[serde(rename = "_noteJumpStartBeatOffset")]
    pub note_jump_offset: i32,
    #[serde(rename = "_customData")]
    pub custom_data: serde_json::Map<String, serde_json::Value>,
}

impl DifficultyEntry {
    pub fn new(difficulty: Difficulty) -> Self {
        Self {
            difficulty: difficulty.display_name().to_string(),
            rank: difficulty.rank(),
            file_name: level_file_name(difficulty),
            note_jump_speed: difficulty.note_jump_speed(),
            note_jump_offset: 0,
            custom_data: serde_json::Map::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct BeatmapSet {
    #[serde(rename = "_beatmapCharacteristicName")]
    pub characteristic: String,
    #[serde(rename = "_difficultyBeatmaps")]
    pub beatmaps: Vec<DifficultyEntry>,
}

/// Contents of `info.dat`.
#[derive(Debug, Clone, Serialize)]
pub struct InfoFile {
    #[serde(rename = "_version")]
    pub version: String,
    #[serde(rename = "_songName")]
    pub song_name: String,
    #[serde(rename = "_songSubName")]
    pub song_sub_name: String,
    #[serde(rename = "_songAuthorName")]
    pub song_author: String,
    #[serde(rename = "_levelAuthorName")]
    pub level_author: String,
    #[serde(rename = "_beatsPerMinute")]
    pub bpm: i64,
    #[serde(rename = "_songTimeOffset")]
    pub song_time_offset: f64,
    #[serde(rename = "_shuffle")]
    pub shuffle: f64,
    #[serde(rename = "_shufflePeriod")]
    pub shuffle_period: f64,
    #[serde(rename = "_previewStartTime")]
    pub preview_start: f64,
    #[serde(rename = "_previewDuration")]
    pub preview_duration: f64,
    #[serde(rename = "_songFilename")]
    pub song_file: String,
    #[serde(rename = "_coverImageFilename")]
    pub cover_file: String,
    #[serde(rename = "_environmentName")]
    pub environment: String,
    #[serde(rename = "_customData")]
    pub custom_data: serde_json::Map<String, serde_json::Value>,
    #[serde(rename = "_difficultyBeatmapSets")]
    pub beatmap_sets: Vec<BeatmapSet>,
}

impl InfoFile {
    /// Lists every generated difficulty. Failed difficulties are left out.
    pub fn new(beatmap: &Beatmap, metadata: &SongMetadata) -> Self {
        let beatmaps = beatmap
            .tracks
            .iter()
            .map(|track| DifficultyEntry::new(track.difficulty()))
            .collect();

        Self {
            version: FORMAT_VERSION.into(),
            song_name: beatmap.song_name.clone(),
            song_sub_name: String::new(),
            song_author: song_author(&beatmap.song_name),
            level_author: metadata.level_author.clone(),
            bpm: beatmap.bpm.round() as i64,
            song_time_offset: 0.0,
            shuffle: 0.0,
            shuffle_period: 0.0,
            preview_start: 10.0,
            preview_duration: 30.0,
            song_file: SONG_FILE.into(),
            cover_file: COVER_FILE.into(),
            environment: metadata.environment.clone(),
            custom_data: serde_json::Map::new(),
            beatmap_sets: vec![BeatmapSet {
                characteristic: "Standard".into(),
                beatmaps,
            }],
        }
    }
}

/// `"Artist - Title"` names carry the artist first.
fn song_author(song_name: &str) -> String {
    song_name
        .split_once(" - ")
        .map(|(artist, _)| artist.trim().to_string())
        .unwrap_or_default()
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct LevelCustomData {
    #[serde(rename = "_time")]
    pub time: String,
    #[serde(rename = "_BPMChanges")]
    pub bpm_changes: Vec<serde_json::Value>,
    #[serde(rename = "_bookmarks")]
    pub bookmarks: Vec<serde_json::Value>,
}

/// Contents of one `<difficulty>.dat`.
#[derive(Debug, Clone, Serialize)]
pub struct LevelFile<'a> {
    #[serde(rename = "_version")]
    pub version: &'static str,
    #[serde(rename = "_customData")]
    pub custom_data: LevelCustomData,
    #[serde(rename = "_events")]
    pub events: &'a [Event],
    #[serde(rename = "_notes")]
    pub notes: &'a [Note],
    #[serde(rename = "_obstacles")]
    pub obstacles: &'a [Obstacle],
}

impl<'a> LevelFile<'a> {
    pub fn new(track: &'a DifficultyTrack) -> Self {
        Self {
            version: FORMAT_VERSION,
            custom_data: LevelCustomData::default(),
            events: track.events(),
            notes: track.notes(),
            obstacles: track.obstacles(),
        }
    }
}

pub fn level_file_name(difficulty: Difficulty) -> String {
    format!("{}.dat", difficulty.as_str())
}

/// Destination for generated files.
pub trait OutputSink {
    fn write_info(&mut self, info: &InfoFile) -> Result<()>;
    fn write_level(&mut self, difficulty: Difficulty, level: &LevelFile<'_>) -> Result<()>;
    /// Stores the playable audio next to the levels.
    fn write_audio(&mut self, source: &Path) -> Result<()>;
    fn write_cover(&mut self, source: &Path) -> Result<()>;
}

/// Writes `info.dat` and every level file, then advances each written track
/// to [`crate::pipeline::Stage::Serialized`].
pub fn export(beatmap: &mut Beatmap, metadata: &SongMetadata, sink: &mut dyn OutputSink) -> Result<()> {
    sink.write_info(&InfoFile::new(beatmap, metadata))?;
    for track in &mut beatmap.tracks {
        sink.write_level(track.difficulty(), &LevelFile::new(track))?;
        track.mark_serialized()?;
    }
    Ok(())
}

/// Plain directory output, one folder per song.
#[derive(Debug, Clone)]
pub struct DirectorySink {
    root: PathBuf,
}

impl DirectorySink {
    pub fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn write_json<T: Serialize>(&self, name: &str, value: &T) -> Result<()> {
        let path = self.root.join(name);
        let file = fs::File::create(&path)?;
        serde_json::to_writer_pretty(std::io::BufWriter::new(file), value)?;
        info!(path = %path.display(), "wrote level data");
        Ok(())
    }
}

impl OutputSink for DirectorySink {
    fn write_info(&mut self, info: &InfoFile) -> Result<()> {
        self.write_json("info.dat", info)
    }

    fn write_level(&mut self, difficulty: Difficulty, level: &LevelFile<'_>) -> Result<()> {
        self.write_json(&level_file_name(difficulty), level)
    }

    /// Ogg input is copied as is. Other formats need re-encoding, which this
    /// sink does not do.
    fn write_audio(&mut self, source: &Path) -> Result<()> {
        let ext = source
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase)
            .unwrap_or_default();
        match ext.as_str() {
            "ogg" | "egg" => {
                fs::copy(source, self.root.join(SONG_FILE))?;
                Ok(())
            }
            _ => Err(BeatMapError::UnsupportedFormat(format!(
                "{ext} audio must be re-encoded to ogg before packaging"
            ))),
        }
    }

    fn write_cover(&mut self, source: &Path) -> Result<()> {
        if !source.exists() {
            warn!(path = %source.display(), "cover image not found, skipping");
            return Ok(());
        }
        fs::copy(source, self.root.join(COVER_FILE))?;
        Ok(())
    }
}
