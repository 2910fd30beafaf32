use serde::{Deserialize, Serialize};

use crate::{
    config::{Difficulty, LightingConfig},
    lighting::{write_events, Event},
    notes::Note,
    BeatMapError, Result,
};

/// Wall placement in a level file. The generator never produces any, the list
/// exists so level files carry the full shape.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Obstacle {
    #[serde(rename = "_time")]
    pub time: f64,
    #[serde(rename = "_lineIndex")]
    pub line_index: u8,
    #[serde(rename = "_type")]
    pub obstacle_type: u8,
    #[serde(rename = "_duration")]
    pub duration: f64,
    #[serde(rename = "_width")]
    pub width: u8,
}

/// Lifecycle of one difficulty's output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Stage {
    NotYetModeled,
    Modeled,
    EventsWritten,
    ObstaclesWritten,
    Serialized,
}

impl Stage {
    pub fn as_str(self) -> &'static str {
        match self {
            Stage::NotYetModeled => "not-yet-modeled",
            Stage::Modeled => "modeled",
            Stage::EventsWritten => "events-written",
            Stage::ObstaclesWritten => "obstacles-written",
            Stage::Serialized => "serialized",
        }
    }
}

/// Notes, events and obstacles for one difficulty.
#[derive(Debug, Clone, Serialize)]
pub struct DifficultyTrack {
    difficulty: Difficulty,
    stage: Stage,
    notes: Vec<Note>,
    events: Vec<Event>,
    obstacles: Vec<Obstacle>,
    /// Fractional beat numbers chosen by the rate modulator, when used.
    modulated_beat_positions: Vec<f64>,
}

impl DifficultyTrack {
    pub fn new(difficulty: Difficulty) -> Self {
        Self {
            difficulty,
            stage: Stage::NotYetModeled,
            notes: Vec::new(),
            events: Vec::new(),
            obstacles: Vec::new(),
            modulated_beat_positions: Vec::new(),
        }
    }

    pub fn difficulty(&self) -> Difficulty {
        self.difficulty
    }

    pub fn stage(&self) -> Stage {
        self.stage
    }

    pub fn notes(&self) -> &[Note] {
        &self.notes
    }

    pub fn events(&self) -> &[Event] {
        &self.events
    }

    pub fn obstacles(&self) -> &[Obstacle] {
        &self.obstacles
    }

    pub fn modulated_beat_positions(&self) -> &[f64] {
        &self.modulated_beat_positions
    }

    fn advance(&mut self, from: Stage, to: Stage) -> Result<()> {
        if self.stage != from {
            return Err(BeatMapError::InvalidStage {
                from: self.stage.as_str(),
                to: to.as_str(),
            });
        }
        self.stage = to;
        Ok(())
    }

    pub fn set_notes(&mut self, notes: Vec<Note>, modulated_beat_positions: Vec<f64>) -> Result<()> {
        self.advance(Stage::NotYetModeled, Stage::Modeled)?;
        self.notes = notes;
        self.modulated_beat_positions = modulated_beat_positions;
        Ok(())
    }

    pub fn write_events(&mut self, bpm: f64, config: &LightingConfig) -> Result<()> {
        self.advance(Stage::Modeled, Stage::EventsWritten)?;
        self.events = write_events(&self.notes, bpm, config);
        Ok(())
    }

    pub fn write_obstacles(&mut self) -> Result<()> {
        self.advance(Stage::EventsWritten, Stage::ObstaclesWritten)?;
        self.obstacles.clear();
        Ok(())
    }

    /// Called by an output sink once the level file is written.
    pub fn mark_serialized(&mut self) -> Result<()> {
        self.advance(Stage::ObstaclesWritten, Stage::Serialized)
    }
}
