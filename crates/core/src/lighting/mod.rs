//! Lighting events derived from a finished note list.

use serde::{Deserialize, Serialize};

use crate::{
    config::LightingConfig,
    notes::{Note, NoteType},
};

/// Event channels used by the writer.
pub mod channel {
    pub const TRACK_NEONS: u8 = 1;
    pub const PRIMARY_LIGHT: u8 = 4;
    pub const RING_ROTATION: u8 = 8;
    pub const RING_ZOOM: u8 = 9;
}

const OFF: u8 = 0;

/// One lighting event, serialised with the level file's field names.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Event {
    #[serde(rename = "_time")]
    pub time: f64,
    #[serde(rename = "_type")]
    pub event_type: u8,
    #[serde(rename = "_value")]
    pub value: u8,
}

impl Event {
    pub fn new(time: f64, event_type: u8, value: u8) -> Self {
        Self {
            time,
            event_type,
            value,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Intensity {
    Off,
    FadeIn,
    Normal,
    FadeOut,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Color {
    Red,
    Blue,
}

impl Color {
    fn other(self) -> Self {
        match self {
            Color::Red => Color::Blue,
            Color::Blue => Color::Red,
        }
    }

    fn for_hand(note_type: NoteType) -> Option<Self> {
        match note_type {
            NoteType::Left => Some(Color::Red),
            NoteType::Right => Some(Color::Blue),
            NoteType::Bomb => None,
        }
    }
}

fn light_value(intensity: Intensity, color: Color) -> u8 {
    let base = match intensity {
        Intensity::Off => return OFF,
        Intensity::Normal => 1,
        Intensity::FadeIn => 2,
        Intensity::FadeOut => 3,
    };
    match color {
        Color::Blue => base,
        Color::Red => base + 4,
    }
}

/// Primary light state machine: fade in, hold, fade out, swap colour.
#[derive(Debug, Clone, Copy)]
struct LightCycle {
    last_time: f64,
    intensity: Intensity,
    color: Color,
}

impl LightCycle {
    fn advance(&mut self, time: f64) -> Event {
        let (intensity, color) = match self.intensity {
            Intensity::Off | Intensity::FadeOut => (Intensity::FadeIn, self.color.other()),
            Intensity::FadeIn => (Intensity::Normal, self.color),
            Intensity::Normal => (Intensity::FadeOut, self.color),
        };
        self.last_time = time;
        self.intensity = intensity;
        self.color = color;
        Event::new(time, channel::PRIMARY_LIGHT, light_value(intensity, color))
    }
}

/// Builds the event list for one difficulty's notes.
///
/// The primary light steps through its cycle whenever more than the colour
/// swap interval has passed since its last change, and is switched off on the
/// first and last note. Every note also toggles the rings (one rotation then
/// two zooms) and non-bomb notes flash the track neons in their hand colour.
pub fn write_events(notes: &[Note], bpm: f64, config: &LightingConfig) -> Vec<Event> {
    let mut events = vec![Event::new(0.0, channel::PRIMARY_LIGHT, OFF)];
    let interval = (bpm / 60.0).round() * config.color_swap_offset();
    let mut cycle = LightCycle {
        last_time: 0.0,
        intensity: Intensity::Off,
        color: Color::Red,
    };
    let last_index = notes.len().saturating_sub(1);

    for (index, note) in notes.iter().enumerate() {
        let is_edge = index == 0 || index == last_index;
        if is_edge {
            events.push(Event::new(note.time, channel::PRIMARY_LIGHT, OFF));
        } else if note.time - cycle.last_time > interval {
            events.push(cycle.advance(note.time));
        }

        let ring = if index % 3 == 0 {
            channel::RING_ROTATION
        } else {
            channel::RING_ZOOM
        };
        events.push(Event::new(note.time, ring, OFF));

        if let Some(color) = Color::for_hand(note.note_type) {
            events.push(Event::new(
                note.time,
                channel::TRACK_NEONS,
                light_value(Intensity::Normal, color),
            ));
        }
    }

    events
}
