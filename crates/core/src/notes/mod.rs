//! Note records and the token format the Markov models speak.
//!
//! A token describes everything placed on one beat as twelve comma separated
//! fields, four per hand slot in the order left, right, bomb:
//! `type,line_index,line_layer,cut_direction`. A slot whose type field is
//! `999` is empty.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::{timeline::TokenRow, BeatMapError, Result};

pub const MAX_LINE_INDEX: u8 = 3;
pub const MAX_LINE_LAYER: u8 = 2;
/// Marker for an empty slot inside a token.
pub const ABSENT: i64 = 999;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum NoteType {
    Left = 0,
    Right = 1,
    Bomb = 3,
}

impl NoteType {
    /// Slot order inside a token.
    pub const SLOTS: [NoteType; 3] = [NoteType::Left, NoteType::Right, NoteType::Bomb];
}

impl From<NoteType> for u8 {
    fn from(value: NoteType) -> Self {
        value as u8
    }
}

impl TryFrom<u8> for NoteType {
    type Error = BeatMapError;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            0 => Ok(NoteType::Left),
            1 => Ok(NoteType::Right),
            3 => Ok(NoteType::Bomb),
            other => Err(BeatMapError::NoteFieldInvalid(format!("note type {other}"))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum CutDirection {
    Up = 0,
    Down = 1,
    Left = 2,
    Right = 3,
    UpLeft = 4,
    UpRight = 5,
    DownLeft = 6,
    DownRight = 7,
    /// Any direction.
    Dot = 8,
}

impl CutDirection {
    pub const ALL: [CutDirection; 9] = [
        CutDirection::Up,
        CutDirection::Down,
        CutDirection::Left,
        CutDirection::Right,
        CutDirection::UpLeft,
        CutDirection::UpRight,
        CutDirection::DownLeft,
        CutDirection::DownRight,
        CutDirection::Dot,
    ];

    /// The swing that follows through from this one.
    pub fn opposite(self) -> Self {
        match self {
            CutDirection::Up => CutDirection::Down,
            CutDirection::Down => CutDirection::Up,
            CutDirection::Left => CutDirection::Right,
            CutDirection::Right => CutDirection::Left,
            CutDirection::UpLeft => CutDirection::DownRight,
            CutDirection::DownRight => CutDirection::UpLeft,
            CutDirection::UpRight => CutDirection::DownLeft,
            CutDirection::DownLeft => CutDirection::UpRight,
            CutDirection::Dot => CutDirection::Dot,
        }
    }
}

impl From<CutDirection> for u8 {
    fn from(value: CutDirection) -> Self {
        value as u8
    }
}

impl TryFrom<u8> for CutDirection {
    type Error = BeatMapError;

    fn try_from(value: u8) -> Result<Self> {
        CutDirection::ALL
            .get(value as usize)
            .copied()
            .ok_or_else(|| BeatMapError::NoteFieldInvalid(format!("cut direction {value}")))
    }
}

/// A validated note, serialised with the level file's field names.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Note {
    /// Position in beats.
    #[serde(rename = "_time")]
    pub time: f64,
    #[serde(rename = "_lineIndex")]
    pub line_index: u8,
    #[serde(rename = "_lineLayer")]
    pub line_layer: u8,
    #[serde(rename = "_type")]
    pub note_type: NoteType,
    #[serde(rename = "_cutDirection")]
    pub cut_direction: CutDirection,
}

/// A note before sanitation. Fields may be missing or out of range.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RawNote {
    pub time: f64,
    pub line_index: Option<i64>,
    pub line_layer: Option<i64>,
    pub note_type: NoteType,
    pub cut_direction: Option<i64>,
}

impl From<Note> for RawNote {
    fn from(note: Note) -> Self {
        Self {
            time: note.time,
            line_index: Some(note.line_index.into()),
            line_layer: Some(note.line_layer.into()),
            note_type: note.note_type,
            cut_direction: Some(u8::from(note.cut_direction).into()),
        }
    }
}

/// Placement fields of one occupied token slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SlotFields {
    pub line_index: Option<i64>,
    pub line_layer: Option<i64>,
    pub cut_direction: Option<i64>,
}

/// Parsed form of one walk token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct NoteToken {
    /// Indexed like [`NoteType::SLOTS`].
    pub slots: [Option<SlotFields>; 3],
}

impl NoteToken {
    /// Lenient parse. Unreadable placement fields become `None` so sanitation
    /// can drop the note later; a slot with no readable type is empty.
    pub fn parse(token: &str) -> Self {
        let fields: Vec<&str> = token.split(',').map(str::trim).collect();
        let field = |index: usize| fields.get(index).and_then(|f| f.parse::<i64>().ok());

        let mut slots = [None; 3];
        for (slot, entry) in slots.iter_mut().enumerate() {
            let base = slot * 4;
            let occupied = fields
                .get(base)
                .map(|f| !f.is_empty() && field(base) != Some(ABSENT))
                .unwrap_or(false);
            if occupied {
                *entry = Some(SlotFields {
                    line_index: field(base + 1),
                    line_layer: field(base + 2),
                    cut_direction: field(base + 3),
                });
            }
        }

        Self { slots }
    }

    /// Builds a token from notes sharing one timestamp. Later notes of the
    /// same type replace earlier ones.
    pub fn from_notes(notes: &[Note]) -> Self {
        let mut token = Self::default();
        for note in notes {
            let slot = slot_of(note.note_type);
            token.slots[slot] = Some(SlotFields {
                line_index: Some(note.line_index.into()),
                line_layer: Some(note.line_layer.into()),
                cut_direction: Some(u8::from(note.cut_direction).into()),
            });
        }
        token
    }

    /// Expands the occupied slots into raw notes at `time`.
    pub fn raw_notes(&self, time: f64) -> impl Iterator<Item = RawNote> + '_ {
        NoteType::SLOTS
            .iter()
            .zip(&self.slots)
            .filter_map(move |(note_type, slot)| {
                slot.map(|fields| RawNote {
                    time,
                    line_index: fields.line_index,
                    line_layer: fields.line_layer,
                    note_type: *note_type,
                    cut_direction: fields.cut_direction,
                })
            })
    }
}

fn slot_of(note_type: NoteType) -> usize {
    match note_type {
        NoteType::Left => 0,
        NoteType::Right => 1,
        NoteType::Bomb => 2,
    }
}

impl fmt::Display for NoteToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let render = |value: Option<i64>| value.unwrap_or(ABSENT).to_string();
        let mut parts = Vec::with_capacity(12);
        for (note_type, slot) in NoteType::SLOTS.iter().zip(&self.slots) {
            match slot {
                Some(fields) => {
                    parts.push(u8::from(*note_type).to_string());
                    parts.push(render(fields.line_index));
                    parts.push(render(fields.line_layer));
                    parts.push(render(fields.cut_direction));
                }
                None => parts.extend(std::iter::repeat(ABSENT.to_string()).take(4)),
            }
        }
        f.write_str(&parts.join(","))
    }
}

/// Expands timestamped token rows into raw notes, keeping row order.
pub fn materialize(rows: &[TokenRow]) -> Vec<RawNote> {
    rows.iter()
        .flat_map(|row| {
            NoteToken::parse(&row.token)
                .raw_notes(row.time)
                .collect::<Vec<_>>()
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_partial_token() {
        let token = NoteToken::parse("0,1,0,1, 999,999,999,999,3,2,2,8");
        assert_eq!(
            token.slots[0],
            Some(SlotFields {
                line_index: Some(1),
                line_layer: Some(0),
                cut_direction: Some(1),
            })
        );
        assert_eq!(token.slots[1], None);
        assert_eq!(token.slots[2].map(|s| s.cut_direction), Some(Some(8)));
    }

    #[test]
    fn token_text_round_trips() {
        let text = "999,999,999,999,1,3,2,5,999,999,999,999";
        assert_eq!(NoteToken::parse(text).to_string(), text);
    }

    #[test]
    fn materializes_rows_in_order() {
        let rows = vec![
            TokenRow::new(4.0, "0,0,0,1,1,3,0,1,999,999,999,999"),
            TokenRow::new(5.0, "999,999,999,999,999,999,999,999,999,999,999,999"),
            TokenRow::new(6.0, "999,999,999,999,999,999,999,999,3,1,x,8"),
        ];
        let notes = materialize(&rows);

        assert_eq!(notes.len(), 3);
        assert_eq!(notes[0].note_type, NoteType::Left);
        assert_eq!(notes[1].note_type, NoteType::Right);
        assert_eq!(notes[1].line_index, Some(3));
        assert_eq!(notes[2].note_type, NoteType::Bomb);
        assert_eq!(notes[2].line_layer, None);
        assert_eq!(notes[2].time, 6.0);
    }

    #[test]
    fn serialises_with_level_field_names() {
        let note = Note {
            time: 4.5,
            line_index: 1,
            line_layer: 2,
            note_type: NoteType::Right,
            cut_direction: CutDirection::UpLeft,
        };
        let json = serde_json::to_value(note).unwrap();
        assert_eq!(json["_type"], 1);
        assert_eq!(json["_cutDirection"], 4);
        assert_eq!(json["_lineLayer"], 2);

        let bad = r#"{"_time":1.0,"_lineIndex":0,"_lineLayer":0,"_type":2,"_cutDirection":0}"#;
        assert!(serde_json::from_str::<Note>(bad).is_err());
    }

    #[test]
    fn opposite_is_an_involution() {
        for dir in CutDirection::ALL {
            assert_eq!(dir.opposite().opposite(), dir);
        }
        assert_eq!(CutDirection::UpRight.opposite(), CutDirection::DownLeft);
    }
}
