use crate::error::{Error, Result};
use crate::synth::prelude::{A4_FREQUENCY, A4_NOTE};

/// Highest valid MIDI note number.
pub const MAX_NOTE: u8 = 127;

/// Where a note event came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoteSource {
    Keyboard,
    Midi,
}

/// A decoded note-on or note-off. Immutable once built.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NoteEvent {
    pub note_number: u8,
    pub velocity: u8,
    pub is_on: bool,
    pub source: NoteSource,
    pub frequency: f64,
}

impl NoteEvent {
    pub fn new(note_number: u8, velocity: u8, is_on: bool, source: NoteSource) -> Result<Self> {
        if note_number > MAX_NOTE {
            return Err(Error::InvalidNote(note_number));
        }
        Ok(Self {
            note_number,
            velocity: velocity.min(127),
            is_on,
            source,
            frequency: note_to_frequency(note_number),
        })
    }
}

/// Equal-tempered frequency of a MIDI note, A4 (69) = 440 Hz.
pub fn note_to_frequency(note: u8) -> f64 {
    A4_FREQUENCY * 2f64.powf((note as f64 - A4_NOTE as f64) / 12.0)
}

/// Converts MIDI velocity into a gain factor using a power curve.
pub fn velocity_to_scale(velocity: u8, sensitive: bool, curve: f64) -> f64 {
    let vel = if sensitive { velocity.clamp(1, 127) } else { 100 };
    (vel as f64 / 127.0).powf(curve)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn a4_is_440() {
        assert_relative_eq!(note_to_frequency(69), 440.0);
        assert_relative_eq!(note_to_frequency(81), 880.0, epsilon = 1e-9);
        assert_relative_eq!(note_to_frequency(57), 220.0, epsilon = 1e-9);
    }

    #[test]
    fn rejects_notes_above_127() {
        assert!(matches!(
            NoteEvent::new(128, 100, true, NoteSource::Midi),
            Err(Error::InvalidNote(128))
        ));
    }

    #[test]
    fn velocity_insensitive_is_constant() {
        assert_eq!(
            velocity_to_scale(1, false, 1.5),
            velocity_to_scale(127, false, 1.5)
        );
        assert!(velocity_to_scale(127, true, 1.5) > velocity_to_scale(20, true, 1.5));
    }
}
