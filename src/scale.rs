//! Scale: mapping from an integer note index to a semitone offset,
//! possibly non-chromatic.

use serde::{Deserialize, Serialize};

/// Maximum number of scale degrees per octave a [`Scale`] can hold.
/// Large enough for every common musical scale plus a couple of
/// microtonal ones; keeps the struct allocation-free.
pub const MAX_DEGREES: usize = 16;

/// A scale: a fixed table of semitone offsets per degree, repeating
/// every octave.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct Scale {
    /// Whether this scale is the 12-tone chromatic scale. When true,
    /// `note_to_semitones` treats the note index as a raw semitone
    /// count and ignores `degrees`/`notes_per_octave`.
    pub chromatic: bool,
    /// Scale degrees per octave (1..=MAX_DEGREES).
    pub notes_per_octave: u8,
    /// Semitone offset of each degree within an octave. Only the
    /// first `notes_per_octave` entries are meaningful.
    pub degrees: [i8; MAX_DEGREES],
}

impl Scale {
    /// The 12-tone chromatic scale: every note index is a semitone.
    pub const fn chromatic() -> Self {
        let mut degrees = [0i8; MAX_DEGREES];
        let mut i = 0;
        while i < MAX_DEGREES {
            degrees[i] = i as i8;
            i += 1;
        }
        Self {
            chromatic: true,
            notes_per_octave: 12,
            degrees,
        }
    }

    /// Natural major scale (W-W-H-W-W-W-H).
    pub const fn major() -> Self {
        let mut degrees = [0i8; MAX_DEGREES];
        let intervals = [0, 2, 4, 5, 7, 9, 11];
        let mut i = 0;
        while i < intervals.len() {
            degrees[i] = intervals[i];
            i += 1;
        }
        Self {
            chromatic: false,
            notes_per_octave: 7,
            degrees,
        }
    }

    /// Natural minor scale (W-H-W-W-H-W-W).
    pub const fn natural_minor() -> Self {
        let mut degrees = [0i8; MAX_DEGREES];
        let intervals = [0, 2, 3, 5, 7, 8, 10];
        let mut i = 0;
        while i < intervals.len() {
            degrees[i] = intervals[i];
            i += 1;
        }
        Self {
            chromatic: false,
            notes_per_octave: 7,
            degrees,
        }
    }

    /// Resolves a scale-degree index (already folded with root note,
    /// octave and transpose by the caller, per spec.md §4.2 step 8)
    /// into a semitone offset from the scale's zero point.
    pub fn note_to_semitones(&self, note_index: i32) -> i32 {
        if self.chromatic {
            return note_index;
        }
        let per_octave = self.notes_per_octave.max(1) as i32;
        let degree = note_index.rem_euclid(per_octave);
        let octave = note_index.div_euclid(per_octave);
        self.degrees[degree as usize] as i32 + octave * 12
    }

    /// Converts a scale-degree index straight to volts (1V/octave),
    /// unclamped — the caller clamps into the sequence's voltage
    /// range (spec.md §4.2 step 8).
    pub fn note_to_volts(&self, note_index: i32) -> f32 {
        self.note_to_semitones(note_index) as f32 / 12.0
    }
}

impl Default for Scale {
    fn default() -> Self {
        Self::chromatic()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chromatic_is_one_semitone_per_step() {
        let s = Scale::chromatic();
        assert_eq!(s.note_to_semitones(0), 0);
        assert_eq!(s.note_to_semitones(12), 12);
        assert_eq!(s.note_to_semitones(-1), -1);
    }

    #[test]
    fn major_scale_wraps_per_octave() {
        let s = Scale::major();
        assert_eq!(s.note_to_semitones(0), 0);
        assert_eq!(s.note_to_semitones(7), 12); // one octave up
        assert_eq!(s.note_to_semitones(-1), -1); // degree 7 (leading tone) down an octave: 11-12
    }

    #[test]
    fn volts_is_semitones_over_twelve() {
        let s = Scale::chromatic();
        assert!((s.note_to_volts(12) - 1.0).abs() < 1e-6);
        assert!((s.note_to_volts(6) - 0.5).abs() < 1e-6);
    }
}
