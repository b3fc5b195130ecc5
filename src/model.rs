//! Data model: steps, sequences, patterns, and the few numeric ranges
//! spec.md leaves as abstract `Max`/`Range` placeholders, resolved here
//! to concrete constants (see DESIGN.md for the Open Question
//! rationale).

use serde::{Deserialize, Serialize};

/// Steps per pattern (spec.md §3).
pub const STEP_COUNT: usize = 16;
/// Patterns per track (spec.md §3).
pub const PATTERN_COUNT: usize = 16;

/// Size of the probability sampling range: a probability field `p`
/// passes when a sample in `[0, PROBABILITY_RANGE)` is `<= p`. Gives
/// the pass rate `(p+1)/PROBABILITY_RANGE` spec.md §8 tests for.
pub const PROBABILITY_RANGE: i32 = 8;
/// Maximum value a stored probability field may hold.
pub const PROBABILITY_MAX: i32 = PROBABILITY_RANGE - 1;

/// Denominator for `length` → ticks conversion (spec.md §4.2 step 5):
/// `ticks = divisor * length / LENGTH_RANGE`.
pub const LENGTH_RANGE: i32 = 8;

/// Maximum magnitude of a step's sub-tick gate offset nudge.
pub const GATE_OFFSET_MAX: i32 = 7;

/// Opaque handle to a track, replacing a borrowed/cyclic reference
/// (spec.md §9 Design Notes).
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TrackId(pub u8);

/// Opaque handle to one of a track's `PATTERN_COUNT` patterns.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PatternId(pub u8);

impl PatternId {
    pub fn next(self) -> PatternId {
        PatternId(((self.0 as usize + 1) % PATTERN_COUNT) as u8)
    }
}

/// Output voltage span a normalized `[0,1]` or note CV value is
/// denormalized/clamped into. Matches the common Eurorack ranges used
/// throughout the pack's CV-producing crates.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub enum VoltRange {
    Unipolar5V,
    Unipolar10V,
    Bipolar5V,
    Bipolar10V,
}

impl VoltRange {
    pub fn bounds(self) -> (f32, f32) {
        match self {
            VoltRange::Unipolar5V => (0.0, 5.0),
            VoltRange::Unipolar10V => (0.0, 10.0),
            VoltRange::Bipolar5V => (-5.0, 5.0),
            VoltRange::Bipolar10V => (-10.0, 10.0),
        }
    }

    /// Maps a normalized `[0,1]` value into this voltage span.
    pub fn denormalize(self, normalized: f32) -> f32 {
        let (lo, hi) = self.bounds();
        lo + normalized.clamp(0.0, 1.0) * (hi - lo)
    }

    /// Clamps a raw voltage (e.g. a pitch CV) into this span.
    pub fn clamp(self, volts: f32) -> f32 {
        let (lo, hi) = self.bounds();
        volts.clamp(lo, hi)
    }
}

impl Default for VoltRange {
    fn default() -> Self {
        VoltRange::Bipolar5V
    }
}

/// Fill/step gating condition (spec.md §3, §4.2 step 4).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Condition {
    Off,
    Fill,
    NotFill,
    Pre,
    NotPre,
    First,
    NotFirst,
    /// Fires when `iteration mod base == offset`.
    Loop(u8, u8),
}

impl Default for Condition {
    fn default() -> Self {
        Condition::Off
    }
}

/// Evaluates a step's `condition` against the track's current
/// iteration and fill state (spec.md §4.2 step 4).
///
/// `Off` always fires and never touches `prev_condition`. `Pre` /
/// `NotPre` read `prev_condition` without writing it. Every other
/// branch computes its own result and writes it into
/// `prev_condition` for a later `Pre`/`NotPre` to see.
pub fn eval_step_condition(condition: Condition, iteration: u32, fill: bool, prev_condition: &mut bool) -> bool {
    match condition {
        Condition::Off => true,
        Condition::Pre => *prev_condition,
        Condition::NotPre => !*prev_condition,
        Condition::Fill => {
            let result = fill;
            *prev_condition = result;
            result
        }
        Condition::NotFill => {
            let result = !fill;
            *prev_condition = result;
            result
        }
        Condition::First => {
            let result = iteration == 0;
            *prev_condition = result;
            result
        }
        Condition::NotFirst => {
            let result = iteration != 0;
            *prev_condition = result;
            result
        }
        Condition::Loop(base, offset) => {
            let result = base > 0 && (iteration % base as u32) == offset as u32;
            *prev_condition = result;
            result
        }
    }
}

/// Which side of the fill a `fillMode` substitutes (spec.md §4.2 step
/// 2/3, §4.3).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum FillMode {
    /// Gates pass unconditionally while filling.
    Gates,
    /// Read the next pattern's step at the same index.
    NextPattern,
    /// Use the step's variation shape/note instead of the primary one.
    Variation,
    /// (CurveTrack only) invert the shape function.
    Invert,
}

/// One step of a `NoteTrackEngine` sequence (spec.md §3).
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct NoteStep {
    pub gate: bool,
    pub gate_probability: u8,
    pub gate_offset: i8,
    pub retrigger: u8,
    pub retrigger_probability: u8,
    pub length: u8,
    pub length_variation_range: i8,
    pub length_variation_probability: u8,
    pub note: i16,
    pub note_variation_range: i16,
    pub note_variation_probability: u8,
    pub slide: bool,
    pub condition: Condition,
}

impl Default for NoteStep {
    fn default() -> Self {
        Self {
            gate: false,
            gate_probability: PROBABILITY_MAX as u8,
            gate_offset: 0,
            retrigger: 0,
            retrigger_probability: 0,
            length: (LENGTH_RANGE - 1) as u8,
            length_variation_range: 0,
            length_variation_probability: 0,
            note: 0,
            note_variation_range: 0,
            note_variation_probability: 0,
            slide: false,
            condition: Condition::Off,
        }
    }
}

impl NoteStep {
    pub fn set_gate_probability(&mut self, p: i32) {
        self.gate_probability = p.clamp(0, PROBABILITY_MAX) as u8;
    }

    pub fn set_gate_offset(&mut self, offset: i32) {
        self.gate_offset = offset.clamp(-GATE_OFFSET_MAX, GATE_OFFSET_MAX) as i8;
    }

    pub fn set_retrigger(&mut self, count: i32) {
        self.retrigger = count.clamp(0, 7) as u8;
    }

    pub fn set_length(&mut self, length: i32) {
        self.length = length.clamp(0, LENGTH_RANGE) as u8;
    }
}

/// One step of a `CurveTrackEngine` sequence (spec.md §3).
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct CurveStep {
    pub shape: u8,
    pub shape_variation: u8,
    pub shape_variation_probability: u8,
    /// Normalized `[0,1]` range floor, stored as a `u8` (0..=255).
    pub min: u8,
    /// Normalized `[0,1]` range ceiling, stored as a `u8` (0..=255).
    pub max: u8,
    /// 4-bit sub-step gate pattern.
    pub gate: u8,
    pub gate_probability: u8,
}

impl Default for CurveStep {
    fn default() -> Self {
        Self {
            shape: 0,
            shape_variation: 0,
            shape_variation_probability: 0,
            min: 0,
            max: 255,
            gate: 0b1111,
            gate_probability: PROBABILITY_MAX as u8,
        }
    }
}

impl CurveStep {
    pub fn min_normalized(&self) -> f32 {
        self.min as f32 / 255.0
    }

    pub fn max_normalized(&self) -> f32 {
        self.max as f32 / 255.0
    }
}

/// A fixed-length array of steps with playback parameters
/// (spec.md §3). Generic over the step type so `NoteTrackEngine` and
/// `CurveTrackEngine` share the same container and run-mode logic.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct Sequence<S: Copy> {
    #[serde(with = "serde_big_array::BigArray")]
    pub steps: [S; STEP_COUNT],
    pub first_step: u8,
    pub last_step: u8,
    /// Ticks per step, in sequence-domain ticks.
    pub divisor: u32,
    pub run_mode: crate::sequence::RunMode,
    /// Measures between hard resets; `0` disables the reset.
    pub reset_measure: u32,
    pub range: VoltRange,
    pub scale: crate::scale::Scale,
    pub root_note: i16,
}

impl<S: Copy + Default> Sequence<S> {
    pub fn new() -> Self {
        Self {
            steps: [S::default(); STEP_COUNT],
            first_step: 0,
            last_step: (STEP_COUNT - 1) as u8,
            divisor: crate::time::MASTER_PPQN,
            run_mode: crate::sequence::RunMode::Forward,
            reset_measure: 0,
            range: VoltRange::default(),
            scale: crate::scale::Scale::default(),
            root_note: 0,
        }
    }

    /// Clamps and applies `first`/`last`, preserving the invariant
    /// `first_step <= last_step < STEP_COUNT` (spec.md §3).
    pub fn set_step_range(&mut self, first: u8, last: u8) {
        let first = first.min((STEP_COUNT - 1) as u8);
        let last = last.clamp(first, (STEP_COUNT - 1) as u8);
        self.first_step = first;
        self.last_step = last;
    }
}

impl<S: Copy + Default> Default for Sequence<S> {
    fn default() -> Self {
        Self::new()
    }
}

/// Per-voice signal set a `MidiCvTrack` can be configured to output
/// (spec.md §3).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum VoiceConfig {
    Pitch,
    PitchVelocity,
    PitchVelocityPressure,
}

/// Voice-stealing policy for a `MidiCvTrack` (spec.md §4.4).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum NotePriority {
    Last,
    First,
    Lowest,
    Highest,
}

/// Configuration for a `MidiCvTrackEngine` (spec.md §3).
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct MidiCvTrackConfig {
    pub voices: u8,
    pub voice_config: VoiceConfig,
    pub note_priority: NotePriority,
    pub low_note: u8,
    pub high_note: u8,
    /// Semitones; `0` disables pitch bend.
    pub pitch_bend_range: u8,
    pub modulation_range: VoltRange,
    pub retrigger: bool,
}

impl Default for MidiCvTrackConfig {
    fn default() -> Self {
        Self {
            voices: 1,
            voice_config: VoiceConfig::Pitch,
            note_priority: NotePriority::Last,
            low_note: 0,
            high_note: 127,
            pitch_bend_range: 2,
            modulation_range: VoltRange::Unipolar5V,
            retrigger: false,
        }
    }
}

impl MidiCvTrackConfig {
    pub fn set_voices(&mut self, voices: i32) {
        self.voices = voices.clamp(1, 8) as u8;
    }

    pub fn set_low_note(&mut self, note: i32) {
        self.low_note = note.clamp(0, self.high_note as i32) as u8;
    }

    pub fn set_high_note(&mut self, note: i32) {
        self.high_note = note.clamp(self.low_note as i32, 127) as u8;
    }

    pub fn set_pitch_bend_range(&mut self, semitones: i32) {
        self.pitch_bend_range = semitones.clamp(0, 48) as u8;
    }
}

/// Capacity of a [`HeldNotes`] stack: one entry per `MidiCvTrack`
/// voice at the maximum voice count.
pub const HELD_NOTES_CAPACITY: usize = 8;

/// Fixed-capacity stack of currently-held MIDI notes, in press order.
/// Backs both `NoteTrackEngine` monitoring (spec.md §4.2 "newest held
/// MIDI note from recordHistory") and `MidiCvTrackEngine` voice
/// allocation (spec.md §4.4 note-priority policies). No heap
/// allocation (spec.md §5 Memory).
#[derive(Clone, Copy, Debug)]
pub struct HeldNotes {
    notes: [Option<u8>; HELD_NOTES_CAPACITY],
    len: usize,
}

impl HeldNotes {
    pub fn new() -> Self {
        Self {
            notes: [None; HELD_NOTES_CAPACITY],
            len: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Pushes a newly-pressed note. If the stack is already at
    /// capacity, the oldest held note is dropped to make room.
    pub fn push(&mut self, note: u8) {
        if self.len == HELD_NOTES_CAPACITY {
            self.notes.copy_within(1.., 0);
            self.len -= 1;
        }
        self.notes[self.len] = Some(note);
        self.len += 1;
    }

    /// Removes a released note, preserving the relative order of the
    /// rest.
    pub fn remove(&mut self, note: u8) {
        if let Some(idx) = self.notes[..self.len].iter().position(|n| *n == Some(note)) {
            self.notes.copy_within(idx + 1..self.len, idx);
            self.len -= 1;
            self.notes[self.len] = None;
        }
    }

    /// The most recently pressed still-held note.
    pub fn newest(&self) -> Option<u8> {
        if self.len == 0 {
            None
        } else {
            self.notes[self.len - 1]
        }
    }

    /// The least recently pressed still-held note.
    pub fn oldest(&self) -> Option<u8> {
        self.notes[0]
    }

    pub fn lowest(&self) -> Option<u8> {
        self.notes[..self.len].iter().filter_map(|n| *n).min()
    }

    pub fn highest(&self) -> Option<u8> {
        self.notes[..self.len].iter().filter_map(|n| *n).max()
    }

    pub fn iter(&self) -> impl Iterator<Item = u8> + '_ {
        self.notes[..self.len].iter().filter_map(|n| *n)
    }
}

impl Default for HeldNotes {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn held_notes_newest_and_oldest() {
        let mut h = HeldNotes::new();
        h.push(60);
        h.push(64);
        h.push(67);
        assert_eq!(h.newest(), Some(67));
        assert_eq!(h.oldest(), Some(60));
        h.remove(64);
        assert_eq!(h.iter().collect::<Vec<_>>(), vec![60, 67]);
        assert_eq!(h.lowest(), Some(60));
        assert_eq!(h.highest(), Some(67));
    }

    #[test]
    fn condition_off_never_writes_prev() {
        let mut prev = true;
        assert!(eval_step_condition(Condition::Off, 5, false, &mut prev));
        assert!(prev);
        prev = false;
        assert!(eval_step_condition(Condition::Off, 5, false, &mut prev));
        assert!(!prev);
    }

    #[test]
    fn condition_pre_is_read_only() {
        let mut prev = true;
        assert!(eval_step_condition(Condition::Pre, 0, false, &mut prev));
        assert!(prev); // unchanged
        assert!(!eval_step_condition(Condition::NotPre, 0, false, &mut prev));
        assert!(prev); // unchanged
    }

    #[test]
    fn condition_loop_fires_on_schedule() {
        let mut prev = false;
        let mut fired = Vec::new();
        for iteration in 0..32u32 {
            if eval_step_condition(Condition::Loop(4, 0), iteration, false, &mut prev) {
                fired.push(iteration);
            }
        }
        assert_eq!(fired, vec![0, 4, 8, 12, 16, 20, 24, 28]);
    }

    #[test]
    fn midi_cv_config_clamps_note_range() {
        let mut cfg = MidiCvTrackConfig::default();
        cfg.set_high_note(10);
        cfg.set_low_note(50); // clamped down to high_note
        assert!(cfg.low_note <= cfg.high_note);
    }

    #[test]
    fn volt_range_denormalizes_unipolar5v() {
        assert!((VoltRange::Unipolar5V.denormalize(0.5) - 2.5).abs() < 1e-6);
        assert!((VoltRange::Bipolar5V.denormalize(0.0) - (-5.0)).abs() < 1e-6);
    }

    #[test]
    fn sequence_round_trips_its_scale() {
        let mut seq = Sequence::<NoteStep>::new();
        seq.scale = crate::scale::Scale::major();
        seq.root_note = 3;
        let bytes = bincode::serialize(&seq).unwrap();
        let decoded: Sequence<NoteStep> = bincode::deserialize(&bytes).unwrap();
        assert!(!decoded.scale.chromatic);
        assert_eq!(decoded.scale.notes_per_octave, 7);
        assert_eq!(decoded.root_note, 3);
    }
}
