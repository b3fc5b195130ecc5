//! Recorder: live MIDI → step and CV → curve conversion feeding back
//! into sequences (spec.md §4.5). Two sub-recorders share a small ring
//! of timestamped note events; neither ever blocks or allocates.

use crate::curve_track::{sample_shape, shape_count};
use crate::model::{CurveStep, NoteStep, LENGTH_RANGE, PROBABILITY_MAX};
use crate::time::Tick;

/// Capacity of the shared note-event ring (spec.md §5: "lock-free
/// single-producer/single-consumer").
const RING_CAPACITY: usize = 16;

#[derive(Clone, Copy, Debug)]
struct NoteEvent {
    note: u8,
    on_tick: Tick,
    off_tick: Option<Tick>,
}

/// Fixed-capacity ring of recent note-on/note-off timestamps, written
/// by the MIDI-input callback and scanned by [`NoteRecorder`].
#[derive(Clone, Copy)]
pub struct RecordRing {
    events: [Option<NoteEvent>; RING_CAPACITY],
    write: usize,
}

impl RecordRing {
    pub fn new() -> Self {
        Self {
            events: [None; RING_CAPACITY],
            write: 0,
        }
    }

    pub fn note_on(&mut self, note: u8, tick: Tick) {
        self.events[self.write] = Some(NoteEvent {
            note,
            on_tick: tick,
            off_tick: None,
        });
        self.write = (self.write + 1) % RING_CAPACITY;
    }

    pub fn note_off(&mut self, note: u8, tick: Tick) {
        // Most recent still-open entry for this note.
        for event in self.events.iter_mut().flatten().rev() {
            if event.note == note && event.off_tick.is_none() {
                event.off_tick = Some(tick);
                return;
            }
        }
    }

    /// First recorded note whose `on_tick` falls within `[lo, hi]`.
    fn first_in_window(&self, lo: Tick, hi: Tick) -> Option<NoteEvent> {
        self.events
            .iter()
            .flatten()
            .filter(|e| e.on_tick >= lo && e.on_tick <= hi)
            .min_by_key(|e| e.on_tick)
            .copied()
    }
}

impl Default for RecordRing {
    fn default() -> Self {
        Self::new()
    }
}

/// Which recording behavior `recordStep` follows (spec.md §4.5, §4.7).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RecordMode {
    Overwrite,
    Punch,
    StepRecord,
}

/// MIDI→step sub-recorder (spec.md §4.5).
pub struct NoteRecorder {
    pub mode: RecordMode,
    pub current_record_step: u8,
}

impl NoteRecorder {
    pub fn new() -> Self {
        Self {
            mode: RecordMode::Overwrite,
            current_record_step: 0,
        }
    }

    /// Called at a step boundary in `Overwrite`/`Punch` mode: scans
    /// the ring for a note whose on-tick lands within `margin` of the
    /// *previous* step's start and writes it into `prev_step`
    /// (spec.md §4.5).
    pub fn record_step(
        &mut self,
        ring: &RecordRing,
        prev_step_start: Tick,
        divisor: u32,
        track_selected: bool,
        prev_step: &mut NoteStep,
    ) {
        if self.mode == RecordMode::StepRecord {
            return;
        }
        let margin = divisor / 2;
        let lo = prev_step_start.saturating_sub(margin);
        let hi = prev_step_start.saturating_add(margin);

        match ring.first_in_window(lo, hi) {
            Some(event) => {
                prev_step.note = event.note as i16;
                prev_step.gate = true;
                prev_step.gate_probability = PROBABILITY_MAX as u8;
                prev_step.retrigger_probability = PROBABILITY_MAX as u8;
                let duration = event.off_tick.unwrap_or(prev_step_start + divisor).saturating_sub(event.on_tick);
                prev_step.length =
                    ((duration as u64 * LENGTH_RANGE as u64) / divisor.max(1) as u64).min(LENGTH_RANGE as u64) as u8;
            }
            None => {
                if track_selected && self.mode == RecordMode::Overwrite {
                    *prev_step = NoteStep::default();
                }
            }
        }
    }

    /// Advances the step-record cursor on each note-on, wrapping
    /// within `[first, last]`, and writes the note directly into that
    /// step (spec.md §4.5 StepRecord mode).
    pub fn record_step_record(&mut self, note: u8, first: u8, last: u8, steps: &mut [NoteStep]) {
        if self.current_record_step < first || self.current_record_step > last {
            self.current_record_step = first;
        }
        let step = &mut steps[self.current_record_step as usize];
        step.note = note as i16;
        step.gate = true;
        step.gate_probability = PROBABILITY_MAX as u8;

        self.current_record_step = if self.current_record_step >= last {
            first
        } else {
            self.current_record_step + 1
        };
    }
}

impl Default for NoteRecorder {
    fn default() -> Self {
        Self::new()
    }
}

/// Capacity of the curve recorder's sample window. Input is decimated
/// to this many buckets per step regardless of `divisor`, keeping the
/// window allocation-free (spec.md §5 Memory).
const CURVE_WINDOW_CAPACITY: usize = 32;

/// CV→curve sub-recorder (spec.md §4.5).
pub struct CurveRecorder {
    samples: [f32; CURVE_WINDOW_CAPACITY],
    filled: [bool; CURVE_WINDOW_CAPACITY],
}

impl CurveRecorder {
    pub fn new() -> Self {
        Self {
            samples: [0.0; CURVE_WINDOW_CAPACITY],
            filled: [false; CURVE_WINDOW_CAPACITY],
        }
    }

    /// Accumulates one input sample at `relative_tick` within a
    /// `divisor`-length window.
    pub fn push_sample(&mut self, relative_tick: u32, divisor: u32, value: f32) {
        let bucket = ((relative_tick as u64 * CURVE_WINDOW_CAPACITY as u64) / divisor.max(1) as u64)
            .min(CURVE_WINDOW_CAPACITY as u64 - 1) as usize;
        self.samples[bucket] = value.clamp(0.0, 1.0);
        self.filled[bucket] = true;
    }

    /// Fits the best-matching shape and `[min, max]` bounds to the
    /// accumulated window and writes them into `step`, then clears the
    /// window for the next one (spec.md §4.5).
    pub fn close_window(&mut self, step: &mut CurveStep) {
        let observed: Vec<(usize, f32)> = self
            .filled
            .iter()
            .enumerate()
            .filter(|(_, f)| **f)
            .map(|(i, _)| (i, self.samples[i]))
            .collect();

        if observed.is_empty() {
            self.reset();
            return;
        }

        let min = observed.iter().map(|(_, v)| *v).fold(f32::INFINITY, f32::min);
        let max = observed.iter().map(|(_, v)| *v).fold(f32::NEG_INFINITY, f32::max);
        let span = (max - min).max(1e-6);

        let mut best_shape = 0u8;
        let mut best_error = f32::INFINITY;
        for shape in 0..shape_count() {
            let error: f32 = observed
                .iter()
                .map(|(i, v)| {
                    let t = *i as f32 / (CURVE_WINDOW_CAPACITY - 1) as f32;
                    let normalized = (v - min) / span;
                    let predicted = sample_shape(shape, t);
                    (normalized - predicted).powi(2)
                })
                .sum();
            if error < best_error {
                best_error = error;
                best_shape = shape;
            }
        }

        step.shape = best_shape;
        step.min = (min.clamp(0.0, 1.0) * 255.0) as u8;
        step.max = (max.clamp(0.0, 1.0) * 255.0) as u8;
        self.reset();
    }

    fn reset(&mut self) {
        self.filled = [false; CURVE_WINDOW_CAPACITY];
    }
}

impl Default for CurveRecorder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn note_recorder_writes_matched_note_into_prev_step() {
        let mut ring = RecordRing::new();
        ring.note_on(64, 100);
        ring.note_off(64, 110);
        let mut recorder = NoteRecorder::new();
        let mut step = NoteStep::default();
        recorder.record_step(&ring, 100, 24, true, &mut step);
        assert_eq!(step.note, 64);
        assert!(step.gate);
    }

    #[test]
    fn note_recorder_clears_step_when_overwrite_finds_nothing() {
        let ring = RecordRing::new();
        let mut recorder = NoteRecorder::new();
        let mut step = NoteStep::default();
        step.gate = true;
        recorder.record_step(&ring, 100, 24, true, &mut step);
        assert!(!step.gate);
    }

    #[test]
    fn step_record_advances_and_wraps() {
        let mut recorder = NoteRecorder::new();
        let mut steps = [NoteStep::default(); 4];
        recorder.record_step_record(10, 0, 2, &mut steps);
        recorder.record_step_record(20, 0, 2, &mut steps);
        recorder.record_step_record(30, 0, 2, &mut steps);
        recorder.record_step_record(40, 0, 2, &mut steps);
        assert_eq!(steps[1].note, 20);
        assert_eq!(steps[2].note, 30);
        assert_eq!(steps[0].note, 40); // cursor wrapped back to `first` and overwrote it
    }

    #[test]
    fn curve_recorder_fits_ramp_shape() {
        let mut recorder = CurveRecorder::new();
        for i in 0..32u32 {
            let t = i as f32 / 31.0;
            recorder.push_sample(i, 32, t);
        }
        let mut step = CurveStep::default();
        recorder.close_window(&mut step);
        assert_eq!(step.shape, 0); // Ramp
    }
}
