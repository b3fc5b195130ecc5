//! MidiCvTrackEngine: polyphonic MIDI-to-CV/gate voice allocator with
//! note-priority stealing, pitch bend, and an embedded arpeggiator
//! (spec.md §4.4).

use crate::model::{MidiCvTrackConfig, NotePriority, VoiceConfig};
use crate::sinks::{CvSink, GateSink, MidiOutputSink};
use crate::time::Tick;

/// One held-note-to-output binding.
#[derive(Clone, Copy, Debug)]
struct Voice {
    note: Option<u8>,
    gate_high: bool,
    cv: f32,
    velocity: u8,
    pressure: u8,
    /// Allocation order stamp, for picking the least-recently-triggered
    /// voice to steal (spec.md §4.4: `Last`'s "least-recently-stolen
    /// voice"); set from `MidiCvTrackEngine::next_alloc_order` on every
    /// `bind_voice` call.
    alloc_order: u32,
    /// Ticks remaining before this voice's gate rises again after a
    /// retrigger-forced low edge (spec.md §4.4: "`retrigger = true`
    /// forces a gate-low edge between consecutive notes"). `0` means no
    /// retrigger is pending.
    retrigger_delay: u8,
}

impl Voice {
    const fn empty() -> Self {
        Self {
            note: None,
            gate_high: false,
            cv: 0.0,
            velocity: 0,
            pressure: 0,
            alloc_order: 0,
            retrigger_delay: 0,
        }
    }
}

const MAX_VOICES: usize = 8;

/// MIDI CC numbers used to mirror per-voice velocity/pressure as
/// continuous-controller output, gated on `voiceConfig` (spec.md §4.4:
/// "per voiceConfig, optionally Velocity and Pressure").
const VELOCITY_CC: u8 = 7;
const PRESSURE_CC: u8 = 74;

/// Traversal policy the embedded arpeggiator applies to held notes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ArpMode {
    Up,
    Down,
    UpDown,
}

/// Embedded arpeggiator (spec.md §4.4: "intercepts held notes and
/// produces a sequence of scheduled note events into the same voice
/// pipeline").
#[derive(Clone, Copy, Debug)]
pub struct Arpeggiator {
    pub enabled: bool,
    pub mode: ArpMode,
    /// Ticks between successive arpeggiated notes.
    pub rate_ticks: u32,
    cursor: usize,
    direction_up: bool,
    last_tick: Tick,
}

impl Arpeggiator {
    pub fn new() -> Self {
        Self {
            enabled: false,
            mode: ArpMode::Up,
            rate_ticks: 6,
            cursor: 0,
            direction_up: true,
            last_tick: 0,
        }
    }

    /// Picks the note to sound this tick, if the arpeggiator's rate
    /// boundary has arrived.
    fn advance(&mut self, tick: Tick, held: &[u8]) -> Option<u8> {
        if held.is_empty() {
            self.cursor = 0;
            return None;
        }
        if tick.wrapping_sub(self.last_tick) < self.rate_ticks && tick != 0 {
            return None;
        }
        self.last_tick = tick;

        if self.cursor >= held.len() {
            self.cursor = 0;
        }
        let note = match self.mode {
            ArpMode::Up => {
                let n = held[self.cursor % held.len()];
                self.cursor += 1;
                n
            }
            ArpMode::Down => {
                let idx = held.len() - 1 - (self.cursor % held.len());
                self.cursor += 1;
                held[idx]
            }
            ArpMode::UpDown => {
                let len = held.len();
                if len == 1 {
                    held[0]
                } else {
                    let period = 2 * (len - 1);
                    let phase = self.cursor % period;
                    let idx = if phase < len { phase } else { period - phase };
                    self.cursor += 1;
                    held[idx]
                }
            }
        };
        Some(note)
    }
}

impl Default for Arpeggiator {
    fn default() -> Self {
        Self::new()
    }
}

/// Polyphonic MIDI-to-CV/gate engine (spec.md §4.4).
pub struct MidiCvTrackEngine {
    pub config: MidiCvTrackConfig,
    pub arpeggiator: Arpeggiator,
    voices: [Voice; MAX_VOICES],
    /// Held notes in press order, used by the `Last`/`First` priority
    /// policies (`Lowest`/`Highest` re-sort on demand).
    held_order: Vec<u8>,
    pitch_bend: i16,
    /// Monotonic counter stamped onto a voice's `alloc_order` on every
    /// bind, so stealing can find the least-recently-triggered voice.
    next_alloc_order: u32,
}

impl MidiCvTrackEngine {
    pub fn new(config: MidiCvTrackConfig) -> Self {
        Self {
            config,
            arpeggiator: Arpeggiator::new(),
            voices: [Voice::empty(); MAX_VOICES],
            held_order: Vec::with_capacity(MAX_VOICES),
            pitch_bend: 0,
            next_alloc_order: 0,
        }
    }

    fn voices_in_use(&self) -> usize {
        self.config.voices as usize
    }

    /// Filters, then allocates a voice for, a MIDI note-on
    /// (spec.md §4.4).
    pub fn note_on(&mut self, note: u8, velocity: u8) {
        if note < self.config.low_note || note > self.config.high_note {
            return;
        }
        self.held_order.retain(|&n| n != note);
        self.held_order.push(note);
        self.allocate(note, velocity);
    }

    pub fn note_off(&mut self, note: u8) {
        self.held_order.retain(|&n| n != note);
        for i in 0..self.voices_in_use() {
            if self.voices[i].note == Some(note) {
                if let Some(replacement) = self.next_replacement_note(i) {
                    self.bind_voice(i, replacement, self.voices[i].velocity);
                } else {
                    self.voices[i].note = None;
                    self.voices[i].gate_high = false;
                }
            }
        }
    }

    /// Which still-held note (if any) should take over a voice that
    /// just released, per `notePriority` (spec.md §8 scenario 5).
    fn next_replacement_note(&self, _voice: usize) -> Option<u8> {
        if self.held_order.is_empty() {
            return None;
        }
        match self.config.note_priority {
            NotePriority::Last | NotePriority::First => self.held_order.last().copied(),
            NotePriority::Lowest => self.held_order.iter().copied().min(),
            NotePriority::Highest => self.held_order.iter().copied().max(),
        }
    }

    fn bind_voice(&mut self, voice: usize, note: u8, velocity: u8) {
        let retrigger = self.config.retrigger && self.voices[voice].note.is_some();
        self.next_alloc_order = self.next_alloc_order.wrapping_add(1);
        self.voices[voice].note = Some(note);
        self.voices[voice].velocity = velocity;
        self.voices[voice].cv = self.note_to_volts(note);
        self.voices[voice].alloc_order = self.next_alloc_order;
        if retrigger {
            // Force one tick of gate-low; `tick()` raises it again once
            // `retrigger_delay` counts down to zero, producing a real
            // falling-then-rising edge between the two notes instead of
            // a same-tick overwrite that never reaches an output.
            self.voices[voice].gate_high = false;
            self.voices[voice].retrigger_delay = 1;
        } else {
            self.voices[voice].gate_high = true;
            self.voices[voice].retrigger_delay = 0;
        }
    }

    fn note_to_volts(&self, note: u8) -> f32 {
        self.config.modulation_range.clamp((note as i32 - 60) as f32 / 12.0)
    }

    /// Allocates `note` to a voice following `notePriority`
    /// (spec.md §4.4).
    fn allocate(&mut self, note: u8, velocity: u8) {
        let n = self.voices_in_use();
        if let Some(free) = (0..n).find(|&i| self.voices[i].note.is_none()) {
            self.bind_voice(free, note, velocity);
            return;
        }

        match self.config.note_priority {
            NotePriority::Last | NotePriority::First => {
                // Both policies steal once every voice is busy, always
                // picking the least-recently-triggered (oldest-bound)
                // voice rather than comparing pitch (spec.md §4.4:
                // `Last` — "least-recently-stolen voice"; `First` —
                // "new notes steal only when all voices are busy").
                let target = (0..n).min_by_key(|&i| self.voices[i].alloc_order).unwrap_or(0);
                self.bind_voice(target, note, velocity);
            }
            NotePriority::Lowest | NotePriority::Highest => {
                let should_bind = match self.config.note_priority {
                    NotePriority::Lowest => self.voices[..n]
                        .iter()
                        .any(|v| v.note.map(|held| note < held).unwrap_or(false)),
                    NotePriority::Highest => self.voices[..n]
                        .iter()
                        .any(|v| v.note.map(|held| note > held).unwrap_or(false)),
                    _ => unreachable!(),
                };
                if should_bind {
                    let target = match self.config.note_priority {
                        NotePriority::Lowest => {
                            (0..n).max_by_key(|&i| self.voices[i].note.unwrap_or(0)).unwrap()
                        }
                        NotePriority::Highest => {
                            (0..n).min_by_key(|&i| self.voices[i].note.unwrap_or(u8::MAX)).unwrap()
                        }
                        _ => unreachable!(),
                    };
                    self.bind_voice(target, note, velocity);
                }
            }
        }
    }

    pub fn set_pitch_bend(&mut self, bend: i16) {
        self.pitch_bend = if self.config.pitch_bend_range == 0 { 0 } else { bend };
    }

    /// Applies channel (not per-note) pressure to every active voice.
    /// Feeds `pressure_output` for `voiceConfig == PitchVelocityPressure`
    /// tracks (spec.md §3, §4.4).
    pub fn channel_pressure(&mut self, pressure: u8) {
        for voice in self.voices[..self.voices_in_use()].iter_mut() {
            voice.pressure = pressure;
        }
    }

    /// Last note-on velocity bound to this voice, `0` if idle.
    pub fn velocity_output(&self, voice: usize) -> u8 {
        self.voices.get(voice).map(|v| v.velocity).unwrap_or(0)
    }

    /// Current channel pressure applied to this voice, `0` if idle.
    pub fn pressure_output(&self, voice: usize) -> u8 {
        self.voices.get(voice).map(|v| v.pressure).unwrap_or(0)
    }

    pub fn gate_output(&self, voice: usize) -> bool {
        self.voices.get(voice).map(|v| v.gate_high).unwrap_or(false)
    }

    pub fn cv_output(&self, voice: usize) -> f32 {
        let Some(v) = self.voices.get(voice) else {
            return 0.0;
        };
        let bend_semitones = if self.config.pitch_bend_range > 0 {
            (self.pitch_bend as f32 / i16::MAX as f32) * self.config.pitch_bend_range as f32
        } else {
            0.0
        };
        v.cv + bend_semitones / 12.0
    }

    pub fn activity(&self) -> bool {
        self.voices[..self.voices_in_use()].iter().any(|v| v.gate_high)
    }

    /// Runs one master tick: only active work is the arpeggiator, when
    /// enabled, picking the next held note to sound.
    pub fn tick(
        &mut self,
        tick: Tick,
        track_index: u8,
        gate_sink: &mut impl GateSink,
        cv_sink: &mut impl CvSink,
        midi_sink: &mut impl MidiOutputSink,
    ) {
        if self.arpeggiator.enabled {
            let held = self.held_order.clone();
            if let Some(note) = self.arpeggiator.advance(tick, &held) {
                self.bind_voice(0, note, 100);
                midi_sink.note_on(tick, track_index, note, 100);
            }
        }

        for i in 0..self.voices_in_use() {
            if self.voices[i].gate_high {
                gate_sink.gate_on(tick, track_index, i as u8);
            } else {
                gate_sink.gate_off(tick, track_index, i as u8);
            }
            cv_sink.cv(tick, track_index, i as u8, self.cv_output(i));

            match self.config.voice_config {
                VoiceConfig::Pitch => {}
                VoiceConfig::PitchVelocity => {
                    midi_sink.control_change(tick, track_index, VELOCITY_CC, self.voices[i].velocity);
                }
                VoiceConfig::PitchVelocityPressure => {
                    midi_sink.control_change(tick, track_index, VELOCITY_CC, self.voices[i].velocity);
                    midi_sink.control_change(tick, track_index, PRESSURE_CC, self.voices[i].pressure);
                }
            }

            if self.voices[i].retrigger_delay > 0 {
                self.voices[i].retrigger_delay -= 1;
                if self.voices[i].retrigger_delay == 0 {
                    self.voices[i].gate_high = true;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sinks::RecordingSink;

    #[test]
    fn lowest_priority_keeps_remaining_note_after_release() {
        let mut config = MidiCvTrackConfig::default();
        config.note_priority = NotePriority::Lowest;
        config.voices = 1;
        let mut engine = MidiCvTrackEngine::new(config);

        engine.note_on(60, 100); // C3
        assert_eq!(engine.voices[0].note, Some(60));
        engine.note_on(64, 100); // E3, higher than held C3, lowest priority ignores it
        assert_eq!(engine.voices[0].note, Some(60));

        engine.note_off(60);
        assert_eq!(engine.voices[0].note, Some(64));
    }

    #[test]
    fn notes_outside_range_are_filtered() {
        let mut config = MidiCvTrackConfig::default();
        config.set_low_note(48);
        config.set_high_note(72);
        let mut engine = MidiCvTrackEngine::new(config);
        engine.note_on(20, 100);
        assert!(engine.voices[0].note.is_none());
    }

    #[test]
    fn last_priority_steals_voice_when_all_busy() {
        let mut config = MidiCvTrackConfig::default();
        config.note_priority = NotePriority::Last;
        config.voices = 1;
        let mut engine = MidiCvTrackEngine::new(config);
        engine.note_on(60, 100);
        engine.note_on(67, 100);
        assert_eq!(engine.voices[0].note, Some(67));
    }

    #[test]
    fn tick_drives_gate_and_cv_sinks() {
        let config = MidiCvTrackConfig::default();
        let mut engine = MidiCvTrackEngine::new(config);
        engine.note_on(60, 100);
        let mut gate_sink = RecordingSink::default();
        let mut cv_sink = RecordingSink::default();
        let mut midi_sink = RecordingSink::default();
        engine.tick(0, 2, &mut gate_sink, &mut cv_sink, &mut midi_sink);
        assert_eq!(gate_sink.gate_events, vec![(0, 2, 0, true)]);
        assert_eq!(cv_sink.cv_events.len(), 1);
    }

    #[test]
    fn first_priority_steals_oldest_voice_when_all_busy() {
        let mut config = MidiCvTrackConfig::default();
        config.note_priority = NotePriority::First;
        config.voices = 1;
        let mut engine = MidiCvTrackEngine::new(config);
        engine.note_on(60, 100);
        engine.note_on(67, 100); // all voices busy: steals the only (oldest) voice
        assert_eq!(engine.voices[0].note, Some(67));
    }

    #[test]
    fn multiple_voices_report_distinct_gate_and_cv_output() {
        let mut config = MidiCvTrackConfig::default();
        config.voices = 2;
        let mut engine = MidiCvTrackEngine::new(config);
        engine.note_on(60, 100);
        engine.note_on(64, 100);
        let mut gate_sink = RecordingSink::default();
        let mut cv_sink = RecordingSink::default();
        let mut midi_sink = RecordingSink::default();
        engine.tick(0, 5, &mut gate_sink, &mut cv_sink, &mut midi_sink);

        assert_eq!(gate_sink.gate_events, vec![(0, 5, 0, true), (0, 5, 1, true)]);
        let voice_indices: Vec<_> = cv_sink.cv_events.iter().map(|(_, _, voice, _)| *voice).collect();
        assert_eq!(voice_indices, vec![0, 1]);
        assert!(cv_sink.cv_events[0].3 < cv_sink.cv_events[1].3);
    }

    #[test]
    fn retrigger_forces_a_gate_low_edge_between_notes_on_same_voice() {
        let mut config = MidiCvTrackConfig::default();
        config.voices = 1;
        config.retrigger = true;
        let mut engine = MidiCvTrackEngine::new(config);
        let mut gate_sink = RecordingSink::default();
        let mut cv_sink = RecordingSink::default();
        let mut midi_sink = RecordingSink::default();

        engine.note_on(60, 100);
        engine.tick(0, 0, &mut gate_sink, &mut cv_sink, &mut midi_sink);
        engine.note_on(64, 100); // same voice, retrigger forces a low edge
        engine.tick(1, 0, &mut gate_sink, &mut cv_sink, &mut midi_sink);
        engine.tick(2, 0, &mut gate_sink, &mut cv_sink, &mut midi_sink);

        let states: Vec<_> = gate_sink.gate_events.iter().map(|(_, _, _, on)| *on).collect();
        assert_eq!(states, vec![true, false, true]);
    }

    #[test]
    fn no_retrigger_keeps_gate_continuously_high_across_notes() {
        let mut config = MidiCvTrackConfig::default();
        config.voices = 1;
        config.retrigger = false;
        let mut engine = MidiCvTrackEngine::new(config);
        let mut gate_sink = RecordingSink::default();
        let mut cv_sink = RecordingSink::default();
        let mut midi_sink = RecordingSink::default();

        engine.note_on(60, 100);
        engine.tick(0, 0, &mut gate_sink, &mut cv_sink, &mut midi_sink);
        engine.note_on(64, 100);
        engine.tick(1, 0, &mut gate_sink, &mut cv_sink, &mut midi_sink);

        assert!(gate_sink.gate_events.iter().all(|(_, _, _, on)| *on));
    }

    #[test]
    fn velocity_and_pressure_mirror_only_when_configured() {
        let mut config = MidiCvTrackConfig::default();
        config.voice_config = VoiceConfig::PitchVelocityPressure;
        let mut engine = MidiCvTrackEngine::new(config);
        engine.note_on(60, 90);
        engine.channel_pressure(42);
        assert_eq!(engine.velocity_output(0), 90);
        assert_eq!(engine.pressure_output(0), 42);

        let mut gate_sink = RecordingSink::default();
        let mut cv_sink = RecordingSink::default();
        let mut midi_sink = RecordingSink::default();
        engine.tick(0, 1, &mut gate_sink, &mut cv_sink, &mut midi_sink);

        assert!(midi_sink.midi_events.iter().any(|e| matches!(
            e,
            crate::sinks::MidiEvent::ControlChange { controller: VELOCITY_CC, value: 90, .. }
        )));
        assert!(midi_sink.midi_events.iter().any(|e| matches!(
            e,
            crate::sinks::MidiEvent::ControlChange { controller: PRESSURE_CC, value: 42, .. }
        )));
    }
}
