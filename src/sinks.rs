//! Output seams a track engine drives on each tick: gate, CV, and MIDI.
//!
//! Real hardware wires these to GPIO/DAC writes and a MIDI UART; tests
//! wire them to [`RecordingSink`] instead. Keeping the seam as a trait
//! rather than a concrete struct is what lets `tick()` stay allocation-
//! and I/O-free (spec.md §5 Memory, §7).

use crate::time::Tick;

/// Receives gate on/off edges for one track's voice. `voice` is always
/// `0` for `NoteTrackEngine`/`CurveTrackEngine` (one physical output
/// each) and the voice index for a polyphonic `MidiCvTrackEngine`, so
/// distinct voices never collide onto the same output (spec.md §4.4,
/// §6: `gateOutput(voiceIndex)`).
pub trait GateSink {
    fn gate_on(&mut self, tick: Tick, output: u8, voice: u8);
    fn gate_off(&mut self, tick: Tick, output: u8, voice: u8);
}

/// Receives a continuous (CV) value update for one track's voice (see
/// `GateSink` for the `voice` convention).
pub trait CvSink {
    fn cv(&mut self, tick: Tick, output: u8, voice: u8, volts: f32);
}

/// Receives MIDI traffic mirrored from a track (spec.md §4.4, §6).
///
/// Two distinct uses share this one seam: every `NoteTrackEngine` and
/// `CurveTrackEngine` mirrors its gate/CV/slide state through
/// `send_gate`/`send_cv`/`send_slide` (spec.md §6: "Sinks consumed:
/// midiOutputSink.sendGate(trackIndex, bool), sendCv(trackIndex,
/// volts), sendSlide(trackIndex, bool)"), while a `MidiCvTrackEngine`'s
/// arpeggiator additionally emits real note events through
/// `note_on`/`note_off` when it plays a held note (spec.md §4.4).
pub trait MidiOutputSink {
    fn send_gate(&mut self, tick: Tick, track_index: u8, high: bool);
    fn send_cv(&mut self, tick: Tick, track_index: u8, volts: f32);
    fn send_slide(&mut self, tick: Tick, track_index: u8, slide: bool);

    fn note_on(&mut self, tick: Tick, channel: u8, note: u8, velocity: u8);
    fn note_off(&mut self, tick: Tick, channel: u8, note: u8);
    fn pitch_bend(&mut self, tick: Tick, channel: u8, bend: i16);
    fn control_change(&mut self, tick: Tick, channel: u8, controller: u8, value: u8);
}

/// Discards everything written to it. Used where a track has no
/// attached output of one of the three kinds (e.g. a `CurveTrack`
/// implements `GateSink` fan-out only, never MIDI).
#[derive(Default)]
pub struct NullSink;

impl GateSink for NullSink {
    fn gate_on(&mut self, _tick: Tick, _output: u8, _voice: u8) {}
    fn gate_off(&mut self, _tick: Tick, _output: u8, _voice: u8) {}
}

impl CvSink for NullSink {
    fn cv(&mut self, _tick: Tick, _output: u8, _voice: u8, _volts: f32) {}
}

impl MidiOutputSink for NullSink {
    fn send_gate(&mut self, _tick: Tick, _track_index: u8, _high: bool) {}
    fn send_cv(&mut self, _tick: Tick, _track_index: u8, _volts: f32) {}
    fn send_slide(&mut self, _tick: Tick, _track_index: u8, _slide: bool) {}
    fn note_on(&mut self, _tick: Tick, _channel: u8, _note: u8, _velocity: u8) {}
    fn note_off(&mut self, _tick: Tick, _channel: u8, _note: u8) {}
    fn pitch_bend(&mut self, _tick: Tick, _channel: u8, _bend: i16) {}
    fn control_change(&mut self, _tick: Tick, _channel: u8, _controller: u8, _value: u8) {}
}

/// Test double that records every call for later assertion. `GateSink`/
/// `CvSink` calls carry a real voice index; `MidiOutputSink`'s mirror
/// methods have no voice concept of their own and record `0`.
#[derive(Default, Debug)]
pub struct RecordingSink {
    pub gate_events: Vec<(Tick, u8, u8, bool)>,
    pub cv_events: Vec<(Tick, u8, u8, f32)>,
    pub slide_events: Vec<(Tick, u8, bool)>,
    pub midi_events: Vec<MidiEvent>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MidiEvent {
    NoteOn { tick: Tick, channel: u8, note: u8, velocity: u8 },
    NoteOff { tick: Tick, channel: u8, note: u8 },
    PitchBend { tick: Tick, channel: u8, bend: i16 },
    ControlChange { tick: Tick, channel: u8, controller: u8, value: u8 },
}

impl GateSink for RecordingSink {
    fn gate_on(&mut self, tick: Tick, output: u8, voice: u8) {
        self.gate_events.push((tick, output, voice, true));
    }

    fn gate_off(&mut self, tick: Tick, output: u8, voice: u8) {
        self.gate_events.push((tick, output, voice, false));
    }
}

impl CvSink for RecordingSink {
    fn cv(&mut self, tick: Tick, output: u8, voice: u8, volts: f32) {
        self.cv_events.push((tick, output, voice, volts));
    }
}

impl MidiOutputSink for RecordingSink {
    fn send_gate(&mut self, tick: Tick, track_index: u8, high: bool) {
        self.gate_events.push((tick, track_index, 0, high));
    }

    fn send_cv(&mut self, tick: Tick, track_index: u8, volts: f32) {
        self.cv_events.push((tick, track_index, 0, volts));
    }

    fn send_slide(&mut self, tick: Tick, track_index: u8, slide: bool) {
        self.slide_events.push((tick, track_index, slide));
    }

    fn note_on(&mut self, tick: Tick, channel: u8, note: u8, velocity: u8) {
        self.midi_events.push(MidiEvent::NoteOn { tick, channel, note, velocity });
    }

    fn note_off(&mut self, tick: Tick, channel: u8, note: u8) {
        self.midi_events.push(MidiEvent::NoteOff { tick, channel, note });
    }

    fn pitch_bend(&mut self, tick: Tick, channel: u8, bend: i16) {
        self.midi_events.push(MidiEvent::PitchBend { tick, channel, bend });
    }

    fn control_change(&mut self, tick: Tick, channel: u8, controller: u8, value: u8) {
        self.midi_events.push(MidiEvent::ControlChange { tick, channel, controller, value });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recording_sink_preserves_call_order() {
        let mut sink = RecordingSink::default();
        sink.gate_on(0, 0, 0);
        sink.gate_off(12, 0, 0);
        sink.cv(0, 0, 0, 2.5);
        assert_eq!(sink.gate_events, vec![(0, 0, 0, true), (12, 0, 0, false)]);
        assert_eq!(sink.cv_events, vec![(0, 0, 0, 2.5)]);
    }
}
