//! Top-level engine: owns every track, the shared `LinkData` bus, and
//! dispatches `tick()`/`update()` across tracks in index order
//! (spec.md §2 data flow, §5 Ordering guarantees, §9 Design Notes).

use crate::curve_track::CurveTrackEngine;
use crate::link::{LinkBus, LinkData};
use crate::midi_cv_track::MidiCvTrackEngine;
use crate::model::{PatternId, TrackId};
use crate::note_track::NoteTrackEngine;
use crate::sinks::{CvSink, GateSink, MidiOutputSink};
use crate::time::Tick;

/// Tagged-variant polymorphism over the three track kinds, rather than
/// trait-object inheritance (spec.md §9 Design Notes: "avoid deep
/// inheritance").
pub enum TrackEngine {
    Note(NoteTrackEngine),
    Curve(CurveTrackEngine),
    MidiCv(MidiCvTrackEngine),
}

impl TrackEngine {
    pub fn track_id(&self) -> Option<TrackId> {
        match self {
            TrackEngine::Note(e) => Some(e.track_id),
            TrackEngine::Curve(e) => Some(e.track_id),
            TrackEngine::MidiCv(_) => None,
        }
    }

    pub fn reset(&mut self) {
        match self {
            TrackEngine::Note(e) => e.reset(),
            TrackEngine::Curve(e) => e.reset(),
            TrackEngine::MidiCv(_) => {}
        }
    }

    pub fn restart(&mut self) {
        match self {
            TrackEngine::Note(e) => e.restart(),
            TrackEngine::Curve(e) => e.restart(),
            TrackEngine::MidiCv(_) => {}
        }
    }

    pub fn change_pattern(&mut self, id: PatternId) {
        match self {
            TrackEngine::Note(e) => e.change_pattern(id),
            TrackEngine::Curve(e) => e.change_pattern(id),
            TrackEngine::MidiCv(_) => {}
        }
    }

    pub fn activity(&self) -> bool {
        match self {
            TrackEngine::Note(e) => e.activity(),
            TrackEngine::Curve(e) => e.activity(),
            TrackEngine::MidiCv(e) => e.activity(),
        }
    }

    /// Gate state of one voice. `Note`/`Curve` tracks have a single
    /// physical output and ignore `voice`; a polyphonic `MidiCv` track
    /// reports that specific voice (spec.md §4.4, §6:
    /// `gateOutput(voiceIndex)`).
    pub fn gate_output(&self, voice: usize) -> bool {
        match self {
            TrackEngine::Note(e) => e.gate_output(),
            TrackEngine::Curve(e) => e.gate_output(),
            TrackEngine::MidiCv(e) => e.gate_output(voice),
        }
    }

    /// CV output of one voice (see `gate_output` for the `voice`
    /// convention).
    pub fn cv_output(&self, voice: usize) -> f32 {
        match self {
            TrackEngine::Note(e) => e.cv_output(),
            TrackEngine::Curve(e) => e.cv_output(),
            TrackEngine::MidiCv(e) => e.cv_output(voice),
        }
    }

    pub fn sequence_progress(&self) -> f32 {
        match self {
            TrackEngine::Note(e) => e.sequence_progress(),
            TrackEngine::Curve(e) => e.sequence_progress(),
            TrackEngine::MidiCv(_) => 0.0,
        }
    }

    pub fn update(&mut self, dt_seconds: f32) {
        if let TrackEngine::Note(e) = self {
            e.update(dt_seconds);
        }
    }
}

/// Maximum tracks the engine wires up. Generous for a groovebox-class
/// instrument while keeping `LinkBus`'s fixed table adequately sized.
pub const MAX_TRACKS: usize = 16;

/// Owns every track and runs the per-tick dispatch (spec.md §2, §5).
pub struct Engine {
    tracks: Vec<TrackEngine>,
    link_bus: LinkBus,
    tick: Tick,
}

impl Engine {
    pub fn new() -> Self {
        Self {
            tracks: Vec::with_capacity(MAX_TRACKS),
            link_bus: LinkBus::new(),
            tick: 0,
        }
    }

    pub fn add_track(&mut self, track: TrackEngine) -> usize {
        let index = self.tracks.len();
        self.tracks.push(track);
        index
    }

    pub fn track(&self, index: usize) -> &TrackEngine {
        &self.tracks[index]
    }

    pub fn track_mut(&mut self, index: usize) -> &mut TrackEngine {
        &mut self.tracks[index]
    }

    pub fn current_tick(&self) -> Tick {
        self.tick
    }

    /// Reads a track's most recently published `LinkData`, for
    /// inspection/debugging rather than the mirroring path itself
    /// (which reads the bus internally during `tick()`).
    pub fn link_data(&self, track: TrackId) -> Option<LinkData> {
        self.link_bus.read(track)
    }

    /// Advances every track by one master tick, in track index order
    /// (spec.md §5: "Across tracks with identical tick, order follows
    /// track index"). `LinkData` publication happens inside each
    /// track's own `tick()`, so a follower reads its leader's fresh
    /// publication only if the leader appears earlier in `tracks`.
    pub fn tick(
        &mut self,
        tick: Tick,
        gate_sinks: &mut [&mut dyn GateSink],
        cv_sinks: &mut [&mut dyn CvSink],
        midi_sink: &mut dyn MidiOutputSink,
    ) {
        self.tick = tick;
        for (index, track) in self.tracks.iter_mut().enumerate() {
            let gate_sink = &mut *gate_sinks[index];
            let cv_sink = &mut *cv_sinks[index];
            match track {
                TrackEngine::Note(e) => {
                    e.tick(tick, &mut self.link_bus, gate_sink, cv_sink, midi_sink)
                }
                TrackEngine::Curve(e) => {
                    e.tick(tick, &mut self.link_bus, gate_sink, cv_sink, midi_sink)
                }
                TrackEngine::MidiCv(e) => {
                    e.tick(tick, index as u8, gate_sink, cv_sink, midi_sink)
                }
            }
        }
    }

    /// Runs slide/glide smoothing at UI/output rate (spec.md §6).
    pub fn update(&mut self, dt_seconds: f32) {
        for track in &mut self.tracks {
            track.update(dt_seconds);
        }
    }
}

impl Default for Engine {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::MidiCvTrackConfig;
    use crate::sinks::{NullSink, RecordingSink};

    #[test]
    fn tick_dispatches_to_every_track_in_order() {
        let mut engine = Engine::new();
        engine.add_track(TrackEngine::Note(NoteTrackEngine::new(TrackId(0), 1)));
        engine.add_track(TrackEngine::Curve(CurveTrackEngine::new(TrackId(1), 2)));
        engine.add_track(TrackEngine::MidiCv(MidiCvTrackEngine::new(
            MidiCvTrackConfig::default(),
        )));

        let mut note_gate = NullSink;
        let mut curve_gate = NullSink;
        let mut midi_gate = NullSink;
        let mut note_cv = NullSink;
        let mut curve_cv = NullSink;
        let mut midi_cv = NullSink;
        let mut midi_sink = RecordingSink::default();

        let mut gate_sinks: Vec<&mut dyn GateSink> =
            vec![&mut note_gate, &mut curve_gate, &mut midi_gate];
        let mut cv_sinks: Vec<&mut dyn CvSink> = vec![&mut note_cv, &mut curve_cv, &mut midi_cv];

        engine.tick(0, &mut gate_sinks, &mut cv_sinks, &mut midi_sink);
        assert_eq!(engine.current_tick(), 0);
    }
}
