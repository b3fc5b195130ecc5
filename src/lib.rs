// =============================================================================
// Sequencer Engine
// =============================================================================
//
// Real-time track-sequencing engine for a hardware step-sequencer
// instrument: per-track state machines, probabilistic step evaluation,
// bounded gate/CV event queues, and MIDI mirroring. Single-threaded,
// cooperative, tick-driven; no allocation and no blocking I/O on the
// tick path.
//
// ## Module organization
//
// - `time` - tick type, clock/groove conversion, swing
// - `rng` - deterministic per-engine pseudo-random source
// - `scale` - note-index-to-volts mapping
// - `sequence` - per-track position cursor and run-mode policies
// - `queue` - bounded time-ordered event queue
// - `model` - steps, sequences, patterns, and track configuration
// - `sinks` - gate/CV/MIDI output seams
// - `link` - LinkData bus for track-to-track cursor mirroring
// - `note_track`, `curve_track`, `midi_cv_track` - the three track engines
// - `recorder` - live MIDI-to-step and CV-to-curve recording
// - `engine` - top-level dispatch across tracks
// - `serialize` - versioned binary settings/project persistence
// - `error` - the engine's one fallible surface (decoding)

pub mod curve_track;
pub mod engine;
pub mod error;
pub mod link;
pub mod midi_cv_track;
pub mod model;
pub mod note_track;
pub mod queue;
pub mod recorder;
pub mod rng;
pub mod scale;
pub mod sequence;
pub mod serialize;
pub mod sinks;
pub mod time;

pub use engine::{Engine, TrackEngine};
pub use error::EngineError;
pub use model::{
    Condition, CurveStep, FillMode, MidiCvTrackConfig, NoteStep, NotePriority, PatternId,
    Sequence, TrackId, VoiceConfig, VoltRange, PATTERN_COUNT, STEP_COUNT,
};
pub use sequence::{RunMode, SequenceState};
pub use time::{Tick, MASTER_PPQN, SEQ_PPQN};
