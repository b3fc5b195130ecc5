//! NoteTrackEngine: step machine emitting gate edges and note CVs with
//! probabilities, conditions, retrigger, and length/note variation
//! (spec.md §4.2). The largest single component in the engine.

use crate::link::{LinkBus, LinkData, LinkSource};
use crate::model::{
    eval_step_condition, FillMode, HeldNotes, NoteStep, PatternId, Sequence, TrackId,
    GATE_OFFSET_MAX, LENGTH_RANGE, PATTERN_COUNT, PROBABILITY_MAX, PROBABILITY_RANGE,
};
use crate::queue::EventQueue;
use crate::rng::Rng;
use crate::sequence::{rotate_step, RunMode, SequenceState};
use crate::sinks::{CvSink, GateSink, MidiOutputSink};
use crate::time::{apply_swing, is_measure_reset_boundary, Tick};

/// Whether the cursor is locked to the global tick counter or runs on
/// its own free-running counter (spec.md §4.2).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PlayMode {
    Aligned,
    Free,
}

/// Run state, distinct from `PlayMode` (spec.md §4.7).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RunState {
    Idle,
    Running,
    RecordingOverwrite,
    RecordingStep,
}

#[derive(Clone, Copy, Debug)]
struct GateEdge {
    on: bool,
}

#[derive(Clone, Copy, Debug)]
struct CvTarget {
    volts: f32,
    slide: bool,
}

/// Step machine for one note track (spec.md §4.2).
pub struct NoteTrackEngine {
    pub track_id: TrackId,
    patterns: [Sequence<NoteStep>; PATTERN_COUNT],
    current_pattern: PatternId,
    sequence_state: SequenceState,
    rng: Rng,

    pub play_mode: PlayMode,
    run_state: RunState,
    free_relative_tick: u32,

    gate_queue: EventQueue<GateEdge>,
    cv_queue: EventQueue<CvTarget>,
    prev_condition: bool,

    pub rotate: i32,
    pub gate_bias: i32,
    pub length_bias: i32,
    pub transpose: i32,
    pub octave: i32,
    pub swing_amount: f32,
    pub fill: bool,
    pub fill_mode: FillMode,
    pub mute: bool,
    pub slide_time: u8,

    pub link: LinkSource,

    gate_high: bool,
    cv_output: f32,
    cv_output_target: f32,
    slide_active: bool,

    pub monitor_step_index: Option<u8>,
    record_history: HeldNotes,
}

impl NoteTrackEngine {
    pub fn new(track_id: TrackId, seed: u32) -> Self {
        Self {
            track_id,
            patterns: [Sequence::new(); PATTERN_COUNT],
            current_pattern: PatternId(0),
            sequence_state: SequenceState::new(),
            rng: Rng::new(seed),
            play_mode: PlayMode::Aligned,
            run_state: RunState::Idle,
            free_relative_tick: 0,
            gate_queue: EventQueue::new(),
            cv_queue: EventQueue::new(),
            prev_condition: false,
            rotate: 0,
            gate_bias: 0,
            length_bias: 0,
            transpose: 0,
            octave: 0,
            swing_amount: 0.0,
            fill: false,
            fill_mode: FillMode::Gates,
            mute: false,
            slide_time: 0,
            link: LinkSource::none(),
            gate_high: false,
            cv_output: 0.0,
            cv_output_target: 0.0,
            slide_active: false,
            monitor_step_index: None,
            record_history: HeldNotes::new(),
        }
    }

    pub fn pattern(&self, id: PatternId) -> &Sequence<NoteStep> {
        &self.patterns[id.0 as usize]
    }

    pub fn pattern_mut(&mut self, id: PatternId) -> &mut Sequence<NoteStep> {
        &mut self.patterns[id.0 as usize]
    }

    pub fn current_pattern(&self) -> PatternId {
        self.current_pattern
    }

    /// Swaps the active pattern. Takes effect at the next `tick()`
    /// boundary, never mid-step (spec.md §3 Lifecycles, §8 scenario 4):
    /// the field is simply written here, and `tick()` only reads it at
    /// a step boundary.
    pub fn change_pattern(&mut self, id: PatternId) {
        self.current_pattern = id;
    }

    pub fn set_run_state(&mut self, state: RunState) {
        self.run_state = state;
    }

    pub fn run_state(&self) -> RunState {
        self.run_state
    }

    /// Full reset: rewinds the cursor, clears pending events and
    /// condition memory. Invoked at `resetMeasure` boundaries and on
    /// pattern change (spec.md §3 Lifecycles).
    pub fn reset(&mut self) {
        self.sequence_state.reset();
        self.free_relative_tick = 0;
        self.gate_queue.clear();
        self.cv_queue.clear();
        self.prev_condition = false;
    }

    /// Rewinds only the cursor, leaving queued events and condition
    /// memory untouched (spec.md §3 Lifecycles).
    pub fn restart(&mut self) {
        self.sequence_state.reset();
    }

    pub fn activity(&self) -> bool {
        self.gate_high
    }

    pub fn gate_output(&self) -> bool {
        (!self.mute || self.fill) && self.gate_high
    }

    pub fn cv_output(&self) -> f32 {
        self.cv_output
    }

    pub fn sequence_progress(&self) -> f32 {
        let seq = &self.patterns[self.current_pattern.0 as usize];
        let step = self.sequence_state.step();
        if step < 0 {
            return 0.0;
        }
        let first = seq.first_step as i32;
        let last = seq.last_step.max(seq.first_step) as i32;
        if last == first {
            return 0.0;
        }
        (step - first) as f32 / (last - first) as f32
    }

    pub fn note_on(&mut self, note: u8) {
        self.record_history.push(note);
    }

    pub fn note_off(&mut self, note: u8) {
        self.record_history.remove(note);
    }

    /// Runs one master tick: reads/publishes `LinkData`, advances the
    /// cursor at step boundaries, evaluates the new step, and drains
    /// any events now due (spec.md §2 data flow, §4.2).
    pub fn tick(
        &mut self,
        tick: Tick,
        link_bus: &mut LinkBus,
        gate_sink: &mut impl GateSink,
        cv_sink: &mut impl CvSink,
        midi_sink: &mut impl MidiOutputSink,
    ) {
        let seq = self.patterns[self.current_pattern.0 as usize];

        if is_measure_reset_boundary(tick, seq.reset_measure) {
            self.reset();
        }

        let is_boundary = if let Some(upstream) = self.link.0 {
            if let Some(data) = link_bus.read(upstream) {
                let was_boundary = self.sequence_state.step() != data.sequence_state.step()
                    || self.sequence_state.iteration() != data.sequence_state.iteration();
                self.sequence_state = data.sequence_state;
                was_boundary
            } else {
                false
            }
        } else {
            match self.play_mode {
                PlayMode::Aligned => tick % seq.divisor.max(1) == 0,
                PlayMode::Free => {
                    let boundary = self.free_relative_tick == 0;
                    self.free_relative_tick = (self.free_relative_tick + 1) % seq.divisor.max(1);
                    boundary
                }
            }
        };

        if is_boundary && self.run_state != RunState::RecordingStep && self.link.0.is_none() {
            let absolute_step = tick / seq.divisor.max(1);
            match self.play_mode {
                PlayMode::Aligned => self.sequence_state.advance_aligned(
                    absolute_step,
                    seq.run_mode,
                    seq.first_step,
                    seq.last_step,
                    &mut self.rng,
                ),
                PlayMode::Free => self.sequence_state.advance_free(
                    seq.run_mode,
                    seq.first_step,
                    seq.last_step,
                    &mut self.rng,
                ),
            }
        }

        if is_boundary {
            self.evaluate_step(tick, &seq);
        }

        link_bus.publish(
            self.track_id,
            LinkData {
                divisor: seq.divisor,
                relative_tick: self.free_relative_tick,
                sequence_state: self.sequence_state,
            },
        );

        for edge in self.gate_queue.drain_due(tick) {
            self.gate_high = edge.payload.on;
            if edge.payload.on {
                gate_sink.gate_on(tick, self.track_id.0, 0);
            } else {
                gate_sink.gate_off(tick, self.track_id.0, 0);
            }
            midi_sink.send_gate(tick, self.track_id.0, edge.payload.on);
        }
        for target in self.cv_queue.drain_due(tick) {
            self.cv_output_target = target.payload.volts;
            self.slide_active = target.payload.slide && self.slide_time > 0;
            if !self.slide_active {
                self.cv_output = self.cv_output_target;
            }
            cv_sink.cv(tick, self.track_id.0, 0, self.cv_output_target);
            midi_sink.send_cv(tick, self.track_id.0, self.cv_output_target);
            midi_sink.send_slide(tick, self.track_id.0, target.payload.slide);
        }

        self.apply_monitoring_override();
    }

    /// Slide/glide smoothing, run at UI/output rate independently of
    /// `tick()` (spec.md §4.2, §8: the convergence invariant).
    pub fn update(&mut self, dt_seconds: f32) {
        if !self.slide_active {
            return;
        }
        let time_constant_ms = (200.0 - 2.0 * self.slide_time as f32).max(1.0);
        let alpha = (dt_seconds / (time_constant_ms / 1000.0)).clamp(0.0, 1.0);
        self.cv_output += (self.cv_output_target - self.cv_output) * alpha;
        if (self.cv_output - self.cv_output_target).abs() < 1e-4 {
            self.cv_output = self.cv_output_target;
            self.slide_active = false;
        }
    }

    /// Applies the monitoring CV override used while the track is
    /// neither running nor recording (spec.md §4.2 Monitoring
    /// overrides).
    fn apply_monitoring_override(&mut self) {
        if self.run_state != RunState::Idle {
            return;
        }
        let seq = self.patterns[self.current_pattern.0 as usize];
        if let Some(index) = self.monitor_step_index {
            let step = seq.steps[index as usize];
            self.cv_output_target =
                Self::resolve_note_volts(&seq, step.note as i32, self.octave, self.transpose);
            self.cv_output = self.cv_output_target;
            return;
        }
        if let Some(note) = self.record_history.newest() {
            self.cv_output_target =
                Self::resolve_note_volts(&seq, note as i32, self.octave, self.transpose);
            self.cv_output = self.cv_output_target;
        }
    }

    /// Folds a scale-degree index through root note, octave and
    /// transpose into a clamped output voltage — the same folding
    /// `evaluate_step`'s note-CV step applies (spec.md §4.2 step 8),
    /// shared so monitoring/auditioning a step sounds identical to the
    /// pitch it plays when the sequencer actually runs it.
    fn resolve_note_volts(seq: &Sequence<NoteStep>, note: i32, octave: i32, transpose: i32) -> f32 {
        let root_contribution = if seq.scale.chromatic { seq.root_note as i32 } else { 0 };
        let note_index =
            note + root_contribution + octave * seq.scale.notes_per_octave as i32 + transpose;
        seq.range.clamp(seq.scale.note_to_volts(note_index))
    }

    fn sample_probability(&mut self) -> i32 {
        self.rng.next_bound(PROBABILITY_RANGE as u32) as i32
    }

    /// Probability-then-signed-range variation rule shared by length
    /// and note variation (spec.md §4.2 steps 5 and 8).
    fn variation_offset(&mut self, range: i32, probability: i32) -> i32 {
        let sample = self.sample_probability();
        if sample > probability {
            return 0;
        }
        let magnitude = range.abs();
        let rolled = self.rng.next_range_i32(0, magnitude);
        if range < 0 {
            -rolled
        } else {
            rolled
        }
    }

    /// Per-step evaluation pipeline (spec.md §4.2 steps 1-8).
    fn evaluate_step(&mut self, step_tick: Tick, seq: &Sequence<NoteStep>) {
        let current_step = rotate_step(
            self.sequence_state.step(),
            seq.first_step,
            seq.last_step,
            self.rotate,
        );
        if current_step < 0 {
            return;
        }

        let use_next_pattern = self.fill && self.fill_mode == FillMode::NextPattern;
        let source = if use_next_pattern {
            &self.patterns[self.current_pattern.next().0 as usize]
        } else {
            seq
        };
        let step = source.steps[current_step as usize];

        let gate_sample = self.sample_probability();
        let gate_effective = (step.gate_probability as i32 + self.gate_bias).clamp(-1, PROBABILITY_MAX);
        let gate_pass = if self.fill && self.fill_mode == FillMode::Gates {
            true
        } else {
            step.gate && gate_sample <= gate_effective
        };

        let condition_pass = eval_step_condition(
            step.condition,
            self.sequence_state.iteration(),
            self.fill,
            &mut self.prev_condition,
        );

        if !(gate_pass && condition_pass) {
            return;
        }

        let length = (step.length as i32 + self.length_bias).clamp(0, LENGTH_RANGE);
        let length_variation =
            self.variation_offset(step.length_variation_range as i32, step.length_variation_probability as i32);
        let length = (length + length_variation).clamp(0, LENGTH_RANGE);
        let length_ticks = (seq.divisor as i64 * length as i64 / LENGTH_RANGE as i64) as i32;

        let retrigger_sample = self.sample_probability();
        let count = if retrigger_sample <= step.retrigger_probability as i32 {
            step.retrigger as u32 + 1
        } else {
            1
        }
        .max(1);

        // With no retrigger active (count == 1) the pulse simply spans
        // the step's own computed length; the divisor/count subdivision
        // only kicks in once retriggering actually splits the step.
        let (pulse_period, pulse_width) = if count == 1 {
            (length_ticks, length_ticks)
        } else {
            (
                seq.divisor as i32 / count as i32,
                seq.divisor as i32 / (2 * count as i32),
            )
        };
        let gate_offset_ticks =
            (seq.divisor as i32 * step.gate_offset as i32) / (GATE_OFFSET_MAX + 1);

        let note_variation = self.variation_offset(
            step.note_variation_range as i32,
            step.note_variation_probability as i32,
        );
        let volts = Self::resolve_note_volts(
            seq,
            step.note as i32 + note_variation,
            self.octave,
            self.transpose,
        );

        let mut cv_pushed = false;
        for i in 0..count as i32 {
            let offset = i * pulse_period;
            if offset > length_ticks {
                continue;
            }
            let rising = (step_tick as i32 + offset + gate_offset_ticks).max(0) as Tick;
            let falling = rising + pulse_width.max(1) as Tick;
            let swung_rising = apply_swing(rising, self.swing_amount);
            let swung_falling = apply_swing(falling, self.swing_amount);
            self.gate_queue.push_replace(swung_rising, GateEdge { on: true });
            self.gate_queue.push_replace(swung_falling, GateEdge { on: false });
            if !cv_pushed {
                self.cv_queue.push_replace(
                    swung_rising,
                    CvTarget { volts, slide: step.slide },
                );
                cv_pushed = true;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sinks::RecordingSink;

    fn configured_engine(divisor: u32) -> NoteTrackEngine {
        let mut engine = NoteTrackEngine::new(TrackId(0), 42);
        {
            let seq = engine.pattern_mut(PatternId(0));
            seq.divisor = divisor;
            seq.set_step_range(0, 15);
            for step in seq.steps.iter_mut() {
                step.gate = true;
                step.gate_probability = PROBABILITY_MAX as u8;
                step.length = LENGTH_RANGE as u8;
            }
        }
        engine
    }

    #[test]
    fn aligned_16_step_forward_emits_rise_and_fall_every_step() {
        let mut engine = configured_engine(24);
        let mut bus = LinkBus::new();
        let mut gate_sink = RecordingSink::default();
        let mut cv_sink = RecordingSink::default();
        let mut midi_sink = RecordingSink::default();

        for tick in 0..16 * 24 {
            engine.tick(tick, &mut bus, &mut gate_sink, &mut cv_sink, &mut midi_sink);
        }

        let rises = gate_sink.gate_events.iter().filter(|(_, _, _, on)| *on).count();
        assert_eq!(rises, 16);
        assert_eq!(gate_sink.gate_events[0], (0, 0, 0, true));
    }

    #[test]
    fn condition_loop_fires_only_on_schedule() {
        let mut engine = configured_engine(24);
        {
            let seq = engine.pattern_mut(PatternId(0));
            // A single-step range so every playthrough completes a full
            // traversal: `iteration` then advances once per boundary,
            // letting `Loop(4, 0)` be checked directly against it.
            seq.set_step_range(0, 0);
            seq.steps[0].condition = crate::model::Condition::Loop(4, 0);
        }
        let mut bus = LinkBus::new();
        let mut gate_sink = RecordingSink::default();
        let mut cv_sink = RecordingSink::default();
        let mut midi_sink = RecordingSink::default();

        for tick in 0..32u32 * 24 {
            engine.tick(tick, &mut bus, &mut gate_sink, &mut cv_sink, &mut midi_sink);
        }

        let rises = gate_sink.gate_events.iter().filter(|(_, _, _, on)| *on).count();
        // iterations 0,4,8,...,28 fire: 8 rises across 32 traversals.
        assert_eq!(rises, 8);
    }

    #[test]
    fn retrigger_three_emits_three_pulses() {
        let mut engine = configured_engine(24);
        {
            let seq = engine.pattern_mut(PatternId(0));
            seq.steps[0].retrigger = 2; // count = 3
            seq.steps[0].retrigger_probability = PROBABILITY_MAX as u8;
        }
        let mut bus = LinkBus::new();
        let mut gate_sink = RecordingSink::default();
        let mut cv_sink = RecordingSink::default();
        let mut midi_sink = RecordingSink::default();

        for tick in 0..24 {
            engine.tick(tick, &mut bus, &mut gate_sink, &mut cv_sink, &mut midi_sink);
        }

        let rises: Vec<_> = gate_sink
            .gate_events
            .iter()
            .filter(|(_, _, _, on)| *on)
            .map(|(t, _, _, _)| *t)
            .collect();
        assert_eq!(rises, vec![0, 8, 16]);
    }

    #[test]
    fn pattern_switch_mid_step_takes_effect_next_boundary() {
        let mut engine = configured_engine(24);
        engine.pattern_mut(PatternId(1)).steps[0].gate = false;
        let mut bus = LinkBus::new();
        let mut gate_sink = RecordingSink::default();
        let mut cv_sink = RecordingSink::default();
        let mut midi_sink = RecordingSink::default();

        for tick in 0..20 {
            engine.tick(tick, &mut bus, &mut gate_sink, &mut cv_sink, &mut midi_sink);
        }
        engine.change_pattern(PatternId(1));
        for tick in 20..48 {
            engine.tick(tick, &mut bus, &mut gate_sink, &mut cv_sink, &mut midi_sink);
        }

        // First step already queued from pattern 0, still fires.
        assert!(gate_sink.gate_events.iter().any(|(t, _, _, on)| *t == 0 && *on));
        // Second step, read from the newly-switched pattern 1, is gated off.
        let rises_in_second_step = gate_sink
            .gate_events
            .iter()
            .filter(|(t, _, _, on)| *t >= 24 && *t < 48 && *on)
            .count();
        assert_eq!(rises_in_second_step, 0);
    }

    #[test]
    fn slide_converges_monotonically_toward_target() {
        let mut engine = configured_engine(24);
        engine.slide_time = 50;
        engine.cv_output = 0.0;
        engine.cv_output_target = 5.0;
        engine.slide_active = true;
        let mut prev_distance = (engine.cv_output - engine.cv_output_target).abs();
        for _ in 0..50 {
            engine.update(0.01);
            let distance = (engine.cv_output - engine.cv_output_target).abs();
            assert!(distance <= prev_distance + 1e-6);
            prev_distance = distance;
        }
    }

    #[test]
    fn gate_output_respects_mute_unless_filling() {
        let mut engine = configured_engine(24);
        engine.mute = true;
        let mut bus = LinkBus::new();
        let mut gate_sink = RecordingSink::default();
        let mut cv_sink = RecordingSink::default();
        let mut midi_sink = RecordingSink::default();
        engine.tick(0, &mut bus, &mut gate_sink, &mut cv_sink, &mut midi_sink);
        assert!(!engine.gate_output());
        engine.fill = true;
        assert!(engine.gate_output());
    }
}
