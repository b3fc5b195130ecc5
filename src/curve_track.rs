//! CurveTrackEngine: step machine emitting a continuously-interpolated
//! CV curve with shape variation and a 4-bit sub-step gate pattern
//! (spec.md §4.3).

use crate::link::{LinkBus, LinkData, LinkSource};
use crate::model::{CurveStep, FillMode, PatternId, Sequence, TrackId, PATTERN_COUNT};
use crate::queue::EventQueue;
use crate::rng::Rng;
use crate::sequence::{rotate_step, SequenceState};
use crate::sinks::{CvSink, GateSink, MidiOutputSink};
use crate::time::{apply_swing, is_measure_reset_boundary, Tick};

/// A shape is a function `[0,1] -> [0,1]` sampled across one step.
type ShapeFn = fn(f32) -> f32;

const SHAPES: &[ShapeFn] = &[
    |t| t,                                   // Ramp
    |t| 1.0 - t,                             // Saw
    |t| if t < 0.5 { 2.0 * t } else { 2.0 * (1.0 - t) }, // Triangle
    |t| if t < 0.5 { 0.0 } else { 1.0 },      // Square
    |t| (1.0 - (std::f32::consts::PI * t).cos()) / 2.0, // SineUp
    |t| t * t,                               // ExpUp
    |t| 1.0 - (1.0 - t) * (1.0 - t),          // ExpDown
    |_| 1.0,                                 // Hold
];

pub(crate) fn sample_shape(index: u8, t: f32) -> f32 {
    SHAPES[index as usize % SHAPES.len()](t.clamp(0.0, 1.0))
}

/// Number of predefined shape functions, for the curve recorder's
/// shape-fitting search (spec.md §4.5).
pub(crate) fn shape_count() -> u8 {
    SHAPES.len() as u8
}

#[derive(Clone, Copy, Debug)]
struct GateEdge {
    on: bool,
}

/// Step machine for one curve track (spec.md §4.3).
pub struct CurveTrackEngine {
    pub track_id: TrackId,
    patterns: [Sequence<CurveStep>; PATTERN_COUNT],
    current_pattern: PatternId,
    sequence_state: SequenceState,
    rng: Rng,

    step_start_tick: Tick,
    active_shape: u8,
    invert_active: bool,

    gate_queue: EventQueue<GateEdge>,
    gate_high: bool,
    cv_output: f32,

    pub rotate: i32,
    pub swing_amount: f32,
    pub fill: bool,
    pub fill_mode: FillMode,
    pub link: LinkSource,
}

impl CurveTrackEngine {
    pub fn new(track_id: TrackId, seed: u32) -> Self {
        Self {
            track_id,
            patterns: [Sequence::new(); PATTERN_COUNT],
            current_pattern: PatternId(0),
            sequence_state: SequenceState::new(),
            rng: Rng::new(seed),
            step_start_tick: 0,
            active_shape: 0,
            invert_active: false,
            gate_queue: EventQueue::new(),
            gate_high: false,
            cv_output: 0.0,
            rotate: 0,
            swing_amount: 0.0,
            fill: false,
            fill_mode: FillMode::Gates,
            link: LinkSource::none(),
        }
    }

    pub fn pattern(&self, id: PatternId) -> &Sequence<CurveStep> {
        &self.patterns[id.0 as usize]
    }

    pub fn pattern_mut(&mut self, id: PatternId) -> &mut Sequence<CurveStep> {
        &mut self.patterns[id.0 as usize]
    }

    pub fn change_pattern(&mut self, id: PatternId) {
        self.current_pattern = id;
    }

    pub fn reset(&mut self) {
        self.sequence_state.reset();
        self.gate_queue.clear();
        self.step_start_tick = 0;
    }

    pub fn restart(&mut self) {
        self.sequence_state.reset();
    }

    pub fn activity(&self) -> bool {
        self.gate_high
    }

    pub fn gate_output(&self) -> bool {
        self.gate_high
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
                let was_boundary = self.sequence_state.step() != data.sequence_state.step();
                self.sequence_state = data.sequence_state;
                was_boundary
            } else {
                false
            }
        } else {
            tick % seq.divisor.max(1) == 0
        };

        if is_boundary && self.link.0.is_none() {
            let absolute_step = tick / seq.divisor.max(1);
            self.sequence_state.advance_aligned(
                absolute_step,
                seq.run_mode,
                seq.first_step,
                seq.last_step,
                &mut self.rng,
            );
        }

        if is_boundary {
            self.step_start_tick = tick;
            self.evaluate_step_start(tick, &seq);
        }

        link_bus.publish(
            self.track_id,
            LinkData {
                divisor: seq.divisor,
                relative_tick: tick - self.step_start_tick,
                sequence_state: self.sequence_state,
            },
        );

        let current_step = rotate_step(
            self.sequence_state.step(),
            seq.first_step,
            seq.last_step,
            self.rotate,
        );
        if current_step >= 0 {
            let source = if self.fill && self.fill_mode == FillMode::NextPattern {
                &self.patterns[self.current_pattern.next().0 as usize]
            } else {
                &seq
            };
            let step = source.steps[current_step as usize];
            let relative = (tick - self.step_start_tick) as f32 / seq.divisor.max(1) as f32;
            let mut f = sample_shape(self.active_shape, relative);
            if self.invert_active {
                f = 1.0 - f;
            }
            let normalized = step.min_normalized() + f * (step.max_normalized() - step.min_normalized());
            self.cv_output = seq.range.denormalize(normalized);
            cv_sink.cv(tick, self.track_id.0, 0, self.cv_output);
            midi_sink.send_cv(tick, self.track_id.0, self.cv_output);
        }

        for edge in self.gate_queue.drain_due(tick) {
            self.gate_high = edge.payload.on;
            if edge.payload.on {
                gate_sink.gate_on(tick, self.track_id.0, 0);
            } else {
                gate_sink.gate_off(tick, self.track_id.0, 0);
            }
            midi_sink.send_gate(tick, self.track_id.0, edge.payload.on);
        }
    }

    /// Rolls the step's shape/invert choice and schedules its 4-bit
    /// gate pattern (spec.md §4.3), run once at the step boundary.
    fn evaluate_step_start(&mut self, step_tick: Tick, seq: &Sequence<CurveStep>) {
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

        self.invert_active = self.fill && self.fill_mode == FillMode::Invert;

        let variation_probability_passes =
            self.rng.next_bound(crate::model::PROBABILITY_RANGE as u32) as i32
                <= step.shape_variation_probability as i32;
        let use_variation = variation_probability_passes || (self.fill && self.fill_mode == FillMode::Variation);
        self.active_shape = if use_variation { step.shape_variation } else { step.shape };

        for bit in 0..4u32 {
            if step.gate & (1 << bit) == 0 {
                continue;
            }
            let sample = self.rng.next_bound(crate::model::PROBABILITY_RANGE as u32) as i32;
            if sample > step.gate_probability as i32 {
                continue;
            }
            let offset = (seq.divisor as i32 * bit as i32) / 4;
            let width = (seq.divisor as i32 / 8).max(1);
            let rising = (step_tick as i32 + offset).max(0) as Tick;
            let falling = rising + width as Tick;
            let swung_rising = apply_swing(rising, self.swing_amount);
            let swung_falling = apply_swing(falling, self.swing_amount);
            self.gate_queue.push_replace(swung_rising, GateEdge { on: true });
            self.gate_queue.push_replace(swung_falling, GateEdge { on: false });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::VoltRange;
    use crate::sinks::RecordingSink;

    #[test]
    fn ramp_shape_matches_worked_example() {
        let mut engine = CurveTrackEngine::new(TrackId(0), 1);
        {
            let seq = engine.pattern_mut(PatternId(0));
            seq.divisor = 48;
            seq.set_step_range(0, 0);
            seq.range = VoltRange::Unipolar5V;
            seq.steps[0].shape = 0; // Ramp
            seq.steps[0].min = 0;
            seq.steps[0].max = 128; // ~0.502, close enough for the worked example
            seq.steps[0].gate = 0;
        }
        let mut bus = LinkBus::new();
        let mut gate_sink = RecordingSink::default();
        let mut cv_sink = RecordingSink::default();
        let mut midi_sink = RecordingSink::default();

        for tick in 0..=24 {
            engine.tick(tick, &mut bus, &mut gate_sink, &mut cv_sink, &mut midi_sink);
        }

        assert!((engine.cv_output() - 1.25).abs() < 0.03);
    }

    #[test]
    fn gate_bit_pattern_emits_one_pulse_per_set_bit() {
        let mut engine = CurveTrackEngine::new(TrackId(0), 1);
        {
            let seq = engine.pattern_mut(PatternId(0));
            seq.divisor = 32;
            seq.set_step_range(0, 0);
            seq.steps[0].gate = 0b0101; // bits 0 and 2
            seq.steps[0].gate_probability = crate::model::PROBABILITY_MAX as u8;
        }
        let mut bus = LinkBus::new();
        let mut gate_sink = RecordingSink::default();
        let mut cv_sink = RecordingSink::default();
        let mut midi_sink = RecordingSink::default();

        for tick in 0..32 {
            engine.tick(tick, &mut bus, &mut gate_sink, &mut cv_sink, &mut midi_sink);
        }

        let rises: Vec<_> = gate_sink
            .gate_events
            .iter()
            .filter(|(_, _, _, on)| *on)
            .map(|(t, _, _, _)| *t)
            .collect();
        assert_eq!(rises, vec![0, 16]);
    }
}
