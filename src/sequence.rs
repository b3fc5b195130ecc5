//! Per-track position cursor: advances through a step range under a
//! run-mode policy (spec.md §4.1).

use crate::rng::Rng;
use serde::{Deserialize, Serialize};

/// Policy by which a cursor traverses `[first, last]`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunMode {
    Forward,
    Backward,
    PingPong,
    PingPongRepeat,
    Random,
    RandomWalk,
}

/// Direction bookkeeping for the ping-pong family of run modes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum PingPongDirection {
    Forward,
    Backward,
}

/// Per-track position cursor.
///
/// `step == -1` means no step has yet been played since the last
/// reset (spec.md §3 invariant). `iteration` counts completed forward
/// traversals of the range and feeds `Condition::Loop` (spec.md §4.2).
#[derive(Clone, Copy, Debug)]
pub struct SequenceState {
    step: i32,
    prev_step: i32,
    iteration: u32,
    direction: PingPongDirection,
    /// Marks the one extra repeat `PingPongRepeat` plays at an
    /// endpoint before reversing.
    repeated_endpoint: bool,
}

impl SequenceState {
    pub fn new() -> Self {
        Self {
            step: -1,
            prev_step: -1,
            iteration: 0,
            direction: PingPongDirection::Forward,
            repeated_endpoint: false,
        }
    }

    pub fn step(&self) -> i32 {
        self.step
    }

    pub fn prev_step(&self) -> i32 {
        self.prev_step
    }

    pub fn iteration(&self) -> u32 {
        self.iteration
    }

    /// Rewinds the cursor to "no step played" and zeroes `iteration`,
    /// without otherwise disturbing run-mode direction state.
    pub fn reset(&mut self) {
        self.step = -1;
        self.prev_step = -1;
        self.iteration = 0;
        self.direction = PingPongDirection::Forward;
        self.repeated_endpoint = false;
    }

    /// Places the cursor at the position a global step counter implies
    /// — used when the track's phase is locked to the clock (Aligned
    /// play mode, spec.md §4.2). Deterministic given `absolute_step`;
    /// `rng` is only consulted for `Random`/`RandomWalk`, which have no
    /// well-defined aligned position and instead advance once per call
    /// exactly like `advance_free`.
    pub fn advance_aligned(
        &mut self,
        absolute_step: u32,
        mode: RunMode,
        first: u8,
        last: u8,
        rng: &mut Rng,
    ) {
        match mode {
            RunMode::Random | RunMode::RandomWalk => {
                self.advance_free(mode, first, last, rng);
            }
            _ => {
                let range_len = (last as i32 - first as i32 + 1).max(1);
                let prev = self.step;
                let new_step = match mode {
                    RunMode::Forward => first as i32 + (absolute_step as i32 % range_len),
                    RunMode::Backward => {
                        last as i32 - (absolute_step as i32 % range_len)
                    }
                    RunMode::PingPong | RunMode::PingPongRepeat => {
                        aligned_ping_pong(absolute_step, first, last, mode == RunMode::PingPongRepeat)
                    }
                    RunMode::Random | RunMode::RandomWalk => unreachable!(),
                };
                self.prev_step = prev;
                if prev >= 0 && new_step == first as i32 && prev == last as i32 {
                    self.iteration = self.iteration.wrapping_add(1);
                }
                self.step = new_step;
            }
        }
    }

    /// Advances the cursor relative to its previous position — used
    /// when the track runs independently of the global step counter
    /// (Free play mode, spec.md §4.2).
    pub fn advance_free(&mut self, mode: RunMode, first: u8, last: u8, rng: &mut Rng) {
        let first = first as i32;
        let last = last.max(first as u8) as i32;
        let prev = self.step;

        let new_step = if prev < first || prev > last {
            // First step since reset: always enter at the range start
            // (or, for Backward, the range end).
            match mode {
                RunMode::Backward => last,
                _ => first,
            }
        } else {
            match mode {
                RunMode::Forward => {
                    if prev >= last {
                        first
                    } else {
                        prev + 1
                    }
                }
                RunMode::Backward => {
                    if prev <= first {
                        last
                    } else {
                        prev - 1
                    }
                }
                RunMode::PingPong => self.ping_pong_step(prev, first, last, false),
                RunMode::PingPongRepeat => self.ping_pong_step(prev, first, last, true),
                RunMode::Random => first + rng.next_bound((last - first + 1) as u32) as i32,
                RunMode::RandomWalk => {
                    let delta = if rng.chance(0.5) { 1 } else { -1 };
                    let stepped = prev + delta;
                    if stepped > last {
                        last - 1
                    } else if stepped < first {
                        first + 1
                    } else {
                        stepped
                    }
                    .clamp(first, last)
                }
            }
        };

        self.prev_step = prev;
        if prev == last && new_step == first && matches!(mode, RunMode::Forward | RunMode::Random) {
            self.iteration = self.iteration.wrapping_add(1);
        }
        if prev >= 0
            && matches!(mode, RunMode::PingPong | RunMode::PingPongRepeat)
            && self.direction == PingPongDirection::Forward
            && prev == last
        {
            // Completed a forward sweep of the range.
            self.iteration = self.iteration.wrapping_add(1);
        }
        self.step = new_step;
    }

    fn ping_pong_step(&mut self, prev: i32, first: i32, last: i32, repeat_endpoints: bool) -> i32 {
        if first == last {
            return first;
        }

        match self.direction {
            PingPongDirection::Forward => {
                if prev >= last {
                    if repeat_endpoints && !self.repeated_endpoint {
                        self.repeated_endpoint = true;
                        self.direction = PingPongDirection::Backward;
                        last
                    } else {
                        self.repeated_endpoint = false;
                        self.direction = PingPongDirection::Backward;
                        (last - 1).max(first)
                    }
                } else {
                    self.repeated_endpoint = false;
                    prev + 1
                }
            }
            PingPongDirection::Backward => {
                if prev <= first {
                    if repeat_endpoints && !self.repeated_endpoint {
                        self.repeated_endpoint = true;
                        self.direction = PingPongDirection::Forward;
                        first
                    } else {
                        self.repeated_endpoint = false;
                        self.direction = PingPongDirection::Forward;
                        (first + 1).min(last)
                    }
                } else {
                    self.repeated_endpoint = false;
                    prev - 1
                }
            }
        }
    }
}

impl Default for SequenceState {
    fn default() -> Self {
        Self::new()
    }
}

fn aligned_ping_pong(absolute_step: u32, first: u8, last: u8, repeat: bool) -> i32 {
    let first = first as i32;
    let last = last as i32;
    let span = last - first;
    if span <= 0 {
        return first;
    }
    let period = if repeat { span * 2 + 2 } else { span * 2 };
    let phase = (absolute_step as i32) % period;
    if repeat {
        if phase <= span {
            first + phase
        } else if phase == span + 1 {
            last
        } else {
            last - (phase - span - 1)
        }
    } else if phase <= span {
        first + phase
    } else {
        last - (phase - span)
    }
}

/// Applies a track-level rotation to a step index within `[first,
/// last]`, wrapping within the range. Its own inverse under negation
/// (spec.md §8: `rotate_step(rotate_step(s,f,l,r),f,l,-r) == s`).
pub fn rotate_step(step: i32, first: u8, last: u8, rotate: i32) -> i32 {
    if step < 0 {
        return step;
    }
    let first = first as i32;
    let last = last as i32;
    let len = (last - first + 1).max(1);
    let offset = step - first;
    let rotated = (offset + rotate).rem_euclid(len);
    first + rotated
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_state_has_no_step() {
        let s = SequenceState::new();
        assert_eq!(s.step(), -1);
        assert_eq!(s.iteration(), 0);
    }

    #[test]
    fn forward_16_step_wraps_and_counts_iteration() {
        let mut s = SequenceState::new();
        let mut rng = Rng::new(1);
        for expected in 0..16 {
            s.advance_free(RunMode::Forward, 0, 15, &mut rng);
            assert_eq!(s.step(), expected);
        }
        assert_eq!(s.iteration(), 0);
        s.advance_free(RunMode::Forward, 0, 15, &mut rng);
        assert_eq!(s.step(), 0);
        assert_eq!(s.iteration(), 1);
    }

    #[test]
    fn backward_wraps_from_first_to_last() {
        let mut s = SequenceState::new();
        let mut rng = Rng::new(1);
        s.advance_free(RunMode::Backward, 0, 3, &mut rng);
        assert_eq!(s.step(), 3);
        for expected in [2, 1, 0, 3] {
            s.advance_free(RunMode::Backward, 0, 3, &mut rng);
            assert_eq!(s.step(), expected);
        }
    }

    #[test]
    fn ping_pong_does_not_double_play_endpoints() {
        let mut s = SequenceState::new();
        let mut rng = Rng::new(1);
        let mut seen = Vec::new();
        for _ in 0..10 {
            s.advance_free(RunMode::PingPong, 0, 3, &mut rng);
            seen.push(s.step());
        }
        assert_eq!(seen, vec![0, 1, 2, 3, 2, 1, 0, 1, 2, 3]);
    }

    #[test]
    fn ping_pong_repeat_plays_endpoints_twice() {
        let mut s = SequenceState::new();
        let mut rng = Rng::new(1);
        let mut seen = Vec::new();
        for _ in 0..10 {
            s.advance_free(RunMode::PingPongRepeat, 0, 2, &mut rng);
            seen.push(s.step());
        }
        assert_eq!(seen, vec![0, 1, 2, 2, 1, 0, 0, 1, 2, 2]);
    }

    #[test]
    fn random_walk_reflects_at_edges() {
        let mut s = SequenceState::new();
        let mut rng = Rng::new(7);
        for _ in 0..200 {
            s.advance_free(RunMode::RandomWalk, 0, 5, &mut rng);
            assert!(s.step() >= 0 && s.step() <= 5);
        }
    }

    #[test]
    fn rotate_step_is_its_own_inverse() {
        for rotate in -5..=5 {
            for step in 0..8 {
                let rotated = rotate_step(step, 0, 7, rotate);
                let back = rotate_step(rotated, 0, 7, -rotate);
                assert_eq!(back, step);
            }
        }
    }

    #[test]
    fn aligned_forward_matches_global_counter() {
        let mut s = SequenceState::new();
        let mut rng = Rng::new(1);
        for i in 0..32u32 {
            s.advance_aligned(i, RunMode::Forward, 0, 15, &mut rng);
            assert_eq!(s.step(), (i % 16) as i32);
        }
    }
}
