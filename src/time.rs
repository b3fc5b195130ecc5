//! Clock & groove: conversion between the master tick counter and
//! sequence-domain ticks, plus the swing warp applied to emitted events.

/// Monotonic tick counter at [`MASTER_PPQN`] resolution. Wraps on
/// overflow; relative comparisons are only meaningful within a short
/// horizon (at most one measure), per spec.
pub type Tick = u32;

/// Pulses per quarter note for the master clock.
pub const MASTER_PPQN: u32 = 24;

/// Pulses per quarter note in sequence domain. Sequence `divisor`
/// fields are expressed in these ticks.
pub const SEQ_PPQN: u32 = 24;

/// Quarter-note length, in master ticks.
pub const QUARTER_TICKS: u32 = MASTER_PPQN;

/// Time signature assumed throughout (4/4); only used to find
/// `resetMeasure` boundaries.
pub const BEATS_PER_MEASURE: u32 = 4;

/// Base divisor converting a sequence-domain tick count into master
/// ticks (spec.md §3: "Sequence-domain time uses MASTER_PPQN / SEQ_PPQN
/// as its base divisor").
pub const fn base_divisor() -> u32 {
    MASTER_PPQN / SEQ_PPQN
}

/// Length of one measure, in master ticks.
pub const fn measure_ticks() -> u32 {
    BEATS_PER_MEASURE * QUARTER_TICKS
}

/// `true` exactly on the ticks that begin a `resetMeasure`-period
/// boundary. `reset_measure == 0` means "never" per spec.md §3.
pub fn is_measure_reset_boundary(tick: Tick, reset_measure: u32) -> bool {
    if reset_measure == 0 {
        return false;
    }
    let period = measure_ticks() * reset_measure;
    period != 0 && tick % period == 0
}

/// Applies swing to an absolute tick.
///
/// Operates on the **absolute** tick rather than one relative to the
/// current measure, so that phase is preserved across `reset()`
/// boundaries (spec.md §9 open question, resolved in favor of
/// absolute ticks).
///
/// `amount` is the swing fraction in `[0, 1]`: at `0` this is the
/// identity; at `1` the off-beat sixteenth of every eighth-note pair is
/// pushed as late as a triplet feel allows (the boundary between the
/// on-beat and off-beat sixteenth moves from 50% to 75% of the pair).
///
/// The mapping is a continuous piecewise-linear warp with fixed points
/// at every eighth-note boundary, which gives both properties spec.md
/// §8 requires for free: it is monotonic non-decreasing, and
/// `apply_swing(t + quarter) == apply_swing(t) + quarter` because every
/// quarter-note boundary is itself a fixed point (two eighth-note pairs
/// per quarter).
pub fn apply_swing(tick: Tick, amount: f32) -> Tick {
    let amount = amount.clamp(0.0, 1.0);
    let sixteenth = (QUARTER_TICKS / 4) as f64;
    let pair = sixteenth * 2.0;
    if pair <= 0.0 {
        return tick;
    }

    let pair_index = (tick as f64 / pair).floor();
    let pair_start = pair_index * pair;
    let pos_in_pair = tick as f64 - pair_start;

    let boundary = sixteenth * (1.0 + 0.5 * amount as f64);

    let warped = if pos_in_pair < sixteenth {
        let frac = pos_in_pair / sixteenth;
        frac * boundary
    } else {
        let frac = (pos_in_pair - sixteenth) / sixteenth;
        boundary + frac * (pair - boundary)
    };

    (pair_start + warped).floor() as Tick
}

/// Converts a sequence-domain step length (in the step's own
/// `divisor`-scaled units) into master ticks.
pub fn step_ticks_to_master(step_ticks: u32) -> u32 {
    step_ticks * base_divisor()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn swing_identity_at_zero() {
        for t in 0..QUARTER_TICKS * 4 {
            assert_eq!(apply_swing(t, 0.0), t);
        }
    }

    #[test]
    fn swing_is_monotonic_non_decreasing() {
        for amount in [0.0, 0.25, 0.5, 0.75, 1.0] {
            let mut prev = apply_swing(0, amount);
            for t in 1..QUARTER_TICKS * 8 {
                let cur = apply_swing(t, amount);
                assert!(cur >= prev, "amount={amount} t={t} prev={prev} cur={cur}");
                prev = cur;
            }
        }
    }

    #[test]
    fn swing_is_periodic_per_quarter() {
        for amount in [0.0, 0.3, 0.6, 1.0] {
            for t in 0..QUARTER_TICKS * 3 {
                assert_eq!(
                    apply_swing(t + QUARTER_TICKS, amount),
                    apply_swing(t, amount) + QUARTER_TICKS
                );
            }
        }
    }

    #[test]
    fn measure_reset_boundaries() {
        assert!(!is_measure_reset_boundary(0, 0));
        assert!(is_measure_reset_boundary(0, 2));
        assert!(!is_measure_reset_boundary(measure_ticks(), 2));
        assert!(is_measure_reset_boundary(measure_ticks() * 2, 2));
    }
}
