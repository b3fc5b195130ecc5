//! LinkData bus: publishes a track's current sequence cursor so a
//! follower track can mirror it exactly (spec.md §4.6).

use crate::model::TrackId;
use crate::sequence::SequenceState;

/// Snapshot a track publishes after its own advance, for a follower
/// configured to mirror it.
#[derive(Clone, Copy, Debug)]
pub struct LinkData {
    pub divisor: u32,
    pub relative_tick: u32,
    pub sequence_state: SequenceState,
}

/// Which upstream track, if any, a track mirrors instead of advancing
/// its own cursor (spec.md §9: stores a `TrackId`, not a borrowed
/// pointer).
#[derive(Clone, Copy, Debug, Default)]
pub struct LinkSource(pub Option<TrackId>);

impl LinkSource {
    pub const fn none() -> Self {
        Self(None)
    }

    pub const fn follow(track: TrackId) -> Self {
        Self(Some(track))
    }

    pub fn is_linked(&self) -> bool {
        self.0.is_some()
    }
}

/// Fixed-size table of published `LinkData`, indexed by `TrackId`. The
/// engine writes each track's publication here after that track's own
/// `tick()`, and reads it back for any follower later in the same pass
/// (spec.md §5 Ordering: "LinkData for a follower is always read after
/// its leader's tick has completed in the same pass").
pub struct LinkBus {
    slots: [Option<LinkData>; Self::CAPACITY],
}

impl LinkBus {
    pub const CAPACITY: usize = 32;

    pub fn new() -> Self {
        Self {
            slots: [None; Self::CAPACITY],
        }
    }

    pub fn publish(&mut self, track: TrackId, data: LinkData) {
        self.slots[track.0 as usize] = Some(data);
    }

    pub fn read(&self, track: TrackId) -> Option<LinkData> {
        self.slots[track.0 as usize]
    }

    pub fn clear(&mut self) {
        self.slots = [None; Self::CAPACITY];
    }
}

impl Default for LinkBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sequence::SequenceState;

    #[test]
    fn follower_reads_leader_publication() {
        let mut bus = LinkBus::new();
        let leader = TrackId(0);
        let data = LinkData {
            divisor: 24,
            relative_tick: 12,
            sequence_state: SequenceState::new(),
        };
        bus.publish(leader, data);
        let read = bus.read(leader).unwrap();
        assert_eq!(read.divisor, 24);
        assert_eq!(read.relative_tick, 12);
    }

    #[test]
    fn unpublished_track_reads_none() {
        let bus = LinkBus::new();
        assert!(bus.read(TrackId(5)).is_none());
    }
}
