//! Bounded, time-ordered event queue shared by gate and CV outputs.
//!
//! Maps directly onto spec.md §9 Design Notes: "Bounded event queues
//! map cleanly to a fixed-capacity ring with a small insertion sort
//! (≤16 entries)." Entries are kept sorted ascending by tick so
//! draining due entries is a prefix scan.

use crate::time::Tick;

/// Capacity of every [`EventQueue`], per spec.md §5/§7.
pub const QUEUE_CAPACITY: usize = 16;

/// A single scheduled event.
#[derive(Clone, Copy, Debug)]
pub struct QueuedEvent<T> {
    pub tick: Tick,
    pub payload: T,
}

/// Fixed-capacity, tick-sorted event queue with `pushReplace` insert
/// semantics: a new entry at a tick already present overwrites the
/// existing one (spec.md §4.2, §5). No heap allocation (spec.md §5
/// Memory).
#[derive(Clone, Copy)]
pub struct EventQueue<T: Copy> {
    entries: [Option<QueuedEvent<T>>; QUEUE_CAPACITY],
    len: usize,
}

impl<T: Copy> EventQueue<T> {
    pub fn new() -> Self {
        Self {
            entries: [None; QUEUE_CAPACITY],
            len: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Pushes `payload` due at `tick`. If an entry already exists at
    /// `tick`, it is overwritten in place ("the later push wins",
    /// spec.md §5 Ordering guarantees). If the queue is full and
    /// `tick` is new, the farthest-future entry is dropped to make
    /// room (spec.md §7 QueueOverflow) and the drop is logged.
    pub fn push_replace(&mut self, tick: Tick, payload: T) {
        if let Some(idx) = self.find(tick) {
            self.entries[idx] = Some(QueuedEvent { tick, payload });
            return;
        }

        if self.len == QUEUE_CAPACITY {
            log::trace!(
                "event queue overflow at capacity {QUEUE_CAPACITY}, dropping farthest-future entry"
            );
            self.len -= 1;
            self.entries[self.len] = None;
        }

        let insert_at = self.entries[..self.len]
            .iter()
            .position(|e| e.unwrap().tick > tick)
            .unwrap_or(self.len);

        for i in (insert_at..self.len).rev() {
            self.entries[i + 1] = self.entries[i];
        }
        self.entries[insert_at] = Some(QueuedEvent { tick, payload });
        self.len += 1;
    }

    fn find(&self, tick: Tick) -> Option<usize> {
        self.entries[..self.len]
            .iter()
            .position(|e| e.map(|e| e.tick) == Some(tick))
    }

    /// Removes and returns every entry whose `tick` is `<= now`, in
    /// ascending tick order.
    pub fn drain_due(&mut self, now: Tick) -> impl Iterator<Item = QueuedEvent<T>> + '_ {
        let due_count = self.entries[..self.len]
            .iter()
            .take_while(|e| e.unwrap().tick <= now)
            .count();

        let drained: [Option<QueuedEvent<T>>; QUEUE_CAPACITY] = {
            let mut out = [None; QUEUE_CAPACITY];
            out[..due_count].copy_from_slice(&self.entries[..due_count]);
            out
        };

        self.entries.copy_within(due_count..self.len, 0);
        for slot in &mut self.entries[self.len - due_count..self.len] {
            *slot = None;
        }
        self.len -= due_count;

        (0..due_count).map(move |i| drained[i].unwrap())
    }

    /// Clears all pending events (used on `reset()`/pattern change).
    pub fn clear(&mut self) {
        self.entries = [None; QUEUE_CAPACITY];
        self.len = 0;
    }
}

impl<T: Copy> Default for EventQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}
