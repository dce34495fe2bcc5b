//! Sharded counters for dispatcher metrics.
//!
//! A [`CounterGroup`] packs up to 16 counters into per-worker shards so that
//! event loops running on different cores never contend on a cache line. A
//! [`Counter`] references one slot of a group and implements
//! [`metriken::Metric`] for exposition.

use std::cell::Cell;
use std::sync::atomic::{AtomicU64, Ordering};

const CACHE_LINE: usize = 128;
const SLOTS: usize = CACHE_LINE / 8; // 16 counters per cache line
const NUM_SHARDS: usize = 32;

thread_local! {
    /// Worker shard for the current thread, set by `set_worker_shard()`.
    static SHARD_ID: Cell<Option<usize>> = const { Cell::new(None) };
}

/// Pin the current thread to a counter shard.
///
/// Each worker calls this with its worker index when its loop starts, so
/// every worker writes its own shard. Threads that never call it (callers,
/// resolver threads) fall back to a hash of a thread-local address.
pub fn set_worker_shard(id: usize) {
    SHARD_ID.set(Some(id % NUM_SHARDS));
}

#[repr(C, align(128))]
struct Shard {
    slots: [AtomicU64; SLOTS],
}

/// Sharded storage for up to 16 counters.
pub struct CounterGroup {
    shards: [Shard; NUM_SHARDS],
}

impl CounterGroup {
    /// Create a new counter group with all slots initialized to zero.
    #[allow(clippy::declare_interior_mutable_const)]
    pub const fn new() -> Self {
        const ZERO: AtomicU64 = AtomicU64::new(0);
        const SHARD: Shard = Shard {
            slots: [ZERO; SLOTS],
        };
        Self {
            shards: [SHARD; NUM_SHARDS],
        }
    }

    #[inline]
    fn add(&self, slot: usize, value: u64) {
        debug_assert!(slot < SLOTS, "slot index out of bounds");
        let shard = shard_index();
        self.shards[shard].slots[slot].fetch_add(value, Ordering::Relaxed);
    }

    fn value(&self, slot: usize) -> u64 {
        debug_assert!(slot < SLOTS, "slot index out of bounds");
        self.shards
            .iter()
            .map(|shard| shard.slots[slot].load(Ordering::Relaxed))
            .sum()
    }
}

impl Default for CounterGroup {
    fn default() -> Self {
        Self::new()
    }
}

/// A sharded counter referencing one slot of a [`CounterGroup`].
pub struct Counter {
    group: &'static CounterGroup,
    slot: usize,
}

impl Counter {
    /// Create a counter backed by a slot in the given group.
    ///
    /// # Panics
    ///
    /// Debug builds will panic on first use if `slot >= 16`.
    pub const fn new(group: &'static CounterGroup, slot: usize) -> Self {
        Self { group, slot }
    }

    /// Increment the counter by 1.
    #[inline]
    pub fn increment(&self) {
        self.group.add(self.slot, 1);
    }

    /// Add a value to the counter.
    #[inline]
    pub fn add(&self, value: u64) {
        self.group.add(self.slot, value);
    }

    /// Current value, aggregated across all shards.
    pub fn value(&self) -> u64 {
        self.group.value(self.slot)
    }
}

impl metriken::Metric for Counter {
    fn as_any(&self) -> Option<&dyn std::any::Any> {
        Some(self)
    }

    fn value(&self) -> Option<metriken::Value<'_>> {
        Some(metriken::Value::Counter(Counter::value(self)))
    }
}

/// Shard index for the current thread: the pinned worker shard, or a cheap
/// hash of a thread-local address for unpinned threads.
#[inline]
fn shard_index() -> usize {
    SHARD_ID.get().unwrap_or_else(|| {
        thread_local! {
            static ID: u8 = const { 0 };
        }
        ID.with(|slot| slot as *const u8 as usize) % NUM_SHARDS
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn increment_and_add() {
        static GROUP: CounterGroup = CounterGroup::new();
        let counter = Counter::new(&GROUP, 0);

        assert_eq!(counter.value(), 0);
        counter.increment();
        counter.add(9);
        assert_eq!(counter.value(), 10);
    }

    #[test]
    fn slots_are_independent() {
        static GROUP: CounterGroup = CounterGroup::new();
        let a = Counter::new(&GROUP, 1);
        let b = Counter::new(&GROUP, 2);

        a.increment();
        b.add(5);

        assert_eq!(a.value(), 1);
        assert_eq!(b.value(), 5);
    }

    #[test]
    fn aggregates_across_worker_shards() {
        use std::sync::Arc;
        use std::thread;

        static GROUP: CounterGroup = CounterGroup::new();
        let counter = Arc::new(Counter::new(&GROUP, 3));
        let iterations = 1000u64;
        let num_workers = 4;

        let handles: Vec<_> = (0..num_workers)
            .map(|worker| {
                let counter = Arc::clone(&counter);
                thread::spawn(move || {
                    set_worker_shard(worker);
                    for _ in 0..iterations {
                        counter.increment();
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(counter.value(), iterations * num_workers as u64);
    }

    #[test]
    fn metriken_exposition() {
        use metriken::Metric;

        static GROUP: CounterGroup = CounterGroup::new();
        let counter = Counter::new(&GROUP, 4);
        counter.add(42);

        let value = Metric::value(&counter);
        assert!(matches!(value, Some(metriken::Value::Counter(42))));
    }
}
