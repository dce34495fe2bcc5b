//! Worker selection for endpoint dispatch.
//!
//! Maps an opaque shard key (endpoint spec bytes, or the empty sentinel for
//! non-endpoint work) to a worker index. The selection deliberately mixes a
//! per-call salt into the key hash: repeated calls with the same key spread
//! across the pool instead of pinning a hot endpoint to one event loop.
//! Workers are functionally identical, so losing affinity costs nothing.

use std::time::SystemTime;

use crate::xxhash::xxh64;

/// Per-call hash state. The struct's own stack address is the call-local
/// salt; the timestamp adds entropy between calls that land on the same
/// stack slot.
struct HashState {
    self_addr: usize,
    now_nanos: u64,
    key_hash: u64,
}

/// Select a worker index in `0..workers` for the given shard key.
///
/// Pure and allocation-free. The empty key is the sentinel used for
/// operations without endpoint affinity. Two calls with the same key may
/// select different workers.
pub fn select_index(key: &[u8], workers: usize) -> usize {
    debug_assert!(workers >= 1, "worker pool must not be empty");
    if workers <= 1 {
        return 0;
    }

    let mut state = HashState {
        self_addr: 0,
        now_nanos: clock_nanos(),
        key_hash: xxh64(key, 0),
    };
    let salt = &state as *const HashState as usize;
    state.self_addr = salt;

    let mut buf = [0u8; 24];
    buf[0..8].copy_from_slice(&(state.self_addr as u64).to_le_bytes());
    buf[8..16].copy_from_slice(&state.now_nanos.to_le_bytes());
    buf[16..24].copy_from_slice(&state.key_hash.to_le_bytes());

    (xxh64(&buf, 0) % workers as u64) as usize
}

#[inline]
fn clock_nanos() -> u64 {
    SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos() as u64
}
