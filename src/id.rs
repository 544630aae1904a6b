//! Monotonic 63-bit snowflake-style identifier generator.
//!
//! Layout, high to low bit: 41 bits ms-since-epoch, 10 bits worker id,
//! 12 bits per-ms sequence. A single `AtomicU64` packs (last_ms, sequence)
//! as the CAS-guarded state word; the worker id is fixed at construction and
//! folded in only when composing the final id, never part of the CAS loop.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

const WORKER_BITS: u32 = 10;
const SEQUENCE_BITS: u32 = 12;
const MAX_WORKER_ID: u64 = (1 << WORKER_BITS) - 1;
const MAX_SEQUENCE: u64 = (1 << SEQUENCE_BITS) - 1;

/// 2024-01-01T00:00:00Z, in ms since the Unix epoch.
pub const DEFAULT_EPOCH_MS: u64 = 1_704_067_200_000;

pub struct IdGenerator {
    worker_id: u64,
    epoch_ms: u64,
    // packed (last_ms << SEQUENCE_BITS) | sequence
    state: AtomicU64,
}

impl IdGenerator {
    pub fn new(worker_id: u64, epoch_ms: u64) -> Self {
        assert!(worker_id <= MAX_WORKER_ID, "worker_id out of range");
        Self {
            worker_id,
            epoch_ms,
            state: AtomicU64::new(0),
        }
    }

    pub fn with_default_epoch(worker_id: u64) -> Self {
        Self::new(worker_id, DEFAULT_EPOCH_MS)
    }

    fn now_ms(&self) -> u64 {
        let unix_ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("system clock before unix epoch")
            .as_millis() as u64;
        unix_ms.saturating_sub(self.epoch_ms)
    }

    /// Produces the next id, spinning briefly if the per-ms sequence space
    /// for the current millisecond is exhausted or the clock has regressed.
    pub fn next(&self) -> i64 {
        loop {
            let now = self.now_ms();
            let old = self.state.load(Ordering::Acquire);
            let old_ms = old >> SEQUENCE_BITS;
            let old_seq = old & MAX_SEQUENCE;

            let (new_ms, new_seq) = if now > old_ms {
                (now, 0)
            } else if old_seq < MAX_SEQUENCE {
                (old_ms, old_seq + 1)
            } else {
                // sequence exhausted for this millisecond: busy-wait for the
                // clock to advance past old_ms before retrying.
                std::thread::yield_now();
                continue;
            };

            let new_state = (new_ms << SEQUENCE_BITS) | new_seq;
            if self
                .state
                .compare_exchange(old, new_state, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                let id = (new_ms << (WORKER_BITS + SEQUENCE_BITS))
                    | (self.worker_id << SEQUENCE_BITS)
                    | new_seq;
                return id as i64;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn ids_are_strictly_increasing_single_threaded() {
        let gen = IdGenerator::with_default_epoch(1);
        let mut last = gen.next();
        for _ in 0..10_000 {
            let id = gen.next();
            assert!(id > last);
            last = id;
        }
    }

    #[test]
    fn ids_are_unique_across_threads() {
        let gen = Arc::new(IdGenerator::with_default_epoch(7));
        let mut handles = Vec::new();
        for _ in 0..8 {
            let gen = Arc::clone(&gen);
            handles.push(std::thread::spawn(move || {
                (0..5_000).map(|_| gen.next()).collect::<Vec<_>>()
            }));
        }
        let mut all = Vec::new();
        for h in handles {
            all.extend(h.join().unwrap());
        }
        let mut sorted = all.clone();
        sorted.sort_unstable();
        sorted.dedup();
        assert_eq!(sorted.len(), all.len(), "duplicate ids generated");
    }

    #[test]
    fn worker_id_out_of_range_panics() {
        let result = std::panic::catch_unwind(|| IdGenerator::new(1024, DEFAULT_EPOCH_MS));
        assert!(result.is_err());
    }
}
