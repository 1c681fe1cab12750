//! Process-wide monotonic id allocator.
//!
//! Ids are 64 bits: a millisecond timestamp in the high bits and a sequence
//! counter in the low bits, so ids are both time-ordered and unique within a
//! single process. The allocator is an explicitly constructed dependency
//! passed into handlers rather than ambient global state.

use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

const SEQUENCE_BITS: u32 = 12;
const SEQUENCE_MASK: u64 = (1 << SEQUENCE_BITS) - 1;

/// Custom epoch so the timestamp component doesn't waste bits on the 1970-2020 range.
const EPOCH_MILLIS: i64 = 1_700_000_000_000;

#[derive(Debug)]
pub struct Snowflake {
    last_millis: AtomicI64,
    sequence: AtomicU64,
}

impl Default for Snowflake {
    fn default() -> Self {
        Self::new()
    }
}

impl Snowflake {
    pub fn new() -> Self {
        Self {
            last_millis: AtomicI64::new(0),
            sequence: AtomicU64::new(0),
        }
    }

    /// Allocates the next id. May spin briefly if called faster than 1kHz
    /// within the same sequence window, which is the only way this type
    /// blocks: purely in-process, never on I/O.
    pub fn next_id(&self) -> u64 {
        loop {
            let now = now_millis();
            let last = self.last_millis.load(Ordering::Acquire);

            let millis = if now > last { now } else { last };
            let seq = if millis == last {
                let prev = self.sequence.fetch_add(1, Ordering::AcqRel);
                (prev + 1) & SEQUENCE_MASK
            } else {
                0
            };

            if seq == 0 && millis == last {
                // Sequence space for this millisecond is exhausted; wait for the clock to advance.
                std::thread::yield_now();
                continue;
            }

            if self
                .last_millis
                .compare_exchange(last, millis, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                if millis != last {
                    self.sequence.store(0, Ordering::Release);
                }
                let offset = (millis - EPOCH_MILLIS).max(0) as u64;
                return (offset << SEQUENCE_BITS) | seq;
            }
        }
    }
}

fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock before unix epoch")
        .as_millis() as i64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_strictly_increasing() {
        let sf = Snowflake::new();
        let mut last = 0;
        for _ in 0..5_000 {
            let id = sf.next_id();
            assert!(id > last, "id {id} did not increase past {last}");
            last = id;
        }
    }

    #[test]
    fn concurrent_allocation_never_collides() {
        use std::collections::HashSet;
        use std::sync::Arc;

        let sf = Arc::new(Snowflake::new());
        let mut handles = Vec::new();
        for _ in 0..8 {
            let sf = sf.clone();
            handles.push(std::thread::spawn(move || {
                (0..2_000).map(|_| sf.next_id()).collect::<Vec<_>>()
            }));
        }

        let mut seen = HashSet::new();
        for h in handles {
            for id in h.join().unwrap() {
                assert!(seen.insert(id), "duplicate id {id}");
            }
        }
    }
}
