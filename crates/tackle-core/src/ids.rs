//! Timestamp-derived identifiers.
//!
//! Analysis and run ids are epoch milliseconds at creation time, bumped
//! forward when two ids are requested within the same millisecond so they
//! stay unique within one process.

use std::sync::atomic::{AtomicI64, Ordering};

use chrono::Utc;

/// Monotonic generator of timestamp-derived ids.
#[derive(Debug, Default)]
pub struct IdGenerator {
    last: AtomicI64,
}

impl IdGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Next id: the current time in milliseconds, or one past the previous id.
    pub fn next_id(&self) -> i64 {
        let now = Utc::now().timestamp_millis();
        let mut last = self.last.load(Ordering::Relaxed);
        loop {
            let candidate = now.max(last + 1);
            match self
                .last
                .compare_exchange_weak(last, candidate, Ordering::SeqCst, Ordering::Relaxed)
            {
                Ok(_) => return candidate,
                Err(actual) => last = actual,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Arc;

    #[test]
    fn test_ids_strictly_increase() {
        let ids = IdGenerator::new();
        let mut previous = ids.next_id();
        for _ in 0..1000 {
            let next = ids.next_id();
            assert!(next > previous);
            previous = next;
        }
    }

    #[test]
    fn test_ids_are_timestamp_derived() {
        let before = Utc::now().timestamp_millis();
        let id = IdGenerator::new().next_id();
        assert!(id >= before);
    }

    #[test]
    fn test_ids_unique_across_threads() {
        let ids = Arc::new(IdGenerator::new());
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let ids = Arc::clone(&ids);
                std::thread::spawn(move || (0..250).map(|_| ids.next_id()).collect::<Vec<_>>())
            })
            .collect();
        let mut seen = HashSet::new();
        for handle in handles {
            for id in handle.join().unwrap() {
                assert!(seen.insert(id));
            }
        }
        assert_eq!(seen.len(), 1000);
    }
}
