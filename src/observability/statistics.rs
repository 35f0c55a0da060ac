//! Named counters a node reports through [`Service::statistics`].
//!
//! # Design Decisions
//! - Values are `f64` stored as bits in an `AtomicU64`; adds are CAS loops
//! - Unknown keys start at zero on first `incr`
//! - `export` copies values out; the snapshot never changes afterwards
//!
//! [`Service::statistics`]: crate::lifecycle::Service::statistics

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;

/// A cheaply cloneable set of counters. Clones share the same values.
#[derive(Debug, Clone, Default)]
pub struct Statistics {
    counters: Arc<DashMap<String, AtomicU64>>,
}

impl Statistics {
    /// Create a registry with `keys` registered at zero.
    pub fn new<I, K>(keys: I) -> Self
    where
        I: IntoIterator<Item = K>,
        K: Into<String>,
    {
        let counters = DashMap::new();
        for key in keys {
            counters.insert(key.into(), AtomicU64::new(0f64.to_bits()));
        }
        Self {
            counters: Arc::new(counters),
        }
    }

    /// Add `delta` to `key`.
    pub fn incr(&self, key: &str, delta: f64) {
        // Fast path: the key exists, only a shared lock on its shard.
        if let Some(counter) = self.counters.get(key) {
            add(&counter, delta);
            return;
        }
        let counter = self
            .counters
            .entry(key.to_string())
            .or_insert_with(|| AtomicU64::new(0f64.to_bits()));
        add(&counter, delta);
    }

    pub fn get(&self, key: &str) -> Option<f64> {
        self.counters
            .get(key)
            .map(|counter| f64::from_bits(counter.load(Ordering::Relaxed)))
    }

    /// Point-in-time copy of every counter.
    pub fn export(&self) -> HashMap<String, f64> {
        self.counters
            .iter()
            .map(|entry| {
                (
                    entry.key().clone(),
                    f64::from_bits(entry.value().load(Ordering::Relaxed)),
                )
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.counters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.counters.is_empty()
    }
}

fn add(counter: &AtomicU64, delta: f64) {
    // fetch_update only fails when the closure returns None.
    let _ = counter.fetch_update(Ordering::AcqRel, Ordering::Acquire, |bits| {
        Some((f64::from_bits(bits) + delta).to_bits())
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_registers_keys_at_zero() {
        let stats = Statistics::new(["requests", "failures"]);
        assert_eq!(stats.len(), 2);
        assert_eq!(stats.get("requests"), Some(0.0));
        assert_eq!(stats.get("failures"), Some(0.0));
        assert_eq!(stats.get("other"), None);
    }

    #[test]
    fn test_incr_auto_initializes() {
        let stats = Statistics::default();
        assert!(stats.is_empty());

        stats.incr("bytes", 1.5);
        stats.incr("bytes", 2.0);
        assert_eq!(stats.get("bytes"), Some(3.5));
    }

    #[test]
    fn test_export_is_a_snapshot() {
        let stats = Statistics::new(["requests"]);
        stats.incr("requests", 1.0);

        let snapshot = stats.export();
        stats.incr("requests", 10.0);
        stats.incr("late", 1.0);

        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot["requests"], 1.0);
        assert_eq!(stats.get("requests"), Some(11.0));
    }

    #[test]
    fn test_clones_share_counters() {
        let stats = Statistics::new(["n"]);
        let other = stats.clone();
        other.incr("n", 4.0);
        assert_eq!(stats.get("n"), Some(4.0));
    }

    #[test]
    fn test_concurrent_increments() {
        let stats = Statistics::new(["n"]);
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let stats = stats.clone();
                std::thread::spawn(move || {
                    for _ in 0..1000 {
                        stats.incr("n", 1.0);
                        stats.incr("fresh", 1.0);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(stats.get("n"), Some(8000.0));
        assert_eq!(stats.get("fresh"), Some(8000.0));
    }
}
