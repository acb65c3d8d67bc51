//! Bounded per-key sample history.
//!
//! Every rate and jitter calculation in the engine looks back at a handful of
//! recent samples for one key (a port, a switch pair, a host). This module
//! keeps those samples in per-key ring buffers that drop their oldest entry
//! once a cap is exceeded.

use std::collections::{HashMap, VecDeque};
use std::hash::Hash;

/// Ordered, length-capped sample sequences keyed by `K`.
#[derive(Debug, Clone)]
pub struct SampleHistory<K, V> {
    samples: HashMap<K, VecDeque<V>>,
}

impl<K, V> Default for SampleHistory<K, V> {
    fn default() -> Self {
        Self {
            samples: HashMap::new(),
        }
    }
}

impl<K: Eq + Hash, V: Clone> SampleHistory<K, V> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `value` for `key`, dropping from the oldest end beyond `capacity`.
    ///
    /// A capacity of zero is treated as one: the newest sample is always kept.
    pub fn record(&mut self, key: K, value: V, capacity: usize) {
        let capacity = capacity.max(1);
        let series = self
            .samples
            .entry(key)
            .or_insert_with(|| VecDeque::with_capacity(capacity.min(64)));
        series.push_back(value);
        while series.len() > capacity {
            series.pop_front();
        }
    }

    /// Up to `n` most recent samples for `key`, oldest first.
    pub fn latest(&self, key: &K, n: usize) -> Vec<V> {
        match self.samples.get(key) {
            Some(series) => {
                let skip = series.len().saturating_sub(n);
                series.iter().skip(skip).cloned().collect()
            }
            None => Vec::new(),
        }
    }

    /// Most recent sample for `key`
    pub fn last(&self, key: &K) -> Option<&V> {
        self.samples.get(key).and_then(|series| series.back())
    }

    /// Number of samples held for `key`
    pub fn len(&self, key: &K) -> usize {
        self.samples.get(key).map_or(0, VecDeque::len)
    }

    pub fn contains_key(&self, key: &K) -> bool {
        self.samples.contains_key(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &K> {
        self.samples.keys()
    }

    /// Number of keys with at least one sample
    pub fn key_count(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn remove(&mut self, key: &K) -> Option<VecDeque<V>> {
        self.samples.remove(key)
    }

    /// Keep only the keys for which `keep` returns true
    pub fn retain_keys(&mut self, mut keep: impl FnMut(&K) -> bool) {
        self.samples.retain(|key, _| keep(key));
    }

    pub fn clear(&mut self) {
        self.samples.clear();
    }
}

/// Absolute difference between the two most recent samples.
///
/// `None` until two samples exist. A non-finite sample makes the result
/// infinite rather than NaN.
pub fn jitter_of<K: Eq + Hash>(history: &SampleHistory<K, f64>, key: &K) -> Option<f64> {
    match history.latest(key, 2).as_slice() {
        [previous, current] => {
            if previous.is_finite() && current.is_finite() {
                Some((current - previous).abs())
            } else {
                Some(f64::INFINITY)
            }
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_caps_length() {
        let mut history = SampleHistory::new();
        for value in 0..10 {
            history.record("a", value, 5);
        }
        assert_eq!(history.len(&"a"), 5);
        assert_eq!(history.latest(&"a", 5), vec![5, 6, 7, 8, 9]);
    }

    #[test]
    fn test_capped_contents_for_many_capacities() {
        for capacity in 2..8usize {
            for inserted in capacity + 1..capacity + 12 {
                let mut history = SampleHistory::new();
                for value in 0..inserted {
                    history.record(1u8, value, capacity);
                }
                let expected: Vec<usize> = (inserted - capacity..inserted).collect();
                assert_eq!(history.len(&1), capacity);
                assert_eq!(history.latest(&1, capacity), expected);
            }
        }
    }

    #[test]
    fn test_latest_returns_fewer_when_short() {
        let mut history = SampleHistory::new();
        history.record("a", 1.0, 5);
        assert_eq!(history.latest(&"a", 2), vec![1.0]);
        assert!(history.latest(&"missing", 2).is_empty());
    }

    #[test]
    fn test_keys_are_independent() {
        let mut history = SampleHistory::new();
        history.record("a", 1, 2);
        history.record("b", 10, 2);
        history.record("a", 2, 2);
        history.record("a", 3, 2);
        assert_eq!(history.latest(&"a", 5), vec![2, 3]);
        assert_eq!(history.latest(&"b", 5), vec![10]);
        assert_eq!(history.last(&"b"), Some(&10));
    }

    #[test]
    fn test_zero_capacity_keeps_newest() {
        let mut history = SampleHistory::new();
        history.record("a", 1, 0);
        history.record("a", 2, 0);
        assert_eq!(history.latest(&"a", 3), vec![2]);
    }

    #[test]
    fn test_retain_and_remove() {
        let mut history = SampleHistory::new();
        history.record((1, 1), 1, 3);
        history.record((1, 2), 1, 3);
        history.record((2, 1), 1, 3);
        history.retain_keys(|(dpid, _)| *dpid != 1);
        assert_eq!(history.key_count(), 1);
        assert!(history.remove(&(2, 1)).is_some());
        assert!(history.is_empty());
    }

    #[test]
    fn test_jitter_needs_two_samples() {
        let mut history = SampleHistory::new();
        assert_eq!(jitter_of(&history, &"h"), None);
        history.record("h", 0.008, 5);
        assert_eq!(jitter_of(&history, &"h"), None);
        history.record("h", 0.011, 5);
        let jitter = jitter_of(&history, &"h").unwrap();
        assert!((jitter - 0.003).abs() < 1e-12);
    }

    #[test]
    fn test_jitter_uses_latest_pair() {
        let mut history = SampleHistory::new();
        for value in [8.0, 11.0, 4.0] {
            history.record("h", value, 5);
        }
        assert_eq!(jitter_of(&history, &"h"), Some(7.0));
    }

    #[test]
    fn test_jitter_with_unknown_delay_is_infinite() {
        let mut history = SampleHistory::new();
        history.record("h", 8.0, 5);
        history.record("h", f64::INFINITY, 5);
        assert_eq!(jitter_of(&history, &"h"), Some(f64::INFINITY));
    }
}
