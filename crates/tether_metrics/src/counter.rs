//! Named counters for tracking runtime events

use std::collections::BTreeMap;

/// Monotonic event counters keyed by a static name such as `"handles.destroyed"`.
#[derive(Debug, Default)]
pub struct Counter {
    counters: BTreeMap<&'static str, u64>,
}

impl Counter {
    pub fn new() -> Self {
        Self {
            counters: BTreeMap::new(),
        }
    }

    pub fn increment(&mut self, name: &'static str, value: u64) {
        *self.counters.entry(name).or_insert(0) += value;
    }

    pub fn get(&self, name: &str) -> u64 {
        self.counters.get(name).copied().unwrap_or(0)
    }

    pub fn reset_all(&mut self) {
        self.counters.clear();
    }

    /// All counters in name order.
    pub fn snapshot(&self) -> Vec<(&'static str, u64)> {
        self.counters.iter().map(|(name, value)| (*name, *value)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_increment_accumulates() {
        let mut counter = Counter::new();
        counter.increment("edges.installed", 2);
        counter.increment("edges.installed", 3);
        counter.increment("gc.passes", 1);
        assert_eq!(counter.get("edges.installed"), 5);
        assert_eq!(counter.get("missing"), 0);
        assert_eq!(
            counter.snapshot(),
            vec![("edges.installed", 5), ("gc.passes", 1)]
        );
    }
}
