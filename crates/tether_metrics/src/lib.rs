//! Tether Metrics - named event counters for the binding runtime
//!
//! Counters are owned by whoever records into them (one per script state),
//! never stored in a process-wide singleton.
//!
//! # Feature Flags
//!
//! - `metrics` - Enable counter collection (default: disabled)
//!
//! # Usage
//!
//! ```ignore
//! use tether_metrics::Counter;
//!
//! let mut counter = Counter::new();
//! counter.increment("handles.destroyed", 1);
//! println!("destroyed: {}", counter.get("handles.destroyed"));
//! ```
//!
//! Without the `metrics` feature every call compiles down to nothing and
//! `get` always reports zero.

#[cfg(feature = "metrics")]
mod counter;

#[cfg(feature = "metrics")]
pub use counter::Counter;

/// Execute code only when metrics are enabled
#[macro_export]
macro_rules! metrics {
    ($($tt:tt)*) => {
        #[cfg(feature = "metrics")]
        {
            $($tt)*
        }
    };
}

// ============================================================================
// No-op stub when metrics disabled
// ============================================================================

#[cfg(not(feature = "metrics"))]
#[derive(Debug, Default)]
pub struct Counter;

#[cfg(not(feature = "metrics"))]
impl Counter {
    pub fn new() -> Self { Self }
    pub fn increment(&mut self, _name: &'static str, _value: u64) {}
    pub fn get(&self, _name: &str) -> u64 { 0 }
    pub fn reset_all(&mut self) {}
    pub fn snapshot(&self) -> Vec<(&'static str, u64)> { Vec::new() }
}

#[cfg(test)]
mod tests {
    #[test]
    fn test_counter_available_in_every_build() {
        let mut counter = super::Counter::new();
        counter.increment("gc.passes", 1);
        counter.reset_all();
        assert_eq!(counter.get("gc.passes"), 0);
    }
}
