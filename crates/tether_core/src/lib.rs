//! Tether Core
//!
//! Runtime-agnostic building blocks for keeping native objects alive inside
//! a garbage-collected script heap:
//! - Generational handles and their ownership metadata
//! - A slot arena that hands those handles out
//! - The dependency graph of keeps-alive edges between handles

pub mod arena;
pub mod error;
pub mod graph;
pub mod handle;

pub use arena::Arena;
pub use error::HandleError;
pub use graph::DependencyGraph;
pub use handle::{HandleId, HandleMeta, Ownership, TypeTag};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_is_set() {
        assert!(!VERSION.is_empty());
    }
}
