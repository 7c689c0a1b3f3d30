//! Keeps-alive edges between handles
//!
//! An edge `(holder, dependent)` means the dependent must not be destroyed
//! while the holder is alive. Edges extend the dependent's lifetime only;
//! nothing here ever keeps a holder alive.

use crate::handle::HandleId;
use std::collections::HashMap;

/// Directed anchor edges plus the incoming anchor count of every dependent.
#[derive(Debug, Default)]
pub struct DependencyGraph {
    dependents: HashMap<HandleId, Vec<HandleId>>,
    anchors: HashMap<HandleId, usize>,
}

impl DependencyGraph {
    pub fn new() -> Self {
        Self {
            dependents: HashMap::new(),
            anchors: HashMap::new(),
        }
    }

    /// Install `holder -> dependent`. Returns false for self edges and
    /// for an edge that is already present.
    pub fn anchor(&mut self, holder: HandleId, dependent: HandleId) -> bool {
        if holder == dependent {
            return false;
        }

        let out = self.dependents.entry(holder).or_default();
        if out.contains(&dependent) {
            return false;
        }
        out.push(dependent);
        *self.anchors.entry(dependent).or_insert(0) += 1;

        tracing::trace!(%holder, %dependent, "anchor edge installed");
        true
    }

    /// Remove every edge held by `holder`, decrementing each dependent's
    /// anchor count. Returns the dependents that are now unanchored.
    pub fn release(&mut self, holder: HandleId) -> Vec<HandleId> {
        let Some(out) = self.dependents.remove(&holder) else {
            return Vec::new();
        };

        let mut freed = Vec::new();
        for dependent in out {
            if let Some(count) = self.anchors.get_mut(&dependent) {
                *count -= 1;
                if *count == 0 {
                    self.anchors.remove(&dependent);
                    freed.push(dependent);
                }
            }
        }

        tracing::trace!(%holder, unanchored = freed.len(), "holder edges released");
        freed
    }

    pub fn anchor_count(&self, dependent: HandleId) -> usize {
        self.anchors.get(&dependent).copied().unwrap_or(0)
    }

    pub fn is_anchored(&self, dependent: HandleId) -> bool {
        self.anchor_count(dependent) > 0
    }

    pub fn dependents_of(&self, holder: HandleId) -> &[HandleId] {
        self.dependents
            .get(&holder)
            .map(|v| v.as_slice())
            .unwrap_or(&[])
    }

    pub fn edge_count(&self) -> usize {
        self.dependents.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.dependents.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Arena;

    fn ids(n: usize) -> Vec<HandleId> {
        let mut arena = Arena::new();
        (0..n).map(|i| arena.insert(i)).collect()
    }

    #[test]
    fn test_fan_in_counts_every_holder() {
        let h = ids(3);
        let mut graph = DependencyGraph::new();
        assert!(graph.anchor(h[0], h[2]));
        assert!(graph.anchor(h[1], h[2]));
        assert_eq!(graph.anchor_count(h[2]), 2);

        assert!(graph.release(h[0]).is_empty());
        assert!(graph.is_anchored(h[2]));
        assert_eq!(graph.release(h[1]), vec![h[2]]);
        assert_eq!(graph.anchor_count(h[2]), 0);
        assert!(graph.is_empty());
    }

    #[test]
    fn test_duplicate_and_self_edges_are_ignored() {
        let h = ids(2);
        let mut graph = DependencyGraph::new();
        assert!(graph.anchor(h[0], h[1]));
        assert!(!graph.anchor(h[0], h[1]));
        assert!(!graph.anchor(h[0], h[0]));
        assert_eq!(graph.anchor_count(h[1]), 1);
        assert_eq!(graph.edge_count(), 1);
    }

    #[test]
    fn test_fan_out_release_frees_all_dependents() {
        let h = ids(3);
        let mut graph = DependencyGraph::new();
        graph.anchor(h[0], h[1]);
        graph.anchor(h[0], h[2]);
        assert_eq!(graph.dependents_of(h[0]), &[h[1], h[2]]);

        let mut freed = graph.release(h[0]);
        freed.sort();
        assert_eq!(freed, vec![h[1], h[2]]);
        assert!(graph.release(h[0]).is_empty());
    }

    #[test]
    fn test_holder_is_never_anchored_by_its_own_edges() {
        let h = ids(2);
        let mut graph = DependencyGraph::new();
        graph.anchor(h[0], h[1]);
        assert!(!graph.is_anchored(h[0]));
    }
}
