//! Reachability-based collection
//!
//! A pass marks everything reachable from the roots (globals and pinned
//! call arguments). Unreachable objects still anchored by a retained
//! holder are deferred; the rest are destroyed as one batch. Holders in
//! the batch release their edges first, and member handles go before the
//! objects they are projected from.

use crate::heap::Object;
use crate::state::ScriptState;
use serde::Serialize;
use tether_core::HandleId;
use tether_metrics::metrics;

/// What one collection pass did.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CollectionReport {
    pub reachable: usize,
    /// Unreachable but kept by an anchor edge.
    pub deferred: usize,
    /// Previously deferred and reachable again.
    pub resurrected: usize,
    pub destroyed: usize,
}

impl ScriptState {
    pub fn collect_garbage(&mut self) -> CollectionReport {
        let capacity = self.heap.capacity();

        let mut reachable = vec![false; capacity];
        let mut work = self.roots();
        while let Some(id) = work.pop() {
            let idx = id.index() as usize;
            if idx >= capacity || reachable[idx] || !self.heap.contains(id) {
                continue;
            }
            reachable[idx] = true;
            self.heap.trace(id, &mut work);
        }

        // Retained = reachable plus everything an edge or a trace leads to
        // from a retained object.
        let mut retained = reachable.clone();
        let mut work: Vec<HandleId> = self
            .heap
            .ids()
            .into_iter()
            .filter(|id| reachable[id.index() as usize])
            .collect();
        let mut next = Vec::new();
        while let Some(id) = work.pop() {
            self.heap.trace(id, &mut next);
            next.extend_from_slice(self.graph.dependents_of(id));
            for child in next.drain(..) {
                let idx = child.index() as usize;
                if idx < capacity && !retained[idx] && self.heap.contains(child) {
                    retained[idx] = true;
                    work.push(child);
                }
            }
        }

        let mut report = CollectionReport::default();
        let mut batch = Vec::new();
        for id in self.heap.ids() {
            let idx = id.index() as usize;
            let Some(entry) = self.heap.entry_mut(id) else {
                continue;
            };
            if reachable[idx] {
                report.reachable += 1;
                if entry.deferred {
                    entry.deferred = false;
                    report.resurrected += 1;
                    metrics! { self.counters.increment("handles.resurrected", 1) }
                    tracing::trace!(handle = %id, "deferred handle reachable again");
                }
            } else if retained[idx] {
                report.deferred += 1;
                if !entry.deferred {
                    entry.deferred = true;
                    metrics! { self.counters.increment("handles.deferred", 1) }
                    tracing::trace!(
                        handle = %id,
                        anchors = self.graph.anchor_count(id),
                        "destruction deferred"
                    );
                }
            } else {
                batch.push(id);
            }
        }

        for holder in &batch {
            let released = self.graph.release(*holder);
            if !released.is_empty() {
                tracing::trace!(%holder, released = released.len(), "holder released dependents");
            }
        }

        let mut ordered: Vec<(usize, HandleId)> =
            batch.iter().map(|id| (self.member_depth(*id), *id)).collect();
        ordered.sort_by(|a, b| b.0.cmp(&a.0));
        for (_, id) in ordered {
            debug_assert_eq!(
                self.graph.anchor_count(id),
                0,
                "destroying {id} while a holder still anchors it"
            );
            self.destroy(id);
            report.destroyed += 1;
        }

        self.heap.reset_allocations();
        metrics! { self.counters.increment("gc.passes", 1) }
        tracing::debug!(
            reachable = report.reachable,
            deferred = report.deferred,
            resurrected = report.resurrected,
            destroyed = report.destroyed,
            "collection pass complete"
        );
        report
    }

    /// Collect at call entry when enabled and enough was allocated.
    pub(crate) fn maybe_collect(&mut self) {
        let gc = &self.settings.gc;
        if gc.auto_collect && self.heap.allocations() >= gc.allocation_step {
            self.collect_garbage();
        }
    }

    fn roots(&self) -> Vec<HandleId> {
        self.globals
            .children()
            .chain(self.pinned.iter().filter_map(|v| v.as_handle()))
            .collect()
    }

    /// Length of the member chain from `id` up to a whole object.
    fn member_depth(&self, id: HandleId) -> usize {
        let mut depth = 0;
        let mut current = id;
        while let Some(parent) = self
            .heap
            .userdata(current)
            .ok()
            .and_then(|ud| ud.storage.parent())
        {
            depth += 1;
            current = parent;
        }
        depth
    }

    fn destroy(&mut self, id: HandleId) {
        let Some(entry) = self.heap.free(id) else {
            return;
        };
        if let Object::Userdata(ud) = &entry.object {
            if self.identities.get(&ud.identity) == Some(&id) {
                self.identities.remove(&ud.identity);
            }
            tracing::trace!(
                handle = %id,
                type_name = ud.meta.tag.name(),
                owned = ud.meta.owns_object(),
                "handle destroyed"
            );
        }
        metrics! { self.counters.increment("handles.destroyed", 1) }
        if let Some(callbacks) = self.finalizers.remove(&id) {
            for callback in callbacks {
                callback(id);
            }
        }
        // owned storage drops the native object here
        drop(entry);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Value;
    use std::cell::RefCell;
    use std::rc::Rc;

    #[test]
    fn test_unreachable_table_destroyed() {
        let mut state = ScriptState::new();
        let kept = state.new_table();
        state.set_global("kept", kept.clone());
        let dropped = state.new_table();

        let report = state.collect_garbage();
        assert_eq!(report.reachable, 1);
        assert_eq!(report.destroyed, 1);
        assert!(state.is_live(kept.as_handle().unwrap()));
        assert!(!state.is_live(dropped.as_handle().unwrap()));
    }

    #[test]
    fn test_table_contents_traced() {
        let mut state = ScriptState::new();
        let inner = state.new_table();
        let outer = state.table_from([inner.clone()]);
        state.set_global("outer", outer);
        assert_eq!(state.collect_garbage().destroyed, 0);
        assert!(state.is_live(inner.as_handle().unwrap()));
    }

    #[test]
    fn test_anchored_dependent_deferred_then_destroyed_with_holder() {
        let mut state = ScriptState::new();
        let holder = state.new_table();
        let dependent = state.new_table();
        let (h, d) = (holder.as_handle().unwrap(), dependent.as_handle().unwrap());
        state.anchor(h, d);
        state.set_global("holder", holder);

        let report = state.collect_garbage();
        assert_eq!(report.deferred, 1);
        assert!(state.is_deferred(d));

        state.set_global("holder", Value::Nil);
        let report = state.collect_garbage();
        assert_eq!(report.destroyed, 2);
        assert!(!state.is_live(d));
        assert!(state.graph().is_empty());
    }

    #[test]
    fn test_deferred_handle_resurrected() {
        let mut state = ScriptState::new();
        let holder = state.new_table();
        let dependent = state.new_table();
        state.anchor(holder.as_handle().unwrap(), dependent.as_handle().unwrap());
        state.set_global("holder", holder);
        state.collect_garbage();

        state.set_global("again", dependent.clone());
        let report = state.collect_garbage();
        assert_eq!(report.resurrected, 1);
        assert!(!state.is_deferred(dependent.as_handle().unwrap()));
    }

    #[test]
    fn test_finalizers_run_once() {
        let mut state = ScriptState::new();
        let log = Rc::new(RefCell::new(Vec::new()));
        let table = state.new_table();
        let id = table.as_handle().unwrap();
        let sink = log.clone();
        state.on_finalize(id, move |id| sink.borrow_mut().push(id));

        state.collect_garbage();
        state.collect_garbage();
        assert_eq!(*log.borrow(), vec![id]);
    }

    #[test]
    fn test_automatic_collection_at_call_entry() {
        let mut settings = crate::config::Settings::default();
        settings.gc.auto_collect = true;
        settings.gc.allocation_step = 2;
        let mut state = ScriptState::with_settings(settings);
        let noop = state.set_function(
            "noop",
            crate::function::NativeFunction::raw("noop", |_, _| Ok(())),
        );
        let garbage = state.new_table();
        state.new_table();
        state.call(&noop, Vec::new()).unwrap();
        assert!(!state.is_live(garbage.as_handle().unwrap()));
    }

    #[cfg(feature = "metrics")]
    #[test]
    fn test_counters_track_handle_lifetimes() {
        let mut state = ScriptState::new();
        let holder = state.push_owned(1_i64);
        let dependent = state.push_owned(2_i64);
        state.set_global("holder", holder.clone());
        state.anchor(holder.as_handle().unwrap(), dependent.as_handle().unwrap());
        state.collect_garbage();
        state.set_global("holder", Value::Nil);
        state.collect_garbage();

        let counters = state.counters();
        assert_eq!(counters.get("handles.allocated"), 2);
        assert_eq!(counters.get("edges.installed"), 1);
        assert_eq!(counters.get("handles.deferred"), 1);
        assert_eq!(counters.get("handles.destroyed"), 2);
        assert_eq!(counters.get("gc.passes"), 2);
    }

    #[derive(Debug, Clone)]
    struct Tally {
        n: i64,
    }

    crate::define_usertype!(Tally);

    fn eager_state() -> ScriptState {
        let mut settings = crate::config::Settings::default();
        settings.gc.auto_collect = true;
        settings.gc.allocation_step = 1;
        ScriptState::with_settings(settings)
    }

    #[test]
    fn test_call_arguments_are_roots_at_call_entry() {
        let mut state = eager_state();
        state
            .new_usertype::<Tally>("tally")
            .method("get", |t: &Tally, ()| t.n)
            .register();
        let tally = state.push_owned(Tally { n: 5 });
        let id = tally.as_handle().unwrap();

        let results = state.call_method(&tally, "get", Vec::new()).unwrap();
        assert_eq!(results, vec![Value::Integer(5)]);
        assert!(state.is_live(id));

        state.collect_garbage();
        assert!(!state.is_live(id));
    }

    #[test]
    fn test_results_rooted_while_filters_reenter() {
        use crate::filter::Filter;
        use crate::function::NativeFunction;

        let mut state = eager_state();
        let noop = state.set_function("noop", NativeFunction::raw("noop", |_, _| Ok(())));
        let make = state.set_function(
            "make",
            NativeFunction::raw("make", |state, frame| {
                frame.results = vec![state.new_table()];
                Ok(())
            })
            .with_filters([Filter::custom(move |state, _| {
                state.call(&noop, Vec::new())?;
                Ok(())
            })]),
        );

        let made = state.call(&make, Vec::new()).unwrap().remove(0);
        assert!(state.is_live(made.as_handle().unwrap()));
    }
}
