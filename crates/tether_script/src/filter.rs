//! Post-call filters
//!
//! A filter runs after a native function returns and may rewrite the
//! results or install dependency edges between heap objects on the
//! frame's stack. Filters attached to one binding run in order.

use crate::error::Result;
use crate::function::CallFrame;
use crate::state::ScriptState;
use crate::value::Value;
use std::fmt;
use std::rc::Rc;

pub type FilterFn = Rc<dyn Fn(&mut ScriptState, &mut CallFrame) -> Result<()>>;

#[derive(Clone)]
pub enum Filter {
    /// Results become the receiver itself (`self` returned by identity).
    /// Pair it with a body that returns nothing, as
    /// [`UserTypeBuilder::chain_method`](crate::UserTypeBuilder::chain_method)
    /// does, so no other result is ever wrapped.
    ReturnsSelf,
    /// The receiver keeps every heap object among the results alive.
    SelfDependency,
    /// Objects at `dependencies` keep the object at `target` alive.
    /// Positions index the argument/result stack like [`CallFrame::stack`].
    StackDependencies { target: i32, dependencies: Vec<i32> },
    Custom(FilterFn),
}

impl Filter {
    pub fn stack_dependencies(target: i32, dependencies: impl IntoIterator<Item = i32>) -> Self {
        Filter::StackDependencies {
            target,
            dependencies: dependencies.into_iter().collect(),
        }
    }

    pub fn custom(f: impl Fn(&mut ScriptState, &mut CallFrame) -> Result<()> + 'static) -> Self {
        Filter::Custom(Rc::new(f))
    }

    pub(crate) fn apply(&self, state: &mut ScriptState, frame: &mut CallFrame) -> Result<()> {
        match self {
            Filter::ReturnsSelf => {
                frame.results = frame.args.first().cloned().into_iter().collect();
            }
            Filter::SelfDependency => {
                let Some(holder) = frame.args.first().and_then(Value::as_handle) else {
                    tracing::trace!("self dependency skipped, no receiver");
                    return Ok(());
                };
                for dependent in frame.results.iter().filter_map(Value::as_handle) {
                    state.anchor(holder, dependent);
                }
            }
            Filter::StackDependencies {
                target,
                dependencies,
            } => {
                let Some(holder) = frame.stack(*target).and_then(Value::as_handle) else {
                    return Ok(());
                };
                for position in dependencies {
                    if let Some(dependent) = frame.stack(*position).and_then(Value::as_handle) {
                        state.anchor(holder, dependent);
                    }
                }
            }
            Filter::Custom(f) => f(state, frame)?,
        }
        Ok(())
    }
}

impl fmt::Debug for Filter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Filter::ReturnsSelf => f.write_str("ReturnsSelf"),
            Filter::SelfDependency => f.write_str("SelfDependency"),
            Filter::StackDependencies {
                target,
                dependencies,
            } => f
                .debug_struct("StackDependencies")
                .field("target", target)
                .field("dependencies", dependencies)
                .finish(),
            Filter::Custom(_) => f.write_str("Custom"),
        }
    }
}

pub(crate) fn run_filters(
    filters: &[Filter],
    state: &mut ScriptState,
    frame: &mut CallFrame,
) -> Result<()> {
    for filter in filters {
        tracing::trace!(?filter, "applying filter");
        filter.apply(state, frame)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_returns_self_replaces_results() {
        let mut state = ScriptState::new();
        let receiver = state.new_table();
        let mut frame = CallFrame {
            args: vec![receiver.clone(), Value::Integer(1)],
            results: vec![Value::Integer(7), Value::Integer(8)],
        };
        Filter::ReturnsSelf.apply(&mut state, &mut frame).unwrap();
        assert_eq!(frame.results, vec![receiver]);
    }

    #[test]
    fn test_stack_dependencies_skip_non_heap_positions() {
        let mut state = ScriptState::new();
        let holder = state.new_table();
        let dependent = state.new_table();
        let mut frame = CallFrame {
            args: vec![Value::Integer(5), dependent.clone()],
            results: vec![holder.clone()],
        };
        Filter::stack_dependencies(-1, [1, 2])
            .apply(&mut state, &mut frame)
            .unwrap();

        let (Some(holder), Some(dependent)) = (holder.as_handle(), dependent.as_handle()) else {
            panic!("tables are heap objects");
        };
        assert_eq!(state.graph().dependents_of(holder), &[dependent]);
        assert_eq!(state.anchor_count(dependent), 1);
    }

    #[test]
    fn test_custom_filter_rewrites_results() {
        let mut state = ScriptState::new();
        let mut frame = CallFrame::new(Vec::new());
        let filter = Filter::custom(|_, frame| {
            frame.results = vec![Value::Integer(24)];
            Ok(())
        });
        run_filters(&[filter], &mut state, &mut frame).unwrap();
        assert_eq!(frame.results, vec![Value::Integer(24)]);
    }

    mod lifetimes {
        use crate::convert::NativeRef;
        use crate::define_usertype;
        use crate::error::ScriptError;
        use crate::filter::Filter;
        use crate::state::ScriptState;
        use crate::value::Value;
        use std::cell::{Cell, RefCell};
        use std::rc::Rc;
        use tether_core::HandleError;

        type Log = Rc<RefCell<Vec<&'static str>>>;

        #[derive(Debug, Clone, Default)]
        struct Builder {
            steps: i64,
        }

        define_usertype!(Builder);

        struct Dep {
            value: i64,
            log: Log,
        }

        impl Drop for Dep {
            fn drop(&mut self) {
                self.log.borrow_mut().push("dep dropped");
            }
        }

        define_usertype!(Dep, no_clone);

        struct Holder {
            dep: Dep,
            log: Log,
        }

        impl Drop for Holder {
            fn drop(&mut self) {
                self.log.borrow_mut().push("holder dropped");
            }
        }

        define_usertype!(Holder, no_clone);

        struct Target {
            drops: Rc<Cell<usize>>,
        }

        impl Drop for Target {
            fn drop(&mut self) {
                self.drops.set(self.drops.get() + 1);
            }
        }

        define_usertype!(Target, no_clone);

        #[derive(Debug, Clone, Default)]
        struct Stats {
            reads: i64,
        }

        define_usertype!(Stats);

        struct Owner {
            target: NativeRef<Target>,
            stats: Stats,
        }

        define_usertype!(Owner, no_clone);

        fn key(name: &str) -> Value {
            Value::from(name)
        }

        fn holder_state(log: &Log) -> (ScriptState, Value) {
            let mut state = ScriptState::new();
            state
                .new_usertype::<Dep>("dep")
                .field("value", |d| &d.value, |d| &mut d.value)
                .register();
            state
                .new_usertype::<Holder>("holder")
                .field("dep", |h| &h.dep, |h| &mut h.dep)
                .filters("dep", [Filter::SelfDependency])
                .register();
            let holder = state.push_owned(Holder {
                dep: Dep {
                    value: 11,
                    log: log.clone(),
                },
                log: log.clone(),
            });
            (state, holder)
        }

        fn finalize_into(state: &mut ScriptState, value: &Value, log: &Log, label: &'static str) {
            let sink = log.clone();
            let id = value.as_handle().unwrap();
            state.on_finalize(id, move |_| sink.borrow_mut().push(label));
        }

        #[test]
        fn test_returns_self_keeps_identity_after_collection() {
            let mut state = ScriptState::new();
            state
                .new_usertype::<Builder>("builder")
                .constructor(|()| Builder::default())
                .chain_method("step", |b: &mut Builder, ()| b.steps += 1)
                .register();

            let class = state.get_global("builder");
            let new = state.index(&class, &key("new")).unwrap();
            let builder = state.call(&new, Vec::new()).unwrap().remove(0);
            state.set_global("b", builder.clone());

            let before = state.heap_len();
            let returned = state.call_method(&builder, "step", Vec::new()).unwrap().remove(0);
            assert_eq!(state.heap_len(), before);
            assert_eq!(returned, builder);
            assert!(state.raw_equal(&returned, &builder));

            state.set_global("r", returned.clone());
            state.set_global("b", Value::Nil);
            let report = state.collect_garbage();
            assert_eq!(report.destroyed, 0);
            assert!(state.raw_equal(&state.get_global("r"), &builder));
            assert_eq!(state.get::<Builder>("r").unwrap().steps, 1);
        }

        #[test]
        fn test_member_outlives_dropped_holder() {
            let log = Log::default();
            let (mut state, holder) = holder_state(&log);
            let dep = state.index(&holder, &key("dep")).unwrap();
            let (h, d) = (holder.as_handle().unwrap(), dep.as_handle().unwrap());
            assert_eq!(state.anchor_count(d), 1);

            state.set_global("dep", dep.clone());
            let report = state.collect_garbage();
            assert_eq!(report.destroyed, 0);
            assert!(state.is_live(h));
            assert_eq!(state.index(&dep, &key("value")).unwrap(), Value::Integer(11));
            assert!(log.borrow().is_empty());
        }

        #[test]
        fn test_member_deferred_while_holder_reachable() {
            let log = Log::default();
            let (mut state, holder) = holder_state(&log);
            state.set_global("holder", holder.clone());
            let dep = state.index(&holder, &key("dep")).unwrap();
            let d = dep.as_handle().unwrap();

            let report = state.collect_garbage();
            assert_eq!(report.destroyed, 0);
            assert_eq!(report.deferred, 1);
            assert!(state.is_deferred(d));

            // fetching the member again hands back the deferred handle
            let again = state.index(&holder, &key("dep")).unwrap();
            assert_eq!(again, dep);
            state.set_global("dep", again);
            assert_eq!(state.collect_garbage().resurrected, 1);
            assert!(log.borrow().is_empty());
        }

        #[test]
        fn test_holder_and_member_destroyed_once_member_first() {
            let log = Log::default();
            let (mut state, holder) = holder_state(&log);
            let dep = state.index(&holder, &key("dep")).unwrap();
            finalize_into(&mut state, &holder, &log, "holder finalized");
            finalize_into(&mut state, &dep, &log, "dep finalized");

            state.set_global("holder", holder.clone());
            state.set_global("dep", dep.clone());
            state.collect_garbage();
            state.set_global("holder", Value::Nil);
            state.set_global("dep", Value::Nil);

            let report = state.collect_garbage();
            assert_eq!(report.destroyed, 2);
            assert_eq!(
                *log.borrow(),
                vec!["dep finalized", "holder finalized", "holder dropped", "dep dropped"]
            );
            assert!(state.graph().is_empty());

            assert_eq!(state.collect_garbage().destroyed, 0);
            assert_eq!(log.borrow().len(), 4);
        }

        fn owner_state(filters: Vec<Filter>) -> ScriptState {
            let mut state = ScriptState::new();
            state.new_usertype::<Target>("target").register();
            state
                .new_usertype::<Stats>("stats")
                .field("reads", |s| &s.reads, |s| &mut s.reads)
                .register();
            state
                .new_usertype::<Owner>("owner")
                .function("new", |(target,): (NativeRef<Target>,)| Owner {
                    target,
                    stats: Stats::default(),
                })
                .filters("new", filters)
                .method_mut("touch", |o: &mut Owner, ()| {
                    o.stats.reads += 1;
                    o.target.with(|t| t.drops.get())
                })
                .field("stats", |o| &o.stats, |o| &mut o.stats)
                .register();
            state
        }

        fn construct(state: &mut ScriptState, target: &Value) -> Value {
            let class = state.get_global("owner");
            let new = state.index(&class, &key("new")).unwrap();
            state.call(&new, vec![target.clone()]).unwrap().remove(0)
        }

        #[test]
        fn test_stack_dependency_keeps_argument_alive() {
            let drops = Rc::new(Cell::new(0));
            let mut state = owner_state(vec![Filter::stack_dependencies(-1, [1])]);
            let target = state.push_owned(Target {
                drops: drops.clone(),
            });
            let owner = construct(&mut state, &target);
            let stats = state.index(&owner, &key("stats")).unwrap();

            // only a reference extracted from the owner survives
            state.set_global("stats", stats);
            let report = state.collect_garbage();
            assert_eq!(report.destroyed, 0);
            assert_eq!(drops.get(), 0);
            assert!(state.is_deferred(target.as_handle().unwrap()));
            assert!(state.call_method(&owner, "touch", Vec::new()).is_ok());

            state.set_global("stats", Value::Nil);
            let report = state.collect_garbage();
            assert_eq!(report.destroyed, 3);
            assert_eq!(drops.get(), 1);
            state.collect_garbage();
            assert_eq!(drops.get(), 1);
        }

        #[test]
        fn test_unanchored_argument_expires() {
            let drops = Rc::new(Cell::new(0));
            let mut state = owner_state(Vec::new());
            let target = state.push_owned(Target {
                drops: drops.clone(),
            });
            let owner = construct(&mut state, &target);
            state.set_global("owner", owner.clone());

            state.collect_garbage();
            assert_eq!(drops.get(), 1);
            let err = state.call_method(&owner, "touch", Vec::new()).unwrap_err();
            assert!(matches!(err, ScriptError::Handle(HandleError::Expired(_))));
        }
    }
}
