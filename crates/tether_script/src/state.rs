//! The script state
//!
//! `ScriptState` owns the heap, the global table, the registered usertypes
//! and the dependency graph. Everything a script can do goes through it:
//! indexing, calls, conversions, collection.

use crate::config::Settings;
use crate::container::ErasedContainer;
use crate::convert::{Element, FromScript, IntoScript};
use crate::error::{Result, ScriptError};
use crate::function::{CallFrame, NativeFunction};
use crate::heap::{Heap, IdentityKey, Object, Shared, Storage, Userdata};
use crate::projection::Place;
use crate::table::Table;
use crate::usertype::{Binding, UserTypeInfo};
use crate::value::{FunctionId, TableKey, Value};
use std::any::{type_name, Any, TypeId};
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;
use tether_core::{DependencyGraph, HandleError, HandleId, HandleMeta, Ownership, TypeTag};
use tether_metrics::{metrics, Counter};

type Finalizer = Box<dyn FnOnce(HandleId)>;

pub struct ScriptState {
    pub(crate) heap: Heap,
    pub(crate) globals: Table,
    /// Arguments of native calls in progress; roots for the collector.
    pub(crate) pinned: Vec<Value>,
    pub(crate) functions: Vec<Rc<NativeFunction>>,
    pub(crate) types: HashMap<TypeId, UserTypeInfo>,
    pub(crate) identities: HashMap<IdentityKey, HandleId>,
    pub(crate) graph: DependencyGraph,
    pub(crate) finalizers: HashMap<HandleId, Vec<Finalizer>>,
    pub(crate) settings: Settings,
    pub(crate) counters: Counter,
}

impl Default for ScriptState {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptState {
    pub fn new() -> Self {
        Self::with_settings(Settings::default())
    }

    pub fn with_settings(settings: Settings) -> Self {
        tracing::debug!(?settings, "script state created");
        Self {
            heap: Heap::default(),
            globals: Table::new(),
            pinned: Vec::new(),
            functions: Vec::new(),
            types: HashMap::new(),
            identities: HashMap::new(),
            graph: DependencyGraph::new(),
            finalizers: HashMap::new(),
            settings,
            counters: Counter::new(),
        }
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    // ------------------------------------------------------------------
    // Globals
    // ------------------------------------------------------------------

    pub fn set_global(&mut self, name: &str, value: Value) {
        self.globals.set(TableKey::String(Rc::from(name)), value);
    }

    pub fn get_global(&self, name: &str) -> Value {
        self.globals.get(&TableKey::String(Rc::from(name)))
    }

    /// Convert `value` and store it as a global.
    pub fn set<T: IntoScript>(&mut self, name: &str, value: T) -> Result<()> {
        let value = value.into_script(self)?;
        self.set_global(name, value);
        Ok(())
    }

    /// Read a global as `T`.
    pub fn get<T: FromScript>(&mut self, name: &str) -> Result<T> {
        let value = self.get_global(name);
        T::from_script(self, &value)
    }

    pub fn push<T: IntoScript>(&mut self, value: T) -> Result<Value> {
        value.into_script(self)
    }

    pub fn set_function(&mut self, name: &str, function: NativeFunction) -> Value {
        let value = Value::Function(self.register_function(function));
        self.set_global(name, value.clone());
        value
    }

    pub(crate) fn register_function(&mut self, function: NativeFunction) -> FunctionId {
        let id = FunctionId(self.functions.len() as u32);
        self.functions.push(Rc::new(function));
        id
    }

    // ------------------------------------------------------------------
    // Tables
    // ------------------------------------------------------------------

    pub fn new_table(&mut self) -> Value {
        Value::Table(self.heap.alloc(Object::Table(Table::new())))
    }

    /// A table whose array part holds `values` in order.
    pub fn table_from(&mut self, values: impl IntoIterator<Item = Value>) -> Value {
        let mut table = Table::new();
        for (i, value) in values.into_iter().enumerate() {
            table.set(TableKey::Integer(i as i64 + 1), value);
        }
        Value::Table(self.heap.alloc(Object::Table(table)))
    }

    // ------------------------------------------------------------------
    // Pushing native objects
    // ------------------------------------------------------------------

    /// Move `value` into the runtime; the new handle owns it.
    pub fn push_owned<T: Any>(&mut self, value: T) -> Value {
        self.push_owned_with(value, false)
    }

    /// Owned handle whose object script code can read but not modify.
    pub fn push_owned_readonly<T: Any>(&mut self, value: T) -> Value {
        self.push_owned_with(value, true)
    }

    fn push_owned_with<T: Any>(&mut self, value: T, readonly: bool) -> Value {
        let shared = Shared::new(Rc::new(RefCell::new(value)));
        let address = shared.address();
        let meta = HandleMeta::new(TypeTag::of::<T>(), Ownership::Owned, readonly);
        self.alloc_userdata(meta, Storage::Owned(shared), address)
    }

    /// Push a non-owning handle to `target`, reusing the one already
    /// registered for the same object.
    pub fn push_ref<T: Element>(&mut self, target: &Rc<RefCell<T>>) -> Value {
        self.push_ref_with(target, false)
    }

    /// Like [`push_ref`](Self::push_ref) but the handle rejects mutation.
    pub fn push_readonly<T: Element>(&mut self, target: &Rc<RefCell<T>>) -> Value {
        self.push_ref_with(target, true)
    }

    pub(crate) fn push_ref_with<T: Element>(
        &mut self,
        target: &Rc<RefCell<T>>,
        readonly: bool,
    ) -> Value {
        T::install(self);
        let address = target.as_ptr() as *const () as usize;
        let key = IdentityKey {
            address,
            type_id: TypeId::of::<T>(),
            readonly,
        };
        if let Some(id) = self.lookup_identity(&key) {
            return Value::Userdata(id);
        }
        let storage = Storage::External(Shared::new(target.clone()).downgrade());
        let meta = HandleMeta::new(TypeTag::of::<T>(), Ownership::ExternalRef, readonly);
        self.alloc_userdata(meta, storage, address)
    }

    /// Push the sub-object at `place` as a member handle of its parent.
    pub fn push_member<T: Any>(&mut self, place: Place) -> Result<Value> {
        let readonly = place.readonly || self.heap.userdata(place.parent)?.meta.readonly;
        let address = self.place_address(&place)?;
        let key = IdentityKey {
            address,
            type_id: TypeId::of::<T>(),
            readonly,
        };
        if let Some(id) = self.lookup_identity(&key) {
            return Ok(Value::Userdata(id));
        }
        let meta = HandleMeta::new(TypeTag::of::<T>(), Ownership::ExternalRef, readonly);
        let storage = Storage::Member {
            parent: place.parent,
            projection: place.projection,
        };
        Ok(self.alloc_userdata(meta, storage, address))
    }

    fn alloc_userdata(&mut self, meta: HandleMeta, storage: Storage, address: usize) -> Value {
        let identity = IdentityKey {
            address,
            type_id: meta.tag.id(),
            readonly: meta.readonly,
        };
        let id = self.heap.alloc(Object::Userdata(Userdata {
            meta,
            storage,
            identity,
        }));
        self.identities.insert(identity, id);
        metrics! { self.counters.increment("handles.allocated", 1) }
        tracing::trace!(
            handle = %id,
            type_name = meta.tag.name(),
            ownership = ?meta.ownership,
            readonly = meta.readonly,
            "userdata allocated"
        );
        Value::Userdata(id)
    }

    /// The live handle registered for `key`, if its object is still at
    /// that address.
    fn lookup_identity(&self, key: &IdentityKey) -> Option<HandleId> {
        let id = *self.identities.get(key)?;
        (self.address_of(id).ok() == Some(key.address)).then_some(id)
    }

    fn place_address(&self, place: &Place) -> Result<usize> {
        let mut address = None;
        self.visit(place.parent, &mut |parent| {
            address = place
                .projection
                .get(parent)
                .map(|member| member as *const dyn Any as *const () as usize);
        })?;
        address.ok_or_else(|| HandleError::Expired(place.parent).into())
    }

    // ------------------------------------------------------------------
    // Reaching native objects
    // ------------------------------------------------------------------

    /// Borrow the object behind `id` and hand it to `sink`.
    ///
    /// Member handles resolve through their parent chain on every call.
    pub(crate) fn visit(&self, id: HandleId, sink: &mut dyn FnMut(&dyn Any)) -> Result<()> {
        let ud = self.heap.userdata(id)?;
        match &ud.storage {
            Storage::Owned(shared) => {
                let guard = shared.cell.try_borrow().map_err(|_| borrow_conflict(ud))?;
                sink(&*guard);
            }
            Storage::External(weak) => {
                let shared = weak.upgrade().ok_or(HandleError::Expired(id))?;
                let guard = shared.cell.try_borrow().map_err(|_| borrow_conflict(ud))?;
                sink(&*guard);
            }
            Storage::Member { parent, projection } => {
                let mut found = false;
                self.visit(*parent, &mut |p| {
                    if let Some(member) = projection.get(p) {
                        found = true;
                        sink(member);
                    }
                })?;
                if !found {
                    return Err(HandleError::Expired(id).into());
                }
            }
        }
        Ok(())
    }

    pub(crate) fn visit_mut(
        &self,
        id: HandleId,
        sink: &mut dyn FnMut(&mut dyn Any),
    ) -> Result<()> {
        let ud = self.heap.userdata(id)?;
        match &ud.storage {
            Storage::Owned(shared) => {
                let mut guard = shared
                    .cell
                    .try_borrow_mut()
                    .map_err(|_| borrow_conflict(ud))?;
                sink(&mut *guard);
            }
            Storage::External(weak) => {
                let shared = weak.upgrade().ok_or(HandleError::Expired(id))?;
                let mut guard = shared
                    .cell
                    .try_borrow_mut()
                    .map_err(|_| borrow_conflict(ud))?;
                sink(&mut *guard);
            }
            Storage::Member { parent, projection } => {
                let mut found = false;
                self.visit_mut(*parent, &mut |p| {
                    if let Some(member) = projection.get_mut(p) {
                        found = true;
                        sink(member);
                    }
                })?;
                if !found {
                    return Err(HandleError::Expired(id).into());
                }
            }
        }
        Ok(())
    }

    pub fn with_ref<T: Any, R>(&self, id: HandleId, f: impl FnOnce(&T) -> R) -> Result<R> {
        let mut f = Some(f);
        let mut out = None;
        self.visit(id, &mut |any| {
            if let (Some(value), Some(f)) = (any.downcast_ref::<T>(), f.take()) {
                out = Some(f(value));
            }
        })?;
        out.ok_or_else(|| self.mismatch::<T>(id))
    }

    /// Mutable access; fails on read-only handles.
    pub fn with_mut<T: Any, R>(&self, id: HandleId, f: impl FnOnce(&mut T) -> R) -> Result<R> {
        self.ensure_writable(id)?;
        let mut f = Some(f);
        let mut out = None;
        self.visit_mut(id, &mut |any| {
            if let (Some(value), Some(f)) = (any.downcast_mut::<T>(), f.take()) {
                out = Some(f(value));
            }
        })?;
        out.ok_or_else(|| self.mismatch::<T>(id))
    }

    pub fn read_userdata<T: Any, R>(&self, value: &Value, f: impl FnOnce(&T) -> R) -> Result<R> {
        match value {
            Value::Userdata(id) => self.with_ref(*id, f),
            other => Err(ScriptError::conversion::<T>(other)),
        }
    }

    pub fn read_place<T: Any, R>(&self, place: &Place, f: impl FnOnce(&T) -> R) -> Result<R> {
        let mut f = Some(f);
        let mut out = None;
        self.visit(place.parent, &mut |parent| {
            let value = place
                .projection
                .get(parent)
                .and_then(|member| member.downcast_ref::<T>());
            if let (Some(value), Some(f)) = (value, f.take()) {
                out = Some(f(value));
            }
        })?;
        out.ok_or_else(|| HandleError::Expired(place.parent).into())
    }

    pub fn write_place<T: Any>(&self, place: &Place, value: T) -> Result<()> {
        if place.readonly {
            return Err(ScriptError::read_only::<T>());
        }
        self.ensure_writable(place.parent)?;
        let mut value = Some(value);
        let mut written = false;
        self.visit_mut(place.parent, &mut |parent| {
            let slot = place
                .projection
                .get_mut(parent)
                .and_then(|member| member.downcast_mut::<T>());
            if let (Some(slot), Some(value)) = (slot, value.take()) {
                *slot = value;
                written = true;
            }
        })?;
        if written {
            Ok(())
        } else {
            Err(HandleError::Expired(place.parent).into())
        }
    }

    /// Strong reference to a whole object behind `id`. Member handles
    /// cannot be shared this way.
    pub fn shared<T: Any>(&self, id: HandleId) -> Result<Rc<RefCell<T>>> {
        let ud = self.heap.userdata(id)?;
        let shared = match &ud.storage {
            Storage::Owned(shared) => shared.clone(),
            Storage::External(weak) => weak.upgrade().ok_or(HandleError::Expired(id))?,
            Storage::Member { .. } => {
                return Err(ScriptError::Conversion {
                    expected: type_name::<Rc<RefCell<T>>>(),
                    found: "member handle",
                })
            }
        };
        shared.typed::<T>().ok_or_else(|| self.mismatch::<T>(id))
    }

    pub(crate) fn ensure_writable(&self, id: HandleId) -> Result<()> {
        let ud = self.heap.userdata(id)?;
        if ud.meta.readonly {
            return Err(ScriptError::ReadOnly {
                type_name: ud.meta.tag.name(),
            });
        }
        Ok(())
    }

    fn mismatch<T>(&self, id: HandleId) -> ScriptError {
        ScriptError::Conversion {
            expected: type_name::<T>(),
            found: self
                .heap
                .userdata(id)
                .map_or("userdata", |ud| ud.meta.tag.name()),
        }
    }

    /// Address of the native object behind `id`.
    pub fn address_of(&self, id: HandleId) -> Result<usize> {
        let mut address = 0;
        self.visit(id, &mut |any| {
            address = any as *const dyn Any as *const () as usize;
        })?;
        Ok(address)
    }

    // ------------------------------------------------------------------
    // Indexing
    // ------------------------------------------------------------------

    pub fn index(&mut self, target: &Value, key: &Value) -> Result<Value> {
        match target {
            Value::Table(id) => match TableKey::from_value(key) {
                Ok(key) => Ok(self.heap.table(*id)?.get(&key)),
                Err(_) => Ok(Value::Nil),
            },
            Value::Userdata(id) => self.index_userdata(*id, key),
            other => Err(ScriptError::NotIndexable {
                found: other.type_name(),
            }),
        }
    }

    pub fn set_index(
        &mut self,
        target: &Value,
        key: impl Into<Value>,
        value: impl Into<Value>,
    ) -> Result<()> {
        let (key, value) = (key.into(), value.into());
        match target {
            Value::Table(id) => {
                let key = TableKey::from_value(&key)?;
                self.heap.table_mut(*id)?.set(key, value);
                Ok(())
            }
            Value::Userdata(id) => self.set_userdata(*id, &key, &value),
            other => Err(ScriptError::NotIndexable {
                found: other.type_name(),
            }),
        }
    }

    fn index_userdata(&mut self, id: HandleId, key: &Value) -> Result<Value> {
        let tag = self.heap.userdata(id)?.meta.tag;
        if let Value::String(name) = key {
            match self.binding(tag, name) {
                Some(Binding::Method(function)) => return Ok(Value::Function(function)),
                Some(Binding::Field(field)) => return field.read(self, id),
                None => {}
            }
        }
        match self.container_ops(tag) {
            Some(ops) => ops.get(self, id, key),
            None => Ok(Value::Nil),
        }
    }

    fn set_userdata(&mut self, id: HandleId, key: &Value, value: &Value) -> Result<()> {
        let tag = self.heap.userdata(id)?.meta.tag;
        if let Value::String(name) = key {
            match self.binding(tag, name) {
                Some(Binding::Field(field)) => return field.write(self, id, value),
                Some(Binding::Method(_)) => {
                    return Err(ScriptError::ReadOnly {
                        type_name: tag.name(),
                    })
                }
                None => {}
            }
        }
        match self.container_ops(tag) {
            Some(ops) => ops.set(self, id, key, value),
            None => Err(ScriptError::UnknownMember {
                type_name: tag.name(),
                name: key.as_str().map_or_else(|| key.type_name().to_owned(), str::to_owned),
            }),
        }
    }

    fn binding(&self, tag: TypeTag, name: &str) -> Option<Binding> {
        self.types.get(&tag.id())?.members.get(name).cloned()
    }

    fn container_ops(&self, tag: TypeTag) -> Option<Rc<dyn ErasedContainer>> {
        self.types.get(&tag.id())?.container.clone()
    }

    fn container_of(&self, id: HandleId, operation: &'static str) -> Result<Rc<dyn ErasedContainer>> {
        let tag = self.heap.userdata(id)?.meta.tag;
        self.container_ops(tag).ok_or(ScriptError::Unsupported {
            type_name: tag.name(),
            operation,
        })
    }

    /// Length operator.
    pub fn len(&self, target: &Value) -> Result<usize> {
        match target {
            Value::Table(id) => Ok(self.heap.table(*id)?.len()),
            Value::String(s) => Ok(s.len()),
            Value::Userdata(id) => self.container_of(*id, "length")?.len(self, *id),
            other => Err(ScriptError::NotIndexable {
                found: other.type_name(),
            }),
        }
    }

    /// Iteration step: the entry after `cursor` (start with 0) and the
    /// cursor for the following call.
    pub fn next(&mut self, target: &Value, cursor: usize) -> Result<Option<(usize, Value, Value)>> {
        match target {
            Value::Table(id) => Ok(self.heap.table(*id)?.next(cursor)),
            Value::Userdata(id) => {
                let ops = self.container_of(*id, "iteration")?;
                Ok(ops
                    .next(self, *id, cursor)?
                    .map(|(key, value)| (cursor + 1, key, value)))
            }
            other => Err(ScriptError::NotIndexable {
                found: other.type_name(),
            }),
        }
    }

    pub fn pairs(&mut self, target: &Value) -> Result<Vec<(Value, Value)>> {
        let mut entries = Vec::new();
        let mut cursor = 0;
        while let Some((next, key, value)) = self.next(target, cursor)? {
            entries.push((key, value));
            cursor = next;
        }
        Ok(entries)
    }

    /// Values at `1, 2, ...` up to the first `nil`.
    pub fn ipairs(&mut self, target: &Value) -> Result<Vec<Value>> {
        let mut values = Vec::new();
        loop {
            let value = self.index(target, &Value::Integer(values.len() as i64 + 1))?;
            if value.is_nil() {
                return Ok(values);
            }
            values.push(value);
        }
    }

    // ------------------------------------------------------------------
    // Calls
    // ------------------------------------------------------------------

    pub fn call(&mut self, callee: &Value, args: Vec<Value>) -> Result<Vec<Value>> {
        let function = match callee {
            Value::Function(id) => self.functions.get(id.0 as usize).cloned(),
            _ => None,
        }
        .ok_or(ScriptError::NotCallable {
            found: callee.type_name(),
        })?;

        let base = self.pinned.len();
        self.pinned.extend(args.iter().cloned());
        self.maybe_collect();
        let mut frame = CallFrame::new(args);
        tracing::trace!(function = function.name(), args = frame.args.len(), "native call");
        let outcome = function.invoke(self, &mut frame);
        self.pinned.truncate(base);
        outcome.map(|()| frame.into_results())
    }

    /// `target:name(args...)`
    pub fn call_method(&mut self, target: &Value, name: &str, args: Vec<Value>) -> Result<Vec<Value>> {
        let method = self.index(target, &Value::from(name))?;
        if method.is_nil() {
            let type_name = match target {
                Value::Userdata(id) => self.heap.userdata(*id)?.meta.tag.name(),
                other => other.type_name(),
            };
            return Err(ScriptError::UnknownMember {
                type_name,
                name: name.to_owned(),
            });
        }
        let mut full = Vec::with_capacity(args.len() + 1);
        full.push(target.clone());
        full.extend(args);
        self.call(&method, full)
    }

    // ------------------------------------------------------------------
    // Identity and display
    // ------------------------------------------------------------------

    /// Reference equality; userdata compare by the object they reach.
    pub fn raw_equal(&self, a: &Value, b: &Value) -> bool {
        match (a, b) {
            (Value::Userdata(x), Value::Userdata(y)) if x != y => {
                match (self.identity_of(*x), self.identity_of(*y)) {
                    (Ok(p), Ok(q)) => p == q,
                    _ => false,
                }
            }
            _ => a == b,
        }
    }

    fn identity_of(&self, id: HandleId) -> Result<(usize, TypeId)> {
        let type_id = self.heap.userdata(id)?.meta.tag.id();
        Ok((self.address_of(id)?, type_id))
    }

    pub fn tostring(&self, value: &Value) -> Result<String> {
        let text = match value {
            Value::Nil => "nil".to_owned(),
            Value::Boolean(b) => b.to_string(),
            Value::Integer(i) => i.to_string(),
            Value::Number(n) if n.is_finite() && n.fract() == 0.0 => format!("{n:.1}"),
            Value::Number(n) => n.to_string(),
            Value::String(s) => s.to_string(),
            Value::Table(id) => format!("table: {id}"),
            Value::Function(id) => id.to_string(),
            Value::Userdata(id) => {
                let tag = self.heap.userdata(*id)?.meta.tag;
                match self.types.get(&tag.id()) {
                    Some(UserTypeInfo {
                        display: Some(display),
                        ..
                    }) => display(self, *id)?,
                    Some(info) => format!("{}: {id}", info.name),
                    None => format!("{}: {id}", tag.name()),
                }
            }
        };
        Ok(text)
    }

    // ------------------------------------------------------------------
    // Lifetime
    // ------------------------------------------------------------------

    /// Record that `holder` keeps `dependent` alive. Both must be live.
    pub fn anchor(&mut self, holder: HandleId, dependent: HandleId) -> bool {
        if !self.heap.contains(holder) || !self.heap.contains(dependent) {
            tracing::warn!(%holder, %dependent, "anchor between dead handles ignored");
            return false;
        }
        let added = self.graph.anchor(holder, dependent);
        if added {
            metrics! { self.counters.increment("edges.installed", 1) }
        }
        added
    }

    /// Run `callback` when `id` is destroyed by the collector.
    pub fn on_finalize(&mut self, id: HandleId, callback: impl FnOnce(HandleId) + 'static) {
        self.finalizers.entry(id).or_default().push(Box::new(callback));
    }

    pub fn handle_of(&self, value: &Value) -> Option<HandleId> {
        value.as_handle()
    }

    pub fn is_live(&self, id: HandleId) -> bool {
        self.heap.contains(id)
    }

    pub fn is_deferred(&self, id: HandleId) -> bool {
        self.heap.entry(id).is_some_and(|entry| entry.deferred)
    }

    pub fn anchor_count(&self, id: HandleId) -> usize {
        self.graph.anchor_count(id)
    }

    pub fn handle_meta(&self, id: HandleId) -> Option<HandleMeta> {
        self.heap.userdata(id).ok().map(|ud| ud.meta)
    }

    pub fn graph(&self) -> &DependencyGraph {
        &self.graph
    }

    /// Number of live heap objects.
    pub fn heap_len(&self) -> usize {
        self.heap.len()
    }

    pub fn counters(&self) -> &Counter {
        &self.counters
    }
}

fn borrow_conflict(ud: &Userdata) -> ScriptError {
    ScriptError::BorrowConflict {
        type_name: ud.meta.tag.name(),
    }
}
