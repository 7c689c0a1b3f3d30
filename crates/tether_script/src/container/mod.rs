//! Container adapters
//!
//! Native collections pushed into the runtime stay native: script code
//! indexes, assigns, iterates and measures them through a proxy handle,
//! and every edit lands in the original collection. Elements are pushed
//! as member handles of the container, so an element object keeps its
//! identity across reads.

mod associative;
mod sequence;

use crate::convert::{Element, FromScript, IntoResults, IntoScript};
use crate::error::{Result, ScriptError};
use crate::function::NativeFunction;
use crate::projection::{Place, Project};
use crate::state::ScriptState;
use crate::usertype::{Binding, UserTypeInfo};
use crate::value::Value;
use std::any::{type_name, Any, TypeId};
use std::cell::RefCell;
use std::rc::Rc;
use tether_core::HandleId;

/// How a container is addressed from script.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Shape {
    /// Growable, 1-based integer keys.
    Sequence,
    /// Like `Sequence` but reached by walking from the front.
    ForwardList,
    /// Fixed length; elements can be replaced, never added or removed.
    FixedArray,
    Associative,
    /// Elements are their own keys and cannot be edited in place.
    Set,
}

/// One write to a container slot.
#[derive(Debug)]
pub enum Edit<T> {
    Erase,
    Put(T),
    /// Add the key itself (sets).
    Insert,
}

/// A native collection usable from script.
pub trait ContainerAdapter: Any + Sized {
    type Key: Clone + 'static;
    type Item: Element;
    const SHAPE: Shape;

    fn size(&self) -> usize;

    /// Native key for a script key, `None` when it cannot address this
    /// container.
    fn key_of(state: &mut ScriptState, key: &Value) -> Option<Self::Key>;
    fn key_value(state: &mut ScriptState, key: &Self::Key) -> Result<Value>;

    /// Key of the entry at iteration `position`.
    fn key_at(&self, position: usize) -> Option<Self::Key>;

    /// Every key, in iteration order.
    fn key_list(&self) -> Vec<Self::Key> {
        (0..self.size()).filter_map(|position| self.key_at(position)).collect()
    }

    fn item(&self, key: &Self::Key) -> Option<&Self::Item>;
    fn item_mut(&mut self, key: &Self::Key) -> Option<&mut Self::Item>;

    fn apply(&mut self, key: Self::Key, edit: Edit<Self::Item>) -> Result<()>;
    fn wipe(&mut self) -> Result<()>;

    fn into_entries(self) -> Vec<(Self::Key, Self::Item)>;

    /// Build a fresh container from a table or another container's proxy.
    fn collect(state: &mut ScriptState, value: &Value) -> Result<Self>;

    /// Edit requested by assigning `value`; `nil` erases.
    fn edit(state: &mut ScriptState, value: &Value) -> Result<Edit<Self::Item>> {
        if Self::Item::IMMUTABLE {
            return Err(ScriptError::read_only::<Self::Item>());
        }
        match value {
            Value::Nil => Ok(Edit::Erase),
            value => Ok(Edit::Put(Self::Item::from_script(state, value)?)),
        }
    }
}

/// Type-erased container operations stored with the usertype.
pub(crate) trait ErasedContainer {
    fn type_name(&self) -> &'static str;
    fn len(&self, state: &ScriptState, id: HandleId) -> Result<usize>;
    /// `nil` for a missing key.
    fn get(&self, state: &mut ScriptState, id: HandleId, key: &Value) -> Result<Value>;
    /// Like `get`, but pairs come back as two values.
    fn spread(&self, state: &mut ScriptState, id: HandleId, key: &Value) -> Result<Vec<Value>>;
    fn set(&self, state: &mut ScriptState, id: HandleId, key: &Value, value: &Value) -> Result<()>;
    fn next(&self, state: &mut ScriptState, id: HandleId, position: usize) -> Result<Option<(Value, Value)>>;
    fn clear(&self, state: &mut ScriptState, id: HandleId) -> Result<()>;
    fn add(&self, state: &mut ScriptState, id: HandleId, value: &Value) -> Result<()>;
}

pub(crate) struct Adapter<C: ContainerAdapter> {
    /// Keys of the last keyed container iterated; positional lookups in
    /// maps and sets are linear, so `next` walks this snapshot instead.
    cursor: RefCell<Option<(HandleId, Vec<C::Key>)>>,
}

/// Projection from a container to the element under `key`.
struct ContainerSlot<C: ContainerAdapter> {
    key: C::Key,
}

impl<C: ContainerAdapter> Project for ContainerSlot<C> {
    fn get<'a>(&self, parent: &'a dyn Any) -> Option<&'a dyn Any> {
        let item = parent.downcast_ref::<C>()?.item(&self.key)?;
        Some(item as &dyn Any)
    }

    fn get_mut<'a>(&self, parent: &'a mut dyn Any) -> Option<&'a mut dyn Any> {
        let item = parent.downcast_mut::<C>()?.item_mut(&self.key)?;
        Some(item as &mut dyn Any)
    }
}

impl<C: ContainerAdapter> Adapter<C> {
    fn new() -> Self {
        Adapter {
            cursor: RefCell::new(None),
        }
    }

    fn slot(id: HandleId, key: C::Key) -> Place {
        Place::new(id, Rc::new(ContainerSlot::<C> { key }), C::SHAPE == Shape::Set)
    }

    fn locate(state: &mut ScriptState, id: HandleId, key: &Value) -> Result<Option<Place>> {
        let Some(native) = C::key_of(state, key) else {
            return Ok(None);
        };
        let present = state.with_ref::<C, _>(id, |c| c.item(&native).is_some())?;
        Ok(present.then(|| Self::slot(id, native)))
    }

    /// Key at `position`, from the snapshot taken when iteration of `id`
    /// started. The snapshot is retaken when another container was
    /// iterated in between or the contents visibly changed.
    fn cached_key(&self, state: &ScriptState, id: HandleId, position: usize) -> Result<Option<C::Key>> {
        let mut cursor = self.cursor.borrow_mut();
        state.with_ref::<C, _>(id, |c| {
            let stale = match cursor.as_ref() {
                Some((cached, keys)) => {
                    position == 0
                        || *cached != id
                        || keys.len() != c.size()
                        || keys.get(position).is_some_and(|key| c.item(key).is_none())
                }
                None => true,
            };
            if stale {
                *cursor = Some((id, c.key_list()));
            }
            cursor.as_ref().and_then(|(_, keys)| keys.get(position).cloned())
        })
    }
}

impl<C: ContainerAdapter> ErasedContainer for Adapter<C> {
    fn type_name(&self) -> &'static str {
        type_name::<C>()
    }

    fn len(&self, state: &ScriptState, id: HandleId) -> Result<usize> {
        state.with_ref::<C, _>(id, |c| c.size())
    }

    fn get(&self, state: &mut ScriptState, id: HandleId, key: &Value) -> Result<Value> {
        match Self::locate(state, id, key)? {
            Some(place) => {
                C::Item::install(state);
                C::Item::push_place(state, place)
            }
            None => Ok(Value::Nil),
        }
    }

    fn spread(&self, state: &mut ScriptState, id: HandleId, key: &Value) -> Result<Vec<Value>> {
        match Self::locate(state, id, key)? {
            Some(place) => {
                C::Item::install(state);
                C::Item::spread(state, place)
            }
            None => Ok(vec![Value::Nil]),
        }
    }

    fn set(&self, state: &mut ScriptState, id: HandleId, key: &Value, value: &Value) -> Result<()> {
        state.ensure_writable(id)?;
        let Some(native) = C::key_of(state, key) else {
            if state.settings().containers.strict_keys {
                return Err(ScriptError::InvalidKey {
                    type_name: type_name::<C>(),
                    key: key.type_name(),
                });
            }
            tracing::trace!(container = type_name::<C>(), key = key.type_name(), "write with unusable key ignored");
            return Ok(());
        };
        let edit = C::edit(state, value)?;
        state.with_mut::<C, _>(id, |c| c.apply(native, edit))?
    }

    fn next(&self, state: &mut ScriptState, id: HandleId, position: usize) -> Result<Option<(Value, Value)>> {
        let native = match C::SHAPE {
            Shape::Associative | Shape::Set => self.cached_key(state, id, position)?,
            _ => state.with_ref::<C, _>(id, |c| c.key_at(position))?,
        };
        let Some(native) = native else {
            return Ok(None);
        };
        let key = C::key_value(state, &native)?;
        C::Item::install(state);
        let value = C::Item::push_place(state, Self::slot(id, native))?;
        Ok(Some((key, value)))
    }

    fn clear(&self, state: &mut ScriptState, id: HandleId) -> Result<()> {
        state.with_mut::<C, _>(id, |c| c.wipe())?
    }

    fn add(&self, state: &mut ScriptState, id: HandleId, value: &Value) -> Result<()> {
        match C::SHAPE {
            Shape::Associative => Err(ScriptError::unsupported::<C>("add")),
            Shape::Set => self.set(state, id, value, value),
            _ => {
                let len = self.len(state, id)?;
                self.set(state, id, &Value::Integer(len as i64 + 1), value)
            }
        }
    }
}

/// Default members every container proxy answers to, unless the type
/// declares its own under the same name.
#[derive(Debug, Copy, Clone)]
enum ContainerMethod {
    Get,
    Set,
    Size,
    Empty,
    Clear,
    Add,
}

impl ContainerMethod {
    const ALL: [ContainerMethod; 6] = [
        ContainerMethod::Get,
        ContainerMethod::Set,
        ContainerMethod::Size,
        ContainerMethod::Empty,
        ContainerMethod::Clear,
        ContainerMethod::Add,
    ];

    fn name(self) -> &'static str {
        match self {
            ContainerMethod::Get => "get",
            ContainerMethod::Set => "set",
            ContainerMethod::Size => "size",
            ContainerMethod::Empty => "empty",
            ContainerMethod::Clear => "clear",
            ContainerMethod::Add => "add",
        }
    }

    fn function(self, ops: Rc<dyn ErasedContainer>) -> NativeFunction {
        NativeFunction::raw(self.name(), move |state, frame| {
            let id = frame.receiver()?;
            frame.results = match self {
                ContainerMethod::Get => ops.spread(state, id, &frame.arg(1))?,
                ContainerMethod::Set => {
                    ops.set(state, id, &frame.arg(1), &frame.arg(2))?;
                    Vec::new()
                }
                ContainerMethod::Size => vec![Value::Integer(ops.len(state, id)? as i64)],
                ContainerMethod::Empty => vec![Value::Boolean(ops.len(state, id)? == 0)],
                ContainerMethod::Clear => {
                    ops.clear(state, id)?;
                    Vec::new()
                }
                ContainerMethod::Add => {
                    ops.add(state, id, &frame.arg(1))?;
                    Vec::new()
                }
            };
            Ok(())
        })
    }
}

impl ScriptState {
    /// Make `C` indexable as a container; idempotent.
    pub(crate) fn ensure_container<C: ContainerAdapter>(&mut self) {
        let type_id = TypeId::of::<C>();
        if self
            .types
            .get(&type_id)
            .is_some_and(|info| info.container.is_some())
        {
            return;
        }
        let ops: Rc<dyn ErasedContainer> = Rc::new(Adapter::<C>::new());
        let methods: Vec<_> = ContainerMethod::ALL
            .into_iter()
            .map(|method| {
                let function = self.register_function(method.function(ops.clone()));
                (method.name(), function)
            })
            .collect();
        let info = self
            .types
            .entry(type_id)
            .or_insert_with(|| UserTypeInfo::new(Rc::from(type_name::<C>())));
        info.container = Some(ops);
        for (name, function) in methods {
            info.members
                .entry(Rc::from(name))
                .or_insert(Binding::Method(function));
        }
        tracing::debug!(container = type_name::<C>(), shape = ?C::SHAPE, "container adapter installed");
    }

    /// Move a container into the runtime behind a proxy handle.
    pub fn push_container<C: ContainerAdapter>(&mut self, container: C) -> Value {
        self.ensure_container::<C>();
        self.push_owned(container)
    }
}

/// Entries of anything iterable from script: a table or a container proxy.
pub(crate) fn collect_entries(state: &mut ScriptState, value: &Value) -> Result<Vec<(Value, Value)>> {
    match value {
        Value::Table(_) | Value::Userdata(_) => state.pairs(value),
        other => Err(ScriptError::Conversion {
            expected: "table or container",
            found: other.type_name(),
        }),
    }
}

pub(crate) fn collect_items<T: Element>(state: &mut ScriptState, value: &Value) -> Result<Vec<T>> {
    let entries = collect_entries(state, value)?;
    let mut items = Vec::with_capacity(entries.len());
    for (key, value) in &entries {
        items.push(T::from_entry(state, key, value)?);
    }
    Ok(items)
}

pub(crate) fn collect_pairs<K: FromScript, V: FromScript>(
    state: &mut ScriptState,
    value: &Value,
) -> Result<Vec<(K, V)>> {
    let entries = collect_entries(state, value)?;
    let mut pairs = Vec::with_capacity(entries.len());
    for (key, value) in &entries {
        pairs.push((K::from_script(state, key)?, V::from_script(state, value)?));
    }
    Ok(pairs)
}

/// Copy of a container as a plain table. Sequences of pairs become keyed
/// tables.
pub struct AsTable<C>(pub C);

impl<C: ContainerAdapter> IntoScript for AsTable<C> {
    fn into_script(self, state: &mut ScriptState) -> Result<Value> {
        let table = state.new_table();
        for (position, (key, item)) in self.0.into_entries().into_iter().enumerate() {
            let (key, value) = match C::SHAPE {
                Shape::Associative => (C::key_value(state, &key)?, item.into_script(state)?),
                _ => item.push_entry(state, position + 1)?,
            };
            state.set_index(&table, key, value)?;
        }
        Ok(table)
    }
}

impl<C: ContainerAdapter> FromScript for AsTable<C> {
    fn from_script(state: &mut ScriptState, value: &Value) -> Result<Self> {
        C::collect(state, value).map(AsTable)
    }
}

/// Container items returned as separate results.
pub struct AsArgs<C>(pub C);

impl<C: ContainerAdapter> IntoResults for AsArgs<C> {
    fn into_results(self, state: &mut ScriptState) -> Result<Vec<Value>> {
        let mut values = Vec::new();
        for (_, item) in self.0.into_entries() {
            values.push(item.into_script(state)?);
        }
        Ok(values)
    }
}

/// `IntoScript`/`FromScript`/`Element` for a generic container type.
macro_rules! container_element {
    ($ty:ty; $($param:ident),+) => {
        impl<$($param),+> $crate::convert::IntoScript for $ty
        where
            $ty: $crate::container::ContainerAdapter,
        {
            fn into_script(self, state: &mut $crate::ScriptState) -> $crate::Result<$crate::Value> {
                Ok(state.push_container(self))
            }
        }

        impl<$($param),+> $crate::convert::FromScript for $ty
        where
            $ty: $crate::container::ContainerAdapter,
        {
            fn from_script(state: &mut $crate::ScriptState, value: &$crate::Value) -> $crate::Result<Self> {
                <$ty as $crate::container::ContainerAdapter>::collect(state, value)
            }
        }

        impl<$($param),+> $crate::convert::Element for $ty
        where
            $ty: $crate::container::ContainerAdapter,
        {
            fn install(state: &mut $crate::ScriptState) {
                state.ensure_container::<$ty>();
            }

            fn push_place(state: &mut $crate::ScriptState, place: $crate::Place) -> $crate::Result<$crate::Value> {
                state.ensure_container::<$ty>();
                state.push_member::<$ty>(place)
            }
        }
    };
}

pub(crate) use container_element;
