//! Keyed containers: maps and sets
//!
//! Map keys convert through `FromScript`; a key that does not convert
//! addresses nothing. Set elements are both key and value and are only
//! ever exposed read-only.

use super::{collect_items, collect_pairs, container_element, ContainerAdapter, Edit, Shape};
use crate::convert::{Element, FromScript, IntoScript};
use crate::error::{Result, ScriptError};
use crate::state::ScriptState;
use crate::value::Value;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::hash::Hash;

impl<K, V> ContainerAdapter for HashMap<K, V>
where
    K: Element + Clone + Eq + Hash,
    V: Element,
{
    type Key = K;
    type Item = V;
    const SHAPE: Shape = Shape::Associative;

    fn size(&self) -> usize {
        self.len()
    }

    fn key_of(state: &mut ScriptState, key: &Value) -> Option<K> {
        K::from_script(state, key).ok()
    }

    fn key_value(state: &mut ScriptState, key: &K) -> Result<Value> {
        key.clone().into_script(state)
    }

    fn key_at(&self, position: usize) -> Option<K> {
        self.keys().nth(position).cloned()
    }

    fn key_list(&self) -> Vec<K> {
        self.keys().cloned().collect()
    }

    fn item(&self, key: &K) -> Option<&V> {
        self.get(key)
    }

    fn item_mut(&mut self, key: &K) -> Option<&mut V> {
        self.get_mut(key)
    }

    fn apply(&mut self, key: K, edit: Edit<V>) -> Result<()> {
        match edit {
            Edit::Put(item) => {
                self.insert(key, item);
            }
            Edit::Erase => {
                self.remove(&key);
            }
            Edit::Insert => return Err(ScriptError::unsupported::<Self>("insert")),
        }
        Ok(())
    }

    fn wipe(&mut self) -> Result<()> {
        self.clear();
        Ok(())
    }

    fn into_entries(self) -> Vec<(K, V)> {
        self.into_iter().collect()
    }

    fn collect(state: &mut ScriptState, value: &Value) -> Result<Self> {
        Ok(collect_pairs::<K, V>(state, value)?.into_iter().collect())
    }
}

impl<K, V> ContainerAdapter for BTreeMap<K, V>
where
    K: Element + Clone + Ord,
    V: Element,
{
    type Key = K;
    type Item = V;
    const SHAPE: Shape = Shape::Associative;

    fn size(&self) -> usize {
        self.len()
    }

    fn key_of(state: &mut ScriptState, key: &Value) -> Option<K> {
        K::from_script(state, key).ok()
    }

    fn key_value(state: &mut ScriptState, key: &K) -> Result<Value> {
        key.clone().into_script(state)
    }

    fn key_at(&self, position: usize) -> Option<K> {
        self.keys().nth(position).cloned()
    }

    fn key_list(&self) -> Vec<K> {
        self.keys().cloned().collect()
    }

    fn item(&self, key: &K) -> Option<&V> {
        self.get(key)
    }

    fn item_mut(&mut self, key: &K) -> Option<&mut V> {
        self.get_mut(key)
    }

    fn apply(&mut self, key: K, edit: Edit<V>) -> Result<()> {
        match edit {
            Edit::Put(item) => {
                self.insert(key, item);
            }
            Edit::Erase => {
                self.remove(&key);
            }
            Edit::Insert => return Err(ScriptError::unsupported::<Self>("insert")),
        }
        Ok(())
    }

    fn wipe(&mut self) -> Result<()> {
        self.clear();
        Ok(())
    }

    fn into_entries(self) -> Vec<(K, V)> {
        self.into_iter().collect()
    }

    fn collect(state: &mut ScriptState, value: &Value) -> Result<Self> {
        Ok(collect_pairs::<K, V>(state, value)?.into_iter().collect())
    }
}

/// Sets take `Insert` for any non-nil assignment; the assigned value
/// itself is ignored.
fn set_edit<T: Element>(value: &Value) -> Result<Edit<T>> {
    if T::IMMUTABLE {
        return Err(ScriptError::read_only::<T>());
    }
    Ok(if value.is_nil() { Edit::Erase } else { Edit::Insert })
}

impl<T> ContainerAdapter for HashSet<T>
where
    T: Element + Clone + Eq + Hash,
{
    type Key = T;
    type Item = T;
    const SHAPE: Shape = Shape::Set;

    fn size(&self) -> usize {
        self.len()
    }

    fn key_of(state: &mut ScriptState, key: &Value) -> Option<T> {
        T::from_script(state, key).ok()
    }

    fn key_value(state: &mut ScriptState, key: &T) -> Result<Value> {
        key.clone().into_script(state)
    }

    fn key_at(&self, position: usize) -> Option<T> {
        self.iter().nth(position).cloned()
    }

    fn key_list(&self) -> Vec<T> {
        self.iter().cloned().collect()
    }

    fn item(&self, key: &T) -> Option<&T> {
        self.get(key)
    }

    fn item_mut(&mut self, _key: &T) -> Option<&mut T> {
        None
    }

    fn apply(&mut self, key: T, edit: Edit<T>) -> Result<()> {
        match edit {
            Edit::Erase => {
                self.remove(&key);
            }
            Edit::Insert | Edit::Put(_) => {
                self.insert(key);
            }
        }
        Ok(())
    }

    fn wipe(&mut self) -> Result<()> {
        self.clear();
        Ok(())
    }

    fn into_entries(self) -> Vec<(T, T)> {
        self.into_iter().map(|item| (item.clone(), item)).collect()
    }

    fn collect(state: &mut ScriptState, value: &Value) -> Result<Self> {
        Ok(collect_items::<T>(state, value)?.into_iter().collect())
    }

    fn edit(_state: &mut ScriptState, value: &Value) -> Result<Edit<T>> {
        set_edit(value)
    }
}

impl<T> ContainerAdapter for BTreeSet<T>
where
    T: Element + Clone + Ord,
{
    type Key = T;
    type Item = T;
    const SHAPE: Shape = Shape::Set;

    fn size(&self) -> usize {
        self.len()
    }

    fn key_of(state: &mut ScriptState, key: &Value) -> Option<T> {
        T::from_script(state, key).ok()
    }

    fn key_value(state: &mut ScriptState, key: &T) -> Result<Value> {
        key.clone().into_script(state)
    }

    fn key_at(&self, position: usize) -> Option<T> {
        self.iter().nth(position).cloned()
    }

    fn key_list(&self) -> Vec<T> {
        self.iter().cloned().collect()
    }

    fn item(&self, key: &T) -> Option<&T> {
        self.get(key)
    }

    fn item_mut(&mut self, _key: &T) -> Option<&mut T> {
        None
    }

    fn apply(&mut self, key: T, edit: Edit<T>) -> Result<()> {
        match edit {
            Edit::Erase => {
                self.remove(&key);
            }
            Edit::Insert | Edit::Put(_) => {
                self.insert(key);
            }
        }
        Ok(())
    }

    fn wipe(&mut self) -> Result<()> {
        self.clear();
        Ok(())
    }

    fn into_entries(self) -> Vec<(T, T)> {
        self.into_iter().map(|item| (item.clone(), item)).collect()
    }

    fn collect(state: &mut ScriptState, value: &Value) -> Result<Self> {
        Ok(collect_items::<T>(state, value)?.into_iter().collect())
    }

    fn edit(_state: &mut ScriptState, value: &Value) -> Result<Edit<T>> {
        set_edit(value)
    }
}

container_element!(HashMap<K, V>; K, V);
container_element!(BTreeMap<K, V>; K, V);
container_element!(HashSet<T>; T);
container_element!(BTreeSet<T>; T);
