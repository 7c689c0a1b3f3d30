//! Sequence containers: `Vec`, `VecDeque`, `LinkedList` and arrays
//!
//! Script keys are 1-based; key `len + 1` appends, `nil` erases.

use super::{collect_items, container_element, ContainerAdapter, Edit, Shape};
use crate::convert::{Element, FromScript, IntoScript};
use crate::error::{Result, ScriptError};
use crate::projection::Place;
use crate::state::ScriptState;
use crate::value::Value;
use std::collections::{LinkedList, VecDeque};

fn position_of(key: &Value) -> Option<usize> {
    key.as_integer()
        .filter(|i| *i >= 1)
        .and_then(|i| usize::try_from(i - 1).ok())
}

fn position_value(position: usize) -> Value {
    Value::Integer(position as i64 + 1)
}

impl<T: Element> ContainerAdapter for Vec<T> {
    type Key = usize;
    type Item = T;
    const SHAPE: Shape = Shape::Sequence;

    fn size(&self) -> usize {
        self.len()
    }

    fn key_of(_state: &mut ScriptState, key: &Value) -> Option<usize> {
        position_of(key)
    }

    fn key_value(_state: &mut ScriptState, key: &usize) -> Result<Value> {
        Ok(position_value(*key))
    }

    fn key_at(&self, position: usize) -> Option<usize> {
        (position < self.len()).then_some(position)
    }

    fn item(&self, key: &usize) -> Option<&T> {
        self.get(*key)
    }

    fn item_mut(&mut self, key: &usize) -> Option<&mut T> {
        self.get_mut(*key)
    }

    fn apply(&mut self, key: usize, edit: Edit<T>) -> Result<()> {
        match edit {
            Edit::Put(item) if key < self.len() => self[key] = item,
            Edit::Put(item) if key == self.len() => self.push(item),
            Edit::Put(_) => return Err(ScriptError::out_of_range::<Self>(key as i64 + 1, self.len())),
            Edit::Erase => {
                if key < self.len() {
                    self.remove(key);
                }
            }
            Edit::Insert => return Err(ScriptError::unsupported::<Self>("insert")),
        }
        Ok(())
    }

    fn wipe(&mut self) -> Result<()> {
        self.clear();
        Ok(())
    }

    fn into_entries(self) -> Vec<(usize, T)> {
        self.into_iter().enumerate().collect()
    }

    fn collect(state: &mut ScriptState, value: &Value) -> Result<Self> {
        collect_items(state, value)
    }
}

impl<T: Element> ContainerAdapter for VecDeque<T> {
    type Key = usize;
    type Item = T;
    const SHAPE: Shape = Shape::Sequence;

    fn size(&self) -> usize {
        self.len()
    }

    fn key_of(_state: &mut ScriptState, key: &Value) -> Option<usize> {
        position_of(key)
    }

    fn key_value(_state: &mut ScriptState, key: &usize) -> Result<Value> {
        Ok(position_value(*key))
    }

    fn key_at(&self, position: usize) -> Option<usize> {
        (position < self.len()).then_some(position)
    }

    fn item(&self, key: &usize) -> Option<&T> {
        self.get(*key)
    }

    fn item_mut(&mut self, key: &usize) -> Option<&mut T> {
        self.get_mut(*key)
    }

    fn apply(&mut self, key: usize, edit: Edit<T>) -> Result<()> {
        match edit {
            Edit::Put(item) if key < self.len() => self[key] = item,
            Edit::Put(item) if key == self.len() => self.push_back(item),
            Edit::Put(_) => return Err(ScriptError::out_of_range::<Self>(key as i64 + 1, self.len())),
            Edit::Erase => {
                self.remove(key);
            }
            Edit::Insert => return Err(ScriptError::unsupported::<Self>("insert")),
        }
        Ok(())
    }

    fn wipe(&mut self) -> Result<()> {
        self.clear();
        Ok(())
    }

    fn into_entries(self) -> Vec<(usize, T)> {
        self.into_iter().enumerate().collect()
    }

    fn collect(state: &mut ScriptState, value: &Value) -> Result<Self> {
        Ok(collect_items(state, value)?.into())
    }
}

impl<T: Element> ContainerAdapter for LinkedList<T> {
    type Key = usize;
    type Item = T;
    const SHAPE: Shape = Shape::ForwardList;

    fn size(&self) -> usize {
        self.len()
    }

    fn key_of(_state: &mut ScriptState, key: &Value) -> Option<usize> {
        position_of(key)
    }

    fn key_value(_state: &mut ScriptState, key: &usize) -> Result<Value> {
        Ok(position_value(*key))
    }

    fn key_at(&self, position: usize) -> Option<usize> {
        (position < self.len()).then_some(position)
    }

    fn item(&self, key: &usize) -> Option<&T> {
        self.iter().nth(*key)
    }

    fn item_mut(&mut self, key: &usize) -> Option<&mut T> {
        self.iter_mut().nth(*key)
    }

    fn apply(&mut self, key: usize, edit: Edit<T>) -> Result<()> {
        let len = self.len();
        match edit {
            Edit::Put(item) if key < len => {
                if let Some(slot) = self.iter_mut().nth(key) {
                    *slot = item;
                }
            }
            Edit::Put(item) if key == len => self.push_back(item),
            Edit::Put(_) => return Err(ScriptError::out_of_range::<Self>(key as i64 + 1, len)),
            Edit::Erase => {
                if key < len {
                    let mut tail = self.split_off(key);
                    tail.pop_front();
                    self.append(&mut tail);
                }
            }
            Edit::Insert => return Err(ScriptError::unsupported::<Self>("insert")),
        }
        Ok(())
    }

    fn wipe(&mut self) -> Result<()> {
        self.clear();
        Ok(())
    }

    fn into_entries(self) -> Vec<(usize, T)> {
        self.into_iter().enumerate().collect()
    }

    fn collect(state: &mut ScriptState, value: &Value) -> Result<Self> {
        Ok(collect_items(state, value)?.into_iter().collect())
    }
}

impl<T: Element, const N: usize> ContainerAdapter for [T; N] {
    type Key = usize;
    type Item = T;
    const SHAPE: Shape = Shape::FixedArray;

    fn size(&self) -> usize {
        N
    }

    fn key_of(_state: &mut ScriptState, key: &Value) -> Option<usize> {
        position_of(key)
    }

    fn key_value(_state: &mut ScriptState, key: &usize) -> Result<Value> {
        Ok(position_value(*key))
    }

    fn key_at(&self, position: usize) -> Option<usize> {
        (position < N).then_some(position)
    }

    fn item(&self, key: &usize) -> Option<&T> {
        self.get(*key)
    }

    fn item_mut(&mut self, key: &usize) -> Option<&mut T> {
        self.get_mut(*key)
    }

    fn apply(&mut self, key: usize, edit: Edit<T>) -> Result<()> {
        match edit {
            Edit::Put(item) if key < N => self[key] = item,
            Edit::Put(_) => return Err(ScriptError::out_of_range::<Self>(key as i64 + 1, N)),
            Edit::Erase => return Err(ScriptError::unsupported::<Self>("erase")),
            Edit::Insert => return Err(ScriptError::unsupported::<Self>("insert")),
        }
        Ok(())
    }

    fn wipe(&mut self) -> Result<()> {
        Err(ScriptError::unsupported::<Self>("clear"))
    }

    fn into_entries(self) -> Vec<(usize, T)> {
        self.into_iter().enumerate().collect()
    }

    fn collect(state: &mut ScriptState, value: &Value) -> Result<Self> {
        let items = collect_items::<T>(state, value)?;
        let len = items.len();
        items
            .try_into()
            .map_err(|_| ScriptError::out_of_range::<Self>(len as i64, N))
    }
}

container_element!(Vec<T>; T);
container_element!(VecDeque<T>; T);
container_element!(LinkedList<T>; T);

impl<T: Element, const N: usize> IntoScript for [T; N] {
    fn into_script(self, state: &mut ScriptState) -> Result<Value> {
        Ok(state.push_container(self))
    }
}

impl<T: Element, const N: usize> FromScript for [T; N] {
    fn from_script(state: &mut ScriptState, value: &Value) -> Result<Self> {
        <Self as ContainerAdapter>::collect(state, value)
    }
}

impl<T: Element, const N: usize> Element for [T; N] {
    fn install(state: &mut ScriptState) {
        state.ensure_container::<Self>();
    }

    fn push_place(state: &mut ScriptState, place: Place) -> Result<Value> {
        state.ensure_container::<Self>();
        state.push_member::<Self>(place)
    }
}
