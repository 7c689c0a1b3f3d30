//! Plain runtime tables
//!
//! Integer keys `1..=n` live in a dense array part; everything else goes
//! to an ordered hash part so iteration order is deterministic.

use crate::value::{TableKey, Value};
use std::collections::BTreeMap;
use tether_core::HandleId;

#[derive(Debug, Default, Clone)]
pub struct Table {
    array: Vec<Value>,
    hash: BTreeMap<TableKey, Value>,
}

impl Table {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &TableKey) -> Value {
        if let TableKey::Integer(i) = key {
            if let Some(slot) = array_slot(*i, self.array.len()) {
                return self.array[slot].clone();
            }
        }
        self.hash.get(key).cloned().unwrap_or_default()
    }

    pub fn set(&mut self, key: TableKey, value: Value) {
        if let TableKey::Integer(i) = key {
            if let Some(slot) = array_slot(i, self.array.len()) {
                self.array[slot] = value;
                self.trim();
                return;
            }
            if i == self.array.len() as i64 + 1 && !value.is_nil() {
                self.array.push(value);
                self.hash.remove(&key);
                self.migrate();
                return;
            }
        }

        if value.is_nil() {
            self.hash.remove(&key);
        } else {
            self.hash.insert(key, value);
        }
    }

    /// Border of the array part (`#t`).
    pub fn len(&self) -> usize {
        self.array.len()
    }

    pub fn is_empty(&self) -> bool {
        self.array.is_empty() && self.hash.is_empty()
    }

    /// Entry at or after `cursor`, skipping holes. Returns the cursor to
    /// resume from along with the key and value.
    pub fn next(&self, cursor: usize) -> Option<(usize, Value, Value)> {
        let mut position = cursor;
        while position < self.array.len() {
            let value = &self.array[position];
            position += 1;
            if !value.is_nil() {
                return Some((position, Value::Integer(position as i64), value.clone()));
            }
        }

        let skip = position - self.array.len();
        self.hash
            .iter()
            .nth(skip)
            .map(|(key, value)| (position + 1, key.to_value(), value.clone()))
    }

    /// Heap objects referenced by keys or values, for the collector.
    pub fn children(&self) -> impl Iterator<Item = HandleId> + '_ {
        let keys = self.hash.keys().filter_map(|key| match key {
            TableKey::Table(id) | TableKey::Userdata(id) => Some(*id),
            _ => None,
        });
        self.array
            .iter()
            .chain(self.hash.values())
            .filter_map(Value::as_handle)
            .chain(keys)
    }

    fn trim(&mut self) {
        while matches!(self.array.last(), Some(Value::Nil)) {
            self.array.pop();
        }
    }

    fn migrate(&mut self) {
        loop {
            let next = TableKey::Integer(self.array.len() as i64 + 1);
            match self.hash.remove(&next) {
                Some(value) => self.array.push(value),
                None => break,
            }
        }
    }
}

fn array_slot(key: i64, len: usize) -> Option<usize> {
    (key >= 1 && key as usize <= len).then(|| key as usize - 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn int(i: i64) -> TableKey {
        TableKey::Integer(i)
    }

    #[test]
    fn test_append_grows_border() {
        let mut t = Table::new();
        t.set(int(1), Value::Integer(10));
        t.set(int(2), Value::Integer(20));
        assert_eq!(t.len(), 2);
        assert_eq!(t.get(&int(2)), Value::Integer(20));
        assert_eq!(t.get(&int(3)), Value::Nil);
    }

    #[test]
    fn test_out_of_order_keys_migrate_into_array() {
        let mut t = Table::new();
        t.set(int(2), Value::Integer(2));
        assert_eq!(t.len(), 0);
        t.set(int(1), Value::Integer(1));
        assert_eq!(t.len(), 2);
    }

    #[test]
    fn test_clearing_last_slot_shrinks_border() {
        let mut t = Table::new();
        for i in 1..=3 {
            t.set(int(i), Value::Integer(i));
        }
        t.set(int(3), Value::Nil);
        assert_eq!(t.len(), 2);
    }

    #[test]
    fn test_next_visits_array_then_hash() {
        let mut t = Table::new();
        t.set(int(1), Value::Integer(1));
        t.set(TableKey::String("name".into()), Value::from("sol"));

        let (cursor, k1, v1) = t.next(0).unwrap();
        assert_eq!((k1, v1), (Value::Integer(1), Value::Integer(1)));
        let (cursor, k2, v2) = t.next(cursor).unwrap();
        assert_eq!((k2, v2), (Value::from("name"), Value::from("sol")));
        assert!(t.next(cursor).is_none());
    }
}
