//! Heap objects and native storage
//!
//! Every table and userdata lives in one generational arena. A userdata
//! entry pairs the handle metadata with the storage the native object is
//! reached through.

use crate::error::{Result, ScriptError};
use crate::projection::Project;
use crate::table::Table;
use std::any::{Any, TypeId};
use std::cell::RefCell;
use std::rc::{Rc, Weak};
use tether_core::{Arena, HandleError, HandleId, HandleMeta};

/// Strong reference to a native object, kept in two erased forms: one to
/// borrow it as `dyn Any`, one to recover the concrete `Rc<RefCell<T>>`.
#[derive(Clone)]
pub(crate) struct Shared {
    pub cell: Rc<RefCell<dyn Any>>,
    pub whole: Rc<dyn Any>,
}

#[derive(Clone)]
pub(crate) struct WeakShared {
    pub cell: Weak<RefCell<dyn Any>>,
    pub whole: Weak<dyn Any>,
}

impl Shared {
    pub fn new<T: Any>(rc: Rc<RefCell<T>>) -> Self {
        let whole: Rc<dyn Any> = rc.clone();
        let cell: Rc<RefCell<dyn Any>> = rc;
        Self { cell, whole }
    }

    pub fn downgrade(&self) -> WeakShared {
        WeakShared {
            cell: Rc::downgrade(&self.cell),
            whole: Rc::downgrade(&self.whole),
        }
    }

    pub fn address(&self) -> usize {
        self.cell.as_ptr() as *const () as usize
    }

    /// Recover the typed reference, if `T` is what this storage holds.
    pub fn typed<T: Any>(&self) -> Option<Rc<RefCell<T>>> {
        self.whole.clone().downcast::<RefCell<T>>().ok()
    }
}

impl WeakShared {
    pub fn upgrade(&self) -> Option<Shared> {
        Some(Shared {
            cell: self.cell.upgrade()?,
            whole: self.whole.upgrade()?,
        })
    }
}

pub(crate) enum Storage {
    /// The heap holds the only strong reference.
    Owned(Shared),
    /// Someone else owns the object; resolving fails once they drop it.
    External(WeakShared),
    /// A sub-object reached through the parent's storage.
    Member {
        parent: HandleId,
        projection: Rc<dyn Project>,
    },
}

impl Storage {
    pub fn parent(&self) -> Option<HandleId> {
        match self {
            Storage::Member { parent, .. } => Some(*parent),
            _ => None,
        }
    }
}

/// Address-based identity of a pushed native object.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub(crate) struct IdentityKey {
    pub address: usize,
    pub type_id: TypeId,
    pub readonly: bool,
}

pub(crate) struct Userdata {
    pub meta: HandleMeta,
    pub storage: Storage,
    pub identity: IdentityKey,
}

pub(crate) enum Object {
    Table(Table),
    Userdata(Userdata),
}

pub(crate) struct Entry {
    pub object: Object,
    /// Unreachable but kept alive by an anchor edge.
    pub deferred: bool,
}

#[derive(Default)]
pub(crate) struct Heap {
    entries: Arena<Entry>,
    allocations: usize,
}

impl Heap {
    pub fn alloc(&mut self, object: Object) -> HandleId {
        self.allocations += 1;
        self.entries.insert(Entry {
            object,
            deferred: false,
        })
    }

    pub fn free(&mut self, id: HandleId) -> Option<Entry> {
        self.entries.remove(id)
    }

    pub fn entry(&self, id: HandleId) -> Option<&Entry> {
        self.entries.get(id)
    }

    pub fn entry_mut(&mut self, id: HandleId) -> Option<&mut Entry> {
        self.entries.get_mut(id)
    }

    pub fn contains(&self, id: HandleId) -> bool {
        self.entries.contains(id)
    }

    pub fn table(&self, id: HandleId) -> Result<&Table> {
        match self.entries.get(id).map(|e| &e.object) {
            Some(Object::Table(table)) => Ok(table),
            Some(Object::Userdata(_)) => Err(ScriptError::NotIndexable { found: "userdata" }),
            None => Err(HandleError::Stale(id).into()),
        }
    }

    pub fn table_mut(&mut self, id: HandleId) -> Result<&mut Table> {
        match self.entries.get_mut(id).map(|e| &mut e.object) {
            Some(Object::Table(table)) => Ok(table),
            Some(Object::Userdata(_)) => Err(ScriptError::NotIndexable { found: "userdata" }),
            None => Err(HandleError::Stale(id).into()),
        }
    }

    pub fn userdata(&self, id: HandleId) -> Result<&Userdata> {
        match self.entries.get(id).map(|e| &e.object) {
            Some(Object::Userdata(ud)) => Ok(ud),
            Some(Object::Table(_)) => Err(ScriptError::Conversion {
                expected: "userdata",
                found: "table",
            }),
            None => Err(HandleError::Stale(id).into()),
        }
    }

    /// Heap objects `id` keeps reachable: table contents and a member's parent.
    pub fn trace(&self, id: HandleId, work: &mut Vec<HandleId>) {
        match self.entries.get(id).map(|e| &e.object) {
            Some(Object::Table(table)) => work.extend(table.children()),
            Some(Object::Userdata(ud)) => work.extend(ud.storage.parent()),
            None => {}
        }
    }

    pub fn ids(&self) -> Vec<HandleId> {
        self.entries.ids()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn capacity(&self) -> usize {
        self.entries.capacity()
    }

    pub fn allocations(&self) -> usize {
        self.allocations
    }

    pub fn reset_allocations(&mut self) {
        self.allocations = 0;
    }
}
