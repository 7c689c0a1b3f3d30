//! Handles with generational indices
//!
//! A handle names one object living in the script heap. The generation
//! counter makes a handle to a released slot detectably stale instead of
//! silently aliasing whatever reuses the slot.

use serde::{Deserialize, Serialize};
use std::any::{type_name, TypeId};
use std::fmt;

/// Handle to a heap object (generation-indexed for safety)
///
/// Format: [32-bit index | 32-bit generation]
/// - Index: Position in the arena
/// - Generation: Incremented when the slot is released
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct HandleId {
    index: u32,
    generation: u32,
}

impl HandleId {
    pub(crate) const fn new(index: u32, generation: u32) -> Self {
        Self { index, generation }
    }

    pub fn index(&self) -> u32 {
        self.index
    }

    pub fn generation(&self) -> u32 {
        self.generation
    }

    /// Serialize to 64-bit integer (for logs and debugger output)
    pub fn to_bits(&self) -> u64 {
        ((self.generation as u64) << 32) | (self.index as u64)
    }

    /// Deserialize from 64-bit integer
    pub fn from_bits(bits: u64) -> Self {
        Self {
            index: bits as u32,
            generation: (bits >> 32) as u32,
        }
    }
}

impl fmt::Display for HandleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}v{}", self.index, self.generation)
    }
}

/// Who is responsible for destroying the native object behind a handle.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Ownership {
    /// The heap owns the object and destroys it exactly once, at finalization.
    Owned,
    /// The object lives in storage someone else manages; finalization never destroys it.
    ExternalRef,
}

/// Runtime type identity of the native object behind a handle.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct TypeTag {
    id: TypeId,
    name: &'static str,
}

impl TypeTag {
    pub fn of<T: ?Sized + 'static>() -> Self {
        Self {
            id: TypeId::of::<T>(),
            name: type_name::<T>(),
        }
    }

    pub fn id(&self) -> TypeId {
        self.id
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn is<T: ?Sized + 'static>(&self) -> bool {
        self.id == TypeId::of::<T>()
    }
}

/// Per-handle metadata carried alongside the native storage.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct HandleMeta {
    pub tag: TypeTag,
    pub ownership: Ownership,
    /// Const-qualified handles reject every mutation routed through them.
    pub readonly: bool,
}

impl HandleMeta {
    pub fn new(tag: TypeTag, ownership: Ownership, readonly: bool) -> Self {
        Self {
            tag,
            ownership,
            readonly,
        }
    }

    pub fn owns_object(&self) -> bool {
        self.ownership == Ownership::Owned
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bits_round_trip_preserves_generation() {
        let id = HandleId::new(7, 3);
        let restored = HandleId::from_bits(id.to_bits());
        assert_eq!(restored, id);
        assert_eq!(restored.generation(), 3);
        assert_eq!(id.to_string(), "#7v3");
    }

    #[test]
    fn test_type_tag_identity() {
        let tag = TypeTag::of::<Vec<i64>>();
        assert!(tag.is::<Vec<i64>>());
        assert!(!tag.is::<Vec<i32>>());
        assert!(tag.name().contains("Vec"));
    }

    #[test]
    fn test_meta_ownership() {
        let owned = HandleMeta::new(TypeTag::of::<u8>(), Ownership::Owned, false);
        let borrowed = HandleMeta::new(TypeTag::of::<u8>(), Ownership::ExternalRef, true);
        assert!(owned.owns_object());
        assert!(!borrowed.owns_object());
        assert!(borrowed.readonly);
    }
}
