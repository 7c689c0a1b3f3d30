use crate::value::Value;
use std::any::type_name;
use tether_core::HandleError;
use thiserror::Error;

/// Recoverable failures surfaced to the caller of a runtime operation.
///
/// None of these leave partially mutated state behind.
#[derive(Debug, Error)]
pub enum ScriptError {
    #[error("cannot convert {found} to {expected}")]
    Conversion {
        expected: &'static str,
        found: &'static str,
    },

    #[error("attempt to modify read-only value of type {type_name}")]
    ReadOnly { type_name: &'static str },

    #[error(transparent)]
    Handle(#[from] HandleError),

    #[error("{type_name} is already borrowed")]
    BorrowConflict { type_name: &'static str },

    #[error("attempt to call a {found} value")]
    NotCallable { found: &'static str },

    #[error("attempt to index a {found} value")]
    NotIndexable { found: &'static str },

    #[error("{type_name} has no member named '{name}'")]
    UnknownMember {
        type_name: &'static str,
        name: String,
    },

    #[error("index {index} is out of range for {type_name} of length {len}")]
    OutOfRange {
        type_name: &'static str,
        index: i64,
        len: usize,
    },

    #[error("{operation} is not supported by {type_name}")]
    Unsupported {
        type_name: &'static str,
        operation: &'static str,
    },

    #[error("{key} is not a valid key for {type_name}")]
    InvalidKey {
        type_name: &'static str,
        key: &'static str,
    },
}

impl ScriptError {
    pub fn conversion<T: ?Sized>(found: &Value) -> Self {
        Self::Conversion {
            expected: type_name::<T>(),
            found: found.type_name(),
        }
    }

    pub fn read_only<T: ?Sized>() -> Self {
        Self::ReadOnly {
            type_name: type_name::<T>(),
        }
    }

    pub fn unsupported<T: ?Sized>(operation: &'static str) -> Self {
        Self::Unsupported {
            type_name: type_name::<T>(),
            operation,
        }
    }

    pub fn out_of_range<T: ?Sized>(index: i64, len: usize) -> Self {
        Self::OutOfRange {
            type_name: type_name::<T>(),
            index,
            len,
        }
    }
}

pub type Result<T, E = ScriptError> = std::result::Result<T, E>;
