//! Tether Script
//!
//! Binds native Rust values into a small dynamically typed runtime:
//! - Userdata handles that own, borrow or project into native objects
//! - Usertypes with methods, fields and per-member filters
//! - Container adapters that expose native collections by reference
//! - A collector that honors keeps-alive edges between handles
//!
//! There is no script parser; hosts and tests drive the runtime through
//! [`ScriptState`] directly.
//!
//! # Example
//! ```ignore
//! use tether_script::{ScriptState, Value};
//!
//! let mut state = ScriptState::new();
//! state.set("numbers", vec![1_i64, 2, 3])?;
//! let numbers = state.get_global("numbers");
//! state.set_index(&numbers, 4, 99)?;
//! assert_eq!(state.len(&numbers)?, 4);
//! ```

pub mod config;
pub mod container;
pub mod convert;
pub mod error;
pub mod filter;
pub mod function;
pub mod gc;
mod heap;
pub mod projection;
pub mod state;
pub mod table;
pub mod usertype;
pub mod value;

pub use config::{ContainerSettings, GcSettings, Settings, SettingsError};
pub use container::{AsArgs, AsTable, ContainerAdapter, Edit, Shape};
pub use convert::{Element, FromArgs, FromScript, Frozen, IntoResults, IntoScript, NativeRef, Variadic};
pub use error::{Result, ScriptError};
pub use filter::Filter;
pub use function::{CallFrame, NativeFunction};
pub use gc::CollectionReport;
pub use projection::{FieldProjection, Place, Project};
pub use state::ScriptState;
pub use usertype::UserTypeBuilder;
pub use value::{FunctionId, Value};

pub use tether_core::{HandleError, HandleId, HandleMeta, Ownership};
