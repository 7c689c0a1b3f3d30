//! Conversions between native values and runtime values
//!
//! `IntoScript`/`FromScript` move whole values across the boundary.
//! `Element` adds what containers and fields need on top of that: how to
//! push a value that stays where it lives (by reference for objects, by
//! copy for scalars).

use crate::error::{Result, ScriptError};
use crate::projection::{FieldProjection, Place, Project};
use crate::state::ScriptState;
use crate::value::Value;
use std::any::{type_name, Any};
use std::cell::RefCell;
use std::rc::{Rc, Weak};
use tether_core::{HandleError, HandleId};

pub trait IntoScript {
    fn into_script(self, state: &mut ScriptState) -> Result<Value>;
}

pub trait FromScript: Sized {
    fn from_script(state: &mut ScriptState, value: &Value) -> Result<Self>;
}

/// A native type that can live inside containers and struct fields that
/// are exposed to scripts.
pub trait Element: FromScript + IntoScript + Any {
    /// Immutable elements reject `set` even through a writable handle.
    const IMMUTABLE: bool = false;

    /// One-time registration the runtime needs before values of this type
    /// can be indexed (container adapters).
    fn install(_state: &mut ScriptState) {}

    /// Push the value found at `place` without taking it out.
    fn push_place(state: &mut ScriptState, place: Place) -> Result<Value>;

    /// Results of a container `get`; pairs spread into two values.
    fn spread(state: &mut ScriptState, place: Place) -> Result<Vec<Value>> {
        Ok(vec![Self::push_place(state, place)?])
    }

    /// Key/value for a snapshot table at 1-based `index`.
    fn push_entry(self, state: &mut ScriptState, index: usize) -> Result<(Value, Value)> {
        Ok((Value::Integer(index as i64), self.into_script(state)?))
    }

    /// Rebuild from one entry of an iterable.
    fn from_entry(state: &mut ScriptState, _key: &Value, value: &Value) -> Result<Self> {
        Self::from_script(state, value)
    }
}

/// Everything a native call hands back, possibly several values.
pub trait IntoResults {
    fn into_results(self, state: &mut ScriptState) -> Result<Vec<Value>>;
}

impl IntoResults for () {
    fn into_results(self, _state: &mut ScriptState) -> Result<Vec<Value>> {
        Ok(Vec::new())
    }
}

impl<T: IntoScript> IntoResults for T {
    fn into_results(self, state: &mut ScriptState) -> Result<Vec<Value>> {
        Ok(vec![self.into_script(state)?])
    }
}

impl<R: IntoResults> IntoResults for Result<R, ScriptError> {
    fn into_results(self, state: &mut ScriptState) -> Result<Vec<Value>> {
        self?.into_results(state)
    }
}

/// Already-converted results, pushed as they are.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Variadic(pub Vec<Value>);

impl IntoResults for Variadic {
    fn into_results(self, _state: &mut ScriptState) -> Result<Vec<Value>> {
        Ok(self.0)
    }
}

/// Typed view of a call's arguments. Missing arguments read as `nil`.
pub trait FromArgs: Sized {
    fn from_args(state: &mut ScriptState, args: &[Value]) -> Result<Self>;
}

impl FromArgs for () {
    fn from_args(_state: &mut ScriptState, _args: &[Value]) -> Result<Self> {
        Ok(())
    }
}

macro_rules! tuple_from_args {
    ($($name:ident),+) => {
        impl<$($name: FromScript),+> FromArgs for ($($name,)+) {
            fn from_args(state: &mut ScriptState, args: &[Value]) -> Result<Self> {
                let nil = Value::Nil;
                let mut args = args.iter();
                Ok(($(<$name as FromScript>::from_script(state, args.next().unwrap_or(&nil))?,)+))
            }
        }
    };
}

tuple_from_args!(A);
tuple_from_args!(A, B);
tuple_from_args!(A, B, C);
tuple_from_args!(A, B, C, D);

impl IntoScript for Value {
    fn into_script(self, _state: &mut ScriptState) -> Result<Value> {
        Ok(self)
    }
}

impl FromScript for Value {
    fn from_script(_state: &mut ScriptState, value: &Value) -> Result<Self> {
        Ok(value.clone())
    }
}

impl IntoScript for &str {
    fn into_script(self, _state: &mut ScriptState) -> Result<Value> {
        Ok(Value::from(self))
    }
}

/// Integers past `i64` have no script representation.
fn integer_value<T: TryInto<i64>>(value: T) -> Result<Value> {
    value
        .try_into()
        .map(Value::Integer)
        .map_err(|_| ScriptError::Conversion {
            expected: "number",
            found: type_name::<T>(),
        })
}

macro_rules! integer_element {
    ($($ty:ty),*) => {$(
        impl IntoScript for $ty {
            fn into_script(self, _state: &mut ScriptState) -> Result<Value> {
                integer_value(self)
            }
        }

        impl FromScript for $ty {
            fn from_script(_state: &mut ScriptState, value: &Value) -> Result<Self> {
                value
                    .as_integer()
                    .and_then(|i| <$ty>::try_from(i).ok())
                    .ok_or_else(|| ScriptError::conversion::<$ty>(value))
            }
        }

        impl Element for $ty {
            fn push_place(state: &mut ScriptState, place: Place) -> Result<Value> {
                state.read_place(&place, |v: &$ty| integer_value(*v))?
            }
        }
    )*};
}

integer_element!(i8, i16, i32, i64, isize, u8, u16, u32, u64, usize);

macro_rules! float_element {
    ($($ty:ty),*) => {$(
        impl IntoScript for $ty {
            fn into_script(self, _state: &mut ScriptState) -> Result<Value> {
                Ok(Value::Number(self as f64))
            }
        }

        impl FromScript for $ty {
            fn from_script(_state: &mut ScriptState, value: &Value) -> Result<Self> {
                value
                    .as_number()
                    .map(|n| n as $ty)
                    .ok_or_else(|| ScriptError::conversion::<$ty>(value))
            }
        }

        impl Element for $ty {
            fn push_place(state: &mut ScriptState, place: Place) -> Result<Value> {
                state.read_place(&place, |v: &$ty| Value::Number(*v as f64))
            }
        }
    )*};
}

float_element!(f32, f64);

impl IntoScript for bool {
    fn into_script(self, _state: &mut ScriptState) -> Result<Value> {
        Ok(Value::Boolean(self))
    }
}

impl FromScript for bool {
    fn from_script(_state: &mut ScriptState, value: &Value) -> Result<Self> {
        match value {
            Value::Boolean(b) => Ok(*b),
            other => Err(ScriptError::conversion::<bool>(other)),
        }
    }
}

impl Element for bool {
    fn push_place(state: &mut ScriptState, place: Place) -> Result<Value> {
        state.read_place(&place, |v: &bool| Value::Boolean(*v))
    }
}

impl IntoScript for String {
    fn into_script(self, _state: &mut ScriptState) -> Result<Value> {
        Ok(Value::from(self))
    }
}

impl FromScript for String {
    fn from_script(_state: &mut ScriptState, value: &Value) -> Result<Self> {
        value
            .as_str()
            .map(str::to_owned)
            .ok_or_else(|| ScriptError::conversion::<String>(value))
    }
}

impl Element for String {
    fn push_place(state: &mut ScriptState, place: Place) -> Result<Value> {
        state.read_place(&place, |v: &String| Value::from(v.as_str()))
    }
}

// Pairs are copied out as two-entry tables; containers of pairs behave as
// key/value sequences when snapshotted or read with `get`.
impl<A, B> IntoScript for (A, B)
where
    A: Element + Clone,
    B: Element + Clone,
{
    fn into_script(self, state: &mut ScriptState) -> Result<Value> {
        let first = self.0.into_script(state)?;
        let second = self.1.into_script(state)?;
        Ok(state.table_from([first, second]))
    }
}

impl<A, B> FromScript for (A, B)
where
    A: Element + Clone,
    B: Element + Clone,
{
    fn from_script(state: &mut ScriptState, value: &Value) -> Result<Self> {
        if !matches!(value, Value::Table(_)) {
            return Err(ScriptError::conversion::<Self>(value));
        }
        let first = state.index(value, &Value::Integer(1))?;
        let second = state.index(value, &Value::Integer(2))?;
        Ok((A::from_script(state, &first)?, B::from_script(state, &second)?))
    }
}

impl<A, B> Element for (A, B)
where
    A: Element + Clone,
    B: Element + Clone,
{
    fn push_place(state: &mut ScriptState, place: Place) -> Result<Value> {
        let pair = state.read_place(&place, |p: &(A, B)| p.clone())?;
        pair.into_script(state)
    }

    fn spread(state: &mut ScriptState, place: Place) -> Result<Vec<Value>> {
        let (first, second) = state.read_place(&place, |p: &(A, B)| p.clone())?;
        Ok(vec![first.into_script(state)?, second.into_script(state)?])
    }

    fn push_entry(self, state: &mut ScriptState, _index: usize) -> Result<(Value, Value)> {
        Ok((self.0.into_script(state)?, self.1.into_script(state)?))
    }

    fn from_entry(state: &mut ScriptState, key: &Value, value: &Value) -> Result<Self> {
        if let Ok(pair) = Self::from_script(state, value) {
            return Ok(pair);
        }
        Ok((A::from_script(state, key)?, B::from_script(state, value)?))
    }
}

/// Element whose value must not be replaced from script.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Frozen<T>(pub T);

impl<T: Element> IntoScript for Frozen<T> {
    fn into_script(self, state: &mut ScriptState) -> Result<Value> {
        self.0.into_script(state)
    }
}

impl<T: Element> FromScript for Frozen<T> {
    fn from_script(state: &mut ScriptState, value: &Value) -> Result<Self> {
        T::from_script(state, value).map(Frozen)
    }
}

impl<T: Element> Element for Frozen<T> {
    const IMMUTABLE: bool = true;

    fn install(state: &mut ScriptState) {
        T::install(state);
    }

    fn push_place(state: &mut ScriptState, place: Place) -> Result<Value> {
        let inner: Rc<dyn Project> = Rc::new(FieldProjection::new(
            |f: &Frozen<T>| &f.0,
            |f: &mut Frozen<T>| &mut f.0,
        ));
        T::push_place(state, place.then(inner).readonly())
    }
}

/// Pointer-shaped element: pushes the existing handle for the object if
/// one is registered, otherwise a new non-owning handle.
impl<T: Element> IntoScript for Rc<RefCell<T>> {
    fn into_script(self, state: &mut ScriptState) -> Result<Value> {
        Ok(state.push_ref(&self))
    }
}

impl<T: Element> FromScript for Rc<RefCell<T>> {
    fn from_script(state: &mut ScriptState, value: &Value) -> Result<Self> {
        match value {
            Value::Userdata(id) => state.shared::<T>(*id),
            other => Err(ScriptError::conversion::<T>(other)),
        }
    }
}

impl<T: Element> Element for Rc<RefCell<T>> {
    fn push_place(state: &mut ScriptState, place: Place) -> Result<Value> {
        let readonly = place.is_readonly();
        let target = state.read_place(&place, |rc: &Rc<RefCell<T>>| rc.clone())?;
        Ok(state.push_ref_with(&target, readonly))
    }
}

/// Non-owning reference to an object the runtime owns, for native values
/// that keep pointing at a constructor argument. Access fails once the
/// object has been destroyed.
pub struct NativeRef<T> {
    handle: HandleId,
    target: Weak<RefCell<T>>,
}

impl<T: Any> NativeRef<T> {
    pub fn handle(&self) -> HandleId {
        self.handle
    }

    pub fn is_alive(&self) -> bool {
        self.target.strong_count() > 0
    }

    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> Result<R> {
        let target = self
            .target
            .upgrade()
            .ok_or(HandleError::Expired(self.handle))?;
        let guard = target
            .try_borrow()
            .map_err(|_| ScriptError::BorrowConflict {
                type_name: std::any::type_name::<T>(),
            })?;
        Ok(f(&guard))
    }

    /// Address of the referenced object while it is alive.
    pub fn address(&self) -> Option<usize> {
        self.target
            .upgrade()
            .map(|rc| rc.as_ptr() as *const () as usize)
    }
}

impl<T: Any> FromScript for NativeRef<T> {
    fn from_script(state: &mut ScriptState, value: &Value) -> Result<Self> {
        match value {
            Value::Userdata(id) => Ok(Self {
                handle: *id,
                target: Rc::downgrade(&state.shared::<T>(*id)?),
            }),
            other => Err(ScriptError::conversion::<T>(other)),
        }
    }
}

/// Make a native struct usable as a script object.
///
/// The plain form copies the value (via `Clone`) when a script value is
/// converted back to `$ty`; the `no_clone` form rejects that conversion.
///
/// # Example
/// ```ignore
/// #[derive(Clone)]
/// struct Vec2 { x: f64, y: f64 }
///
/// define_usertype!(Vec2);
/// ```
#[macro_export]
macro_rules! define_usertype {
    (@element $ty:ty) => {
        impl $crate::IntoScript for $ty {
            fn into_script(
                self,
                state: &mut $crate::ScriptState,
            ) -> ::std::result::Result<$crate::Value, $crate::ScriptError> {
                Ok(state.push_owned(self))
            }
        }

        impl $crate::Element for $ty {
            fn push_place(
                state: &mut $crate::ScriptState,
                place: $crate::Place,
            ) -> ::std::result::Result<$crate::Value, $crate::ScriptError> {
                state.push_member::<$ty>(place)
            }
        }
    };
    ($ty:ty, no_clone) => {
        $crate::define_usertype!(@element $ty);

        impl $crate::FromScript for $ty {
            fn from_script(
                _state: &mut $crate::ScriptState,
                value: &$crate::Value,
            ) -> ::std::result::Result<Self, $crate::ScriptError> {
                Err($crate::ScriptError::conversion::<$ty>(value))
            }
        }
    };
    ($ty:ty) => {
        $crate::define_usertype!(@element $ty);

        impl $crate::FromScript for $ty {
            fn from_script(
                state: &mut $crate::ScriptState,
                value: &$crate::Value,
            ) -> ::std::result::Result<Self, $crate::ScriptError> {
                state.read_userdata::<$ty, _>(value, |v| v.clone())
            }
        }
    };
}
