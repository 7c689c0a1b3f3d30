//! Runtime values
//!
//! `Value` is what the script side sees. Heap objects (tables and
//! userdata) are referenced by handle; everything else is held inline.

use crate::error::{Result, ScriptError};
use std::fmt;
use std::rc::Rc;
use tether_core::HandleId;

/// Index into the state's function registry.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FunctionId(pub(crate) u32);

impl FunctionId {
    pub fn index(&self) -> u32 {
        self.0
    }
}

impl fmt::Display for FunctionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "function: {}", self.0)
    }
}

#[derive(Debug, Clone, Default)]
pub enum Value {
    #[default]
    Nil,
    Boolean(bool),
    Integer(i64),
    Number(f64),
    String(Rc<str>),
    Table(HandleId),
    Userdata(HandleId),
    Function(FunctionId),
}

impl Value {
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Nil => "nil",
            Value::Boolean(_) => "boolean",
            Value::Integer(_) | Value::Number(_) => "number",
            Value::String(_) => "string",
            Value::Table(_) => "table",
            Value::Userdata(_) => "userdata",
            Value::Function(_) => "function",
        }
    }

    pub fn is_nil(&self) -> bool {
        matches!(self, Value::Nil)
    }

    /// Everything except `nil` and `false` is true.
    pub fn truthy(&self) -> bool {
        !matches!(self, Value::Nil | Value::Boolean(false))
    }

    /// The heap handle for tables and userdata.
    pub fn as_handle(&self) -> Option<HandleId> {
        match self {
            Value::Table(id) | Value::Userdata(id) => Some(*id),
            _ => None,
        }
    }

    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Value::Integer(i) => Some(*i),
            Value::Number(n) if n.fract() == 0.0 && n.abs() < i64::MAX as f64 => Some(*n as i64),
            _ => None,
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            Value::Integer(i) => Some(*i as f64),
            Value::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Nil, Value::Nil) => true,
            (Value::Boolean(a), Value::Boolean(b)) => a == b,
            (Value::Integer(a), Value::Integer(b)) => a == b,
            (Value::Integer(_) | Value::Number(_), Value::Integer(_) | Value::Number(_)) => {
                self.as_number() == other.as_number()
            }
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Table(a), Value::Table(b)) => a == b,
            (Value::Userdata(a), Value::Userdata(b)) => a == b,
            (Value::Function(a), Value::Function(b)) => a == b,
            _ => false,
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Boolean(b)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Integer(i)
    }
}

impl From<i32> for Value {
    fn from(i: i32) -> Self {
        Value::Integer(i64::from(i))
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Number(n)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(Rc::from(s))
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(Rc::from(s))
    }
}

/// Hashable, ordered form of a value used as a table key.
///
/// Integral floats normalize to `Integer` so `t[1]` and `t[1.0]` agree.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TableKey {
    Boolean(bool),
    Integer(i64),
    Float(u64),
    String(Rc<str>),
    Table(HandleId),
    Userdata(HandleId),
    Function(FunctionId),
}

impl TableKey {
    pub fn from_value(value: &Value) -> Result<Self> {
        let key = match value {
            Value::Nil => return Err(invalid_key("nil")),
            Value::Boolean(b) => TableKey::Boolean(*b),
            Value::Integer(i) => TableKey::Integer(*i),
            Value::Number(n) if n.is_nan() => return Err(invalid_key("NaN")),
            Value::Number(n) => match value.as_integer() {
                Some(i) => TableKey::Integer(i),
                None => TableKey::Float(n.to_bits()),
            },
            Value::String(s) => TableKey::String(s.clone()),
            Value::Table(id) => TableKey::Table(*id),
            Value::Userdata(id) => TableKey::Userdata(*id),
            Value::Function(id) => TableKey::Function(*id),
        };
        Ok(key)
    }

    pub fn to_value(&self) -> Value {
        match self {
            TableKey::Boolean(b) => Value::Boolean(*b),
            TableKey::Integer(i) => Value::Integer(*i),
            TableKey::Float(bits) => Value::Number(f64::from_bits(*bits)),
            TableKey::String(s) => Value::String(s.clone()),
            TableKey::Table(id) => Value::Table(*id),
            TableKey::Userdata(id) => Value::Userdata(*id),
            TableKey::Function(id) => Value::Function(*id),
        }
    }
}

fn invalid_key(key: &'static str) -> ScriptError {
    ScriptError::InvalidKey {
        type_name: "table",
        key,
    }
}
