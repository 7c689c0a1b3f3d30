//! Native functions callable from script

use crate::convert::{FromArgs, IntoResults};
use crate::error::{Result, ScriptError};
use crate::filter::{run_filters, Filter};
use crate::state::ScriptState;
use crate::value::Value;
use std::fmt;
use std::rc::Rc;
use tether_core::HandleId;

pub type NativeFn = Box<dyn Fn(&mut ScriptState, &mut CallFrame) -> Result<()>>;

/// Arguments and results of one native call.
///
/// Filters see the two as a single stack: arguments first, then results,
/// addressed 1-based from the bottom or negative from the top.
#[derive(Debug, Default, Clone)]
pub struct CallFrame {
    pub args: Vec<Value>,
    pub results: Vec<Value>,
}

impl CallFrame {
    pub fn new(args: Vec<Value>) -> Self {
        Self {
            args,
            results: Vec::new(),
        }
    }

    /// Argument at 0-based `index`, `nil` when absent.
    pub fn arg(&self, index: usize) -> Value {
        self.args.get(index).cloned().unwrap_or_default()
    }

    pub fn stack_len(&self) -> usize {
        self.args.len() + self.results.len()
    }

    pub fn stack(&self, position: i32) -> Option<&Value> {
        let len = self.stack_len() as i64;
        let index = match position {
            0 => return None,
            p if p > 0 => i64::from(p) - 1,
            p => len + i64::from(p),
        };
        if index < 0 || index >= len {
            return None;
        }
        let index = index as usize;
        match index.checked_sub(self.args.len()) {
            None => self.args.get(index),
            Some(result) => self.results.get(result),
        }
    }

    /// The object a method was invoked on.
    pub fn receiver(&self) -> Result<HandleId> {
        match self.args.first() {
            Some(Value::Userdata(id)) => Ok(*id),
            other => Err(ScriptError::Conversion {
                expected: "userdata receiver",
                found: other.map_or("no value", Value::type_name),
            }),
        }
    }

    pub fn into_results(self) -> Vec<Value> {
        self.results
    }
}

pub struct NativeFunction {
    name: Rc<str>,
    body: NativeFn,
    pub(crate) filters: Vec<Filter>,
}

impl NativeFunction {
    /// A function working on the frame directly.
    pub fn raw(
        name: &str,
        body: impl Fn(&mut ScriptState, &mut CallFrame) -> Result<()> + 'static,
    ) -> Self {
        Self {
            name: Rc::from(name),
            body: Box::new(body),
            filters: Vec::new(),
        }
    }

    /// A typed function; arguments are converted before `f` runs.
    pub fn wrap<A, R, F>(name: &str, f: F) -> Self
    where
        A: FromArgs + 'static,
        R: IntoResults + 'static,
        F: Fn(A) -> R + 'static,
    {
        Self::raw(name, move |state, frame| {
            let args = A::from_args(state, &frame.args)?;
            frame.results = f(args).into_results(state)?;
            Ok(())
        })
    }

    pub fn with_filters(mut self, filters: impl IntoIterator<Item = Filter>) -> Self {
        self.filters.extend(filters);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn invoke(&self, state: &mut ScriptState, frame: &mut CallFrame) -> Result<()> {
        (self.body)(state, frame)?;
        if self.filters.is_empty() {
            return Ok(());
        }
        // raw results stay rooted while filters call back into the state
        let base = state.pinned.len();
        state.pinned.extend(frame.results.iter().cloned());
        let outcome = run_filters(&self.filters, state, frame);
        state.pinned.truncate(base);
        outcome
    }
}

impl fmt::Debug for NativeFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NativeFunction")
            .field("name", &self.name)
            .field("filters", &self.filters)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame() -> CallFrame {
        CallFrame {
            args: vec![Value::Integer(1), Value::Integer(2)],
            results: vec![Value::Integer(3)],
        }
    }

    #[test]
    fn test_stack_positions_span_args_then_results() {
        let frame = frame();
        assert_eq!(frame.stack(1), Some(&Value::Integer(1)));
        assert_eq!(frame.stack(3), Some(&Value::Integer(3)));
        assert_eq!(frame.stack(-1), Some(&Value::Integer(3)));
        assert_eq!(frame.stack(-3), Some(&Value::Integer(1)));
    }

    #[test]
    fn test_stack_out_of_bounds() {
        let frame = frame();
        assert_eq!(frame.stack(0), None);
        assert_eq!(frame.stack(4), None);
        assert_eq!(frame.stack(-4), None);
    }

    #[test]
    fn test_receiver_requires_userdata() {
        assert!(frame().receiver().is_err());
        assert!(CallFrame::default().receiver().is_err());
    }

    #[test]
    fn test_wrapped_function_converts_arguments() {
        let mut state = ScriptState::new();
        let add = NativeFunction::wrap("add", |(a, b): (i64, i64)| a + b);
        let mut frame = CallFrame::new(vec![Value::Integer(2), Value::Integer(40)]);
        add.invoke(&mut state, &mut frame).unwrap();
        assert_eq!(frame.into_results(), vec![Value::Integer(42)]);
    }

    #[test]
    fn test_wrapped_function_rejects_bad_argument() {
        let mut state = ScriptState::new();
        let add = NativeFunction::wrap("add", |(a, b): (i64, i64)| a + b);
        let mut frame = CallFrame::new(vec![Value::from("two"), Value::Integer(40)]);
        let err = add.invoke(&mut state, &mut frame).unwrap_err();
        assert!(matches!(err, ScriptError::Conversion { .. }));
    }
}
