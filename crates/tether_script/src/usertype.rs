//! Usertype registration
//!
//! A usertype maps member names to methods and fields. Registering one
//! also creates a global table holding its constructor and static
//! functions.

use crate::container::ErasedContainer;
use crate::convert::{Element, FromArgs, IntoResults, IntoScript};
use crate::error::{Result, ScriptError};
use crate::filter::{run_filters, Filter};
use crate::function::{CallFrame, NativeFunction};
use crate::heap::Object;
use crate::projection::{FieldProjection, Place, Project};
use crate::state::ScriptState;
use crate::table::Table;
use crate::value::{FunctionId, TableKey, Value};
use std::any::{type_name, Any, TypeId};
use std::collections::HashMap;
use std::marker::PhantomData;
use std::rc::Rc;
use tether_core::HandleId;

pub(crate) type DisplayFn = Rc<dyn Fn(&ScriptState, HandleId) -> Result<String>>;
type FieldGetter = Box<dyn Fn(&mut ScriptState, HandleId) -> Result<Value>>;
type FieldSetter = Box<dyn Fn(&mut ScriptState, HandleId, &Value) -> Result<()>>;

pub(crate) struct UserTypeInfo {
    pub name: Rc<str>,
    pub members: HashMap<Rc<str>, Binding>,
    pub container: Option<Rc<dyn ErasedContainer>>,
    pub display: Option<DisplayFn>,
}

impl UserTypeInfo {
    pub fn new(name: Rc<str>) -> Self {
        Self {
            name,
            members: HashMap::new(),
            container: None,
            display: None,
        }
    }
}

#[derive(Clone)]
pub(crate) enum Binding {
    Method(FunctionId),
    Field(Rc<Field>),
}

pub(crate) struct Field {
    type_name: &'static str,
    get: FieldGetter,
    set: Option<FieldSetter>,
    filters: Vec<Filter>,
}

impl Field {
    /// Getter results pass through the field's filters with the owning
    /// object as the only argument.
    pub fn read(&self, state: &mut ScriptState, id: HandleId) -> Result<Value> {
        let value = (self.get)(state, id)?;
        if self.filters.is_empty() {
            return Ok(value);
        }
        let mut frame = CallFrame::new(vec![Value::Userdata(id)]);
        frame.results.push(value);
        run_filters(&self.filters, state, &mut frame)?;
        Ok(frame.into_results().into_iter().next().unwrap_or_default())
    }

    pub fn write(&self, state: &mut ScriptState, id: HandleId, value: &Value) -> Result<()> {
        match &self.set {
            Some(set) => set(state, id, value),
            None => Err(ScriptError::ReadOnly {
                type_name: self.type_name,
            }),
        }
    }
}

enum Pending {
    Method(NativeFunction),
    Field(Field),
}

/// Builder returned by [`ScriptState::new_usertype`].
///
/// # Example
/// ```ignore
/// state
///     .new_usertype::<Counter>("counter")
///     .constructor(|(start,): (i64,)| Counter { value: start })
///     .field("value", |c| &c.value, |c| &mut c.value)
///     .method_mut("bump", |c, ()| c.value += 1)
///     .register();
/// ```
pub struct UserTypeBuilder<'s, T> {
    state: &'s mut ScriptState,
    name: Rc<str>,
    members: Vec<(Rc<str>, Pending)>,
    statics: Vec<(Rc<str>, NativeFunction)>,
    display: Option<DisplayFn>,
    _marker: PhantomData<fn() -> T>,
}

impl ScriptState {
    pub fn new_usertype<T: Any>(&mut self, name: &str) -> UserTypeBuilder<'_, T> {
        UserTypeBuilder {
            state: self,
            name: Rc::from(name),
            members: Vec::new(),
            statics: Vec::new(),
            display: None,
            _marker: PhantomData,
        }
    }
}

impl<'s, T: Any> UserTypeBuilder<'s, T> {
    /// Exposed as `Name.new(...)`.
    pub fn constructor<A, F>(self, f: F) -> Self
    where
        T: IntoScript,
        A: FromArgs + 'static,
        F: Fn(A) -> T + 'static,
    {
        self.function("new", f)
    }

    /// Static function in the type's global table.
    pub fn function<A, R, F>(mut self, name: &str, f: F) -> Self
    where
        A: FromArgs + 'static,
        R: IntoResults + 'static,
        F: Fn(A) -> R + 'static,
    {
        self.statics
            .push((Rc::from(name), NativeFunction::wrap(name, f)));
        self
    }

    pub fn method<A, R, F>(self, name: &str, f: F) -> Self
    where
        A: FromArgs + 'static,
        R: IntoResults + 'static,
        F: Fn(&T, A) -> R + 'static,
    {
        let body = move |state: &mut ScriptState, frame: &mut CallFrame| -> Result<()> {
            let receiver = frame.receiver()?;
            let args = A::from_args(state, frame.args.get(1..).unwrap_or_default())?;
            let output = state.with_ref::<T, _>(receiver, |this| f(this, args))?;
            frame.results = output.into_results(state)?;
            Ok(())
        };
        self.push_method(name, NativeFunction::raw(name, body))
    }

    /// Method taking `&mut self`; fails on read-only handles.
    pub fn method_mut<A, R, F>(self, name: &str, f: F) -> Self
    where
        A: FromArgs + 'static,
        R: IntoResults + 'static,
        F: Fn(&mut T, A) -> R + 'static,
    {
        let body = move |state: &mut ScriptState, frame: &mut CallFrame| -> Result<()> {
            let receiver = frame.receiver()?;
            let args = A::from_args(state, frame.args.get(1..).unwrap_or_default())?;
            let output = state.with_mut::<T, _>(receiver, |this| f(this, args))?;
            frame.results = output.into_results(state)?;
            Ok(())
        };
        self.push_method(name, NativeFunction::raw(name, body))
    }

    /// `&mut self` method whose result is the receiver's own handle, for
    /// builder-style chaining. Nothing new is allocated per call.
    pub fn chain_method<A, F>(self, name: &str, f: F) -> Self
    where
        A: FromArgs + 'static,
        F: Fn(&mut T, A) + 'static,
    {
        self.method_mut(name, f).filters(name, [Filter::ReturnsSelf])
    }

    /// Method that works on the call frame directly; the receiver is
    /// `frame.args[0]`.
    pub fn raw(
        self,
        name: &str,
        body: impl Fn(&mut ScriptState, &mut CallFrame) -> Result<()> + 'static,
    ) -> Self {
        self.push_method(name, NativeFunction::raw(name, body))
    }

    pub fn field<M, G, GM>(self, name: &str, get: G, get_mut: GM) -> Self
    where
        M: Element,
        G: Fn(&T) -> &M + 'static,
        GM: Fn(&mut T) -> &mut M + 'static,
    {
        self.push_field::<M>(name, Rc::new(FieldProjection::new(get, get_mut)), false)
    }

    /// Field without a setter; objects reached through it are read-only.
    pub fn readonly_field<M, G, GM>(self, name: &str, get: G, get_mut: GM) -> Self
    where
        M: Element,
        G: Fn(&T) -> &M + 'static,
        GM: Fn(&mut T) -> &mut M + 'static,
    {
        self.push_field::<M>(name, Rc::new(FieldProjection::new(get, get_mut)), true)
    }

    pub fn display(mut self, f: impl Fn(&T) -> String + 'static) -> Self {
        self.display = Some(Rc::new(move |state: &ScriptState, id: HandleId| {
            state.with_ref::<T, _>(id, |this| f(this))
        }));
        self
    }

    /// Attach filters to an already declared member or static function.
    pub fn filters(mut self, name: &str, filters: impl IntoIterator<Item = Filter>) -> Self {
        let filters: Vec<Filter> = filters.into_iter().collect();
        let member = self.members.iter_mut().find(|(n, _)| &**n == name);
        match member {
            Some((_, Pending::Method(function))) => function.filters.extend(filters),
            Some((_, Pending::Field(field))) => field.filters.extend(filters),
            None => match self.statics.iter_mut().find(|(n, _)| &**n == name) {
                Some((_, function)) => function.filters.extend(filters),
                None => tracing::warn!(
                    usertype = %self.name,
                    member = name,
                    "filters for undeclared member ignored"
                ),
            },
        }
        self
    }

    pub fn register(self) {
        let UserTypeBuilder {
            state,
            name,
            members,
            statics,
            display,
            ..
        } = self;

        let bindings: Vec<(Rc<str>, Binding)> = members
            .into_iter()
            .map(|(member, pending)| {
                let binding = match pending {
                    Pending::Method(function) => Binding::Method(state.register_function(function)),
                    Pending::Field(field) => Binding::Field(Rc::new(field)),
                };
                (member, binding)
            })
            .collect();
        let count = bindings.len();

        let info = state
            .types
            .entry(TypeId::of::<T>())
            .or_insert_with(|| UserTypeInfo::new(name.clone()));
        info.name = name.clone();
        if display.is_some() {
            info.display = display;
        }
        // declared members replace container defaults of the same name
        info.members.extend(bindings);

        if !statics.is_empty() {
            let mut table = Table::new();
            for (member, function) in statics {
                let function = Value::Function(state.register_function(function));
                table.set(TableKey::String(member), function);
            }
            let table = Value::Table(state.heap.alloc(Object::Table(table)));
            state.set_global(&name, table);
        }
        tracing::debug!(usertype = %name, members = count, "usertype registered");
    }

    fn push_method(mut self, name: &str, function: NativeFunction) -> Self {
        self.members.push((Rc::from(name), Pending::Method(function)));
        self
    }

    fn push_field<M: Element>(
        mut self,
        name: &str,
        projection: Rc<dyn Project>,
        readonly: bool,
    ) -> Self {
        let getter = projection.clone();
        let get: FieldGetter = Box::new(move |state: &mut ScriptState, id: HandleId| {
            M::install(state);
            M::push_place(state, Place::new(id, getter.clone(), readonly))
        });
        let set: Option<FieldSetter> = if readonly {
            None
        } else {
            Some(Box::new(move |state: &mut ScriptState, id: HandleId, value: &Value| {
                let member = M::from_script(state, value)?;
                state.write_place(&Place::new(id, projection.clone(), false), member)
            }))
        };
        let field = Field {
            type_name: type_name::<M>(),
            get,
            set,
            filters: Vec::new(),
        };
        self.members.push((Rc::from(name), Pending::Field(field)));
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::define_usertype;

    #[derive(Debug, Clone, Default, PartialEq)]
    struct Vec2 {
        x: f64,
        y: f64,
    }

    define_usertype!(Vec2);

    #[derive(Debug, Clone, Default)]
    struct Body {
        position: Vec2,
        mass: i64,
    }

    define_usertype!(Body);

    fn register(state: &mut ScriptState) {
        state
            .new_usertype::<Vec2>("vec2")
            .constructor(|(x, y): (f64, f64)| Vec2 { x, y })
            .field("x", |v| &v.x, |v| &mut v.x)
            .field("y", |v| &v.y, |v| &mut v.y)
            .method("length", |v: &Vec2, ()| (v.x * v.x + v.y * v.y).sqrt())
            .method_mut("scale", |v: &mut Vec2, (k,): (f64,)| {
                v.x *= k;
                v.y *= k;
            })
            .display(|v| format!("({}, {})", v.x, v.y))
            .register();
        state
            .new_usertype::<Body>("body")
            .constructor(|()| Body::default())
            .field("position", |b| &b.position, |b| &mut b.position)
            .readonly_field("mass", |b| &b.mass, |b| &mut b.mass)
            .register();
    }

    #[test]
    fn test_constructor_fields_and_methods() {
        let mut state = ScriptState::new();
        register(&mut state);
        let class = state.get_global("vec2");
        let new = state.index(&class, &Value::from("new")).unwrap();
        let v = state
            .call(&new, vec![Value::Number(3.0), Value::Number(4.0)])
            .unwrap()
            .remove(0);

        assert_eq!(state.call_method(&v, "length", Vec::new()).unwrap(), vec![Value::Number(5.0)]);
        state.call_method(&v, "scale", vec![Value::Number(2.0)]).unwrap();
        assert_eq!(state.index(&v, &Value::from("x")).unwrap(), Value::Number(6.0));

        state.set_index(&v, "y", 1.5).unwrap();
        assert_eq!(state.index(&v, &Value::from("y")).unwrap(), Value::Number(1.5));
        assert_eq!(state.tostring(&v).unwrap(), "(6, 1.5)");
    }

    #[test]
    fn test_nested_member_edits_reach_parent() {
        let mut state = ScriptState::new();
        register(&mut state);
        state.set("body", Body::default()).unwrap();
        let body = state.get_global("body");
        let position = state.index(&body, &Value::from("position")).unwrap();
        state.set_index(&position, "x", 7.0).unwrap();
        assert_eq!(state.get::<Body>("body").unwrap().position.x, 7.0);

        let again = state.index(&body, &Value::from("position")).unwrap();
        assert_eq!(again, position);
    }

    #[test]
    fn test_readonly_field_rejects_assignment() {
        let mut state = ScriptState::new();
        register(&mut state);
        state.set("body", Body { mass: 3, ..Body::default() }).unwrap();
        let body = state.get_global("body");
        assert_eq!(state.index(&body, &Value::from("mass")).unwrap(), Value::Integer(3));
        let err = state.set_index(&body, "mass", 4).unwrap_err();
        assert!(matches!(err, ScriptError::ReadOnly { .. }));
    }

    #[test]
    fn test_unknown_member() {
        let mut state = ScriptState::new();
        register(&mut state);
        state.set("v", Vec2::default()).unwrap();
        let v = state.get_global("v");
        assert_eq!(state.index(&v, &Value::from("z")).unwrap(), Value::Nil);
        let err = state.set_index(&v, "z", 1).unwrap_err();
        assert!(matches!(err, ScriptError::UnknownMember { .. }));
        assert!(state.call_method(&v, "missing", Vec::new()).is_err());
    }

    #[test]
    fn test_method_mut_on_readonly_handle() {
        let mut state = ScriptState::new();
        register(&mut state);
        let target = Rc::new(std::cell::RefCell::new(Vec2 { x: 1.0, y: 0.0 }));
        let v = state.push_readonly(&target);
        assert!(state.call_method(&v, "length", Vec::new()).is_ok());
        let err = state.call_method(&v, "scale", vec![Value::Number(2.0)]).unwrap_err();
        assert!(matches!(err, ScriptError::ReadOnly { .. }));
        assert_eq!(target.borrow().x, 1.0);
    }

    #[test]
    fn test_custom_filter_on_field_getter() {
        let mut state = ScriptState::new();
        state
            .new_usertype::<Body>("body")
            .field("mass", |b| &b.mass, |b| &mut b.mass)
            .filters(
                "mass",
                [Filter::custom(|_, frame| {
                    frame.results = vec![Value::Integer(24)];
                    Ok(())
                })],
            )
            .register();
        state.set("b", Body::default()).unwrap();
        let b = state.get_global("b");
        assert_eq!(state.index(&b, &Value::from("mass")).unwrap(), Value::Integer(24));
    }
}
