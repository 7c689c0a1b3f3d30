//! Projections from a parent object to one of its sub-objects
//!
//! Member handles never hold a pointer into their parent. They hold a
//! projection and re-resolve it on every access, so a sub-object that has
//! moved (a vector that reallocated) is still found at its current spot.

use std::any::Any;
use std::marker::PhantomData;
use std::rc::Rc;
use tether_core::HandleId;

/// Resolve a sub-object from its parent.
pub trait Project {
    fn get<'a>(&self, parent: &'a dyn Any) -> Option<&'a dyn Any>;
    fn get_mut<'a>(&self, parent: &'a mut dyn Any) -> Option<&'a mut dyn Any>;
}

/// Where a value lives: a projection applied to a parent handle's storage.
#[derive(Clone)]
pub struct Place {
    pub(crate) parent: HandleId,
    pub(crate) projection: Rc<dyn Project>,
    pub(crate) readonly: bool,
}

impl Place {
    pub fn new(parent: HandleId, projection: Rc<dyn Project>, readonly: bool) -> Self {
        Self {
            parent,
            projection,
            readonly,
        }
    }

    pub fn parent(&self) -> HandleId {
        self.parent
    }

    pub fn is_readonly(&self) -> bool {
        self.readonly
    }

    /// Narrow this place further with `next`.
    pub fn then(self, next: Rc<dyn Project>) -> Self {
        Self {
            parent: self.parent,
            projection: Rc::new(Chain {
                first: self.projection,
                second: next,
            }),
            readonly: self.readonly,
        }
    }

    pub fn readonly(mut self) -> Self {
        self.readonly = true;
        self
    }
}

/// Struct field accessors turned into a projection.
pub struct FieldProjection<P, M, G, GM> {
    get: G,
    get_mut: GM,
    _marker: PhantomData<fn() -> (P, M)>,
}

impl<P, M, G, GM> FieldProjection<P, M, G, GM>
where
    P: Any,
    M: Any,
    G: Fn(&P) -> &M,
    GM: Fn(&mut P) -> &mut M,
{
    pub fn new(get: G, get_mut: GM) -> Self {
        Self {
            get,
            get_mut,
            _marker: PhantomData,
        }
    }
}

impl<P, M, G, GM> Project for FieldProjection<P, M, G, GM>
where
    P: Any,
    M: Any,
    G: Fn(&P) -> &M,
    GM: Fn(&mut P) -> &mut M,
{
    fn get<'a>(&self, parent: &'a dyn Any) -> Option<&'a dyn Any> {
        let parent = parent.downcast_ref::<P>()?;
        Some((self.get)(parent) as &dyn Any)
    }

    fn get_mut<'a>(&self, parent: &'a mut dyn Any) -> Option<&'a mut dyn Any> {
        let parent = parent.downcast_mut::<P>()?;
        Some((self.get_mut)(parent) as &mut dyn Any)
    }
}

struct Chain {
    first: Rc<dyn Project>,
    second: Rc<dyn Project>,
}

impl Project for Chain {
    fn get<'a>(&self, parent: &'a dyn Any) -> Option<&'a dyn Any> {
        self.second.get(self.first.get(parent)?)
    }

    fn get_mut<'a>(&self, parent: &'a mut dyn Any) -> Option<&'a mut dyn Any> {
        self.second.get_mut(self.first.get_mut(parent)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Outer {
        inner: Inner,
    }

    struct Inner {
        value: i64,
    }

    #[test]
    fn test_chained_projection_reaches_nested_field() {
        let outer_to_inner: Rc<dyn Project> = Rc::new(FieldProjection::new(
            |o: &Outer| &o.inner,
            |o: &mut Outer| &mut o.inner,
        ));
        let inner_to_value: Rc<dyn Project> = Rc::new(FieldProjection::new(
            |i: &Inner| &i.value,
            |i: &mut Inner| &mut i.value,
        ));
        let chain = Chain {
            first: outer_to_inner,
            second: inner_to_value,
        };

        let mut outer = Outer {
            inner: Inner { value: 5 },
        };
        let found = chain.get(&outer).and_then(|v| v.downcast_ref::<i64>());
        assert_eq!(found, Some(&5));

        if let Some(v) = chain.get_mut(&mut outer).and_then(|v| v.downcast_mut::<i64>()) {
            *v = 9;
        }
        assert_eq!(outer.inner.value, 9);
    }

    #[test]
    fn test_wrong_parent_type_resolves_to_none() {
        let projection = FieldProjection::new(|i: &Inner| &i.value, |i: &mut Inner| &mut i.value);
        assert!(projection.get(&42_u8).is_none());
    }
}
