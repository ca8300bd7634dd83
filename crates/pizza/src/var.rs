//! Shared mutable variable cells.

use std::{fmt, sync::Arc};

use parking_lot::RwLock;

use crate::{
    exception::{ErrorKind, RuntimeError},
    value::Value,
};

/// A variable cell shared by every scope that refers to it.
///
/// Globals, local slots and captured upvalues all hold clones of the same `Var`, so a
/// write through any of them is seen by all. Constancy and the optional inclusive range
/// are fixed when the cell is created.
#[derive(Clone)]
pub struct Var(Arc<VarCell>);

struct VarCell {
    value: RwLock<Value>,
    constant: bool,
    range: Option<(f64, f64)>,
}

impl Var {
    /// A mutable, unconstrained variable.
    pub fn new(value: Value) -> Self {
        Self::with_constraints(value, false, None)
    }

    /// A variable that rejects every `set`.
    pub fn constant(value: Value) -> Self {
        Self::with_constraints(value, true, None)
    }

    pub fn with_constraints(value: Value, constant: bool, range: Option<(f64, f64)>) -> Self {
        Self(Arc::new(VarCell {
            value: RwLock::new(value),
            constant,
            range,
        }))
    }

    #[must_use]
    pub fn get(&self) -> Value {
        self.0.value.read().clone()
    }

    /// Assigns a new value, enforcing constancy and the range constraint.
    ///
    /// On error the previous value is left untouched.
    pub fn set(&self, value: Value) -> Result<(), RuntimeError> {
        if self.0.constant {
            return Err(ErrorKind::Scope.error("Cannot reassign constant"));
        }
        if let Some((min, max)) = self.0.range {
            match value {
                Value::Number(n) if n >= min && n <= max => {}
                _ => return Err(ErrorKind::Range.error("Value out of range")),
            }
        }
        *self.0.value.write() = value;
        Ok(())
    }

    /// Overwrites the value without any checks, returning the old one.
    ///
    /// Only loop machinery (`For`, `Iter`) writes this way.
    pub(crate) fn replace(&self, value: Value) -> Value {
        std::mem::replace(&mut *self.0.value.write(), value)
    }

    #[must_use]
    pub fn is_constant(&self) -> bool {
        self.0.constant
    }

    #[must_use]
    pub fn range(&self) -> Option<(f64, f64)> {
        self.0.range
    }

    /// True when both handles refer to the same cell.
    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    pub(crate) fn addr(&self) -> usize {
        Arc::as_ptr(&self.0) as usize
    }
}

impl fmt::Debug for Var {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Var")
            .field("value", &*self.0.value.read())
            .field("constant", &self.0.constant)
            .field("range", &self.0.range)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constant_rejects_set() {
        let var = Var::constant(Value::Number(1.0));
        let err = var.set(Value::Number(2.0)).unwrap_err();
        assert!(err.is(ErrorKind::Scope));
        assert_eq!(var.get(), Value::Number(1.0));
    }

    #[test]
    fn range_is_inclusive() {
        let var = Var::with_constraints(Value::Number(5.0), false, Some((0.0, 10.0)));
        var.set(Value::Number(10.0)).unwrap();
        var.set(Value::Number(0.0)).unwrap();
        let err = var.set(Value::Number(10.5)).unwrap_err();
        assert!(err.is(ErrorKind::Range));
        assert_eq!(var.get(), Value::Number(0.0));
    }

    #[test]
    fn range_rejects_non_numbers() {
        let var = Var::with_constraints(Value::Number(5.0), false, Some((0.0, 10.0)));
        let err = var.set(Value::Text("five".into())).unwrap_err();
        assert!(err.is(ErrorKind::Range));
        assert_eq!(var.get(), Value::Number(5.0));
    }

    #[test]
    fn clones_share_the_cell() {
        let a = Var::new(Value::Null);
        let b = a.clone();
        b.set(Value::Bool(true)).unwrap();
        assert_eq!(a.get(), Value::Bool(true));
        assert!(a.ptr_eq(&b));
    }

    #[test]
    fn replace_bypasses_constancy() {
        let var = Var::constant(Value::Number(1.0));
        let old = var.replace(Value::Number(2.0));
        assert_eq!(old, Value::Number(1.0));
        assert_eq!(var.get(), Value::Number(2.0));
    }
}
