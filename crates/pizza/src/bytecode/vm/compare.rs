//! Comparison instruction handlers, including pattern matching through `Equal`.

use std::cmp::Ordering;

use super::VM;
use crate::{
    bytecode::op::Opcode,
    exception::{ErrorKind, RunError, RunResult, RuntimeError},
    value::Value,
    var::Var,
};

impl VM {
    pub(super) fn compare(&mut self, op: Opcode) -> RunResult<()> {
        let b = self.pop()?;
        let a = self.pop()?;
        match op {
            Opcode::Equal => self.equal(a, b),
            Opcode::LessThan | Opcode::LessEqual => {
                let overload = if op == Opcode::LessThan { "lt" } else { "lte" };
                if self.call_overload(&a, overload, vec![b.clone()])? {
                    return Ok(());
                }
                let ordering = order(&a, &b)?;
                let result = if op == Opcode::LessThan {
                    ordering.is_some_and(Ordering::is_lt)
                } else {
                    ordering.is_some_and(Ordering::is_le)
                };
                self.push(Value::Bool(result))
            }
            Opcode::GreaterThan | Opcode::GreaterEqual => {
                // `a > b` asks `b < a`
                let overload = if op == Opcode::GreaterThan { "lt" } else { "lte" };
                if self.call_overload(&b, overload, vec![a.clone()])? {
                    return Ok(());
                }
                let ordering = order(&a, &b)?;
                let result = if op == Opcode::GreaterThan {
                    ordering.is_some_and(Ordering::is_gt)
                } else {
                    ordering.is_some_and(Ordering::is_ge)
                };
                self.push(Value::Bool(result))
            }
            _ => Err(RunError::internal(format!("{op:?} is not a comparison"))),
        }
    }

    fn equal(&mut self, a: Value, b: Value) -> RunResult<()> {
        if let Value::Pattern(pattern) = &b {
            return match pattern.matches(&a)? {
                Some(bindings) => {
                    for value in bindings {
                        self.push(Value::Cell(Var::constant(value)))?;
                    }
                    self.push(Value::Bool(true))
                }
                None => self.push(Value::Bool(false)),
            };
        }
        if self.call_overload(&a, "eq", vec![b.clone()])? || self.call_overload(&b, "eq", vec![a.clone()])? {
            return Ok(());
        }
        self.push(Value::Bool(a == b))
    }
}

/// Built-in ordering: numbers numerically, texts lexicographically. `None` when a NaN is
/// involved, which makes every comparison false.
fn order(a: &Value, b: &Value) -> Result<Option<Ordering>, RuntimeError> {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => Ok(x.partial_cmp(y)),
        (Value::Text(x), Value::Text(y)) => Ok(Some(x.cmp(y))),
        _ => Err(ErrorKind::Type.error(format!(
            "Cannot compare {} and {}",
            a.type_name(),
            b.type_name()
        ))),
    }
}
