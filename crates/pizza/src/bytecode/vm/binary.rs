//! Arithmetic, unary and bitwise instruction handlers.

use super::VM;
use crate::{
    bytecode::op::Opcode,
    exception::{ErrorKind, RunError, RunResult, RuntimeError},
    value::Value,
};

/// Most decimal places `bit_op` scales through before truncating.
const MAX_BIT_SCALE: u32 = 16;

/// Longest text (in bytes) or list a repeat may produce.
const MAX_REPEAT_LEN: usize = 1 << 30;

impl VM {
    /// Binary arithmetic: `Add`, `Subtract`, `Multiply`, `Divide`, `Modulo`, `Power`.
    ///
    /// An instance on the left with the matching bin method takes over the operation.
    pub(super) fn binary(&mut self, op: Opcode) -> RunResult<()> {
        let b = self.pop()?;
        let a = self.pop()?;
        let overload = match op {
            Opcode::Add => "add",
            Opcode::Subtract => "sub",
            Opcode::Multiply => "mul",
            Opcode::Divide => "div",
            Opcode::Modulo => "mod",
            Opcode::Power => "fastpow",
            _ => return Err(RunError::internal(format!("{op:?} is not a binary operator"))),
        };
        if self.call_overload(&a, overload, vec![b.clone()])? {
            return Ok(());
        }
        let result = match op {
            Opcode::Add => add(&a, &b)?,
            Opcode::Multiply => multiply(&a, &b)?,
            Opcode::Divide => match &a {
                Value::List(list) => {
                    let mut items = list.read().clone();
                    if let Some(index) = items.iter().position(|item| *item == b) {
                        items.remove(index);
                    }
                    Value::list(items)
                }
                _ => Value::Number(number(&a)? / number(&b)?),
            },
            Opcode::Subtract => Value::Number(number(&a)? - number(&b)?),
            Opcode::Modulo => Value::Number(number(&a)? % number(&b)?),
            _ => Value::Number(number(&a)?.powf(number(&b)?)),
        };
        self.push(result)
    }

    pub(super) fn unary(&mut self, op: Opcode) -> RunResult<()> {
        let a = self.pop()?;
        let result = match op {
            Opcode::Not => Value::Bool(!a.is_truthy()),
            Opcode::Increment => Value::Number(number(&a)? + 1.0),
            Opcode::Decrement => Value::Number(number(&a)? - 1.0),
            Opcode::Negate => Value::Number(-number(&a)?),
            _ => return Err(RunError::internal(format!("{op:?} is not a unary operator"))),
        };
        self.push(result)
    }

    pub(super) fn bit_op(&mut self, op: Opcode) -> RunResult<()> {
        let b = number(&self.pop()?)?;
        let a = number(&self.pop()?)?;
        let result = match op {
            Opcode::BitAnd => bit_op(a, b, |l, r| l & r),
            Opcode::BitOr => bit_op(a, b, |l, r| l | r),
            Opcode::BitXor => bit_op(a, b, |l, r| l ^ r),
            Opcode::LeftShift => bit_op(a, b, |l, r| l.wrapping_shl(shift_amount(r))),
            Opcode::RightShift => bit_op(a, b, |l, r| ((l as u64).wrapping_shr(shift_amount(r))) as i64),
            Opcode::SignRightShift => bit_op(a, b, |l, r| l.wrapping_shr(shift_amount(r))),
            _ => return Err(RunError::internal(format!("{op:?} is not a bitwise operator"))),
        };
        self.push(Value::Number(result))
    }

    pub(super) fn bit_compl(&mut self) -> RunResult<()> {
        let a = number(&self.pop()?)?;
        self.push(Value::Number(bit_op(a, 0.0, |l, _| !l)))
    }
}

/// Reads a numeric operand.
fn number(value: &Value) -> Result<f64, RuntimeError> {
    match value {
        Value::Number(n) => Ok(*n),
        Value::Bool(b) => Ok(f64::from(u8::from(*b))),
        other => Err(ErrorKind::Type.error(format!("Expected num but got {}", other.type_name()))),
    }
}

/// `+`: texts concatenate with the right operand's text form, lists concatenate (a
/// non-list right operand is appended), numbers add.
fn add(a: &Value, b: &Value) -> Result<Value, RuntimeError> {
    match a {
        Value::Text(s) => Ok(Value::text(format!("{s}{}", text_form(b)))),
        Value::List(list) => {
            let mut items = list.read().clone();
            match b {
                Value::List(other) => items.extend(other.read().iter().cloned()),
                other => items.push(other.clone()),
            }
            Ok(Value::list(items))
        }
        _ => Ok(Value::Number(number(a)? + number(b)?)),
    }
}

/// `*`: texts and lists repeat by a non-negative whole count, numbers multiply.
fn multiply(a: &Value, b: &Value) -> Result<Value, RuntimeError> {
    match a {
        Value::Text(s) => {
            let count = repeat_count(b, s.len())?;
            let mut repeated = String::new();
            repeated.try_reserve(s.len() * count).map_err(|_| cannot_repeat(b))?;
            for _ in 0..count {
                repeated.push_str(s);
            }
            Ok(Value::text(repeated))
        }
        Value::List(list) => {
            let items = list.read();
            let count = repeat_count(b, items.len())?;
            let mut repeated = Vec::new();
            repeated.try_reserve(items.len() * count).map_err(|_| cannot_repeat(b))?;
            for _ in 0..count {
                repeated.extend(items.iter().cloned());
            }
            Ok(Value::list(repeated))
        }
        _ => Ok(Value::Number(number(a)? * number(b)?)),
    }
}

/// Validates a repeat count for a sequence of `len` elements.
///
/// Repeating an empty sequence always yields zero copies.
fn repeat_count(value: &Value, len: usize) -> Result<usize, RuntimeError> {
    let n = number(value)?;
    if n < 0.0 || n.fract() != 0.0 {
        return Err(ErrorKind::Type.error(format!("Cannot repeat {n} times")));
    }
    if len == 0 {
        return Ok(0);
    }
    let count = n as usize;
    match len.checked_mul(count) {
        Some(total) if total <= MAX_REPEAT_LEN => Ok(count),
        _ => Err(cannot_repeat(value)),
    }
}

fn cannot_repeat(count: &Value) -> RuntimeError {
    ErrorKind::Range.error(format!("Cannot repeat {count} times"))
}

fn text_form(value: &Value) -> String {
    match value {
        Value::Text(s) => s.to_string(),
        other => other.to_string(),
    }
}

fn shift_amount(r: i64) -> u32 {
    (r & 63) as u32
}

/// Applies an integer bit operation to two numbers.
///
/// Both operands are scaled by the same power of ten until they are whole (at most
/// `MAX_BIT_SCALE` times), the operation runs on the scaled integers, and the result is
/// scaled back down.
fn bit_op(mut left: f64, mut right: f64, op: impl Fn(i64, i64) -> i64) -> f64 {
    let mut power = 0;
    while (left.fract() != 0.0 || right.fract() != 0.0) && power < MAX_BIT_SCALE {
        left *= 10.0;
        right *= 10.0;
        power += 1;
    }
    op(left as i64, right as i64) as f64 / 10f64.powi(power as i32)
}
