//! Collection construction, indexing, loop instructions and byte encoding.

use super::VM;
use crate::{
    exception::{ErrorKind, RunError, RunResult, RuntimeError},
    object::PizzaObject,
    value::Value,
};

impl VM {
    pub(super) fn make_array(&mut self) -> RunResult<()> {
        let count = usize::from(self.fetch_u8()?);
        let items = self.pop_n(count)?;
        self.push(Value::list(items))
    }

    pub(super) fn make_map(&mut self) -> RunResult<()> {
        let count = usize::from(self.fetch_u8()?);
        let flat = self.pop_n(count * 2)?;
        let mut entries = Vec::with_capacity(count);
        let mut iter = flat.into_iter();
        while let (Some(key), Some(value)) = (iter.next(), iter.next()) {
            entries.push((key, value));
        }
        self.push(Value::map(entries))
    }

    /// `Get` and `Index`: `overload` names the bin method that takes over for instances.
    pub(super) fn index(&mut self, overload: &str) -> RunResult<()> {
        let index = self.pop()?;
        let collection = self.pop()?;
        if self.call_overload(&collection, overload, vec![index.clone()])? {
            return Ok(());
        }
        let value = match &collection {
            Value::List(list) => {
                let items = list.read();
                let at = position(&index, items.len())?;
                items[at].clone()
            }
            Value::Text(text) => {
                let chars: Vec<char> = text.chars().collect();
                let at = position(&index, chars.len())?;
                Value::text(chars[at].to_string())
            }
            Value::Bytes(bytes) => {
                let at = position(&index, bytes.len())?;
                Value::Number(f64::from(bytes[at]))
            }
            Value::Map(map) => map.read().get(&index).cloned().unwrap_or_default(),
            other => {
                return Err(ErrorKind::Type
                    .error(format!("Cannot index {}", other.type_name()))
                    .into());
            }
        };
        self.push(value)
    }

    /// `For`: steps the loop counter in `slot` and leaves the loop once it passes the end.
    pub(super) fn for_step(&mut self) -> RunResult<()> {
        let step = loop_number(&self.pop()?)?;
        let end = loop_number(&self.pop()?)?;
        let slot = self.fetch_u8()?;
        let jump = self.fetch_u16()?;

        let index = self.slot_index(slot)?;
        let counter = match self.stack.get(index) {
            Some(Value::Cell(var)) => {
                let next = loop_number(&var.get())? + step;
                var.replace(Value::Number(next));
                next
            }
            Some(raw) => {
                let next = loop_number(raw)? + step;
                self.stack[index] = Value::Number(next);
                next
            }
            None => return Err(RunError::internal(format!("For on missing slot {slot}"))),
        };

        let done = if step >= 0.0 { counter >= end } else { counter <= end };
        if done {
            self.jump_forward(jump)?;
        }
        Ok(())
    }

    /// `Iter`: moves the first element of the list in `list_slot` into `var_slot`, or
    /// leaves the loop when the list is empty.
    pub(super) fn iter_step(&mut self) -> RunResult<()> {
        let list_slot = self.fetch_u8()?;
        let var_slot = self.fetch_u8()?;
        let jump = self.fetch_u16()?;

        let list = match self.stack.get(self.slot_index(list_slot)?).map(Value::deref_cell) {
            Some(Value::List(list)) => list,
            Some(other) => {
                return Err(ErrorKind::Type
                    .error(format!("Cannot iterate over {}", other.type_name()))
                    .into());
            }
            None => return Err(RunError::internal(format!("Iter on missing slot {list_slot}"))),
        };
        let next = {
            let mut items = list.write();
            if items.is_empty() {
                None
            } else {
                Some(items.remove(0))
            }
        };
        let Some(next) = next else {
            return self.jump_forward(jump);
        };

        let index = self.slot_index(var_slot)?;
        match self.stack.get_mut(index) {
            Some(Value::Cell(var)) => {
                var.replace(next);
            }
            Some(raw) => *raw = next,
            None => return Err(RunError::internal(format!("Iter on missing slot {var_slot}"))),
        }
        Ok(())
    }

    pub(super) fn to_bytes(&mut self) -> RunResult<()> {
        let value = self.pop()?;
        let bytes = PizzaObject::from_value(&value)
            .to_bytes()
            .map_err(|err| RunError::internal(format!("failed to encode value: {err}")))?;
        self.push(Value::bytes(bytes))
    }

    pub(super) fn from_bytes(&mut self) -> RunResult<()> {
        let Value::Bytes(bytes) = self.pop()? else {
            return Err(ErrorKind::Type.error("Expected bytes").into());
        };
        let value = PizzaObject::from_bytes(&bytes)
            .map_err(|err| ErrorKind::Type.error(format!("Invalid byte encoding: {err}")))?
            .to_value()
            .map_err(|err| ErrorKind::Type.error(err.to_string()))?;
        self.push(value)
    }
}

/// Resolves a possibly negative index against a length.
fn position(index: &Value, len: usize) -> Result<usize, RuntimeError> {
    let Some(n) = index.as_number() else {
        return Err(ErrorKind::Type.error(format!("Expected num but got {}", index.type_name())));
    };
    // truncates toward zero
    let n = n as i64;
    let at = if n < 0 { n + len as i64 } else { n };
    if at < 0 || at >= len as i64 {
        return Err(ErrorKind::Index.error("Index out of bounds"));
    }
    Ok(at as usize)
}

fn loop_number(value: &Value) -> Result<f64, RuntimeError> {
    value
        .as_number()
        .ok_or_else(|| ErrorKind::Type.error(format!("Expected num but got {}", value.type_name())))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn negative_indices_count_from_the_end() {
        assert_eq!(position(&Value::Number(-1.0), 3).unwrap(), 2);
        assert_eq!(position(&Value::Number(0.0), 3).unwrap(), 0);
        assert!(position(&Value::Number(3.0), 3).unwrap_err().is(ErrorKind::Index));
        assert!(position(&Value::Number(-4.0), 3).unwrap_err().is(ErrorKind::Index));
    }
}
