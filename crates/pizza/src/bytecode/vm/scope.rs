//! Variable and member access: globals, locals, upvalues, closure creation and the bound
//! receiver.

use std::sync::Arc;

use super::VM;
use crate::{
    bytecode::op::UpvalueKind,
    exception::{ErrorKind, RunError, RunResult},
    function::{BoundMethod, Closure, Upvalue},
    types::FieldLookup,
    value::Value,
    var::Var,
};

impl VM {
    // ========================================================================
    // Globals
    // ========================================================================

    pub(super) fn define_global(&mut self) -> RunResult<()> {
        let name = self.fetch_name()?;
        let value = self.peek(0)?.clone();
        let var = self.fetch_var_decl(value)?;
        self.globals.insert(name, var);
        Ok(())
    }

    /// `GetGlobal`: globals first, then the bound receiver's members.
    pub(super) fn get_global(&mut self) -> RunResult<()> {
        let name = self.fetch_name()?;
        if let Some(var) = self.globals.get(&name) {
            let value = var.get();
            return self.push(value);
        }
        match self.bound_member(&name)? {
            Some(value) => self.push(value),
            None => Err(ErrorKind::Scope.error("Undefined variable").into()),
        }
    }

    /// `SetGlobal`: a member of the bound receiver shadows a global of the same name.
    pub(super) fn set_global(&mut self) -> RunResult<()> {
        let name = self.fetch_name()?;
        let value = self.peek(0)?.clone();
        if self.set_bound_member(&name, value.clone())? {
            return Ok(());
        }
        match self.globals.get(&name) {
            Some(var) => Ok(var.set(value)?),
            None => Err(ErrorKind::Scope.error("Undefined variable").into()),
        }
    }

    pub(super) fn drop_global(&mut self) -> RunResult<()> {
        let name = self.fetch_name()?;
        match self.globals.remove(&name) {
            Some(_) => Ok(()),
            None => Err(ErrorKind::Scope.error(format!("No such global: {name}")).into()),
        }
    }

    // ========================================================================
    // Locals
    // ========================================================================

    /// `DefineLocal`: the popped value becomes a cell in the slot it occupied, and is
    /// pushed again as the expression's value.
    pub(super) fn define_local(&mut self) -> RunResult<()> {
        let value = self.pop()?;
        let var = self.fetch_var_decl(value.clone())?;
        self.push(Value::Cell(var))?;
        self.push(value)
    }

    pub(super) fn get_local(&mut self) -> RunResult<()> {
        let slot = self.fetch_u8()?;
        let index = self.slot_index(slot)?;
        let value = match self.stack.get(index) {
            Some(Value::Cell(var)) => var.get(),
            Some(raw) => raw.clone(),
            None => return Err(ErrorKind::Scope.error("Undefined variable").into()),
        };
        self.push(value)
    }

    pub(super) fn set_local(&mut self) -> RunResult<()> {
        let slot = self.fetch_u8()?;
        let index = self.slot_index(slot)?;
        let value = self.peek(0)?.clone();
        match self.stack.get_mut(index) {
            Some(Value::Cell(var)) => Ok(var.set(value)?),
            Some(raw) => {
                *raw = value;
                Ok(())
            }
            None => Err(ErrorKind::Scope.error("Undefined variable").into()),
        }
    }

    /// `MakeVar`: turns a raw parameter slot into a cell so it can be captured.
    pub(super) fn make_var(&mut self) -> RunResult<()> {
        let slot = self.fetch_u8()?;
        let constant = self.fetch_flag()?;
        let index = self.slot_index(slot)?;
        let entry = self
            .stack
            .get_mut(index)
            .ok_or_else(|| RunError::internal(format!("MakeVar on missing slot {slot}")))?;
        if !matches!(entry, Value::Cell(_)) {
            let value = std::mem::take(entry);
            *entry = Value::Cell(Var::with_constraints(value, constant, None));
        }
        Ok(())
    }

    pub(super) fn drop_local(&mut self) -> RunResult<()> {
        let slot = self.fetch_u8()?;
        let index = self.slot_index(slot)?;
        if let Some(entry) = self.stack.get_mut(index) {
            *entry = Value::Null;
        }
        Ok(())
    }

    /// Reads the `constant, ranged [, min, max]` operands of a variable declaration.
    fn fetch_var_decl(&mut self, value: Value) -> RunResult<Var> {
        let constant = self.fetch_flag()?;
        let range = if self.fetch_flag()? {
            let min = self.fetch_constant()?;
            let max = self.fetch_constant()?;
            match (min.as_number(), max.as_number()) {
                (Some(min), Some(max)) => Some((min, max)),
                _ => return Err(RunError::internal("variable range bounds must be numbers")),
            }
        } else {
            None
        };
        Ok(Var::with_constraints(value, constant, range))
    }

    // ========================================================================
    // Upvalues and Closures
    // ========================================================================

    pub(super) fn get_upvalue(&mut self) -> RunResult<()> {
        let slot = usize::from(self.fetch_u8()?);
        let closure = Arc::clone(&self.frame()?.closure);
        match closure.upvalue(slot) {
            Some(Upvalue::Cell(var)) => self.push(var.get()),
            Some(Upvalue::Recursive) => self.push(Value::Closure(closure)),
            None => Err(ErrorKind::Scope.error("Undefined variable").into()),
        }
    }

    pub(super) fn set_upvalue(&mut self) -> RunResult<()> {
        let slot = usize::from(self.fetch_u8()?);
        let value = self.peek(0)?.clone();
        match self.frame()?.closure.upvalue(slot) {
            Some(Upvalue::Cell(var)) => Ok(var.set(value)?),
            Some(Upvalue::Recursive) => Err(ErrorKind::Scope.error("Cannot reassign constant").into()),
            None => Err(ErrorKind::Scope.error("Undefined variable").into()),
        }
    }

    /// `Closure`: instantiates a prototype with its defaults and captured variables.
    pub(super) fn make_closure(&mut self) -> RunResult<()> {
        let function = match self.fetch_constant()? {
            Value::Func(function) => function,
            other => {
                return Err(RunError::internal(format!(
                    "Closure expects a function constant, found {}",
                    other.type_name()
                )));
            }
        };
        let default_count = usize::from(self.fetch_u8()?);
        if default_count != function.default_count {
            return Err(RunError::internal(format!(
                "Closure supplies {default_count} defaults but {} declares {}",
                function.name, function.default_count
            )));
        }
        let defaults = self.pop_n(default_count)?;

        let enclosing = Arc::clone(&self.frame()?.closure);
        let name = if function.name.is_empty() {
            Arc::clone(enclosing.name())
        } else {
            Arc::clone(&function.name)
        };

        let mut upvalues = Vec::with_capacity(function.upvalue_count);
        for _ in 0..function.upvalue_count {
            let kind = self.fetch_u8()?;
            let index = self.fetch_u16()?;
            let kind = UpvalueKind::from_repr(kind)
                .ok_or_else(|| RunError::internal(format!("unknown upvalue kind {kind}")))?;
            let upvalue = match kind {
                UpvalueKind::Enclosing => match enclosing.upvalue(usize::from(index)) {
                    // the enclosing closure's self-reference is the enclosing closure
                    Some(Upvalue::Recursive) => {
                        Some(Upvalue::Cell(Var::constant(Value::Closure(Arc::clone(&enclosing)))))
                    }
                    other => other,
                },
                UpvalueKind::Local => Some(Upvalue::Cell(self.capture_local(index)?)),
                UpvalueKind::Global => {
                    let global = self
                        .frame()?
                        .chunk()
                        .constant(usize::from(index))
                        .and_then(Value::as_text)
                        .map(Arc::<str>::from)
                        .ok_or_else(|| RunError::internal("upvalue name is not a text constant"))?;
                    if global == name {
                        Some(Upvalue::Recursive)
                    } else {
                        self.globals.get(&global).cloned().map(Upvalue::Cell)
                    }
                }
            };
            upvalues.push(upvalue);
        }

        let closure = Closure::with_parts(function, name, defaults, upvalues);
        self.push(Value::Closure(Arc::new(closure)))
    }

    /// The cell in local `slot`, wrapping a raw value in place so later writes are shared.
    fn capture_local(&mut self, slot: u16) -> RunResult<Var> {
        let index = self.frame()?.slots + usize::from(slot);
        let entry = self
            .stack
            .get_mut(index)
            .ok_or_else(|| RunError::internal(format!("capture of missing slot {slot}")))?;
        match entry {
            Value::Cell(var) => Ok(var.clone()),
            raw => {
                let var = Var::new(std::mem::take(raw));
                *raw = Value::Cell(var.clone());
                Ok(var)
            }
        }
    }

    // ========================================================================
    // Bound Receiver
    // ========================================================================

    /// Looks `name` up on the frame's bound receiver, seeing private members.
    ///
    /// `None` when there is no receiver or it has no such member.
    fn bound_member(&self, name: &str) -> RunResult<Option<Value>> {
        let value = match &self.frame()?.bound {
            Some(Value::Instance(instance)) => instance.get_field(name, true).found(),
            Some(Value::Class(class)) => class.get_field(name, true).found(),
            Some(Value::Namespace(namespace)) => namespace.get(name),
            _ => None,
        };
        Ok(value)
    }

    /// Assigns `name` on the bound receiver. False when there is no receiver or it has no
    /// such member.
    fn set_bound_member(&self, name: &str, value: Value) -> RunResult<bool> {
        let result = match &self.frame()?.bound {
            Some(Value::Instance(instance)) => instance.set_field(name, value, true),
            Some(Value::Class(class)) => class.set_field(name, value, true),
            _ => return Ok(false),
        };
        match result {
            Ok(()) => Ok(true),
            Err(err) if err.is(ErrorKind::Scope) => Ok(false),
            Err(err) => Err(err.into()),
        }
    }

    pub(super) fn get_attr(&mut self) -> RunResult<()> {
        let name = self.fetch_name()?;
        if !matches!(
            self.frame()?.bound,
            Some(Value::Instance(_) | Value::Class(_) | Value::Namespace(_))
        ) {
            return Err(ErrorKind::Scope.error("Not in class or instance").into());
        }
        match self.bound_member(&name)? {
            Some(value) => self.push(value),
            None => Err(ErrorKind::Scope.error("Undefined attribute").into()),
        }
    }

    /// `SetAttr`: unlike `SetGlobal` the member must exist.
    pub(super) fn set_attr(&mut self) -> RunResult<()> {
        let name = self.fetch_name()?;
        let value = self.pop()?;
        match &self.frame()?.bound {
            Some(Value::Instance(instance)) => instance.set_field(&name, value, true)?,
            Some(Value::Class(class)) => class.set_field(&name, value, true)?,
            _ => return Err(ErrorKind::Scope.error("Not in class or instance").into()),
        }
        self.push(Value::Null)
    }

    /// `Access`: member access from outside, so private members are refused. Methods come
    /// back bound to the object they were read from.
    pub(super) fn access(&mut self) -> RunResult<()> {
        let name = self.fetch_name()?;
        let object = self.pop()?;
        if self.call_overload(&object, "access", vec![Value::Text(Arc::clone(&name))])? {
            return Ok(());
        }
        let member = match &object {
            Value::Instance(instance) => instance.get_field(&name, false),
            Value::Class(class) => class.get_field(&name, false),
            Value::Namespace(namespace) => namespace.get(&name).map_or(FieldLookup::Missing, FieldLookup::Found),
            Value::Enum(enumeration) => enumeration
                .variant(&name)
                .map_or(FieldLookup::Missing, |variant| FieldLookup::Found(Value::EnumVariant(Arc::clone(variant)))),
            other => {
                return Err(ErrorKind::Type
                    .error(format!("Cannot access {name} on {}", other.type_name()))
                    .into());
            }
        };
        let value = match member.into_result(&name)? {
            Value::Closure(closure) => Value::BoundMethod(Arc::new(BoundMethod::new(closure, object))),
            value => value,
        };
        self.push(value)
    }
}
