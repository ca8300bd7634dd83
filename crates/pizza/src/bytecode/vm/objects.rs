//! Classes, enums, patterns, imports and header directives.

use std::sync::Arc;

use super::{MemoState, VM};
use crate::{
    bytecode::op::HeaderCommand,
    exception::{ErrorKind, RunError, RunResult, TraceEntry},
    function::Closure,
    types::{Class, ClassAttr, Method, Pattern},
    value::Value,
    var::Var,
};

impl VM {
    pub(super) fn make_class(&mut self) -> RunResult<()> {
        let name = self.fetch_name()?;
        let has_super = self.fetch_flag()?;
        let attr_count = usize::from(self.fetch_u8()?);
        let mut attr_decls = Vec::with_capacity(attr_count);
        for _ in 0..attr_count {
            let attr = self.fetch_name()?;
            let is_private = self.fetch_flag()?;
            let is_static = self.fetch_flag()?;
            attr_decls.push((attr, is_private, is_static));
        }
        let generic_count = usize::from(self.fetch_u8()?);
        let mut generics = Vec::with_capacity(generic_count);
        for _ in 0..generic_count {
            generics.push(self.fetch_name()?);
        }

        let superclass = if has_super {
            match self.pop()? {
                Value::Class(class) => Some(class),
                other => {
                    return Err(ErrorKind::Type
                        .error(format!("Cannot inherit from {}", other.type_name()))
                        .into());
                }
            }
        } else {
            None
        };
        let values = self.pop_n(attr_count)?;
        let attributes = attr_decls
            .into_iter()
            .zip(values)
            .map(|((attr, is_private, is_static), value)| {
                let decl = ClassAttr {
                    value,
                    is_private,
                    is_static,
                };
                (attr, decl)
            });

        let class = Class::new(name, superclass, attributes, generics);
        log::debug!("defined class {}", class.name());
        self.push(Value::Class(Arc::new(class)))
    }

    /// `Method`: attaches the closure on top of the stack to the class below it.
    pub(super) fn add_method(&mut self) -> RunResult<()> {
        let name = self.fetch_name()?;
        let is_static = self.fetch_flag()?;
        let is_private = self.fetch_flag()?;
        let is_bin = self.fetch_flag()?;

        let Value::Closure(closure) = self.pop()? else {
            return Err(RunError::internal("Method expects a closure"));
        };
        let Value::Class(class) = self.peek(0)? else {
            return Err(RunError::internal("Method expects a class below the closure"));
        };
        class.add_method(
            name,
            Method {
                closure,
                is_static,
                is_private,
                is_bin,
            },
        );
        Ok(())
    }

    /// `Enum`: binds the enum (and, for public enums, each variant) as a constant global.
    pub(super) fn define_enum(&mut self) -> RunResult<()> {
        let Value::Enum(enumeration) = self.fetch_constant()? else {
            return Err(RunError::internal("Enum expects an enum constant"));
        };
        let public = self.fetch_flag()?;

        let value = Value::Enum(Arc::clone(&enumeration));
        self.globals
            .insert(Arc::clone(enumeration.name()), Var::constant(value.clone()));
        if public {
            for (name, variant) in enumeration.variants() {
                let variant = Value::EnumVariant(Arc::clone(variant));
                self.globals.insert(Arc::clone(name), Var::constant(variant));
            }
        }
        self.push(value)
    }

    /// `Pattern`: fields whose value is a binding placeholder capture, the rest must equal.
    pub(super) fn make_pattern(&mut self) -> RunResult<()> {
        let count = usize::from(self.fetch_u8()?);
        let mut fields = Vec::with_capacity(count);
        for _ in 0..count {
            fields.push(self.fetch_name()?);
        }
        let values = self.pop_n(count)?;
        let target = self.pop()?;

        let mut cases = Vec::new();
        let mut bindings = Vec::new();
        for (field, value) in fields.into_iter().zip(values) {
            match value {
                Value::PatternBinding(binding) => bindings.push((field, binding)),
                value => cases.push((field, value)),
            }
        }
        self.push(Value::Pattern(Arc::new(Pattern::new(target, cases, bindings))))
    }

    /// `Import`: runs a module prototype on a fresh VM, or looks up a native library, and
    /// binds the resulting namespace.
    pub(super) fn import(&mut self) -> RunResult<()> {
        let module = self.fetch_name()?;
        let variable = self.fetch_name()?;
        let namespace = match self.pop()? {
            Value::Func(function) => {
                log::debug!("importing module {module}");
                let closure = Arc::new(Closure::new(Arc::clone(&function)));
                let mut runner = Self::for_call(
                    Arc::clone(&self.runtime),
                    self.config.clone(),
                    closure,
                    None,
                    Vec::new(),
                );
                if self.root_trace.is_some() {
                    runner.root_trace = Some(TraceEntry::new(
                        Arc::clone(&module),
                        Arc::clone(&module),
                        Arc::clone(&function.chunk),
                        0,
                    ));
                }
                runner.execute(0)?;
                self.tasks.append(&mut runner.tasks);
                Value::Namespace(Arc::new(runner.as_namespace(Arc::clone(&module))))
            }
            Value::Null => match self.runtime.library(&module) {
                Some(library) => Value::Namespace(Arc::clone(library)),
                None => {
                    return Err(ErrorKind::Import
                        .error(format!("Library '{module}' not found"))
                        .into());
                }
            },
            other => {
                return Err(RunError::internal(format!(
                    "Import expects a function or null, found {}",
                    other.type_name()
                )));
            }
        };
        self.globals.insert(variable, Var::constant(namespace.clone()));
        self.push(namespace)
    }

    /// `Destruct`: shares the listed namespace variables as globals.
    pub(super) fn destruct(&mut self) -> RunResult<()> {
        let count = usize::from(self.fetch_u8()?);
        let mut names = Vec::with_capacity(count);
        for _ in 0..count {
            names.push(self.fetch_name()?);
        }
        let Value::Namespace(namespace) = self.pop()? else {
            return Err(ErrorKind::Type.error("Can only destructure namespaces").into());
        };
        self.push(Value::Null)?;
        for name in names {
            let Some(var) = namespace.var(&name) else {
                return Err(ErrorKind::Scope.error(format!("Undefined field: {name}")).into());
            };
            self.globals.insert(name, var.clone());
        }
        Ok(())
    }

    pub(super) fn header(&mut self) -> RunResult<()> {
        let byte = self.fetch_u8()?;
        let command =
            HeaderCommand::from_repr(byte).ok_or_else(|| RunError::internal(format!("unknown header command {byte}")))?;
        let argc = usize::from(self.fetch_u8()?);
        let mut args = Vec::with_capacity(argc);
        for _ in 0..argc {
            args.push(self.fetch_name()?);
        }
        if let Some(expected) = command.expected_args()
            && expected != argc
        {
            return Err(ErrorKind::ArgumentCount
                .error(format!("Expected {expected} arguments, got {argc}"))
                .into());
        }

        match command {
            HeaderCommand::Memoize => {
                let frame = self.frame_mut()?;
                if matches!(frame.memo, MemoState::Off) {
                    frame.memo = MemoState::Armed;
                }
            }
            HeaderCommand::SetMainFunction => self.main_function = args.pop(),
            HeaderCommand::SetMainClass => self.main_class = args.pop(),
            HeaderCommand::Export => self.exports.get_or_insert_with(Vec::new).extend(args),
        }
        self.push(Value::Null)
    }
}
