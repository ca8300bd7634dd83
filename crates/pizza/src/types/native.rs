use std::{fmt, sync::Arc};

use strum::Display;

use crate::{
    exception::{ErrorKind, RuntimeError},
    value::Value,
};

/// Signature of a host function callable from scripts.
pub type NativeFn = dyn Fn(&[Value]) -> Result<Value, RuntimeError> + Send + Sync;

/// Number of arguments a native function accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arity {
    Fixed(usize),
    /// Any number of arguments.
    Variadic,
}

/// Static type of a native function parameter, checked before the call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum TypeTag {
    #[strum(serialize = "any")]
    Any,
    #[strum(serialize = "num")]
    Number,
    #[strum(serialize = "String")]
    Text,
    #[strum(serialize = "bool")]
    Bool,
    #[strum(serialize = "list")]
    List,
    #[strum(serialize = "dict")]
    Map,
    #[strum(serialize = "bytearray")]
    Bytes,
    #[strum(serialize = "function")]
    Function,
    #[strum(serialize = "instance")]
    Instance,
}

impl TypeTag {
    #[must_use]
    pub fn matches(self, value: &Value) -> bool {
        match self {
            Self::Any => true,
            Self::Number => matches!(value, Value::Number(_)),
            Self::Text => matches!(value, Value::Text(_)),
            Self::Bool => matches!(value, Value::Bool(_)),
            Self::List => matches!(value, Value::List(_)),
            Self::Map => matches!(value, Value::Map(_)),
            Self::Bytes => matches!(value, Value::Bytes(_)),
            Self::Function => matches!(
                value,
                Value::Closure(_) | Value::Native(_) | Value::BoundMethod(_)
            ),
            Self::Instance => matches!(value, Value::Instance(_)),
        }
    }
}

/// A function implemented by the host.
///
/// The callable receives the positional arguments and returns either a value or a
/// `(kind, reason)` error, which becomes an ordinary runtime error in the calling script.
pub struct NativeFunction {
    name: Arc<str>,
    arity: Arity,
    types: Option<Vec<TypeTag>>,
    func: Box<NativeFn>,
}

impl NativeFunction {
    pub fn new(
        name: impl Into<Arc<str>>,
        arity: Arity,
        func: impl Fn(&[Value]) -> Result<Value, RuntimeError> + Send + Sync + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            arity,
            types: None,
            func: Box::new(func),
        }
    }

    /// Declares a type tag per positional argument.
    #[must_use]
    pub fn with_types(mut self, types: Vec<TypeTag>) -> Self {
        self.types = Some(types);
        self
    }

    #[must_use]
    pub fn name(&self) -> &Arc<str> {
        &self.name
    }

    #[must_use]
    pub fn arity(&self) -> Arity {
        self.arity
    }

    /// Checks the argument count and types, then invokes the host function.
    pub fn call(&self, args: &[Value]) -> Result<Value, RuntimeError> {
        if let Arity::Fixed(expected) = self.arity
            && expected != args.len()
        {
            return Err(ErrorKind::ArgumentCount.error(format!(
                "Expected {expected} but got {}",
                args.len()
            )));
        }
        if let Some(types) = &self.types {
            for (tag, arg) in types.iter().zip(args) {
                if !tag.matches(arg) {
                    return Err(ErrorKind::Type.error(format!(
                        "Expected {tag} but got {}",
                        arg.type_name()
                    )));
                }
            }
        }
        (self.func)(args)
    }
}

impl fmt::Debug for NativeFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NativeFunction")
            .field("name", &self.name)
            .field("arity", &self.arity)
            .field("types", &self.types)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_arity_is_checked() {
        let native = NativeFunction::new("one", Arity::Fixed(1), |args| Ok(args[0].clone()));
        let err = native.call(&[]).unwrap_err();
        assert!(err.is(ErrorKind::ArgumentCount));
        assert_eq!(err.reason, "Expected 1 but got 0");
    }

    #[test]
    fn type_tags_are_checked() {
        let native = NativeFunction::new("len", Arity::Fixed(1), |_| Ok(Value::Null)).with_types(vec![TypeTag::List]);
        let err = native.call(&[Value::Number(1.0)]).unwrap_err();
        assert!(err.is(ErrorKind::Type));
        assert_eq!(err.reason, "Expected list but got num");
    }
}
