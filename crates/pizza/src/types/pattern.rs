use std::sync::Arc;

use super::class::Class;
use crate::{
    exception::{ErrorKind, RuntimeError},
    value::Value,
};

/// A structural matcher over instances.
///
/// `target` is the class (or enum variant) the subject must be an instance of. `cases`
/// are fields that must equal the given values; `bindings` are `(field, binding name)`
/// pairs whose values are extracted on a successful match, in order.
#[derive(Debug)]
pub struct Pattern {
    target: Value,
    cases: Vec<(Arc<str>, Value)>,
    bindings: Vec<(Arc<str>, Arc<str>)>,
}

impl Pattern {
    pub fn new(target: Value, cases: Vec<(Arc<str>, Value)>, bindings: Vec<(Arc<str>, Arc<str>)>) -> Self {
        Self {
            target,
            cases,
            bindings,
        }
    }

    #[must_use]
    pub fn target(&self) -> &Value {
        &self.target
    }

    #[must_use]
    pub fn bindings(&self) -> &[(Arc<str>, Arc<str>)] {
        &self.bindings
    }

    fn target_class(&self) -> Result<&Arc<Class>, RuntimeError> {
        match &self.target {
            Value::Class(class) => Ok(class),
            Value::EnumVariant(variant) => Ok(variant.class()),
            other => Err(ErrorKind::Type.error(format!(
                "Cannot match against {}",
                other.type_name()
            ))),
        }
    }

    /// Matches `subject`, returning the bound values in binding order on success.
    ///
    /// A wrong class or an unequal (or absent) case field is a failed match, `Ok(None)`.
    /// A binding naming a field the instance does not have is a scope error.
    pub fn matches(&self, subject: &Value) -> Result<Option<Vec<Value>>, RuntimeError> {
        let Value::Instance(instance) = subject else {
            return Ok(None);
        };
        if !instance.is_instance_of(self.target_class()?) {
            return Ok(None);
        }
        for (field, expected) in &self.cases {
            match instance.field(field) {
                Some(actual) if actual == *expected => {}
                _ => return Ok(None),
            }
        }
        self.bindings
            .iter()
            .map(|(field, _)| {
                instance
                    .field(field)
                    .ok_or_else(|| ErrorKind::Scope.error(format!("Undefined field: {field}")))
            })
            .collect::<Result<Vec<_>, _>>()
            .map(Some)
    }
}
