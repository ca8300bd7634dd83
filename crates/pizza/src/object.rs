//! Plain-data mirror of [`Value`] with serde support.
//!
//! `PizzaObject` owns its data and holds no locks, which makes it the form used wherever a
//! value has to leave the VM: the `ToBytes`/`FromBytes` instructions encode it with
//! postcard, memo keys are its encoded argument vectors, and hosts can use it to move values
//! across threads or processes.

use std::{fmt, sync::Arc};

use ahash::AHashSet;
use serde::{Deserialize, Serialize};

use crate::{
    exception::RuntimeError,
    value::{ResultValue, Value},
};

/// A runtime value reduced to plain data.
///
/// # Output-only variants
/// - `Ref` stands for a runtime object that has no data form (closure, class, instance,
///   namespace...). It records the type name and the object's identity.
/// - `Bound` is a bound method: the method's identity plus its receiver.
/// - `Cycle` marks a list or map that contains itself.
///
/// Converting any of these back into a [`Value`] fails with [`InvalidObjectError`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum PizzaObject {
    Null,
    Bool(bool),
    Number(f64),
    Text(String),
    Bytes(Vec<u8>),
    List(Vec<PizzaObject>),
    Map(Vec<(PizzaObject, PizzaObject)>),
    Ok(Box<PizzaObject>),
    Err { kind: String, reason: String },
    Ref { type_name: String, id: u64 },
    Bound { method: u64, receiver: Box<PizzaObject> },
    Cycle,
}

impl PizzaObject {
    /// Converts a runtime value, reading through cells and references.
    #[must_use]
    pub fn from_value(value: &Value) -> Self {
        Self::convert(value, &mut AHashSet::new())
    }

    fn convert(value: &Value, seen: &mut AHashSet<usize>) -> Self {
        match value {
            Value::Null => Self::Null,
            Value::Bool(b) => Self::Bool(*b),
            Value::Number(n) => Self::Number(*n),
            Value::Text(s) => Self::Text(s.to_string()),
            Value::Bytes(bytes) => Self::Bytes(bytes.to_vec()),
            Value::List(list) => {
                let id = Arc::as_ptr(list) as usize;
                if !seen.insert(id) {
                    return Self::Cycle;
                }
                let items = list.read().iter().map(|item| Self::convert(item, seen)).collect();
                seen.remove(&id);
                Self::List(items)
            }
            Value::Map(map) => {
                let id = Arc::as_ptr(map) as usize;
                if !seen.insert(id) {
                    return Self::Cycle;
                }
                let entries = map
                    .read()
                    .iter()
                    .map(|(k, v)| (Self::convert(k, seen), Self::convert(v, seen)))
                    .collect();
                seen.remove(&id);
                Self::Map(entries)
            }
            Value::Spread(items) => Self::List(items.iter().map(|item| Self::convert(item, seen)).collect()),
            Value::Cell(var) => Self::convert(&var.get(), seen),
            Value::Reference(reference) => Self::convert(&reference.get(), seen),
            Value::Result(result) => match &**result {
                ResultValue::Ok(value) => Self::Ok(Box::new(Self::convert(value, seen))),
                ResultValue::Err(err) => Self::Err {
                    kind: err.kind.clone(),
                    reason: err.reason.clone(),
                },
            },
            Value::BoundMethod(bound) => Self::Bound {
                method: Arc::as_ptr(&bound.closure) as usize as u64,
                receiver: Box::new(Self::convert(&bound.receiver, seen)),
            },
            other => Self::Ref {
                type_name: other.type_name().to_owned(),
                id: other.identity().unwrap_or_default() as u64,
            },
        }
    }

    /// Rebuilds a runtime value.
    pub fn to_value(self) -> Result<Value, InvalidObjectError> {
        match self {
            Self::Null => Ok(Value::Null),
            Self::Bool(b) => Ok(Value::Bool(b)),
            Self::Number(n) => Ok(Value::Number(n)),
            Self::Text(s) => Ok(Value::from(s)),
            Self::Bytes(bytes) => Ok(Value::bytes(bytes)),
            Self::List(items) => {
                let values = items.into_iter().map(Self::to_value).collect::<Result<Vec<_>, _>>()?;
                Ok(Value::list(values))
            }
            Self::Map(entries) => {
                let pairs = entries
                    .into_iter()
                    .map(|(k, v)| Ok((k.to_value()?, v.to_value()?)))
                    .collect::<Result<Vec<_>, InvalidObjectError>>()?;
                Ok(Value::map(pairs))
            }
            Self::Ok(inner) => Ok(Value::Result(Arc::new(ResultValue::Ok(inner.to_value()?)))),
            Self::Err { kind, reason } => Ok(Value::Result(Arc::new(ResultValue::Err(RuntimeError::new(
                kind, reason,
            ))))),
            Self::Ref { type_name, .. } => Err(InvalidObjectError(type_name)),
            Self::Bound { .. } => Err(InvalidObjectError("bound method".to_owned())),
            Self::Cycle => Err(InvalidObjectError("cycle".to_owned())),
        }
    }

    /// Encodes with postcard.
    pub fn to_bytes(&self) -> Result<Vec<u8>, postcard::Error> {
        postcard::to_allocvec(self)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, postcard::Error> {
        postcard::from_bytes(bytes)
    }
}

impl From<&Value> for PizzaObject {
    fn from(value: &Value) -> Self {
        Self::from_value(value)
    }
}

/// A `PizzaObject` variant that has no runtime value form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvalidObjectError(pub String);

impl fmt::Display for InvalidObjectError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "cannot rebuild a value from an output-only object: {}", self.0)
    }
}

impl std::error::Error for InvalidObjectError {}
