//! The runtime value representation.
//!
//! Every datum the VM touches is a [`Value`]: a closed sum type with one variant per
//! runtime type. Shared and mutable payloads sit behind `Arc` plus a `parking_lot` lock so
//! values are `Send + Sync` and can be handed to async calls running on other threads.

use std::{
    fmt::{self, Write},
    hash::{Hash, Hasher},
    sync::Arc,
};

use indexmap::IndexMap;
use parking_lot::RwLock;

use crate::{
    exception::RuntimeError,
    function::{BoundMethod, Closure, Function},
    types::{Class, EnumType, EnumVariant, Instance, Namespace, NativeFunction, Pattern},
    var::Var,
};

/// A shared, mutable list.
pub type List = Arc<RwLock<Vec<Value>>>;

/// A shared, mutable, insertion-ordered map.
pub type Map = Arc<RwLock<IndexMap<Value, Value, ahash::RandomState>>>;

/// A runtime value.
///
/// Equality is structural for primitives, lists, maps, bytes and results, and identity
/// for everything that carries behaviour (closures, classes, instances, namespaces).
#[derive(Debug, Clone, Default)]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    Number(f64),
    Text(Arc<str>),
    List(List),
    Map(Map),
    Bytes(Arc<[u8]>),
    /// A compiled prototype as it sits in a constant pool, before a `Closure` instruction
    /// turns it into a callable.
    Func(Arc<Function>),
    Closure(Arc<Closure>),
    Native(Arc<NativeFunction>),
    Class(Arc<Class>),
    Instance(Arc<Instance>),
    BoundMethod(Arc<BoundMethod>),
    Namespace(Arc<Namespace>),
    Enum(Arc<EnumType>),
    EnumVariant(Arc<EnumVariant>),
    Pattern(Arc<Pattern>),
    /// Placeholder marking a pattern field as a capture rather than an equality check.
    PatternBinding(Arc<str>),
    /// A list to be expanded in place into a call's positional arguments.
    Spread(Arc<[Value]>),
    Reference(Reference),
    /// A variable cell living in a local stack slot.
    Cell(Var),
    Result(Arc<ResultValue>),
}

impl Value {
    pub fn text(s: impl Into<Arc<str>>) -> Self {
        Self::Text(s.into())
    }

    pub fn list(items: Vec<Self>) -> Self {
        Self::List(Arc::new(RwLock::new(items)))
    }

    pub fn map(entries: impl IntoIterator<Item = (Self, Self)>) -> Self {
        Self::Map(Arc::new(RwLock::new(entries.into_iter().collect())))
    }

    pub fn bytes(bytes: impl Into<Arc<[u8]>>) -> Self {
        Self::Bytes(bytes.into())
    }

    /// Name of the runtime type, as used in error messages and native type checks.
    #[must_use]
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool(_) => "bool",
            Self::Number(_) => "num",
            Self::Text(_) => "String",
            Self::List(_) => "list",
            Self::Map(_) => "dict",
            Self::Bytes(_) => "bytearray",
            Self::Func(_) | Self::Closure(_) | Self::Native(_) | Self::BoundMethod(_) => "function",
            Self::Class(_) => "class",
            Self::Instance(_) => "instance",
            Self::Namespace(_) => "namespace",
            Self::Enum(_) => "enum",
            Self::EnumVariant(_) => "enum variant",
            Self::Pattern(_) => "pattern",
            Self::PatternBinding(_) => "pattern binding",
            Self::Spread(_) => "spread",
            Self::Reference(_) => "ref",
            Self::Cell(_) => "var",
            Self::Result(_) => "result",
        }
    }

    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Truthiness: `null`, `false`, `0` and empty texts, lists, maps and byte buffers are
    /// false, everything else is true.
    #[must_use]
    pub fn is_truthy(&self) -> bool {
        match self {
            Self::Null => false,
            Self::Bool(b) => *b,
            Self::Number(n) => *n != 0.0,
            Self::Text(s) => !s.is_empty(),
            Self::List(list) => !list.read().is_empty(),
            Self::Map(map) => !map.read().is_empty(),
            Self::Bytes(bytes) => !bytes.is_empty(),
            Self::Cell(var) => var.get().is_truthy(),
            _ => true,
        }
    }

    #[must_use]
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Self::Number(n) => Some(*n),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_list(&self) -> Option<&List> {
        match self {
            Self::List(list) => Some(list),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_instance(&self) -> Option<&Arc<Instance>> {
        match self {
            Self::Instance(instance) => Some(instance),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_closure(&self) -> Option<&Arc<Closure>> {
        match self {
            Self::Closure(closure) => Some(closure),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_result(&self) -> Option<&ResultValue> {
        match self {
            Self::Result(result) => Some(result),
            _ => None,
        }
    }

    /// A copy whose list or map payload is no longer shared with the original.
    ///
    /// Elements themselves are not copied.
    #[must_use]
    pub fn shallow_copy(&self) -> Self {
        match self {
            Self::List(list) => Self::list(list.read().clone()),
            Self::Map(map) => Self::Map(Arc::new(RwLock::new(map.read().clone()))),
            other => other.clone(),
        }
    }

    /// Reads through a cell, returning the value it holds. Other values are returned as is.
    #[must_use]
    pub fn deref_cell(&self) -> Self {
        match self {
            Self::Cell(var) => var.get(),
            other => other.clone(),
        }
    }

    /// Identity of reference-like payloads, used for memo keys and hashing.
    pub(crate) fn identity(&self) -> Option<usize> {
        let addr = match self {
            Self::List(list) => Arc::as_ptr(list) as *const () as usize,
            Self::Map(map) => Arc::as_ptr(map) as *const () as usize,
            Self::Func(func) => Arc::as_ptr(func) as *const () as usize,
            Self::Closure(closure) => Arc::as_ptr(closure) as *const () as usize,
            Self::Native(native) => Arc::as_ptr(native) as *const () as usize,
            Self::Class(class) => Arc::as_ptr(class) as *const () as usize,
            Self::Instance(instance) => Arc::as_ptr(instance) as *const () as usize,
            Self::BoundMethod(bound) => Arc::as_ptr(&bound.closure) as *const () as usize,
            Self::Namespace(ns) => Arc::as_ptr(ns) as *const () as usize,
            Self::Enum(e) => Arc::as_ptr(e) as *const () as usize,
            Self::EnumVariant(v) => Arc::as_ptr(v) as *const () as usize,
            Self::Pattern(p) => Arc::as_ptr(p) as *const () as usize,
            Self::Reference(r) => Arc::as_ptr(&r.0) as *const () as usize,
            Self::Cell(var) => var.addr(),
            _ => return None,
        };
        Some(addr)
    }

    /// Writes the value as it appears nested inside a list or map: texts are quoted.
    fn repr(&self, f: &mut impl Write) -> fmt::Result {
        match self {
            Self::Text(s) => write!(f, "\"{s}\""),
            other => write!(f, "{other}"),
        }
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Self::Number(n)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::Text(s.into())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Self::Text(s.into())
    }
}

impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Self {
        Self::list(items)
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Null, Self::Null) => true,
            (Self::Bool(a), Self::Bool(b)) => a == b,
            (Self::Number(a), Self::Number(b)) => a == b,
            (Self::Text(a), Self::Text(b)) => a == b,
            (Self::List(a), Self::List(b)) => Arc::ptr_eq(a, b) || *a.read() == *b.read(),
            (Self::Map(a), Self::Map(b)) => Arc::ptr_eq(a, b) || *a.read() == *b.read(),
            (Self::Bytes(a), Self::Bytes(b)) => a == b,
            (Self::BoundMethod(a), Self::BoundMethod(b)) => {
                Arc::ptr_eq(&a.closure, &b.closure) && a.receiver == b.receiver
            }
            (Self::PatternBinding(a), Self::PatternBinding(b)) => a == b,
            (Self::Spread(a), Self::Spread(b)) => a == b,
            (Self::Result(a), Self::Result(b)) => a == b,
            (a, b) => match (a.identity(), b.identity()) {
                (Some(x), Some(y)) => x == y && std::mem::discriminant(a) == std::mem::discriminant(b),
                _ => false,
            },
        }
    }
}

// NaN keys never compare equal, so they can be inserted but never found again.
impl Eq for Value {}

impl Hash for Value {
    fn hash<H: Hasher>(&self, state: &mut H) {
        std::mem::discriminant(self).hash(state);
        match self {
            Self::Null => {}
            Self::Bool(b) => b.hash(state),
            // 0.0 and -0.0 compare equal so they must hash equal
            Self::Number(n) => (if *n == 0.0 { 0.0f64 } else { *n }).to_bits().hash(state),
            Self::Text(s) | Self::PatternBinding(s) => s.hash(state),
            Self::List(list) => list.read().hash(state),
            Self::Map(map) => map.read().len().hash(state),
            Self::Bytes(bytes) => bytes.hash(state),
            Self::Spread(items) => items.hash(state),
            Self::Result(result) => match &**result {
                ResultValue::Ok(value) => value.hash(state),
                ResultValue::Err(err) => err.hash(state),
            },
            other => other.identity().hash(state),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => f.write_str("null"),
            Self::Bool(b) => write!(f, "{b}"),
            Self::Number(n) => fmt_number(*n, f),
            Self::Text(s) => f.write_str(s),
            Self::List(list) => {
                f.write_char('[')?;
                for (i, item) in list.read().iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    item.repr(f)?;
                }
                f.write_char(']')
            }
            Self::Map(map) => {
                f.write_char('{')?;
                for (i, (key, value)) in map.read().iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    key.repr(f)?;
                    f.write_str(": ")?;
                    value.repr(f)?;
                }
                f.write_char('}')
            }
            Self::Bytes(bytes) => write!(f, "{{ {} bytes }}", bytes.len()),
            Self::Func(func) => write!(f, "<function {}>", func.name),
            Self::Closure(closure) => write!(f, "<function {}>", closure.name()),
            Self::Native(native) => write!(f, "<native {}>", native.name()),
            Self::BoundMethod(bound) => write!(f, "<bound method {}>", bound.closure.name()),
            Self::Class(class) => write!(f, "<class {}>", class.name()),
            Self::Instance(instance) => write!(f, "{instance}"),
            Self::Namespace(ns) => write!(f, "<namespace {}>", ns.name()),
            Self::Enum(e) => write!(f, "<enum {}>", e.name()),
            Self::EnumVariant(v) => write!(f, "<variant {}::{}>", v.parent(), v.name()),
            Self::Pattern(p) => write!(f, "<pattern {}>", p.target()),
            Self::PatternBinding(name) => write!(f, "<binding {name}>"),
            Self::Spread(items) => write!(f, "...{}", items.len()),
            Self::Reference(r) => write!(f, "<ref {}>", r.get()),
            Self::Cell(var) => write!(f, "{}", var.get()),
            Self::Result(result) => write!(f, "{result}"),
        }
    }
}

/// Integral numbers print without a fractional part.
fn fmt_number(n: f64, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    if n.fract() == 0.0 && n.abs() < 1e15 {
        #[expect(clippy::cast_possible_truncation)]
        let int = n as i64;
        write!(f, "{int}")
    } else {
        write!(f, "{n}")
    }
}

/// A mutable reference cell created by the `Ref` instruction.
#[derive(Debug, Clone)]
pub struct Reference(Arc<RwLock<Value>>);

impl Reference {
    pub fn new(value: Value) -> Self {
        Self(Arc::new(RwLock::new(value)))
    }

    #[must_use]
    pub fn get(&self) -> Value {
        self.0.read().clone()
    }

    pub fn set(&self, value: Value) {
        *self.0.write() = value;
    }
}

/// The value a catcher frame returns: either the body's own result or the error it raised.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResultValue {
    Ok(Value),
    Err(RuntimeError),
}

impl fmt::Display for ResultValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ok(value) => write!(f, "({value})"),
            Self::Err(err) => write!(f, "({}: {})", err.kind, err.reason),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numbers_display_without_trailing_zero() {
        assert_eq!(Value::Number(6765.0).to_string(), "6765");
        assert_eq!(Value::Number(2.5).to_string(), "2.5");
    }

    #[test]
    fn lists_compare_structurally() {
        let a = Value::list(vec![Value::Number(1.0), Value::text("a")]);
        let b = Value::list(vec![Value::Number(1.0), Value::text("a")]);
        assert_eq!(a, b);
        assert_eq!(a.to_string(), "[1, \"a\"]");
    }

    #[test]
    fn shallow_copy_detaches_list() {
        let a = Value::list(vec![Value::Number(1.0)]);
        let b = a.shallow_copy();
        if let Value::List(list) = &b {
            list.write().push(Value::Null);
        }
        assert_ne!(a, b);
    }

    #[test]
    fn truthiness() {
        assert!(!Value::Null.is_truthy());
        assert!(!Value::Number(0.0).is_truthy());
        assert!(!Value::text("").is_truthy());
        assert!(Value::text("x").is_truthy());
        assert!(!Value::list(vec![]).is_truthy());
    }
}
