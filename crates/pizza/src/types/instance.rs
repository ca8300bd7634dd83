use std::{fmt, sync::Arc};

use indexmap::IndexMap;
use parking_lot::RwLock;

use super::class::{Class, ClassAttr, FieldLookup};
use crate::{
    exception::{ErrorKind, RuntimeError},
    function::Closure,
    value::Value,
};

/// An instance of a class: the class it was created from and its own field store.
///
/// Fields start from the class's instance attribute defaults. Privacy flags are carried per
/// field and checked when the field is read or written from outside a method.
pub struct Instance {
    class: Arc<Class>,
    fields: RwLock<IndexMap<Arc<str>, ClassAttr>>,
}

impl Instance {
    pub fn new(class: Arc<Class>) -> Self {
        let fields = class.instance_fields();
        Self {
            class,
            fields: RwLock::new(fields),
        }
    }

    #[must_use]
    pub fn class(&self) -> &Arc<Class> {
        &self.class
    }

    /// Reads a field ignoring privacy, as pattern matching does.
    #[must_use]
    pub fn field(&self, name: &str) -> Option<Value> {
        self.fields.read().get(name).map(|attr| attr.value.clone())
    }

    /// Looks a member up: own fields first, then methods, then the class's static members.
    ///
    /// Methods are returned as plain closures; binding them to the receiver is the caller's
    /// decision.
    #[must_use]
    pub fn get_field(&self, name: &str, internal: bool) -> FieldLookup {
        if let Some(attr) = self.fields.read().get(name) {
            if attr.is_private && !internal {
                return FieldLookup::Private;
            }
            return FieldLookup::Found(attr.value.clone());
        }
        if let Some(method) = self.class.find_method(name) {
            if method.is_private && !internal {
                return FieldLookup::Private;
            }
            return FieldLookup::Found(Value::Closure(method.closure));
        }
        self.class.get_field(name, internal)
    }

    pub fn set_field(&self, name: &str, value: Value, internal: bool) -> Result<(), RuntimeError> {
        {
            let mut fields = self.fields.write();
            if let Some(attr) = fields.get_mut(name) {
                if attr.is_private && !internal {
                    return Err(ErrorKind::Publicity.error("Attribute is private"));
                }
                attr.value = value;
                return Ok(());
            }
        }
        self.class.set_field(name, value, internal).map_err(|err| {
            if err.is(ErrorKind::Scope) {
                ErrorKind::Scope.error(format!("No attribute named {name}"))
            } else {
                err
            }
        })
    }

    #[must_use]
    pub fn bin_method(&self, name: &str) -> Option<Arc<Closure>> {
        self.class.bin_method(name)
    }

    #[must_use]
    pub fn is_instance_of(&self, class: &Arc<Class>) -> bool {
        self.class.is_subclass_of(class)
    }
}

impl fmt::Display for Instance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}(", self.class.name())?;
        for (i, (name, attr)) in self.fields.read().iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{name}: {}", attr.value)?;
        }
        f.write_str(")")
    }
}

impl fmt::Debug for Instance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Instance")
            .field("class", self.class.name())
            .finish_non_exhaustive()
    }
}
