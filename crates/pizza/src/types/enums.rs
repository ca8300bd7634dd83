use std::sync::Arc;

use indexmap::IndexMap;

use super::{
    class::{Class, ClassAttr},
    instance::Instance,
};
use crate::{
    exception::{ErrorKind, RuntimeError},
    value::Value,
};

/// An algebraic enum: a name and its variants in declaration order.
#[derive(Debug)]
pub struct EnumType {
    name: Arc<str>,
    variants: IndexMap<Arc<str>, Arc<EnumVariant>>,
}

impl EnumType {
    /// Creates an enum from `(variant name, field names)` pairs.
    pub fn new(name: impl Into<Arc<str>>, variants: impl IntoIterator<Item = (Arc<str>, Vec<Arc<str>>)>) -> Self {
        let name = name.into();
        let variants = variants
            .into_iter()
            .map(|(variant, fields)| {
                let ctor = EnumVariant::new(Arc::clone(&variant), Arc::clone(&name), fields);
                (variant, Arc::new(ctor))
            })
            .collect();
        Self { name, variants }
    }

    #[must_use]
    pub fn name(&self) -> &Arc<str> {
        &self.name
    }

    #[must_use]
    pub fn variant(&self, name: &str) -> Option<&Arc<EnumVariant>> {
        self.variants.get(name)
    }

    pub fn variants(&self) -> impl Iterator<Item = (&Arc<str>, &Arc<EnumVariant>)> {
        self.variants.iter()
    }
}

/// One variant of an enum, callable as a constructor.
///
/// Constructed values are instances of a class named after the variant, with one field
/// per declared property, so they work with member access and pattern matching.
#[derive(Debug)]
pub struct EnumVariant {
    name: Arc<str>,
    parent: Arc<str>,
    fields: Vec<Arc<str>>,
    class: Arc<Class>,
}

impl EnumVariant {
    fn new(name: Arc<str>, parent: Arc<str>, fields: Vec<Arc<str>>) -> Self {
        let attributes = fields
            .iter()
            .map(|field| (Arc::clone(field), ClassAttr::new(Value::Null)));
        let class = Arc::new(Class::new(Arc::clone(&name), None, attributes, Vec::new()));
        Self {
            name,
            parent,
            fields,
            class,
        }
    }

    #[must_use]
    pub fn name(&self) -> &Arc<str> {
        &self.name
    }

    /// Name of the enum this variant belongs to.
    #[must_use]
    pub fn parent(&self) -> &Arc<str> {
        &self.parent
    }

    #[must_use]
    pub fn arity(&self) -> usize {
        self.fields.len()
    }

    #[must_use]
    pub fn class(&self) -> &Arc<Class> {
        &self.class
    }

    /// Builds a value of this variant from positional arguments.
    pub fn construct(&self, args: Vec<Value>) -> Result<Value, RuntimeError> {
        if args.len() != self.fields.len() {
            return Err(ErrorKind::ArgumentCount.error(format!(
                "Expected {} but got {}",
                self.fields.len(),
                args.len()
            )));
        }
        let instance = Instance::new(Arc::clone(&self.class));
        for (field, value) in self.fields.iter().zip(args) {
            instance.set_field(field, value, true)?;
        }
        Ok(Value::Instance(Arc::new(instance)))
    }
}
