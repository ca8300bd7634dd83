use std::{fmt, sync::Arc};

use indexmap::IndexMap;

use crate::{value::Value, var::Var};

/// A read-only, named bag of bindings: an imported module or a host library.
///
/// Bindings are the module's own variable cells, so a namespace is a live view of the
/// module's globals rather than a snapshot of their values.
pub struct Namespace {
    name: Arc<str>,
    fields: IndexMap<Arc<str>, Var>,
}

impl Namespace {
    pub fn new(name: impl Into<Arc<str>>, fields: IndexMap<Arc<str>, Var>) -> Self {
        Self {
            name: name.into(),
            fields,
        }
    }

    /// Builds a namespace of constant bindings, as host libraries are.
    pub fn from_values(name: impl Into<Arc<str>>, values: impl IntoIterator<Item = (Arc<str>, Value)>) -> Self {
        let fields = values
            .into_iter()
            .map(|(field, value)| (field, Var::constant(value)))
            .collect();
        Self::new(name, fields)
    }

    #[must_use]
    pub fn name(&self) -> &Arc<str> {
        &self.name
    }

    #[must_use]
    pub fn get(&self, field: &str) -> Option<Value> {
        self.fields.get(field).map(Var::get)
    }

    #[must_use]
    pub fn var(&self, field: &str) -> Option<&Var> {
        self.fields.get(field)
    }

    pub fn names(&self) -> impl Iterator<Item = &Arc<str>> {
        self.fields.keys()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

impl fmt::Debug for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Namespace")
            .field("name", &self.name)
            .field("fields", &self.fields.keys().collect::<Vec<_>>())
            .finish()
    }
}
