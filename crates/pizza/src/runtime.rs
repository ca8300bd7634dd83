//! The runtime context shared by every VM of one program.
//!
//! Holds what would otherwise be process-wide state: natives registered into the global
//! scope, native libraries that scripts import by name, and the memo cache. A runtime is
//! assembled once with [`RuntimeBuilder`] and is read-only afterwards, apart from the memo.

use std::sync::Arc;

use ahash::AHashMap;
use indexmap::IndexMap;
use parking_lot::Mutex;

use crate::{
    memo::Memo,
    types::{Namespace, NativeFunction},
    value::Value,
    var::Var,
};

#[derive(Debug, Default)]
pub struct Runtime {
    globals: IndexMap<Arc<str>, Value>,
    libraries: AHashMap<Arc<str>, Arc<Namespace>>,
    memo: Mutex<Memo>,
}

impl Runtime {
    #[must_use]
    pub fn builder() -> RuntimeBuilder {
        RuntimeBuilder::default()
    }

    /// A runtime with no natives and no libraries.
    #[must_use]
    pub fn empty() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// A library namespace registered under `name`.
    #[must_use]
    pub fn library(&self, name: &str) -> Option<&Arc<Namespace>> {
        self.libraries.get(name)
    }

    /// Fresh constant bindings for the registered globals, as every new VM starts with.
    pub(crate) fn global_bindings(&self) -> AHashMap<Arc<str>, Var> {
        self.globals
            .iter()
            .map(|(name, value)| (Arc::clone(name), Var::constant(value.clone())))
            .collect()
    }

    #[must_use]
    pub fn memo(&self) -> &Mutex<Memo> {
        &self.memo
    }
}

/// Registers natives and libraries, then freezes them into a [`Runtime`].
///
/// ```
/// use pizza::{Arity, NativeFunction, Runtime, Value};
///
/// let runtime = Runtime::builder()
///     .native(NativeFunction::new("two", Arity::Fixed(0), |_| Ok(Value::Number(2.0))))
///     .library_native("math", NativeFunction::new("abs", Arity::Fixed(1), |args| {
///         Ok(Value::Number(args[0].as_number().unwrap_or_default().abs()))
///     }))
///     .build();
/// assert!(runtime.library("math").is_some());
/// ```
#[derive(Debug, Default)]
pub struct RuntimeBuilder {
    globals: IndexMap<Arc<str>, Value>,
    libraries: IndexMap<Arc<str>, IndexMap<Arc<str>, Value>>,
}

impl RuntimeBuilder {
    /// Registers a native in the global scope under its own name.
    #[must_use]
    pub fn native(mut self, native: NativeFunction) -> Self {
        self.globals
            .insert(Arc::clone(native.name()), Value::Native(Arc::new(native)));
        self
    }

    /// Registers a constant global value.
    #[must_use]
    pub fn global(mut self, name: impl Into<Arc<str>>, value: Value) -> Self {
        self.globals.insert(name.into(), value);
        self
    }

    /// Registers a native in the library `library`, creating the library if needed.
    #[must_use]
    pub fn library_native(self, library: impl Into<Arc<str>>, native: NativeFunction) -> Self {
        let name = Arc::clone(native.name());
        self.library_value(library, name, Value::Native(Arc::new(native)))
    }

    /// Registers a constant value in the library `library`.
    #[must_use]
    pub fn library_value(mut self, library: impl Into<Arc<str>>, name: impl Into<Arc<str>>, value: Value) -> Self {
        self.libraries
            .entry(library.into())
            .or_default()
            .insert(name.into(), value);
        self
    }

    #[must_use]
    pub fn build(self) -> Arc<Runtime> {
        let libraries = self
            .libraries
            .into_iter()
            .map(|(name, fields)| {
                let namespace = Namespace::from_values(Arc::clone(&name), fields);
                (name, Arc::new(namespace))
            })
            .collect();
        Arc::new(Runtime {
            globals: self.globals,
            libraries,
            memo: Mutex::new(Memo::default()),
        })
    }
}
