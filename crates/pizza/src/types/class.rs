use std::{fmt, sync::Arc};

use ahash::AHashMap;
use indexmap::IndexMap;
use parking_lot::RwLock;

use crate::{
    exception::{ErrorKind, RuntimeError},
    function::Closure,
    value::Value,
};

/// Name of the method used as a class's constructor.
pub const CONSTRUCTOR_NAME: &str = "<make>";

/// A declared attribute: its default (or, for static attributes, current) value and flags.
#[derive(Debug, Clone)]
pub struct ClassAttr {
    pub value: Value,
    pub is_private: bool,
    pub is_static: bool,
}

impl ClassAttr {
    pub fn new(value: Value) -> Self {
        Self {
            value,
            is_private: false,
            is_static: false,
        }
    }

    #[must_use]
    pub fn private(mut self) -> Self {
        self.is_private = true;
        self
    }

    #[must_use]
    pub fn statik(mut self) -> Self {
        self.is_static = true;
        self
    }
}

/// A method registered on a class.
#[derive(Debug, Clone)]
pub struct Method {
    pub closure: Arc<Closure>,
    pub is_static: bool,
    pub is_private: bool,
    /// Bin methods override an operator for instances of the class.
    pub is_bin: bool,
}

/// Outcome of looking a member up by name.
#[derive(Debug, Clone)]
pub enum FieldLookup {
    Found(Value),
    /// The member exists but is private and the access came from outside.
    Private,
    Missing,
}

impl FieldLookup {
    /// Converts the lookup into the error an external member access reports.
    pub fn into_result(self, name: &str) -> Result<Value, RuntimeError> {
        match self {
            Self::Found(value) => Ok(value),
            Self::Private => Err(ErrorKind::Publicity.error("Attribute is private")),
            Self::Missing => Err(ErrorKind::Scope.error(format!("No member named {name}"))),
        }
    }

    #[must_use]
    pub fn found(self) -> Option<Value> {
        match self {
            Self::Found(value) => Some(value),
            _ => None,
        }
    }
}

/// Class metadata.
///
/// Methods are added one `Method` instruction at a time after the class is created, so
/// the method tables sit behind locks. Static attributes are mutable through the class
/// value; instance attributes only provide defaults for new instances.
pub struct Class {
    name: Arc<str>,
    superclass: Option<Arc<Class>>,
    attributes: RwLock<IndexMap<Arc<str>, ClassAttr>>,
    generics: Vec<Arc<str>>,
    methods: RwLock<AHashMap<Arc<str>, Method>>,
    bin_methods: RwLock<AHashMap<Arc<str>, Arc<Closure>>>,
}

impl Class {
    pub fn new(
        name: impl Into<Arc<str>>,
        superclass: Option<Arc<Self>>,
        attributes: impl IntoIterator<Item = (Arc<str>, ClassAttr)>,
        generics: Vec<Arc<str>>,
    ) -> Self {
        Self {
            name: name.into(),
            superclass,
            attributes: RwLock::new(attributes.into_iter().collect()),
            generics,
            methods: RwLock::new(AHashMap::new()),
            bin_methods: RwLock::new(AHashMap::new()),
        }
    }

    #[must_use]
    pub fn name(&self) -> &Arc<str> {
        &self.name
    }

    #[must_use]
    pub fn superclass(&self) -> Option<&Arc<Self>> {
        self.superclass.as_ref()
    }

    #[must_use]
    pub fn generics(&self) -> &[Arc<str>] {
        &self.generics
    }

    pub fn add_method(&self, name: impl Into<Arc<str>>, method: Method) {
        let name = name.into();
        if method.is_bin {
            self.bin_methods.write().insert(name, method.closure);
        } else {
            self.methods.write().insert(name, method);
        }
    }

    /// Finds a method on this class or the nearest superclass defining it.
    #[must_use]
    pub fn find_method(&self, name: &str) -> Option<Method> {
        if let Some(method) = self.methods.read().get(name) {
            return Some(method.clone());
        }
        self.superclass.as_ref().and_then(|sup| sup.find_method(name))
    }

    /// Finds the operator overload `name`, searching superclasses as well.
    #[must_use]
    pub fn bin_method(&self, name: &str) -> Option<Arc<Closure>> {
        if let Some(method) = self.bin_methods.read().get(name) {
            return Some(Arc::clone(method));
        }
        self.superclass.as_ref().and_then(|sup| sup.bin_method(name))
    }

    #[must_use]
    pub fn constructor(&self) -> Option<Arc<Closure>> {
        self.find_method(CONSTRUCTOR_NAME).map(|method| method.closure)
    }

    /// Default values for a new instance's fields, superclass fields first.
    pub(crate) fn instance_fields(&self) -> IndexMap<Arc<str>, ClassAttr> {
        let mut fields = self
            .superclass
            .as_ref()
            .map(|sup| sup.instance_fields())
            .unwrap_or_default();
        for (name, attr) in self.attributes.read().iter() {
            if !attr.is_static {
                fields.insert(Arc::clone(name), attr.clone());
            }
        }
        fields
    }

    fn static_attr(&self, name: &str) -> Option<ClassAttr> {
        match self.attributes.read().get(name) {
            Some(attr) if attr.is_static => Some(attr.clone()),
            _ => self.superclass.as_ref().and_then(|sup| sup.static_attr(name)),
        }
    }

    /// Looks a member up on the class itself: static attributes and methods.
    ///
    /// External access (`internal == false`) sees only static methods and public members.
    #[must_use]
    pub fn get_field(&self, name: &str, internal: bool) -> FieldLookup {
        if let Some(attr) = self.static_attr(name) {
            if attr.is_private && !internal {
                return FieldLookup::Private;
            }
            return FieldLookup::Found(attr.value);
        }
        match self.find_method(name) {
            Some(method) if method.is_private && !internal => FieldLookup::Private,
            Some(method) if method.is_static || internal => FieldLookup::Found(Value::Closure(method.closure)),
            _ => FieldLookup::Missing,
        }
    }

    /// Assigns a static attribute, on whichever class in the chain declares it.
    pub fn set_field(&self, name: &str, value: Value, internal: bool) -> Result<(), RuntimeError> {
        {
            let mut attributes = self.attributes.write();
            if let Some(attr) = attributes.get_mut(name).filter(|attr| attr.is_static) {
                if attr.is_private && !internal {
                    return Err(ErrorKind::Publicity.error("Attribute is private"));
                }
                attr.value = value;
                return Ok(());
            }
        }
        match &self.superclass {
            Some(sup) => sup.set_field(name, value, internal),
            None => Err(ErrorKind::Scope.error(format!("No static attribute named {name}"))),
        }
    }

    /// True when `self` is `other` or inherits from it.
    #[must_use]
    pub fn is_subclass_of(self: &Arc<Self>, other: &Arc<Self>) -> bool {
        let mut current = Some(self);
        while let Some(class) = current {
            if Arc::ptr_eq(class, other) {
                return true;
            }
            current = class.superclass.as_ref();
        }
        false
    }
}

impl fmt::Debug for Class {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Class")
            .field("name", &self.name)
            .field("superclass", &self.superclass.as_ref().map(|sup| &sup.name))
            .finish_non_exhaustive()
    }
}
