use std::{fmt, sync::Arc};

use parking_lot::RwLock;

use crate::{bytecode::Chunk, value::Value, var::Var};

/// A compiled function prototype.
///
/// Prototypes are immutable once compiled: defaults and the resolved name live on the
/// [`Closure`] built from them, so several closures (and async copies running on other
/// threads) can share one prototype.
///
/// # Stack Layout
///
/// When a frame is entered its slots look like this:
/// ```text
/// [callee][params...][varargs list?][kwargs map?][locals...]
/// ```
/// - Slot 0: the callee, or a cell holding the receiver for bound methods
/// - Slots 1..=arity: positional parameters, missing ones filled from defaults
/// - Then the variadic list when `variadic` is set, and the keyword map when `takes_kwargs` is set
#[derive(Debug, Clone)]
pub struct Function {
    /// Declared name; empty for anonymous functions, which take the enclosing function's name.
    pub name: Arc<str>,
    pub chunk: Arc<Chunk>,
    /// Number of positional parameters.
    pub arity: usize,
    /// How many trailing positional parameters have default values.
    pub default_count: usize,
    pub variadic: bool,
    pub takes_kwargs: bool,
    /// Async functions run on their own VM and thread instead of pushing a frame.
    pub is_async: bool,
    /// Errors raised while this function runs are returned as a result value.
    pub catcher: bool,
    pub upvalue_count: usize,
}

impl Function {
    pub fn new(name: impl Into<Arc<str>>, chunk: Chunk) -> Self {
        Self {
            name: name.into(),
            chunk: Arc::new(chunk),
            arity: 0,
            default_count: 0,
            variadic: false,
            takes_kwargs: false,
            is_async: false,
            catcher: false,
            upvalue_count: 0,
        }
    }

    #[must_use]
    pub fn arity(mut self, arity: usize) -> Self {
        self.arity = arity;
        self
    }

    #[must_use]
    pub fn defaults(mut self, default_count: usize) -> Self {
        self.default_count = default_count;
        self
    }

    #[must_use]
    pub fn variadic(mut self) -> Self {
        self.variadic = true;
        self
    }

    #[must_use]
    pub fn kwargs(mut self) -> Self {
        self.takes_kwargs = true;
        self
    }

    #[must_use]
    pub fn asynchronous(mut self) -> Self {
        self.is_async = true;
        self
    }

    #[must_use]
    pub fn catcher(mut self) -> Self {
        self.catcher = true;
        self
    }

    #[must_use]
    pub fn upvalues(mut self, upvalue_count: usize) -> Self {
        self.upvalue_count = upvalue_count;
        self
    }

    /// Number of stack slots the parameters occupy above the callee.
    #[must_use]
    pub fn total_arity(&self) -> usize {
        self.arity + usize::from(self.variadic) + usize::from(self.takes_kwargs)
    }

    /// An independent prototype sharing this one's bytecode and constants.
    #[must_use]
    pub fn copy(&self) -> Self {
        self.clone()
    }
}

/// A captured variable.
#[derive(Debug, Clone)]
pub enum Upvalue {
    Cell(Var),
    /// The closure refers to itself by name. Resolved from the running frame on access so
    /// that a recursive closure does not own itself.
    Recursive,
}

/// A runtime closure: a prototype plus the cells it captured when it was created.
pub struct Closure {
    pub function: Arc<Function>,
    name: Arc<str>,
    defaults: Vec<Value>,
    upvalues: RwLock<Vec<Option<Upvalue>>>,
}

impl Closure {
    /// A closure with no captures and no defaults, as hosts build for top-level code.
    pub fn new(function: Arc<Function>) -> Self {
        let name = Arc::clone(&function.name);
        Self::with_parts(function, name, Vec::new(), Vec::new())
    }

    pub(crate) fn with_parts(
        function: Arc<Function>,
        name: Arc<str>,
        defaults: Vec<Value>,
        upvalues: Vec<Option<Upvalue>>,
    ) -> Self {
        Self {
            function,
            name,
            defaults,
            upvalues: RwLock::new(upvalues),
        }
    }

    #[must_use]
    pub fn name(&self) -> &Arc<str> {
        &self.name
    }

    /// Default for positional parameter `index`, if it has one.
    pub(crate) fn default_for(&self, index: usize) -> Option<&Value> {
        let first_default = self.function.arity.checked_sub(self.defaults.len())?;
        index.checked_sub(first_default).and_then(|i| self.defaults.get(i))
    }

    #[must_use]
    pub fn upvalue(&self, slot: usize) -> Option<Upvalue> {
        self.upvalues.read().get(slot).cloned().flatten()
    }

    pub(crate) fn drop_upvalue(&self, slot: usize) {
        if let Some(upvalue) = self.upvalues.write().get_mut(slot) {
            *upvalue = None;
        }
    }

    /// All captured cells, for handing to a copy of this closure on another VM.
    pub(crate) fn upvalues(&self) -> Vec<Option<Upvalue>> {
        self.upvalues.read().clone()
    }
}

impl fmt::Debug for Closure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Closure")
            .field("name", &self.name)
            .field("arity", &self.function.arity)
            .finish_non_exhaustive()
    }
}

/// A method closure paired with the receiver it was looked up on.
#[derive(Debug, Clone)]
pub struct BoundMethod {
    pub closure: Arc<Closure>,
    pub receiver: Value,
}

impl BoundMethod {
    pub fn new(closure: Arc<Closure>, receiver: Value) -> Self {
        Self { closure, receiver }
    }
}
