//! Cross-call memoization cache.

use std::{
    hash::{Hash, Hasher},
    sync::Arc,
};

use ahash::AHashMap;

use crate::{bytecode::Chunk, function::Closure, object::PizzaObject, value::Value};

/// Identifies one memoized call: the function and its encoded argument vector.
///
/// Functions are identified by their compiled chunk rather than by name, so two different
/// functions that happen to share a name never see each other's results. Closures built from
/// the same prototype (including async copies) share entries.
///
/// Objects without a data form are encoded by address. The key holds the argument values
/// themselves so those objects stay alive, and their addresses cannot be reused by another
/// object, for as long as the key exists.
#[derive(Debug, Clone)]
pub struct MemoKey {
    chunk: Arc<Chunk>,
    name: Arc<str>,
    args: Vec<u8>,
    _held: Vec<Value>,
}

impl MemoKey {
    pub fn new(closure: &Closure, args: &[Value]) -> Self {
        let encoded = PizzaObject::List(args.iter().map(PizzaObject::from_value).collect());
        Self {
            chunk: Arc::clone(&closure.function.chunk),
            name: Arc::clone(closure.name()),
            // encoding a plain-data object into a Vec cannot fail
            args: encoded.to_bytes().unwrap_or_default(),
            _held: args.to_vec(),
        }
    }

    /// Name of the memoized function, for diagnostics.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl PartialEq for MemoKey {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.chunk, &other.chunk) && self.args == other.args
    }
}

impl Eq for MemoKey {}

impl Hash for MemoKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        Arc::as_ptr(&self.chunk).hash(state);
        self.args.hash(state);
    }
}

/// Cached results of memoized calls, shared by every VM on one runtime.
#[derive(Debug, Default)]
pub struct Memo {
    entries: AHashMap<MemoKey, Value>,
}

impl Memo {
    #[must_use]
    pub fn get(&self, key: &MemoKey) -> Option<Value> {
        self.entries.get(key).cloned()
    }

    pub fn store(&mut self, key: MemoKey, value: Value) {
        log::trace!("memo store {}", key.name());
        self.entries.insert(key, value);
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        bytecode::CodeBuilder,
        function::{BoundMethod, Function},
    };

    fn closure(name: &str) -> Closure {
        let chunk = CodeBuilder::new().build("");
        Closure::new(Arc::new(Function::new(name, chunk).arity(1)))
    }

    #[test]
    fn equal_arguments_hit() {
        let fib = closure("fib");
        let mut memo = Memo::default();
        memo.store(MemoKey::new(&fib, &[Value::Number(3.0)]), Value::Number(2.0));
        assert_eq!(memo.get(&MemoKey::new(&fib, &[Value::Number(3.0)])), Some(Value::Number(2.0)));
        assert_eq!(memo.get(&MemoKey::new(&fib, &[Value::Number(4.0)])), None);
    }

    #[test]
    fn same_name_different_function_misses() {
        let a = closure("f");
        let b = closure("f");
        let mut memo = Memo::default();
        memo.store(MemoKey::new(&a, &[]), Value::Bool(true));
        assert_eq!(memo.get(&MemoKey::new(&b, &[])), None);
    }

    #[test]
    fn stored_keys_keep_object_arguments_alive() {
        let apply = closure("apply");
        let mut memo = Memo::default();
        for round in 0..50 {
            let fresh = Value::Closure(Arc::new(closure("lambda")));
            let key = MemoKey::new(&apply, &[fresh]);
            assert_eq!(memo.get(&key), None, "round {round} reused a dropped argument's entry");
            memo.store(key, Value::Number(f64::from(round)));
        }
        assert_eq!(memo.len(), 50);
    }

    #[test]
    fn bound_methods_differ_by_receiver() {
        let method = Arc::new(closure("get"));
        let bound = |receiver: f64| {
            Value::BoundMethod(Arc::new(BoundMethod::new(Arc::clone(&method), Value::Number(receiver))))
        };
        let call = closure("call");
        let mut memo = Memo::default();
        memo.store(MemoKey::new(&call, &[bound(1.0)]), Value::Number(1.0));
        assert_eq!(memo.get(&MemoKey::new(&call, &[bound(2.0)])), None);
        assert_eq!(memo.get(&MemoKey::new(&call, &[bound(1.0)])), Some(Value::Number(1.0)));
    }
}
