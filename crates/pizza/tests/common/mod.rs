//! Assembly helpers shared by the integration tests.
#![allow(dead_code)]

use std::sync::{
    Arc,
    atomic::{AtomicUsize, Ordering},
};

use pizza::{
    Arity, CodeBuilder, Function, NativeFunction, Opcode, RunError, Runtime, UpvalueKind, VM, Value, VmConfig,
};

/// Assembles a function body.
pub fn function(name: &str, arity: usize, body: impl FnOnce(&mut CodeBuilder)) -> Function {
    let mut code = CodeBuilder::new();
    body(&mut code);
    Function::new(name, code.build("")).arity(arity)
}

/// Assembles top-level code.
pub fn script(body: impl FnOnce(&mut CodeBuilder)) -> Function {
    function("<script>", 0, body)
}

/// Runs top-level code on an empty runtime.
pub fn eval(body: impl FnOnce(&mut CodeBuilder)) -> Result<Value, RunError> {
    eval_with(Runtime::empty(), body)
}

pub fn eval_with(runtime: Arc<Runtime>, body: impl FnOnce(&mut CodeBuilder)) -> Result<Value, RunError> {
    VM::new(runtime, script(body)).run()
}

pub fn eval_config(config: VmConfig, body: impl FnOnce(&mut CodeBuilder)) -> (VM, Result<Value, RunError>) {
    let mut vm = VM::with_config(Runtime::empty(), script(body), config);
    let result = vm.run();
    (vm, result)
}

/// Emits `Call` with positional arguments only.
pub fn call(code: &mut CodeBuilder, argc: u8) {
    code.emit(Opcode::Call).u8(argc).u8(0);
}

/// Emits `Closure` for `function`, which pops `defaults` values, followed by its
/// upvalue descriptors.
pub fn closure(code: &mut CodeBuilder, function: Function, defaults: u8, upvalues: &[(UpvalueKind, u16)]) {
    let function = function.defaults(usize::from(defaults)).upvalues(upvalues.len());
    let index = code.add_const(Value::Func(Arc::new(function)));
    code.emit_u16(Opcode::Closure, index).u8(defaults);
    for &(kind, index) in upvalues {
        code.u8(kind as u8).u16(index);
    }
}

/// Emits `DefineGlobal` for a mutable, unranged global. The value stays on the stack.
pub fn define_global(code: &mut CodeBuilder, name: &str) {
    code.emit_name(Opcode::DefineGlobal, name).u8(0).u8(0);
}

/// Emits `DefineLocal` for a mutable, unranged local, then drops the pushed copy so the
/// cell is the new top slot.
pub fn define_local(code: &mut CodeBuilder) {
    code.emit(Opcode::DefineLocal).u8(0).u8(0);
    code.emit(Opcode::Pop);
}

/// Emits a `Class` without superclass or generics. Attribute values must already be on
/// the stack in declaration order.
pub fn class(code: &mut CodeBuilder, name: &str, attributes: &[(&str, bool, bool)]) {
    let name = code.name(name);
    let len = u8::try_from(attributes.len()).unwrap();
    code.emit_u16(Opcode::Class, name).u8(0).u8(len);
    for &(attr, is_private, is_static) in attributes {
        let attr = code.name(attr);
        code.u16(attr).u8(u8::from(is_private)).u8(u8::from(is_static));
    }
    code.u8(0);
}

/// Emits `Method` attaching the closure on top of the stack to the class below it.
pub fn method(code: &mut CodeBuilder, name: &str, is_static: bool, is_private: bool, is_bin: bool) {
    code.emit_name(Opcode::Method, name)
        .u8(u8::from(is_static))
        .u8(u8::from(is_private))
        .u8(u8::from(is_bin));
}

/// A native that counts its invocations and returns null.
pub fn counter(name: &str) -> (NativeFunction, Arc<AtomicUsize>) {
    let count = Arc::new(AtomicUsize::new(0));
    let seen = Arc::clone(&count);
    let native = NativeFunction::new(name, Arity::Fixed(0), move |_| {
        seen.fetch_add(1, Ordering::SeqCst);
        Ok(Value::Null)
    });
    (native, count)
}

pub fn list(items: impl IntoIterator<Item = Value>) -> Value {
    Value::list(items.into_iter().collect())
}

pub fn num(n: f64) -> Value {
    Value::Number(n)
}
