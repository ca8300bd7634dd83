#![doc = include_str!("../../../README.md")]
mod bytecode;
mod exception;
mod function;
mod memo;
mod object;
mod resource;
mod run;
mod runtime;
mod types;
mod value;
mod var;

pub use crate::{
    bytecode::{
        Chunk, CodeBuilder, HeaderCommand, InvalidOpcodeError, JumpLabel, Opcode, Position, UpvalueKind, VM, VmConfig,
    },
    exception::{ErrorKind, RaisedError, RunError, RuntimeError, TraceEntry},
    function::{BoundMethod, Closure, Function, Upvalue},
    memo::{Memo, MemoKey},
    object::{InvalidObjectError, PizzaObject},
    resource::{DEFAULT_MAX_FRAMES, DEFAULT_MAX_STACK, ResourceError, VmLimits},
    run::AsyncTasks,
    runtime::{Runtime, RuntimeBuilder},
    types::{
        Arity, Class, ClassAttr, EnumType, EnumVariant, FieldLookup, Instance, Method, Namespace, NativeFn,
        NativeFunction, Pattern, TypeTag,
    },
    value::{List, Map, Reference, ResultValue, Value},
    var::Var,
};
