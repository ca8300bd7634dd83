mod common;

use std::sync::{Arc, atomic::Ordering};

use common::{call, closure, counter, define_global, eval_with, function, list, num};
use pizza::{CodeBuilder, Function, HeaderCommand, Opcode, ResultValue, Runtime, RuntimeError, Value};

/// `fib(n)`, calling the global native `tick` once per evaluation.
fn fib(memoize: bool) -> Function {
    function("fib", 1, |code| {
        if memoize {
            code.emit(Opcode::Header).u8(HeaderCommand::Memoize as u8).u8(0);
            code.emit(Opcode::Pop);
        }
        code.emit_name(Opcode::GetGlobal, "tick");
        call(code, 0);
        code.emit(Opcode::Pop);

        code.emit_u8(Opcode::GetLocal, 1).emit_const(2.0).emit(Opcode::LessThan);
        let recurse = code.emit_jump(Opcode::JumpIfFalse);
        code.emit(Opcode::Pop).emit_u8(Opcode::GetLocal, 1).emit(Opcode::Return);
        code.patch_jump(recurse);
        code.emit(Opcode::Pop);

        for back in [1.0, 2.0] {
            code.emit_u8(Opcode::GetLocal, 1).emit_const(back).emit(Opcode::Subtract);
            code.emit_name(Opcode::GetGlobal, "fib");
            call(code, 1);
        }
        code.emit(Opcode::Add).emit(Opcode::Return);
    })
}

fn run_fib(memoize: bool, n: f64) -> (Value, usize, Arc<Runtime>) {
    let (tick, ticks) = counter("tick");
    let runtime = Runtime::builder().native(tick).build();
    let result = eval_with(Arc::clone(&runtime), |code: &mut CodeBuilder| {
        closure(code, fib(memoize), 0, &[]);
        define_global(code, "fib");
        code.emit(Opcode::Pop);
        code.emit_const(n).emit_name(Opcode::GetGlobal, "fib");
        call(code, 1);
        code.emit(Opcode::Return);
    });
    (result.unwrap(), ticks.load(Ordering::SeqCst), runtime)
}

#[test]
fn memoized_fib_evaluates_each_argument_once() {
    let (result, ticks, runtime) = run_fib(true, 20.0);
    assert_eq!(result, num(6765.0));
    assert_eq!(ticks, 21);
    // fib(20) itself was called from an unmemoized frame
    assert_eq!(runtime.memo().lock().len(), 20);
}

#[test]
fn unmemoized_fib_recomputes() {
    let (result, ticks, runtime) = run_fib(false, 20.0);
    assert_eq!(result, num(6765.0));
    assert_eq!(ticks, 21891);
    assert!(runtime.memo().lock().is_empty());
}

#[test]
fn memo_entries_belong_to_one_chunk() {
    let (tick, ticks) = counter("tick");
    let runtime = Runtime::builder().native(tick).build();
    let program = |code: &mut CodeBuilder| {
        closure(code, fib(true), 0, &[]);
        define_global(code, "fib");
        code.emit(Opcode::Pop);
        code.emit_const(10.0).emit_name(Opcode::GetGlobal, "fib");
        call(code, 1);
        code.emit(Opcode::Return);
    };
    assert_eq!(eval_with(Arc::clone(&runtime), program).unwrap(), num(55.0));
    let first = ticks.load(Ordering::SeqCst);
    assert_eq!(first, 11);

    // the second run assembles fib again; a different chunk has no entries
    assert_eq!(eval_with(Arc::clone(&runtime), program).unwrap(), num(55.0));
    assert_eq!(ticks.load(Ordering::SeqCst), 2 * first);
}

#[test]
fn caught_errors_are_memoized() {
    let (tick, ticks) = counter("tick");
    let runtime = Runtime::builder().native(tick).build();
    let result = eval_with(Arc::clone(&runtime), |code| {
        // risky(n) is a catcher that ticks, then throws
        let risky = function("risky", 1, |body| {
            body.emit_name(Opcode::GetGlobal, "tick");
            call(body, 0);
            body.emit(Opcode::Pop);
            body.emit_const("boom").emit_const("Custom").emit(Opcode::Throw);
        })
        .catcher();
        closure(code, risky, 0, &[]);
        define_global(code, "risky");
        code.emit(Opcode::Pop);

        // twice(n) is memoized and returns [risky(n), risky(n)]
        let twice = function("twice", 1, |body| {
            body.emit(Opcode::Header).u8(HeaderCommand::Memoize as u8).u8(0);
            body.emit(Opcode::Pop);
            for _ in 0..2 {
                body.emit_u8(Opcode::GetLocal, 1).emit_name(Opcode::GetGlobal, "risky");
                call(body, 1);
            }
            body.emit_u8(Opcode::MakeArray, 2).emit(Opcode::Return);
        });
        closure(code, twice, 0, &[]);
        define_global(code, "twice");
        code.emit(Opcode::Pop);
        code.emit_const(7.0).emit_name(Opcode::GetGlobal, "twice");
        call(code, 1);
        code.emit(Opcode::Return);
    });
    let failed = Value::Result(Arc::new(ResultValue::Err(RuntimeError::new("Custom", "boom"))));
    assert_eq!(result.unwrap(), list([failed.clone(), failed]));
    assert_eq!(ticks.load(Ordering::SeqCst), 1);
    assert_eq!(runtime.memo().lock().len(), 1);
}

#[test]
fn memoize_header_takes_no_arguments() {
    let result = eval_with(Runtime::empty(), |code| {
        let name = code.name("x");
        code.emit(Opcode::Header).u8(HeaderCommand::Memoize as u8).u8(1).u16(name);
        code.emit(Opcode::Return);
    });
    let err = result.unwrap_err();
    let error = err.runtime_error().unwrap();
    assert!(error.is(pizza::ErrorKind::ArgumentCount));
    assert_eq!(error.reason, "Expected 0 arguments, got 1");
}
