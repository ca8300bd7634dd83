mod common;

use std::sync::{
    Arc,
    atomic::{AtomicUsize, Ordering},
};

use common::{call, closure, define_global, define_local, eval, eval_config, eval_with, function, list, num};
use pizza::{
    Arity, CodeBuilder, ErrorKind, Function, NativeFunction, Opcode, RunError, Runtime, TypeTag, UpvalueKind, VM,
    Value, VmConfig,
};

/// `add(a, b = 10)`.
fn add_with_default(code: &mut CodeBuilder) {
    let add = function("add", 2, |body| {
        body.emit_u8(Opcode::GetLocal, 1).emit_u8(Opcode::GetLocal, 2);
        body.emit(Opcode::Add).emit(Opcode::Return);
    });
    code.emit_const(10.0);
    closure(code, add, 1, &[]);
    define_global(code, "add");
    code.emit(Opcode::Pop);
}

#[test]
fn closure_defaults_must_match_the_prototype() {
    let (vm, result) = eval_config(VmConfig::new(), |code| {
        let add = function("add", 2, |body| {
            body.emit(Opcode::Null).emit(Opcode::Return);
        })
        .defaults(1);
        let index = code.add_const(Value::Func(Arc::new(add)));
        // the operand supplies no defaults for a prototype that declares one
        code.emit_u16(Opcode::Closure, index).u8(0);
        code.emit(Opcode::Return);
    });
    match result {
        Err(RunError::Internal(msg)) => assert_eq!(msg, "Closure supplies 0 defaults but add declares 1"),
        other => panic!("expected an internal error, got {other:?}"),
    }
    assert!(vm.failed());
}

fn call_add(code: &mut CodeBuilder, args: &[f64]) {
    for &arg in args {
        code.emit_const(arg);
    }
    code.emit_name(Opcode::GetGlobal, "add");
    call(code, args.len() as u8);
}

#[test]
fn missing_arguments_use_defaults() {
    let result = eval(|code| {
        add_with_default(code);
        call_add(code, &[1.0]);
        call_add(code, &[1.0, 2.0]);
        code.emit_u8(Opcode::MakeArray, 2).emit(Opcode::Return);
    });
    assert_eq!(result.unwrap(), list([num(11.0), num(3.0)]));
}

#[test]
fn argument_count_is_checked() {
    for (args, reason) in [
        (&[][..], "Expected 2 but got 0"),
        (&[1.0, 2.0, 3.0][..], "Expected 2 but got 3"),
    ] {
        let result = eval(|code| {
            add_with_default(code);
            call_add(code, args);
            code.emit(Opcode::Return);
        });
        let err = result.unwrap_err();
        let error = err.runtime_error().unwrap();
        assert!(error.is(ErrorKind::ArgumentCount));
        assert_eq!(error.reason, reason);
    }
}

#[test]
fn extra_arguments_go_to_the_variadic_list() {
    let rest = function("rest", 1, |body| {
        body.emit_u8(Opcode::GetLocal, 2).emit(Opcode::Return);
    })
    .variadic();
    let result = eval(|code| {
        closure(code, rest, 0, &[]);
        define_global(code, "rest");
        code.emit(Opcode::Pop);
        for n in 1..=3 {
            code.emit_const(f64::from(n));
        }
        code.emit_name(Opcode::GetGlobal, "rest");
        call(code, 3);
        code.emit_const(1.0).emit_name(Opcode::GetGlobal, "rest");
        call(code, 1);
        code.emit_u8(Opcode::MakeArray, 2).emit(Opcode::Return);
    });
    assert_eq!(result.unwrap(), list([list([num(2.0), num(3.0)]), list([])]));
}

#[test]
fn keyword_arguments_arrive_as_a_map() {
    let options = function("options", 1, |body| {
        body.emit_u8(Opcode::GetLocal, 2).emit(Opcode::Return);
    })
    .kwargs();
    let result = eval(|code| {
        closure(code, options, 0, &[]);
        define_global(code, "options");
        code.emit(Opcode::Pop);
        code.emit_const(1.0).emit_const(2.0).emit_const(3.0);
        code.emit_name(Opcode::GetGlobal, "options");
        let size = code.name("size");
        let crust = code.name("crust");
        code.emit(Opcode::Call).u8(1).u8(2).u16(size).u16(crust);
        code.emit(Opcode::Return);
    });
    assert_eq!(
        result.unwrap(),
        Value::map([(Value::text("size"), num(2.0)), (Value::text("crust"), num(3.0))])
    );
}

#[test]
fn keyword_arguments_need_a_keyword_parameter() {
    let result = eval(|code| {
        add_with_default(code);
        code.emit_const(1.0).emit_const(2.0).emit_name(Opcode::GetGlobal, "add");
        let b = code.name("b");
        code.emit(Opcode::Call).u8(1).u8(1).u16(b);
        code.emit(Opcode::Return);
    });
    assert_eq!(
        result.unwrap_err().runtime_error().unwrap().reason,
        "Unexpected keyword arguments"
    );
}

#[test]
fn spread_lists_expand_into_arguments() {
    let result = eval(|code| {
        add_with_default(code);
        code.emit_const(4.0).emit_const(5.0).emit_u8(Opcode::MakeArray, 2);
        code.emit(Opcode::Spread).emit_name(Opcode::GetGlobal, "add");
        call(code, 1);
        code.emit(Opcode::Return);
    });
    assert_eq!(result.unwrap(), num(9.0));
}

#[test]
fn only_lists_spread() {
    let result = eval(|code| {
        code.emit_const("abc").emit(Opcode::Spread).emit(Opcode::Return);
    });
    let err = result.unwrap_err();
    assert!(err.runtime_error().unwrap().is(ErrorKind::Type));
}

#[test]
fn natives_check_arity_and_types() {
    let hypot = NativeFunction::new("hypot", Arity::Fixed(2), |args| {
        let (a, b) = (args[0].as_number().unwrap_or_default(), args[1].as_number().unwrap_or_default());
        Ok(Value::Number(a.hypot(b)))
    })
    .with_types(vec![TypeTag::Number, TypeTag::Number]);
    let runtime = Runtime::builder().native(hypot).build();

    let ok = eval_with(Arc::clone(&runtime), |code| {
        code.emit_const(3.0).emit_const(4.0).emit_name(Opcode::GetGlobal, "hypot");
        call(code, 2);
        code.emit(Opcode::Return);
    });
    assert_eq!(ok.unwrap(), num(5.0));

    let wrong_type = eval_with(Arc::clone(&runtime), |code| {
        code.emit_const(3.0).emit_const("4").emit_name(Opcode::GetGlobal, "hypot");
        call(code, 2);
        code.emit(Opcode::Return);
    });
    let err = wrong_type.unwrap_err();
    let error = err.runtime_error().unwrap();
    assert!(error.is(ErrorKind::Type));
    assert_eq!(error.reason, "Expected num but got String");

    let wrong_count = eval_with(runtime, |code| {
        code.emit_const(3.0).emit_name(Opcode::GetGlobal, "hypot");
        call(code, 1);
        code.emit(Opcode::Return);
    });
    assert!(wrong_count.unwrap_err().runtime_error().unwrap().is(ErrorKind::ArgumentCount));
}

#[test]
fn native_errors_are_catchable() {
    let fail = NativeFunction::new("fail", Arity::Variadic, |_| Err(pizza::RuntimeError::new("Host", "no")));
    let runtime = Runtime::builder().native(fail).build();
    let result = eval_with(runtime, |code| {
        let attempt = function("attempt", 0, |body| {
            body.emit_name(Opcode::GetGlobal, "fail");
            call(body, 0);
            body.emit(Opcode::Return);
        })
        .catcher();
        closure(code, attempt, 0, &[]);
        call(code, 0);
        code.emit(Opcode::Return);
    });
    let value = result.unwrap();
    let Some(pizza::ResultValue::Err(err)) = value.as_result() else {
        panic!("expected an error result, got {value}")
    };
    assert_eq!(err.kind, "Host");
}

// ============================================================================
// Loops
// ============================================================================

#[test]
fn numeric_for_loop_collects_values() {
    let result = eval(|code| {
        code.emit_const(0.0);
        define_local(code);
        code.emit(Opcode::StartCache);
        let start = code.current_offset();
        code.emit_const(4.0).emit_const(1.0);
        // body: GetLocal(2) Constant(3) Multiply(1) CollectLoop(1) Loop(3)
        code.emit(Opcode::For).u8(1).u16(10);
        code.emit_u8(Opcode::GetLocal, 1).emit_const(10.0).emit(Opcode::Multiply);
        code.emit(Opcode::CollectLoop);
        code.emit_loop(start);
        code.emit(Opcode::FlushLoop).emit(Opcode::Return);
    });
    assert_eq!(result.unwrap(), list([num(10.0), num(20.0), num(30.0)]));
}

#[test]
fn negative_steps_count_down() {
    let result = eval(|code| {
        code.emit_const(4.0);
        define_local(code);
        code.emit(Opcode::StartCache);
        let start = code.current_offset();
        code.emit_const(0.0).emit_const(-2.0);
        // body: GetLocal(2) CollectLoop(1) Loop(3)
        code.emit(Opcode::For).u8(1).u16(6);
        code.emit_u8(Opcode::GetLocal, 1).emit(Opcode::CollectLoop);
        code.emit_loop(start);
        code.emit(Opcode::FlushLoop).emit(Opcode::Return);
    });
    assert_eq!(result.unwrap(), list([num(2.0)]));
}

#[test]
fn iter_walks_a_list() {
    let result = eval(|code| {
        code.emit_const(1.0).emit_const(2.0).emit_const(3.0).emit_u8(Opcode::MakeArray, 3);
        define_local(code);
        code.emit_const(0.0);
        define_local(code);
        code.emit(Opcode::Null);
        define_local(code);
        let start = code.current_offset();
        // body: GetLocal(2) GetLocal(2) Add(1) SetLocal(2) Pop(1) Loop(3)
        code.emit(Opcode::Iter).u8(1).u8(3).u16(11);
        code.emit_u8(Opcode::GetLocal, 2).emit_u8(Opcode::GetLocal, 3).emit(Opcode::Add);
        code.emit_u8(Opcode::SetLocal, 2).emit(Opcode::Pop);
        code.emit_loop(start);
        code.emit_u8(Opcode::GetLocal, 2).emit(Opcode::Return);
    });
    assert_eq!(result.unwrap(), num(6.0));
}

#[test]
fn iter_needs_a_list() {
    let result = eval(|code| {
        code.emit_const("abc");
        define_local(code);
        code.emit(Opcode::Null);
        define_local(code);
        code.emit(Opcode::Iter).u8(1).u8(2).u16(0);
        code.emit(Opcode::Return);
    });
    assert!(result.unwrap_err().runtime_error().unwrap().is(ErrorKind::Type));
}

#[test]
fn indexing_collections() {
    let result = eval(|code| {
        code.emit_const(1.0).emit_const(2.0).emit_const(3.0).emit_u8(Opcode::MakeArray, 3);
        code.emit_const(-1.0).emit(Opcode::Index);
        code.emit_const("pizza").emit_const(1.0).emit(Opcode::Get);
        code.emit_const("k").emit_const(1.0).emit_u8(Opcode::MakeMap, 1);
        code.emit_const("missing").emit(Opcode::Get);
        code.emit_u8(Opcode::MakeArray, 3).emit(Opcode::Return);
    });
    assert_eq!(result.unwrap(), list([num(3.0), Value::text("i"), Value::Null]));
}

#[test]
fn index_out_of_bounds() {
    let result = eval(|code| {
        code.emit_u8(Opcode::MakeArray, 0).emit_const(0.0).emit(Opcode::Get).emit(Opcode::Return);
    });
    let err = result.unwrap_err();
    let error = err.runtime_error().unwrap();
    assert!(error.is(ErrorKind::Index));
    assert_eq!(error.reason, "Index out of bounds");
}

// ============================================================================
// Async calls
// ============================================================================

#[test]
fn async_calls_return_null_and_finish_in_the_background() {
    let work = function("work", 1, |body| {
        body.emit_u8(Opcode::GetLocal, 1).emit_const(1.0).emit(Opcode::Add).emit(Opcode::Return);
    })
    .asynchronous();
    let (mut vm, result) = eval_config(VmConfig::new(), |code| {
        code.emit_const(41.0);
        closure(code, work, 0, &[]);
        call(code, 1);
        code.emit(Opcode::Return);
    });
    assert_eq!(result.unwrap(), Value::Null);
    let results: Vec<Value> = vm.join_async().into_iter().map(Result::unwrap).collect();
    assert_eq!(results, [num(42.0)]);
}

#[test]
fn async_calls_share_captured_globals_and_natives() {
    let hits = Arc::new(AtomicUsize::new(0));
    let seen = Arc::clone(&hits);
    let record = NativeFunction::new("record", Arity::Fixed(1), move |args| {
        seen.fetch_add(1, Ordering::SeqCst);
        Ok(args[0].clone())
    });
    let runtime = Runtime::builder().native(record).build();

    let mut vm = VM::new(
        runtime,
        common::script(|code| {
            code.emit_const(0.0);
            define_global(code, "shared");
            code.emit(Opcode::Pop);
            let name = code.name("shared");
            let store: Function = function("store", 0, |body| {
                body.emit_const(5.0).emit_u8(Opcode::SetUpvalue, 0).emit(Opcode::Pop);
                body.emit_const("done").emit_name(Opcode::GetGlobal, "record");
                call(body, 1);
                body.emit(Opcode::Return);
            })
            .asynchronous();
            closure(code, store, 0, &[(UpvalueKind::Global, name)]);
            call(code, 0);
            code.emit(Opcode::Return);
        }),
    );
    assert_eq!(vm.run().unwrap(), Value::Null);
    let results = vm.join_async();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].as_ref().unwrap(), &Value::text("done"));
    assert_eq!(hits.load(Ordering::SeqCst), 1);
    assert_eq!(vm.global("shared"), Some(num(5.0)));
}

#[test]
fn async_failures_stay_on_their_thread() {
    let boom = function("boom", 0, |body| {
        body.emit_const("async").emit_const("Custom").emit(Opcode::Throw);
    })
    .asynchronous();
    let (mut vm, result) = eval_config(VmConfig::new(), |code| {
        closure(code, boom, 0, &[]);
        call(code, 0);
        code.emit(Opcode::Pop).emit_const("caller").emit(Opcode::Return);
    });
    assert_eq!(result.unwrap(), Value::text("caller"));
    assert!(!vm.failed());
    let results = vm.join_async();
    match &results[..] {
        [Err(RunError::Runtime(raised))] => assert_eq!(raised.error.reason, "async"),
        other => panic!("expected one runtime error, got {other:?}"),
    }
}
