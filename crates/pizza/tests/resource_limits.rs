/// Tests for the operand stack and call depth limits.
///
/// Running out of either is fatal: catcher frames and safe mode cannot recover from it.
mod common;

use common::{call, closure, define_global, eval_config, function};
use pizza::{CodeBuilder, Opcode, ResourceError, RunError, VmConfig, VmLimits};

/// `down()` calls itself forever; the script calls it from a catcher.
fn runaway_recursion(code: &mut CodeBuilder) {
    let down = function("down", 0, |body| {
        body.emit_name(Opcode::GetGlobal, "down");
        call(body, 0);
        body.emit(Opcode::Return);
    });
    closure(code, down, 0, &[]);
    define_global(code, "down");
    code.emit(Opcode::Pop);
    let guard = function("guard", 0, |body| {
        body.emit_name(Opcode::GetGlobal, "down");
        call(body, 0);
        body.emit(Opcode::Return);
    })
    .catcher();
    closure(code, guard, 0, &[]);
    call(code, 0);
    code.emit(Opcode::Return);
}

#[test]
fn frame_limit_exceeded() {
    let config = VmConfig::new().limits(VmLimits::new().max_frames(16));
    let (vm, result) = eval_config(config, runaway_recursion);
    match result {
        Err(RunError::Resource(err)) => {
            assert_eq!(err, ResourceError::FrameOverflow { limit: 16 });
            let msg = err.to_string();
            assert!(msg.contains("more than 16 active frames"), "got: {msg}");
        }
        other => panic!("expected Resource error, got: {other:?}"),
    }
    assert!(vm.failed());
    assert!(vm.last_error().is_none());
}

#[test]
fn frame_limit_applies_in_safe_mode() {
    let config = VmConfig::new()
        .safe(true)
        .limits(VmLimits::new().max_frames(8));
    let (_, result) = eval_config(config, runaway_recursion);
    assert!(
        matches!(result, Err(RunError::Resource(ResourceError::FrameOverflow { limit: 8 }))),
        "got: {result:?}"
    );
}

#[test]
fn stack_limit_exceeded() {
    let config = VmConfig::new().limits(VmLimits::new().max_stack(8));
    let (vm, result) = eval_config(config, |code| {
        for n in 0..10 {
            code.emit_const(f64::from(n));
        }
        code.emit(Opcode::Return);
    });
    match result {
        Err(RunError::Resource(err)) => assert_eq!(err, ResourceError::StackOverflow { limit: 8 }),
        other => panic!("expected Resource error, got: {other:?}"),
    }
    assert!(vm.failed());
}

#[test]
fn stack_limit_not_exceeded() {
    let config = VmConfig::new().limits(VmLimits::new().max_stack(8));
    let (_, result) = eval_config(config, |code| {
        // the entry frame's callee slot takes one place
        for n in 0..7 {
            code.emit_const(f64::from(n));
        }
        code.emit_u8(Opcode::MakeArray, 7).emit(Opcode::Return);
    });
    assert!(result.is_ok(), "should not exceed stack limit: {result:?}");
}

#[test]
fn default_limits_allow_deep_recursion() {
    // countdown(100) recurses 100 frames deep
    let (_, result) = eval_config(VmConfig::new(), |code| {
        let countdown = function("countdown", 1, |body| {
            body.emit_u8(Opcode::GetLocal, 1);
            let done = body.emit_jump(Opcode::JumpIfFalse);
            body.emit(Opcode::Pop);
            body.emit_u8(Opcode::GetLocal, 1).emit(Opcode::Decrement);
            body.emit_name(Opcode::GetGlobal, "countdown");
            call(body, 1);
            body.emit(Opcode::Return);
            body.patch_jump(done);
            body.emit(Opcode::Return);
        });
        closure(code, countdown, 0, &[]);
        define_global(code, "countdown");
        code.emit(Opcode::Pop);
        code.emit_const(100.0).emit_name(Opcode::GetGlobal, "countdown");
        call(code, 1);
        code.emit(Opcode::Return);
    });
    assert_eq!(result.unwrap(), pizza::Value::Number(0.0));
}
