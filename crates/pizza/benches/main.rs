use std::sync::Arc;

use criterion::{Bencher, Criterion, black_box, criterion_group, criterion_main};
use pizza::{CodeBuilder, Function, HeaderCommand, Opcode, Runtime, UpvalueKind, VM, Value};

fn assemble(name: &str, arity: usize, body: impl FnOnce(&mut CodeBuilder)) -> Function {
    let mut code = CodeBuilder::new();
    body(&mut code);
    Function::new(name, code.build("")).arity(arity)
}

/// `fib(n)`, recursing through a self-referencing upvalue.
fn fib(memoize: bool) -> Function {
    let fib = assemble("fib", 1, |code| {
        if memoize {
            code.emit(Opcode::Header).u8(HeaderCommand::Memoize as u8).u8(0);
            code.emit(Opcode::Pop);
        }
        code.emit_u8(Opcode::GetLocal, 1).emit_const(2.0).emit(Opcode::LessThan);
        let recurse = code.emit_jump(Opcode::JumpIfFalse);
        code.emit(Opcode::Pop).emit_u8(Opcode::GetLocal, 1).emit(Opcode::Return);
        code.patch_jump(recurse);
        code.emit(Opcode::Pop);
        for back in [1.0, 2.0] {
            code.emit_u8(Opcode::GetLocal, 1).emit_const(back).emit(Opcode::Subtract);
            code.emit_u8(Opcode::GetUpvalue, 0);
            code.emit(Opcode::Call).u8(1).u8(0);
        }
        code.emit(Opcode::Add).emit(Opcode::Return);
    })
    .upvalues(1);
    let fib = Arc::new(fib);
    assemble("<script>", 0, move |code| {
        let name = code.name("fib");
        code.emit_const(25.0);
        let index = code.add_const(Value::Func(fib));
        code.emit_u16(Opcode::Closure, index).u8(0);
        code.u8(UpvalueKind::Global as u8).u16(name);
        code.emit(Opcode::Call).u8(1).u8(0);
        code.emit(Opcode::Return);
    })
}

/// Sums 0..100_000 with a numeric `For` loop.
fn sum_loop() -> Function {
    assemble("<script>", 0, |code| {
        // slot 1: counter, slot 2: total
        code.emit_const(0.0).emit(Opcode::DefineLocal).u8(0).u8(0).emit(Opcode::Pop);
        code.emit_const(0.0).emit(Opcode::DefineLocal).u8(0).u8(0).emit(Opcode::Pop);
        let start = code.current_offset();
        code.emit_const(100_000.0).emit_const(1.0);
        // body: GetLocal(2) GetLocal(2) Add(1) SetLocal(2) Pop(1) Loop(3)
        code.emit(Opcode::For).u8(1).u16(11);
        code.emit_u8(Opcode::GetLocal, 2).emit_u8(Opcode::GetLocal, 1).emit(Opcode::Add);
        code.emit_u8(Opcode::SetLocal, 2).emit(Opcode::Pop);
        code.emit_loop(start);
        code.emit_u8(Opcode::GetLocal, 2).emit(Opcode::Return);
    })
}

/// Benchmarks assembling and running `program`. Each run gets a fresh runtime so memo
/// entries never carry over between iterations.
fn run_pizza(bench: &mut Bencher, program: impl Fn() -> Function, expected: f64) {
    let result = VM::new(Runtime::empty(), program()).run().unwrap();
    assert_eq!(result, Value::Number(expected));

    bench.iter(|| {
        let result = VM::new(Runtime::empty(), program()).run().unwrap();
        black_box(result);
    });
}

fn criterion_benchmark(c: &mut Criterion) {
    c.bench_function("fib__naive", |b| run_pizza(b, || fib(false), 75_025.0));
    c.bench_function("fib__memoized", |b| run_pizza(b, || fib(true), 75_025.0));
    c.bench_function("sum_loop", |b| run_pizza(b, sum_loop, 4_999_950_000.0));
}

criterion_group!(benches, criterion_benchmark);
criterion_main!(benches);
