//! Call dispatch: argument reconciliation, frame setup, returns, operator overloads and
//! async spawns.

use std::sync::Arc;

use indexmap::IndexMap;

use super::{CallFrame, Flow, MemoState, VM};
use crate::{
    exception::{ErrorKind, RunError, RunResult, TraceEntry},
    function::Closure,
    memo::MemoKey,
    resource::ResourceError,
    types::Instance,
    value::{ResultValue, Value},
    var::Var,
};

/// Keyword arguments of one call, in the order they were passed.
pub(crate) type Kwargs = IndexMap<Arc<str>, Value>;

impl VM {
    /// `Call`: gathers the arguments, expands spreads and dispatches on the callee.
    ///
    /// Leaves `[callee][args...]` on the stack for the callee to consume.
    pub(super) fn call(&mut self) -> RunResult<()> {
        let argc = usize::from(self.fetch_u8()?);
        let kwargc = usize::from(self.fetch_u8()?);
        let mut names = Vec::with_capacity(kwargc);
        for _ in 0..kwargc {
            names.push(self.fetch_name()?);
        }

        let callee = self.pop()?;
        let kwargs: Kwargs = names.into_iter().zip(self.pop_n(kwargc)?).collect();
        let mut args = Vec::with_capacity(argc);
        for arg in self.pop_n(argc)? {
            match arg {
                Value::Spread(items) => args.extend(items.iter().cloned()),
                other => args.push(other),
            }
        }

        self.push(callee.clone())?;
        for arg in &args {
            self.push(arg.clone())?;
        }
        self.call_value(callee, args, kwargs)
    }

    /// `Spread`: marks a list for expansion into the next call's arguments.
    pub(super) fn spread(&mut self) -> RunResult<()> {
        match self.pop()? {
            Value::List(list) => {
                let items: Arc<[Value]> = list.read().iter().cloned().collect();
                self.push(Value::Spread(items))
            }
            other => Err(ErrorKind::Type
                .error(format!("Can only spread lists, not {}", other.type_name()))
                .into()),
        }
    }

    /// Calls `callee`, which sits below `args` on the stack.
    pub(crate) fn call_value(&mut self, callee: Value, args: Vec<Value>, kwargs: Kwargs) -> RunResult<()> {
        let callee_slot = self.stack.len() - args.len() - 1;
        match callee {
            Value::Native(native) => {
                if !kwargs.is_empty() {
                    return Err(ErrorKind::ArgumentCount.error("Unexpected keyword arguments").into());
                }
                let result = native.call(&args)?;
                self.stack.truncate(callee_slot);
                self.push(result)
            }
            Value::Closure(closure) => {
                let bound = self.frames.last().and_then(|frame| frame.bound.clone());
                self.call_closure(closure, bound, args, kwargs, false)
            }
            Value::Class(class) => {
                let receiver = Value::Instance(Arc::new(Instance::new(Arc::clone(&class))));
                match class.constructor() {
                    Some(constructor) => {
                        self.stack[callee_slot] = Value::Cell(Var::constant(receiver.clone()));
                        self.call_closure(constructor, Some(receiver), args, kwargs, true)
                    }
                    None if args.is_empty() => {
                        self.stack.truncate(callee_slot);
                        self.push(receiver)
                    }
                    None => Err(ErrorKind::ArgumentCount
                        .error(format!("Expected 0 but got {}", args.len()))
                        .into()),
                }
            }
            Value::BoundMethod(method) => {
                self.stack[callee_slot] = Value::Cell(Var::constant(method.receiver.clone()));
                let closure = Arc::clone(&method.closure);
                self.call_closure(closure, Some(method.receiver.clone()), args, kwargs, false)
            }
            Value::EnumVariant(variant) => {
                let value = variant.construct(args)?;
                self.stack.truncate(callee_slot);
                self.push(value)
            }
            _ => Err(ErrorKind::Type.error("Can only call functions and classes").into()),
        }
    }

    /// Enters `closure` with `[callee][args...]` on the stack.
    ///
    /// Missing arguments are filled from defaults, extras go to the variadic list, and the
    /// keyword map is pushed when the function takes one. Async functions are spawned
    /// instead of entered; the caller gets `null`.
    pub(crate) fn call_closure(
        &mut self,
        closure: Arc<Closure>,
        bound: Option<Value>,
        args: Vec<Value>,
        kwargs: Kwargs,
        is_constructor: bool,
    ) -> RunResult<()> {
        let function = Arc::clone(&closure.function);
        let argc = args.len();

        let memo_active = self.frames.last().is_some_and(|frame| frame.memo.is_active());
        let staged = if memo_active && !function.is_async {
            let key_args: Vec<Value> = bound.iter().cloned().chain(args.iter().cloned()).collect();
            let key = MemoKey::new(&closure, &key_args);
            let cached = self.runtime.memo().lock().get(&key);
            if let Some(value) = cached {
                log::trace!("memo hit for {}", key.name());
                self.stack.truncate(self.stack.len() - argc - 1);
                return self.push(value);
            }
            Some(key)
        } else {
            None
        };

        let arity = function.arity;
        if argc < arity {
            if (argc..arity).any(|index| closure.default_for(index).is_none()) {
                return Err(arity_error(arity, argc));
            }
            for index in argc..arity {
                if let Some(default) = closure.default_for(index) {
                    self.push(default.clone())?;
                }
            }
        }
        if function.variadic {
            let extras = if argc > arity { self.pop_n(argc - arity)? } else { Vec::new() };
            self.push(Value::list(extras))?;
        } else if argc > arity {
            return Err(arity_error(arity, argc));
        }
        if function.takes_kwargs {
            self.push(Value::map(kwargs.into_iter().map(|(name, value)| (Value::Text(name), value))))?;
        } else if !kwargs.is_empty() {
            return Err(ErrorKind::ArgumentCount.error("Unexpected keyword arguments").into());
        }

        if function.is_async {
            let mut params = self.pop_n(function.total_arity() + 1)?;
            params.remove(0);
            self.spawn_async(&closure, bound, params)?;
            return self.push(Value::Null);
        }

        let limit = self.config.limits.frame_limit();
        if self.frames.len() >= limit {
            return Err(ResourceError::FrameOverflow { limit }.into());
        }
        let trace = self.call_site_trace(closure.name());
        let frame = CallFrame {
            slots: self.stack.len() - function.total_arity() - 1,
            ip: 0,
            op_start: 0,
            bound,
            catch_errors: function.catcher,
            memo: staged.map_or(MemoState::Off, MemoState::Committing),
            is_constructor,
            trace,
            loop_base: self.loop_cache.len(),
            closure,
        };
        self.frames.push(frame);
        Ok(())
    }

    /// Runs the bin method `name` of `receiver` with `args`, leaving its result on the stack.
    ///
    /// Returns false, touching nothing, when `receiver` is not an instance with that method.
    pub(super) fn call_overload(&mut self, receiver: &Value, name: &str, args: Vec<Value>) -> RunResult<bool> {
        let Some(method) = receiver.as_instance().and_then(|instance| instance.bin_method(name)) else {
            return Ok(false);
        };
        self.push(Value::Cell(Var::constant(receiver.clone())))?;
        for arg in &args {
            self.push(arg.clone())?;
        }
        let depth = self.frames.len();
        self.call_closure(method, Some(receiver.clone()), args, Kwargs::new(), false)?;
        if self.frames.len() > depth {
            self.execute(depth)?;
        }
        Ok(true)
    }

    /// `Return`: pops the current frame and hands its result to the caller.
    pub(super) fn return_value(&mut self, exit_level: usize) -> RunResult<Flow> {
        let result = self.pop()?;
        let frame = self
            .frames
            .pop()
            .ok_or_else(|| RunError::internal("return without a frame"))?;
        let result = if frame.is_constructor {
            frame.bound.clone().unwrap_or(result)
        } else if frame.catch_errors {
            Value::Result(Arc::new(ResultValue::Ok(result)))
        } else {
            result
        };
        self.finish_frame(frame, result, exit_level)
    }

    /// Discards a popped frame's slots, commits its memo entry and pushes its result.
    pub(super) fn finish_frame(&mut self, frame: CallFrame, result: Value, exit_level: usize) -> RunResult<Flow> {
        self.stack.truncate(frame.slots);
        self.loop_cache.truncate(frame.loop_base);
        if let MemoState::Committing(key) = frame.memo {
            self.runtime.memo().lock().store(key, result.clone());
        }
        self.push(result)?;
        Ok(if self.frames.len() <= exit_level {
            Flow::Exit
        } else {
            Flow::Continue
        })
    }

    /// Traceback entry for a call to `context` made from the current instruction.
    ///
    /// `None` when this VM is not traced.
    pub(super) fn call_site_trace(&self, context: &Arc<str>) -> Option<TraceEntry> {
        let root = self.root_trace.as_ref()?;
        let frame = self.frames.last()?;
        Some(TraceEntry::new(
            Arc::clone(&root.file),
            Arc::clone(context),
            Arc::clone(frame.chunk()),
            frame.op_start,
        ))
    }

    /// Runs an async call on its own VM and thread.
    ///
    /// The new VM gets fresh globals, a private copy of the prototype and the caller's
    /// captured cells. It runs in safe mode, so a failure is logged as a warning on that
    /// thread. The handle is kept for [`VM::join_async`].
    fn spawn_async(&mut self, closure: &Arc<Closure>, bound: Option<Value>, args: Vec<Value>) -> RunResult<()> {
        let copy = Arc::new(Closure::with_parts(
            Arc::new(closure.function.copy()),
            Arc::clone(closure.name()),
            Vec::new(),
            closure.upvalues(),
        ));
        let runtime = Arc::clone(&self.runtime);
        let config = self.config.clone().safe(true);
        let trace = self.call_site_trace(closure.name());
        let handle = std::thread::Builder::new()
            .name(format!("pizza-async-{}", closure.name()))
            .spawn(move || {
                let mut vm = Self::for_call(runtime, config, copy, bound, args);
                vm.root_trace = trace;
                vm.run()
            })
            .map_err(|err| RunError::internal(format!("failed to spawn async call: {err}")))?;
        log::debug!("spawned async call to {}", closure.name());
        self.tasks.push(handle);
        Ok(())
    }
}

fn arity_error(arity: usize, argc: usize) -> RunError {
    ErrorKind::ArgumentCount
        .error(format!("Expected {arity} but got {argc}"))
        .into()
}
