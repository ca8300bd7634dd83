//! Bytecode virtual machine.
//!
//! The VM uses a stack-based execution model with a bounded operand stack shared by all
//! frames and a bounded call stack. Each frame owns its instruction pointer.
//!
//! The run loop is reentrant: operator overloads and imports run nested loops on the same
//! stacks, each parameterized by the frame depth it must return to (its exit level).

mod binary;
mod call;
mod collections;
mod compare;
mod exceptions;
mod objects;
mod scope;

use std::sync::Arc;

use ahash::AHashMap;

use crate::{
    bytecode::{code::Chunk, op::Opcode},
    exception::{ErrorKind, RunError, RunResult, RuntimeError, TraceEntry},
    function::{Closure, Function},
    memo::MemoKey,
    resource::{ResourceError, VmLimits},
    run::AsyncTasks,
    runtime::Runtime,
    value::{Reference, Value},
    var::Var,
};

/// Configuration of one VM instance.
#[derive(Debug, Clone, Default)]
pub struct VmConfig {
    pub limits: VmLimits,
    /// Report uncaught errors as warnings and unwind only to the entry frame, instead of
    /// logging a failure and resetting the whole VM.
    pub safe: bool,
}

impl VmConfig {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn limits(mut self, limits: VmLimits) -> Self {
        self.limits = limits;
        self
    }

    #[must_use]
    pub fn safe(mut self, safe: bool) -> Self {
        self.safe = safe;
        self
    }
}

/// Result of executing one instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Flow {
    Continue,
    /// The frame stack has returned to the current run's exit level.
    Exit,
}

/// Memoization state of a frame.
#[derive(Debug, Clone)]
pub(crate) enum MemoState {
    Off,
    /// A `Memoize` header ran in this frame: calls it makes are looked up and cached.
    Armed,
    /// This frame's own result is stored under the key when it returns. Calls it makes are
    /// memoized as well.
    Committing(MemoKey),
}

impl MemoState {
    fn is_active(&self) -> bool {
        !matches!(self, Self::Off)
    }
}

/// A single function activation record.
#[derive(Debug)]
pub(crate) struct CallFrame {
    closure: Arc<Closure>,

    /// Instruction pointer within this frame's bytecode.
    ip: usize,

    /// Offset of the instruction being executed, for error positions.
    op_start: usize,

    /// Index of the frame's first stack slot (the callee or receiver cell).
    slots: usize,

    /// Receiver that attribute access and bound-member lookup resolve against.
    bound: Option<Value>,

    /// Errors are turned into a result value when they reach this frame.
    catch_errors: bool,

    memo: MemoState,

    /// Returning yields the receiver instead of the body's value.
    is_constructor: bool,

    /// Where this frame was called from. `None` for entry frames.
    trace: Option<TraceEntry>,

    /// Depth of the loop accumulator stack when the frame was entered.
    loop_base: usize,
}

impl CallFrame {
    fn chunk(&self) -> &Arc<Chunk> {
        &self.closure.function.chunk
    }
}

// ============================================================================
// Virtual Machine
// ============================================================================

/// The bytecode virtual machine.
///
/// One VM runs one logical thread of control. Async calls get their own VM on another
/// thread, sharing only the [`Runtime`] and the compiled chunks.
pub struct VM {
    pub(crate) runtime: Arc<Runtime>,
    pub(crate) config: VmConfig,

    /// Operand stack - values being computed.
    pub(crate) stack: Vec<Value>,

    /// Call stack - function frames (each frame has its own IP).
    pub(crate) frames: Vec<CallFrame>,

    pub(crate) globals: AHashMap<Arc<str>, Var>,

    /// Accumulators of collecting loops, innermost last.
    pub(crate) loop_cache: Vec<Vec<Value>>,

    /// File name and entry context set by [`VM::trace`]. Untraced VMs report flat errors.
    pub(crate) root_trace: Option<TraceEntry>,

    /// Simulation mode records errors silently; used by `Runtime::simulate`.
    pub(crate) simulation: bool,

    pub(crate) failed: bool,
    pub(crate) last_error: Option<RuntimeError>,

    /// Directives set by `Header` instructions.
    pub(crate) exports: Option<Vec<Arc<str>>>,
    pub(crate) main_function: Option<Arc<str>>,
    pub(crate) main_class: Option<Arc<str>>,

    /// Threads running this VM's async calls.
    pub(crate) tasks: AsyncTasks,
}

impl VM {
    /// Creates a VM that will run `function` as its entry point, with default configuration.
    pub fn new(runtime: Arc<Runtime>, function: Function) -> Self {
        Self::with_config(runtime, function, VmConfig::default())
    }

    pub fn with_config(runtime: Arc<Runtime>, function: Function, config: VmConfig) -> Self {
        let closure = Arc::new(Closure::new(Arc::new(function)));
        Self::for_call(runtime, config, closure, None, Vec::new())
    }

    /// Creates a VM whose entry frame calls `closure` with already reconciled arguments.
    ///
    /// The VM starts with fresh globals built from the runtime.
    pub(crate) fn for_call(
        runtime: Arc<Runtime>,
        config: VmConfig,
        closure: Arc<Closure>,
        bound: Option<Value>,
        args: Vec<Value>,
    ) -> Self {
        let globals = runtime.global_bindings();
        let mut stack = Vec::with_capacity(args.len() + 1);
        stack.push(match &bound {
            Some(receiver) => Value::Cell(Var::constant(receiver.clone())),
            None => Value::Closure(Arc::clone(&closure)),
        });
        stack.extend(args);
        let catch_errors = closure.function.catcher;
        let frame = CallFrame {
            closure,
            ip: 0,
            op_start: 0,
            slots: 0,
            bound,
            catch_errors,
            memo: MemoState::Off,
            is_constructor: false,
            trace: None,
            loop_base: 0,
        };
        log::debug!("creating VM for {}", frame.closure.name());
        Self {
            runtime,
            config,
            stack,
            frames: vec![frame],
            globals,
            loop_cache: Vec::new(),
            root_trace: None,
            simulation: false,
            failed: false,
            last_error: None,
            exports: None,
            main_function: None,
            main_class: None,
            tasks: Vec::new(),
        }
    }

    /// Enables tracebacks, naming the file (or module) being run.
    #[must_use]
    pub fn trace(mut self, name: impl Into<Arc<str>>) -> Self {
        let name = name.into();
        if let Some(frame) = self.frames.first() {
            self.root_trace = Some(TraceEntry::new(
                Arc::clone(&name),
                name,
                Arc::clone(frame.chunk()),
                0,
            ));
        }
        self
    }

    pub(crate) fn simulated(mut self) -> Self {
        self.simulation = true;
        self
    }

    /// Current value of a global.
    #[must_use]
    pub fn global(&self, name: &str) -> Option<Value> {
        self.globals.get(name).map(Var::get)
    }

    /// True once an error has escaped a run.
    #[must_use]
    pub fn failed(&self) -> bool {
        self.failed
    }

    /// The most recent error raised in this VM, caught or not.
    #[must_use]
    pub fn last_error(&self) -> Option<&RuntimeError> {
        self.last_error.as_ref()
    }

    #[must_use]
    pub fn runtime(&self) -> &Arc<Runtime> {
        &self.runtime
    }

    // ========================================================================
    // Run Loop
    // ========================================================================

    /// Runs instructions until the frame stack returns to `exit_level`.
    ///
    /// Runtime errors are offered to catcher frames at or above `exit_level`; one that is
    /// not caught there unwinds those frames and is returned to the caller, which is either
    /// the instruction that started this nested run or the host.
    pub(crate) fn execute(&mut self, exit_level: usize) -> RunResult<()> {
        loop {
            let flow = match self.step(exit_level) {
                Ok(flow) => flow,
                Err(RunError::Runtime(raised)) => self.handle_error(raised, exit_level)?,
                Err(fatal) => return Err(fatal),
            };
            if flow == Flow::Exit {
                return Ok(());
            }
        }
    }

    /// Decodes and executes one instruction.
    fn step(&mut self, exit_level: usize) -> RunResult<Flow> {
        let frame = self.frame_mut()?;
        frame.op_start = frame.ip;
        if log::log_enabled!(log::Level::Trace) {
            let (listing, _) = frame.chunk().disassemble_instruction(frame.ip);
            log::trace!("[{}] {listing}", frame.closure.name());
        }
        let byte = self.fetch_u8()?;
        let op = Opcode::try_from(byte).map_err(|err| RunError::internal(err.to_string()))?;

        match op {
            // === Stack Operations ===
            Opcode::Constant => {
                let value = self.fetch_constant()?;
                self.push(value)?;
            }
            Opcode::Null => self.push(Value::Null)?,
            Opcode::Pop => {
                self.pop()?;
            }
            Opcode::Copy => {
                let value = self.pop()?;
                self.push(value.shallow_copy())?;
            }
            Opcode::Spread => self.spread()?,

            // === Arithmetic ===
            Opcode::Add
            | Opcode::Subtract
            | Opcode::Multiply
            | Opcode::Divide
            | Opcode::Modulo
            | Opcode::Power => self.binary(op)?,
            Opcode::Increment | Opcode::Decrement | Opcode::Negate | Opcode::Not => self.unary(op)?,

            // === Comparison ===
            Opcode::Equal
            | Opcode::LessThan
            | Opcode::LessEqual
            | Opcode::GreaterThan
            | Opcode::GreaterEqual => self.compare(op)?,

            // === Bitwise ===
            Opcode::BitAnd
            | Opcode::BitOr
            | Opcode::BitXor
            | Opcode::LeftShift
            | Opcode::RightShift
            | Opcode::SignRightShift => self.bit_op(op)?,
            Opcode::BitCompl => self.bit_compl()?,

            // === Variables ===
            Opcode::DefineGlobal => self.define_global()?,
            Opcode::GetGlobal => self.get_global()?,
            Opcode::SetGlobal => self.set_global()?,
            Opcode::DropGlobal => self.drop_global()?,
            Opcode::DefineLocal => self.define_local()?,
            Opcode::GetLocal => self.get_local()?,
            Opcode::SetLocal => self.set_local()?,
            Opcode::MakeVar => self.make_var()?,
            Opcode::DropLocal => self.drop_local()?,
            Opcode::GetUpvalue => self.get_upvalue()?,
            Opcode::SetUpvalue => self.set_upvalue()?,
            Opcode::DropUpvalue => {
                let slot = self.fetch_u8()?;
                self.frame()?.closure.drop_upvalue(usize::from(slot));
            }

            // === Members ===
            Opcode::GetAttr => self.get_attr()?,
            Opcode::SetAttr => self.set_attr()?,
            Opcode::Access => self.access()?,
            Opcode::Get => self.index("get")?,
            Opcode::Index => self.index("bracket")?,

            // === Control Flow ===
            Opcode::Jump => {
                let offset = self.fetch_u16()?;
                self.jump_forward(offset)?;
            }
            Opcode::JumpIfFalse => {
                let offset = self.fetch_u16()?;
                if !self.peek(0)?.is_truthy() {
                    self.jump_forward(offset)?;
                }
            }
            Opcode::JumpIfTrue => {
                let offset = self.fetch_u16()?;
                if self.peek(0)?.is_truthy() {
                    self.jump_forward(offset)?;
                }
            }
            Opcode::Loop => {
                let offset = self.fetch_u16()?;
                self.jump_back(offset)?;
            }
            Opcode::For => self.for_step()?,
            Opcode::Iter => self.iter_step()?,
            Opcode::StartCache => self.loop_cache.push(Vec::new()),
            Opcode::CollectLoop => {
                let value = self.pop()?;
                self.loop_cache
                    .last_mut()
                    .ok_or_else(|| RunError::internal("CollectLoop without StartCache"))?
                    .push(value);
            }
            Opcode::FlushLoop => {
                let items = self
                    .loop_cache
                    .pop()
                    .ok_or_else(|| RunError::internal("FlushLoop without StartCache"))?;
                self.push(Value::list(items))?;
            }

            // === Functions ===
            Opcode::Call => self.call()?,
            Opcode::Closure => self.make_closure()?,
            Opcode::Return => return self.return_value(exit_level),

            // === Collections ===
            Opcode::MakeArray => self.make_array()?,
            Opcode::MakeMap => self.make_map()?,

            // === References ===
            Opcode::Ref => {
                let value = self.pop()?;
                self.push(Value::Reference(Reference::new(value)))?;
            }
            Opcode::Deref => match self.pop()? {
                Value::Reference(reference) => self.push(reference.get())?,
                _ => return Err(ErrorKind::Type.error("Can't dereference non-ref").into()),
            },
            Opcode::SetRef => match self.pop()? {
                Value::Reference(reference) => {
                    let value = self.pop()?;
                    reference.set(value.clone());
                    self.push(value)?;
                }
                _ => return Err(ErrorKind::Type.error("Can't set non-ref").into()),
            },
            Opcode::Chain => {
                let fallback = self.pop()?;
                let value = self.pop()?;
                self.push(if value.is_null() { fallback } else { value })?;
            }

            // === Bytes ===
            Opcode::ToBytes => self.to_bytes()?,
            Opcode::FromBytes => self.from_bytes()?,

            // === Classes, Enums, Patterns ===
            Opcode::Class => self.make_class()?,
            Opcode::Method => self.add_method()?,
            Opcode::Enum => self.define_enum()?,
            Opcode::Pattern => self.make_pattern()?,
            Opcode::PatternVars => {
                let name = self.fetch_name()?;
                self.push(Value::PatternBinding(name))?;
            }

            // === Errors ===
            Opcode::Throw => {
                let kind = self.pop()?;
                let reason = self.pop()?;
                return Err(RuntimeError::new(kind.to_string(), reason.to_string()).into());
            }
            Opcode::Assert => {
                let value = self.pop()?;
                if !value.is_truthy() {
                    return Err(ErrorKind::Assertion.error("Assertion failed").into());
                }
                self.push(value)?;
            }

            // === Modules ===
            Opcode::Import => self.import()?,
            Opcode::Destruct => self.destruct()?,
            Opcode::Header => self.header()?,
        }
        Ok(Flow::Continue)
    }

    // ========================================================================
    // Operand Fetching
    // ========================================================================

    fn frame(&self) -> RunResult<&CallFrame> {
        self.frames.last().ok_or_else(|| RunError::internal("no active frame"))
    }

    fn frame_mut(&mut self) -> RunResult<&mut CallFrame> {
        self.frames.last_mut().ok_or_else(|| RunError::internal("no active frame"))
    }

    fn fetch_u8(&mut self) -> RunResult<u8> {
        let frame = self.frame_mut()?;
        let byte = frame
            .chunk()
            .bytecode()
            .get(frame.ip)
            .copied()
            .ok_or_else(|| RunError::internal("instruction pointer ran past the end of the bytecode"))?;
        frame.ip += 1;
        Ok(byte)
    }

    /// Fetches a u16 operand (little-endian).
    fn fetch_u16(&mut self) -> RunResult<u16> {
        let lo = self.fetch_u8()?;
        let hi = self.fetch_u8()?;
        Ok(u16::from_le_bytes([lo, hi]))
    }

    fn fetch_flag(&mut self) -> RunResult<bool> {
        Ok(self.fetch_u8()? == 1)
    }

    fn fetch_constant(&mut self) -> RunResult<Value> {
        let index = usize::from(self.fetch_u16()?);
        self.frame()?
            .chunk()
            .constant(index)
            .cloned()
            .ok_or_else(|| RunError::internal(format!("constant index {index} out of range")))
    }

    fn fetch_name(&mut self) -> RunResult<Arc<str>> {
        match self.fetch_constant()? {
            Value::Text(name) => Ok(name),
            other => Err(RunError::internal(format!(
                "expected a name constant, found {}",
                other.type_name()
            ))),
        }
    }

    fn jump_forward(&mut self, offset: u16) -> RunResult<()> {
        let frame = self.frame_mut()?;
        frame.ip += usize::from(offset);
        Ok(())
    }

    fn jump_back(&mut self, offset: u16) -> RunResult<()> {
        let frame = self.frame_mut()?;
        frame.ip = frame
            .ip
            .checked_sub(usize::from(offset))
            .ok_or_else(|| RunError::internal("loop jumped before the start of the bytecode"))?;
        Ok(())
    }

    // ========================================================================
    // Stack Operations
    // ========================================================================

    /// Pushes a value onto the operand stack.
    pub(crate) fn push(&mut self, value: Value) -> RunResult<()> {
        let limit = self.config.limits.stack_limit();
        if self.stack.len() >= limit {
            return Err(ResourceError::StackOverflow { limit }.into());
        }
        self.stack.push(value);
        Ok(())
    }

    /// Lowest stack length the current frame may pop down to: its callee slot stays.
    fn stack_floor(&self) -> usize {
        self.frames.last().map_or(0, |frame| frame.slots + 1)
    }

    /// Pops and returns the top value from the operand stack.
    pub(crate) fn pop(&mut self) -> RunResult<Value> {
        if self.stack.len() <= self.stack_floor() {
            return Err(RunError::internal("stack underflow"));
        }
        self.stack.pop().ok_or_else(|| RunError::internal("stack underflow"))
    }

    /// Pops `n` values, returned in push order.
    fn pop_n(&mut self, n: usize) -> RunResult<Vec<Value>> {
        let len = self.stack.len();
        if len < self.stack_floor() + n {
            return Err(RunError::internal("stack underflow"));
        }
        Ok(self.stack.split_off(len - n))
    }

    /// Returns a reference to the value `offset` places below the top.
    fn peek(&self, offset: usize) -> RunResult<&Value> {
        self.stack
            .len()
            .checked_sub(offset + 1)
            .and_then(|index| self.stack.get(index))
            .ok_or_else(|| RunError::internal("stack underflow"))
    }

    /// Absolute stack index of local `slot` in the current frame.
    fn slot_index(&self, slot: u8) -> RunResult<usize> {
        Ok(self.frame()?.slots + usize::from(slot))
    }

    /// Clears the operand stack and all frames.
    pub(crate) fn reset_stack(&mut self) {
        self.stack.clear();
        self.frames.clear();
        self.loop_cache.clear();
    }
}
