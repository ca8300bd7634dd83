//! Opcode definitions for the bytecode VM.
//!
//! Bytecode is stored as raw `Vec<u8>`. The `Opcode` enum is a pure discriminant with no
//! data; operands are fetched separately from the byte stream.
//!
//! # Operand Encoding
//!
//! - Constant and name indices: u16, little-endian. Names are `Text` constants.
//! - Local slots, upvalue slots and counts: u8.
//! - Jump offsets: u16, forward for `Jump*`, `For` and `Iter`, backward for `Loop`. Offsets
//!   are measured from the end of the instruction.
//! - Compound instructions (`Call`, `Closure`, `Class`, `Pattern`...) list their operands
//!   in the variant docs.

use strum::FromRepr;

/// Opcode discriminant - just identifies the instruction type.
///
/// With `#[repr(u8)]`, each opcode is exactly 1 byte. Uses `strum::FromRepr` for
/// byte-to-opcode conversion.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromRepr)]
pub enum Opcode {
    // === Stack Operations ===
    /// Push constant from pool. Operand: u16 const_id.
    Constant,
    /// Push null.
    Null,
    /// Discard top of stack.
    Pop,
    /// Replace TOS with a shallow copy (lists and maps get a new backing store).
    Copy,
    /// Replace a list on TOS with a spread marker, expanded by the next `Call`.
    Spread,

    // === Arithmetic (overloadable via bin methods) ===
    /// a + b. Texts and lists concatenate. Overload: `add`.
    Add,
    /// a - b. Overload: `sub`.
    Subtract,
    /// a * b. Texts and lists repeat. Overload: `mul`.
    Multiply,
    /// a / b. A list removes the first occurrence of b. Overload: `div`.
    Divide,
    /// a % b. Overload: `mod`.
    Modulo,
    /// a ^ b. Overload: `fastpow`.
    Power,

    // === Unary ===
    Increment,
    Decrement,
    Negate,
    /// Logical not of TOS's truthiness.
    Not,

    // === Comparison ===
    /// a == b. A pattern on the right matches instead. Overload: `eq` on a, then on b.
    Equal,
    /// a < b. Overload: `lt` on a.
    LessThan,
    /// a <= b. Overload: `lte` on a.
    LessEqual,
    /// a > b. Overload: `lt` on b, called with a.
    GreaterThan,
    /// a >= b. Overload: `lte` on b, called with a.
    GreaterEqual,

    // === Bitwise ===
    BitAnd,
    BitOr,
    BitXor,
    LeftShift,
    /// Logical (zero-filling) right shift.
    RightShift,
    /// Arithmetic (sign-preserving) right shift.
    SignRightShift,
    /// Bitwise complement of TOS.
    BitCompl,

    // === Globals ===
    /// Bind TOS (not popped) to a new global.
    /// Operands: u16 name, u8 constant, u8 ranged, then if ranged u16 min const + u16 max const.
    DefineGlobal,
    /// Push a global's value, falling back to the bound receiver's members. Operand: u16 name.
    GetGlobal,
    /// Assign TOS (not popped) to the bound receiver's member or else the global.
    /// Operand: u16 name.
    SetGlobal,
    /// Remove a global. Operand: u16 name.
    DropGlobal,

    // === Locals ===
    /// Pop a value, push a new cell holding it, then push the value again.
    /// Operands: u8 constant, u8 ranged, then if ranged u16 min const + u16 max const.
    DefineLocal,
    /// Push the value of a local. Operand: u8 slot.
    GetLocal,
    /// Assign TOS (not popped) to a local cell. Operand: u8 slot.
    SetLocal,
    /// Wrap the raw value in a local slot into a cell. Operands: u8 slot, u8 constant.
    MakeVar,
    /// Clear a local slot. Operand: u8 slot.
    DropLocal,

    // === Upvalues ===
    /// Push a captured variable's value. Operand: u8 slot.
    GetUpvalue,
    /// Assign TOS (not popped) to a captured variable. Operand: u8 slot.
    SetUpvalue,
    /// Forget a captured variable. Operand: u8 slot.
    DropUpvalue,

    // === Members ===
    /// Push a member of the frame's bound receiver. Operand: u16 name.
    GetAttr,
    /// Pop a value into a member of the bound receiver, push null. Operand: u16 name.
    SetAttr,
    /// Pop an object, push its member. Methods come back bound. Operand: u16 name.
    /// Overload: `access`.
    Access,
    /// collection[index], popping index then collection. Overload: `get`.
    Get,
    /// Same as `Get` for bracket syntax. Overload: `bracket`.
    Index,

    // === Control Flow ===
    /// Unconditional forward jump. Operand: u16 offset.
    Jump,
    /// Jump if TOS is falsy; TOS stays on the stack. Operand: u16 offset.
    JumpIfFalse,
    /// Jump if TOS is truthy; TOS stays on the stack. Operand: u16 offset.
    JumpIfTrue,
    /// Backward jump. Operand: u16 offset.
    Loop,
    /// Numeric loop step: pops step then end, adds step to the loop cell and jumps out once
    /// the end is passed. Operands: u8 slot, u16 exit offset.
    For,
    /// Moves the next element of a list local into the loop variable, or jumps out when the
    /// list is empty. Operands: u8 list slot, u8 variable slot, u16 exit offset.
    Iter,
    /// Push a new accumulator for a collecting loop.
    StartCache,
    /// Pop TOS into the innermost accumulator.
    CollectLoop,
    /// Pop the innermost accumulator and push it as a list.
    FlushLoop,

    // === Functions ===
    /// Call the callee on TOS. Stack: `[args...][kwarg values...][callee]`.
    /// Operands: u8 argc, u8 kwargc, then kwargc u16 names in push order.
    Call,
    /// Build a closure from a prototype constant, popping default values.
    /// Operands: u16 function const, u8 default count, then per upvalue u8 kind + u16 index
    /// (see [`UpvalueKind`]).
    Closure,
    /// Return TOS from the current frame.
    Return,

    // === Collections ===
    /// Pop count values into a list, keeping push order. Operand: u8 count.
    MakeArray,
    /// Pop count key/value pairs (key pushed first) into a map. Operand: u8 count.
    MakeMap,

    // === References ===
    /// Wrap TOS in a new reference cell.
    Ref,
    /// Replace a reference on TOS with the value it holds.
    Deref,
    /// Pop a reference and a value, store the value, push the value.
    SetRef,
    /// Null coalescing: pop b then a, push a unless it is null.
    Chain,

    // === Bytes ===
    /// Encode TOS into a byte buffer.
    ToBytes,
    /// Decode a byte buffer on TOS back into a value.
    FromBytes,

    // === Classes, Enums, Patterns ===
    /// Build a class. Operands: u16 name, u8 has_super, u8 attribute count, then per attribute
    /// u16 name + u8 private + u8 static, then u8 generic count and u16 names.
    /// Pops the superclass if any (it sits on top), then the attribute values, which were
    /// pushed in declaration order.
    Class,
    /// Pop a closure and add it as a method of the class now on TOS.
    /// Operands: u16 name, u8 static, u8 private, u8 bin.
    Method,
    /// Bind an enum constant to a global and push it. Operands: u16 enum const, u8 public
    /// (public enums also define each variant as a global).
    Enum,
    /// Build a pattern. Operands: u8 field count, then u16 names in push order.
    /// Pops the field values, then the target class.
    Pattern,
    /// Push a pattern binding placeholder. Operand: u16 binding name.
    PatternVars,

    // === Errors ===
    /// Pop an error kind, then a reason, and raise.
    Throw,
    /// Raise an assertion error unless TOS is truthy (TOS stays).
    Assert,

    // === Modules ===
    /// Pop a prototype (run as a module) or null (look up a library), bind the resulting
    /// namespace to a constant global and push it. Operands: u16 module name, u16 variable name.
    Import,
    /// Pop a namespace, push null, and copy the listed bindings into globals.
    /// Operands: u8 count, then u16 names.
    Destruct,
    /// Out-of-band directive, pushes null. Operands: u8 [`HeaderCommand`], u8 argc, then
    /// argc u16 names.
    Header,
}

impl TryFrom<u8> for Opcode {
    type Error = InvalidOpcodeError;

    fn try_from(byte: u8) -> Result<Self, Self::Error> {
        Self::from_repr(byte).ok_or(InvalidOpcodeError(byte))
    }
}

/// Error returned when attempting to convert an invalid byte to an Opcode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InvalidOpcodeError(pub u8);

impl std::fmt::Display for InvalidOpcodeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "invalid opcode byte: {}", self.0)
    }
}

impl std::error::Error for InvalidOpcodeError {}

/// Directives carried by the `Header` instruction.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromRepr)]
pub enum HeaderCommand {
    /// Arm memoization for the current function. No arguments.
    Memoize,
    /// Name the global function `finish` calls. One argument.
    SetMainFunction,
    /// Name the global class whose `main` method `finish` calls. One argument.
    SetMainClass,
    /// Names the globals a module exports. Any number of arguments.
    Export,
}

impl HeaderCommand {
    /// Required argument count, `None` when any count is accepted.
    #[must_use]
    pub fn expected_args(self) -> Option<usize> {
        match self {
            Self::Memoize => Some(0),
            Self::SetMainFunction | Self::SetMainClass => Some(1),
            Self::Export => None,
        }
    }
}

/// How a `Closure` instruction resolves one upvalue.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromRepr)]
pub enum UpvalueKind {
    /// Share an upvalue of the enclosing closure. Index: its upvalue slot.
    Enclosing,
    /// Capture a cell from the enclosing frame. Index: its local slot.
    Local,
    /// Bind a global by name, or the new closure itself when the name is its own.
    /// Index: name constant.
    Global,
}
