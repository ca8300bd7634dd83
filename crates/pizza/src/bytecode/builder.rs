//! Bytecode emission.
//!
//! `CodeBuilder` is the write side of the instruction-set contract: a compiler (or a test)
//! emits opcodes and operands through it and gets back a [`Chunk`]. It records the current
//! source position for every byte and deduplicates name constants.

use std::sync::Arc;

use ahash::AHashMap;

use super::{
    code::{Chunk, Position},
    op::Opcode,
};
use crate::value::Value;

/// A forward jump whose offset is filled in later by [`CodeBuilder::patch_jump`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[must_use]
pub struct JumpLabel(usize);

#[derive(Debug, Default)]
pub struct CodeBuilder {
    bytecode: Vec<u8>,
    positions: Vec<Position>,
    constants: Vec<Value>,
    names: AHashMap<Arc<str>, u16>,
    position: Position,
}

impl CodeBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the source span recorded for subsequently emitted bytes.
    pub fn set_location(&mut self, index: u32, len: u32) -> &mut Self {
        self.position = Position::new(index, len);
        self
    }

    /// Offset the next emitted byte will have.
    #[must_use]
    pub fn current_offset(&self) -> usize {
        self.bytecode.len()
    }

    fn push_byte(&mut self, byte: u8) {
        self.bytecode.push(byte);
        self.positions.push(self.position);
    }

    pub fn emit(&mut self, op: Opcode) -> &mut Self {
        self.push_byte(op as u8);
        self
    }

    /// Emits a bare u8 operand.
    pub fn u8(&mut self, operand: u8) -> &mut Self {
        self.push_byte(operand);
        self
    }

    /// Emits a bare u16 operand, little-endian.
    pub fn u16(&mut self, operand: u16) -> &mut Self {
        for byte in operand.to_le_bytes() {
            self.push_byte(byte);
        }
        self
    }

    pub fn emit_u8(&mut self, op: Opcode, operand: u8) -> &mut Self {
        self.emit(op).u8(operand)
    }

    pub fn emit_u16(&mut self, op: Opcode, operand: u16) -> &mut Self {
        self.emit(op).u16(operand)
    }

    /// Adds a constant to the pool and returns its index.
    ///
    /// # Panics
    /// If the pool already holds `u16::MAX` constants.
    pub fn add_const(&mut self, value: Value) -> u16 {
        let index = u16::try_from(self.constants.len()).expect("constant pool overflow");
        self.constants.push(value);
        index
    }

    /// Index of a `Text` constant holding `name`, adding it once.
    pub fn name(&mut self, name: &str) -> u16 {
        if let Some(&index) = self.names.get(name) {
            return index;
        }
        let index = self.add_const(Value::text(name));
        self.names.insert(Arc::from(name), index);
        index
    }

    /// Emits `Constant` for a new constant.
    pub fn emit_const(&mut self, value: impl Into<Value>) -> &mut Self {
        let index = self.add_const(value.into());
        self.emit_u16(Opcode::Constant, index)
    }

    /// Emits an instruction whose single operand is a name constant.
    pub fn emit_name(&mut self, op: Opcode, name: &str) -> &mut Self {
        let index = self.name(name);
        self.emit_u16(op, index)
    }

    /// Emits a forward jump with a placeholder offset.
    pub fn emit_jump(&mut self, op: Opcode) -> JumpLabel {
        self.emit(op);
        let label = JumpLabel(self.current_offset());
        self.u16(0xffff);
        label
    }

    /// Points a forward jump at the current offset.
    ///
    /// # Panics
    /// If the jump distance does not fit in a u16.
    pub fn patch_jump(&mut self, label: JumpLabel) {
        let distance = self.current_offset() - label.0 - 2;
        let distance = u16::try_from(distance).expect("jump too large");
        let [lo, hi] = distance.to_le_bytes();
        self.bytecode[label.0] = lo;
        self.bytecode[label.0 + 1] = hi;
    }

    /// Emits a `Loop` back to `target`.
    ///
    /// # Panics
    /// If the jump distance does not fit in a u16.
    pub fn emit_loop(&mut self, target: usize) -> &mut Self {
        self.emit(Opcode::Loop);
        let distance = self.current_offset() + 2 - target;
        self.u16(u16::try_from(distance).expect("loop too large"))
    }

    #[must_use]
    pub fn build(self, source: impl Into<Arc<str>>) -> Chunk {
        Chunk::new(self.bytecode, self.positions, self.constants, source)
    }
}
