//! Compiled chunks: bytecode, constants and the source positions of every byte.

use std::{fmt::Write, sync::Arc};

use serde::{Deserialize, Serialize};

use super::op::{HeaderCommand, Opcode, UpvalueKind};
use crate::value::Value;

/// A span of source text, as byte offsets.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Position {
    pub index: u32,
    pub len: u32,
}

impl Position {
    #[must_use]
    pub fn new(index: u32, len: u32) -> Self {
        Self { index, len }
    }
}

/// A compiled function body.
///
/// `positions` has one entry per bytecode byte so that any instruction pointer, including
/// one pointing into operands, maps back to the source.
#[derive(Debug)]
pub struct Chunk {
    bytecode: Vec<u8>,
    positions: Vec<Position>,
    constants: Vec<Value>,
    source: Arc<str>,
}

impl Chunk {
    pub fn new(bytecode: Vec<u8>, positions: Vec<Position>, constants: Vec<Value>, source: impl Into<Arc<str>>) -> Self {
        Self {
            bytecode,
            positions,
            constants,
            source: source.into(),
        }
    }

    #[must_use]
    pub fn bytecode(&self) -> &[u8] {
        &self.bytecode
    }

    #[must_use]
    pub fn constants(&self) -> &[Value] {
        &self.constants
    }

    #[must_use]
    pub fn constant(&self, index: usize) -> Option<&Value> {
        self.constants.get(index)
    }

    #[must_use]
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Source span of the byte at `offset`.
    #[must_use]
    pub fn position(&self, offset: usize) -> Position {
        self.positions
            .get(offset)
            .or_else(|| self.positions.last())
            .copied()
            .unwrap_or_default()
    }

    fn clamped_index(&self, offset: usize) -> usize {
        (self.position(offset).index as usize).min(self.source.len())
    }

    /// 1-based source line of the byte at `offset`.
    #[must_use]
    pub fn line(&self, offset: usize) -> usize {
        let index = self.clamped_index(offset);
        self.source.as_bytes()[..index].iter().filter(|&&b| b == b'\n').count() + 1
    }

    /// The source line of the byte at `offset` with a caret underline of its span.
    #[must_use]
    pub fn highlight(&self, offset: usize) -> String {
        let bytes = self.source.as_bytes();
        let start = self.clamped_index(offset);
        let line_start = bytes[..start].iter().rposition(|&b| b == b'\n').map_or(0, |i| i + 1);
        let line_end = bytes[start..].iter().position(|&b| b == b'\n').map_or(bytes.len(), |i| start + i);
        let end = (start + self.position(offset).len as usize).clamp(start, line_end);

        let column = String::from_utf8_lossy(&bytes[line_start..start]).chars().count();
        let width = String::from_utf8_lossy(&bytes[start..end]).chars().count().max(1);
        format!(
            "{}\n{}{}",
            String::from_utf8_lossy(&bytes[line_start..line_end]),
            " ".repeat(column),
            "^".repeat(width)
        )
    }

    /// A listing of every instruction, one per line.
    #[must_use]
    pub fn disassemble(&self) -> String {
        let mut out = String::new();
        let mut offset = 0;
        while offset < self.bytecode.len() {
            let (line, next) = self.disassemble_instruction(offset);
            out.push_str(&line);
            out.push('\n');
            offset = next;
        }
        out
    }

    /// Renders the instruction at `offset`, returning it with the offset of the next one.
    #[must_use]
    pub fn disassemble_instruction(&self, offset: usize) -> (String, usize) {
        let mut reader = Operands {
            chunk: self,
            ip: offset + 1,
            text: String::new(),
        };
        let Some(&byte) = self.bytecode.get(offset) else {
            return (format!("{offset:04} <end>"), offset + 1);
        };
        let Some(op) = Opcode::from_repr(byte) else {
            return (format!("{offset:04} <invalid {byte:#04x}>"), offset + 1);
        };
        reader.operands(op);
        (format!("{offset:04} {op:?}{}", reader.text), reader.ip)
    }
}

/// Operand decoding for the disassembler. Missing bytes render as `?` instead of failing.
struct Operands<'a> {
    chunk: &'a Chunk,
    ip: usize,
    text: String,
}

impl Operands<'_> {
    fn u8(&mut self) -> Option<u8> {
        let byte = self.chunk.bytecode.get(self.ip).copied();
        self.ip += 1;
        byte
    }

    fn u16(&mut self) -> Option<u16> {
        let lo = self.u8()?;
        let hi = self.u8()?;
        Some(u16::from_le_bytes([lo, hi]))
    }

    fn byte(&mut self) {
        match self.u8() {
            Some(b) => {
                let _ = write!(self.text, " {b}");
            }
            None => self.text.push_str(" ?"),
        }
    }

    fn constant(&mut self) {
        match self.u16() {
            Some(index) => {
                let _ = match self.chunk.constant(index as usize) {
                    Some(value) => write!(self.text, " {index} ({value})"),
                    None => write!(self.text, " {index} (?)"),
                };
            }
            None => self.text.push_str(" ?"),
        }
    }

    fn jump(&mut self, forward: bool) {
        match self.u16() {
            Some(jump) => {
                let target = if forward {
                    self.ip + jump as usize
                } else {
                    self.ip.saturating_sub(jump as usize)
                };
                let _ = write!(self.text, " -> {target:04}");
            }
            None => self.text.push_str(" ?"),
        }
    }

    fn constraints(&mut self) {
        self.byte();
        if self.chunk.bytecode.get(self.ip - 1) == Some(&1) {
            self.constant();
            self.constant();
        }
    }

    fn operands(&mut self, op: Opcode) {
        match op {
            Opcode::Constant
            | Opcode::GetGlobal
            | Opcode::SetGlobal
            | Opcode::DropGlobal
            | Opcode::GetAttr
            | Opcode::SetAttr
            | Opcode::Access
            | Opcode::PatternVars => self.constant(),
            Opcode::GetLocal
            | Opcode::SetLocal
            | Opcode::DropLocal
            | Opcode::GetUpvalue
            | Opcode::SetUpvalue
            | Opcode::DropUpvalue
            | Opcode::MakeArray
            | Opcode::MakeMap => self.byte(),
            Opcode::MakeVar => {
                self.byte();
                self.byte();
            }
            Opcode::DefineGlobal => {
                self.constant();
                self.byte();
                self.constraints();
            }
            Opcode::DefineLocal => {
                self.byte();
                self.constraints();
            }
            Opcode::Jump | Opcode::JumpIfFalse | Opcode::JumpIfTrue => self.jump(true),
            Opcode::Loop => self.jump(false),
            Opcode::For => {
                self.byte();
                self.jump(true);
            }
            Opcode::Iter => {
                self.byte();
                self.byte();
                self.jump(true);
            }
            Opcode::Call => {
                self.byte();
                let kwargc = self.chunk.bytecode.get(self.ip).copied().unwrap_or(0);
                self.byte();
                for _ in 0..kwargc {
                    self.constant();
                }
            }
            Opcode::Closure => {
                let function = self.u16().and_then(|i| self.chunk.constant(i as usize).cloned());
                self.byte();
                let Some(Value::Func(function)) = function else {
                    self.text.push_str(" <not a function>");
                    return;
                };
                let _ = write!(self.text, " <{}>", function.name);
                for _ in 0..function.upvalue_count {
                    let kind = self.u8().and_then(UpvalueKind::from_repr);
                    let index = self.u16();
                    let _ = match (kind, index) {
                        (Some(kind), Some(index)) => write!(self.text, " {kind:?}:{index}"),
                        _ => write!(self.text, " ?"),
                    };
                }
            }
            Opcode::Class => {
                self.constant();
                self.byte();
                let attrs = self.u8().unwrap_or(0);
                for _ in 0..attrs {
                    self.constant();
                    self.byte();
                    self.byte();
                }
                let generics = self.u8().unwrap_or(0);
                for _ in 0..generics {
                    self.constant();
                }
            }
            Opcode::Method => {
                self.constant();
                self.byte();
                self.byte();
                self.byte();
            }
            Opcode::Enum => {
                self.constant();
                self.byte();
            }
            Opcode::Pattern | Opcode::Destruct => {
                let count = self.u8().unwrap_or(0);
                let _ = write!(self.text, " {count}");
                for _ in 0..count {
                    self.constant();
                }
            }
            Opcode::Import => {
                self.constant();
                self.constant();
            }
            Opcode::Header => {
                let command = self.u8().and_then(HeaderCommand::from_repr);
                let _ = write!(self.text, " {command:?}");
                let argc = self.u8().unwrap_or(0);
                for _ in 0..argc {
                    self.constant();
                }
            }
            _ => {}
        }
    }
}
