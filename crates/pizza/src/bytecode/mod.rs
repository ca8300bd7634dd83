//! Bytecode and the virtual machine that executes it.
//!
//! # Module Structure
//!
//! - `op` - Opcode enum definitions
//! - `code` - Chunk containing bytecode, constants and source positions
//! - `builder` - CodeBuilder for emitting bytecode
//! - `vm` - Virtual machine for bytecode execution

mod builder;
mod code;
mod op;
pub(crate) mod vm;

pub use builder::{CodeBuilder, JumpLabel};
pub use code::{Chunk, Position};
pub use op::{HeaderCommand, InvalidOpcodeError, Opcode, UpvalueKind};
pub use vm::{VM, VmConfig};
