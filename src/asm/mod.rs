//! Bytecode assembly: instruction set, emitter, pools, height tracking,
//! labels and block regions.

mod assembler;
mod error;
mod instruction_set;
mod line_table;

pub use assembler::{Assembler, BlockHandle, BlockKind, ForwardRef, Label};
pub use error::{AsmError, NotConstant};
pub use instruction_set::{BinOp, CmpOp, Instruction, JumpKind, UnOp};
pub use line_table::{LineTableBuilder, LineTableEntry};
