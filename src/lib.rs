//! Bytecode assembly for a small stack virtual machine.
//!
//! The crate is built around the [`Assembler`](asm::Assembler): an append-only
//! instruction emitter that tracks the operand stack height after every
//! instruction, resolves forward references and labels, and enforces matched
//! entry/exit of loop and exception-protection regions. Sealing an assembler
//! produces an immutable [`Code`](vm::Code) artifact that the [`VM`](vm::VM)
//! executes.
//!
//! On top of the assembler sits the [`node`] module: an extensible tree
//! compiler with compile-time constant folding. Nodes are immutable,
//! structurally-equal values; constant subtrees are evaluated eagerly through
//! a throwaway assembler + VM run.

pub mod asm;
pub mod node;
pub mod values;
pub mod vm;

pub use asm::{AsmError, Assembler, BlockKind, Instruction, NotConstant};
pub use node::{Node, NodeType};
pub use values::Value;
pub use vm::{Code, ExecutionError, VM};
