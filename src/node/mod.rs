//! Tree layer: build expression/statement trees, fold constants, compile to
//! an [`Assembler`](crate::asm::Assembler).

mod fold;
mod node;

pub use fold::{const_value, eval_node, fold_args};
pub use node::{CompileFn, Node, NodeType};

#[cfg(test)]
mod node_test;
