//! Runtime values shared by the assembler pools, the VM and the node compiler.

mod value;

pub use value::{NativeFn, NativeFunction, NativeImpl, Value};

#[cfg(test)]
mod value_test;
