//! Minimal stack-machine runtime for executing sealed artifacts.
//!
//! The runtime covers the straight-line and branching subset the constant
//! folder needs (plus calls into native and code values); block-region
//! unwinding and closures assemble fine but report as unsupported when
//! executed here.

pub mod code;
mod error;
mod runtime;
mod stack;

pub use code::Code;
pub use error::ExecutionError;
pub use runtime::VM;
