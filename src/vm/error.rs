//! Runtime errors.

use thiserror::Error;

use crate::asm::Instruction;

#[derive(Debug, Error)]
pub enum ExecutionError {
    #[error("type mismatch: cannot apply `{op}` to {lhs} and {rhs}")]
    TypeMismatch {
        op: &'static str,
        lhs: &'static str,
        rhs: &'static str,
    },

    #[error("division by zero")]
    DivisionByZero,

    #[error("negative exponent in integer power")]
    NegativeExponent,

    #[error("local variable `{0}` referenced before assignment")]
    UnboundLocal(String),

    #[error("undefined global `{0}`")]
    UndefinedGlobal(String),

    #[error("`{name}` expected {expected} argument(s), got {got}")]
    WrongArity {
        name: String,
        expected: u32,
        got: u32,
    },

    #[error("cannot unpack {got} value(s) into {expected}")]
    UnpackMismatch { expected: u32, got: u32 },

    #[error("code objects do not take keyword arguments")]
    UnexpectedKeywords,

    #[error("operand stack underflow")]
    StackUnderflow,

    #[error("value `{0}` is not callable")]
    NotCallable(&'static str),

    #[error("{0:?} is not executable by this runtime")]
    Unsupported(Instruction),

    #[error("halt instruction reached")]
    Halted,

    #[error("execution ran off the end of the instruction stream")]
    OutOfBounds,

    /// Raised by a native function; carries its own message.
    #[error("{0}")]
    Native(String),
}
