//! Assembly-time errors.
//!
//! Everything in [`AsmError`] is a configuration error: a defect in the
//! caller's construct logic, detected fail-fast and never retried. The only
//! deferred checks are the seal-time ones (`UnpoppedBlock`,
//! `UnresolvedReference`), which describe incompleteness rather than an
//! immediate contradiction.
//!
//! [`NotConstant`] is not an error at all but a control signal: constant
//! analysis returns it so callers can branch between the folded and unfolded
//! paths.

use thiserror::Error;

use crate::vm::ExecutionError;

/// Errors raised by the assembler and the node compiler.
#[derive(Debug, Error)]
pub enum AsmError {
    /// An instruction tried to pop more values than the stack holds.
    #[error("stack underflow: instruction pops {pops} but height is {height}")]
    StackUnderflow { pops: u32, height: u32 },

    /// Append attempted while the stack height is unknown, i.e. right after
    /// an unconditional transfer. Code emitted here could never execute.
    #[error("unreachable code: cannot append while stack height is unknown")]
    UnreachableCode,

    /// An operand (pool index, count, jump target) exceeds the 16-bit range
    /// the instruction format can encode.
    #[error("operand {0} exceeds the encodable range (max 65535)")]
    OperandOverflow(u32),

    /// A patched jump distance exceeds the encodable range.
    #[error("jump distance {0} exceeds the encodable range (max 65535)")]
    JumpTooFar(usize),

    /// Conditional jumps are forward-only in this instruction set.
    #[error("conditional jump to an already-defined label")]
    BackwardConditionalJump,

    /// A backward jump's height does not match the height recorded when the
    /// target was defined.
    #[error("backward jump height mismatch: target was reached at {expected}, jump site is at {found}")]
    BackwardJumpMismatch { expected: u32, found: u32 },

    /// Two references landing on the same destination supplied different
    /// heights.
    #[error("height mismatch at merge point: {expected} vs {found}")]
    HeightMismatch { expected: u32, found: u32 },

    /// `define` called on an already-defined label.
    #[error("label defined twice")]
    LabelRedefined,

    /// A label was defined at a point with unknown height and no pending
    /// references to supply one.
    #[error("label defined at unreachable point with no incoming references")]
    LabelUnreachable,

    /// `pop_block` called with no open region, or with a frame that is not
    /// the innermost one.
    #[error("block pop does not match the innermost open region")]
    BlockMismatch,

    /// `break`/`continue` used outside any loop region.
    #[error("break or continue outside of a loop region")]
    NotInLoop,

    /// Sealing attempted while block frames remain open.
    #[error("cannot seal: {0} block region(s) left unpopped")]
    UnpoppedBlock(usize),

    /// Sealing attempted while forward references or labels are unresolved.
    #[error("cannot seal: {0} forward reference(s) left unresolved")]
    UnresolvedReference(usize),

    /// The end of the stream is reachable with more than one value on the
    /// stack, so seal cannot synthesize a return.
    #[error("cannot seal: {0} values left on the stack at a reachable end")]
    ValuesLeftOnStack(u32),

    /// An argument was declared after another local already claimed its
    /// slot. Arguments must occupy the leading local slots, so they must be
    /// declared first, and each at most once.
    #[error("argument {0} declared after other locals were interned")]
    ArgumentAfterLocals(String),

    /// A free or cell variable was referenced without being declared first.
    #[error("undefined free/cell binding: {0}")]
    UndefinedBinding(String),

    /// Source lines must not decrease along the instruction stream.
    #[error("line number decreased from {last} to {line}")]
    LineWentBackwards { last: u32, line: u32 },

    /// Constant folding evaluated the candidate construction and the
    /// computation itself failed. Propagated rather than absorbed: an
    /// all-constant construction that fails now would fail identically at
    /// runtime.
    #[error("constant folding failed: {0}")]
    FoldFailed(#[from] ExecutionError),
}

/// Control signal returned by constant analysis for non-constant nodes.
///
/// Deliberately not an `AsmError`: callers branch on it to choose between
/// folding and normal emission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NotConstant;

impl core::fmt::Display for NotConstant {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "node is not a compile-time constant")
    }
}
