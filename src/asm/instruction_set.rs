//! Instruction set: fixed 16-bit format.
//!
//! # Instruction Format
//!
//! **ALL instructions are exactly 16 bits (2 bytes)**:
//! ```text
//! ┌────────────┬────────────┐
//! │    Tag     │  Operand   │
//! │  (8 bits)  │  (8 bits)  │
//! └────────────┴────────────┘
//! ```
//!
//! Using `#[repr(C, u8)]`, the enum naturally maps to this 2-byte layout:
//! discriminant (tag) = 1 byte, payload (operand) = 0 or 1 byte.
//!
//! # Wide Arguments
//!
//! The one-byte operand covers 0..=255. For anything up to 65535 the
//! assembler emits a `WideArg` prefix carrying the high byte:
//! ```ignore
//! WideArg(0x03)       // High byte
//! LoadConst(0xE8)     // Low byte -> loads constant 1000 (0x03E8)
//! ```
//! Operands beyond 16 bits are a hard error at emission or patch time;
//! nothing is ever silently truncated.
//!
//! # Stack Discipline
//!
//! Every instruction has a stack effect `(pops, pushes)`, either fixed or
//! computed from its full operand (container builds and calls scale with
//! their count). The effect table lives in [`Instruction::stack_effect`] and
//! is the single source of truth for the assembler's height tracking.
//!
//! Jump offsets and targets are measured in instruction slots, not bytes.
//! `Jump`, `JumpIfFalse`, `JumpIfTrue` and the `Setup*` family are forward
//! relative to the next slot; `JumpAbsolute` and `ContinueLoop` carry an
//! absolute slot index.

use core::fmt;

/// Binary operator selector carried in a `BinaryOp` operand.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Pow,
}

/// Unary operator selector carried in a `UnaryOp` operand.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnOp {
    Neg,
    Not,
}

/// Comparison selector carried in a `CompareOp` operand.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CmpOp {
    Lt,
    Le,
    Eq,
    Ne,
    Gt,
    Ge,
}

/// A single VM instruction (exactly 16 bits).
///
/// The `#[repr(C, u8)]` ensures the first byte is the discriminant (opcode),
/// the second byte is the operand (if present), and the total size is exactly
/// 2 bytes.
#[repr(C, u8)]
#[derive(Clone, Copy, PartialEq, Eq)]
pub enum Instruction {
    // ========================================================================
    // Special (0x00)
    // ========================================================================
    /// Halt execution.
    ///
    /// Having Halt at 0x00 is a safety feature: zero-initialized memory will
    /// halt instead of executing garbage.
    Halt = 0x00,

    // ========================================================================
    // Stack, Constants & Variables (0x01 - 0x0F)
    // ========================================================================
    /// Push constant from pool.
    /// Operand: u8 index | Stack: [...] -> [..., value]
    LoadConst(u8) = 0x01,

    /// Pop top value.
    /// Stack: [..., a] -> [...]
    Pop = 0x02,

    /// Duplicate top value.
    /// Stack: [..., a] -> [..., a, a]
    Dup = 0x03,

    /// Swap top two values.
    /// Stack: [..., a, b] -> [..., b, a]
    RotTwo = 0x04,

    /// Rotate top three values: top goes below the other two.
    /// Stack: [..., a, b, c] -> [..., c, a, b]
    RotThree = 0x05,

    /// Wide argument prefix - supplies the high byte of the next
    /// instruction's operand: `(this_operand << 8) | next_operand`.
    WideArg(u8) = 0x07,

    /// Load local variable slot.
    /// Operand: u8 index | Stack: [...] -> [..., value]
    LoadLocal(u8) = 0x08,

    /// Store to local variable slot.
    /// Operand: u8 index | Stack: [..., value] -> [...]
    StoreLocal(u8) = 0x09,

    /// Load global by name-pool index.
    /// Operand: u8 index | Stack: [...] -> [..., value]
    LoadGlobal(u8) = 0x0A,

    /// Store global by name-pool index.
    /// Operand: u8 index | Stack: [..., value] -> [...]
    StoreGlobal(u8) = 0x0B,

    /// Load a cell/free variable's current value.
    ///
    /// Indices run over cell variables first, then free variables; both
    /// pools are pre-declared on the assembler, never auto-interned.
    /// Operand: u8 index | Stack: [...] -> [..., value]
    LoadDeref(u8) = 0x0C,

    /// Store into a cell/free variable.
    /// Operand: u8 index | Stack: [..., value] -> [...]
    StoreDeref(u8) = 0x0D,

    /// Push the cell object itself (for closure capture).
    /// Operand: u8 index | Stack: [...] -> [..., cell]
    LoadClosure(u8) = 0x0E,

    // ========================================================================
    // Operators (0x10 - 0x1F)
    // ========================================================================
    /// Binary operation; the operand selects the operator.
    /// Stack: [..., a, b] -> [..., a op b]
    BinaryOp(BinOp) = 0x10,

    /// Unary operation.
    /// Stack: [..., a] -> [..., op a]
    UnaryOp(UnOp) = 0x11,

    /// Comparison; pushes a Bool.
    /// Stack: [..., a, b] -> [..., a cmp b]
    CompareOp(CmpOp) = 0x12,

    // ========================================================================
    // Control Flow (0x38 - 0x4F)
    // ========================================================================
    /// Unconditional forward jump, relative to the next slot.
    Jump(u8) = 0x38,

    /// Forward jump if top is falsy. Does NOT pop.
    /// Stack: [..., cond] -> [..., cond]
    JumpIfFalse(u8) = 0x39,

    /// Forward jump if top is truthy. Does NOT pop.
    JumpIfTrue(u8) = 0x3A,

    /// Unconditional jump to an absolute slot index (backward jumps).
    JumpAbsolute(u8) = 0x3B,

    /// Break out of the innermost loop region; the runtime unwinds to the
    /// loop's setup target.
    Break = 0x3C,

    /// Continue: unwind any protection regions nested inside the loop, then
    /// jump to the absolute loop-head slot in the operand.
    ContinueLoop(u8) = 0x3D,

    /// Return from the artifact.
    /// Stack: [..., retval] -> [retval]
    Return = 0x3E,

    /// Call a function.
    ///
    /// The full operand packs the positional count in the low byte and the
    /// keyword-pair count in the high byte (via `WideArg`).
    /// Stack: [..., func, a1..aN, name1, v1, .., nameK, vK] -> [..., result]
    CallFunction(u8) = 0x3F,

    // ========================================================================
    // Block Regions & Closures (0x50 - 0x5F)
    // ========================================================================
    /// Enter a loop region; forward operand is the loop exit.
    SetupLoop(u8) = 0x50,

    /// Enter a try/except region; forward operand is the handler entry,
    /// which executes with three exception-state values on the stack.
    SetupExcept(u8) = 0x51,

    /// Enter a try/finally region; forward operand is the cleanup entry.
    SetupFinally(u8) = 0x52,

    /// Leave the innermost region (normal completion path).
    PopBlock = 0x53,

    /// Terminal cleanup of a try/finally; consumes the completion marker
    /// pushed on the normal path (or the exception state otherwise).
    /// Stack: [..., marker] -> [...]
    EndFinally = 0x54,

    /// Build a closure from a code object and N captured cells. The count
    /// is explicit because the runtime cannot recompute it from the stack.
    /// Operand: u8 count | Stack: [..., code, c1..cN] -> [..., closure]
    MakeClosure(u8) = 0x55,

    // ========================================================================
    // Containers (0x60 - 0x6F)
    // ========================================================================
    /// Make tuple with N elements.
    /// Operand: u8 count | Stack: [..., e1..eN] -> [..., tuple]
    BuildTuple(u8) = 0x60,

    /// Make list with N elements.
    BuildList(u8) = 0x61,

    /// Unpack a sequence of exactly N elements; pushes them so the first
    /// element ends up on top.
    /// Operand: u8 count | Stack: [..., seq] -> [..., eN..e1]
    UnpackSequence(u8) = 0x62,

    // ========================================================================
    // Meta (0xD0)
    // ========================================================================
    /// No operation. Also the placeholder filling reserved jump slots.
    Nop = 0xD0,
}

static_assertions::assert_eq_size!(Instruction, [u8; 2]);

/// The jump family an unresolved forward reference will be patched into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JumpKind {
    Jump,
    JumpIfFalse,
    JumpIfTrue,
    SetupLoop,
    SetupExcept,
    SetupFinally,
}

impl JumpKind {
    /// Build the concrete instruction carrying the low operand byte.
    pub const fn instruction(self, low: u8) -> Instruction {
        match self {
            JumpKind::Jump => Instruction::Jump(low),
            JumpKind::JumpIfFalse => Instruction::JumpIfFalse(low),
            JumpKind::JumpIfTrue => Instruction::JumpIfTrue(low),
            JumpKind::SetupLoop => Instruction::SetupLoop(low),
            JumpKind::SetupExcept => Instruction::SetupExcept(low),
            JumpKind::SetupFinally => Instruction::SetupFinally(low),
        }
    }

    /// Whether taking this jump is the only way past it (no fall-through).
    pub const fn is_unconditional(self) -> bool {
        matches!(self, JumpKind::Jump)
    }
}

impl Instruction {
    /// Size of an instruction in bytes.
    pub const SIZE: usize = 2;

    /// Stack effect `(pops, pushes)` given the full (wide-extended) operand.
    ///
    /// For statically-costed instructions the operand is ignored; container
    /// builds, unpacks, calls and closures scale with it.
    pub const fn stack_effect(self, operand: u32) -> (u32, u32) {
        use Instruction::*;
        match self {
            Halt | Nop | WideArg(_) => (0, 0),
            LoadConst(_) | LoadLocal(_) | LoadGlobal(_) | LoadDeref(_) | LoadClosure(_) => (0, 1),
            Pop | StoreLocal(_) | StoreGlobal(_) | StoreDeref(_) => (1, 0),
            Dup => (1, 2),
            RotTwo => (2, 2),
            RotThree => (3, 3),
            BinaryOp(_) | CompareOp(_) => (2, 1),
            UnaryOp(_) => (1, 1),
            Jump(_) | JumpAbsolute(_) | Break | ContinueLoop(_) => (0, 0),
            JumpIfFalse(_) | JumpIfTrue(_) => (0, 0),
            Return => (1, 0),
            // func + argc positionals + 2 slots per keyword pair.
            CallFunction(_) => (1 + (operand & 0xFF) + 2 * (operand >> 8), 1),
            SetupLoop(_) | SetupExcept(_) | SetupFinally(_) | PopBlock => (0, 0),
            EndFinally => (1, 0),
            MakeClosure(_) => (1 + operand, 1),
            BuildTuple(_) | BuildList(_) => (operand, 1),
            UnpackSequence(_) => (1, operand),
        }
    }

    /// Instructions after which the next slot is unreachable by fall-through.
    pub const fn is_unconditional_exit(&self) -> bool {
        matches!(
            self,
            Self::Jump(_)
                | Self::JumpAbsolute(_)
                | Self::Break
                | Self::ContinueLoop(_)
                | Self::Return
                | Self::Halt
        )
    }

    /// Forward-relative jump operand, if this is a forward jump.
    pub const fn forward_offset(&self) -> Option<u8> {
        match self {
            Self::Jump(off)
            | Self::JumpIfFalse(off)
            | Self::JumpIfTrue(off)
            | Self::SetupLoop(off)
            | Self::SetupExcept(off)
            | Self::SetupFinally(off) => Some(*off),
            _ => None,
        }
    }

    /// Absolute jump operand, if this is an absolute jump.
    pub const fn absolute_target(&self) -> Option<u8> {
        match self {
            Self::JumpAbsolute(t) | Self::ContinueLoop(t) => Some(*t),
            _ => None,
        }
    }
}

impl fmt::Debug for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Halt => write!(f, "Halt"),
            Self::LoadConst(idx) => write!(f, "LoadConst({})", idx),
            Self::Pop => write!(f, "Pop"),
            Self::Dup => write!(f, "Dup"),
            Self::RotTwo => write!(f, "RotTwo"),
            Self::RotThree => write!(f, "RotThree"),
            Self::WideArg(high) => write!(f, "WideArg(0x{:02X})", high),
            Self::LoadLocal(idx) => write!(f, "LoadLocal({})", idx),
            Self::StoreLocal(idx) => write!(f, "StoreLocal({})", idx),
            Self::LoadGlobal(idx) => write!(f, "LoadGlobal({})", idx),
            Self::StoreGlobal(idx) => write!(f, "StoreGlobal({})", idx),
            Self::LoadDeref(idx) => write!(f, "LoadDeref({})", idx),
            Self::StoreDeref(idx) => write!(f, "StoreDeref({})", idx),
            Self::LoadClosure(idx) => write!(f, "LoadClosure({})", idx),
            Self::BinaryOp(op) => write!(f, "BinaryOp({:?})", op),
            Self::UnaryOp(op) => write!(f, "UnaryOp({:?})", op),
            Self::CompareOp(op) => write!(f, "CompareOp({:?})", op),
            Self::Jump(off) => write!(f, "Jump({})", off),
            Self::JumpIfFalse(off) => write!(f, "JumpIfFalse({})", off),
            Self::JumpIfTrue(off) => write!(f, "JumpIfTrue({})", off),
            Self::JumpAbsolute(t) => write!(f, "JumpAbsolute({})", t),
            Self::Break => write!(f, "Break"),
            Self::ContinueLoop(t) => write!(f, "ContinueLoop({})", t),
            Self::Return => write!(f, "Return"),
            Self::CallFunction(argc) => write!(f, "CallFunction({})", argc),
            Self::SetupLoop(off) => write!(f, "SetupLoop({})", off),
            Self::SetupExcept(off) => write!(f, "SetupExcept({})", off),
            Self::SetupFinally(off) => write!(f, "SetupFinally({})", off),
            Self::PopBlock => write!(f, "PopBlock"),
            Self::EndFinally => write!(f, "EndFinally"),
            Self::MakeClosure(n) => write!(f, "MakeClosure({})", n),
            Self::BuildTuple(n) => write!(f, "BuildTuple({})", n),
            Self::BuildList(n) => write!(f, "BuildList({})", n),
            Self::UnpackSequence(n) => write!(f, "UnpackSequence({})", n),
            Self::Nop => write!(f, "Nop"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_instruction_size() {
        // Critical: instructions must be exactly 2 bytes.
        assert_eq!(core::mem::size_of::<Instruction>(), 2);
        assert_eq!(Instruction::SIZE, 2);
    }

    #[test]
    fn test_instruction_alignment() {
        assert_eq!(core::mem::align_of::<Instruction>(), 1);
    }

    #[test]
    fn test_static_effects() {
        assert_eq!(Instruction::LoadConst(0).stack_effect(0), (0, 1));
        assert_eq!(Instruction::BinaryOp(BinOp::Add).stack_effect(0), (2, 1));
        assert_eq!(Instruction::RotThree.stack_effect(0), (3, 3));
        assert_eq!(Instruction::Return.stack_effect(0), (1, 0));
    }

    #[test]
    fn test_dynamic_effects() {
        assert_eq!(Instruction::BuildTuple(3).stack_effect(3), (3, 1));
        assert_eq!(Instruction::UnpackSequence(4).stack_effect(4), (1, 4));
        // 2 positional args, 1 keyword pair: func + 2 + 2 popped.
        let packed = (1 << 8) | 2;
        assert_eq!(Instruction::CallFunction(2).stack_effect(packed), (5, 1));
        assert_eq!(Instruction::MakeClosure(2).stack_effect(2), (3, 1));
    }

    #[test]
    fn test_unconditional_exits() {
        assert!(Instruction::Return.is_unconditional_exit());
        assert!(Instruction::Jump(3).is_unconditional_exit());
        assert!(Instruction::Break.is_unconditional_exit());
        assert!(!Instruction::JumpIfFalse(3).is_unconditional_exit());
        assert!(!Instruction::SetupLoop(3).is_unconditional_exit());
    }

    #[test]
    fn test_parameterized_ops() {
        let add = Instruction::BinaryOp(BinOp::Add);
        let sub = Instruction::BinaryOp(BinOp::Sub);
        assert_ne!(add, sub);
        assert_eq!(format!("{:?}", add), "BinaryOp(Add)");
    }
}
