//! The assembler: instruction emitter, operand pools, stack-height tracking,
//! forward-reference/label resolution and block-region discipline.
//!
//! An `Assembler` is created once per artifact, mutated only through the
//! append/pool/label/block operations below, and finalized exactly once by
//! [`Assembler::seal`], which yields an immutable [`Code`] artifact.
//!
//! The height tracker is what makes the emitter safe for arbitrary code
//! generators: every append is costed against the static (or operand-scaled)
//! stack effect of its instruction, underflow is rejected before any state
//! changes, and an unconditional transfer sets the height to "unknown",
//! after which nothing can be appended until a forward reference or label
//! resolution supplies the height of the next reachable location. Emitting
//! dead code is therefore impossible by construction.

use hashbrown::HashMap;
use smallvec::SmallVec;
use std::sync::Arc;

use crate::values::Value;
use crate::vm::{Code, code::flags};

use super::error::AsmError;
use super::instruction_set::{BinOp, CmpOp, Instruction, JumpKind, UnOp};
use super::line_table::LineTableBuilder;

/// A single-use deferred jump patch.
///
/// Captures the origin slot and the stack height the destination will execute
/// at. Resolving consumes the token, so each reference is patched exactly
/// once; a dropped unresolved reference is caught at seal time.
#[must_use = "an unresolved forward reference blocks sealing"]
#[derive(Debug)]
pub struct ForwardRef {
    origin: usize,
    captured: u32,
    kind: JumpKind,
}

/// A reusable named jump target.
///
/// Any number of forward references may be created against an undefined
/// label; defining it resolves them all at once and fixes the label's height.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Label(usize);

#[derive(Debug)]
struct LabelState {
    offset: Option<usize>,
    height: u32,
    pending: Vec<ForwardRef>,
}

/// The kind of a structured protection region.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockKind {
    Loop,
    TryExcept,
    TryFinally,
}

/// Token for an open block region; must be handed back to
/// [`Assembler::pop_block`] in LIFO order.
#[must_use = "an unpopped block region blocks sealing"]
#[derive(Debug)]
pub struct BlockHandle {
    id: usize,
}

#[derive(Debug)]
struct Frame {
    id: usize,
    kind: BlockKind,
    setup: ForwardRef,
    /// First slot of the region body; jump target for `continue`.
    head: usize,
    head_height: u32,
}

/// Extra operand-stack headroom reserved for the exception state the runtime
/// delivers to a protection region's handler.
const EXCEPTION_HEADROOM: u32 = 3;

/// Per-artifact bytecode builder.
pub struct Assembler {
    instructions: Vec<Instruction>,
    /// Predicted height on entry to each slot; `None` marks slots reachable
    /// only through a jump whose height is still unresolved.
    heights: Vec<Option<u32>>,
    height: Option<u32>,
    max_stack: u32,

    constants: Vec<Value>,
    constant_map: HashMap<Value, u32>,
    names: Vec<Arc<str>>,
    name_map: HashMap<Arc<str>, u32>,
    varnames: Vec<Arc<str>>,
    varname_map: HashMap<Arc<str>, u32>,
    cellvars: Vec<Arc<str>>,
    freevars: Vec<Arc<str>>,

    labels: Vec<LabelState>,
    open_refs: usize,
    blocks: SmallVec<[Frame; 4]>,
    next_block_id: usize,

    line_table: LineTableBuilder,

    arg_count: u32,
    flags: u32,
    name: Arc<str>,
    filename: Arc<str>,
}

impl Default for Assembler {
    fn default() -> Self {
        Self::new()
    }
}

impl Assembler {
    pub fn new() -> Self {
        Assembler {
            instructions: Vec::new(),
            heights: Vec::new(),
            height: Some(0),
            max_stack: 0,
            constants: Vec::new(),
            constant_map: HashMap::new(),
            names: Vec::new(),
            name_map: HashMap::new(),
            varnames: Vec::new(),
            varname_map: HashMap::new(),
            cellvars: Vec::new(),
            freevars: Vec::new(),
            labels: Vec::new(),
            open_refs: 0,
            blocks: SmallVec::new(),
            next_block_id: 0,
            line_table: LineTableBuilder::new(),
            arg_count: 0,
            flags: 0,
            name: Arc::from("<lambda>"),
            filename: Arc::from("<generated>"),
        }
    }

    // === Introspection ===

    /// Predicted stack height at the current end of the stream, or `None`
    /// when the end is unreachable by fall-through.
    pub fn height(&self) -> Option<u32> {
        self.height
    }

    /// Current end of the stream, in instruction slots.
    pub fn offset(&self) -> usize {
        self.instructions.len()
    }

    /// Highest stack height observed so far.
    pub fn max_stack(&self) -> u32 {
        self.max_stack
    }

    pub fn instructions(&self) -> &[Instruction] {
        &self.instructions
    }

    /// Recorded height on entry to each slot.
    pub fn height_history(&self) -> &[Option<u32>] {
        &self.heights
    }

    // === Artifact metadata ===

    pub fn set_name(&mut self, name: &str) {
        self.name = Arc::from(name);
    }

    pub fn set_filename(&mut self, filename: &str) {
        self.filename = Arc::from(filename);
    }

    /// OR extra flag bits (e.g. [`flags::VARARGS`]) into the artifact flags.
    pub fn set_flags(&mut self, bits: u32) {
        self.flags |= bits;
    }

    /// Declare the next positional argument. Arguments occupy the leading
    /// local slots in declaration order, so each must be declared exactly
    /// once, before any other local is interned.
    pub fn add_argument(&mut self, name: &str) -> Result<u32, AsmError> {
        let index = match self.varname_map.get(name) {
            Some(&index) => index,
            None => self.varnames.len() as u32,
        };
        if index != self.arg_count {
            return Err(AsmError::ArgumentAfterLocals(name.to_string()));
        }
        let index = self.intern_varname(name)?;
        self.arg_count += 1;
        Ok(index)
    }

    /// Record that the instructions from here on originate from `line`.
    pub fn set_lineno(&mut self, line: u32) -> Result<(), AsmError> {
        let offset = self.instructions.len();
        self.line_table.set_lineno(line, offset)
    }

    // === Core emission ===

    fn require_height(&self) -> Result<u32, AsmError> {
        self.height.ok_or(AsmError::UnreachableCode)
    }

    fn check_effect(&self, instr: Instruction, operand: u32) -> Result<(u32, u32), AsmError> {
        let height = self.require_height()?;
        let (pops, pushes) = instr.stack_effect(operand);
        if pops > height {
            return Err(AsmError::StackUnderflow { pops, height });
        }
        Ok((pops, pushes))
    }

    fn push_slot(&mut self, instr: Instruction) {
        self.heights.push(self.height);
        self.instructions.push(instr);
    }

    fn set_height(&mut self, height: u32) {
        self.height = Some(height);
        if height > self.max_stack {
            self.max_stack = height;
        }
    }

    /// Append a no-operand (or enum-operand) instruction.
    fn emit(&mut self, instr: Instruction) -> Result<(), AsmError> {
        let (pops, pushes) = self.check_effect(instr, 0)?;
        let height = self.require_height()?;
        self.push_slot(instr);
        self.set_height(height - pops + pushes);
        if instr.is_unconditional_exit() {
            self.height = None;
        }
        Ok(())
    }

    /// Append an instruction with a numeric operand, emitting a `WideArg`
    /// prefix when the operand does not fit the narrow byte.
    fn emit_arg(
        &mut self,
        make: fn(u8) -> Instruction,
        operand: u32,
    ) -> Result<(), AsmError> {
        if operand > 0xFFFF {
            return Err(AsmError::OperandOverflow(operand));
        }
        let instr = make((operand & 0xFF) as u8);
        let (pops, pushes) = self.check_effect(instr, operand)?;
        let height = self.require_height()?;
        if operand > 0xFF {
            self.push_slot(Instruction::WideArg((operand >> 8) as u8));
        }
        self.push_slot(instr);
        self.set_height(height - pops + pushes);
        if instr.is_unconditional_exit() {
            self.height = None;
        }
        Ok(())
    }

    // === Pools ===

    fn intern_constant(&mut self, value: Value) -> Result<u32, AsmError> {
        if let Some(&index) = self.constant_map.get(&value) {
            return Ok(index);
        }
        let index = self.constants.len() as u32;
        if index > 0xFFFF {
            return Err(AsmError::OperandOverflow(index));
        }
        self.constants.push(value.clone());
        self.constant_map.insert(value, index);
        Ok(index)
    }

    fn intern_name(
        pool: &mut Vec<Arc<str>>,
        map: &mut HashMap<Arc<str>, u32>,
        name: &str,
    ) -> Result<u32, AsmError> {
        if let Some(&index) = map.get(name) {
            return Ok(index);
        }
        let index = pool.len() as u32;
        if index > 0xFFFF {
            return Err(AsmError::OperandOverflow(index));
        }
        let name: Arc<str> = Arc::from(name);
        pool.push(name.clone());
        map.insert(name, index);
        Ok(index)
    }

    fn intern_varname(&mut self, name: &str) -> Result<u32, AsmError> {
        Self::intern_name(&mut self.varnames, &mut self.varname_map, name)
    }

    /// Declare a cell variable (a local captured by nested artifacts). Must
    /// precede any deref/closure reference to it.
    pub fn declare_cell(&mut self, name: &str) -> u32 {
        if let Some(i) = self.cellvars.iter().position(|n| &**n == name) {
            return i as u32;
        }
        self.cellvars.push(Arc::from(name));
        (self.cellvars.len() - 1) as u32
    }

    /// Declare a free variable (captured from an enclosing artifact). Must
    /// precede any deref reference to it.
    pub fn declare_free(&mut self, name: &str) -> u32 {
        if let Some(i) = self.freevars.iter().position(|n| &**n == name) {
            return i as u32;
        }
        self.freevars.push(Arc::from(name));
        (self.freevars.len() - 1) as u32
    }

    /// Deref index for a pre-declared cell or free variable: cells first,
    /// then frees. Lookup only; never auto-inserts.
    fn deref_index(&self, name: &str) -> Result<u32, AsmError> {
        if let Some(i) = self.cellvars.iter().position(|n| &**n == name) {
            return Ok(i as u32);
        }
        if let Some(i) = self.freevars.iter().position(|n| &**n == name) {
            return Ok((self.cellvars.len() + i) as u32);
        }
        Err(AsmError::UndefinedBinding(name.to_string()))
    }

    // === Instruction surface ===

    pub fn load_const(&mut self, value: Value) -> Result<(), AsmError> {
        self.require_height()?;
        let index = self.intern_constant(value)?;
        self.emit_arg(Instruction::LoadConst, index)
    }

    pub fn load_local(&mut self, name: &str) -> Result<(), AsmError> {
        self.require_height()?;
        let index = self.intern_varname(name)?;
        self.emit_arg(Instruction::LoadLocal, index)
    }

    pub fn store_local(&mut self, name: &str) -> Result<(), AsmError> {
        self.require_height()?;
        let index = self.intern_varname(name)?;
        self.emit_arg(Instruction::StoreLocal, index)
    }

    pub fn load_global(&mut self, name: &str) -> Result<(), AsmError> {
        self.require_height()?;
        let index = Self::intern_name(&mut self.names, &mut self.name_map, name)?;
        self.emit_arg(Instruction::LoadGlobal, index)
    }

    pub fn store_global(&mut self, name: &str) -> Result<(), AsmError> {
        self.require_height()?;
        let index = Self::intern_name(&mut self.names, &mut self.name_map, name)?;
        self.emit_arg(Instruction::StoreGlobal, index)
    }

    pub fn load_deref(&mut self, name: &str) -> Result<(), AsmError> {
        self.require_height()?;
        let index = self.deref_index(name)?;
        self.emit_arg(Instruction::LoadDeref, index)
    }

    pub fn store_deref(&mut self, name: &str) -> Result<(), AsmError> {
        self.require_height()?;
        let index = self.deref_index(name)?;
        self.emit_arg(Instruction::StoreDeref, index)
    }

    pub fn load_closure(&mut self, name: &str) -> Result<(), AsmError> {
        self.require_height()?;
        let index = self.deref_index(name)?;
        self.emit_arg(Instruction::LoadClosure, index)
    }

    pub fn pop_top(&mut self) -> Result<(), AsmError> {
        self.emit(Instruction::Pop)
    }

    pub fn dup_top(&mut self) -> Result<(), AsmError> {
        self.emit(Instruction::Dup)
    }

    pub fn rot_two(&mut self) -> Result<(), AsmError> {
        self.emit(Instruction::RotTwo)
    }

    pub fn rot_three(&mut self) -> Result<(), AsmError> {
        self.emit(Instruction::RotThree)
    }

    pub fn binary_op(&mut self, op: BinOp) -> Result<(), AsmError> {
        self.emit(Instruction::BinaryOp(op))
    }

    pub fn unary_op(&mut self, op: UnOp) -> Result<(), AsmError> {
        self.emit(Instruction::UnaryOp(op))
    }

    pub fn compare_op(&mut self, op: CmpOp) -> Result<(), AsmError> {
        self.emit(Instruction::CompareOp(op))
    }

    pub fn return_value(&mut self) -> Result<(), AsmError> {
        self.emit(Instruction::Return)
    }

    /// Call with `argc` positional arguments and `kwargc` keyword pairs; the
    /// counts are packed into one operand (positional low, keyword high).
    pub fn call_function(&mut self, argc: u8, kwargc: u8) -> Result<(), AsmError> {
        let operand = ((kwargc as u32) << 8) | argc as u32;
        self.emit_arg(Instruction::CallFunction, operand)
    }

    pub fn build_tuple(&mut self, count: u32) -> Result<(), AsmError> {
        self.emit_arg(Instruction::BuildTuple, count)
    }

    pub fn build_list(&mut self, count: u32) -> Result<(), AsmError> {
        self.emit_arg(Instruction::BuildList, count)
    }

    pub fn unpack_sequence(&mut self, count: u32) -> Result<(), AsmError> {
        self.emit_arg(Instruction::UnpackSequence, count)
    }

    /// Build a closure from a code object plus an explicit number of
    /// captured cells (the runtime cannot recompute the count from the
    /// stack).
    pub fn make_closure(&mut self, cell_count: u32) -> Result<(), AsmError> {
        self.emit_arg(Instruction::MakeClosure, cell_count)
    }

    pub fn end_finally(&mut self) -> Result<(), AsmError> {
        self.emit(Instruction::EndFinally)
    }

    // === Forward references ===

    /// Reserve the two-slot placeholder a later patch will fill.
    fn reserve_ref(&mut self, kind: JumpKind, captured: u32) -> ForwardRef {
        let origin = self.instructions.len();
        self.push_slot(Instruction::Nop);
        self.push_slot(Instruction::Nop);
        self.open_refs += 1;
        ForwardRef {
            origin,
            captured,
            kind,
        }
    }

    /// Emit an unconditional forward jump; height becomes unknown until a
    /// resolution supplies it again.
    pub fn jump_forward(&mut self) -> Result<ForwardRef, AsmError> {
        let height = self.require_height()?;
        let fwd = self.reserve_ref(JumpKind::Jump, height);
        self.height = None;
        Ok(fwd)
    }

    /// Emit a forward branch taken when the (unpopped) top is falsy.
    pub fn jump_if_false(&mut self) -> Result<ForwardRef, AsmError> {
        let height = self.require_height()?;
        Ok(self.reserve_ref(JumpKind::JumpIfFalse, height))
    }

    /// Emit a forward branch taken when the (unpopped) top is truthy.
    pub fn jump_if_true(&mut self) -> Result<ForwardRef, AsmError> {
        let height = self.require_height()?;
        Ok(self.reserve_ref(JumpKind::JumpIfTrue, height))
    }

    /// Encoded distance of a patch landing at `target`, relative to the slot
    /// following the reserved pair. Checked before any state changes so a
    /// too-far destination leaves the assembler untouched.
    fn patch_delta(origin: usize, target: usize) -> Result<usize, AsmError> {
        let delta = target - (origin + 2);
        if delta > 0xFFFF {
            return Err(AsmError::JumpTooFar(delta));
        }
        Ok(delta)
    }

    fn patch_ref(&mut self, fwd: &ForwardRef, delta: usize) {
        self.instructions[fwd.origin] = if delta > 0xFF {
            Instruction::WideArg((delta >> 8) as u8)
        } else {
            Instruction::Nop
        };
        self.instructions[fwd.origin + 1] = fwd.kind.instruction((delta & 0xFF) as u8);
    }

    /// Merge an incoming height with the current one. Escapes the unknown
    /// state; rejects contradictions.
    fn merge_height(&mut self, incoming: u32) -> Result<(), AsmError> {
        match self.height {
            None => self.set_height(incoming),
            Some(current) if current != incoming => {
                return Err(AsmError::HeightMismatch {
                    expected: current,
                    found: incoming,
                });
            }
            Some(_) => {}
        }
        Ok(())
    }

    /// Resolve a forward reference to the current offset, patching its
    /// origin and supplying its captured height to this location.
    pub fn resolve(&mut self, fwd: ForwardRef) -> Result<(), AsmError> {
        let target = self.instructions.len();
        let delta = Self::patch_delta(fwd.origin, target)?;
        self.merge_height(fwd.captured)?;
        self.patch_ref(&fwd, delta);
        self.open_refs -= 1;
        tracing::trace!(
            origin = fwd.origin,
            dest = target,
            height = fwd.captured,
            "resolved forward ref"
        );
        Ok(())
    }

    // === Labels ===

    pub fn new_label(&mut self) -> Label {
        self.labels.push(LabelState {
            offset: None,
            height: 0,
            pending: Vec::new(),
        });
        Label(self.labels.len() - 1)
    }

    /// Unconditional jump to a label. Backward when the label is already
    /// defined (with the height checked here, at the jump's own emission),
    /// forward-deferred otherwise.
    pub fn jump_to(&mut self, label: Label) -> Result<(), AsmError> {
        let height = self.require_height()?;
        if let Some(offset) = self.labels[label.0].offset {
            let expected = self.labels[label.0].height;
            if height != expected {
                return Err(AsmError::BackwardJumpMismatch {
                    expected,
                    found: height,
                });
            }
            return self.emit_arg(Instruction::JumpAbsolute, offset as u32);
        }
        let fwd = self.reserve_ref(JumpKind::Jump, height);
        self.height = None;
        self.labels[label.0].pending.push(fwd);
        Ok(())
    }

    pub fn jump_if_false_to(&mut self, label: Label) -> Result<(), AsmError> {
        self.branch_to(label, JumpKind::JumpIfFalse)
    }

    pub fn jump_if_true_to(&mut self, label: Label) -> Result<(), AsmError> {
        self.branch_to(label, JumpKind::JumpIfTrue)
    }

    fn branch_to(&mut self, label: Label, kind: JumpKind) -> Result<(), AsmError> {
        let height = self.require_height()?;
        if self.labels[label.0].offset.is_some() {
            // Conditional jumps are forward-relative only in this
            // instruction set; loops branch forward to their exit and jump
            // back unconditionally.
            return Err(AsmError::BackwardConditionalJump);
        }
        let fwd = self.reserve_ref(kind, height);
        self.labels[label.0].pending.push(fwd);
        Ok(())
    }

    /// Define the label at the current offset, resolving every pending
    /// reference. All incoming heights (and the fall-through height, if this
    /// point is reachable) must agree.
    pub fn define(&mut self, label: Label) -> Result<(), AsmError> {
        if self.labels[label.0].offset.is_some() {
            return Err(AsmError::LabelRedefined);
        }
        let target = self.instructions.len();

        // Validate the height merge and every patch distance before
        // mutating anything.
        let mut merged = self.height;
        for fwd in &self.labels[label.0].pending {
            Self::patch_delta(fwd.origin, target)?;
            match merged {
                None => merged = Some(fwd.captured),
                Some(h) if h != fwd.captured => {
                    return Err(AsmError::HeightMismatch {
                        expected: h,
                        found: fwd.captured,
                    });
                }
                Some(_) => {}
            }
        }
        let Some(merged) = merged else {
            return Err(AsmError::LabelUnreachable);
        };

        let pending = core::mem::take(&mut self.labels[label.0].pending);
        self.open_refs -= pending.len();
        for fwd in &pending {
            let delta = target - (fwd.origin + 2);
            self.patch_ref(fwd, delta);
        }
        self.labels[label.0].offset = Some(target);
        self.labels[label.0].height = merged;
        self.set_height(merged);
        tracing::trace!(label = label.0, dest = target, height = merged, "defined label");
        Ok(())
    }

    // === Block regions ===

    /// Enter a loop or protection region. Exception regions reserve three
    /// slots of max-stack headroom for the runtime-injected exception state.
    pub fn push_block(&mut self, kind: BlockKind) -> Result<BlockHandle, AsmError> {
        let height = self.require_height()?;
        let (jump, captured) = match kind {
            BlockKind::Loop => (JumpKind::SetupLoop, height),
            // The setup target is the handler entry, which executes with the
            // exception state already on the stack.
            BlockKind::TryExcept => (JumpKind::SetupExcept, height + EXCEPTION_HEADROOM),
            // The setup target is the cleanup entry; the normal path reaches
            // it with the completion sentinel pushed.
            BlockKind::TryFinally => (JumpKind::SetupFinally, height + 1),
        };
        if kind != BlockKind::Loop {
            let headroom = height + EXCEPTION_HEADROOM;
            if headroom > self.max_stack {
                self.max_stack = headroom;
            }
        }
        let setup = self.reserve_ref(jump, captured);
        let id = self.next_block_id;
        self.next_block_id += 1;
        self.blocks.push(Frame {
            id,
            kind,
            setup,
            head: self.instructions.len(),
            head_height: height,
        });
        Ok(BlockHandle { id })
    }

    /// Leave the innermost region. Must match the frame returned by the
    /// corresponding push.
    ///
    /// - `Loop`: returns the setup reference; resolve it at the loop's
    ///   logical end (after the `else` clause, or immediately if absent).
    ///   Breaks inside the region unwind to that same location.
    /// - `TryExcept`: emits the jump that skips the handler and returns its
    ///   reference (resolve at the construct's end); the setup reference is
    ///   resolved here, so the instructions that follow are the handler
    ///   entry, at the region-entry height plus three.
    /// - `TryFinally`: emits the "normal completion" sentinel consumed by
    ///   the terminal cleanup instruction, resolves the setup reference
    ///   after it, and returns nothing.
    pub fn pop_block(&mut self, handle: BlockHandle) -> Result<Option<ForwardRef>, AsmError> {
        match self.blocks.last() {
            Some(frame) if frame.id == handle.id => {}
            _ => return Err(AsmError::BlockMismatch),
        }
        self.require_height()?;
        self.emit(Instruction::PopBlock)?;
        let frame = self.blocks.pop().ok_or(AsmError::BlockMismatch)?;
        match frame.kind {
            BlockKind::Loop => Ok(Some(frame.setup)),
            BlockKind::TryExcept => {
                let done = self.jump_forward()?;
                self.resolve(frame.setup)?;
                Ok(Some(done))
            }
            BlockKind::TryFinally => {
                self.load_const(Value::None)?;
                self.resolve(frame.setup)?;
                Ok(None)
            }
        }
    }

    fn innermost_loop(&self) -> Result<usize, AsmError> {
        self.blocks
            .iter()
            .rposition(|f| f.kind == BlockKind::Loop)
            .ok_or(AsmError::NotInLoop)
    }

    /// Break out of the innermost loop region. The runtime unwinds to the
    /// loop's setup target, so no operand is needed.
    pub fn break_loop(&mut self) -> Result<(), AsmError> {
        self.require_height()?;
        self.innermost_loop()?;
        self.emit(Instruction::Break)
    }

    /// Jump back to the innermost loop's head. Compiles to a direct backward
    /// jump when no protection region intervenes; otherwise to an explicit
    /// continue instruction carrying the head's address, so the runtime can
    /// unwind the intervening protections first.
    pub fn continue_loop(&mut self) -> Result<(), AsmError> {
        let height = self.require_height()?;
        let index = self.innermost_loop()?;
        let (head, head_height) = {
            let frame = &self.blocks[index];
            (frame.head, frame.head_height)
        };
        if index == self.blocks.len() - 1 {
            if height != head_height {
                return Err(AsmError::BackwardJumpMismatch {
                    expected: head_height,
                    found: height,
                });
            }
            self.emit_arg(Instruction::JumpAbsolute, head as u32)
        } else {
            // The runtime resets the stack level while unwinding, so the
            // height check does not apply across protection regions.
            self.emit_arg(Instruction::ContinueLoop, head as u32)
        }
    }

    // === Sealing ===

    /// Finalize into an immutable artifact.
    ///
    /// Fails while any block region is open or any forward reference (or
    /// label with pending jumps) is unresolved. If the end of the stream is
    /// still reachable, a return is synthesized: directly at height one,
    /// with a `none` constant at height zero.
    pub fn seal(mut self) -> Result<Code, AsmError> {
        if !self.blocks.is_empty() {
            return Err(AsmError::UnpoppedBlock(self.blocks.len()));
        }
        if self.open_refs > 0 {
            return Err(AsmError::UnresolvedReference(self.open_refs));
        }
        if let Some(height) = self.height {
            match height {
                0 => {
                    self.load_const(Value::None)?;
                    self.return_value()?;
                }
                1 => self.return_value()?,
                n => return Err(AsmError::ValuesLeftOnStack(n)),
            }
        }

        let mut code_flags = self.flags;
        if !self.varnames.is_empty() {
            code_flags |= flags::OPTIMIZED;
        }
        if self.freevars.is_empty() && self.cellvars.is_empty() {
            code_flags |= flags::NOFREE;
        }

        tracing::debug!(
            instructions = self.instructions.len(),
            constants = self.constants.len(),
            max_stack = self.max_stack,
            "sealed code artifact"
        );

        Ok(Code {
            arg_count: self.arg_count,
            varnames: self.varnames,
            names: self.names,
            freevars: self.freevars,
            cellvars: self.cellvars,
            constants: self.constants,
            instructions: self.instructions,
            max_stack: self.max_stack,
            flags: code_flags,
            first_lineno: self.line_table.first_lineno(),
            line_table: self.line_table.into_entries(),
            filename: self.filename,
            name: self.name,
        })
    }
}
