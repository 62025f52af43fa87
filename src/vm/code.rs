//! The sealed, immutable code artifact.

use std::sync::Arc;

use hashbrown::{HashMap, HashSet};

use crate::asm::{Instruction, LineTableEntry};
use crate::values::Value;

/// Artifact flag bits.
pub mod flags {
    /// Locals are slot-addressed (any local/argument exists).
    pub const OPTIMIZED: u32 = 0x0001;
    /// The artifact accepts a trailing variadic positional argument.
    pub const VARARGS: u32 = 0x0004;
    /// The artifact accepts a trailing keyword-collecting argument.
    pub const VARKEYWORDS: u32 = 0x0008;
    /// No free or cell variables.
    pub const NOFREE: u32 = 0x0040;
}

/// Everything the runtime needs to execute one sealed artifact.
///
/// Produced only by [`Assembler::seal`](crate::asm::Assembler::seal); all
/// invariants (patched jumps, coherent `max_stack`, closed regions) are
/// established there and never change afterwards.
pub struct Code {
    pub arg_count: u32,
    pub varnames: Vec<Arc<str>>,
    pub names: Vec<Arc<str>>,
    pub freevars: Vec<Arc<str>>,
    pub cellvars: Vec<Arc<str>>,
    pub constants: Vec<Value>,
    pub instructions: Vec<Instruction>,
    pub max_stack: u32,
    pub flags: u32,
    pub first_lineno: u32,
    pub line_table: Vec<LineTableEntry>,
    pub filename: Arc<str>,
    pub name: Arc<str>,
}

impl Code {
    pub fn has_flag(&self, bit: u32) -> bool {
        self.flags & bit != 0
    }

    /// Source line for the instruction at `offset`, walking the delta table.
    pub fn line_for_offset(&self, offset: usize) -> u32 {
        let mut line = self.first_lineno;
        let mut addr = 0usize;
        for entry in &self.line_table {
            addr += entry.addr_incr as usize;
            if addr > offset {
                break;
            }
            line += entry.line_incr;
        }
        line
    }
}

/// Full jump target of the instruction at `addr`, given the accumulated wide
/// prefix. Forward jumps are relative to the next slot; absolute jumps carry
/// the slot index directly.
fn jump_target(addr: usize, instr: &Instruction, wide: usize) -> Option<usize> {
    if let Some(offset) = instr.forward_offset() {
        return Some(addr + 1 + (wide | offset as usize));
    }
    instr.absolute_target().map(|t| wide | t as usize)
}

impl core::fmt::Debug for Code {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        writeln!(f, "Code {{")?;
        writeln!(f, "  name: {:?}", self.name)?;
        writeln!(f, "  arg_count: {}", self.arg_count)?;
        writeln!(f, "  max_stack: {}", self.max_stack)?;
        writeln!(f, "  flags: 0x{:04X}", self.flags)?;
        if !self.varnames.is_empty() {
            writeln!(f, "  varnames: {:?}", self.varnames)?;
        }
        if !self.names.is_empty() {
            writeln!(f, "  names: {:?}", self.names)?;
        }
        if !self.cellvars.is_empty() {
            writeln!(f, "  cellvars: {:?}", self.cellvars)?;
        }
        if !self.freevars.is_empty() {
            writeln!(f, "  freevars: {:?}", self.freevars)?;
        }

        if !self.constants.is_empty() {
            writeln!(f, "  constants: [")?;
            for (i, constant) in self.constants.iter().enumerate() {
                writeln!(f, "    [{}] = {:?}", i, constant)?;
            }
            writeln!(f, "  ]")?;
        } else {
            writeln!(f, "  constants: []")?;
        }

        // First pass: collect jump targets so they get labels.
        let mut jump_targets: HashSet<usize> = HashSet::new();
        let mut wide: usize = 0;
        for (addr, instr) in self.instructions.iter().enumerate() {
            if let Instruction::WideArg(high) = instr {
                wide = (wide | (*high as usize)) << 8;
                continue;
            }
            if let Some(target) = jump_target(addr, instr, wide) {
                jump_targets.insert(target);
            }
            wide = 0;
        }

        let mut sorted_targets: Vec<_> = jump_targets.into_iter().collect();
        sorted_targets.sort();
        let label_map: HashMap<usize, usize> = sorted_targets
            .into_iter()
            .enumerate()
            .map(|(i, addr)| (addr, i))
            .collect();

        // Second pass: print, annotating jumps with their target label.
        writeln!(f, "  instructions:")?;
        wide = 0;
        for (addr, instr) in self.instructions.iter().enumerate() {
            let label_prefix = if let Some(&label_num) = label_map.get(&addr) {
                format!("L{}:", label_num)
            } else {
                String::new()
            };

            if let Instruction::WideArg(high) = instr {
                wide = (wide | (*high as usize)) << 8;
                writeln!(f, "    {:4} {:>4}  {:?}", addr, label_prefix, instr)?;
                continue;
            }

            if let Some(target) = jump_target(addr, instr, wide) {
                let target_label = label_map
                    .get(&target)
                    .map(|l| format!("L{}", l))
                    .unwrap_or_else(|| format!("@{}", target));
                writeln!(
                    f,
                    "    {:4} {:>4}  {:?} (to {})",
                    addr, label_prefix, instr, target_label
                )?;
            } else {
                writeln!(f, "    {:4} {:>4}  {:?}", addr, label_prefix, instr)?;
            }
            wide = 0;
        }

        write!(f, "}}")
    }
}
