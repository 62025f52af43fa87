//! Offset → source-line delta table.
//!
//! The builder records `(addr_incr, line_incr)` pairs as structured entries;
//! offsets are non-decreasing by construction because the instruction stream
//! is append-only. Packing the entries into a byte table is a formatting
//! concern that lives outside this crate.

use crate::asm::error::AsmError;

/// One delta entry: how far the offset and the line advanced since the
/// previous entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LineTableEntry {
    pub addr_incr: u32,
    pub line_incr: u32,
}

/// Accumulates the line table while the assembler emits instructions.
#[derive(Debug, Default)]
pub struct LineTableBuilder {
    first_lineno: Option<u32>,
    last_line: u32,
    last_offset: usize,
    entries: Vec<LineTableEntry>,
}

impl LineTableBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark the given source line as starting at `offset`.
    ///
    /// The first call fixes the artifact's first line number. Repeating the
    /// current line is a no-op; going backwards is a configuration error.
    pub fn set_lineno(&mut self, line: u32, offset: usize) -> Result<(), AsmError> {
        let Some(_) = self.first_lineno else {
            self.first_lineno = Some(line);
            self.last_line = line;
            self.last_offset = offset;
            return Ok(());
        };

        if line == self.last_line {
            return Ok(());
        }
        if line < self.last_line {
            return Err(AsmError::LineWentBackwards {
                last: self.last_line,
                line,
            });
        }

        self.entries.push(LineTableEntry {
            addr_incr: (offset - self.last_offset) as u32,
            line_incr: line - self.last_line,
        });
        self.last_line = line;
        self.last_offset = offset;
        Ok(())
    }

    pub fn first_lineno(&self) -> u32 {
        self.first_lineno.unwrap_or(0)
    }

    pub fn into_entries(self) -> Vec<LineTableEntry> {
        self.entries
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_call_sets_first_lineno() {
        let mut lt = LineTableBuilder::new();
        lt.set_lineno(10, 0).unwrap();
        assert_eq!(lt.first_lineno(), 10);
        assert!(lt.into_entries().is_empty());
    }

    #[test]
    fn test_deltas_accumulate() {
        let mut lt = LineTableBuilder::new();
        lt.set_lineno(1, 0).unwrap();
        lt.set_lineno(2, 4).unwrap();
        lt.set_lineno(2, 6).unwrap(); // same line: no entry
        lt.set_lineno(7, 9).unwrap();
        assert_eq!(
            lt.into_entries(),
            vec![
                LineTableEntry {
                    addr_incr: 4,
                    line_incr: 1
                },
                LineTableEntry {
                    addr_incr: 5,
                    line_incr: 5
                },
            ]
        );
    }

    #[test]
    fn test_line_going_backwards_is_rejected() {
        let mut lt = LineTableBuilder::new();
        lt.set_lineno(5, 0).unwrap();
        let err = lt.set_lineno(3, 2).unwrap_err();
        assert!(matches!(
            err,
            AsmError::LineWentBackwards { last: 5, line: 3 }
        ));
    }
}
