use core::fmt;

/// Operand stack with a size ceiling enforced in debug builds.
///
/// Sealed artifacts carry a proven `max_stack`, so overflow here means the
/// assembler's height tracking is wrong; the debug assertion exists to catch
/// that during development without taxing release builds.
pub struct Stack<T> {
    items: Vec<T>,
    max_size: usize,
}

impl<T> Stack<T> {
    pub fn new(max_size: usize) -> Self {
        Self {
            items: Vec::with_capacity(max_size.min(256)),
            max_size,
        }
    }

    #[inline]
    pub fn push(&mut self, value: T) {
        debug_assert!(
            self.items.len() < self.max_size,
            "operand stack exceeded its proven ceiling of {}",
            self.max_size
        );
        self.items.push(value);
    }

    #[inline]
    pub fn pop(&mut self) -> Option<T> {
        self.items.pop()
    }

    #[inline]
    pub fn peek(&self) -> Option<&T> {
        self.items.last()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Remove the top `n` values, returning them bottom-to-top.
    /// Returns `None` (removing nothing) if fewer than `n` are present.
    pub fn pop_n(&mut self, n: usize) -> Option<Vec<T>> {
        if n > self.items.len() {
            return None;
        }
        Some(self.items.split_off(self.items.len() - n))
    }
}

impl<T: fmt::Debug> fmt::Debug for Stack<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Stack")
            .field("items", &self.items)
            .field("max_size", &self.max_size)
            .finish()
    }
}
