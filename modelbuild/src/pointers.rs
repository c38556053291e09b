//! Stage cursors
//!
//! Each pipeline stage keeps its own cursor into the pass queue. A cursor
//! starts unset (the "-1" position) and only ever moves forward.

use serde::{Deserialize, Serialize};

/// A monotonically increasing position in the pass queue
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Cursor(Option<usize>);

impl Cursor {
    /// Current position, `None` before the first advance
    pub fn get(self) -> Option<usize> {
        self.0
    }

    /// Position the next advance would move to
    pub fn next(self) -> usize {
        self.0.map_or(0, |i| i + 1)
    }

    /// Number of positions consumed so far
    pub fn count(self) -> usize {
        self.next()
    }

    /// Move forward by one and return the new position
    pub fn advance(&mut self) -> usize {
        let next = self.next();
        self.0 = Some(next);
        next
    }

    /// Signed view matching the "-1 before start" convention used in logs
    pub fn as_signed(self) -> i64 {
        self.0.map_or(-1, |i| i as i64)
    }
}

impl std::fmt::Display for Cursor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:02}", self.as_signed())
    }
}

/// The four stage cursors of a pass
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PointerSet {
    pub slew: Cursor,
    pub image: Cursor,
    pub solve: Cursor,
    pub result: Cursor,
}

impl PointerSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Put all cursors back before the first position
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// True once a result was collected for every position of a pass of length `len`
    pub fn is_complete(&self, len: usize) -> bool {
        len > 0 && self.result.get() == Some(len - 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cursor_starts_unset() {
        let cursor = Cursor::default();
        assert_eq!(cursor.get(), None);
        assert_eq!(cursor.next(), 0);
        assert_eq!(cursor.count(), 0);
        assert_eq!(cursor.as_signed(), -1);
    }

    #[test]
    fn test_cursor_advance_is_monotonic() {
        let mut cursor = Cursor::default();
        let mut last = cursor.as_signed();
        for expected in 0..5 {
            assert_eq!(cursor.advance(), expected);
            assert!(cursor.as_signed() > last);
            last = cursor.as_signed();
        }
        assert_eq!(cursor.count(), 5);
        assert_eq!(cursor.to_string(), "04");
    }

    #[test]
    fn test_pointer_set_completion() {
        let mut pointers = PointerSet::new();
        assert!(!pointers.is_complete(2));
        pointers.result.advance();
        assert!(!pointers.is_complete(2));
        pointers.result.advance();
        assert!(pointers.is_complete(2));
        assert!(!pointers.is_complete(0));

        pointers.reset();
        assert_eq!(pointers, PointerSet::default());
    }
}
