//! Accumulated line-range changes.

/// The smallest `[start, end)` interval of lines touched since the last
/// [`clear`](ChangeRange::clear).
///
/// Positions are kept current as lines are inserted and deleted, so the
/// range always refers to the buffer as it is now. A zero-width range
/// (`start == end`) is still a change: lines were removed at that point.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChangeRange {
    range: Option<(usize, usize)>,
}

impl ChangeRange {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.range.is_none()
    }

    pub fn start(&self) -> Option<usize> {
        self.range.map(|(start, _)| start)
    }

    pub fn end(&self) -> Option<usize> {
        self.range.map(|(_, end)| end)
    }

    pub fn bounds(&self) -> Option<(usize, usize)> {
        self.range
    }

    pub fn clear(&mut self) {
        self.range = None;
    }

    /// Record that lines `[start, end)` changed in place.
    pub fn change(&mut self, start: usize, end: usize) {
        self.range = Some(match self.range {
            None => (start, end),
            Some((s, e)) => (s.min(start), e.max(end)),
        });
    }

    /// Record `count` new lines inserted before line `at`.
    pub fn insert(&mut self, at: usize, count: usize) {
        let shift = |p: usize| if p > at { p + count } else { p };
        self.range = Some(match self.range {
            None => (at, at + count),
            Some((s, e)) => (shift(s).min(at), shift(e).max(at + count)),
        });
    }

    /// Record that lines `[start, end)` were removed.
    pub fn delete_range(&mut self, start: usize, end: usize) {
        let count = end - start;
        let map = |p: usize| {
            if p <= start {
                p
            } else if p >= end {
                p - count
            } else {
                start
            }
        };
        self.range = Some(match self.range {
            None => (start, start),
            Some((s, e)) => (map(s).min(start), map(e).max(start)),
        });
    }

    /// Changed offsets, for reporting.
    pub fn lines(&self) -> Vec<usize> {
        match self.range {
            Some((start, end)) => (start..end).collect(),
            None => Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_change_accumulates() {
        let mut changes = ChangeRange::new();
        assert!(changes.is_empty());
        changes.change(3, 4);
        changes.change(1, 2);
        assert_eq!(changes.bounds(), Some((1, 4)));
        changes.clear();
        assert!(changes.is_empty());
    }

    #[test]
    fn test_insert_shifts_later_range() {
        let mut changes = ChangeRange::new();
        changes.change(5, 6);
        changes.insert(2, 3);
        assert_eq!(changes.bounds(), Some((2, 9)));
    }

    #[test]
    fn test_insert_after_range_extends() {
        let mut changes = ChangeRange::new();
        changes.change(0, 1);
        changes.insert(1, 1);
        assert_eq!(changes.bounds(), Some((0, 2)));
    }

    #[test]
    fn test_insert_inside_range_grows() {
        let mut changes = ChangeRange::new();
        changes.change(1, 4);
        changes.insert(2, 2);
        assert_eq!(changes.bounds(), Some((1, 6)));
    }

    #[test]
    fn test_delete_collapses_to_point() {
        let mut changes = ChangeRange::new();
        changes.change(1, 2);
        changes.delete_range(1, 2);
        assert_eq!(changes.bounds(), Some((1, 1)));
        assert!(!changes.is_empty());
        assert!(changes.lines().is_empty());
    }

    #[test]
    fn test_delete_before_range_shifts() {
        let mut changes = ChangeRange::new();
        changes.change(5, 7);
        changes.delete_range(0, 2);
        assert_eq!(changes.bounds(), Some((0, 5)));
    }

    #[test]
    fn test_delete_on_empty_records_point() {
        let mut changes = ChangeRange::new();
        changes.delete_range(4, 6);
        assert_eq!(changes.bounds(), Some((4, 4)));
    }
}
