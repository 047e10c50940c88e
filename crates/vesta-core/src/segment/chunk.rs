//! Chunks: typed, contiguous line ranges.

use std::fmt;

use super::change_range::ChangeRange;

/// Stable identity of a chunk, preserved across edits that only adjust it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChunkId(pub(crate) u64);

impl ChunkId {
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for ChunkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "chunk_{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChunkKind {
    Blank,
    Comment,
    Statement,
}

/// A half-open range `[start, end)` of lines with a kind.
#[derive(Debug, Clone)]
pub struct Chunk {
    id: ChunkId,
    kind: ChunkKind,
    start: usize,
    end: usize,
    /// Changed offsets relative to `start`, since changes were last reported.
    pub(crate) changes: ChangeRange,
    /// Created since changes were last reported.
    pub(crate) newly_inserted: bool,
    /// Text of a statement chunk as of the last rescan.
    lines: Vec<String>,
}

impl Chunk {
    pub(crate) fn new(id: ChunkId, kind: ChunkKind, start: usize, end: usize) -> Self {
        Self {
            id,
            kind,
            start,
            end,
            changes: ChangeRange::new(),
            newly_inserted: true,
            lines: Vec::new(),
        }
    }

    pub fn id(&self) -> ChunkId {
        self.id
    }

    pub fn kind(&self) -> ChunkKind {
        self.kind
    }

    pub fn start(&self) -> usize {
        self.start
    }

    pub fn end(&self) -> usize {
        self.end
    }

    pub fn len(&self) -> usize {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }

    pub fn contains(&self, line: usize) -> bool {
        self.start <= line && line < self.end
    }

    pub fn is_statement(&self) -> bool {
        self.kind == ChunkKind::Statement
    }

    /// Lines of a statement chunk; empty for other kinds.
    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    /// Source text of a statement chunk.
    pub fn text(&self) -> String {
        self.lines.join("\n")
    }

    /// Move the chunk to `[start, end)`, recording lines gained or lost at
    /// either edge as changes.
    pub(crate) fn set_range(&mut self, start: usize, end: usize) {
        if start == self.start && end == self.end {
            return;
        }
        if !self.newly_inserted {
            if start < self.start {
                self.changes.insert(0, self.start - start);
            } else if start > self.start {
                self.changes.delete_range(0, (start - self.start).min(self.len()));
            }
            let old_end = self.end.max(start);
            if end > old_end {
                self.changes.insert(old_end - start, end - old_end);
            } else if end < old_end {
                self.changes.delete_range(end - start, old_end - start);
            }
        }
        self.start = start;
        self.end = end;
    }

    /// Shift the chunk without changing its contents.
    pub(crate) fn shift(&mut self, start: usize) {
        self.end = start + self.len();
        self.start = start;
    }

    pub(crate) fn change_line(&mut self, line: usize) {
        let offset = line - self.start;
        self.changes.change(offset, offset + 1);
    }

    pub(crate) fn insert_lines(&mut self, line: usize, count: usize) {
        self.changes.insert(line - self.start, count);
        self.end += count;
    }

    /// Remove lines `[start, end)`, which must lie inside the chunk.
    pub(crate) fn delete_lines(&mut self, start: usize, end: usize) {
        self.changes
            .delete_range(start - self.start, end - self.start);
        self.end -= end - start;
    }

    /// Replace the text of a statement chunk. Returns whether it differs
    /// from the previous text; differing lines are recorded as changes.
    pub(crate) fn set_lines(&mut self, lines: Vec<String>) -> bool {
        if self.kind != ChunkKind::Statement || lines == self.lines {
            return false;
        }
        let prefix = self
            .lines
            .iter()
            .zip(&lines)
            .take_while(|(a, b)| a == b)
            .count();
        let max_suffix = self.lines.len().min(lines.len()) - prefix;
        let suffix = self
            .lines
            .iter()
            .rev()
            .zip(lines.iter().rev())
            .take(max_suffix)
            .take_while(|(a, b)| a == b)
            .count();
        let changed_end = lines.len() - suffix;
        if changed_end > prefix {
            self.changes.change(prefix, changed_end);
        }
        self.lines = lines;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn statement(start: usize, end: usize, lines: &[&str]) -> Chunk {
        let mut chunk = Chunk::new(ChunkId(1), ChunkKind::Statement, start, end);
        chunk.set_lines(lines.iter().map(|s| s.to_string()).collect());
        chunk.newly_inserted = false;
        chunk.changes.clear();
        chunk
    }

    #[test]
    fn test_growing_at_end_marks_new_lines() {
        let mut chunk = statement(0, 1, &["1 \\"]);
        chunk.set_range(0, 2);
        assert_eq!(chunk.changes.lines(), vec![1]);
    }

    #[test]
    fn test_shrinking_at_end_is_empty_change() {
        let mut chunk = statement(0, 2, &["1 \\", " + 2"]);
        chunk.set_range(0, 1);
        assert!(!chunk.changes.is_empty());
        assert!(chunk.changes.lines().is_empty());
    }

    #[test]
    fn test_set_lines_records_differing_middle() {
        let mut chunk = statement(0, 3, &["for x in y:", "    a", "    b"]);
        assert!(chunk.set_lines(vec![
            "for x in y:".into(),
            "    c".into(),
            "    b".into()
        ]));
        assert_eq!(chunk.changes.lines(), vec![1]);
    }

    #[test]
    fn test_set_lines_identical_is_no_change() {
        let mut chunk = statement(0, 1, &["a = 1"]);
        assert!(!chunk.set_lines(vec!["a = 1".into()]));
        assert!(chunk.changes.is_empty());
    }

    #[test]
    fn test_removed_line_adds_nothing() {
        let mut chunk = statement(0, 3, &["for i in x:", "    a", "    b"]);
        chunk.delete_lines(1, 2);
        assert!(chunk.set_lines(vec!["for i in x:".into(), "    b".into()]));
        assert_eq!(chunk.end(), 2);
        assert!(chunk.changes.lines().is_empty());
    }

    #[test]
    fn test_blank_chunk_has_no_text() {
        let mut chunk = Chunk::new(ChunkId(2), ChunkKind::Blank, 0, 1);
        assert!(!chunk.set_lines(vec![String::new()]));
        assert!(chunk.lines().is_empty());
    }
}
