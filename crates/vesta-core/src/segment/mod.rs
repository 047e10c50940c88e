//! Incremental segmentation of a line buffer into chunks.
//!
//! The buffer is partitioned into contiguous [`Chunk`]s of kind Blank,
//! Comment or Statement. Edits adjust chunk boundaries blindly; when the
//! outermost user action ends, only the region that can have changed is
//! re-walked, and the resulting transitions are reported as [`ChunkEvent`]s.
//!
//! ```text
//!  line  text                 class            chunk
//!  0     # setup              Comment          Comment [0, 1)
//!  1     @memoize             Decorator        ┐
//!  2     def f(x):            StatementStart   │ Statement [1, 4)
//!  3         return x * 2     Continuation     ┘
//!  4                          Blank            Blank [4, 5)
//!  5     f(2)                 StatementStart   Statement [5, 6)
//! ```
//!
//! Typing within a line that keeps its class only re-walks the chunk that
//! contains it. Anything that reclassifies a line, or inserts or removes
//! whole lines, widens the re-walk back to the preceding statement and
//! forward past any decorator run, since the statement a line belongs to
//! can then change.

mod change_range;
mod chunk;
mod classify;

use rustc_hash::{FxHashMap, FxHashSet};
use tracing::debug;

use crate::error::{Error, Result};

pub use change_range::ChangeRange;
pub use chunk::{Chunk, ChunkId, ChunkKind};
pub use classify::{LineClass, classify};

/// A transition reported after a rescan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChunkEvent {
    /// A previously reported chunk no longer exists. `line` is where the
    /// lines following it now start.
    Deleted {
        id: ChunkId,
        kind: ChunkKind,
        line: usize,
    },
    /// A chunk was created.
    Inserted { id: ChunkId },
    /// A chunk was adjusted; `lines` are the changed offsets within it,
    /// empty when lines were only removed.
    Changed { id: ChunkId, lines: Vec<usize> },
}

#[derive(Debug, Clone)]
struct Removed {
    id: ChunkId,
    kind: ChunkKind,
    line: usize,
}

/// A line buffer and its partition into chunks.
#[derive(Debug)]
pub struct Segmenter {
    lines: Vec<String>,
    /// Owning chunk of each line. `None` only transiently, during a rescan.
    line_chunks: Vec<Option<ChunkId>>,
    chunks: FxHashMap<ChunkId, Chunk>,
    next_id: u64,
    /// Lines touched since the last rescan.
    changes: ChangeRange,
    /// Whether the rescan must look beyond the enclosing chunks.
    scan_adjacent: bool,
    changed: FxHashSet<ChunkId>,
    deleted: Vec<Removed>,
    freeze_count: usize,
}

impl Default for Segmenter {
    fn default() -> Self {
        Self::new()
    }
}

impl Segmenter {
    /// An empty buffer: one empty line in one blank chunk.
    pub fn new() -> Self {
        let mut segmenter = Self {
            lines: vec![String::new()],
            line_chunks: Vec::new(),
            chunks: FxHashMap::default(),
            next_id: 0,
            changes: ChangeRange::new(),
            scan_adjacent: false,
            changed: FxHashSet::default(),
            deleted: Vec::new(),
            freeze_count: 0,
        };
        let id = segmenter.create_chunk(ChunkKind::Blank, 0, 1);
        if let Some(chunk) = segmenter.chunks.get_mut(&id) {
            chunk.newly_inserted = false;
        }
        segmenter.changed.clear();
        segmenter.line_chunks.push(Some(id));
        segmenter
    }

    // =========================================================================
    // Queries
    // =========================================================================

    pub fn line_count(&self) -> usize {
        self.lines.len()
    }

    pub fn line(&self, line: usize) -> Option<&str> {
        self.lines.get(line).map(String::as_str)
    }

    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    pub fn chunk(&self, id: ChunkId) -> Option<&Chunk> {
        self.chunks.get(&id)
    }

    /// The chunk containing `line`.
    pub fn chunk_at(&self, line: usize) -> Option<&Chunk> {
        self.line_chunks
            .get(line)
            .copied()
            .flatten()
            .and_then(|id| self.chunks.get(&id))
    }

    /// All chunks in line order.
    pub fn chunks(&self) -> impl Iterator<Item = &Chunk> {
        self.chunks_from(0)
    }

    /// Chunks in line order, starting with the one containing `line`.
    pub fn chunks_from(&self, line: usize) -> impl Iterator<Item = &Chunk> {
        let mut next = line;
        std::iter::from_fn(move || {
            while next < self.lines.len() {
                match self.chunk_at(next) {
                    Some(chunk) => {
                        next = chunk.end().max(next + 1);
                        return Some(chunk);
                    }
                    None => next += 1,
                }
            }
            None
        })
    }

    /// The whole buffer, lines joined by `\n`.
    pub fn text(&self) -> String {
        self.lines.join("\n")
    }

    /// Text between two positions, in either order.
    pub fn text_range(
        &self,
        start_line: usize,
        start_offset: usize,
        end_line: usize,
        end_offset: usize,
    ) -> Result<String> {
        let (start_line, start_offset, end_line, end_offset) =
            order_positions(start_line, start_offset, end_line, end_offset);
        let start = self.byte_position(start_line, start_offset)?;
        let end = self.byte_position(end_line, end_offset)?;
        if start_line == end_line {
            return Ok(self.lines[start_line][start..end].to_string());
        }
        let mut text = self.lines[start_line][start..].to_string();
        for line in &self.lines[start_line + 1..end_line] {
            text.push('\n');
            text.push_str(line);
        }
        text.push('\n');
        text.push_str(&self.lines[end_line][..end]);
        Ok(text)
    }

    /// Character length of `line`.
    pub fn line_length(&self, line: usize) -> Option<usize> {
        self.lines.get(line).map(|text| text.chars().count())
    }

    fn byte_position(&self, line: usize, offset: usize) -> Result<usize> {
        self.lines
            .get(line)
            .and_then(|text| byte_index(text, offset))
            .ok_or(Error::InvalidPosition { line, offset })
    }

    // =========================================================================
    // User actions
    // =========================================================================

    /// Start a group of edits; rescanning waits for the matching
    /// [`end_user_action`](Self::end_user_action).
    pub fn begin_user_action(&mut self) {
        self.freeze_count += 1;
    }

    /// End a group of edits. When the outermost group ends the buffer is
    /// rescanned and the accumulated transitions are returned.
    pub fn end_user_action(&mut self) -> Result<Vec<ChunkEvent>> {
        self.freeze_count = self.freeze_count.saturating_sub(1);
        if self.freeze_count > 0 {
            return Ok(Vec::new());
        }
        self.rescan()?;
        self.take_events()
    }

    pub fn in_user_action(&self) -> bool {
        self.freeze_count > 0
    }

    // =========================================================================
    // Editing
    // =========================================================================

    /// Insert `text` at a position; `\n`, `\r\n` and `\r` all end lines.
    pub fn insert(&mut self, line: usize, offset: usize, text: &str) -> Result<Vec<ChunkEvent>> {
        let split = self.byte_position(line, offset)?;
        if text.is_empty() {
            return Ok(Vec::new());
        }
        debug!("Inserting {:?} at {},{}", text, line, offset);

        self.begin_user_action();
        let edited = self.insert_text(line, offset, split, text);
        let events = self.end_user_action();
        edited?;
        events
    }

    fn insert_text(&mut self, line: usize, offset: usize, split: usize, text: &str) -> Result<()> {
        let pieces = split_lines(text);
        let count = pieces.len() - 1;
        let ends_with_newline = pieces.last().is_some_and(|piece| piece.is_empty()) && count > 0;
        let left = self.lines[line][..split].to_string();
        let right = self.lines[line][split..].to_string();
        let mut chunk_id = self.owner(line)?;

        if count == 0 {
            self.set_line(line, format!("{left}{text}{right}"));
            self.chunk_mut(chunk_id)?.change_line(line);
            return Ok(());
        }

        let pure = offset == 0 && ends_with_newline;
        if pure {
            // At a chunk boundary, extend the chunk before rather than the one after.
            if line > 0 && self.chunk_ref(chunk_id)?.start() == line {
                chunk_id = self.owner(line - 1)?;
            }
            self.insert_lines(line, count, chunk_id)?;
        } else if offset == 0 {
            self.insert_lines(line, count, chunk_id)?;
            self.chunk_mut(chunk_id)?.change_line(line + count);
        } else {
            self.insert_lines(line + 1, count, chunk_id)?;
            self.chunk_mut(chunk_id)?.change_line(line);
        }

        self.set_line(line, format!("{left}{}", pieces[0]));
        for (i, piece) in pieces.iter().enumerate().take(count).skip(1) {
            self.set_line(line + i, piece.to_string());
        }
        if !pure {
            self.set_line(line + count, format!("{}{right}", pieces[count]));
        }
        Ok(())
    }

    /// Delete the text between two positions, in either order.
    pub fn delete_range(
        &mut self,
        start_line: usize,
        start_offset: usize,
        end_line: usize,
        end_offset: usize,
    ) -> Result<Vec<ChunkEvent>> {
        let (start_line, start_offset, end_line, end_offset) =
            order_positions(start_line, start_offset, end_line, end_offset);
        let start = self.byte_position(start_line, start_offset)?;
        let end = self.byte_position(end_line, end_offset)?;
        if start_line == end_line && start_offset == end_offset {
            return Ok(Vec::new());
        }
        debug!(
            "Deleting from {},{} to {},{}",
            start_line, start_offset, end_line, end_offset
        );

        self.begin_user_action();
        let edited = if start_offset == 0 && end_offset == 0 {
            self.delete_lines(start_line, end_line)
        } else {
            self.delete_text(start_line, start, end_line, end, start_offset == 0)
        };
        let events = self.end_user_action();
        edited?;
        events
    }

    fn delete_text(
        &mut self,
        start_line: usize,
        start: usize,
        end_line: usize,
        end: usize,
        at_line_start: bool,
    ) -> Result<()> {
        let left = self.lines[start_line][..start].to_string();
        let right = self.lines[end_line][end..].to_string();
        if at_line_start {
            self.delete_lines(start_line, end_line)?;
        } else {
            self.delete_lines(start_line + 1, end_line + 1)?;
        }
        self.set_line(start_line, left + &right);
        let id = self.owner(start_line)?;
        self.chunk_mut(id)?.change_line(start_line);
        self.changed.insert(id);
        Ok(())
    }

    /// Delete all text, leaving one empty line.
    pub fn clear(&mut self) -> Result<Vec<ChunkEvent>> {
        let last = self.lines.len() - 1;
        let length = self.lines[last].chars().count();
        self.delete_range(0, 0, last, length)
    }

    // =========================================================================
    // Line and chunk bookkeeping
    // =========================================================================

    fn owner(&self, line: usize) -> Result<ChunkId> {
        let id = self.line_chunks.get(line).copied().flatten();
        debug_assert!(id.is_some(), "line {line} has no chunk outside of a rescan");
        id.ok_or_else(|| Error::InvalidState(format!("line {line} has no chunk")))
    }

    fn chunk_ref(&self, id: ChunkId) -> Result<&Chunk> {
        let chunk = self.chunks.get(&id);
        debug_assert!(chunk.is_some(), "{id} is not a live chunk");
        chunk.ok_or_else(|| Error::InvalidState(format!("{id} is not a live chunk")))
    }

    fn chunk_mut(&mut self, id: ChunkId) -> Result<&mut Chunk> {
        let chunk = self.chunks.get_mut(&id);
        debug_assert!(chunk.is_some(), "{id} is not a live chunk");
        chunk.ok_or_else(|| Error::InvalidState(format!("{id} is not a live chunk")))
    }

    fn create_chunk(&mut self, kind: ChunkKind, start: usize, end: usize) -> ChunkId {
        let id = ChunkId(self.next_id);
        self.next_id += 1;
        self.chunks.insert(id, Chunk::new(id, kind, start, end));
        self.changed.insert(id);
        id
    }

    /// Distinct chunks owning lines in `[start, end)`, in order.
    fn ids_in(&self, start: usize, end: usize) -> Vec<ChunkId> {
        let mut ids: Vec<ChunkId> = Vec::new();
        for id in self.line_chunks[start..end.min(self.line_chunks.len())]
            .iter()
            .flatten()
        {
            if ids.last() != Some(id) {
                ids.push(*id);
            }
        }
        ids
    }

    fn set_line(&mut self, line: usize, text: String) {
        if classify(&self.lines[line]) != classify(&text) {
            self.scan_adjacent = true;
        }
        self.lines[line] = text;
        self.changes.change(line, line + 1);
    }

    /// Insert `count` empty lines before `line`, owned by `owner`.
    fn insert_lines(&mut self, line: usize, count: usize, owner: ChunkId) -> Result<()> {
        self.line_chunks
            .splice(line..line, std::iter::repeat_n(Some(owner), count));
        self.lines
            .splice(line..line, std::iter::repeat_n(String::new(), count));

        let chunk = self.chunk_mut(owner)?;
        chunk.insert_lines(line, count);
        let following = chunk.end();
        for id in self.ids_in(following, self.lines.len()) {
            let chunk = self.chunk_mut(id)?;
            chunk.shift(chunk.start() + count);
        }
        for removed in &mut self.deleted {
            if removed.line > line {
                removed.line += count;
            }
        }

        self.changes.insert(line, count);
        self.scan_adjacent = true;
        self.changed.insert(owner);
        Ok(())
    }

    /// Remove whole lines `[start, end)`.
    fn delete_lines(&mut self, start: usize, end: usize) -> Result<()> {
        if start == end {
            return Ok(());
        }
        let count = end - start;
        for id in self.ids_in(start, self.lines.len()) {
            let chunk = self.chunk_ref(id)?;
            let (chunk_start, chunk_end) = (chunk.start(), chunk.end());
            if chunk_start >= end {
                self.chunk_mut(id)?.shift(chunk_start - count);
            } else if chunk_start >= start {
                if chunk_end <= end {
                    self.remove_chunk(id, start);
                } else {
                    let chunk = self.chunk_mut(id)?;
                    chunk.delete_lines(chunk_start, end);
                    chunk.shift(start);
                    self.changed.insert(id);
                }
            } else {
                self.chunk_mut(id)?.delete_lines(start, chunk_end.min(end));
                self.changed.insert(id);
            }
        }
        for removed in &mut self.deleted {
            if removed.line >= end {
                removed.line -= count;
            } else if removed.line > start {
                removed.line = start;
            }
        }

        self.lines.drain(start..end);
        self.line_chunks.drain(start..end);
        self.changes.delete_range(start, end);
        self.scan_adjacent = true;
        Ok(())
    }

    fn remove_chunk(&mut self, id: ChunkId, line: usize) {
        self.changed.remove(&id);
        if let Some(chunk) = self.chunks.remove(&id) {
            if !chunk.newly_inserted {
                self.deleted.push(Removed {
                    id,
                    kind: chunk.kind(),
                    line,
                });
            }
        }
    }

    // =========================================================================
    // Rescanning
    // =========================================================================

    /// Bring the chunk partition up to date with the text.
    ///
    /// Normally this runs when a user action ends; calling it early is
    /// useful when a later part of an action needs the current chunks.
    pub fn rescan(&mut self) -> Result<()> {
        let Some((mut rescan_start, mut rescan_end)) = self.changes.bounds() else {
            return Ok(());
        };
        debug!(
            "Changed {}..{}, scan_adjacent={}",
            rescan_start, rescan_end, self.scan_adjacent
        );

        rescan_start = rescan_start.min(self.lines.len());
        rescan_end = rescan_end.min(self.lines.len());
        if self.scan_adjacent {
            while rescan_start > 0 {
                rescan_start -= 1;
                let chunk = self.chunk_ref(self.owner(rescan_start)?)?;
                if chunk.is_statement() {
                    rescan_start = chunk.start();
                    break;
                }
            }

            // Stop only at an untouched statement chunk that still begins
            // with its own start line. Deleting lines can leave a chunk
            // beginning with a blank, comment or continuation line that
            // belongs to whatever statement precedes it, or a chunk whose
            // stored text still holds the deleted lines.
            let mut decorated = self.decorates_next(rescan_end);
            while rescan_end < self.lines.len() {
                let chunk = self.chunk_ref(self.owner(rescan_end)?)?;
                let starts_statement = chunk.is_statement()
                    && chunk.start() == rescan_end
                    && matches!(
                        classify(&self.lines[rescan_end]),
                        LineClass::StatementStart | LineClass::Decorator
                    );
                if starts_statement && !decorated && chunk.changes.is_empty() {
                    break;
                }
                rescan_end = chunk.end();
                decorated = self.decorates_next(rescan_end);
            }
        }

        self.changes.clear();
        self.scan_adjacent = false;

        if rescan_start >= rescan_end {
            return Ok(());
        }
        rescan_start = self.chunk_ref(self.owner(rescan_start)?)?.start();
        rescan_end = self.chunk_ref(self.owner(rescan_end - 1)?)?.end();

        debug!("Rescanning lines {}..{}", rescan_start, rescan_end);

        let mut chunk_start = rescan_start;
        let mut statement_end = rescan_start;
        let mut chunk_lines: Vec<String> = Vec::new();
        let mut seen_start = false;
        let mut prev_decorator = false;

        for line in rescan_start..rescan_end {
            let text = self.lines[line].clone();
            let class = classify(&text);
            match class {
                LineClass::Blank | LineClass::Comment => chunk_lines.push(text),
                _ if (class == LineClass::Continuation && seen_start) || prev_decorator => {
                    chunk_lines.push(text);
                    statement_end = line + 1;
                    prev_decorator = class == LineClass::Decorator;
                }
                _ => {
                    seen_start = true;
                    if !chunk_lines.is_empty() {
                        let lines = std::mem::take(&mut chunk_lines);
                        self.assign_lines(chunk_start, lines, statement_end)?;
                    }
                    chunk_start = line;
                    statement_end = line + 1;
                    chunk_lines.push(text);
                    prev_decorator = class == LineClass::Decorator;
                }
            }
        }
        self.assign_lines(chunk_start, chunk_lines, statement_end)
    }

    /// Whether the last code line before `end` is a decorator, which makes
    /// the line at `end` part of the decorated statement.
    fn decorates_next(&self, end: usize) -> bool {
        for line in self.lines[..end].iter().rev() {
            match classify(line) {
                LineClass::Decorator => return true,
                LineClass::StatementStart | LineClass::Continuation => return false,
                LineClass::Blank | LineClass::Comment => {}
            }
        }
        false
    }

    /// Chunk the lines `[chunk_start, chunk_start + lines.len())`: a
    /// statement up to `statement_end`, then runs of blank and comment lines.
    fn assign_lines(
        &mut self,
        chunk_start: usize,
        lines: Vec<String>,
        statement_end: usize,
    ) -> Result<()> {
        let region_end = chunk_start + lines.len();
        if statement_end > chunk_start {
            let statement_lines = lines[..statement_end - chunk_start].to_vec();
            let id = self.adjust_or_create_chunk(chunk_start, statement_end, ChunkKind::Statement)?;
            let chunk = self.chunk_mut(id)?;
            chunk.set_lines(statement_lines);
            if !chunk.changes.is_empty() {
                self.changed.insert(id);
            }
        }

        let mut start = statement_end;
        let mut prev_kind: Option<ChunkKind> = None;
        for line in statement_end..region_end {
            let kind = match classify(&self.lines[line]) {
                LineClass::Blank => ChunkKind::Blank,
                LineClass::Comment => ChunkKind::Comment,
                _ => ChunkKind::Statement,
            };
            if let Some(prev) = prev_kind {
                if prev != kind && line > start {
                    self.adjust_run(start, line, prev)?;
                    start = line;
                }
            }
            prev_kind = Some(kind);
        }
        if let Some(kind) = prev_kind {
            if region_end > start {
                self.adjust_run(start, region_end, kind)?;
            }
        }
        Ok(())
    }

    fn adjust_run(&mut self, start: usize, end: usize, kind: ChunkKind) -> Result<()> {
        let id = self.adjust_or_create_chunk(start, end, kind)?;
        if !self.chunk_ref(id)?.changes.is_empty() {
            self.changed.insert(id);
        }
        Ok(())
    }

    /// Make `[start, end)` a chunk of `kind`, reusing an old chunk of that
    /// kind from the range when there is one. Other chunks in the range are
    /// shrunk or removed.
    fn adjust_or_create_chunk(
        &mut self,
        start: usize,
        end: usize,
        kind: ChunkKind,
    ) -> Result<ChunkId> {
        let found = self
            .ids_in(start, end)
            .into_iter()
            .find(|id| self.chunks.get(id).is_some_and(|chunk| chunk.kind() == kind));

        let id = match found {
            Some(id) => {
                let old_end = self.chunk_ref(id)?.end();
                if old_end > end {
                    // An old chunk can only become one new chunk.
                    for slot in &mut self.line_chunks[end..old_end] {
                        *slot = None;
                    }
                }
                self.chunk_mut(id)?.set_range(start, end);
                id
            }
            None => self.create_chunk(kind, start, end),
        };

        for other in self.ids_in(start, end) {
            if other == id {
                continue;
            }
            let other_end = self.chunk_ref(other)?.end();
            if other_end <= end {
                self.remove_chunk(other, other_end);
            } else {
                self.chunk_mut(other)?.set_range(end, other_end);
            }
        }

        for slot in &mut self.line_chunks[start..end] {
            *slot = Some(id);
        }
        Ok(id)
    }

    fn take_events(&mut self) -> Result<Vec<ChunkEvent>> {
        let mut events: Vec<ChunkEvent> = self
            .deleted
            .drain(..)
            .map(|removed| ChunkEvent::Deleted {
                id: removed.id,
                kind: removed.kind,
                line: removed.line,
            })
            .collect();

        let mut changed: Vec<(usize, ChunkId)> = self
            .changed
            .drain()
            .filter_map(|id| self.chunks.get(&id).map(|chunk| (chunk.start(), id)))
            .collect();
        changed.sort();

        for (_, id) in changed {
            let chunk = self.chunk_mut(id)?;
            if chunk.newly_inserted {
                chunk.newly_inserted = false;
                chunk.changes.clear();
                events.push(ChunkEvent::Inserted { id });
            } else if !chunk.changes.is_empty() {
                let lines = chunk.changes.lines();
                chunk.changes.clear();
                events.push(ChunkEvent::Changed { id, lines });
            }
        }
        Ok(events)
    }
}

/// Byte index of character `offset` in `text`; the end is a valid offset.
fn byte_index(text: &str, offset: usize) -> Option<usize> {
    text.char_indices()
        .map(|(i, _)| i)
        .chain(std::iter::once(text.len()))
        .nth(offset)
}

/// Split on `\r\n`, `\n` or `\r`. One more piece than there are newlines.
fn split_lines(text: &str) -> Vec<&str> {
    let mut pieces = Vec::new();
    let mut start = 0;
    let bytes = text.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'\n' => {
                pieces.push(&text[start..i]);
                start = i + 1;
            }
            b'\r' => {
                pieces.push(&text[start..i]);
                if bytes.get(i + 1) == Some(&b'\n') {
                    i += 1;
                }
                start = i + 1;
            }
            _ => {}
        }
        i += 1;
    }
    pieces.push(&text[start..]);
    pieces
}

fn order_positions(
    start_line: usize,
    start_offset: usize,
    end_line: usize,
    end_offset: usize,
) -> (usize, usize, usize, usize) {
    if (start_line, start_offset) > (end_line, end_offset) {
        (end_line, end_offset, start_line, start_offset)
    } else {
        (start_line, start_offset, end_line, end_offset)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn layout(segmenter: &Segmenter) -> Vec<(ChunkKind, usize, usize)> {
        segmenter
            .chunks()
            .map(|c| (c.kind(), c.start(), c.end()))
            .collect()
    }

    use ChunkKind::{Blank as B, Comment as C, Statement as S};

    #[test]
    fn test_new_buffer_is_one_blank_chunk() {
        let segmenter = Segmenter::new();
        assert_eq!(segmenter.line_count(), 1);
        assert_eq!(layout(&segmenter), vec![(B, 0, 1)]);
    }

    #[test]
    fn test_split_lines() {
        assert_eq!(split_lines("a"), vec!["a"]);
        assert_eq!(split_lines("a\nb"), vec!["a", "b"]);
        assert_eq!(split_lines("a\r\nb\r"), vec!["a", "b", ""]);
    }

    #[test]
    fn test_byte_index_counts_characters() {
        assert_eq!(byte_index("äb", 1), Some(2));
        assert_eq!(byte_index("äb", 2), Some(3));
        assert_eq!(byte_index("äb", 3), None);
    }

    #[test]
    fn test_basic_layout() {
        let mut segmenter = Segmenter::new();
        segmenter.insert(0, 0, "1\n\n#2\ndef a():\n  3").unwrap();
        assert_eq!(
            layout(&segmenter),
            vec![(S, 0, 1), (B, 1, 2), (C, 2, 3), (S, 3, 5)]
        );
    }

    #[test]
    fn test_invalid_position() {
        let mut segmenter = Segmenter::new();
        assert!(matches!(
            segmenter.insert(1, 0, "x"),
            Err(Error::InvalidPosition { line: 1, offset: 0 })
        ));
        assert!(segmenter.insert(0, 1, "x").is_err());
    }

    #[test]
    fn test_text_range_in_either_order() {
        let mut segmenter = Segmenter::new();
        segmenter.insert(0, 0, "12\n34\n56").unwrap();
        assert_eq!(segmenter.text_range(0, 1, 2, 1).unwrap(), "2\n34\n5");
        assert_eq!(segmenter.text_range(1, 1, 0, 1).unwrap(), "2\n3");
        assert_eq!(segmenter.text_range(2, 2, 2, 2).unwrap(), "");
    }

    #[test]
    fn test_statement_chunk_text() {
        let mut segmenter = Segmenter::new();
        segmenter.insert(0, 0, "if x:\n    y\nz").unwrap();
        let chunk = segmenter.chunk_at(1).unwrap();
        assert_eq!(chunk.text(), "if x:\n    y");
        assert_eq!(segmenter.chunk_at(2).unwrap().text(), "z");
    }

    #[test]
    fn test_clear_leaves_single_blank() {
        let mut segmenter = Segmenter::new();
        segmenter.insert(0, 0, "a\nb\n").unwrap();
        segmenter.clear().unwrap();
        assert_eq!(segmenter.text(), "");
        assert_eq!(layout(&segmenter), vec![(B, 0, 1)]);
    }

    #[test]
    fn test_deleting_statement_rejoins_indented_line() {
        let mut segmenter = Segmenter::new();
        segmenter.insert(0, 0, "if x:\n    y\n\nz = 1\n\n    w").unwrap();
        segmenter.delete_range(3, 0, 4, 0).unwrap();
        assert_eq!(segmenter.text(), "if x:\n    y\n\n\n    w");
        assert_eq!(layout(&segmenter), vec![(S, 0, 5)]);
        assert_eq!(
            segmenter.chunk_at(0).unwrap().lines(),
            ["if x:", "    y", "", "", "    w"]
        );
    }

    #[test]
    fn test_deleting_leading_decorator_refreshes_text() {
        let mut segmenter = Segmenter::new();
        segmenter.insert(0, 0, "@d\nx = 1\ny = 2").unwrap();
        assert_eq!(layout(&segmenter), vec![(S, 0, 2), (S, 2, 3)]);
        segmenter.delete_range(0, 0, 1, 0).unwrap();
        assert_eq!(layout(&segmenter), vec![(S, 0, 1), (S, 1, 2)]);
        assert_eq!(segmenter.chunk_at(0).unwrap().text(), "x = 1");
    }

    #[test]
    #[cfg_attr(debug_assertions, should_panic(expected = "has no chunk"))]
    fn test_unowned_line_is_invalid_state() {
        let mut segmenter = Segmenter::new();
        segmenter.insert(0, 0, "a\nb").unwrap();
        segmenter.line_chunks[1] = None;
        assert!(matches!(segmenter.owner(1), Err(Error::InvalidState(_))));
    }

    #[test]
    #[cfg_attr(debug_assertions, should_panic(expected = "is not a live chunk"))]
    fn test_dead_chunk_is_invalid_state() {
        let mut segmenter = Segmenter::new();
        let id = segmenter.chunk_at(0).unwrap().id();
        segmenter.chunks.remove(&id);
        assert!(matches!(segmenter.chunk_ref(id), Err(Error::InvalidState(_))));
    }
}
