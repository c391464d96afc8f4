use serde::{Deserialize, Serialize};

/// A compact position: an offset into a [`FileSet`].
///
/// `Pos::NONE` (zero) means "no position". Every file in a set owns the
/// half-open range `[base, base + size]`, so positions of different files
/// never collide.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct Pos(pub usize);

impl Pos {
    pub const NONE: Pos = Pos(0);

    pub fn is_valid(self) -> bool {
        self.0 != 0
    }
}

/// Resolved, human-readable position.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SourceFilePos {
    pub filename: String,
    pub offset: usize,
    pub line: usize,
    pub column: usize,
}

impl SourceFilePos {
    pub fn is_valid(&self) -> bool {
        self.line > 0
    }
}

impl std::fmt::Display for SourceFilePos {
    /// Formats as `file:line:column`, dropping the parts that are unknown
    /// and falling back to `-` when nothing is known.
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut s = self.filename.clone();
        if self.is_valid() {
            if !s.is_empty() {
                s.push(':');
            }
            s.push_str(&self.line.to_string());
            if self.column != 0 {
                s.push(':');
                s.push_str(&self.column.to_string());
            }
        }
        if s.is_empty() {
            s.push('-');
        }
        f.write_str(&s)
    }
}

/// Metadata for one source file: name, position range, and line starts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceFile {
    pub name: String,
    pub base: usize,
    pub size: usize,
    /// Byte offset of the first character of each line; `lines[0] == 0`.
    pub lines: Vec<usize>,
}

impl SourceFile {
    /// Record the start offset of a new line. Offsets must be increasing and
    /// inside the file; anything else is ignored.
    pub fn add_line(&mut self, offset: usize) {
        let last = self.lines.last().copied();
        if last.is_none_or(|l| l < offset) && offset < self.size {
            self.lines.push(offset);
        }
    }

    pub fn line_count(&self) -> usize {
        self.lines.len()
    }

    /// Position of `offset` bytes into this file.
    pub fn pos(&self, offset: usize) -> Pos {
        Pos(self.base + offset.min(self.size))
    }

    /// Position of the first character of `line` (1-based).
    pub fn line_start(&self, line: usize) -> Option<Pos> {
        if line == 0 {
            return None;
        }
        self.lines.get(line - 1).map(|&offset| self.pos(offset))
    }

    fn position(&self, pos: Pos) -> SourceFilePos {
        let offset = pos.0 - self.base;
        let idx = match self.lines.binary_search(&offset) {
            Ok(i) => i,
            Err(i) => i.saturating_sub(1),
        };
        let line_start = self.lines.get(idx).copied().unwrap_or(0);
        SourceFilePos {
            filename: self.name.clone(),
            offset,
            line: idx + 1,
            column: offset - line_start + 1,
        }
    }
}

/// The set of source files a compilation unit was built from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileSet {
    /// Base of the next file to be added.
    pub base: usize,
    pub files: Vec<SourceFile>,
}

impl Default for FileSet {
    fn default() -> Self {
        Self::new()
    }
}

impl FileSet {
    pub fn new() -> Self {
        // base 0 is reserved for Pos::NONE
        Self {
            base: 1,
            files: Vec::new(),
        }
    }

    /// Add a file of `size` bytes and return it for line registration.
    /// `base` defaults to the next free base of the set.
    pub fn add_file(&mut self, name: impl Into<String>, base: Option<usize>, size: usize) -> &mut SourceFile {
        let base = base.unwrap_or(self.base).max(self.base);
        self.files.push(SourceFile {
            name: name.into(),
            base,
            size,
            lines: vec![0],
        });
        // +1 so that the EOF position of one file is not the base of the next
        self.base = base + size + 1;
        let idx = self.files.len() - 1;
        &mut self.files[idx]
    }

    pub fn file(&self, pos: Pos) -> Option<&SourceFile> {
        if !pos.is_valid() {
            return None;
        }
        let idx = self.files.partition_point(|f| f.base <= pos.0);
        let file = self.files.get(idx.checked_sub(1)?)?;
        (pos.0 <= file.base + file.size).then_some(file)
    }

    /// Resolve a position to file/line/column. Unknown positions resolve to
    /// an invalid `SourceFilePos` that renders as `-`.
    pub fn position(&self, pos: Pos) -> SourceFilePos {
        self.file(pos)
            .map(|f| f.position(pos))
            .unwrap_or_default()
    }
}
