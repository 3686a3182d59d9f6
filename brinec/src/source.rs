/**
 * Copyright 2022 - Jahred Love
 *
 * Redistribution and use in source and binary forms, with or without modification,
 * are permitted provided that the following conditions are met:
 *
 * 1. Redistributions of source code must retain the above copyright notice, this
 * list of conditions and the following disclaimer.
 *
 * 2. Redistributions in binary form must reproduce the above copyright notice, this
 * list of conditions and the following disclaimer in the documentation and/or other
 * materials provided with the distribution.
 *
 * 3. Neither the name of the copyright holder nor the names of its contributors may
 * be used to endorse or promote products derived from this software without specific
 * prior written permission.
 *
 * THIS SOFTWARE IS PROVIDED BY THE COPYRIGHT HOLDERS AND CONTRIBUTORS “AS IS” AND
 * ANY EXPRESS OR IMPLIED WARRANTIES, INCLUDING, BUT NOT LIMITED TO, THE IMPLIED
 * WARRANTIES OF MERCHANTABILITY AND FITNESS FOR A PARTICULAR PURPOSE ARE DISCLAIMED.
 * IN NO EVENT SHALL THE COPYRIGHT HOLDER OR CONTRIBUTORS BE LIABLE FOR ANY DIRECT,
 * INDIRECT, INCIDENTAL, SPECIAL, EXEMPLARY, OR CONSEQUENTIAL DAMAGES (INCLUDING, BUT
 * NOT LIMITED TO, PROCUREMENT OF SUBSTITUTE GOODS OR SERVICES; LOSS OF USE, DATA, OR
 * PROFITS; OR BUSINESS INTERRUPTION) HOWEVER CAUSED AND ON ANY THEORY OF LIABILITY,
 * WHETHER IN CONTRACT, STRICT LIABILITY, OR TORT (INCLUDING NEGLIGENCE OR OTHERWISE)
 * ARISING IN ANY WAY OUT OF THE USE OF THIS SOFTWARE, EVEN IF ADVISED OF THE
 * POSSIBILITY OF SUCH DAMAGE.
 */

// Program-wide source position table. Each registered file claims a
// half-open byte range; spans use program-global offsets so a single usize
// identifies a location across every file of every package.

use std::fmt;

use crate::ast::Span;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Position {
    pub line: usize, // 1-based
    pub col: usize,  // 1-based
}

struct FileEntry {
    name: String,
    base: usize,
    len: usize,
    line_starts: Vec<usize>, // byte offsets, file-local
}

/// Registry of source files with line/column resolution.
#[derive(Default)]
pub struct PosTable {
    files: Vec<FileEntry>,
    next_base: usize,
}

impl PosTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a file's text and return the base offset for its spans.
    pub fn add_file(&mut self, name: impl Into<String>, text: &str) -> usize {
        let base = self.next_base;
        let mut line_starts = vec![0usize];
        for (i, b) in text.as_bytes().iter().enumerate() {
            if *b == b'\n' {
                line_starts.push(i + 1);
            }
        }
        self.files.push(FileEntry {
            name: name.into(),
            base,
            len: text.len(),
            line_starts,
        });
        self.next_base = base + text.len() + 1; // +1 keeps ranges disjoint for empty files
        base
    }

    fn entry_for(&self, off: usize) -> Option<&FileEntry> {
        self.files
            .iter()
            .find(|f| off >= f.base && off <= f.base + f.len)
    }

    /// Resolve a span's start offset to a file name and position.
    /// Offsets outside every registered file resolve to None.
    pub fn position(&self, span: Span) -> Option<(&str, Position)> {
        let f = self.entry_for(span.start)?;
        let local = span.start - f.base;
        let line_idx = match f.line_starts.binary_search(&local) {
            Ok(i) => i,
            Err(i) => i.saturating_sub(1),
        };
        let col = local - f.line_starts[line_idx] + 1;
        Some((
            f.name.as_str(),
            Position {
                line: line_idx + 1,
                col,
            },
        ))
    }

    /// Render "file:line:col", or "-" when the span is unregistered.
    pub fn describe(&self, span: Span) -> String {
        match self.position(span) {
            Some((name, p)) => format!("{}:{}", name, p),
            None => "-".to_string(),
        }
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.line, self.col)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn positions_resolve_across_files() {
        let mut t = PosTable::new();
        let b1 = t.add_file("a.br", "one\ntwo\n");
        let b2 = t.add_file("b.br", "xyz");
        assert_eq!(b1, 0);

        let (name, p) = t.position(Span::point(b1 + 5)).unwrap();
        assert_eq!(name, "a.br");
        assert_eq!((p.line, p.col), (2, 2));

        let (name, p) = t.position(Span::point(b2 + 1)).unwrap();
        assert_eq!(name, "b.br");
        assert_eq!((p.line, p.col), (1, 2));
    }

    #[test]
    fn unregistered_span_renders_dash() {
        let t = PosTable::new();
        assert_eq!(t.describe(Span::point(99)), "-");
    }
}
