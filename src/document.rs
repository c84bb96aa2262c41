use std::ops::Range;

/// In-memory text buffer addressable by byte offset and (line, byte-column).
///
/// The line index is a vector of byte offsets where each line starts
/// (`line_starts[0] == 0`, one entry per `\n` thereafter). Range edits splice
/// the index in place; only a full-buffer replacement rebuilds it from
/// scratch.
#[derive(Debug, Clone)]
pub struct Document {
    text: String,
    line_starts: Vec<usize>,
}

/// A zero-based (line, byte-column) position inside a [`Document`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DocPosition {
    pub line: usize,
    pub column: usize,
}

/// A positional slice of a [`Document`]: the token under a cursor, with the
/// byte range it occupies. The identifier grammar recognises shape-id
/// characters (alphanumerics, `_`, `.`, `#`, `$`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentId {
    pub range: Range<usize>,
    pub text: String,
}

fn compute_line_starts(text: &str) -> Vec<usize> {
    let mut starts = vec![0];
    for (i, b) in text.bytes().enumerate() {
        if b == b'\n' {
            starts.push(i + 1);
        }
    }
    starts
}

fn is_shape_id_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '#' | '$')
}

impl Document {
    pub fn new(text: impl Into<String>) -> Self {
        let text = text.into();
        let line_starts = compute_line_starts(&text);
        Self { text, line_starts }
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    /// Full copy of the buffer, for handing to background tasks.
    pub fn copy_text(&self) -> String {
        self.text.clone()
    }

    pub fn len(&self) -> usize {
        self.text.len()
    }

    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }

    pub fn line_count(&self) -> usize {
        self.line_starts.len()
    }

    /// Apply an edit. `None` replaces the entire buffer; `Some(range)`
    /// replaces the byte range with `new_text` and splices the line index
    /// rather than rescanning the whole buffer.
    pub fn apply_edit(&mut self, range: Option<Range<usize>>, new_text: &str) {
        let Some(range) = range else {
            self.text = new_text.to_string();
            self.line_starts = compute_line_starts(&self.text);
            return;
        };

        let start = range.start.min(self.text.len());
        let end = range.end.clamp(start, self.text.len());

        self.text.replace_range(start..end, new_text);

        // Line starts strictly before the edit are untouched. Entries inside
        // [start, end] are replaced by the newlines of the inserted text;
        // entries after `end` shift by the length delta.
        let first_affected = self.line_starts.partition_point(|&s| s <= start);
        let first_after = self.line_starts.partition_point(|&s| s <= end);

        let delta = new_text.len() as isize - (end - start) as isize;
        let mut inserted: Vec<usize> = new_text
            .bytes()
            .enumerate()
            .filter(|&(_, b)| b == b'\n')
            .map(|(i, _)| start + i + 1)
            .collect();

        let tail: Vec<usize> = self.line_starts[first_after..]
            .iter()
            .map(|&s| (s as isize + delta) as usize)
            .collect();

        self.line_starts.truncate(first_affected);
        self.line_starts.append(&mut inserted);
        self.line_starts.extend(tail);
    }

    /// Byte offset of a (line, byte-column) position. Columns past the end of
    /// the line clamp to the line end; lines past the end of the buffer clamp
    /// to the buffer end.
    pub fn index_of_position(&self, line: usize, column: usize) -> usize {
        let Some(&start) = self.line_starts.get(line) else {
            return self.text.len();
        };
        (start + column).min(self.line_end(line))
    }

    /// (line, byte-column) of a byte offset.
    pub fn position_of_index(&self, offset: usize) -> DocPosition {
        let offset = offset.min(self.text.len());
        let line = match self.line_starts.binary_search(&offset) {
            Ok(idx) => idx,
            Err(idx) => idx - 1,
        };
        DocPosition {
            line,
            column: offset - self.line_starts[line],
        }
    }

    /// Byte offset of the end of `line`, excluding its terminator.
    pub fn line_end(&self, line: usize) -> usize {
        match self.line_starts.get(line + 1) {
            Some(&next) => {
                let mut end = next - 1; // strip '\n'
                if end > self.line_starts[line] && self.text.as_bytes().get(end - 1) == Some(&b'\r')
                {
                    end -= 1;
                }
                end
            }
            None => self.text.len(),
        }
    }

    /// Position one past the last character of the buffer.
    pub fn end(&self) -> DocPosition {
        self.position_of_index(self.text.len())
    }

    /// The text of `line`, without its terminator.
    pub fn line_text(&self, line: usize) -> &str {
        match self.line_starts.get(line) {
            Some(&start) => &self.text[start..self.line_end(line)],
            None => "",
        }
    }

    /// The shape-id token covering `offset`, or `None` when the offset sits
    /// on whitespace or punctuation outside any identifier.
    pub fn copy_document_id(&self, offset: usize) -> Option<DocumentId> {
        let offset = offset.min(self.text.len());
        let bytes = self.text.as_bytes();

        let at = |i: usize| bytes.get(i).map(|&b| b as char);
        // Allow a cursor resting just past the last character of a token.
        let anchor = if at(offset).is_some_and(is_shape_id_char) {
            offset
        } else if offset > 0 && at(offset - 1).is_some_and(is_shape_id_char) {
            offset - 1
        } else {
            return None;
        };

        let mut start = anchor;
        while start > 0 && at(start - 1).is_some_and(is_shape_id_char) {
            start -= 1;
        }
        let mut end = anchor + 1;
        while at(end).is_some_and(is_shape_id_char) {
            end += 1;
        }

        Some(DocumentId {
            range: start..end,
            text: self.text[start..end].to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn line_starts_track_single_char_edits() {
        let mut doc = Document::new("abc\ndef\nghi\n");
        assert_eq!(doc.line_count(), 4);

        // Insert one char in the middle line.
        doc.apply_edit(Some(5..5), "X");
        assert_eq!(doc.text(), "abc\ndXef\nghi\n");
        assert_eq!(doc.line_starts, compute_line_starts(doc.text()));

        // Delete it again.
        doc.apply_edit(Some(5..6), "");
        assert_eq!(doc.text(), "abc\ndef\nghi\n");
        assert_eq!(doc.line_starts, compute_line_starts(doc.text()));
    }

    #[test]
    fn edit_spanning_newlines_keeps_index_consistent() {
        let mut doc = Document::new("one\ntwo\nthree\nfour");
        doc.apply_edit(Some(2..9), "X\nY\nZ");
        assert_eq!(doc.text(), "onX\nY\nZhree\nfour");
        assert_eq!(doc.line_starts, compute_line_starts(doc.text()));
    }

    #[test]
    fn full_replacement_with_none_range() {
        let mut doc = Document::new("old\ntext");
        doc.apply_edit(None, "brand new");
        assert_eq!(doc.text(), "brand new");
        assert_eq!(doc.line_count(), 1);
    }

    #[test]
    fn inverse_edit_restores_text() {
        let original = "namespace com.foo\nstring Foo\n";
        let mut doc = Document::new(original);
        let removed = doc.text()[10..14].to_string();
        doc.apply_edit(Some(10..14), "XY");
        doc.apply_edit(Some(10..12), &removed);
        assert_eq!(doc.text(), original);
        assert_eq!(doc.line_starts, compute_line_starts(doc.text()));
    }

    #[test]
    fn position_round_trip() {
        let doc = Document::new("abc\ndef\r\nghi");
        for offset in 0..=doc.len() {
            let pos = doc.position_of_index(offset);
            // Round-trips except inside the \r\n terminator, which clamps.
            let back = doc.index_of_position(pos.line, pos.column);
            assert!(back == offset || doc.text().as_bytes()[back] == b'\r');
        }
        assert_eq!(doc.line_end(1), 7); // "def" excludes \r\n
        assert_eq!(doc.end(), DocPosition { line: 2, column: 3 });
    }

    #[test]
    fn copy_document_id_recognises_shape_ids() {
        let doc = Document::new("apply com.foo#Bar @length(min: 1)\n");
        let id = doc.copy_document_id(9).unwrap();
        assert_eq!(id.text, "com.foo#Bar");
        assert_eq!(&doc.text()[id.range.clone()], "com.foo#Bar");

        // Cursor at the very end of the token.
        let id = doc.copy_document_id(17).unwrap();
        assert_eq!(id.text, "com.foo#Bar");

        // Cursor between two non-identifier characters yields nothing.
        assert!(doc.copy_document_id(18).is_none());
    }

    #[test]
    fn copy_document_id_handles_member_and_control_chars() {
        let doc = Document::new("$version: \"2\"\nfoo#Bar$baz");
        let id = doc.copy_document_id(15).unwrap();
        assert_eq!(id.text, "foo#Bar$baz");
    }
}
