//! Range patch applier.
//!
//! Editors describe a change as a 1-based `(line, column)` range plus the text
//! that replaces it. The range is half-open on its end: `endColumn` points at
//! the first character that survives the edit.
//!
//! ```text
//!  line 2: "let x = 1;"          range 2:5 → 2:6, text "total"
//!               ^ ^
//!  line 2: "let total = 1;"
//! ```
//!
//! Columns count Unicode scalar values, so a splice never lands inside a
//! UTF-8 sequence.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// 1-based, end-exclusive text range in editor coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EditRange {
    #[serde(rename = "startLineNumber", alias = "startLine")]
    pub start_line: usize,
    #[serde(rename = "startColumn")]
    pub start_column: usize,
    #[serde(rename = "endLineNumber", alias = "endLine")]
    pub end_line: usize,
    #[serde(rename = "endColumn")]
    pub end_column: usize,
}

impl EditRange {
    pub fn new(start_line: usize, start_column: usize, end_line: usize, end_column: usize) -> Self {
        Self {
            start_line,
            start_column,
            end_line,
            end_column,
        }
    }

    /// Zero-width range at a single position.
    pub fn caret(line: usize, column: usize) -> Self {
        Self::new(line, column, line, column)
    }
}

/// A single contiguous substitution into a document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EditDescriptor {
    pub range: EditRange,
    /// Replacement text (may contain newlines).
    #[serde(rename = "text", alias = "replacementText", default)]
    pub text: String,
}

impl EditDescriptor {
    pub fn new(range: EditRange, text: impl Into<String>) -> Self {
        Self {
            range,
            text: text.into(),
        }
    }

    /// Edit replacing the whole of `document` with `text`.
    pub fn replace_all(document: &str, text: impl Into<String>) -> Self {
        let lines: Vec<&str> = document.split('\n').collect();
        let last = lines.len();
        let last_len = lines.last().map_or(0, |l| l.chars().count());
        Self::new(EditRange::new(1, 1, last, last_len + 1), text)
    }
}

/// Why an edit could not be placed in the current document.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PatchError {
    #[error("line {line} is outside a document of {line_count} lines")]
    LineOutOfRange { line: usize, line_count: usize },
    #[error("column {column} is outside line {line} ({length} chars)")]
    ColumnOutOfRange {
        line: usize,
        column: usize,
        length: usize,
    },
}

/// Apply `edit` to `document`, reporting coordinates that do not fit.
///
/// Any in-bounds range is spliced as given, even when its end precedes its
/// start: the prefix up to the start and the suffix from the end are both
/// kept, so the overlap appears twice.
pub fn try_apply_edit(document: &str, edit: &EditDescriptor) -> Result<String, PatchError> {
    // `split` keeps the trailing empty segment, so "a\n" is two lines.
    let lines: Vec<&str> = document.split('\n').collect();
    let range = edit.range;

    let start_line = line_index(range.start_line, lines.len())?;
    let end_line = line_index(range.end_line, lines.len())?;

    let head = lines[start_line];
    let tail = lines[end_line];
    let prefix = &head[..byte_offset(head, range.start_line, range.start_column)?];
    let suffix = &tail[byte_offset(tail, range.end_line, range.end_column)?..];

    let mut out = String::with_capacity(document.len() + edit.text.len());
    for line in &lines[..start_line] {
        out.push_str(line);
        out.push('\n');
    }
    out.push_str(prefix);
    out.push_str(&edit.text);
    out.push_str(suffix);
    for line in &lines[end_line + 1..] {
        out.push('\n');
        out.push_str(line);
    }
    Ok(out)
}

/// Apply `edit` to `document`.
///
/// An edit whose coordinates do not fit the document yields an empty
/// string instead of an error. Connected editors depend on this sentinel,
/// but it silently truncates the room's document when a stale edit races a
/// concurrent one; callers that can reject edits should use
/// [`try_apply_edit`].
pub fn apply_edit(document: &str, edit: &EditDescriptor) -> String {
    match try_apply_edit(document, edit) {
        Ok(patched) => patched,
        Err(e) => {
            log::warn!("Edit could not be applied ({e}); document truncated to empty");
            String::new()
        }
    }
}

fn line_index(line: usize, line_count: usize) -> Result<usize, PatchError> {
    if line == 0 || line > line_count {
        return Err(PatchError::LineOutOfRange { line, line_count });
    }
    Ok(line - 1)
}

/// Byte offset of 1-based `column` within `text`; `length + 1` is the end of line.
fn byte_offset(text: &str, line: usize, column: usize) -> Result<usize, PatchError> {
    let out_of_range = || PatchError::ColumnOutOfRange {
        line,
        column,
        length: text.chars().count(),
    };
    let index = column.checked_sub(1).ok_or_else(out_of_range)?;
    match text.char_indices().nth(index) {
        Some((offset, _)) => Ok(offset),
        None if index == text.chars().count() => Ok(text.len()),
        None => Err(out_of_range()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn edit(sl: usize, sc: usize, el: usize, ec: usize, text: &str) -> EditDescriptor {
        EditDescriptor::new(EditRange::new(sl, sc, el, ec), text)
    }

    #[test]
    fn test_single_line_splice() {
        let doc = "let x = 1;";
        let patched = try_apply_edit(doc, &edit(1, 5, 1, 6, "total")).unwrap();
        assert_eq!(patched, "let total = 1;");
        assert_eq!(patched, format!("{}{}{}", &doc[..4], "total", &doc[5..]));
    }

    #[test]
    fn test_insert_into_empty_document() {
        let patched = try_apply_edit("", &edit(1, 1, 1, 1, "hello")).unwrap();
        assert_eq!(patched, "hello");
    }

    #[test]
    fn test_insert_at_end_of_line() {
        let patched = try_apply_edit("abc\ndef", &edit(1, 4, 1, 4, "!")).unwrap();
        assert_eq!(patched, "abc!\ndef");
    }

    #[test]
    fn test_multi_line_deletion_collapses_lines() {
        let doc = "one\ntwo\nthree\nfour";
        let patched = try_apply_edit(doc, &edit(2, 2, 3, 3, "")).unwrap();
        assert_eq!(patched, "one\ntree\nfour");
        assert_eq!(patched.split('\n').count(), 3);
    }

    #[test]
    fn test_replacement_introducing_lines() {
        let doc = "fn main() {}";
        let patched = try_apply_edit(doc, &edit(1, 12, 1, 12, "\n    run();\n")).unwrap();
        assert_eq!(patched, "fn main() {\n    run();\n}");
        // 1 line - 0 removed + 2 introduced
        assert_eq!(patched.split('\n').count(), 3);
    }

    #[test]
    fn test_line_count_tracks_removed_and_introduced_lines() {
        let doc = "a\nb\nc\nd\ne";
        let e = edit(2, 1, 4, 2, "x\ny");
        let patched = try_apply_edit(doc, &e).unwrap();
        let removed = e.range.end_line - e.range.start_line;
        let introduced = e.text.matches('\n').count();
        assert_eq!(patched.split('\n').count(), 5 - removed + introduced);
        assert_eq!(patched, "a\nx\ny\ne");
    }

    #[test]
    fn test_trailing_newline_preserved() {
        let doc = "a\nb\n";
        let patched = try_apply_edit(doc, &edit(1, 1, 1, 2, "z")).unwrap();
        assert_eq!(patched, "z\nb\n");
    }

    #[test]
    fn test_edit_on_trailing_empty_line() {
        let patched = try_apply_edit("a\n", &edit(2, 1, 2, 1, "b")).unwrap();
        assert_eq!(patched, "a\nb");
    }

    #[test]
    fn test_full_replace_with_same_text_is_identity() {
        for doc in ["", "x", "hello\nworld", "a\n\nb\n", "ünïcödé\n→ arrows"] {
            let e = EditDescriptor::replace_all(doc, doc);
            assert_eq!(try_apply_edit(doc, &e).unwrap(), doc, "doc {doc:?}");
        }
    }

    #[test]
    fn test_full_replace_with_new_text() {
        let doc = "old\ncontent";
        let e = EditDescriptor::replace_all(doc, "new");
        assert_eq!(apply_edit(doc, &e), "new");
    }

    #[test]
    fn test_columns_count_chars_not_bytes() {
        let doc = "héllo wörld";
        let patched = try_apply_edit(doc, &edit(1, 8, 1, 9, "o")).unwrap();
        assert_eq!(patched, "héllo world");
    }

    #[test]
    fn test_line_out_of_range_is_error() {
        let err = try_apply_edit("a\nb", &edit(3, 1, 3, 1, "x")).unwrap_err();
        assert_eq!(err, PatchError::LineOutOfRange { line: 3, line_count: 2 });
    }

    #[test]
    fn test_zero_line_is_error() {
        assert!(matches!(
            try_apply_edit("a", &edit(0, 1, 1, 1, "x")),
            Err(PatchError::LineOutOfRange { line: 0, .. })
        ));
    }

    #[test]
    fn test_column_out_of_range_is_error() {
        let err = try_apply_edit("abc", &edit(1, 6, 1, 6, "x")).unwrap_err();
        assert!(matches!(err, PatchError::ColumnOutOfRange { column: 6, length: 3, .. }));
    }

    #[test]
    fn test_backwards_range_in_bounds_still_splices() {
        let doc = "abcdef\nsecond line";
        assert_eq!(apply_edit(doc, &edit(1, 4, 1, 2, "X")), "abcXbcdef\nsecond line");

        // End line above the start line: lines between the two repeat.
        assert_eq!(
            try_apply_edit("abc\ndef\nghi", &edit(3, 2, 1, 2, "-")).unwrap(),
            "abc\ndef\ng-bc\ndef\nghi"
        );
    }

    #[test]
    fn test_out_of_bounds_returns_empty_sentinel() {
        let doc = "line one\nline two";
        assert_eq!(apply_edit(doc, &edit(5, 1, 5, 1, "x")), "");
        assert_eq!(apply_edit(doc, &edit(1, 1, 9, 1, "x")), "");
        assert_eq!(apply_edit(doc, &edit(1, 40, 1, 40, "x")), "");
    }

    #[test]
    fn test_descriptor_wire_shape() {
        let json = r#"{"range":{"startLineNumber":1,"startColumn":2,"endLineNumber":1,"endColumn":3},"text":"Z"}"#;
        let parsed: EditDescriptor = serde_json::from_str(json).unwrap();
        assert_eq!(parsed, edit(1, 2, 1, 3, "Z"));
        assert_eq!(apply_edit("abc", &parsed), "aZc");
    }

    #[test]
    fn test_descriptor_accepts_alias_names() {
        let json = r#"{"range":{"startLine":1,"startColumn":1,"endLine":1,"endColumn":1},"replacementText":"hi"}"#;
        let parsed: EditDescriptor = serde_json::from_str(json).unwrap();
        assert_eq!(parsed.text, "hi");
        assert_eq!(parsed.range, EditRange::caret(1, 1));
    }
}
