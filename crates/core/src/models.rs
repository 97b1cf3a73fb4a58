//! Domain model types shared by the store, detector, and applier.

use serde::{Deserialize, Serialize};

use crate::range::LineRange;

// ---------------------------------------------------------------------------
// Identifiers
// ---------------------------------------------------------------------------

/// Identifier of one document within a project: its path relative to the
/// working copy root, with `/` separators.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DocumentId(String);

impl DocumentId {
    pub fn new(path: impl Into<String>) -> Self {
        Self(path.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for DocumentId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for DocumentId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for DocumentId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Identifier of an immutable whole-project snapshot (a commit SHA).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RevisionId(String);

impl RevisionId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// First seven characters, for log output.
    pub fn short(&self) -> &str {
        self.0
            .char_indices()
            .nth(7)
            .map_or(&self.0[..], |(i, _)| &self.0[..i])
    }
}

impl std::fmt::Display for RevisionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RevisionId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

// ---------------------------------------------------------------------------
// Ranges, triggers, results
// ---------------------------------------------------------------------------

/// A range of lines as they existed in one specific revision.
///
/// Never re-anchored: an edit computed against an old revision keeps that
/// revision, and the applier rebases it by merging.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentRange {
    pub doc_id: DocumentId,
    pub revision_id: RevisionId,
    pub selection: LineRange,
}

impl DocumentRange {
    pub fn new(
        doc_id: impl Into<DocumentId>,
        revision_id: RevisionId,
        selection: LineRange,
    ) -> Self {
        Self {
            doc_id: doc_id.into(),
            revision_id,
            selection,
        }
    }
}

/// A candidate edit opportunity found by a trigger scanner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EditTrigger {
    /// Regions inspected to justify the edit.
    pub input_ranges: Vec<DocumentRange>,
    /// Regions the edit would modify.
    pub output_ranges: Vec<DocumentRange>,
    /// Free-form request text.
    pub request_text: String,
}

impl EditTrigger {
    /// Every range the trigger references, inputs first.
    pub fn all_ranges(&self) -> impl Iterator<Item = &DocumentRange> {
        self.input_ranges.iter().chain(self.output_ranges.iter())
    }
}

/// Kind of edit an [`EditResult`] carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EditType {
    /// Replace the selected lines with `content`.
    Replace,
    /// Attach a comment to the selected lines.
    Comment,
}

impl std::fmt::Display for EditType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Replace => write!(f, "replace"),
            Self::Comment => write!(f, "comment"),
        }
    }
}

/// A concrete, already-generated change ready to apply.
///
/// `content` replaces the whole span named by `range.selection`; it is not a
/// diff. Consumed by value by the applier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EditResult {
    #[serde(rename = "type")]
    pub edit_type: EditType,
    pub range: DocumentRange,
    pub content: String,
}

impl EditResult {
    pub fn replace(range: DocumentRange, content: impl Into<String>) -> Self {
        Self {
            edit_type: EditType::Replace,
            range,
            content: content.into(),
        }
    }

    pub fn comment(range: DocumentRange, content: impl Into<String>) -> Self {
        Self {
            edit_type: EditType::Comment,
            range,
            content: content.into(),
        }
    }
}

// ---------------------------------------------------------------------------
// Line helpers
// ---------------------------------------------------------------------------

/// Split replacement text into document lines, keeping terminators.
///
/// A trailing fragment without `\n` is terminated so it cannot fuse with the
/// line that follows the splice. Empty content yields no lines.
pub fn split_lines(content: &str) -> Vec<String> {
    content
        .split_inclusive('\n')
        .map(|line| {
            if line.ends_with('\n') {
                line.to_string()
            } else {
                format!("{line}\n")
            }
        })
        .collect()
}

/// Split a stored document into lines exactly as stored.
pub fn document_lines(text: &str) -> Vec<String> {
    text.split_inclusive('\n').map(str::to_string).collect()
}

/// `lines[..start] + replacement + lines[end..]`.
///
/// When non-empty replacement text follows an unterminated last line, that
/// line gets a `\n` so the two stay separate lines.
///
/// Callers validate the selection first.
pub fn splice_lines(
    lines: &[String],
    selection: LineRange,
    replacement: Vec<String>,
) -> Vec<String> {
    let mut out = Vec::with_capacity(lines.len() + replacement.len());
    out.extend_from_slice(&lines[..selection.start]);
    if !replacement.is_empty() {
        if let Some(last) = out.last_mut().filter(|line| !line.ends_with('\n')) {
            last.push('\n');
        }
    }
    out.extend(replacement);
    out.extend_from_slice(&lines[selection.end..]);
    out
}
