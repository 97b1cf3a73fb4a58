//! Line-range algebra.
//!
//! Pure functions over zero-based, half-open line intervals: construction,
//! the overlap test used by the conflict detector, and conversion of unified
//! diff hunk headers into ranges of the newer side.

use std::sync::OnceLock;

use regex_lite::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Zero-based, half-open line interval `[start, end)`.
///
/// `start == end` is an insertion point rather than a replacement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "(usize, usize)", into = "(usize, usize)")]
pub struct LineRange {
    pub start: usize,
    pub end: usize,
}

impl LineRange {
    /// Returns `None` when `end < start`.
    pub fn new(start: usize, end: usize) -> Option<Self> {
        (end >= start).then_some(Self { start, end })
    }

    /// Zero-width range at `at`.
    pub fn insertion(at: usize) -> Self {
        Self { start: at, end: at }
    }

    pub fn len(&self) -> usize {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }

    /// Whether both bounds lie within a document of `line_count` lines.
    pub fn fits(&self, line_count: usize) -> bool {
        self.start <= self.end && self.end <= line_count
    }

    /// Conservative overlap: ranges collide unless one ends strictly before
    /// the other starts. Adjacent ranges and insertion points at a boundary
    /// count as overlapping.
    pub fn overlaps(&self, other: &LineRange) -> bool {
        !(self.end < other.start || other.end < self.start)
    }
}

impl std::fmt::Display for LineRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}, {})", self.start, self.end)
    }
}

impl TryFrom<(usize, usize)> for LineRange {
    type Error = String;

    fn try_from((start, end): (usize, usize)) -> Result<Self, Self::Error> {
        LineRange::new(start, end)
            .ok_or_else(|| format!("line range end {end} precedes start {start}"))
    }
}

impl From<LineRange> for (usize, usize) {
    fn from(r: LineRange) -> Self {
        (r.start, r.end)
    }
}

/// True when `selection` overlaps any range in `changed`.
pub fn overlaps_any(selection: &LineRange, changed: &[LineRange]) -> bool {
    changed.iter().any(|c| selection.overlaps(c))
}

// ---------------------------------------------------------------------------
// Diff hunks
// ---------------------------------------------------------------------------

fn hunk_header_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?m)^@@ -(\d+)(?:,(\d+))? \+(\d+)(?:,(\d+))? @@").expect("valid hunk regex")
    })
}

/// Convert every hunk header in a unified diff into the range it covers on
/// the new side: `[newStart - 1, newStart - 1 + newCount)`.
///
/// Git omits the count when it is 1. A pure deletion (`newCount == 0`)
/// yields the insertion point `[newStart - 1, newStart - 1)`; at the top of
/// the file (`newStart == 0`) that point is 0.
pub fn hunk_ranges(diff: &str) -> Vec<LineRange> {
    let mut ranges = Vec::new();
    for caps in hunk_header_re().captures_iter(diff) {
        let new_start = caps.get(3).and_then(|m| m.as_str().parse::<usize>().ok());
        let new_count = match caps.get(4) {
            Some(m) => m.as_str().parse::<usize>().ok(),
            None => Some(1),
        };
        match (new_start, new_count) {
            (Some(start), Some(count)) => {
                let start = start.saturating_sub(1);
                ranges.push(LineRange {
                    start,
                    end: start + count,
                });
            }
            _ => warn!(header = &caps[0], "skipping unparseable hunk header"),
        }
    }
    debug!(count = ranges.len(), "parsed diff hunks");
    ranges
}
