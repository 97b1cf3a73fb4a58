//! Recent-activity conflict detection.
//!
//! Before automation touches a region, the detector syncs the working copy
//! and asks whether a human changed any of the requested lines within the
//! grace period. The answer is advisory: the applier's merge is the final
//! arbiter.

use std::cell::Cell;
use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use tracing::{debug, info, instrument, warn};

use crate::config::ConflictConfig;
use crate::errors::StoreError;
use crate::models::{DocumentId, DocumentRange};
use crate::range::{LineRange, overlaps_any};
use crate::store::GitRevisionStore;

// ---------------------------------------------------------------------------
// Clocks
// ---------------------------------------------------------------------------

/// Source of wall-clock time.
pub trait Clock {
    fn now(&self) -> DateTime<Utc>;
}

/// The system clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A clock that only moves when told to.
#[derive(Debug, Clone)]
pub struct ManualClock {
    now: Cell<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self { now: Cell::new(start) }
    }

    pub fn set(&self, at: DateTime<Utc>) {
        self.now.set(at);
    }

    pub fn advance(&self, by: Duration) {
        self.now.set(self.now.get() + by);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        self.now.get()
    }
}

// ---------------------------------------------------------------------------
// Verdict
// ---------------------------------------------------------------------------

/// Outcome of assessing a set of ranges against recent activity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "verdict", rename_all = "snake_case")]
pub enum Verdict {
    /// The latest commit is older than the grace period.
    Idle { age_secs: i64 },
    /// Recent changes exist but none overlap the requested ranges.
    Clear,
    /// A requested range overlaps a recently changed range.
    Overlap {
        doc_id: DocumentId,
        selection: LineRange,
        changed: LineRange,
    },
    /// Recent changes to the document could not be computed.
    Unverifiable { doc_id: DocumentId, reason: String },
}

impl Verdict {
    pub fn is_ok(&self) -> bool {
        matches!(self, Self::Idle { .. } | Self::Clear)
    }
}

impl std::fmt::Display for Verdict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle { age_secs } => write!(f, "idle for {}s", age_secs),
            Self::Clear => write!(f, "no overlap with recent changes"),
            Self::Overlap { doc_id, selection, changed } => {
                write!(f, "{} {} overlaps recent change {}", doc_id, selection, changed)
            }
            Self::Unverifiable { doc_id, reason } => {
                write!(f, "cannot verify {}: {}", doc_id, reason)
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Detector
// ---------------------------------------------------------------------------

/// Vetoes edits that collide with very recent human activity.
pub struct ConflictDetector<C = SystemClock> {
    grace_period: Duration,
    last_n_commits: usize,
    clock: C,
}

impl ConflictDetector<SystemClock> {
    pub fn new(config: &ConflictConfig) -> Self {
        Self::with_clock(config, SystemClock)
    }
}

impl<C: Clock> ConflictDetector<C> {
    pub fn with_clock(config: &ConflictConfig, clock: C) -> Self {
        let secs = i64::try_from(config.grace_period_secs).unwrap_or(i64::MAX);
        Self {
            grace_period: Duration::try_seconds(secs).unwrap_or(Duration::MAX),
            last_n_commits: config.last_n_commits,
            clock,
        }
    }

    pub fn clock(&self) -> &C {
        &self.clock
    }

    /// `true` when none of `ranges` overlaps recent activity.
    ///
    /// Forces a sync first; a sync failure that survives the store's own
    /// recovery is returned as an error.
    pub fn is_edit_ok(
        &self,
        store: &mut GitRevisionStore,
        ranges: &[DocumentRange],
    ) -> Result<bool, StoreError> {
        Ok(self.assess(store, ranges)?.is_ok())
    }

    /// Like [`is_edit_ok`](Self::is_edit_ok), reporting why.
    #[instrument(skip_all, fields(ranges = ranges.len()))]
    pub fn assess(
        &self,
        store: &mut GitRevisionStore,
        ranges: &[DocumentRange],
    ) -> Result<Verdict, StoreError> {
        store.sync()?;

        let age = self.clock.now() - store.last_commit_time()?;
        if age > self.grace_period {
            debug!(age_secs = age.num_seconds(), "no recent activity");
            return Ok(Verdict::Idle { age_secs: age.num_seconds() });
        }

        let mut changed_by_doc: HashMap<&DocumentId, Vec<LineRange>> = HashMap::new();
        for range in ranges {
            if !changed_by_doc.contains_key(&range.doc_id) {
                match store.diff_since(&range.doc_id, self.last_n_commits) {
                    Ok(changed) => {
                        changed_by_doc.insert(&range.doc_id, changed);
                    }
                    Err(e) => {
                        warn!(doc = %range.doc_id, error = %e, "cannot compute recent changes");
                        return Ok(Verdict::Unverifiable {
                            doc_id: range.doc_id.clone(),
                            reason: e.to_string(),
                        });
                    }
                }
            }
            let changed = &changed_by_doc[&range.doc_id];
            if overlaps_any(&range.selection, changed) {
                let hit = changed
                    .iter()
                    .copied()
                    .find(|c| range.selection.overlaps(c))
                    .unwrap_or(range.selection);
                info!(
                    doc = %range.doc_id,
                    selection = %range.selection,
                    changed = %hit,
                    age_secs = age.num_seconds(),
                    "edit overlaps recent changes"
                );
                return Ok(Verdict::Overlap {
                    doc_id: range.doc_id.clone(),
                    selection: range.selection,
                    changed: hit,
                });
            }
        }
        debug!("requested ranges clear of recent changes");
        Ok(Verdict::Clear)
    }
}
