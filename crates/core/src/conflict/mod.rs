//! Conflict detection against recent human activity.
//!
//! The detector only vetoes; transactional merging in [`crate::edit`] is
//! what actually keeps concurrent edits from clobbering each other.

pub mod detector;

pub use detector::{Clock, ConflictDetector, ManualClock, SystemClock, Verdict};
