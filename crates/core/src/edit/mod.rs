//! Transactional application of generated edits.
//!
//! Each edit is staged on a disposable branch rooted at the revision it was
//! computed against, then merged onto main. The merge rebases the edit over
//! anything that landed on main in the meantime; if it cannot do so cleanly
//! the whole transaction is rolled back.

pub mod applier;
pub mod transaction;

pub use applier::EditApplier;
pub use transaction::EditTransaction;
