//! papersync core library.
//!
//! Lets an automated editor propose line-range edits to documents in a
//! git-hosted project while humans edit the same project elsewhere. Edits
//! are anchored to the revision they were computed against, vetoed when
//! they touch very recent human changes, and applied transactionally: staged
//! on a throwaway branch, merged onto main, pushed, or rolled back whole.
//!
//! Everything here is synchronous and assumes one caller per working copy.

pub mod config;
pub mod conflict;
pub mod edit;
pub mod errors;
pub mod git;
pub mod models;
pub mod range;
pub mod remote;
pub mod store;

// Re-exports for convenience.
pub use config::PaperSyncConfig;
pub use conflict::ConflictDetector;
pub use edit::EditApplier;
pub use models::{DocumentId, DocumentRange, EditResult, EditTrigger, EditType, RevisionId};
pub use range::LineRange;
pub use remote::{GitPaperRemote, InMemoryPaperRemote, PaperRemote};
pub use store::GitRevisionStore;
