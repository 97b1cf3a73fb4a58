//! Paper remotes: one project of documents behind a common interface.
//!
//! [`GitPaperRemote`] is the production implementation, combining the
//! revision store, the conflict detector, and the edit applier.
//! [`InMemoryPaperRemote`] keeps documents in a map and is meant for tests
//! and debugging of the components that drive a remote.

use std::collections::BTreeMap;

use tracing::{debug, warn};

use crate::config::PaperSyncConfig;
use crate::conflict::{Clock, ConflictDetector, SystemClock};
use crate::edit::EditApplier;
use crate::errors::StoreError;
use crate::models::{
    split_lines, splice_lines, DocumentId, EditResult, EditTrigger, EditType, RevisionId,
};
use crate::store::GitRevisionStore;

/// A multi-document paper that edits can be checked against and applied to.
pub trait PaperRemote {
    /// Bring the local view up to date.
    fn refresh(&mut self) -> Result<(), StoreError>;

    fn current_revision_id(&self) -> Result<RevisionId, StoreError>;

    fn list_doc_ids(&self) -> Result<Vec<DocumentId>, StoreError>;

    fn get_lines(&self, doc_id: &DocumentId) -> Result<Vec<String>, StoreError>;

    /// Whether the trigger's ranges may be edited now.
    fn is_edit_ok(&mut self, trigger: &EditTrigger) -> Result<bool, StoreError>;

    /// Apply a generated edit. `false` means rejected, with nothing changed.
    fn perform_edit(&mut self, edit: EditResult) -> bool;
}

// ---------------------------------------------------------------------------
// Git
// ---------------------------------------------------------------------------

/// A paper hosted in a git repository.
pub struct GitPaperRemote<C = SystemClock> {
    store: GitRevisionStore,
    detector: ConflictDetector<C>,
    applier: EditApplier,
}

impl GitPaperRemote<SystemClock> {
    /// Open (cloning if needed) the repository named by `config`.
    pub fn from_config(config: &PaperSyncConfig) -> Result<Self, StoreError> {
        Ok(Self::new(
            GitRevisionStore::open(config)?,
            ConflictDetector::new(&config.conflict),
            EditApplier::new(config.edit.clone()),
        ))
    }
}

impl<C: Clock> GitPaperRemote<C> {
    pub fn new(
        store: GitRevisionStore,
        detector: ConflictDetector<C>,
        applier: EditApplier,
    ) -> Self {
        Self { store, detector, applier }
    }
}

impl<C: Clock> PaperRemote for GitPaperRemote<C> {
    fn refresh(&mut self) -> Result<(), StoreError> {
        self.store.sync()
    }

    fn current_revision_id(&self) -> Result<RevisionId, StoreError> {
        self.store.current_revision_id()
    }

    fn list_doc_ids(&self) -> Result<Vec<DocumentId>, StoreError> {
        self.store.list_document_ids()
    }

    fn get_lines(&self, doc_id: &DocumentId) -> Result<Vec<String>, StoreError> {
        self.store.read_lines(doc_id)
    }

    /// Checks input ranges as well as output ranges: a recent change to the
    /// context an edit was generated from makes the edit stale too.
    fn is_edit_ok(&mut self, trigger: &EditTrigger) -> Result<bool, StoreError> {
        let ranges: Vec<_> = trigger.all_ranges().cloned().collect();
        self.detector.is_edit_ok(&mut self.store, &ranges)
    }

    fn perform_edit(&mut self, edit: EditResult) -> bool {
        self.applier.apply(&mut self.store, edit)
    }
}

// ---------------------------------------------------------------------------
// In memory
// ---------------------------------------------------------------------------

/// Documents held in memory. Every successful edit bumps the revision.
#[derive(Debug, Clone, Default)]
pub struct InMemoryPaperRemote {
    documents: BTreeMap<DocumentId, Vec<String>>,
    revision: u64,
}

impl InMemoryPaperRemote {
    pub fn new<I, D>(documents: I) -> Self
    where
        I: IntoIterator<Item = (D, Vec<String>)>,
        D: Into<DocumentId>,
    {
        Self {
            documents: documents.into_iter().map(|(id, lines)| (id.into(), lines)).collect(),
            revision: 0,
        }
    }
}

impl PaperRemote for InMemoryPaperRemote {
    fn refresh(&mut self) -> Result<(), StoreError> {
        Ok(())
    }

    fn current_revision_id(&self) -> Result<RevisionId, StoreError> {
        Ok(RevisionId::new(self.revision.to_string()))
    }

    fn list_doc_ids(&self) -> Result<Vec<DocumentId>, StoreError> {
        Ok(self.documents.keys().cloned().collect())
    }

    fn get_lines(&self, doc_id: &DocumentId) -> Result<Vec<String>, StoreError> {
        self.documents
            .get(doc_id)
            .cloned()
            .ok_or_else(|| StoreError::DocumentNotFound {
                doc_id: doc_id.to_string(),
                revision: self.revision.to_string(),
            })
    }

    /// Nothing else writes to memory, so only existence is checked.
    fn is_edit_ok(&mut self, trigger: &EditTrigger) -> Result<bool, StoreError> {
        Ok(trigger.all_ranges().all(|r| self.documents.contains_key(&r.doc_id)))
    }

    fn perform_edit(&mut self, edit: EditResult) -> bool {
        let selection = edit.range.selection;
        let Some(lines) = self.documents.get_mut(&edit.range.doc_id) else {
            warn!(doc = %edit.range.doc_id, "edit target does not exist");
            return false;
        };
        if !selection.fits(lines.len()) {
            warn!(doc = %edit.range.doc_id, %selection, len = lines.len(), "edit out of range");
            return false;
        }
        match edit.edit_type {
            EditType::Replace => {
                *lines = splice_lines(lines, selection, split_lines(&edit.content));
                self.revision += 1;
            }
            EditType::Comment => debug!("comment edit accepted without changes"),
        }
        true
    }
}
