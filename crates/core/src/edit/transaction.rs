//! Scoped transaction branch.
//!
//! An [`EditTransaction`] is created by branching off an edit's anchor
//! revision and checking that branch out. It ends in exactly one of two
//! ways: [`merge`](EditTransaction::merge) folds the branch into main and
//! pushes, or the transaction is rolled back (explicitly or on drop), which
//! hard-resets main to its tip at `begin` and deletes the branch. Either
//! way the working copy is left on main.

use std::path::PathBuf;

use git2::Oid;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::errors::{EditError, GitError, StoreError};
use crate::models::{DocumentId, RevisionId};
use crate::store::GitRevisionStore;

/// An open transaction on a [`GitRevisionStore`].
///
/// Holds the store's exclusive borrow, so at most one transaction per store
/// can be open at a time.
pub struct EditTransaction<'a> {
    store: &'a mut GitRevisionStore,
    branch: String,
    main_tip: Oid,
    finished: bool,
}

impl<'a> EditTransaction<'a> {
    /// Branch off `base` and check the new branch out.
    #[instrument(skip(store), fields(base = %base.short()))]
    pub fn begin(
        store: &'a mut GitRevisionStore,
        base: &RevisionId,
        branch_prefix: &str,
    ) -> Result<Self, EditError> {
        let main_ref = format!("refs/heads/{}", store.main_branch());
        let main_tip = store.git().resolve_commit(&main_ref)?;
        let branch = format!("{}-{}", branch_prefix, Uuid::new_v4().simple());
        store.git().create_branch(&branch, base.as_str())?;

        let tx = Self { store, branch, main_tip, finished: false };
        tx.store.git().checkout_branch(&tx.branch)?;
        info!(branch = %tx.branch, main_tip = %tx.main_tip, "transaction opened");
        Ok(tx)
    }

    pub fn branch_name(&self) -> &str {
        &self.branch
    }

    /// Lines of `doc_id` at the transaction branch tip.
    pub fn read_lines(&self, doc_id: &DocumentId) -> Result<Vec<String>, EditError> {
        let tip = self.branch_tip()?;
        self.store
            .read_lines_at_oid(doc_id, tip)
            .map_err(|e| match e {
                StoreError::DocumentNotFound { doc_id, .. } => EditError::NotFound(doc_id),
                other => other.into(),
            })
    }

    /// Overwrite `doc_id` in the working tree.
    pub fn write_lines(&mut self, doc_id: &DocumentId, lines: &[String]) -> Result<(), EditError> {
        let path = self.doc_path(doc_id);
        std::fs::write(&path, lines.concat())?;
        debug!(path = %path.display(), lines = lines.len(), "document written");
        Ok(())
    }

    /// Commit `doc_id` on the transaction branch.
    pub fn commit(
        &mut self,
        doc_id: &DocumentId,
        message: &str,
        author_name: &str,
        author_email: &str,
    ) -> Result<Oid, EditError> {
        Ok(self
            .store
            .git()
            .commit_path(doc_id.as_str(), message, author_name, author_email)?)
    }

    /// Merge the branch into main, push, and delete the branch.
    ///
    /// On a conflict or any other failure the transaction rolls back as it
    /// is dropped, and the error is returned.
    #[instrument(skip_all, fields(branch = %self.branch))]
    pub fn merge(
        mut self,
        message: &str,
        author_name: &str,
        author_email: &str,
    ) -> Result<RevisionId, EditError> {
        let main = self.store.main_branch().to_string();
        let git = self.store.git();
        git.checkout_branch(&main)?;

        let outcome = match git.merge_branch(&self.branch, message, author_name, author_email) {
            Ok(outcome) => outcome,
            Err(GitError::MergeConflict(paths)) => return Err(EditError::MergeConflict(paths)),
            Err(e) => return Err(e.into()),
        };
        debug!(?outcome, "merged transaction branch");

        self.store.push_main()?;
        self.finished = true;

        if let Err(e) = self.store.git().delete_branch(&self.branch) {
            warn!(branch = %self.branch, error = %e, "failed to delete merged branch");
        }
        let revision = self.store.current_revision_id()?;
        info!(revision = %revision.short(), "transaction merged and pushed");
        Ok(revision)
    }

    /// Abandon the transaction, leaving main exactly as it was at `begin`.
    pub fn rollback(mut self) {
        self.restore_main();
    }

    fn restore_main(&mut self) {
        let git = self.store.git();
        let main = self.store.main_branch();
        if let Err(e) = git.checkout_branch(main) {
            error!(branch = main, error = %e, "rollback: failed to check out main");
        }
        if let Err(e) = git.reset_hard(self.main_tip) {
            error!(tip = %self.main_tip, error = %e, "rollback: failed to reset main");
        }
        if let Err(e) = git.delete_branch(&self.branch) {
            warn!(branch = %self.branch, error = %e, "rollback: failed to delete branch");
        }
        self.finished = true;
        info!(branch = %self.branch, tip = %self.main_tip, "transaction rolled back");
    }

    fn branch_tip(&self) -> Result<Oid, GitError> {
        self.store
            .git()
            .resolve_commit(&format!("refs/heads/{}", self.branch))
    }

    fn doc_path(&self, doc_id: &DocumentId) -> PathBuf {
        self.store.workdir().join(doc_id.as_str())
    }
}

impl Drop for EditTransaction<'_> {
    fn drop(&mut self) {
        if !self.finished {
            debug!(branch = %self.branch, "transaction dropped while open");
            self.restore_main();
        }
    }
}
