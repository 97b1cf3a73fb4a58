//! Transactional edit application.

use tracing::{debug, error, info, instrument, warn};

use crate::config::EditConfig;
use crate::edit::transaction::EditTransaction;
use crate::errors::{EditError, StoreError};
use crate::models::{split_lines, splice_lines, EditResult, EditType, RevisionId};
use crate::range::LineRange;
use crate::store::GitRevisionStore;

/// Applies generated edits to a [`GitRevisionStore`], one transaction at a
/// time.
#[derive(Debug, Clone)]
pub struct EditApplier {
    config: EditConfig,
}

impl EditApplier {
    pub fn new(config: EditConfig) -> Self {
        Self { config }
    }

    /// Apply `edit`. Returns `true` when the edit landed on main and was
    /// pushed; `false` when it was rejected or failed, in which case main is
    /// exactly as it was before the call.
    #[instrument(
        skip_all,
        fields(
            doc = %edit.range.doc_id,
            selection = %edit.range.selection,
            base = %edit.range.revision_id.short(),
            kind = %edit.edit_type,
        )
    )]
    pub fn apply(&self, store: &mut GitRevisionStore, edit: EditResult) -> bool {
        match self.try_apply(store, edit) {
            Ok(revision) => {
                info!(revision = %revision.short(), "edit applied");
                true
            }
            Err(e @ (EditError::NotFound(_)
            | EditError::InvalidRange { .. }
            | EditError::MergeConflict(_))) => {
                warn!(error = %e, "edit rejected");
                false
            }
            Err(e) => {
                error!(error = %e, "edit failed and was rolled back");
                false
            }
        }
    }

    /// Apply `edit`, returning the new main revision or the reason it was
    /// rejected.
    ///
    /// Syncs first, then stages the edit on a branch rooted at the edit's
    /// anchor revision and merges that branch onto the fresh main.
    pub fn try_apply(
        &self,
        store: &mut GitRevisionStore,
        edit: EditResult,
    ) -> Result<RevisionId, EditError> {
        let doc_id = &edit.range.doc_id;
        let selection = edit.range.selection;

        // Main must match the remote or the final push is rejected.
        store.sync()?;
        if !store.contains(doc_id)? {
            return Err(EditError::NotFound(doc_id.to_string()));
        }

        let mut tx =
            EditTransaction::begin(store, &edit.range.revision_id, &self.config.branch_prefix)?;

        let lines = tx.read_lines(doc_id)?;
        validate_selection(selection, lines.len())?;

        let new_lines = match edit.edit_type {
            EditType::Replace => self.replace(&lines, selection, &edit.content),
            EditType::Comment => {
                // Not rendered yet: release the transaction untouched and
                // report success.
                debug!("comment edit accepted without changes");
                tx.rollback();
                return Ok(store.current_revision_id()?);
            }
        };

        tx.write_lines(doc_id, &new_lines)?;
        tx.commit(
            doc_id,
            &self.config.commit_message,
            &self.config.author_name,
            &self.config.author_email,
        )?;
        let message = format!("Merge {} into main", tx.branch_name());
        tx.merge(&message, &self.config.author_name, &self.config.author_email)
    }

    /// The document `edit` would produce against its anchor revision,
    /// without touching the working copy.
    pub fn preview(
        &self,
        store: &GitRevisionStore,
        edit: &EditResult,
    ) -> Result<(Vec<String>, Vec<String>), EditError> {
        let lines = store
            .read_lines_at(&edit.range.doc_id, &edit.range.revision_id)
            .map_err(|e| match e {
                StoreError::DocumentNotFound { doc_id, .. } => EditError::NotFound(doc_id),
                other => other.into(),
            })?;
        validate_selection(edit.range.selection, lines.len())?;
        let new_lines = match edit.edit_type {
            EditType::Replace => self.replace(&lines, edit.range.selection, &edit.content),
            EditType::Comment => lines.clone(),
        };
        Ok((lines, new_lines))
    }

    fn replace(&self, lines: &[String], selection: LineRange, content: &str) -> Vec<String> {
        let mut replacement = Vec::new();
        if self.config.retain_originals_as_comments {
            for line in &lines[selection.start..selection.end] {
                let commented = format!("{}{}", self.config.comment_prefix, line);
                replacement.push(if commented.ends_with('\n') {
                    commented
                } else {
                    commented + "\n"
                });
            }
        }
        replacement.extend(split_lines(content));
        splice_lines(lines, selection, replacement)
    }
}

fn validate_selection(selection: LineRange, line_count: usize) -> Result<(), EditError> {
    if selection.fits(line_count) {
        Ok(())
    } else {
        Err(EditError::InvalidRange {
            start: selection.start,
            end: selection.end,
            line_count,
        })
    }
}

#[cfg(test)]
mod tests {
    use git2::{Repository, RepositoryInitOptions};

    use super::*;
    use crate::config::RemoteConfig;
    use crate::git::GitClient;
    use crate::models::DocumentRange;

    fn lines(v: &[&str]) -> Vec<String> {
        v.iter().map(|s| s.to_string()).collect()
    }

    /// A store cloned from a local repository holding `main.tex`.
    fn store_with_doc(root: &std::path::Path, content: &str) -> GitRevisionStore {
        let source = root.join("source");
        let mut opts = RepositoryInitOptions::new();
        opts.initial_head("master");
        Repository::init_opts(&source, &opts).unwrap();
        std::fs::write(source.join("main.tex"), content).unwrap();
        GitClient::new(&source)
            .unwrap()
            .commit_path("main.tex", "initial commit", "Test", "test@test.com")
            .unwrap();
        let remote = RemoteConfig::new(source.to_str().unwrap());
        GitRevisionStore::open_at(&remote, &EditConfig::default(), root.join("work")).unwrap()
    }

    #[test]
    fn test_validate_selection() {
        assert!(validate_selection(LineRange::new(0, 3).unwrap(), 3).is_ok());
        assert!(validate_selection(LineRange::insertion(3), 3).is_ok());
        assert!(matches!(
            validate_selection(LineRange::new(2, 5).unwrap(), 3),
            Err(EditError::InvalidRange { start: 2, end: 5, line_count: 3 })
        ));
        // Fields are public, so an inverted range can still reach the applier.
        let inverted = LineRange { start: 2, end: 1 };
        assert!(validate_selection(inverted, 3).is_err());
    }

    #[test]
    fn test_replace_plain() {
        let applier = EditApplier::new(EditConfig::default());
        let doc = lines(&["A\n", "B\n", "C\n"]);
        let out = applier.replace(&doc, LineRange::new(1, 2).unwrap(), "X\n");
        assert_eq!(out, lines(&["A\n", "X\n", "C\n"]));
    }

    #[test]
    fn test_replace_retaining_originals() {
        let config = EditConfig { retain_originals_as_comments: true, ..EditConfig::default() };
        let applier = EditApplier::new(config);
        let doc = lines(&["intro\n", "we done good\n", "end"]);
        let out = applier.replace(&doc, LineRange::new(1, 3).unwrap(), "We did well.\n");
        assert_eq!(
            out,
            lines(&["intro\n", "% we done good\n", "% end\n", "We did well.\n"])
        );
    }

    #[test]
    fn test_preview_leaves_store_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_with_doc(dir.path(), "A\nB\nC\n");
        let rev = store.current_revision_id().unwrap();
        let applier = EditApplier::new(EditConfig::default());

        let edit = EditResult::replace(
            DocumentRange::new("main.tex", rev.clone(), LineRange::new(1, 2).unwrap()),
            "X\n",
        );
        let (before, after) = applier.preview(&store, &edit).unwrap();
        assert_eq!(before, lines(&["A\n", "B\n", "C\n"]));
        assert_eq!(after, lines(&["A\n", "X\n", "C\n"]));
        assert_eq!(store.current_revision_id().unwrap(), rev);
        assert_eq!(
            std::fs::read_to_string(dir.path().join("work/main.tex")).unwrap(),
            "A\nB\nC\n"
        );

        let comment = EditResult::comment(
            DocumentRange::new("main.tex", rev.clone(), LineRange::new(0, 1).unwrap()),
            "Tighten this.",
        );
        let (before, after) = applier.preview(&store, &comment).unwrap();
        assert_eq!(before, after);

        let missing = EditResult::replace(
            DocumentRange::new("missing.tex", rev.clone(), LineRange::insertion(0)),
            "X\n",
        );
        assert!(matches!(applier.preview(&store, &missing), Err(EditError::NotFound(_))));

        let past_end = EditResult::replace(
            DocumentRange::new("main.tex", rev, LineRange::new(2, 5).unwrap()),
            "X\n",
        );
        assert!(matches!(
            applier.preview(&store, &past_end),
            Err(EditError::InvalidRange { start: 2, end: 5, line_count: 3 })
        ));
    }
}
