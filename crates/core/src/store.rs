//! Revision store adapter over a local git working copy.
//!
//! [`GitRevisionStore`] owns the single mutable working copy of a remotely
//! hosted document repository. Reads come from the committed snapshot at
//! the main branch tip; the working tree is only mutated inside an
//! [`EditTransaction`](crate::edit::EditTransaction) or by [`sync`].
//!
//! [`sync`]: GitRevisionStore::sync

use std::path::{Path, PathBuf};

use chrono::{DateTime, TimeZone, Utc};
use git2::Oid;
use tracing::{debug, error, info, instrument, warn};

use crate::config::{EditConfig, PaperSyncConfig, RemoteConfig};
use crate::errors::{GitError, StoreError};
use crate::git::GitClient;
use crate::models::{document_lines, DocumentId, RevisionId};
use crate::range::{hunk_ranges, LineRange};

/// Local working copy of a remote document repository.
pub struct GitRevisionStore {
    git: GitClient,
    remote: RemoteConfig,
    workdir: PathBuf,
    author_name: String,
    author_email: String,
}

impl GitRevisionStore {
    /// Open the working copy described by `config`, cloning it when absent,
    /// then bring it up to date with the remote.
    #[instrument(skip(config), fields(url = %config.remote.url))]
    pub fn open(config: &PaperSyncConfig) -> Result<Self, StoreError> {
        Self::open_at(&config.remote, &config.edit, config.workdir())
    }

    /// Like [`open`](Self::open) with an explicit working copy path.
    pub fn open_at(
        remote: &RemoteConfig,
        edit: &EditConfig,
        workdir: impl Into<PathBuf>,
    ) -> Result<Self, StoreError> {
        let workdir = workdir.into();
        let git = match GitClient::new(&workdir) {
            Ok(git) => git,
            Err(e) => {
                if workdir.exists() {
                    warn!(
                        error = %e,
                        path = %workdir.display(),
                        "working copy unusable, re-cloning"
                    );
                    std::fs::remove_dir_all(&workdir)?;
                } else if let Some(parent) = workdir.parent() {
                    std::fs::create_dir_all(parent)?;
                }
                clone_fresh(remote, &workdir).map_err(|e| StoreError::Transport {
                    url: remote.url.clone(),
                    detail: e.to_string(),
                })?
            }
        };

        let mut store = Self {
            git,
            remote: remote.clone(),
            workdir,
            author_name: edit.author_name.clone(),
            author_email: edit.author_email.clone(),
        };
        store.sync()?;
        Ok(store)
    }

    // -----------------------------------------------------------------------
    // Sync
    // -----------------------------------------------------------------------

    /// Bring the working copy up to date with the remote main branch.
    ///
    /// Idempotent when the remote has not moved. On failure the working copy
    /// is discarded and cloned again, once; a second failure is returned as
    /// [`StoreError::Transport`].
    #[instrument(skip(self), fields(url = %self.remote.url))]
    pub fn sync(&mut self) -> Result<(), StoreError> {
        let before = self.git.head_oid().ok();
        match self.pull() {
            Ok(()) => {}
            Err(e) => {
                error!(error = %e, "sync failed, falling back on discarding the working copy");
                self.reclone().map_err(|e| StoreError::Transport {
                    url: self.remote.url.clone(),
                    detail: e.to_string(),
                })?;
            }
        }
        let after = self.git.head_oid()?;
        if before == Some(after) {
            debug!(revision = %after, "already up to date");
        } else {
            info!(revision = %after, "synced");
        }
        Ok(())
    }

    fn pull(&mut self) -> Result<(), GitError> {
        let stashed = self.git.stash(&self.author_name, &self.author_email)?;
        self.git.fetch(&self.remote.remote_name, self.remote.token.as_deref())?;
        let remote_tip = self.git.remote_tip(&self.remote.remote_name, &self.remote.branch)?;

        let on_main = self.git.current_branch()?.as_deref() == Some(self.remote.branch.as_str());
        let local_tip = self.git.head_oid().ok();
        if !on_main || local_tip != Some(remote_tip) {
            if let Some(local) = local_tip {
                if on_main
                    && local != remote_tip
                    && !self.git.repo().graph_descendant_of(remote_tip, local)?
                {
                    warn!(%local, remote = %remote_tip, "local main diverged from remote, forcing");
                }
            }
            self.git.force_branch_to(&self.remote.branch, remote_tip)?;
        }

        if stashed {
            if let Err(e) = self.git.stash_pop() {
                debug!(error = %e, "nothing to pop after sync");
            }
        }
        Ok(())
    }

    fn reclone(&mut self) -> Result<(), StoreError> {
        if self.workdir.exists() {
            std::fs::remove_dir_all(&self.workdir)?;
        }
        self.git = clone_fresh(&self.remote, &self.workdir)?;
        self.pull()?;
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Reads
    // -----------------------------------------------------------------------

    /// Revision of the current snapshot (main branch tip).
    pub fn current_revision_id(&self) -> Result<RevisionId, StoreError> {
        Ok(RevisionId::new(self.git.get_head_sha()?))
    }

    /// Documents in the current snapshot matching the configured glob,
    /// sorted.
    pub fn list_document_ids(&self) -> Result<Vec<DocumentId>, StoreError> {
        let head = self.git.head_oid()?;
        let mut docs: Vec<DocumentId> = self
            .git
            .list_files_at(head)?
            .into_iter()
            .filter(|path| glob_match::glob_match(&self.remote.document_glob, path))
            .map(DocumentId::new)
            .collect();
        docs.sort();
        Ok(docs)
    }

    /// Whether `doc_id` exists in the current snapshot.
    pub fn contains(&self, doc_id: &DocumentId) -> Result<bool, StoreError> {
        let head = self.git.head_oid()?;
        Ok(self.git.read_file_at(head, doc_id.as_str())?.is_some())
    }

    /// Lines of `doc_id` in the current snapshot, terminators kept.
    pub fn read_lines(&self, doc_id: &DocumentId) -> Result<Vec<String>, StoreError> {
        let head = self.git.head_oid()?;
        self.read_lines_at_oid(doc_id, head)
    }

    /// Lines of `doc_id` as of `revision`.
    pub fn read_lines_at(
        &self,
        doc_id: &DocumentId,
        revision: &RevisionId,
    ) -> Result<Vec<String>, StoreError> {
        let oid = self.git.resolve_commit(revision.as_str())?;
        self.read_lines_at_oid(doc_id, oid)
    }

    pub(crate) fn read_lines_at_oid(
        &self,
        doc_id: &DocumentId,
        oid: Oid,
    ) -> Result<Vec<String>, StoreError> {
        let bytes = self
            .git
            .read_file_at(oid, doc_id.as_str())?
            .ok_or_else(|| StoreError::DocumentNotFound {
                doc_id: doc_id.to_string(),
                revision: oid.to_string(),
            })?;
        let text = String::from_utf8(bytes).map_err(|_| StoreError::NotUtf8(doc_id.to_string()))?;
        Ok(document_lines(&text))
    }

    /// Line ranges of `doc_id` that changed between the snapshot `n`
    /// first-parent generations back and the current one.
    ///
    /// With fewer than `n` ancestors the whole history counts as changed.
    #[instrument(skip(self))]
    pub fn diff_since(&self, doc_id: &DocumentId, n: usize) -> Result<Vec<LineRange>, StoreError> {
        let head = self.git.head_oid()?;
        let base = self.git.nth_first_parent(n)?;
        let diff = self.git.diff_path(base, head, doc_id.as_str())?;
        Ok(hunk_ranges(&diff))
    }

    /// Timestamp of the current snapshot's commit.
    pub fn last_commit_time(&self) -> Result<DateTime<Utc>, StoreError> {
        let head = self.git.head_oid()?;
        commit_time_utc(head, self.git.commit_time(head)?)
    }

    // -----------------------------------------------------------------------
    // Accessors used by transactions
    // -----------------------------------------------------------------------

    pub fn workdir(&self) -> &Path {
        &self.workdir
    }

    pub fn main_branch(&self) -> &str {
        &self.remote.branch
    }

    pub(crate) fn git(&self) -> &GitClient {
        &self.git
    }

    /// Push main to the remote.
    pub(crate) fn push_main(&self) -> Result<(), GitError> {
        self.git
            .push(&self.remote.remote_name, &self.remote.branch, self.remote.token.as_deref())
    }
}

fn clone_fresh(remote: &RemoteConfig, workdir: &Path) -> Result<GitClient, GitError> {
    GitClient::clone_repo(&remote.url, workdir, remote.token.as_deref())
}

fn commit_time_utc(oid: Oid, seconds: i64) -> Result<DateTime<Utc>, StoreError> {
    Utc.timestamp_opt(seconds, 0)
        .single()
        .ok_or_else(|| StoreError::InvalidCommitTime { revision: oid.to_string(), seconds })
}
