//! Local Git repository operations via `git2`.

use std::cell::RefCell;
use std::path::{Path, PathBuf};

use git2::build::CheckoutBuilder;
use git2::{
    BranchType, Cred, DiffFormat, DiffOptions, ErrorCode, FetchOptions, ObjectType, Oid,
    PushOptions, RemoteCallbacks, Repository, ResetType, Signature, StatusOptions, TreeWalkMode,
    TreeWalkResult,
};
use tracing::{debug, info, instrument, warn};

use crate::errors::GitError;

/// High-level Git client wrapping a `git2::Repository`.
pub struct GitClient {
    repo: Repository,
    repo_path: PathBuf,
}

/// Outcome of merging a local branch into the current branch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MergeOutcome {
    /// The branch adds nothing new.
    UpToDate,
    /// The current branch was moved forward to the branch tip.
    FastForward(Oid),
    /// A two-parent merge commit was created.
    Merged(Oid),
}

fn remote_callbacks<'a>(token: Option<&str>) -> RemoteCallbacks<'a> {
    let mut callbacks = RemoteCallbacks::new();
    if let Some(tok) = token {
        let tok = tok.to_string();
        callbacks.credentials(move |_url, username, _allowed| {
            Cred::userpass_plaintext(username.unwrap_or("git"), &tok)
        });
    }
    callbacks
}

fn force_checkout() -> CheckoutBuilder<'static> {
    let mut builder = CheckoutBuilder::new();
    builder.force();
    builder
}

impl GitClient {
    /// Open an existing Git repository at `repo_path`.
    pub fn new<P: AsRef<Path>>(repo_path: P) -> Result<Self, GitError> {
        let path = repo_path.as_ref();
        info!(path = %path.display(), "opening git repository");
        let repo = Repository::open(path)
            .map_err(|_| GitError::RepositoryNotFound(path.display().to_string()))?;
        Ok(Self { repo, repo_path: path.to_path_buf() })
    }

    /// Clone a remote repository to `path`.
    #[instrument(skip(token), fields(url = %url, path = %path.display()))]
    pub fn clone_repo(url: &str, path: &Path, token: Option<&str>) -> Result<Self, GitError> {
        info!("cloning git repository");
        let mut fetch_opts = FetchOptions::new();
        fetch_opts.remote_callbacks(remote_callbacks(token));
        let mut builder = git2::build::RepoBuilder::new();
        builder.fetch_options(fetch_opts);
        let repo = builder.clone(url, path)?;
        info!("clone completed");
        Ok(Self { repo, repo_path: path.to_path_buf() })
    }

    pub fn repo_path(&self) -> &Path { &self.repo_path }
    pub fn repo(&self) -> &Repository { &self.repo }

    /// Fetch from a named remote.
    #[instrument(skip(self, token))]
    pub fn fetch(&self, remote_name: &str, token: Option<&str>) -> Result<(), GitError> {
        info!(remote = remote_name, "fetching");
        let mut remote = self.repo.find_remote(remote_name)?;
        let mut fetch_opts = FetchOptions::new();
        fetch_opts.remote_callbacks(remote_callbacks(token));
        remote.fetch(&[] as &[&str], Some(&mut fetch_opts), None)?;
        debug!("fetch completed");
        Ok(())
    }

    /// Tip of `refs/remotes/<remote>/<branch>` as of the last fetch.
    pub fn remote_tip(&self, remote_name: &str, branch: &str) -> Result<Oid, GitError> {
        let refname = format!("refs/remotes/{}/{}", remote_name, branch);
        let reference = self
            .repo
            .find_reference(&refname)
            .map_err(|_| GitError::RefNotFound(refname.clone()))?;
        Ok(reference.peel_to_commit()?.id())
    }

    /// Return the OID of HEAD.
    pub fn head_oid(&self) -> Result<Oid, GitError> {
        Ok(self.repo.head()?.peel_to_commit()?.id())
    }

    /// Return the SHA of HEAD.
    pub fn get_head_sha(&self) -> Result<String, GitError> {
        Ok(self.head_oid()?.to_string())
    }

    /// Short name of the checked-out branch, `None` when HEAD is detached.
    pub fn current_branch(&self) -> Result<Option<String>, GitError> {
        let head = self.repo.head()?;
        if !head.is_branch() {
            return Ok(None);
        }
        Ok(head.shorthand().map(str::to_string))
    }

    /// Committer timestamp (Unix seconds) of a commit.
    pub fn commit_time(&self, oid: Oid) -> Result<i64, GitError> {
        Ok(self.repo.find_commit(oid)?.time().seconds())
    }

    /// Resolve a full or abbreviated SHA to a commit OID.
    pub fn resolve_commit(&self, rev: &str) -> Result<Oid, GitError> {
        let obj = self
            .repo
            .revparse_single(rev)
            .map_err(|_| GitError::RefNotFound(rev.to_string()))?;
        Ok(obj.peel_to_commit()?.id())
    }

    /// Walk `n` first-parent steps back from HEAD. `None` when history is
    /// shorter than that.
    pub fn nth_first_parent(&self, n: usize) -> Result<Option<Oid>, GitError> {
        let mut commit = self.repo.head()?.peel_to_commit()?;
        for _ in 0..n {
            if commit.parent_count() == 0 {
                return Ok(None);
            }
            commit = commit.parent(0)?;
        }
        Ok(Some(commit.id()))
    }

    /// Whether tracked files have uncommitted modifications.
    pub fn is_dirty(&self) -> Result<bool, GitError> {
        let mut opts = StatusOptions::new();
        opts.include_untracked(false).include_ignored(false);
        Ok(!self.repo.statuses(Some(&mut opts))?.is_empty())
    }

    /// Stash tracked modifications. Returns `false` when there was nothing
    /// to stash.
    #[instrument(skip(self))]
    pub fn stash(&mut self, author_name: &str, author_email: &str) -> Result<bool, GitError> {
        if !self.is_dirty()? {
            return Ok(false);
        }
        let sig = Signature::now(author_name, author_email)?;
        match self.repo.stash_save(&sig, "papersync: pre-sync stash", None) {
            Ok(oid) => {
                info!(stash = %oid, "stashed local modifications");
                Ok(true)
            }
            Err(e) if e.code() == ErrorCode::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// Re-apply and drop the most recent stash entry.
    pub fn stash_pop(&mut self) -> Result<(), GitError> {
        self.repo.stash_pop(0, None)?;
        debug!("stash popped");
        Ok(())
    }

    /// Point local `branch` at `oid` (creating it if needed), make it HEAD,
    /// and force the working tree to match.
    #[instrument(skip(self))]
    pub fn force_branch_to(&self, branch: &str, oid: Oid) -> Result<(), GitError> {
        let refname = format!("refs/heads/{}", branch);
        self.repo.reference(&refname, oid, true, "papersync: sync to remote tip")?;
        self.repo.set_head(&refname)?;
        self.repo.checkout_head(Some(&mut force_checkout()))?;
        debug!(branch, %oid, "branch moved");
        Ok(())
    }

    /// Create a new branch pointing at `from_sha`.
    #[instrument(skip(self))]
    pub fn create_branch(&self, name: &str, from_sha: &str) -> Result<(), GitError> {
        let oid = self.resolve_commit(from_sha)?;
        let commit = self.repo.find_commit(oid)?;
        self.repo.branch(name, &commit, false)?;
        info!(name, from_sha, "created branch");
        Ok(())
    }

    /// Check out a local branch, overwriting working tree changes.
    #[instrument(skip(self))]
    pub fn checkout_branch(&self, name: &str) -> Result<(), GitError> {
        let refname = format!("refs/heads/{}", name);
        let obj = self
            .repo
            .revparse_single(&refname)
            .map_err(|_| GitError::RefNotFound(refname.clone()))?;
        self.repo.checkout_tree(&obj, Some(&mut force_checkout()))?;
        self.repo.set_head(&refname)?;
        debug!(name, "checked out branch");
        Ok(())
    }

    /// Delete a local branch.
    #[instrument(skip(self))]
    pub fn delete_branch(&self, name: &str) -> Result<(), GitError> {
        let mut branch = self.repo.find_branch(name, BranchType::Local)?;
        branch.delete()?;
        info!(name, "deleted branch");
        Ok(())
    }

    /// List all local branch names.
    pub fn list_branches(&self) -> Result<Vec<String>, GitError> {
        let branches = self.repo.branches(Some(BranchType::Local))?;
        let mut names = Vec::new();
        for branch_result in branches {
            let (branch, _) = branch_result?;
            if let Some(name) = branch.name()? { names.push(name.to_string()); }
        }
        Ok(names)
    }

    /// Stage one path (relative to the repo root) and commit it on HEAD.
    #[instrument(skip(self, message))]
    pub fn commit_path(
        &self, rel_path: &str, message: &str, author_name: &str, author_email: &str,
    ) -> Result<Oid, GitError> {
        let mut index = self.repo.index()?;
        index.add_path(Path::new(rel_path))?;
        index.write()?;
        let tree_oid = index.write_tree()?;
        let tree = self.repo.find_tree(tree_oid)?;
        let sig = Signature::now(author_name, author_email)?;
        let parent_commit = match self.repo.head() {
            Ok(head) => Some(head.peel_to_commit()?),
            Err(_) => None,
        };
        let parents: Vec<&git2::Commit> = parent_commit.iter().collect();
        let oid = self.repo.commit(Some("HEAD"), &sig, &sig, message, &tree, &parents)?;
        info!(sha = %oid, "created commit");
        Ok(oid)
    }

    /// Merge local branch `name` into the current branch.
    ///
    /// The merge is computed in memory; on conflict nothing is written and
    /// [`GitError::MergeConflict`] lists the conflicting paths.
    #[instrument(skip(self, message))]
    pub fn merge_branch(
        &self, name: &str, message: &str, author_name: &str, author_email: &str,
    ) -> Result<MergeOutcome, GitError> {
        let head_commit = self.repo.head()?.peel_to_commit()?;
        let theirs = self
            .repo
            .find_branch(name, BranchType::Local)?
            .get()
            .peel_to_commit()?;

        if head_commit.id() == theirs.id()
            || self.repo.graph_descendant_of(head_commit.id(), theirs.id())?
        {
            debug!(name, "branch already merged");
            return Ok(MergeOutcome::UpToDate);
        }

        if self.repo.graph_descendant_of(theirs.id(), head_commit.id())? {
            let mut head_ref = self.repo.head()?;
            head_ref.set_target(theirs.id(), "papersync: fast-forward merge")?;
            self.repo.checkout_head(Some(&mut force_checkout()))?;
            info!(name, sha = %theirs.id(), "fast-forwarded");
            return Ok(MergeOutcome::FastForward(theirs.id()));
        }

        let mut index = self.repo.merge_commits(&head_commit, &theirs, None)?;
        if index.has_conflicts() {
            let mut paths = Vec::new();
            for conflict in index.conflicts()? {
                let conflict = conflict?;
                let entry = conflict.our.or(conflict.their).or(conflict.ancestor);
                if let Some(entry) = entry {
                    paths.push(String::from_utf8_lossy(&entry.path).into_owned());
                }
            }
            warn!(name, ?paths, "merge conflict");
            return Err(GitError::MergeConflict(paths));
        }

        let tree_oid = index.write_tree_to(&self.repo)?;
        let tree = self.repo.find_tree(tree_oid)?;
        let sig = Signature::now(author_name, author_email)?;
        let oid = self.repo.commit(
            Some("HEAD"), &sig, &sig, message, &tree, &[&head_commit, &theirs],
        )?;
        self.repo.checkout_head(Some(&mut force_checkout()))?;
        info!(name, sha = %oid, "created merge commit");
        Ok(MergeOutcome::Merged(oid))
    }

    /// Hard-reset the current branch to `oid` and clear any in-progress
    /// merge state.
    #[instrument(skip(self))]
    pub fn reset_hard(&self, oid: Oid) -> Result<(), GitError> {
        let obj = self.repo.find_object(oid, None)?;
        self.repo.reset(&obj, ResetType::Hard, Some(&mut force_checkout()))?;
        self.repo.cleanup_state()?;
        info!(%oid, "hard reset");
        Ok(())
    }

    /// Push a local branch to a remote.
    #[instrument(skip(self, token))]
    pub fn push(
        &self,
        remote_name: &str,
        branch: &str,
        token: Option<&str>,
    ) -> Result<(), GitError> {
        info!(remote = remote_name, branch, "pushing");
        let mut remote = self.repo.find_remote(remote_name)?;
        let rejection: RefCell<Option<String>> = RefCell::new(None);
        let mut callbacks = remote_callbacks(token);
        callbacks.push_update_reference(|refname, status| {
            if let Some(msg) = status {
                warn!(refname, msg, "push rejected");
                *rejection.borrow_mut() = Some(msg.to_string());
            }
            Ok(())
        });
        let mut push_opts = PushOptions::new();
        push_opts.remote_callbacks(callbacks);
        let refspec = format!("refs/heads/{}:refs/heads/{}", branch, branch);
        remote.push(&[&refspec], Some(&mut push_opts))?;
        if let Some(err_msg) = rejection.borrow_mut().take() {
            return Err(GitError::PushRejected { branch: branch.to_string(), detail: err_msg });
        }
        info!("push completed");
        Ok(())
    }

    /// Zero-context unified diff of one path between two commits. With no
    /// `old` commit the diff is taken against the empty tree.
    pub fn diff_path(&self, old: Option<Oid>, new: Oid, path: &str) -> Result<String, GitError> {
        let new_tree = self.repo.find_commit(new)?.tree()?;
        let old_tree = match old {
            Some(oid) => Some(self.repo.find_commit(oid)?.tree()?),
            None => None,
        };
        let mut opts = DiffOptions::new();
        opts.context_lines(0).pathspec(path).disable_pathspec_match(true);
        let diff = self
            .repo
            .diff_tree_to_tree(old_tree.as_ref(), Some(&new_tree), Some(&mut opts))?;

        let mut text = String::new();
        diff.print(DiffFormat::Patch, |_delta, _hunk, line| {
            if matches!(line.origin(), '+' | '-' | ' ') {
                text.push(line.origin());
            }
            text.push_str(&String::from_utf8_lossy(line.content()));
            true
        })?;
        Ok(text)
    }

    /// Raw bytes of `path` in the tree of commit `oid`; `None` when the path
    /// is absent or not a file.
    pub fn read_file_at(&self, oid: Oid, path: &str) -> Result<Option<Vec<u8>>, GitError> {
        let tree = self.repo.find_commit(oid)?.tree()?;
        let entry = match tree.get_path(Path::new(path)) {
            Ok(entry) => entry,
            Err(e) if e.code() == ErrorCode::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let obj = entry.to_object(&self.repo)?;
        Ok(obj.as_blob().map(|blob| blob.content().to_vec()))
    }

    /// Every file path in the tree of commit `oid`, `/`-separated.
    pub fn list_files_at(&self, oid: Oid) -> Result<Vec<String>, GitError> {
        let tree = self.repo.find_commit(oid)?.tree()?;
        let mut files = Vec::new();
        tree.walk(TreeWalkMode::PreOrder, |root, entry| {
            if entry.kind() == Some(ObjectType::Blob) {
                if let Some(name) = entry.name() {
                    files.push(format!("{}{}", root, name));
                }
            }
            TreeWalkResult::Ok
        })?;
        Ok(files)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn init_with_file(dir: &Path, name: &str, content: &str) -> (GitClient, Oid) {
        Repository::init(dir).unwrap();
        let client = GitClient::new(dir).unwrap();
        std::fs::write(dir.join(name), content).unwrap();
        let oid = client.commit_path(name, "initial commit", "Test", "test@test.com").unwrap();
        (client, oid)
    }

    #[test]
    fn test_init_and_commit() {
        let dir = tempfile::tempdir().unwrap();
        let (client, oid) = init_with_file(dir.path(), "hello.txt", "hello world\n");
        assert!(!oid.is_zero());
        assert_eq!(client.get_head_sha().unwrap(), oid.to_string());
        assert_eq!(
            client.read_file_at(oid, "hello.txt").unwrap().as_deref(),
            Some(&b"hello world\n"[..])
        );
        assert!(client.read_file_at(oid, "missing.txt").unwrap().is_none());
    }

    #[test]
    fn test_create_and_delete_branch() {
        let dir = tempfile::tempdir().unwrap();
        let (client, oid) = init_with_file(dir.path(), "f.txt", "c\n");
        client.create_branch("feature", &oid.to_string()).unwrap();
        assert!(client.list_branches().unwrap().contains(&"feature".to_string()));
        client.delete_branch("feature").unwrap();
        assert!(!client.list_branches().unwrap().contains(&"feature".to_string()));
    }

    #[test]
    fn test_merge_fast_forward_and_three_way() {
        let dir = tempfile::tempdir().unwrap();
        let (client, base) = init_with_file(dir.path(), "doc.txt", "a\nb\nc\nd\ne\n");
        let main = client.current_branch().unwrap().unwrap();

        client.create_branch("one", &base.to_string()).unwrap();
        client.checkout_branch("one").unwrap();
        std::fs::write(dir.path().join("doc.txt"), "A\nb\nc\nd\ne\n").unwrap();
        client.commit_path("doc.txt", "one", "T", "t@t.com").unwrap();
        client.checkout_branch(&main).unwrap();
        let outcome = client.merge_branch("one", "merge one", "T", "t@t.com").unwrap();
        assert!(matches!(outcome, MergeOutcome::FastForward(_)));

        client.create_branch("two", &base.to_string()).unwrap();
        client.checkout_branch("two").unwrap();
        std::fs::write(dir.path().join("doc.txt"), "a\nb\nc\nd\nE\n").unwrap();
        client.commit_path("doc.txt", "two", "T", "t@t.com").unwrap();
        client.checkout_branch(&main).unwrap();
        let outcome = client.merge_branch("two", "merge two", "T", "t@t.com").unwrap();
        assert!(matches!(outcome, MergeOutcome::Merged(_)));

        let merged = std::fs::read_to_string(dir.path().join("doc.txt")).unwrap();
        assert_eq!(merged, "A\nb\nc\nd\nE\n");
    }

    #[test]
    fn test_merge_conflict_leaves_head_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let (client, base) = init_with_file(dir.path(), "doc.txt", "a\nb\nc\n");
        let main = client.current_branch().unwrap().unwrap();

        std::fs::write(dir.path().join("doc.txt"), "a\nMAIN\nc\n").unwrap();
        let main_tip = client.commit_path("doc.txt", "main edit", "T", "t@t.com").unwrap();

        client.create_branch("side", &base.to_string()).unwrap();
        client.checkout_branch("side").unwrap();
        std::fs::write(dir.path().join("doc.txt"), "a\nSIDE\nc\n").unwrap();
        client.commit_path("doc.txt", "side edit", "T", "t@t.com").unwrap();
        client.checkout_branch(&main).unwrap();

        let err = client.merge_branch("side", "merge", "T", "t@t.com").unwrap_err();
        assert!(matches!(
            err,
            GitError::MergeConflict(ref paths) if paths == &["doc.txt".to_string()]
        ));
        assert_eq!(client.head_oid().unwrap(), main_tip);
    }

    #[test]
    fn test_diff_path_zero_context() {
        let dir = tempfile::tempdir().unwrap();
        let (client, base) = init_with_file(dir.path(), "doc.txt", "a\nb\nc\nd\n");
        std::fs::write(dir.path().join("doc.txt"), "a\nB\nc\nd\n").unwrap();
        let next = client.commit_path("doc.txt", "edit", "T", "t@t.com").unwrap();
        let diff = client.diff_path(Some(base), next, "doc.txt").unwrap();
        assert!(diff.contains("@@ -2"), "unexpected diff: {diff}");
        assert!(diff.contains("+B"));
        assert_eq!(client.nth_first_parent(1).unwrap(), Some(base));
        assert_eq!(client.nth_first_parent(2).unwrap(), None);
    }

    #[test]
    fn test_list_files_nested() {
        let dir = tempfile::tempdir().unwrap();
        Repository::init(dir.path()).unwrap();
        let client = GitClient::new(dir.path()).unwrap();
        std::fs::create_dir_all(dir.path().join("sections")).unwrap();
        std::fs::write(dir.path().join("sections/intro.tex"), "x\n").unwrap();
        let oid = client.commit_path("sections/intro.tex", "add", "T", "t@t.com").unwrap();
        assert_eq!(client.list_files_at(oid).unwrap(), vec!["sections/intro.tex".to_string()]);
    }

    #[test]
    fn test_repo_not_found() {
        assert!(matches!(GitClient::new("/nonexistent"), Err(GitError::RepositoryNotFound(_))));
    }
}
