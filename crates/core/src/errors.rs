//! Error types for the papersync core library.
//!
//! Each subsystem has its own error type derived with `thiserror`, and a
//! top-level [`CoreError`] enum unifies them all for callers that want a
//! single error type.

use thiserror::Error;

// ---------------------------------------------------------------------------
// Top-level error
// ---------------------------------------------------------------------------

/// Unified error type for the entire core library.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error(transparent)]
    Git(#[from] GitError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Edit(#[from] EditError),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

// ---------------------------------------------------------------------------
// Git errors
// ---------------------------------------------------------------------------

/// Errors from local Git (git2) operations.
#[derive(Debug, Error)]
pub enum GitError {
    /// The repository path does not exist or is not a git repo.
    #[error("git repository not found at '{0}'")]
    RepositoryNotFound(String),

    /// A `git2` library error.
    #[error("git2 error: {0}")]
    Git2Error(#[from] git2::Error),

    /// A ref (branch, tag, SHA) could not be resolved.
    #[error("git ref not found: {0}")]
    RefNotFound(String),

    /// Push was rejected (e.g. non-fast-forward).
    #[error("git push rejected for branch '{branch}': {detail}")]
    PushRejected {
        branch: String,
        detail: String,
    },

    /// An in-memory merge produced conflicting index entries.
    #[error("git merge conflict in {}", .0.join(", "))]
    MergeConflict(Vec<String>),

    /// Generic I/O wrapper.
    #[error("git I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

// ---------------------------------------------------------------------------
// Revision store errors
// ---------------------------------------------------------------------------

/// Errors from the revision store adapter.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The remote could not be reached even after discarding and re-cloning
    /// the working copy.
    #[error("remote '{url}' unreachable after re-clone: {detail}")]
    Transport {
        url: String,
        detail: String,
    },

    /// The document does not exist at the given snapshot.
    #[error("document '{doc_id}' not found at revision {revision}")]
    DocumentNotFound {
        doc_id: String,
        revision: String,
    },

    /// The document blob is not valid UTF-8 text.
    #[error("document '{0}' is not valid UTF-8")]
    NotUtf8(String),

    /// A commit carries a timestamp chrono cannot represent.
    #[error("commit {revision} has an out-of-range timestamp ({seconds} s)")]
    InvalidCommitTime {
        revision: String,
        seconds: i64,
    },

    /// Underlying Git error.
    #[error("store git error: {0}")]
    Git(#[from] GitError),

    /// Generic I/O wrapper.
    #[error("store I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<git2::Error> for StoreError {
    fn from(err: git2::Error) -> Self {
        Self::Git(GitError::Git2Error(err))
    }
}

// ---------------------------------------------------------------------------
// Edit errors
// ---------------------------------------------------------------------------

/// Reasons an edit was rejected by the applier.
///
/// None of these escape [`EditApplier::apply`](crate::edit::EditApplier::apply);
/// they are logged and turned into `false`.
#[derive(Debug, Error)]
pub enum EditError {
    /// The target document is absent at the relevant snapshot.
    #[error("edit target '{0}' does not exist")]
    NotFound(String),

    /// The selection does not fit the document.
    #[error("invalid range [{start}, {end}) for document of {line_count} lines")]
    InvalidRange {
        start: usize,
        end: usize,
        line_count: usize,
    },

    /// The transaction branch could not be merged cleanly onto main.
    #[error("edit conflicts with concurrent changes in {}", .0.join(", "))]
    MergeConflict(Vec<String>),

    /// Underlying store error.
    #[error("edit store error: {0}")]
    Store(#[from] StoreError),

    /// Underlying Git error.
    #[error("edit git error: {0}")]
    Git(#[from] GitError),
}

impl From<git2::Error> for EditError {
    fn from(err: git2::Error) -> Self {
        Self::Git(GitError::Git2Error(err))
    }
}

impl From<std::io::Error> for EditError {
    fn from(err: std::io::Error) -> Self {
        Self::Git(GitError::IoError(err))
    }
}

// ---------------------------------------------------------------------------
// Configuration errors
// ---------------------------------------------------------------------------

/// Errors from configuration loading and validation.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Config file not found.
    #[error("configuration file not found: {0}")]
    FileNotFound(String),

    /// TOML parse error.
    #[error("configuration parse error: {0}")]
    ParseError(String),

    /// A config value is invalid.
    #[error("invalid configuration value for '{field}': {detail}")]
    InvalidValue {
        field: String,
        detail: String,
    },

    /// Generic I/O error reading the config file.
    #[error("configuration I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_messages() {
        let err = GitError::RepositoryNotFound("/tmp/repo".into());
        assert_eq!(err.to_string(), "git repository not found at '/tmp/repo'");

        let err = StoreError::DocumentNotFound {
            doc_id: "main.tex".into(),
            revision: "abc123".into(),
        };
        assert_eq!(
            err.to_string(),
            "document 'main.tex' not found at revision abc123"
        );

        let err = EditError::InvalidRange {
            start: 4,
            end: 9,
            line_count: 3,
        };
        assert!(err.to_string().contains("[4, 9)"));

        let err = EditError::MergeConflict(vec!["main.tex".into(), "intro.tex".into()]);
        assert!(err.to_string().contains("main.tex, intro.tex"));
    }

    #[test]
    fn test_core_error_from_subsystem() {
        let store_err = StoreError::NotUtf8("figure.tex".into());
        let core_err: CoreError = store_err.into();
        assert!(matches!(core_err, CoreError::Store(_)));

        let edit_err: EditError = StoreError::NotUtf8("x".into()).into();
        assert!(matches!(edit_err, EditError::Store(_)));
    }
}
