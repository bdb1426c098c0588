use thiserror::Error;

/// Unified error type for git-flow operations
#[derive(Error, Debug)]
pub enum GitFlowError {
    #[error("Repository has not yet been initialized for git-flow (run 'git-flow init')")]
    NotInitialized,

    #[error("Branch '{0}' already exists")]
    BranchExists(String),

    #[error("There is an active {0} branch already; finish it first")]
    BranchTypeExists(String),

    #[error("Tag '{0}' already exists")]
    TagExists(String),

    #[error("No such branch: {0}")]
    NoSuchBranch(String),

    #[error("Prefix '{0}' matches more than one branch: {1}")]
    PrefixNotUnique(String, String),

    #[error("Given base '{base}' is not a valid commit on '{branch}'")]
    BaseNotOnBranch { base: String, branch: String },

    #[error("Working tree contains uncommitted changes that would be lost")]
    WorkdirIsDirty,

    #[error("Merge conflict on '{0}'; resolve it and commit before continuing")]
    MergeConflict(String),

    #[error("No such remote: {0}")]
    NoSuchRemote(String),

    #[error("Branch '{local}' has diverged from '{remote}'; sync them first")]
    BranchesDiverged { local: String, remote: String },

    #[error("Finishing {0} branches does not make any sense")]
    NotFinishable(String),

    /// Hard stop. Carries a message the CLI prints verbatim; nothing
    /// recovers from this variant.
    #[error("{0}")]
    Fatal(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Git operation failed: {0}")]
    Git(#[from] git2::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Convenience type alias for Results in git-flow
pub type Result<T> = std::result::Result<T, GitFlowError>;

impl GitFlowError {
    /// Create a configuration error with context
    pub fn config(msg: impl Into<String>) -> Self {
        GitFlowError::Config(msg.into())
    }

    /// Create a fatal error with context
    pub fn fatal(msg: impl Into<String>) -> Self {
        GitFlowError::Fatal(msg.into())
    }
}
