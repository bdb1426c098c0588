//! Git operations abstraction layer
//!
//! This module provides a trait-based abstraction over the version-control
//! operations git-flow needs, allowing for multiple implementations
//! including real Git repositories and an in-memory implementation for
//! testing.
//!
//! The primary abstraction is the [RepositoryBackend] trait. Concrete
//! implementations:
//!
//! - [repository::Git2Backend]: a real implementation using the `git2` crate
//! - [mock::InMemoryBackend]: an in-memory commit graph for testing
//!
//! Workflow code (branch managers, the `GitFlow` orchestrator, the snapshot
//! store) depends only on the trait, never on a concrete repository.
//!
//! ```rust
//! use git_flow::git::{InMemoryBackend, RepositoryBackend};
//!
//! let backend = InMemoryBackend::new();
//! let root = backend.seed_commit("initial commit");
//! backend.create_branch("develop", root).unwrap();
//! assert!(backend.branch_exists("develop").unwrap());
//! ```

pub mod mock;
pub mod repository;

pub use mock::InMemoryBackend;
pub use repository::Git2Backend;

use crate::error::Result;
use git2::Oid;
use std::path::PathBuf;

/// A local branch as the backend reports it: name, tip commit, and the
/// remote-tracking branch configured for it, if any.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BranchRef {
    pub name: String,
    pub head: Oid,
    pub upstream: Option<String>,
}

/// What a merge actually did.
///
/// The distinction matters to callers: a fast-forward moves the target ref
/// without creating a commit, while a merge commit has two parents.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeOutcome {
    /// The source was already reachable from the target; nothing changed.
    AlreadyUpToDate,
    /// The target ref moved forward to the source tip; no commit created.
    FastForward,
    /// A 2-parent merge commit was created.
    MergeCommit,
}

/// Tagging request for a finished release or hotfix.
///
/// The core only carries the plaintext message and an optional signing key
/// id; producing signature bytes is a backend capability (see
/// [RepositoryBackend::sign]).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TagInfo {
    /// Annotation message. `None` produces a lightweight tag.
    pub message: Option<String>,
    /// Whether to sign the tag object.
    pub sign: bool,
    /// Key id to sign with; `None` lets the signer pick its default key.
    pub signing_key: Option<String>,
}

/// Version-control operations consumed by the workflow engine.
///
/// Everything is synchronous and unretried: each call blocks until the
/// underlying operation (local or network) completes or fails. Errors map to
/// [crate::error::GitFlowError] variants; implementations must signal merge
/// conflicts distinctly from other merge failures.
pub trait RepositoryBackend {
    /// List the names of all local branches.
    fn list_branches(&self) -> Result<Vec<String>>;

    /// Whether a local branch with this name exists.
    fn branch_exists(&self, name: &str) -> Result<bool>;

    /// The commit at the tip of a local branch.
    ///
    /// Fails with `NoSuchBranch` when the branch does not exist.
    fn branch_head(&self, name: &str) -> Result<Oid>;

    /// Create a local branch pointing at `target`. Does not check it out.
    fn create_branch(&self, name: &str, target: Oid) -> Result<()>;

    /// Force-move an existing branch ref to `target` without touching the
    /// working tree.
    fn move_branch(&self, name: &str, target: Oid) -> Result<()>;

    /// Delete a local branch.
    ///
    /// Without `force`, deleting a branch that is not fully merged is
    /// rejected. Deleting the currently checked-out branch is always
    /// rejected. Both rejections surface unchanged from the backend.
    fn delete_branch(&self, name: &str, force: bool) -> Result<()>;

    /// Check out a local branch, updating working tree and HEAD.
    fn checkout(&self, name: &str) -> Result<()>;

    /// The currently checked-out branch, or `None` when HEAD is detached.
    fn current_branch(&self) -> Result<Option<String>>;

    /// Hard-reset the working tree, index, and current branch to `target`.
    fn hard_reset(&self, target: Oid) -> Result<()>;

    /// Commit the current index onto the checked-out branch.
    fn commit(&self, message: &str) -> Result<Oid>;

    /// Merge `source` into the currently checked-out branch. The source may
    /// be a local branch or a remote-tracking ref (`remote/branch`).
    ///
    /// With `no_ff` a merge commit is created even when the target could
    /// fast-forward. An unresolvable conflict returns `MergeConflict` and
    /// leaves the working tree in the conflicted state for manual
    /// resolution.
    fn merge(&self, source: &str, message: Option<&str>, no_ff: bool) -> Result<MergeOutcome>;

    /// Rebase `branch` onto the tip of `onto`. Conflicts abort the rebase
    /// and surface as `MergeConflict`.
    fn rebase(&self, branch: &str, onto: &str) -> Result<()>;

    /// Whether `ancestor` is reachable from `descendant` (equal commits
    /// count as reachable).
    fn is_ancestor(&self, ancestor: Oid, descendant: Oid) -> Result<bool>;

    /// Number of commits reachable from `tip` but not from `base`.
    fn ahead_count(&self, base: Oid, tip: Oid) -> Result<usize>;

    /// Short textual summary of the changes between two commits.
    fn diff_summary(&self, base: Oid, tip: Oid) -> Result<String>;

    /// Whether the index holds staged, uncommitted changes.
    fn is_dirty(&self) -> Result<bool>;

    /// Whether a merge with unresolved conflicts is in progress.
    fn has_unresolved_merge(&self) -> Result<bool>;

    /// Whether a tag with this name exists.
    fn tag_exists(&self, name: &str) -> Result<bool>;

    /// List all tag names.
    fn list_tags(&self) -> Result<Vec<String>>;

    /// Create a tag at `target`.
    ///
    /// A `TagInfo` without a message produces a lightweight tag; with a
    /// message an annotated tag; with `sign` set the tag object is signed
    /// via [RepositoryBackend::sign].
    fn create_tag(&self, name: &str, target: Oid, info: &TagInfo) -> Result<()>;

    /// Produce a detached signature over `payload`, optionally with a
    /// specific key. The workflow engine never signs anything itself.
    fn sign(&self, payload: &[u8], key_id: Option<&str>) -> Result<Vec<u8>>;

    /// Whether a remote with this name is configured.
    fn remote_exists(&self, remote: &str) -> Result<bool>;

    /// Tip of the remote-tracking branch `remote/branch`, or `None` when the
    /// remote counterpart does not exist.
    fn remote_branch_head(&self, remote: &str, branch: &str) -> Result<Option<Oid>>;

    /// Fetch a single branch (and tags) from a remote.
    fn fetch(&self, remote: &str, branch: &str) -> Result<()>;

    /// Push refspecs to a remote. Delete-pushes use the `:refs/heads/name`
    /// form.
    fn push(&self, remote: &str, refspecs: &[String]) -> Result<()>;

    /// Configure `remote/remote_branch` as the upstream of a local branch.
    fn set_upstream(&self, branch: &str, remote: &str, remote_branch: &str) -> Result<()>;

    /// Read a config value by dotted key (`section.option` or
    /// `section.subsection.option`). `None` when unset.
    fn config_get(&self, key: &str) -> Result<Option<String>>;

    /// Write a config value by dotted key.
    fn config_set(&self, key: &str, value: &str) -> Result<()>;

    /// Directory for repository-local persisted state (snapshot stack).
    fn state_dir(&self) -> Result<PathBuf>;
}
