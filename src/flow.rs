//! The `GitFlow` orchestrator.
//!
//! Owns the backend handle and the registry of branch-type descriptors,
//! resolves names, and coordinates the operations that span more than one
//! branch type: init, remote tracking/publishing/pulling, tagging, status
//! reporting, and snapshots.

use crate::branches::{builtin_types, BaseBranch, BranchManager, BranchTypeDescriptor};
use crate::config;
use crate::error::{GitFlowError, Result};
use crate::git::{RepositoryBackend, TagInfo};
use crate::snapshot::{Snapshot, SnapshotStore};
use git2::Oid;

/// Explicit overrides for [GitFlow::init]. `None` keeps the existing value
/// or falls back to the default.
#[derive(Debug, Clone, Default)]
pub struct InitOptions {
    pub master: Option<String>,
    pub develop: Option<String>,
    pub feature: Option<String>,
    pub release: Option<String>,
    pub hotfix: Option<String>,
    pub support: Option<String>,
    pub versiontag: Option<String>,
    /// Overwrite already-configured keys with the defaults.
    pub force_defaults: bool,
}

/// One line of the status report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BranchStatus {
    pub name: String,
    pub head: Oid,
    pub active: bool,
}

/// Orchestrator for the git-flow branching model.
///
/// Holds the [RepositoryBackend] every operation goes through; there is no
/// ambient repository handle anywhere else. Branch-type behavior lives in
/// the registered descriptors, interpreted by [BranchManager].
pub struct GitFlow<B: RepositoryBackend> {
    backend: B,
    registry: Vec<&'static BranchTypeDescriptor>,
}

impl<B: RepositoryBackend> GitFlow<B> {
    /// Wrap a backend with the built-in branch types registered.
    pub fn new(backend: B) -> Self {
        GitFlow {
            backend,
            registry: builtin_types(),
        }
    }

    /// Register an additional branch type. Idempotent per identifier.
    pub fn register(&mut self, desc: &'static BranchTypeDescriptor) {
        if !self
            .registry
            .iter()
            .any(|d| d.identifier == desc.identifier)
        {
            self.registry.push(desc);
        }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// The registered branch-type identifiers, in registration order.
    pub fn identifiers(&self) -> Vec<&'static str> {
        self.registry.iter().map(|d| d.identifier).collect()
    }

    fn descriptor(&self, identifier: &str) -> Result<&'static BranchTypeDescriptor> {
        self.registry
            .iter()
            .find(|d| d.identifier == identifier)
            .copied()
            .ok_or_else(|| GitFlowError::config(format!("Unknown branch type: {}", identifier)))
    }

    /// The branch manager for a registered type.
    pub fn manager(&self, identifier: &str) -> Result<BranchManager<'_, B>> {
        Ok(BranchManager::new(self, self.descriptor(identifier)?))
    }

    // ---- configuration -------------------------------------------------

    /// Write the git-flow configuration.
    ///
    /// Explicit values always win; otherwise only missing keys receive the
    /// defaults, unless `force_defaults` overwrites everything.
    pub fn init(&self, opts: &InitOptions) -> Result<()> {
        let overrides = [
            (config::MASTER.to_string(), opts.master.clone()),
            (config::DEVELOP.to_string(), opts.develop.clone()),
            (config::prefix_key("feature"), opts.feature.clone()),
            (config::prefix_key("release"), opts.release.clone()),
            (config::prefix_key("hotfix"), opts.hotfix.clone()),
            (config::prefix_key("support"), opts.support.clone()),
            (config::PREFIX_VERSIONTAG.to_string(), opts.versiontag.clone()),
            (config::ORIGIN.to_string(), None),
        ];
        for ((key, default), (_, explicit)) in
            config::init_defaults().into_iter().zip(overrides.iter())
        {
            if let Some(value) = explicit {
                self.backend.config_set(&key, value)?;
            } else if opts.force_defaults || self.backend.config_get(&key)?.is_none() {
                self.backend.config_set(&key, default)?;
            }
        }
        Ok(())
    }

    /// Whether all required git-flow keys are configured.
    pub fn is_initialized(&self) -> Result<bool> {
        for key in config::required_keys() {
            if self.backend.config_get(&key)?.is_none() {
                return Ok(false);
            }
        }
        Ok(true)
    }

    fn require(&self, key: &str) -> Result<String> {
        self.backend
            .config_get(key)?
            .ok_or(GitFlowError::NotInitialized)
    }

    /// Name of the production branch (`gitflow.branch.master`).
    pub fn master_name(&self) -> Result<String> {
        self.require(config::MASTER)
    }

    /// Name of the integration branch (`gitflow.branch.develop`).
    pub fn develop_name(&self) -> Result<String> {
        self.require(config::DEVELOP)
    }

    /// Name of the default remote (`gitflow.origin`, default `origin`).
    pub fn origin_name(&self) -> Result<String> {
        Ok(self
            .backend
            .config_get(config::ORIGIN)?
            .unwrap_or_else(|| "origin".to_string()))
    }

    /// Configured prefix for a branch type.
    pub fn prefix(&self, identifier: &str) -> Result<String> {
        self.require(&config::prefix_key(identifier))
    }

    /// Prefix prepended to release/hotfix names to form version tags.
    pub fn versiontag_prefix(&self) -> Result<String> {
        Ok(self
            .backend
            .config_get(config::PREFIX_VERSIONTAG)?
            .unwrap_or_default())
    }

    /// Resolve a base selector to the configured branch name.
    pub fn base_name(&self, base: BaseBranch) -> Result<String> {
        match base {
            BaseBranch::Master => self.master_name(),
            BaseBranch::Develop => self.develop_name(),
        }
    }

    // ---- name resolution -----------------------------------------------

    /// Resolve an optional short-name prefix to a short branch name.
    ///
    /// An empty `name` resolves to the currently checked-out branch, which
    /// must belong to the given type; otherwise the prefix must identify
    /// exactly one branch of the type.
    pub fn name_or_current(&self, identifier: &str, name: &str) -> Result<String> {
        let manager = self.manager(identifier)?;
        if name.is_empty() {
            let current = self
                .backend
                .current_branch()?
                .ok_or_else(|| GitFlowError::NoSuchBranch("HEAD is detached".to_string()))?;
            if !current.starts_with(&manager.prefix()) {
                return Err(GitFlowError::NoSuchBranch(format!(
                    "The current branch '{}' is no {} branch",
                    current, identifier
                )));
            }
            Ok(manager.shorten(&current))
        } else {
            Ok(manager.shorten(&manager.by_name_prefix(name)?))
        }
    }

    // ---- remote coordination --------------------------------------------

    /// Track a branch that exists on the default remote: create the local
    /// counterpart at the remote tip, configure it as a tracking branch,
    /// and check it out.
    pub fn track(&self, identifier: &str, name: &str) -> Result<()> {
        let manager = self.manager(identifier)?;
        let full = manager.full_name(name);
        if self.backend.branch_exists(&full)? {
            return Err(GitFlowError::BranchExists(full));
        }
        let origin = self.origin_name()?;
        self.backend.fetch(&origin, &full)?;
        let remote_head = self
            .backend
            .remote_branch_head(&origin, &full)?
            .ok_or_else(|| GitFlowError::NoSuchBranch(format!("{}/{}", origin, full)))?;
        self.backend.create_branch(&full, remote_head)?;
        self.backend.set_upstream(&full, &origin, &full)?;
        self.backend.checkout(&full)
    }

    /// Publish a local branch to the default remote: push it, configure
    /// tracking, and check it out.
    pub fn publish(&self, identifier: &str, name: &str) -> Result<()> {
        let manager = self.manager(identifier)?;
        let full = manager.full_name(name);
        if !self.backend.branch_exists(&full)? {
            return Err(GitFlowError::NoSuchBranch(full));
        }
        let origin = self.origin_name()?;
        if self.backend.remote_branch_head(&origin, &full)?.is_some() {
            return Err(GitFlowError::BranchExists(format!("{}/{}", origin, full)));
        }
        self.backend.push(
            &origin,
            &[format!("refs/heads/{}:refs/heads/{}", full, full)],
        )?;
        self.backend.set_upstream(&full, &origin, &full)?;
        self.backend.checkout(&full)
    }

    /// Pull a branch of the given type from an arbitrary remote.
    ///
    /// Standing on a different branch of the same type is a hard stop to
    /// avoid merging unrelated histories into it. An existing local branch
    /// is fetched into and merged (non-tracking); otherwise a fresh
    /// non-tracking local branch is created at the fetched tip.
    pub fn pull(&self, identifier: &str, remote: &str, name: &str) -> Result<()> {
        let manager = self.manager(identifier)?;
        let full = manager.full_name(name);
        if let Some(current) = self.backend.current_branch()? {
            if current.starts_with(&manager.prefix()) && current != full {
                return Err(GitFlowError::fatal(format!(
                    "To avoid unintended merges, git-flow aborted: you are on '{}' \
                     which is another {} branch than '{}'",
                    current, identifier, full
                )));
            }
        }
        if !self.backend.remote_exists(remote)? {
            return Err(GitFlowError::NoSuchRemote(remote.to_string()));
        }
        self.backend.fetch(remote, &full)?;
        let remote_head = self
            .backend
            .remote_branch_head(remote, &full)?
            .ok_or_else(|| GitFlowError::NoSuchBranch(format!("{}/{}", remote, full)))?;

        if self.backend.branch_exists(&full)? {
            self.backend.checkout(&full)?;
            self.backend
                .merge(&format!("{}/{}", remote, full), None, false)?;
        } else {
            self.backend.create_branch(&full, remote_head)?;
            self.backend.checkout(&full)?;
        }
        Ok(())
    }

    /// Require `branch` to be up to date with its counterpart on the
    /// default remote. With `fetch`, the counterpart is fetched first so
    /// the comparison sees the remote's current tip, even when no
    /// remote-tracking ref exists yet. A branch that is ahead of its remote
    /// counts as up to date; a remote with commits the local branch lacks
    /// does not.
    pub fn must_be_uptodate(&self, branch: &str, fetch: bool) -> Result<()> {
        let origin = self.origin_name()?;
        if fetch && self.backend.remote_exists(&origin)? {
            self.backend.fetch(&origin, branch)?;
        }
        if let Some(remote_head) = self.backend.remote_branch_head(&origin, branch)? {
            let local_head = self.backend.branch_head(branch)?;
            if !self.backend.is_ancestor(remote_head, local_head)? {
                return Err(GitFlowError::BranchesDiverged {
                    local: branch.to_string(),
                    remote: format!("{}/{}", origin, branch),
                });
            }
        }
        Ok(())
    }

    // ---- tags, status, snapshots ----------------------------------------

    /// Create a tag at `target`. `TagInfo` decides lightweight vs annotated
    /// vs signed.
    pub fn tag(&self, name: &str, target: Oid, info: &TagInfo) -> Result<()> {
        if self.backend.tag_exists(name)? {
            return Err(GitFlowError::TagExists(name.to_string()));
        }
        self.backend.create_tag(name, target, info)
    }

    /// Every local branch with its tip and whether it is checked out.
    pub fn status(&self) -> Result<Vec<BranchStatus>> {
        let current = self.backend.current_branch()?;
        let mut report = Vec::new();
        for name in self.backend.list_branches()? {
            let head = self.backend.branch_head(&name)?;
            let active = current.as_deref() == Some(&name);
            report.push(BranchStatus { name, head, active });
        }
        Ok(report)
    }

    /// Open the persisted snapshot stack from the backend's state dir.
    pub fn snapshots(&self) -> Result<SnapshotStore> {
        SnapshotStore::open(self.backend.state_dir()?)
    }

    /// Capture the current branch tips (all, or a restricted set) and
    /// append the snapshot to the persisted stack.
    pub fn snap(&self, description: &str, heads: Option<&[String]>) -> Result<Snapshot> {
        let mut store = self.snapshots()?;
        store.snap(&self.backend, description, heads)
    }

    /// Pop the most recent snapshot and restore every branch it captured.
    ///
    /// Not atomic across branches: a failure partway through leaves earlier
    /// branches restored and later ones untouched.
    pub fn undo(&self, backup: bool) -> Result<Snapshot> {
        let mut store = self.snapshots()?;
        store.restore(&self.backend, backup)
    }
}
