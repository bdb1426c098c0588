//! Branch types and the generic branch manager.
//!
//! Per-type behavior (default base, merge targets, tagging, singleton and
//! finishable rules) is data: one [BranchTypeDescriptor] per type,
//! interpreted by the single generic [BranchManager]. New types are added by
//! registering a descriptor with [crate::flow::GitFlow::register], not by
//! subclassing or runtime discovery.

use crate::error::{GitFlowError, Result};
use crate::flow::GitFlow;
use crate::git::{BranchRef, MergeOutcome, RepositoryBackend, TagInfo};

/// Selector for one of the two long-lived integration branches. The actual
/// branch names come from `gitflow.branch.master` / `gitflow.branch.develop`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BaseBranch {
    Master,
    Develop,
}

/// Immutable description of a branch type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BranchTypeDescriptor {
    /// Type identifier, e.g. `feature`.
    pub identifier: &'static str,
    /// Name prefix used when `gitflow.prefix.<identifier>` is unset.
    pub default_prefix: &'static str,
    /// Branch a new branch of this type roots on absent an explicit base.
    pub default_base: BaseBranch,
    /// Branches `finish` merges into, in order.
    pub merge_targets: &'static [BaseBranch],
    /// Whether `finish` creates a version tag on the first merge target.
    pub tag_on_finish: bool,
    /// At most one live branch of this type at a time.
    pub singleton: bool,
    /// Whether `finish` is meaningful for this type at all.
    pub finishable: bool,
    /// Whether an explicit base must be an ancestor of the default base.
    pub must_be_on_default_base: bool,
}

pub static FEATURE: BranchTypeDescriptor = BranchTypeDescriptor {
    identifier: "feature",
    default_prefix: "feature/",
    default_base: BaseBranch::Develop,
    merge_targets: &[BaseBranch::Develop],
    tag_on_finish: false,
    singleton: false,
    finishable: true,
    must_be_on_default_base: false,
};

pub static RELEASE: BranchTypeDescriptor = BranchTypeDescriptor {
    identifier: "release",
    default_prefix: "release/",
    default_base: BaseBranch::Develop,
    merge_targets: &[BaseBranch::Master, BaseBranch::Develop],
    tag_on_finish: true,
    singleton: true,
    finishable: true,
    must_be_on_default_base: true,
};

pub static HOTFIX: BranchTypeDescriptor = BranchTypeDescriptor {
    identifier: "hotfix",
    default_prefix: "hotfix/",
    default_base: BaseBranch::Master,
    merge_targets: &[BaseBranch::Master, BaseBranch::Develop],
    tag_on_finish: true,
    singleton: true,
    finishable: true,
    must_be_on_default_base: true,
};

pub static SUPPORT: BranchTypeDescriptor = BranchTypeDescriptor {
    identifier: "support",
    default_prefix: "support/",
    default_base: BaseBranch::Master,
    merge_targets: &[],
    tag_on_finish: false,
    singleton: false,
    finishable: false,
    must_be_on_default_base: true,
};

/// The built-in branch types, in registration order.
pub fn builtin_types() -> Vec<&'static BranchTypeDescriptor> {
    vec![&FEATURE, &RELEASE, &HOTFIX, &SUPPORT]
}

/// Options for [BranchManager::finish].
#[derive(Debug, Clone)]
pub struct FinishOptions {
    /// Fetch remote counterparts before the up-to-date checks.
    pub fetch: bool,
    /// Rebase the branch onto its default base before merging.
    pub rebase: bool,
    /// Keep the branch instead of deleting it afterwards.
    pub keep: bool,
    /// Delete even when the branch is not fully merged.
    pub force_delete: bool,
    /// Push all advanced refs (and the delete) to the default remote.
    pub push: bool,
    /// Tagging request for types that tag on finish; `None` suppresses the
    /// tag entirely.
    pub tagging: Option<TagInfo>,
}

impl Default for FinishOptions {
    fn default() -> Self {
        FinishOptions {
            fetch: false,
            rebase: false,
            keep: false,
            force_delete: false,
            push: false,
            tagging: Some(TagInfo::default()),
        }
    }
}

/// Lists, creates, merges, deletes, and finishes branches of one type.
///
/// A manager is a borrowed view: it holds the descriptor for its type and
/// the [GitFlow] instance it operates through. Obtain one via
/// [GitFlow::manager].
pub struct BranchManager<'a, B: RepositoryBackend> {
    flow: &'a GitFlow<B>,
    desc: &'static BranchTypeDescriptor,
}

impl<'a, B: RepositoryBackend> BranchManager<'a, B> {
    pub(crate) fn new(flow: &'a GitFlow<B>, desc: &'static BranchTypeDescriptor) -> Self {
        BranchManager { flow, desc }
    }

    pub fn identifier(&self) -> &'static str {
        self.desc.identifier
    }

    pub fn descriptor(&self) -> &'static BranchTypeDescriptor {
        self.desc
    }

    /// The configured name prefix for this type, falling back to the
    /// descriptor default when the repository carries no configuration.
    pub fn prefix(&self) -> String {
        self.flow
            .prefix(self.desc.identifier)
            .unwrap_or_else(|_| self.desc.default_prefix.to_string())
    }

    /// Fully qualified branch name for a short name.
    pub fn full_name(&self, name: &str) -> String {
        format!("{}{}", self.prefix(), name)
    }

    /// The friendly (short) name of a branch, without the type prefix.
    pub fn shorten(&self, full_name: &str) -> String {
        full_name
            .strip_prefix(&self.prefix())
            .unwrap_or(full_name)
            .to_string()
    }

    /// Name of the branch new branches of this type root on by default.
    pub fn default_base(&self) -> Result<String> {
        self.flow.base_name(self.desc.default_base)
    }

    /// Full names of all local branches of this type.
    pub fn list(&self) -> Result<Vec<String>> {
        let prefix = self.prefix();
        Ok(self
            .flow
            .backend()
            .list_branches()?
            .into_iter()
            .filter(|b| b.starts_with(&prefix))
            .collect())
    }

    /// Resolve a short-name prefix to the single branch of this type it
    /// identifies.
    ///
    /// Zero matches fail with `NoSuchBranch`, more than one with
    /// `PrefixNotUnique`. Returns the full branch name.
    pub fn by_name_prefix(&self, nameprefix: &str) -> Result<String> {
        let wanted = self.full_name(nameprefix);
        let matches: Vec<String> = self
            .list()?
            .into_iter()
            .filter(|b| b.starts_with(&wanted))
            .collect();
        match matches.len() {
            1 => Ok(matches.into_iter().next().unwrap()),
            0 => Err(GitFlowError::NoSuchBranch(format!(
                "{} branch matching '{}'",
                self.desc.identifier, wanted
            ))),
            _ => Err(GitFlowError::PrefixNotUnique(wanted, matches.join(", "))),
        }
    }

    /// Create a branch of this type and check it out.
    ///
    /// `base` defaults to the type's default base (or to the remote
    /// counterpart of the new branch, when one exists). With `fetch` the
    /// remote counterpart of the default base is fetched first.
    pub fn create(&self, name: &str, base: Option<&str>, fetch: bool) -> Result<BranchRef> {
        let backend = self.flow.backend();
        let full = self.full_name(name);
        if backend.branch_exists(&full)? {
            return Err(GitFlowError::BranchExists(full));
        }

        if self.desc.singleton && !self.list()?.is_empty() {
            return Err(GitFlowError::BranchTypeExists(
                self.desc.identifier.to_string(),
            ));
        }
        if self.desc.tag_on_finish {
            let tagname = format!("{}{}", self.flow.versiontag_prefix()?, name);
            if backend.tag_exists(&tagname)? {
                return Err(GitFlowError::TagExists(tagname));
            }
        }

        if backend.has_unresolved_merge()? {
            let head = backend.current_branch()?.unwrap_or_else(|| "HEAD".into());
            return Err(GitFlowError::MergeConflict(head));
        }
        if backend.is_dirty()? {
            return Err(GitFlowError::WorkdirIsDirty);
        }

        let default_base = self.default_base()?;
        let origin = self.flow.origin_name()?;

        if fetch {
            backend.fetch(&origin, &default_base)?;
        }

        // A remote counterpart of the default base must not be ahead of the
        // local branch, to avoid silently branching off stale history.
        if let Some(remote_head) = backend.remote_branch_head(&origin, &default_base)? {
            let local_head = backend.branch_head(&default_base)?;
            if !backend.is_ancestor(remote_head, local_head)? {
                return Err(GitFlowError::BranchesDiverged {
                    local: default_base.clone(),
                    remote: format!("{}/{}", origin, default_base),
                });
            }
        }

        let base_name = base.map(str::to_string).unwrap_or_else(|| default_base.clone());
        let mut start_point = backend.branch_head(&base_name)?;

        if self.desc.must_be_on_default_base {
            let default_head = backend.branch_head(&default_base)?;
            if !backend.is_ancestor(start_point, default_head)? {
                return Err(GitFlowError::BaseNotOnBranch {
                    base: base_name,
                    branch: default_base,
                });
            }
        }

        // An existing remote branch with the same name supersedes the
        // requested base; the base must lie in its history.
        let mut track = false;
        if backend.remote_branch_head(&origin, &full)?.is_some() {
            if fetch {
                backend.fetch(&origin, &full)?;
            }
            let remote_head = backend
                .remote_branch_head(&origin, &full)?
                .ok_or_else(|| GitFlowError::NoSuchBranch(format!("{}/{}", origin, full)))?;
            if !backend.is_ancestor(start_point, remote_head)? {
                return Err(GitFlowError::BaseNotOnBranch {
                    base: base_name,
                    branch: format!("{}/{}", origin, full),
                });
            }
            start_point = remote_head;
            track = true;
        }

        backend.create_branch(&full, start_point)?;
        backend.checkout(&full)?;
        let upstream = if track {
            backend.set_upstream(&full, &origin, &full)?;
            Some(format!("{}/{}", origin, full))
        } else {
            None
        };
        Ok(BranchRef {
            name: full,
            head: start_point,
            upstream,
        })
    }

    fn expand_template(&self, template: &str, full_name: &str, short_name: &str) -> String {
        template
            .replace("{name}", full_name)
            .replace("{short_name}", short_name)
            .replace("{identifier}", self.desc.identifier)
    }

    /// Merge the branch named `name` into the branch named `into`.
    ///
    /// A no-op when the branch is already merged. A branch exactly one
    /// commit ahead of the target fast-forwards; anything else produces a
    /// 2-parent merge commit. The message template may use `{name}`,
    /// `{short_name}`, and `{identifier}` placeholders.
    pub fn merge(&self, name: &str, into: &str, template: Option<&str>) -> Result<MergeOutcome> {
        let full = self.full_name(name);
        let message = template.map(|t| self.expand_template(t, &full, name));
        self.merge_ref(&full, into, message.as_deref())
    }

    fn merge_ref(&self, source: &str, into: &str, message: Option<&str>) -> Result<MergeOutcome> {
        let backend = self.flow.backend();
        let source_head = backend.branch_head(source)?;
        let into_head = backend.branch_head(into)?;
        if backend.is_ancestor(source_head, into_head)? {
            return Ok(MergeOutcome::AlreadyUpToDate);
        }
        backend.checkout(into)?;
        let no_ff = backend.ahead_count(into_head, source_head)? != 1;
        backend.merge(source, message, no_ff)
    }

    /// Delete the branch named `name`. The backend's unmerged-branch and
    /// current-branch protections surface unchanged.
    pub fn delete(&self, name: &str, force: bool) -> Result<()> {
        let full = self.full_name(name);
        self.flow.backend().delete_branch(&full, force)
    }

    /// Finish the branch named `name`: merge it into each of the type's
    /// merge targets in order, tag where the type calls for it, and delete
    /// the branch unless asked to keep it.
    ///
    /// For tagged types the version tag is created on the first target
    /// (master) right after that merge, before the develop merge, so the
    /// tag is reachable from master once develop absorbs it.
    pub fn finish(&self, name: &str, opts: &FinishOptions) -> Result<()> {
        if !self.desc.finishable {
            return Err(GitFlowError::NotFinishable(
                self.desc.identifier.to_string(),
            ));
        }
        let backend = self.flow.backend();
        let full = self.full_name(name);
        if !backend.branch_exists(&full)? {
            return Err(GitFlowError::NoSuchBranch(full));
        }

        let targets: Vec<String> = self
            .desc
            .merge_targets
            .iter()
            .map(|b| self.flow.base_name(*b))
            .collect::<Result<_>>()?;

        self.flow.must_be_uptodate(&full, opts.fetch)?;
        for target in &targets {
            self.flow.must_be_uptodate(target, opts.fetch)?;
        }

        if opts.rebase {
            backend.rebase(&full, &self.default_base()?)?;
        }

        let message = self.expand_template("Finished {identifier} {short_name}.", &full, name);
        let mut tagname = None;
        // The first target absorbs the branch; every later target absorbs
        // the previous one, so after a tagged finish master's tip is an
        // ancestor of develop's and the tag is reachable from both.
        let mut source = full.clone();
        for (position, target) in targets.iter().enumerate() {
            self.merge_ref(&source, target, Some(&message))?;
            if position == 0 && self.desc.tag_on_finish {
                if let Some(info) = &opts.tagging {
                    let tag = format!("{}{}", self.flow.versiontag_prefix()?, name);
                    if !backend.tag_exists(&tag)? {
                        let target_head = backend.branch_head(target)?;
                        // Signed tags need an annotation; default to the
                        // tag name when no message was given.
                        let mut info = info.clone();
                        if info.sign && info.message.is_none() {
                            info.message = Some(tag.clone());
                        }
                        self.flow.tag(&tag, target_head, &info)?;
                    }
                    tagname = Some(tag);
                }
            }
            source = target.clone();
        }

        if !opts.keep {
            self.delete(name, opts.force_delete)?;
        }

        if opts.push {
            let origin = self.flow.origin_name()?;
            let mut refspecs: Vec<String> = targets
                .iter()
                .map(|t| format!("refs/heads/{}:refs/heads/{}", t, t))
                .collect();
            if let Some(tag) = &tagname {
                refspecs.push(format!("refs/tags/{}", tag));
            }
            if !opts.keep {
                refspecs.push(format!(":refs/heads/{}", full));
            }
            backend.push(&origin, &refspecs)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_descriptor_table_shape() {
        assert_eq!(FEATURE.merge_targets, &[BaseBranch::Develop]);
        assert_eq!(
            RELEASE.merge_targets,
            &[BaseBranch::Master, BaseBranch::Develop]
        );
        assert_eq!(
            HOTFIX.merge_targets,
            &[BaseBranch::Master, BaseBranch::Develop]
        );
        assert!(SUPPORT.merge_targets.is_empty());

        assert!(RELEASE.singleton && HOTFIX.singleton);
        assert!(!FEATURE.singleton && !SUPPORT.singleton);
        assert!(!SUPPORT.finishable);
        assert!(RELEASE.tag_on_finish && HOTFIX.tag_on_finish);
    }

    #[test]
    fn test_builtin_types_are_registered_in_order() {
        let ids: Vec<&str> = builtin_types().iter().map(|d| d.identifier).collect();
        assert_eq!(ids, vec!["feature", "release", "hotfix", "support"]);
    }

    #[test]
    fn test_default_finish_options_tag() {
        let opts = FinishOptions::default();
        assert!(opts.tagging.is_some());
        assert!(!opts.push && !opts.keep && !opts.fetch);
    }
}
