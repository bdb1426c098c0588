use crate::error::{GitFlowError, Result};
use crate::git::{MergeOutcome, RepositoryBackend, TagInfo};
use git2::{
    build::CheckoutBuilder, BranchType, ErrorCode, ObjectType, Oid, Repository, RepositoryState,
    ResetType, Status,
};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

/// Real backend over a git repository, using the `git2` crate.
pub struct Git2Backend {
    repo: Repository,
}

impl Git2Backend {
    /// Open or discover a git repository at or above `path`.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let repo = Repository::discover(path)?;
        Ok(Git2Backend { repo })
    }

    /// Wrap an already-open `git2::Repository`.
    pub fn from_git2(repo: Repository) -> Self {
        Git2Backend { repo }
    }

    fn head_branch_name(&self) -> String {
        self.repo
            .head()
            .ok()
            .and_then(|h| h.shorthand().map(str::to_string))
            .unwrap_or_else(|| "HEAD".to_string())
    }

    /// Credential callbacks for network operations: SSH keys from ~/.ssh,
    /// then the SSH agent, then whatever the default helper provides.
    fn remote_callbacks() -> git2::RemoteCallbacks<'static> {
        let mut callbacks = git2::RemoteCallbacks::new();
        callbacks.credentials(|_url, username_from_url, allowed_types| {
            if allowed_types.contains(git2::CredentialType::SSH_KEY) {
                let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
                let key_paths = [
                    format!("{}/.ssh/id_ed25519", home),
                    format!("{}/.ssh/id_rsa", home),
                    format!("{}/.ssh/id_ecdsa", home),
                ];
                for key_path in key_paths {
                    let path = std::path::Path::new(&key_path);
                    if path.exists() {
                        if let Ok(cred) = git2::Cred::ssh_key(
                            username_from_url.unwrap_or("git"),
                            None,
                            path,
                            None,
                        ) {
                            return Ok(cred);
                        }
                    }
                }
                if let Ok(cred) =
                    git2::Cred::ssh_key_from_agent(username_from_url.unwrap_or("git"))
                {
                    return Ok(cred);
                }
            }
            git2::Cred::default()
        });
        callbacks
    }

    fn resolve_source_commit(&self, source: &str) -> Result<git2::AnnotatedCommit<'_>> {
        let reference = match self.repo.find_branch(source, BranchType::Local) {
            Ok(branch) => branch.into_reference(),
            Err(_) => self
                .repo
                .find_reference(&format!("refs/remotes/{}", source))
                .map_err(|_| GitFlowError::NoSuchBranch(source.to_string()))?,
        };
        Ok(self.repo.reference_to_annotated_commit(&reference)?)
    }

    fn format_signature(sig: &git2::Signature<'_>) -> String {
        let when = sig.when();
        let offset = when.offset_minutes();
        let sign = if offset < 0 { '-' } else { '+' };
        let offset = offset.abs();
        format!(
            "{} <{}> {} {}{:02}{:02}",
            sig.name().unwrap_or(""),
            sig.email().unwrap_or(""),
            when.seconds(),
            sign,
            offset / 60,
            offset % 60,
        )
    }

    /// Assemble and store a signed tag object by hand: git2 creates
    /// annotated tags but does not sign them, so the payload is built,
    /// signed through [RepositoryBackend::sign], and written to the object
    /// database directly.
    fn create_signed_tag(
        &self,
        name: &str,
        target: Oid,
        message: &str,
        key_id: Option<&str>,
    ) -> Result<()> {
        let object = self.repo.find_object(target, None)?;
        let kind = object.kind().unwrap_or(ObjectType::Commit);
        let tagger = Self::format_signature(&self.repo.signature()?);
        let mut payload = format!(
            "object {}\ntype {}\ntag {}\ntagger {}\n\n{}\n",
            target, kind, name, tagger, message
        );
        let signature = self.sign(payload.as_bytes(), key_id)?;
        let signature = String::from_utf8(signature)
            .map_err(|_| GitFlowError::fatal("Signer produced a non-text signature"))?;
        payload.push_str(&signature);

        let oid = self.repo.odb()?.write(ObjectType::Tag, payload.as_bytes())?;
        self.repo.reference(
            &format!("refs/tags/{}", name),
            oid,
            false,
            &format!("signed tag {}", name),
        )?;
        Ok(())
    }
}

impl RepositoryBackend for Git2Backend {
    fn list_branches(&self) -> Result<Vec<String>> {
        let mut names = Vec::new();
        for entry in self.repo.branches(Some(BranchType::Local))? {
            let (branch, _) = entry?;
            if let Some(name) = branch.name()? {
                names.push(name.to_string());
            }
        }
        names.sort();
        Ok(names)
    }

    fn branch_exists(&self, name: &str) -> Result<bool> {
        match self.repo.find_branch(name, BranchType::Local) {
            Ok(_) => Ok(true),
            Err(e) if e.code() == ErrorCode::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    fn branch_head(&self, name: &str) -> Result<Oid> {
        let branch = self
            .repo
            .find_branch(name, BranchType::Local)
            .map_err(|_| GitFlowError::NoSuchBranch(name.to_string()))?;
        branch
            .get()
            .target()
            .ok_or_else(|| GitFlowError::NoSuchBranch(name.to_string()))
    }

    fn create_branch(&self, name: &str, target: Oid) -> Result<()> {
        if self.branch_exists(name)? {
            return Err(GitFlowError::BranchExists(name.to_string()));
        }
        let commit = self.repo.find_commit(target)?;
        self.repo.branch(name, &commit, false)?;
        Ok(())
    }

    fn move_branch(&self, name: &str, target: Oid) -> Result<()> {
        let mut reference = self
            .repo
            .find_reference(&format!("refs/heads/{}", name))
            .map_err(|_| GitFlowError::NoSuchBranch(name.to_string()))?;
        reference.set_target(target, &format!("git-flow: move {}", name))?;
        Ok(())
    }

    fn delete_branch(&self, name: &str, force: bool) -> Result<()> {
        if self.current_branch()?.as_deref() == Some(name) {
            return Err(GitFlowError::fatal(format!(
                "Cannot delete the currently checked-out branch '{}'",
                name
            )));
        }
        let mut branch = self
            .repo
            .find_branch(name, BranchType::Local)
            .map_err(|_| GitFlowError::NoSuchBranch(name.to_string()))?;
        if !force {
            let tip = branch
                .get()
                .target()
                .ok_or_else(|| GitFlowError::NoSuchBranch(name.to_string()))?;
            let head = self
                .repo
                .head()?
                .target()
                .ok_or_else(|| GitFlowError::fatal("HEAD is unborn"))?;
            let merged = tip == head || self.repo.graph_descendant_of(head, tip)?;
            if !merged {
                return Err(GitFlowError::fatal(format!(
                    "Branch '{}' is not fully merged; use force to delete it anyway",
                    name
                )));
            }
        }
        branch.delete()?;
        Ok(())
    }

    fn checkout(&self, name: &str) -> Result<()> {
        let refname = format!("refs/heads/{}", name);
        let reference = self
            .repo
            .find_reference(&refname)
            .map_err(|_| GitFlowError::NoSuchBranch(name.to_string()))?;
        let tree = reference.peel(ObjectType::Commit)?;
        self.repo.checkout_tree(&tree, None)?;
        self.repo.set_head(&refname)?;
        Ok(())
    }

    fn current_branch(&self) -> Result<Option<String>> {
        match self.repo.head() {
            Ok(head) if head.is_branch() => Ok(head.shorthand().map(str::to_string)),
            Ok(_) => Ok(None),
            Err(e) if e.code() == ErrorCode::UnbornBranch || e.code() == ErrorCode::NotFound => {
                Ok(None)
            }
            Err(e) => Err(e.into()),
        }
    }

    fn hard_reset(&self, target: Oid) -> Result<()> {
        let object = self.repo.find_object(target, None)?;
        self.repo.reset(&object, ResetType::Hard, None)?;
        Ok(())
    }

    fn commit(&self, message: &str) -> Result<Oid> {
        let mut index = self.repo.index()?;
        let tree_oid = index.write_tree()?;
        let tree = self.repo.find_tree(tree_oid)?;
        let sig = self.repo.signature()?;
        let parents = match self.repo.head() {
            Ok(head) => vec![head.peel_to_commit()?],
            Err(e) if e.code() == ErrorCode::UnbornBranch => Vec::new(),
            Err(e) => return Err(e.into()),
        };
        let parent_refs: Vec<&git2::Commit<'_>> = parents.iter().collect();
        Ok(self
            .repo
            .commit(Some("HEAD"), &sig, &sig, message, &tree, &parent_refs)?)
    }

    fn merge(&self, source: &str, message: Option<&str>, no_ff: bool) -> Result<MergeOutcome> {
        let annotated = self.resolve_source_commit(source)?;
        let (analysis, _) = self.repo.merge_analysis(&[&annotated])?;

        if analysis.is_up_to_date() {
            return Ok(MergeOutcome::AlreadyUpToDate);
        }
        if analysis.is_fast_forward() && !no_ff {
            let target = annotated.id();
            let mut head = self.repo.head()?;
            head.set_target(target, &format!("git-flow: fast-forward to {}", source))?;
            self.repo
                .checkout_head(Some(CheckoutBuilder::default().force()))?;
            return Ok(MergeOutcome::FastForward);
        }

        self.repo.merge(&[&annotated], None, None)?;
        let mut index = self.repo.index()?;
        if index.has_conflicts() {
            // Leave the working tree conflicted for manual resolution.
            return Err(GitFlowError::MergeConflict(self.head_branch_name()));
        }
        let tree_oid = index.write_tree()?;
        let tree = self.repo.find_tree(tree_oid)?;
        let head_commit = self.repo.head()?.peel_to_commit()?;
        let source_commit = self.repo.find_commit(annotated.id())?;
        let default_message = format!("Merge branch '{}'", source);
        let sig = self.repo.signature()?;
        self.repo.commit(
            Some("HEAD"),
            &sig,
            &sig,
            message.unwrap_or(&default_message),
            &tree,
            &[&head_commit, &source_commit],
        )?;
        self.repo.cleanup_state()?;
        Ok(MergeOutcome::MergeCommit)
    }

    fn rebase(&self, branch: &str, onto: &str) -> Result<()> {
        let branch_ref = self
            .repo
            .find_branch(branch, BranchType::Local)
            .map_err(|_| GitFlowError::NoSuchBranch(branch.to_string()))?
            .into_reference();
        let onto_ref = self
            .repo
            .find_branch(onto, BranchType::Local)
            .map_err(|_| GitFlowError::NoSuchBranch(onto.to_string()))?
            .into_reference();
        let branch_ann = self.repo.reference_to_annotated_commit(&branch_ref)?;
        let onto_ann = self.repo.reference_to_annotated_commit(&onto_ref)?;

        let mut rebase = self
            .repo
            .rebase(Some(&branch_ann), Some(&onto_ann), None, None)?;
        let sig = self.repo.signature()?;
        while let Some(op) = rebase.next() {
            op?;
            if self.repo.index()?.has_conflicts() {
                rebase.abort()?;
                return Err(GitFlowError::MergeConflict(branch.to_string()));
            }
            match rebase.commit(None, &sig, None) {
                Ok(_) => {}
                // Patch already applied upstream; skip it.
                Err(e) if e.code() == ErrorCode::Applied => {}
                Err(e) => return Err(e.into()),
            }
        }
        rebase.finish(Some(&sig))?;
        Ok(())
    }

    fn is_ancestor(&self, ancestor: Oid, descendant: Oid) -> Result<bool> {
        if ancestor == descendant {
            return Ok(true);
        }
        Ok(self.repo.graph_descendant_of(descendant, ancestor)?)
    }

    fn ahead_count(&self, base: Oid, tip: Oid) -> Result<usize> {
        let (ahead, _) = self.repo.graph_ahead_behind(tip, base)?;
        Ok(ahead)
    }

    fn diff_summary(&self, base: Oid, tip: Oid) -> Result<String> {
        let base_tree = self.repo.find_commit(base)?.tree()?;
        let tip_tree = self.repo.find_commit(tip)?.tree()?;
        let diff = self
            .repo
            .diff_tree_to_tree(Some(&base_tree), Some(&tip_tree), None)?;
        let stats = diff.stats()?;
        Ok(format!(
            "{} file(s) changed, {} insertion(s), {} deletion(s)",
            stats.files_changed(),
            stats.insertions(),
            stats.deletions()
        ))
    }

    fn is_dirty(&self) -> Result<bool> {
        let mut opts = git2::StatusOptions::new();
        opts.include_untracked(false).include_ignored(false);
        let staged = Status::INDEX_NEW
            | Status::INDEX_MODIFIED
            | Status::INDEX_DELETED
            | Status::INDEX_RENAMED
            | Status::INDEX_TYPECHANGE;
        let statuses = self.repo.statuses(Some(&mut opts))?;
        Ok(statuses.iter().any(|s| s.status().intersects(staged)))
    }

    fn has_unresolved_merge(&self) -> Result<bool> {
        if self.repo.state() != RepositoryState::Clean {
            return Ok(true);
        }
        Ok(self.repo.index()?.has_conflicts())
    }

    fn tag_exists(&self, name: &str) -> Result<bool> {
        match self.repo.find_reference(&format!("refs/tags/{}", name)) {
            Ok(_) => Ok(true),
            Err(e) if e.code() == ErrorCode::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    fn list_tags(&self) -> Result<Vec<String>> {
        let tags = self.repo.tag_names(None)?;
        Ok(tags.iter().flatten().map(|s| s.to_string()).collect())
    }

    fn create_tag(&self, name: &str, target: Oid, info: &TagInfo) -> Result<()> {
        if self.tag_exists(name)? {
            return Err(GitFlowError::TagExists(name.to_string()));
        }
        match &info.message {
            None => {
                let object = self.repo.find_object(target, None)?;
                self.repo.tag_lightweight(name, &object, false)?;
            }
            Some(message) if info.sign => {
                self.create_signed_tag(name, target, message, info.signing_key.as_deref())?;
            }
            Some(message) => {
                let object = self.repo.find_object(target, None)?;
                let sig = self.repo.signature()?;
                self.repo.tag(name, &object, &sig, message, false)?;
            }
        }
        Ok(())
    }

    fn sign(&self, payload: &[u8], key_id: Option<&str>) -> Result<Vec<u8>> {
        let mut command = Command::new("gpg");
        command.args(["--detach-sign", "--armor"]);
        if let Some(key) = key_id {
            command.args(["--local-user", key]);
        }
        let mut child = command
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()?;
        child
            .stdin
            .as_mut()
            .ok_or_else(|| GitFlowError::fatal("Cannot write to gpg stdin"))?
            .write_all(payload)?;
        let output = child.wait_with_output()?;
        if !output.status.success() {
            return Err(GitFlowError::fatal(format!(
                "gpg signing failed: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        Ok(output.stdout)
    }

    fn remote_exists(&self, remote: &str) -> Result<bool> {
        match self.repo.find_remote(remote) {
            Ok(_) => Ok(true),
            Err(e) if e.code() == ErrorCode::NotFound || e.code() == ErrorCode::InvalidSpec => {
                Ok(false)
            }
            Err(e) => Err(e.into()),
        }
    }

    fn remote_branch_head(&self, remote: &str, branch: &str) -> Result<Option<Oid>> {
        let refname = format!("refs/remotes/{}/{}", remote, branch);
        match self.repo.find_reference(&refname) {
            Ok(reference) => Ok(reference.target()),
            Err(e) if e.code() == ErrorCode::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn fetch(&self, remote: &str, branch: &str) -> Result<()> {
        let mut remote_handle = self
            .repo
            .find_remote(remote)
            .map_err(|_| GitFlowError::NoSuchRemote(remote.to_string()))?;
        let mut fetch_options = git2::FetchOptions::new();
        fetch_options.remote_callbacks(Self::remote_callbacks());
        let refspec = format!("+refs/heads/{}:refs/remotes/{}/{}", branch, remote, branch);
        let refspecs = [refspec.as_str(), "+refs/tags/*:refs/tags/*"];
        remote_handle
            .fetch(&refspecs, Some(&mut fetch_options), None)
            .map_err(|e| {
                GitFlowError::fatal(format!("Failed to fetch from remote '{}': {}", remote, e))
            })?;
        Ok(())
    }

    fn push(&self, remote: &str, refspecs: &[String]) -> Result<()> {
        let mut remote_handle = self
            .repo
            .find_remote(remote)
            .map_err(|_| GitFlowError::NoSuchRemote(remote.to_string()))?;
        let mut push_options = git2::PushOptions::new();
        let mut callbacks = Self::remote_callbacks();
        callbacks.push_update_reference(|refname, status| {
            if let Some(status) = status {
                Err(git2::Error::from_str(&format!(
                    "Push failed for {}: {}",
                    refname, status
                )))
            } else {
                Ok(())
            }
        });
        push_options.remote_callbacks(callbacks);

        let refspec_strs: Vec<&str> = refspecs.iter().map(|s| s.as_str()).collect();
        remote_handle
            .push(&refspec_strs, Some(&mut push_options))
            .map_err(|e| {
                GitFlowError::fatal(format!("Failed to push to remote '{}': {}", remote, e))
            })?;
        Ok(())
    }

    fn set_upstream(&self, branch: &str, remote: &str, remote_branch: &str) -> Result<()> {
        let mut local = self
            .repo
            .find_branch(branch, BranchType::Local)
            .map_err(|_| GitFlowError::NoSuchBranch(branch.to_string()))?;
        local.set_upstream(Some(&format!("{}/{}", remote, remote_branch)))?;
        Ok(())
    }

    fn config_get(&self, key: &str) -> Result<Option<String>> {
        crate::config::validate_key(key)?;
        let config = self.repo.config()?.snapshot()?;
        match config.get_string(key) {
            Ok(value) => Ok(Some(value)),
            Err(e) if e.code() == ErrorCode::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn config_set(&self, key: &str, value: &str) -> Result<()> {
        crate::config::validate_key(key)?;
        let mut config = self.repo.config()?;
        config.set_str(key, value)?;
        Ok(())
    }

    fn state_dir(&self) -> Result<PathBuf> {
        Ok(self.repo.path().join("gitflow"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_discover_outside_a_repository_fails() {
        let dir = std::env::temp_dir().join("git-flow-no-repo-here");
        let _ = std::fs::create_dir_all(&dir);
        // temp_dir may live under a repository on some setups; only assert
        // that open() does not panic either way.
        let _ = Git2Backend::open(&dir);
    }

    #[test]
    fn test_format_signature_offset() {
        let sig = git2::Signature::new(
            "Tester",
            "tester@example.com",
            &git2::Time::new(1_700_000_000, 90),
        )
        .unwrap();
        let formatted = Git2Backend::format_signature(&sig);
        assert_eq!(
            formatted,
            "Tester <tester@example.com> 1700000000 +0130"
        );
    }
}
