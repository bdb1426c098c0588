use crate::error::{GitFlowError, Result};
use crate::git::{MergeOutcome, RepositoryBackend, TagInfo};
use git2::Oid;
use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::PathBuf;

#[derive(Default)]
struct State {
    /// Commit id -> parent ids. A root commit has no parents.
    commits: HashMap<Oid, Vec<Oid>>,
    messages: HashMap<Oid, String>,
    branches: BTreeMap<String, Oid>,
    upstreams: HashMap<String, String>,
    tags: BTreeMap<String, Oid>,
    tag_infos: HashMap<String, TagInfo>,
    remotes: HashSet<String>,
    remote_branches: HashMap<(String, String), Oid>,
    remote_tags: HashMap<(String, String), Oid>,
    head: Option<String>,
    dirty: bool,
    unresolved_merge: bool,
    /// Branch names whose merge is scripted to conflict.
    conflicts: HashSet<String>,
    fetched: Vec<(String, String)>,
    config: HashMap<String, String>,
    state_dir: Option<PathBuf>,
    next_id: u64,
}

/// In-memory repository for testing the workflow engine without touching
/// a real git repository.
///
/// Holds a real (if tiny) commit graph so that ancestry queries, fast-forward
/// detection, and merge-commit parent counts behave like the real thing.
/// Conflicts and dirty-worktree states are scripted through the setup
/// helpers.
pub struct InMemoryBackend {
    state: RefCell<State>,
}

impl InMemoryBackend {
    /// Create a new empty in-memory repository
    pub fn new() -> Self {
        InMemoryBackend {
            state: RefCell::new(State::default()),
        }
    }

    fn new_oid(state: &mut State) -> Oid {
        state.next_id += 1;
        let mut bytes = [0u8; 20];
        bytes[12..].copy_from_slice(&state.next_id.to_be_bytes());
        Oid::from_bytes(&bytes).unwrap()
    }

    fn reachable(state: &State, from: Oid) -> HashSet<Oid> {
        let mut seen = HashSet::new();
        let mut stack = vec![from];
        while let Some(oid) = stack.pop() {
            if seen.insert(oid) {
                if let Some(parents) = state.commits.get(&oid) {
                    stack.extend(parents.iter().copied());
                }
            }
        }
        seen
    }

    /// Create a root commit that is not yet on any branch
    pub fn seed_commit(&self, message: &str) -> Oid {
        let mut state = self.state.borrow_mut();
        let oid = Self::new_oid(&mut state);
        state.commits.insert(oid, Vec::new());
        state.messages.insert(oid, message.to_string());
        oid
    }

    /// Append a commit to a branch and move the branch tip to it
    pub fn commit_on(&self, branch: &str, message: &str) -> Oid {
        let mut state = self.state.borrow_mut();
        let parent = *state
            .branches
            .get(branch)
            .unwrap_or_else(|| panic!("no such branch in mock: {}", branch));
        let oid = Self::new_oid(&mut state);
        state.commits.insert(oid, vec![parent]);
        state.messages.insert(oid, message.to_string());
        state.branches.insert(branch.to_string(), oid);
        oid
    }

    /// Register a remote by name
    pub fn add_remote(&self, name: &str) {
        self.state.borrow_mut().remotes.insert(name.to_string());
    }

    /// Set the tip of a remote-tracking branch
    pub fn set_remote_branch(&self, remote: &str, branch: &str, oid: Oid) {
        let mut state = self.state.borrow_mut();
        state.remotes.insert(remote.to_string());
        state
            .remote_branches
            .insert((remote.to_string(), branch.to_string()), oid);
    }

    /// Script staged-but-uncommitted changes
    pub fn set_dirty(&self, dirty: bool) {
        self.state.borrow_mut().dirty = dirty;
    }

    /// Script an in-progress merge with unresolved conflicts
    pub fn set_unresolved_merge(&self, pending: bool) {
        self.state.borrow_mut().unresolved_merge = pending;
    }

    /// Script the next merge of `source` to conflict
    pub fn conflict_on(&self, source: &str) {
        self.state.borrow_mut().conflicts.insert(source.to_string());
    }

    /// Directory the backend reports for persisted state
    pub fn set_state_dir(&self, dir: impl Into<PathBuf>) {
        self.state.borrow_mut().state_dir = Some(dir.into());
    }

    /// Parents of a commit, for asserting merge shapes in tests
    pub fn parents_of(&self, oid: Oid) -> Vec<Oid> {
        self.state
            .borrow()
            .commits
            .get(&oid)
            .cloned()
            .unwrap_or_default()
    }

    /// Message of a commit
    pub fn message_of(&self, oid: Oid) -> Option<String> {
        self.state.borrow().messages.get(&oid).cloned()
    }

    /// The upstream configured for a branch, as `remote/branch`
    pub fn upstream_of(&self, branch: &str) -> Option<String> {
        self.state.borrow().upstreams.get(branch).cloned()
    }

    /// Tip of a branch on the simulated remote
    pub fn remote_head(&self, remote: &str, branch: &str) -> Option<Oid> {
        self.state
            .borrow()
            .remote_branches
            .get(&(remote.to_string(), branch.to_string()))
            .copied()
    }

    /// Tagging request recorded when a tag was created, for asserting
    /// lightweight vs annotated vs signed shapes
    pub fn tag_info_of(&self, name: &str) -> Option<TagInfo> {
        self.state.borrow().tag_infos.get(name).cloned()
    }

    /// Tag on the simulated remote
    pub fn remote_tag(&self, remote: &str, tag: &str) -> Option<Oid> {
        self.state
            .borrow()
            .remote_tags
            .get(&(remote.to_string(), tag.to_string()))
            .copied()
    }

    /// `(remote, branch)` pairs fetched so far
    pub fn fetch_log(&self) -> Vec<(String, String)> {
        self.state.borrow().fetched.clone()
    }
}

impl Default for InMemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl RepositoryBackend for InMemoryBackend {
    fn list_branches(&self) -> Result<Vec<String>> {
        Ok(self.state.borrow().branches.keys().cloned().collect())
    }

    fn branch_exists(&self, name: &str) -> Result<bool> {
        Ok(self.state.borrow().branches.contains_key(name))
    }

    fn branch_head(&self, name: &str) -> Result<Oid> {
        self.state
            .borrow()
            .branches
            .get(name)
            .copied()
            .ok_or_else(|| GitFlowError::NoSuchBranch(name.to_string()))
    }

    fn create_branch(&self, name: &str, target: Oid) -> Result<()> {
        let mut state = self.state.borrow_mut();
        if state.branches.contains_key(name) {
            return Err(GitFlowError::BranchExists(name.to_string()));
        }
        state.branches.insert(name.to_string(), target);
        Ok(())
    }

    fn move_branch(&self, name: &str, target: Oid) -> Result<()> {
        let mut state = self.state.borrow_mut();
        if !state.branches.contains_key(name) {
            return Err(GitFlowError::NoSuchBranch(name.to_string()));
        }
        state.branches.insert(name.to_string(), target);
        Ok(())
    }

    fn delete_branch(&self, name: &str, force: bool) -> Result<()> {
        let mut state = self.state.borrow_mut();
        if state.head.as_deref() == Some(name) {
            return Err(GitFlowError::fatal(format!(
                "Cannot delete the currently checked-out branch '{}'",
                name
            )));
        }
        let head = *state
            .branches
            .get(name)
            .ok_or_else(|| GitFlowError::NoSuchBranch(name.to_string()))?;
        if !force {
            // Unmerged protection: the branch tip must be reachable from at
            // least one other branch.
            let merged = state
                .branches
                .iter()
                .filter(|(other, _)| other.as_str() != name)
                .any(|(_, tip)| Self::reachable(&state, *tip).contains(&head));
            if !merged {
                return Err(GitFlowError::fatal(format!(
                    "Branch '{}' is not fully merged; use force to delete it anyway",
                    name
                )));
            }
        }
        state.branches.remove(name);
        state.upstreams.remove(name);
        Ok(())
    }

    fn checkout(&self, name: &str) -> Result<()> {
        let mut state = self.state.borrow_mut();
        if !state.branches.contains_key(name) {
            return Err(GitFlowError::NoSuchBranch(name.to_string()));
        }
        state.head = Some(name.to_string());
        Ok(())
    }

    fn current_branch(&self) -> Result<Option<String>> {
        Ok(self.state.borrow().head.clone())
    }

    fn hard_reset(&self, target: Oid) -> Result<()> {
        let mut state = self.state.borrow_mut();
        let head = state
            .head
            .clone()
            .ok_or_else(|| GitFlowError::fatal("HEAD is detached"))?;
        state.branches.insert(head, target);
        state.dirty = false;
        state.unresolved_merge = false;
        Ok(())
    }

    fn commit(&self, message: &str) -> Result<Oid> {
        let mut state = self.state.borrow_mut();
        let head = state
            .head
            .clone()
            .ok_or_else(|| GitFlowError::fatal("HEAD is detached"))?;
        let parent = state.branches[&head];
        let oid = Self::new_oid(&mut state);
        state.commits.insert(oid, vec![parent]);
        state.messages.insert(oid, message.to_string());
        state.branches.insert(head, oid);
        state.dirty = false;
        Ok(oid)
    }

    fn merge(&self, source: &str, message: Option<&str>, no_ff: bool) -> Result<MergeOutcome> {
        let mut state = self.state.borrow_mut();
        let head = state
            .head
            .clone()
            .ok_or_else(|| GitFlowError::fatal("HEAD is detached"))?;
        if state.conflicts.contains(source) {
            state.unresolved_merge = true;
            return Err(GitFlowError::MergeConflict(head));
        }
        // Local branches first; otherwise interpret `remote/branch`.
        let source_tip = match state.branches.get(source) {
            Some(tip) => *tip,
            None => {
                let remote_tip = source.split_once('/').and_then(|(remote, branch)| {
                    state
                        .remote_branches
                        .get(&(remote.to_string(), branch.to_string()))
                        .copied()
                });
                remote_tip.ok_or_else(|| GitFlowError::NoSuchBranch(source.to_string()))?
            }
        };
        let target_tip = state.branches[&head];

        if Self::reachable(&state, target_tip).contains(&source_tip) {
            return Ok(MergeOutcome::AlreadyUpToDate);
        }
        if !no_ff && Self::reachable(&state, source_tip).contains(&target_tip) {
            state.branches.insert(head, source_tip);
            return Ok(MergeOutcome::FastForward);
        }

        let oid = Self::new_oid(&mut state);
        state.commits.insert(oid, vec![target_tip, source_tip]);
        let message = message
            .map(|m| m.to_string())
            .unwrap_or_else(|| format!("Merge branch '{}' into {}", source, head));
        state.messages.insert(oid, message);
        state.branches.insert(head, oid);
        Ok(MergeOutcome::MergeCommit)
    }

    fn rebase(&self, branch: &str, onto: &str) -> Result<()> {
        let mut state = self.state.borrow_mut();
        if state.conflicts.contains(branch) {
            return Err(GitFlowError::MergeConflict(branch.to_string()));
        }
        let onto_tip = *state
            .branches
            .get(onto)
            .ok_or_else(|| GitFlowError::NoSuchBranch(onto.to_string()))?;
        let branch_tip = *state
            .branches
            .get(branch)
            .ok_or_else(|| GitFlowError::NoSuchBranch(branch.to_string()))?;

        let upstream = Self::reachable(&state, onto_tip);
        if upstream.contains(&branch_tip) {
            state.branches.insert(branch.to_string(), onto_tip);
            return Ok(());
        }

        // Collect the first-parent chain that is not on `onto`, oldest first.
        let mut chain = Vec::new();
        let mut cursor = branch_tip;
        while !upstream.contains(&cursor) {
            chain.push(cursor);
            match state.commits.get(&cursor).and_then(|p| p.first()) {
                Some(parent) => cursor = *parent,
                None => break,
            }
        }
        chain.reverse();

        let mut new_tip = onto_tip;
        for old in chain {
            let message = state.messages.get(&old).cloned().unwrap_or_default();
            let oid = Self::new_oid(&mut state);
            state.commits.insert(oid, vec![new_tip]);
            state.messages.insert(oid, message);
            new_tip = oid;
        }
        state.branches.insert(branch.to_string(), new_tip);
        Ok(())
    }

    fn is_ancestor(&self, ancestor: Oid, descendant: Oid) -> Result<bool> {
        let state = self.state.borrow();
        Ok(Self::reachable(&state, descendant).contains(&ancestor))
    }

    fn ahead_count(&self, base: Oid, tip: Oid) -> Result<usize> {
        let state = self.state.borrow();
        let base_set = Self::reachable(&state, base);
        let count = Self::reachable(&state, tip)
            .iter()
            .filter(|oid| !base_set.contains(oid))
            .count();
        Ok(count)
    }

    fn diff_summary(&self, base: Oid, tip: Oid) -> Result<String> {
        let ahead = self.ahead_count(base, tip)?;
        Ok(format!("{} commit(s) not on the base branch", ahead))
    }

    fn is_dirty(&self) -> Result<bool> {
        Ok(self.state.borrow().dirty)
    }

    fn has_unresolved_merge(&self) -> Result<bool> {
        Ok(self.state.borrow().unresolved_merge)
    }

    fn tag_exists(&self, name: &str) -> Result<bool> {
        Ok(self.state.borrow().tags.contains_key(name))
    }

    fn list_tags(&self) -> Result<Vec<String>> {
        Ok(self.state.borrow().tags.keys().cloned().collect())
    }

    fn create_tag(&self, name: &str, target: Oid, info: &TagInfo) -> Result<()> {
        let mut state = self.state.borrow_mut();
        if state.tags.contains_key(name) {
            return Err(GitFlowError::TagExists(name.to_string()));
        }
        state.tags.insert(name.to_string(), target);
        state.tag_infos.insert(name.to_string(), info.clone());
        Ok(())
    }

    fn sign(&self, payload: &[u8], key_id: Option<&str>) -> Result<Vec<u8>> {
        let mut signature = b"-----MOCK SIGNATURE-----\n".to_vec();
        signature.extend_from_slice(key_id.unwrap_or("default").as_bytes());
        signature.extend_from_slice(&payload.len().to_be_bytes());
        Ok(signature)
    }

    fn remote_exists(&self, remote: &str) -> Result<bool> {
        Ok(self.state.borrow().remotes.contains(remote))
    }

    fn remote_branch_head(&self, remote: &str, branch: &str) -> Result<Option<Oid>> {
        Ok(self
            .state
            .borrow()
            .remote_branches
            .get(&(remote.to_string(), branch.to_string()))
            .copied())
    }

    fn fetch(&self, remote: &str, branch: &str) -> Result<()> {
        let mut state = self.state.borrow_mut();
        if !state.remotes.contains(remote) {
            return Err(GitFlowError::NoSuchRemote(remote.to_string()));
        }
        state.fetched.push((remote.to_string(), branch.to_string()));
        Ok(())
    }

    fn push(&self, remote: &str, refspecs: &[String]) -> Result<()> {
        let mut state = self.state.borrow_mut();
        if !state.remotes.contains(remote) {
            return Err(GitFlowError::NoSuchRemote(remote.to_string()));
        }
        for refspec in refspecs {
            if let Some(dst) = refspec.strip_prefix(':') {
                let name = dst.strip_prefix("refs/heads/").unwrap_or(dst);
                state
                    .remote_branches
                    .remove(&(remote.to_string(), name.to_string()));
            } else if let Some(rest) = refspec.strip_prefix("refs/tags/") {
                let name = rest.split(':').next().unwrap_or(rest);
                let target = *state
                    .tags
                    .get(name)
                    .ok_or_else(|| GitFlowError::TagExists(name.to_string()))?;
                state
                    .remote_tags
                    .insert((remote.to_string(), name.to_string()), target);
            } else {
                let src = refspec.split(':').next().unwrap_or(refspec);
                let name = src.strip_prefix("refs/heads/").unwrap_or(src);
                let target = *state
                    .branches
                    .get(name)
                    .ok_or_else(|| GitFlowError::NoSuchBranch(name.to_string()))?;
                state
                    .remote_branches
                    .insert((remote.to_string(), name.to_string()), target);
            }
        }
        Ok(())
    }

    fn set_upstream(&self, branch: &str, remote: &str, remote_branch: &str) -> Result<()> {
        self.state
            .borrow_mut()
            .upstreams
            .insert(branch.to_string(), format!("{}/{}", remote, remote_branch));
        Ok(())
    }

    fn config_get(&self, key: &str) -> Result<Option<String>> {
        crate::config::validate_key(key)?;
        Ok(self.state.borrow().config.get(key).cloned())
    }

    fn config_set(&self, key: &str, value: &str) -> Result<()> {
        crate::config::validate_key(key)?;
        self.state
            .borrow_mut()
            .config
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn state_dir(&self) -> Result<PathBuf> {
        self.state
            .borrow()
            .state_dir
            .clone()
            .ok_or_else(|| GitFlowError::config("no state directory configured for mock backend"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn backend_with_develop() -> (InMemoryBackend, Oid) {
        let backend = InMemoryBackend::new();
        let root = backend.seed_commit("initial");
        backend.create_branch("develop", root).unwrap();
        (backend, root)
    }

    #[test]
    fn test_branch_head_and_existence() {
        let (backend, root) = backend_with_develop();
        assert!(backend.branch_exists("develop").unwrap());
        assert_eq!(backend.branch_head("develop").unwrap(), root);
        assert!(matches!(
            backend.branch_head("missing"),
            Err(GitFlowError::NoSuchBranch(_))
        ));
    }

    #[test]
    fn test_merge_fast_forward_moves_ref() {
        let (backend, root) = backend_with_develop();
        backend.create_branch("topic", root).unwrap();
        let tip = backend.commit_on("topic", "work");
        backend.checkout("develop").unwrap();

        let outcome = backend.merge("topic", None, false).unwrap();
        assert_eq!(outcome, MergeOutcome::FastForward);
        assert_eq!(backend.branch_head("develop").unwrap(), tip);
    }

    #[test]
    fn test_merge_no_ff_creates_two_parent_commit() {
        let (backend, root) = backend_with_develop();
        backend.create_branch("topic", root).unwrap();
        let tip = backend.commit_on("topic", "work");
        backend.checkout("develop").unwrap();

        let outcome = backend.merge("topic", Some("merged"), true).unwrap();
        assert_eq!(outcome, MergeOutcome::MergeCommit);
        let merged = backend.branch_head("develop").unwrap();
        assert_eq!(backend.parents_of(merged), vec![root, tip]);
        assert_eq!(backend.message_of(merged).as_deref(), Some("merged"));
    }

    #[test]
    fn test_merge_conflict_leaves_unresolved_state() {
        let (backend, root) = backend_with_develop();
        backend.create_branch("topic", root).unwrap();
        backend.commit_on("topic", "work");
        backend.checkout("develop").unwrap();
        backend.conflict_on("topic");

        assert!(matches!(
            backend.merge("topic", None, false),
            Err(GitFlowError::MergeConflict(_))
        ));
        assert!(backend.has_unresolved_merge().unwrap());
    }

    #[test]
    fn test_unmerged_delete_requires_force() {
        let (backend, root) = backend_with_develop();
        backend.create_branch("topic", root).unwrap();
        backend.commit_on("topic", "work");
        backend.checkout("develop").unwrap();

        assert!(backend.delete_branch("topic", false).is_err());
        backend.delete_branch("topic", true).unwrap();
        assert!(!backend.branch_exists("topic").unwrap());
    }

    #[test]
    fn test_rebase_replays_commits_on_new_base() {
        let (backend, root) = backend_with_develop();
        backend.create_branch("topic", root).unwrap();
        backend.commit_on("topic", "topic work");
        let develop_tip = backend.commit_on("develop", "mainline work");

        backend.rebase("topic", "develop").unwrap();
        let new_tip = backend.branch_head("topic").unwrap();
        assert_eq!(backend.parents_of(new_tip), vec![develop_tip]);
        assert_eq!(backend.message_of(new_tip).as_deref(), Some("topic work"));
    }

    #[test]
    fn test_push_refspecs_update_remote() {
        let (backend, root) = backend_with_develop();
        backend.add_remote("origin");
        let tip = backend.commit_on("develop", "work");
        backend.create_tag("v1", root, &TagInfo::default()).unwrap();

        backend
            .push(
                "origin",
                &[
                    "refs/heads/develop:refs/heads/develop".to_string(),
                    "refs/tags/v1".to_string(),
                ],
            )
            .unwrap();
        assert_eq!(backend.remote_head("origin", "develop"), Some(tip));
        assert_eq!(backend.remote_tag("origin", "v1"), Some(root));

        backend
            .push("origin", &[":refs/heads/develop".to_string()])
            .unwrap();
        assert_eq!(backend.remote_head("origin", "develop"), None);
    }

    #[test]
    fn test_config_round_trip() {
        let backend = InMemoryBackend::new();
        backend.config_set("gitflow.branch.master", "master").unwrap();
        assert_eq!(
            backend.config_get("gitflow.branch.master").unwrap(),
            Some("master".to_string())
        );
        assert_eq!(backend.config_get("gitflow.origin").unwrap(), None);
        assert!(backend.config_get("gitflow").is_err());
    }
}
