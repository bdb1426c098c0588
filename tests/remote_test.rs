//! Track, publish, and pull against a simulated remote.

use git_flow::error::GitFlowError;
use git_flow::flow::{GitFlow, InitOptions};
use git_flow::git::{InMemoryBackend, RepositoryBackend};
use tempfile::TempDir;

fn setup() -> (GitFlow<InMemoryBackend>, TempDir) {
    let dir = TempDir::new().unwrap();
    let backend = InMemoryBackend::new();
    backend.set_state_dir(dir.path());
    let root = backend.seed_commit("initial commit");
    backend.create_branch("master", root).unwrap();
    backend.create_branch("develop", root).unwrap();
    backend.checkout("develop").unwrap();
    let flow = GitFlow::new(backend);
    flow.init(&InitOptions::default()).unwrap();
    (flow, dir)
}

/// Put `feature/x` on the given remote, one commit ahead of develop.
fn seed_remote_feature(flow: &GitFlow<InMemoryBackend>, remote: &str) -> git2::Oid {
    let backend = flow.backend();
    let develop_head = backend.branch_head("develop").unwrap();
    backend.create_branch("stage", develop_head).unwrap();
    let tip = backend.commit_on("stage", "remote feature work");
    backend.delete_branch("stage", true).unwrap();
    backend.set_remote_branch(remote, "feature/x", tip);
    tip
}

#[test]
fn track_creates_tracking_branch_at_remote_tip() {
    let (flow, _dir) = setup();
    let tip = seed_remote_feature(&flow, "origin");

    flow.track("feature", "x").unwrap();

    let backend = flow.backend();
    assert_eq!(backend.branch_head("feature/x").unwrap(), tip);
    assert_eq!(
        backend.upstream_of("feature/x").as_deref(),
        Some("origin/feature/x")
    );
    assert_eq!(
        backend.current_branch().unwrap().as_deref(),
        Some("feature/x")
    );
    assert_eq!(
        backend.fetch_log(),
        vec![("origin".to_string(), "feature/x".to_string())]
    );
}

#[test]
fn track_hotfix_branch_from_remote() {
    let (flow, _dir) = setup();
    let backend = flow.backend();
    let master_head = backend.branch_head("master").unwrap();
    backend.set_remote_branch("origin", "hotfix/1.0.1", master_head);

    flow.track("hotfix", "1.0.1").unwrap();

    assert_eq!(backend.branch_head("hotfix/1.0.1").unwrap(), master_head);
    assert_eq!(
        backend.upstream_of("hotfix/1.0.1").as_deref(),
        Some("origin/hotfix/1.0.1")
    );
    assert_eq!(
        backend.current_branch().unwrap().as_deref(),
        Some("hotfix/1.0.1")
    );
}

#[test]
fn track_rejects_existing_local_branch_without_mutation() {
    let (flow, _dir) = setup();
    seed_remote_feature(&flow, "origin");
    let backend = flow.backend();
    let root = backend.branch_head("develop").unwrap();
    backend.create_branch("feature/x", root).unwrap();

    let err = flow.track("feature", "x").unwrap_err();
    assert!(matches!(err, GitFlowError::BranchExists(name) if name == "feature/x"));
    // The local branch still points where it did; nothing was fetched.
    assert_eq!(backend.branch_head("feature/x").unwrap(), root);
    assert!(backend.fetch_log().is_empty());
}

#[test]
fn track_fails_when_remote_lacks_the_branch() {
    let (flow, _dir) = setup();
    flow.backend().add_remote("origin");

    assert!(matches!(
        flow.track("feature", "x"),
        Err(GitFlowError::NoSuchBranch(name)) if name == "origin/feature/x"
    ));
    assert!(!flow.backend().branch_exists("feature/x").unwrap());
}

#[test]
fn track_fails_without_a_remote() {
    let (flow, _dir) = setup();
    assert!(matches!(
        flow.track("feature", "x"),
        Err(GitFlowError::NoSuchRemote(_))
    ));
}

#[test]
fn publish_pushes_branch_and_configures_tracking() {
    let (flow, _dir) = setup();
    let backend = flow.backend();
    backend.add_remote("origin");
    flow.manager("feature")
        .unwrap()
        .create("x", None, false)
        .unwrap();
    let tip = backend.commit_on("feature/x", "local work");
    backend.checkout("develop").unwrap();

    flow.publish("feature", "x").unwrap();

    assert_eq!(backend.remote_head("origin", "feature/x"), Some(tip));
    assert_eq!(
        backend.upstream_of("feature/x").as_deref(),
        Some("origin/feature/x")
    );
    assert_eq!(
        backend.current_branch().unwrap().as_deref(),
        Some("feature/x")
    );
}

#[test]
fn publish_rejects_missing_local_branch() {
    let (flow, _dir) = setup();
    flow.backend().add_remote("origin");
    assert!(matches!(
        flow.publish("feature", "x"),
        Err(GitFlowError::NoSuchBranch(name)) if name == "feature/x"
    ));
}

#[test]
fn publish_rejects_existing_remote_branch() {
    let (flow, _dir) = setup();
    let tip = seed_remote_feature(&flow, "origin");
    flow.backend().create_branch("feature/x", tip).unwrap();

    assert!(matches!(
        flow.publish("feature", "x"),
        Err(GitFlowError::BranchExists(name)) if name == "origin/feature/x"
    ));
}

#[test]
fn pull_aborts_from_another_branch_of_the_same_type() {
    let (flow, _dir) = setup();
    seed_remote_feature(&flow, "peer");
    flow.manager("feature")
        .unwrap()
        .create("other", None, false)
        .unwrap();

    assert!(matches!(
        flow.pull("feature", "peer", "x"),
        Err(GitFlowError::Fatal(_))
    ));
    assert!(!flow.backend().branch_exists("feature/x").unwrap());
}

#[test]
fn pull_rejects_unknown_remote() {
    let (flow, _dir) = setup();
    assert!(matches!(
        flow.pull("feature", "peer", "x"),
        Err(GitFlowError::NoSuchRemote(name)) if name == "peer"
    ));
}

#[test]
fn pull_creates_non_tracking_branch_at_remote_tip() {
    let (flow, _dir) = setup();
    let tip = seed_remote_feature(&flow, "peer");

    flow.pull("feature", "peer", "x").unwrap();

    let backend = flow.backend();
    assert_eq!(backend.branch_head("feature/x").unwrap(), tip);
    assert_eq!(
        backend.current_branch().unwrap().as_deref(),
        Some("feature/x")
    );
    // Pulled branches do not track the remote they came from.
    assert_eq!(backend.upstream_of("feature/x"), None);
}

#[test]
fn pull_merges_into_existing_local_branch() {
    let (flow, _dir) = setup();
    let backend = flow.backend();
    let root = backend.branch_head("develop").unwrap();
    backend.create_branch("feature/x", root).unwrap();
    let tip = seed_remote_feature(&flow, "peer");

    flow.pull("feature", "peer", "x").unwrap();

    // The local branch was behind the remote, so the merge fast-forwards.
    assert_eq!(backend.branch_head("feature/x").unwrap(), tip);
    assert_eq!(
        backend.fetch_log(),
        vec![("peer".to_string(), "feature/x".to_string())]
    );
}
