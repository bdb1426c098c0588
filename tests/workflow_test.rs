//! Workflow scenarios driven through the in-memory backend.

use git_flow::branches::FinishOptions;
use git_flow::error::GitFlowError;
use git_flow::flow::{GitFlow, InitOptions};
use git_flow::git::{InMemoryBackend, RepositoryBackend, TagInfo};
use tempfile::TempDir;

/// Repository with master and develop at a shared root commit, develop
/// checked out, git-flow initialized with a `v` version-tag prefix.
fn setup() -> (GitFlow<InMemoryBackend>, TempDir) {
    let dir = TempDir::new().unwrap();
    let backend = InMemoryBackend::new();
    backend.set_state_dir(dir.path());
    let root = backend.seed_commit("initial commit");
    backend.create_branch("master", root).unwrap();
    backend.create_branch("develop", root).unwrap();
    backend.checkout("develop").unwrap();
    let flow = GitFlow::new(backend);
    flow.init(&InitOptions {
        versiontag: Some("v".to_string()),
        ..Default::default()
    })
    .unwrap();
    (flow, dir)
}

#[test]
fn feature_start_roots_on_develop_and_checks_out() {
    let (flow, _dir) = setup();
    let develop_head = flow.backend().branch_head("develop").unwrap();

    let branch = flow
        .manager("feature")
        .unwrap()
        .create("login", None, false)
        .unwrap();

    assert_eq!(branch.name, "feature/login");
    assert_eq!(branch.head, develop_head);
    assert_eq!(
        flow.backend().current_branch().unwrap().as_deref(),
        Some("feature/login")
    );
}

#[test]
fn hotfix_start_roots_on_master() {
    let (flow, _dir) = setup();
    let master_head = flow.backend().branch_head("master").unwrap();
    flow.backend().commit_on("develop", "develop moved on");

    let branch = flow
        .manager("hotfix")
        .unwrap()
        .create("1.0.1", None, false)
        .unwrap();
    assert_eq!(branch.head, master_head);
}

#[test]
fn feature_start_rejects_existing_branch() {
    let (flow, _dir) = setup();
    let manager = flow.manager("feature").unwrap();
    manager.create("login", None, false).unwrap();
    flow.backend().checkout("develop").unwrap();

    assert!(matches!(
        manager.create("login", None, false),
        Err(GitFlowError::BranchExists(name)) if name == "feature/login"
    ));
}

#[test]
fn feature_start_rejects_dirty_workdir() {
    let (flow, _dir) = setup();
    flow.backend().set_dirty(true);
    assert!(matches!(
        flow.manager("feature").unwrap().create("login", None, false),
        Err(GitFlowError::WorkdirIsDirty)
    ));
}

#[test]
fn feature_start_rejects_pending_merge() {
    let (flow, _dir) = setup();
    flow.backend().set_unresolved_merge(true);
    assert!(matches!(
        flow.manager("feature").unwrap().create("login", None, false),
        Err(GitFlowError::MergeConflict(_))
    ));
}

#[test]
fn feature_start_rejects_stale_local_develop() {
    let (flow, _dir) = setup();
    let backend = flow.backend();
    // The remote develop has a commit the local branch lacks.
    backend.create_branch("scratch", backend.branch_head("develop").unwrap()).unwrap();
    let remote_tip = backend.commit_on("scratch", "remote-only work");
    backend.delete_branch("scratch", true).unwrap();
    backend.set_remote_branch("origin", "develop", remote_tip);

    assert!(matches!(
        flow.manager("feature").unwrap().create("login", None, false),
        Err(GitFlowError::BranchesDiverged { .. })
    ));
}

#[test]
fn feature_start_uses_remote_counterpart_as_base() {
    let (flow, _dir) = setup();
    let backend = flow.backend();
    let develop_head = backend.branch_head("develop").unwrap();
    backend.set_remote_branch("origin", "develop", develop_head);
    // A remote feature/login exists one commit ahead of develop.
    backend.create_branch("stage", develop_head).unwrap();
    let remote_tip = backend.commit_on("stage", "remote feature work");
    backend.delete_branch("stage", true).unwrap();
    backend.set_remote_branch("origin", "feature/login", remote_tip);

    let branch = flow
        .manager("feature")
        .unwrap()
        .create("login", None, false)
        .unwrap();
    assert_eq!(branch.head, remote_tip);
    assert_eq!(branch.upstream.as_deref(), Some("origin/feature/login"));
    assert_eq!(
        backend.upstream_of("feature/login").as_deref(),
        Some("origin/feature/login")
    );
}

#[test]
fn single_commit_feature_finish_fast_forwards_develop() {
    let (flow, _dir) = setup();
    let backend = flow.backend();
    let develop_before = backend.branch_head("develop").unwrap();
    let master_before = backend.branch_head("master").unwrap();

    let manager = flow.manager("feature").unwrap();
    manager.create("x", None, false).unwrap();
    let work = backend.commit_on("feature/x", "one change");

    manager.finish("x", &FinishOptions::default()).unwrap();

    // Fast-forward: develop now points at the work commit itself.
    assert_eq!(backend.branch_head("develop").unwrap(), work);
    assert_eq!(backend.parents_of(work), vec![develop_before]);
    assert!(!backend.branch_exists("feature/x").unwrap());
    // Feature finishes never touch master.
    assert_eq!(backend.branch_head("master").unwrap(), master_before);
}

#[test]
fn multi_commit_feature_finish_creates_merge_commit() {
    let (flow, _dir) = setup();
    let backend = flow.backend();
    let develop_before = backend.branch_head("develop").unwrap();

    let manager = flow.manager("feature").unwrap();
    manager.create("x", None, false).unwrap();
    backend.commit_on("feature/x", "first");
    let tip = backend.commit_on("feature/x", "second");

    manager.finish("x", &FinishOptions::default()).unwrap();

    let develop_after = backend.branch_head("develop").unwrap();
    assert_eq!(backend.parents_of(develop_after), vec![develop_before, tip]);
    assert_eq!(
        backend.message_of(develop_after).as_deref(),
        Some("Finished feature x.")
    );
}

#[test]
fn feature_finish_with_keep_retains_branch() {
    let (flow, _dir) = setup();
    let backend = flow.backend();
    let manager = flow.manager("feature").unwrap();
    manager.create("x", None, false).unwrap();
    backend.commit_on("feature/x", "work");

    manager
        .finish(
            "x",
            &FinishOptions {
                keep: true,
                ..Default::default()
            },
        )
        .unwrap();
    assert!(backend.branch_exists("feature/x").unwrap());
}

#[test]
fn feature_finish_conflict_leaves_repository_paused() {
    let (flow, _dir) = setup();
    let backend = flow.backend();
    let manager = flow.manager("feature").unwrap();
    manager.create("x", None, false).unwrap();
    backend.commit_on("feature/x", "mine");
    backend.commit_on("develop", "theirs");
    backend.conflict_on("feature/x");

    assert!(matches!(
        manager.finish("x", &FinishOptions::default()),
        Err(GitFlowError::MergeConflict(_))
    ));
    // Nothing was deleted; the conflicted merge awaits manual resolution.
    assert!(backend.branch_exists("feature/x").unwrap());
    assert!(backend.has_unresolved_merge().unwrap());
}

#[test]
fn feature_finish_rebase_replays_onto_develop_first() {
    let (flow, _dir) = setup();
    let backend = flow.backend();
    let manager = flow.manager("feature").unwrap();
    manager.create("x", None, false).unwrap();
    backend.commit_on("feature/x", "feature work");
    let develop_tip = backend.commit_on("develop", "mainline work");

    manager
        .finish(
            "x",
            &FinishOptions {
                rebase: true,
                ..Default::default()
            },
        )
        .unwrap();

    // After the rebase the finish fast-forwards, so the develop tip's
    // parent is the previous develop tip, not a merge.
    let develop_after = backend.branch_head("develop").unwrap();
    assert_eq!(backend.parents_of(develop_after), vec![develop_tip]);
}

#[test]
fn release_finish_tags_master_before_develop_absorbs_it() {
    let (flow, _dir) = setup();
    let backend = flow.backend();
    backend.commit_on("develop", "prepare release");

    let manager = flow.manager("release").unwrap();
    manager.create("1.0", None, false).unwrap();
    backend.commit_on("release/1.0", "bump version");

    manager
        .finish(
            "1.0",
            &FinishOptions {
                tagging: Some(TagInfo {
                    message: Some("Release 1.0".to_string()),
                    ..Default::default()
                }),
                ..Default::default()
            },
        )
        .unwrap();

    let master_after = backend.branch_head("master").unwrap();
    let develop_after = backend.branch_head("develop").unwrap();
    // The tag sits on the post-merge master commit.
    let tags = backend.list_tags().unwrap();
    assert_eq!(tags, vec!["v1.0".to_string()]);
    // Master's new tip is an ancestor of develop's new tip.
    assert!(backend.is_ancestor(master_after, develop_after).unwrap());
    assert!(!backend.branch_exists("release/1.0").unwrap());
}

#[test]
fn release_finish_without_message_creates_lightweight_tag() {
    let (flow, _dir) = setup();
    let backend = flow.backend();
    let manager = flow.manager("release").unwrap();
    manager.create("1.0", None, false).unwrap();
    backend.commit_on("release/1.0", "bump version");

    manager.finish("1.0", &FinishOptions::default()).unwrap();

    let info = backend.tag_info_of("v1.0").unwrap();
    assert_eq!(info, TagInfo::default());
}

#[test]
fn release_finish_signed_tag_defaults_message_to_tag_name() {
    let (flow, _dir) = setup();
    let backend = flow.backend();
    let manager = flow.manager("release").unwrap();
    manager.create("1.0", None, false).unwrap();
    backend.commit_on("release/1.0", "bump version");

    manager
        .finish(
            "1.0",
            &FinishOptions {
                tagging: Some(TagInfo {
                    sign: true,
                    ..Default::default()
                }),
                ..Default::default()
            },
        )
        .unwrap();

    let info = backend.tag_info_of("v1.0").unwrap();
    assert!(info.sign);
    assert_eq!(info.message.as_deref(), Some("v1.0"));
}

#[test]
fn release_finish_without_tagging_skips_the_tag() {
    let (flow, _dir) = setup();
    let backend = flow.backend();
    let manager = flow.manager("release").unwrap();
    manager.create("1.0", None, false).unwrap();
    backend.commit_on("release/1.0", "bump version");

    manager
        .finish(
            "1.0",
            &FinishOptions {
                tagging: None,
                ..Default::default()
            },
        )
        .unwrap();
    assert!(backend.list_tags().unwrap().is_empty());
}

#[test]
fn second_release_start_fails_without_mutating_refs() {
    let (flow, _dir) = setup();
    let backend = flow.backend();
    let manager = flow.manager("release").unwrap();
    manager.create("1.0", None, false).unwrap();
    backend.checkout("develop").unwrap();
    let branches_before = backend.list_branches().unwrap();

    let err = manager.create("2.0", None, false).unwrap_err();
    match err {
        GitFlowError::BranchTypeExists(identifier) => assert_eq!(identifier, "release"),
        other => panic!("expected BranchTypeExists, got {:?}", other),
    }
    assert_eq!(backend.list_branches().unwrap(), branches_before);
}

#[test]
fn release_start_fails_when_version_tag_exists() {
    let (flow, _dir) = setup();
    let backend = flow.backend();
    let root = backend.branch_head("master").unwrap();
    backend.create_tag("v1.0", root, &TagInfo::default()).unwrap();

    assert!(matches!(
        flow.manager("release").unwrap().create("1.0", None, false),
        Err(GitFlowError::TagExists(tag)) if tag == "v1.0"
    ));
}

#[test]
fn release_start_rejects_base_not_on_develop() {
    let (flow, _dir) = setup();
    let backend = flow.backend();
    // Master gains a commit develop does not have.
    backend.commit_on("master", "master-only work");

    assert!(matches!(
        flow.manager("release")
            .unwrap()
            .create("1.0", Some("master"), false),
        Err(GitFlowError::BaseNotOnBranch { .. })
    ));
}

#[test]
fn hotfix_finish_advances_master_and_develop() {
    let (flow, _dir) = setup();
    let backend = flow.backend();
    let manager = flow.manager("hotfix").unwrap();
    manager.create("1.0.1", None, false).unwrap();
    backend.commit_on("hotfix/1.0.1", "urgent fix");

    manager.finish("1.0.1", &FinishOptions::default()).unwrap();

    let master_after = backend.branch_head("master").unwrap();
    let develop_after = backend.branch_head("develop").unwrap();
    assert!(backend.is_ancestor(master_after, develop_after).unwrap());
    assert_eq!(backend.list_tags().unwrap(), vec!["v1.0.1".to_string()]);
}

#[test]
fn support_branches_can_never_finish() {
    let (flow, _dir) = setup();
    let backend = flow.backend();
    let manager = flow.manager("support").unwrap();
    manager.create("legacy", None, false).unwrap();
    backend.commit_on("support/legacy", "backport");

    assert!(matches!(
        manager.finish("legacy", &FinishOptions::default()),
        Err(GitFlowError::NotFinishable(identifier)) if identifier == "support"
    ));
    assert!(backend.branch_exists("support/legacy").unwrap());
}

#[test]
fn finish_with_push_updates_the_remote() {
    let (flow, _dir) = setup();
    let backend = flow.backend();
    let develop_head = backend.branch_head("develop").unwrap();
    let master_head = backend.branch_head("master").unwrap();
    backend.set_remote_branch("origin", "develop", develop_head);
    backend.set_remote_branch("origin", "master", master_head);

    let manager = flow.manager("release").unwrap();
    manager.create("1.0", None, false).unwrap();
    let tip = backend.commit_on("release/1.0", "bump version");
    backend.set_remote_branch("origin", "release/1.0", tip);
    backend.set_upstream("release/1.0", "origin", "release/1.0").unwrap();

    manager
        .finish(
            "1.0",
            &FinishOptions {
                push: true,
                ..Default::default()
            },
        )
        .unwrap();

    assert_eq!(
        backend.remote_head("origin", "master"),
        Some(backend.branch_head("master").unwrap())
    );
    assert_eq!(
        backend.remote_head("origin", "develop"),
        Some(backend.branch_head("develop").unwrap())
    );
    assert!(backend.remote_tag("origin", "v1.0").is_some());
    // The finished branch was delete-pushed.
    assert_eq!(backend.remote_head("origin", "release/1.0"), None);
}

#[test]
fn finish_with_fetch_requires_up_to_date_branches() {
    let (flow, _dir) = setup();
    let backend = flow.backend();
    let manager = flow.manager("feature").unwrap();
    manager.create("x", None, false).unwrap();
    backend.commit_on("feature/x", "work");

    // Remote develop is ahead of the local one.
    backend.create_branch("stage", backend.branch_head("develop").unwrap()).unwrap();
    let remote_tip = backend.commit_on("stage", "remote-only");
    backend.delete_branch("stage", true).unwrap();
    backend.set_remote_branch("origin", "develop", remote_tip);

    let err = manager
        .finish(
            "x",
            &FinishOptions {
                fetch: true,
                ..Default::default()
            },
        )
        .unwrap_err();
    assert!(matches!(err, GitFlowError::BranchesDiverged { .. }));
    assert_eq!(
        backend.fetch_log(),
        vec![
            ("origin".to_string(), "feature/x".to_string()),
            ("origin".to_string(), "develop".to_string()),
        ]
    );
}

#[test]
fn finish_with_fetch_reaches_remote_without_tracking_refs() {
    let (flow, _dir) = setup();
    let backend = flow.backend();
    // The remote is configured but nothing has been fetched from it yet,
    // so no remote-tracking refs exist.
    backend.add_remote("origin");
    let manager = flow.manager("feature").unwrap();
    manager.create("x", None, false).unwrap();
    backend.commit_on("feature/x", "work");

    manager
        .finish(
            "x",
            &FinishOptions {
                fetch: true,
                ..Default::default()
            },
        )
        .unwrap();

    assert_eq!(
        backend.fetch_log(),
        vec![
            ("origin".to_string(), "feature/x".to_string()),
            ("origin".to_string(), "develop".to_string()),
        ]
    );
}

#[test]
fn by_name_prefix_is_total() {
    let (flow, _dir) = setup();
    let manager = flow.manager("feature").unwrap();
    manager.create("login", None, false).unwrap();
    flow.backend().checkout("develop").unwrap();
    manager.create("logout", None, false).unwrap();
    flow.backend().checkout("develop").unwrap();
    manager.create("search", None, false).unwrap();

    assert_eq!(manager.by_name_prefix("se").unwrap(), "feature/search");
    assert!(matches!(
        manager.by_name_prefix("lo"),
        Err(GitFlowError::PrefixNotUnique(_, _))
    ));
    assert!(matches!(
        manager.by_name_prefix("missing"),
        Err(GitFlowError::NoSuchBranch(_))
    ));
}

#[test]
fn snapshot_restore_reproduces_captured_tips() {
    let (flow, _dir) = setup();
    let backend = flow.backend();
    let manager = flow.manager("feature").unwrap();
    manager.create("x", None, false).unwrap();
    backend.commit_on("feature/x", "work");

    let snapshot = flow.snap("before finish feature x", None).unwrap();
    manager.finish("x", &FinishOptions::default()).unwrap();

    flow.undo(true).unwrap();
    for head in &snapshot.heads {
        let tip = backend.branch_head(&head.name).unwrap();
        assert_eq!(tip.to_string(), head.hash, "branch {}", head.name);
    }
}
