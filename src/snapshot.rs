//! Snapshot/undo support.
//!
//! A snapshot captures `(branch, commit, is_active)` for a set of local
//! branches. Snapshots form an append-only stack persisted as TOML in the
//! backend's state directory; restoring pops the stack and moves every
//! captured branch back to its recorded commit.
//!
//! Restoring is deliberately **not atomic** across branches: the tuples are
//! applied in order and a failure partway through leaves earlier branches
//! restored and later ones untouched. The `backup/<name>` refs written
//! before each move are the escape hatch for that case.

use crate::error::{GitFlowError, Result};
use crate::git::RepositoryBackend;
use git2::Oid;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::{SystemTime, UNIX_EPOCH};

const SNAPSHOT_FILE: &str = "snapshots.toml";

/// One captured branch tip.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BranchHead {
    pub name: String,
    pub hash: String,
    pub is_active: bool,
}

/// One captured repository state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    pub description: String,
    /// Seconds since the unix epoch at capture time.
    pub timestamp: u64,
    pub heads: Vec<BranchHead>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct SnapshotFile {
    #[serde(default)]
    snapshots: Vec<Snapshot>,
}

/// The persisted snapshot stack.
pub struct SnapshotStore {
    path: PathBuf,
    snapshots: Vec<Snapshot>,
}

impl SnapshotStore {
    /// Load the stack from `dir/snapshots.toml`, creating the directory if
    /// needed. A missing file is an empty stack.
    pub fn open(dir: PathBuf) -> Result<Self> {
        fs::create_dir_all(&dir)?;
        let path = dir.join(SNAPSHOT_FILE);
        let snapshots = if path.exists() {
            let raw = fs::read_to_string(&path)?;
            let file: SnapshotFile = toml::from_str(&raw)
                .map_err(|e| GitFlowError::config(format!("Corrupt snapshot file: {}", e)))?;
            file.snapshots
        } else {
            Vec::new()
        };
        Ok(SnapshotStore { path, snapshots })
    }

    fn save(&self) -> Result<()> {
        let file = SnapshotFile {
            snapshots: self.snapshots.clone(),
        };
        let raw = toml::to_string_pretty(&file)
            .map_err(|e| GitFlowError::config(format!("Cannot serialize snapshots: {}", e)))?;
        fs::write(&self.path, raw)?;
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.snapshots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshots.is_empty()
    }

    /// The snapshot that would be restored next.
    pub fn last(&self) -> Option<&Snapshot> {
        self.snapshots.last()
    }

    /// Capture the current tips of all local branches (or of `heads` only)
    /// and push the snapshot onto the stack.
    pub fn snap<B: RepositoryBackend>(
        &mut self,
        backend: &B,
        description: &str,
        heads: Option<&[String]>,
    ) -> Result<Snapshot> {
        let current = backend.current_branch()?;
        let names = match heads {
            Some(names) => names.to_vec(),
            None => backend.list_branches()?,
        };
        let mut captured = Vec::with_capacity(names.len());
        for name in names {
            let head = backend.branch_head(&name)?;
            captured.push(BranchHead {
                is_active: current.as_deref() == Some(&name),
                hash: head.to_string(),
                name,
            });
        }
        let snapshot = Snapshot {
            description: description.to_string(),
            timestamp: SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_secs())
                .unwrap_or(0),
            heads: captured,
        };
        self.snapshots.push(snapshot.clone());
        self.save()?;
        Ok(snapshot)
    }

    /// Pop the most recent snapshot and move every captured branch back to
    /// its recorded commit.
    ///
    /// With `backup`, a `backup/<name>` ref is parked at the current tip of
    /// each branch before it moves. The active branch is hard-reset so the
    /// working tree follows; every other branch ref is force-moved in
    /// place. Applied in order, without rollback on failure.
    pub fn restore<B: RepositoryBackend>(&mut self, backend: &B, backup: bool) -> Result<Snapshot> {
        let snapshot = self
            .snapshots
            .pop()
            .ok_or_else(|| GitFlowError::config("No snapshot to restore"))?;
        let current = backend.current_branch()?;
        for head in &snapshot.heads {
            let target = Oid::from_str(&head.hash).map_err(GitFlowError::Git)?;
            if backup && backend.branch_exists(&head.name)? {
                let parked = backend.branch_head(&head.name)?;
                let backup_name = format!("backup/{}", head.name);
                if backend.branch_exists(&backup_name)? {
                    backend.move_branch(&backup_name, parked)?;
                } else {
                    backend.create_branch(&backup_name, parked)?;
                }
            }
            if current.as_deref() == Some(&head.name) {
                backend.hard_reset(target)?;
            } else if backend.branch_exists(&head.name)? {
                backend.move_branch(&head.name, target)?;
            } else {
                backend.create_branch(&head.name, target)?;
            }
        }
        self.save()?;
        Ok(snapshot)
    }
}
