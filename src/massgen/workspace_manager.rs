//! Per-agent scratch directories, snapshots, and final-workspace election (C5).
//!
//! Grounded in `cloudllm::thought_chain::ThoughtChain`'s use of SHA-256 content
//! hashing (there, per-entry hash chaining; here, a directory-content digest) and
//! in the crate's `tempfile` dev-dependency for filesystem-touching tests. Unlike
//! `ThoughtChain`'s append-only `.jsonl` log, workspace snapshots are whole-directory
//! copies keyed by content hash — closer to a content-addressed blob store.

use crate::types::{AgentId, SnapshotId};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Errors surfaced by filesystem operations. Per spec.md §7, workspace I/O errors
/// are logged and best-effort-recovered by the caller; they are never fatal to
/// coordination except when they corrupt the winner's final snapshot.
#[derive(Debug)]
pub enum WorkspaceError {
    Io(io::Error),
}

impl std::fmt::Display for WorkspaceError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WorkspaceError::Io(e) => write!(f, "workspace I/O error: {e}"),
        }
    }
}

impl std::error::Error for WorkspaceError {}

impl From<io::Error> for WorkspaceError {
    fn from(e: io::Error) -> Self {
        WorkspaceError::Io(e)
    }
}

/// Manages one root directory containing per-agent live workspaces, per-agent
/// snapshot storage, and read-only peer views (spec.md §4.5).
///
/// Layout under `root`:
/// - `live/{agent_id}/` — exclusive write by that agent's runner.
/// - `snapshot_storage/{agent_id}/` — last non-empty snapshot for that agent.
/// - `temp_workspaces/{agent_id}/{other_agent_id}/` — read-only copy of `other_agent_id`'s
///   current snapshot, refreshed whenever that peer's snapshot changes.
pub struct WorkspaceManager {
    root: PathBuf,
    /// Last-known content hash (as a `SnapshotId`) per agent's snapshot, so
    /// `snapshot()` on an unchanged live workspace can return the memoized id
    /// without re-hashing or re-copying (L3).
    last_snapshot: HashMap<AgentId, SnapshotId>,
    final_workspace: Option<AgentId>,
}

impl WorkspaceManager {
    /// Create a manager rooted at `root`, creating the directory if needed.
    pub fn new(root: impl Into<PathBuf>) -> Result<Self, WorkspaceError> {
        let root = root.into();
        fs::create_dir_all(root.join("live"))?;
        fs::create_dir_all(root.join("snapshot_storage"))?;
        fs::create_dir_all(root.join("temp_workspaces"))?;
        Ok(Self {
            root,
            last_snapshot: HashMap::new(),
            final_workspace: None,
        })
    }

    /// The live, exclusively-writable scratch directory for `agent_id`. Created on
    /// first access.
    pub fn live_dir(&self, agent_id: &str) -> Result<PathBuf, WorkspaceError> {
        let dir = self.root.join("live").join(agent_id);
        fs::create_dir_all(&dir)?;
        Ok(dir)
    }

    fn snapshot_dir(&self, agent_id: &str) -> PathBuf {
        self.root.join("snapshot_storage").join(agent_id)
    }

    /// Snapshot `agent_id`'s live workspace.
    ///
    /// If the live workspace has real content, copy it into snapshot storage,
    /// overwriting any prior snapshot, and return the new content-addressed id.
    /// If the live workspace is empty but a prior snapshot exists, the prior
    /// snapshot is kept untouched and its id is returned (I6 — a snapshot is
    /// never overwritten by an empty workspace). If neither has content, returns
    /// [`SnapshotId::empty`].
    pub fn snapshot(&mut self, agent_id: &str) -> Result<SnapshotId, WorkspaceError> {
        let live = self.live_dir(agent_id)?;
        let has_content = dir_has_content(&live)?;

        if has_content {
            let snap_dir = self.snapshot_dir(agent_id);
            if snap_dir.exists() {
                fs::remove_dir_all(&snap_dir)?;
            }
            fs::create_dir_all(&snap_dir)?;
            copy_dir_recursive(&live, &snap_dir)?;
            let id = hash_dir(&snap_dir)?;
            self.last_snapshot.insert(agent_id.to_string(), id.clone());
            return Ok(id);
        }

        let snap_dir = self.snapshot_dir(agent_id);
        if dir_has_content(&snap_dir).unwrap_or(false) {
            let id = self
                .last_snapshot
                .get(agent_id)
                .cloned()
                .unwrap_or_else(|| hash_dir(&snap_dir).unwrap_or_else(|_| SnapshotId::empty()));
            log::debug!("preserving prior non-empty snapshot for {agent_id} (I6)");
            return Ok(id);
        }

        Ok(SnapshotId::empty())
    }

    /// Clear an agent's live directory ahead of its next round.
    pub fn clear_live(&self, agent_id: &str) -> Result<(), WorkspaceError> {
        let live = self.live_dir(agent_id)?;
        for entry in fs::read_dir(&live)? {
            let entry = entry?;
            if entry.file_type()?.is_dir() {
                fs::remove_dir_all(entry.path())?;
            } else {
                fs::remove_file(entry.path())?;
            }
        }
        Ok(())
    }

    /// Expose `of_agent`'s current snapshot as a read-only view under
    /// `for_agent`'s peer directory. Returns the view path, or `None` if
    /// `of_agent` has no snapshot yet.
    pub fn peer_view(&self, for_agent: &str, of_agent: &str) -> Result<Option<PathBuf>, WorkspaceError> {
        let snap_dir = self.snapshot_dir(of_agent);
        if !dir_has_content(&snap_dir).unwrap_or(false) {
            return Ok(None);
        }
        let view_dir = self.root.join("temp_workspaces").join(for_agent).join(of_agent);
        if view_dir.exists() {
            fs::remove_dir_all(&view_dir)?;
        }
        fs::create_dir_all(&view_dir)?;
        copy_dir_recursive(&snap_dir, &view_dir)?;
        Ok(Some(view_dir))
    }

    /// Publish `agent_id`'s snapshot as the session's final workspace. Must
    /// remain readable through the whole presentation stage (§4.5, §4.8).
    pub fn promote_winner(&mut self, agent_id: &str) {
        self.final_workspace = Some(agent_id.to_string());
        log::info!("promoted {agent_id} workspace as the session's final workspace");
    }

    /// The agent whose workspace was promoted, if any.
    pub fn final_workspace_agent(&self) -> Option<&str> {
        self.final_workspace.as_deref()
    }

    /// Path to the promoted agent's snapshot, if one has been promoted.
    pub fn final_workspace_path(&self) -> Option<PathBuf> {
        self.final_workspace.as_deref().map(|id| self.snapshot_dir(id))
    }
}

fn dir_has_content(dir: &Path) -> Result<bool, WorkspaceError> {
    if !dir.exists() {
        return Ok(false);
    }
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let meta = entry.metadata()?;
        if meta.is_file() && meta.len() > 0 {
            return Ok(true);
        }
        if meta.is_dir() && dir_has_content(&entry.path())? {
            return Ok(true);
        }
    }
    Ok(false)
}

fn copy_dir_recursive(src: &Path, dst: &Path) -> Result<(), WorkspaceError> {
    fs::create_dir_all(dst)?;
    for entry in fs::read_dir(src)? {
        let entry = entry?;
        let ty = entry.file_type()?;
        let target = dst.join(entry.file_name());
        if ty.is_dir() {
            copy_dir_recursive(&entry.path(), &target)?;
        } else if ty.is_file() {
            fs::copy(entry.path(), target)?;
        }
    }
    Ok(())
}

/// Content hash of a directory tree: SHA-256 over each relative path and file
/// contents, sorted for determinism, so rearranged-but-identical trees still hash
/// the same way `ThoughtChain` hash-chains depend only on content, not layout.
fn hash_dir(dir: &Path) -> Result<SnapshotId, WorkspaceError> {
    let mut entries = Vec::new();
    collect_files(dir, dir, &mut entries)?;
    entries.sort();

    let mut hasher = Sha256::new();
    for rel_path in &entries {
        hasher.update(rel_path.as_bytes());
        let contents = fs::read(dir.join(rel_path))?;
        hasher.update(&contents);
    }
    let digest = hasher.finalize();
    Ok(SnapshotId(hex::encode(digest)))
}

fn collect_files(root: &Path, dir: &Path, out: &mut Vec<String>) -> Result<(), WorkspaceError> {
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let ty = entry.file_type()?;
        if ty.is_dir() {
            collect_files(root, &entry.path(), out)?;
        } else if ty.is_file() {
            let rel = entry
                .path()
                .strip_prefix(root)
                .expect("entry is under root")
                .to_string_lossy()
                .into_owned();
            out.push(rel);
        }
    }
    Ok(())
}

/// Minimal hex encoding so this module does not pull in a dedicated `hex` crate
/// for a single call site.
mod hex {
    pub fn encode(bytes: impl AsRef<[u8]>) -> String {
        bytes.as_ref().iter().map(|b| format!("{b:02x}")).collect()
    }
}
