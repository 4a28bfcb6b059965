//! Common test utilities: an in-memory storage server implementing `RemoteFs`
#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, Mutex};

use alistsync::client::{AuthMethod, DirEntry, FileStat, RemoteFs};
use alistsync::filter::{join_remote, split_remote};
use alistsync::{SyncEngine, SyncError, SyncPolicy, RecordingObserver};

/// A mutating call received by the fake server
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Mkdir(String),
    RemoveEmptyDir(String),
    Remove { dir: String, names: Vec<String> },
    Copy { src_dir: String, dst_dir: String, name: String },
    Move { src_dir: String, dst_dir: String, name: String },
}

impl Call {
    pub fn copy(src_dir: &str, dst_dir: &str, name: &str) -> Self {
        Call::Copy {
            src_dir: src_dir.to_string(),
            dst_dir: dst_dir.to_string(),
            name: name.to_string(),
        }
    }

    pub fn remove(dir: &str, names: &[&str]) -> Self {
        Call::Remove {
            dir: dir.to_string(),
            names: names.iter().map(|n| n.to_string()).collect(),
        }
    }

    pub fn moved(src_dir: &str, dst_dir: &str, name: &str) -> Self {
        Call::Move {
            src_dir: src_dir.to_string(),
            dst_dir: dst_dir.to_string(),
            name: name.to_string(),
        }
    }
}

#[derive(Debug, Clone)]
struct Node {
    is_dir: bool,
    size: i64,
    modified: String,
}

#[derive(Debug, Default)]
struct State {
    nodes: BTreeMap<String, Node>,
    calls: Vec<Call>,
    storages: Vec<String>,
    pending: Vec<String>,
    failing_copies: HashSet<String>,
    failing_stats: HashSet<String>,
    unnamed_entries: HashSet<String>,
    reject_auth: bool,
    closes: usize,
}

/// Directory tree held in memory. Copies and moves complete immediately.
#[derive(Debug, Default)]
pub struct MemoryRemote {
    state: Mutex<State>,
}

const DEFAULT_MODIFIED: &str = "2024-01-01T00:00:00+08:00";

impl MemoryRemote {
    pub fn new() -> Self {
        let remote = Self::default();
        remote.insert_dir("/");
        remote
    }

    fn state(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().expect("memory remote poisoned")
    }

    fn insert_dir(&self, path: &str) {
        self.state().nodes.insert(
            path.to_string(),
            Node {
                is_dir: true,
                size: 0,
                modified: DEFAULT_MODIFIED.to_string(),
            },
        );
    }

    fn ensure_parents(&self, path: &str) {
        let mut current = path;
        while let Some((parent, _)) = split_remote(current) {
            self.insert_dir(parent);
            current = parent;
        }
    }

    pub fn with_dir(self, path: &str) -> Self {
        self.ensure_parents(path);
        self.insert_dir(path);
        self
    }

    pub fn with_file(self, path: &str, size: i64) -> Self {
        self.with_file_at(path, size, DEFAULT_MODIFIED)
    }

    pub fn with_file_at(self, path: &str, size: i64, modified: &str) -> Self {
        self.ensure_parents(path);
        self.state().nodes.insert(
            path.to_string(),
            Node {
                is_dir: false,
                size,
                modified: modified.to_string(),
            },
        );
        self
    }

    pub fn with_storages(self, mounts: &[&str]) -> Self {
        self.state().storages = mounts.iter().map(|m| m.to_string()).collect();
        self
    }

    pub fn with_pending_task(self, name: &str) -> Self {
        self.state().pending.push(name.to_string());
        self
    }

    pub fn failing_copy_of(self, source_path: &str) -> Self {
        self.state().failing_copies.insert(source_path.to_string());
        self
    }

    /// `stat` of `path` fails even though `exists` reports it
    pub fn failing_stat_of(self, path: &str) -> Self {
        self.state().failing_stats.insert(path.to_string());
        self
    }

    /// Listing `dir` starts with an entry whose name is empty
    pub fn with_unnamed_entry_in(self, dir: &str) -> Self {
        self.state().unnamed_entries.insert(dir.to_string());
        self
    }

    pub fn rejecting_auth(self) -> Self {
        self.state().reject_auth = true;
        self
    }

    pub fn calls(&self) -> Vec<Call> {
        self.state().calls.clone()
    }

    pub fn clear_calls(&self) {
        self.state().calls.clear();
    }

    pub fn close_count(&self) -> usize {
        self.state().closes
    }

    pub fn has(&self, path: &str) -> bool {
        self.state().nodes.contains_key(path)
    }

    pub fn size_of(&self, path: &str) -> Option<i64> {
        self.state().nodes.get(path).map(|n| n.size)
    }

    fn record(&self, call: Call) {
        self.state().calls.push(call);
    }

    fn remove_tree(&self, path: &str) {
        let prefix = format!("{}/", path);
        self.state()
            .nodes
            .retain(|p, _| p != path && !p.starts_with(&prefix));
    }

    fn copy_tree(&self, from: &str, to: &str) -> bool {
        let prefix = format!("{}/", from);
        let copied: Vec<(String, Node)> = self
            .state()
            .nodes
            .iter()
            .filter(|(p, _)| p.as_str() == from || p.starts_with(&prefix))
            .map(|(p, n)| (format!("{}{}", to, &p[from.len()..]), n.clone()))
            .collect();
        if copied.is_empty() {
            return false;
        }
        self.ensure_parents(to);
        self.state().nodes.extend(copied);
        true
    }
}

#[async_trait]
impl RemoteFs for MemoryRemote {
    async fn authenticate(&self) -> Result<AuthMethod, SyncError> {
        if self.state().reject_auth {
            Err(SyncError::Auth("token rejected".to_string()))
        } else {
            Ok(AuthMethod::Token)
        }
    }

    async fn list(&self, path: &str) -> Vec<DirEntry> {
        let state = self.state();
        let unnamed = state.unnamed_entries.contains(path).then(|| DirEntry {
            name: String::new(),
            is_dir: false,
            size: 1,
            modified: DEFAULT_MODIFIED.to_string(),
        });
        let listed = state
            .nodes
            .iter()
            .filter(|(p, _)| split_remote(p).is_some_and(|(parent, _)| parent == path))
            .map(|(p, node)| DirEntry {
                name: split_remote(p).map(|(_, n)| n.to_string()).unwrap_or_default(),
                is_dir: node.is_dir,
                size: node.size,
                modified: node.modified.clone(),
            });
        unnamed.into_iter().chain(listed).collect()
    }

    async fn exists(&self, path: &str) -> bool {
        self.has(path)
    }

    async fn stat(&self, path: &str) -> Option<FileStat> {
        let state = self.state();
        if state.failing_stats.contains(path) {
            return None;
        }
        state.nodes.get(path).map(|node| FileStat {
            size: node.size,
            modified: node.modified.clone(),
        })
    }

    async fn mkdir(&self, path: &str) -> bool {
        self.record(Call::Mkdir(path.to_string()));
        self.ensure_parents(path);
        self.insert_dir(path);
        true
    }

    async fn remove_empty_dir(&self, path: &str) -> bool {
        self.record(Call::RemoveEmptyDir(path.to_string()));
        true
    }

    async fn remove(&self, dir: &str, names: &[String]) -> bool {
        self.record(Call::Remove {
            dir: dir.to_string(),
            names: names.to_vec(),
        });
        for name in names {
            self.remove_tree(&join_remote(dir, name));
        }
        true
    }

    async fn copy(&self, src_dir: &str, dst_dir: &str, name: &str) -> bool {
        self.record(Call::copy(src_dir, dst_dir, name));
        let from = join_remote(src_dir, name);
        if self.state().failing_copies.contains(&from) {
            return false;
        }
        self.copy_tree(&from, &join_remote(dst_dir, name))
    }

    async fn move_item(&self, src_dir: &str, dst_dir: &str, name: &str) -> bool {
        self.record(Call::moved(src_dir, dst_dir, name));
        let from = join_remote(src_dir, name);
        if !self.copy_tree(&from, &join_remote(dst_dir, name)) {
            return false;
        }
        self.remove_tree(&from);
        true
    }

    async fn list_storages(&self) -> Vec<String> {
        self.state().storages.clone()
    }

    async fn list_pending_copy_tasks(&self) -> Vec<String> {
        self.state().pending.clone()
    }

    async fn retry_failed_copy_tasks(&self) -> bool {
        true
    }

    async fn close(&self) {
        self.state().closes += 1;
    }
}

/// Engine over `remote` with the given policy, recording every event
pub fn engine_for(
    remote: &Arc<MemoryRemote>,
    policy: SyncPolicy,
) -> (SyncEngine, Arc<RecordingObserver>) {
    let observer = Arc::new(RecordingObserver::new());
    let engine = SyncEngine::new(remote.clone(), policy, observer.clone());
    (engine, observer)
}

/// Mutating calls that touch anything other than directory creation
pub fn destructive_calls(calls: &[Call]) -> Vec<&Call> {
    calls
        .iter()
        .filter(|c| !matches!(c, Call::Mkdir(_)))
        .collect()
}
