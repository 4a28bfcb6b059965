//! Tree Walker - recursive descent over one source/destination pair
//!
//! The walk is strictly sequential and depth-first. Each directory is listed
//! fresh, destination extras are resolved first (when a delete action is
//! configured), then every source entry is decided by the policy engine and
//! executed against the remote. The first item failure aborts the walk;
//! work already issued stays applied.

use futures::future::{BoxFuture, FutureExt};
use std::collections::HashSet;
use tracing::{debug, info};

use crate::client::{DirEntry, RemoteFs};
use crate::error::SyncError;
use crate::events::{SyncEvent, SyncObserver};
use crate::filter::{join_remote, normalize_name, split_remote};
use crate::policy::{DeleteAction, FileAction, ItemPaths, SkipReason, SyncPolicy};

/// Walks one pair against a remote, reporting through an observer
pub struct TreeWalker<'a> {
    remote: &'a dyn RemoteFs,
    policy: &'a SyncPolicy,
    observer: &'a dyn SyncObserver,
    pending: &'a [String],
}

impl<'a> TreeWalker<'a> {
    pub fn new(
        remote: &'a dyn RemoteFs,
        policy: &'a SyncPolicy,
        observer: &'a dyn SyncObserver,
        pending: &'a [String],
    ) -> Self {
        Self {
            remote,
            policy,
            observer,
            pending,
        }
    }

    fn emit(&self, event: SyncEvent) {
        self.observer.record(&event);
    }

    fn skip(&self, path: &str, reason: SkipReason) {
        self.emit(SyncEvent::Skipped {
            path: path.to_string(),
            reason,
        });
    }

    fn fail(&self, path: &str, reason: &str) -> SyncError {
        self.emit(SyncEvent::ItemFailed {
            path: path.to_string(),
            reason: reason.to_string(),
        });
        SyncError::item(path, reason)
    }

    /// Bring `dest_dir` in line with `source_dir`, recursing into subdirectories
    pub fn walk<'s>(
        &'s self,
        source_dir: &'s str,
        dest_dir: &'s str,
    ) -> BoxFuture<'s, Result<(), SyncError>> {
        async move {
            if self.policy.exclusions.is_excluded(source_dir) {
                info!("Excluded directory {}, leaving it untouched", source_dir);
                return Ok(());
            }

            debug!("Walking {} -> {}", source_dir, dest_dir);
            let entries = self.remote.list(source_dir).await;
            if entries.is_empty() {
                info!("Source directory {} is empty or could not be listed", source_dir);
            }

            self.clean_destination(source_dir, dest_dir, &entries).await;

            for entry in &entries {
                self.apply(source_dir, dest_dir, entry).await?;
            }
            Ok(())
        }
        .boxed()
    }

    async fn apply(
        &self,
        source_dir: &str,
        dest_dir: &str,
        entry: &DirEntry,
    ) -> Result<(), SyncError> {
        let paths = ItemPaths::new(source_dir, dest_dir, &entry.name);
        match self.policy.screen(entry, &paths, self.pending) {
            Some(SkipReason::MalformedName) => {
                self.emit(SyncEvent::MalformedEntry {
                    dir: source_dir.to_string(),
                });
                return Ok(());
            }
            Some(reason) => {
                self.skip(&paths.source_path, reason);
                return Ok(());
            }
            None => {}
        }

        if entry.is_dir {
            return self.enter_directory(&paths).await;
        }

        let dest = if self.remote.exists(&paths.dest_path).await {
            match self.remote.stat(&paths.dest_path).await {
                Some(stat) => Some(stat),
                None => {
                    return Err(self.fail(&paths.dest_path, "could not read destination file info"))
                }
            }
        } else {
            None
        };

        match self.policy.compare(entry, dest.as_ref()) {
            FileAction::Copy => self.copy(&paths).await,
            FileAction::InSync { delete_source } => {
                self.skip(&paths.source_path, SkipReason::InSync);
                self.finish_move(&paths, delete_source).await
            }
            FileAction::DestinationNewer { delete_source } => {
                self.skip(&paths.source_path, SkipReason::DestinationNewer);
                self.finish_move(&paths, delete_source).await
            }
            FileAction::Replace => {
                if !self.remote.remove(&paths.dest_dir, &[paths.name.clone()]).await {
                    return Err(self.fail(&paths.dest_path, "could not remove outdated destination"));
                }
                self.emit(SyncEvent::Replaced {
                    dest_dir: paths.dest_dir.clone(),
                    name: paths.name.clone(),
                });
                self.copy(&paths).await
            }
        }
    }

    async fn enter_directory(&self, paths: &ItemPaths) -> Result<(), SyncError> {
        if self.remote.exists(&paths.dest_path).await {
            debug!("Directory {} already exists", paths.dest_path);
        } else {
            if !self.remote.mkdir(&paths.dest_path).await {
                return Err(self.fail(&paths.dest_path, "could not create directory"));
            }
            self.emit(SyncEvent::DirectoryCreated {
                path: paths.dest_path.clone(),
            });
        }
        self.walk(&paths.source_path, &paths.dest_path).await
    }

    async fn copy(&self, paths: &ItemPaths) -> Result<(), SyncError> {
        if !self
            .remote
            .copy(&paths.source_dir, &paths.dest_dir, &paths.name)
            .await
        {
            return Err(self.fail(&paths.source_path, "copy request failed"));
        }
        self.emit(SyncEvent::Copied {
            source_dir: paths.source_dir.clone(),
            dest_dir: paths.dest_dir.clone(),
            name: paths.name.clone(),
        });
        Ok(())
    }

    async fn finish_move(&self, paths: &ItemPaths, delete_source: bool) -> Result<(), SyncError> {
        if !delete_source {
            return Ok(());
        }
        if !self
            .remote
            .remove(&paths.source_dir, &[paths.name.clone()])
            .await
        {
            return Err(self.fail(&paths.source_path, "could not remove source file"));
        }
        self.emit(SyncEvent::SourceRemoved {
            source_dir: paths.source_dir.clone(),
            name: paths.name.clone(),
        });
        Ok(())
    }

    /// Resolve destination items that are missing from the source listing.
    ///
    /// Failures here are reported but never abort the walk.
    async fn clean_destination(&self, source_dir: &str, dest_dir: &str, source: &[DirEntry]) {
        let to_trash = match self.policy.delete_action {
            DeleteAction::None => return,
            DeleteAction::Move => true,
            DeleteAction::Delete => false,
        };

        let dest = self.remote.list(dest_dir).await;
        if dest.is_empty() {
            return;
        }

        let source_names: HashSet<String> =
            source.iter().map(|e| normalize_name(&e.name)).collect();
        let mut seen = HashSet::new();
        let extras: Vec<String> = dest
            .iter()
            .map(|e| normalize_name(&e.name))
            .filter(|name| !name.is_empty() && !source_names.contains(name))
            .filter(|name| seen.insert(name.clone()))
            .collect();

        if extras.is_empty() {
            debug!("No destination extras under {}", dest_dir);
            return;
        }
        if source.is_empty() {
            self.emit(SyncEvent::SourceListingEmpty {
                source_dir: source_dir.to_string(),
                dest_items: extras.len(),
            });
        }

        // trash location is resolved at most once per directory
        let mut trash: Option<Option<String>> = None;
        let mut trash_ready = false;

        for name in extras {
            let full_path = join_remote(dest_dir.trim_end_matches('/'), &name);
            if self.policy.exclusions.is_excluded(&full_path) {
                self.skip(&full_path, SkipReason::Excluded);
                continue;
            }

            if !to_trash {
                if self.remote.remove(dest_dir, &[name.clone()]).await {
                    self.emit(SyncEvent::Deleted {
                        dest_dir: dest_dir.to_string(),
                        name,
                    });
                } else {
                    self.emit(SyncEvent::ItemFailed {
                        path: full_path,
                        reason: "could not delete destination extra".to_string(),
                    });
                }
                continue;
            }

            if trash.is_none() {
                let mounts = self.remote.list_storages().await;
                trash = Some(trash_dir_for(dest_dir, &mounts));
            }
            let Some(Some(trash_dir)) = trash.as_ref() else {
                self.emit(SyncEvent::TrashUnavailable {
                    dest_dir: dest_dir.to_string(),
                    name,
                });
                continue;
            };
            // the trash itself can live under the destination
            if trash_dir == &full_path || trash_dir.starts_with(&format!("{}/", full_path)) {
                debug!("Leaving trash directory {} in place", full_path);
                continue;
            }

            if !trash_ready {
                if !self.remote.exists(trash_dir).await {
                    info!("Creating trash directory {}", trash_dir);
                    if self.remote.mkdir(trash_dir).await {
                        self.emit(SyncEvent::DirectoryCreated {
                            path: trash_dir.clone(),
                        });
                    }
                }
                trash_ready = true;
            }

            if self.remote.move_item(dest_dir, trash_dir, &name).await {
                self.emit(SyncEvent::Trashed {
                    dest_dir: dest_dir.to_string(),
                    trash_dir: trash_dir.clone(),
                    name,
                });
            } else {
                self.emit(SyncEvent::ItemFailed {
                    path: full_path,
                    reason: "could not move destination extra to trash".to_string(),
                });
            }
        }
    }

    /// Remove directories under `root` left empty after files were moved out.
    ///
    /// The root itself is never removed.
    pub fn prune_empty_dirs<'s>(&'s self, root: &'s str) -> BoxFuture<'s, ()> {
        async move {
            self.prune(root, root.to_string()).await;
        }
        .boxed()
    }

    /// Returns true when `dir` was removed
    fn prune<'s>(&'s self, root: &'s str, dir: String) -> BoxFuture<'s, bool> {
        async move {
            if self.policy.exclusions.is_excluded(&dir) {
                return false;
            }

            let entries = self.remote.list(&dir).await;
            let mut remaining = entries.len();
            for entry in entries
                .iter()
                .filter(|e| e.is_dir && !e.name.trim().is_empty())
            {
                if self.prune(root, join_remote(&dir, &entry.name)).await {
                    remaining -= 1;
                }
            }

            let is_root = dir.trim_end_matches('/') == root.trim_end_matches('/');
            if remaining > 0 || is_root {
                return false;
            }

            // children were removed: confirm the directory is now empty
            if !entries.is_empty() && !self.remote.list(&dir).await.is_empty() {
                return false;
            }
            if entries.is_empty() && !self.remote.exists(&dir).await {
                return false;
            }

            let Some((parent, name)) = split_remote(&dir) else {
                return false;
            };
            if self.remote.remove(parent, &[name.to_string()]).await {
                self.emit(SyncEvent::EmptyDirPruned { path: dir.clone() });
                true
            } else {
                false
            }
        }
        .boxed()
    }
}

/// Trash directory for `dest_dir`: `{mount}/trash{relative}` under the
/// longest storage mount path that contains it.
pub fn trash_dir_for(dest_dir: &str, mount_paths: &[String]) -> Option<String> {
    mount_paths
        .iter()
        .map(|m| m.trim_end_matches('/'))
        .filter(|mount| {
            mount.is_empty()
                || dest_dir == *mount
                || dest_dir
                    .strip_prefix(*mount)
                    .is_some_and(|rest| rest.starts_with('/'))
        })
        .max_by_key(|mount| mount.len())
        .map(|mount| format!("{}/trash{}", mount, &dest_dir[mount.len()..]))
}
