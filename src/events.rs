//! Sync events and the observer port the engine reports them through
//!
//! The engine never logs decisions directly. It hands a [`SyncEvent`] to the
//! [`SyncObserver`] it was constructed with; [`TracingObserver`] forwards them
//! to `tracing`, [`RecordingObserver`] keeps them in memory for inspection.

use std::sync::Mutex;
use tracing::{error, info, warn};

use crate::policy::SkipReason;

/// Severity levels for events
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Info,
    Warning,
    Error,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Info => "info",
            Severity::Warning => "warning",
            Severity::Error => "error",
        }
    }
}

/// Something the engine did or decided during a run
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncEvent {
    PairStarted { source_dir: String, dest_dir: String },
    PairFinished { source_dir: String, dest_dir: String, success: bool },
    SourceMissing { source_dir: String },
    DirectoryCreated { path: String },
    Copied { source_dir: String, dest_dir: String, name: String },
    /// Destination file removed so a changed source can be copied over it
    Replaced { dest_dir: String, name: String },
    SourceRemoved { source_dir: String, name: String },
    Skipped { path: String, reason: SkipReason },
    Trashed { dest_dir: String, trash_dir: String, name: String },
    Deleted { dest_dir: String, name: String },
    /// No storage mount covers the destination, so extras cannot be trashed
    TrashUnavailable { dest_dir: String, name: String },
    /// Diff cleanup ran against an empty source listing
    SourceListingEmpty { source_dir: String, dest_items: usize },
    EmptyDirPruned { path: String },
    MalformedEntry { dir: String },
    ItemFailed { path: String, reason: String },
}

impl SyncEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            SyncEvent::PairStarted { .. } => "pair_started",
            SyncEvent::PairFinished { .. } => "pair_finished",
            SyncEvent::SourceMissing { .. } => "source_missing",
            SyncEvent::DirectoryCreated { .. } => "directory_created",
            SyncEvent::Copied { .. } => "copied",
            SyncEvent::Replaced { .. } => "replaced",
            SyncEvent::SourceRemoved { .. } => "source_removed",
            SyncEvent::Skipped { .. } => "skipped",
            SyncEvent::Trashed { .. } => "trashed",
            SyncEvent::Deleted { .. } => "deleted",
            SyncEvent::TrashUnavailable { .. } => "trash_unavailable",
            SyncEvent::SourceListingEmpty { .. } => "source_listing_empty",
            SyncEvent::EmptyDirPruned { .. } => "empty_dir_pruned",
            SyncEvent::MalformedEntry { .. } => "malformed_entry",
            SyncEvent::ItemFailed { .. } => "item_failed",
        }
    }

    /// Get the severity level for this event
    pub fn severity(&self) -> Severity {
        match self {
            SyncEvent::PairFinished { success: false, .. } => Severity::Error,
            SyncEvent::SourceMissing { .. } => Severity::Error,
            SyncEvent::MalformedEntry { .. } => Severity::Error,
            SyncEvent::ItemFailed { .. } => Severity::Error,
            SyncEvent::TrashUnavailable { .. } => Severity::Warning,
            SyncEvent::SourceListingEmpty { .. } => Severity::Warning,
            _ => Severity::Info,
        }
    }

    fn describe(&self) -> String {
        match self {
            SyncEvent::PairStarted { source_dir, dest_dir } => {
                format!("Syncing [{}] -> [{}]", source_dir, dest_dir)
            }
            SyncEvent::PairFinished { source_dir, dest_dir, success } => format!(
                "Finished [{}] -> [{}]: {}",
                source_dir,
                dest_dir,
                if *success { "success" } else { "failed" }
            ),
            SyncEvent::SourceMissing { source_dir } => {
                format!("Source directory [{}] does not exist, skipping pair", source_dir)
            }
            SyncEvent::DirectoryCreated { path } => format!("Created directory [{}]", path),
            SyncEvent::Copied { source_dir, dest_dir, name } => {
                format!("Copy [{}] from [{}] to [{}]", name, source_dir, dest_dir)
            }
            SyncEvent::Replaced { dest_dir, name } => {
                format!("Replacing changed file [{}] in [{}]", name, dest_dir)
            }
            SyncEvent::SourceRemoved { source_dir, name } => {
                format!("Removed source file [{}] from [{}]", name, source_dir)
            }
            SyncEvent::Skipped { path, reason } => format!("Skip [{}]: {}", path, reason),
            SyncEvent::Trashed { dest_dir, trash_dir, name } => {
                format!("Moved [{}] from [{}] to trash [{}]", name, dest_dir, trash_dir)
            }
            SyncEvent::Deleted { dest_dir, name } => {
                format!("Deleted [{}] from [{}]", name, dest_dir)
            }
            SyncEvent::TrashUnavailable { dest_dir, name } => format!(
                "No storage mount covers [{}], leaving [{}] in place",
                dest_dir, name
            ),
            SyncEvent::SourceListingEmpty { source_dir, dest_items } => format!(
                "Source [{}] listed empty; all {} destination items are treated as extras",
                source_dir, dest_items
            ),
            SyncEvent::EmptyDirPruned { path } => format!("Removed empty directory [{}]", path),
            SyncEvent::MalformedEntry { dir } => format!("Entry with empty name in [{}]", dir),
            SyncEvent::ItemFailed { path, reason } => format!("Failed [{}]: {}", path, reason),
        }
    }
}

/// Receiver for engine events
pub trait SyncObserver: Send + Sync {
    fn record(&self, event: &SyncEvent);
}

/// Forwards every event to `tracing` at the event's severity
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingObserver;

impl SyncObserver for TracingObserver {
    fn record(&self, event: &SyncEvent) {
        let kind = event.kind();
        match event.severity() {
            Severity::Info => info!(event = kind, "{}", event.describe()),
            Severity::Warning => warn!(event = kind, "{}", event.describe()),
            Severity::Error => error!(event = kind, "{}", event.describe()),
        }
    }
}

/// Keeps events in memory
#[derive(Debug, Default)]
pub struct RecordingObserver {
    events: Mutex<Vec<SyncEvent>>,
}

impl RecordingObserver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<SyncEvent> {
        self.events.lock().map(|e| e.clone()).unwrap_or_default()
    }

    pub fn count(&self, kind: &str) -> usize {
        self.events().iter().filter(|e| e.kind() == kind).count()
    }
}

impl SyncObserver for RecordingObserver {
    fn record(&self, event: &SyncEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event.clone());
        }
    }
}

/// Remote operations issued during a run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OperationCounts {
    pub copies: usize,
    pub replaced: usize,
    pub source_removals: usize,
    pub trashed: usize,
    pub deleted: usize,
    pub directories_created: usize,
    pub directories_pruned: usize,
    pub skipped: usize,
    pub failures: usize,
}

impl OperationCounts {
    pub fn tally(&mut self, event: &SyncEvent) {
        match event {
            SyncEvent::Copied { .. } => self.copies += 1,
            SyncEvent::Replaced { .. } => self.replaced += 1,
            SyncEvent::SourceRemoved { .. } => self.source_removals += 1,
            SyncEvent::Trashed { .. } => self.trashed += 1,
            SyncEvent::Deleted { .. } => self.deleted += 1,
            SyncEvent::DirectoryCreated { .. } => self.directories_created += 1,
            SyncEvent::EmptyDirPruned { .. } => self.directories_pruned += 1,
            SyncEvent::Skipped { .. } => self.skipped += 1,
            SyncEvent::ItemFailed { .. } => self.failures += 1,
            _ => {}
        }
    }
}

/// Tallies operations on the way through to another observer
pub struct CountingObserver<'a> {
    inner: &'a dyn SyncObserver,
    counts: Mutex<OperationCounts>,
}

impl<'a> CountingObserver<'a> {
    pub fn new(inner: &'a dyn SyncObserver) -> Self {
        Self {
            inner,
            counts: Mutex::new(OperationCounts::default()),
        }
    }

    pub fn counts(&self) -> OperationCounts {
        self.counts.lock().map(|c| *c).unwrap_or_default()
    }
}

impl SyncObserver for CountingObserver<'_> {
    fn record(&self, event: &SyncEvent) {
        if let Ok(mut counts) = self.counts.lock() {
            counts.tally(event);
        }
        self.inner.record(event);
    }
}
