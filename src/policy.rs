//! Policy Engine - pure per-item decisions
//!
//! Given a source listing entry and, when it exists, the destination file's
//! size and modification time, decide what the walker should do. Nothing in
//! this module performs I/O.

use std::fmt;
use std::str::FromStr;

use crate::client::{DirEntry, FileStat};
use crate::filter::{
    is_already_queued, join_remote, ExclusionList, IncludeFilter, SizeGate, SizeRejection,
};
use crate::timestamp::{destination_is_newer, DEFAULT_UTC_SHIFT_HOURS};

/// What to do with destination items that no longer exist in the source
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DeleteAction {
    /// Leave destination extras alone
    #[default]
    None,
    /// Move extras under the storage's `trash` directory
    Move,
    /// Remove extras from the destination
    Delete,
}

impl DeleteAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeleteAction::None => "none",
            DeleteAction::Move => "move",
            DeleteAction::Delete => "delete",
        }
    }
}

impl fmt::Display for DeleteAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DeleteAction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "none" => Ok(DeleteAction::None),
            "move" => Ok(DeleteAction::Move),
            "delete" => Ok(DeleteAction::Delete),
            other => Err(format!("unknown delete action: {}", other)),
        }
    }
}

/// Immutable sync rules for one engine instance
#[derive(Debug, Clone)]
pub struct SyncPolicy {
    pub delete_action: DeleteAction,
    pub exclusions: ExclusionList,
    pub move_file: bool,
    pub include: IncludeFilter,
    pub size_gate: SizeGate,
    pub utc_shift_hours: i64,
}

impl Default for SyncPolicy {
    fn default() -> Self {
        Self {
            delete_action: DeleteAction::None,
            exclusions: ExclusionList::default(),
            move_file: false,
            include: IncludeFilter::default(),
            size_gate: SizeGate::default(),
            utc_shift_hours: DEFAULT_UTC_SHIFT_HOURS,
        }
    }
}

/// Source and destination locations of one listing entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemPaths {
    pub source_dir: String,
    pub dest_dir: String,
    pub name: String,
    pub source_path: String,
    pub dest_path: String,
}

impl ItemPaths {
    pub fn new(source_dir: &str, dest_dir: &str, name: &str) -> Self {
        Self {
            source_dir: source_dir.to_string(),
            dest_dir: dest_dir.to_string(),
            name: name.to_string(),
            source_path: join_remote(source_dir, name),
            dest_path: join_remote(dest_dir, name),
        }
    }
}

/// Why an item was left untouched
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    Excluded,
    BelowMinSize,
    AboveMaxSize,
    FilterMismatch,
    AlreadyQueued,
    InSync,
    DestinationNewer,
    MalformedName,
}

impl SkipReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            SkipReason::Excluded => "excluded",
            SkipReason::BelowMinSize => "below_min_size",
            SkipReason::AboveMaxSize => "above_max_size",
            SkipReason::FilterMismatch => "filter_mismatch",
            SkipReason::AlreadyQueued => "already_queued",
            SkipReason::InSync => "in_sync",
            SkipReason::DestinationNewer => "destination_newer",
            SkipReason::MalformedName => "malformed_name",
        }
    }
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Decision for a single source file that passed screening
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileAction {
    /// Destination absent: issue a copy
    Copy,
    /// Same size on both sides; optionally delete the source afterwards
    InSync { delete_source: bool },
    /// Sizes differ but destination is newer; optionally delete the source
    DestinationNewer { delete_source: bool },
    /// Remove the destination file, then copy the source over
    Replace,
}

impl SyncPolicy {
    /// Excluded when either the source or destination path is covered
    pub fn is_excluded(&self, paths: &ItemPaths) -> bool {
        self.exclusions.is_excluded(&paths.source_path)
            || self.exclusions.is_excluded(&paths.dest_path)
    }

    /// Everything decidable from the source listing alone.
    ///
    /// Names and exclusions apply to every entry. Directories stop there; files
    /// then go through the size gate, the inclusion filter and the in-flight
    /// check, in that order. `None` means the entry needs further work.
    pub fn screen(
        &self,
        entry: &DirEntry,
        paths: &ItemPaths,
        pending_names: &[String],
    ) -> Option<SkipReason> {
        if entry.name.trim().is_empty() {
            return Some(SkipReason::MalformedName);
        }
        if self.is_excluded(paths) {
            return Some(SkipReason::Excluded);
        }
        if entry.is_dir {
            return None;
        }

        match self.size_gate.check(entry.size) {
            Err(SizeRejection::BelowMinimum) => return Some(SkipReason::BelowMinSize),
            Err(SizeRejection::AboveMaximum) => return Some(SkipReason::AboveMaxSize),
            Ok(()) => {}
        }

        if self.include.is_active() {
            if !self.include.matches(&entry.name) {
                return Some(SkipReason::FilterMismatch);
            }
            if is_already_queued(
                &paths.source_path,
                &paths.source_dir,
                &paths.dest_dir,
                pending_names,
            ) {
                return Some(SkipReason::AlreadyQueued);
            }
        }

        None
    }

    /// Compare a screened source file with its destination counterpart
    pub fn compare(&self, source: &DirEntry, dest: Option<&FileStat>) -> FileAction {
        let Some(dest) = dest else {
            return FileAction::Copy;
        };

        if source.size == dest.size {
            return FileAction::InSync {
                delete_source: self.move_file,
            };
        }

        if destination_is_newer(&source.modified, &dest.modified, self.utc_shift_hours) {
            FileAction::DestinationNewer {
                delete_source: self.move_file,
            }
        } else {
            FileAction::Replace
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use quickcheck_macros::quickcheck;

    fn file(name: &str, size: i64, modified: &str) -> DirEntry {
        DirEntry {
            name: name.to_string(),
            is_dir: false,
            size,
            modified: modified.to_string(),
        }
    }

    fn stat(size: i64, modified: &str) -> FileStat {
        FileStat {
            size,
            modified: modified.to_string(),
        }
    }

    fn paths(name: &str) -> ItemPaths {
        ItemPaths::new("/src", "/dst", name)
    }

    #[test]
    fn test_delete_action_parsing() {
        assert_eq!("none".parse::<DeleteAction>(), Ok(DeleteAction::None));
        assert_eq!("MOVE".parse::<DeleteAction>(), Ok(DeleteAction::Move));
        assert_eq!(" Delete ".parse::<DeleteAction>(), Ok(DeleteAction::Delete));
        assert!("trash".parse::<DeleteAction>().is_err());
        assert_eq!(DeleteAction::Move.to_string(), "move");
    }

    #[test]
    fn test_item_paths() {
        let p = ItemPaths::new("/", "/backup/", "a.txt");
        assert_eq!(p.source_path, "/a.txt");
        assert_eq!(p.dest_path, "/backup/a.txt");
    }

    #[test]
    fn test_absent_destination_copies() {
        let policy = SyncPolicy::default();
        assert_eq!(policy.screen(&file("a.txt", 10, ""), &paths("a.txt"), &[]), None);
        assert_eq!(policy.compare(&file("a.txt", 10, ""), None), FileAction::Copy);
    }

    #[test]
    fn test_equal_size_is_in_sync() {
        let policy = SyncPolicy::default();
        let action = policy.compare(
            &file("a.txt", 10, "2024-01-01T00:00:00"),
            Some(&stat(10, "2020-01-01T00:00:00")),
        );
        assert_eq!(action, FileAction::InSync { delete_source: false });

        let policy = SyncPolicy {
            move_file: true,
            ..SyncPolicy::default()
        };
        let action = policy.compare(&file("a.txt", 10, ""), Some(&stat(10, "")));
        assert_eq!(action, FileAction::InSync { delete_source: true });
    }

    #[test]
    fn test_newer_destination_is_kept() {
        let policy = SyncPolicy::default();
        let action = policy.compare(
            &file("a.txt", 10, "2024-01-01T00:00:00"),
            Some(&stat(20, "2024-01-02T00:00:00")),
        );
        assert_matches!(action, FileAction::DestinationNewer { delete_source: false });
    }

    #[test]
    fn test_newer_source_replaces() {
        let policy = SyncPolicy::default();
        let action = policy.compare(
            &file("a.txt", 10, "2024-01-02T00:00:00"),
            Some(&stat(20, "2024-01-01T00:00:00")),
        );
        assert_eq!(action, FileAction::Replace);

        // equal timestamps are "source newer or equal"
        let action = policy.compare(
            &file("a.txt", 10, "2024-01-01T00:00:00"),
            Some(&stat(20, "2024-01-01T00:00:00")),
        );
        assert_eq!(action, FileAction::Replace);
    }

    #[test]
    fn test_utc_shift_applies_to_comparison() {
        let policy = SyncPolicy::default();
        // destination 01:00Z is 09:00 on the shared clock, newer than 08:30
        let action = policy.compare(
            &file("a.txt", 10, "2024-01-01T08:30:00"),
            Some(&stat(20, "2024-01-01T01:00:00Z")),
        );
        assert_matches!(action, FileAction::DestinationNewer { .. });

        let policy = SyncPolicy {
            utc_shift_hours: 0,
            ..SyncPolicy::default()
        };
        let action = policy.compare(
            &file("a.txt", 10, "2024-01-01T08:30:00"),
            Some(&stat(20, "2024-01-01T01:00:00Z")),
        );
        assert_eq!(action, FileAction::Replace);
    }

    #[test]
    fn test_size_gate_skips() {
        let policy = SyncPolicy {
            size_gate: SizeGate::new(Some(100), Some(1000)),
            ..SyncPolicy::default()
        };
        assert_eq!(
            policy.screen(&file("a.txt", 50, ""), &paths("a.txt"), &[]),
            Some(SkipReason::BelowMinSize)
        );
        assert_eq!(
            policy.screen(&file("a.txt", 5000, ""), &paths("a.txt"), &[]),
            Some(SkipReason::AboveMaxSize)
        );
    }

    #[test]
    fn test_filter_mismatch_skips() {
        let policy = SyncPolicy {
            include: IncludeFilter::compile([r"\.mp4$"]),
            ..SyncPolicy::default()
        };
        assert_eq!(
            policy.screen(&file("a.txt", 10, ""), &paths("a.txt"), &[]),
            Some(SkipReason::FilterMismatch)
        );
        assert_eq!(
            policy.screen(&file("a.mp4", 10, ""), &paths("a.mp4"), &[]),
            None
        );
    }

    #[test]
    fn test_queued_item_skips_only_with_filter() {
        let pending = vec!["copy [/src/a.mp4) to [/dst/)".to_string()];

        let unfiltered = SyncPolicy::default();
        assert_eq!(
            unfiltered.screen(&file("a.mp4", 10, ""), &paths("a.mp4"), &pending),
            None
        );

        let filtered = SyncPolicy {
            include: IncludeFilter::compile([r"\.mp4$"]),
            ..SyncPolicy::default()
        };
        assert_eq!(
            filtered.screen(&file("a.mp4", 10, ""), &paths("a.mp4"), &pending),
            Some(SkipReason::AlreadyQueued)
        );
    }

    #[test]
    fn test_exclusion_checks_both_sides() {
        let policy = SyncPolicy {
            exclusions: ExclusionList::new(["/dst/keep"]),
            ..SyncPolicy::default()
        };
        assert_eq!(
            policy.screen(&file("keep", 10, ""), &paths("keep"), &[]),
            Some(SkipReason::Excluded)
        );
    }

    #[test]
    fn test_empty_name_is_malformed() {
        let policy = SyncPolicy::default();
        assert_eq!(
            policy.screen(&file("  ", 10, ""), &paths("  "), &[]),
            Some(SkipReason::MalformedName)
        );
    }

    #[test]
    fn test_directories_skip_file_screening() {
        let policy = SyncPolicy {
            size_gate: SizeGate::new(Some(100), None),
            include: IncludeFilter::compile([r"\.mp4$"]),
            exclusions: ExclusionList::new(["/src/private"]),
            ..SyncPolicy::default()
        };
        let dir = DirEntry {
            is_dir: true,
            ..file("season1", 0, "")
        };
        assert_eq!(policy.screen(&dir, &paths("season1"), &[]), None);

        let private = DirEntry {
            is_dir: true,
            ..file("private", 0, "")
        };
        assert_eq!(
            policy.screen(&private, &paths("private"), &[]),
            Some(SkipReason::Excluded)
        );
    }

    #[quickcheck]
    fn prop_equal_sizes_never_touch_destination(size: i64, src: String, dst: String) -> bool {
        let policy = SyncPolicy::default();
        matches!(
            policy.compare(&file("f", size, &src), Some(&stat(size, &dst))),
            FileAction::InSync { .. }
        )
    }
}
