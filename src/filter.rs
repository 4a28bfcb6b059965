//! Path exclusion, name filters and the size gate.
//!
//! Everything here is pure: no network calls, no logging side effects beyond
//! reporting a bad pattern at construction time.

use regex::Regex;
use tracing::warn;

/// Normalize a listing name so source and destination entries compare equal.
///
/// Names are trimmed, then percent-decoded. Invalid UTF-8 after decoding is
/// replaced rather than rejected.
pub fn normalize_name(name: &str) -> String {
    let trimmed = name.trim();
    String::from_utf8_lossy(&urlencoding::decode_binary(trimmed.as_bytes())).into_owned()
}

/// Join a remote directory and an entry name, collapsing a doubled slash.
pub fn join_remote(dir: &str, name: &str) -> String {
    format!("{}/{}", dir, name).replace("//", "/")
}

/// Split a remote path into its parent directory and final component.
pub fn split_remote(path: &str) -> Option<(&str, &str)> {
    let idx = path.rfind('/')?;
    let parent = if idx == 0 { "/" } else { &path[..idx] };
    let name = &path[idx + 1..];
    if name.is_empty() {
        None
    } else {
        Some((parent, name))
    }
}

/// Excluded path prefixes. A path is excluded when it equals an entry or is
/// a `/`-delimited descendant of one.
#[derive(Debug, Clone, Default)]
pub struct ExclusionList {
    prefixes: Vec<String>,
}

impl ExclusionList {
    pub fn new<I, S>(paths: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let prefixes = paths
            .into_iter()
            .map(|p| p.as_ref().trim().trim_end_matches('/').to_string())
            .filter(|p| !p.is_empty())
            .collect();
        Self { prefixes }
    }

    pub fn is_empty(&self) -> bool {
        self.prefixes.is_empty()
    }

    pub fn is_excluded(&self, path: &str) -> bool {
        if path.is_empty() || self.prefixes.is_empty() {
            return false;
        }
        let path = path.trim_end_matches('/');
        self.prefixes.iter().any(|prefix| {
            path == prefix
                || path
                    .strip_prefix(prefix.as_str())
                    .is_some_and(|rest| rest.starts_with('/'))
        })
    }
}

/// Inclusive byte bounds. `None` on either side means unbounded.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SizeGate {
    pub min: Option<u64>,
    pub max: Option<u64>,
}

/// Why the size gate rejected a file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SizeRejection {
    BelowMinimum,
    AboveMaximum,
}

impl SizeGate {
    pub fn new(min: Option<u64>, max: Option<u64>) -> Self {
        Self { min, max }
    }

    /// Files with an unknown (negative) size always pass.
    pub fn check(&self, size: i64) -> Result<(), SizeRejection> {
        let Ok(size) = u64::try_from(size) else {
            return Ok(());
        };
        if self.min.is_some_and(|min| size < min) {
            return Err(SizeRejection::BelowMinimum);
        }
        if self.max.is_some_and(|max| size > max) {
            return Err(SizeRejection::AboveMaximum);
        }
        Ok(())
    }
}

/// File name inclusion patterns. An item passes when ANY pattern matches.
#[derive(Debug, Clone, Default)]
pub struct IncludeFilter {
    patterns: Vec<Regex>,
}

impl IncludeFilter {
    /// Compile patterns, dropping (and reporting) any that fail to compile.
    pub fn compile<I, S>(patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let patterns = patterns
            .into_iter()
            .filter(|p| !p.as_ref().is_empty())
            .filter_map(|p| match Regex::new(p.as_ref()) {
                Ok(re) => Some(re),
                Err(e) => {
                    warn!("Ignoring file filter {:?}: {}", p.as_ref(), e);
                    None
                }
            })
            .collect();
        Self { patterns }
    }

    pub fn is_active(&self) -> bool {
        !self.patterns.is_empty()
    }

    pub fn matches(&self, name: &str) -> bool {
        self.patterns.iter().any(|re| re.is_match(name))
    }
}

/// Whether the server already has a copy task in flight for this item.
///
/// Task names look like `copy [/src](/file) to [/dst](/)` with every `](`
/// removed, so the check is a plain substring match on all three fragments.
pub fn is_already_queued(
    source_path: &str,
    source_dir: &str,
    dest_dir: &str,
    pending_names: &[String],
) -> bool {
    pending_names.iter().any(|task| {
        task.contains(source_dir) && task.contains(dest_dir) && task.contains(source_path)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use quickcheck_macros::quickcheck;

    #[test]
    fn test_normalize_name() {
        assert_eq!(normalize_name("  movie.mkv "), "movie.mkv");
        assert_eq!(normalize_name("a%20b.txt"), "a b.txt");
        assert_eq!(normalize_name("%E4%B8%AD.txt"), "中.txt");
        assert_eq!(normalize_name("100%"), "100%");
    }

    #[test]
    fn test_join_and_split() {
        assert_eq!(join_remote("/src", "a.txt"), "/src/a.txt");
        assert_eq!(join_remote("/", "a.txt"), "/a.txt");
        assert_eq!(join_remote("/src/", "a.txt"), "/src/a.txt");

        assert_eq!(split_remote("/src/sub"), Some(("/src", "sub")));
        assert_eq!(split_remote("/top"), Some(("/", "top")));
        assert_eq!(split_remote("/src/"), None);
        assert_eq!(split_remote("nothing"), None);
    }

    #[test]
    fn test_exclusion_prefixes() {
        let list = ExclusionList::new(["/media/skip/", " ", "/other"]);

        assert!(list.is_excluded("/media/skip"));
        assert!(list.is_excluded("/media/skip/"));
        assert!(list.is_excluded("/media/skip/deep/file.txt"));
        assert!(!list.is_excluded("/media/skipper"));
        assert!(!list.is_excluded("/media"));
        assert!(!list.is_excluded(""));
        assert!(list.is_excluded("/other/x"));
    }

    #[test]
    fn test_empty_exclusion_list() {
        let list = ExclusionList::new(Vec::<String>::new());
        assert!(list.is_empty());
        assert!(!list.is_excluded("/anything"));
    }

    #[quickcheck]
    fn prop_exclusion_covers_descendants(segments: Vec<String>, child: String) -> bool {
        let clean = |s: &String| -> String { s.chars().filter(char::is_ascii_alphanumeric).collect() };
        let base: Vec<String> = segments.iter().map(clean).filter(|s| !s.is_empty()).collect();
        let child = clean(&child);
        if base.is_empty() || child.is_empty() {
            return true;
        }
        let root = format!("/{}", base.join("/"));
        let list = ExclusionList::new([root.as_str()]);
        list.is_excluded(&root) && list.is_excluded(&format!("{}/{}", root, child))
    }

    #[test]
    fn test_size_gate_bounds_are_inclusive() {
        let gate = SizeGate::new(Some(100), Some(200));
        assert_eq!(gate.check(50), Err(SizeRejection::BelowMinimum));
        assert_eq!(gate.check(100), Ok(()));
        assert_eq!(gate.check(200), Ok(()));
        assert_eq!(gate.check(201), Err(SizeRejection::AboveMaximum));
        assert_eq!(gate.check(-1), Ok(()));
    }

    #[quickcheck]
    fn prop_unbounded_gate_admits_everything(size: i64) -> bool {
        SizeGate::default().check(size).is_ok()
    }

    #[test]
    fn test_include_filter() {
        let filter = IncludeFilter::compile([r"\.mp4$", r"^trailer"]);
        assert!(filter.is_active());
        assert!(filter.matches("movie.mp4"));
        assert!(filter.matches("trailer.mkv"));
        assert!(!filter.matches("a.txt"));
    }

    #[test]
    fn test_invalid_filter_is_dropped() {
        let filter = IncludeFilter::compile(["(unclosed", ""]);
        assert!(!filter.is_active());
    }

    #[test]
    fn test_is_already_queued() {
        // "copy [/src/movies](/a.mp4) to [/dst/movies](/)" with "](" stripped
        let pending = vec!["copy [/src/movies/a.mp4) to [/dst/movies/)".to_string()];
        assert!(is_already_queued(
            "/src/movies/a.mp4",
            "/src/movies",
            "/dst/movies",
            &pending
        ));
        assert!(!is_already_queued(
            "/src/movies/b.mp4",
            "/src/movies",
            "/dst/movies",
            &pending
        ));
        assert!(!is_already_queued("/src/movies/a.mp4", "/src/movies", "/dst/movies", &[]));
    }
}
