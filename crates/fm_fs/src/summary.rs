//! Tree statistics

use serde::Serialize;
use std::path::Path;
use walkdir::WalkDir;

/// Totals for a directory tree
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TreeSummary {
    pub files: u64,
    /// Includes the starting directory
    pub folders: u64,
    pub size: u64,
}

/// Walk `root` and count everything below it
///
/// Unreadable entries are skipped, entries whose metadata cannot be read are
/// counted without a size. Never fails as a whole.
pub fn summarize_tree(root: &Path) -> TreeSummary {
    let mut summary = TreeSummary::default();

    for entry in WalkDir::new(root).follow_links(false) {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                tracing::debug!("Skipping during summary: {}", e);
                continue;
            }
        };

        if entry.file_type().is_dir() {
            summary.folders += 1;
            continue;
        }

        summary.files += 1;
        match entry.metadata() {
            Ok(metadata) => summary.size += metadata.len(),
            Err(e) => tracing::debug!("No size for {}: {}", entry.path().display(), e),
        }
    }

    summary
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_counts_root_and_nested() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("a/b")).unwrap();
        fs::write(dir.path().join("one.txt"), b"12345").unwrap();
        fs::write(dir.path().join("a/b/two.txt"), b"123").unwrap();

        let summary = summarize_tree(dir.path());
        assert_eq!(
            summary,
            TreeSummary {
                files: 2,
                folders: 3,
                size: 8
            }
        );
    }

    #[test]
    fn test_missing_root_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let summary = summarize_tree(&dir.path().join("absent"));
        assert_eq!(summary, TreeSummary::default());
    }
}
