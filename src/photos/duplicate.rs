//! Exact duplicate detection by content digest.
//!
//! Files are visited in walk order across all scopes; for each digest the
//! first path seen is the original and every later path is a duplicate.

use crate::photos::hash::{DigestAlgorithm, HashService};
use crate::photos::journal::{Journal, JournalError};
use crate::photos::scanner::{ScanError, ScanOptions, discover_files};
use indicatif::{ProgressBar, ProgressStyle};
use serde::{Deserialize, Serialize};
use std::collections::hash_map::Entry;
use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DuplicateError {
    #[error(transparent)]
    Scan(#[from] ScanError),

    #[error(transparent)]
    Journal(#[from] JournalError),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DuplicateGroup {
    pub digest: String,
    /// First path seen with this digest
    pub original: PathBuf,
    /// Later paths with the same digest, in walk order
    pub duplicates: Vec<PathBuf>,
}

impl DuplicateGroup {
    pub fn members(&self) -> impl Iterator<Item = &PathBuf> {
        std::iter::once(&self.original).chain(self.duplicates.iter())
    }

    /// Number of copies, original included. Always at least two.
    pub fn member_count(&self) -> usize {
        1 + self.duplicates.len()
    }
}

#[derive(Debug, Clone, Default)]
pub struct IndexOptions {
    pub algorithm: DigestAlgorithm,
    pub show_progress: bool,
}

#[derive(Debug, Default)]
pub struct DuplicateIndex {
    first_seen: HashMap<String, PathBuf>,
    /// Digest to position in `groups`
    group_slots: HashMap<String, usize>,
    groups: Vec<DuplicateGroup>,
    pub files_scanned: usize,
    pub files_hashed: usize,
    pub skipped: Vec<(PathBuf, String)>,
}

impl DuplicateIndex {
    /// Walk `scopes` in order and index every file by content digest.
    /// A file reachable from several scopes is only counted once.
    pub fn build(scopes: &[PathBuf], options: &IndexOptions) -> Result<Self, DuplicateError> {
        let mut index = DuplicateIndex::default();
        let scan_options = ScanOptions {
            show_progress: options.show_progress,
            ..Default::default()
        };

        let mut visited = HashSet::new();
        let mut files: Vec<(PathBuf, u64)> = Vec::new();
        for scope in scopes {
            for path in discover_files(scope, &scan_options)? {
                let canonical = fs::canonicalize(&path).unwrap_or_else(|_| path.clone());
                if !visited.insert(canonical) {
                    log::debug!("{} already visited", path.display());
                    continue;
                }
                match fs::metadata(&path) {
                    Ok(meta) => files.push((path, meta.len())),
                    Err(e) => {
                        log::warn!("Skipping {}: {}", path.display(), e);
                        index.skipped.push((path, e.to_string()));
                    }
                }
            }
        }
        index.files_scanned = files.len();

        // Only files sharing a size can share a digest
        let mut size_counts: HashMap<u64, usize> = HashMap::new();
        for (_, size) in &files {
            *size_counts.entry(*size).or_default() += 1;
        }
        let candidates: Vec<PathBuf> = files
            .into_iter()
            .filter(|(_, size)| size_counts[size] > 1)
            .map(|(path, _)| path)
            .collect();

        let spinner = if options.show_progress {
            let spinner = ProgressBar::new_spinner();
            if let Ok(style) = ProgressStyle::with_template("{spinner:.green} {msg}") {
                spinner.set_style(style);
            }
            spinner.enable_steady_tick(Duration::from_millis(100));
            spinner
        } else {
            ProgressBar::hidden()
        };
        spinner.set_message(format!(
            "Hashing {} file(s) with {}…",
            candidates.len(),
            options.algorithm
        ));

        let start = Instant::now();
        let hashed = HashService::new(options.algorithm).compute_batch(&candidates);
        spinner.finish_and_clear();
        log::debug!(
            "Hashing {} file(s) took {:.2?}",
            candidates.len(),
            start.elapsed()
        );

        for (path, result) in hashed {
            match result {
                Ok(digest) => {
                    index.files_hashed += 1;
                    index.insert(digest, path);
                }
                Err(e) => {
                    log::warn!("{}", e);
                    index.skipped.push((path, e.to_string()));
                }
            }
        }

        Ok(index)
    }

    /// Record `path` under `digest`; returns the original it duplicates, if any.
    pub fn insert(&mut self, digest: String, path: PathBuf) -> Option<&Path> {
        match self.first_seen.entry(digest) {
            Entry::Vacant(slot) => {
                slot.insert(path);
                None
            }
            Entry::Occupied(slot) => {
                let (digest, original) = (slot.key(), slot.get());
                let position = match self.group_slots.entry(digest.clone()) {
                    Entry::Occupied(group_slot) => *group_slot.get(),
                    Entry::Vacant(group_slot) => {
                        self.groups.push(DuplicateGroup {
                            digest: digest.clone(),
                            original: original.clone(),
                            duplicates: Vec::new(),
                        });
                        *group_slot.insert(self.groups.len() - 1)
                    }
                };
                let group = &mut self.groups[position];
                group.duplicates.push(path);
                Some(group.original.as_path())
            }
        }
    }

    pub fn original_for(&self, digest: &str) -> Option<&Path> {
        self.first_seen.get(digest).map(PathBuf::as_path)
    }

    /// Groups of identical files, in the order their first duplicate was found.
    pub fn groups(&self) -> &[DuplicateGroup] {
        &self.groups
    }

    /// `(duplicate, original)` pairs.
    pub fn pairs(&self) -> impl Iterator<Item = (&Path, &Path)> {
        self.groups.iter().flat_map(|group| {
            group
                .duplicates
                .iter()
                .map(move |dup| (dup.as_path(), group.original.as_path()))
        })
    }

    pub fn duplicate_count(&self) -> usize {
        self.groups.iter().map(|g| g.duplicates.len()).sum()
    }
}

/// Which members of a duplicate group get deleted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeletionPolicy {
    /// Delete every duplicate; keep the first path seen
    KeepFirst,
    /// Delete members whose path contains the substring, as long as at
    /// least one copy survives
    DeleteMatching(String),
}

impl DeletionPolicy {
    pub fn from_substring(substring: Option<String>) -> Self {
        match substring {
            Some(s) if !s.is_empty() => DeletionPolicy::DeleteMatching(s),
            _ => DeletionPolicy::KeepFirst,
        }
    }

    /// Paths of `group` to delete. Never every member.
    pub fn select<'a>(&self, group: &'a DuplicateGroup) -> Vec<&'a Path> {
        match self {
            DeletionPolicy::KeepFirst => group.duplicates.iter().map(PathBuf::as_path).collect(),
            DeletionPolicy::DeleteMatching(substring) => {
                let matching: Vec<&Path> = group
                    .members()
                    .filter(|p| p.to_string_lossy().contains(substring.as_str()))
                    .map(PathBuf::as_path)
                    .collect();
                if matching.len() == group.member_count() {
                    matching.into_iter().skip(1).collect()
                } else {
                    matching
                }
            }
        }
    }
}

#[derive(Debug, Default)]
pub struct DedupeReport {
    /// Deleted files (planned deletions on a dry run)
    pub deleted: Vec<PathBuf>,
    pub skipped: Vec<(PathBuf, String)>,
    pub failed: Vec<(PathBuf, String)>,
}

/// Delete the files `policy` selects from every group. Each deletion is
/// re-checked against the disk first and recorded in `journal`.
pub fn remove_duplicates(
    index: &DuplicateIndex,
    policy: &DeletionPolicy,
    dry_run: bool,
    journal: &mut Journal,
) -> DedupeReport {
    let mut report = DedupeReport::default();

    for group in index.groups() {
        let selected = policy.select(group);
        if selected.is_empty() {
            continue;
        }

        let keeper_exists = group
            .members()
            .filter(|p| !selected.contains(&p.as_path()))
            .any(|p| p.is_file());
        if !keeper_exists {
            log::warn!(
                "No surviving copy of {} on disk; leaving group untouched",
                group.digest
            );
            for path in selected {
                report
                    .skipped
                    .push((path.to_path_buf(), "no other copy remains".to_string()));
            }
            continue;
        }

        for path in selected {
            if !path.is_file() {
                report
                    .skipped
                    .push((path.to_path_buf(), "file no longer exists".to_string()));
                continue;
            }
            if dry_run {
                report.deleted.push(path.to_path_buf());
                continue;
            }
            match fs::remove_file(path) {
                Ok(()) => {
                    log::debug!("Deleted {} ({})", path.display(), group.digest);
                    if let Err(e) = journal.record_delete(path, &group.digest) {
                        log::error!("{}", e);
                    }
                    report.deleted.push(path.to_path_buf());
                }
                Err(e) => {
                    log::error!("Failed to delete {}: {}", path.display(), e);
                    report.failed.push((path.to_path_buf(), e.to_string()));
                }
            }
        }
    }

    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::photos::journal::{JournalAction, read_records};
    use tempfile::TempDir;

    fn write(path: &Path, content: &[u8]) {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(path, content).unwrap();
    }

    fn group(original: &str, duplicates: &[&str]) -> DuplicateGroup {
        DuplicateGroup {
            digest: "d".to_string(),
            original: PathBuf::from(original),
            duplicates: duplicates.iter().map(PathBuf::from).collect(),
        }
    }

    #[test]
    fn test_first_seen_wins() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path();
        write(&root.join("a.jpg"), b"same bytes");
        write(&root.join("b/c.jpg"), b"same bytes");
        write(&root.join("d.jpg"), b"diff bytes");

        let index = DuplicateIndex::build(&[root.to_path_buf()], &IndexOptions::default()).unwrap();
        assert_eq!(index.files_scanned, 3);
        assert_eq!(index.files_hashed, 3);
        assert_eq!(index.groups().len(), 1);
        assert_eq!(index.duplicate_count(), 1);

        let pairs: Vec<_> = index.pairs().collect();
        assert_eq!(pairs, vec![(root.join("b/c.jpg").as_path(), root.join("a.jpg").as_path())]);
        assert_eq!(
            index.original_for(&index.groups()[0].digest),
            Some(root.join("a.jpg").as_path())
        );
    }

    #[test]
    fn test_unique_sizes_not_hashed() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path();
        write(&root.join("a.jpg"), b"short");
        write(&root.join("b.jpg"), b"a bit longer");
        write(&root.join("c.jpg"), b"");

        let index = DuplicateIndex::build(&[root.to_path_buf()], &IndexOptions::default()).unwrap();
        assert_eq!(index.files_scanned, 3);
        assert_eq!(index.files_hashed, 0);
        assert!(index.groups().is_empty());
    }

    #[test]
    fn test_empty_files_are_identical() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path();
        write(&root.join("empty1.jpg"), b"");
        write(&root.join("empty2.jpg"), b"");
        write(&root.join("photo.jpg"), b"bytes");

        let index = DuplicateIndex::build(&[root.to_path_buf()], &IndexOptions::default()).unwrap();
        assert_eq!(index.files_hashed, 2);
        assert_eq!(index.duplicate_count(), 1);
        let group = &index.groups()[0];
        assert_eq!(group.original, root.join("empty1.jpg"));
        assert_eq!(group.duplicates, vec![root.join("empty2.jpg")]);
    }

    #[test]
    fn test_many_groups_keep_insertion_order() {
        let mut index = DuplicateIndex::default();
        for i in 0..20_000 {
            index.insert(format!("{:x}", i), PathBuf::from(format!("a/{}", i)));
        }
        for i in (0..20_000).rev() {
            let original = index.insert(format!("{:x}", i), PathBuf::from(format!("b/{}", i)));
            assert_eq!(original, Some(PathBuf::from(format!("a/{}", i)).as_path()));
        }

        assert_eq!(index.groups().len(), 20_000);
        assert_eq!(index.duplicate_count(), 20_000);
        assert_eq!(index.groups()[0].original, PathBuf::from("a/19999"));
        assert_eq!(index.groups()[19_999].duplicates, vec![PathBuf::from("b/0")]);
    }

    #[test]
    fn test_scope_order_and_overlap() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path();
        write(&root.join("library/2020/photo.jpg"), b"content");
        write(&root.join("uploads/IMG_1.jpg"), b"content");

        let scopes = vec![root.join("uploads"), root.to_path_buf()];
        let options = IndexOptions {
            algorithm: DigestAlgorithm::Sha256,
            show_progress: false,
        };
        let index = DuplicateIndex::build(&scopes, &options).unwrap();

        // uploads/IMG_1.jpg is reachable from both scopes but only counted once
        assert_eq!(index.files_scanned, 2);
        assert_eq!(index.groups().len(), 1);
        let group = &index.groups()[0];
        assert_eq!(group.original, root.join("uploads/IMG_1.jpg"));
        assert_eq!(group.duplicates, vec![root.join("library/2020/photo.jpg")]);
    }

    #[test]
    fn test_insert_groups_by_digest() {
        let mut index = DuplicateIndex::default();
        assert!(index.insert("x".into(), "1".into()).is_none());
        assert!(index.insert("y".into(), "2".into()).is_none());
        assert_eq!(index.insert("x".into(), "3".into()), Some(Path::new("1")));
        assert_eq!(index.insert("x".into(), "4".into()), Some(Path::new("1")));
        assert_eq!(index.insert("y".into(), "5".into()), Some(Path::new("2")));

        assert_eq!(index.groups().len(), 2);
        assert_eq!(index.groups()[0].member_count(), 3);
        assert_eq!(index.duplicate_count(), 3);
    }

    #[test]
    fn test_keep_first_policy() {
        let g = group("a", &["b", "c"]);
        assert_eq!(
            DeletionPolicy::KeepFirst.select(&g),
            vec![Path::new("b"), Path::new("c")]
        );
    }

    #[test]
    fn test_delete_matching_policy() {
        let policy = DeletionPolicy::from_substring(Some("Camera".to_string()));

        // Original in the upload folder goes when a copy lives elsewhere
        let g = group("Camera Uploads/1.jpg", &["Photos/1.jpg"]);
        assert_eq!(policy.select(&g), vec![Path::new("Camera Uploads/1.jpg")]);

        // Nothing matches: nothing deleted
        let g = group("Photos/a.jpg", &["Photos/b.jpg"]);
        assert!(policy.select(&g).is_empty());

        // Everything matches: the first copy survives
        let g = group("Camera/1.jpg", &["Camera/2.jpg", "Camera/3.jpg"]);
        assert_eq!(
            policy.select(&g),
            vec![Path::new("Camera/2.jpg"), Path::new("Camera/3.jpg")]
        );

        assert_eq!(DeletionPolicy::from_substring(Some(String::new())), DeletionPolicy::KeepFirst);
        assert_eq!(DeletionPolicy::from_substring(None), DeletionPolicy::KeepFirst);
    }

    #[test]
    fn test_policy_never_selects_every_member() {
        let groups = [
            group("Camera/a", &[]),
            group("Camera/a", &["Camera/b"]),
            group("x/a", &["Camera/b", "Camera/c"]),
            group("Camera/a", &["x/b", "Camera/c"]),
        ];
        for policy in [
            DeletionPolicy::KeepFirst,
            DeletionPolicy::DeleteMatching("Camera".to_string()),
            DeletionPolicy::DeleteMatching("/".to_string()),
        ] {
            for g in &groups {
                assert!(policy.select(g).len() < g.member_count(), "{:?} {:?}", policy, g);
            }
        }
    }

    #[test]
    fn test_remove_duplicates_dry_run_and_real() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path();
        write(&root.join("a.jpg"), b"same bytes");
        write(&root.join("b.jpg"), b"same bytes");
        write(&root.join("c.jpg"), b"same bytes");

        let index = DuplicateIndex::build(&[root.to_path_buf()], &IndexOptions::default()).unwrap();

        let mut journal = Journal::disabled(JournalAction::Deleted);
        let report = remove_duplicates(&index, &DeletionPolicy::KeepFirst, true, &mut journal);
        assert_eq!(report.deleted.len(), 2);
        assert!(root.join("b.jpg").exists() && root.join("c.jpg").exists());

        let mut journal = Journal::open(root, JournalAction::Deleted);
        let report = remove_duplicates(&index, &DeletionPolicy::KeepFirst, false, &mut journal);
        journal.commit().unwrap();
        assert_eq!(report.deleted, vec![root.join("b.jpg"), root.join("c.jpg")]);
        assert!(root.join("a.jpg").exists());
        assert!(!root.join("b.jpg").exists());

        let records = read_records(root).unwrap();
        assert_eq!(records[0].0.operations.len(), 2);
        assert_eq!(
            records[0].0.operations[0].digest.as_deref(),
            Some(index.groups()[0].digest.as_str())
        );
    }

    #[test]
    fn test_remove_skips_vanished_files() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path();
        write(&root.join("a.jpg"), b"same bytes");
        write(&root.join("b.jpg"), b"same bytes");
        write(&root.join("c.jpg"), b"same bytes");

        let index = DuplicateIndex::build(&[root.to_path_buf()], &IndexOptions::default()).unwrap();
        fs::remove_file(root.join("b.jpg")).unwrap();

        let mut journal = Journal::disabled(JournalAction::Deleted);
        let report = remove_duplicates(&index, &DeletionPolicy::KeepFirst, false, &mut journal);
        assert_eq!(report.deleted, vec![root.join("c.jpg")]);
        assert_eq!(report.skipped.len(), 1);

        // The kept copy is gone too: leave the rest alone
        write(&root.join("b.jpg"), b"same bytes");
        fs::remove_file(root.join("a.jpg")).unwrap();
        let report = remove_duplicates(&index, &DeletionPolicy::KeepFirst, false, &mut journal);
        assert!(report.deleted.is_empty());
        assert!(root.join("b.jpg").exists());
    }
}
