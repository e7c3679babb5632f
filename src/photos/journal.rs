use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::process;
use std::sync::atomic::{AtomicU64, Ordering};
use thiserror::Error;

pub const JOURNAL_FILE_NAME: &str = ".snapkit-journal.jsonl";

static RUN_SEQUENCE: AtomicU64 = AtomicU64::new(0);

#[derive(Debug, Error)]
pub enum JournalError {
    #[error("IO error on journal {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Could not encode journal entry: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("No journal records in {path}")]
    Empty { path: String },

    #[error("Invalid journal record {index}; valid range is 0..={last}")]
    InvalidRecord { index: usize, last: usize },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JournalAction {
    Renamed,
    Deleted,
}

/// One filesystem change. Paths are relative to the journal's root when
/// they live under it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Operation {
    pub from: PathBuf,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub digest: Option<String>,
}

/// A single journal line: one operation tagged with the run it belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct JournalEntry {
    run: String,
    timestamp: String,
    action: JournalAction,
    #[serde(flatten)]
    operation: Operation,
}

/// All changes made by one invocation, rebuilt from its journal lines.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JournalRecord {
    pub run: String,
    pub timestamp: String,
    pub action: JournalAction,
    pub operations: Vec<Operation>,
}

pub fn journal_path(root: &Path) -> PathBuf {
    root.join(JOURNAL_FILE_NAME)
}

fn io_error(path: &Path) -> impl FnOnce(std::io::Error) -> JournalError + '_ {
    move |source| JournalError::Io {
        path: path.display().to_string(),
        source,
    }
}

/// Appends each operation to the journal file as soon as it is recorded,
/// so an interrupted run still leaves a record of what it changed. The
/// file is only created once something is recorded.
#[derive(Debug)]
pub struct Journal {
    root: PathBuf,
    enabled: bool,
    run: String,
    timestamp: String,
    action: JournalAction,
    out: Option<File>,
    written: usize,
}

impl Journal {
    pub fn open(root: &Path, action: JournalAction) -> Self {
        let now = Utc::now();
        let run = format!(
            "{}-{}-{}",
            now.to_rfc3339_opts(SecondsFormat::Nanos, true),
            process::id(),
            RUN_SEQUENCE.fetch_add(1, Ordering::Relaxed)
        );
        Self {
            root: root.to_path_buf(),
            enabled: true,
            run,
            timestamp: now.to_rfc3339_opts(SecondsFormat::Secs, true),
            action,
            out: None,
            written: 0,
        }
    }

    /// A journal that records nothing, for dry runs.
    pub fn disabled(action: JournalAction) -> Self {
        Self {
            root: PathBuf::new(),
            enabled: false,
            run: String::new(),
            timestamp: String::new(),
            action,
            out: None,
            written: 0,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn path(&self) -> PathBuf {
        journal_path(&self.root)
    }

    fn relativize(&self, path: &Path) -> PathBuf {
        path.strip_prefix(&self.root)
            .map(Path::to_path_buf)
            .unwrap_or_else(|_| path.to_path_buf())
    }

    pub fn record_rename(&mut self, from: &Path, to: &Path) -> Result<(), JournalError> {
        let operation = Operation {
            from: self.relativize(from),
            to: Some(self.relativize(to)),
            digest: None,
        };
        self.append(operation)
    }

    pub fn record_delete(&mut self, path: &Path, digest: &str) -> Result<(), JournalError> {
        let operation = Operation {
            from: self.relativize(path),
            to: None,
            digest: Some(digest.to_string()),
        };
        self.append(operation)
    }

    fn append(&mut self, operation: Operation) -> Result<(), JournalError> {
        if !self.enabled {
            return Ok(());
        }

        let entry = JournalEntry {
            run: self.run.clone(),
            timestamp: self.timestamp.clone(),
            action: self.action,
            operation,
        };
        let mut line = serde_json::to_string(&entry)?;
        line.push('\n');

        let path = self.path();
        let out = match &mut self.out {
            Some(out) => out,
            slot @ None => {
                let file = OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(&path)
                    .map_err(io_error(&path))?;
                slot.insert(file)
            }
        };
        out.write_all(line.as_bytes()).map_err(io_error(&path))?;
        out.flush().map_err(io_error(&path))?;
        self.written += 1;
        Ok(())
    }

    /// Operations written so far.
    pub fn len(&self) -> usize {
        self.written
    }

    pub fn is_empty(&self) -> bool {
        self.written == 0
    }

    /// Sync the journal to disk. Returns the journal file path if this run
    /// wrote anything.
    pub fn commit(self) -> Result<Option<PathBuf>, JournalError> {
        let Some(out) = self.out else {
            return Ok(None);
        };
        let path = journal_path(&self.root);
        out.sync_all().map_err(io_error(&path))?;
        log::debug!("Recorded {} operation(s) in {}", self.written, path.display());
        Ok(Some(path))
    }
}

/// Read every record with the raw lines it was rebuilt from. Consecutive
/// lines of the same run form one record. A missing journal reads as
/// empty; malformed lines are skipped with a warning.
pub fn read_records(root: &Path) -> Result<Vec<(JournalRecord, Vec<String>)>, JournalError> {
    let path = journal_path(root);
    let file = match File::open(&path) {
        Ok(f) => f,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(io_error(&path)(e)),
    };

    let mut records: Vec<(JournalRecord, Vec<String>)> = Vec::new();
    for (i, line) in BufReader::new(file).lines().enumerate() {
        let line = line.map_err(io_error(&path))?;
        if line.trim().is_empty() {
            continue;
        }
        let entry = match serde_json::from_str::<JournalEntry>(&line) {
            Ok(entry) => entry,
            Err(e) => {
                log::warn!("Skipping malformed journal line {}: {}", i + 1, e);
                continue;
            }
        };

        match records.last_mut() {
            Some((record, lines)) if record.run == entry.run && record.action == entry.action => {
                record.operations.push(entry.operation);
                lines.push(line);
            }
            _ => records.push((
                JournalRecord {
                    run: entry.run,
                    timestamp: entry.timestamp,
                    action: entry.action,
                    operations: vec![entry.operation],
                },
                vec![line],
            )),
        }
    }
    Ok(records)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UndoSelection {
    Latest,
    Record(usize),
    All,
}

#[derive(Debug, Default)]
pub struct UndoReport {
    pub restored: Vec<(PathBuf, PathBuf)>,
    pub skipped: Vec<(PathBuf, String)>,
    pub records_removed: usize,
}

/// Revert the renames of the selected record(s), newest first, and drop
/// those records from the journal. A rename that fails is reported in
/// `skipped` and the rest carry on.
pub fn undo(root: &Path, selection: UndoSelection) -> Result<UndoReport, JournalError> {
    let path = journal_path(root);
    let stored = read_records(root)?;
    if stored.is_empty() {
        return Err(JournalError::Empty {
            path: path.display().to_string(),
        });
    }

    let last = stored.len() - 1;
    let mut indices: Vec<usize> = match selection {
        UndoSelection::All => (0..stored.len()).collect(),
        UndoSelection::Latest => vec![last],
        UndoSelection::Record(index) if index > last => {
            return Err(JournalError::InvalidRecord { index, last });
        }
        UndoSelection::Record(index) => vec![index],
    };
    indices.sort_unstable_by(|a, b| b.cmp(a));

    let mut report = UndoReport::default();
    for &i in &indices {
        let record = &stored[i].0;
        log::info!(
            "Undoing record {} ({:?}, {} operation(s))",
            record.timestamp,
            record.action,
            record.operations.len()
        );

        for op in record.operations.iter().rev() {
            let original = root.join(&op.from);
            let Some(to) = &op.to else {
                report
                    .skipped
                    .push((original, "deleted files cannot be restored".to_string()));
                continue;
            };
            let current = root.join(to);

            if !current.exists() {
                report
                    .skipped
                    .push((current, "file no longer exists".to_string()));
                continue;
            }
            if original.exists() {
                report.skipped.push((
                    current,
                    format!("{} is occupied", original.display()),
                ));
                continue;
            }

            match fs::rename(&current, &original) {
                Ok(()) => {
                    log::debug!("Restored {} → {}", current.display(), original.display());
                    report.restored.push((current, original));
                }
                Err(e) => {
                    log::error!("Failed to restore {}: {}", current.display(), e);
                    report.skipped.push((current, e.to_string()));
                }
            }
        }
    }

    let mut new_content = String::new();
    for (i, (_, lines)) in stored.iter().enumerate() {
        if indices.contains(&i) {
            continue;
        }
        for line in lines {
            new_content.push_str(line);
            new_content.push('\n');
        }
    }
    fs::write(&path, new_content).map_err(io_error(&path))?;
    report.records_removed = indices.len();

    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn rename_and_record(journal: &mut Journal, from: &Path, to: &Path) {
        fs::rename(from, to).unwrap();
        journal.record_rename(from, to).unwrap();
    }

    fn journal_lines(root: &Path) -> Vec<String> {
        fs::read_to_string(journal_path(root))
            .unwrap()
            .lines()
            .map(str::to_string)
            .collect()
    }

    #[test]
    fn test_commit_and_read() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path();

        let mut journal = Journal::open(root, JournalAction::Deleted);
        journal.record_delete(&root.join("sub/a.jpg"), "abc123").unwrap();
        journal.record_delete(&root.join("b.jpg"), "abc123").unwrap();
        assert_eq!(journal.len(), 2);
        let written = journal.commit().unwrap();
        assert_eq!(written, Some(journal_path(root)));

        let records = read_records(root).unwrap();
        assert_eq!(records.len(), 1);
        let (record, lines) = &records[0];
        assert_eq!(lines.len(), 2);
        assert_eq!(record.action, JournalAction::Deleted);
        assert_eq!(record.operations[0].from, PathBuf::from("sub/a.jpg"));
        assert_eq!(record.operations[0].digest.as_deref(), Some("abc123"));
        assert!(record.operations[0].to.is_none());
        assert_eq!(record.operations[1].from, PathBuf::from("b.jpg"));
    }

    #[test]
    fn test_operations_survive_without_commit() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path();
        fs::write(root.join("IMG_1.jpg"), b"1").unwrap();

        {
            let mut journal = Journal::open(root, JournalAction::Renamed);
            rename_and_record(&mut journal, &root.join("IMG_1.jpg"), &root.join("one.jpg"));
            // Dropped mid-run, as on an interrupt
        }

        let records = read_records(root).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].0.operations[0].to, Some(PathBuf::from("one.jpg")));

        let report = undo(root, UndoSelection::Latest).unwrap();
        assert_eq!(report.restored.len(), 1);
        assert!(root.join("IMG_1.jpg").exists());
    }

    #[test]
    fn test_disabled_and_empty_journal_write_nothing() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path();

        let mut disabled = Journal::disabled(JournalAction::Renamed);
        disabled.record_rename(&root.join("a"), &root.join("b")).unwrap();
        assert!(disabled.is_empty());
        assert_eq!(disabled.commit().unwrap(), None);

        let empty = Journal::open(root, JournalAction::Renamed);
        assert_eq!(empty.commit().unwrap(), None);
        assert!(!journal_path(root).exists());
        assert!(read_records(root).unwrap().is_empty());
    }

    #[test]
    fn test_runs_become_separate_records() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path();

        for digest in ["aa", "bb"] {
            let mut journal = Journal::open(root, JournalAction::Deleted);
            journal.record_delete(&root.join(format!("{}.jpg", digest)), digest).unwrap();
            journal.commit().unwrap();
        }

        let records = read_records(root).unwrap();
        assert_eq!(records.len(), 2);
        assert_ne!(records[0].0.run, records[1].0.run);
        assert_eq!(records[1].0.operations[0].digest.as_deref(), Some("bb"));
    }

    #[test]
    fn test_malformed_lines_skipped() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path();

        let mut journal = Journal::open(root, JournalAction::Deleted);
        journal.record_delete(&root.join("a.jpg"), "00").unwrap();
        journal.commit().unwrap();
        let valid = journal_lines(root).remove(0);
        fs::write(journal_path(root), format!("not json\n\n{}\n", valid)).unwrap();

        let records = read_records(root).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].1, vec![valid]);
        assert_eq!(records[0].0.operations[0].from, PathBuf::from("a.jpg"));
    }

    #[test]
    fn test_undo_latest_restores_names() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path();
        fs::write(root.join("IMG_1.jpg"), b"1").unwrap();
        fs::write(root.join("IMG_2.jpg"), b"2").unwrap();

        let mut first = Journal::open(root, JournalAction::Renamed);
        rename_and_record(&mut first, &root.join("IMG_1.jpg"), &root.join("one.jpg"));
        first.commit().unwrap();

        let mut second = Journal::open(root, JournalAction::Renamed);
        rename_and_record(&mut second, &root.join("IMG_2.jpg"), &root.join("two.jpg"));
        second.commit().unwrap();

        let report = undo(root, UndoSelection::Latest).unwrap();
        assert_eq!(report.records_removed, 1);
        assert_eq!(report.restored.len(), 1);
        assert!(root.join("IMG_2.jpg").exists());
        assert!(root.join("one.jpg").exists());

        let remaining = read_records(root).unwrap();
        assert_eq!(remaining.len(), 1);

        let report = undo(root, UndoSelection::All).unwrap();
        assert_eq!(report.restored.len(), 1);
        assert!(root.join("IMG_1.jpg").exists());
        assert!(read_records(root).unwrap().is_empty());
    }

    #[test]
    fn test_undo_middle_record() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path();
        for name in ["a.jpg", "b.jpg", "c.jpg", "d.jpg"] {
            fs::write(root.join(name), name).unwrap();
        }

        let mut first = Journal::open(root, JournalAction::Renamed);
        rename_and_record(&mut first, &root.join("a.jpg"), &root.join("a2.jpg"));
        first.commit().unwrap();

        let mut second = Journal::open(root, JournalAction::Renamed);
        rename_and_record(&mut second, &root.join("b.jpg"), &root.join("b2.jpg"));
        rename_and_record(&mut second, &root.join("c.jpg"), &root.join("c2.jpg"));
        second.commit().unwrap();

        let mut third = Journal::open(root, JournalAction::Renamed);
        rename_and_record(&mut third, &root.join("d.jpg"), &root.join("d2.jpg"));
        third.commit().unwrap();

        let lines = journal_lines(root);
        assert_eq!(lines.len(), 4);

        let report = undo(root, UndoSelection::Record(1)).unwrap();
        assert_eq!(report.records_removed, 1);
        assert_eq!(report.restored.len(), 2);
        assert!(report.skipped.is_empty());

        assert!(root.join("b.jpg").exists());
        assert!(root.join("c.jpg").exists());
        assert!(root.join("a2.jpg").exists());
        assert!(root.join("d2.jpg").exists());
        assert!(!root.join("a.jpg").exists());
        assert!(!root.join("d.jpg").exists());

        assert_eq!(journal_lines(root), vec![lines[0].clone(), lines[3].clone()]);
        let remaining = read_records(root).unwrap();
        assert_eq!(remaining.len(), 2);
        assert_eq!(remaining[0].0.operations[0].to, Some(PathBuf::from("a2.jpg")));
        assert_eq!(remaining[1].0.operations[0].to, Some(PathBuf::from("d2.jpg")));
    }

    #[test]
    fn test_undo_chained_renames_in_reverse() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path();
        fs::write(root.join("a.jpg"), b"a").unwrap();

        let mut journal = Journal::open(root, JournalAction::Renamed);
        rename_and_record(&mut journal, &root.join("a.jpg"), &root.join("b.jpg"));
        rename_and_record(&mut journal, &root.join("b.jpg"), &root.join("c.jpg"));
        journal.commit().unwrap();

        let report = undo(root, UndoSelection::Latest).unwrap();
        assert_eq!(report.restored.len(), 2);
        assert!(report.skipped.is_empty());
        assert!(root.join("a.jpg").exists());
        assert!(!root.join("c.jpg").exists());
    }

    #[test]
    fn test_undo_skips_deletions_and_conflicts() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path();
        fs::write(root.join("x.jpg"), b"x").unwrap();

        let mut journal = Journal::open(root, JournalAction::Renamed);
        rename_and_record(&mut journal, &root.join("x.jpg"), &root.join("y.jpg"));
        journal.commit().unwrap();
        // Something else took the old name in the meantime
        fs::write(root.join("x.jpg"), b"new").unwrap();

        let mut deletions = Journal::open(root, JournalAction::Deleted);
        deletions.record_delete(&root.join("gone.jpg"), "ff").unwrap();
        deletions.commit().unwrap();

        let report = undo(root, UndoSelection::All).unwrap();
        assert!(report.restored.is_empty());
        assert_eq!(report.skipped.len(), 2);
        assert_eq!(report.records_removed, 2);
        assert!(root.join("y.jpg").exists());
    }

    #[test]
    fn test_undo_continues_past_failed_rename() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path();
        fs::create_dir(root.join("album")).unwrap();
        fs::write(root.join("album/a.jpg"), b"a").unwrap();
        fs::write(root.join("b.jpg"), b"b").unwrap();

        let mut journal = Journal::open(root, JournalAction::Renamed);
        rename_and_record(&mut journal, &root.join("album/a.jpg"), &root.join("a2.jpg"));
        rename_and_record(&mut journal, &root.join("b.jpg"), &root.join("b2.jpg"));
        journal.commit().unwrap();
        // The original directory is gone, so a2.jpg cannot move back
        fs::remove_dir(root.join("album")).unwrap();

        let report = undo(root, UndoSelection::Latest).unwrap();
        assert_eq!(report.restored, vec![(root.join("b2.jpg"), root.join("b.jpg"))]);
        assert_eq!(report.skipped.len(), 1);
        assert_eq!(report.skipped[0].0, root.join("a2.jpg"));
        assert_eq!(report.records_removed, 1);
        assert!(read_records(root).unwrap().is_empty());
    }

    #[test]
    fn test_undo_errors() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path();
        assert!(matches!(
            undo(root, UndoSelection::Latest),
            Err(JournalError::Empty { .. })
        ));

        let mut journal = Journal::open(root, JournalAction::Deleted);
        journal.record_delete(&root.join("a.jpg"), "00").unwrap();
        journal.commit().unwrap();
        assert!(matches!(
            undo(root, UndoSelection::Record(3)),
            Err(JournalError::InvalidRecord { index: 3, last: 0 })
        ));
    }
}
