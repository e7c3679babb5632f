use crate::config::DEFAULT_RENAME_PATTERN;
use crate::photos::exif::{ExifError, ExifService, TimestampSource};
use crate::photos::journal::{Journal, JournalError};
use crate::photos::scanner::{ScanError, ScanOptions, discover_files};
use chrono::NaiveDateTime;
use chrono::format::{Item, StrftimeItems};
use indicatif::{ProgressBar, ProgressStyle};
use std::collections::{HashMap, HashSet};
use std::ffi::{OsStr, OsString};
use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RenameError {
    #[error("Invalid rename pattern '{pattern}': {reason}")]
    InvalidPattern { pattern: String, reason: String },

    #[error("IO error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Scan(#[from] ScanError),

    #[error(transparent)]
    Exif(#[from] ExifError),

    #[error(transparent)]
    Journal(#[from] JournalError),
}

#[derive(Debug, Clone)]
pub struct RenameOptions {
    /// chrono format string for the new stem
    pub pattern: String,
    pub dry_run: bool,
    pub use_local_time: bool,
    /// Lowercase extensions to consider; `None` means every file with an extension
    pub extensions: Option<Vec<String>>,
    pub show_progress: bool,
}

impl Default for RenameOptions {
    fn default() -> Self {
        Self {
            pattern: DEFAULT_RENAME_PATTERN.to_string(),
            dry_run: false,
            use_local_time: false,
            extensions: None,
            show_progress: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenameOutcome {
    pub from: PathBuf,
    pub to: PathBuf,
    pub source: TimestampSource,
}

#[derive(Debug, Default)]
pub struct RenameReport {
    pub renamed: Vec<RenameOutcome>,
    pub unchanged: usize,
    pub failed: Vec<(PathBuf, String)>,
}

/// Reject patterns chrono can't format or that would produce a path.
pub fn validate_pattern(pattern: &str) -> Result<(), RenameError> {
    let invalid = |reason: &str| RenameError::InvalidPattern {
        pattern: pattern.to_string(),
        reason: reason.to_string(),
    };

    if pattern.trim().is_empty() {
        return Err(invalid("pattern is empty"));
    }
    if pattern.contains('/') || pattern.contains('\\') {
        return Err(invalid("pattern must not contain path separators"));
    }
    if StrftimeItems::new(pattern).any(|item| matches!(item, Item::Error)) {
        return Err(invalid("unrecognised format specifier"));
    }
    Ok(())
}

/// Format `datetime` into a file stem.
pub fn target_stem(datetime: &NaiveDateTime, pattern: &str) -> Result<String, RenameError> {
    validate_pattern(pattern)?;

    let mut stem = String::new();
    write!(stem, "{}", datetime.format(pattern)).map_err(|_| RenameError::InvalidPattern {
        pattern: pattern.to_string(),
        reason: "pattern could not be formatted".to_string(),
    })?;

    if stem.trim().is_empty() || stem.contains('/') || stem.contains('\\') {
        return Err(RenameError::InvalidPattern {
            pattern: pattern.to_string(),
            reason: format!("produced unusable file name '{}'", stem),
        });
    }
    Ok(stem)
}

/// True when `stem` is `target` or `target-N`, i.e. a previous run already
/// named this file.
pub fn is_already_named(stem: &str, target: &str) -> bool {
    if stem == target {
        return true;
    }
    stem.strip_prefix(target)
        .and_then(|rest| rest.strip_prefix('-'))
        .filter(|n| !n.is_empty() && n.bytes().all(|b| b.is_ascii_digit()))
        .and_then(|n| n.parse::<u64>().ok())
        .is_some_and(|n| n > 0)
}

fn file_name_for(stem: &str, counter: u64, extension: &OsStr) -> OsString {
    let mut name = if counter == 0 {
        OsString::from(stem)
    } else {
        OsString::from(format!("{}-{}", stem, counter))
    };
    name.push(".");
    name.push(extension);
    name
}

/// Tracks which names are taken in each directory, including names claimed
/// by renames planned earlier in the same run.
#[derive(Debug, Default)]
pub struct NameLedger {
    occupied: HashMap<PathBuf, HashSet<OsString>>,
    verify_on_disk: bool,
}

impl NameLedger {
    /// With `verify_on_disk` every candidate is also checked against the
    /// filesystem. Dry runs leave it off since nothing actually moves.
    pub fn new(verify_on_disk: bool) -> Self {
        Self {
            occupied: HashMap::new(),
            verify_on_disk,
        }
    }

    fn names(&mut self, dir: &Path) -> Result<&mut HashSet<OsString>, RenameError> {
        if !self.occupied.contains_key(dir) {
            let io_err = |source| RenameError::Io {
                path: dir.display().to_string(),
                source,
            };
            let mut names = HashSet::new();
            for entry in fs::read_dir(dir).map_err(io_err)? {
                names.insert(entry.map_err(io_err)?.file_name());
            }
            self.occupied.insert(dir.to_path_buf(), names);
        }
        Ok(self
            .occupied
            .entry(dir.to_path_buf())
            .or_default())
    }

    pub fn is_free(&mut self, dir: &Path, name: &OsStr) -> Result<bool, RenameError> {
        let taken = self.names(dir)?.contains(name);
        Ok(!taken && !(self.verify_on_disk && dir.join(name).exists()))
    }

    pub fn claim(&mut self, dir: &Path, from: &OsStr, to: &OsStr) -> Result<(), RenameError> {
        let names = self.names(dir)?;
        names.remove(from);
        names.insert(to.to_os_string());
        Ok(())
    }
}

/// Pick the first free name among `stem.ext`, `stem-1.ext`, `stem-2.ext`, …
pub fn free_target(
    ledger: &mut NameLedger,
    dir: &Path,
    stem: &str,
    extension: &OsStr,
) -> Result<OsString, RenameError> {
    let mut counter = 0u64;
    loop {
        let candidate = file_name_for(stem, counter, extension);
        if ledger.is_free(dir, &candidate)? {
            return Ok(candidate);
        }
        counter += 1;
    }
}

struct Renamer<'a> {
    options: &'a RenameOptions,
    exif: ExifService,
    ledger: NameLedger,
}

impl Renamer<'_> {
    fn rename_one(
        &mut self,
        file: &Path,
        journal: &mut Journal,
    ) -> Result<Option<RenameOutcome>, RenameError> {
        let (Some(dir), Some(current_name), Some(extension), Some(stem)) = (
            file.parent(),
            file.file_name(),
            file.extension(),
            file.file_stem(),
        ) else {
            return Ok(None);
        };

        let resolved = self
            .exif
            .resolve_timestamp(file, self.options.use_local_time)?;
        let target = target_stem(&resolved.datetime, &self.options.pattern)?;

        if is_already_named(&stem.to_string_lossy(), &target) {
            log::debug!("{} already named", file.display());
            return Ok(None);
        }

        let new_name = free_target(&mut self.ledger, dir, &target, extension)?;
        let destination = dir.join(&new_name);

        if !self.options.dry_run {
            fs::rename(file, &destination).map_err(|source| RenameError::Io {
                path: file.display().to_string(),
                source,
            })?;
        }
        self.ledger.claim(dir, current_name, &new_name)?;
        if !self.options.dry_run {
            journal.record_rename(file, &destination)?;
        }

        log::debug!(
            "Renamed {} → {} (from {})",
            file.display(),
            destination.display(),
            resolved.source
        );
        Ok(Some(RenameOutcome {
            from: file.to_path_buf(),
            to: destination,
            source: resolved.source,
        }))
    }
}

/// Rename every file under `root` after its capture date. Per-file failures
/// are collected in the report; the walk continues past them.
pub fn rename_by_date(
    root: &Path,
    options: &RenameOptions,
    journal: &mut Journal,
) -> Result<RenameReport, RenameError> {
    validate_pattern(&options.pattern)?;

    let mut scan_options = ScanOptions {
        require_extension: true,
        extensions: None,
        show_progress: options.show_progress,
    };
    if let Some(extensions) = &options.extensions {
        scan_options = scan_options.with_extensions(extensions);
    }
    let files = discover_files(root, &scan_options)?;

    let progress = if options.show_progress {
        let bar = ProgressBar::new(files.len() as u64);
        if let Ok(style) = ProgressStyle::with_template("{bar:40.cyan/blue} {pos}/{len} {msg}") {
            bar.set_style(style);
        }
        bar
    } else {
        ProgressBar::hidden()
    };

    let mut renamer = Renamer {
        options,
        exif: ExifService::new(),
        ledger: NameLedger::new(!options.dry_run),
    };
    let mut report = RenameReport::default();

    for file in files {
        progress.set_message(
            file.file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default(),
        );
        match renamer.rename_one(&file, journal) {
            Ok(Some(outcome)) => report.renamed.push(outcome),
            Ok(None) => report.unchanged += 1,
            Err(e) => {
                log::error!("Failed to rename {}: {}", file.display(), e);
                report.failed.push((file, e.to_string()));
            }
        }
        progress.inc(1);
    }
    progress.finish_and_clear();

    Ok(report)
}
