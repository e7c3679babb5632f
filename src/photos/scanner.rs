use image::ImageFormat;
use indicatif::{ProgressBar, ProgressStyle};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use walkdir::{DirEntry, WalkDir};

#[derive(Debug, Error)]
pub enum ScanError {
    #[error("Invalid path: {path}")]
    InvalidPath { path: String },
}

/// Which files a walk should return.
#[derive(Debug, Clone, Default)]
pub struct ScanOptions {
    /// Skip files whose name has no extension
    pub require_extension: bool,
    /// Lowercase extensions to keep; `None` keeps everything
    pub extensions: Option<HashSet<String>>,
    /// Show a spinner while walking
    pub show_progress: bool,
}

impl ScanOptions {
    pub fn with_extensions<I, S>(mut self, extensions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.extensions = Some(
            extensions
                .into_iter()
                .map(|ext| ext.as_ref().trim_start_matches('.').to_lowercase())
                .collect(),
        );
        self
    }

    fn accepts(&self, path: &Path) -> bool {
        let extension = path
            .extension()
            .map(|ext| ext.to_string_lossy().to_lowercase());

        match (&extension, &self.extensions) {
            (None, _) if self.require_extension => false,
            (None, Some(_)) => false,
            (Some(ext), Some(allowed)) => allowed.contains(ext),
            _ => true,
        }
    }
}

fn is_hidden(entry: &DirEntry) -> bool {
    entry.depth() > 0
        && entry
            .file_name()
            .to_str()
            .map(|name| name.starts_with('.'))
            .unwrap_or(false)
}

/// Recursively walk `root` and return matching regular files in a stable,
/// name-sorted order. Hidden files and directories are skipped.
pub fn discover_files(root: &Path, options: &ScanOptions) -> Result<Vec<PathBuf>, ScanError> {
    if !root.exists() {
        return Err(ScanError::InvalidPath {
            path: root.display().to_string(),
        });
    }
    if !root.is_dir() {
        return Err(ScanError::InvalidPath {
            path: format!("{} is not a directory", root.display()),
        });
    }

    let spinner = if options.show_progress {
        let spinner = ProgressBar::new_spinner();
        if let Ok(style) = ProgressStyle::with_template("{spinner:.green} {msg}") {
            spinner.set_style(style);
        }
        spinner.set_message(format!("Scanning {}…", root.display()));
        spinner.enable_steady_tick(Duration::from_millis(100));
        spinner
    } else {
        ProgressBar::hidden()
    };

    let mut files = Vec::new();
    let walker = WalkDir::new(root)
        .follow_links(false)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|entry| !is_hidden(entry));

    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                log::warn!("Skipping unreadable entry: {}", e);
                continue;
            }
        };

        if !entry.file_type().is_file() {
            if entry.file_type().is_dir() {
                log::debug!("Entering {}", entry.path().display());
            }
            continue;
        }

        if options.accepts(entry.path()) {
            files.push(entry.into_path());
        }
        spinner.tick();
    }

    spinner.finish_and_clear();
    log::debug!("Found {} file(s) under {}", files.len(), root.display());
    Ok(files)
}

/// Whether the file's format can carry an embedded metadata block we know
/// how to read.
pub fn supports_embedded_metadata(path: &Path) -> bool {
    match ImageFormat::from_path(path) {
        Ok(
            ImageFormat::Jpeg
            | ImageFormat::Png
            | ImageFormat::Tiff
            | ImageFormat::WebP
            | ImageFormat::Avif,
        ) => true,
        _ => path
            .extension()
            .map(|ext| {
                let ext = ext.to_string_lossy().to_lowercase();
                ext == "heic" || ext == "heif"
            })
            .unwrap_or(false),
    }
}
