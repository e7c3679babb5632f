use crate::photos::scanner::supports_embedded_metadata;
use chrono::{DateTime, Local, NaiveDateTime, Utc};
use exif::{In, Reader, Tag, Value};
use std::fmt;
use std::fs::{self, File};
use std::io::BufReader;
use std::path::Path;
use thiserror::Error;

const EXIF_DATETIME_FORMAT: &str = "%Y:%m:%d %H:%M:%S";

#[derive(Debug, Error)]
pub enum ExifError {
    #[error("IO error reading {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Could not read modification time of {path}: {source}")]
    ModifiedTime {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// Metadata tags that can hold a capture time, in lookup order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureTag {
    DateTimeOriginal,
    DateTimeDigitized,
    DateTime,
}

impl CaptureTag {
    const PRIORITY: [CaptureTag; 3] = [
        CaptureTag::DateTimeOriginal,
        CaptureTag::DateTimeDigitized,
        CaptureTag::DateTime,
    ];

    fn tag(self) -> Tag {
        match self {
            CaptureTag::DateTimeOriginal => Tag::DateTimeOriginal,
            CaptureTag::DateTimeDigitized => Tag::DateTimeDigitized,
            CaptureTag::DateTime => Tag::DateTime,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimestampSource {
    Metadata(CaptureTag),
    ModifiedTime,
}

impl fmt::Display for TimestampSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TimestampSource::Metadata(tag) => write!(f, "{:?}", tag),
            TimestampSource::ModifiedTime => write!(f, "modification time"),
        }
    }
}

/// The timestamp a file will be renamed after, and where it came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolvedTimestamp {
    pub datetime: NaiveDateTime,
    pub source: TimestampSource,
}

/// Service for reading capture times from embedded image metadata
pub struct ExifService;

impl ExifService {
    pub fn new() -> Self {
        Self
    }

    /// Read the capture time from the file's metadata container.
    ///
    /// `Ok(None)` means the file was readable but carries no usable tag;
    /// `Err` means the file itself could not be opened.
    pub fn capture_time(
        &self,
        file_path: &Path,
    ) -> Result<Option<(NaiveDateTime, CaptureTag)>, ExifError> {
        let file = File::open(file_path).map_err(|source| ExifError::Io {
            path: file_path.display().to_string(),
            source,
        })?;
        let mut buf_reader = BufReader::new(file);

        let exif_reader = match Reader::new().read_from_container(&mut buf_reader) {
            Ok(reader) => reader,
            Err(exif::Error::Io(source)) => {
                return Err(ExifError::Io {
                    path: file_path.display().to_string(),
                    source,
                });
            }
            Err(e) => {
                log::debug!("No metadata in {}: {}", file_path.display(), e);
                return Ok(None);
            }
        };

        for capture_tag in CaptureTag::PRIORITY {
            let Some(field) = exif_reader.get_field(capture_tag.tag(), In::PRIMARY) else {
                continue;
            };
            let Some(text) = self.field_to_string(&field.value) else {
                continue;
            };
            match self.parse_exif_datetime(&text) {
                Some(datetime) => return Ok(Some((datetime, capture_tag))),
                None => log::warn!(
                    "Ignoring unparseable {:?} '{}' in {}",
                    capture_tag,
                    text,
                    file_path.display()
                ),
            }
        }

        Ok(None)
    }

    /// Resolve the timestamp to rename a file after: embedded capture time
    /// where available, otherwise the filesystem modification time.
    pub fn resolve_timestamp(
        &self,
        file_path: &Path,
        use_local_time: bool,
    ) -> Result<ResolvedTimestamp, ExifError> {
        if supports_embedded_metadata(file_path) {
            match self.capture_time(file_path) {
                Ok(Some((datetime, tag))) => {
                    return Ok(ResolvedTimestamp {
                        datetime,
                        source: TimestampSource::Metadata(tag),
                    });
                }
                Ok(None) => log::debug!(
                    "{}: no capture tag, using modification time",
                    file_path.display()
                ),
                Err(e) => log::warn!("{}; using modification time", e),
            }
        } else {
            log::debug!(
                "{}: format carries no metadata, using modification time",
                file_path.display()
            );
        }

        let modified = fs::metadata(file_path)
            .and_then(|m| m.modified())
            .map_err(|source| ExifError::ModifiedTime {
                path: file_path.display().to_string(),
                source,
            })?;

        let datetime = if use_local_time {
            DateTime::<Local>::from(modified).naive_local()
        } else {
            DateTime::<Utc>::from(modified).naive_utc()
        };

        Ok(ResolvedTimestamp {
            datetime,
            source: TimestampSource::ModifiedTime,
        })
    }

    fn field_to_string(&self, value: &Value) -> Option<String> {
        match value {
            Value::Ascii(vec) => vec.first().map(|ascii_val| {
                String::from_utf8_lossy(ascii_val)
                    .trim_end_matches('\0')
                    .trim()
                    .to_string()
            }),
            Value::Undefined(data, _) => Some(
                String::from_utf8_lossy(data)
                    .trim_end_matches('\0')
                    .trim()
                    .to_string(),
            ),
            _ => None,
        }
    }

    /// Parse an EXIF datetime (`YYYY:MM:DD HH:MM:SS`). The value has no
    /// timezone, so it stays naive.
    fn parse_exif_datetime(&self, datetime_str: &str) -> Option<NaiveDateTime> {
        NaiveDateTime::parse_from_str(datetime_str, EXIF_DATETIME_FORMAT).ok()
    }
}

impl Default for ExifService {
    fn default() -> Self {
        Self::new()
    }
}
