pub mod duplicate;
pub mod exif;
pub mod hash;
pub mod journal;
pub mod rename;
pub mod scanner;

pub use duplicate::{DeletionPolicy, DuplicateGroup, DuplicateIndex, IndexOptions, remove_duplicates};
pub use exif::{ExifService, ResolvedTimestamp, TimestampSource};
pub use hash::{DigestAlgorithm, HashService};
pub use journal::{Journal, JournalAction, UndoSelection};
pub use rename::{RenameOptions, RenameReport, rename_by_date};
