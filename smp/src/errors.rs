use std::io;
use std::path::PathBuf;

use smp_tile_utils::TileFormat;

use crate::downloader::FetchError;

#[derive(thiserror::Error, Debug)]
pub enum SmpError {
    #[error("File not found: {}", .0.display())]
    FileNotFound(PathBuf),

    #[error("Entry not found in archive: {0}")]
    EntryNotFound(String),

    #[error("Not a valid ZIP archive: {0}")]
    InvalidArchive(String),

    #[error("Invalid style: {0}")]
    InvalidStyle(String),

    #[error("Missing or malformed SMP metadata: {0}")]
    MissingMetadata(String),

    #[error("Unknown file type (unrecognized magic bytes)")]
    UnknownFileType,

    #[error("Unknown content type for path: {0}")]
    UnknownContentType(String),

    #[error("Unknown resource type for path: {0}")]
    UnknownResourceType(String),

    #[error("Unsupported major version: {0}")]
    UnsupportedVersion(String),

    #[error("A mapbox:// URL requires an access token")]
    MissingAccessToken,

    #[error("Only public (pk.*) mapbox access tokens are supported")]
    SecretToken,

    #[error("Resource referenced by the style is missing from the archive: {0}")]
    ResourceMissing(String),

    #[error("Tile format mismatch in source \"{source_id}\": expected {expected}, got {actual}")]
    FormatMismatch {
        source_id: String,
        expected: TileFormat,
        actual: TileFormat,
    },

    #[error("Duplicate archive entry: {0}")]
    DuplicateEntry(String),

    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Io(#[from] io::Error),

    #[error(transparent)]
    Zip(#[from] zip::result::ZipError),
}

impl SmpError {
    /// Whether this error means "the thing is not there", as opposed to
    /// "the thing is there but broken". `EPERM`-style I/O failures count
    /// as not-found for classification purposes.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        match self {
            Self::FileNotFound(_) | Self::EntryNotFound(_) => true,
            Self::Io(e) => matches!(
                e.kind(),
                io::ErrorKind::NotFound | io::ErrorKind::PermissionDenied
            ),
            Self::Zip(zip::result::ZipError::FileNotFound) => true,
            _ => false,
        }
    }
}

pub type SmpResult<T> = Result<T, SmpError>;
