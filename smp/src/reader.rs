//! Random-access reads from an existing SMP archive.

use std::fs::File;
use std::io::{BufReader, Cursor, Read, Seek};
use std::path::Path;
use std::sync::Mutex;

use serde_json::Value;
use zip::ZipArchive;

use crate::errors::{SmpError, SmpResult};
use crate::uri::{STYLE_PATH, VERSION_PATH, content_encoding, content_type, strip_uri};

/// One resource pulled out of the archive.
#[derive(Debug, Clone)]
pub struct SmpResource {
    pub data: Vec<u8>,
    pub content_type: &'static str,
    /// `gzip` for entries stored pre-compressed (`.gz` paths).
    pub content_encoding: Option<&'static str>,
}

/// An opened SMP archive.
///
/// ZIP handles do not support concurrent random access, so lookups
/// serialize on an internal mutex; each call is independent and there are
/// no cross-call ordering guarantees.
pub struct Reader<R: Read + Seek> {
    archive: Mutex<Option<ZipArchive<R>>>,
}

impl Reader<BufReader<File>> {
    /// Open an SMP file. On any failure the file handle is released
    /// before returning.
    pub fn open(path: &Path) -> SmpResult<Self> {
        let file = File::open(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                SmpError::FileNotFound(path.to_path_buf())
            } else {
                SmpError::Io(e)
            }
        })?;
        Self::from_reader(BufReader::new(file))
    }
}

impl Reader<Cursor<Vec<u8>>> {
    /// Open an in-memory SMP archive.
    pub fn from_bytes(bytes: Vec<u8>) -> SmpResult<Self> {
        Self::from_reader(Cursor::new(bytes))
    }
}

impl<R: Read + Seek> Reader<R> {
    pub fn from_reader(reader: R) -> SmpResult<Self> {
        // A parse failure drops `reader` right here, closing any file
        // descriptor behind it.
        let archive = ZipArchive::new(reader)
            .map_err(|e| SmpError::InvalidArchive(e.to_string()))?;
        Ok(Self {
            archive: Mutex::new(Some(archive)),
        })
    }

    /// The container version string (`"1.0"`), if a VERSION entry exists.
    pub fn version(&self) -> SmpResult<Option<String>> {
        match self.read_entry(VERSION_PATH) {
            Ok(data) => Ok(Some(String::from_utf8_lossy(&data).trim().to_string())),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// The parsed `style.json`.
    pub fn style(&self) -> SmpResult<Value> {
        let data = self.read_entry(STYLE_PATH)?;
        serde_json::from_slice(&data).map_err(|e| SmpError::InvalidStyle(e.to_string()))
    }

    /// Fetch a resource by archive path or `smp://maps.v1/` URI.
    pub fn resource(&self, path_or_uri: &str) -> SmpResult<SmpResource> {
        let path = strip_uri(path_or_uri);
        let content_type = content_type(path)?;
        let data = self.read_entry(path)?;
        Ok(SmpResource {
            data,
            content_type,
            content_encoding: content_encoding(path),
        })
    }

    /// Names of all entries, in central-directory order.
    pub fn entry_names(&self) -> SmpResult<Vec<String>> {
        let mut guard = self.lock()?;
        let archive = guard.as_mut().ok_or_else(closed)?;
        Ok((0..archive.len())
            .filter_map(|i| archive.by_index(i).ok().map(|f| f.name().to_string()))
            .collect())
    }

    /// Release the underlying handle. Idempotent; any later read fails
    /// with a not-found style error.
    pub fn close(&self) {
        if let Ok(mut guard) = self.archive.lock() {
            *guard = None;
        }
    }

    fn read_entry(&self, path: &str) -> SmpResult<Vec<u8>> {
        let mut guard = self.lock()?;
        let archive = guard.as_mut().ok_or_else(closed)?;
        let mut entry = archive.by_name(path).map_err(|e| match e {
            zip::result::ZipError::FileNotFound => SmpError::EntryNotFound(path.to_string()),
            other => SmpError::from(other),
        })?;
        let mut data = Vec::with_capacity(usize::try_from(entry.size()).unwrap_or(0));
        entry.read_to_end(&mut data)?;
        Ok(data)
    }

    fn lock(&self) -> SmpResult<std::sync::MutexGuard<'_, Option<ZipArchive<R>>>> {
        self.archive
            .lock()
            .map_err(|_| SmpError::InvalidArchive("archive lock poisoned".to_string()))
    }
}

fn closed() -> SmpError {
    SmpError::EntryNotFound("archive is closed".to_string())
}

impl<R: Read + Seek> std::fmt::Debug for Reader<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reader").finish_non_exhaustive()
    }
}
