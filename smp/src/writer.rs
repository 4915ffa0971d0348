//! Streaming assembly of an SMP archive.
//!
//! The writer owns the entry order contract: `VERSION` and `style.json` go
//! in first (they are known at construction, since the style is rewritten
//! before any resource is fetched), then resources append in the order they
//! arrive. The downloader feeds resources in plan order, which makes the
//! central directory progressive: low zooms and base glyph ranges first.

use std::collections::{HashMap, HashSet};
use std::fs::File;
use std::io::{BufWriter, Cursor, Seek, Write};
use std::path::Path;

use flate2::Compression;
use flate2::write::GzEncoder;
use serde_json::Value;
use smp_tile_utils::{TileCoord, TileFormat, is_gzipped};
use zip::CompressionMethod;
use zip::write::{SimpleFileOptions, ZipWriter};

use crate::errors::{SmpError, SmpResult};
use crate::style::{METADATA_BOUNDS, METADATA_MAXZOOM, check_style};
use crate::uri::{
    FORMAT_VERSION, SMP_URI_PREFIX, STYLE_PATH, VERSION_PATH, glyph_path, sprite_path, tile_path,
};

/// A tile source declared by the style: archive folder plus the format its
/// URL template commits to.
#[derive(Debug, Clone)]
struct DeclaredTileSource {
    id: String,
    folder: String,
    format: TileFormat,
}

/// Internal references captured from the style at construction, checked
/// against actually-added entries at `finish()`.
#[derive(Debug, Default)]
struct DeclaredResources {
    tile_sources: Vec<DeclaredTileSource>,
    sprite_bases: Vec<String>,
    has_glyphs: bool,
}

impl DeclaredResources {
    fn from_style(style: &Value) -> SmpResult<Self> {
        let mut declared = Self::default();

        if let Some(sources) = style.get("sources").and_then(Value::as_object) {
            for (id, source) in sources {
                let Some(template) = source
                    .get("tiles")
                    .and_then(Value::as_array)
                    .and_then(|t| t.first())
                    .and_then(Value::as_str)
                else {
                    continue;
                };
                let Some(path) = template.strip_prefix(SMP_URI_PREFIX) else {
                    continue;
                };
                let Some((prefix, rest)) = path.split_once("{z}") else {
                    return Err(SmpError::InvalidStyle(format!(
                        "internal tile template for source \"{id}\" has no {{z}} placeholder"
                    )));
                };
                let folder = prefix
                    .strip_prefix("s/")
                    .and_then(|p| p.strip_suffix('/'))
                    .ok_or_else(|| {
                        SmpError::InvalidStyle(format!(
                            "internal tile template for source \"{id}\" is not under s/"
                        ))
                    })?;
                let ext = rest.rsplit('.').next().unwrap_or_default();
                let format = match ext {
                    "gz" if rest.ends_with(".mvt.gz") => TileFormat::Mvt,
                    other => TileFormat::parse(other).ok_or_else(|| {
                        SmpError::InvalidStyle(format!(
                            "internal tile template for source \"{id}\" has unknown extension"
                        ))
                    })?,
                };
                declared.tile_sources.push(DeclaredTileSource {
                    id: id.clone(),
                    folder: folder.to_string(),
                    format,
                });
            }
        }

        match style.get("sprite") {
            Some(Value::String(url)) => {
                if let Some(path) = url.strip_prefix(SMP_URI_PREFIX) {
                    declared.sprite_bases.push(path.to_string());
                }
            }
            Some(Value::Array(entries)) => {
                for entry in entries {
                    if let Some(path) = entry
                        .get("url")
                        .and_then(Value::as_str)
                        .and_then(|u| u.strip_prefix(SMP_URI_PREFIX))
                    {
                        declared.sprite_bases.push(path.to_string());
                    }
                }
            }
            _ => {}
        }

        declared.has_glyphs = style
            .get("glyphs")
            .and_then(Value::as_str)
            .is_some_and(|g| g.starts_with(SMP_URI_PREFIX));

        Ok(declared)
    }
}

/// Internal references the style declares but the archive never received.
/// Sparse tile coverage is fine; a source with zero tiles is not.
#[derive(Debug)]
pub struct Finished<W> {
    pub inner: W,
    pub missing: Vec<String>,
}

pub struct Writer<W: Write + Seek> {
    zip: ZipWriter<W>,
    entries: HashSet<String>,
    declared: DeclaredResources,
    formats: HashMap<String, TileFormat>,
}

impl Writer<BufWriter<File>> {
    /// Create an SMP file at `path`, truncating any existing file.
    pub fn create(path: &Path, style: &Value) -> SmpResult<Self> {
        let file = File::create(path)?;
        Self::new(BufWriter::new(file), style)
    }
}

impl Writer<Cursor<Vec<u8>>> {
    /// Write an SMP into an in-memory buffer.
    pub fn in_memory(style: &Value) -> SmpResult<Self> {
        Self::new(Cursor::new(Vec::new()), style)
    }
}

impl<W: Write + Seek> Writer<W> {
    /// Start an archive. The style must already be in SMP-internal form:
    /// it is validated, checked for the required `smp:*` metadata, and
    /// written out (after `VERSION`) before any resource.
    pub fn new(writer: W, style: &Value) -> SmpResult<Self> {
        let messages = check_style(style);
        if !messages.is_empty() {
            return Err(SmpError::InvalidStyle(messages.join("; ")));
        }
        let metadata = style.get("metadata").and_then(Value::as_object);
        let has = |key: &str| metadata.is_some_and(|m| m.contains_key(key));
        if !has(METADATA_BOUNDS) {
            return Err(SmpError::MissingMetadata(METADATA_BOUNDS.to_string()));
        }
        if !has(METADATA_MAXZOOM) {
            return Err(SmpError::MissingMetadata(METADATA_MAXZOOM.to_string()));
        }

        let declared = DeclaredResources::from_style(style)?;
        let formats = declared
            .tile_sources
            .iter()
            .map(|s| (s.folder.clone(), s.format))
            .collect();

        let mut writer = Self {
            zip: ZipWriter::new(writer),
            entries: HashSet::new(),
            declared,
            formats,
        };
        writer.put(VERSION_PATH, format!("{FORMAT_VERSION}\n").as_bytes(), deflated())?;
        writer.put(STYLE_PATH, &serde_json::to_vec(style)?, deflated())?;
        Ok(writer)
    }

    /// Append a tile. The body is sniffed and must match the format the
    /// style committed to for this source; raw (non-gzipped) vector tiles
    /// are gzipped on the way in.
    pub fn add_tile(&mut self, data: &[u8], folder: &str, coord: TileCoord) -> SmpResult<()> {
        let (source_id, expected) = self
            .formats
            .get(folder)
            .map(|f| (folder.to_string(), *f))
            .ok_or_else(|| SmpError::UnknownResourceType(format!("s/{folder}/")))?;

        match TileFormat::detect(data) {
            Some(actual) if actual == expected => {}
            Some(actual) => {
                let id = self
                    .declared
                    .tile_sources
                    .iter()
                    .find(|s| s.folder == *folder)
                    .map_or(source_id, |s| s.id.clone());
                return Err(SmpError::FormatMismatch {
                    source_id: id,
                    expected,
                    actual,
                });
            }
            // Raw MVT carries no magic bytes; anything else unrecognized
            // is a corrupt body.
            None if expected == TileFormat::Mvt => {}
            None => return Err(SmpError::UnknownFileType),
        }

        let path = tile_path(folder, coord, expected);
        if expected == TileFormat::Mvt && !is_gzipped(data) {
            let gzipped = gzip(data)?;
            self.put(&path, &gzipped, stored())
        } else {
            self.put(&path, data, stored())
        }
    }

    /// Append one 256-codepoint glyph range, gzipping if the server served
    /// it raw.
    pub fn add_glyph_range(&mut self, data: &[u8], fontstack: &str, start: u32) -> SmpResult<()> {
        let path = glyph_path(fontstack, start);
        if is_gzipped(data) {
            self.put(&path, data, stored())
        } else {
            let gzipped = gzip(data)?;
            self.put(&path, &gzipped, stored())
        }
    }

    /// Append a sprite resource. `ext` is `.json` (manifest, deflated) or
    /// `.png` (atlas, stored).
    pub fn add_sprite(&mut self, data: &[u8], id: &str, pixel_ratio: u8, ext: &str) -> SmpResult<()> {
        let options = match ext {
            ".json" => deflated(),
            ".png" => stored(),
            other => return Err(SmpError::UnknownContentType(other.to_string())),
        };
        self.put(&sprite_path(id, pixel_ratio, ext), data, options)
    }

    /// Close the central directory and report style references that never
    /// got a matching entry.
    pub fn finish(self) -> SmpResult<Finished<W>> {
        let mut missing = Vec::new();

        for source in &self.declared.tile_sources {
            let prefix = format!("s/{}/", source.folder);
            if !self.entries.iter().any(|e| e.starts_with(&prefix)) {
                missing.push(format!("{prefix}* (source \"{}\")", source.id));
            }
        }
        if self.declared.has_glyphs
            && !self
                .entries
                .iter()
                .any(|e| e.starts_with("fonts/") && e.ends_with(".pbf.gz"))
        {
            missing.push("fonts/*.pbf.gz".to_string());
        }
        for base in &self.declared.sprite_bases {
            for ext in [".json", ".png"] {
                let path = format!("{base}{ext}");
                if !self.entries.contains(&path) {
                    missing.push(path);
                }
            }
        }

        let inner = self.zip.finish()?;
        Ok(Finished { inner, missing })
    }

    fn put(&mut self, path: &str, data: &[u8], options: SimpleFileOptions) -> SmpResult<()> {
        if !self.entries.insert(path.to_string()) {
            return Err(SmpError::DuplicateEntry(path.to_string()));
        }
        self.zip.start_file(path, options)?;
        self.zip.write_all(data)?;
        Ok(())
    }
}

impl<W: Write + Seek> std::fmt::Debug for Writer<W> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Writer")
            .field("entries", &self.entries.len())
            .finish_non_exhaustive()
    }
}

fn deflated() -> SimpleFileOptions {
    SimpleFileOptions::default().compression_method(CompressionMethod::Deflated)
}

fn stored() -> SimpleFileOptions {
    SimpleFileOptions::default().compression_method(CompressionMethod::Stored)
}

fn gzip(data: &[u8]) -> SmpResult<Vec<u8>> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data)?;
    Ok(encoder.finish()?)
}
