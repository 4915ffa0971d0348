//! The SMP container contract: canonical archive paths, internal URIs, and
//! content-type classification.
//!
//! Everything inside an archive is addressed by a relative path; styles
//! reference those paths through `smp://maps.v1/{path}` URIs. A breaking
//! change to the container layout bumps the URI authority (`maps.v2`).

use smp_tile_utils::{TileCoord, TileFormat};

use crate::errors::{SmpError, SmpResult};

/// Scheme + authority prefix of internal URIs.
pub const SMP_URI_PREFIX: &str = "smp://maps.v1/";

/// Container format version written to the `VERSION` entry.
pub const FORMAT_VERSION: &str = "1.0";

/// Major container versions this implementation can read.
pub const SUPPORTED_MAJORS: &[u32] = &[1];

pub const VERSION_PATH: &str = "VERSION";
pub const STYLE_PATH: &str = "style.json";

/// Number of codepoints per glyph range.
pub const GLYPH_RANGE_SIZE: u32 = 256;

/// Start of the last glyph range in the Basic Multilingual Plane.
pub const MAX_GLYPH_START: u32 = 65280;

/// What kind of resource an archive path holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceKind {
    Style,
    Version,
    Tile,
    Glyph,
    Sprite,
}

impl ResourceKind {
    /// Classify an archive path by its location in the container layout.
    pub fn from_path(path: &str) -> SmpResult<Self> {
        let path = strip_uri(path);
        match path {
            STYLE_PATH => Ok(Self::Style),
            VERSION_PATH => Ok(Self::Version),
            p if p.starts_with("s/") => Ok(Self::Tile),
            p if p.starts_with("fonts/") => Ok(Self::Glyph),
            p if p.starts_with("sprites/") => Ok(Self::Sprite),
            p => Err(SmpError::UnknownResourceType(p.to_string())),
        }
    }
}

/// The internal URI for an archive path.
#[must_use]
pub fn smp_uri(path: &str) -> String {
    format!("{SMP_URI_PREFIX}{path}")
}

/// Strip the internal URI prefix, leaving the archive path. Plain archive
/// paths pass through unchanged.
#[must_use]
pub fn strip_uri(path_or_uri: &str) -> &str {
    path_or_uri.strip_prefix(SMP_URI_PREFIX).unwrap_or(path_or_uri)
}

/// Archive path of a tile.
#[must_use]
pub fn tile_path(folder: &str, coord: TileCoord, format: TileFormat) -> String {
    format!(
        "s/{folder}/{}/{}/{}.{}",
        coord.z,
        coord.x,
        coord.y,
        format.file_ext()
    )
}

/// Archive path *template* for a tile source, `{z}/{x}/{y}` left unexpanded.
/// This is what the rewritten style's `tiles` entries contain.
#[must_use]
pub fn tile_path_template(folder: &str, format: TileFormat) -> String {
    format!("s/{folder}/{{z}}/{{x}}/{{y}}.{}", format.file_ext())
}

/// Archive path of a glyph range. `start` must be a multiple of 256.
#[must_use]
pub fn glyph_path(fontstack: &str, start: u32) -> String {
    format!(
        "fonts/{fontstack}/{start}-{}.pbf.gz",
        start + GLYPH_RANGE_SIZE - 1
    )
}

/// Archive path template for glyph ranges, `{fontstack}/{range}` left
/// unexpanded. This is what the rewritten style's `glyphs` field contains.
#[must_use]
pub fn glyph_path_template() -> String {
    "fonts/{fontstack}/{range}.pbf.gz".to_string()
}

/// Archive path of a sprite resource. Pixel ratio 1 has no `@{n}x` suffix;
/// `ext` includes the leading dot (`.json` or `.png`).
#[must_use]
pub fn sprite_path(id: &str, pixel_ratio: u8, ext: &str) -> String {
    let mut path = sprite_base_path(id);
    if pixel_ratio > 1 {
        path.push_str(&format!("@{pixel_ratio}x"));
    }
    path.push_str(ext);
    path
}

/// Archive path of a sprite without ratio suffix or extension. This is what
/// the rewritten style's `sprite` field contains (as an internal URI);
/// renderers append `[@2x]{.json,.png}` themselves.
#[must_use]
pub fn sprite_base_path(id: &str) -> String {
    format!("sprites/{id}/sprite")
}

/// Suffix → content-type table, ordered so that the compressed variants
/// match before their bare counterparts.
const CONTENT_TYPES: &[(&str, &str)] = &[
    (".json", "application/json"),
    (".pbf.gz", "application/x-protobuf"),
    (".pbf", "application/x-protobuf"),
    (".png", "image/png"),
    (".jpg", "image/jpeg"),
    (".webp", "image/webp"),
    (".mvt.gz", "application/x-protobuf"),
    (".mvt", "application/x-protobuf"),
];

/// Content type of an archive path, by ordered suffix match.
pub fn content_type(path: &str) -> SmpResult<&'static str> {
    let path = strip_uri(path);
    if path == VERSION_PATH {
        return Ok("text/plain");
    }
    CONTENT_TYPES
        .iter()
        .find(|(suffix, _)| path.ends_with(suffix))
        .map(|(_, ct)| *ct)
        .ok_or_else(|| SmpError::UnknownContentType(path.to_string()))
}

/// Transfer encoding of an archive path: gzipped entries are served with
/// `Content-Encoding: gzip`.
#[must_use]
pub fn content_encoding(path: &str) -> Option<&'static str> {
    strip_uri(path).ends_with(".gz").then_some("gzip")
}

/// Glyph range starts covering the Basic Multilingual Plane:
/// `0, 256, …, 65280`.
pub fn glyph_range_starts() -> impl Iterator<Item = u32> {
    (0..=MAX_GLYPH_START).step_by(GLYPH_RANGE_SIZE as usize)
}
