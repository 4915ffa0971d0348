#![doc = include_str!("../README.md")]

// Parts of the tile math were adapted from https://github.com/maplibre/martin
// (martin-tile-utils), licensed under MIT OR Apache-2.0.

use std::f64::consts::PI;
use std::fmt::{Display, Formatter, Result};

use serde::{Deserialize, Serialize};

/// circumference of the earth in meters
pub const EARTH_CIRCUMFERENCE: f64 = 40_075_016.685_578_5;

/// radius of the earth in meters
pub const EARTH_RADIUS: f64 = EARTH_CIRCUMFERENCE / 2.0 / PI;

/// Highest latitude covered by Web Mercator tiles
pub const MAX_LAT: f64 = 85.051129;

/// World bounds covered by Web Mercator tiles, `[west, south, east, north]`
pub const MAX_BOUNDS: [f64; 4] = [-180.0, -MAX_LAT, 180.0, MAX_LAT];

pub const MAX_ZOOM: u8 = 30;

mod rectangle;
pub use rectangle::TileRect;
mod template;
pub use template::{render_tile_url, template_prefix};

/// A tile coordinate in the XYZ addressing scheme (y grows south).
#[derive(Debug, Copy, Clone, Hash, PartialEq, Eq)]
pub struct TileCoord {
    pub z: u8,
    pub x: u32,
    pub y: u32,
}

impl Display for TileCoord {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result {
        write!(f, "{}/{}/{}", self.z, self.x, self.y)
    }
}

impl TileCoord {
    /// Checks provided coordinates for validity
    /// before constructing a [`TileCoord`] instance.
    #[must_use]
    pub fn new_checked(z: u8, x: u32, y: u32) -> Option<Self> {
        Self::is_possible_on_zoom_level(z, x, y).then_some(Self { z, x, y })
    }

    /// Checks that zoom `z` is plausibly small and `x`/`y` is possible on said zoom level
    #[must_use]
    pub fn is_possible_on_zoom_level(z: u8, x: u32, y: u32) -> bool {
        if z > MAX_ZOOM {
            return false;
        }

        let side_len = 1_u32 << z;
        x < side_len && y < side_len
    }

    /// The quadkey addressing of this tile, as used by Bing-style tile servers.
    ///
    /// One base-4 digit per zoom level; the empty string at z=0.
    #[must_use]
    pub fn quadkey(&self) -> String {
        let mut key = String::with_capacity(usize::from(self.z));
        for i in (1..=self.z).rev() {
            let mask = 1_u32 << (i - 1);
            let mut digit = 0;
            if self.x & mask != 0 {
                digit += 1;
            }
            if self.y & mask != 0 {
                digit += 2;
            }
            key.push(char::from(b'0' + digit));
        }
        key
    }
}

/// Tile addressing scheme used when rendering URL templates.
///
/// Storage coordinates are always XYZ; TMS only flips `{y}` in URLs.
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Scheme {
    #[default]
    Xyz,
    Tms,
}

/// A tile payload format storable inside an SMP archive.
///
/// Each tile source has exactly one format; mixing formats within a source
/// is malformed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TileFormat {
    Mvt,
    Png,
    Jpeg,
    Webp,
}

impl TileFormat {
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        Some(match value.to_ascii_lowercase().as_str() {
            "pbf" | "mvt" => Self::Mvt,
            "png" => Self::Png,
            "jpg" | "jpeg" => Self::Jpeg,
            "webp" => Self::Webp,
            _ => None?,
        })
    }

    /// Figure out the format of raw tile data from its magic bytes.
    ///
    /// Gzipped payloads are assumed to be MVT; the other formats are
    /// identified by their image container signatures.
    #[must_use]
    pub fn detect(data: &[u8]) -> Option<Self> {
        Some(match data {
            v if v.starts_with(b"\x1f\x8b\x08") => Self::Mvt,
            v if v.starts_with(b"\x89\x50\x4E\x47\x0D\x0A\x1A\x0A") => Self::Png,
            v if v.starts_with(b"\xFF\xD8\xFF") => Self::Jpeg,
            v if v.starts_with(b"RIFF") && v.len() > 11 && &v[8..12] == b"WEBP" => Self::Webp,
            _ => None?,
        })
    }

    #[must_use]
    pub fn content_type(self) -> &'static str {
        match self {
            Self::Mvt => "application/x-protobuf",
            Self::Png => "image/png",
            Self::Jpeg => "image/jpeg",
            Self::Webp => "image/webp",
        }
    }

    /// File extension used for this format inside an SMP archive.
    ///
    /// Vector tiles are always stored gzipped.
    #[must_use]
    pub fn file_ext(self) -> &'static str {
        match self {
            Self::Mvt => "mvt.gz",
            Self::Png => "png",
            Self::Jpeg => "jpg",
            Self::Webp => "webp",
        }
    }
}

impl Display for TileFormat {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result {
        f.write_str(match *self {
            Self::Mvt => "mvt",
            Self::Png => "png",
            Self::Jpeg => "jpg",
            Self::Webp => "webp",
        })
    }
}

/// Whether the payload carries a gzip member header.
#[must_use]
pub fn is_gzipped(data: &[u8]) -> bool {
    data.starts_with(b"\x1f\x8b")
}

/// Bounding box of a tile, `[west, south, east, north]` in WGS84 degrees.
///
/// Latitudes come from the inverse Gudermannian, so z=0 yields
/// `[-180, -85.05…, 180, 85.05…]`.
#[must_use]
pub fn tile_to_bbox(z: u8, x: u32, y: u32) -> [f64; 4] {
    let n = f64::from(1_u32 << z);
    let lon = |x: f64| x / n * 360.0 - 180.0;
    let lat = |y: f64| f64::atan(f64::sinh(PI * (1.0 - 2.0 * y / n))).to_degrees();
    [
        lon(f64::from(x)),
        lat(f64::from(y) + 1.0),
        lon(f64::from(x) + 1.0),
        lat(f64::from(y)),
    ]
}

/// Component-wise union of two bounding boxes.
#[must_use]
pub fn union_bbox(a: [f64; 4], b: [f64; 4]) -> [f64; 4] {
    [
        a[0].min(b[0]),
        a[1].min(b[1]),
        a[2].max(b[2]),
        a[3].max(b[3]),
    ]
}

/// Component-wise intersection of two bounding boxes, `None` when disjoint.
#[must_use]
pub fn intersect_bbox(a: [f64; 4], b: [f64; 4]) -> Option<[f64; 4]> {
    let w = a[0].max(b[0]);
    let s = a[1].max(b[1]);
    let e = a[2].min(b[2]);
    let n = a[3].min(b[3]);
    (w <= e && s <= n).then_some([w, s, e, n])
}

/// Convert longitude and latitude to a tile (x,y) coordinates for a given zoom
#[must_use]
#[expect(clippy::cast_possible_truncation)]
#[expect(clippy::cast_sign_loss)]
pub fn tile_index(lng: f64, lat: f64, zoom: u8) -> (u32, u32) {
    let tile_size = EARTH_CIRCUMFERENCE / f64::from(1_u32 << zoom);
    let (x, y) = wgs84_to_webmercator(lng, lat.clamp(-MAX_LAT, MAX_LAT));
    let col = (((x - (EARTH_CIRCUMFERENCE * -0.5)).abs() / tile_size) as u32).min((1 << zoom) - 1);
    let row = ((((EARTH_CIRCUMFERENCE * 0.5) - y).abs() / tile_size) as u32).min((1 << zoom) - 1);
    (col, row)
}

/// Convert a bounding box to the tile range `(min_x, min_y, max_x, max_y)`
/// covering it at a given zoom. Latitudes are clamped to `±`[`MAX_LAT`].
#[must_use]
pub fn bbox_to_xyz(left: f64, bottom: f64, right: f64, top: f64, zoom: u8) -> (u32, u32, u32, u32) {
    let (min_col, min_row) = tile_index(left, top, zoom);
    let (max_col, max_row) = tile_index(right, bottom, zoom);
    (min_col, min_row, max_col, max_row)
}

/// transform [`WebMercator`](https://epsg.io/3857) to [WGS84](https://epsg.io/4326)
#[must_use]
pub fn webmercator_to_wgs84(x: f64, y: f64) -> (f64, f64) {
    let lng = (x / EARTH_RADIUS).to_degrees();
    let lat = f64::atan(f64::sinh(y / EARTH_RADIUS)).to_degrees();
    (lng, lat)
}

/// transform [WGS84](https://epsg.io/4326) to [`WebMercator`](https://epsg.io/3857)
#[must_use]
pub fn wgs84_to_webmercator(lon: f64, lat: f64) -> (f64, f64) {
    let x = lon * PI / 180.0 * EARTH_RADIUS;

    let y_sin = lat.to_radians().sin();
    let y = EARTH_RADIUS / 2.0 * ((1.0 + y_sin) / (1.0 - y_sin)).ln();

    (x, y)
}
