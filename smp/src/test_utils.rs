//! Shared fixtures for unit tests: a minimal but fully valid SMP.

use std::io::Write as _;

use flate2::Compression;
use flate2::write::GzEncoder;
use serde_json::{Value, json};
use smp_tile_utils::TileCoord;

use crate::writer::Writer;

pub(crate) fn minimal_style() -> Value {
    json!({
        "version": 8,
        "metadata": {
            "smp:bounds": [-10.0, -10.0, 10.0, 10.0],
            "smp:maxzoom": 2
        },
        "glyphs": "smp://maps.v1/fonts/{fontstack}/{range}.pbf.gz",
        "sprite": "smp://maps.v1/sprites/default/sprite",
        "sources": {
            "osm": {
                "type": "vector",
                "tiles": ["smp://maps.v1/s/osm/{z}/{x}/{y}.mvt.gz"],
                "minzoom": 0,
                "maxzoom": 2
            }
        },
        "layers": [{"id": "bg", "type": "background"}]
    })
}

pub(crate) fn gzipped(data: &[u8]) -> Vec<u8> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data).unwrap();
    encoder.finish().unwrap()
}

/// A complete archive the validator accepts without errors or warnings.
pub(crate) fn minimal_smp_bytes() -> Vec<u8> {
    let mut writer = Writer::in_memory(&minimal_style()).unwrap();
    writer
        .add_glyph_range(b"glyph data", "Noto Sans Regular", 0)
        .unwrap();
    for pixel_ratio in [1, 2] {
        writer
            .add_sprite(br#"{"icon":{"width":16}}"#, "default", pixel_ratio, ".json")
            .unwrap();
        writer
            .add_sprite(b"\x89PNG\r\n\x1a\npixels", "default", pixel_ratio, ".png")
            .unwrap();
    }
    for (z, x, y) in [(0, 0, 0), (1, 0, 0), (1, 1, 0), (1, 0, 1), (1, 1, 1)] {
        writer
            .add_tile(&gzipped(b"tile"), "osm", TileCoord { z, x, y })
            .unwrap();
    }
    let finished = writer.finish().unwrap();
    assert!(finished.missing.is_empty());
    finished.inner.into_inner()
}
