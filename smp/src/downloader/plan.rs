//! Deterministic enumeration of everything a download must fetch.
//!
//! Plan order is the archive order: glyphs (base ranges for every font
//! first), then sprites, then tiles ascending by zoom, round-robin across
//! sources within a zoom, row-major within a (zoom, source) rectangle.
//! A reader walking the archive front to back gets a renderable low-zoom
//! map before the deep zoom levels arrive.

use smp_tile_utils::{TileCoord, TileRect, render_tile_url};

use crate::errors::{SmpError, SmpResult};
use crate::mapbox;
use crate::style::{RewriteOutput, TileSourcePlan};
use crate::uri::{GLYPH_RANGE_SIZE, glyph_range_starts};

/// One resource to fetch. Tiles reference their source by index into
/// [`ResourcePlan::tile_sources`].
#[derive(Debug, Clone, PartialEq)]
pub enum ResourceSpec {
    Glyph {
        font: String,
        start: u32,
    },
    Sprite {
        id: String,
        base_url: String,
        pixel_ratio: u8,
        ext: &'static str,
    },
    Tile {
        source: usize,
        coord: TileCoord,
    },
}

/// The full, ordered fetch plan for one download.
#[derive(Debug)]
pub struct ResourcePlan {
    pub tile_sources: Vec<TileSourcePlan>,
    pub glyph_url_template: Option<String>,
    pub access_token: Option<String>,
    pub entries: Vec<ResourceSpec>,
}

impl ResourcePlan {
    /// Build the plan from the rewriter's output.
    #[must_use]
    pub fn build(
        rewrite: &RewriteOutput,
        pixel_ratios: &[u8],
        access_token: Option<String>,
    ) -> Self {
        let mut entries = Vec::new();

        // Base glyph ranges for every font first, then the long tail.
        if rewrite.glyph_url_template.is_some() {
            for start in glyph_range_starts() {
                for font in &rewrite.fonts {
                    entries.push(ResourceSpec::Glyph {
                        font: font.clone(),
                        start,
                    });
                }
            }
        }

        for sprite in &rewrite.sprites {
            for &pixel_ratio in pixel_ratios {
                for ext in [".json", ".png"] {
                    entries.push(ResourceSpec::Sprite {
                        id: sprite.id.clone(),
                        base_url: sprite.url.clone(),
                        pixel_ratio,
                        ext,
                    });
                }
            }
        }

        append_tile_entries(&mut entries, &rewrite.tile_sources);

        Self {
            tile_sources: rewrite.tile_sources.clone(),
            glyph_url_template: rewrite.glyph_url_template.clone(),
            access_token,
            entries,
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of tile entries in the plan.
    #[must_use]
    pub fn tile_count(&self) -> u64 {
        self.entries
            .iter()
            .filter(|e| matches!(e, ResourceSpec::Tile { .. }))
            .count() as u64
    }

    /// The remote URL to fetch for a plan entry, normalized for mapbox.
    pub fn fetch_url(&self, spec: &ResourceSpec) -> SmpResult<String> {
        let token = self.access_token.as_deref();
        match spec {
            ResourceSpec::Tile { source, coord } => {
                let src = &self.tile_sources[*source];
                let url = render_tile_url(&src.templates, *coord, src.scheme);
                mapbox::normalize_url(&url, token)
            }
            ResourceSpec::Glyph { font, start } => {
                let template = self
                    .glyph_url_template
                    .as_deref()
                    .ok_or_else(|| SmpError::InvalidStyle("no glyphs endpoint".to_string()))?;
                let range = format!("{start}-{}", start + GLYPH_RANGE_SIZE - 1);
                let url = template.replace("{fontstack}", font).replace("{range}", &range);
                mapbox::normalize_url(&url, token)
            }
            ResourceSpec::Sprite {
                base_url,
                pixel_ratio,
                ext,
                ..
            } => mapbox::sprite_url(base_url, *pixel_ratio, ext, token),
        }
    }
}

/// Ascending zoom; within a zoom, one tile per source in turn; per source,
/// the covering rectangle row-major.
fn append_tile_entries(entries: &mut Vec<ResourceSpec>, sources: &[TileSourcePlan]) {
    let Some(min_z) = sources.iter().map(|s| s.minzoom).min() else {
        return;
    };
    let max_z = sources.iter().map(|s| s.maxzoom).max().unwrap_or(min_z);

    for z in min_z..=max_z {
        let mut iterators: Vec<_> = sources
            .iter()
            .enumerate()
            .filter(|(_, s)| s.minzoom <= z && z <= s.maxzoom)
            .map(|(i, s)| (i, TileRect::covering(s.bounds, z).coords()))
            .collect();

        loop {
            let mut exhausted = true;
            for (source, coords) in &mut iterators {
                if let Some(coord) = coords.next() {
                    entries.push(ResourceSpec::Tile {
                        source: *source,
                        coord,
                    });
                    exhausted = false;
                }
            }
            if exhausted {
                break;
            }
        }
    }
}
