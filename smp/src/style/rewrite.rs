//! Rewrites a remote style into its SMP-internal form.
//!
//! The rewriter runs after TileJSON/GeoJSON references have been resolved
//! and before any tile is fetched: it decides what the package will
//! contain, points every reference at an internal URI, and reports what
//! the downloader has to go fetch.

use std::collections::{BTreeMap, HashSet};

use serde_json::Value;
use smp_tile_utils::{MAX_BOUNDS, Scheme, TileFormat, intersect_bbox, union_bbox};

use crate::errors::SmpResult;
use crate::style::{Source, StyleDocument};
use crate::uri::{glyph_path_template, smp_uri, sprite_base_path, tile_path_template};

/// What to do with `geojson` sources whose `data` is a URL.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum GeoJsonPolicy {
    /// Fetch the URL and inline the GeoJSON into the style.
    #[default]
    Inline,
    /// Drop the source from the package.
    Drop,
}

/// Maxzoom recorded for packages whose only sources are inline GeoJSON.
const GEOJSON_MAXZOOM: u8 = 16;

#[derive(Debug, Clone)]
pub struct RewriteOptions {
    /// Area the package covers, `[west, south, east, north]`.
    pub bbox: [f64; 4],
    /// Upper zoom bound requested for the package.
    pub maxzoom: u8,
    /// Fonts available from the glyphs endpoint. Empty means "trust each
    /// stack's first font".
    pub fonts: Vec<String>,
    /// Sprite pixel-ratio variants to include.
    pub pixel_ratios: Vec<u8>,
    pub geojson: GeoJsonPolicy,
}

impl RewriteOptions {
    #[must_use]
    pub fn new(bbox: [f64; 4], maxzoom: u8) -> Self {
        Self {
            bbox,
            maxzoom,
            fonts: Vec::new(),
            pixel_ratios: vec![1, 2],
            geojson: GeoJsonPolicy::default(),
        }
    }
}

/// Everything the downloader needs to fetch for one tile source.
#[derive(Debug, Clone)]
pub struct TileSourcePlan {
    pub id: String,
    /// Archive folder under `s/`; usually the source id, sanitized.
    pub folder: String,
    /// The original remote URL templates.
    pub templates: Vec<String>,
    pub scheme: Scheme,
    pub format: TileFormat,
    /// Effective coverage: request bbox ∩ source bounds, Mercator-clamped.
    pub bounds: [f64; 4],
    pub minzoom: u8,
    /// Stored maxzoom: source maxzoom clamped to the requested maxzoom.
    pub maxzoom: u8,
}

/// One sprite to fetch: the style-level id and the remote base URL.
#[derive(Debug, Clone)]
pub struct SpriteFetch {
    pub id: String,
    pub url: String,
}

#[derive(Debug)]
pub struct RewriteOutput {
    pub tile_sources: Vec<TileSourcePlan>,
    /// Single fonts to fetch glyph ranges for, in order of first use.
    pub fonts: Vec<String>,
    /// The original remote glyphs URL template, when the style has one.
    pub glyph_url_template: Option<String>,
    pub sprites: Vec<SpriteFetch>,
    /// Union coverage recorded as `smp:bounds`.
    pub bounds: [f64; 4],
    /// Package maxzoom recorded as `smp:maxzoom`.
    pub maxzoom: u8,
    pub warnings: Vec<String>,
}

/// Rewrite `style` in place and report the fetch plan inputs.
pub fn rewrite(style: &mut StyleDocument, options: &RewriteOptions) -> SmpResult<RewriteOutput> {
    let mut warnings = Vec::new();
    let mut tile_sources = Vec::new();
    let mut folders = FolderNames::default();
    let mut geojson_bboxes = Vec::new();

    enum Action {
        Tile,
        KeepGeoJson(Option<[f64; 4]>),
        Drop(String),
    }

    let source_ids: Vec<String> = style.sources.keys().cloned().collect();
    for id in source_ids {
        let action = match style.sources.get(&id).expect("id from keys") {
            Source::Vector(_) | Source::Raster(_) => Action::Tile,
            Source::GeoJson(source) => {
                if source.data.is_string() {
                    // Inline policy resolves URLs before the rewrite; a URL
                    // surviving to this point cannot be packaged.
                    Action::Drop(format!(
                        "Dropping geojson source \"{id}\" with unresolved URL data"
                    ))
                } else {
                    Action::KeepGeoJson(source.data_bbox())
                }
            }
            Source::Other(value) => {
                let kind = value
                    .get("type")
                    .and_then(Value::as_str)
                    .unwrap_or("unknown");
                Action::Drop(format!(
                    "Dropping unsupported source \"{id}\" of type \"{kind}\""
                ))
            }
        };

        match action {
            Action::Tile => {
                match plan_tile_source(style, &id, options, &mut folders, &mut warnings) {
                    Some(plan) => tile_sources.push(plan),
                    None => {
                        style.sources.remove(&id);
                    }
                }
            }
            Action::KeepGeoJson(bbox) => geojson_bboxes.extend(bbox),
            Action::Drop(warning) => {
                warnings.push(warning);
                style.sources.remove(&id);
            }
        }
    }

    let has_geojson = style
        .sources
        .values()
        .any(|s| matches!(s, Source::GeoJson(_)));

    // Fonts: replace every stack with a single font and remember which
    // fonts the downloader must fetch glyph ranges for.
    let stacks = style.font_stacks();
    let available = if options.fonts.is_empty() {
        stacks.iter().filter_map(|s| s.first().cloned()).collect()
    } else {
        options.fonts.clone()
    };
    style.replace_font_stacks(&available);

    let mut fonts = Vec::new();
    for replaced in style.font_stacks() {
        for font in replaced {
            if !fonts.contains(&font) {
                fonts.push(font);
            }
        }
    }

    let glyph_url_template = style.glyphs.take();
    if glyph_url_template.is_some() {
        style.glyphs = Some(smp_uri(&glyph_path_template()));
    } else if !fonts.is_empty() {
        warnings.push("Style uses text-font but declares no glyphs endpoint".to_string());
        fonts.clear();
    }

    // Sprites: remember the remote URLs, point the style at internal ones.
    let mut sprites = Vec::new();
    if let Some(sprite) = &mut style.sprite {
        for (id, url) in sprite.entries() {
            sprites.push(SpriteFetch { id, url });
        }
        *sprite = match sprite {
            super::SpriteDef::Single(_) => {
                super::SpriteDef::Single(smp_uri(&sprite_base_path(super::DEFAULT_SPRITE_ID)))
            }
            super::SpriteDef::Multi(specs) => super::SpriteDef::Multi(
                specs
                    .iter()
                    .map(|s| super::SpriteSpec {
                        id: s.id.clone(),
                        url: smp_uri(&sprite_base_path(&s.id)),
                    })
                    .collect(),
            ),
        };
    }

    // Package metadata: coverage union and the highest stored zoom.
    let mut bounds: Option<[f64; 4]> = None;
    for plan in &tile_sources {
        bounds = Some(bounds.map_or(plan.bounds, |b| union_bbox(b, plan.bounds)));
    }
    for bbox in geojson_bboxes {
        bounds = Some(bounds.map_or(bbox, |b| union_bbox(b, bbox)));
    }
    let bounds = bounds.unwrap_or(options.bbox);

    let maxzoom = tile_sources
        .iter()
        .map(|p| p.maxzoom)
        .max()
        .unwrap_or(if has_geojson { GEOJSON_MAXZOOM } else { options.maxzoom })
        .min(options.maxzoom);

    let folder_map: BTreeMap<String, String> = tile_sources
        .iter()
        .map(|p| (p.id.clone(), p.folder.clone()))
        .collect();
    let renamed = folder_map.iter().any(|(id, folder)| id != folder);
    style.set_smp_metadata(bounds, maxzoom, renamed.then_some(&folder_map));

    Ok(RewriteOutput {
        tile_sources,
        fonts,
        glyph_url_template,
        sprites,
        bounds,
        maxzoom,
        warnings,
    })
}

/// Compute the fetch plan for one vector/raster source and rewrite it to
/// the internal template. `None` drops the source (nothing to package).
fn plan_tile_source(
    style: &mut StyleDocument,
    id: &str,
    options: &RewriteOptions,
    folders: &mut FolderNames,
    warnings: &mut Vec<String>,
) -> Option<TileSourcePlan> {
    let (source, is_vector) = match style.sources.get_mut(id).expect("caller checked") {
        Source::Vector(s) => (s, true),
        Source::Raster(s) => (s, false),
        _ => unreachable!("caller checked source type"),
    };

    if source.tiles.is_empty() {
        warnings.push(format!("Dropping tile source \"{id}\" with no URL templates"));
        return None;
    }

    let format = if is_vector {
        TileFormat::Mvt
    } else {
        raster_format(source).unwrap_or_else(|| {
            warnings.push(format!(
                "Source \"{id}\" declares no tile format, assuming png"
            ));
            TileFormat::Png
        })
    };

    let source_bounds = source.bounds.unwrap_or(MAX_BOUNDS);
    let Some(bounds) = intersect_bbox(options.bbox, source_bounds)
        .and_then(|b| intersect_bbox(b, MAX_BOUNDS))
    else {
        warnings.push(format!(
            "Dropping tile source \"{id}\": bounds do not intersect the requested area"
        ));
        return None;
    };

    let minzoom = source.minzoom.unwrap_or(0);
    let maxzoom = source.maxzoom.unwrap_or(options.maxzoom).min(options.maxzoom);
    if minzoom > maxzoom {
        warnings.push(format!(
            "Dropping tile source \"{id}\": minzoom {minzoom} is above the stored maxzoom {maxzoom}"
        ));
        return None;
    }

    let folder = folders.assign(id);
    let plan = TileSourcePlan {
        id: id.to_string(),
        folder: folder.clone(),
        templates: std::mem::take(&mut source.tiles),
        scheme: source.scheme(),
        format,
        bounds,
        minzoom,
        maxzoom,
    };

    source.tiles = vec![smp_uri(&tile_path_template(&folder, format))];
    source.url = None;
    // Internal tiles are always XYZ regardless of the remote scheme.
    source.scheme = None;
    source.bounds = Some(bounds);
    source.minzoom = Some(minzoom);
    source.maxzoom = Some(maxzoom);

    Some(plan)
}

/// Declared raster format: TileJSON `format` field first, template
/// extension second.
fn raster_format(source: &super::TileSource) -> Option<TileFormat> {
    if let Some(format) = source.extra.get("format").and_then(Value::as_str) {
        if let Some(format) = TileFormat::parse(format) {
            return Some(format);
        }
    }
    let template = source.tiles.first()?;
    let ext = template.rsplit('.').next()?;
    // strip a query string from the extension, e.g. ".png?key=x"
    let ext = ext.split(['?', '#']).next()?;
    TileFormat::parse(ext)
}

/// Allocates unique archive folder names for source ids.
#[derive(Default)]
struct FolderNames {
    used: HashSet<String>,
}

impl FolderNames {
    fn assign(&mut self, id: &str) -> String {
        let base: String = id
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                    c
                } else {
                    '_'
                }
            })
            .collect();
        let base = if base.is_empty() { "source".to_string() } else { base };

        let mut candidate = base.clone();
        let mut n = 1;
        while !self.used.insert(candidate.clone()) {
            n += 1;
            candidate = format!("{base}-{n}");
        }
        candidate
    }
}
