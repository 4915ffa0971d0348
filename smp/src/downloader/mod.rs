//! The download pipeline: fetch a remote style and everything it
//! references, and stream it into an SMP archive.
//!
//! The flow is style-first: normalize the style URL, fetch and parse it,
//! resolve TileJSON and GeoJSON indirections, rewrite every reference to
//! an internal URI, then fan the resulting resource plan out to workers
//! and feed the writer in plan order.

use std::collections::BTreeSet;
use std::fs::File;
use std::io::{BufWriter, Seek, Write};
use std::path::Path;
use std::time::Duration;

use log::info;

use crate::errors::{SmpError, SmpResult};
use crate::mapbox;
use crate::style::{
    GeoJsonPolicy, RewriteOptions, Source, StyleDocument, rewrite,
};
use crate::writer::Writer;

mod fetch;
mod plan;
mod scheduler;

pub use fetch::{FetchError, FetchedResource, Fetcher, HttpFetcher, StaticFetcher};
pub use plan::{ResourcePlan, ResourceSpec};

pub const DEFAULT_CONCURRENCY: usize = 8;
pub const DEFAULT_RETRIES: usize = 3;
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Everything a download needs to know, set once at the call site.
#[derive(Debug, Clone)]
pub struct DownloadOptions {
    /// Style URL; `mapbox://styles/...` is accepted with an access token.
    pub style_url: String,
    /// Area to cover, `[west, south, east, north]`.
    pub bbox: [f64; 4],
    /// Upper zoom bound; sources with lower maxzoom keep their own.
    pub maxzoom: u8,
    pub access_token: Option<String>,
    /// Number of concurrent fetch workers.
    pub concurrency: usize,
    /// Retry attempts per fetch, on top of the first try.
    pub retries: usize,
    /// Per-fetch timeout.
    pub timeout: Duration,
    /// Fonts available from the glyphs endpoint; empty trusts each stack's
    /// first font.
    pub fonts: Vec<String>,
    /// Sprite pixel-ratio variants to include.
    pub pixel_ratios: Vec<u8>,
    pub geojson: GeoJsonPolicy,
    /// When a fatal error interrupts fetching, finish a partial (still
    /// well-formed) archive instead of propagating the error.
    pub finalize_on_cancel: bool,
}

impl DownloadOptions {
    #[must_use]
    pub fn new(style_url: impl Into<String>, bbox: [f64; 4], maxzoom: u8) -> Self {
        Self {
            style_url: style_url.into(),
            bbox,
            maxzoom,
            access_token: None,
            concurrency: DEFAULT_CONCURRENCY,
            retries: DEFAULT_RETRIES,
            timeout: DEFAULT_TIMEOUT,
            fonts: Vec::new(),
            pixel_ratios: vec![1, 2],
            geojson: GeoJsonPolicy::default(),
            finalize_on_cancel: false,
        }
    }
}

/// What a download did: per-kind counters plus the error/warning surface.
/// Per-resource trouble lands here rather than failing the download; only
/// archive-level problems abort.
#[derive(Debug, Default)]
pub struct DownloadReport {
    pub tiles_written: u64,
    pub tiles_skipped: u64,
    pub glyphs_written: u64,
    pub glyphs_skipped: u64,
    pub sprites_written: u64,
    pub sprites_skipped: u64,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
    /// Sources abandoned mid-download (tile format drift).
    pub failed_sources: BTreeSet<String>,
}

impl DownloadReport {
    /// Whether the package came out without error-level problems.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Download a style and all referenced resources into `output`, returning
/// the finished writer target and the report.
pub async fn download<W, F>(
    options: &DownloadOptions,
    fetcher: &F,
    output: W,
) -> SmpResult<(W, DownloadReport)>
where
    W: Write + Seek,
    F: Fetcher + ?Sized,
{
    let mut report = DownloadReport::default();
    let token = options.access_token.as_deref();

    // The style itself is the one fetch that must succeed.
    let style_url = mapbox::normalize_url(&options.style_url, token)?;
    let resource = fetcher.fetch(&style_url).await?;
    let mut style = StyleDocument::parse(&resource.bytes)?;

    resolve_tilejson(&mut style, fetcher, token, &mut report).await;
    if options.geojson == GeoJsonPolicy::Inline {
        resolve_geojson(&mut style, fetcher, &mut report).await;
    }

    let mut rewrite_options = RewriteOptions::new(options.bbox, options.maxzoom);
    rewrite_options.fonts = options.fonts.clone();
    rewrite_options.pixel_ratios = options.pixel_ratios.clone();
    rewrite_options.geojson = options.geojson;
    let rewritten = rewrite(&mut style, &rewrite_options)?;
    report.warnings.extend(rewritten.warnings.iter().cloned());

    let style_value = serde_json::to_value(&style)?;
    let mut writer = Writer::new(output, &style_value)?;
    let plan = ResourcePlan::build(
        &rewritten,
        &options.pixel_ratios,
        options.access_token.clone(),
    );
    info!(
        "Downloading {} resources ({} tiles) for {}",
        plan.len(),
        plan.tile_count(),
        options.style_url
    );

    match scheduler::run(&plan, fetcher, &mut writer, &mut report, options.concurrency).await {
        Ok(()) => {}
        Err(err) if options.finalize_on_cancel => {
            report.errors.push(err.to_string());
        }
        Err(err) => return Err(err),
    }

    let finished = writer.finish()?;
    for missing in finished.missing {
        if let Some(id) = sprite_id_of_path(&missing) {
            // The scheduler already reported failed 1x sprites.
            if report.errors.iter().any(|e| e.contains(&format!("\"{id}\""))) {
                continue;
            }
        }
        report.errors.push(format!("No archive entries for {missing}"));
    }

    Ok((finished.inner, report))
}

/// Download straight to a file.
pub async fn download_to_path<F>(
    options: &DownloadOptions,
    fetcher: &F,
    path: &Path,
) -> SmpResult<DownloadReport>
where
    F: Fetcher + ?Sized,
{
    let file = BufWriter::new(File::create(path)?);
    let (mut output, report) = download(options, fetcher, file).await?;
    output.flush()?;
    Ok(report)
}

fn sprite_id_of_path(path: &str) -> Option<&str> {
    path.strip_prefix("sprites/")?.split('/').next()
}

/// Fetch TileJSON for `url`-only tile sources and inline it. Failures keep
/// the source template-less, which the rewriter then drops with a warning.
async fn resolve_tilejson<F: Fetcher + ?Sized>(
    style: &mut StyleDocument,
    fetcher: &F,
    token: Option<&str>,
    report: &mut DownloadReport,
) {
    for (id, source) in &mut style.sources {
        let tile_source = match source {
            Source::Vector(s) | Source::Raster(s) => s,
            _ => continue,
        };
        if !tile_source.tiles.is_empty() {
            continue;
        }
        let Some(url) = tile_source.url.clone() else {
            continue;
        };

        let fetched = match mapbox::normalize_url(&url, token) {
            Ok(url) => fetcher.fetch(&url).await.map_err(SmpError::from),
            Err(err) => Err(err),
        };
        match fetched.and_then(|r| {
            serde_json::from_slice::<tilejson::TileJSON>(&r.bytes)
                .map_err(SmpError::from)
        }) {
            Ok(tilejson) => tile_source.inline_tilejson(&tilejson),
            Err(err) => report
                .warnings
                .push(format!("Failed to resolve TileJSON for source \"{id}\": {err}")),
        }
    }
}

/// Fetch and inline GeoJSON `data` URLs. Failures leave the URL in place,
/// which the rewriter then drops with a warning.
async fn resolve_geojson<F: Fetcher + ?Sized>(
    style: &mut StyleDocument,
    fetcher: &F,
    report: &mut DownloadReport,
) {
    for (id, source) in &mut style.sources {
        let Source::GeoJson(geojson) = source else {
            continue;
        };
        let Some(url) = geojson.data.as_str().map(ToString::to_string) else {
            continue;
        };

        let fetched = fetcher.fetch(&url).await.map_err(SmpError::from);
        match fetched.and_then(|r| {
            serde_json::from_slice::<serde_json::Value>(&r.bytes)
                .map_err(SmpError::from)
        }) {
            Ok(data) => geojson.data = data,
            Err(err) => report
                .warnings
                .push(format!("Failed to inline GeoJSON for source \"{id}\": {err}")),
        }
    }
}
