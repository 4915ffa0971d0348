//! Bounded-concurrency execution of a resource plan.
//!
//! One orchestrator drives N workers over a bounded work queue. Workers
//! only fetch; every write goes through the orchestrator, which holds an
//! explicit reorder buffer so the archive receives entries in plan order
//! no matter how fetches complete. The buffer is bounded: the orchestrator
//! stops issuing work while `issued - written` reaches the cap, which
//! backpressures the whole pipeline on the slowest missing fetch.

use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};
use std::io::{Seek, Write};
use std::time::{Duration, Instant};

use futures::future::try_join_all;
use log::{debug, info, warn};
use tokio::sync::mpsc;

use crate::downloader::fetch::{FetchError, FetchedResource, Fetcher};
use crate::downloader::plan::{ResourcePlan, ResourceSpec};
use crate::downloader::DownloadReport;
use crate::errors::{SmpError, SmpResult};
use crate::writer::Writer;

const PROGRESS_REPORT_EVERY: Duration = Duration::from_secs(2);

/// Reorder-buffer bound, as a multiple of the worker count.
const IN_FLIGHT_FACTOR: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Fetching,
    Draining,
    Finalizing,
}

type Outcome = Result<FetchedResource, FetchError>;

/// Fetch every plan entry and feed the writer in plan order.
pub(crate) async fn run<W: Write + Seek, F: Fetcher + ?Sized>(
    plan: &ResourcePlan,
    fetcher: &F,
    writer: &mut Writer<W>,
    report: &mut DownloadReport,
    concurrency: usize,
) -> SmpResult<()> {
    let concurrency = concurrency.max(1);
    let max_in_flight = concurrency * IN_FLIGHT_FACTOR;
    let total = plan.entries.len();

    let (work_tx, work_rx) = flume::bounded::<(usize, ResourceSpec)>(concurrency);
    let (done_tx, mut done_rx) = mpsc::channel::<(usize, ResourceSpec, Outcome)>(max_in_flight);

    let worker = |work_rx: flume::Receiver<(usize, ResourceSpec)>,
                  done_tx: mpsc::Sender<(usize, ResourceSpec, Outcome)>| async move {
        while let Ok((index, spec)) = work_rx.recv_async().await {
            let outcome = fetch_entry(plan, fetcher, &spec).await;
            if done_tx.send((index, spec, outcome)).await.is_err() {
                // Orchestrator is gone; the download was cancelled.
                break;
            }
        }
        Ok::<(), SmpError>(())
    };
    let workers = try_join_all((0..concurrency).map(|_| worker(work_rx.clone(), done_tx.clone())));
    drop(work_rx);
    drop(done_tx);

    let orchestrator = async {
        let mut progress = Progress::new(plan.tile_count());
        let mut pending: BTreeMap<usize, (ResourceSpec, Outcome)> = BTreeMap::new();
        let mut next_to_issue = 0_usize;
        let mut next_expected = 0_usize;
        let mut phase = Phase::Fetching;

        while next_expected < total {
            while next_to_issue < total && next_to_issue - next_expected < max_in_flight {
                let spec = plan.entries[next_to_issue].clone();
                if work_tx.send_async((next_to_issue, spec)).await.is_err() {
                    return Err(SmpError::Io(std::io::Error::new(
                        std::io::ErrorKind::BrokenPipe,
                        "fetch workers stopped unexpectedly",
                    )));
                }
                next_to_issue += 1;
            }
            if phase == Phase::Fetching && next_to_issue == total {
                debug!("scheduler: all {total} entries issued, draining");
                phase = Phase::Draining;
            }

            let Some((index, spec, outcome)) = done_rx.recv().await else {
                break;
            };
            pending.insert(index, (spec, outcome));
            while let Some((spec, outcome)) = pending.remove(&next_expected) {
                handle_completed(plan, writer, report, &mut progress, spec, outcome)?;
                next_expected += 1;
            }
            progress.maybe_report();
        }

        phase = Phase::Finalizing;
        debug!("scheduler: entering {phase:?}");
        drop(work_tx);
        if progress.total > 0 {
            info!("{progress}");
        }
        Ok::<(), SmpError>(())
    };

    let (_, ()) = tokio::try_join!(workers, orchestrator)?;
    Ok(())
}

async fn fetch_entry<F: Fetcher + ?Sized>(
    plan: &ResourcePlan,
    fetcher: &F,
    spec: &ResourceSpec,
) -> Outcome {
    let url = plan.fetch_url(spec).map_err(|e| FetchError::Network {
        url: String::new(),
        message: e.to_string(),
    })?;
    fetcher.fetch(&url).await
}

/// Apply the per-resource failure policy and hand successes to the writer.
/// Only archive-level failures propagate.
fn handle_completed<W: Write + Seek>(
    plan: &ResourcePlan,
    writer: &mut Writer<W>,
    report: &mut DownloadReport,
    progress: &mut Progress,
    spec: ResourceSpec,
    outcome: Outcome,
) -> SmpResult<()> {
    match spec {
        ResourceSpec::Tile { source, coord } => {
            let src = &plan.tile_sources[source];
            if report.failed_sources.contains(&src.id) {
                progress.skipped += 1;
                report.tiles_skipped += 1;
                return Ok(());
            }
            match outcome {
                Ok(resource) => match writer.add_tile(&resource.bytes, &src.folder, coord) {
                    Ok(()) => {
                        progress.written += 1;
                        report.tiles_written += 1;
                    }
                    Err(err @ SmpError::FormatMismatch { .. }) => {
                        report.errors.push(err.to_string());
                        report.failed_sources.insert(src.id.clone());
                        progress.skipped += 1;
                        report.tiles_skipped += 1;
                    }
                    Err(SmpError::UnknownFileType) => {
                        warn!("Skipping tile {coord} of source \"{}\": unrecognized body", src.id);
                        progress.skipped += 1;
                        report.tiles_skipped += 1;
                    }
                    Err(err) => return Err(err),
                },
                Err(err) if err.is_not_found() => {
                    // Sparse coverage is normal; servers 404 empty tiles.
                    progress.skipped += 1;
                    report.tiles_skipped += 1;
                }
                Err(err) => {
                    warn!("Skipping tile {coord} of source \"{}\": {err}", src.id);
                    report.warnings.push(err.to_string());
                    progress.skipped += 1;
                    report.tiles_skipped += 1;
                }
            }
        }
        ResourceSpec::Glyph { font, start } => match outcome {
            Ok(resource) => {
                writer.add_glyph_range(&resource.bytes, &font, start)?;
                report.glyphs_written += 1;
            }
            Err(err) => {
                if !err.is_not_found() {
                    warn!("Skipping glyph range {start} of \"{font}\": {err}");
                    report.warnings.push(err.to_string());
                }
                report.glyphs_skipped += 1;
            }
        },
        ResourceSpec::Sprite {
            id,
            pixel_ratio,
            ext,
            ..
        } => match outcome {
            Ok(resource) => {
                writer.add_sprite(&resource.bytes, &id, pixel_ratio, ext)?;
                report.sprites_written += 1;
            }
            Err(err) if pixel_ratio == 1 => {
                // A sprite without its 1x variants cannot render at all.
                report
                    .errors
                    .push(format!("Missing required sprite resource for \"{id}\": {err}"));
                report.sprites_skipped += 1;
            }
            Err(err) => {
                warn!("Skipping sprite \"{id}\" @{pixel_ratio}x{ext}: {err}");
                report.warnings.push(err.to_string());
                report.sprites_skipped += 1;
            }
        },
    }
    Ok(())
}

/// Periodic progress line for long tile crawls.
struct Progress {
    start_time: Instant,
    last_reported: Instant,
    total: u64,
    written: u64,
    skipped: u64,
}

impl Progress {
    fn new(total: u64) -> Self {
        let now = Instant::now();
        Self {
            start_time: now,
            last_reported: now,
            total,
            written: 0,
            skipped: 0,
        }
    }

    fn maybe_report(&mut self) {
        if self.total > 0 && self.last_reported.elapsed() > PROGRESS_REPORT_EVERY {
            info!("{self}");
            self.last_reported = Instant::now();
        }
    }
}

impl Display for Progress {
    #[expect(clippy::cast_precision_loss)]
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let elapsed = self.start_time.elapsed();
        let done = self.written + self.skipped;
        let percent = if self.total > 0 { done * 100 / self.total } else { 100 };
        let speed = if elapsed.as_secs_f32() > 0.0 {
            done as f32 / elapsed.as_secs_f32()
        } else {
            0.0
        };
        write!(
            f,
            "[{elapsed:.1?}] {percent}% @ {speed:.1}/s | ✓ {} □ {}",
            self.written, self.skipped
        )
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use flate2::Compression;
    use flate2::write::GzEncoder;
    use serde_json::json;
    use smp_tile_utils::{Scheme, TileFormat};

    use super::*;
    use crate::downloader::fetch::StaticFetcher;
    use crate::style::{RewriteOutput, SpriteFetch, TileSourcePlan};
    use crate::writer::Writer;

    fn gzipped(data: &[u8]) -> Vec<u8> {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        std::io::Write::write_all(&mut encoder, data).unwrap();
        encoder.finish().unwrap()
    }

    fn test_plan() -> ResourcePlan {
        let rewrite = RewriteOutput {
            tile_sources: vec![TileSourcePlan {
                id: "osm".to_string(),
                folder: "osm".to_string(),
                templates: vec!["https://t.example.com/{z}/{x}/{y}.mvt".to_string()],
                scheme: Scheme::Xyz,
                format: TileFormat::Mvt,
                bounds: [-179.0, -80.0, 179.0, 80.0],
                minzoom: 0,
                maxzoom: 1,
            }],
            fonts: Vec::new(),
            glyph_url_template: None,
            sprites: vec![SpriteFetch {
                id: "default".to_string(),
                url: "https://s.example.com/base".to_string(),
            }],
            bounds: [-179.0, -80.0, 179.0, 80.0],
            maxzoom: 1,
            warnings: Vec::new(),
        };
        ResourcePlan::build(&rewrite, &[1], None)
    }

    fn test_style() -> serde_json::Value {
        json!({
            "version": 8,
            "metadata": {"smp:bounds": [-179.0, -80.0, 179.0, 80.0], "smp:maxzoom": 1},
            "sprite": "smp://maps.v1/sprites/default/sprite",
            "sources": {
                "osm": {"type": "vector", "tiles": ["smp://maps.v1/s/osm/{z}/{x}/{y}.mvt.gz"]}
            },
            "layers": []
        })
    }

    #[tokio::test]
    async fn test_writes_in_plan_order_despite_gaps() {
        let mut fetcher = StaticFetcher::new();
        // tile (1,1,0) and (1,0,1) missing -> 404 -> silently skipped
        for (z, x, y) in [(0, 0, 0), (1, 0, 0), (1, 1, 1)] {
            fetcher.insert(
                &format!("https://t.example.com/{z}/{x}/{y}.mvt"),
                gzipped(b"tile"),
                "application/x-protobuf",
            );
        }
        fetcher.insert("https://s.example.com/base.json", br#"{}"#.as_slice(), "application/json");
        fetcher.insert(
            "https://s.example.com/base.png",
            b"\x89PNG\r\n\x1a\n....".as_slice(),
            "image/png",
        );

        let plan = test_plan();
        let mut writer = Writer::in_memory(&test_style()).unwrap();
        let mut report = DownloadReport::default();
        run(&plan, &fetcher, &mut writer, &mut report, 4).await.unwrap();

        assert_eq!(report.tiles_written, 3);
        assert_eq!(report.tiles_skipped, 2);
        assert_eq!(report.sprites_written, 2);
        assert!(report.errors.is_empty());

        let finished = writer.finish().unwrap();
        let mut archive = zip::ZipArchive::new(Cursor::new(finished.inner.into_inner())).unwrap();
        let names: Vec<String> = (0..archive.len())
            .map(|i| archive.by_index(i).unwrap().name().to_string())
            .collect();
        assert_eq!(
            names,
            vec![
                "VERSION",
                "style.json",
                "sprites/default/sprite.json",
                "sprites/default/sprite.png",
                "s/osm/0/0/0.mvt.gz",
                "s/osm/1/0/0.mvt.gz",
                "s/osm/1/1/1.mvt.gz",
            ]
        );
    }

    #[tokio::test]
    async fn test_missing_1x_sprite_is_an_error() {
        let fetcher = StaticFetcher::new();

        let plan = test_plan();
        let mut writer = Writer::in_memory(&test_style()).unwrap();
        let mut report = DownloadReport::default();
        run(&plan, &fetcher, &mut writer, &mut report, 2).await.unwrap();

        assert_eq!(report.tiles_written, 0);
        assert!(report.errors.iter().any(|e| e.contains("sprite")));
    }

    #[tokio::test]
    async fn test_format_mismatch_fails_source() {
        let mut fetcher = StaticFetcher::new();
        // server answers with PNG for a vector source
        for (z, x, y) in [(0, 0, 0), (1, 0, 0), (1, 1, 0), (1, 0, 1), (1, 1, 1)] {
            fetcher.insert(
                &format!("https://t.example.com/{z}/{x}/{y}.mvt"),
                b"\x89PNG\r\n\x1a\n....".as_slice(),
                "image/png",
            );
        }
        fetcher.insert("https://s.example.com/base.json", br#"{}"#.as_slice(), "application/json");
        fetcher.insert(
            "https://s.example.com/base.png",
            b"\x89PNG\r\n\x1a\n....".as_slice(),
            "image/png",
        );

        let plan = test_plan();
        let mut writer = Writer::in_memory(&test_style()).unwrap();
        let mut report = DownloadReport::default();
        run(&plan, &fetcher, &mut writer, &mut report, 2).await.unwrap();

        assert_eq!(report.tiles_written, 0);
        assert_eq!(report.tiles_skipped, 5);
        assert!(report.failed_sources.contains("osm"));
        assert!(report.errors.iter().any(|e| e.contains("format mismatch")
            || e.contains("Tile format mismatch")));
    }
}
