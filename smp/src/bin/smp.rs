use std::path::PathBuf;
use std::time::Duration;

use clap::builder::Styles;
use clap::builder::styling::AnsiColor;
use clap::{Parser, Subcommand};
use log::error;
use smp::uri::ResourceKind;
use smp::{DownloadOptions, HttpFetcher, Reader, download_to_path, validate};

/// Defines the styles used for the CLI help output.
const HELP_STYLES: Styles = Styles::styled()
    .header(AnsiColor::Blue.on_default().bold())
    .usage(AnsiColor::Blue.on_default().bold())
    .literal(AnsiColor::White.on_default())
    .placeholder(AnsiColor::Green.on_default());

#[derive(Parser, Debug)]
#[command(
    version,
    name = "smp",
    about = "A utility to create, inspect and validate styled map packages",
    after_help = "Use RUST_LOG environment variable to control logging level, e.g. RUST_LOG=debug or RUST_LOG=smp=debug.",
    styles = HELP_STYLES
)]
struct Args {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Download a style and all referenced resources into an SMP file
    #[command(name = "download", alias = "dl")]
    Download(DownloadArgs),
    /// Validate the structure of an SMP file
    #[command(name = "validate", alias = "check")]
    Validate {
        /// SMP file to validate
        file: PathBuf,
    },
    /// Show summary information about an SMP file
    #[command(name = "info", alias = "summary")]
    Info {
        /// SMP file to inspect
        file: PathBuf,
    },
}

#[derive(clap::Args, Debug)]
struct DownloadArgs {
    /// Style URL (https:// or mapbox://styles/...)
    style_url: String,
    /// Path of the SMP file to write
    #[arg(short, long)]
    output_file: PathBuf,
    /// Bounds to cover, in the format `min_lon,min_lat,max_lon,max_lat`
    #[arg(long, value_parser = parse_bbox)]
    bbox: [f64; 4],
    /// Maximum zoom level to fetch
    #[arg(long, alias = "max-zoom")]
    maxzoom: u8,
    /// Public access token for mapbox:// URLs
    #[arg(long)]
    access_token: Option<String>,
    /// Number of concurrent fetches
    #[arg(long, default_value_t = smp::downloader::DEFAULT_CONCURRENCY)]
    concurrency: usize,
    /// Retry attempts per resource on retryable failures
    #[arg(long, default_value_t = smp::downloader::DEFAULT_RETRIES)]
    retries: usize,
    /// Per-fetch timeout in seconds
    #[arg(long, default_value_t = 30)]
    timeout: u64,
}

fn parse_bbox(s: &str) -> Result<[f64; 4], String> {
    let parts: Vec<f64> = s
        .split(',')
        .map(|p| p.trim().parse().map_err(|e| format!("{e}: {p}")))
        .collect::<Result<_, _>>()?;
    let &[west, south, east, north] = parts.as_slice() else {
        return Err(format!("expected min_lon,min_lat,max_lon,max_lat, got {s}"));
    };
    if west > east || south > north || west < -180.0 || east > 180.0 || south < -90.0 || north > 90.0
    {
        return Err(format!("invalid bounding box: {s}"));
    }
    Ok([west, south, east, north])
}

async fn start(args: Args) -> anyhow::Result<()> {
    match args.command {
        Commands::Download(args) => download(args).await,
        Commands::Validate { file } => {
            let report = validate(&file);
            for error in &report.errors {
                println!("✗ {error}");
            }
            for warning in &report.warnings {
                println!("⚠ {warning}");
            }
            if report.valid {
                println!("✓ {} is a valid styled map package", file.display());
                Ok(())
            } else {
                println!("{} is not a valid styled map package", file.display());
                std::process::exit(1);
            }
        }
        Commands::Info { file } => info(&file),
    }
}

async fn download(args: DownloadArgs) -> anyhow::Result<()> {
    let mut options = DownloadOptions::new(args.style_url, args.bbox, args.maxzoom);
    options.access_token = args.access_token;
    options.concurrency = args.concurrency;
    options.retries = args.retries;
    options.timeout = Duration::from_secs(args.timeout);

    let fetcher = HttpFetcher::new(options.timeout, options.retries)?;
    let report = download_to_path(&options, &fetcher, &args.output_file).await?;

    println!(
        "Wrote {}: {} tiles ({} skipped), {} glyph ranges, {} sprite files",
        args.output_file.display(),
        report.tiles_written,
        report.tiles_skipped,
        report.glyphs_written,
        report.sprites_written
    );
    for warning in &report.warnings {
        println!("⚠ {warning}");
    }
    for error in &report.errors {
        println!("✗ {error}");
    }
    if !report.is_complete() {
        std::process::exit(1);
    }
    Ok(())
}

fn info(file: &std::path::Path) -> anyhow::Result<()> {
    let reader = Reader::open(file)?;
    let style = reader.style()?;
    let names = reader.entry_names()?;

    let count = |kind: ResourceKind| {
        names
            .iter()
            .filter(|n| ResourceKind::from_path(n).is_ok_and(|k| k == kind))
            .count()
    };

    println!("File:     {}", file.display());
    println!(
        "Version:  {}",
        reader.version()?.unwrap_or_else(|| "(missing)".to_string())
    );
    if let Some(metadata) = style.get("metadata") {
        println!("Bounds:   {}", metadata["smp:bounds"]);
        println!("Maxzoom:  {}", metadata["smp:maxzoom"]);
    }
    println!("Entries:  {}", names.len());
    println!("  tiles:   {}", count(ResourceKind::Tile));
    println!("  glyphs:  {}", count(ResourceKind::Glyph));
    println!("  sprites: {}", count(ResourceKind::Sprite));
    Ok(())
}

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("smp=info")).init();

    let args = Args::parse();
    if let Err(e) = start(args).await {
        error!("{e:#}");
        std::process::exit(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_bbox() {
        assert_eq!(
            parse_bbox("-10.5,-20,30,40").unwrap(),
            [-10.5, -20.0, 30.0, 40.0]
        );
        assert!(parse_bbox("-10,-20,30").is_err());
        assert!(parse_bbox("30,-20,-10,40").is_err());
        assert!(parse_bbox("-200,-20,30,40").is_err());
        assert!(parse_bbox("a,b,c,d").is_err());
    }
}
