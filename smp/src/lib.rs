#![doc = include_str!("../README.md")]
#![forbid(unsafe_code)]

pub mod downloader;
mod errors;
pub mod mapbox;
pub mod reader;
pub mod style;
pub mod uri;
pub mod validator;
pub mod writer;

#[cfg(test)]
mod test_utils;

pub use downloader::{
    DownloadOptions, DownloadReport, FetchError, Fetcher, HttpFetcher, download, download_to_path,
};
pub use errors::{SmpError, SmpResult};
pub use reader::{Reader, SmpResource};
pub use style::StyleDocument;
pub use validator::{ValidationReport, validate};
pub use writer::Writer;
