//! Error taxonomy for the preparation pipeline

use std::path::PathBuf;

use thiserror::Error;

/// Every failure the pipeline can report.
///
/// Messages carry the archive or asset name, the limit that was hit and the
/// observed value so an operator can act without re-running with more logging.
#[derive(Debug, Error)]
pub enum PrepError {
    #[error("unsupported platform: platform={platform} arch={arch}")]
    UnsupportedPlatform { platform: String, arch: String },

    #[error("invalid platform override {input:?}: {reason}")]
    InvalidOverride { input: String, reason: String },

    #[error("no release asset matches {pattern} ({candidates} candidates inspected)")]
    AssetNotFound { pattern: String, candidates: usize },

    #[error("{} release assets match {pattern}: {}", matches.len(), matches.join(", "))]
    AmbiguousAsset { pattern: String, matches: Vec<String> },

    #[error("release feed {url} answered HTTP {status}")]
    ReleaseFeed { url: String, status: u16 },

    #[error("release metadata from {url} is malformed: {source}")]
    MalformedMetadata {
        url: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("download of {url} answered HTTP {status}")]
    DownloadStatus { url: String, status: u16 },

    #[error("HTTP request to {url} failed: {source}")]
    Http {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("no progress for {secs}s while {what}")]
    Timeout { what: String, secs: u64 },

    #[error("download of {asset} failed after {attempts} attempts: {last}")]
    DownloadExhausted {
        asset: String,
        attempts: u32,
        #[source]
        last: Box<PrepError>,
    },

    #[error("{archive}: {count} entries exceeds the limit of {limit}")]
    TooManyEntries {
        archive: String,
        limit: usize,
        count: usize,
    },

    #[error("{archive}: entry {entry} brings the uncompressed total to {total} bytes, limit is {limit}")]
    ArchiveTooLarge {
        archive: String,
        entry: String,
        total: u64,
        limit: u64,
    },

    #[error(
        "{archive}: entry {entry} has compression ratio {ratio:.1} ({uncompressed} / {compressed} bytes), limit is {limit}"
    )]
    SuspiciousCompressionRatio {
        archive: String,
        entry: String,
        ratio: f64,
        limit: f64,
        compressed: u64,
        uncompressed: u64,
    },

    #[error("{archive}: entry {entry:?} would be written outside the destination")]
    UnsafeEntryPath { archive: String, entry: String },

    #[error("{archive}: entry {entry} inflates past its declared size of {declared} bytes")]
    EntrySizeMismatch {
        archive: String,
        entry: String,
        declared: u64,
    },

    #[error("{archive}: unsupported archive type")]
    UnsupportedArchive { archive: String },

    #[error("{archive}: invalid zip archive: {source}")]
    Zip {
        archive: String,
        #[source]
        source: zip::result::ZipError,
    },

    #[error("failed to {action} {}: {source}", path.display())]
    StageFailure {
        action: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("operation cancelled")]
    Cancelled,
}

impl PrepError {
    /// Wrap an I/O error with a description of what was being done.
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        PrepError::Io {
            context: context.into(),
            source,
        }
    }

    /// Whether the fetcher may try again after this error.
    ///
    /// Only network, feed and download-side I/O failures qualify. A hostile
    /// archive stays hostile, and staging or cancellation ends the run.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            PrepError::AssetNotFound { .. }
                | PrepError::AmbiguousAsset { .. }
                | PrepError::ReleaseFeed { .. }
                | PrepError::MalformedMetadata { .. }
                | PrepError::DownloadStatus { .. }
                | PrepError::Http { .. }
                | PrepError::Timeout { .. }
                | PrepError::Io { .. }
        )
    }

    /// Whether this error came from the bounded extractor.
    pub fn is_extraction(&self) -> bool {
        matches!(
            self,
            PrepError::TooManyEntries { .. }
                | PrepError::ArchiveTooLarge { .. }
                | PrepError::SuspiciousCompressionRatio { .. }
                | PrepError::UnsafeEntryPath { .. }
                | PrepError::EntrySizeMismatch { .. }
                | PrepError::UnsupportedArchive { .. }
                | PrepError::Zip { .. }
        )
    }
}

pub type Result<T, E = PrepError> = std::result::Result<T, E>;
