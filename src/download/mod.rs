//! Runtime download and bounded package extraction
//!
//! This module resolves the target platform, locates the matching runtime
//! asset in the release feed, downloads it with retry, and extracts it under
//! hard resource ceilings.
//!
//! ## Module Organization
//!
//! - `platform` - Platform resolution, asset tokens and sidecar naming
//! - `release` - Release feed interaction and asset selection
//! - `fetch` - Retrying, idempotent download
//! - `limits` - Extraction ceilings and the running budget
//! - `extract` - Bounded zip and tar.gz extraction

pub mod extract;
pub mod fetch;
pub mod limits;
pub mod platform;
pub mod release;

// Re-export public API
pub use extract::{ExtractionResult, extract};
pub use fetch::{Fetched, Fetcher};
pub use limits::ExtractionLimits;
pub use platform::{Arch, ArchiveKind, Platform, PlatformSpec};
pub use release::{Locator, ReleaseAsset, select_asset};
