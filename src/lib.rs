//! Release preparation for a bundled Node.js sidecar
//!
//! Fetches the platform-specific runtime from a release feed, extracts it
//! under hard resource ceilings and stages the executable into the bundle
//! tree under the bundler's sidecar name. A companion utility writes a local
//! bundler config pointing at a versioned boot URL.
//!
//! Library functions never terminate the process; the binaries decide.

pub mod bundler_config;
pub mod config;
pub mod download;
pub mod error;
pub mod pipeline;
pub mod stage;

pub use config::{Layout, PrepConfig};
pub use download::PlatformSpec;
pub use error::PrepError;
pub use stage::StagedBinary;
