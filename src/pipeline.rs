//! Sequential resolve → locate → fetch → extract → stage orchestration

use std::fmt;

use tokio_util::sync::CancellationToken;

use crate::config::PrepConfig;
use crate::download::{Fetcher, PlatformSpec, extract};
use crate::error::{PrepError, Result};
use crate::stage::{StagedBinary, Stager};

/// Pipeline stage, used for progress logging
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Fetching,   // Locating and downloading the release asset
    Extracting, // Bounded archive extraction
    Staging,    // Moving the runtime into place and copying the sidecar
}

impl Phase {
    const COUNT: usize = 3;

    fn index(&self) -> usize {
        match self {
            Phase::Fetching => 1,
            Phase::Extracting => 2,
            Phase::Staging => 3,
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::Fetching => "fetching",
            Phase::Extracting => "extracting",
            Phase::Staging => "staging",
        };
        write!(f, "[{}/{}] {}", self.index(), Phase::COUNT, name)
    }
}

/// Prepare the sidecar for `spec`
///
/// Any stage error aborts the run; only the fetch stage retries internally.
pub async fn run(
    config: &PrepConfig,
    spec: PlatformSpec,
    cancel: &CancellationToken,
) -> Result<StagedBinary> {
    let layout = &config.layout;
    let dest = layout.dest_dir();
    log::info!("Preparing node sidecar for {} in {}", spec, dest.display());

    log::info!("{} node runtime", Phase::Fetching);
    let fetcher = Fetcher::new(&config.fetch, &dest)?;
    let fetched = fetcher.fetch_latest(&spec, cancel).await?;

    log::info!("{} {}", Phase::Extracting, fetched.asset.name);
    extract(&fetched.path, &dest, spec.archive_kind(), config.limits, cancel).await?;

    if cancel.is_cancelled() {
        return Err(PrepError::Cancelled);
    }

    log::info!("{} {}", Phase::Staging, spec.sidecar_name());
    let staged = Stager::new(layout.clone()).stage(&dest, &fetched.asset.name, &spec)?;

    Ok(staged)
}
