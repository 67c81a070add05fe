//! Retrying, idempotent asset download

use futures::StreamExt;
use indicatif::{ProgressBar, ProgressStyle};
use std::future::Future;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;

use super::platform::PlatformSpec;
use super::release::{Locator, ReleaseAsset};
use crate::config::FetchSettings;
use crate::error::{PrepError, Result};

// Connection setup gets its own bound so a dead host fails fast
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// A downloaded asset and where it lives on disk
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fetched {
    pub asset: ReleaseAsset,
    pub path: PathBuf,
}

/// In-progress download file, removed on drop unless persisted
struct PartFile {
    path: PathBuf,
    keep: bool,
}

impl PartFile {
    fn new(path: PathBuf) -> Self {
        Self { path, keep: false }
    }

    fn path(&self) -> &Path {
        &self.path
    }

    fn persist(mut self) {
        self.keep = true;
    }
}

impl Drop for PartFile {
    fn drop(&mut self) {
        if self.keep {
            return;
        }
        // Best effort; the file may never have been created
        if std::fs::remove_file(&self.path).is_ok() {
            log::debug!("Removed partial download {}", self.path.display());
        }
    }
}

/// Download progress display, cleared however the download ends
struct Progress(ProgressBar);

impl Drop for Progress {
    fn drop(&mut self) {
        self.0.finish_and_clear();
    }
}

/// Streams release assets into `dest_dir` with retry and skip-if-present
pub struct Fetcher {
    client: reqwest::Client,
    locator: Locator,
    dest_dir: PathBuf,
    attempts: u32,
    attempt_timeout: Duration,
    retry_delay: Duration,
    show_progress: bool,
}

impl Fetcher {
    pub fn new(settings: &FetchSettings, dest_dir: impl Into<PathBuf>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT.min(settings.attempt_timeout()))
            .user_agent(settings.user_agent.clone())
            .build()
            .map_err(|source| PrepError::Http {
                url: settings.release_url.clone(),
                source,
            })?;
        let locator = Locator::new(client.clone(), settings.release_url.clone());

        Ok(Self {
            client,
            locator,
            dest_dir: dest_dir.into(),
            attempts: settings.attempts(),
            attempt_timeout: settings.attempt_timeout(),
            retry_delay: settings.retry_delay(),
            show_progress: settings.show_progress,
        })
    }

    pub fn locator(&self) -> &Locator {
        &self.locator
    }

    /// Download `asset`, or return the existing file without network I/O
    ///
    /// Retries re-run the release query, so the result may name a newer
    /// asset than the one passed in.
    pub async fn fetch(
        &self,
        asset: ReleaseAsset,
        spec: &PlatformSpec,
        cancel: &CancellationToken,
    ) -> Result<Fetched> {
        if let Some(path) = self.existing(&asset)? {
            log::info!("{} already downloaded, skipping", asset.name);
            return Ok(Fetched { asset, path });
        }
        self.run(Some(asset), spec, cancel).await
    }

    /// Locate the asset for `spec` and download it, retrying both steps
    pub async fn fetch_latest(
        &self,
        spec: &PlatformSpec,
        cancel: &CancellationToken,
    ) -> Result<Fetched> {
        self.run(None, spec, cancel).await
    }

    async fn run(
        &self,
        mut seed: Option<ReleaseAsset>,
        spec: &PlatformSpec,
        cancel: &CancellationToken,
    ) -> Result<Fetched> {
        let label = seed
            .as_ref()
            .map(|a| a.name.clone())
            .unwrap_or_else(|| format!("node runtime for {spec}"));
        let attempts = self.attempts;
        let mut attempt = 1;

        loop {
            match self.attempt(seed.take(), spec, cancel).await {
                Ok(fetched) => return Ok(fetched),
                Err(e) if !e.is_retryable() => return Err(e),
                Err(e) if attempt >= attempts => {
                    return Err(PrepError::DownloadExhausted {
                        asset: label,
                        attempts,
                        last: Box::new(e),
                    });
                }
                Err(e) => {
                    log::warn!("Attempt {}/{} for {} failed: {}", attempt, attempts, label, e);
                    attempt += 1;
                }
            }

            if !self.retry_delay.is_zero() {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return Err(PrepError::Cancelled),
                    _ = tokio::time::sleep(self.retry_delay) => {}
                }
            }
        }
    }

    /// One attempt: locate when needed, then download
    ///
    /// The attempt timeout bounds each wait for the network, not the whole
    /// transfer, so a slow but steady download is never cut off.
    async fn attempt(
        &self,
        seed: Option<ReleaseAsset>,
        spec: &PlatformSpec,
        cancel: &CancellationToken,
    ) -> Result<Fetched> {
        let work = async {
            let asset = match seed {
                Some(asset) => asset,
                None => {
                    let what = format!("querying {}", self.locator.url());
                    self.bounded(what, self.locator.locate(spec)).await?
                }
            };
            if let Some(path) = self.existing(&asset)? {
                return Ok(Fetched { asset, path });
            }
            let path = self.download(&asset).await?;
            Ok::<_, PrepError>(Fetched { asset, path })
        };

        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(PrepError::Cancelled),
            outcome = work => outcome,
        }
    }

    /// Fail with `Timeout` when `step` makes no progress within the attempt timeout
    async fn bounded<T>(
        &self,
        what: impl Into<String>,
        step: impl Future<Output = Result<T>>,
    ) -> Result<T> {
        match tokio::time::timeout(self.attempt_timeout, step).await {
            Ok(result) => result,
            Err(_) => Err(PrepError::Timeout {
                what: what.into(),
                secs: self.attempt_timeout.as_secs(),
            }),
        }
    }

    fn target_path(&self, asset: &ReleaseAsset) -> Result<PathBuf> {
        let bare = Path::new(&asset.name)
            .file_name()
            .is_some_and(|n| n.to_str() == Some(asset.name.as_str()));
        if !bare {
            return Err(PrepError::Config(format!(
                "asset name {:?} is not a plain file name",
                asset.name
            )));
        }
        Ok(self.dest_dir.join(&asset.name))
    }

    fn existing(&self, asset: &ReleaseAsset) -> Result<Option<PathBuf>> {
        let path = self.target_path(asset)?;
        Ok(path.is_file().then_some(path))
    }

    async fn download(&self, asset: &ReleaseAsset) -> Result<PathBuf> {
        let final_path = self.target_path(asset)?;
        let url = asset.download_url.as_str();
        let http_err = |source| PrepError::Http {
            url: url.to_string(),
            source,
        };

        tokio::fs::create_dir_all(&self.dest_dir)
            .await
            .map_err(|e| PrepError::io(format!("create {}", self.dest_dir.display()), e))?;

        log::info!("Downloading {} from {}", asset.name, url);
        let request = async { self.client.get(url).send().await.map_err(http_err) };
        let response = self.bounded(format!("requesting {url}"), request).await?;
        if !response.status().is_success() {
            return Err(PrepError::DownloadStatus {
                url: url.to_string(),
                status: response.status().as_u16(),
            });
        }

        let total = response.content_length().or(asset.size);
        let progress = Progress(self.progress_bar(&asset.name, total));

        let part = PartFile::new(self.dest_dir.join(format!("{}.part", asset.name)));
        let write_err = |e| PrepError::io(format!("write {}", part.path().display()), e);
        let mut file = tokio::fs::File::create(part.path()).await.map_err(write_err)?;

        let mut stream = response.bytes_stream();
        let mut downloaded: u64 = 0;
        let stalled = format!("downloading {}", asset.name);
        loop {
            let next = async { Ok(stream.next().await) };
            let Some(chunk) = self.bounded(stalled.as_str(), next).await? else {
                break;
            };
            let chunk = chunk.map_err(http_err)?;
            file.write_all(&chunk).await.map_err(write_err)?;
            downloaded += chunk.len() as u64;
            progress.0.set_position(downloaded);
        }
        file.flush().await.map_err(write_err)?;
        drop(file);

        tokio::fs::rename(part.path(), &final_path).await.map_err(|e| {
            PrepError::io(
                format!("move {} to {}", part.path().display(), final_path.display()),
                e,
            )
        })?;
        part.persist();
        drop(progress);

        log::info!("Downloaded {} ({} bytes)", asset.name, downloaded);
        Ok(final_path)
    }

    fn progress_bar(&self, name: &str, total: Option<u64>) -> ProgressBar {
        if !self.show_progress {
            return ProgressBar::hidden();
        }
        let bar = match total {
            Some(len) => ProgressBar::new(len),
            None => ProgressBar::new_spinner(),
        };
        let style = ProgressStyle::with_template(
            "  {spinner:.dim} {prefix:30!} [{elapsed_precise}] [{bar:20.yellow/dim}] {bytes:>9}/{total_bytes:9}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar());
        bar.set_style(style);
        bar.set_prefix(name.to_string());
        bar
    }
}
