//! End-to-end pipeline runs against a local release feed

use std::io::Write;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use axum::Router;
use axum::body::Body;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use flate2::Compression;
use flate2::write::GzEncoder;
use futures::StreamExt;
use tokio_util::sync::CancellationToken;

use sidecar_prep::config::{FetchSettings, Layout};
use sidecar_prep::download::{Arch, Fetcher, Platform, PlatformSpec};
use sidecar_prep::{PrepConfig, PrepError, pipeline};

const LINUX_ASSET: &str = "node-v20.11.1-linux-x64.tar.gz";
const WIN_ASSET: &str = "node-v20.11.1-win-x64.zip";

struct Feed {
    asset_name: String,
    archive: Vec<u8>,
    /// Number of leading asset requests answered with 404
    fail_first: usize,
    /// Replaces the generated metadata document when set
    feed_body: Option<String>,
    asset_delay: Duration,
    /// Streams the archive in six chunks with this pause before each one
    chunk_delay: Duration,
    base: String,
    feed_hits: AtomicUsize,
    asset_hits: AtomicUsize,
}

impl Feed {
    fn new(asset_name: &str, archive: Vec<u8>) -> Self {
        Self {
            asset_name: asset_name.to_string(),
            archive,
            fail_first: 0,
            feed_body: None,
            asset_delay: Duration::ZERO,
            chunk_delay: Duration::ZERO,
            base: String::new(),
            feed_hits: AtomicUsize::new(0),
            asset_hits: AtomicUsize::new(0),
        }
    }

    fn feed_hits(&self) -> usize {
        self.feed_hits.load(Ordering::SeqCst)
    }

    fn asset_hits(&self) -> usize {
        self.asset_hits.load(Ordering::SeqCst)
    }
}

async fn feed_handler(State(feed): State<Arc<Feed>>) -> Response {
    feed.feed_hits.fetch_add(1, Ordering::SeqCst);
    if let Some(body) = &feed.feed_body {
        return body.clone().into_response();
    }
    let doc = serde_json::json!({
        "tag_name": "v20.11.1",
        "assets": [
            {
                "name": "SHASUMS256.txt",
                "browser_download_url": format!("{}/SHASUMS256.txt", feed.base),
            },
            {
                "name": "node-v20.11.1-linux-arm64.tar.gz",
                "browser_download_url": format!("{}/other", feed.base),
            },
            {
                "name": feed.asset_name,
                "browser_download_url": format!("{}/asset", feed.base),
            },
        ]
    });
    doc.to_string().into_response()
}

async fn asset_handler(State(feed): State<Arc<Feed>>) -> Response {
    let hit = feed.asset_hits.fetch_add(1, Ordering::SeqCst) + 1;
    if !feed.asset_delay.is_zero() {
        tokio::time::sleep(feed.asset_delay).await;
    }
    if hit <= feed.fail_first {
        return StatusCode::NOT_FOUND.into_response();
    }
    if !feed.chunk_delay.is_zero() {
        let delay = feed.chunk_delay;
        let size = feed.archive.len().div_ceil(6);
        let chunks: Vec<Vec<u8>> = feed.archive.chunks(size).map(<[u8]>::to_vec).collect();
        let body = futures::stream::iter(chunks).then(move |chunk| async move {
            tokio::time::sleep(delay).await;
            Ok::<_, std::io::Error>(chunk)
        });
        return Body::from_stream(body).into_response();
    }
    feed.archive.clone().into_response()
}

async fn serve(mut feed: Feed) -> (Arc<Feed>, SocketAddr) {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    feed.base = format!("http://{addr}");
    let feed = Arc::new(feed);

    let app = Router::new()
        .route("/feed.json", get(feed_handler))
        .route("/asset", get(asset_handler))
        .with_state(feed.clone());
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    (feed, addr)
}

fn config(root: &Path, addr: SocketAddr, max_retries: u32) -> PrepConfig {
    PrepConfig {
        layout: Layout::new(root),
        fetch: FetchSettings {
            release_url: format!("http://{addr}/feed.json"),
            max_retries,
            attempt_timeout_secs: 5,
            retry_delay_ms: 0,
            show_progress: false,
            ..FetchSettings::default()
        },
        ..PrepConfig::default()
    }
}

fn linux_archive() -> Vec<u8> {
    let encoder = GzEncoder::new(Vec::new(), Compression::default());
    let mut builder = tar::Builder::new(encoder);
    for (name, data, mode) in [
        ("node-v20.11.1-linux-x64/bin/node", &b"\x7fELF node"[..], 0o755),
        ("node-v20.11.1-linux-x64/README.md", &b"# Node.js"[..], 0o644),
    ] {
        let mut header = tar::Header::new_gnu();
        header.set_size(data.len() as u64);
        header.set_mode(mode);
        builder.append_data(&mut header, name, data).unwrap();
    }
    builder.into_inner().unwrap().finish().unwrap()
}

fn windows_bomb_archive() -> Vec<u8> {
    let mut cursor = std::io::Cursor::new(Vec::new());
    {
        let mut writer = zip::ZipWriter::new(&mut cursor);
        let options = zip::write::SimpleFileOptions::default()
            .compression_method(zip::CompressionMethod::Deflated);
        writer.start_file("node-v20.11.1-win-x64/node.exe", options).unwrap();
        writer.write_all(&vec![0u8; 200_000]).unwrap();
        writer.finish().unwrap();
    }
    cursor.into_inner()
}

fn linux_x64() -> PlatformSpec {
    PlatformSpec::new(Platform::Linux, Arch::X64)
}

#[tokio::test]
async fn retries_through_transient_404s_and_stages() {
    let tmp = tempfile::tempdir().unwrap();
    let mut feed = Feed::new(LINUX_ASSET, linux_archive());
    feed.fail_first = 2;
    let (feed, addr) = serve(feed).await;
    let config = config(tmp.path(), addr, 3);

    let staged = pipeline::run(&config, linux_x64(), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(feed.asset_hits(), 3);
    // Every retry re-runs the release query
    assert_eq!(feed.feed_hits(), 3);
    assert_eq!(staged.path, config.layout.sidecar_path(&linux_x64()));
    assert_eq!(std::fs::read(&staged.path).unwrap(), b"\x7fELF node");
    assert!(!config.layout.runtime_dir().exists());
    assert!(!config.layout.dest_dir().join("node-v20.11.1-linux-x64").exists());
}

#[tokio::test]
async fn permanent_failure_exhausts_retries() {
    let tmp = tempfile::tempdir().unwrap();
    let mut feed = Feed::new(LINUX_ASSET, linux_archive());
    feed.fail_first = usize::MAX;
    let (feed, addr) = serve(feed).await;
    let config = config(tmp.path(), addr, 3);

    let err = pipeline::run(&config, linux_x64(), &CancellationToken::new())
        .await
        .unwrap_err();

    match err {
        PrepError::DownloadExhausted { attempts, last, .. } => {
            assert_eq!(attempts, 4);
            assert!(matches!(*last, PrepError::DownloadStatus { status: 404, .. }));
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(feed.asset_hits(), 4);
    assert!(!config.layout.sidecar_path(&linux_x64()).exists());
    assert!(!config.layout.dest_dir().join(LINUX_ASSET).exists());
    assert!(!config.layout.dest_dir().join(format!("{LINUX_ASSET}.part")).exists());
}

#[tokio::test]
async fn second_fetch_does_no_network_io() {
    let tmp = tempfile::tempdir().unwrap();
    let (feed, addr) = serve(Feed::new(LINUX_ASSET, linux_archive())).await;
    let config = config(tmp.path(), addr, 3);
    let fetcher = Fetcher::new(&config.fetch, config.layout.dest_dir()).unwrap();
    let cancel = CancellationToken::new();

    let asset = fetcher.locator().locate(&linux_x64()).await.unwrap();
    assert_eq!(asset.name, LINUX_ASSET);

    let first = fetcher.fetch(asset.clone(), &linux_x64(), &cancel).await.unwrap();
    assert_eq!(feed.asset_hits(), 1);

    let second = fetcher.fetch(asset, &linux_x64(), &cancel).await.unwrap();
    assert_eq!(second.path, first.path);
    assert_eq!(feed.asset_hits(), 1);
    assert_eq!(feed.feed_hits(), 1);
}

#[tokio::test]
async fn rerun_reuses_downloaded_archive() {
    let tmp = tempfile::tempdir().unwrap();
    let (feed, addr) = serve(Feed::new(LINUX_ASSET, linux_archive())).await;
    let config = config(tmp.path(), addr, 0);
    let cancel = CancellationToken::new();

    pipeline::run(&config, linux_x64(), &cancel).await.unwrap();
    std::fs::remove_file(config.layout.sidecar_path(&linux_x64())).unwrap();
    let staged = pipeline::run(&config, linux_x64(), &cancel).await.unwrap();

    assert_eq!(feed.asset_hits(), 1);
    assert!(staged.path.exists());
}

#[tokio::test]
async fn hostile_archive_aborts_without_retry() {
    let tmp = tempfile::tempdir().unwrap();
    let (feed, addr) = serve(Feed::new(WIN_ASSET, windows_bomb_archive())).await;
    let config = config(tmp.path(), addr, 3);
    let spec = PlatformSpec::new(Platform::Win, Arch::X64);

    let err = pipeline::run(&config, spec, &CancellationToken::new())
        .await
        .unwrap_err();

    assert!(matches!(err, PrepError::SuspiciousCompressionRatio { .. }));
    assert!(err.is_extraction());
    assert_eq!(feed.asset_hits(), 1);
    assert!(!config.layout.sidecar_path(&spec).exists());
    assert!(!config.layout.dest_dir().join("node-v20.11.1-win-x64").exists());
}

#[tokio::test]
async fn malformed_metadata_is_retried() {
    let tmp = tempfile::tempdir().unwrap();
    let mut feed = Feed::new(LINUX_ASSET, linux_archive());
    feed.feed_body = Some("<html>rate limited</html>".to_string());
    let (feed, addr) = serve(feed).await;
    let config = config(tmp.path(), addr, 2);

    let err = pipeline::run(&config, linux_x64(), &CancellationToken::new())
        .await
        .unwrap_err();

    match err {
        PrepError::DownloadExhausted { attempts, last, .. } => {
            assert_eq!(attempts, 3);
            assert!(matches!(*last, PrepError::MalformedMetadata { .. }));
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(feed.feed_hits(), 3);
    assert_eq!(feed.asset_hits(), 0);
}

#[tokio::test]
async fn slow_attempts_time_out() {
    let tmp = tempfile::tempdir().unwrap();
    let mut feed = Feed::new(LINUX_ASSET, linux_archive());
    feed.asset_delay = Duration::from_secs(3);
    let (feed, addr) = serve(feed).await;
    let mut config = config(tmp.path(), addr, 1);
    config.fetch.attempt_timeout_secs = 1;

    let err = pipeline::run(&config, linux_x64(), &CancellationToken::new())
        .await
        .unwrap_err();

    match err {
        PrepError::DownloadExhausted { attempts, last, .. } => {
            assert_eq!(attempts, 2);
            assert!(matches!(*last, PrepError::Timeout { secs: 1, .. }));
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(feed.asset_hits(), 2);
    assert!(!config.layout.dest_dir().join(LINUX_ASSET).exists());
}

#[tokio::test]
async fn steady_download_outlasts_the_attempt_timeout() {
    let tmp = tempfile::tempdir().unwrap();
    let mut feed = Feed::new(LINUX_ASSET, linux_archive());
    feed.chunk_delay = Duration::from_millis(400);
    let (feed, addr) = serve(feed).await;
    let mut config = config(tmp.path(), addr, 0);
    config.fetch.attempt_timeout_secs = 1;

    let staged = pipeline::run(&config, linux_x64(), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(feed.asset_hits(), 1);
    assert_eq!(std::fs::read(&staged.path).unwrap(), b"\x7fELF node");
}

#[tokio::test]
async fn cancellation_stops_the_run() {
    let tmp = tempfile::tempdir().unwrap();
    let mut feed = Feed::new(LINUX_ASSET, linux_archive());
    feed.asset_delay = Duration::from_secs(3);
    let (_feed, addr) = serve(feed).await;
    let config = config(tmp.path(), addr, 3);
    let cancel = CancellationToken::new();

    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(200)).await;
        trigger.cancel();
    });

    let err = pipeline::run(&config, linux_x64(), &cancel).await.unwrap_err();
    assert!(matches!(err, PrepError::Cancelled));
    assert!(!config.layout.sidecar_path(&linux_x64()).exists());
}
