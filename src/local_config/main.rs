//! Local bundler config writer
//!
//! Thin wrapper around `sidecar_prep::bundler_config`. Writes
//! `<name>.local.json` next to the bundler config and leaves the original
//! untouched.

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;

use sidecar_prep::bundler_config::{DEFAULT_SCHEME, write_local_config};
use sidecar_prep::download::Platform;

#[derive(Parser)]
#[command(name = "local-config")]
#[command(version, about = "Write a local bundler config with a versioned boot URL")]
struct Cli {
    /// Target platform the boot URL is qualified with
    #[arg(value_enum)]
    platform: PlatformArg,

    /// Bundler config to read
    #[arg(long, short = 'c', default_value = "src-tauri/tauri.conf.json")]
    config: PathBuf,

    /// Version segment of the boot URL (defaults to the config's version)
    #[arg(long = "app-version")]
    app_version: Option<String>,

    /// URL scheme served by the local protocol handler
    #[arg(long, default_value = DEFAULT_SCHEME)]
    scheme: String,
}

#[derive(clap::ValueEnum, Clone, Copy)]
enum PlatformArg {
    Win,
    Mac,
    Linux,
}

impl From<PlatformArg> for Platform {
    fn from(arg: PlatformArg) -> Self {
        match arg {
            PlatformArg::Win => Platform::Win,
            PlatformArg::Mac => Platform::Mac,
            PlatformArg::Linux => Platform::Linux,
        }
    }
}

fn main() -> Result<()> {
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .parse_default_env()
        .init();

    let cli = Cli::parse();
    let written = write_local_config(
        &cli.config,
        cli.platform.into(),
        cli.app_version.as_deref(),
        &cli.scheme,
    )
    .with_context(|| format!("Failed to write local config for {}", cli.config.display()))?;

    println!("{}", written.display());
    Ok(())
}
