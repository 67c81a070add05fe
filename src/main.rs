mod cli;

use anyhow::{Context, Result};
use clap::Parser;
use log::{error, info, warn};
use tokio_util::sync::CancellationToken;

use sidecar_prep::{PlatformSpec, PrepConfig, pipeline};

fn main() {
    env_logger::Builder::from_default_env()
        .format(|buf, record| {
            use std::io::Write;
            writeln!(
                buf,
                "[{} {} {}:{}] {}",
                buf.timestamp_millis(),
                record.level(),
                record.file().unwrap_or("unknown"),
                record.line().unwrap_or(0),
                record.args()
            )
        })
        .filter_level(log::LevelFilter::Info)
        .parse_default_env()
        .init();

    let rt = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("FATAL: Failed to create Tokio runtime: {e}");
            std::process::exit(1);
        }
    };
    if let Err(e) = rt.block_on(real_main()) {
        error!("{e:#}");
        std::process::exit(1);
    }
}

async fn real_main() -> Result<()> {
    let args = cli::Args::parse();

    let work_dir = match args.work_dir {
        Some(dir) => dir,
        None => std::env::current_dir().context("Failed to determine working directory")?,
    };

    let mut config = PrepConfig::load(args.config.as_deref(), &work_dir)
        .context("Failed to load configuration")?;
    if args.no_progress {
        config.fetch.show_progress = false;
    }

    let spec = PlatformSpec::resolve(args.target.as_deref())
        .context("Failed to resolve target platform")?;

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, cleaning up");
            on_signal.cancel();
        }
    });

    let staged = pipeline::run(&config, spec, &cancel)
        .await
        .with_context(|| format!("Failed to prepare node sidecar for {spec}"))?;

    info!("Sidecar ready at {}", staged.path.display());
    Ok(())
}
