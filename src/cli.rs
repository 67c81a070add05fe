use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(version, about = "Fetch, extract and stage the node sidecar")]
pub struct Args {
    /// Target override as JSON, e.g. '{"platform":"win","arch":"x64"}'
    ///
    /// Omit to detect the running host.
    pub target: Option<String>,

    /// Path to configuration file (defaults to sidecar-prep.toml in the work dir)
    #[arg(long, short = 'c')]
    pub config: Option<PathBuf>,

    /// Directory paths in the configuration resolve against (defaults to cwd)
    #[arg(long)]
    pub work_dir: Option<PathBuf>,

    /// Disable the download progress bar
    #[arg(long)]
    pub no_progress: bool,
}
