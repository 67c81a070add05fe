use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::download::ExtractionLimits;
use crate::download::platform::PlatformSpec;
use crate::error::{PrepError, Result};

/// File looked up in the work directory when no `--config` is given
pub const CONFIG_FILE_NAME: &str = "sidecar-prep.toml";

/// Environment override for the per-attempt fetch timeout (seconds)
pub const TIMEOUT_ENV: &str = "SIDECAR_PREP_TIMEOUT";

/// Name of the canonical runtime folder inside `dest_dir`
pub const RUNTIME_DIR_NAME: &str = "runtime";

/// Subdirectory of `bundle_dir` holding sidecar executables
pub const SIDECAR_DIR_NAME: &str = "binaries";

/// Top‑level configuration for one preparation run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PrepConfig {
    pub layout: Layout,
    pub fetch: FetchSettings,
    pub limits: ExtractionLimits,
}

/// Directories every stage works in.
///
/// `dest_dir` and `bundle_dir` may be relative; they resolve against
/// `work_dir`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Layout {
    pub work_dir: PathBuf,
    /// Downloads, extraction and the canonical runtime folder
    pub dest_dir: PathBuf,
    /// Bundle source tree that receives the sidecar
    pub bundle_dir: PathBuf,
}

impl Default for Layout {
    fn default() -> Self {
        Self {
            work_dir: PathBuf::from("."),
            dest_dir: PathBuf::from("resources"),
            bundle_dir: PathBuf::from("src-tauri"),
        }
    }
}

impl Layout {
    pub fn new(work_dir: impl Into<PathBuf>) -> Self {
        Self {
            work_dir: work_dir.into(),
            ..Self::default()
        }
    }

    /// Join logical segments onto a base directory
    pub fn join<S: AsRef<Path>>(base: &Path, segments: &[S]) -> PathBuf {
        segments
            .iter()
            .fold(base.to_path_buf(), |path, segment| path.join(segment))
    }

    fn resolve(&self, dir: &Path) -> PathBuf {
        if dir.is_absolute() {
            dir.to_path_buf()
        } else {
            self.work_dir.join(dir)
        }
    }

    pub fn dest_dir(&self) -> PathBuf {
        self.resolve(&self.dest_dir)
    }

    pub fn bundle_dir(&self) -> PathBuf {
        self.resolve(&self.bundle_dir)
    }

    pub fn runtime_dir(&self) -> PathBuf {
        self.dest_dir().join(RUNTIME_DIR_NAME)
    }

    pub fn sidecar_dir(&self) -> PathBuf {
        self.bundle_dir().join(SIDECAR_DIR_NAME)
    }

    /// Where the staged executable for `spec` ends up
    pub fn sidecar_path(&self, spec: &PlatformSpec) -> PathBuf {
        self.sidecar_dir().join(spec.sidecar_name())
    }

    /// Location of the runtime executable inside the canonical folder
    pub fn runtime_executable(&self, spec: &PlatformSpec) -> PathBuf {
        Self::join(&self.runtime_dir(), spec.executable_segments())
    }
}

/// Release feed access and retry policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FetchSettings {
    /// Release metadata endpoint (GitHub releases shape)
    pub release_url: String,
    /// Additional attempts after the first one
    pub max_retries: u32,
    /// Longest wait on the network within an attempt: the metadata query,
    /// the download request and every body chunk are bounded separately
    pub attempt_timeout_secs: u64,
    /// Pause between attempts
    pub retry_delay_ms: u64,
    pub user_agent: String,
    pub show_progress: bool,
}

impl Default for FetchSettings {
    fn default() -> Self {
        Self {
            release_url: "https://api.github.com/repos/nodejs/node/releases/latest".to_string(),
            max_retries: 3,
            attempt_timeout_secs: 10,
            retry_delay_ms: 1000,
            user_agent: format!("sidecar-prep/{}", env!("CARGO_PKG_VERSION")),
            show_progress: true,
        }
    }
}

impl FetchSettings {
    /// Total attempts, the first one included
    pub fn attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    pub fn attempt_timeout(&self) -> Duration {
        Duration::from_secs(self.attempt_timeout_secs)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }
}

/// Read the attempt timeout override from the environment
///
/// Invalid values are ignored with a warning.
pub fn timeout_from_env() -> Option<u64> {
    let raw = std::env::var(TIMEOUT_ENV).ok()?;
    match raw.parse::<u64>() {
        Ok(secs) if secs > 0 => Some(secs),
        _ => {
            log::warn!("Ignoring invalid {}={:?}", TIMEOUT_ENV, raw);
            None
        }
    }
}

impl PrepConfig {
    /// Parse a TOML document; missing keys take their defaults
    pub fn from_toml(text: &str) -> Result<Self> {
        toml::from_str(text).map_err(|e| PrepError::Config(e.to_string()))
    }

    /// Load an explicit config file, or `sidecar-prep.toml` in `work_dir`
    /// when present, or the defaults.
    pub fn load(explicit: Option<&Path>, work_dir: &Path) -> Result<Self> {
        let candidate = match explicit {
            Some(path) => Some(path.to_path_buf()),
            None => {
                let default = work_dir.join(CONFIG_FILE_NAME);
                default.exists().then_some(default)
            }
        };

        let mut config = match candidate {
            Some(path) => {
                log::info!("Using config from: {}", path.display());
                let text = std::fs::read_to_string(&path)
                    .map_err(|e| PrepError::io(format!("read {}", path.display()), e))?;
                Self::from_toml(&text)?
            }
            None => Self::default(),
        };

        if config.layout.work_dir.is_relative() {
            config.layout.work_dir = work_dir.join(&config.layout.work_dir);
        }
        if let Some(secs) = timeout_from_env() {
            config.fetch.attempt_timeout_secs = secs;
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        url::Url::parse(&self.fetch.release_url)
            .map_err(|e| PrepError::Config(format!("release_url {:?}: {e}", self.fetch.release_url)))?;
        if self.fetch.attempt_timeout_secs == 0 {
            return Err(PrepError::Config("attempt_timeout_secs must be positive".into()));
        }
        if self.limits.max_entries == 0 || self.limits.max_total_bytes == 0 {
            return Err(PrepError::Config("extraction limits must be positive".into()));
        }
        if !(self.limits.max_compression_ratio > 0.0) {
            return Err(PrepError::Config("max_compression_ratio must be positive".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::download::platform::{Arch, Platform};

    #[test]
    fn defaults_round_out_partial_files() {
        let config = PrepConfig::from_toml(
            r#"
            [fetch]
            max_retries = 5

            [limits]
            max_entries = 20
            "#,
        )
        .unwrap();
        assert_eq!(config.fetch.max_retries, 5);
        assert_eq!(config.fetch.attempt_timeout_secs, 10);
        assert_eq!(config.limits.max_entries, 20);
        assert_eq!(config.limits.max_total_bytes, 1_000_000_000);
        assert_eq!(config.layout.dest_dir, PathBuf::from("resources"));
    }

    #[test]
    fn layout_resolves_relative_dirs_against_work_dir() {
        let layout = Layout::new("/work");
        let spec = PlatformSpec::new(Platform::Linux, Arch::X64);
        assert_eq!(layout.runtime_dir(), PathBuf::from("/work/resources/runtime"));
        assert_eq!(
            layout.runtime_executable(&spec),
            PathBuf::from("/work/resources/runtime/bin/node")
        );
        assert_eq!(
            layout.sidecar_path(&spec),
            PathBuf::from("/work/src-tauri/binaries/node-x86_64-unknown-linux-gnu")
        );
    }

    #[test]
    fn attempts_count_the_first_try_and_saturate() {
        assert_eq!(FetchSettings::default().attempts(), 4);

        let settings = FetchSettings {
            max_retries: u32::MAX,
            ..FetchSettings::default()
        };
        assert_eq!(settings.attempts(), u32::MAX);
    }

    #[test]
    fn validate_rejects_bad_values() {
        let mut config = PrepConfig::default();
        config.fetch.release_url = "not a url".into();
        assert!(config.validate().is_err());

        let mut config = PrepConfig::default();
        config.limits.max_compression_ratio = 0.0;
        assert!(config.validate().is_err());

        assert!(PrepConfig::default().validate().is_ok());
    }

    #[test]
    fn load_reads_config_from_work_dir() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(
            tmp.path().join(CONFIG_FILE_NAME),
            "[layout]\ndest_dir = \"cache\"\n",
        )
        .unwrap();
        let config = PrepConfig::load(None, tmp.path()).unwrap();
        assert_eq!(config.layout.dest_dir(), tmp.path().join("cache"));
    }
}
