//! Platform resolution for asset selection and sidecar naming

use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{PrepError, Result};

/// Operating system family the runtime is prepared for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Win,
    Mac,
    Linux,
}

/// CPU architecture the runtime is prepared for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Arch {
    X64,
    Arm64,
}

/// Archive container used by the release feed for a platform
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveKind {
    Zip,
    TarGz,
}

impl ArchiveKind {
    /// File extension without the leading dot
    pub fn extension(&self) -> &'static str {
        match self {
            ArchiveKind::Zip => "zip",
            ArchiveKind::TarGz => "tar.gz",
        }
    }
}

impl Platform {
    pub fn as_str(&self) -> &'static str {
        match self {
            Platform::Win => "win",
            Platform::Mac => "mac",
            Platform::Linux => "linux",
        }
    }

    /// Token used by the release feed in asset names
    pub fn asset_token(&self) -> &'static str {
        match self {
            Platform::Win => "win",
            Platform::Mac => "darwin",
            Platform::Linux => "linux",
        }
    }

    pub fn archive_kind(&self) -> ArchiveKind {
        match self {
            Platform::Win => ArchiveKind::Zip,
            Platform::Mac | Platform::Linux => ArchiveKind::TarGz,
        }
    }
}

impl Arch {
    pub fn as_str(&self) -> &'static str {
        match self {
            Arch::X64 => "x64",
            Arch::Arm64 => "arm64",
        }
    }
}

/// Resolved `{platform, arch}` pair consumed by every pipeline stage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PlatformSpec {
    pub platform: Platform,
    pub arch: Arch,
}

/// Shape accepted on the command line before validation
#[derive(Deserialize)]
struct RawOverride {
    platform: String,
    arch: String,
}

/// Cache for the running host (detected once per process)
static HOST_CACHE: OnceCell<PlatformSpec> = OnceCell::new();

impl PlatformSpec {
    pub const fn new(platform: Platform, arch: Arch) -> Self {
        Self { platform, arch }
    }

    /// Use the JSON override when given, otherwise detect the host
    pub fn resolve(override_json: Option<&str>) -> Result<Self> {
        match override_json {
            Some(json) => Self::from_override(json),
            None => Self::detect(),
        }
    }

    /// Parse `{"platform": "...", "arch": "..."}` and validate both values
    pub fn from_override(json: &str) -> Result<Self> {
        let raw: RawOverride =
            serde_json::from_str(json).map_err(|e| PrepError::InvalidOverride {
                input: json.to_string(),
                reason: e.to_string(),
            })?;

        let platform = match raw.platform.as_str() {
            "win" => Some(Platform::Win),
            "mac" => Some(Platform::Mac),
            "linux" => Some(Platform::Linux),
            _ => None,
        };
        let arch = match raw.arch.as_str() {
            "x64" => Some(Arch::X64),
            "arm64" => Some(Arch::Arm64),
            _ => None,
        };

        match (platform, arch) {
            (Some(platform), Some(arch)) => Ok(Self { platform, arch }),
            _ => Err(PrepError::UnsupportedPlatform {
                platform: raw.platform,
                arch: raw.arch,
            }),
        }
    }

    /// Detect the running host (cached after first call)
    pub fn detect() -> Result<Self> {
        HOST_CACHE
            .get_or_try_init(|| Self::from_host(std::env::consts::OS, std::env::consts::ARCH))
            .copied()
    }

    /// Map a native `(os, arch)` descriptor onto the recognized set
    pub fn from_host(os: &str, arch: &str) -> Result<Self> {
        let platform = match os {
            "windows" => Platform::Win,
            "macos" => Platform::Mac,
            "linux" => Platform::Linux,
            _ => {
                return Err(PrepError::UnsupportedPlatform {
                    platform: os.to_string(),
                    arch: arch.to_string(),
                });
            }
        };
        let arch = match arch {
            "x86_64" => Arch::X64,
            "aarch64" => Arch::Arm64,
            other => {
                return Err(PrepError::UnsupportedPlatform {
                    platform: os.to_string(),
                    arch: other.to_string(),
                });
            }
        };
        Ok(Self { platform, arch })
    }

    pub fn archive_kind(&self) -> ArchiveKind {
        self.platform.archive_kind()
    }

    /// Rust target triple the bundler expects in sidecar file names
    pub fn target_triple(&self) -> &'static str {
        match (self.platform, self.arch) {
            (Platform::Win, Arch::X64) => "x86_64-pc-windows-msvc",
            (Platform::Win, Arch::Arm64) => "aarch64-pc-windows-msvc",
            (Platform::Mac, Arch::X64) => "x86_64-apple-darwin",
            (Platform::Mac, Arch::Arm64) => "aarch64-apple-darwin",
            (Platform::Linux, Arch::X64) => "x86_64-unknown-linux-gnu",
            (Platform::Linux, Arch::Arm64) => "aarch64-unknown-linux-gnu",
        }
    }

    /// Path segments of the runtime executable inside the extracted folder
    pub fn executable_segments(&self) -> &'static [&'static str] {
        match self.platform {
            Platform::Win => &["node.exe"],
            Platform::Mac | Platform::Linux => &["bin", "node"],
        }
    }

    /// File name of the staged sidecar, e.g. `node-x86_64-pc-windows-msvc.exe`
    pub fn sidecar_name(&self) -> String {
        match self.platform {
            Platform::Win => format!("node-{}.exe", self.target_triple()),
            Platform::Mac | Platform::Linux => format!("node-{}", self.target_triple()),
        }
    }
}

impl fmt::Display for PlatformSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.platform.as_str(), self.arch.as_str())
    }
}
