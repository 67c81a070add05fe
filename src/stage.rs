//! Staging of the extracted runtime as a bundler sidecar
//!
//! The extracted top-level folder is renamed into the canonical runtime
//! folder, the platform executable is copied into the bundle tree under its
//! sidecar name, and the runtime folder is removed again. No intermediate
//! folder survives this stage, whether it succeeds or not.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use crate::config::Layout;
use crate::download::platform::PlatformSpec;
use crate::error::{PrepError, Result};

/// The staged sidecar executable
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagedBinary {
    pub path: PathBuf,
    pub spec: PlatformSpec,
}

/// Removes a directory tree when dropped
///
/// Same shape as an unmount guard: cleanup runs on every exit path.
struct DirGuard {
    path: PathBuf,
}

impl DirGuard {
    fn new(path: PathBuf) -> Self {
        Self { path }
    }

    fn retarget(&mut self, path: PathBuf) {
        self.path = path;
    }
}

impl Drop for DirGuard {
    fn drop(&mut self) {
        match fs::remove_dir_all(&self.path) {
            Ok(()) => log::debug!("Removed {}", self.path.display()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => log::warn!("Failed to remove {}: {}", self.path.display(), e),
        }
    }
}

fn stage_err(action: &'static str, path: &Path) -> impl FnOnce(io::Error) -> PrepError {
    let path = path.to_path_buf();
    move |source| PrepError::StageFailure {
        action,
        path,
        source,
    }
}

/// Name of the archive's top-level folder, derived from the asset name
pub fn root_folder_name<'a>(asset_name: &'a str, spec: &PlatformSpec) -> Option<&'a str> {
    let stem = asset_name
        .strip_suffix(spec.archive_kind().extension())?
        .strip_suffix('.')?;
    (!stem.is_empty()).then_some(stem)
}

/// Moves extracted runtimes into place and copies out the sidecar
pub struct Stager {
    layout: Layout,
}

impl Stager {
    pub fn new(layout: Layout) -> Self {
        Self { layout }
    }

    /// Stage the runtime extracted from `asset_name` under `extract_root`
    pub fn stage(
        &self,
        extract_root: &Path,
        asset_name: &str,
        spec: &PlatformSpec,
    ) -> Result<StagedBinary> {
        let folder = root_folder_name(asset_name, spec).ok_or_else(|| PrepError::StageFailure {
            action: "derive runtime folder from",
            path: PathBuf::from(asset_name),
            source: io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("asset name does not end in .{}", spec.archive_kind().extension()),
            ),
        })?;

        let extracted = extract_root.join(folder);
        let mut guard = DirGuard::new(extracted.clone());

        let runtime = self.layout.runtime_dir();
        match fs::remove_dir_all(&runtime) {
            Ok(()) => log::debug!("Removed stale {}", runtime.display()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(stage_err("remove stale runtime folder", &runtime)(e)),
        }

        fs::rename(&extracted, &runtime).map_err(stage_err("rename extracted folder", &extracted))?;
        guard.retarget(runtime.clone());

        let executable = self.layout.runtime_executable(spec);
        let sidecar_dir = self.layout.sidecar_dir();
        fs::create_dir_all(&sidecar_dir).map_err(stage_err("create", &sidecar_dir))?;

        let target = self.layout.sidecar_path(spec);
        fs::copy(&executable, &target).map_err(stage_err("copy runtime executable", &executable))?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&target, fs::Permissions::from_mode(0o755))
                .map_err(stage_err("set permissions on", &target))?;
        }

        log::info!("Staged {} as {}", executable.display(), target.display());
        Ok(StagedBinary { path: target, spec: *spec })
    }
}
