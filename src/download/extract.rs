//! Bounded extraction of untrusted zip and tar.gz archives
//!
//! Both formats are unpacked into a hidden staging directory created inside
//! the destination. Limits are checked per entry, before that entry's data is
//! decompressed. The decompressed tar stream is itself capped so header
//! extensions read ahead of an entry stay bounded. Only an archive that passes every check has its top-level
//! items moved into the destination; on any error the staging directory is
//! dropped and the destination is left as it was.

use flate2::read::GzDecoder;
use std::cell::Cell;
use std::fs::{self, File};
use std::io::{self, BufReader, Read};
use std::path::{Path, PathBuf};
use std::rc::Rc;
use tar::Archive;
use tokio_util::sync::CancellationToken;
use zip::ZipArchive;

use super::limits::{Budget, ExtractionLimits};
use super::platform::ArchiveKind;
use crate::error::{PrepError, Result};

/// Files written by an extraction plus the final counter values
#[derive(Debug, Default)]
pub struct ExtractionResult {
    pub files: Vec<PathBuf>,
    pub entries: usize,
    pub total_bytes: u64,
}

/// Extract `archive` into `dest` off the async runtime
pub async fn extract(
    archive: &Path,
    dest: &Path,
    kind: ArchiveKind,
    limits: ExtractionLimits,
    cancel: &CancellationToken,
) -> Result<ExtractionResult> {
    let archive = archive.to_path_buf();
    let dest = dest.to_path_buf();
    let cancel = cancel.clone();

    tokio::task::spawn_blocking(move || extract_blocking(&archive, &dest, kind, limits, &cancel))
        .await
        .map_err(|e| PrepError::io("extraction task failed", io::Error::other(e)))?
}

/// Synchronous extraction entry point
pub fn extract_blocking(
    archive: &Path,
    dest: &Path,
    kind: ArchiveKind,
    limits: ExtractionLimits,
    cancel: &CancellationToken,
) -> Result<ExtractionResult> {
    let name = archive
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| archive.display().to_string());

    fs::create_dir_all(dest)
        .map_err(|e| PrepError::io(format!("create {}", dest.display()), e))?;

    // Dropped (and removed) on every early return
    let staging = tempfile::Builder::new()
        .prefix(".extract-")
        .tempdir_in(dest)
        .map_err(|e| PrepError::io(format!("create staging dir in {}", dest.display()), e))?;

    log::info!("Extracting {} into {}", name, dest.display());

    let mut budget = Budget::new(limits, &name);
    let relative = match kind {
        ArchiveKind::Zip => extract_zip(archive, staging.path(), &mut budget, cancel)?,
        ArchiveKind::TarGz => extract_tar_gz(archive, staging.path(), &mut budget, cancel)?,
    };

    promote(staging.path(), dest)?;

    let result = ExtractionResult {
        files: relative.into_iter().map(|p| dest.join(p)).collect(),
        entries: budget.entries(),
        total_bytes: budget.total_bytes(),
    };
    log::info!(
        "Extracted {}: {} entries, {} bytes",
        name,
        result.entries,
        result.total_bytes
    );
    Ok(result)
}

fn check_cancelled(cancel: &CancellationToken) -> Result<()> {
    if cancel.is_cancelled() {
        return Err(PrepError::Cancelled);
    }
    Ok(())
}

/// Decompressed tar stream that fails once `remaining` bytes are used up
///
/// `tripped` stays readable after the archive reader wraps the error.
struct CappedReader<R> {
    inner: R,
    remaining: u64,
    tripped: Rc<Cell<bool>>,
}

impl<R: Read> Read for CappedReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.remaining == 0 {
            // A clean end of stream exactly at the cap is fine
            let mut probe = [0u8; 1];
            if self.inner.read(&mut probe)? == 0 {
                return Ok(0);
            }
            self.tripped.set(true);
            return Err(io::Error::other("decompressed tar stream exceeds its ceiling"));
        }
        let window = usize::try_from(self.remaining).unwrap_or(usize::MAX).min(buf.len());
        let n = self.inner.read(&mut buf[..window])?;
        self.remaining -= n as u64;
        Ok(n)
    }
}

/// Stream a gzip-compressed tar one entry at a time
fn extract_tar_gz(
    archive_path: &Path,
    root: &Path,
    budget: &mut Budget<'_>,
    cancel: &CancellationToken,
) -> Result<Vec<PathBuf>> {
    let archive_name = archive_path.display().to_string();
    let ceiling = budget.limits().stream_ceiling();
    let tripped = Rc::new(Cell::new(false));

    // Read failures past the ceiling are reported as an oversized archive
    let read_err = |context: String, last: &str, e: io::Error| {
        if tripped.get() {
            PrepError::ArchiveTooLarge {
                archive: archive_name.clone(),
                entry: last.to_string(),
                total: ceiling.saturating_add(1),
                limit: ceiling,
            }
        } else {
            PrepError::io(context, e)
        }
    };

    let file = File::open(archive_path)
        .map_err(|e| PrepError::io(format!("read {archive_name}"), e))?;
    let capped = CappedReader {
        inner: GzDecoder::new(BufReader::new(file)),
        remaining: ceiling,
        tripped: Rc::clone(&tripped),
    };
    let mut archive = Archive::new(capped);
    archive.set_preserve_permissions(true);
    archive.set_overwrite(true);

    let mut files = Vec::new();
    let mut last = String::from("(archive header)");

    let entries = archive
        .entries()
        .map_err(|e| read_err(format!("read {archive_name}"), &last, e))?;
    for entry in entries {
        check_cancelled(cancel)?;

        let mut entry = entry.map_err(|e| read_err(format!("read {archive_name}"), &last, e))?;
        let entry_path = entry
            .path()
            .map_err(|e| read_err(format!("read {archive_name}"), &last, e))?
            .into_owned();
        let entry_name = entry_path.display().to_string();

        // Header is parsed, data not yet read
        budget.admit_entry()?;
        budget.admit_bytes(&entry_name, entry.size())?;

        let is_file = entry.header().entry_type().is_file();
        let unpacked = entry.unpack_in(root).map_err(|e| {
            read_err(format!("unpack {entry_name} from {archive_name}"), &entry_name, e)
        })?;
        if !unpacked {
            return Err(PrepError::UnsafeEntryPath {
                archive: archive_name.clone(),
                entry: entry_name,
            });
        }

        if is_file {
            files.push(entry_path);
        }
        last = entry_name;
    }

    Ok(files)
}

/// Extract a zip using the central directory to vet each entry first
fn extract_zip(
    archive_path: &Path,
    root: &Path,
    budget: &mut Budget<'_>,
    cancel: &CancellationToken,
) -> Result<Vec<PathBuf>> {
    let archive_name = archive_path.display().to_string();
    let zip_err = |source| PrepError::Zip {
        archive: archive_name.clone(),
        source,
    };

    let file = File::open(archive_path)
        .map_err(|e| PrepError::io(format!("read {archive_name}"), e))?;
    let mut archive = ZipArchive::new(BufReader::new(file)).map_err(zip_err)?;

    budget.check_declared_entries(archive.len())?;

    let mut files = Vec::new();

    for index in 0..archive.len() {
        check_cancelled(cancel)?;

        let mut entry = archive.by_index(index).map_err(zip_err)?;
        let entry_name = entry.name().to_string();

        budget.admit_entry()?;

        let relative = entry.enclosed_name().ok_or_else(|| PrepError::UnsafeEntryPath {
            archive: archive_name.clone(),
            entry: entry_name.clone(),
        })?;
        let out_path = root.join(&relative);

        if entry.is_dir() {
            fs::create_dir_all(&out_path)
                .map_err(|e| PrepError::io(format!("create {}", out_path.display()), e))?;
            continue;
        }

        if entry.is_symlink() {
            log::warn!("Skipping symlink {} in {}", entry_name, archive_name);
            continue;
        }

        let declared = entry.size();
        budget.check_ratio(&entry_name, entry.compressed_size(), declared)?;
        budget.admit_bytes(&entry_name, declared)?;

        if let Some(parent) = out_path.parent() {
            fs::create_dir_all(parent)
                .map_err(|e| PrepError::io(format!("create {}", parent.display()), e))?;
        }

        let write_err = |e| PrepError::io(format!("write {}", out_path.display()), e);
        let mut out = File::create(&out_path).map_err(write_err)?;
        let written = io::copy(&mut (&mut entry).take(declared + 1), &mut out).map_err(write_err)?;
        if written > declared {
            return Err(PrepError::EntrySizeMismatch {
                archive: archive_name.clone(),
                entry: entry_name,
                declared,
            });
        }

        #[cfg(unix)]
        if let Some(mode) = entry.unix_mode() {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&out_path, fs::Permissions::from_mode(mode & 0o777))
                .map_err(write_err)?;
        }

        files.push(relative);
    }

    Ok(files)
}

/// Move every top-level item of `staging` into `dest`, replacing stale copies
fn promote(staging: &Path, dest: &Path) -> Result<()> {
    let list_err = |e| PrepError::io(format!("list {}", staging.display()), e);

    for item in fs::read_dir(staging).map_err(list_err)? {
        let item = item.map_err(list_err)?;
        let target = dest.join(item.file_name());

        if let Ok(meta) = fs::symlink_metadata(&target) {
            let removed = if meta.is_dir() {
                fs::remove_dir_all(&target)
            } else {
                fs::remove_file(&target)
            };
            removed.map_err(|e| PrepError::io(format!("remove stale {}", target.display()), e))?;
        }

        fs::rename(item.path(), &target).map_err(|e| {
            PrepError::io(
                format!("move {} to {}", item.path().display(), target.display()),
                e,
            )
        })?;
    }
    Ok(())
}
