//! Extraction ceilings and the running budget that enforces them

use serde::{Deserialize, Serialize};

use crate::error::{PrepError, Result};

/// Hard ceilings applied while extracting an untrusted archive
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractionLimits {
    /// Maximum number of entries (files and directories). Default: 10,000.
    pub max_entries: usize,

    /// Maximum cumulative uncompressed size. Default: 1,000,000,000 bytes.
    pub max_total_bytes: u64,

    /// Maximum uncompressed/compressed ratio of a zip entry. Default: 50.
    pub max_compression_ratio: f64,
}

impl Default for ExtractionLimits {
    fn default() -> Self {
        Self {
            max_entries: 10_000,
            max_total_bytes: 1_000_000_000,
            max_compression_ratio: 50.0,
        }
    }
}

// Header block, worst-case padding and room for a long name or pax record
const TAR_ENTRY_OVERHEAD: u64 = 4096;

impl ExtractionLimits {
    /// Cap on the raw decompressed tar stream
    ///
    /// Covers bytes the archive reader consumes before an entry is visible,
    /// such as GNU long-name and pax extension payloads.
    pub fn stream_ceiling(&self) -> u64 {
        let entries = u64::try_from(self.max_entries).unwrap_or(u64::MAX);
        let overhead = entries.saturating_add(2).saturating_mul(TAR_ENTRY_OVERHEAD);
        self.max_total_bytes.saturating_add(overhead)
    }
}

/// Running counters checked before each entry is written
#[derive(Debug)]
pub(crate) struct Budget<'a> {
    limits: ExtractionLimits,
    archive: &'a str,
    entries: usize,
    total_bytes: u64,
}

impl<'a> Budget<'a> {
    pub(crate) fn new(limits: ExtractionLimits, archive: &'a str) -> Self {
        Self {
            limits,
            archive,
            entries: 0,
            total_bytes: 0,
        }
    }

    pub(crate) fn limits(&self) -> &ExtractionLimits {
        &self.limits
    }

    pub(crate) fn entries(&self) -> usize {
        self.entries
    }

    pub(crate) fn total_bytes(&self) -> u64 {
        self.total_bytes
    }

    /// Count one more entry
    pub(crate) fn admit_entry(&mut self) -> Result<()> {
        self.entries += 1;
        if self.entries > self.limits.max_entries {
            return Err(PrepError::TooManyEntries {
                archive: self.archive.to_string(),
                limit: self.limits.max_entries,
                count: self.entries,
            });
        }
        Ok(())
    }

    /// Reject an archive whose declared entry count is already over the limit
    pub(crate) fn check_declared_entries(&self, declared: usize) -> Result<()> {
        if declared > self.limits.max_entries {
            return Err(PrepError::TooManyEntries {
                archive: self.archive.to_string(),
                limit: self.limits.max_entries,
                count: declared,
            });
        }
        Ok(())
    }

    /// Add an entry's uncompressed size to the running total
    pub(crate) fn admit_bytes(&mut self, entry: &str, size: u64) -> Result<()> {
        self.total_bytes = self.total_bytes.saturating_add(size);
        if self.total_bytes > self.limits.max_total_bytes {
            return Err(PrepError::ArchiveTooLarge {
                archive: self.archive.to_string(),
                entry: entry.to_string(),
                total: self.total_bytes,
                limit: self.limits.max_total_bytes,
            });
        }
        Ok(())
    }

    /// Reject entries whose compression ratio marks them as a bomb
    pub(crate) fn check_ratio(&self, entry: &str, compressed: u64, uncompressed: u64) -> Result<()> {
        if uncompressed == 0 {
            return Ok(());
        }
        let ratio = if compressed == 0 {
            f64::INFINITY
        } else {
            uncompressed as f64 / compressed as f64
        };
        if ratio > self.limits.max_compression_ratio {
            return Err(PrepError::SuspiciousCompressionRatio {
                archive: self.archive.to_string(),
                entry: entry.to_string(),
                ratio,
                limit: self.limits.max_compression_ratio,
                compressed,
                uncompressed,
            });
        }
        Ok(())
    }
}
