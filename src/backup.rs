//! Snapshot-then-prune rotation of store backups.
//!
//! Every save copies the live store to `<store>.bak.<stamp>` before it is
//! overwritten, then trims the backup set back down to the retention bound.

use crate::error::VisitAtlasError;
use chrono::Utc;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tracing::{debug, warn};

pub const DEFAULT_RETAIN: usize = 3;

const BACKUP_INFIX: &str = ".bak.";

/// Issues strictly increasing millisecond stamps for backup names.
#[derive(Debug, Default)]
pub struct BackupClock {
    last: i64,
}

impl BackupClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next_stamp(&mut self) -> i64 {
        let now = Utc::now().timestamp_millis();
        let stamp = now.max(self.last + 1);
        self.last = stamp;
        stamp
    }
}

#[derive(Debug, Clone)]
pub struct BackupEntry {
    pub path: PathBuf,
    pub stamp: i64,
    pub modified: SystemTime,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PruneFailure {
    pub path: PathBuf,
    pub reason: String,
}

/// Outcome of a pruning pass. Pruning is housekeeping: callers log the
/// failures and drop the report, a failed delete never fails a save.
#[derive(Debug, Clone, Default)]
pub struct PruneReport {
    pub removed: Vec<PathBuf>,
    pub failures: Vec<PruneFailure>,
}

impl PruneReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }

    pub fn log(&self) {
        for path in &self.removed {
            debug!("Pruned old backup {}", path.display());
        }
        for failure in &self.failures {
            warn!(
                "Could not prune backup {}: {}",
                failure.path.display(),
                failure.reason
            );
        }
    }
}

/// Deletes one backup file.
pub type Remover = fn(&Path) -> std::io::Result<()>;

#[derive(Clone, Copy)]
pub struct BackupRotation {
    retain: usize,
    remover: Remover,
}

impl std::fmt::Debug for BackupRotation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackupRotation")
            .field("retain", &self.retain)
            .finish_non_exhaustive()
    }
}

impl Default for BackupRotation {
    fn default() -> Self {
        Self::new(DEFAULT_RETAIN)
    }
}

impl BackupRotation {
    pub fn new(retain: usize) -> Self {
        Self {
            retain,
            remover: remove_backup,
        }
    }

    /// Swap how old backups are deleted.
    pub fn with_remover(mut self, remover: Remover) -> Self {
        self.remover = remover;
        self
    }

    /// Copy the current store to a fresh backup file.
    ///
    /// Returns `Ok(None)` when the store does not exist yet, since there is
    /// nothing to preserve. Any other failure aborts with `Backup`, and the
    /// caller must not overwrite the store.
    pub fn snapshot(
        &self,
        store: &Path,
        clock: &mut BackupClock,
    ) -> crate::Result<Option<PathBuf>> {
        match fs::metadata(store) {
            Ok(_) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!("No store at {}, skipping backup", store.display());
                return Ok(None);
            }
            Err(source) => {
                return Err(VisitAtlasError::Backup {
                    path: store.to_path_buf(),
                    source,
                })
            }
        }

        let prefix = backup_prefix(store)?;
        let dir = store_dir(store);
        let backup = loop {
            let candidate = dir.join(format!("{}{}", prefix, clock.next_stamp()));
            if !candidate.exists() {
                break candidate;
            }
        };

        fs::copy(store, &backup).map_err(|source| VisitAtlasError::Backup {
            path: store.to_path_buf(),
            source,
        })?;
        Ok(Some(backup))
    }

    /// All backups of `store`, oldest first (by mtime, then stamp).
    pub fn list(&self, store: &Path) -> crate::Result<Vec<BackupEntry>> {
        let prefix = backup_prefix(store)?;
        let mut entries = Vec::new();
        for dir_entry in fs::read_dir(store_dir(store))? {
            let dir_entry = dir_entry?;
            let name = dir_entry.file_name();
            let Some(stamp) = name.to_str().and_then(|n| parse_stamp(&prefix, n)) else {
                continue;
            };
            let metadata = dir_entry.metadata()?;
            if !metadata.is_file() {
                continue;
            }
            entries.push(BackupEntry {
                path: dir_entry.path(),
                stamp,
                modified: metadata.modified()?,
            });
        }
        entries.sort_by_key(|e| (e.modified, e.stamp));
        Ok(entries)
    }

    /// Delete the oldest backups until at most `retain` remain.
    pub fn prune(&self, store: &Path) -> PruneReport {
        let mut report = PruneReport::default();
        let entries = match self.list(store) {
            Ok(entries) => entries,
            Err(e) => {
                report.failures.push(PruneFailure {
                    path: store_dir(store),
                    reason: e.to_string(),
                });
                return report;
            }
        };

        let excess = entries.len().saturating_sub(self.retain);
        for entry in entries.into_iter().take(excess) {
            match (self.remover)(&entry.path) {
                Ok(()) => report.removed.push(entry.path),
                Err(e) => report.failures.push(PruneFailure {
                    path: entry.path,
                    reason: e.to_string(),
                }),
            }
        }
        report
    }
}

fn remove_backup(path: &Path) -> std::io::Result<()> {
    fs::remove_file(path)
}

fn store_dir(store: &Path) -> PathBuf {
    match store.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    }
}

/// `visits.json` -> `visits.json.bak.`
pub fn backup_prefix(store: &Path) -> crate::Result<String> {
    let name = store
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| {
            VisitAtlasError::Storage(format!("Invalid store path: {}", store.display()))
        })?;
    Ok(format!("{}{}", name, BACKUP_INFIX))
}

pub fn parse_stamp(prefix: &str, file_name: &str) -> Option<i64> {
    let digits = file_name.strip_prefix(prefix)?;
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}
