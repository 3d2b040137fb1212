//! On-disk backups for files about to be mutated.
//!
//! A manager tracks the backups it created during one session. Batch
//! operations report partial results: one unreadable file never blocks
//! the rest of the batch.
//!
//! Two naming modes:
//! - overwrite (default): `<file>.bak`, replaced on every backup cycle
//! - timestamped: `<stem>_<timestamp>.<ext>.bak`, never overwritten;
//!   collisions within one second get a `-N` counter suffix

use std::collections::HashMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Local};
use thiserror::Error;
use tracing::{debug, info, warn};

/// How backup files are named.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BackupMode {
    /// One `<file>.bak` per path, overwritten each cycle.
    #[default]
    Overwrite,
    /// A new timestamped file per cycle, never overwritten.
    Timestamped,
}

/// One backup created during this session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackupEntry {
    pub original_path: PathBuf,
    pub backup_path: PathBuf,
    pub created_at: DateTime<Local>,
}

#[derive(Debug, Error)]
pub enum BackupError {
    #[error("No backup found for {}", .0.display())]
    NotFound(PathBuf),

    #[error("I/O error on {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Per-path failure inside a batch operation.
#[derive(Debug)]
pub struct BackupFailure {
    pub path: PathBuf,
    pub error: String,
}

/// Partial results of `create_backups`.
#[derive(Debug, Default)]
#[must_use = "failed entries in the report should be surfaced to the caller"]
pub struct BackupReport {
    pub successful: Vec<BackupEntry>,
    pub failed: Vec<BackupFailure>,
}

/// Partial results of `cleanup_backups`.
#[derive(Debug, Default)]
pub struct CleanupReport {
    pub cleaned: Vec<PathBuf>,
    pub failed: Vec<BackupFailure>,
}

/// Creates, restores, and cleans up backups. Owns the naming scheme and
/// the session's entry bookkeeping. Never retries internally.
#[derive(Debug, Default)]
pub struct BackupManager {
    mode: BackupMode,
    entries: HashMap<PathBuf, Vec<BackupEntry>>,
}

impl BackupManager {
    pub fn new(mode: BackupMode) -> Self {
        Self {
            mode,
            entries: HashMap::new(),
        }
    }

    pub fn mode(&self) -> BackupMode {
        self.mode
    }

    /// Back up each path, continuing past per-file failures.
    pub fn create_backups(&mut self, paths: &[PathBuf]) -> BackupReport {
        let mut report = BackupReport::default();

        for path in paths {
            match self.backup_one(path) {
                Ok(entry) => {
                    info!(
                        original = %entry.original_path.display(),
                        backup = %entry.backup_path.display(),
                        "backup written"
                    );
                    self.entries
                        .entry(path.clone())
                        .or_default()
                        .push(entry.clone());
                    report.successful.push(entry);
                }
                Err(e) => {
                    warn!(path = %path.display(), "backup failed: {e}");
                    report.failed.push(BackupFailure {
                        path: path.clone(),
                        error: e.to_string(),
                    });
                }
            }
        }

        report
    }

    fn backup_one(&self, path: &Path) -> Result<BackupEntry, BackupError> {
        let content = fs::read(path).map_err(|source| BackupError::Io {
            path: path.to_path_buf(),
            source,
        })?;

        let created_at = Local::now();
        let backup_path = match self.mode {
            BackupMode::Overwrite => default_backup_path(path),
            BackupMode::Timestamped => timestamped_backup_path(path, created_at),
        };

        fs::write(&backup_path, &content).map_err(|source| BackupError::Io {
            path: backup_path.clone(),
            source,
        })?;

        Ok(BackupEntry {
            original_path: path.to_path_buf(),
            backup_path,
            created_at,
        })
    }

    /// Overwrite the live file with its most recent backup.
    ///
    /// Prefers entries tracked this session (newest first), then the
    /// on-disk `<file>.bak`, then the newest timestamped sibling. A
    /// session entry is only spent once its restore succeeds; a failed
    /// attempt leaves it in place for retry.
    pub fn restore_from_backup(&mut self, path: &Path) -> Result<PathBuf, BackupError> {
        let from_session = self.entries.get(path).and_then(|entries| entries.last());
        let backup_path = match from_session {
            Some(entry) => entry.backup_path.clone(),
            None => find_backup_on_disk(path).ok_or_else(|| BackupError::NotFound(path.to_path_buf()))?,
        };
        let consume_entry = from_session.is_some();

        let content = fs::read(&backup_path).map_err(|source| BackupError::Io {
            path: backup_path.clone(),
            source,
        })?;
        atomic_write(path, &content).map_err(|source| BackupError::Io {
            path: path.to_path_buf(),
            source,
        })?;

        if consume_entry {
            if let Some(entries) = self.entries.get_mut(path) {
                entries.pop();
            }
        }

        info!(
            path = %path.display(),
            backup = %backup_path.display(),
            "restored from backup"
        );
        Ok(backup_path)
    }

    /// Delete every backup file created during this session.
    ///
    /// Already-missing files count as cleaned; other I/O errors are
    /// reported per file. Calling this twice is safe: the second call
    /// sees no tracked entries and does nothing.
    pub fn cleanup_backups(&mut self) -> CleanupReport {
        let mut report = CleanupReport::default();

        for (_, entries) in self.entries.drain() {
            for entry in entries {
                match fs::remove_file(&entry.backup_path) {
                    Ok(()) => report.cleaned.push(entry.backup_path),
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                        debug!(path = %entry.backup_path.display(), "backup already removed");
                        report.cleaned.push(entry.backup_path);
                    }
                    Err(e) => report.failed.push(BackupFailure {
                        path: entry.backup_path,
                        error: e.to_string(),
                    }),
                }
            }
        }

        report
    }

    /// Backups tracked for `path` this session, oldest first.
    pub fn entries_for(&self, path: &Path) -> &[BackupEntry] {
        self.entries.get(path).map(Vec::as_slice).unwrap_or(&[])
    }
}

/// `<file>.bak` next to the original.
fn default_backup_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".bak");
    path.with_file_name(name)
}

/// `<stem>_<timestamp>.<ext>.bak`, with a `-N` counter if the second-
/// resolution timestamp collides.
fn timestamped_backup_path(path: &Path, created_at: DateTime<Local>) -> PathBuf {
    let stem = path.file_stem().unwrap_or_default().to_string_lossy();
    let ext = path
        .extension()
        .map(|e| format!(".{}", e.to_string_lossy()))
        .unwrap_or_default();
    let timestamp = created_at.format("%Y%m%d%H%M%S");

    let candidate = path.with_file_name(format!("{stem}_{timestamp}{ext}.bak"));
    if !candidate.exists() {
        return candidate;
    }
    let mut counter = 1;
    loop {
        let candidate = path.with_file_name(format!("{stem}_{timestamp}-{counter}{ext}.bak"));
        if !candidate.exists() {
            return candidate;
        }
        counter += 1;
    }
}

/// Locate a backup for `path` without session bookkeeping: the default
/// `.bak` first, then the newest timestamped sibling, ordered by the
/// parsed timestamp and collision counter rather than the raw file
/// name (`-N` suffixed names sort before their plain sibling as bytes,
/// but were created after it).
fn find_backup_on_disk(path: &Path) -> Option<PathBuf> {
    let default = default_backup_path(path);
    if default.exists() {
        return Some(default);
    }

    let dir = path.parent()?;
    let stem = path.file_stem()?.to_string_lossy().into_owned();
    let ext = path
        .extension()
        .map(|e| format!(".{}", e.to_string_lossy()))
        .unwrap_or_default();
    let prefix = format!("{stem}_");
    let suffix = format!("{ext}.bak");

    let mut candidates: Vec<((String, u32), PathBuf)> = fs::read_dir(dir)
        .ok()?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter_map(|p| {
            let name = p.file_name()?.to_string_lossy().into_owned();
            let middle = name
                .strip_prefix(&prefix)
                .and_then(|rest| rest.strip_suffix(&suffix))?;
            Some((backup_age_key(middle), p))
        })
        .collect();
    candidates.sort();
    candidates.pop().map(|(_, p)| p)
}

/// Order key for the `<timestamp>` or `<timestamp>-<counter>` portion of
/// a timestamped backup name. Plain names carry counter zero so each
/// collision sibling ranks after the one before it.
fn backup_age_key(middle: &str) -> (String, u32) {
    match middle.split_once('-') {
        Some((timestamp, counter)) => {
            (timestamp.to_string(), counter.parse().unwrap_or(0))
        }
        None => (middle.to_string(), 0),
    }
}

/// Atomic file write: temp file in the same directory, fsync, rename.
/// Either the whole write lands or the original is untouched.
pub(crate) fn atomic_write(path: &Path, content: &[u8]) -> std::io::Result<()> {
    let parent = path.parent().filter(|p| !p.as_os_str().is_empty()).ok_or_else(|| {
        std::io::Error::new(std::io::ErrorKind::InvalidInput, "path has no parent directory")
    })?;

    let mut temp = tempfile::NamedTempFile::new_in(parent)?;
    temp.write_all(content)?;
    temp.as_file().sync_all()?;
    temp.persist(path).map_err(|e| e.error)?;

    // Bump mtime so file watchers and build tools notice the change.
    filetime::set_file_mtime(path, filetime::FileTime::now())?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write_file(dir: &TempDir, name: &str, content: &str) -> PathBuf {
        let path = dir.path().join(name);
        fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn test_roundtrip_restore_recovers_exact_content() {
        let dir = TempDir::new().unwrap();
        let file = write_file(&dir, "module.py", "def f():\n    return 1\n");
        let mut manager = BackupManager::new(BackupMode::Overwrite);

        let report = manager.create_backups(&[file.clone()]);
        assert_eq!(report.successful.len(), 1);
        assert!(report.failed.is_empty());

        fs::write(&file, "CORRUPTED").unwrap();
        manager.restore_from_backup(&file).unwrap();

        assert_eq!(fs::read_to_string(&file).unwrap(), "def f():\n    return 1\n");
    }

    #[test]
    fn test_unreadable_path_does_not_block_batch() {
        let dir = TempDir::new().unwrap();
        let good = write_file(&dir, "good.py", "ok\n");
        let missing = dir.path().join("missing.py");
        let mut manager = BackupManager::new(BackupMode::Overwrite);

        let report = manager.create_backups(&[missing.clone(), good.clone()]);
        assert_eq!(report.successful.len(), 1);
        assert_eq!(report.successful[0].original_path, good);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].path, missing);
    }

    #[test]
    fn test_overwrite_mode_keeps_single_backup() {
        let dir = TempDir::new().unwrap();
        let file = write_file(&dir, "a.txt", "v1");
        let mut manager = BackupManager::new(BackupMode::Overwrite);

        let _ = manager.create_backups(&[file.clone()]);
        fs::write(&file, "v2").unwrap();
        let report = manager.create_backups(&[file.clone()]);

        let backup = &report.successful[0].backup_path;
        assert_eq!(backup, &dir.path().join("a.txt.bak"));
        assert_eq!(fs::read_to_string(backup).unwrap(), "v2");
    }

    #[test]
    fn test_timestamped_mode_never_overwrites() {
        let dir = TempDir::new().unwrap();
        let file = write_file(&dir, "a.txt", "v1");
        let mut manager = BackupManager::new(BackupMode::Timestamped);

        let first = manager.create_backups(&[file.clone()]);
        fs::write(&file, "v2").unwrap();
        let second = manager.create_backups(&[file.clone()]);

        let p1 = &first.successful[0].backup_path;
        let p2 = &second.successful[0].backup_path;
        assert_ne!(p1, p2);
        assert_eq!(fs::read_to_string(p1).unwrap(), "v1");
        assert_eq!(fs::read_to_string(p2).unwrap(), "v2");
    }

    #[test]
    fn test_restore_without_backup_reports_not_found() {
        let dir = TempDir::new().unwrap();
        let file = write_file(&dir, "a.txt", "v1");
        let mut manager = BackupManager::new(BackupMode::Overwrite);

        let err = manager.restore_from_backup(&file).unwrap_err();
        assert!(matches!(err, BackupError::NotFound(_)));
    }

    #[test]
    fn test_restore_falls_back_to_on_disk_default_backup() {
        let dir = TempDir::new().unwrap();
        let file = write_file(&dir, "a.txt", "live");
        // A backup left behind by a previous session.
        fs::write(dir.path().join("a.txt.bak"), "saved").unwrap();

        let mut manager = BackupManager::new(BackupMode::Overwrite);
        manager.restore_from_backup(&file).unwrap();
        assert_eq!(fs::read_to_string(&file).unwrap(), "saved");
    }

    #[test]
    fn test_restore_falls_back_to_newest_timestamped_backup() {
        let dir = TempDir::new().unwrap();
        let file = write_file(&dir, "a.txt", "live");
        fs::write(dir.path().join("a_20240101000000.txt.bak"), "old").unwrap();
        fs::write(dir.path().join("a_20250101000000.txt.bak"), "new").unwrap();

        let mut manager = BackupManager::new(BackupMode::Timestamped);
        manager.restore_from_backup(&file).unwrap();
        assert_eq!(fs::read_to_string(&file).unwrap(), "new");
    }

    #[test]
    fn test_failed_restore_keeps_session_entry() {
        let dir = TempDir::new().unwrap();
        let file = write_file(&dir, "a.txt", "v1");
        let mut manager = BackupManager::new(BackupMode::Timestamped);

        let _ = manager.create_backups(&[file.clone()]);
        fs::write(&file, "v2").unwrap();
        let second = manager.create_backups(&[file.clone()]);
        let newest = second.successful[0].backup_path.clone();
        fs::write(&file, "v3").unwrap();

        // A transiently missing backup file fails the restore but must
        // not spend the entry.
        fs::remove_file(&newest).unwrap();
        let err = manager.restore_from_backup(&file).unwrap_err();
        assert!(matches!(err, BackupError::Io { .. }));
        assert_eq!(manager.entries_for(&file).len(), 2);

        fs::write(&newest, "v2").unwrap();
        manager.restore_from_backup(&file).unwrap();
        assert_eq!(fs::read_to_string(&file).unwrap(), "v2");
        manager.restore_from_backup(&file).unwrap();
        assert_eq!(fs::read_to_string(&file).unwrap(), "v1");
    }

    #[test]
    fn test_restore_fallback_prefers_collision_sibling() {
        let dir = TempDir::new().unwrap();
        let file = write_file(&dir, "a.txt", "live");
        // Same-second siblings: the counter name was created after the
        // plain one even though it sorts first as bytes.
        fs::write(dir.path().join("a_20240101000000.txt.bak"), "older").unwrap();
        fs::write(dir.path().join("a_20240101000000-1.txt.bak"), "newer").unwrap();

        let mut manager = BackupManager::new(BackupMode::Timestamped);
        manager.restore_from_backup(&file).unwrap();
        assert_eq!(fs::read_to_string(&file).unwrap(), "newer");
    }

    #[test]
    fn test_cleanup_removes_session_backups() {
        let dir = TempDir::new().unwrap();
        let file = write_file(&dir, "a.txt", "v1");
        let mut manager = BackupManager::new(BackupMode::Overwrite);

        let report = manager.create_backups(&[file]);
        let backup = report.successful[0].backup_path.clone();
        assert!(backup.exists());

        let cleanup = manager.cleanup_backups();
        assert_eq!(cleanup.cleaned, vec![backup.clone()]);
        assert!(cleanup.failed.is_empty());
        assert!(!backup.exists());
    }

    #[test]
    fn test_cleanup_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let file = write_file(&dir, "a.txt", "v1");
        let mut manager = BackupManager::new(BackupMode::Overwrite);
        let _ = manager.create_backups(&[file]);

        let first = manager.cleanup_backups();
        assert_eq!(first.cleaned.len(), 1);

        let second = manager.cleanup_backups();
        assert!(second.cleaned.is_empty());
        assert!(second.failed.is_empty());
    }

    #[test]
    fn test_cleanup_tolerates_externally_deleted_backup() {
        let dir = TempDir::new().unwrap();
        let file = write_file(&dir, "a.txt", "v1");
        let mut manager = BackupManager::new(BackupMode::Overwrite);
        let report = manager.create_backups(&[file]);
        fs::remove_file(&report.successful[0].backup_path).unwrap();

        let cleanup = manager.cleanup_backups();
        assert_eq!(cleanup.cleaned.len(), 1);
        assert!(cleanup.failed.is_empty());
    }

    #[test]
    fn test_timestamp_collision_gets_counter_suffix() {
        let dir = TempDir::new().unwrap();
        let file = write_file(&dir, "a.txt", "v1");
        let now = Local::now();

        let first = timestamped_backup_path(&file, now);
        fs::write(&first, "x").unwrap();
        let second = timestamped_backup_path(&file, now);

        assert_ne!(first, second);
        assert!(second.to_string_lossy().contains("-1"));
    }

    #[test]
    fn test_atomic_write_replaces_content() {
        let dir = TempDir::new().unwrap();
        let file = write_file(&dir, "a.txt", "before");
        atomic_write(&file, b"after").unwrap();
        assert_eq!(fs::read_to_string(&file).unwrap(), "after");
    }
}
