//! Crash-recovery backups of dirty tabs.
//!
//! Each dirty tab is written as one JSON record under the backup directory,
//! named after a stable key:
//!
//! * a tab with a backing file is keyed by a hash of its path, so every cycle
//!   overwrites the same record for that file;
//! * an unsaved tab is keyed by its origin fingerprint (initial content salted
//!   per tab) plus a `_new` marker, so two untitled tabs never share a record
//!   while one tab keeps overwriting its own.
//!
//! Edits made after the last cycle are lost on a crash; the loss is bounded by
//! one backup interval.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tokio::fs;

use crate::error::{Result, SessionError};
use crate::file_io::write_synced;
use crate::store::Tab;

const RECORD_SUFFIX: &str = ".backup.json";
const NEW_MARKER: &str = "_new";
const MILLIS_PER_DAY: i64 = 24 * 60 * 60 * 1000;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BackupKey(String);

impl BackupKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Keys of never-saved tabs carry the `_new` marker.
    pub fn is_new(&self) -> bool {
        self.0.ends_with(NEW_MARKER)
    }

    /// The origin fingerprint a `_new` key was derived from.
    pub fn origin(&self) -> Option<&str> {
        self.0.strip_suffix(NEW_MARKER)
    }

    fn is_valid(&self) -> bool {
        !self.0.is_empty()
            && self
                .0
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
    }
}

impl fmt::Display for BackupKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for BackupKey {
    fn from(value: &str) -> Self {
        Self(value.trim().to_string())
    }
}

/// Key a tab is backed up under, derived from its current state.
pub fn key_for(tab: &Tab) -> BackupKey {
    match tab.backing_location() {
        Some(location) => location_key(location),
        None => BackupKey(format!("{}{}", tab.origin(), NEW_MARKER)),
    }
}

pub fn location_key(location: &Path) -> BackupKey {
    let digest = Sha256::digest(location.to_string_lossy().as_bytes());
    BackupKey(hex::encode(&digest[..16]))
}

/// One persisted snapshot of a dirty tab.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupRecord {
    pub key: BackupKey,
    pub display_name: String,
    pub content: String,
    pub backing_location: Option<PathBuf>,
    pub is_new: bool,
    pub timestamp_millis: i64,
}

impl BackupRecord {
    pub fn saved_at(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp_millis(self.timestamp_millis)
    }
}

/// Owned copy of everything a backup cycle needs from one tab.
///
/// Cycles run on snapshots so they never hold a reference into the live
/// document store. A clean snapshot carries no content; the cycle only uses
/// its key to drop a record that is no longer needed.
#[derive(Debug, Clone)]
pub struct TabSnapshot {
    pub key: BackupKey,
    pub display_name: String,
    pub content: String,
    pub backing_location: Option<PathBuf>,
    pub is_new: bool,
    pub dirty: bool,
}

impl TabSnapshot {
    pub fn of(tab: &Tab) -> Self {
        let content = if tab.is_dirty() {
            tab.content().to_string()
        } else {
            String::new()
        };
        Self {
            key: key_for(tab),
            display_name: tab.display_name().to_string(),
            content,
            backing_location: tab.backing_location().map(Path::to_path_buf),
            is_new: tab.is_new(),
            dirty: tab.is_dirty(),
        }
    }

    /// A snapshot that only asks the cycle to drop the record under `key`.
    pub fn cleared(key: BackupKey) -> Self {
        Self {
            key,
            display_name: String::new(),
            content: String::new(),
            backing_location: None,
            is_new: false,
            dirty: false,
        }
    }

    fn to_record(&self, timestamp_millis: i64) -> BackupRecord {
        BackupRecord {
            key: self.key.clone(),
            display_name: self.display_name.clone(),
            content: self.content.clone(),
            backing_location: self.backing_location.clone(),
            is_new: self.is_new,
            timestamp_millis,
        }
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct BackupReport {
    pub written: usize,
    pub failed: usize,
    pub purged: usize,
    /// Records removed because their tab is clean again.
    pub cleared: usize,
}

/// Durable storage for backup records.
#[derive(Debug, Clone)]
pub struct BackupStore {
    backup_dir: PathBuf,
    retention_millis: i64,
}

impl BackupStore {
    pub fn new(backup_dir: impl Into<PathBuf>, retention_days: u32) -> Self {
        Self {
            backup_dir: backup_dir.into(),
            retention_millis: i64::from(retention_days).saturating_mul(MILLIS_PER_DAY),
        }
    }

    /// Records live in `<data_dir>/backups`.
    pub fn in_data_dir(data_dir: &Path, retention_days: u32) -> Self {
        Self::new(data_dir.join("backups"), retention_days)
    }

    pub fn dir(&self) -> &Path {
        &self.backup_dir
    }

    fn record_path(&self, key: &BackupKey) -> PathBuf {
        self.backup_dir.join(format!("{}{}", key.as_str(), RECORD_SUFFIX))
    }

    fn checked_path(&self, key: &BackupKey) -> Result<PathBuf> {
        if !key.is_valid() {
            return Err(SessionError::BackupNotFound(key.clone()));
        }
        Ok(self.record_path(key))
    }

    async fn ensure_backup_dir(&self) -> Result<()> {
        fs::create_dir_all(&self.backup_dir)
            .await
            .map_err(|e| SessionError::io(&self.backup_dir, e))
    }

    /// Write one record per dirty snapshot, overwriting earlier records with
    /// the same key, and remove the records of clean snapshots. Failures are
    /// logged and counted, never propagated, so one bad write does not stop
    /// the rest of the cycle.
    pub async fn backup_all(&self, tabs: &[TabSnapshot]) -> BackupReport {
        let mut report = BackupReport {
            purged: self.purge_expired().await,
            ..BackupReport::default()
        };

        let now = Utc::now().timestamp_millis();
        for tab in tabs.iter().filter(|t| t.dirty) {
            match self.write_record(&tab.to_record(now)).await {
                Ok(()) => report.written += 1,
                Err(e) => {
                    log::error!("Failed to back up '{}': {}", tab.display_name, e);
                    report.failed += 1;
                }
            }
        }

        for tab in tabs.iter().filter(|t| !t.dirty) {
            match self.discard(&tab.key).await {
                Ok(()) => report.cleared += 1,
                Err(e) if e.is_not_found() => {}
                Err(e) => log::warn!("Failed to clear backup {}: {}", tab.key, e),
            }
        }

        if report.written + report.failed + report.purged + report.cleared > 0 {
            log::debug!(
                "Backup cycle: {} written, {} failed, {} purged, {} cleared",
                report.written,
                report.failed,
                report.purged,
                report.cleared
            );
        }
        report
    }

    /// Atomically replace the record for `record.key`: the JSON goes to a
    /// temporary file that is synced and then renamed over the target.
    pub async fn write_record(&self, record: &BackupRecord) -> Result<()> {
        let target = self.checked_path(&record.key)?;
        self.ensure_backup_dir().await?;

        let json = serde_json::to_vec_pretty(record)?;
        let temp = self
            .backup_dir
            .join(format!(".{}.{}.tmp", record.key.as_str(), std::process::id()));

        if let Err(e) = write_synced(&temp, &json).await {
            let _ = fs::remove_file(&temp).await;
            return Err(SessionError::io(&temp, e));
        }
        if let Err(e) = fs::rename(&temp, &target).await {
            let _ = fs::remove_file(&temp).await;
            return Err(SessionError::io(&target, e));
        }
        Ok(())
    }

    /// Read one record.
    pub async fn load(&self, key: &BackupKey) -> Result<BackupRecord> {
        let path = self.checked_path(key)?;
        if !fs::try_exists(&path).await.unwrap_or(false) {
            return Err(SessionError::BackupNotFound(key.clone()));
        }
        read_record(&path).await
    }

    /// Every readable record in the backup directory. Unreadable ones are
    /// logged and skipped.
    pub async fn list_all(&self) -> Result<Vec<BackupRecord>> {
        let mut records = Vec::new();
        for path in self.record_files().await? {
            match read_record(&path).await {
                Ok(record) => records.push(record),
                Err(e) => log::warn!("Skipping backup record: {}", e),
            }
        }
        records.sort_by(|a, b| b.timestamp_millis.cmp(&a.timestamp_millis));
        Ok(records)
    }

    /// Records worth offering for recovery: unsaved tabs, and tabs whose
    /// backing file no longer exists. A record for a file that is still on
    /// disk is not offered, since the live file is authoritative.
    pub async fn list_recoverable(&self) -> Result<Vec<BackupRecord>> {
        let mut recoverable = Vec::new();
        for record in self.list_all().await? {
            let offered = match &record.backing_location {
                None => true,
                Some(location) => !fs::try_exists(location).await.unwrap_or(false),
            };
            if offered {
                recoverable.push(record);
            }
        }
        Ok(recoverable)
    }

    pub async fn discard(&self, key: &BackupKey) -> Result<()> {
        let path = self.checked_path(key)?;
        match fs::remove_file(&path).await {
            Ok(()) => {
                log::info!("Discarded backup {}", key);
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(SessionError::BackupNotFound(key.clone()))
            }
            Err(e) => Err(SessionError::io(&path, e)),
        }
    }

    /// Remove every record; returns how many were removed.
    pub async fn discard_all(&self) -> Result<usize> {
        let mut removed = 0;
        for path in self.record_files().await? {
            match fs::remove_file(&path).await {
                Ok(()) => removed += 1,
                Err(e) => log::warn!("Failed to remove {}: {}", path.display(), e),
            }
        }
        Ok(removed)
    }

    /// Best-effort removal of records older than the retention window.
    /// Unparseable records are aged by their file modification time.
    pub async fn purge_expired(&self) -> usize {
        let files = match self.record_files().await {
            Ok(files) => files,
            Err(e) => {
                log::warn!("Failed to scan backups for expiry: {}", e);
                return 0;
            }
        };

        let now = Utc::now().timestamp_millis();
        let mut purged = 0;
        for path in files {
            let written_at = match read_record(&path).await {
                Ok(record) => Some(record.timestamp_millis),
                Err(_) => modified_millis(&path).await,
            };
            let Some(written_at) = written_at else {
                continue;
            };
            if now.saturating_sub(written_at) <= self.retention_millis {
                continue;
            }
            match fs::remove_file(&path).await {
                Ok(()) => {
                    log::info!("Purged expired backup: {}", path.display());
                    purged += 1;
                }
                Err(e) => log::warn!("Failed to purge {}: {}", path.display(), e),
            }
        }
        purged
    }

    async fn record_files(&self) -> Result<Vec<PathBuf>> {
        if !fs::try_exists(&self.backup_dir).await.unwrap_or(false) {
            return Ok(Vec::new());
        }

        let mut files = Vec::new();
        let mut entries = fs::read_dir(&self.backup_dir)
            .await
            .map_err(|e| SessionError::io(&self.backup_dir, e))?;
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| SessionError::io(&self.backup_dir, e))?
        {
            let path = entry.path();
            let is_record = path
                .file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.ends_with(RECORD_SUFFIX) && !n.starts_with('.'));
            if is_record {
                files.push(path);
            }
        }
        Ok(files)
    }
}

async fn read_record(path: &Path) -> Result<BackupRecord> {
    let json = fs::read_to_string(path)
        .await
        .map_err(|e| SessionError::io(path, e))?;
    serde_json::from_str(&json).map_err(|e| SessionError::Corrupt {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })
}

async fn modified_millis(path: &Path) -> Option<i64> {
    let modified: SystemTime = fs::metadata(path).await.ok()?.modified().ok()?;
    Some(DateTime::<Utc>::from(modified).timestamp_millis())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{DocumentStore, UNTITLED};
    use tempfile::TempDir;

    fn dirty_snapshot(store: &mut DocumentStore, content: &str) -> TabSnapshot {
        let id = store.create_tab(UNTITLED);
        store.update_content(id, content.to_string()).unwrap();
        TabSnapshot::of(store.get(id).unwrap())
    }

    async fn record_count(store: &BackupStore) -> usize {
        store.list_all().await.unwrap().len()
    }

    #[tokio::test]
    async fn test_backup_twice_overwrites_single_record() {
        let dir = TempDir::new().unwrap();
        let backups = BackupStore::new(dir.path(), 7);
        let mut docs = DocumentStore::new();
        let snapshot = dirty_snapshot(&mut docs, "draft");

        let report = backups.backup_all(&[snapshot.clone()]).await;
        assert_eq!(report.written, 1);
        backups.backup_all(&[snapshot.clone()]).await;

        assert_eq!(record_count(&backups).await, 1);
        let record = backups.load(&snapshot.key).await.unwrap();
        assert_eq!(record.content, "draft");
        assert!(record.is_new);
        assert!(record.key.is_new());
    }

    #[tokio::test]
    async fn test_untitled_tabs_with_same_content_do_not_collide() {
        let dir = TempDir::new().unwrap();
        let backups = BackupStore::new(dir.path(), 7);
        let mut docs = DocumentStore::new();
        let a = dirty_snapshot(&mut docs, "same");
        let b = dirty_snapshot(&mut docs, "same");

        assert_ne!(a.key, b.key);
        backups.backup_all(&[a, b]).await;
        assert_eq!(record_count(&backups).await, 2);
    }

    #[tokio::test]
    async fn test_empty_cycle_is_noop() {
        let dir = TempDir::new().unwrap();
        let backups = BackupStore::new(dir.path().join("backups"), 7);

        let report = backups.backup_all(&[]).await;
        assert_eq!(report, BackupReport::default());
        assert!(!dir.path().join("backups").exists());
    }

    #[tokio::test]
    async fn test_clean_snapshots_are_skipped() {
        let dir = TempDir::new().unwrap();
        let backups = BackupStore::new(dir.path(), 7);
        let mut docs = DocumentStore::new();
        let id = docs.open_tab("a.txt", "a".to_string(), dir.path().join("a.txt"));

        let report = backups
            .backup_all(&[TabSnapshot::of(docs.get(id).unwrap())])
            .await;
        assert_eq!(report.written, 0);
    }

    #[tokio::test]
    async fn test_failed_write_does_not_stop_the_cycle() {
        let dir = TempDir::new().unwrap();
        let backups = BackupStore::new(dir.path().join("backups"), 7);
        let mut docs = DocumentStore::new();
        let blocked = dirty_snapshot(&mut docs, "blocked");
        let fine = dirty_snapshot(&mut docs, "fine");

        // A directory where the record should go makes the final rename fail.
        std::fs::create_dir_all(backups.record_path(&blocked.key)).unwrap();

        let report = backups.backup_all(&[blocked, fine.clone()]).await;
        assert_eq!(report.written, 1);
        assert_eq!(report.failed, 1);
        assert_eq!(backups.load(&fine.key).await.unwrap().content, "fine");

        let leftovers = std::fs::read_dir(backups.dir())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
            .count();
        assert_eq!(leftovers, 0);
    }

    #[tokio::test]
    async fn test_clean_snapshot_clears_its_record() {
        let dir = TempDir::new().unwrap();
        let backups = BackupStore::new(dir.path(), 7);
        let mut docs = DocumentStore::new();
        let id = docs.create_tab(UNTITLED);
        docs.update_content(id, "typed".to_string()).unwrap();
        backups
            .backup_all(&[TabSnapshot::of(docs.get(id).unwrap())])
            .await;
        assert_eq!(record_count(&backups).await, 1);

        docs.update_content(id, String::new()).unwrap();
        let snapshot = TabSnapshot::of(docs.get(id).unwrap());
        assert!(!snapshot.dirty);
        assert!(snapshot.content.is_empty());

        let report = backups.backup_all(&[snapshot.clone()]).await;
        assert_eq!(report.cleared, 1);
        assert_eq!(record_count(&backups).await, 0);

        // Nothing left to clear.
        assert_eq!(backups.backup_all(&[snapshot]).await.cleared, 0);
    }

    #[tokio::test]
    async fn test_location_key_is_stable() {
        let path = Path::new("/home/user/notes.txt");
        assert_eq!(location_key(path), location_key(path));
        assert_ne!(location_key(path), location_key(Path::new("/home/user/other.txt")));
        assert!(!location_key(path).is_new());
    }

    #[tokio::test]
    async fn test_recoverable_excludes_existing_files() {
        let dir = TempDir::new().unwrap();
        let backups = BackupStore::new(dir.path().join("backups"), 7);

        let existing = dir.path().join("exists.txt");
        std::fs::write(&existing, "on disk").unwrap();
        let gone = dir.path().join("gone.txt");

        let mut docs = DocumentStore::new();
        let on_disk = docs.open_tab("exists.txt", "on disk".to_string(), existing);
        docs.update_content(on_disk, "edited".to_string()).unwrap();
        let missing = docs.open_tab("gone.txt", "old".to_string(), gone.clone());
        docs.update_content(missing, "newer".to_string()).unwrap();
        let untitled = dirty_snapshot(&mut docs, "scratch");

        let snapshots = vec![
            TabSnapshot::of(docs.get(on_disk).unwrap()),
            TabSnapshot::of(docs.get(missing).unwrap()),
            untitled,
        ];
        assert_eq!(backups.backup_all(&snapshots).await.written, 3);

        let recoverable = backups.list_recoverable().await.unwrap();
        assert_eq!(recoverable.len(), 2);
        assert!(recoverable
            .iter()
            .any(|r| r.backing_location.as_deref() == Some(gone.as_path())));
        assert!(recoverable.iter().any(|r| r.content == "scratch"));
    }

    #[tokio::test]
    async fn test_corrupt_record_does_not_hide_others() {
        let dir = TempDir::new().unwrap();
        let backups = BackupStore::new(dir.path(), 7);
        let mut docs = DocumentStore::new();
        backups.backup_all(&[dirty_snapshot(&mut docs, "good")]).await;

        std::fs::write(dir.path().join(format!("broken{}", RECORD_SUFFIX)), "{not json").unwrap();

        let recoverable = backups.list_recoverable().await.unwrap();
        assert_eq!(recoverable.len(), 1);
        assert_eq!(recoverable[0].content, "good");

        let err = backups.load(&BackupKey::from("broken")).await.unwrap_err();
        assert!(matches!(err, SessionError::Corrupt { .. }));
    }

    #[tokio::test]
    async fn test_discard_and_discard_all() {
        let dir = TempDir::new().unwrap();
        let backups = BackupStore::new(dir.path(), 7);
        let mut docs = DocumentStore::new();
        let a = dirty_snapshot(&mut docs, "a");
        let b = dirty_snapshot(&mut docs, "b");
        let c = dirty_snapshot(&mut docs, "c");
        backups.backup_all(&[a.clone(), b, c]).await;

        backups.discard(&a.key).await.unwrap();
        assert_eq!(record_count(&backups).await, 2);

        let err = backups.discard(&a.key).await.unwrap_err();
        assert!(err.is_not_found());

        assert_eq!(backups.discard_all().await.unwrap(), 2);
        assert_eq!(record_count(&backups).await, 0);
    }

    #[tokio::test]
    async fn test_load_rejects_path_like_keys() {
        let dir = TempDir::new().unwrap();
        let backups = BackupStore::new(dir.path(), 7);
        let err = backups.load(&BackupKey::from("../etc/passwd")).await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_expired_records_are_purged() {
        let dir = TempDir::new().unwrap();
        let backups = BackupStore::new(dir.path(), 7);

        let eight_days = 8 * MILLIS_PER_DAY;
        let old = BackupRecord {
            key: BackupKey::from("old_new"),
            display_name: UNTITLED.to_string(),
            content: "stale".to_string(),
            backing_location: None,
            is_new: true,
            timestamp_millis: Utc::now().timestamp_millis() - eight_days,
        };
        let fresh = BackupRecord {
            key: BackupKey::from("fresh_new"),
            timestamp_millis: Utc::now().timestamp_millis(),
            ..old.clone()
        };
        backups.write_record(&old).await.unwrap();
        backups.write_record(&fresh).await.unwrap();

        assert_eq!(backups.purge_expired().await, 1);
        let remaining = backups.list_all().await.unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].key, fresh.key);
        assert!(remaining[0].saved_at().is_some());
    }
}
