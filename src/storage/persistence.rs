//! Write-ahead log and snapshot files behind the durable store

use super::records::{ArchiveRecord, ClassificationCommit, SessionCommit};
use super::tables::DurableTables;
use crate::core::{Result, StoredActivity, SyncError};
use chrono::Utc;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, ErrorKind, Read, Write};
use std::marker::PhantomData;
use std::path::{Path, PathBuf};

const WAL_FILE: &str = "worldsync.wal";
const SNAPSHOT_FILE: &str = "worldsync.snapshot";
const DEFAULT_CHECKPOINT_THRESHOLD: usize = 1000;

// ============================================================================
// WAL Entry Types
// ============================================================================

/// One committed write. Replaying entries in order rebuilds the tables.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum WalEntry {
    AppendActivity { events: Vec<StoredActivity> },
    Archive { records: Vec<ArchiveRecord> },
    CommitSessions(SessionCommit),
    CommitClassifications(ClassificationCommit),
    RegisterTopology { worker_class: String, shard_count: u32 },
}

impl WalEntry {
    pub fn label(&self) -> &'static str {
        match self {
            WalEntry::AppendActivity { .. } => "append_activity",
            WalEntry::Archive { .. } => "archive",
            WalEntry::CommitSessions(_) => "commit_sessions",
            WalEntry::CommitClassifications(_) => "commit_classifications",
            WalEntry::RegisterTopology { .. } => "register_topology",
        }
    }
}

// ============================================================================
// Snapshot
// ============================================================================

#[derive(Debug, Serialize, Deserialize)]
pub struct StoreSnapshot<S> {
    pub version: u32,
    pub created_at: i64,
    pub state: S,
}

impl<S> StoreSnapshot<S> {
    pub fn new(state: S) -> Self {
        Self {
            version: 1,
            created_at: Utc::now().timestamp_millis(),
            state,
        }
    }
}

// ============================================================================
// Durability Configuration
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DurabilityMode {
    /// fsync after every WAL record.
    Sync,
    #[default]
    Async,
    /// No files are written.
    None,
}

// ============================================================================
// WAL Manager
// ============================================================================

/// Entries read back from the log.
#[derive(Debug, Default)]
pub struct WalReadout {
    pub entries: Vec<WalEntry>,
    /// The final record was cut short and has been discarded.
    pub torn_tail: bool,
}

pub struct WalManager {
    wal_path: PathBuf,
    wal_file: Option<BufWriter<File>>,
    /// Length of the file up to the last acknowledged record.
    committed_len: u64,
    durability_mode: DurabilityMode,
    entries_since_checkpoint: usize,
    checkpoint_threshold: usize,
}

impl WalManager {
    pub fn new<P: AsRef<Path>>(wal_path: P, durability_mode: DurabilityMode) -> Result<Self> {
        let wal_path = wal_path.as_ref().to_path_buf();
        if let Some(parent) = wal_path.parent() {
            fs::create_dir_all(parent).map_err(|e| {
                SyncError::Storage(format!("Failed to create WAL directory: {}", e))
            })?;
        }

        let (wal_file, committed_len) = if durability_mode != DurabilityMode::None {
            let file = open_for_append(&wal_path)?;
            let len = file
                .metadata()
                .map_err(|e| SyncError::Storage(format!("Failed to stat WAL file: {}", e)))?
                .len();
            (Some(BufWriter::new(file)), len)
        } else {
            (None, 0)
        };

        Ok(Self {
            wal_path,
            wal_file,
            committed_len,
            durability_mode,
            entries_since_checkpoint: 0,
            checkpoint_threshold: DEFAULT_CHECKPOINT_THRESHOLD,
        })
    }

    /// Write one length-prefixed record. On failure nothing of the record
    /// survives in the buffer or the file.
    pub fn append(&mut self, entry: &WalEntry) -> Result<()> {
        if self.durability_mode == DurabilityMode::None {
            return Ok(());
        }
        let serialized = rmp_serde::to_vec_named(entry).map_err(|e| {
            SyncError::Serialization(format!("Failed to serialize WAL entry: {}", e))
        })?;
        let len = u32::try_from(serialized.len())
            .map_err(|_| SyncError::Storage("WAL entry exceeds 4 GiB".to_string()))?;
        let mut record = Vec::with_capacity(serialized.len() + 4);
        record.extend_from_slice(&len.to_le_bytes());
        record.extend_from_slice(&serialized);

        if let Err(e) = self.write_record(&record) {
            if let Err(rollback) = self.discard_unacknowledged() {
                log::error!("Failed to roll back WAL after a failed write: {}", rollback);
            }
            return Err(e);
        }
        self.committed_len += record.len() as u64;
        self.entries_since_checkpoint += 1;
        Ok(())
    }

    fn write_record(&mut self, record: &[u8]) -> Result<()> {
        let sync = self.durability_mode == DurabilityMode::Sync;
        let file = self.writer()?;
        file.write_all(record)
            .and_then(|_| file.flush())
            .map_err(|e| SyncError::Storage(format!("Failed to write WAL: {}", e)))?;
        if sync {
            file.get_mut()
                .sync_all()
                .map_err(|e| SyncError::Storage(format!("Failed to sync WAL: {}", e)))?;
        }
        Ok(())
    }

    /// The open writer, reopened at the last acknowledged offset if a
    /// previous failure dropped it.
    fn writer(&mut self) -> Result<&mut BufWriter<File>> {
        if self.wal_file.is_none() {
            let file = open_for_append(&self.wal_path)?;
            file.set_len(self.committed_len)
                .map_err(|e| SyncError::Storage(format!("Failed to trim WAL: {}", e)))?;
            self.wal_file = Some(BufWriter::new(file));
        }
        self.wal_file
            .as_mut()
            .ok_or_else(|| SyncError::Storage("WAL file not initialized".to_string()))
    }

    /// Drop buffered bytes and cut the file back to the last acknowledged
    /// record. If trimming fails the writer stays closed and the next
    /// append retries it.
    fn discard_unacknowledged(&mut self) -> Result<()> {
        let Some(writer) = self.wal_file.take() else {
            return Ok(());
        };
        let (file, _unwritten) = writer.into_parts();
        file.set_len(self.committed_len)
            .map_err(|e| SyncError::Storage(format!("Failed to trim WAL: {}", e)))?;
        self.wal_file = Some(BufWriter::new(file));
        Ok(())
    }

    /// Read every complete record. A record cut short by a crash was never
    /// acknowledged, so it is dropped instead of failing recovery.
    pub fn read_all(&self) -> Result<WalReadout> {
        if !self.wal_path.exists() {
            return Ok(WalReadout::default());
        }
        let file = File::open(&self.wal_path)
            .map_err(|e| SyncError::Storage(format!("Failed to open WAL for reading: {}", e)))?;
        let mut reader = BufReader::new(file);
        let mut readout = WalReadout::default();

        loop {
            let at_end = reader
                .fill_buf()
                .map_err(|e| SyncError::Storage(format!("Failed to read WAL: {}", e)))?
                .is_empty();
            if at_end {
                break;
            }

            let mut len_bytes = [0u8; 4];
            let mut data = Vec::new();
            let record = reader.read_exact(&mut len_bytes).and_then(|_| {
                data.resize(u32::from_le_bytes(len_bytes) as usize, 0);
                reader.read_exact(&mut data)
            });
            match record {
                Ok(()) => {}
                Err(e) if e.kind() == ErrorKind::UnexpectedEof => {
                    log::warn!(
                        "Discarding torn record at the end of {}",
                        self.wal_path.display()
                    );
                    readout.torn_tail = true;
                    break;
                }
                Err(e) => {
                    return Err(SyncError::Storage(format!(
                        "Failed to read WAL entry: {}",
                        e
                    )));
                }
            }

            let entry: WalEntry = rmp_serde::from_slice(&data).map_err(|e| {
                SyncError::Serialization(format!("Failed to deserialize WAL entry: {}", e))
            })?;
            readout.entries.push(entry);
        }
        Ok(readout)
    }

    /// Empty the log after a checkpoint. The writer stays open whether or
    /// not the truncate succeeds.
    pub fn clear(&mut self) -> Result<()> {
        if self.durability_mode == DurabilityMode::None {
            return Ok(());
        }
        let writer = self.writer()?;
        writer
            .flush()
            .and_then(|_| writer.get_ref().set_len(0))
            .map_err(|e| SyncError::Storage(format!("Failed to truncate WAL: {}", e)))?;
        self.committed_len = 0;
        self.entries_since_checkpoint = 0;
        Ok(())
    }

    pub fn needs_checkpoint(&self) -> bool {
        self.entries_since_checkpoint >= self.checkpoint_threshold
    }

    pub fn entries_since_checkpoint(&self) -> usize {
        self.entries_since_checkpoint
    }

    pub fn set_checkpoint_threshold(&mut self, threshold: usize) {
        self.checkpoint_threshold = threshold;
    }

    pub fn path(&self) -> &Path {
        &self.wal_path
    }
}

fn open_for_append(path: &Path) -> Result<File> {
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|e| SyncError::Storage(format!("Failed to open WAL file: {}", e)))
}

// ============================================================================
// Snapshot Manager
// ============================================================================

/// Whole-file snapshot written through a temp file and rename.
pub struct SnapshotManager<S> {
    snapshot_path: PathBuf,
    _state: PhantomData<fn() -> S>,
}

impl<S: Serialize + DeserializeOwned> SnapshotManager<S> {
    pub fn new<P: AsRef<Path>>(snapshot_path: P) -> Self {
        Self {
            snapshot_path: snapshot_path.as_ref().to_path_buf(),
            _state: PhantomData,
        }
    }

    pub fn save(&self, snapshot: &S) -> Result<()> {
        if let Some(parent) = self.snapshot_path.parent() {
            fs::create_dir_all(parent).map_err(|e| {
                SyncError::Storage(format!("Failed to create snapshot directory: {}", e))
            })?;
        }
        let temp_path = self.snapshot_path.with_extension("tmp");
        let temp_file = File::create(&temp_path)
            .map_err(|e| SyncError::Storage(format!("Failed to create temp file: {}", e)))?;
        let mut writer = BufWriter::new(temp_file);
        let serialized = rmp_serde::to_vec_named(snapshot).map_err(|e| {
            SyncError::Serialization(format!("Failed to serialize snapshot: {}", e))
        })?;
        writer
            .write_all(&serialized)
            .and_then(|_| writer.flush())
            .and_then(|_| writer.get_mut().sync_all())
            .map_err(|e| SyncError::Storage(format!("Failed to write snapshot: {}", e)))?;
        fs::rename(&temp_path, &self.snapshot_path)
            .map_err(|e| SyncError::Storage(format!("Failed to rename snapshot: {}", e)))?;
        Ok(())
    }

    pub fn load(&self) -> Result<Option<S>> {
        if !self.snapshot_path.exists() {
            return Ok(None);
        }
        let mut file = File::open(&self.snapshot_path)
            .map_err(|e| SyncError::Storage(format!("Failed to open snapshot: {}", e)))?;
        let mut data = Vec::new();
        file.read_to_end(&mut data)
            .map_err(|e| SyncError::Storage(format!("Failed to read snapshot: {}", e)))?;
        let snapshot = rmp_serde::from_slice(&data).map_err(|e| {
            SyncError::Serialization(format!("Failed to deserialize snapshot: {}", e))
        })?;
        Ok(Some(snapshot))
    }

    pub fn exists(&self) -> bool {
        self.snapshot_path.exists()
    }
}

// ============================================================================
// Persistence Manager
// ============================================================================

/// Outcome of opening an existing data directory.
#[derive(Debug, Default)]
pub struct Recovery {
    pub tables: DurableTables,
    pub replayed: usize,
    pub torn_tail: bool,
}

pub struct PersistenceManager {
    wal: WalManager,
    snapshot: SnapshotManager<StoreSnapshot<DurableTables>>,
    durability_mode: DurabilityMode,
}

impl PersistenceManager {
    pub fn new<P: AsRef<Path>>(data_dir: P, durability_mode: DurabilityMode) -> Result<Self> {
        let data_dir = data_dir.as_ref();
        let wal = WalManager::new(data_dir.join(WAL_FILE), durability_mode)?;
        let snapshot = SnapshotManager::new(data_dir.join(SNAPSHOT_FILE));
        Ok(Self {
            wal,
            snapshot,
            durability_mode,
        })
    }

    pub fn log(&mut self, entry: &WalEntry) -> Result<()> {
        self.wal.append(entry)
    }

    pub fn checkpoint(&mut self, tables: &DurableTables) -> Result<()> {
        if self.durability_mode == DurabilityMode::None {
            return Ok(());
        }
        self.snapshot.save(&StoreSnapshot::new(tables.clone()))?;
        self.wal.clear()?;
        Ok(())
    }

    pub fn needs_checkpoint(&self) -> bool {
        self.wal.needs_checkpoint()
    }

    /// Load the last snapshot and replay the log on top of it.
    pub fn recover(&self) -> Result<Recovery> {
        let mut tables = match self.snapshot.load()? {
            Some(snapshot) => snapshot.state,
            None => DurableTables::default(),
        };
        tables.rebuild_indexes();

        let readout = self.wal.read_all()?;
        let replayed = readout.entries.len();
        for entry in readout.entries {
            tables.apply(entry);
        }

        Ok(Recovery {
            tables,
            replayed,
            torn_tail: readout.torn_tail,
        })
    }

    pub fn wal(&self) -> &WalManager {
        &self.wal
    }

    pub fn wal_mut(&mut self) -> &mut WalManager {
        &mut self.wal
    }

    pub fn durability_mode(&self) -> DurabilityMode {
        self.durability_mode
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn topology(count: u32) -> WalEntry {
        WalEntry::RegisterTopology {
            worker_class: "quest_sessions".to_string(),
            shard_count: count,
        }
    }

    #[test]
    fn test_wal_append_and_read() {
        let temp_dir = TempDir::new().unwrap();
        let mut wal =
            WalManager::new(temp_dir.path().join("test.wal"), DurabilityMode::Sync).unwrap();
        wal.append(&topology(1)).unwrap();
        wal.append(&WalEntry::CommitSessions(SessionCommit::new().clear_open(3)))
            .unwrap();

        let readout = wal.read_all().unwrap();
        assert_eq!(readout.entries.len(), 2);
        assert!(!readout.torn_tail);
        assert_eq!(readout.entries[0], topology(1));
    }

    #[test]
    fn test_torn_tail_is_discarded() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("test.wal");
        let mut wal = WalManager::new(&path, DurabilityMode::Sync).unwrap();
        wal.append(&topology(2)).unwrap();
        drop(wal);

        let mut file = OpenOptions::new().append(true).open(&path).unwrap();
        file.write_all(&64u32.to_le_bytes()).unwrap();
        file.write_all(&[1, 2, 3]).unwrap();
        drop(file);

        let wal = WalManager::new(&path, DurabilityMode::Sync).unwrap();
        let readout = wal.read_all().unwrap();
        assert_eq!(readout.entries, vec![topology(2)]);
        assert!(readout.torn_tail);
    }

    #[test]
    fn test_failed_write_leaves_no_partial_record() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("test.wal");
        let mut wal = WalManager::new(&path, DurabilityMode::Sync).unwrap();
        wal.append(&topology(1)).unwrap();

        // A write that died halfway: a prefix reached the file, the rest is buffered.
        let writer = wal.wal_file.as_mut().unwrap();
        writer.get_mut().write_all(&64u32.to_le_bytes()).unwrap();
        writer.write_all(&[1, 2, 3]).unwrap();
        wal.discard_unacknowledged().unwrap();

        wal.append(&topology(2)).unwrap();
        let readout = wal.read_all().unwrap();
        assert_eq!(readout.entries, vec![topology(1), topology(2)]);
        assert!(!readout.torn_tail);
        assert_eq!(wal.entries_since_checkpoint(), 2);
    }

    #[test]
    fn test_dropped_writer_reopens_at_last_good_record() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("test.wal");
        let mut wal = WalManager::new(&path, DurabilityMode::Sync).unwrap();
        wal.append(&topology(1)).unwrap();

        let mut file = OpenOptions::new().append(true).open(&path).unwrap();
        file.write_all(&[9, 0, 0, 0, 1]).unwrap();
        drop(file);
        wal.wal_file = None;

        wal.append(&topology(2)).unwrap();
        let readout = wal.read_all().unwrap();
        assert_eq!(readout.entries, vec![topology(1), topology(2)]);
        assert!(!readout.torn_tail);
    }

    #[test]
    fn test_clear_keeps_the_log_writable() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("test.wal");
        let mut wal = WalManager::new(&path, DurabilityMode::Async).unwrap();
        wal.append(&topology(1)).unwrap();
        wal.append(&topology(2)).unwrap();

        wal.clear().unwrap();
        assert!(wal.wal_file.is_some());
        assert_eq!(fs::metadata(&path).unwrap().len(), 0);

        wal.append(&topology(3)).unwrap();
        assert_eq!(wal.read_all().unwrap().entries, vec![topology(3)]);
    }

    #[test]
    fn test_no_durability_writes_nothing() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("test.wal");
        let mut wal = WalManager::new(&path, DurabilityMode::None).unwrap();
        wal.append(&topology(1)).unwrap();
        assert!(!path.exists());
        assert_eq!(wal.entries_since_checkpoint(), 0);
    }

    #[test]
    fn test_checkpoint_clears_wal() {
        let temp_dir = TempDir::new().unwrap();
        let mut persistence =
            PersistenceManager::new(temp_dir.path(), DurabilityMode::Sync).unwrap();
        persistence.log(&topology(3)).unwrap();
        assert_eq!(persistence.wal().entries_since_checkpoint(), 1);

        let mut tables = DurableTables::default();
        tables.apply(topology(3));
        persistence.checkpoint(&tables).unwrap();
        assert_eq!(persistence.wal().entries_since_checkpoint(), 0);

        let recovery = persistence.recover().unwrap();
        assert_eq!(recovery.replayed, 0);
        assert_eq!(recovery.tables.topology("quest_sessions"), Some(3));
    }
}
