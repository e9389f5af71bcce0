//! Embedded key-value engine and the adapter that opens it
//!
//! The engine keeps named maps in memory. A file-backed engine writes a full
//! snapshot of every map on `commit`; an in-memory engine never touches disk.

use crate::atomic_writer::AtomicWriter;
use mqstore_core::{Engine, StorageError, StorageResult};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::OpenOptions;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Version written into every snapshot file
pub const FORMAT_VERSION: u32 = 1;

type Maps = BTreeMap<String, BTreeMap<String, Vec<u8>>>;

/// Options for opening the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineOptions {
    /// fsync the snapshot before it replaces the previous one
    pub sync_on_commit: bool,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            sync_on_commit: true,
        }
    }
}

/// What the adapter found when opening the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Provenance {
    /// Empty path, volatile engine
    InMemory,
    /// The store file did not exist and was created
    Created,
    /// The store file already existed and was loaded
    Existing,
}

impl Provenance {
    pub fn label(self) -> &'static str {
        match self {
            Provenance::InMemory => "in-memory",
            Provenance::Created => "fresh",
            Provenance::Existing => "existing",
        }
    }
}

/// Result of [`KvEngine::open`]
pub struct OpenedEngine {
    pub engine: Arc<KvEngine>,
    pub provenance: Provenance,
}

#[derive(Serialize)]
struct SnapshotRef<'a> {
    format_version: u32,
    maps: &'a Maps,
}

#[derive(Deserialize)]
struct Snapshot {
    format_version: u32,
    #[serde(default)]
    maps: Maps,
}

/// Embedded engine holding named maps of string keys to byte values
pub struct KvEngine {
    path: Option<PathBuf>,
    options: EngineOptions,
    maps: RwLock<Maps>,
    dirty: AtomicBool,
    closed: AtomicBool,
    commit_lock: Mutex<()>,
    commits: AtomicU64,
}

impl KvEngine {
    /// Open an engine for the configured path.
    ///
    /// An empty path opens a volatile in-memory engine. Otherwise the file is
    /// created if absent (existing data is never truncated) and its contents
    /// are loaded.
    pub fn open(path: &str, options: EngineOptions) -> StorageResult<OpenedEngine> {
        if path.is_empty() {
            tracing::info!("Starting with in-memory store, state is lost on exit");
            return Ok(OpenedEngine {
                engine: Arc::new(Self::with_maps(None, options, Maps::new())),
                provenance: Provenance::InMemory,
            });
        }

        let path = PathBuf::from(path);
        let provenance = Self::create_if_absent(&path)?;
        tracing::info!(
            path = %path.display(),
            "Starting with {} [{}] db file",
            provenance.label(),
            path.display()
        );

        let maps = Self::load(&path)?;
        Ok(OpenedEngine {
            engine: Arc::new(Self::with_maps(Some(path), options, maps)),
            provenance,
        })
    }

    /// Volatile engine, mostly useful in tests
    pub fn in_memory() -> Self {
        Self::with_maps(None, EngineOptions::default(), Maps::new())
    }

    /// Backing file, `None` for an in-memory engine
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    fn with_maps(path: Option<PathBuf>, options: EngineOptions, maps: Maps) -> Self {
        Self {
            path,
            options,
            maps: RwLock::new(maps),
            dirty: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            commit_lock: Mutex::new(()),
            commits: AtomicU64::new(0),
        }
    }

    fn create_if_absent(path: &Path) -> StorageResult<Provenance> {
        match OpenOptions::new().write(true).create_new(true).open(path) {
            Ok(_) => Ok(Provenance::Created),
            Err(e) if e.kind() == ErrorKind::AlreadyExists => Ok(Provenance::Existing),
            Err(source) => {
                tracing::error!(path = %path.display(), error = %source, "Can't create db file");
                Err(StorageError::Init {
                    path: path.to_path_buf(),
                    source: Box::new(source),
                })
            }
        }
    }

    fn load(path: &Path) -> StorageResult<Maps> {
        let init_error = |source: std::io::Error| StorageError::Init {
            path: path.to_path_buf(),
            source: Box::new(source),
        };

        let content = std::fs::read_to_string(path).map_err(init_error)?;
        if content.trim().is_empty() {
            return Ok(Maps::new());
        }

        let snapshot: Snapshot = serde_json::from_str(&content)
            .map_err(|e| init_error(std::io::Error::new(ErrorKind::InvalidData, e)))?;

        if snapshot.format_version != FORMAT_VERSION {
            return Err(init_error(std::io::Error::new(
                ErrorKind::InvalidData,
                format!(
                    "unsupported store format version {} (expected {})",
                    snapshot.format_version, FORMAT_VERSION
                ),
            )));
        }

        Ok(snapshot.maps)
    }

    fn ensure_open(&self) -> StorageResult<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(StorageError::EngineClosed);
        }
        Ok(())
    }

    fn read(&self) -> StorageResult<RwLockReadGuard<'_, Maps>> {
        self.ensure_open()?;
        self.maps
            .read()
            .map_err(|_| StorageError::InvalidState("engine lock poisoned".to_string()))
    }

    fn write(&self) -> StorageResult<RwLockWriteGuard<'_, Maps>> {
        self.ensure_open()?;
        self.maps
            .write()
            .map_err(|_| StorageError::InvalidState("engine lock poisoned".to_string()))
    }

    fn write_snapshot(&self, path: &Path) -> StorageResult<()> {
        let content = {
            let maps = self.read()?;
            serde_json::to_vec(&SnapshotRef {
                format_version: FORMAT_VERSION,
                maps: &maps,
            })?
        };

        let mut writer = AtomicWriter::create(path, self.options.sync_on_commit)?;
        writer.write(&content)?;
        writer.commit()
    }
}

impl Engine for KvEngine {
    fn get(&self, map: &str, key: &str) -> StorageResult<Option<Vec<u8>>> {
        let maps = self.read()?;
        Ok(maps.get(map).and_then(|m| m.get(key)).cloned())
    }

    fn put(&self, map: &str, key: &str, value: Vec<u8>) -> StorageResult<()> {
        let mut maps = self.write()?;
        maps.entry(map.to_string())
            .or_default()
            .insert(key.to_string(), value);
        self.dirty.store(true, Ordering::Release);
        Ok(())
    }

    fn remove(&self, map: &str, key: &str) -> StorageResult<bool> {
        let mut maps = self.write()?;
        let removed = maps
            .get_mut(map)
            .is_some_and(|m| m.remove(key).is_some());
        if removed {
            self.dirty.store(true, Ordering::Release);
        }
        Ok(removed)
    }

    fn keys(&self, map: &str) -> StorageResult<Vec<String>> {
        let maps = self.read()?;
        Ok(maps
            .get(map)
            .map(|m| m.keys().cloned().collect())
            .unwrap_or_default())
    }

    fn commit(&self) -> StorageResult<()> {
        self.ensure_open()?;
        let _guard = self
            .commit_lock
            .lock()
            .map_err(|_| StorageError::InvalidState("commit lock poisoned".to_string()))?;
        // close may have run while this commit waited on the lock
        self.ensure_open()?;

        if let Some(path) = &self.path
            && self.dirty.swap(false, Ordering::AcqRel)
            && let Err(e) = self.write_snapshot(path)
        {
            self.dirty.store(true, Ordering::Release);
            return Err(e);
        }

        self.commits.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn close(&self) -> StorageResult<()> {
        // Wait out an in-flight commit before refusing further work
        let _guard = self
            .commit_lock
            .lock()
            .map_err(|_| StorageError::InvalidState("commit lock poisoned".to_string()))?;

        if self.closed.swap(true, Ordering::AcqRel) {
            tracing::debug!("Engine already closed");
            return Ok(());
        }

        if let Ok(mut maps) = self.maps.write() {
            maps.clear();
        }
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn commit_count(&self) -> u64 {
        self.commits.load(Ordering::Relaxed)
    }
}
