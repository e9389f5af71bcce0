//! Atomic replacement of the engine's backing file

use mqstore_core::StorageResult;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

/// Writes a full snapshot to `{path}.tmp` and renames it over `path` on commit.
///
/// A reader of `path` sees either the previous snapshot or the new one, never a
/// partial write. Dropping the writer without committing removes the temp file.
pub struct AtomicWriter {
    temp_path: PathBuf,
    final_path: PathBuf,
    file: Option<File>,
    sync: bool,
}

impl AtomicWriter {
    /// Start a replacement of `path`. The parent directory must already exist.
    pub fn create<P: AsRef<Path>>(path: P, sync: bool) -> StorageResult<Self> {
        let final_path = path.as_ref().to_path_buf();
        let temp_path = Self::temp_path(&final_path);
        let file = File::create(&temp_path)?;

        Ok(Self {
            temp_path,
            final_path,
            file: Some(file),
            sync,
        })
    }

    pub fn write(&mut self, data: &[u8]) -> StorageResult<()> {
        if let Some(file) = self.file.as_mut() {
            file.write_all(data)?;
        }
        Ok(())
    }

    /// Flush, optionally fsync, and rename the temp file into place
    pub fn commit(mut self) -> StorageResult<()> {
        if let Some(mut file) = self.file.take() {
            file.flush()?;
            if self.sync {
                file.sync_all()?;
            }
        }

        fs::rename(&self.temp_path, &self.final_path)?;
        Ok(())
    }

    fn temp_path(final_path: &Path) -> PathBuf {
        let mut temp = final_path.as_os_str().to_owned();
        temp.push(".tmp");
        PathBuf::from(temp)
    }
}

impl Drop for AtomicWriter {
    fn drop(&mut self) {
        // Absent after a successful rename
        let _ = fs::remove_file(&self.temp_path);
    }
}
