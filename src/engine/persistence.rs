use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::Utc;
use serde_json::Value;

use crate::engine::codec;
use crate::Result;

/// Handles disk I/O for the collection cache.
///
/// Saves use an atomic write-then-rename strategy: documents are written to
/// a transient `<name>.json.<millis>.tmp` sibling, the temp file is re-read
/// and re-parsed as a sanity check, then renamed over the canonical
/// `<name>.json`. Readers therefore observe either the old file or the new
/// one, never a partial write. All methods block and are expected to run on
/// the blocking pool.
pub struct Persistence {
    storage_path: PathBuf,
    temp_files: Mutex<HashSet<PathBuf>>,
}

impl Persistence {
    pub fn new<P: AsRef<Path>>(storage_path: P) -> Self {
        Self {
            storage_path: storage_path.as_ref().to_path_buf(),
            temp_files: Mutex::new(HashSet::new()),
        }
    }

    pub fn storage_path(&self) -> &Path {
        &self.storage_path
    }

    pub fn file_path(&self, name: &str) -> PathBuf {
        self.storage_path.join(format!("{name}.json"))
    }

    /// Reads a collection file. `Ok(None)` when the file does not exist;
    /// [`crate::Error::CorruptFile`] when it exists but does not parse.
    /// Stale `.tmp` leftovers from an interrupted save are never read.
    pub fn load(&self, name: &str) -> Result<Option<Vec<Value>>> {
        let path = self.file_path(name);
        let raw = match fs::read_to_string(&path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        codec::decode_collection(&raw).map(Some)
    }

    /// Writes a collection file atomically.
    pub fn save(&self, name: &str, documents: &[Value]) -> Result<()> {
        fs::create_dir_all(&self.storage_path)?;
        let encoded = codec::encode_collection(documents)?;

        let path = self.file_path(name);
        let temp = PathBuf::from(format!(
            "{}.{}.tmp",
            path.display(),
            Utc::now().timestamp_millis()
        ));
        self.temp_files.lock().unwrap().insert(temp.clone());

        let result = self.write_and_swap(&temp, &path, &encoded);
        if result.is_err() {
            let _ = fs::remove_file(&temp);
        }
        self.temp_files.lock().unwrap().remove(&temp);
        result
    }

    fn write_and_swap(&self, temp: &Path, path: &Path, encoded: &str) -> Result<()> {
        fs::write(temp, encoded)?;
        // Read the temp file back before the swap; a failed parse keeps the
        // canonical file untouched.
        let readback = fs::read_to_string(temp)?;
        codec::decode_collection(&readback)?;
        fs::rename(temp, path)?;
        Ok(())
    }

    /// Deletes a collection file. Absence is not an error.
    pub fn remove(&self, name: &str) -> Result<()> {
        match fs::remove_file(self.file_path(name)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Temp paths with a save currently in flight.
    pub fn pending_temp_files(&self) -> Vec<PathBuf> {
        self.temp_files.lock().unwrap().iter().cloned().collect()
    }
}
