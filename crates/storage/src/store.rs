//! Calibration store backends

use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::{CalibrationRecord, StorageError};

/// Persistent calibration store capability
pub trait CalibrationStore: Send + Sync {
    /// Read the stored record, `None` if nothing was ever saved
    fn load(&self) -> Result<Option<CalibrationRecord>, StorageError>;

    /// Replace the stored record
    fn save(&self, record: &CalibrationRecord) -> Result<(), StorageError>;

    /// Remove every stored record
    fn erase_all(&self) -> Result<(), StorageError>;
}

const FORMAT_VERSION: u8 = 1;

#[derive(Serialize, Deserialize)]
struct Envelope {
    version: u8,
    record: CalibrationRecord,
}

/// File-backed store.
///
/// Writes go to a sibling temporary file which is synced and then renamed
/// over the target, so a crash leaves either the old or the new record.
pub struct FileCalibrationStore {
    path: PathBuf,
}

impl FileCalibrationStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

impl CalibrationStore for FileCalibrationStore {
    fn load(&self) -> Result<Option<CalibrationRecord>, StorageError> {
        let bytes = match fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!("No calibration file at {}", self.path.display());
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        };

        let envelope: Envelope = postcard::from_bytes(&bytes)
            .map_err(|e| StorageError::SerializationError(e.to_string()))?;
        if envelope.version != FORMAT_VERSION {
            return Err(StorageError::SerializationError(format!(
                "unsupported calibration format version {}",
                envelope.version
            )));
        }
        envelope.record.validate()?;
        Ok(Some(envelope.record))
    }

    fn save(&self, record: &CalibrationRecord) -> Result<(), StorageError> {
        record.validate()?;
        let bytes = postcard::to_allocvec(&Envelope {
            version: FORMAT_VERSION,
            record: *record,
        })
        .map_err(|e| StorageError::SerializationError(e.to_string()))?;

        if let Some(dir) = self.path.parent().filter(|d| !d.as_os_str().is_empty()) {
            fs::create_dir_all(dir)?;
        }

        let tmp = self.temp_path();
        {
            let mut file = fs::File::create(&tmp)?;
            file.write_all(&bytes)?;
            file.sync_all()?;
        }
        fs::rename(&tmp, &self.path)?;

        info!(
            "Saved calibration to {} (k={:.2})",
            self.path.display(),
            record.k_constant
        );
        Ok(())
    }

    fn erase_all(&self) -> Result<(), StorageError> {
        for path in [self.path.clone(), self.temp_path()] {
            match fs::remove_file(&path) {
                Ok(()) => debug!("Removed {}", path.display()),
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        info!("Erased calibration store {}", self.path.display());
        Ok(())
    }
}

/// In-memory store with failure injection
#[derive(Default)]
pub struct MemoryCalibrationStore {
    record: Mutex<Option<CalibrationRecord>>,
    fail_writes: AtomicBool,
    saves: AtomicU32,
    erases: AtomicU32,
}

impl MemoryCalibrationStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start with a record already persisted
    pub fn with_record(record: CalibrationRecord) -> Self {
        let store = Self::default();
        if let Ok(mut slot) = store.record.lock() {
            *slot = Some(record);
        }
        store
    }

    /// Make subsequent `save` and `erase_all` calls fail
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    pub fn save_count(&self) -> u32 {
        self.saves.load(Ordering::SeqCst)
    }

    pub fn erase_count(&self) -> u32 {
        self.erases.load(Ordering::SeqCst)
    }

    fn check_writable(&self) -> Result<(), StorageError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            warn!("Injected calibration store write failure");
            return Err(StorageError::Backend("write rejected".to_string()));
        }
        Ok(())
    }
}

impl CalibrationStore for MemoryCalibrationStore {
    fn load(&self) -> Result<Option<CalibrationRecord>, StorageError> {
        let slot = self
            .record
            .lock()
            .map_err(|e| StorageError::Backend(format!("Lock error: {}", e)))?;
        Ok(*slot)
    }

    fn save(&self, record: &CalibrationRecord) -> Result<(), StorageError> {
        self.check_writable()?;
        record.validate()?;
        let mut slot = self
            .record
            .lock()
            .map_err(|e| StorageError::Backend(format!("Lock error: {}", e)))?;
        *slot = Some(*record);
        self.saves.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn erase_all(&self) -> Result<(), StorageError> {
        self.check_writable()?;
        let mut slot = self
            .record
            .lock()
            .map_err(|e| StorageError::Backend(format!("Lock error: {}", e)))?;
        *slot = None;
        self.erases.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

impl<T: CalibrationStore + ?Sized> CalibrationStore for std::sync::Arc<T> {
    fn load(&self) -> Result<Option<CalibrationRecord>, StorageError> {
        (**self).load()
    }

    fn save(&self, record: &CalibrationRecord) -> Result<(), StorageError> {
        (**self).save(record)
    }

    fn erase_all(&self) -> Result<(), StorageError> {
        (**self).erase_all()
    }
}
