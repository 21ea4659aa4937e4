// ── Registry persistence ──
//
// One JSON document holding the three buckets. Writes go to a sibling
// temp file that is renamed over the target, so readers never observe
// a half-written document.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::error::CoreError;
use crate::model::RegistrySnapshot;

/// File-backed store for the registry document.
#[derive(Debug, Clone)]
pub struct StateStore {
    path: PathBuf,
}

impl StateStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the persisted document.
    ///
    /// An absent file is initialized with an empty registry and written
    /// back. A file that exists but does not parse is an error; it is
    /// never overwritten.
    pub fn load_or_init(&self) -> Result<RegistrySnapshot, CoreError> {
        match fs::read_to_string(&self.path) {
            Ok(text) => {
                let snapshot = serde_json::from_str(&text).map_err(|source| {
                    CoreError::MalformedState {
                        path: self.path.clone(),
                        source,
                    }
                })?;
                debug!(path = %self.path.display(), "loaded registry document");
                Ok(snapshot)
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                info!(path = %self.path.display(), "no registry document, starting empty");
                let snapshot = RegistrySnapshot::default();
                self.save(&snapshot)?;
                Ok(snapshot)
            }
            Err(source) => Err(CoreError::Persistence {
                path: self.path.clone(),
                source,
            }),
        }
    }

    /// Load without initializing; `None` when the file does not exist.
    pub fn load(&self) -> Result<Option<RegistrySnapshot>, CoreError> {
        if !self.path.exists() {
            return Ok(None);
        }
        self.load_or_init().map(Some)
    }

    /// Write the whole document atomically.
    pub fn save(&self, snapshot: &RegistrySnapshot) -> Result<(), CoreError> {
        let mut body = serde_json::to_vec_pretty(snapshot)
            .map_err(|e| CoreError::Internal(format!("registry serialization failed: {e}")))?;
        body.push(b'\n');
        write_atomic(&self.path, &body).map_err(|source| CoreError::Persistence {
            path: self.path.clone(),
            source,
        })
    }
}

/// Replace `path` with `contents` through a temp file and rename.
pub(crate) fn write_atomic(path: &Path, contents: &[u8]) -> io::Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }

    let file_name = path
        .file_name()
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "path has no file name"))?;
    let mut tmp_name = std::ffi::OsString::from(".");
    tmp_name.push(file_name);
    tmp_name.push(".tmp");
    let tmp = path.with_file_name(tmp_name);

    let result = (|| {
        let mut file = fs::File::create(&tmp)?;
        file.write_all(contents)?;
        file.sync_all()?;
        fs::rename(&tmp, path)
    })();

    if result.is_err() {
        let _ = fs::remove_file(&tmp);
    }
    result
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::model::{BusAddress, DeviceRecord};
    use pretty_assertions::assert_eq;

    #[test]
    fn absent_file_is_initialized() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::new(dir.path().join("state/devices.json"));

        let snapshot = store.load_or_init().unwrap();
        assert!(snapshot.is_empty());
        assert!(store.path().exists());

        let text = fs::read_to_string(store.path()).unwrap();
        assert!(text.contains("\"new_connections\""));
    }

    #[test]
    fn malformed_file_is_fatal_and_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("devices.json");
        fs::write(&path, "{ not json").unwrap();

        let err = StateStore::new(&path).load_or_init().unwrap_err();
        assert!(matches!(err, CoreError::MalformedState { .. }));
        assert_eq!(fs::read_to_string(&path).unwrap(), "{ not json");
    }

    #[test]
    fn save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::new(dir.path().join("devices.json"));
        let snapshot = RegistrySnapshot {
            connections: vec![
                DeviceRecord::discovered(BusAddress::new(0x20).unwrap())
                    .with_driver("builtin", "Pcf8574")
                    .with_name("Relays")
                    .activated(),
            ],
            ..RegistrySnapshot::default()
        };

        store.save(&snapshot).unwrap();
        assert_eq!(store.load().unwrap(), Some(snapshot));
        assert!(!dir.path().join(".devices.json.tmp").exists());
    }

    #[test]
    fn load_reports_missing_file_as_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::new(dir.path().join("devices.json"));
        assert_eq!(store.load().unwrap(), None);
        assert!(!store.path().exists());
    }
}
