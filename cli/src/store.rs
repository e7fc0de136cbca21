//! Saved destinations.
//!
//! The engine never reads this file; the CLI resolves a destination here and
//! hands the engine its path.

use engine::Destination;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("cannot access '{}': {source}", .path.display())]
    Io { path: PathBuf, source: io::Error },

    #[error("'{}' is not a valid destinations file: {source}", .path.display())]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },
}

/// Load/save interface for the destination list.
pub trait ConfigStore {
    fn load_destinations(&self) -> Result<Vec<Destination>, StoreError>;
    fn save_destinations(&self, destinations: &[Destination]) -> Result<(), StoreError>;
}

/// On-disk document.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub destinations: Vec<Destination>,
}

/// Destinations kept in a pretty-printed JSON file.
pub struct JsonConfigStore {
    path: PathBuf,
}

impl JsonConfigStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        JsonConfigStore { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn io_err(&self, source: io::Error) -> StoreError {
        StoreError::Io {
            path: self.path.clone(),
            source,
        }
    }
}

impl ConfigStore for JsonConfigStore {
    /// A missing file is an empty list.
    fn load_destinations(&self) -> Result<Vec<Destination>, StoreError> {
        let text = match fs::read_to_string(&self.path) {
            Ok(text) => text,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                log::debug!("{} not found; no saved destinations", self.path.display());
                return Ok(Vec::new());
            }
            Err(e) => return Err(self.io_err(e)),
        };
        let config: AppConfig = serde_json::from_str(&text).map_err(|source| StoreError::Parse {
            path: self.path.clone(),
            source,
        })?;
        Ok(config.destinations)
    }

    /// Written to a sibling temp file and renamed over the old one, so a
    /// crash never leaves a truncated file.
    fn save_destinations(&self, destinations: &[Destination]) -> Result<(), StoreError> {
        let config = AppConfig {
            destinations: destinations.to_vec(),
        };
        let text = serde_json::to_string_pretty(&config).map_err(|source| StoreError::Parse {
            path: self.path.clone(),
            source,
        })?;

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| self.io_err(e))?;
        }
        let file_name = self
            .path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "destinations".to_string());
        let temp = self.path.with_file_name(format!(".{}.tmp", file_name));

        let written = (|| {
            let mut file = fs::File::create(&temp)?;
            file.write_all(text.as_bytes())?;
            file.write_all(b"\n")?;
            file.sync_all()?;
            fs::rename(&temp, &self.path)
        })();
        if let Err(e) = written {
            let _ = fs::remove_file(&temp);
            return Err(self.io_err(e));
        }
        log::debug!("saved {} destination(s) to {}", destinations.len(), self.path.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_missing_file_loads_empty() {
        let dir = TempDir::new().expect("Failed to create temp dir");
        let store = JsonConfigStore::new(dir.path().join("safemove.json"));
        assert!(store.load_destinations().unwrap().is_empty());
    }

    #[test]
    fn test_save_then_load() {
        let dir = TempDir::new().expect("Failed to create temp dir");
        let store = JsonConfigStore::new(dir.path().join("nested").join("safemove.json"));
        let saved = vec![
            Destination::new("NAS", "/mnt/nas"),
            Destination::new("Archive", "/srv/archive"),
        ];

        store.save_destinations(&saved).unwrap();
        assert_eq!(store.load_destinations().unwrap(), saved);

        let leftovers: Vec<_> = fs::read_dir(dir.path().join("nested"))
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[test]
    fn test_document_shape() {
        let dir = TempDir::new().expect("Failed to create temp dir");
        let path = dir.path().join("safemove.json");
        fs::write(
            &path,
            r#"{"destinations":[{"id":"6f1c0d3e-2b7a-4c55-9a43-0c1f2e3d4b5a","name":"Photos","path":"/data/photos"}]}"#,
        )
        .unwrap();

        let loaded = JsonConfigStore::new(&path).load_destinations().unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].name, "Photos");
        assert_eq!(loaded[0].path, PathBuf::from("/data/photos"));

        fs::write(&path, "{}").unwrap();
        assert!(JsonConfigStore::new(&path).load_destinations().unwrap().is_empty());
    }

    #[test]
    fn test_garbage_is_a_parse_error() {
        let dir = TempDir::new().expect("Failed to create temp dir");
        let path = dir.path().join("safemove.json");
        fs::write(&path, "not json").unwrap();
        assert!(matches!(
            JsonConfigStore::new(&path).load_destinations(),
            Err(StoreError::Parse { .. })
        ));
    }
}
