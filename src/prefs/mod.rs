//! Namespaced key/value preference store.
//!
//! Runtime settings (forwarder target, sampling interval, log forwarding)
//! live here rather than in the bootstrap file so they can change without a
//! restart. Values are strings; [`ServiceConfig`] interprets them.

use std::{
    collections::HashMap,
    fs,
    path::{Path, PathBuf},
};

use parking_lot::{Mutex, RwLock};
use thiserror::Error;
use tracing::debug;

mod service_config;

pub use self::service_config::{keys, ServiceConfig, DEFAULT_INTERVAL, MIN_INTERVAL};

#[derive(Debug, Error)]
pub enum PreferenceError {
    #[error("Failed to access preference file {path}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse preference file {path}: {reason}")]
    Parse { path: String, reason: String },

    #[error("Failed to serialize preferences: {0}")]
    Serialize(String),

    #[error("Invalid value {value:?} for preference '{key}': {reason}")]
    InvalidValue {
        key: String,
        value: String,
        reason: String,
    },
}

/// Access to the preference store. Implementations must be thread-safe.
pub trait PreferenceStore: Send + Sync {
    fn get(&self, domain: &str, key: &str) -> Result<Option<String>, PreferenceError>;

    fn set(&self, domain: &str, key: &str, value: &str) -> Result<(), PreferenceError>;

    /// Like [`get`](Self::get) with a fallback for absent keys.
    fn get_or(&self, domain: &str, key: &str, default: &str) -> Result<String, PreferenceError> {
        Ok(self
            .get(domain, key)?
            .unwrap_or_else(|| default.to_string()))
    }
}

/// In-process store, lost on exit.
#[derive(Debug, Default)]
pub struct MemoryPreferences {
    values: RwLock<HashMap<(String, String), String>>,
}

impl MemoryPreferences {
    pub fn new() -> Self {
        Self::default()
    }
}

impl PreferenceStore for MemoryPreferences {
    fn get(&self, domain: &str, key: &str) -> Result<Option<String>, PreferenceError> {
        Ok(self
            .values
            .read()
            .get(&(domain.to_string(), key.to_string()))
            .cloned())
    }

    fn set(&self, domain: &str, key: &str, value: &str) -> Result<(), PreferenceError> {
        self.values
            .write()
            .insert((domain.to_string(), key.to_string()), value.to_string());
        Ok(())
    }
}

/// Store persisted as a TOML document with one table per domain:
///
/// ```toml
/// [fluentbot]
/// host = "10.0.0.5"
/// port = "24224"
/// ```
///
/// The file is read on every access so that external edits are picked up by
/// the next start.
#[derive(Debug)]
pub struct FilePreferences {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl FilePreferences {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn io_error(&self, source: std::io::Error) -> PreferenceError {
        PreferenceError::Io {
            path: self.path.display().to_string(),
            source,
        }
    }

    fn load(&self) -> Result<toml::Table, PreferenceError> {
        let raw = match fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(toml::Table::new()),
            Err(e) => return Err(self.io_error(e)),
        };

        toml::from_str::<toml::Table>(&raw).map_err(|e| PreferenceError::Parse {
            path: self.path.display().to_string(),
            reason: e.to_string(),
        })
    }

    fn store(&self, table: &toml::Table) -> Result<(), PreferenceError> {
        let raw =
            toml::to_string_pretty(table).map_err(|e| PreferenceError::Serialize(e.to_string()))?;

        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|e| self.io_error(e))?;
        }

        // Write then rename so readers never see a half-written file
        let tmp = self.path.with_extension("toml.tmp");
        fs::write(&tmp, raw).map_err(|e| self.io_error(e))?;
        fs::rename(&tmp, &self.path).map_err(|e| self.io_error(e))
    }
}

impl PreferenceStore for FilePreferences {
    fn get(&self, domain: &str, key: &str) -> Result<Option<String>, PreferenceError> {
        let table = self.load()?;
        let value = table
            .get(domain)
            .and_then(toml::Value::as_table)
            .and_then(|section| section.get(key));

        Ok(value.map(|value| match value {
            toml::Value::String(s) => s.clone(),
            other => other.to_string(),
        }))
    }

    fn set(&self, domain: &str, key: &str, value: &str) -> Result<(), PreferenceError> {
        let _guard = self.write_lock.lock();
        let mut table = self.load()?;

        let section = table
            .entry(domain.to_string())
            .or_insert_with(|| toml::Value::Table(toml::Table::new()));
        let toml::Value::Table(section) = section else {
            return Err(PreferenceError::Parse {
                path: self.path.display().to_string(),
                reason: format!("'{}' is not a table", domain),
            });
        };
        section.insert(key.to_string(), toml::Value::String(value.to_string()));

        self.store(&table)?;
        debug!("Preference {}/{} updated", domain, key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_store_is_namespaced() {
        let store = MemoryPreferences::new();
        store.set("a", "host", "one").unwrap();
        store.set("b", "host", "two").unwrap();

        assert_eq!(store.get("a", "host").unwrap().as_deref(), Some("one"));
        assert_eq!(store.get("b", "host").unwrap().as_deref(), Some("two"));
        assert_eq!(store.get("c", "host").unwrap(), None);
        assert_eq!(store.get_or("c", "host", "fallback").unwrap(), "fallback");
    }

    #[test]
    fn file_store_persists_across_instances() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/prefs.toml");

        FilePreferences::new(&path).set("fluentbot", "host", "10.0.0.5").unwrap();
        FilePreferences::new(&path).set("fluentbot", "port", "24225").unwrap();

        let store = FilePreferences::new(&path);
        assert_eq!(store.get("fluentbot", "host").unwrap().as_deref(), Some("10.0.0.5"));
        assert_eq!(store.get("fluentbot", "port").unwrap().as_deref(), Some("24225"));
        assert!(!path.with_extension("toml.tmp").exists());
    }

    #[test]
    fn file_store_reads_hand_written_scalars() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("prefs.toml");
        fs::write(&path, "[fluentbot]\nport = 24230\nqi_log = true\n").unwrap();

        let store = FilePreferences::new(&path);
        assert_eq!(store.get("fluentbot", "port").unwrap().as_deref(), Some("24230"));
        assert_eq!(store.get("fluentbot", "qi_log").unwrap().as_deref(), Some("true"));
        assert_eq!(store.get("fluentbot", "host").unwrap(), None);
    }

    #[test]
    fn missing_file_reads_as_empty() {
        let store = FilePreferences::new("/nonexistent/fluentbot/prefs.toml");
        assert_eq!(store.get("fluentbot", "host").unwrap(), None);
    }

    #[test]
    fn corrupt_file_is_a_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("prefs.toml");
        fs::write(&path, "[fluentbot\n").unwrap();

        let err = FilePreferences::new(&path).get("fluentbot", "host").unwrap_err();
        assert!(matches!(err, PreferenceError::Parse { .. }));
    }
}
