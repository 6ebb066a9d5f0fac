use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::{Context, Result};
use tracing::{debug, warn};

use super::SecretBackend;

/// File name of the fallback credential store inside the data directory.
const CREDENTIALS_FILE: &str = "credentials.json";

/// Plain JSON map on disk. Weaker at-rest protection than the keychain,
/// but always available. Every write goes straight to disk, so a read right
/// after a write sees it.
///
/// Writes replace the file through a rename, and an unreadable file is
/// overwritten by the next write rather than blocking it.
pub struct FileBackend {
    path: PathBuf,
    // Serializes read-modify-write cycles within the process
    lock: Mutex<()>,
}

impl FileBackend {
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            lock: Mutex::new(()),
        }
    }

    /// Backend at the standard file name inside `dir`.
    pub fn in_dir(dir: &Path) -> Self {
        Self::new(dir.join(CREDENTIALS_FILE))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load(&self) -> Result<BTreeMap<String, String>> {
        if !self.path.exists() {
            return Ok(BTreeMap::new());
        }
        let contents = std::fs::read_to_string(&self.path)
            .with_context(|| format!("Failed to read credential file {}", self.path.display()))?;
        if contents.trim().is_empty() {
            return Ok(BTreeMap::new());
        }
        serde_json::from_str(&contents).context("Failed to parse credential file")
    }

    /// Current contents for a read-modify-write. A file that fails to load
    /// starts over from an empty map so writes keep working.
    fn load_for_write(&self) -> BTreeMap<String, String> {
        match self.load() {
            Ok(values) => values,
            Err(e) => {
                warn!(
                    path = %self.path.display(),
                    error = %e,
                    "Credential file is unreadable, replacing it"
                );
                BTreeMap::new()
            }
        }
    }

    fn save(&self, values: &BTreeMap<String, String>) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = serde_json::to_string_pretty(values)?;

        // Write beside the target and rename over it so a crash never leaves a torn file
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, contents)
            .with_context(|| format!("Failed to write credential file {}", tmp.display()))?;
        std::fs::rename(&tmp, &self.path)
            .with_context(|| format!("Failed to replace credential file {}", self.path.display()))?;
        Ok(())
    }

    fn guard(&self) -> Result<std::sync::MutexGuard<'_, ()>> {
        self.lock
            .lock()
            .map_err(|_| anyhow::anyhow!("Credential file lock poisoned"))
    }
}

impl SecretBackend for FileBackend {
    fn name(&self) -> &'static str {
        "file"
    }

    fn get(&self, key: &str) -> Result<Option<String>> {
        let _guard = self.guard()?;
        Ok(self.load()?.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        let _guard = self.guard()?;
        let mut values = self.load_for_write();
        values.insert(key.to_string(), value.to_string());
        self.save(&values)?;
        debug!(key = key, path = %self.path.display(), "Wrote credential file");
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<()> {
        let _guard = self.guard()?;
        match self.load() {
            Ok(mut values) => {
                if values.remove(key).is_some() {
                    self.save(&values)?;
                }
            }
            Err(e) => {
                // Nothing in an unreadable file can be trusted, the key included
                warn!(path = %self.path.display(), error = %e, "Credential file is unreadable, resetting it");
                self.save(&BTreeMap::new())?;
            }
        }
        Ok(())
    }
}
