use std::collections::HashSet;
use std::sync::{Mutex, MutexGuard, PoisonError};

use anyhow::{Context, Result};
use serde_json::Value;
use tracing::{debug, error, warn};

use crate::config::Config;
use crate::store::{FileBackend, KeyringBackend, MemoryBackend, SecretBackend};

/// Storage key for the access token
pub const ACCESS_TOKEN_KEY: &str = "authToken";

/// Storage key for the refresh token
pub const REFRESH_TOKEN_KEY: &str = "refreshToken";

/// Storage key for the serialized user record
pub const USER_DATA_KEY: &str = "userData";

const ALL_KEYS: [&str; 3] = [ACCESS_TOKEN_KEY, REFRESH_TOKEN_KEY, USER_DATA_KEY];

/// Access token plus the optional refresh token, as persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CredentialBundle {
    pub access_token: String,
    pub refresh_token: Option<String>,
}

/// Durable key/value store for session secrets.
///
/// Writes go to the preferred backend (normally the OS keychain) and fall
/// back to a second backend when the preferred one is unavailable or fails.
/// Storage errors are logged and absorbed: the in-memory session stays
/// authoritative for the running process, so a failed write only costs
/// persistence across restarts.
pub struct CredentialStore {
    preferred: Box<dyn SecretBackend>,
    fallback: Box<dyn SecretBackend>,
    // Keys whose latest value only made it to the fallback
    pinned: Mutex<HashSet<String>>,
}

impl CredentialStore {
    pub fn new(preferred: Box<dyn SecretBackend>, fallback: Box<dyn SecretBackend>) -> Self {
        Self {
            preferred,
            fallback,
            pinned: Mutex::new(HashSet::new()),
        }
    }

    fn pinned(&self) -> MutexGuard<'_, HashSet<String>> {
        self.pinned.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Keychain first, credential file in the app data directory second.
    pub fn from_config(config: &Config) -> Result<Self> {
        let data_dir = config.data_dir()?;
        Ok(Self::new(
            Box::new(KeyringBackend::new(config.keyring_service.clone())),
            Box::new(FileBackend::in_dir(&data_dir)),
        ))
    }

    /// Nothing survives the process.
    pub fn in_memory() -> Self {
        Self::new(Box::new(MemoryBackend::new()), Box::new(MemoryBackend::new()))
    }

    pub fn set(&self, key: &str, value: &str) {
        if !self.preferred.is_available() {
            self.set_fallback(key, value);
            return;
        }

        match self.preferred.set(key, value) {
            Ok(()) => {
                self.pinned().remove(key);
                // An older copy may sit in the fallback from an earlier failed write
                if let Err(e) = self.fallback.delete(key) {
                    debug!(key = key, error = %e, "Could not clear stale fallback copy");
                }
            }
            Err(e) => {
                warn!(
                    key = key,
                    backend = self.preferred.name(),
                    error = %e,
                    "Secure storage write failed, falling back"
                );
                self.set_fallback(key, value);
                // Keep get() from returning the older value still in the preferred backend
                match self.preferred.delete(key) {
                    Ok(()) => {
                        self.pinned().remove(key);
                    }
                    Err(e) => {
                        debug!(key = key, error = %e, "Could not clear stale preferred copy");
                        self.pinned().insert(key.to_string());
                    }
                }
            }
        }
    }

    fn set_fallback(&self, key: &str, value: &str) {
        if let Err(e) = self.fallback.set(key, value) {
            error!(
                key = key,
                backend = self.fallback.name(),
                error = %e,
                "Fallback storage write also failed"
            );
        }
    }

    pub fn get(&self, key: &str) -> Option<String> {
        if self.pinned().contains(key) {
            if let Some(value) = self.read_fallback(key) {
                return Some(value);
            }
        }

        if self.preferred.is_available() {
            match self.preferred.get(key) {
                Ok(Some(value)) => return Some(value),
                Ok(None) => {}
                Err(e) => {
                    warn!(
                        key = key,
                        backend = self.preferred.name(),
                        error = %e,
                        "Secure storage read failed, falling back"
                    );
                }
            }
        }

        self.read_fallback(key)
    }

    fn read_fallback(&self, key: &str) -> Option<String> {
        match self.fallback.get(key) {
            Ok(value) => value,
            Err(e) => {
                error!(
                    key = key,
                    backend = self.fallback.name(),
                    error = %e,
                    "Fallback storage read also failed"
                );
                None
            }
        }
    }

    /// Remove the key from both backends.
    pub fn delete(&self, key: &str) {
        if self.preferred.is_available() {
            if let Err(e) = self.preferred.delete(key) {
                warn!(key = key, backend = self.preferred.name(), error = %e, "Storage delete failed");
            }
        }
        if let Err(e) = self.fallback.delete(key) {
            warn!(key = key, backend = self.fallback.name(), error = %e, "Storage delete failed");
        }
        self.pinned().remove(key);
    }

    /// Remove every session key.
    pub fn clear_all(&self) {
        for key in ALL_KEYS {
            self.delete(key);
        }
    }

    /// The persisted tokens, if an access token is present.
    pub fn load_bundle(&self) -> Option<CredentialBundle> {
        let access_token = self.get(ACCESS_TOKEN_KEY)?;
        Some(CredentialBundle {
            access_token,
            refresh_token: self.get(REFRESH_TOKEN_KEY),
        })
    }

    /// Persist the tokens. A bundle without a refresh token leaves the
    /// stored one in place.
    pub fn save_bundle(&self, bundle: &CredentialBundle) {
        self.set(ACCESS_TOKEN_KEY, &bundle.access_token);
        if let Some(ref refresh) = bundle.refresh_token {
            self.set(REFRESH_TOKEN_KEY, refresh);
        }
    }

    /// The persisted user record. `Ok(None)` when nothing is stored, an error
    /// when the stored value is not a JSON object.
    pub fn load_user_json(&self) -> Result<Option<Value>> {
        let Some(raw) = self.get(USER_DATA_KEY) else {
            return Ok(None);
        };
        let user: Value = serde_json::from_str(&raw).context("Failed to parse persisted user record")?;
        if !user.is_object() {
            anyhow::bail!("Persisted user record is not an object");
        }
        Ok(Some(user))
    }

    pub fn save_user_json(&self, user: &Value) {
        self.set(USER_DATA_KEY, &user.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    /// Backend that fails every operation, counting the attempts.
    #[derive(Default)]
    struct BrokenBackend {
        calls: Arc<AtomicUsize>,
    }

    impl SecretBackend for BrokenBackend {
        fn name(&self) -> &'static str {
            "broken"
        }

        fn get(&self, _key: &str) -> Result<Option<String>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(anyhow::anyhow!("keychain unavailable"))
        }

        fn set(&self, _key: &str, _value: &str) -> Result<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(anyhow::anyhow!("keychain unavailable"))
        }

        fn delete(&self, _key: &str) -> Result<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(anyhow::anyhow!("keychain unavailable"))
        }
    }

    struct UnavailableBackend;

    impl SecretBackend for UnavailableBackend {
        fn name(&self) -> &'static str {
            "unavailable"
        }

        fn is_available(&self) -> bool {
            false
        }

        fn get(&self, _key: &str) -> Result<Option<String>> {
            panic!("unavailable backend must not be read");
        }

        fn set(&self, _key: &str, _value: &str) -> Result<()> {
            panic!("unavailable backend must not be written");
        }

        fn delete(&self, _key: &str) -> Result<()> {
            panic!("unavailable backend must not be touched");
        }
    }

    #[test]
    fn test_read_your_writes_with_healthy_backend() {
        let store = CredentialStore::in_memory();
        store.set(ACCESS_TOKEN_KEY, "token-1");
        assert_eq!(store.get(ACCESS_TOKEN_KEY).as_deref(), Some("token-1"));
        store.set(ACCESS_TOKEN_KEY, "token-2");
        assert_eq!(store.get(ACCESS_TOKEN_KEY).as_deref(), Some("token-2"));
    }

    #[test]
    fn test_read_your_writes_when_preferred_fails() {
        let calls = Arc::new(AtomicUsize::new(0));
        let store = CredentialStore::new(
            Box::new(BrokenBackend { calls: calls.clone() }),
            Box::new(MemoryBackend::new()),
        );

        for (key, value) in [
            (ACCESS_TOKEN_KEY, "access"),
            (REFRESH_TOKEN_KEY, "refresh"),
            (USER_DATA_KEY, r#"{"id":"1"}"#),
        ] {
            store.set(key, value);
            assert_eq!(store.get(key).as_deref(), Some(value));
        }
        assert!(calls.load(Ordering::SeqCst) > 0);
    }

    #[test]
    fn test_unavailable_preferred_goes_straight_to_fallback() {
        let store = CredentialStore::new(Box::new(UnavailableBackend), Box::new(MemoryBackend::new()));
        store.set(ACCESS_TOKEN_KEY, "token");
        assert_eq!(store.get(ACCESS_TOKEN_KEY).as_deref(), Some("token"));
        store.delete(ACCESS_TOKEN_KEY);
        assert_eq!(store.get(ACCESS_TOKEN_KEY), None);
    }

    #[test]
    fn test_get_checks_fallback_when_preferred_is_empty() {
        let fallback = MemoryBackend::new();
        fallback.set(REFRESH_TOKEN_KEY, "from-fallback").unwrap();
        let store = CredentialStore::new(Box::new(MemoryBackend::new()), Box::new(fallback));
        assert_eq!(store.get(REFRESH_TOKEN_KEY).as_deref(), Some("from-fallback"));
        assert_eq!(store.get(ACCESS_TOKEN_KEY), None);
    }

    /// Lets a test keep a handle on a backend owned by the store.
    struct Shared(Arc<MemoryBackend>);

    impl SecretBackend for Shared {
        fn name(&self) -> &'static str {
            "shared"
        }

        fn get(&self, key: &str) -> Result<Option<String>> {
            self.0.get(key)
        }

        fn set(&self, key: &str, value: &str) -> Result<()> {
            self.0.set(key, value)
        }

        fn delete(&self, key: &str) -> Result<()> {
            self.0.delete(key)
        }
    }

    #[test]
    fn test_successful_write_clears_stale_fallback_copy() {
        let fallback = Arc::new(MemoryBackend::new());
        fallback.set(ACCESS_TOKEN_KEY, "stale").unwrap();
        let store = CredentialStore::new(
            Box::new(MemoryBackend::new()),
            Box::new(Shared(fallback.clone())),
        );

        store.set(ACCESS_TOKEN_KEY, "fresh");
        assert_eq!(fallback.get(ACCESS_TOKEN_KEY).unwrap(), None);
        assert_eq!(store.get(ACCESS_TOKEN_KEY).as_deref(), Some("fresh"));
    }

    #[test]
    fn test_failures_in_both_backends_are_absorbed() {
        let store = CredentialStore::new(
            Box::new(BrokenBackend::default()),
            Box::new(BrokenBackend::default()),
        );
        store.set(ACCESS_TOKEN_KEY, "token");
        assert_eq!(store.get(ACCESS_TOKEN_KEY), None);
        store.delete(ACCESS_TOKEN_KEY);
        store.clear_all();
    }

    /// Keychain that still serves an old value but rejects every change.
    struct FrozenBackend;

    impl SecretBackend for FrozenBackend {
        fn name(&self) -> &'static str {
            "frozen"
        }

        fn get(&self, _key: &str) -> Result<Option<String>> {
            Ok(Some("stale".to_string()))
        }

        fn set(&self, _key: &str, _value: &str) -> Result<()> {
            Err(anyhow::anyhow!("keychain locked"))
        }

        fn delete(&self, _key: &str) -> Result<()> {
            Err(anyhow::anyhow!("keychain locked"))
        }
    }

    #[test]
    fn test_fallback_wins_when_stale_preferred_copy_cannot_be_removed() {
        let store = CredentialStore::new(Box::new(FrozenBackend), Box::new(MemoryBackend::new()));
        store.set(ACCESS_TOKEN_KEY, "fresh");
        assert_eq!(store.get(ACCESS_TOKEN_KEY).as_deref(), Some("fresh"));

        // Keys never written this process still come from the keychain
        assert_eq!(store.get(REFRESH_TOKEN_KEY).as_deref(), Some("stale"));
    }

    #[test]
    fn test_read_your_writes_with_torn_credential_file() {
        let dir = tempfile::tempdir().unwrap();
        let file = FileBackend::in_dir(dir.path());
        std::fs::write(file.path(), "{\"authToken\": \"tru").unwrap();

        let store = CredentialStore::new(Box::new(BrokenBackend::default()), Box::new(file));
        store.set(ACCESS_TOKEN_KEY, "fresh");
        assert_eq!(store.get(ACCESS_TOKEN_KEY).as_deref(), Some("fresh"));
    }

    #[test]
    fn test_bundle_round_trip_keeps_unrotated_refresh_token() {
        let store = CredentialStore::in_memory();
        assert_eq!(store.load_bundle(), None);

        store.save_bundle(&CredentialBundle {
            access_token: "access-1".to_string(),
            refresh_token: Some("refresh-1".to_string()),
        });
        store.save_bundle(&CredentialBundle {
            access_token: "access-2".to_string(),
            refresh_token: None,
        });
        assert_eq!(
            store.load_bundle(),
            Some(CredentialBundle {
                access_token: "access-2".to_string(),
                refresh_token: Some("refresh-1".to_string()),
            })
        );
    }

    #[test]
    fn test_load_user_json() {
        let store = CredentialStore::in_memory();
        assert!(store.load_user_json().unwrap().is_none());

        let user = serde_json::json!({"id": "1", "email": "a@example.com"});
        store.save_user_json(&user);
        assert_eq!(store.load_user_json().unwrap(), Some(user));

        store.set(USER_DATA_KEY, "{broken");
        assert!(store.load_user_json().is_err());
        store.set(USER_DATA_KEY, "[1, 2]");
        assert!(store.load_user_json().is_err());
    }

    #[test]
    fn test_clear_all_removes_every_key() {
        let store = CredentialStore::in_memory();
        store.set(ACCESS_TOKEN_KEY, "a");
        store.set(REFRESH_TOKEN_KEY, "r");
        store.set(USER_DATA_KEY, "{}");
        store.clear_all();
        for key in ALL_KEYS {
            assert_eq!(store.get(key), None);
        }
    }
}
