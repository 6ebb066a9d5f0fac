//! Storage backends for small secrets.
//!
//! - `KeyringBackend`: the OS keychain, preferred when available
//! - `FileBackend`: a JSON file in the local data directory, the fallback
//! - `MemoryBackend`: process-lifetime only
//!
//! The tiered policy that combines them lives in `auth::CredentialStore`.

pub mod backend;
pub mod file;

pub use backend::{KeyringBackend, MemoryBackend, SecretBackend};
pub use file::FileBackend;
