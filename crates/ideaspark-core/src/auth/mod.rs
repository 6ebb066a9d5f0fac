//! Authentication module for managing user sessions and credentials.
//!
//! This module provides:
//! - `CredentialStore`: Tiered secret storage (OS keychain, then a local file)
//! - `SessionManager`: The credential bundle, refresh-on-expiry and teardown
//! - `AuthService`: Sign-in flows and the current user for the UI
//!
//! A failed token refresh always ends the session; callers see
//! `ApiError::SessionExpired` and route the user back to sign-in.

pub mod credentials;
pub mod payload;
pub mod service;
pub mod session;

pub use credentials::{CredentialBundle, CredentialStore, ACCESS_TOKEN_KEY, REFRESH_TOKEN_KEY, USER_DATA_KEY};
pub use payload::{decode_auth_payload, decode_user_payload, AuthPayload};
pub use service::{AuthService, LoginCredentials, Registration};
pub use session::{SessionManager, SessionState};
