//! IdeaSpark core - session, credential storage and entitlements for the
//! IdeaSpark mobile app.
//!
//! The crate keeps a signed-in session alive across restarts and token
//! expiry, routes every backend call through one authenticated gateway, and
//! decides which features the current user may open.
//!
//! ```no_run
//! use std::sync::Arc;
//! use ideaspark_core::{AuthService, Config, CredentialStore, LoginCredentials};
//!
//! # async fn run() -> anyhow::Result<()> {
//! let config = Config::load()?;
//! let store = Arc::new(CredentialStore::from_config(&config)?);
//! let auth = AuthService::new(&config, store)?;
//!
//! let (cached_user, _revalidation) = auth.initialize().await;
//! if cached_user.is_none() {
//!     auth.login(&LoginCredentials::new("ada@example.com", "hunter22")).await?;
//! }
//! let decision = auth.check_feature_access("news-detector").await;
//! println!("news detector: {:?}", decision);
//! # Ok(())
//! # }
//! ```

pub mod api;
pub mod auth;
pub mod config;
pub mod entitlement;
pub mod models;
pub mod store;

pub use api::{ApiClient, ApiError, RequestOptions};
pub use auth::{AuthService, CredentialStore, LoginCredentials, Registration, SessionManager, SessionState};
pub use config::Config;
pub use entitlement::{AccessDecision, EntitlementGate, FeatureKey};
pub use models::{Role, SubscriptionType, UserRecord};

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Install a stderr tracing subscriber for host shells and debugging.
/// `RUST_LOG` overrides `default_level` (e.g. `RUST_LOG=ideaspark_core=debug`).
pub fn init_tracing(default_level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_level));

    // A host may have installed its own subscriber already
    let _ = tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .try_init();
}
