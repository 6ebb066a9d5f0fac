//! Sign-in flows and the current user, as seen by the UI.
//!
//! `AuthService` ties the gateway, the session manager and the entitlement
//! gate together. It is the only component that decodes the cached user
//! record into a typed `UserRecord`.

use std::sync::Arc;

use serde_json::Value;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::api::endpoints::{LoginType, OtpPurpose, RegisterRequest};
use crate::api::{ApiClient, ApiError};
use crate::config::Config;
use crate::entitlement::{has_premium_access, AccessDecision, EntitlementGate};
use crate::models::UserRecord;

use super::payload::{decode_auth_payload, decode_user_payload};
use super::{CredentialStore, SessionManager};

#[derive(Debug, Clone)]
pub struct LoginCredentials {
    /// Email, username or phone number.
    pub identifier: String,
    pub password: String,
    pub login_type: Option<LoginType>,
}

impl LoginCredentials {
    pub fn new(identifier: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            identifier: identifier.into(),
            password: password.into(),
            login_type: None,
        }
    }
}

/// Result of creating an account.
#[derive(Debug, Clone, PartialEq)]
pub enum Registration {
    /// The backend signed the new user in right away.
    SignedIn(UserRecord),
    /// The account exists but the email must be verified before sign-in.
    VerificationRequired { user_id: Option<String> },
}

fn decode_user(value: Value) -> Result<UserRecord, ApiError> {
    serde_json::from_value(value)
        .map_err(|e| ApiError::InvalidResponse(format!("Malformed user record: {}", e)))
}

/// Overlay the fields of `update` onto `base`. Server-sent fields win.
fn merge_user(base: Value, update: Value) -> Value {
    match (base, update) {
        (Value::Object(mut base), Value::Object(update)) => {
            base.extend(update);
            Value::Object(base)
        }
        (_, update) => update,
    }
}

#[derive(Clone)]
pub struct AuthService {
    api: ApiClient,
    gate: Arc<EntitlementGate>,
}

impl AuthService {
    /// Build the full stack from configuration.
    pub fn new(config: &Config, store: Arc<CredentialStore>) -> Result<Self, ApiError> {
        let api = ApiClient::new(config, store)?;
        Ok(Self::with_parts(api, EntitlementGate::new()))
    }

    pub fn with_parts(api: ApiClient, gate: EntitlementGate) -> Self {
        Self {
            api,
            gate: Arc::new(gate),
        }
    }

    pub fn api(&self) -> &ApiClient {
        &self.api
    }

    pub fn session(&self) -> &Arc<SessionManager> {
        self.api.session()
    }

    /// Restore the persisted session and start revalidating it in the
    /// background. Returns the cached user immediately.
    ///
    /// The returned handle resolves once revalidation finishes; dropping it
    /// does not cancel the task.
    pub async fn initialize(&self) -> (Option<UserRecord>, Option<JoinHandle<()>>) {
        self.session().initialize().await;
        let user = self.current_user().await;
        if user.is_none() {
            return (None, None);
        }

        let service = self.clone();
        let handle = tokio::spawn(async move { service.revalidate().await });
        (user, Some(handle))
    }

    /// Fetch the profile to confirm a restored session. Failures keep the
    /// cached user: stale data is better than forcing a login while offline.
    pub async fn revalidate(&self) {
        match self.refresh_user().await {
            Ok(user) => info!(user_id = %user.id, "Session revalidated"),
            Err(ApiError::SessionExpired) => warn!("Restored session has expired"),
            Err(e) => warn!(error = %e, "Failed to refresh user data, using cached data"),
        }
    }

    pub async fn current_user(&self) -> Option<UserRecord> {
        let value = self.session().user_json().await?;
        match decode_user(value) {
            Ok(user) => Some(user),
            Err(e) => {
                warn!(error = %e, "Cached user record is unreadable");
                None
            }
        }
    }

    pub async fn is_authenticated(&self) -> bool {
        self.session().is_authenticated().await
    }

    async fn start_session(&self, body: &Value) -> Result<UserRecord, ApiError> {
        let payload = decode_auth_payload(body)?;
        let user_value = payload
            .user
            .ok_or_else(|| ApiError::InvalidResponse("missing user in auth response".to_string()))?;
        let user = decode_user(user_value.clone())?;

        self.session()
            .set_session(payload.access_token, payload.refresh_token, user_value)
            .await;
        info!(user_id = %user.id, "Signed in");
        Ok(user)
    }

    pub async fn login(&self, credentials: &LoginCredentials) -> Result<UserRecord, ApiError> {
        let body = self
            .api
            .multi_login(&credentials.identifier, &credentials.password, credentials.login_type)
            .await?;
        self.start_session(&body).await
    }

    pub async fn google_login(&self, google_id_token: &str) -> Result<UserRecord, ApiError> {
        let body = self.api.google_login(google_id_token).await?;
        self.start_session(&body).await
    }

    pub async fn register(&self, request: &RegisterRequest) -> Result<Registration, ApiError> {
        let body = self.api.register(request).await?;
        if decode_auth_payload(&body).is_ok() {
            return self.start_session(&body).await.map(Registration::SignedIn);
        }

        let user_id = decode_user_payload(&body).ok().and_then(|user| {
            ["id", "_id", "userId"].iter().find_map(|field| match user.get(*field) {
                Some(Value::String(s)) => Some(s.clone()),
                Some(Value::Number(n)) => Some(n.to_string()),
                _ => None,
            })
        });
        info!(has_user_id = user_id.is_some(), "Registered, email verification required");
        Ok(Registration::VerificationRequired { user_id })
    }

    /// Sign out. The local session ends even when the backend call fails.
    pub async fn logout(&self) {
        if self.is_authenticated().await {
            if let Err(e) = self.api.logout().await {
                warn!(error = %e, "Logout request failed");
            }
        }
        self.session().teardown().await;
    }

    /// Replace the cached user with the backend's current profile.
    pub async fn refresh_user(&self) -> Result<UserRecord, ApiError> {
        let body = self.api.get_profile().await?;
        let user_value = decode_user_payload(&body)?;
        let user = decode_user(user_value.clone())?;
        self.session().replace_user(user_value).await;
        Ok(user)
    }

    pub async fn update_profile(&self, profile: Value) -> Result<UserRecord, ApiError> {
        let body = self.api.update_profile(profile).await?;
        let update = decode_user_payload(&body)?;
        let current = self.session().user_json().await.unwrap_or(Value::Null);
        let merged = merge_user(current, update);
        let user = decode_user(merged.clone())?;
        self.session().replace_user(merged).await;
        Ok(user)
    }

    pub async fn send_otp(&self, identifier: &str, purpose: OtpPurpose) -> Result<(), ApiError> {
        self.api.send_otp(identifier, purpose).await.map(|_| ())
    }

    pub async fn verify_otp(
        &self,
        identifier: &str,
        otp: &str,
        purpose: OtpPurpose,
    ) -> Result<(), ApiError> {
        self.api.verify_otp(identifier, otp, purpose).await.map(|_| ())
    }

    pub async fn has_premium_access(&self) -> bool {
        has_premium_access(self.current_user().await.as_ref())
    }

    pub async fn check_feature_access(&self, feature: &str) -> AccessDecision {
        self.gate.check(feature, self.current_user().await.as_ref())
    }
}
