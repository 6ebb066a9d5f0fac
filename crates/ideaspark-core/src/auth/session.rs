use std::sync::Arc;

use chrono::{DateTime, Utc};
use reqwest::Client;
use serde_json::Value;
use tokio::sync::{Mutex, OnceCell, RwLock};
use tracing::{debug, info, warn};

use crate::api::ApiError;
use crate::config::Config;

use super::credentials::{CredentialBundle, CredentialStore};
use super::payload::{decode_auth_payload, AuthPayload};

/// Refresh endpoint, relative to the API base URL
const REFRESH_PATH: &str = "/auth/refresh";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Unauthenticated,
    Authenticated,
    Refreshing,
}

#[derive(Debug)]
struct SessionData {
    state: SessionState,
    access_token: Option<String>,
    refresh_token: Option<String>,
    user: Option<Value>,
    issued_at: Option<DateTime<Utc>>,
}

impl SessionData {
    fn empty() -> Self {
        Self {
            state: SessionState::Unauthenticated,
            access_token: None,
            refresh_token: None,
            user: None,
            issued_at: None,
        }
    }
}

/// Owns the credential bundle and the cached user record.
///
/// All mutation goes through `set_session`, `replace_user`, `refresh` and
/// `teardown`. Every change is mirrored into the `CredentialStore` so the
/// session survives restarts. The user record is kept as opaque JSON.
pub struct SessionManager {
    client: Client,
    refresh_url: String,
    store: Arc<CredentialStore>,
    data: RwLock<SessionData>,
    // Held for the whole refresh so only one refresh request is in flight
    refresh_lock: Mutex<()>,
    initialized: OnceCell<()>,
}

impl SessionManager {
    pub fn new(config: &Config, client: Client, store: Arc<CredentialStore>) -> Self {
        Self {
            client,
            refresh_url: format!("{}{}", config.base_url(), REFRESH_PATH),
            store,
            data: RwLock::new(SessionData::empty()),
            refresh_lock: Mutex::new(()),
            initialized: OnceCell::new(),
        }
    }

    /// Restore the persisted session. Only the first call does any work.
    pub async fn initialize(&self) {
        self.initialized
            .get_or_init(|| async { self.load_from_store().await })
            .await;
    }

    async fn load_from_store(&self) {
        let Some(bundle) = self.store.load_bundle() else {
            debug!("No persisted session found");
            return;
        };

        let user = match self.store.load_user_json() {
            Ok(Some(user)) => user,
            Ok(None) => {
                debug!("Persisted token has no user record, ignoring it");
                return;
            }
            Err(e) => {
                warn!(error = %e, "Persisted user record is unreadable, discarding session");
                self.store.clear_all();
                return;
            }
        };

        let mut data = self.data.write().await;
        data.access_token = Some(bundle.access_token);
        data.refresh_token = bundle.refresh_token;
        data.user = Some(user);
        data.state = SessionState::Authenticated;
        info!(has_refresh_token = data.refresh_token.is_some(), "Restored persisted session");
    }

    pub async fn state(&self) -> SessionState {
        self.data.read().await.state
    }

    pub async fn is_authenticated(&self) -> bool {
        self.state().await != SessionState::Unauthenticated
    }

    pub async fn access_token(&self) -> Option<String> {
        self.data.read().await.access_token.clone()
    }

    pub async fn user_json(&self) -> Option<Value> {
        self.data.read().await.user.clone()
    }

    /// When the current access token was issued in this process. `None` for
    /// tokens restored from storage.
    pub async fn token_issued_at(&self) -> Option<DateTime<Utc>> {
        self.data.read().await.issued_at
    }

    /// Install a freshly issued session. A `None` refresh token keeps the
    /// previous one, since not every response rotates it.
    pub async fn set_session(&self, access_token: String, refresh_token: Option<String>, user: Value) {
        let mut data = self.data.write().await;
        self.install_tokens(
            &mut data,
            CredentialBundle {
                access_token,
                refresh_token,
            },
        );
        self.store.save_user_json(&user);
        data.user = Some(user);
    }

    // Memory and storage change under the same write guard, so a concurrent
    // teardown lands either entirely before or entirely after.
    fn install_tokens(&self, data: &mut SessionData, bundle: CredentialBundle) {
        self.store.save_bundle(&bundle);
        data.access_token = Some(bundle.access_token);
        if bundle.refresh_token.is_some() {
            data.refresh_token = bundle.refresh_token;
        }
        data.issued_at = Some(Utc::now());
        data.state = SessionState::Authenticated;
    }

    /// Replace the cached user record without touching the tokens.
    pub async fn replace_user(&self, user: Value) {
        let mut data = self.data.write().await;
        if data.state == SessionState::Unauthenticated {
            debug!("Ignoring user update for a session that has ended");
            return;
        }
        self.store.save_user_json(&user);
        data.user = Some(user);
    }

    /// Obtain a new access token after `stale_token` was rejected.
    ///
    /// Callers that arrive while another refresh is running wait for it and
    /// reuse its result instead of sending a second refresh request. Any
    /// failure ends the session and yields `ApiError::SessionExpired`.
    ///
    /// The outcome only applies to the session the refresh started from. If
    /// that session ended or was replaced while the request was in flight,
    /// the result is dropped and the newer state is left alone.
    pub async fn refresh(&self, stale_token: &str) -> Result<String, ApiError> {
        let _guard = self.refresh_lock.lock().await;

        let refresh_token = {
            let mut data = self.data.write().await;
            if data.state == SessionState::Unauthenticated {
                return Err(ApiError::SessionExpired);
            }
            if let Some(ref current) = data.access_token {
                if current != stale_token {
                    debug!("Token already refreshed by another caller");
                    return Ok(current.clone());
                }
            }
            let Some(refresh_token) = data.refresh_token.clone() else {
                warn!("No refresh token available, ending session");
                self.clear(&mut data);
                return Err(ApiError::SessionExpired);
            };
            data.state = SessionState::Refreshing;
            refresh_token
        };

        let result = self.request_refresh(&refresh_token).await;

        let mut data = self.data.write().await;
        let unchanged = data.state == SessionState::Refreshing
            && data.access_token.as_deref() == Some(stale_token);
        if !unchanged {
            debug!("Session changed while refreshing, discarding refresh result");
            return Err(ApiError::SessionExpired);
        }

        match result {
            Ok(payload) => {
                let token = payload.access_token.clone();
                self.install_tokens(
                    &mut data,
                    CredentialBundle {
                        access_token: payload.access_token,
                        refresh_token: payload.refresh_token,
                    },
                );
                info!("Session refreshed");
                Ok(token)
            }
            Err(e) => {
                warn!(error = %e, "Token refresh failed, ending session");
                self.clear(&mut data);
                Err(ApiError::SessionExpired)
            }
        }
    }

    async fn request_refresh(&self, refresh_token: &str) -> Result<AuthPayload, ApiError> {
        // The refresh token travels as the bearer credential, not in the body
        let response = self
            .client
            .post(&self.refresh_url)
            .bearer_auth(refresh_token)
            .send()
            .await?;

        let status = response.status();
        let text = response.text().await?;
        let body = serde_json::from_str::<Value>(&text).unwrap_or(Value::String(text));

        if !status.is_success() {
            return Err(ApiError::from_status(status, &body));
        }
        decode_auth_payload(&body)
    }

    /// End the session: memory and persisted state are cleared unconditionally.
    pub async fn teardown(&self) {
        let mut data = self.data.write().await;
        self.clear(&mut data);
    }

    fn clear(&self, data: &mut SessionData) {
        *data = SessionData::empty();
        self.store.clear_all();
        info!("Session cleared");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use crate::auth::credentials::{ACCESS_TOKEN_KEY, REFRESH_TOKEN_KEY, USER_DATA_KEY};
    use serde_json::json;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn manager(base_url: &str, store: Arc<CredentialStore>) -> SessionManager {
        SessionManager::new(&Config::with_base_url(base_url), Client::new(), store)
    }

    fn user() -> Value {
        json!({"id": "u-1", "email": "ada@example.com", "fullName": "Ada"})
    }

    async fn wait_for_state(session: &SessionManager, expected: SessionState) {
        for _ in 0..200 {
            if session.state().await == expected {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("session never reached {:?}", expected);
    }

    async fn mount_slow_refresh(server: &MockServer, response: ResponseTemplate) {
        Mock::given(method("POST"))
            .and(path("/auth/refresh"))
            .respond_with(response.set_delay(Duration::from_millis(300)))
            .expect(1)
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn test_starts_unauthenticated() {
        let session = manager("http://127.0.0.1:9", Arc::new(CredentialStore::in_memory()));
        session.initialize().await;
        assert_eq!(session.state().await, SessionState::Unauthenticated);
        assert!(session.access_token().await.is_none());
    }

    #[tokio::test]
    async fn test_set_session_persists_everything() {
        let store = Arc::new(CredentialStore::in_memory());
        let session = manager("http://127.0.0.1:9", store.clone());
        session
            .set_session("access-1".to_string(), Some("refresh-1".to_string()), user())
            .await;

        assert_eq!(session.state().await, SessionState::Authenticated);
        assert_eq!(session.access_token().await.as_deref(), Some("access-1"));
        assert!(session.token_issued_at().await.is_some());
        assert_eq!(store.get(ACCESS_TOKEN_KEY).as_deref(), Some("access-1"));
        assert_eq!(store.get(REFRESH_TOKEN_KEY).as_deref(), Some("refresh-1"));
        let persisted: Value = serde_json::from_str(&store.get(USER_DATA_KEY).unwrap()).unwrap();
        assert_eq!(persisted, user());
    }

    #[tokio::test]
    async fn test_initialize_restores_persisted_session() {
        let store = Arc::new(CredentialStore::in_memory());
        store.set(ACCESS_TOKEN_KEY, "access-1");
        store.set(REFRESH_TOKEN_KEY, "refresh-1");
        store.set(USER_DATA_KEY, &user().to_string());

        let session = manager("http://127.0.0.1:9", store);
        session.initialize().await;
        assert_eq!(session.state().await, SessionState::Authenticated);
        assert_eq!(session.access_token().await.as_deref(), Some("access-1"));
        assert_eq!(session.user_json().await, Some(user()));
        assert!(session.token_issued_at().await.is_none());
    }

    #[tokio::test]
    async fn test_initialize_requires_token_and_user() {
        let store = Arc::new(CredentialStore::in_memory());
        store.set(ACCESS_TOKEN_KEY, "access-1");

        let session = manager("http://127.0.0.1:9", store);
        session.initialize().await;
        assert_eq!(session.state().await, SessionState::Unauthenticated);
    }

    #[tokio::test]
    async fn test_initialize_discards_corrupt_user_record() {
        let store = Arc::new(CredentialStore::in_memory());
        store.set(ACCESS_TOKEN_KEY, "access-1");
        store.set(USER_DATA_KEY, "{broken");

        let session = manager("http://127.0.0.1:9", store.clone());
        session.initialize().await;
        assert_eq!(session.state().await, SessionState::Unauthenticated);
        assert_eq!(store.get(ACCESS_TOKEN_KEY), None);
    }

    #[tokio::test]
    async fn test_initialize_runs_once() {
        let store = Arc::new(CredentialStore::in_memory());
        let session = manager("http://127.0.0.1:9", store.clone());
        session.initialize().await;

        // Data written behind the manager's back after init is not picked up
        store.set(ACCESS_TOKEN_KEY, "late");
        store.set(USER_DATA_KEY, &user().to_string());
        session.initialize().await;
        assert_eq!(session.state().await, SessionState::Unauthenticated);
    }

    #[tokio::test]
    async fn test_refresh_sends_refresh_token_as_bearer() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/auth/refresh"))
            .and(header("authorization", "Bearer refresh-1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": {"token": "access-2", "refreshToken": "refresh-2"}
            })))
            .expect(1)
            .mount(&server)
            .await;

        let store = Arc::new(CredentialStore::in_memory());
        let session = manager(&server.uri(), store.clone());
        session
            .set_session("access-1".to_string(), Some("refresh-1".to_string()), user())
            .await;

        let token = session.refresh("access-1").await.unwrap();
        assert_eq!(token, "access-2");
        assert_eq!(session.state().await, SessionState::Authenticated);
        assert_eq!(store.get(ACCESS_TOKEN_KEY).as_deref(), Some("access-2"));
        assert_eq!(store.get(REFRESH_TOKEN_KEY).as_deref(), Some("refresh-2"));
        assert_eq!(session.user_json().await, Some(user()));
    }

    #[tokio::test]
    async fn test_refresh_keeps_refresh_token_when_not_rotated() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/auth/refresh"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"data": {"token": "access-2"}})))
            .mount(&server)
            .await;

        let store = Arc::new(CredentialStore::in_memory());
        let session = manager(&server.uri(), store.clone());
        session
            .set_session("access-1".to_string(), Some("refresh-1".to_string()), user())
            .await;

        session.refresh("access-1").await.unwrap();
        assert_eq!(store.get(REFRESH_TOKEN_KEY).as_deref(), Some("refresh-1"));
    }

    #[tokio::test]
    async fn test_refresh_rejection_tears_down() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/auth/refresh"))
            .respond_with(ResponseTemplate::new(401).set_body_json(json!({"message": "expired"})))
            .expect(1)
            .mount(&server)
            .await;

        let store = Arc::new(CredentialStore::in_memory());
        let session = manager(&server.uri(), store.clone());
        session
            .set_session("access-1".to_string(), Some("refresh-1".to_string()), user())
            .await;

        let err = session.refresh("access-1").await.unwrap_err();
        assert!(err.is_session_expired());
        assert_eq!(session.state().await, SessionState::Unauthenticated);
        for key in [ACCESS_TOKEN_KEY, REFRESH_TOKEN_KEY, USER_DATA_KEY] {
            assert_eq!(store.get(key), None, "{} should be gone", key);
        }

        // A failed refresh is terminal; later callers do not hit the network
        assert!(session.refresh("access-1").await.unwrap_err().is_session_expired());
    }

    #[tokio::test]
    async fn test_refresh_without_refresh_token_tears_down() {
        let store = Arc::new(CredentialStore::in_memory());
        let session = manager("http://127.0.0.1:9", store.clone());
        session.set_session("access-1".to_string(), None, user()).await;

        assert!(session.refresh("access-1").await.unwrap_err().is_session_expired());
        assert_eq!(session.state().await, SessionState::Unauthenticated);
        assert_eq!(store.get(USER_DATA_KEY), None);
    }

    #[tokio::test]
    async fn test_refresh_with_outdated_stale_token_skips_network() {
        let store = Arc::new(CredentialStore::in_memory());
        // Unreachable backend: any network call would fail and tear down
        let session = manager("http://127.0.0.1:9", store);
        session
            .set_session("access-2".to_string(), Some("refresh-1".to_string()), user())
            .await;

        let token = session.refresh("access-1").await.unwrap();
        assert_eq!(token, "access-2");
        assert_eq!(session.state().await, SessionState::Authenticated);
    }

    #[tokio::test]
    async fn test_replace_user_ignored_after_teardown() {
        let store = Arc::new(CredentialStore::in_memory());
        let session = manager("http://127.0.0.1:9", store.clone());
        session.set_session("access-1".to_string(), None, user()).await;

        let updated = json!({"id": "u-1", "email": "ada@example.com", "fullName": "Ada L."});
        session.replace_user(updated.clone()).await;
        assert_eq!(session.user_json().await, Some(updated));

        session.teardown().await;
        session.replace_user(user()).await;
        assert!(session.user_json().await.is_none());
        assert_eq!(store.get(USER_DATA_KEY), None);
    }

    #[tokio::test]
    async fn test_caller_arriving_mid_refresh_reuses_new_token() {
        let server = MockServer::start().await;
        mount_slow_refresh(
            &server,
            ResponseTemplate::new(200).set_body_json(json!({"data": {"token": "access-2"}})),
        )
        .await;

        let session = Arc::new(manager(&server.uri(), Arc::new(CredentialStore::in_memory())));
        session
            .set_session("access-1".to_string(), Some("refresh-1".to_string()), user())
            .await;

        let first = tokio::spawn({
            let session = session.clone();
            async move { session.refresh("access-1").await }
        });
        wait_for_state(&session, SessionState::Refreshing).await;
        assert!(session.is_authenticated().await);

        let late = session.refresh("access-1").await.unwrap();
        assert_eq!(late, "access-2");
        assert_eq!(first.await.unwrap().unwrap(), "access-2");
        assert_eq!(session.state().await, SessionState::Authenticated);
    }

    #[tokio::test]
    async fn test_rejected_refresh_leaves_newer_session_alone() {
        let server = MockServer::start().await;
        mount_slow_refresh(
            &server,
            ResponseTemplate::new(401).set_body_json(json!({"message": "revoked"})),
        )
        .await;

        let store = Arc::new(CredentialStore::in_memory());
        let session = Arc::new(manager(&server.uri(), store.clone()));
        session
            .set_session("access-1".to_string(), Some("refresh-1".to_string()), user())
            .await;

        let pending = tokio::spawn({
            let session = session.clone();
            async move { session.refresh("access-1").await }
        });
        wait_for_state(&session, SessionState::Refreshing).await;

        // Log out and back in while the old refresh is still out
        session.teardown().await;
        let other = json!({"id": "u-2", "email": "grace@example.com", "fullName": "Grace"});
        session
            .set_session("access-9".to_string(), Some("refresh-9".to_string()), other.clone())
            .await;

        assert!(pending.await.unwrap().unwrap_err().is_session_expired());
        assert_eq!(session.state().await, SessionState::Authenticated);
        assert_eq!(session.access_token().await.as_deref(), Some("access-9"));
        assert_eq!(session.user_json().await, Some(other));
        assert_eq!(store.get(ACCESS_TOKEN_KEY).as_deref(), Some("access-9"));
        assert_eq!(store.get(REFRESH_TOKEN_KEY).as_deref(), Some("refresh-9"));
    }

    #[tokio::test]
    async fn test_refresh_result_dropped_after_logout() {
        let server = MockServer::start().await;
        mount_slow_refresh(
            &server,
            ResponseTemplate::new(200).set_body_json(json!({
                "data": {"token": "access-2", "refreshToken": "refresh-2"}
            })),
        )
        .await;

        let store = Arc::new(CredentialStore::in_memory());
        let session = Arc::new(manager(&server.uri(), store.clone()));
        session
            .set_session("access-1".to_string(), Some("refresh-1".to_string()), user())
            .await;

        let pending = tokio::spawn({
            let session = session.clone();
            async move { session.refresh("access-1").await }
        });
        wait_for_state(&session, SessionState::Refreshing).await;
        session.teardown().await;

        assert!(pending.await.unwrap().unwrap_err().is_session_expired());
        assert_eq!(session.state().await, SessionState::Unauthenticated);
        assert!(session.access_token().await.is_none());
        for key in [ACCESS_TOKEN_KEY, REFRESH_TOKEN_KEY, USER_DATA_KEY] {
            assert_eq!(store.get(key), None, "{} should stay cleared", key);
        }
    }
}
