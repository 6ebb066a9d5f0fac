//! Gateway for every call to the IdeaSpark backend.
//!
//! `ApiClient::call` attaches the session's bearer token, encodes the body,
//! and on a 401 asks the `SessionManager` for a fresh token and replays the
//! request once. Typed endpoint wrappers live in `endpoints.rs`.

use std::sync::Arc;

use reqwest::{header, Client, Response, StatusCode};
use serde_json::Value;
use tracing::{debug, warn};

use crate::auth::{CredentialStore, SessionManager};
use crate::config::Config;

use super::request::{Idempotency, RequestBody, RequestOptions};
use super::ApiError;

/// API client for the IdeaSpark backend.
/// Clone is cheap - reqwest::Client and the session are shared.
#[derive(Clone)]
pub struct ApiClient {
    client: Client,
    base_url: String,
    device_info: String,
    session: Arc<SessionManager>,
}

impl ApiClient {
    /// Create a client and the session manager it drives.
    pub fn new(config: &Config, store: Arc<CredentialStore>) -> Result<Self, ApiError> {
        let client = Client::builder()
            .timeout(config.request_timeout())
            .build()
            .map_err(|e| ApiError::Config(format!("Failed to build HTTP client: {}", e)))?;
        let session = Arc::new(SessionManager::new(config, client.clone(), store));
        Ok(Self::with_session(config, client, session))
    }

    /// Create a client around an existing session manager.
    pub fn with_session(config: &Config, client: Client, session: Arc<SessionManager>) -> Self {
        Self {
            client,
            base_url: config.base_url(),
            device_info: config.device_info.clone(),
            session,
        }
    }

    pub fn session(&self) -> &Arc<SessionManager> {
        &self.session
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub(crate) fn device_info(&self) -> &str {
        &self.device_info
    }

    fn url(&self, endpoint: &str) -> String {
        if endpoint.starts_with('/') {
            format!("{}{}", self.base_url, endpoint)
        } else {
            format!("{}/{}", self.base_url, endpoint)
        }
    }

    /// Issue a backend call and return the parsed response body.
    ///
    /// Success bodies come back as JSON when they parse, as a JSON string
    /// otherwise, and as `Null` when empty.
    pub async fn call(&self, endpoint: &str, options: RequestOptions) -> Result<Value, ApiError> {
        self.session.initialize().await;

        let url = self.url(endpoint);
        let token = if options.skip_auth {
            None
        } else {
            self.session.access_token().await
        };

        let response = self.send(&url, &options, token.as_deref()).await?;
        if response.status() != StatusCode::UNAUTHORIZED || options.skip_auth {
            return Self::into_result(&url, response).await;
        }

        debug!(url = %url, "Credentials rejected, refreshing session");
        let fresh_token = self
            .session
            .refresh(token.as_deref().unwrap_or_default())
            .await?;

        if options.idempotency == Idempotency::NonIdempotent {
            warn!(url = %url, "Session refreshed; not replaying non-idempotent request");
            return Err(ApiError::Unauthorized);
        }

        let retry = self.send(&url, &options, Some(&fresh_token)).await?;
        if retry.status() == StatusCode::UNAUTHORIZED {
            warn!(url = %url, "Refreshed token rejected, ending session");
            self.session.teardown().await;
            return Err(ApiError::SessionExpired);
        }
        Self::into_result(&url, retry).await
    }

    async fn send(
        &self,
        url: &str,
        options: &RequestOptions,
        token: Option<&str>,
    ) -> Result<Response, ApiError> {
        let multipart = options.is_multipart();
        let mut request = self.client.request(options.method.clone(), url);

        for (name, value) in &options.headers {
            // reqwest sets the boundary-carrying content type for multipart bodies
            if multipart && name.eq_ignore_ascii_case(header::CONTENT_TYPE.as_str()) {
                continue;
            }
            request = request.header(name.as_str(), value.as_str());
        }

        if let Some(token) = token {
            request = request.bearer_auth(token);
        }

        request = match &options.body {
            RequestBody::Empty => request,
            // Leaves a caller-supplied content type alone
            RequestBody::Json(body) => request.json(body),
            RequestBody::Multipart(form) => request.multipart(form.to_form()?),
        };

        debug!(
            method = %options.method,
            url = url,
            authenticated = token.is_some(),
            multipart = multipart,
            "Sending request"
        );

        request.send().await.map_err(|e| {
            warn!(url = url, error = %e, "Request failed");
            ApiError::Network(e)
        })
    }

    async fn into_result(url: &str, response: Response) -> Result<Value, ApiError> {
        let status = response.status();
        let text = response.text().await?;
        let body = parse_body(text);
        debug!(url = url, status = status.as_u16(), "Received response");

        if status.is_success() {
            Ok(body)
        } else {
            Err(ApiError::from_status(status, &body))
        }
    }
}

fn parse_body(text: String) -> Value {
    if text.trim().is_empty() {
        return Value::Null;
    }
    serde_json::from_str(&text).unwrap_or(Value::String(text))
}
