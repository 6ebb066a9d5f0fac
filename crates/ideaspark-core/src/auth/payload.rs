//! Decoding of the auth backend's response bodies.
//!
//! The backend has shipped several shapes for the same payload. All accepted
//! shapes are handled here and nowhere else:
//!
//! - an envelope `{"data": {...}}` or the bare object
//! - the access token under `token` or `accessToken`
//! - the refresh token under `refreshToken` or `refresh` (optional)
//! - the user under `user`, or the payload object itself when it has an `email`

use serde_json::{Map, Value};

use crate::api::ApiError;

const TOKEN_FIELDS: [&str; 2] = ["token", "accessToken"];
const REFRESH_FIELDS: [&str; 2] = ["refreshToken", "refresh"];

#[derive(Debug, Clone, PartialEq)]
pub struct AuthPayload {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub user: Option<Value>,
}

fn unwrap_envelope(body: &Value) -> Option<&Map<String, Value>> {
    match body.get("data") {
        Some(Value::Object(data)) => Some(data),
        _ => body.as_object(),
    }
}

fn first_string(object: &Map<String, Value>, fields: &[&str]) -> Option<String> {
    fields
        .iter()
        .filter_map(|field| object.get(*field))
        .filter_map(Value::as_str)
        .find(|s| !s.is_empty())
        .map(str::to_string)
}

fn user_from(object: &Map<String, Value>) -> Option<Value> {
    match object.get("user") {
        Some(user @ Value::Object(_)) => Some(user.clone()),
        _ if object.contains_key("email") => {
            let mut user = object.clone();
            for field in TOKEN_FIELDS.iter().chain(REFRESH_FIELDS.iter()) {
                user.remove(*field);
            }
            Some(Value::Object(user))
        }
        _ => None,
    }
}

/// Decode a login, registration, OAuth or refresh response.
pub fn decode_auth_payload(body: &Value) -> Result<AuthPayload, ApiError> {
    let object = unwrap_envelope(body)
        .ok_or_else(|| ApiError::InvalidResponse("auth response is not an object".to_string()))?;

    let access_token = first_string(object, &TOKEN_FIELDS).ok_or_else(|| {
        let message = first_string(object, &["message"])
            .or_else(|| body.as_object().and_then(|root| first_string(root, &["message"])))
            .unwrap_or_else(|| "missing token in auth response".to_string());
        ApiError::InvalidResponse(message)
    })?;

    Ok(AuthPayload {
        access_token,
        refresh_token: first_string(object, &REFRESH_FIELDS),
        user: user_from(object),
    })
}

/// Decode a profile response into the user JSON object.
pub fn decode_user_payload(body: &Value) -> Result<Value, ApiError> {
    let object = unwrap_envelope(body)
        .ok_or_else(|| ApiError::InvalidResponse("profile response is not an object".to_string()))?;
    match object.get("user") {
        Some(user @ Value::Object(_)) => Ok(user.clone()),
        _ => Ok(Value::Object(object.clone())),
    }
}
