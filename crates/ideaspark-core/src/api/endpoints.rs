//! Typed wrappers for the backend's auth, profile, subscription and export
//! endpoints. Each wrapper decides whether the call carries credentials and
//! whether it may be replayed after a token refresh.

use serde::Serialize;
use serde_json::{json, Value};

use crate::models::Role;

use super::request::{FilePart, MultipartForm, RequestOptions};
use super::{ApiClient, ApiError};

/// What an OTP is being sent or verified for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OtpPurpose {
    #[default]
    EmailVerification,
    PasswordReset,
    PhoneVerification,
}

/// Hint telling the backend what kind of identifier a multi-login uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LoginType {
    Email,
    Username,
    Phone,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterRequest {
    pub email: String,
    pub username: String,
    pub password: String,
    pub full_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phone_number: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<Role>,
    /// Sent as the multipart `profileImage` part when present.
    #[serde(skip)]
    pub profile_image: Option<FilePart>,
}

impl RegisterRequest {
    fn role_name(&self) -> Option<&'static str> {
        self.role.map(|role| match role {
            Role::User => "USER",
            Role::Admin => "ADMIN",
        })
    }

    fn to_form(&self, image: &FilePart) -> MultipartForm {
        MultipartForm::new()
            .text("email", self.email.clone())
            .text("password", self.password.clone())
            .text("fullName", self.full_name.clone())
            .text("username", self.username.clone())
            .text_opt("phoneNumber", self.phone_number.clone())
            .text_opt("role", self.role_name())
            .file("profileImage", image.clone())
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangePasswordRequest {
    pub current_password: String,
    pub new_password: String,
}

fn to_json<T: Serialize>(value: &T) -> Result<Value, ApiError> {
    serde_json::to_value(value)
        .map_err(|e| ApiError::InvalidResponse(format!("Failed to encode request: {}", e)))
}

impl ApiClient {
    // ===== Authentication =====

    /// Create an account. Uses a multipart body when a profile image is attached.
    pub async fn register(&self, request: &RegisterRequest) -> Result<Value, ApiError> {
        let options = match request.profile_image {
            Some(ref image) => RequestOptions::post().multipart(request.to_form(image)),
            None => RequestOptions::post().json(to_json(request)?),
        };
        self.call("/auth/register", options.skip_auth().non_idempotent())
            .await
    }

    pub async fn login(&self, email: &str, password: &str) -> Result<Value, ApiError> {
        let body = json!({
            "email": email,
            "password": password,
            "deviceInfo": self.device_info(),
        });
        self.call("/auth/login", RequestOptions::post().json(body).skip_auth())
            .await
    }

    /// Log in with an email, username or phone number.
    pub async fn multi_login(
        &self,
        identifier: &str,
        password: &str,
        login_type: Option<LoginType>,
    ) -> Result<Value, ApiError> {
        let mut body = json!({
            "loginIdentifier": identifier,
            "password": password,
            "deviceInfo": self.device_info(),
        });
        if let Some(login_type) = login_type {
            body["loginType"] = to_json(&login_type)?;
        }
        self.call("/auth/multi-login", RequestOptions::post().json(body).skip_auth())
            .await
    }

    pub async fn google_login(&self, google_id_token: &str) -> Result<Value, ApiError> {
        let body = json!({
            "googleIdToken": google_id_token,
            "deviceInfo": self.device_info(),
        });
        self.call("/auth/google-login", RequestOptions::post().json(body).skip_auth())
            .await
    }

    pub async fn send_otp(&self, identifier: &str, purpose: OtpPurpose) -> Result<Value, ApiError> {
        let body = json!({ "identifier": identifier, "type": purpose });
        // Each call sends a message to the user
        self.call(
            "/auth/send-otp",
            RequestOptions::post().json(body).skip_auth().non_idempotent(),
        )
        .await
    }

    pub async fn verify_otp(
        &self,
        identifier: &str,
        otp: &str,
        purpose: OtpPurpose,
    ) -> Result<Value, ApiError> {
        let body = json!({ "identifier": identifier, "otp": otp, "type": purpose });
        self.call("/auth/verify-otp", RequestOptions::post().json(body).skip_auth())
            .await
    }

    pub async fn verify_email(&self, user_id: &str, otp: &str) -> Result<Value, ApiError> {
        let body = json!({ "userId": user_id, "otp": otp });
        self.call("/auth/verify-email", RequestOptions::post().json(body))
            .await
    }

    pub async fn logout(&self) -> Result<Value, ApiError> {
        self.call("/auth/logout", RequestOptions::post()).await
    }

    // ===== Profile =====

    pub async fn get_profile(&self) -> Result<Value, ApiError> {
        self.call("/users/profile", RequestOptions::get()).await
    }

    pub async fn update_profile(&self, profile: Value) -> Result<Value, ApiError> {
        self.call("/users/profile", RequestOptions::put().json(profile))
            .await
    }

    pub async fn upload_profile_image(&self, image: FilePart) -> Result<Value, ApiError> {
        let form = MultipartForm::new().file("image", image);
        self.call("/users/profile-image", RequestOptions::post().multipart(form))
            .await
    }

    pub async fn change_password(&self, request: &ChangePasswordRequest) -> Result<Value, ApiError> {
        self.call(
            "/users/change-password",
            RequestOptions::post().json(to_json(request)?).non_idempotent(),
        )
        .await
    }

    // ===== Subscription =====

    pub async fn subscription_status(&self) -> Result<Value, ApiError> {
        self.call("/subscription/status", RequestOptions::get()).await
    }

    pub async fn subscription_plans(&self) -> Result<Value, ApiError> {
        self.call("/subscription/plans", RequestOptions::get().skip_auth())
            .await
    }

    /// Start a subscription. Never replayed: a retry could charge twice.
    pub async fn upgrade_subscription(&self, plan: Value) -> Result<Value, ApiError> {
        self.call(
            "/subscription/subscribe",
            RequestOptions::post().json(plan).non_idempotent(),
        )
        .await
    }

    // ===== Export =====

    pub async fn export_stats(&self) -> Result<Value, ApiError> {
        self.call("/export/stats", RequestOptions::get()).await
    }

    pub async fn preview_export(&self, preview: Value) -> Result<Value, ApiError> {
        self.call("/export/preview", RequestOptions::post().json(preview))
            .await
    }
}
