//! The authenticated user's profile as returned by the backend.

use serde::{Deserialize, Deserializer, Serialize};

#[cfg(feature = "ts")]
use ts_rs::TS;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[cfg_attr(feature = "ts", derive(TS), ts(export))]
#[serde(rename_all = "UPPERCASE")]
pub enum Role {
    #[default]
    #[serde(alias = "user")]
    User,
    #[serde(alias = "admin")]
    Admin,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[cfg_attr(feature = "ts", derive(TS), ts(export))]
#[serde(rename_all = "UPPERCASE")]
pub enum SubscriptionType {
    #[default]
    #[serde(alias = "free")]
    Free,
    #[serde(alias = "premium")]
    Premium,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(TS), ts(export))]
#[serde(rename_all = "camelCase")]
pub struct UserRecord {
    #[serde(deserialize_with = "string_or_number")]
    pub id: String,
    pub email: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default)]
    pub full_name: String,
    #[serde(default)]
    pub role: Role,
    #[serde(default)]
    pub subscription_type: SubscriptionType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profile_image: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone_number: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bio: Option<String>,
    /// Older backends and cached records carry an explicit `isPremium` flag.
    /// It is read so such records still decode, but never consulted or written.
    #[serde(rename = "isPremium", default, skip_serializing)]
    #[cfg_attr(feature = "ts", ts(skip))]
    legacy_premium: Option<bool>,
}

impl UserRecord {
    pub fn new(id: impl Into<String>, email: impl Into<String>, full_name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            email: email.into(),
            username: None,
            full_name: full_name.into(),
            role: Role::User,
            subscription_type: SubscriptionType::Free,
            profile_image: None,
            phone_number: None,
            bio: None,
            legacy_premium: None,
        }
    }

    pub fn with_role(mut self, role: Role) -> Self {
        self.role = role;
        self
    }

    pub fn with_subscription(mut self, subscription_type: SubscriptionType) -> Self {
        self.subscription_type = subscription_type;
        self
    }

    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }

    /// Premium access is derived from the subscription and role only.
    pub fn is_premium(&self) -> bool {
        self.subscription_type == SubscriptionType::Premium || self.role == Role::Admin
    }

    /// Name to greet the user with: full name, then username, then email.
    pub fn display_name(&self) -> &str {
        if !self.full_name.trim().is_empty() {
            &self.full_name
        } else if let Some(ref username) = self.username {
            username
        } else {
            &self.email
        }
    }
}

fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Id {
        Text(String),
        Number(i64),
    }

    Ok(match Id::deserialize(deserializer)? {
        Id::Text(s) => s,
        Id::Number(n) => n.to_string(),
    })
}
