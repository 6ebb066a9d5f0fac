use std::collections::HashSet;
use std::fmt;

use serde::Serialize;

#[cfg(feature = "ts")]
use ts_rs::TS;

use crate::models::UserRecord;

/// Features that require a premium subscription (or the admin role).
pub const PREMIUM_FEATURES: &[&str] = &[
    "newsDetector",
    "imageGenerator",
    "codeAssistant",
    "voiceTools",
    "exportData",
];

/// A feature name reduced to lowercase ASCII alphanumerics, so callers may
/// use any naming style: `news-detector`, `NewsDetector` and `news_detector`
/// are the same feature.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FeatureKey(String);

impl FeatureKey {
    pub fn new(raw: &str) -> Self {
        Self(
            raw.chars()
                .filter(|c| c.is_ascii_alphanumeric())
                .map(|c| c.to_ascii_lowercase())
                .collect(),
        )
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for FeatureKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[cfg_attr(feature = "ts", derive(TS), ts(export))]
#[serde(rename_all = "camelCase")]
pub enum AccessDecision {
    Allowed,
    /// Allowed, and the caller should record one unit of usage.
    AllowedMetered,
    /// Premium-only feature for a free user. Callers show an upgrade prompt.
    Limited,
    /// No signed-in user.
    Denied,
}

impl AccessDecision {
    pub fn has_access(self) -> bool {
        matches!(self, Self::Allowed | Self::AllowedMetered)
    }

    pub fn is_limited(self) -> bool {
        self == Self::Limited
    }

    pub fn requires_usage_accounting(self) -> bool {
        self == Self::AllowedMetered
    }
}

/// Decides feature access from the user record alone. Makes no network calls
/// and keeps no usage counters.
#[derive(Debug, Clone)]
pub struct EntitlementGate {
    premium: HashSet<FeatureKey>,
    metered: HashSet<FeatureKey>,
}

impl Default for EntitlementGate {
    fn default() -> Self {
        Self::new()
    }
}

impl EntitlementGate {
    pub fn new() -> Self {
        Self {
            premium: PREMIUM_FEATURES.iter().map(|f| FeatureKey::new(f)).collect(),
            metered: HashSet::new(),
        }
    }

    /// Mark free-tier features whose use the caller must account for.
    pub fn with_metered_features<I, S>(mut self, features: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.metered
            .extend(features.into_iter().map(|f| FeatureKey::new(f.as_ref())));
        self
    }

    pub fn is_premium_feature(&self, feature: &str) -> bool {
        self.premium.contains(&FeatureKey::new(feature))
    }

    pub fn check(&self, feature: &str, user: Option<&UserRecord>) -> AccessDecision {
        let Some(user) = user else {
            return AccessDecision::Denied;
        };

        if user.is_admin() {
            return AccessDecision::Allowed;
        }

        let key = FeatureKey::new(feature);
        if self.premium.contains(&key) {
            return if user.is_premium() {
                AccessDecision::Allowed
            } else {
                AccessDecision::Limited
            };
        }

        if self.metered.contains(&key) {
            AccessDecision::AllowedMetered
        } else {
            AccessDecision::Allowed
        }
    }
}

pub fn has_premium_access(user: Option<&UserRecord>) -> bool {
    user.map(UserRecord::is_premium).unwrap_or(false)
}
