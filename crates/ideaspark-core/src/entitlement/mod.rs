//! Subscription-tier feature gating.
//!
//! The gate is consulted by UI callers before they invoke any premium
//! capability. Denials are ordinary decisions, not errors.

pub mod gate;

pub use gate::{has_premium_access, AccessDecision, EntitlementGate, FeatureKey, PREMIUM_FEATURES};
