//! Data models shared by the session layer and its callers.
//!
//! - `UserRecord`: the signed-in user's profile, with derived premium status
//! - `Role`, `SubscriptionType`: the two axes that drive entitlements

pub mod user;

pub use user::{Role, SubscriptionType, UserRecord};
