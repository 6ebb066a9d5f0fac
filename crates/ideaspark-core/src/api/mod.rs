//! REST API client module for the IdeaSpark backend.
//!
//! This module provides the `ApiClient` gateway through which every backend
//! call passes, plus typed wrappers for the auth, profile, subscription and
//! export endpoints.
//!
//! The API uses JWT bearer token authentication. Expired tokens are
//! refreshed transparently and the request is replayed once when it is
//! safe to do so.

pub mod client;
pub mod endpoints;
pub mod error;
pub mod request;

pub use client::ApiClient;
pub use endpoints::{ChangePasswordRequest, LoginType, OtpPurpose, RegisterRequest};
pub use error::ApiError;
pub use request::{FilePart, Idempotency, MultipartForm, RequestBody, RequestOptions};
