//! Request descriptions handed to the gateway.
//!
//! A `RequestOptions` is plain data so the gateway can build the HTTP request
//! more than once: once for the first attempt and again for the retry after
//! a token refresh.

use reqwest::multipart::{Form, Part};
use reqwest::Method;
use serde_json::Value;

use super::ApiError;

/// Whether replaying the request after a token refresh is safe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Idempotency {
    #[default]
    Safe,
    /// The request has side effects that must not happen twice
    /// (payments, outbound messages, account creation).
    NonIdempotent,
}

#[derive(Debug, Clone)]
pub struct FilePart {
    pub bytes: Vec<u8>,
    pub file_name: String,
    pub mime_type: String,
}

/// Form fields and file attachments for a `multipart/form-data` body.
#[derive(Debug, Clone, Default)]
pub struct MultipartForm {
    fields: Vec<(String, String)>,
    files: Vec<(String, FilePart)>,
}

impl MultipartForm {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn text(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.fields.push((name.into(), value.into()));
        self
    }

    /// Add a text field only when a value is present.
    pub fn text_opt(self, name: impl Into<String>, value: Option<impl Into<String>>) -> Self {
        match value {
            Some(value) => self.text(name, value),
            None => self,
        }
    }

    pub fn file(mut self, name: impl Into<String>, file: FilePart) -> Self {
        self.files.push((name.into(), file));
        self
    }

    pub fn has_files(&self) -> bool {
        !self.files.is_empty()
    }

    pub fn field(&self, name: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }

    /// Build a fresh reqwest form. Forms are consumed on send, so each
    /// attempt needs its own.
    /// Build the reqwest form. A malformed MIME type is the caller's mistake,
    /// reported as `ApiError::Config`.
    pub(crate) fn to_form(&self) -> Result<Form, ApiError> {
        let mut form = Form::new();
        for (name, value) in &self.fields {
            form = form.text(name.clone(), value.clone());
        }
        for (name, file) in &self.files {
            let part = Part::bytes(file.bytes.clone())
                .file_name(file.file_name.clone())
                .mime_str(&file.mime_type)
                .map_err(|e| {
                    ApiError::Config(format!(
                        "Invalid MIME type '{}' for part '{}': {}",
                        file.mime_type, name, e
                    ))
                })?;
            form = form.part(name.clone(), part);
        }
        Ok(form)
    }
}

#[derive(Debug, Clone, Default)]
pub enum RequestBody {
    #[default]
    Empty,
    Json(Value),
    Multipart(MultipartForm),
}

#[derive(Debug, Clone)]
pub struct RequestOptions {
    pub method: Method,
    pub body: RequestBody,
    /// Send without credentials (login, registration, password reset).
    pub skip_auth: bool,
    pub idempotency: Idempotency,
    pub headers: Vec<(String, String)>,
}

impl Default for RequestOptions {
    fn default() -> Self {
        Self::get()
    }
}

impl RequestOptions {
    fn with_method(method: Method) -> Self {
        Self {
            method,
            body: RequestBody::Empty,
            skip_auth: false,
            idempotency: Idempotency::Safe,
            headers: Vec::new(),
        }
    }

    pub fn get() -> Self {
        Self::with_method(Method::GET)
    }

    pub fn post() -> Self {
        Self::with_method(Method::POST)
    }

    pub fn put() -> Self {
        Self::with_method(Method::PUT)
    }

    pub fn delete() -> Self {
        Self::with_method(Method::DELETE)
    }

    pub fn json(mut self, body: Value) -> Self {
        self.body = RequestBody::Json(body);
        self
    }

    pub fn multipart(mut self, form: MultipartForm) -> Self {
        self.body = RequestBody::Multipart(form);
        self
    }

    pub fn skip_auth(mut self) -> Self {
        self.skip_auth = true;
        self
    }

    pub fn non_idempotent(mut self) -> Self {
        self.idempotency = Idempotency::NonIdempotent;
        self
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn is_multipart(&self) -> bool {
        matches!(self.body, RequestBody::Multipart(_))
    }
}
