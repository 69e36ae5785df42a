//! Usage: Unified error model (maps internal failures to `CODE: message` strings).
//!
//! Every failure in the helper is an `AppError` with a stable upper-case code. The protocol
//! adapter is the only place that turns one into an exit code and a stderr line.

use std::sync::Arc;

pub type AppResult<T> = Result<T, AppError>;

pub const NO_PROVIDER_FOUND: &str = "NO_PROVIDER_FOUND";
pub const USER_CANCELLED: &str = "USER_CANCELLED";
pub const OAUTH2_ERROR: &str = "OAUTH2_ERROR";
pub const OAUTH2_TIMEOUT: &str = "OAUTH2_TIMEOUT";
pub const OAUTH2_STATE_MISMATCH: &str = "OAUTH2_STATE_MISMATCH";
pub const STORE_BACKEND_ERROR: &str = "STORE_BACKEND_ERROR";
pub const MALFORMED_RESPONSE: &str = "MALFORMED_RESPONSE";
pub const INVALID_INPUT: &str = "INVALID_INPUT";
pub const INVALID_CONFIG: &str = "INVALID_CONFIG";
pub const INTERACTION_DISABLED: &str = "INTERACTION_DISABLED";
pub const UNSUPPORTED: &str = "UNSUPPORTED";
pub const SYSTEM_ERROR: &str = "SYSTEM_ERROR";

#[derive(Debug, Clone, thiserror::Error)]
#[error("{code}: {message}")]
pub struct AppError {
    code: String,
    message: String,
    #[source]
    source: Option<Arc<dyn std::error::Error + Send + Sync>>,
}

impl AppError {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            source: None,
        }
    }

    pub(crate) fn with_source(
        mut self,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        self.source = Some(Arc::new(source));
        self
    }

    pub fn code(&self) -> &str {
        &self.code
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn is(&self, code: &str) -> bool {
        self.code == code
    }

    /// OAuth endpoint error carrying the provider's `error`/`error_description`/`error_uri`.
    pub(crate) fn oauth2(error: &str, description: Option<&str>, uri: Option<&str>) -> Self {
        let mut message = error.to_string();
        if let Some(description) = description.filter(|v| !v.trim().is_empty()) {
            message.push_str(": ");
            message.push_str(description.trim());
        }
        if let Some(uri) = uri.filter(|v| !v.trim().is_empty()) {
            message.push_str(" [");
            message.push_str(uri.trim());
            message.push(']');
        }
        AppError::new(OAUTH2_ERROR, message)
    }
}

fn split_code_message(raw: &str) -> Option<(&str, &str)> {
    let msg = raw.trim();
    let msg = msg.strip_prefix("Error:").unwrap_or(msg).trim();
    if msg.is_empty() {
        return None;
    }

    let (maybe_code, rest) = msg.split_once(':')?;
    let code = maybe_code.trim();
    if code.is_empty() {
        return None;
    }
    let mut chars = code.chars();
    let first = chars.next()?;
    if !first.is_ascii_uppercase() {
        return None;
    }
    if !chars.all(|ch| ch.is_ascii_uppercase() || ch.is_ascii_digit() || ch == '_') {
        return None;
    }
    Some((code, rest.trim()))
}

impl From<String> for AppError {
    fn from(value: String) -> Self {
        if let Some((code, rest)) = split_code_message(&value) {
            let message = if rest.is_empty() { value.trim() } else { rest };
            return AppError::new(code.to_string(), message.to_string());
        }
        AppError::new(SYSTEM_ERROR, value)
    }
}

impl From<&'static str> for AppError {
    fn from(value: &'static str) -> Self {
        AppError::from(value.to_string())
    }
}

impl From<AppError> for String {
    fn from(value: AppError) -> Self {
        value.to_string()
    }
}

impl From<std::io::Error> for AppError {
    fn from(value: std::io::Error) -> Self {
        AppError::new(SYSTEM_ERROR, format!("io error: {value}")).with_source(value)
    }
}
