//! Usage: OAuth2 wire types (token, device code, error) and token-endpoint response parsing.

use crate::shared::error::{AppError, AppResult, MALFORMED_RESPONSE};
use crate::shared::security::mask_token;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;
use std::fmt;
use std::time::Duration;

const ERROR_SNIPPET_CHARS: usize = 500;

#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OAuth2TokenResult {
    pub access_token: String,
    #[serde(default = "default_token_type")]
    pub token_type: String,
    #[serde(
        default,
        with = "duration_seconds",
        skip_serializing_if = "Option::is_none"
    )]
    pub expires_in: Option<Duration>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    #[serde(
        rename = "scope",
        default,
        with = "space_delimited",
        skip_serializing_if = "Option::is_none"
    )]
    pub scopes: Option<Vec<String>>,
}

fn default_token_type() -> String {
    "bearer".to_string()
}

impl OAuth2TokenResult {
    /// Absolute expiry in unix seconds, if the server gave a lifetime.
    pub fn expires_at(&self, now_unix: i64) -> Option<i64> {
        self.expires_in
            .map(|d| now_unix.saturating_add(i64::try_from(d.as_secs()).unwrap_or(i64::MAX)))
    }
}

impl fmt::Debug for OAuth2TokenResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OAuth2TokenResult")
            .field("access_token", &mask_token(&self.access_token))
            .field("token_type", &self.token_type)
            .field("expires_in", &self.expires_in)
            .field(
                "refresh_token",
                &self.refresh_token.as_deref().map(mask_token),
            )
            .field("scopes", &self.scopes)
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct OAuth2ErrorResponse {
    pub error: String,
    #[serde(default)]
    pub error_description: Option<String>,
    #[serde(default)]
    pub error_uri: Option<String>,
}

impl From<OAuth2ErrorResponse> for AppError {
    fn from(value: OAuth2ErrorResponse) -> Self {
        AppError::oauth2(
            &value.error,
            value.error_description.as_deref(),
            value.error_uri.as_deref(),
        )
    }
}

#[derive(Clone, PartialEq, Eq, Deserialize)]
pub struct DeviceCodeResult {
    pub device_code: String,
    pub user_code: String,
    // Some servers still spell it `verification_url`.
    #[serde(alias = "verification_url")]
    pub verification_uri: String,
    #[serde(default)]
    pub verification_uri_complete: Option<String>,
    #[serde(default, with = "duration_seconds")]
    pub expires_in: Option<Duration>,
    #[serde(default, with = "duration_seconds")]
    pub interval: Option<Duration>,
}

impl fmt::Debug for DeviceCodeResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceCodeResult")
            .field("user_code", &self.user_code)
            .field("verification_uri", &self.verification_uri)
            .field("expires_in", &self.expires_in)
            .field("interval", &self.interval)
            .finish_non_exhaustive()
    }
}

/// Outcome of one call to a token endpoint; errors are data here so the device poller can
/// inspect `authorization_pending` and `slow_down`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum TokenEndpointResponse {
    Token(OAuth2TokenResult),
    Error(OAuth2ErrorResponse),
}

impl TokenEndpointResponse {
    pub(crate) fn into_result(self) -> AppResult<OAuth2TokenResult> {
        match self {
            TokenEndpointResponse::Token(token) => Ok(token),
            TokenEndpointResponse::Error(err) => Err(err.into()),
        }
    }
}

/// Classify a token endpoint reply. An `error` member wins regardless of HTTP status, since
/// some servers answer device polls with 200 + error body.
pub(crate) fn parse_token_endpoint_response(
    status: u16,
    body: &str,
) -> AppResult<TokenEndpointResponse> {
    let value: Value = match serde_json::from_str(body) {
        Ok(value) => value,
        Err(_) => return Err(malformed(status, body, "body is not JSON")),
    };

    if value.get("error").and_then(Value::as_str).is_some() {
        let err: OAuth2ErrorResponse = serde_json::from_value(value)
            .map_err(|e| malformed(status, body, &format!("invalid error body: {e}")))?;
        return Ok(TokenEndpointResponse::Error(err));
    }

    if !(200..300).contains(&status) {
        return Err(malformed(status, body, "unknown OAuth error"));
    }

    let has_token = value
        .get("access_token")
        .and_then(Value::as_str)
        .is_some_and(|v| !v.trim().is_empty());
    if !has_token {
        return Err(malformed(status, body, "missing access_token"));
    }

    let token: OAuth2TokenResult = serde_json::from_value(value)
        .map_err(|e| malformed(status, body, &format!("invalid token body: {e}")))?;
    Ok(TokenEndpointResponse::Token(token))
}

pub(crate) fn parse_device_code_response(status: u16, body: &str) -> AppResult<DeviceCodeResult> {
    let value: Value = serde_json::from_str(body)
        .map_err(|_| malformed(status, body, "device code body is not JSON"))?;
    if value.get("error").and_then(Value::as_str).is_some() {
        let err: OAuth2ErrorResponse = serde_json::from_value(value)
            .map_err(|e| malformed(status, body, &format!("invalid error body: {e}")))?;
        return Err(err.into());
    }
    if !(200..300).contains(&status) {
        return Err(malformed(status, body, "unknown OAuth error"));
    }
    serde_json::from_value(value)
        .map_err(|e| malformed(status, body, &format!("invalid device code body: {e}")))
}

fn malformed(status: u16, body: &str, reason: &str) -> AppError {
    AppError::new(
        MALFORMED_RESPONSE,
        format!(
            "{reason} (status={status}) body={}",
            sanitize_error_body_snippet(body)
        ),
    )
}

pub(crate) fn parse_i64_lossy(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
        Value::String(s) => s.trim().parse::<i64>().ok(),
        _ => None,
    }
}

fn is_sensitive_key(key: &str) -> bool {
    let key_lc = key.trim().to_ascii_lowercase();
    key_lc.contains("token")
        || key_lc.contains("secret")
        || key_lc.contains("code")
        || key_lc == "authorization"
}

fn redact_sensitive_json_fields(value: &mut Value) {
    match value {
        Value::Object(map) => {
            for (key, nested) in map {
                if is_sensitive_key(key) {
                    if let Some(raw) = nested.as_str() {
                        *nested = Value::String(mask_token(raw));
                        continue;
                    }
                }
                redact_sensitive_json_fields(nested);
            }
        }
        Value::Array(items) => {
            for nested in items {
                redact_sensitive_json_fields(nested);
            }
        }
        _ => {}
    }
}

pub(crate) fn sanitize_error_body_snippet(body: &str) -> String {
    if let Ok(mut value) = serde_json::from_str::<Value>(body) {
        redact_sensitive_json_fields(&mut value);
        if let Ok(encoded) = serde_json::to_string(&value) {
            return encoded.chars().take(ERROR_SNIPPET_CHARS).collect();
        }
    }
    body.chars().take(ERROR_SNIPPET_CHARS).collect()
}

/// `Option<Duration>` as whole seconds; accepts numbers or numeric strings, drops negatives.
mod duration_seconds {
    use super::*;

    pub(super) fn serialize<S: Serializer>(
        value: &Option<Duration>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match value {
            Some(d) => serializer.serialize_u64(d.as_secs()),
            None => serializer.serialize_none(),
        }
    }

    pub(super) fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<Duration>, D::Error> {
        let raw = Option::<Value>::deserialize(deserializer)?;
        Ok(raw
            .as_ref()
            .and_then(parse_i64_lossy)
            .filter(|secs| *secs >= 0)
            .map(|secs| Duration::from_secs(secs as u64)))
    }
}

/// `scope` is one space-delimited string on the wire, an ordered list in memory.
mod space_delimited {
    use super::*;

    pub(super) fn serialize<S: Serializer>(
        value: &Option<Vec<String>>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match value {
            Some(scopes) => serializer.serialize_str(&scopes.join(" ")),
            None => serializer.serialize_none(),
        }
    }

    pub(super) fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<Vec<String>>, D::Error> {
        let raw = Option::<String>::deserialize(deserializer)?;
        Ok(raw.map(|s| s.split_whitespace().map(str::to_string).collect()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_token(body: &str) -> OAuth2TokenResult {
        match parse_token_endpoint_response(200, body).expect("parse") {
            TokenEndpointResponse::Token(token) => token,
            other => panic!("expected token, got {other:?}"),
        }
    }

    #[test]
    fn expires_in_round_trips_as_whole_seconds() {
        let token = parse_token(r#"{"access_token":"at","token_type":"bearer","expires_in":3600}"#);
        assert_eq!(token.expires_in, Some(Duration::from_secs(3600)));

        let encoded = serde_json::to_value(&token).expect("encode");
        assert_eq!(encoded["expires_in"], serde_json::json!(3600));
        let decoded: OAuth2TokenResult = serde_json::from_value(encoded).expect("decode");
        assert_eq!(decoded.expires_in, Some(Duration::from_secs(3600)));
    }

    #[test]
    fn missing_expires_in_is_unset_not_zero() {
        let token = parse_token(r#"{"access_token":"at","token_type":"bearer"}"#);
        assert_eq!(token.expires_in, None);
        let encoded = serde_json::to_value(&token).expect("encode");
        assert!(encoded.get("expires_in").is_none());
    }

    #[test]
    fn sub_second_precision_is_truncated_on_write() {
        let token = OAuth2TokenResult {
            access_token: "at".into(),
            token_type: "bearer".into(),
            expires_in: Some(Duration::from_millis(1_999)),
            refresh_token: None,
            scopes: None,
        };
        let encoded = serde_json::to_value(&token).expect("encode");
        assert_eq!(encoded["expires_in"], serde_json::json!(1));
    }

    #[test]
    fn string_expires_in_is_accepted() {
        let token = parse_token(r#"{"access_token":"at","expires_in":"7200"}"#);
        assert_eq!(token.expires_in, Some(Duration::from_secs(7200)));
        assert_eq!(token.token_type, "bearer");
    }

    #[test]
    fn scope_order_is_preserved() {
        let token = parse_token(r#"{"access_token":"at","scope":"repo gist  workflow"}"#);
        assert_eq!(
            token.scopes,
            Some(vec!["repo".to_string(), "gist".to_string(), "workflow".to_string()])
        );
        let encoded = serde_json::to_value(&token).expect("encode");
        assert_eq!(encoded["scope"], serde_json::json!("repo gist workflow"));
    }

    #[test]
    fn error_body_is_classified_even_with_success_status() {
        let parsed =
            parse_token_endpoint_response(200, r#"{"error":"authorization_pending"}"#).expect("ok");
        assert_eq!(
            parsed,
            TokenEndpointResponse::Error(OAuth2ErrorResponse {
                error: "authorization_pending".into(),
                error_description: None,
                error_uri: None,
            })
        );
    }

    #[test]
    fn error_body_becomes_oauth2_error() {
        let err = parse_token_endpoint_response(
            400,
            r#"{"error":"invalid_grant","error_description":"bad code","error_uri":"https://x/err"}"#,
        )
        .expect("classified")
        .into_result()
        .expect_err("should be error");
        assert!(err.is(crate::shared::error::OAUTH2_ERROR));
        assert!(err.message().contains("invalid_grant"));
        assert!(err.message().contains("bad code"));
        assert!(err.message().contains("https://x/err"));
    }

    #[test]
    fn unparsable_body_is_malformed_with_status() {
        let err = parse_token_endpoint_response(502, "<html>bad gateway</html>")
            .expect_err("should fail");
        assert!(err.is(MALFORMED_RESPONSE));
        assert!(err.message().contains("status=502"));
        assert!(err.message().contains("bad gateway"));
    }

    #[test]
    fn success_without_access_token_is_malformed() {
        let err = parse_token_endpoint_response(200, r#"{"token_type":"bearer"}"#)
            .expect_err("should fail");
        assert!(err.is(MALFORMED_RESPONSE));
    }

    #[test]
    fn sanitize_masks_token_fields() {
        let raw = r#"{"message":"oops","refresh_token":"abcd1234xyz9876","nested":{"device_code":"devcode123456789"}}"#;
        let snippet = sanitize_error_body_snippet(raw);
        assert!(!snippet.contains("abcd1234xyz9876"));
        assert!(!snippet.contains("devcode123456789"));
        assert!(snippet.contains(&mask_token("abcd1234xyz9876")));
    }

    #[test]
    fn device_code_accepts_verification_url_alias() {
        let parsed = parse_device_code_response(
            200,
            r#"{"device_code":"dc","user_code":"ABCD-1234","verification_url":"https://example.com/device","expires_in":900,"interval":5}"#,
        )
        .expect("parse");
        assert_eq!(parsed.verification_uri, "https://example.com/device");
        assert_eq!(parsed.interval, Some(Duration::from_secs(5)));
        assert_eq!(parsed.expires_in, Some(Duration::from_secs(900)));
    }

    #[test]
    fn debug_output_masks_tokens() {
        let token = parse_token(r#"{"access_token":"gho_supersecretvalue","refresh_token":"ghr_anothersecretvalue"}"#);
        let rendered = format!("{token:?}");
        assert!(!rendered.contains("gho_supersecretvalue"));
        assert!(!rendered.contains("ghr_anothersecretvalue"));
    }
}
