//! Usage: The credential value handed between providers, the store and the protocol writer.

use crate::shared::security::mask_token;
use crate::shared::time::{is_expired, now_unix_seconds};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Seconds before expiry at which a cached access token is treated as stale.
pub(crate) const EXPIRY_LEAD_SECONDS: i64 = 60;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum CredentialKind {
    #[default]
    Password,
    Token,
    OAuthAccessToken,
}

#[derive(Clone, PartialEq, Eq)]
pub struct Credential {
    pub account: Option<String>,
    pub secret: String,
    pub kind: CredentialKind,
    /// Unix seconds; `None` means the secret does not expire.
    pub expires_at: Option<i64>,
}

impl Credential {
    pub fn password(account: impl Into<String>, secret: impl Into<String>) -> Self {
        Self {
            account: Some(account.into()),
            secret: secret.into(),
            kind: CredentialKind::Password,
            expires_at: None,
        }
    }

    pub fn token(account: Option<String>, secret: impl Into<String>) -> Self {
        Self {
            account,
            secret: secret.into(),
            kind: CredentialKind::Token,
            expires_at: None,
        }
    }

    pub fn oauth(
        account: impl Into<String>,
        access_token: impl Into<String>,
        expires_at: Option<i64>,
    ) -> Self {
        Self {
            account: Some(account.into()),
            secret: access_token.into(),
            kind: CredentialKind::OAuthAccessToken,
            expires_at,
        }
    }

    pub fn account_or_empty(&self) -> &str {
        self.account.as_deref().unwrap_or_default()
    }

    pub fn is_expired(&self) -> bool {
        is_expired(self.expires_at, EXPIRY_LEAD_SECONDS, now_unix_seconds())
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("account", &self.account)
            .field("secret", &mask_token(&self.secret))
            .field("kind", &self.kind)
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// Serialized form written into a backend entry.
#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct StoredSecret {
    pub(crate) v: u32,
    pub(crate) secret: String,
    #[serde(default)]
    pub(crate) kind: CredentialKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub(crate) expires_at: Option<i64>,
}

const STORED_SECRET_VERSION: u32 = 1;

impl StoredSecret {
    pub(crate) fn encode(credential: &Credential) -> Result<String, String> {
        let stored = StoredSecret {
            v: STORED_SECRET_VERSION,
            secret: credential.secret.clone(),
            kind: credential.kind,
            expires_at: credential.expires_at,
        };
        serde_json::to_string(&stored)
            .map_err(|e| format!("SYSTEM_ERROR: failed to encode stored secret: {e}"))
    }

    /// Entries written by other tools hold the bare secret; treat those as passwords.
    pub(crate) fn decode(account: Option<String>, raw: &str) -> Credential {
        match serde_json::from_str::<StoredSecret>(raw) {
            Ok(stored) if stored.v == STORED_SECRET_VERSION => Credential {
                account,
                secret: stored.secret,
                kind: stored.kind,
                expires_at: stored.expires_at,
            },
            _ => Credential {
                account,
                secret: raw.to_string(),
                kind: CredentialKind::Password,
                expires_at: None,
            },
        }
    }
}
