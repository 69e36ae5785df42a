//! Usage: Layered helper settings (environment first, then git config `credential.*`, then defaults).
//!
//! Settings are resolved once per process after the request has been read, so URL-scoped git
//! config (`credential.<url>.<name>`) applies to the remote being authenticated.

use crate::infra::git_config;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

pub const DEFAULT_NAMESPACE: &str = "git";
pub const DEFAULT_HTTP_TIMEOUT_SECONDS: u64 = 60;
const MIN_HTTP_TIMEOUT_SECONDS: u64 = 1;
const MAX_HTTP_TIMEOUT_SECONDS: u64 = 600;
pub const PROVIDER_ID_AUTO: &str = "auto";

pub(crate) mod env {
    pub const NAMESPACE: &str = "GCM_NAMESPACE";
    pub const CREDENTIAL_STORE: &str = "GCM_CREDENTIAL_STORE";
    pub const PROVIDER: &str = "GCM_PROVIDER";
    pub const INTERACTIVE: &str = "GCM_INTERACTIVE";
    pub const GIT_TERMINAL_PROMPT: &str = "GIT_TERMINAL_PROMPT";
    pub const HTTP_TIMEOUT: &str = "GCM_HTTP_TIMEOUT";
    pub const ENCRYPTED_STORE_PATH: &str = "GCM_ENCRYPTED_STORE_PATH";
    pub const ENCRYPTED_STORE_PASSPHRASE: &str = "GCM_ENCRYPTED_STORE_PASSPHRASE";
    pub const TRACE: &str = "GCM_TRACE";
    pub const READ_GIT_CONFIG: &str = "GCM_GIT_CONFIG";
}

pub(crate) mod git {
    pub const NAMESPACE: &str = "namespace";
    pub const CREDENTIAL_STORE: &str = "credentialstore";
    pub const PROVIDER: &str = "provider";
    pub const INTERACTIVE: &str = "interactive";
    pub const HTTP_TIMEOUT: &str = "httptimeout";
}

/// Environment variable plus its optional `credential.<name>` git config twin.
#[derive(Debug, Clone, Copy)]
pub struct SettingKey {
    pub env: &'static str,
    pub git: Option<&'static str>,
}

impl SettingKey {
    pub const fn new(env: &'static str, git: &'static str) -> Self {
        Self {
            env,
            git: Some(git),
        }
    }

    pub const fn env_only(env: &'static str) -> Self {
        Self { env, git: None }
    }
}

/// Immutable snapshot of every configuration source the helper reads.
#[derive(Debug, Clone, Default)]
pub struct Settings {
    env: Arc<HashMap<String, String>>,
    git: Arc<HashMap<String, String>>,
}

impl Settings {
    /// Snapshot the process environment and, unless disabled, git config for `remote_url`.
    pub fn load(remote_url: Option<&str>) -> Self {
        let env: HashMap<String, String> = std::env::vars().collect();
        let read_git = env
            .get(env::READ_GIT_CONFIG)
            .map(|v| !is_falsey(v))
            .unwrap_or(true);
        let git = if read_git {
            git_config::read_credential_section(remote_url)
        } else {
            HashMap::new()
        };
        Self::from_sources(env, git)
    }

    /// Build settings from explicit sources; git keys are matched case-insensitively.
    pub fn from_sources(env: HashMap<String, String>, git: HashMap<String, String>) -> Self {
        let git = git
            .into_iter()
            .map(|(k, v)| (k.to_ascii_lowercase(), v))
            .collect();
        Self {
            env: Arc::new(env),
            git: Arc::new(git),
        }
    }

    pub fn from_env<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let env = pairs
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();
        Self::from_sources(env, HashMap::new())
    }

    /// Trimmed, non-empty value for `key`; the environment wins over git config.
    pub fn get(&self, key: SettingKey) -> Option<String> {
        let from_env = self
            .env
            .get(key.env)
            .map(|v| v.trim())
            .filter(|v| !v.is_empty());
        if let Some(value) = from_env {
            return Some(value.to_string());
        }
        let name = key.git?;
        self.git
            .get(&name.to_ascii_lowercase())
            .map(|v| v.trim())
            .filter(|v| !v.is_empty())
            .map(str::to_string)
    }

    pub fn get_bool(&self, key: SettingKey, default: bool) -> bool {
        match self.get(key) {
            Some(raw) if is_truthy(&raw) => true,
            Some(raw) if is_falsey(&raw) => false,
            Some(raw) => {
                tracing::warn!(setting = key.env, value = %raw, "invalid boolean setting; using default");
                default
            }
            None => default,
        }
    }

    pub fn namespace(&self) -> String {
        self.get(SettingKey::new(env::NAMESPACE, git::NAMESPACE))
            .unwrap_or_else(|| DEFAULT_NAMESPACE.to_string())
    }

    pub fn credential_store(&self) -> Option<String> {
        self.get(SettingKey::new(env::CREDENTIAL_STORE, git::CREDENTIAL_STORE))
            .map(|v| v.to_ascii_lowercase())
    }

    /// Forced provider id, or `None` when unset or `auto`.
    pub fn provider_override(&self) -> Option<String> {
        self.get(SettingKey::new(env::PROVIDER, git::PROVIDER))
            .filter(|v| !v.eq_ignore_ascii_case(PROVIDER_ID_AUTO))
    }

    pub fn is_interaction_allowed(&self) -> bool {
        match self.get(SettingKey::new(env::INTERACTIVE, git::INTERACTIVE)) {
            Some(raw) => {
                let raw = raw.to_ascii_lowercase();
                !(raw == "never" || is_falsey(&raw))
            }
            None => true,
        }
    }

    pub fn is_terminal_prompts_enabled(&self) -> bool {
        self.get(SettingKey::env_only(env::GIT_TERMINAL_PROMPT))
            .map(|v| v != "0")
            .unwrap_or(true)
    }

    pub fn http_timeout(&self) -> Duration {
        let raw = self.get(SettingKey::new(env::HTTP_TIMEOUT, git::HTTP_TIMEOUT));
        let (secs, changed) = sanitize_http_timeout_seconds(raw.as_deref());
        if changed {
            tracing::warn!(
                setting = env::HTTP_TIMEOUT,
                value = raw.as_deref().unwrap_or_default(),
                effective_secs = secs,
                "http timeout out of range or invalid; adjusted"
            );
        }
        Duration::from_secs(secs)
    }

    pub fn encrypted_store_path(&self) -> Option<PathBuf> {
        self.get(SettingKey::env_only(env::ENCRYPTED_STORE_PATH))
            .map(PathBuf::from)
    }

    pub fn encrypted_store_passphrase(&self) -> Option<String> {
        self.get(SettingKey::env_only(env::ENCRYPTED_STORE_PASSPHRASE))
    }

    pub fn trace(&self) -> Option<String> {
        self.get(SettingKey::env_only(env::TRACE))
    }
}

/// Returns the effective timeout and whether the raw value had to be adjusted.
fn sanitize_http_timeout_seconds(raw: Option<&str>) -> (u64, bool) {
    let Some(raw) = raw else {
        return (DEFAULT_HTTP_TIMEOUT_SECONDS, false);
    };
    match raw.trim().parse::<u64>() {
        Ok(secs) if secs < MIN_HTTP_TIMEOUT_SECONDS => (MIN_HTTP_TIMEOUT_SECONDS, true),
        Ok(secs) if secs > MAX_HTTP_TIMEOUT_SECONDS => (MAX_HTTP_TIMEOUT_SECONDS, true),
        Ok(secs) => (secs, false),
        Err(_) => (DEFAULT_HTTP_TIMEOUT_SECONDS, true),
    }
}

pub(crate) fn is_truthy(raw: &str) -> bool {
    matches!(
        raw.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

pub(crate) fn is_falsey(raw: &str) -> bool {
    matches!(
        raw.trim().to_ascii_lowercase().as_str(),
        "0" | "false" | "no" | "off"
    )
}
