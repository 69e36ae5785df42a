//! Usage: Secure credential store abstraction and backend selection.
//!
//! Every backend implements the same narrow contract:
//! - `get` right after `add_or_update` for the same key returns the same account and secret;
//! - `remove` of a key that was never written returns `false`, never an error;
//! - each `(service, account)` entry is addressed independently, so other processes writing
//!   different keys cannot interfere.

pub(crate) mod encrypted_file;
pub(crate) mod keyring_store;
pub mod memory;

use crate::credential::Credential;
use crate::infra::app_paths;
use crate::infra::settings::Settings;
use crate::shared::error::{AppResult, INVALID_CONFIG};
use std::sync::Arc;

pub use encrypted_file::EncryptedFileStore;
pub use keyring_store::KeyringStore;
pub use memory::MemoryCredentialStore;

/// Address of one secret: `<namespace>:<service>` plus an optional account.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SecretStoreKey {
    namespace: String,
    service: String,
    account: Option<String>,
}

impl SecretStoreKey {
    pub fn new(
        namespace: impl Into<String>,
        service: impl Into<String>,
        account: Option<String>,
    ) -> Self {
        Self {
            namespace: namespace.into(),
            service: service.into(),
            account: account.filter(|a| !a.is_empty()),
        }
    }

    /// Fully qualified service name handed to the backend.
    pub fn service_name(&self) -> String {
        format!("{}:{}", self.namespace, self.service)
    }

    pub fn service(&self) -> &str {
        &self.service
    }

    pub fn account(&self) -> Option<&str> {
        self.account.as_deref()
    }

    pub fn with_account(&self, account: Option<&str>) -> Self {
        Self::new(
            self.namespace.clone(),
            self.service.clone(),
            account.map(str::to_string),
        )
    }
}

pub trait CredentialStore: Send + Sync {
    fn backend_name(&self) -> &'static str;

    /// First credential for the service when the key has no account.
    fn get(&self, key: &SecretStoreKey) -> AppResult<Option<Credential>>;

    fn add_or_update(&self, key: &SecretStoreKey, credential: &Credential) -> AppResult<()>;

    /// `Ok(false)` when nothing was stored under the key.
    fn remove(&self, key: &SecretStoreKey) -> AppResult<bool>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreBackend {
    Keyring,
    EncryptedFile,
}

impl StoreBackend {
    pub fn as_str(self) -> &'static str {
        match self {
            StoreBackend::Keyring => "keyring",
            StoreBackend::EncryptedFile => "file",
        }
    }
}

const VALID_STORE_VALUES: &str = "keychain (macOS), wincredman (Windows), secretservice (Linux), file";

/// Resolve the backend once from `GCM_CREDENTIAL_STORE` / `credential.credentialStore` and the OS.
pub fn select_backend(settings: &Settings) -> AppResult<StoreBackend> {
    let Some(raw) = settings.credential_store() else {
        return Ok(default_backend());
    };

    let backend = match raw.as_str() {
        "keychain" if cfg!(target_os = "macos") => StoreBackend::Keyring,
        "wincredman" if cfg!(target_os = "windows") => StoreBackend::Keyring,
        "secretservice" if cfg!(any(target_os = "linux", target_os = "freebsd")) => {
            StoreBackend::Keyring
        }
        "keychain" | "wincredman" | "secretservice" => {
            return Err(format!(
                "{INVALID_CONFIG}: credential store '{raw}' is not available on this platform; valid values: {VALID_STORE_VALUES}"
            )
            .into());
        }
        "file" | "encrypted" => StoreBackend::EncryptedFile,
        other => {
            return Err(format!(
                "{INVALID_CONFIG}: unknown credential store '{other}'; valid values: {VALID_STORE_VALUES}"
            )
            .into());
        }
    };
    Ok(backend)
}

fn default_backend() -> StoreBackend {
    if cfg!(any(
        target_os = "macos",
        target_os = "windows",
        target_os = "linux",
        target_os = "freebsd"
    )) {
        StoreBackend::Keyring
    } else {
        StoreBackend::EncryptedFile
    }
}

pub fn open_store(settings: &Settings) -> AppResult<Arc<dyn CredentialStore>> {
    let backend = select_backend(settings)?;
    tracing::debug!(backend = backend.as_str(), "credential store selected");
    match backend {
        StoreBackend::Keyring => Ok(Arc::new(KeyringStore::new())),
        StoreBackend::EncryptedFile => {
            let root = app_paths::encrypted_store_dir(settings)?;
            let store =
                EncryptedFileStore::open(root, settings.encrypted_store_passphrase().as_deref())?;
            Ok(Arc::new(store))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_service_name_is_namespaced() {
        let key = SecretStoreKey::new("git", "https://github.com", Some("alice".to_string()));
        assert_eq!(key.service_name(), "git:https://github.com");
        assert_eq!(key.account(), Some("alice"));
    }

    #[test]
    fn empty_account_is_treated_as_absent() {
        let key = SecretStoreKey::new("git", "https://example.com", Some(String::new()));
        assert_eq!(key.account(), None);
    }

    #[test]
    fn file_backend_is_selectable_everywhere() {
        let settings = Settings::from_env([("GCM_CREDENTIAL_STORE", "FILE")]);
        assert_eq!(
            select_backend(&settings).expect("backend"),
            StoreBackend::EncryptedFile
        );
    }

    #[test]
    fn unknown_backend_is_config_error() {
        let settings = Settings::from_env([("GCM_CREDENTIAL_STORE", "floppy")]);
        let err = select_backend(&settings).expect_err("should fail");
        assert!(err.is(INVALID_CONFIG));
        assert!(err.message().contains("floppy"));
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn foreign_platform_backend_is_rejected() {
        let settings = Settings::from_env([("GCM_CREDENTIAL_STORE", "keychain")]);
        let err = select_backend(&settings).expect_err("should fail");
        assert!(err.message().contains("not available"));

        let settings = Settings::from_env([("GCM_CREDENTIAL_STORE", "secretservice")]);
        assert_eq!(
            select_backend(&settings).expect("backend"),
            StoreBackend::Keyring
        );
    }
}
