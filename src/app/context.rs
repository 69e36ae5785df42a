//! Usage: Everything one command invocation needs, passed explicitly instead of globals.

use crate::app::session::Session;
use crate::auth::browser::BrowserLauncher;
use crate::auth::oauth::DevicePollPolicy;
use crate::credential::Credential;
use crate::infra::settings::Settings;
use crate::prompt::Prompt;
use crate::shared::blocking;
use crate::shared::error::AppResult;
use crate::store::{CredentialStore, SecretStoreKey};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

const HTTP_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
/// How long the loopback listener waits for the browser redirect.
pub(crate) const DEFAULT_AUTH_CODE_TIMEOUT: Duration = Duration::from_secs(300);

#[derive(Clone)]
pub struct CommandContext {
    pub session: Session,
    pub settings: Settings,
    pub store: Arc<dyn CredentialStore>,
    pub prompt: Arc<dyn Prompt>,
    pub browser: Arc<dyn BrowserLauncher>,
    pub http: reqwest::Client,
    pub cancel: CancellationToken,
    pub device_poll: DevicePollPolicy,
    pub auth_code_timeout: Duration,
}

impl std::fmt::Debug for CommandContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandContext")
            .field("session", &self.session.id())
            .field("store", &self.store.backend_name())
            .finish_non_exhaustive()
    }
}

impl CommandContext {
    pub fn new(
        session: Session,
        settings: Settings,
        store: Arc<dyn CredentialStore>,
        prompt: Arc<dyn Prompt>,
        browser: Arc<dyn BrowserLauncher>,
    ) -> AppResult<Self> {
        let http = build_http_client(&settings)?;
        Ok(Self {
            session,
            settings,
            store,
            prompt,
            browser,
            http,
            cancel: CancellationToken::new(),
            device_poll: DevicePollPolicy::default(),
            auth_code_timeout: DEFAULT_AUTH_CODE_TIMEOUT,
        })
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn with_device_poll(mut self, policy: DevicePollPolicy) -> Self {
        self.device_poll = policy;
        self
    }

    pub fn with_auth_code_timeout(mut self, timeout: Duration) -> Self {
        self.auth_code_timeout = timeout;
        self
    }

    pub fn store_key(&self, service: &str, account: Option<&str>) -> SecretStoreKey {
        SecretStoreKey::new(
            self.settings.namespace(),
            service,
            account.map(str::to_string),
        )
    }

    pub(crate) async fn store_get(&self, key: &SecretStoreKey) -> AppResult<Option<Credential>> {
        let store = Arc::clone(&self.store);
        let key = key.clone();
        blocking::run("store_get", move || store.get(&key)).await
    }

    pub(crate) async fn store_put(&self, key: &SecretStoreKey, credential: &Credential) -> AppResult<()> {
        let store = Arc::clone(&self.store);
        let key = key.clone();
        let credential = credential.clone();
        blocking::run("store_put", move || store.add_or_update(&key, &credential)).await
    }

    pub(crate) async fn store_remove(&self, key: &SecretStoreKey) -> AppResult<bool> {
        let store = Arc::clone(&self.store);
        let key = key.clone();
        blocking::run("store_remove", move || store.remove(&key)).await
    }
}

pub(crate) fn build_http_client(settings: &Settings) -> AppResult<reqwest::Client> {
    reqwest::Client::builder()
        .user_agent(format!(
            "git-credential-keeper/{}",
            env!("CARGO_PKG_VERSION")
        ))
        .connect_timeout(HTTP_CONNECT_TIMEOUT)
        .timeout(settings.http_timeout())
        .build()
        .map_err(|e| format!("SYSTEM_ERROR: http client init failed: {e}").into())
}
