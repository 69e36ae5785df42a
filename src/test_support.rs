//! Usage: Test doubles shared by unit and integration tests.
//!
//! Not part of the CLI surface; exported so `tests/*.rs` can drive commands without a
//! terminal, a browser or the OS keyring.

use crate::app::context::CommandContext;
use crate::app::session::Session;
use crate::auth::browser::BrowserLauncher;
use crate::auth::modes::AuthMode;
use crate::auth::oauth::DevicePollPolicy;
use crate::infra::settings::Settings;
use crate::prompt::{BasicInput, Prompt, PromptRequest};
use crate::shared::error::{AppResult, SYSTEM_ERROR};
use crate::shared::mutex_ext::MutexExt;
use crate::store::{CredentialStore, MemoryCredentialStore};
use reqwest::Url;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Debug)]
struct PromptScript {
    available: bool,
    basic: VecDeque<BasicInput>,
    tokens: VecDeque<String>,
    modes: VecDeque<AuthMode>,
    calls: usize,
    offered_modes: Vec<Vec<AuthMode>>,
    device_codes: Vec<(String, String)>,
}

/// Prompt that answers from queues; an empty queue means the user dismissed the prompt.
///
/// Clones share state so a test can keep a handle after moving one into a context.
#[derive(Debug, Clone)]
pub struct ScriptedPrompt {
    script: Arc<Mutex<PromptScript>>,
}

impl Default for ScriptedPrompt {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedPrompt {
    pub fn new() -> Self {
        Self {
            script: Arc::new(Mutex::new(PromptScript {
                available: true,
                basic: VecDeque::new(),
                tokens: VecDeque::new(),
                modes: VecDeque::new(),
                calls: 0,
                offered_modes: Vec::new(),
                device_codes: Vec::new(),
            })),
        }
    }

    /// No terminal attached.
    pub fn unavailable() -> Self {
        let prompt = Self::new();
        prompt.script.lock_or_recover().available = false;
        prompt
    }

    pub fn with_basic(self, username: &str, password: &str) -> Self {
        self.script.lock_or_recover().basic.push_back(BasicInput {
            username: username.to_string(),
            password: password.to_string(),
        });
        self
    }

    pub fn with_token(self, token: &str) -> Self {
        self.script
            .lock_or_recover()
            .tokens
            .push_back(token.to_string());
        self
    }

    pub fn with_mode(self, mode: AuthMode) -> Self {
        self.script.lock_or_recover().modes.push_back(mode);
        self
    }

    /// Number of basic, token and mode-selection prompts shown so far.
    pub fn calls(&self) -> usize {
        self.script.lock_or_recover().calls
    }

    pub fn offered_modes(&self) -> Vec<Vec<AuthMode>> {
        self.script.lock_or_recover().offered_modes.clone()
    }

    /// `(user_code, verification_uri)` pairs shown to the user.
    pub fn device_codes(&self) -> Vec<(String, String)> {
        self.script.lock_or_recover().device_codes.clone()
    }
}

impl Prompt for ScriptedPrompt {
    fn is_available(&self) -> bool {
        self.script.lock_or_recover().available
    }

    fn basic(&self, _request: &PromptRequest) -> AppResult<Option<BasicInput>> {
        let mut script = self.script.lock_or_recover();
        script.calls += 1;
        Ok(script.basic.pop_front())
    }

    fn token(&self, _request: &PromptRequest) -> AppResult<Option<String>> {
        let mut script = self.script.lock_or_recover();
        script.calls += 1;
        Ok(script.tokens.pop_front())
    }

    fn select_mode(
        &self,
        _request: &PromptRequest,
        modes: &[AuthMode],
    ) -> AppResult<Option<AuthMode>> {
        let mut script = self.script.lock_or_recover();
        script.calls += 1;
        script.offered_modes.push(modes.to_vec());
        Ok(script.modes.pop_front())
    }

    fn show_device_code(&self, user_code: &str, verification_uri: &str) -> AppResult<()> {
        self.script
            .lock_or_recover()
            .device_codes
            .push((user_code.to_string(), verification_uri.to_string()));
        Ok(())
    }
}

#[derive(Debug, Clone)]
enum BrowserBehavior {
    Unavailable,
    Approve { code: String },
    Deny { error: String },
    TamperedState { code: String },
}

/// Browser double that plays the authorization server: on `open` it calls the loopback
/// redirect URI from the authorize URL, the way a real browser would after consent.
#[derive(Debug, Clone)]
pub struct ScriptedBrowser {
    behavior: BrowserBehavior,
    opened: Arc<Mutex<Vec<String>>>,
}

impl ScriptedBrowser {
    pub fn unavailable() -> Self {
        Self::with_behavior(BrowserBehavior::Unavailable)
    }

    pub fn approve(code: &str) -> Self {
        Self::with_behavior(BrowserBehavior::Approve {
            code: code.to_string(),
        })
    }

    pub fn deny(error: &str) -> Self {
        Self::with_behavior(BrowserBehavior::Deny {
            error: error.to_string(),
        })
    }

    /// Redirects with the right code but a forged `state`.
    pub fn tampered_state(code: &str) -> Self {
        Self::with_behavior(BrowserBehavior::TamperedState {
            code: code.to_string(),
        })
    }

    fn with_behavior(behavior: BrowserBehavior) -> Self {
        Self {
            behavior,
            opened: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn opened_urls(&self) -> Vec<String> {
        self.opened.lock_or_recover().clone()
    }

    fn redirect_for(&self, authorize_url: &str) -> AppResult<Option<Url>> {
        let url = Url::parse(authorize_url)
            .map_err(|e| format!("{SYSTEM_ERROR}: scripted browser got a bad URL: {e}"))?;
        let query: HashMap<String, String> = url.query_pairs().into_owned().collect();
        let redirect = query
            .get("redirect_uri")
            .ok_or_else(|| format!("{SYSTEM_ERROR}: authorize URL has no redirect_uri"))?;
        let state = query.get("state").cloned().unwrap_or_default();
        let mut redirect = Url::parse(redirect)
            .map_err(|e| format!("{SYSTEM_ERROR}: bad redirect_uri: {e}"))?;

        let params: Vec<(&str, String)> = match &self.behavior {
            BrowserBehavior::Unavailable => return Ok(None),
            BrowserBehavior::Approve { code } => vec![("code", code.clone()), ("state", state)],
            BrowserBehavior::Deny { error } => vec![
                ("error", error.clone()),
                ("error_description", "denied by scripted browser".to_string()),
                ("state", state),
            ],
            BrowserBehavior::TamperedState { code } => {
                vec![("code", code.clone()), ("state", format!("{state}-forged"))]
            }
        };
        {
            let mut pairs = redirect.query_pairs_mut();
            for (key, value) in &params {
                pairs.append_pair(key, value);
            }
        }
        Ok(Some(redirect))
    }
}

impl BrowserLauncher for ScriptedBrowser {
    fn open(&self, url: &str) -> AppResult<()> {
        self.opened.lock_or_recover().push(url.to_string());
        let Some(redirect) = self.redirect_for(url)? else {
            return Err(format!("{SYSTEM_ERROR}: scripted browser is unavailable").into());
        };
        let handle = tokio::runtime::Handle::try_current()
            .map_err(|e| format!("{SYSTEM_ERROR}: scripted browser needs a runtime: {e}"))?;
        handle.spawn(async move {
            if let Err(err) = reqwest::get(redirect).await {
                tracing::debug!(error = %err, "scripted browser redirect failed");
            }
        });
        Ok(())
    }

    fn is_available(&self) -> bool {
        !matches!(self.behavior, BrowserBehavior::Unavailable)
    }
}

/// Builds a `CommandContext` from explicit settings and doubles; never reads the process
/// environment or git config.
pub struct TestContextBuilder {
    env: HashMap<String, String>,
    git: HashMap<String, String>,
    store: Arc<dyn CredentialStore>,
    prompt: ScriptedPrompt,
    browser: Arc<dyn BrowserLauncher>,
    device_poll: Option<DevicePollPolicy>,
    auth_code_timeout: Option<Duration>,
}

impl Default for TestContextBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl TestContextBuilder {
    pub fn new() -> Self {
        Self {
            env: HashMap::new(),
            git: HashMap::new(),
            store: Arc::new(MemoryCredentialStore::new()),
            prompt: ScriptedPrompt::new(),
            browser: Arc::new(ScriptedBrowser::unavailable()),
            device_poll: None,
            auth_code_timeout: None,
        }
    }

    pub fn env(mut self, key: &str, value: &str) -> Self {
        self.env.insert(key.to_string(), value.to_string());
        self
    }

    /// `credential.<key>` git config value.
    pub fn git(mut self, key: &str, value: &str) -> Self {
        self.git.insert(key.to_string(), value.to_string());
        self
    }

    pub fn store(mut self, store: Arc<dyn CredentialStore>) -> Self {
        self.store = store;
        self
    }

    pub fn prompt(mut self, prompt: ScriptedPrompt) -> Self {
        self.prompt = prompt;
        self
    }

    pub fn browser(mut self, browser: ScriptedBrowser) -> Self {
        self.browser = Arc::new(browser);
        self
    }

    pub fn device_poll(mut self, policy: DevicePollPolicy) -> Self {
        self.device_poll = Some(policy);
        self
    }

    pub fn auth_code_timeout(mut self, timeout: Duration) -> Self {
        self.auth_code_timeout = Some(timeout);
        self
    }

    pub fn settings(&self) -> Settings {
        Settings::from_sources(self.env.clone(), self.git.clone())
    }

    pub fn build(self) -> CommandContext {
        let settings = self.settings();
        let mut ctx = CommandContext::new(
            Session::start(),
            settings,
            self.store,
            Arc::new(self.prompt),
            self.browser,
        )
        .expect("test context");
        if let Some(policy) = self.device_poll {
            ctx = ctx.with_device_poll(policy);
        }
        if let Some(timeout) = self.auth_code_timeout {
            ctx = ctx.with_auth_code_timeout(timeout);
        }
        ctx
    }
}

/// Poll policy that keeps device-code tests fast.
pub fn fast_device_poll() -> DevicePollPolicy {
    DevicePollPolicy {
        min_interval: Duration::from_millis(10),
        default_interval: Duration::from_millis(10),
        slow_down_increment: Duration::from_millis(20),
    }
}
