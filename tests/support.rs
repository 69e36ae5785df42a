#![allow(dead_code)]

use std::ffi::OsString;
use std::sync::{Mutex, MutexGuard, OnceLock};

use git_credential_keeper::app::context::CommandContext;
use git_credential_keeper::infra::settings::Settings;
use git_credential_keeper::protocol::commands::CredentialCommand;
use git_credential_keeper::protocol::input::InputArguments;
use git_credential_keeper::provider::HostProviderRegistry;
use git_credential_keeper::run_command;
use git_credential_keeper::shared::error::AppResult;
use tempfile::TempDir;

static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();

fn env_lock() -> MutexGuard<'static, ()> {
    ENV_LOCK
        .get_or_init(|| Mutex::new(()))
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Variables a developer machine may carry that would change helper behaviour.
const ISOLATED_VARS: [&str; 12] = [
    "GCM_NAMESPACE",
    "GCM_CREDENTIAL_STORE",
    "GCM_PROVIDER",
    "GCM_INTERACTIVE",
    "GIT_TERMINAL_PROMPT",
    "GCM_HTTP_TIMEOUT",
    "GCM_ENCRYPTED_STORE_PATH",
    "GCM_ENCRYPTED_STORE_PASSPHRASE",
    "GCM_TRACE",
    "GCM_OAUTH_CLIENTID",
    "GCM_GITHUB_AUTHMODES",
    "GCM_GITLAB_AUTHMODES",
];

#[derive(Default)]
struct EnvRestore {
    saved: Vec<(&'static str, Option<OsString>)>,
}

impl EnvRestore {
    fn save_once(&mut self, key: &'static str) {
        if self.saved.iter().any(|(k, _)| *k == key) {
            return;
        }
        self.saved.push((key, std::env::var_os(key)));
    }

    fn set_var(&mut self, key: &'static str, value: impl Into<OsString>) {
        self.save_once(key);
        std::env::set_var(key, value.into());
    }

    fn remove_var(&mut self, key: &'static str) {
        self.save_once(key);
        std::env::remove_var(key);
    }
}

impl Drop for EnvRestore {
    fn drop(&mut self) {
        for (key, value) in self.saved.drain(..).rev() {
            match value {
                Some(v) => std::env::set_var(key, v),
                None => std::env::remove_var(key),
            }
        }
    }
}

/// Process environment sandbox: serialized, isolated HOME, git config reads disabled.
pub struct TestEnv {
    _lock: MutexGuard<'static, ()>,
    env: EnvRestore,
    home: TempDir,
}

impl TestEnv {
    pub fn new() -> Self {
        let lock = env_lock();
        let home = tempfile::tempdir().expect("tempdir");

        let mut env = EnvRestore::default();
        let home_os = home.path().as_os_str().to_os_string();
        env.set_var("HOME", home_os.clone());
        // Windows fallback env for `dirs` path resolution.
        env.set_var("USERPROFILE", home_os.clone());
        env.set_var("XDG_DATA_HOME", home.path().join("data").into_os_string());
        env.set_var("GCM_GIT_CONFIG", "0");
        for key in ISOLATED_VARS {
            env.remove_var(key);
        }

        Self {
            _lock: lock,
            env,
            home,
        }
    }

    pub fn set(&mut self, key: &'static str, value: impl Into<OsString>) -> &mut Self {
        self.env.set_var(key, value);
        self
    }

    pub fn settings(&self) -> Settings {
        Settings::load(None)
    }

    pub fn home_dir(&self) -> &std::path::Path {
        self.home.path()
    }
}

impl Default for TestEnv {
    fn default() -> Self {
        Self::new()
    }
}

pub fn input(raw: &str) -> InputArguments {
    InputArguments::parse_str(raw).expect("valid request")
}

/// Run `command` through the default registry; returns the result and what went to stdout.
pub async fn run(
    ctx: &CommandContext,
    command: CredentialCommand,
    raw: &str,
) -> (AppResult<()>, String) {
    let registry = HostProviderRegistry::with_default_providers();
    let mut out = Vec::new();
    let result = run_command(ctx, &registry, command, &input(raw), &mut out).await;
    (result, String::from_utf8(out).expect("utf8 output"))
}

/// `key=value` pairs of a `get` response, without the terminating blank line.
pub fn response_pairs(out: &str) -> Vec<(String, String)> {
    out.lines()
        .take_while(|line| !line.is_empty())
        .filter_map(|line| line.split_once('='))
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}
