//! Usage: User prompt seam (terminal implementation plus scripted doubles in tests).

mod terminal;

use crate::auth::modes::AuthMode;
use crate::shared::error::AppResult;

pub use terminal::TerminalPrompt;

/// What is being asked for, shown in prompt titles.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptRequest {
    /// Host family shown to the user, e.g. `GitHub`.
    pub title: String,
    /// Remote URL without credentials.
    pub resource: String,
    pub username: Option<String>,
}

#[derive(Clone, PartialEq, Eq)]
pub struct BasicInput {
    pub username: String,
    pub password: String,
}

impl std::fmt::Debug for BasicInput {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BasicInput")
            .field("username", &self.username)
            .finish_non_exhaustive()
    }
}

/// Blocking prompts; callers run them on the blocking pool.
///
/// `Ok(None)` means the user dismissed the prompt.
pub trait Prompt: Send + Sync {
    /// Whether a user can be asked anything at all (attached terminal).
    fn is_available(&self) -> bool;

    fn basic(&self, request: &PromptRequest) -> AppResult<Option<BasicInput>>;

    fn token(&self, request: &PromptRequest) -> AppResult<Option<String>>;

    fn select_mode(&self, request: &PromptRequest, modes: &[AuthMode]) -> AppResult<Option<AuthMode>>;

    fn show_device_code(&self, user_code: &str, verification_uri: &str) -> AppResult<()>;
}
