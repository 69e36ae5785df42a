//! Usage: Terminal prompts on stderr; key input comes from the tty because stdin carries the
//! git protocol.

use super::{BasicInput, Prompt, PromptRequest};
use crate::auth::modes::AuthMode;
use crate::shared::error::{AppError, AppResult, SYSTEM_ERROR};
use dialoguer::console::Term;
use dialoguer::{Input, Password, Select};

#[derive(Debug, Default, Clone, Copy)]
pub struct TerminalPrompt;

impl TerminalPrompt {
    fn term() -> Term {
        Term::stderr()
    }
}

impl Prompt for TerminalPrompt {
    fn is_available(&self) -> bool {
        Self::term().features().is_attended()
    }

    fn basic(&self, request: &PromptRequest) -> AppResult<Option<BasicInput>> {
        let term = Self::term();
        let _ = term.write_line(&format!("Enter credentials for '{}':", request.resource));

        let username = match request.username.as_deref().filter(|u| !u.is_empty()) {
            Some(existing) => existing.to_string(),
            None => {
                let typed: String = Input::new()
                    .with_prompt("Username")
                    .allow_empty(true)
                    .interact_text_on(&term)
                    .map_err(prompt_error)?;
                if typed.trim().is_empty() {
                    return Ok(None);
                }
                typed.trim().to_string()
            }
        };

        let password = Password::new()
            .with_prompt(format!("Password for '{username}'"))
            .allow_empty_password(true)
            .interact_on(&term)
            .map_err(prompt_error)?;
        if password.is_empty() {
            return Ok(None);
        }
        Ok(Some(BasicInput { username, password }))
    }

    fn token(&self, request: &PromptRequest) -> AppResult<Option<String>> {
        let term = Self::term();
        let token = Password::new()
            .with_prompt(format!("{} personal access token for '{}'", request.title, request.resource))
            .allow_empty_password(true)
            .interact_on(&term)
            .map_err(prompt_error)?;
        let token = token.trim().to_string();
        Ok((!token.is_empty()).then_some(token))
    }

    fn select_mode(&self, request: &PromptRequest, modes: &[AuthMode]) -> AppResult<Option<AuthMode>> {
        let labels: Vec<&str> = modes.iter().map(|m| m.label()).collect();
        let picked = Select::new()
            .with_prompt(format!("Select an authentication method for '{}'", request.resource))
            .items(&labels)
            .default(0)
            .interact_on_opt(&Self::term())
            .map_err(prompt_error)?;
        Ok(picked.and_then(|index| modes.get(index).copied()))
    }

    fn show_device_code(&self, user_code: &str, verification_uri: &str) -> AppResult<()> {
        Self::term()
            .write_line(&format!(
                "To complete authentication please visit {verification_uri} and enter the following code:\n{user_code}"
            ))
            .map_err(|e| format!("{SYSTEM_ERROR}: failed to write device code: {e}"))?;
        Ok(())
    }
}

fn prompt_error(err: dialoguer::Error) -> AppError {
    format!("{SYSTEM_ERROR}: terminal prompt failed: {err}").into()
}
