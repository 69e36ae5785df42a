//! Usage: Authentication engine (interaction gating, mode selection, basic/PAT prompts, OAuth2).

pub mod basic;
pub mod browser;
pub mod modes;
pub mod oauth;

use crate::app::context::CommandContext;
use crate::prompt::{Prompt, PromptRequest};
use crate::shared::blocking;
use crate::shared::error::{AppError, AppResult, INTERACTION_DISABLED, UNSUPPORTED, USER_CANCELLED};
use modes::{AuthMode, AuthenticationModes};
use std::sync::Arc;

pub(crate) fn ensure_interaction_allowed(ctx: &CommandContext, what: &str) -> AppResult<()> {
    if !ctx.settings.is_interaction_allowed() {
        return Err(format!(
            "{INTERACTION_DISABLED}: cannot start {what}: user interaction is disabled (GCM_INTERACTIVE)"
        )
        .into());
    }
    Ok(())
}

pub(crate) fn ensure_terminal_prompts(ctx: &CommandContext, what: &str) -> AppResult<()> {
    ensure_interaction_allowed(ctx, what)?;
    if !ctx.settings.is_terminal_prompts_enabled() {
        return Err(format!(
            "{INTERACTION_DISABLED}: cannot start {what}: terminal prompts are disabled (GIT_TERMINAL_PROMPT=0)"
        )
        .into());
    }
    if !ctx.prompt.is_available() {
        return Err(format!("{INTERACTION_DISABLED}: cannot start {what}: no terminal is attached").into());
    }
    Ok(())
}

/// Run a blocking prompt off the async runtime; Ctrl-C wins over a pending prompt.
pub(crate) async fn with_prompt<T, F>(ctx: &CommandContext, label: &'static str, f: F) -> AppResult<T>
where
    T: Send + 'static,
    F: FnOnce(&dyn Prompt) -> AppResult<T> + Send + 'static,
{
    let prompt = Arc::clone(&ctx.prompt);
    let task = blocking::run(label, move || f(prompt.as_ref()));
    tokio::select! {
        _ = ctx.cancel.cancelled() => Err(AppError::from(format!("{USER_CANCELLED}: prompt cancelled"))),
        result = task => result,
    }
}

/// Narrow `modes` to one flow: a single candidate is used as is, several are offered to the user.
pub(crate) async fn select_mode(
    ctx: &CommandContext,
    request: &PromptRequest,
    modes: AuthenticationModes,
) -> AppResult<AuthMode> {
    let mut modes = modes;
    if modes.contains_mode(AuthMode::Browser) && !ctx.browser.is_available() {
        tracing::debug!("no browser available; dropping browser authentication");
        modes = modes.without_mode(AuthMode::Browser);
    }

    let candidates = modes.candidates();
    if candidates.is_empty() {
        return Err(format!(
            "{UNSUPPORTED}: no authentication method is available for '{}'",
            request.resource
        )
        .into());
    }
    if candidates.len() == 1 {
        return Ok(candidates[0]);
    }

    ensure_interaction_allowed(ctx, "authentication method selection")?;
    if ensure_terminal_prompts(ctx, "authentication method selection").is_err() {
        tracing::debug!(mode = ?candidates[0], "cannot prompt for a method; using the first");
        return Ok(candidates[0]);
    }
    let request = request.clone();
    let picked = with_prompt(ctx, "select_auth_mode", move |prompt| {
        prompt.select_mode(&request, &candidates)
    })
    .await?;
    picked.ok_or_else(|| format!("{USER_CANCELLED}: no authentication method selected").into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{ScriptedPrompt, TestContextBuilder};

    fn request() -> PromptRequest {
        PromptRequest {
            title: "Example".into(),
            resource: "https://example.com".into(),
            username: None,
        }
    }

    #[tokio::test]
    async fn single_mode_is_used_without_prompting() {
        let prompt = ScriptedPrompt::new();
        let ctx = TestContextBuilder::new().prompt(prompt.clone()).build();
        let mode = select_mode(&ctx, &request(), AuthenticationModes::PAT)
            .await
            .expect("mode");
        assert_eq!(mode, AuthMode::Pat);
        assert_eq!(prompt.calls(), 0);
    }

    #[tokio::test]
    async fn several_modes_are_offered_to_the_user() {
        let prompt = ScriptedPrompt::new().with_mode(AuthMode::Basic);
        let ctx = TestContextBuilder::new().prompt(prompt.clone()).build();
        let mode = select_mode(
            &ctx,
            &request(),
            AuthenticationModes::PAT | AuthenticationModes::BASIC,
        )
        .await
        .expect("mode");
        assert_eq!(mode, AuthMode::Basic);
        assert_eq!(prompt.calls(), 1);
    }

    #[tokio::test]
    async fn dismissed_selection_is_user_cancelled() {
        let ctx = TestContextBuilder::new().prompt(ScriptedPrompt::new()).build();
        let err = select_mode(
            &ctx,
            &request(),
            AuthenticationModes::PAT | AuthenticationModes::BASIC,
        )
        .await
        .expect_err("cancelled");
        assert!(err.is(USER_CANCELLED));
    }

    #[tokio::test]
    async fn empty_modes_are_unsupported() {
        let ctx = TestContextBuilder::new().build();
        let err = select_mode(&ctx, &request(), AuthenticationModes::empty())
            .await
            .expect_err("no modes");
        assert!(err.is(UNSUPPORTED));
    }

    #[tokio::test]
    async fn disabled_interaction_blocks_selection() {
        let ctx = TestContextBuilder::new()
            .env("GCM_INTERACTIVE", "never")
            .build();
        let err = select_mode(
            &ctx,
            &request(),
            AuthenticationModes::PAT | AuthenticationModes::BASIC,
        )
        .await
        .expect_err("disabled");
        assert!(err.is(INTERACTION_DISABLED));
    }
}
