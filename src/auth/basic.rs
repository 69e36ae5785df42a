//! Usage: Basic (username/password) and personal access token capture through the prompt.

use super::{ensure_terminal_prompts, with_prompt};
use crate::app::context::CommandContext;
use crate::credential::Credential;
use crate::prompt::PromptRequest;
use crate::shared::error::{AppResult, USER_CANCELLED};

pub(crate) async fn get_basic_credential(
    ctx: &CommandContext,
    request: &PromptRequest,
) -> AppResult<Credential> {
    ensure_terminal_prompts(ctx, "basic authentication")?;
    let request = request.clone();
    let input = with_prompt(ctx, "prompt_basic", move |prompt| prompt.basic(&request)).await?;
    let input = input
        .ok_or_else(|| format!("{USER_CANCELLED}: basic credential prompt was dismissed"))?;
    Ok(Credential::password(input.username, input.password))
}

/// `default_username` is used when the request does not already name an account.
pub(crate) async fn get_pat_credential(
    ctx: &CommandContext,
    request: &PromptRequest,
    default_username: Option<&str>,
) -> AppResult<Credential> {
    ensure_terminal_prompts(ctx, "personal access token entry")?;
    let account = request
        .username
        .clone()
        .filter(|u| !u.is_empty())
        .or_else(|| default_username.map(str::to_string));

    let prompt_request = request.clone();
    let token = with_prompt(ctx, "prompt_token", move |prompt| prompt.token(&prompt_request)).await?;
    let token =
        token.ok_or_else(|| format!("{USER_CANCELLED}: token prompt was dismissed"))?;
    Ok(Credential::token(account, token))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credential::CredentialKind;
    use crate::shared::error::INTERACTION_DISABLED;
    use crate::test_support::{ScriptedPrompt, TestContextBuilder};

    fn request(username: Option<&str>) -> PromptRequest {
        PromptRequest {
            title: "Example".into(),
            resource: "https://example.com".into(),
            username: username.map(str::to_string),
        }
    }

    #[tokio::test]
    async fn basic_prompt_returns_password_credential() {
        let ctx = TestContextBuilder::new()
            .prompt(ScriptedPrompt::new().with_basic("alice", "hunter2"))
            .build();
        let credential = get_basic_credential(&ctx, &request(None)).await.expect("cred");
        assert_eq!(credential.account.as_deref(), Some("alice"));
        assert_eq!(credential.secret, "hunter2");
        assert_eq!(credential.kind, CredentialKind::Password);
    }

    #[tokio::test]
    async fn dismissed_basic_prompt_is_cancelled() {
        let ctx = TestContextBuilder::new().prompt(ScriptedPrompt::new()).build();
        let err = get_basic_credential(&ctx, &request(None))
            .await
            .expect_err("cancelled");
        assert!(err.is(USER_CANCELLED));
    }

    #[tokio::test]
    async fn pat_uses_request_username_before_default() {
        let ctx = TestContextBuilder::new()
            .prompt(
                ScriptedPrompt::new()
                    .with_token("glpat-123")
                    .with_token("glpat-456"),
            )
            .build();
        let named = get_pat_credential(&ctx, &request(Some("bob")), Some("pat"))
            .await
            .expect("cred");
        assert_eq!(named.account.as_deref(), Some("bob"));
        assert_eq!(named.secret, "glpat-123");
        let defaulted = get_pat_credential(&ctx, &request(None), Some("pat"))
            .await
            .expect("cred");
        assert_eq!(defaulted.account.as_deref(), Some("pat"));
        assert_eq!(defaulted.secret, "glpat-456");
    }

    #[tokio::test]
    async fn terminal_prompt_opt_out_is_respected() {
        let prompt = ScriptedPrompt::new().with_basic("alice", "pw");
        let ctx = TestContextBuilder::new()
            .env("GIT_TERMINAL_PROMPT", "0")
            .prompt(prompt.clone())
            .build();
        let err = get_basic_credential(&ctx, &request(None))
            .await
            .expect_err("disabled");
        assert!(err.is(INTERACTION_DISABLED));
        assert_eq!(prompt.calls(), 0);
    }
}
