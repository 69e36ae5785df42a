//! Usage: OAuth2 engine: browser (authorization code + PKCE) and device code flows.

mod callback_server;
pub mod client;
mod device_code;
mod pkce;
pub mod token;

use crate::app::context::CommandContext;
use crate::auth::{ensure_interaction_allowed, ensure_terminal_prompts, with_prompt};
use crate::shared::error::{AppResult, UNSUPPORTED};

pub use client::{OAuth2Client, OAuth2ClientConfig, OAuth2ServerEndpoints};
pub use device_code::{poll_for_token, DevicePollPolicy};
pub use token::{DeviceCodeResult, OAuth2TokenResult};

pub(crate) async fn get_token_by_browser(
    ctx: &CommandContext,
    client: &OAuth2Client,
    scopes: &[String],
) -> AppResult<OAuth2TokenResult> {
    ensure_interaction_allowed(ctx, "browser authentication")?;
    if !ctx.browser.is_available() {
        return Err(format!("{UNSUPPORTED}: no browser is available in this session").into());
    }

    let started = std::time::Instant::now();
    let auth = client
        .get_authorization_code(
            scopes,
            ctx.browser.as_ref(),
            ctx.auth_code_timeout,
            &ctx.cancel,
        )
        .await?;
    let token = client.exchange_code(&auth, &ctx.cancel).await?;
    tracing::debug!(
        elapsed_ms = started.elapsed().as_millis() as u64,
        has_refresh_token = token.refresh_token.is_some(),
        "browser OAuth flow completed"
    );
    Ok(token)
}

pub(crate) async fn get_token_by_device_code(
    ctx: &CommandContext,
    client: &OAuth2Client,
    scopes: &[String],
) -> AppResult<OAuth2TokenResult> {
    ensure_terminal_prompts(ctx, "device code authentication")?;

    let device = client.get_device_code(scopes, &ctx.cancel).await?;
    let user_code = device.user_code.clone();
    let verification_uri = device
        .verification_uri_complete
        .clone()
        .unwrap_or_else(|| device.verification_uri.clone());
    with_prompt(ctx, "device_code_prompt", move |prompt| {
        prompt.show_device_code(&user_code, &verification_uri)
    })
    .await?;

    let token = poll_for_token(client, &device, ctx.device_poll, &ctx.cancel).await?;
    tracing::debug!(
        has_refresh_token = token.refresh_token.is_some(),
        "device code flow completed"
    );
    Ok(token)
}
