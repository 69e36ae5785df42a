//! Usage: Behaviour shared by every host provider (key derivation, get/store/erase, OAuth glue).

use super::HostProvider;
use crate::app::context::CommandContext;
use crate::auth::modes::{AuthMode, AuthenticationModes};
use crate::auth::oauth::{self, OAuth2Client, OAuth2TokenResult};
use crate::credential::Credential;
use crate::infra::settings::{SettingKey, Settings};
use crate::prompt::PromptRequest;
use crate::protocol::input::InputArguments;
use crate::shared::error::{AppResult, INVALID_CONFIG, SYSTEM_ERROR, UNSUPPORTED};
use crate::shared::security::constant_time_eq;
use crate::shared::time::now_unix_seconds;
use reqwest::Url;
use std::time::Instant;

const REFRESH_TOKEN_HOST_PREFIX: &str = "oauth-refresh-token.";
pub(crate) const DEFAULT_LOOPBACK_REDIRECT: &str = "http://127.0.0.1/";

/// `protocol://host[:port][/path]` with any trailing slash removed.
pub(crate) fn default_service_name(input: &InputArguments) -> AppResult<String> {
    let url = input.remote_url()?;
    Ok(url.as_str().trim_end_matches('/').to_string())
}

/// Refresh tokens live beside the access token under a distinct host-derived service.
pub(crate) fn refresh_service_name(input: &InputArguments) -> AppResult<String> {
    input.validate()?;
    let protocol = input.protocol().unwrap_or_default().to_ascii_lowercase();
    let host = input.host().unwrap_or_default();
    Ok(format!("{protocol}://{REFRESH_TOKEN_HOST_PREFIX}{host}"))
}

pub(crate) fn prompt_request(title: &str, input: &InputArguments) -> PromptRequest {
    PromptRequest {
        title: title.to_string(),
        resource: input.resource(),
        username: input.username().map(str::to_string),
    }
}

pub(crate) fn ensure_https(input: &InputArguments, provider_name: &str) -> AppResult<()> {
    if input.is_protocol("http") {
        return Err(format!(
            "{UNSUPPORTED}: unencrypted HTTP is not supported for {provider_name}; use an HTTPS remote URL"
        )
        .into());
    }
    Ok(())
}

/// Forced mode set from a per-provider setting. Invalid values and `none` are ignored.
pub(crate) fn auth_modes_override(
    settings: &Settings,
    key: SettingKey,
) -> Option<AuthenticationModes> {
    let raw = settings.get(key)?;
    match AuthenticationModes::parse(&raw) {
        Ok(modes) if modes.is_empty() => {
            tracing::debug!(setting = key.env, "auth mode override is 'none'; ignoring");
            None
        }
        Ok(modes) => {
            tracing::debug!(setting = key.env, modes = %modes, "auth mode override applied");
            Some(modes)
        }
        Err(err) => {
            tracing::debug!(setting = key.env, value = %raw, error = %err, "invalid auth mode override ignored");
            None
        }
    }
}

/// Absolute redirect URI from `key`, or `default` when unset.
pub(crate) fn redirect_uri_setting(
    settings: &Settings,
    key: SettingKey,
    default: &str,
) -> AppResult<Url> {
    let raw = settings.get(key).unwrap_or_else(|| default.to_string());
    Url::parse(&raw).map_err(|e| {
        format!("{INVALID_CONFIG}: {} is not an absolute URI ('{raw}'): {e}", key.env).into()
    })
}

/// `scheme://host[:port]/` of the request, used as the base for relative endpoints.
pub(crate) fn host_base_url(input: &InputArguments) -> AppResult<Url> {
    let mut url = input.remote_url()?;
    url.set_path("/");
    Ok(url)
}

/// Browser or device code, whichever `mode` names.
pub(crate) async fn run_oauth_flow(
    ctx: &CommandContext,
    client: &OAuth2Client,
    scopes: &[String],
    mode: AuthMode,
) -> AppResult<OAuth2TokenResult> {
    match mode {
        AuthMode::Browser => oauth::get_token_by_browser(ctx, client, scopes).await,
        AuthMode::DeviceCode => oauth::get_token_by_device_code(ctx, client, scopes).await,
        other => Err(format!("{SYSTEM_ERROR}: '{}' is not an OAuth mode", other.label()).into()),
    }
}

/// Persist the refresh token (if any) and turn the token into the credential handed to git.
pub(crate) async fn oauth_credential(
    ctx: &CommandContext,
    input: &InputArguments,
    account: &str,
    token: &OAuth2TokenResult,
) -> AppResult<Credential> {
    if let Some(refresh_token) = token.refresh_token.as_deref().filter(|t| !t.is_empty()) {
        let key = ctx.store_key(&refresh_service_name(input)?, Some(account));
        ctx.store_put(&key, &Credential::token(Some(account.to_string()), refresh_token))
            .await?;
        tracing::debug!(service = key.service(), "refresh token stored");
    }
    Ok(Credential::oauth(
        account,
        token.access_token.clone(),
        token.expires_at(now_unix_seconds()),
    ))
}

/// `Ok(None)` when no refresh token is stored for `account`.
pub(crate) async fn refresh_oauth(
    ctx: &CommandContext,
    input: &InputArguments,
    client: &OAuth2Client,
    account: &str,
) -> AppResult<Option<Credential>> {
    let key = ctx.store_key(&refresh_service_name(input)?, Some(account));
    let Some(stored) = ctx.store_get(&key).await? else {
        return Ok(None);
    };
    let token = client.refresh(&stored.secret, &ctx.cancel).await?;
    tracing::debug!(service = key.service(), "access token refreshed");
    oauth_credential(ctx, input, account, &token).await.map(Some)
}

pub(crate) async fn get_credential<P: HostProvider + ?Sized>(
    provider: &P,
    ctx: &CommandContext,
    input: &InputArguments,
) -> AppResult<Credential> {
    input.validate()?;
    provider.validate_request(input)?;
    let service = provider.service_name(input)?;
    let key = ctx.store_key(&service, input.username());

    match ctx.store_get(&key).await? {
        Some(existing) if !existing.is_expired() => {
            tracing::debug!(provider = provider.id(), service = %service, "credential found in store");
            return Ok(existing);
        }
        Some(_) => {
            tracing::debug!(provider = provider.id(), service = %service, "stored credential expired");
        }
        None => {
            tracing::debug!(provider = provider.id(), service = %service, "no stored credential");
        }
    }

    if provider.uses_refresh_tokens() {
        match provider.refresh_credential(ctx, input).await {
            Ok(Some(credential)) => {
                persist(ctx, &service, &credential).await?;
                return Ok(credential);
            }
            Ok(None) => {}
            Err(err) => {
                tracing::warn!(
                    provider = provider.id(),
                    code = err.code(),
                    error = %err.message(),
                    "token refresh failed; falling back to interactive authentication"
                );
            }
        }
    }

    let started = Instant::now();
    let modes = provider.supported_modes(ctx, input).await?;
    tracing::debug!(provider = provider.id(), modes = %modes, "supported authentication modes");
    let credential = provider.generate_credential(ctx, input, modes).await?;
    tracing::info!(
        provider = provider.id(),
        service = %service,
        elapsed_ms = started.elapsed().as_millis() as u64,
        "new credential generated"
    );
    persist(ctx, &service, &credential).await?;
    Ok(credential)
}

async fn persist(ctx: &CommandContext, service: &str, credential: &Credential) -> AppResult<()> {
    let key = ctx.store_key(service, credential.account.as_deref());
    ctx.store_put(&key, credential).await
}

pub(crate) async fn store_credential<P: HostProvider + ?Sized>(
    provider: &P,
    ctx: &CommandContext,
    input: &InputArguments,
) -> AppResult<()> {
    input.validate()?;
    let Some(password) = input.password() else {
        tracing::debug!(provider = provider.id(), "store skipped: request carries no password");
        return Ok(());
    };
    let username = input.username();
    let service = provider.service_name(input)?;
    let key = ctx.store_key(&service, username);

    // git echoes back what `get` returned; keep the stored kind and expiry in that case.
    if let Some(existing) = ctx.store_get(&key).await? {
        let same_account = existing.account_or_empty() == username.unwrap_or_default();
        if same_account && constant_time_eq(existing.secret.as_bytes(), password.as_bytes()) {
            tracing::debug!(provider = provider.id(), service = %service, "store skipped: credential unchanged");
            return Ok(());
        }
    }

    let mut credential = Credential::password(username.unwrap_or_default(), password);
    credential.account = username.map(str::to_string);
    credential.expires_at = input.password_expiry_utc();
    ctx.store_put(&key, &credential).await?;
    tracing::debug!(provider = provider.id(), service = %service, "credential stored");
    Ok(())
}

pub(crate) async fn erase_credential<P: HostProvider + ?Sized>(
    provider: &P,
    ctx: &CommandContext,
    input: &InputArguments,
) -> AppResult<bool> {
    input.validate()?;
    let service = provider.service_name(input)?;
    let key = ctx.store_key(&service, input.username());

    let Some(existing) = ctx.store_get(&key).await? else {
        tracing::debug!(provider = provider.id(), service = %service, "erase: nothing stored");
        return Ok(false);
    };
    if let Some(password) = input.password() {
        if !constant_time_eq(existing.secret.as_bytes(), password.as_bytes()) {
            tracing::debug!(provider = provider.id(), service = %service, "erase skipped: stored secret differs");
            return Ok(false);
        }
    }

    let removed = ctx
        .store_remove(&key.with_account(existing.account.as_deref()))
        .await?;
    if provider.uses_refresh_tokens() {
        if let Some(account) = existing.account.as_deref() {
            let refresh_key = ctx.store_key(&refresh_service_name(input)?, Some(account));
            if ctx.store_remove(&refresh_key).await? {
                tracing::debug!(service = refresh_key.service(), "refresh token erased");
            }
        }
    }
    tracing::debug!(provider = provider.id(), service = %service, removed, "erase finished");
    Ok(removed)
}
