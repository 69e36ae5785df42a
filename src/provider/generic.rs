//! Usage: Fallback provider for any host: basic credentials, or OAuth when `GCM_OAUTH_*` is set.

use super::base::{
    self, host_base_url, oauth_credential, prompt_request, redirect_uri_setting,
    run_oauth_flow, DEFAULT_LOOPBACK_REDIRECT,
};
use super::{BoxFuture, HostProvider, ProviderKind};
use crate::app::context::CommandContext;
use crate::auth::basic::{get_basic_credential, get_pat_credential};
use crate::auth::modes::{AuthMode, AuthenticationModes};
use crate::auth::oauth::{OAuth2Client, OAuth2ClientConfig, OAuth2ServerEndpoints};
use crate::auth::select_mode;
use crate::credential::Credential;
use crate::infra::settings::{SettingKey, Settings};
use crate::protocol::input::InputArguments;
use crate::shared::error::{AppResult, INVALID_CONFIG};
use reqwest::Url;

const CLIENT_ID: SettingKey = SettingKey::new("GCM_OAUTH_CLIENTID", "oauthClientId");
const CLIENT_SECRET: SettingKey = SettingKey::new("GCM_OAUTH_CLIENTSECRET", "oauthClientSecret");
const REDIRECT_URI: SettingKey = SettingKey::new("GCM_OAUTH_REDIRECTURI", "oauthRedirectUri");
const SCOPES: SettingKey = SettingKey::new("GCM_OAUTH_SCOPES", "oauthScopes");
const AUTHORIZE_ENDPOINT: SettingKey =
    SettingKey::new("GCM_OAUTH_AUTHORIZE_ENDPOINT", "oauthAuthorizeEndpoint");
const TOKEN_ENDPOINT: SettingKey = SettingKey::new("GCM_OAUTH_TOKEN_ENDPOINT", "oauthTokenEndpoint");
const DEVICE_ENDPOINT: SettingKey =
    SettingKey::new("GCM_OAUTH_DEVICE_ENDPOINT", "oauthDeviceEndpoint");
const USE_AUTH_HEADER: SettingKey = SettingKey::new(
    "GCM_OAUTH_USE_CLIENT_AUTH_HEADER",
    "oauthUseClientAuthenticationHeader",
);
const DEFAULT_USERNAME: SettingKey =
    SettingKey::new("GCM_OAUTH_DEFAULT_USERNAME", "oauthDefaultUserName");

const FALLBACK_OAUTH_USERNAME: &str = "OAUTH_USER";

#[derive(Debug)]
struct GenericOAuthSettings {
    client: OAuth2ClientConfig,
    scopes: Vec<String>,
    default_username: String,
}

/// `None` unless a client id and both mandatory endpoints are configured.
fn oauth_settings(
    settings: &Settings,
    input: &InputArguments,
) -> AppResult<Option<GenericOAuthSettings>> {
    let Some(client_id) = settings.get(CLIENT_ID) else {
        return Ok(None);
    };
    let (Some(authorize), Some(token)) = (settings.get(AUTHORIZE_ENDPOINT), settings.get(TOKEN_ENDPOINT))
    else {
        tracing::debug!("OAuth client id set without authorize/token endpoints; OAuth disabled");
        return Ok(None);
    };

    let base = host_base_url(input)?;
    let device = settings
        .get(DEVICE_ENDPOINT)
        .map(|raw| resolve_endpoint(&base, &raw, DEVICE_ENDPOINT))
        .transpose()?;
    let endpoints = OAuth2ServerEndpoints {
        authorization: resolve_endpoint(&base, &authorize, AUTHORIZE_ENDPOINT)?,
        token: resolve_endpoint(&base, &token, TOKEN_ENDPOINT)?,
        device_authorization: device,
    };

    let scopes = settings
        .get(SCOPES)
        .map(|raw| {
            raw.split(|c: char| c.is_whitespace() || c == ',')
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default();

    Ok(Some(GenericOAuthSettings {
        client: OAuth2ClientConfig {
            endpoints,
            client_id,
            client_secret: settings.get(CLIENT_SECRET),
            redirect_uri: Some(redirect_uri_setting(
                settings,
                REDIRECT_URI,
                DEFAULT_LOOPBACK_REDIRECT,
            )?),
            use_auth_header: settings.get_bool(USE_AUTH_HEADER, true),
            extra_authorize_params: Vec::new(),
        },
        scopes,
        default_username: settings
            .get(DEFAULT_USERNAME)
            .unwrap_or_else(|| FALLBACK_OAUTH_USERNAME.to_string()),
    }))
}

/// Absolute URLs are used as is; anything else is relative to the remote host.
fn resolve_endpoint(base: &Url, raw: &str, key: SettingKey) -> AppResult<Url> {
    Url::parse(raw)
        .or_else(|_| base.join(raw))
        .map_err(|e| format!("{INVALID_CONFIG}: {} is not a valid URL ('{raw}'): {e}", key.env).into())
}

fn modes_for(oauth: Option<&GenericOAuthSettings>) -> AuthenticationModes {
    match oauth {
        Some(oauth) if oauth.client.endpoints.device_authorization.is_some() => {
            AuthenticationModes::OAUTH
        }
        Some(_) => AuthenticationModes::BROWSER,
        None => AuthenticationModes::BASIC,
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct GenericHostProvider;

impl GenericHostProvider {
    fn account(oauth: &GenericOAuthSettings, input: &InputArguments) -> String {
        input
            .username()
            .map(str::to_string)
            .unwrap_or_else(|| oauth.default_username.clone())
    }
}

impl HostProvider for GenericHostProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Generic
    }

    fn id(&self) -> &'static str {
        "generic"
    }

    fn name(&self) -> &'static str {
        "Generic"
    }

    fn is_supported(&self, input: &InputArguments) -> bool {
        input.validate().is_ok()
    }

    fn supported_modes<'a>(
        &'a self,
        ctx: &'a CommandContext,
        input: &'a InputArguments,
    ) -> BoxFuture<'a, AppResult<AuthenticationModes>> {
        Box::pin(async move {
            let oauth = oauth_settings(&ctx.settings, input)?;
            Ok(modes_for(oauth.as_ref()))
        })
    }

    fn generate_credential<'a>(
        &'a self,
        ctx: &'a CommandContext,
        input: &'a InputArguments,
        modes: AuthenticationModes,
    ) -> BoxFuture<'a, AppResult<Credential>> {
        Box::pin(async move {
            let request = prompt_request(self.name(), input);
            let mode = select_mode(ctx, &request, modes).await?;
            match mode {
                AuthMode::Basic => get_basic_credential(ctx, &request).await,
                AuthMode::Pat => get_pat_credential(ctx, &request, None).await,
                AuthMode::Browser | AuthMode::DeviceCode => {
                    let oauth = oauth_settings(&ctx.settings, input)?.ok_or_else(|| {
                        format!("{INVALID_CONFIG}: OAuth was selected but GCM_OAUTH_CLIENTID and endpoints are not configured")
                    })?;
                    let account = Self::account(&oauth, input);
                    let client = OAuth2Client::new(ctx.http.clone(), oauth.client);
                    let token = run_oauth_flow(ctx, &client, &oauth.scopes, mode).await?;
                    oauth_credential(ctx, input, &account, &token).await
                }
            }
        })
    }

    fn uses_refresh_tokens(&self) -> bool {
        true
    }

    fn refresh_credential<'a>(
        &'a self,
        ctx: &'a CommandContext,
        input: &'a InputArguments,
    ) -> BoxFuture<'a, AppResult<Option<Credential>>> {
        Box::pin(async move {
            let Some(oauth) = oauth_settings(&ctx.settings, input)? else {
                return Ok(None);
            };
            let account = Self::account(&oauth, input);
            let client = OAuth2Client::new(ctx.http.clone(), oauth.client);
            base::refresh_oauth(ctx, input, &client, &account).await
        })
    }
}
