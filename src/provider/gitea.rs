//! Usage: Gitea (`gitea.*` hosts) provider; OAuth only when a client id is configured.

use super::base::{
    self, auth_modes_override, host_base_url, oauth_credential, prompt_request,
    redirect_uri_setting, run_oauth_flow, DEFAULT_LOOPBACK_REDIRECT,
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
use crate::shared::error::{AppError, AppResult, INVALID_CONFIG, UNSUPPORTED};

const OAUTH_ACCOUNT: &str = "oauth2";
const OAUTH_AUTHORIZE_PATH: &str = "/login/oauth/authorize";
const OAUTH_TOKEN_PATH: &str = "/login/oauth/access_token";

const AUTH_MODES: SettingKey = SettingKey::new("GCM_GITEA_AUTHMODES", "giteaAuthModes");
const CLIENT_ID: SettingKey = SettingKey::new("GCM_GITEA_CLIENTID", "giteaClientId");
const CLIENT_SECRET: SettingKey = SettingKey::new("GCM_GITEA_CLIENTSECRET", "giteaClientSecret");
const REDIRECT_URI: SettingKey = SettingKey::new("GCM_GITEA_REDIRECTURI", "giteaRedirectUri");

fn oauth_client_config(
    settings: &Settings,
    input: &InputArguments,
) -> AppResult<Option<OAuth2ClientConfig>> {
    let Some(client_id) = settings.get(CLIENT_ID) else {
        return Ok(None);
    };
    let base = host_base_url(input)?;
    let join = |path: &str| {
        base.join(path)
            .map_err(|e| AppError::from(format!("{INVALID_CONFIG}: bad Gitea OAuth url: {e}")))
    };
    Ok(Some(OAuth2ClientConfig {
        endpoints: OAuth2ServerEndpoints {
            authorization: join(OAUTH_AUTHORIZE_PATH)?,
            token: join(OAUTH_TOKEN_PATH)?,
            device_authorization: None,
        },
        client_id,
        client_secret: settings.get(CLIENT_SECRET),
        redirect_uri: Some(redirect_uri_setting(
            settings,
            REDIRECT_URI,
            DEFAULT_LOOPBACK_REDIRECT,
        )?),
        use_auth_header: true,
        extra_authorize_params: Vec::new(),
    }))
}

#[derive(Debug, Default, Clone, Copy)]
pub struct GiteaHostProvider;

impl HostProvider for GiteaHostProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Gitea
    }

    fn id(&self) -> &'static str {
        "gitea"
    }

    fn name(&self) -> &'static str {
        "Gitea"
    }

    fn is_supported(&self, input: &InputArguments) -> bool {
        input.is_http_or_https()
            && input.host_name().is_some_and(|host| {
                let host = host.to_ascii_lowercase();
                host.starts_with("gitea.") && host.split('.').count() >= 3
            })
    }

    fn supported_modes<'a>(
        &'a self,
        ctx: &'a CommandContext,
        input: &'a InputArguments,
    ) -> BoxFuture<'a, AppResult<AuthenticationModes>> {
        Box::pin(async move {
            if let Some(modes) = auth_modes_override(&ctx.settings, AUTH_MODES) {
                return Ok(modes);
            }
            let mut modes = AuthenticationModes::PAT | AuthenticationModes::BASIC;
            if oauth_client_config(&ctx.settings, input)?.is_some() {
                modes |= AuthenticationModes::BROWSER;
            } else {
                tracing::debug!("no Gitea OAuth client configured (GCM_GITEA_CLIENTID); browser sign-in unavailable");
            }
            Ok(modes)
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
                AuthMode::Browser => {
                    let config = oauth_client_config(&ctx.settings, input)?.ok_or_else(|| {
                        format!("{INVALID_CONFIG}: GCM_GITEA_CLIENTID is required for browser sign-in")
                    })?;
                    let client = OAuth2Client::new(ctx.http.clone(), config);
                    let token = run_oauth_flow(ctx, &client, &[], mode).await?;
                    oauth_credential(ctx, input, OAUTH_ACCOUNT, &token).await
                }
                AuthMode::DeviceCode => Err(format!(
                    "{UNSUPPORTED}: Gitea does not support the device code flow"
                )
                .into()),
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
            let Some(config) = oauth_client_config(&ctx.settings, input)? else {
                return Ok(None);
            };
            let client = OAuth2Client::new(ctx.http.clone(), config);
            base::refresh_oauth(ctx, input, &client, OAUTH_ACCOUNT).await
        })
    }
}
