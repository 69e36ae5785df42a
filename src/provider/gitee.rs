//! Usage: Gitee (gitee.com and self-hosted `gitee.*` hosts) provider.
//!
//! gitee.com ships a built-in OAuth application; other hosts get browser sign-in only when
//! `GCM_DEV_GITEE_CLIENTID` names a different application.

use super::base::{
    self, auth_modes_override, ensure_https, host_base_url, oauth_credential, prompt_request,
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

const DOTCOM_HOST: &str = "gitee.com";
const OAUTH_ACCOUNT: &str = "oauth2";
const OAUTH_AUTHORIZE_PATH: &str = "/oauth/authorize";
const OAUTH_TOKEN_PATH: &str = "/oauth/token";
const OAUTH_SCOPES: [&str; 1] = ["projects"];
const OAUTH_CLIENT_ID: &str = "09776da975878a86ed655d5ada62a5d4e6faf8e89514ec982794eb61f4092d01";
const OAUTH_CLIENT_SECRET: &str =
    "1d52e7bb3c53b396ad3c4e256ca1eaff27df20a782cd4f1f3dfefa32f44bafc9";

const AUTH_MODES: SettingKey = SettingKey::new("GCM_GITEE_AUTHMODES", "giteeAuthModes");
const DEV_CLIENT_ID: SettingKey = SettingKey::new("GCM_DEV_GITEE_CLIENTID", "giteeDevClientId");
const DEV_CLIENT_SECRET: SettingKey =
    SettingKey::new("GCM_DEV_GITEE_CLIENTSECRET", "giteeDevClientSecret");
const DEV_REDIRECT_URI: SettingKey =
    SettingKey::new("GCM_DEV_GITEE_REDIRECTURI", "giteeDevRedirectUri");

fn is_dotcom(input: &InputArguments) -> bool {
    input
        .host_name()
        .is_some_and(|host| host.eq_ignore_ascii_case(DOTCOM_HOST))
}

/// A dev client id other than the built-in one; only these work against self-hosted servers.
fn custom_client_id(settings: &Settings) -> Option<String> {
    settings
        .get(DEV_CLIENT_ID)
        .filter(|id| !id.eq_ignore_ascii_case(OAUTH_CLIENT_ID))
}

/// `None` for a self-hosted server with no custom OAuth application.
fn oauth_client_config(
    settings: &Settings,
    input: &InputArguments,
) -> AppResult<Option<OAuth2ClientConfig>> {
    let client_id = match (settings.get(DEV_CLIENT_ID), is_dotcom(input)) {
        (Some(id), true) => id,
        (None, true) => OAUTH_CLIENT_ID.to_string(),
        (_, false) => match custom_client_id(settings) {
            Some(id) => id,
            None => return Ok(None),
        },
    };
    let client_secret = settings.get(DEV_CLIENT_SECRET).or_else(|| {
        (client_id == OAUTH_CLIENT_ID).then(|| OAUTH_CLIENT_SECRET.to_string())
    });

    let base = host_base_url(input)?;
    let join = |path: &str| {
        base.join(path)
            .map_err(|e| AppError::from(format!("{INVALID_CONFIG}: bad Gitee OAuth url: {e}")))
    };
    Ok(Some(OAuth2ClientConfig {
        endpoints: OAuth2ServerEndpoints {
            authorization: join(OAUTH_AUTHORIZE_PATH)?,
            token: join(OAUTH_TOKEN_PATH)?,
            device_authorization: None,
        },
        client_id,
        client_secret,
        redirect_uri: Some(redirect_uri_setting(
            settings,
            DEV_REDIRECT_URI,
            DEFAULT_LOOPBACK_REDIRECT,
        )?),
        use_auth_header: true,
        extra_authorize_params: Vec::new(),
    }))
}

#[derive(Debug, Default, Clone, Copy)]
pub struct GiteeHostProvider;

impl HostProvider for GiteeHostProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Gitee
    }

    fn id(&self) -> &'static str {
        "gitee"
    }

    fn name(&self) -> &'static str {
        "Gitee"
    }

    fn is_supported(&self, input: &InputArguments) -> bool {
        input.is_http_or_https()
            && input.host_name().is_some_and(|host| {
                let host = host.to_ascii_lowercase();
                host == DOTCOM_HOST || (host.starts_with("gitee.") && host.split('.').count() >= 3)
            })
    }

    fn validate_request(&self, input: &InputArguments) -> AppResult<()> {
        ensure_https(input, self.name())
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
            let all = AuthenticationModes::BASIC
                | AuthenticationModes::PAT
                | AuthenticationModes::BROWSER;
            if is_dotcom(input) {
                return Ok(all);
            }
            if custom_client_id(&ctx.settings).is_some() {
                return Ok(all);
            }
            tracing::warn!(
                host = input.host_name().unwrap_or_default(),
                "no Gitee OAuth application configured (GCM_DEV_GITEE_CLIENTID); browser sign-in unavailable"
            );
            Ok(AuthenticationModes::PAT | AuthenticationModes::BASIC)
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
                        format!("{INVALID_CONFIG}: GCM_DEV_GITEE_CLIENTID is required for browser sign-in on this host")
                    })?;
                    let client = OAuth2Client::new(ctx.http.clone(), config);
                    let scopes: Vec<String> = OAUTH_SCOPES.iter().map(|s| s.to_string()).collect();
                    let token = run_oauth_flow(ctx, &client, &scopes, mode).await?;
                    oauth_credential(ctx, input, OAUTH_ACCOUNT, &token).await
                }
                AuthMode::DeviceCode => Err(format!(
                    "{UNSUPPORTED}: Gitee does not support the device code flow"
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
