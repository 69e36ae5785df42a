//! Usage: GitLab (gitlab.com and self-managed `gitlab.*` hosts) provider.
//!
//! Specializations:
//! - Built-in OAuth application for gitlab.com; self-managed hosts need `GCM_DEV_GITLAB_CLIENTID`
//! - OAuth credentials use the `oauth2` account and are renewed from a stored refresh token

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

pub(crate) const OAUTH_ACCOUNT: &str = "oauth2";
const PAT_DEFAULT_USERNAME: &str = "pat";
const OAUTH_AUTHORIZE_PATH: &str = "/oauth/authorize";
const OAUTH_TOKEN_PATH: &str = "/oauth/token";
const OAUTH_SCOPES: [&str; 1] = ["write_repository"];

struct KnownApplication {
    host: &'static str,
    client_id: &'static str,
    client_secret: &'static str,
}

const KNOWN_APPLICATIONS: [KnownApplication; 1] = [KnownApplication {
    host: "gitlab.com",
    client_id: "172b9f227872b5dde33f4d9b1db06a6a5515ae79508e7a00c973c85ce490671e",
    client_secret: "7da92770d1447508601e4ba026bc5eb655c8268e818cd609889cc9bae2023f39",
}];

const AUTH_MODES: SettingKey = SettingKey::new("GCM_GITLAB_AUTHMODES", "gitLabAuthModes");
const DEV_CLIENT_ID: SettingKey = SettingKey::new("GCM_DEV_GITLAB_CLIENTID", "gitLabDevClientId");
const DEV_CLIENT_SECRET: SettingKey =
    SettingKey::new("GCM_DEV_GITLAB_CLIENTSECRET", "gitLabDevClientSecret");
const DEV_REDIRECT_URI: SettingKey =
    SettingKey::new("GCM_DEV_GITLAB_REDIRECTURI", "gitLabDevRedirectUri");

fn known_application(host: &str) -> Option<&'static KnownApplication> {
    KNOWN_APPLICATIONS
        .iter()
        .find(|app| app.host.eq_ignore_ascii_case(host))
}

/// `None` when neither a dev override nor a built-in application covers the host.
fn oauth_client_config(
    settings: &Settings,
    input: &InputArguments,
) -> AppResult<Option<OAuth2ClientConfig>> {
    let known = input.host_name().and_then(known_application);
    let (client_id, client_secret) = match (settings.get(DEV_CLIENT_ID), known) {
        (Some(id), _) => (id, settings.get(DEV_CLIENT_SECRET)),
        (None, Some(app)) => (
            app.client_id.to_string(),
            settings
                .get(DEV_CLIENT_SECRET)
                .or_else(|| Some(app.client_secret.to_string())),
        ),
        (None, None) => return Ok(None),
    };

    let base = host_base_url(input)?;
    let join = |path: &str| {
        base.join(path)
            .map_err(|e| AppError::from(format!("{INVALID_CONFIG}: bad GitLab OAuth url: {e}")))
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

fn is_gitlab_host(host: &str) -> bool {
    known_application(host).is_some()
        || (host.starts_with("gitlab.") && host.split('.').count() >= 3)
}

#[derive(Debug, Default, Clone, Copy)]
pub struct GitLabHostProvider;

impl HostProvider for GitLabHostProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::GitLab
    }

    fn id(&self) -> &'static str {
        "gitlab"
    }

    fn name(&self) -> &'static str {
        "GitLab"
    }

    fn is_supported(&self, input: &InputArguments) -> bool {
        input.is_http_or_https()
            && input
                .host_name()
                .is_some_and(|h| is_gitlab_host(&h.to_ascii_lowercase()))
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
            let mut modes = AuthenticationModes::BASIC | AuthenticationModes::PAT;
            if oauth_client_config(&ctx.settings, input)?.is_some() {
                modes |= AuthenticationModes::BROWSER;
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
                AuthMode::Pat => get_pat_credential(ctx, &request, Some(PAT_DEFAULT_USERNAME)).await,
                AuthMode::Browser => {
                    let config = oauth_client_config(&ctx.settings, input)?.ok_or_else(|| {
                        format!("{INVALID_CONFIG}: no GitLab OAuth application is configured for this host (GCM_DEV_GITLAB_CLIENTID)")
                    })?;
                    let client = OAuth2Client::new(ctx.http.clone(), config);
                    let scopes: Vec<String> = OAUTH_SCOPES.iter().map(|s| s.to_string()).collect();
                    let token = run_oauth_flow(ctx, &client, &scopes, mode).await?;
                    oauth_credential(ctx, input, OAUTH_ACCOUNT, &token).await
                }
                AuthMode::DeviceCode => Err(format!(
                    "{UNSUPPORTED}: GitLab does not support the device code flow"
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
