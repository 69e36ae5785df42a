//! Usage: GitHub (github.com, gists and GitHub Enterprise Server) provider.
//!
//! Specializations:
//! - `gist.` hosts share credentials with their base host
//! - Enterprise mode discovery via `GET /api/v3/meta`
//! - OAuth and PAT credentials carry the account login from `GET /user`

use super::base::{
    auth_modes_override, ensure_https, host_base_url, prompt_request, redirect_uri_setting,
    run_oauth_flow, DEFAULT_LOOPBACK_REDIRECT,
};
use super::{BoxFuture, HostProvider, ProviderKind};
use crate::app::context::CommandContext;
use crate::auth::basic::{get_basic_credential, get_pat_credential};
use crate::auth::modes::{AuthMode, AuthenticationModes};
use crate::auth::oauth::client::transport_error;
use crate::auth::oauth::{OAuth2Client, OAuth2ClientConfig, OAuth2ServerEndpoints};
use crate::auth::select_mode;
use crate::credential::Credential;
use crate::infra::settings::{SettingKey, Settings};
use crate::protocol::input::InputArguments;
use crate::shared::error::{AppError, AppResult, INVALID_CONFIG, MALFORMED_RESPONSE, SYSTEM_ERROR, USER_CANCELLED};
use crate::shared::time::now_unix_seconds;
use reqwest::Url;
use serde::Deserialize;
use tokio_util::sync::CancellationToken;

const GITHUB_DOTCOM_HOST: &str = "github.com";
const GIST_DOTCOM_HOST: &str = "gist.github.com";
const GITHUB_DOTCOM_API: &str = "https://api.github.com/";
const GITHUB_AE_VERSION: &str = "GitHub AE";
/// First Enterprise Server release with OAuth support for git.
const MIN_OAUTH_VERSION: (u32, u32) = (3, 2);

const OAUTH_CLIENT_ID: &str = "0120e057bd645470c1ed";
const OAUTH_CLIENT_SECRET: &str = "18867509d956965542b521a529a79bb883344c90";
const OAUTH_AUTHORIZE_PATH: &str = "login/oauth/authorize";
const OAUTH_TOKEN_PATH: &str = "login/oauth/access_token";
const OAUTH_DEVICE_PATH: &str = "login/device/code";
const OAUTH_SCOPES: [&str; 3] = ["repo", "gist", "workflow"];

const AUTH_MODES: SettingKey = SettingKey::new("GCM_GITHUB_AUTHMODES", "gitHubAuthModes");
const DEV_CLIENT_ID: SettingKey = SettingKey::new("GCM_DEV_GITHUB_CLIENTID", "gitHubDevClientId");
const DEV_CLIENT_SECRET: SettingKey =
    SettingKey::new("GCM_DEV_GITHUB_CLIENTSECRET", "gitHubDevClientSecret");
const DEV_REDIRECT_URI: SettingKey =
    SettingKey::new("GCM_DEV_GITHUB_REDIRECTURI", "gitHubDevRedirectUri");

#[derive(Debug, Clone, Default, Deserialize)]
pub(crate) struct GitHubMetaInfo {
    #[serde(default)]
    pub(crate) installed_version: Option<String>,
    #[serde(default)]
    pub(crate) verifiable_password_authentication: bool,
}

#[derive(Debug, Deserialize)]
struct GitHubUserInfo {
    login: String,
}

fn lowercase_host(input: &InputArguments) -> Option<String> {
    input.host_name().map(str::to_ascii_lowercase)
}

fn is_dotcom_host(host: &str) -> bool {
    host == GITHUB_DOTCOM_HOST || host == GIST_DOTCOM_HOST
}

pub(crate) fn is_github_host(host: &str) -> bool {
    if is_dotcom_host(host) {
        return true;
    }
    let labels = host.split('.').count();
    (host.starts_with("github.") && labels >= 3) || (host.starts_with("gist.github.") && labels >= 4)
}

/// `gist.github.<x>` -> `github.<x>`; other hosts are unchanged.
fn normalize_gist_host(host: &str) -> &str {
    match host.strip_prefix("gist.") {
        Some(rest) if rest.starts_with("github.") => rest,
        _ => host,
    }
}

/// REST API root: `api.github.com` for dotcom, `/api/v3/` on the instance otherwise.
pub(crate) fn api_base_url(input: &InputArguments) -> AppResult<Url> {
    let host = lowercase_host(input).unwrap_or_default();
    if is_dotcom_host(&host) {
        return Url::parse(GITHUB_DOTCOM_API)
            .map_err(|e| format!("{SYSTEM_ERROR}: bad GitHub API url: {e}").into());
    }
    let base = normalized_base_url(input)?;
    base.join("api/v3/")
        .map_err(|e| format!("{SYSTEM_ERROR}: cannot build GitHub API url: {e}").into())
}

fn normalized_base_url(input: &InputArguments) -> AppResult<Url> {
    let mut base = host_base_url(input)?;
    let host = lowercase_host(input).unwrap_or_default();
    let normalized = normalize_gist_host(&host);
    if normalized != host {
        base.set_host(Some(normalized))
            .map_err(|e| format!("{SYSTEM_ERROR}: cannot normalize gist host: {e}"))?;
    }
    Ok(base)
}

pub(crate) fn modes_from_meta(meta: &GitHubMetaInfo) -> AuthenticationModes {
    let mut modes = AuthenticationModes::PAT;
    if meta.verifiable_password_authentication {
        modes |= AuthenticationModes::BASIC;
    }
    let version = meta.installed_version.as_deref().unwrap_or_default();
    if version.eq_ignore_ascii_case(GITHUB_AE_VERSION) || supports_oauth_version(version) {
        modes |= AuthenticationModes::OAUTH;
    }
    modes
}

fn supports_oauth_version(version: &str) -> bool {
    let mut parts = version.trim().split('.').map(|p| p.parse::<u32>().ok());
    match (parts.next().flatten(), parts.next().flatten()) {
        (Some(major), Some(minor)) => (major, minor) >= MIN_OAUTH_VERSION,
        (Some(major), None) => major > MIN_OAUTH_VERSION.0,
        _ => false,
    }
}

async fn github_get(
    http: &reqwest::Client,
    url: Url,
    token: Option<&str>,
    cancel: &CancellationToken,
) -> AppResult<(u16, String)> {
    let mut request = http
        .get(url)
        .header(reqwest::header::ACCEPT, "application/vnd.github.v3+json");
    if let Some(token) = token {
        request = request.header(reqwest::header::AUTHORIZATION, format!("token {token}"));
    }
    let send = async {
        let response = request.send().await.map_err(transport_error)?;
        let status = response.status().as_u16();
        let body = response.text().await.map_err(transport_error)?;
        Ok::<_, AppError>((status, body))
    };
    tokio::select! {
        _ = cancel.cancelled() => Err(AppError::from(format!("{USER_CANCELLED}: request cancelled"))),
        result = send => result,
    }
}

pub(crate) async fn query_meta(
    http: &reqwest::Client,
    api_base: &Url,
    cancel: &CancellationToken,
) -> AppResult<GitHubMetaInfo> {
    let url = api_base
        .join("meta")
        .map_err(|e| format!("{SYSTEM_ERROR}: bad meta url: {e}"))?;
    let (status, body) = github_get(http, url, None, cancel).await?;
    if !(200..300).contains(&status) {
        return Err(format!("{MALFORMED_RESPONSE}: meta endpoint returned status={status}").into());
    }
    serde_json::from_str(&body)
        .map_err(|e| format!("{MALFORMED_RESPONSE}: meta response is not valid JSON: {e}").into())
}

pub(crate) async fn get_user_login(
    http: &reqwest::Client,
    api_base: &Url,
    token: &str,
    cancel: &CancellationToken,
) -> AppResult<String> {
    let url = api_base
        .join("user")
        .map_err(|e| format!("{SYSTEM_ERROR}: bad user url: {e}"))?;
    let (status, body) = github_get(http, url, Some(token), cancel).await?;
    if !(200..300).contains(&status) {
        return Err(format!(
            "{MALFORMED_RESPONSE}: failed to read the account for the new token: status={status}"
        )
        .into());
    }
    let user: GitHubUserInfo = serde_json::from_str(&body)
        .map_err(|e| format!("{MALFORMED_RESPONSE}: user response is not valid JSON: {e}"))?;
    Ok(user.login)
}

fn oauth_client_config(settings: &Settings, input: &InputArguments) -> AppResult<OAuth2ClientConfig> {
    let base = normalized_base_url(input)?;
    let join = |path: &str| {
        base.join(path)
            .map_err(|e| AppError::from(format!("{INVALID_CONFIG}: bad GitHub OAuth url: {e}")))
    };
    let client_id = settings
        .get(DEV_CLIENT_ID)
        .unwrap_or_else(|| OAUTH_CLIENT_ID.to_string());
    let client_secret = settings
        .get(DEV_CLIENT_SECRET)
        .unwrap_or_else(|| OAUTH_CLIENT_SECRET.to_string());
    Ok(OAuth2ClientConfig {
        endpoints: OAuth2ServerEndpoints {
            authorization: join(OAUTH_AUTHORIZE_PATH)?,
            token: join(OAUTH_TOKEN_PATH)?,
            device_authorization: Some(join(OAUTH_DEVICE_PATH)?),
        },
        client_id,
        client_secret: Some(client_secret),
        redirect_uri: Some(redirect_uri_setting(
            settings,
            DEV_REDIRECT_URI,
            DEFAULT_LOOPBACK_REDIRECT,
        )?),
        use_auth_header: true,
        extra_authorize_params: Vec::new(),
    })
}

#[derive(Debug, Default, Clone, Copy)]
pub struct GitHubHostProvider;

impl HostProvider for GitHubHostProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::GitHub
    }

    fn id(&self) -> &'static str {
        "github"
    }

    fn name(&self) -> &'static str {
        "GitHub"
    }

    fn is_supported(&self, input: &InputArguments) -> bool {
        input.is_http_or_https() && lowercase_host(input).is_some_and(|h| is_github_host(&h))
    }

    fn service_name(&self, input: &InputArguments) -> AppResult<String> {
        let mut url = input.remote_url()?;
        let host = lowercase_host(input).unwrap_or_default();
        let normalized = normalize_gist_host(&host);
        if normalized != host {
            url.set_host(Some(normalized))
                .map_err(|e| format!("{SYSTEM_ERROR}: cannot normalize gist host: {e}"))?;
        }
        Ok(url.as_str().trim_end_matches('/').to_string())
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
            let host = lowercase_host(input).unwrap_or_default();
            if is_dotcom_host(&host) {
                return Ok(AuthenticationModes::OAUTH | AuthenticationModes::PAT);
            }

            let api_base = api_base_url(input)?;
            match query_meta(&ctx.http, &api_base, &ctx.cancel).await {
                Ok(meta) => Ok(modes_from_meta(&meta)),
                Err(err) if err.is(USER_CANCELLED) => Err(err),
                Err(err) => {
                    eprintln!(
                        "warning: failed to query '{api_base}' for supported authentication schemes."
                    );
                    tracing::warn!(code = err.code(), error = %err.message(), "GitHub meta query failed; offering every mode");
                    Ok(AuthenticationModes::all())
                }
            }
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
            let api_base = api_base_url(input)?;
            match mode {
                AuthMode::Basic => get_basic_credential(ctx, &request).await,
                AuthMode::Pat => {
                    let mut credential = get_pat_credential(ctx, &request, None).await?;
                    if credential.account.is_none() {
                        let login =
                            get_user_login(&ctx.http, &api_base, &credential.secret, &ctx.cancel)
                                .await?;
                        credential.account = Some(login);
                    }
                    Ok(credential)
                }
                AuthMode::Browser | AuthMode::DeviceCode => {
                    let config = oauth_client_config(&ctx.settings, input)?;
                    let client = OAuth2Client::new(ctx.http.clone(), config);
                    let scopes: Vec<String> = OAUTH_SCOPES.iter().map(|s| s.to_string()).collect();
                    let token = run_oauth_flow(ctx, &client, &scopes, mode).await?;
                    let login =
                        get_user_login(&ctx.http, &api_base, &token.access_token, &ctx.cancel)
                            .await?;
                    Ok(Credential::oauth(
                        login,
                        token.access_token.clone(),
                        token.expires_at(now_unix_seconds()),
                    ))
                }
            }
        })
    }
}
