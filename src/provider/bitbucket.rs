//! Usage: Bitbucket provider. Cloud (`bitbucket.org`) is matched by host; Data Center only
//! through `GCM_PROVIDER=bitbucket`.

use super::base::{
    self, auth_modes_override, ensure_https, oauth_credential, prompt_request,
    redirect_uri_setting, run_oauth_flow,
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
use crate::shared::error::{AppResult, UNSUPPORTED};

const CLOUD_HOST: &str = "bitbucket.org";
/// Git accepts any username with an access token; Bitbucket documents this one.
const ACCESS_TOKEN_USERNAME: &str = "x-token-auth";

const OAUTH_CLIENT_ID: &str = "HJdmKXV87DsmC9zSWB";
const OAUTH_CLIENT_SECRET: &str = "wwWw47VB9ZHwMsD4Q4rAveHkbxNrMp3n";
const OAUTH_REDIRECT_URI: &str = "http://localhost:34106/";
const OAUTH_AUTHORIZE_URL: &str = "https://bitbucket.org/site/oauth2/authorize";
const OAUTH_TOKEN_URL: &str = "https://bitbucket.org/site/oauth2/access_token";
const OAUTH_SCOPES: [&str; 2] = ["repository:write", "account"];

const AUTH_MODES: SettingKey = SettingKey::new("GCM_BITBUCKET_AUTHMODES", "bitbucketAuthModes");
const CLIENT_ID: SettingKey = SettingKey::new("GCM_BITBUCKET_CLIENTID", "bitbucketClientId");
const CLIENT_SECRET: SettingKey =
    SettingKey::new("GCM_BITBUCKET_CLIENTSECRET", "bitbucketClientSecret");
const REDIRECT_URI: SettingKey =
    SettingKey::new("GCM_BITBUCKET_REDIRECTURI", "bitbucketRedirectUri");

fn is_cloud(input: &InputArguments) -> bool {
    input
        .host_name()
        .is_some_and(|h| h.eq_ignore_ascii_case(CLOUD_HOST))
}

fn oauth_client_config(settings: &Settings) -> AppResult<OAuth2ClientConfig> {
    Ok(OAuth2ClientConfig {
        endpoints: OAuth2ServerEndpoints::parse(OAUTH_AUTHORIZE_URL, OAUTH_TOKEN_URL, None)?,
        client_id: settings
            .get(CLIENT_ID)
            .unwrap_or_else(|| OAUTH_CLIENT_ID.to_string()),
        client_secret: Some(
            settings
                .get(CLIENT_SECRET)
                .unwrap_or_else(|| OAUTH_CLIENT_SECRET.to_string()),
        ),
        redirect_uri: Some(redirect_uri_setting(settings, REDIRECT_URI, OAUTH_REDIRECT_URI)?),
        use_auth_header: true,
        extra_authorize_params: Vec::new(),
    })
}

#[derive(Debug, Default, Clone, Copy)]
pub struct BitbucketHostProvider;

impl HostProvider for BitbucketHostProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Bitbucket
    }

    fn id(&self) -> &'static str {
        "bitbucket"
    }

    fn name(&self) -> &'static str {
        "Bitbucket"
    }

    fn is_supported(&self, input: &InputArguments) -> bool {
        input.is_http_or_https() && is_cloud(input)
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
            // Cloud OAuth has no device authorization endpoint, so OAuth means the browser.
            if is_cloud(input) {
                Ok(AuthenticationModes::BASIC | AuthenticationModes::BROWSER)
            } else {
                Ok(AuthenticationModes::BASIC)
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
            match mode {
                AuthMode::Basic => get_basic_credential(ctx, &request).await,
                AuthMode::Pat => get_pat_credential(ctx, &request, None).await,
                AuthMode::Browser if is_cloud(input) => {
                    let client = OAuth2Client::new(ctx.http.clone(), oauth_client_config(&ctx.settings)?);
                    let scopes: Vec<String> = OAUTH_SCOPES.iter().map(|s| s.to_string()).collect();
                    let token = run_oauth_flow(ctx, &client, &scopes, mode).await?;
                    oauth_credential(ctx, input, ACCESS_TOKEN_USERNAME, &token).await
                }
                AuthMode::Browser | AuthMode::DeviceCode => Err(format!(
                    "{UNSUPPORTED}: '{}' is not supported for Bitbucket at '{}'",
                    mode.label(),
                    request.resource
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
            if !is_cloud(input) {
                return Ok(None);
            }
            let client = OAuth2Client::new(ctx.http.clone(), oauth_client_config(&ctx.settings)?);
            base::refresh_oauth(ctx, input, &client, ACCESS_TOKEN_USERNAME).await
        })
    }
}
