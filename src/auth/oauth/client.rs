//! Usage: OAuth2 client (authorization code + PKCE, refresh, device authorization request).

use super::callback_server::{bind_callback_listener, wait_for_callback};
use super::pkce::{generate_pkce_pair, CODE_CHALLENGE_METHOD};
use super::token::{
    parse_device_code_response, parse_token_endpoint_response, DeviceCodeResult,
    OAuth2TokenResult, TokenEndpointResponse,
};
use crate::auth::browser::BrowserLauncher;
use crate::shared::error::{AppError, AppResult, INVALID_CONFIG, OAUTH2_TIMEOUT, SYSTEM_ERROR, USER_CANCELLED};
use crate::shared::security::random_hex;
use reqwest::Url;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

const STATE_BYTES: usize = 32;

const RESERVED_AUTHORIZE_PARAMS: &[&str] = &[
    "response_type",
    "client_id",
    "state",
    "code_challenge",
    "code_challenge_method",
    "redirect_uri",
    "scope",
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OAuth2ServerEndpoints {
    pub authorization: Url,
    pub token: Url,
    pub device_authorization: Option<Url>,
}

impl OAuth2ServerEndpoints {
    pub fn parse(authorization: &str, token: &str, device: Option<&str>) -> AppResult<Self> {
        Ok(Self {
            authorization: parse_endpoint("authorization", authorization)?,
            token: parse_endpoint("token", token)?,
            device_authorization: device
                .map(|raw| parse_endpoint("device authorization", raw))
                .transpose()?,
        })
    }

    /// Resolve relative endpoint paths against a server base such as `https://gitlab.example.com`.
    pub fn on_base(
        base: &Url,
        authorization: &str,
        token: &str,
        device: Option<&str>,
    ) -> AppResult<Self> {
        let join = |what: &str, path: &str| {
            base.join(path)
                .map_err(|e| format!("{INVALID_CONFIG}: invalid {what} endpoint '{path}': {e}"))
        };
        Ok(Self {
            authorization: join("authorization", authorization)?,
            token: join("token", token)?,
            device_authorization: device.map(|p| join("device authorization", p)).transpose()?,
        })
    }
}

fn parse_endpoint(what: &str, raw: &str) -> AppResult<Url> {
    Url::parse(raw.trim())
        .map_err(|e| format!("{INVALID_CONFIG}: invalid {what} endpoint '{raw}': {e}").into())
}

#[derive(Clone, PartialEq, Eq)]
pub struct OAuth2ClientConfig {
    pub endpoints: OAuth2ServerEndpoints,
    pub client_id: String,
    pub client_secret: Option<String>,
    pub redirect_uri: Option<Url>,
    /// Send `client_id:client_secret` as HTTP Basic on token requests too.
    pub use_auth_header: bool,
    pub extra_authorize_params: Vec<(String, String)>,
}

impl std::fmt::Debug for OAuth2ClientConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OAuth2ClientConfig")
            .field("endpoints", &self.endpoints)
            .field("client_id", &self.client_id)
            .field("has_client_secret", &self.client_secret.is_some())
            .field("redirect_uri", &self.redirect_uri.as_ref().map(Url::as_str))
            .field("use_auth_header", &self.use_auth_header)
            .finish()
    }
}

#[derive(Debug, Clone)]
pub(crate) struct AuthorizationCodeResult {
    pub(crate) code: String,
    pub(crate) redirect_uri: Url,
    pub(crate) code_verifier: String,
}

#[derive(Debug, Clone)]
pub struct OAuth2Client {
    http: reqwest::Client,
    config: OAuth2ClientConfig,
}

impl OAuth2Client {
    pub fn new(http: reqwest::Client, config: OAuth2ClientConfig) -> Self {
        Self { http, config }
    }

    pub fn config(&self) -> &OAuth2ClientConfig {
        &self.config
    }

    pub(crate) fn authorize_url(
        &self,
        scopes: &[String],
        redirect_uri: &Url,
        state: &str,
        code_challenge: &str,
    ) -> AppResult<Url> {
        if let Some((key, _)) = self
            .config
            .extra_authorize_params
            .iter()
            .find(|(key, _)| RESERVED_AUTHORIZE_PARAMS.contains(&key.as_str()))
        {
            return Err(format!(
                "{INVALID_CONFIG}: extra authorize parameter '{key}' would override a standard OAuth parameter"
            )
            .into());
        }

        let mut url = self.config.endpoints.authorization.clone();
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("response_type", "code");
            query.append_pair("client_id", &self.config.client_id);
            query.append_pair("state", state);
            query.append_pair("code_challenge_method", CODE_CHALLENGE_METHOD);
            query.append_pair("code_challenge", code_challenge);
            query.append_pair("redirect_uri", redirect_uri.as_str());
            let scope = scopes.join(" ");
            if !scope.trim().is_empty() {
                query.append_pair("scope", &scope);
            }
            for (key, value) in &self.config.extra_authorize_params {
                query.append_pair(key, value);
            }
        }
        Ok(url)
    }

    /// Run the browser half of the flow: listen on loopback, open the browser, wait for the code.
    pub(crate) async fn get_authorization_code(
        &self,
        scopes: &[String],
        browser: &dyn BrowserLauncher,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> AppResult<AuthorizationCodeResult> {
        let configured = self.config.redirect_uri.as_ref().ok_or_else(|| {
            format!("{INVALID_CONFIG}: a redirect URI is required for the browser flow")
        })?;
        ensure_loopback_redirect(configured)?;

        let listener = bind_callback_listener(configured.port().unwrap_or(0)).await?;
        let mut redirect_uri = configured.clone();
        redirect_uri
            .set_port(Some(listener.port()))
            .map_err(|_| format!("{INVALID_CONFIG}: redirect URI cannot carry a port"))?;

        let state = random_hex(STATE_BYTES);
        let pkce = generate_pkce_pair();
        let authorize_url =
            self.authorize_url(scopes, &redirect_uri, &state, &pkce.code_challenge)?;

        let expected_path = redirect_uri.path().to_string();
        let listener_cancel = cancel.child_token();
        let waiter_cancel = listener_cancel.clone();
        let expected_state = state.clone();
        let waiter = tokio::spawn(async move {
            wait_for_callback(
                listener,
                &expected_path,
                &expected_state,
                timeout,
                &waiter_cancel,
            )
            .await
        });
        // Let the listener task reach accept() before the browser can hit it.
        tokio::task::yield_now().await;

        tracing::debug!(
            redirect_uri = %redirect_uri,
            "opening browser for OAuth authorization"
        );
        if let Err(err) = browser.open(authorize_url.as_str()) {
            listener_cancel.cancel();
            waiter.abort();
            return Err(err);
        }

        let code = match waiter.await {
            Ok(result) => result?,
            Err(join_err) if join_err.is_cancelled() => {
                return Err(format!("{USER_CANCELLED}: authorization was cancelled").into())
            }
            Err(join_err) => {
                return Err(format!("{SYSTEM_ERROR}: loopback listener task failed: {join_err}").into())
            }
        };

        Ok(AuthorizationCodeResult {
            code,
            redirect_uri,
            code_verifier: pkce.code_verifier,
        })
    }

    pub(crate) async fn exchange_code(
        &self,
        auth: &AuthorizationCodeResult,
        cancel: &CancellationToken,
    ) -> AppResult<OAuth2TokenResult> {
        let mut form = self.client_form();
        form.push(("grant_type", "authorization_code".to_string()));
        form.push(("code", auth.code.clone()));
        form.push(("code_verifier", auth.code_verifier.clone()));
        form.push(("redirect_uri", auth.redirect_uri.to_string()));

        let (status, body) = self
            .post_form(&self.config.endpoints.token, &form, self.config.use_auth_header, cancel)
            .await?;
        parse_token_endpoint_response(status, &body)?.into_result()
    }

    pub async fn refresh(
        &self,
        refresh_token: &str,
        cancel: &CancellationToken,
    ) -> AppResult<OAuth2TokenResult> {
        let mut form = self.client_form();
        form.push(("grant_type", "refresh_token".to_string()));
        form.push(("refresh_token", refresh_token.trim().to_string()));
        if let Some(redirect) = self.config.redirect_uri.as_ref() {
            form.push(("redirect_uri", redirect.to_string()));
        }

        let (status, body) = self
            .post_form(&self.config.endpoints.token, &form, self.config.use_auth_header, cancel)
            .await?;
        parse_token_endpoint_response(status, &body)?.into_result()
    }

    pub async fn get_device_code(
        &self,
        scopes: &[String],
        cancel: &CancellationToken,
    ) -> AppResult<DeviceCodeResult> {
        let endpoint = self
            .config
            .endpoints
            .device_authorization
            .as_ref()
            .ok_or_else(|| {
                format!("{INVALID_CONFIG}: no device authorization endpoint is configured")
            })?;

        let mut form = vec![("client_id", self.config.client_id.clone())];
        let scope = scopes.join(" ");
        if !scope.trim().is_empty() {
            form.push(("scope", scope));
        }

        let (status, body) = self.post_form(endpoint, &form, false, cancel).await?;
        parse_device_code_response(status, &body)
    }

    /// One device-code poll; `authorization_pending` and friends come back as data.
    pub(crate) async fn poll_device_token(
        &self,
        device_code: &str,
        cancel: &CancellationToken,
    ) -> AppResult<TokenEndpointResponse> {
        let form = vec![
            (
                "grant_type",
                "urn:ietf:params:oauth:grant-type:device_code".to_string(),
            ),
            ("device_code", device_code.to_string()),
            ("client_id", self.config.client_id.clone()),
        ];
        let (status, body) = self
            .post_form(&self.config.endpoints.token, &form, false, cancel)
            .await?;
        parse_token_endpoint_response(status, &body)
    }

    fn client_form(&self) -> Vec<(&'static str, String)> {
        let mut form = vec![("client_id", self.config.client_id.clone())];
        if let Some(secret) = self.client_secret() {
            form.push(("client_secret", secret.to_string()));
        }
        form
    }

    fn client_secret(&self) -> Option<&str> {
        self.config
            .client_secret
            .as_deref()
            .map(str::trim)
            .filter(|v| !v.is_empty())
    }

    async fn post_form(
        &self,
        url: &Url,
        form: &[(&'static str, String)],
        add_auth_header: bool,
        cancel: &CancellationToken,
    ) -> AppResult<(u16, String)> {
        let mut request = self
            .http
            .post(url.clone())
            .header(reqwest::header::ACCEPT, "application/json")
            .form(form);
        if add_auth_header {
            if let Some(secret) = self.client_secret() {
                request = request.basic_auth(&self.config.client_id, Some(secret));
            }
        }

        let send = async {
            let response = request.send().await.map_err(transport_error)?;
            let status = response.status().as_u16();
            let body = response.text().await.map_err(transport_error)?;
            Ok::<_, AppError>((status, body))
        };

        tokio::select! {
            _ = cancel.cancelled() => Err(AppError::from(format!(
                "{USER_CANCELLED}: request to {} was cancelled",
                url.path()
            ))),
            result = send => result,
        }
    }
}

pub(crate) fn transport_error(err: reqwest::Error) -> AppError {
    if err.is_timeout() {
        return format!("{OAUTH2_TIMEOUT}: OAuth endpoint request timed out: {err}").into();
    }
    format!("{SYSTEM_ERROR}: OAuth endpoint request failed: {err}").into()
}

fn ensure_loopback_redirect(redirect: &Url) -> AppResult<()> {
    let loopback = matches!(
        redirect.host_str(),
        Some("127.0.0.1") | Some("localhost") | Some("[::1]")
    );
    if redirect.scheme() != "http" || !loopback {
        return Err(format!(
            "{INVALID_CONFIG}: redirect URI '{redirect}' must be an http loopback address"
        )
        .into());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> OAuth2ClientConfig {
        OAuth2ClientConfig {
            endpoints: OAuth2ServerEndpoints::parse(
                "https://auth.example.com/authorize",
                "https://auth.example.com/token",
                None,
            )
            .expect("endpoints"),
            client_id: "client-1".into(),
            client_secret: Some("s3cret".into()),
            redirect_uri: Some(Url::parse("http://127.0.0.1/").expect("url")),
            use_auth_header: true,
            extra_authorize_params: Vec::new(),
        }
    }

    #[test]
    fn authorize_url_contains_standard_parameters() {
        let client = OAuth2Client::new(reqwest::Client::new(), config());
        let redirect = Url::parse("http://127.0.0.1:4321/").expect("url");
        let url = client
            .authorize_url(
                &["repo".to_string(), "gist".to_string()],
                &redirect,
                "st",
                "ch",
            )
            .expect("url");
        let pairs: std::collections::HashMap<String, String> = url
            .query_pairs()
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();
        assert_eq!(pairs["response_type"], "code");
        assert_eq!(pairs["client_id"], "client-1");
        assert_eq!(pairs["state"], "st");
        assert_eq!(pairs["code_challenge"], "ch");
        assert_eq!(pairs["code_challenge_method"], "S256");
        assert_eq!(pairs["redirect_uri"], "http://127.0.0.1:4321/");
        assert_eq!(pairs["scope"], "repo gist");
    }

    #[test]
    fn extra_params_cannot_override_standard_ones() {
        let mut cfg = config();
        cfg.extra_authorize_params = vec![("state".into(), "evil".into())];
        let client = OAuth2Client::new(reqwest::Client::new(), cfg);
        let redirect = Url::parse("http://127.0.0.1:4321/").expect("url");
        let err = client
            .authorize_url(&[], &redirect, "st", "ch")
            .expect_err("should fail");
        assert!(err.is(INVALID_CONFIG));
    }

    #[test]
    fn empty_scope_is_omitted() {
        let client = OAuth2Client::new(reqwest::Client::new(), config());
        let redirect = Url::parse("http://127.0.0.1:4321/").expect("url");
        let url = client
            .authorize_url(&[], &redirect, "st", "ch")
            .expect("url");
        assert!(!url.query_pairs().any(|(k, _)| k == "scope"));
    }

    #[test]
    fn non_loopback_redirect_is_rejected() {
        let err = ensure_loopback_redirect(&Url::parse("https://example.com/cb").expect("url"))
            .expect_err("should fail");
        assert!(err.is(INVALID_CONFIG));
        assert!(ensure_loopback_redirect(&Url::parse("http://localhost:34106/").expect("url")).is_ok());
    }

    #[test]
    fn endpoints_resolve_against_base() {
        let base = Url::parse("https://gitlab.example.com").expect("url");
        let endpoints =
            OAuth2ServerEndpoints::on_base(&base, "/oauth/authorize", "/oauth/token", None)
                .expect("endpoints");
        assert_eq!(
            endpoints.authorization.as_str(),
            "https://gitlab.example.com/oauth/authorize"
        );
        assert_eq!(endpoints.token.as_str(), "https://gitlab.example.com/oauth/token");
        assert!(endpoints.device_authorization.is_none());
    }

    #[test]
    fn debug_output_hides_client_secret() {
        let rendered = format!("{:?}", config());
        assert!(!rendered.contains("s3cret"));
    }
}
