//! Usage: Loopback listener that receives the authorization code redirect from the browser.
//!
//! Binds `127.0.0.1` and `::1` on the same port. Requests for other paths (favicon fetches)
//! get a 404 and the listener keeps waiting until the deadline. Connections that never send a
//! request head are dropped after `CONNECTION_READ_TIMEOUT`.

use crate::shared::error::{
    AppResult, MALFORMED_RESPONSE, OAUTH2_ERROR, OAUTH2_STATE_MISMATCH, OAUTH2_TIMEOUT, SYSTEM_ERROR,
    USER_CANCELLED,
};
use crate::shared::security::constant_time_eq;
use reqwest::Url;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

const MAX_REQUEST_BYTES: usize = 8192;
/// How long a connection may sit without sending a full request head.
const CONNECTION_READ_TIMEOUT: Duration = Duration::from_secs(10);
const READY_QUEUE: usize = 8;

const SUCCESS_HTML: &str = "<html><body><h1>Authentication complete</h1><p>You can close this window and return to Git.</p></body></html>";
const ERROR_HTML: &str = "<html><body><h1>Authentication failed</h1><p>You can close this window and retry the Git command.</p></body></html>";
const NOT_FOUND_HTML: &str = "<html><body><h1>Not found</h1></body></html>";

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct CallbackPayload {
    pub(crate) code: Option<String>,
    pub(crate) state: Option<String>,
    pub(crate) error: Option<String>,
    pub(crate) error_description: Option<String>,
    pub(crate) error_uri: Option<String>,
}

#[derive(Debug)]
pub(crate) struct BoundCallbackListener {
    port: u16,
    listener_v4: Option<TcpListener>,
    listener_v6: Option<TcpListener>,
}

impl BoundCallbackListener {
    pub(crate) fn port(&self) -> u16 {
        self.port
    }

    async fn accept(&mut self) -> std::io::Result<TcpStream> {
        let (socket, _) = match (self.listener_v4.as_mut(), self.listener_v6.as_mut()) {
            (Some(v4), Some(v6)) => {
                tokio::select! {
                    result = v4.accept() => result?,
                    result = v6.accept() => result?,
                }
            }
            (Some(v4), None) => v4.accept().await?,
            (None, Some(v6)) => v6.accept().await?,
            (None, None) => {
                return Err(std::io::Error::new(
                    std::io::ErrorKind::NotConnected,
                    "no loopback listener bound",
                ))
            }
        };
        Ok(socket)
    }
}

/// Bind the redirect port. Port 0 picks an ephemeral port.
///
/// A busy explicit port is an error; providers only accept the registered redirect port.
pub(crate) async fn bind_callback_listener(port: u16) -> AppResult<BoundCallbackListener> {
    try_bind_on_port(port).await.map_err(|err| {
        tracing::debug!(port, error = %err, "loopback listener bind failed");
        format!("{SYSTEM_ERROR}: loopback listener bind failed: {err}").into()
    })
}

async fn try_bind_on_port(port: u16) -> Result<BoundCallbackListener, String> {
    if port == 0 {
        return try_bind_dynamic_port().await;
    }

    let mut bind_errors: Vec<String> = Vec::new();
    let listener_v4 = match TcpListener::bind(("127.0.0.1", port)).await {
        Ok(listener) => Some(listener),
        Err(err) => {
            bind_errors.push(format!("127.0.0.1:{port} ({err})"));
            None
        }
    };
    let listener_v6 = match TcpListener::bind(("::1", port)).await {
        Ok(listener) => Some(listener),
        Err(err) => {
            bind_errors.push(format!("[::1]:{port} ({err})"));
            None
        }
    };
    if listener_v4.is_none() && listener_v6.is_none() {
        return Err(bind_errors.join("; "));
    }

    Ok(BoundCallbackListener {
        port,
        listener_v4,
        listener_v6,
    })
}

async fn try_bind_dynamic_port() -> Result<BoundCallbackListener, String> {
    let mut bind_errors: Vec<String> = Vec::new();

    match TcpListener::bind(("127.0.0.1", 0)).await {
        Ok(listener_v4) => {
            let port = listener_v4
                .local_addr()
                .map_err(|e| format!("127.0.0.1:0 (local_addr failed: {e})"))?
                .port();
            // v6 on the same port is best effort; many CI hosts have no ::1.
            let listener_v6 = TcpListener::bind(("::1", port)).await.ok();
            return Ok(BoundCallbackListener {
                port,
                listener_v4: Some(listener_v4),
                listener_v6,
            });
        }
        Err(err) => bind_errors.push(format!("127.0.0.1:0 ({err})")),
    }

    match TcpListener::bind(("::1", 0)).await {
        Ok(listener_v6) => {
            let port = listener_v6
                .local_addr()
                .map_err(|e| format!("[::1]:0 (local_addr failed: {e})"))?
                .port();
            return Ok(BoundCallbackListener {
                port,
                listener_v4: None,
                listener_v6: Some(listener_v6),
            });
        }
        Err(err) => bind_errors.push(format!("[::1]:0 ({err})")),
    }

    Err(bind_errors.join("; "))
}

/// Wait for the redirect on `expected_path`, then verify `state` and hand back the payload.
///
/// A payload carrying `error` is returned as `OAUTH2_ERROR`; callers only ever see a code.
pub(crate) async fn wait_for_callback(
    mut listener: BoundCallbackListener,
    expected_path: &str,
    expected_state: &str,
    timeout: Duration,
    cancel: &CancellationToken,
) -> AppResult<String> {
    let deadline = tokio::time::Instant::now() + timeout;
    // One reader task per connection. Dropping the set on return aborts readers still waiting.
    let (ready_tx, mut ready_rx) = mpsc::channel::<(TcpStream, String)>(READY_QUEUE);
    let mut readers = JoinSet::new();

    loop {
        let (mut socket, request) = tokio::select! {
            _ = cancel.cancelled() => {
                return Err(format!("{USER_CANCELLED}: authorization was cancelled").into());
            }
            _ = tokio::time::sleep_until(deadline) => {
                return Err(format!(
                    "{OAUTH2_TIMEOUT}: no authorization redirect received within {}s",
                    timeout.as_secs()
                )
                .into());
            }
            accepted = listener.accept() => {
                let socket = accepted
                    .map_err(|e| format!("{SYSTEM_ERROR}: loopback accept failed: {e}"))?;
                readers.spawn(read_connection(socket, ready_tx.clone()));
                continue;
            }
            Some(ready) = ready_rx.recv() => ready,
            Some(_) = readers.join_next(), if !readers.is_empty() => continue,
        };

        let Some(target) = extract_request_target(&request) else {
            write_response(&mut socket, "400 Bad Request", ERROR_HTML).await;
            continue;
        };
        let payload = match parse_callback_target(target, expected_path) {
            Ok(Some(payload)) => payload,
            Ok(None) => {
                write_response(&mut socket, "404 Not Found", NOT_FOUND_HTML).await;
                continue;
            }
            Err(err) => {
                write_response(&mut socket, "400 Bad Request", ERROR_HTML).await;
                return Err(err);
            }
        };

        let outcome = validate_payload(payload, expected_state);
        match &outcome {
            Ok(_) => write_response(&mut socket, "200 OK", SUCCESS_HTML).await,
            Err(_) => write_response(&mut socket, "400 Bad Request", ERROR_HTML).await,
        }
        return outcome;
    }
}

async fn read_connection(mut socket: TcpStream, ready: mpsc::Sender<(TcpStream, String)>) {
    match tokio::time::timeout(CONNECTION_READ_TIMEOUT, read_request(&mut socket)).await {
        Ok(Ok(Some(request))) => {
            let _ = ready.send((socket, request)).await;
        }
        Ok(Ok(None)) => {}
        Ok(Err(err)) => tracing::debug!(error = %err, "ignoring unreadable loopback connection"),
        Err(_) => tracing::debug!("dropping idle loopback connection"),
    }
}

/// Read up to the end of the request head. `None` when the peer closed without sending anything.
async fn read_request(socket: &mut TcpStream) -> std::io::Result<Option<String>> {
    let mut buffer = Vec::with_capacity(1024);
    let mut chunk = [0u8; 1024];
    loop {
        let size = socket.read(&mut chunk).await?;
        if size == 0 {
            break;
        }
        buffer.extend_from_slice(&chunk[..size]);
        if has_header_terminator(&buffer) || buffer.len() >= MAX_REQUEST_BYTES {
            break;
        }
    }
    if buffer.is_empty() {
        return Ok(None);
    }
    buffer.truncate(MAX_REQUEST_BYTES);
    Ok(Some(String::from_utf8_lossy(&buffer).into_owned()))
}

fn has_header_terminator(buffer: &[u8]) -> bool {
    buffer.windows(4).any(|window| window == b"\r\n\r\n")
}

async fn write_response(socket: &mut TcpStream, status: &str, body: &str) {
    let response = format!(
        "HTTP/1.1 {status}\r\nContent-Type: text/html; charset=utf-8\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        body.len(),
        body
    );
    let _ = socket.write_all(response.as_bytes()).await;
    let _ = socket.shutdown().await;
}

fn extract_request_target(request: &str) -> Option<&str> {
    let first = request.lines().next()?;
    let mut parts = first.split_whitespace();
    let method = parts.next()?;
    let target = parts.next()?;
    (method == "GET" && target.starts_with('/')).then_some(target)
}

/// `Ok(None)` when the request is for some other path.
pub(crate) fn parse_callback_target(
    target: &str,
    expected_path: &str,
) -> AppResult<Option<CallbackPayload>> {
    let url = Url::parse(&format!("http://127.0.0.1{target}"))
        .map_err(|e| format!("{OAUTH2_ERROR}: invalid redirect target: {e}"))?;

    if normalize_path(url.path()) != normalize_path(expected_path) {
        return Ok(None);
    }

    let mut payload = CallbackPayload {
        code: None,
        state: None,
        error: None,
        error_description: None,
        error_uri: None,
    };
    for (key, value) in url.query_pairs() {
        let slot = match key.as_ref() {
            "code" => &mut payload.code,
            "state" => &mut payload.state,
            "error" => &mut payload.error,
            "error_description" => &mut payload.error_description,
            "error_uri" => &mut payload.error_uri,
            _ => continue,
        };
        *slot = Some(value.into_owned());
    }
    Ok(Some(payload))
}

fn normalize_path(path: &str) -> &str {
    let trimmed = path.trim_end_matches('/');
    if trimmed.is_empty() {
        "/"
    } else {
        trimmed
    }
}

fn validate_payload(payload: CallbackPayload, expected_state: &str) -> AppResult<String> {
    if let Some(error) = payload.error.as_deref() {
        return Err(crate::shared::error::AppError::oauth2(
            error,
            payload.error_description.as_deref(),
            payload.error_uri.as_deref(),
        ));
    }

    let state = payload
        .state
        .as_deref()
        .ok_or_else(|| format!("{MALFORMED_RESPONSE}: redirect is missing the state parameter"))?;
    if !constant_time_eq(state.as_bytes(), expected_state.as_bytes()) {
        return Err(format!("{OAUTH2_STATE_MISMATCH}: redirect state does not match the request").into());
    }

    match payload.code {
        Some(code) if !code.is_empty() => Ok(code),
        _ => Err(format!("{MALFORMED_RESPONSE}: redirect is missing the authorization code").into()),
    }
}
