//! Usage: Device authorization grant polling (RFC 8628 section 3.4/3.5).

use super::client::OAuth2Client;
use super::token::{DeviceCodeResult, OAuth2TokenResult, TokenEndpointResponse};
use crate::shared::error::{AppError, AppResult, OAUTH2_TIMEOUT, USER_CANCELLED};
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

const AUTHORIZATION_PENDING: &str = "authorization_pending";
const SLOW_DOWN: &str = "slow_down";
const DEFAULT_DEVICE_CODE_LIFETIME: Duration = Duration::from_secs(15 * 60);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DevicePollPolicy {
    /// Floor for the polling interval, whatever the server says.
    pub min_interval: Duration,
    /// Used when the server omits `interval`.
    pub default_interval: Duration,
    pub slow_down_increment: Duration,
}

impl Default for DevicePollPolicy {
    fn default() -> Self {
        Self {
            min_interval: Duration::from_secs(1),
            default_interval: Duration::from_secs(5),
            slow_down_increment: Duration::from_secs(5),
        }
    }
}

#[derive(Debug)]
pub(crate) struct DevicePoller {
    interval: Duration,
    policy: DevicePollPolicy,
}

impl DevicePoller {
    pub(crate) fn new(server_interval: Option<Duration>, policy: DevicePollPolicy) -> Self {
        let interval = server_interval
            .unwrap_or(policy.default_interval)
            .max(policy.min_interval);
        Self { interval, policy }
    }

    pub(crate) fn interval(&self) -> Duration {
        self.interval
    }

    /// `Ok(None)` means keep polling.
    pub(crate) fn on_response(
        &mut self,
        response: TokenEndpointResponse,
    ) -> AppResult<Option<OAuth2TokenResult>> {
        match response {
            TokenEndpointResponse::Token(token) => Ok(Some(token)),
            TokenEndpointResponse::Error(err) if err.error == AUTHORIZATION_PENDING => Ok(None),
            TokenEndpointResponse::Error(err) if err.error == SLOW_DOWN => {
                self.interval += self.policy.slow_down_increment;
                tracing::debug!(
                    interval_ms = self.interval.as_millis() as u64,
                    "device flow asked to slow down"
                );
                Ok(None)
            }
            TokenEndpointResponse::Error(err) => Err(AppError::from(err)),
        }
    }

    pub(crate) fn on_transport_timeout(&mut self) {
        self.interval = self.interval.saturating_mul(2);
    }
}

/// Poll the token endpoint until the user approves, the code expires, or `cancel` fires.
pub async fn poll_for_token(
    client: &OAuth2Client,
    device: &DeviceCodeResult,
    policy: DevicePollPolicy,
    cancel: &CancellationToken,
) -> AppResult<OAuth2TokenResult> {
    let lifetime = device.expires_in.unwrap_or(DEFAULT_DEVICE_CODE_LIFETIME);
    let deadline = Instant::now() + lifetime;
    let mut poller = DevicePoller::new(device.interval, policy);

    loop {
        if cancel.is_cancelled() {
            return Err(format!("{USER_CANCELLED}: device authorization was cancelled").into());
        }

        match client.poll_device_token(&device.device_code, cancel).await {
            Ok(response) => {
                if let Some(token) = poller.on_response(response)? {
                    return Ok(token);
                }
            }
            Err(err) if err.is(OAUTH2_TIMEOUT) => {
                poller.on_transport_timeout();
                tracing::debug!(error = %err, "device token poll timed out; backing off");
            }
            Err(err) => return Err(err),
        }

        // The poll at the deadline is the last one.
        if Instant::now() >= deadline {
            return Err(device_code_expired(lifetime));
        }
        let wake = (Instant::now() + poller.interval()).min(deadline);
        tokio::select! {
            _ = cancel.cancelled() => {
                return Err(format!("{USER_CANCELLED}: device authorization was cancelled").into());
            }
            _ = tokio::time::sleep_until(wake) => {}
        }
    }
}

fn device_code_expired(lifetime: Duration) -> AppError {
    format!(
        "{OAUTH2_TIMEOUT}: device code expired after {}s without approval",
        lifetime.as_secs()
    )
    .into()
}
