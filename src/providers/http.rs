//! HTTP plumbing shared by the provider adapters.

use reqwest::{RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::debug;

use super::{FailureKind, ProviderFailure};
use crate::telemetry::loggable;
use crate::types::ProviderId;

pub const TIMEOUT_MESSAGE: &str = "Request timed out. The generation took too long.";

/// Sends `request`, mapping transport errors and non-2xx statuses to failures.
pub async fn send(provider: ProviderId, request: RequestBuilder) -> Result<Response, ProviderFailure> {
    let response = request.send().await.map_err(|err| transport_failure(provider, &err))?;
    assert_ok_response(provider, response).await
}

pub async fn post_json(
    provider: ProviderId,
    request: RequestBuilder,
    payload: &Value,
) -> Result<Response, ProviderFailure> {
    debug!(provider = %provider, payload = %loggable(payload), "provider request");
    send(provider, request.json(payload)).await
}

async fn assert_ok_response(provider: ProviderId, response: Response) -> Result<Response, ProviderFailure> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let text = response.text().await.unwrap_or_default();
    let kind = match status {
        StatusCode::FORBIDDEN => FailureKind::PermissionDenied,
        StatusCode::REQUEST_TIMEOUT | StatusCode::GATEWAY_TIMEOUT => {
            debug!(provider = %provider, status = status.as_u16(), body = %text.trim(), "provider timed out");
            return Err(ProviderFailure::new(FailureKind::Timeout, TIMEOUT_MESSAGE));
        }
        _ => FailureKind::Rejected,
    };
    Err(ProviderFailure::new(
        kind,
        format!("{} API error {}: {}", provider.display_name(), status.as_u16(), text.trim()),
    ))
}

pub async fn parse_json<T: DeserializeOwned>(provider: ProviderId, response: Response) -> Result<T, ProviderFailure> {
    let text = response.text().await.map_err(|err| transport_failure(provider, &err))?;
    serde_json::from_str(&text).map_err(|err| {
        ProviderFailure::new(
            FailureKind::InvalidResponse,
            format!("{} returned an unreadable response: {err}", provider.display_name()),
        )
    })
}

pub fn transport_failure(provider: ProviderId, err: &reqwest::Error) -> ProviderFailure {
    if err.is_timeout() {
        ProviderFailure::new(FailureKind::Timeout, TIMEOUT_MESSAGE)
    } else {
        ProviderFailure::new(
            FailureKind::Network,
            format!("{} request failed: {err}", provider.display_name()),
        )
    }
}

/// Fetches a poll target, returning `None` for anything transient.
pub async fn poll_json<T: DeserializeOwned>(provider: ProviderId, request: RequestBuilder) -> Option<T> {
    let response = match request.send().await {
        Ok(response) => response,
        Err(err) => {
            debug!(provider = %provider, error = %err, "poll request failed, retrying");
            return None;
        }
    };
    let status = response.status();
    if !status.is_success() {
        debug!(provider = %provider, status = status.as_u16(), "poll returned non-success, retrying");
        return None;
    }
    match response.json::<T>().await {
        Ok(payload) => Some(payload),
        Err(err) => {
            debug!(provider = %provider, error = %err, "poll body unreadable, retrying");
            None
        }
    }
}
