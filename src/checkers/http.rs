use reqwest::header::LOCATION;
use reqwest::{Client, Url, redirect};
use std::time::Duration;
use tracing::debug;

use super::{ProbeFailure, ProbeOutcome};
use crate::error::EngineError;
use crate::models::{StatusCodeMatcher, status_code_accepted};

pub const MAX_REDIRECTS: usize = 10;

/// Redirects are followed by hand and certificate validation is relaxed so
/// self-signed endpoints can be monitored.
pub fn build_client() -> Result<Client, EngineError> {
    Client::builder()
        .redirect(redirect::Policy::none())
        .danger_accept_invalid_certs(true)
        .user_agent(concat!("uptime-monitor/", env!("CARGO_PKG_VERSION")))
        .build()
        .map_err(|e| EngineError::Config(format!("failed to build HTTP client: {e}")))
}

fn request_error_message(e: &reqwest::Error, timeout: Duration) -> String {
    if e.is_timeout() {
        format!("Request timed out after {}s", timeout.as_secs())
    } else {
        format!("Error: {e}")
    }
}

/// Issues a GET, following up to `MAX_REDIRECTS` redirects, and validates the final status.
pub async fn check(
    client: &Client,
    target: &str,
    timeout: Duration,
    expected: &[StatusCodeMatcher],
) -> ProbeOutcome {
    let mut url = Url::parse(target)
        .map_err(|e| ProbeFailure::new(None, format!("Invalid URL '{target}': {e}")))?;
    let mut hops = 0usize;

    loop {
        let response = client
            .get(url.clone())
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| ProbeFailure::new(None, request_error_message(&e, timeout)))?;
        let status = response.status();

        if status.is_redirection() {
            let location = response
                .headers()
                .get(LOCATION)
                .and_then(|value| value.to_str().ok());
            if let Some(location) = location {
                if hops >= MAX_REDIRECTS {
                    return Err(ProbeFailure::new(
                        Some(status.as_u16()),
                        format!("Too many redirects (more than {MAX_REDIRECTS})"),
                    ));
                }
                let next = url.join(location).map_err(|e| {
                    ProbeFailure::new(
                        Some(status.as_u16()),
                        format!("Invalid redirect location '{location}': {e}"),
                    )
                })?;
                debug!(from = %url, to = %next, hop = hops + 1, "Following redirect.");
                url = next;
                hops += 1;
                continue;
            }
        }

        let code = status.as_u16();
        return if status_code_accepted(expected, code) {
            Ok(Some(code))
        } else {
            Err(ProbeFailure::new(
                Some(code),
                format!("Unexpected status code: {code}"),
            ))
        };
    }
}
