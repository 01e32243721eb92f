//! Upstream feed clients and payload parsers.
//!
//! Each upstream source gets its own file; parsers are pure functions over
//! response bodies, and the HTTP side sits behind a small async trait so
//! the resolver can be driven by an in-process stub in tests.

pub mod baseline;
pub mod forecast;
pub mod pollen;

#[cfg(test)]
pub(crate) mod fixtures;

use std::time::Duration;

use crate::model::FetchError;

/// Builds the shared async HTTP client. Every request made through it
/// carries `timeout`; hitting it surfaces as `FetchError::Timeout`.
pub fn build_http_client(user_agent: &str, timeout: Duration) -> Result<reqwest::Client, FetchError> {
    reqwest::Client::builder()
        .user_agent(user_agent)
        .timeout(timeout)
        .build()
        .map_err(|e| FetchError::Transport(format!("failed to build HTTP client: {}", e)))
}
