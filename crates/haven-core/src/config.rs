//! Dispatch configuration

use crate::error::{Error, Result};
use crate::util::is_http_url;
use std::time::Duration;

const DEFAULT_LOCATION_TIMEOUT: Duration = Duration::from_secs(8);

/// Configuration for the dispatcher and sync worker.
#[derive(Debug, Clone)]
pub struct DispatchConfig {
    /// Base URL of the alert API, without a trailing slash
    pub api_base_url: String,
    /// Bearer token for an authenticated user, if logged in
    pub auth_token: Option<String>,
    /// How long to wait for a live location fix before falling back
    pub location_timeout: Duration,
}

impl DispatchConfig {
    /// Create a config for the given API base URL.
    pub fn new(api_base_url: impl Into<String>) -> Result<Self> {
        let mut api_base_url = api_base_url.into().trim().to_string();
        if !is_http_url(&api_base_url) {
            return Err(Error::InvalidInput(format!(
                "API base URL must start with http:// or https://, got '{api_base_url}'"
            )));
        }
        while api_base_url.ends_with('/') {
            api_base_url.pop();
        }

        Ok(Self {
            api_base_url,
            auth_token: None,
            location_timeout: DEFAULT_LOCATION_TIMEOUT,
        })
    }

    #[must_use]
    pub fn with_auth_token(mut self, token: impl Into<String>) -> Self {
        let token = token.into();
        self.auth_token = if token.trim().is_empty() {
            None
        } else {
            Some(token)
        };
        self
    }

    #[must_use]
    pub const fn with_location_timeout(mut self, timeout: Duration) -> Self {
        self.location_timeout = timeout;
        self
    }
}
