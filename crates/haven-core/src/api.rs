//! Alert API client
//!
//! Thin reqwest wrapper around the three endpoints the dispatcher and
//! sync worker talk to. Every failure is classified as either a
//! permanent rejection (the server understood and refused) or a
//! transient fault (worth queueing and retrying later).

use reqwest::StatusCode;
use serde::Deserialize;
use thiserror::Error;

use crate::models::{AlertPayload, ContactPayload};

/// Why a submission did not land.
#[derive(Debug, Error)]
pub enum SubmitError {
    /// The server received the request and refused it. Retrying the
    /// same payload will not help.
    #[error("Submission rejected: {0}")]
    Rejected(String),
    /// Network fault or server-side error. The payload is still good
    /// and should be retried later.
    #[error("Submission failed transiently: {0}")]
    Transient(String),
}

pub type SubmitResult<T> = Result<T, SubmitError>;

/// Trait for the remote alert endpoints (async)
#[allow(async_fn_in_trait)]
pub trait AlertEndpoint {
    /// Submit an SOS alert, optionally with a bearer credential
    async fn submit_alert(
        &self,
        payload: &AlertPayload,
        credential: Option<&str>,
    ) -> SubmitResult<()>;

    /// Submit an emergency-contact message
    async fn submit_contact(
        &self,
        payload: &ContactPayload,
        credential: Option<&str>,
    ) -> SubmitResult<()>;

    /// Mint a new guest session, returning its id
    async fn create_guest_session(&self) -> SubmitResult<String>;
}

/// reqwest implementation of `AlertEndpoint`
#[derive(Clone)]
pub struct HttpAlertEndpoint {
    base_url: String,
    client: reqwest::Client,
}

impl HttpAlertEndpoint {
    pub fn new(base_url: impl Into<String>) -> SubmitResult<Self> {
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client: reqwest::Client::builder()
                .build()
                .map_err(|e| SubmitError::Transient(e.to_string()))?,
        })
    }

    async fn post_json<T: serde::Serialize>(
        &self,
        path: &str,
        body: &T,
        credential: Option<&str>,
    ) -> SubmitResult<reqwest::Response> {
        let mut request = self
            .client
            .post(format!("{}{path}", self.base_url))
            .header("Accept", "application/json")
            .json(body);

        if let Some(token) = credential {
            request = request.bearer_auth(token);
        }

        let response = request
            .send()
            .await
            .map_err(|e| SubmitError::Transient(e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            Ok(response)
        } else {
            let body = response.text().await.unwrap_or_default();
            let message = parse_api_error(status, &body);
            if status.is_client_error() {
                Err(SubmitError::Rejected(message))
            } else {
                Err(SubmitError::Transient(message))
            }
        }
    }
}

impl AlertEndpoint for HttpAlertEndpoint {
    async fn submit_alert(
        &self,
        payload: &AlertPayload,
        credential: Option<&str>,
    ) -> SubmitResult<()> {
        self.post_json("/alerts", payload, credential).await?;
        Ok(())
    }

    async fn submit_contact(
        &self,
        payload: &ContactPayload,
        credential: Option<&str>,
    ) -> SubmitResult<()> {
        self.post_json("/contact-messages", payload, credential)
            .await?;
        Ok(())
    }

    async fn create_guest_session(&self) -> SubmitResult<String> {
        let response = self
            .post_json("/guest-sessions", &serde_json::json!({}), None)
            .await?;

        let payload = response
            .json::<GuestSessionResponse>()
            .await
            .map_err(|e| SubmitError::Transient(e.to_string()))?;
        payload.try_into()
    }
}

#[derive(Debug, Deserialize)]
struct GuestSessionResponse {
    #[serde(rename = "sessionId")]
    session_id: Option<String>,
    id: Option<String>,
}

impl TryFrom<GuestSessionResponse> for String {
    type Error = SubmitError;

    fn try_from(value: GuestSessionResponse) -> SubmitResult<Self> {
        value
            .session_id
            .or(value.id)
            .map(|id| id.trim().to_string())
            .filter(|id| !id.is_empty())
            .ok_or_else(|| {
                SubmitError::Transient("guest session response did not include an id".to_string())
            })
    }
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    error: Option<String>,
    message: Option<String>,
}

fn parse_api_error(status: StatusCode, body: &str) -> String {
    if let Ok(payload) = serde_json::from_str::<ApiErrorBody>(body) {
        if let Some(message) = payload.message.or(payload.error) {
            return format!("{} ({})", message.trim(), status.as_u16());
        }
    }

    let trimmed = crate::util::compact_text(body);
    if trimmed.is_empty() {
        format!("HTTP {}", status.as_u16())
    } else {
        format!("{} ({})", trimmed, status.as_u16())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_api_error_prefers_message_field() {
        let status = StatusCode::UNPROCESSABLE_ENTITY;
        let body = r#"{"message":"latitude out of range"}"#;
        assert_eq!(
            parse_api_error(status, body),
            "latitude out of range (422)"
        );
    }

    #[test]
    fn parse_api_error_falls_back_to_error_field() {
        let status = StatusCode::BAD_REQUEST;
        let body = r#"{"error":"missing location"}"#;
        assert_eq!(parse_api_error(status, body), "missing location (400)");
    }

    #[test]
    fn parse_api_error_handles_empty_and_plain_bodies() {
        assert_eq!(
            parse_api_error(StatusCode::INTERNAL_SERVER_ERROR, ""),
            "HTTP 500"
        );
        assert_eq!(
            parse_api_error(StatusCode::BAD_GATEWAY, "upstream down"),
            "upstream down (502)"
        );
    }

    #[test]
    fn guest_session_response_accepts_either_id_field() {
        let from_session_id: String = serde_json::from_str::<GuestSessionResponse>(
            r#"{"sessionId":"guest-1"}"#,
        )
        .unwrap()
        .try_into()
        .unwrap();
        assert_eq!(from_session_id, "guest-1");

        let from_id: String = serde_json::from_str::<GuestSessionResponse>(r#"{"id":" guest-2 "}"#)
            .unwrap()
            .try_into()
            .unwrap();
        assert_eq!(from_id, "guest-2");

        let missing: SubmitResult<String> =
            serde_json::from_str::<GuestSessionResponse>("{}").unwrap().try_into();
        assert!(missing.is_err());
    }
}
