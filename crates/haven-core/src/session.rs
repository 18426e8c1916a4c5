//! Session bootstrap
//!
//! Every dispatch needs an identity: the logged-in user's bearer token
//! when present, otherwise a device-local guest session. Guest minting
//! is single-flight so concurrent dispatches never create two guest
//! identities for the same device.

use libsql::Connection;
use thiserror::Error;
use tokio::sync::Mutex;

use crate::api::AlertEndpoint;
use crate::db::{LibSqlStateRepository, StateRepository};
use crate::models::SessionContext;

#[derive(Debug, Error)]
pub enum SessionError {
    /// No authenticated token and a guest session could not be minted.
    /// The only failure that aborts a dispatch before queueing.
    #[error("Identity unavailable: {0}")]
    IdentityUnavailable(String),
}

pub type SessionResult<T> = Result<T, SessionError>;

/// Establishes the identity a dispatch runs under.
pub struct SessionBootstrapper<'a, E> {
    state: LibSqlStateRepository<'a>,
    endpoint: &'a E,
    auth_token: Option<String>,
    mint_guard: Mutex<()>,
}

impl<'a, E: AlertEndpoint> SessionBootstrapper<'a, E> {
    pub fn new(conn: &'a Connection, endpoint: &'a E, auth_token: Option<String>) -> Self {
        Self {
            state: LibSqlStateRepository::new(conn),
            endpoint,
            auth_token: auth_token.filter(|token| !token.trim().is_empty()),
            mint_guard: Mutex::new(()),
        }
    }

    /// Resolve a session context, minting a guest session if needed.
    pub async fn ensure(&self) -> SessionResult<SessionContext> {
        if let Some(token) = &self.auth_token {
            return Ok(SessionContext::authenticated(token.clone()));
        }

        if let Some(guest_id) = self.stored_guest_id().await {
            return Ok(SessionContext::guest(guest_id));
        }

        // Serialize mints; a losing caller reuses the winner's session.
        let _guard = self.mint_guard.lock().await;
        if let Some(guest_id) = self.stored_guest_id().await {
            return Ok(SessionContext::guest(guest_id));
        }

        let guest_id = self
            .endpoint
            .create_guest_session()
            .await
            .map_err(|e| SessionError::IdentityUnavailable(e.to_string()))?;

        if let Err(e) = self.state.save_guest_session_id(&guest_id).await {
            tracing::warn!("Failed to persist guest session id: {e}");
        }

        tracing::info!("Minted new guest session");
        Ok(SessionContext::guest(guest_id))
    }

    async fn stored_guest_id(&self) -> Option<String> {
        match self.state.guest_session_id().await {
            Ok(id) => id,
            Err(e) => {
                tracing::warn!("Failed to read stored guest session id: {e}");
                None
            }
        }
    }
}
