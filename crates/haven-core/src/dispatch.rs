//! Foreground alert dispatcher
//!
//! One attempt now, durable queue later. The dispatcher never retries
//! in-line: a transient failure lands the payload in the queue and
//! arms the named sync registration for the background worker.

use libsql::Connection;

use crate::api::{AlertEndpoint, SubmitError};
use crate::config::DispatchConfig;
use crate::db::{LibSqlQueueRepository, LibSqlStateRepository, QueueRepository, StateRepository};
use crate::error::Result;
use crate::location::{LocationProvider, LocationResolver};
use crate::models::{
    AlertPayload, ContactPayload, LocationSource, QueueItemId, QueuePayload,
};
use crate::session::{SessionBootstrapper, SessionError};

/// Why a dispatch stopped without delivering or queueing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AbortReason {
    /// No identity could be established; nothing was persisted
    IdentityUnavailable(String),
    /// The server refused the payload; retrying cannot succeed
    Rejected(String),
}

/// Terminal outcome of a foreground dispatch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// Delivered on the first attempt
    Delivered,
    /// Persisted for the background worker, with the stored item's id
    Queued(QueueItemId),
    /// Stopped; the store was not touched
    Aborted(AbortReason),
}

/// Reports whether the device currently believes it is online.
///
/// A cheap, possibly stale signal. It only decides whether the
/// dispatcher bothers with a direct attempt; the truth comes from the
/// attempt itself.
pub trait ConnectivityProbe {
    fn is_online(&self) -> bool;
}

/// Dispatches SOS alerts and contact messages.
pub struct AlertDispatcher<'a, E, P, C> {
    queue: LibSqlQueueRepository<'a>,
    state: LibSqlStateRepository<'a>,
    resolver: LocationResolver<'a, P>,
    sessions: SessionBootstrapper<'a, E>,
    endpoint: &'a E,
    probe: C,
    config: DispatchConfig,
}

impl<'a, E, P, C> AlertDispatcher<'a, E, P, C>
where
    E: AlertEndpoint,
    P: LocationProvider,
    C: ConnectivityProbe,
{
    pub fn new(
        conn: &'a Connection,
        endpoint: &'a E,
        provider: P,
        probe: C,
        config: DispatchConfig,
    ) -> Self {
        Self {
            queue: LibSqlQueueRepository::new(conn),
            state: LibSqlStateRepository::new(conn),
            resolver: LocationResolver::new(conn, provider),
            sessions: SessionBootstrapper::new(conn, endpoint, config.auth_token.clone()),
            endpoint,
            probe,
            config,
        }
    }

    /// Trigger an SOS alert.
    ///
    /// Location resolution and a missing network never abort; the only
    /// hard stop is failing to establish any identity.
    pub async fn trigger_alert(
        &self,
        note: Option<String>,
        metadata: Option<serde_json::Value>,
    ) -> Result<DispatchOutcome> {
        let fix = self.resolver.resolve(self.config.location_timeout).await;
        if fix.is_degraded() {
            tracing::warn!(source = fix.source.as_str(), "Dispatching with degraded location");
        }

        let session = match self.sessions.ensure().await {
            Ok(session) => session,
            Err(SessionError::IdentityUnavailable(reason)) => {
                tracing::error!("Alert aborted, no identity: {reason}");
                return Ok(DispatchOutcome::Aborted(AbortReason::IdentityUnavailable(
                    reason,
                )));
            }
        };

        let online = self.probe.is_online();
        let mut payload = AlertPayload {
            location: fix.coordinates,
            fallback_location: (fix.source == LocationSource::Fallback)
                .then_some(fix.coordinates),
            custom_note: note.and_then(|note| crate::util::normalize_text_option(Some(note))),
            metadata,
            was_offline: !online,
            guest_session_id: session.guest_session_id().map(str::to_string),
        };
        let credential = session.bearer().map(str::to_string);

        if !online {
            tracing::info!("Offline, queueing alert without a network attempt");
            return self
                .enqueue(QueuePayload::Alert(payload), credential)
                .await;
        }

        match self
            .endpoint
            .submit_alert(&payload, credential.as_deref())
            .await
        {
            Ok(()) => {
                tracing::info!("Alert delivered directly");
                Ok(DispatchOutcome::Delivered)
            }
            Err(SubmitError::Rejected(message)) => {
                tracing::error!("Alert rejected by the server: {message}");
                Ok(DispatchOutcome::Aborted(AbortReason::Rejected(message)))
            }
            Err(SubmitError::Transient(message)) => {
                tracing::warn!("Alert attempt failed, queueing: {message}");
                payload.was_offline = true;
                self.enqueue(QueuePayload::Alert(payload), credential).await
            }
        }
    }

    /// Submit an emergency-contact message with the same delivery
    /// discipline as an alert.
    pub async fn submit_contact(&self, payload: ContactPayload) -> Result<DispatchOutcome> {
        let session = match self.sessions.ensure().await {
            Ok(session) => session,
            Err(SessionError::IdentityUnavailable(reason)) => {
                tracing::error!("Contact message aborted, no identity: {reason}");
                return Ok(DispatchOutcome::Aborted(AbortReason::IdentityUnavailable(
                    reason,
                )));
            }
        };
        let credential = session.bearer().map(str::to_string);

        if !self.probe.is_online() {
            tracing::info!("Offline, queueing contact message");
            return self
                .enqueue(QueuePayload::Contact(payload), credential)
                .await;
        }

        match self
            .endpoint
            .submit_contact(&payload, credential.as_deref())
            .await
        {
            Ok(()) => Ok(DispatchOutcome::Delivered),
            Err(SubmitError::Rejected(message)) => {
                tracing::error!("Contact message rejected: {message}");
                Ok(DispatchOutcome::Aborted(AbortReason::Rejected(message)))
            }
            Err(SubmitError::Transient(message)) => {
                tracing::warn!("Contact attempt failed, queueing: {message}");
                self.enqueue(QueuePayload::Contact(payload), credential)
                    .await
            }
        }
    }

    /// Persist the payload and arm its sync registration.
    async fn enqueue(
        &self,
        payload: QueuePayload,
        credential: Option<String>,
    ) -> Result<DispatchOutcome> {
        let tag = payload.kind().sync_tag();
        let item = self.queue.enqueue(payload, credential).await?;
        self.state.arm_sync_tag(tag).await?;
        tracing::info!(id = %item.id, tag, "Queued for background sync");
        Ok(DispatchOutcome::Queued(item.id))
    }
}
