//! Queue item model
//!
//! Items move `pending → syncing → {synced | pending | failed}`.
//! `synced` and `failed` are terminal; `failed` rows stay visible for
//! audit and are excluded from future sync sweeps.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::Coordinates;

/// A unique identifier for a queue item, using UUID v7 (time-sortable)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct QueueItemId(Uuid);

impl QueueItemId {
    /// Create a new unique item ID using UUID v7
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    /// Get the string representation of this ID
    #[must_use]
    pub fn as_str(&self) -> String {
        self.0.to_string()
    }
}

impl Default for QueueItemId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for QueueItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for QueueItemId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// Delivery state of a queue item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueueStatus {
    /// Waiting for the next sync sweep
    Pending,
    /// Claimed by a sweep; acts as the cross-actor processing lock
    Syncing,
    /// Delivered; terminal
    Synced,
    /// Retries exhausted or permanently rejected; terminal
    Failed,
}

impl QueueStatus {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Syncing => "syncing",
            Self::Synced => "synced",
            Self::Failed => "failed",
        }
    }

    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(Self::Pending),
            "syncing" => Some(Self::Syncing),
            "synced" => Some(Self::Synced),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }

    /// Terminal states are never revisited by a sweep.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Synced | Self::Failed)
    }
}

/// The kind of submission an item carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueKind {
    Alert,
    Contact,
}

impl QueueKind {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Alert => "alert",
            Self::Contact => "contact",
        }
    }

    /// Named background-sync registration observed by the worker.
    #[must_use]
    pub const fn sync_tag(self) -> &'static str {
        match self {
            Self::Alert => "sos-sync",
            Self::Contact => "contact-sync",
        }
    }

    /// Notification tag for successful delivery; reused so the
    /// platform coalesces repeats instead of stacking them.
    #[must_use]
    pub const fn success_tag(self) -> &'static str {
        match self {
            Self::Alert => "sos-success",
            Self::Contact => "contact-success",
        }
    }

    /// Notification tag for permanent delivery failure.
    #[must_use]
    pub const fn failure_tag(self) -> &'static str {
        match self {
            Self::Alert => "sos-failed",
            Self::Contact => "contact-failed",
        }
    }
}

/// Body submitted to `POST /alerts`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AlertPayload {
    pub location: Coordinates,
    /// Stale fix that was substituted when no live fix arrived
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fallback_location: Option<Coordinates>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub custom_note: Option<String>,
    /// Device metadata forwarded verbatim
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
    pub was_offline: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub guest_session_id: Option<String>,
}

/// Body submitted to `POST /contact-messages`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContactPayload {
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phone_number: Option<String>,
    pub message: String,
}

/// Sum type over the two queueable submissions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum QueuePayload {
    Alert(AlertPayload),
    Contact(ContactPayload),
}

impl QueuePayload {
    #[must_use]
    pub const fn kind(&self) -> QueueKind {
        match self {
            Self::Alert(_) => QueueKind::Alert,
            Self::Contact(_) => QueueKind::Contact,
        }
    }
}

/// A pending (or settled) submission in the durable queue.
#[derive(Clone, PartialEq)]
pub struct QueueItem {
    /// Unique identifier, assigned at enqueue time, never reused
    pub id: QueueItemId,
    /// The exact body to submit
    pub payload: QueuePayload,
    /// Bearer token captured at enqueue time; replayed as-is
    pub credential: Option<String>,
    pub status: QueueStatus,
    /// Enqueue timestamp (Unix ms), for display/ordering only
    pub enqueued_at: i64,
    pub retry_count: u32,
}

impl QueueItem {
    /// Create a new pending item with a fresh id.
    #[must_use]
    pub fn new(payload: QueuePayload, credential: Option<String>) -> Self {
        Self {
            id: QueueItemId::new(),
            payload,
            credential,
            status: QueueStatus::Pending,
            enqueued_at: crate::util::unix_timestamp_ms_now(),
            retry_count: 0,
        }
    }

    #[must_use]
    pub const fn kind(&self) -> QueueKind {
        self.payload.kind()
    }
}

impl fmt::Debug for QueueItem {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("QueueItem")
            .field("id", &self.id)
            .field("payload", &self.payload)
            .field(
                "credential",
                &self.credential.as_ref().map(|_| "[REDACTED]"),
            )
            .field("status", &self.status)
            .field("enqueued_at", &self.enqueued_at)
            .field("retry_count", &self.retry_count)
            .finish()
    }
}
