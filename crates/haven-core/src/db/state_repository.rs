//! Device-state repository implementation
//!
//! Small key/value store for the bits that must survive a restart:
//! the last known-good location fix, the guest session id, and the
//! armed background-sync tags (the durable wake signal).

use crate::error::Result;
use crate::models::Coordinates;
use libsql::Connection;

const KEY_LAST_KNOWN_FIX: &str = "last_known_fix";
const KEY_GUEST_SESSION_ID: &str = "guest_session_id";
const SYNC_TAG_PREFIX: &str = "sync_tag:";

/// Trait for device-state storage operations (async)
#[allow(async_fn_in_trait)]
pub trait StateRepository {
    /// Last persisted live fix, if any
    async fn last_known_fix(&self) -> Result<Option<Coordinates>>;

    /// Overwrite the persisted fallback with a fresh live fix
    async fn save_last_known_fix(&self, coordinates: &Coordinates) -> Result<()>;

    /// Stored guest session id, if one was minted before
    async fn guest_session_id(&self) -> Result<Option<String>>;

    /// Persist a freshly minted guest session id
    async fn save_guest_session_id(&self, session_id: &str) -> Result<()>;

    /// Arm a named background-sync registration (idempotent)
    async fn arm_sync_tag(&self, tag: &str) -> Result<()>;

    /// All currently armed sync tags
    async fn armed_sync_tags(&self) -> Result<Vec<String>>;

    /// Consume an armed tag once its queue kind has drained
    async fn clear_sync_tag(&self, tag: &str) -> Result<()>;
}

/// libSQL implementation of `StateRepository`
pub struct LibSqlStateRepository<'a> {
    conn: &'a Connection,
}

impl<'a> LibSqlStateRepository<'a> {
    /// Create a new repository with the given connection
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    async fn get_value(&self, key: &str) -> Result<Option<String>> {
        let mut rows = self
            .conn
            .query("SELECT value FROM device_state WHERE key = ?", [key])
            .await?;

        if let Some(row) = rows.next().await? {
            let value: String = row.get(0)?;
            Ok(Some(value))
        } else {
            Ok(None)
        }
    }

    async fn set_value(&self, key: &str, value: &str) -> Result<()> {
        self.conn
            .execute(
                "INSERT OR REPLACE INTO device_state (key, value) VALUES (?, ?)",
                [key, value],
            )
            .await?;
        Ok(())
    }

    async fn delete_value(&self, key: &str) -> Result<()> {
        self.conn
            .execute("DELETE FROM device_state WHERE key = ?", [key])
            .await?;
        Ok(())
    }
}

impl StateRepository for LibSqlStateRepository<'_> {
    async fn last_known_fix(&self) -> Result<Option<Coordinates>> {
        let Some(raw) = self.get_value(KEY_LAST_KNOWN_FIX).await? else {
            return Ok(None);
        };
        Ok(serde_json::from_str(&raw)?)
    }

    async fn save_last_known_fix(&self, coordinates: &Coordinates) -> Result<()> {
        let raw = serde_json::to_string(coordinates)?;
        self.set_value(KEY_LAST_KNOWN_FIX, &raw).await
    }

    async fn guest_session_id(&self) -> Result<Option<String>> {
        self.get_value(KEY_GUEST_SESSION_ID).await
    }

    async fn save_guest_session_id(&self, session_id: &str) -> Result<()> {
        self.set_value(KEY_GUEST_SESSION_ID, session_id).await
    }

    async fn arm_sync_tag(&self, tag: &str) -> Result<()> {
        self.set_value(&format!("{SYNC_TAG_PREFIX}{tag}"), "1").await
    }

    async fn armed_sync_tags(&self) -> Result<Vec<String>> {
        let mut rows = self
            .conn
            .query(
                "SELECT key FROM device_state WHERE key LIKE ? ORDER BY key",
                [format!("{SYNC_TAG_PREFIX}%")],
            )
            .await?;

        let mut tags = Vec::new();
        while let Some(row) = rows.next().await? {
            let key: String = row.get(0)?;
            if let Some(tag) = key.strip_prefix(SYNC_TAG_PREFIX) {
                tags.push(tag.to_string());
            }
        }
        Ok(tags)
    }

    async fn clear_sync_tag(&self, tag: &str) -> Result<()> {
        self.delete_value(&format!("{SYNC_TAG_PREFIX}{tag}")).await
    }
}
