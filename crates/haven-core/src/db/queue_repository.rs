//! Durable queue repository
//!
//! The only shared state between the foreground dispatcher and the
//! background sync worker. Every mutation is single-item and keyed by
//! id; `claim_pending` doubles as the cross-actor processing lock.

use crate::error::{Error, Result};
use crate::models::{QueueItem, QueueItemId, QueuePayload, QueueStatus};
use libsql::Connection;

/// Trait for queue storage operations (async)
#[allow(async_fn_in_trait)]
pub trait QueueRepository {
    /// Insert a new pending item, assigning its id
    async fn enqueue(&self, payload: QueuePayload, credential: Option<String>)
        -> Result<QueueItem>;

    /// Get an item by ID
    async fn get(&self, id: &QueueItemId) -> Result<Option<QueueItem>>;

    /// List all items, oldest first (display/audit ordering only)
    async fn list(&self) -> Result<Vec<QueueItem>>;

    /// Atomically move `pending` items to `syncing` and return only the
    /// rows this caller won; a concurrent sweep never claims the same item
    async fn claim_pending(&self) -> Result<Vec<QueueItem>>;

    /// Update status and bump the retry counter; a no-op for missing ids
    async fn update_status(
        &self,
        id: &QueueItemId,
        status: QueueStatus,
        retry_increment: u32,
    ) -> Result<()>;

    /// Delete an item; terminal cleanup only, a no-op for missing ids
    async fn remove(&self, id: &QueueItemId) -> Result<()>;
}

/// libSQL implementation of `QueueRepository`
pub struct LibSqlQueueRepository<'a> {
    conn: &'a Connection,
}

impl<'a> LibSqlQueueRepository<'a> {
    /// Create a new repository with the given connection
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    /// Whether any non-terminal item of the given kind remains.
    pub async fn has_outstanding(&self, kind: crate::models::QueueKind) -> Result<bool> {
        let mut rows = self
            .conn
            .query(
                "SELECT EXISTS(
                    SELECT 1 FROM alert_queue
                    WHERE kind = ? AND status IN ('pending', 'syncing')
                 )",
                [kind.as_str()],
            )
            .await?;

        let exists = if let Some(row) = rows.next().await? {
            row.get::<i32>(0)? != 0
        } else {
            false
        };
        Ok(exists)
    }

    fn parse_item(
        id: &str,
        payload: &str,
        credential: Option<String>,
        status: &str,
        enqueued_at: i64,
        retry_count: i64,
    ) -> Result<QueueItem> {
        Ok(QueueItem {
            id: id
                .parse()
                .map_err(|_| Error::Database(format!("invalid queue item id: {id}")))?,
            payload: serde_json::from_str(payload)?,
            credential,
            status: QueueStatus::parse(status)
                .ok_or_else(|| Error::Database(format!("unknown queue status: {status}")))?,
            enqueued_at,
            retry_count: u32::try_from(retry_count).unwrap_or(0),
        })
    }

    async fn fetch(&self, id: &str) -> Result<Option<QueueItem>> {
        let mut rows = self
            .conn
            .query(
                "SELECT id, payload, credential, status, enqueued_at, retry_count
                 FROM alert_queue WHERE id = ?",
                [id],
            )
            .await?;

        let Some(row) = rows.next().await? else {
            return Ok(None);
        };

        let id: String = row.get(0)?;
        let payload: String = row.get(1)?;
        let credential: Option<String> = row.get(2)?;
        let status: String = row.get(3)?;
        let enqueued_at: i64 = row.get(4)?;
        let retry_count: i64 = row.get(5)?;

        Self::parse_item(&id, &payload, credential, &status, enqueued_at, retry_count).map(Some)
    }
}

impl QueueRepository for LibSqlQueueRepository<'_> {
    async fn enqueue(
        &self,
        payload: QueuePayload,
        credential: Option<String>,
    ) -> Result<QueueItem> {
        let item = QueueItem::new(payload, credential);
        let payload_json = serde_json::to_string(&item.payload)?;

        self.conn
            .execute(
                "INSERT INTO alert_queue (id, kind, payload, credential, status, enqueued_at, retry_count)
                 VALUES (?, ?, ?, ?, ?, ?, ?)",
                libsql::params![
                    item.id.as_str(),
                    item.kind().as_str(),
                    payload_json,
                    item.credential.clone(),
                    item.status.as_str(),
                    item.enqueued_at,
                    i64::from(item.retry_count)
                ],
            )
            .await?;

        tracing::debug!("Enqueued {} item {}", item.kind().as_str(), item.id);
        Ok(item)
    }

    async fn get(&self, id: &QueueItemId) -> Result<Option<QueueItem>> {
        self.fetch(&id.as_str()).await
    }

    async fn list(&self) -> Result<Vec<QueueItem>> {
        let mut rows = self
            .conn
            .query(
                "SELECT id, payload, credential, status, enqueued_at, retry_count
                 FROM alert_queue
                 ORDER BY enqueued_at ASC",
                (),
            )
            .await?;

        let mut items = Vec::new();
        while let Some(row) = rows.next().await? {
            let id: String = row.get(0)?;
            let payload: String = row.get(1)?;
            let credential: Option<String> = row.get(2)?;
            let status: String = row.get(3)?;
            let enqueued_at: i64 = row.get(4)?;
            let retry_count: i64 = row.get(5)?;
            items.push(Self::parse_item(
                &id,
                &payload,
                credential,
                &status,
                enqueued_at,
                retry_count,
            )?);
        }

        Ok(items)
    }

    async fn claim_pending(&self) -> Result<Vec<QueueItem>> {
        let mut rows = self
            .conn
            .query(
                "SELECT id FROM alert_queue WHERE status = 'pending' ORDER BY enqueued_at ASC",
                (),
            )
            .await?;

        let mut candidate_ids = Vec::new();
        while let Some(row) = rows.next().await? {
            candidate_ids.push(row.get::<String>(0)?);
        }

        let mut claimed = Vec::new();
        for id in candidate_ids {
            // Conditional update is the lock: only one sweep flips a
            // given row out of `pending`
            let changed = self
                .conn
                .execute(
                    "UPDATE alert_queue SET status = 'syncing' WHERE id = ? AND status = 'pending'",
                    [id.as_str()],
                )
                .await?;

            if changed == 0 {
                continue;
            }
            if let Some(item) = self.fetch(&id).await? {
                claimed.push(item);
            }
        }

        Ok(claimed)
    }

    async fn update_status(
        &self,
        id: &QueueItemId,
        status: QueueStatus,
        retry_increment: u32,
    ) -> Result<()> {
        self.conn
            .execute(
                "UPDATE alert_queue SET status = ?, retry_count = retry_count + ? WHERE id = ?",
                libsql::params![status.as_str(), i64::from(retry_increment), id.as_str()],
            )
            .await?;
        Ok(())
    }

    async fn remove(&self, id: &QueueItemId) -> Result<()> {
        self.conn
            .execute("DELETE FROM alert_queue WHERE id = ?", [id.as_str()])
            .await?;
        Ok(())
    }
}
