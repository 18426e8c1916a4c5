//! Location resolution ladder
//!
//! Live fix within the timeout, otherwise the last persisted fix,
//! otherwise the hardcoded default. Resolution never fails and never
//! blocks a dispatch past the timeout.

use std::time::Duration;

use libsql::Connection;

use crate::db::{LibSqlStateRepository, StateRepository};
use crate::models::{Coordinates, LocationFix};

/// Trait for a device location source (async)
#[allow(async_fn_in_trait)]
pub trait LocationProvider {
    /// Attempt a fresh fix. `None` when the device cannot produce one.
    async fn current_fix(&self) -> Option<Coordinates>;
}

/// Resolves a usable location for an outgoing alert.
pub struct LocationResolver<'a, P> {
    state: LibSqlStateRepository<'a>,
    provider: P,
}

impl<'a, P: LocationProvider> LocationResolver<'a, P> {
    pub const fn new(conn: &'a Connection, provider: P) -> Self {
        Self {
            state: LibSqlStateRepository::new(conn),
            provider,
        }
    }

    /// Resolve a fix, waiting at most `timeout` for the live provider.
    ///
    /// A live fix is persisted as the new fallback before returning.
    /// Persistence failures are logged and swallowed; they must not
    /// degrade the fix that was already obtained.
    pub async fn resolve(&self, timeout: Duration) -> LocationFix {
        let live = tokio::time::timeout(timeout, self.provider.current_fix())
            .await
            .ok()
            .flatten();

        if let Some(coordinates) = live {
            if let Err(e) = self.state.save_last_known_fix(&coordinates).await {
                tracing::warn!("Failed to persist live fix as fallback: {e}");
            }
            return LocationFix::live(coordinates);
        }

        match self.state.last_known_fix().await {
            Ok(Some(coordinates)) => {
                tracing::debug!("No live fix, using persisted fallback");
                LocationFix::fallback(coordinates)
            }
            Ok(None) => {
                tracing::debug!("No live fix and no fallback, using default");
                LocationFix::default_fix()
            }
            Err(e) => {
                tracing::warn!("Failed to read fallback fix: {e}");
                LocationFix::default_fix()
            }
        }
    }
}
