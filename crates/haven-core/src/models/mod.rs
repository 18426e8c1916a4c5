//! Data model for the dispatch subsystem

mod location;
mod queue_item;
mod session;

pub use location::{Coordinates, LocationFix, LocationSource};
pub use queue_item::{
    AlertPayload, ContactPayload, QueueItem, QueueItemId, QueueKind, QueuePayload, QueueStatus,
};
pub use session::{SessionContext, SessionKind};
