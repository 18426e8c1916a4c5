//! Database layer for Haven
//!
//! The queue table is the only state shared between the foreground
//! dispatcher and the background sync worker.

mod connection;
mod migrations;
mod queue_repository;
mod state_repository;

pub use connection::Database;
pub use queue_repository::{LibSqlQueueRepository, QueueRepository};
pub use state_repository::{LibSqlStateRepository, StateRepository};
