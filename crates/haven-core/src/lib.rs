//! haven-core - Core library for Haven's emergency dispatch
//!
//! This crate contains the durable alert queue, the foreground
//! dispatcher, and the background sync worker shared by every Haven
//! interface. The two actors never call each other directly; they
//! coordinate through the durable store and a named wake signal.

pub mod api;
pub mod config;
pub mod db;
pub mod dispatch;
pub mod error;
pub mod location;
pub mod models;
pub mod retry;
pub mod session;
pub mod sync;
pub mod util;

pub use error::{Error, Result};
pub use models::{QueueItem, QueueItemId};
