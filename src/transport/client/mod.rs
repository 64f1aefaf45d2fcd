//! Client side of the relay connection.

pub mod backoff;
pub mod connection;
pub mod history_sync;

pub use backoff::Backoff;
pub use connection::{ConnectionHandle, ConnectionOptions, spawn_connection};
pub use history_sync::HistorySync;
