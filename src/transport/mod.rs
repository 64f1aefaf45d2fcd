pub mod client;
pub mod protocol;
pub mod relay;

pub use client::{ConnectionHandle, ConnectionOptions, spawn_connection};
pub use protocol::{AUTH_FAILURE_CLOSE_CODE, ClientMessage, ServerMessage, Submission};
