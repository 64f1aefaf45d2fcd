mod client;
mod core;
mod relay;

pub use client::ClientConfig;
pub use core::Config;
pub use relay::RelayConfig;
