pub mod schema;

pub use schema::{ClientConfig, Config, RelayConfig};
