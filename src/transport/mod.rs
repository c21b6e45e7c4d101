//! Transport layer for relaying metrics to remote dashboards.

pub mod websocket;

pub use websocket::{MetricsRelay, RelayClient, RelayConfig};
