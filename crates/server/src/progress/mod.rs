// crates/server/src/progress/mod.rs
//! Progress Proxy (spec.md 4.K): relays a job's backend websocket progress
//! stream to any number of client subscribers.

pub mod frame;
pub mod proxy;

pub use frame::{ClientMessage, ProgressFrame, UpstreamFrame};
pub use proxy::ProgressHub;
