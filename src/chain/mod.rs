//! Chain access: the client seam the watcher consumes, its websocket
//! implementation, and decoding of registry logs.

pub mod alloy_client;
pub mod client;
pub mod events;

pub use alloy_client::AlloyChainClient;
pub use client::{ChainClient, ChainError, LogSubscription};
pub use events::{DecodeError, decode_log};
