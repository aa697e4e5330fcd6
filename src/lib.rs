//! cdp-relay: brokers Chrome DevTools Protocol traffic between many
//! Playwright WebSocket clients and a single browser extension holding
//! the `chrome.debugger` attachment.

pub mod error;
pub mod config;

pub mod wire;
pub mod client;
pub mod extension;
pub mod extension_protocol;
pub mod target;
pub mod intercept;
pub mod recording;
pub mod router;
pub mod server;
pub mod cli;

#[cfg(feature = "test-util")]
pub mod testutil;

// Re-exports
pub use error::{Error, Result};

/// cdp-relay library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
