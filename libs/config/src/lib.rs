//! # Bridge Centralized Configuration
//!
//! This crate provides configuration management and wire constants for
//! the RPC bridge client, so the command names and poll bounds live in
//! exactly one place.
//!
//! ## Features
//!
//! - **Protocol Constants**: Command names and payload keys spoken on the wire
//! - **Service Defaults**: Poll backoff bounds and HTTP timeouts
//! - **Bridge Configuration**: TOML files layered with `RPC_BRIDGE_*` overrides
//!
//! ## Usage
//!
//! ```rust
//! use bridge_config::{commands, service::poll};
//!
//! let poll_command = commands::CALLBACKS_POLL;
//! assert_eq!(poll::FLOOR_MS, 10);
//! # let _ = poll_command;
//! ```

pub mod protocol;
pub mod service;
pub mod service_config;

// Re-export commonly used types
pub use protocol::*;
pub use service_config::{load_config, BridgeConfig, HttpSettings, PollSettings};
