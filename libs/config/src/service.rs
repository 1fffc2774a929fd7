//! Service configuration and defaults
//!
//! This module contains default configuration values and constants
//! used by the bridge client for consistency.

/// Background poll defaults
pub mod poll {
    /// Shortest interval between polls (milliseconds)
    pub const FLOOR_MS: u64 = 10;

    /// Longest interval between polls (milliseconds)
    pub const CEILING_MS: u64 = 1_000;

    /// Background polling is on unless explicitly disabled
    pub const ENABLED: bool = true;
}

/// HTTP transport defaults
pub mod http {
    /// Request timeout (seconds); 0 disables the timeout since a single
    /// exchange may include arbitrarily long nested callback round trips
    pub const REQUEST_TIMEOUT_SECS: u64 = 0;

    /// Idle connection lifetime in the pool (seconds)
    pub const POOL_IDLE_TIMEOUT_SECS: u64 = 90;
}

/// Environment variable prefix for configuration overrides
pub const ENV_PREFIX: &str = "RPC_BRIDGE";

/// Default configuration file location
pub const DEFAULT_CONFIG_PATH: &str = "config/bridge.toml";
