//! Bridge Configuration Module
//!
//! Provides configuration loading and management for the bridge client.
//! Supports loading from TOML files with environment-specific overrides
//! and `RPC_BRIDGE_*` environment variables.

use anyhow::{bail, Context, Result};
use config_crate::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::service::{self, http, poll};

/// Main bridge configuration structure
#[derive(Debug, Deserialize, Serialize, Clone, Default)]
#[serde(default)]
pub struct BridgeConfig {
    /// Remote server address (`host:port`); may be supplied per session instead
    pub host: Option<String>,

    /// Background poll scheduling
    pub poll: PollSettings,

    /// HTTP transport settings
    pub http: HttpSettings,
}

/// Adaptive poll settings
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct PollSettings {
    /// Spawn the background poll thread
    pub enabled: bool,
    /// Interval after any activity (milliseconds)
    pub floor_ms: u64,
    /// Interval cap while idle (milliseconds)
    pub ceiling_ms: u64,
}

/// HTTP transport settings
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct HttpSettings {
    /// Per-request timeout in seconds, 0 for none
    pub timeout_secs: u64,
    /// Idle pooled connection lifetime in seconds
    pub pool_idle_timeout_secs: u64,
}

impl Default for PollSettings {
    fn default() -> Self {
        Self {
            enabled: poll::ENABLED,
            floor_ms: poll::FLOOR_MS,
            ceiling_ms: poll::CEILING_MS,
        }
    }
}

impl Default for HttpSettings {
    fn default() -> Self {
        Self {
            timeout_secs: http::REQUEST_TIMEOUT_SECS,
            pool_idle_timeout_secs: http::POOL_IDLE_TIMEOUT_SECS,
        }
    }
}

impl BridgeConfig {
    /// Load configuration from files with environment overrides
    ///
    /// A missing default file is not an error; an explicitly named one is.
    pub fn load(base_path: Option<&Path>, environment: Option<&str>) -> Result<Self> {
        let (base, required) = match base_path {
            Some(path) => (path.to_path_buf(), true),
            None => (PathBuf::from(service::DEFAULT_CONFIG_PATH), false),
        };

        let mut builder = Config::builder().add_source(File::from(base.clone()).required(required));

        // Add environment-specific overrides if specified
        if let Some(env) = environment {
            let env_file = base
                .parent()
                .unwrap_or(Path::new("."))
                .join("environments")
                .join(format!("{}.toml", env));

            if env_file.exists() {
                info!("Loading environment config: {:?}", env_file);
                builder = builder.add_source(File::from(env_file));
            } else {
                warn!("Environment config not found: {:?}", env_file);
            }
        }

        // Override with environment variables (RPC_BRIDGE_HOST, RPC_BRIDGE_POLL__FLOOR_MS, ...)
        builder = builder.add_source(
            Environment::with_prefix(service::ENV_PREFIX)
                .separator("__")
                .try_parsing(true),
        );

        let config = builder.build().context("Failed to build configuration")?;

        let config: Self = config
            .try_deserialize()
            .context("Failed to deserialize configuration")?;

        debug!(?config, "bridge configuration loaded");
        Ok(config)
    }

    /// Check bounds that would otherwise surface as confusing runtime behaviour
    pub fn validate(&self) -> Result<()> {
        if self.poll.floor_ms == 0 {
            bail!("poll.floor_ms cannot be zero");
        }

        if self.poll.floor_ms > self.poll.ceiling_ms {
            bail!(
                "poll.floor_ms ({}) exceeds poll.ceiling_ms ({})",
                self.poll.floor_ms,
                self.poll.ceiling_ms
            );
        }

        if let Some(host) = &self.host {
            if host.trim().is_empty() {
                bail!("host cannot be empty when set");
            }
            if host.contains("://") {
                bail!("host must be `host:port` without a scheme, got {}", host);
            }
        }

        Ok(())
    }

    /// Expand environment variables in the host (`${BRIDGE_HOST}:8083`)
    pub fn expand_env_vars(&mut self) -> Result<()> {
        if let Some(host) = &self.host {
            let expanded = shellexpand::env(host).context("Failed to expand host")?;
            self.host = Some(expanded.to_string());
        }
        Ok(())
    }

    /// Set the remote host
    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = Some(host.into());
        self
    }

    /// Enable or disable the background poll thread
    pub fn with_polling(mut self, enabled: bool) -> Self {
        self.poll.enabled = enabled;
        self
    }

    /// Set the poll backoff bounds
    pub fn with_poll_bounds(mut self, floor_ms: u64, ceiling_ms: u64) -> Self {
        self.poll.floor_ms = floor_ms;
        self.poll.ceiling_ms = ceiling_ms;
        self
    }
}

/// Convenience function to load, expand and validate configuration
pub fn load_config(path: Option<&Path>, environment: Option<&str>) -> Result<BridgeConfig> {
    let mut config = BridgeConfig::load(path, environment)?;
    config.expand_env_vars()?;
    config.validate()?;
    Ok(config)
}
