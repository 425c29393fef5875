// sentinel-gate-config/src/lib.rs
// ============================================================================
// Module: Sentinel Gate Config Library
// Description: Public API surface for gateway configuration.
// Purpose: Expose the configuration tree, its loader, and validation errors.
// Dependencies: crate::config
// ============================================================================

//! ## Overview
//! Loads and validates the TOML configuration file that parameterizes every
//! interceptor stage: rate limits, session timeouts, audit rotation, and
//! the developer convenience mode. See [`GatewayConfig::load`].

pub mod config;

pub use config::{
    AuditConfig, AuthConfig, ConfigError, DevConfig, GatewayConfig, GcraTierConfig,
    PolicyConfig, RateLimitConfig, RouterConfig, ServerConfig, SessionConfig,
    UpstreamProcessConfig, CONFIG_ENV_VAR, DEFAULT_CONFIG_NAME, DEVMODE_ENV_VAR,
    MAX_CONFIG_FILE_SIZE,
};
