//! Configuration loading and management.
//!
//! This module is split into logical submodules:
//! - [`types`]: Core config struct definitions (Config, ServerConfig, DatabaseConfig)
//! - [`listen`]: WebSocket listener configuration (ListenConfig)
//! - [`security`]: Credential hashing cost (SecurityConfig)

mod listen;
mod security;
mod types;

pub use listen::ListenConfig;
pub use security::SecurityConfig;
pub use types::{Config, ConfigError, DatabaseConfig, ServerConfig};
