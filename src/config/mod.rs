//! Configuration loading and management.
//!
//! This module is split into logical submodules:
//! - [`types`]: Core config struct definitions (Config, ServerConfig, ListenConfig)
//! - [`limits`]: Link keepalive and handshake timers (LimitsConfig)
//! - [`links`]: Server-to-server link configuration (LinkBlock)
//! - [`validation`]: Startup validation collecting every error found

mod limits;
mod links;
mod types;
mod validation;

pub use limits::LimitsConfig;
pub use links::LinkBlock;
pub use types::{Config, ConfigError, ListenConfig, ServerConfig};
pub use validation::{ValidationError, validate};
