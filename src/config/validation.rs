//! Configuration validation.
//!
//! Validates configuration at startup to catch common errors early.

use super::Config;
use crate::state::modes::KNOWN_EXTENSIONS;
use std::collections::HashSet;
use thiserror::Error;

/// Validation errors for configuration.
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("server.name is required")]
    MissingServerName,
    #[error("server.name must be a dotted name of letters, digits and '-', got '{0}'")]
    InvalidServerName(String),
    #[error("server.network is required")]
    MissingNetworkName,
    #[error("server.casemapping must be 'rfc1459' or 'ascii', got '{0}'")]
    InvalidCasemapping(String),
    #[error("unknown extension '{0}'")]
    UnknownExtension(String),
    #[error("links: invalid server name '{0}'")]
    InvalidLinkName(String),
    #[error("links: duplicate link block for '{0}'")]
    DuplicateLink(String),
    #[error("links: '{0}' names the local server")]
    LinkToSelf(String),
    #[error("links: {field} for '{link}' is empty")]
    EmptyPassword { link: String, field: &'static str },
    #[error("limits.{0} must be greater than zero")]
    ZeroTimer(&'static str),
}

/// Whether `name` is usable as a server name on the wire.
pub fn is_valid_server_name(name: &str) -> bool {
    !name.is_empty()
        && name.contains('.')
        && !name.starts_with('.')
        && !name.ends_with('.')
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '.' || c == '-')
}

/// Validate a configuration, returning all errors found.
pub fn validate(config: &Config) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    // Identity
    if config.server.name.is_empty() {
        errors.push(ValidationError::MissingServerName);
    } else if !is_valid_server_name(&config.server.name) {
        errors.push(ValidationError::InvalidServerName(config.server.name.clone()));
    }
    if config.server.network.is_empty() {
        errors.push(ValidationError::MissingNetworkName);
    }
    if config.server.casemapping().is_none() {
        errors.push(ValidationError::InvalidCasemapping(
            config.server.casemapping.clone(),
        ));
    }
    for ext in &config.server.extensions {
        if !KNOWN_EXTENSIONS.contains(&ext.as_str()) {
            errors.push(ValidationError::UnknownExtension(ext.clone()));
        }
    }

    // Links
    let mut seen = HashSet::new();
    for link in &config.links {
        if !is_valid_server_name(&link.name) {
            errors.push(ValidationError::InvalidLinkName(link.name.clone()));
        }
        if !seen.insert(link.name.to_ascii_lowercase()) {
            errors.push(ValidationError::DuplicateLink(link.name.clone()));
        }
        if link.is_for(&config.server.name) {
            errors.push(ValidationError::LinkToSelf(link.name.clone()));
        }
        if link.send_password.is_empty() {
            errors.push(ValidationError::EmptyPassword {
                link: link.name.clone(),
                field: "send_password",
            });
        }
        if link.receive_password.is_empty() {
            errors.push(ValidationError::EmptyPassword {
                link: link.name.clone(),
                field: "receive_password",
            });
        }
    }

    // Timers
    if config.limits.ping_interval == 0 {
        errors.push(ValidationError::ZeroTimer("ping_interval"));
    }
    if config.limits.ping_timeout == 0 {
        errors.push(ValidationError::ZeroTimer("ping_timeout"));
    }
    if config.limits.handshake_timeout == 0 {
        errors.push(ValidationError::ZeroTimer("handshake_timeout"));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
