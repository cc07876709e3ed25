//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (ports, addresses, known levels/formats)
//! - Detect conflicting listener policy entries
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: ControlConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::net::SocketAddr;
use thiserror::Error;

use crate::config::schema::ControlConfig;

const LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];
const LOG_FORMATS: &[&str] = &["pretty", "json"];

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("proxy.config_path must not be empty")]
    EmptyConfigPath,

    #[error("listener_policy: port {0} is listed as both plain and encrypted")]
    PortPolicyOverlap(u16),

    #[error("supervisor.{0} must not be empty when the supervisor is enabled")]
    EmptyCommand(&'static str),

    #[error("observability.metrics_address '{0}' is not a socket address")]
    InvalidMetricsAddress(String),

    #[error("observability.log_level '{0}' is not one of trace, debug, info, warn, error")]
    UnknownLogLevel(String),

    #[error("observability.log_format '{0}' is not one of pretty, json")]
    UnknownLogFormat(String),

    #[error("routing.route_prefix '{0}' must be empty or start with '/'")]
    InvalidRoutePrefix(String),
}

/// Check every semantic rule, collecting all failures.
pub fn validate_config(config: &ControlConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.proxy.config_path.as_os_str().is_empty() {
        errors.push(ValidationError::EmptyConfigPath);
    }

    let policy = &config.listener_policy;
    for port in &policy.plain_ports {
        if policy.encrypted_ports.contains(port) {
            errors.push(ValidationError::PortPolicyOverlap(*port));
        }
    }

    let supervisor = &config.supervisor;
    if supervisor.enabled {
        for (field, argv) in [
            ("stop_command", &supervisor.stop_command),
            ("start_command", &supervisor.start_command),
            ("status_command", &supervisor.status_command),
        ] {
            if argv.is_empty() || argv[0].trim().is_empty() {
                errors.push(ValidationError::EmptyCommand(field));
            }
        }
    }

    let observability = &config.observability;
    if observability.metrics_enabled && observability.metrics_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::InvalidMetricsAddress(
            observability.metrics_address.clone(),
        ));
    }
    if !LOG_LEVELS.contains(&observability.log_level.to_ascii_lowercase().as_str()) {
        errors.push(ValidationError::UnknownLogLevel(observability.log_level.clone()));
    }
    if !LOG_FORMATS.contains(&observability.log_format.as_str()) {
        errors.push(ValidationError::UnknownLogFormat(observability.log_format.clone()));
    }

    let prefix = &config.routing.route_prefix;
    if !prefix.is_empty() && !prefix.starts_with('/') {
        errors.push(ValidationError::InvalidRoutePrefix(prefix.clone()));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
