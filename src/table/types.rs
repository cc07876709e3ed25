//! Route table error and outcome types.

use serde::Serialize;
use thiserror::Error;

use crate::table::host::{Directive, HostKey};
use crate::table::upstream::{LoadBalancing, Protocol};

/// Per-item failures of route table mutations.
///
/// These abort only the single host or route being processed; batch
/// callers log them and continue with the next item.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TableError {
    /// Host failed validation or the listener policy.
    #[error("invalid virtual host '{host}': {reason}")]
    InvalidVirtualHost { host: String, reason: String },

    /// Existing location disagrees with the requested binding.
    #[error("route conflict at '{path}': {reason}")]
    RouteConflict { path: String, reason: String },

    /// No virtual host with that key.
    #[error("unknown virtual host '{0}'")]
    UnknownHost(HostKey),

    /// A route must name at least one backend.
    #[error("route '{path}' has no backends")]
    EmptyBackendSet { path: String },

    /// Location paths must be absolute.
    #[error("invalid location path '{0}'")]
    InvalidPath(String),
}

/// Result type for route table operations.
pub type TableResult<T> = Result<T, TableError>;

/// Options of a route registration besides its backends.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RouteOptions {
    /// Only used when a new upstream is created; a reused group keeps its own.
    pub load_balancing: LoadBalancing,
    pub protocol: Protocol,
    pub source_root: Option<String>,
    /// Appended to the location when not already present.
    pub proxy_directives: Vec<Directive>,
}

/// What a route registration did to its location.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum RouteAction {
    /// Location newly bound to an upstream.
    Created,
    /// New backends merged into the bound upstream.
    Merged,
    /// Every backend was already present.
    Unchanged,
}

/// A location written by a route registration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RouteWrite {
    pub path: String,
    pub upstream: String,
    pub action: RouteAction,
}

/// Counts reported in logs and by `proxy-cli show`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TableSummary {
    pub hosts: usize,
    pub locations: usize,
    pub upstreams: usize,
    pub backends: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = TableError::RouteConflict {
            path: "/svc".into(),
            reason: "protocol differs".into(),
        };
        assert_eq!(err.to_string(), "route conflict at '/svc': protocol differs");

        let err = TableError::UnknownHost(HostKey::from("0.0.0.0:80:plain/a".to_string()));
        assert!(err.to_string().contains("0.0.0.0:80:plain/a"));
    }
}
