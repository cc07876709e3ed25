//! Controller error, request and report types.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

use crate::controller::supervisor::SupervisorError;
use crate::grammar::GrammarError;
use crate::table::host::{Directive, HostKey, Interface};
use crate::table::types::{TableError, TableSummary};

#[derive(Debug, Error)]
pub enum ControlError {
    /// The proxy file exists but cannot be read or is not UTF-8.
    #[error("Failed to read proxy configuration {path:?}: {source}")]
    ConfigRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write {path:?}: {source}")]
    ConfigWrite {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Refusing to render a route table without virtual hosts")]
    EmptyTable,

    #[error(transparent)]
    Table(#[from] TableError),

    #[error("Supervisor error: {0}")]
    Supervisor(#[from] SupervisorError),

    /// The file on disk already holds the new table.
    #[error("Proxy did not come back up (status: '{status}'); configuration was written")]
    RestartFailed { status: String },

    #[error("Proxy configuration {path:?} does not re-render identically; restart skipped")]
    UnstableRoundTrip { path: PathBuf },
}

impl From<GrammarError> for ControlError {
    fn from(err: GrammarError) -> Self {
        match err {
            GrammarError::EmptyTable => ControlError::EmptyTable,
        }
    }
}

pub type ControlResult<T> = Result<T, ControlError>;

/// Certificate or key supplied with a host registration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TlsMaterial {
    /// Already on disk; referenced as is.
    Path(String),
    /// PEM content, written next to the proxy file as `<hostname>.crt|.key`.
    Inline(String),
}

/// A virtual host to register.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostRequest {
    pub hostname: String,
    pub interfaces: Vec<Interface>,
    #[serde(default)]
    pub certificate: Option<TlsMaterial>,
    #[serde(default)]
    pub certificate_key: Option<TlsMaterial>,
    #[serde(default)]
    pub extra_directives: Vec<Directive>,
}

impl HostRequest {
    pub fn new(hostname: impl Into<String>, interfaces: Vec<Interface>) -> Self {
        Self {
            hostname: hostname.into(),
            interfaces,
            certificate: None,
            certificate_key: None,
            extra_directives: Vec::new(),
        }
    }

    pub fn key(&self) -> HostKey {
        HostKey::compute(&self.interfaces, &self.hostname)
    }
}

/// Result of one read → mutate → write → reread cycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CycleReport<T> {
    /// What the operation returned.
    pub value: T,
    /// False when the operation left the routes unchanged and nothing was written.
    pub changed: bool,
    pub restarted: bool,
    /// Table counts after the cycle.
    pub summary: TableSummary,
}
