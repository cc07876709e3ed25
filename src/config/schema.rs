//! Configuration schema definitions.
//!
//! This module defines the settings of the control plane itself (not the
//! proxy file it manages). All types derive Serde traits for
//! deserialization from TOML, and every field has a default.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::table::upstream::LoadBalancing;

/// Root settings for the proxy control plane.
#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq)]
#[serde(default)]
pub struct ControlConfig {
    /// Managed proxy configuration file.
    pub proxy: ProxySection,

    /// Port/encryption pairing rule for listen interfaces.
    pub listener_policy: ListenerPolicy,

    /// Service route derivation.
    pub routing: RoutingConfig,

    /// External process supervisor commands.
    pub supervisor: SupervisorConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

/// Location of the managed proxy file and related artifacts.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct ProxySection {
    /// Proxy configuration file read and rewritten by the controller.
    pub config_path: PathBuf,

    /// Where inline certificates are written (default: next to `config_path`).
    pub certificate_dir: Option<PathBuf>,

    /// Copy the previous file to `<config_path>.bak` before each overwrite.
    pub backup: bool,
}

impl Default for ProxySection {
    fn default() -> Self {
        Self {
            config_path: PathBuf::from("/etc/nginx/conf.d/proxy-control.conf"),
            certificate_dir: None,
            backup: true,
        }
    }
}

impl ProxySection {
    /// Directory receiving materialized certificate and key files.
    pub fn certificate_dir(&self) -> PathBuf {
        match &self.certificate_dir {
            Some(dir) => dir.clone(),
            None => self
                .config_path
                .parent()
                .map(Path::to_path_buf)
                .unwrap_or_default(),
        }
    }

    /// `<config_path>.bak`
    pub fn backup_path(&self) -> PathBuf {
        let mut raw = self.config_path.clone().into_os_string();
        raw.push(".bak");
        PathBuf::from(raw)
    }
}

/// Which ports must be plain and which must be encrypted.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default)]
pub struct ListenerPolicy {
    /// Disable to accept any pairing.
    pub enforce: bool,

    /// Ports that must never carry `ssl`.
    pub plain_ports: Vec<u16>,

    /// Ports that must always carry `ssl`.
    pub encrypted_ports: Vec<u16>,
}

impl Default for ListenerPolicy {
    fn default() -> Self {
        Self {
            enforce: true,
            plain_ports: vec![80],
            encrypted_ports: vec![443],
        }
    }
}

/// How service identities become locations.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct RoutingConfig {
    /// Leading path segment of every service route (empty or `/...`).
    pub route_prefix: String,

    /// Policy for upstreams created by service registration.
    pub load_balancing: LoadBalancing,

    /// Also route the unversioned path of each service.
    pub default_path: bool,
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            route_prefix: String::new(),
            load_balancing: LoadBalancing::RoundRobin,
            default_path: true,
        }
    }
}

/// Commands used to restart the proxy daemon after a write.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct SupervisorConfig {
    /// When false, cycles stop after the write.
    pub enabled: bool,

    pub stop_command: Vec<String>,

    pub start_command: Vec<String>,

    /// Must print the daemon state on stdout.
    pub status_command: Vec<String>,

    /// Exact (trimmed) status output meaning "running".
    pub running_status: String,

    /// Skip the restart unless write → reread → reserialize is byte-identical.
    pub require_stable_roundtrip: bool,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            stop_command: vec!["nginx".into(), "-s".into(), "stop".into()],
            start_command: vec!["nginx".into()],
            status_command: vec!["proxy-status".into()],
            running_status: "running".to_string(),
            require_stable_roundtrip: true,
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// `pretty` for terminals, `json` for log shipping.
    pub log_format: String,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: "pretty".to_string(),
            metrics_enabled: false,
            metrics_address: "127.0.0.1:9090".to_string(),
        }
    }
}
