//! The relational route model and its host-level operations.
//!
//! # Responsibilities
//! - Own upstream groups and virtual hosts (forward maps)
//! - Own both reverse indices (see `index.rs`)
//! - Register and remove virtual hosts, singly or in batches
//! - Allocate upstream names
//!
//! # Design Decisions
//! - BTreeMaps throughout so iteration (and therefore output) is deterministic
//! - Upstream names come from a monotonic counter seeded past any
//!   `upstream_N` already in the file
//! - Every public mutation ends with `repair_indices`

use serde::Serialize;
use std::collections::BTreeMap;

use crate::table::host::{HostKey, VirtualHost};
use crate::table::index::{HostIndex, UpstreamIndex};
use crate::table::policy::ListenerPolicy;
use crate::table::types::{TableError, TableResult, TableSummary};
use crate::table::upstream::UpstreamGroup;

const UPSTREAM_NAME_PREFIX: &str = "upstream_";

/// Upstreams, virtual hosts and the reverse indices tying them together.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RouteTable {
    pub(crate) upstreams: BTreeMap<String, UpstreamGroup>,
    #[serde(skip)]
    pub(crate) upstream_index: UpstreamIndex,
    #[serde(rename = "virtual_hosts")]
    pub(crate) hosts: BTreeMap<HostKey, VirtualHost>,
    #[serde(skip)]
    pub(crate) host_index: HostIndex,
    #[serde(skip)]
    next_upstream_id: u64,
}

impl RouteTable {
    /// An empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Assemble a table from forward maps and derive its indices.
    pub(crate) fn from_parts(
        upstreams: BTreeMap<String, UpstreamGroup>,
        hosts: BTreeMap<HostKey, VirtualHost>,
    ) -> Self {
        let next_upstream_id = upstreams
            .keys()
            .filter_map(|name| name.strip_prefix(UPSTREAM_NAME_PREFIX)?.parse::<u64>().ok())
            .max()
            .unwrap_or(0);

        let mut table = Self {
            upstreams,
            hosts,
            next_upstream_id,
            ..Self::default()
        };
        table.repair_indices();
        table
    }

    pub fn upstreams(&self) -> &BTreeMap<String, UpstreamGroup> {
        &self.upstreams
    }

    pub fn upstream(&self, name: &str) -> Option<&UpstreamGroup> {
        self.upstreams.get(name)
    }

    pub fn virtual_hosts(&self) -> &BTreeMap<HostKey, VirtualHost> {
        &self.hosts
    }

    pub fn virtual_host(&self, key: &HostKey) -> Option<&VirtualHost> {
        self.hosts.get(key)
    }

    pub fn upstream_index(&self) -> &UpstreamIndex {
        &self.upstream_index
    }

    pub fn host_index(&self) -> &HostIndex {
        &self.host_index
    }

    /// True when there are no virtual hosts (nothing to serialize).
    pub fn is_empty(&self) -> bool {
        self.hosts.is_empty()
    }

    /// Upstream bound to a location, if any.
    pub fn location_upstream(&self, key: &HostKey, path: &str) -> Option<&UpstreamGroup> {
        let reference = self.hosts.get(key)?.locations.get(path)?.upstream.as_ref()?;
        self.upstreams.get(&reference.name)
    }

    /// Find a host by exact key, or by hostname when exactly one host carries it.
    pub fn resolve_host(&self, key_or_hostname: &str) -> Option<HostKey> {
        let key = HostKey::from(key_or_hostname.to_string());
        if self.hosts.contains_key(&key) {
            return Some(key);
        }
        let mut matches = self
            .hosts
            .iter()
            .filter(|(_, host)| host.hostname == key_or_hostname)
            .map(|(key, _)| key.clone());
        match (matches.next(), matches.next()) {
            (Some(key), None) => Some(key),
            _ => None,
        }
    }

    /// Forward model equality, ignoring indices and name allocation state.
    pub fn same_routes(&self, other: &RouteTable) -> bool {
        self.upstreams == other.upstreams && self.hosts == other.hosts
    }

    pub fn summary(&self) -> TableSummary {
        TableSummary {
            hosts: self.hosts.len(),
            locations: self.hosts.values().map(|host| host.locations.len()).sum(),
            upstreams: self.upstreams.len(),
            backends: self.upstream_index.len(),
        }
    }

    /// Check a host for registration without touching the table.
    pub fn validate_virtual_host(&self, host: &VirtualHost, policy: &ListenerPolicy) -> TableResult<()> {
        let invalid = |reason: String| TableError::InvalidVirtualHost {
            host: host.hostname.clone(),
            reason,
        };

        if host.hostname.trim().is_empty() {
            return Err(invalid("hostname is empty".into()));
        }
        if host.interfaces.is_empty() {
            return Err(invalid("no listen interfaces".into()));
        }
        if host.is_reserved() {
            return Err(invalid("hostname is reserved".into()));
        }
        policy.check_host(host).map_err(invalid)
    }

    /// Insert a virtual host.
    ///
    /// Returns `Ok(false)` when a host with the same key already exists.
    pub fn register_virtual_host(&mut self, host: VirtualHost, policy: &ListenerPolicy) -> TableResult<bool> {
        let key = host.key();
        if self.hosts.contains_key(&key) {
            tracing::debug!(host = %key, "Virtual host already registered");
            return Ok(false);
        }
        self.validate_virtual_host(&host, policy)?;

        self.hosts.insert(key.clone(), host);
        self.repair_indices();
        tracing::debug!(host = %key, "Virtual host registered");
        Ok(true)
    }

    /// Register many hosts, skipping failures.
    ///
    /// Returns the keys of the hosts actually inserted.
    pub fn register_virtual_hosts(
        &mut self,
        hosts: impl IntoIterator<Item = VirtualHost>,
        policy: &ListenerPolicy,
    ) -> Vec<HostKey> {
        let mut applied = Vec::new();
        for host in hosts {
            let key = host.key();
            match self.register_virtual_host(host, policy) {
                Ok(true) => applied.push(key),
                Ok(false) => {}
                Err(e) => tracing::warn!(host = %key, error = %e, "Skipping virtual host"),
            }
        }
        applied
    }

    /// Remove a virtual host and every upstream only it referenced.
    ///
    /// Returns `false` when the host does not exist.
    pub fn remove_virtual_host(&mut self, key: &HostKey) -> bool {
        let Some(host) = self.hosts.remove(key) else {
            return false;
        };

        for (path, location) in &host.locations {
            if let Some(reference) = &location.upstream {
                self.release_location(key, path, &reference.name);
            }
        }

        self.repair_indices();
        tracing::debug!(host = %key, "Virtual host removed");
        true
    }

    /// Remove many hosts; returns the keys that existed.
    pub fn remove_virtual_hosts<'a>(&mut self, keys: impl IntoIterator<Item = &'a HostKey>) -> Vec<HostKey> {
        keys.into_iter()
            .filter(|key| self.remove_virtual_host(key))
            .cloned()
            .collect()
    }

    /// Drop one `(host, path)` entry from the reverse host index and delete
    /// the upstream when nothing references it anymore.
    pub(crate) fn release_location(&mut self, key: &HostKey, path: &str, upstream: &str) {
        let Some(referrers) = self.host_index.get_mut(upstream) else {
            return;
        };
        if let Some(reference) = referrers.get_mut(key) {
            reference.paths.remove(path);
            if reference.paths.is_empty() {
                referrers.remove(key);
            }
        }
        if referrers.is_empty() {
            self.host_index.remove(upstream);
            if self.upstreams.remove(upstream).is_some() {
                tracing::debug!(upstream = %upstream, "Unreferenced upstream removed");
            }
        }
    }

    /// Next unused generated upstream name.
    pub(crate) fn allocate_upstream_name(&mut self) -> String {
        loop {
            self.next_upstream_id += 1;
            let name = format!("{}{}", UPSTREAM_NAME_PREFIX, self.next_upstream_id);
            if !self.upstreams.contains_key(&name) {
                return name;
            }
        }
    }
}
