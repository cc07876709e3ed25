//! Reverse indices and their repair.
//!
//! # Responsibilities
//! - "Which upstreams contain this backend?" (upstream index)
//! - "Which host locations use this upstream?" (host index)
//! - Rebuild both from the forward maps after any batch of raw mutations
//! - Report invariant violations for tests and diagnostics
//!
//! # Design Decisions
//! - One routine (`repair_indices`) owns all index upkeep; mutations may
//!   consult the indices but never patch them piecemeal except to decide
//!   cascades
//! - Repair also drops locations bound to an upstream that no longer exists

use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};

use crate::table::host::{HostKey, Interface, VirtualHost};
use crate::table::route_table::RouteTable;
use crate::table::upstream::{BackendAddress, LoadBalancing, UpstreamGroup};

/// How one upstream uses one backend address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct UpstreamUsage {
    pub weight: u32,
    pub load_balancing: LoadBalancing,
}

/// The paths of one host bound to an upstream, plus a snapshot of that host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HostReference {
    pub paths: BTreeSet<String>,
    pub hostname: String,
    pub interfaces: Vec<Interface>,
}

/// backend address -> upstream name -> usage
pub type UpstreamIndex = BTreeMap<BackendAddress, BTreeMap<String, UpstreamUsage>>;

/// upstream name -> host key -> referencing paths
pub type HostIndex = BTreeMap<String, BTreeMap<HostKey, HostReference>>;

pub(crate) fn build_upstream_index(upstreams: &BTreeMap<String, UpstreamGroup>) -> UpstreamIndex {
    let mut index = UpstreamIndex::new();
    for (name, group) in upstreams {
        for item in &group.items {
            index.entry(item.address.clone()).or_default().insert(
                name.clone(),
                UpstreamUsage {
                    weight: item.weight,
                    load_balancing: group.load_balancing,
                },
            );
        }
    }
    index
}

pub(crate) fn build_host_index(hosts: &BTreeMap<HostKey, VirtualHost>) -> HostIndex {
    let mut index = HostIndex::new();
    for (key, host) in hosts {
        for (path, location) in &host.locations {
            let Some(reference) = &location.upstream else {
                continue;
            };
            index
                .entry(reference.name.clone())
                .or_default()
                .entry(key.clone())
                .or_insert_with(|| HostReference {
                    paths: BTreeSet::new(),
                    hostname: host.hostname.clone(),
                    interfaces: host.interfaces.clone(),
                })
                .paths
                .insert(path.clone());
        }
    }
    index
}

impl RouteTable {
    /// Rebuild both indices from the forward maps, dropping dangling locations.
    ///
    /// Returns the number of dangling locations dropped.
    pub fn repair_indices(&mut self) -> usize {
        let upstreams = &self.upstreams;
        let mut dropped = 0;
        for (key, host) in &mut self.hosts {
            host.locations.retain(|path, location| {
                let dangling = location
                    .upstream
                    .as_ref()
                    .is_some_and(|reference| !upstreams.contains_key(&reference.name));
                if dangling {
                    tracing::debug!(host = %key, path = %path, "Dropping location bound to a removed upstream");
                    dropped += 1;
                }
                !dangling
            });
        }

        self.upstream_index = build_upstream_index(&self.upstreams);
        self.host_index = build_host_index(&self.hosts);
        dropped
    }

    /// Number of `(host, path)` pairs bound to an upstream.
    pub fn referrer_count(&self, upstream: &str) -> usize {
        self.host_index
            .get(upstream)
            .map(|hosts| hosts.values().map(|reference| reference.paths.len()).sum())
            .unwrap_or(0)
    }

    /// Every broken invariant, described; empty when the table is consistent.
    pub fn check_invariants(&self) -> Vec<String> {
        let mut violations = Vec::new();

        let groups: Vec<&UpstreamGroup> = self.upstreams.values().collect();
        for group in groups.iter().filter(|group| group.items.is_empty()) {
            violations.push(format!("empty upstream: '{}'", group.name));
        }
        for (i, a) in groups.iter().enumerate() {
            for b in &groups[i + 1..] {
                if a.is_equivalent(b) {
                    violations.push(format!("equivalent upstreams: '{}' and '{}'", a.name, b.name));
                }
            }
        }

        for (key, host) in &self.hosts {
            if host.key() != *key {
                violations.push(format!("misfiled host: stored under '{}', key is '{}'", key, host.key()));
            }
            for (path, location) in &host.locations {
                if let Some(reference) = &location.upstream {
                    if !self.upstreams.contains_key(&reference.name) {
                        violations.push(format!(
                            "dangling location: '{}' of '{}' references missing upstream '{}'",
                            path, key, reference.name
                        ));
                    }
                }
            }
        }

        if self.upstream_index != build_upstream_index(&self.upstreams) {
            violations.push("stale upstream index".to_string());
        }
        if self.host_index != build_host_index(&self.hosts) {
            violations.push("stale host index".to_string());
        }

        violations
    }
}
