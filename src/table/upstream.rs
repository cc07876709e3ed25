//! Upstream groups and their backend items.
//!
//! # Responsibilities
//! - Represent a named, weighted set of backend addresses
//! - Normalize backend ports against the protocol default
//! - Decide group equivalence (order-insensitive address sets)
//!
//! # Design Decisions
//! - Equivalence ignores weights and load balancing; only host+port count
//! - A port equal to the protocol default is stored as `None`

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

/// Transport between the proxy and an upstream's backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Protocol {
    #[default]
    Plain,
    Encrypted,
}

impl Protocol {
    /// Port implied when an address carries none.
    pub fn default_port(self) -> u16 {
        match self {
            Protocol::Plain => 80,
            Protocol::Encrypted => 443,
        }
    }

    /// URL scheme used in `proxy_pass`.
    pub fn scheme(self) -> &'static str {
        match self {
            Protocol::Plain => "http",
            Protocol::Encrypted => "https",
        }
    }

    /// Map a URL scheme back to a protocol (case-insensitive).
    pub fn from_scheme(scheme: &str) -> Option<Self> {
        match scheme.to_ascii_lowercase().as_str() {
            "http" => Some(Protocol::Plain),
            "https" => Some(Protocol::Encrypted),
            _ => None,
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.scheme())
    }
}

/// Backend selection policy of an upstream group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LoadBalancing {
    #[default]
    RoundRobin,
    LeastConnections,
    AddressHash,
}

impl LoadBalancing {
    /// Bare directive written at the top of the upstream block.
    /// Round-robin is the proxy's default and is written as nothing.
    pub fn directive(self) -> Option<&'static str> {
        match self {
            LoadBalancing::RoundRobin => None,
            LoadBalancing::LeastConnections => Some("least_conn"),
            LoadBalancing::AddressHash => Some("ip_hash"),
        }
    }

    /// Interpret the first bare directive of an upstream block.
    pub fn from_directive(name: &str) -> Self {
        match name {
            "least_conn" => LoadBalancing::LeastConnections,
            "ip_hash" => LoadBalancing::AddressHash,
            _ => LoadBalancing::RoundRobin,
        }
    }
}

impl FromStr for LoadBalancing {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "round-robin" | "round_robin" => Ok(LoadBalancing::RoundRobin),
            "least-connections" | "least_conn" => Ok(LoadBalancing::LeastConnections),
            "address-hash" | "ip_hash" => Ok(LoadBalancing::AddressHash),
            other => Err(format!("unknown load balancing policy '{}'", other)),
        }
    }
}

/// Host and optional port of one backend.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BackendAddress {
    pub host: String,
    pub port: Option<u16>,
}

impl BackendAddress {
    pub fn new(host: impl Into<String>, port: Option<u16>) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// Drop the port when it is the protocol default.
    pub fn normalized(mut self, protocol: Protocol) -> Self {
        if self.port == Some(protocol.default_port()) {
            self.port = None;
        }
        self
    }

    /// Parse `host`, `host:port`, `[v6]` or `[v6]:port`.
    ///
    /// Returns `None` for an empty host or a port that is not a `u16`.
    pub fn parse(text: &str) -> Option<Self> {
        let text = text.trim();
        if let Some(rest) = text.strip_prefix('[') {
            let (host, tail) = rest.split_once(']')?;
            if host.is_empty() {
                return None;
            }
            let port = match tail {
                "" => None,
                _ => Some(tail.strip_prefix(':')?.parse::<u16>().ok()?),
            };
            return Some(Self::new(host, port));
        }

        match text.matches(':').count() {
            0 if !text.is_empty() => Some(Self::new(text, None)),
            1 => {
                let (host, port) = text.split_once(':')?;
                if host.is_empty() {
                    return None;
                }
                Some(Self::new(host, Some(port.parse::<u16>().ok()?)))
            }
            // Bare IPv6 without brackets cannot carry a port.
            n if n > 1 => Some(Self::new(text, None)),
            _ => None,
        }
    }
}

impl fmt::Display for BackendAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]", self.host)?;
        } else {
            f.write_str(&self.host)?;
        }
        if let Some(port) = self.port {
            write!(f, ":{}", port)?;
        }
        Ok(())
    }
}

/// One backend inside an upstream group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackendItem {
    pub address: BackendAddress,
    /// Relative weight, always >= 1.
    pub weight: u32,
}

impl BackendItem {
    pub fn new(address: BackendAddress) -> Self {
        Self { address, weight: 1 }
    }

    pub fn with_weight(mut self, weight: u32) -> Self {
        self.weight = weight.max(1);
        self
    }
}

/// A named set of backends sharing a load-balancing policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpstreamGroup {
    pub name: String,
    pub load_balancing: LoadBalancing,
    pub protocol: Protocol,
    pub items: Vec<BackendItem>,
}

impl UpstreamGroup {
    pub fn new(
        name: impl Into<String>,
        load_balancing: LoadBalancing,
        protocol: Protocol,
        items: Vec<BackendItem>,
    ) -> Self {
        Self {
            name: name.into(),
            load_balancing,
            protocol,
            items,
        }
    }

    /// Order-insensitive view of the backend addresses.
    pub fn addresses(&self) -> BTreeSet<&BackendAddress> {
        self.items.iter().map(|item| &item.address).collect()
    }

    pub fn contains(&self, address: &BackendAddress) -> bool {
        self.items.iter().any(|item| &item.address == address)
    }

    /// Two groups are equivalent when they share a protocol and their
    /// address sets are identical.
    pub fn is_equivalent(&self, other: &UpstreamGroup) -> bool {
        self.protocol == other.protocol && self.addresses() == other.addresses()
    }

    /// Rewrite item ports against this group's protocol default, dropping
    /// addresses that become repeats.
    pub(crate) fn normalize_ports(&mut self) {
        self.items = dedup_items(std::mem::take(&mut self.items), self.protocol);
    }
}

/// Normalize ports and drop repeated addresses, keeping the first occurrence.
pub(crate) fn dedup_items(items: Vec<BackendItem>, protocol: Protocol) -> Vec<BackendItem> {
    let mut seen = BTreeSet::new();
    items
        .into_iter()
        .map(|item| BackendItem {
            address: item.address.normalized(protocol),
            weight: item.weight.max(1),
        })
        .filter(|item| seen.insert(item.address.clone()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_backend_address() {
        assert_eq!(
            BackendAddress::parse("10.0.0.1"),
            Some(BackendAddress::new("10.0.0.1", None))
        );
        assert_eq!(
            BackendAddress::parse("svc.local:8080"),
            Some(BackendAddress::new("svc.local", Some(8080)))
        );
        assert_eq!(
            BackendAddress::parse("[::1]:9000"),
            Some(BackendAddress::new("::1", Some(9000)))
        );
        assert_eq!(BackendAddress::parse("10.0.0.1:http"), None);
        assert_eq!(BackendAddress::parse("10.0.0.1:70000"), None);
        assert_eq!(BackendAddress::parse(":80"), None);
    }

    #[test]
    fn test_address_display() {
        assert_eq!(BackendAddress::new("10.0.0.1", Some(81)).to_string(), "10.0.0.1:81");
        assert_eq!(BackendAddress::new("::1", None).to_string(), "[::1]");
    }

    #[test]
    fn test_default_port_normalization() {
        let plain = BackendAddress::new("a", Some(80)).normalized(Protocol::Plain);
        assert_eq!(plain.port, None);

        // 80 is not the default for encrypted backends
        let encrypted = BackendAddress::new("a", Some(80)).normalized(Protocol::Encrypted);
        assert_eq!(encrypted.port, Some(80));
    }

    #[test]
    fn test_equivalence_ignores_order_and_weight() {
        let a = UpstreamGroup::new(
            "a",
            LoadBalancing::RoundRobin,
            Protocol::Plain,
            vec![
                BackendItem::new(BackendAddress::new("10.0.0.1", None)),
                BackendItem::new(BackendAddress::new("10.0.0.2", Some(81))).with_weight(3),
            ],
        );
        let b = UpstreamGroup::new(
            "b",
            LoadBalancing::LeastConnections,
            Protocol::Plain,
            vec![
                BackendItem::new(BackendAddress::new("10.0.0.2", Some(81))),
                BackendItem::new(BackendAddress::new("10.0.0.1", None)),
            ],
        );
        assert!(a.is_equivalent(&b));
    }

    #[test]
    fn test_equivalence_requires_same_protocol() {
        let plain = UpstreamGroup::new(
            "plain",
            LoadBalancing::RoundRobin,
            Protocol::Plain,
            vec![BackendItem::new(BackendAddress::new("x", Some(80)).normalized(Protocol::Plain))],
        );
        let encrypted = UpstreamGroup::new(
            "encrypted",
            LoadBalancing::RoundRobin,
            Protocol::Encrypted,
            vec![BackendItem::new(BackendAddress::new("x", Some(443)).normalized(Protocol::Encrypted))],
        );
        assert_eq!(plain.addresses(), encrypted.addresses());
        assert!(!plain.is_equivalent(&encrypted));
    }

    #[test]
    fn test_dedup_items_keeps_first() {
        let items = vec![
            BackendItem::new(BackendAddress::new("a", Some(80))).with_weight(2),
            BackendItem::new(BackendAddress::new("a", None)),
            BackendItem::new(BackendAddress::new("b", None)),
        ];
        let deduped = dedup_items(items, Protocol::Plain);
        assert_eq!(deduped.len(), 2);
        assert_eq!(deduped[0].weight, 2);
        assert_eq!(deduped[0].address.port, None);
    }

    #[test]
    fn test_load_balancing_directives() {
        assert_eq!(LoadBalancing::from_directive("least_conn"), LoadBalancing::LeastConnections);
        assert_eq!(LoadBalancing::from_directive("ip_hash"), LoadBalancing::AddressHash);
        assert_eq!(LoadBalancing::from_directive("keepalive"), LoadBalancing::RoundRobin);
        assert_eq!(LoadBalancing::RoundRobin.directive(), None);
        assert_eq!("least-connections".parse::<LoadBalancing>(), Ok(LoadBalancing::LeastConnections));
    }
}
