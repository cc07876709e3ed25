//! Virtual hosts, their listen interfaces and locations.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::table::upstream::Protocol;

/// Address used when a listen line names only a port.
pub const DEFAULT_LISTEN_ADDRESS: &str = "0.0.0.0";

/// Hostnames the engine never manages.
const RESERVED_HOSTNAMES: &[&str] = &["localhost"];

/// One `listen` line of a virtual host.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Interface {
    pub address: Option<String>,
    pub port: u16,
    pub encrypted: bool,
    /// Listen parameters other than `ssl` (`default_server`, `http2`, ...),
    /// carried verbatim.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub flags: Vec<String>,
}

impl Interface {
    pub fn plain(port: u16) -> Self {
        Self {
            address: None,
            port,
            encrypted: false,
            flags: Vec::new(),
        }
    }

    pub fn encrypted(port: u16) -> Self {
        Self {
            address: None,
            port,
            encrypted: true,
            flags: Vec::new(),
        }
    }

    pub fn with_address(mut self, address: impl Into<String>) -> Self {
        self.address = Some(address.into());
        self
    }

    pub fn with_flag(mut self, flag: impl Into<String>) -> Self {
        self.flags.push(flag.into());
        self
    }

    pub fn effective_address(&self) -> &str {
        self.address.as_deref().unwrap_or(DEFAULT_LISTEN_ADDRESS)
    }

    pub fn protocol(&self) -> Protocol {
        if self.encrypted {
            Protocol::Encrypted
        } else {
            Protocol::Plain
        }
    }

    /// Parse the arguments of a `listen` directive: `[addr:]port [ssl] ...`.
    ///
    /// Flags other than `ssl` are kept in `flags`, in order.
    pub fn parse_listen(args: &[String]) -> Option<Self> {
        let (first, params) = args.split_first()?;
        let encrypted = params.iter().any(|param| param == "ssl");
        let flags = params.iter().filter(|param| *param != "ssl").cloned().collect();

        let (address, port) = if let Some(rest) = first.strip_prefix('[') {
            let (host, tail) = rest.split_once("]:")?;
            (Some(format!("[{}]", host)), tail)
        } else {
            match first.rsplit_once(':') {
                Some((host, port)) => (Some(host.to_string()), port),
                None => (None, first.as_str()),
            }
        };

        Some(Self {
            address,
            port: port.parse().ok()?,
            encrypted,
            flags,
        })
    }

    /// Arguments rendered after `listen`.
    pub fn listen_args(&self) -> String {
        let mut out = match &self.address {
            Some(address) => format!("{}:{}", address, self.port),
            None => self.port.to_string(),
        };
        if self.encrypted {
            out.push_str(" ssl");
        }
        for flag in &self.flags {
            out.push(' ');
            out.push_str(flag);
        }
        out
    }

    fn key_fragment(&self) -> String {
        format!(
            "{}:{}:{}",
            self.effective_address(),
            self.port,
            if self.encrypted { "ssl" } else { "plain" }
        )
    }
}

/// Identity of a virtual host: sorted interface tuples plus hostname.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct HostKey(String);

impl HostKey {
    pub fn compute(interfaces: &[Interface], hostname: &str) -> Self {
        let mut fragments: Vec<String> = interfaces.iter().map(Interface::key_fragment).collect();
        fragments.sort();
        fragments.dedup();
        Self(format!("{}/{}", fragments.join(","), hostname))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for HostKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for HostKey {
    fn from(raw: String) -> Self {
        Self(raw)
    }
}

impl FromStr for HostKey {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(s.to_string()))
    }
}

/// An opaque `name value` line preserved verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Directive {
    pub name: String,
    pub value: String,
}

impl Directive {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

impl fmt::Display for Directive {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.value.is_empty() {
            write!(f, "{};", self.name)
        } else {
            write!(f, "{} {};", self.name, self.value)
        }
    }
}

/// A location's binding to an upstream group.
///
/// Protocol and source root belong to the binding, so two locations can
/// share one group while forwarding to different roots.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpstreamRef {
    pub name: String,
    pub protocol: Protocol,
    pub source_root: Option<String>,
}

impl UpstreamRef {
    /// Target rendered after `proxy_pass`.
    pub fn proxy_pass(&self) -> String {
        format!(
            "{}://{}{}",
            self.protocol.scheme(),
            self.name,
            self.source_root.as_deref().unwrap_or("")
        )
    }
}

/// One `location PATH { ... }` block.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocationEntry {
    pub upstream: Option<UpstreamRef>,
    pub proxy_directives: Vec<Directive>,
}

/// A routable destination: listen interfaces plus hostname.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VirtualHost {
    pub interfaces: Vec<Interface>,
    pub hostname: String,
    pub certificate: Option<String>,
    pub certificate_key: Option<String>,
    /// Ordered name -> value map of server-level lines the engine does not model.
    pub extra_directives: Vec<Directive>,
    pub locations: BTreeMap<String, LocationEntry>,
}

impl VirtualHost {
    pub fn new(hostname: impl Into<String>, interfaces: Vec<Interface>) -> Self {
        Self {
            interfaces,
            hostname: hostname.into(),
            certificate: None,
            certificate_key: None,
            extra_directives: Vec::new(),
            locations: BTreeMap::new(),
        }
    }

    pub fn key(&self) -> HostKey {
        HostKey::compute(&self.interfaces, &self.hostname)
    }

    /// First name of a possibly multi-name `server_name`.
    pub fn primary_hostname(&self) -> &str {
        self.hostname.split_whitespace().next().unwrap_or("")
    }

    pub fn is_reserved(&self) -> bool {
        RESERVED_HOSTNAMES
            .iter()
            .any(|reserved| self.primary_hostname().eq_ignore_ascii_case(reserved))
    }

    /// Set an extra directive, replacing the value of an existing name in place.
    pub fn set_extra_directive(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        let value = value.into();
        match self.extra_directives.iter_mut().find(|d| d.name == name) {
            Some(existing) => existing.value = value,
            None => self.extra_directives.push(Directive { name, value }),
        }
    }

    /// Locations in emission order: longest path first, then descending.
    pub fn ordered_locations(&self) -> Vec<(&String, &LocationEntry)> {
        let mut locations: Vec<_> = self.locations.iter().collect();
        locations.sort_by(|(a, _), (b, _)| b.len().cmp(&a.len()).then_with(|| b.cmp(a)));
        locations
    }
}
