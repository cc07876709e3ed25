//! Service identities and provider descriptors consumed from the registry.
//!
//! # Responsibilities
//! - Derive the versioned and default route paths of a service
//! - Turn provider descriptors into backend items for one upstream
//! - Describe this proxy's own listeners as providers, for publication
//!
//! # Design Decisions
//! - Paths are slash-collapsed: empty segments vanish, `/` is the floor
//! - One upstream has one protocol and root; the first provider decides,
//!   providers disagreeing with it are logged and skipped

use serde::{Deserialize, Serialize};

use crate::table::host::VirtualHost;
use crate::table::upstream::{BackendAddress, BackendItem, Protocol};

/// Who a service is, independent of where it runs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceIdentity {
    pub application: String,
    pub module: String,
    pub name: String,
    #[serde(default)]
    pub version: Option<String>,
}

impl ServiceIdentity {
    pub fn new(
        application: impl Into<String>,
        module: impl Into<String>,
        name: impl Into<String>,
        version: Option<&str>,
    ) -> Self {
        Self {
            application: application.into(),
            module: module.into(),
            name: name.into(),
            version: version.map(String::from),
        }
    }

    /// `/prefix/application/module/name[/version]`
    pub fn route_path(&self, prefix: &str) -> String {
        collapse_slashes(&[
            prefix,
            self.application.as_str(),
            self.module.as_str(),
            self.name.as_str(),
            self.version.as_deref().unwrap_or(""),
        ])
    }

    /// `/prefix/application/module/name`
    pub fn default_path(&self, prefix: &str) -> String {
        collapse_slashes(&[prefix, self.application.as_str(), self.module.as_str(), self.name.as_str()])
    }
}

fn collapse_slashes(segments: &[&str]) -> String {
    let parts: Vec<&str> = segments
        .iter()
        .flat_map(|segment| segment.split('/'))
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .collect();
    format!("/{}", parts.join("/"))
}

/// Where one instance of a service can be reached.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderDescriptor {
    #[serde(default)]
    pub protocol: Protocol,
    pub host: String,
    #[serde(default)]
    pub port: Option<u16>,
    #[serde(default)]
    pub driver: String,
    #[serde(default)]
    pub root: Option<String>,
    #[serde(default)]
    pub weight: Option<u32>,
}

impl ProviderDescriptor {
    pub fn new(protocol: Protocol, host: impl Into<String>, port: Option<u16>) -> Self {
        Self {
            protocol,
            host: host.into(),
            port,
            driver: String::new(),
            root: None,
            weight: None,
        }
    }

    fn backend_item(&self) -> BackendItem {
        BackendItem::new(BackendAddress::new(self.host.clone(), self.port)).with_weight(self.weight.unwrap_or(1))
    }
}

/// A service and the providers currently serving it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceEntry {
    pub identity: ServiceIdentity,
    pub providers: Vec<ProviderDescriptor>,
}

/// Outcome of routing one service through this proxy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RouteRegistration {
    pub identity: ServiceIdentity,
    /// Paths written, versioned path first.
    pub paths: Vec<String>,
    /// This proxy, described as a provider of the service.
    pub providers: Vec<ProviderDescriptor>,
}

/// Backends of one upstream, with the protocol and root they share.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ProviderBackends {
    pub protocol: Protocol,
    pub root: Option<String>,
    pub items: Vec<BackendItem>,
}

/// `None` when there are no providers.
pub(crate) fn provider_backends(identity: &ServiceIdentity, providers: &[ProviderDescriptor]) -> Option<ProviderBackends> {
    let first = providers.first()?;
    let mut backends = ProviderBackends {
        protocol: first.protocol,
        root: first.root.clone(),
        items: Vec::with_capacity(providers.len()),
    };

    for provider in providers {
        if provider.protocol != backends.protocol || provider.root != backends.root {
            tracing::warn!(
                service = %identity.name,
                host = %provider.host,
                "Skipping provider whose protocol or root differs from the first provider"
            );
            continue;
        }
        backends.items.push(provider.backend_item());
    }
    Some(backends)
}

/// This host's listeners as provider descriptors rooted at `path`.
pub fn host_descriptors(host: &VirtualHost, path: &str) -> Vec<ProviderDescriptor> {
    host.interfaces
        .iter()
        .map(|interface| {
            let protocol = interface.protocol();
            ProviderDescriptor {
                protocol,
                host: host.primary_hostname().to_string(),
                port: (interface.port != protocol.default_port()).then_some(interface.port),
                driver: "proxy".to_string(),
                root: Some(path.to_string()),
                weight: None,
            }
        })
        .collect()
}
