//! Route registration and removal.
//!
//! # Responsibilities
//! - Bind a location to an upstream, reusing an equivalent group
//! - Union-merge new backends into an existing binding
//! - Remove single backends with copy-on-write for shared groups
//! - Cascade-delete every location of an upstream that became empty
//!
//! # Design Decisions
//! - Validation happens before the first write, so a failed item leaves
//!   the forward maps untouched
//! - A group shared by several locations is never edited in place; the
//!   changed location is rewired to a clone (or to an equivalent group)
//! - Indices are consulted at the start of an operation and rebuilt at its end

use std::collections::BTreeSet;

use crate::table::host::{Directive, HostKey, UpstreamRef};
use crate::table::route_table::RouteTable;
use crate::table::types::{RouteAction, RouteOptions, RouteWrite, TableError, TableResult};
use crate::table::upstream::{dedup_items, BackendAddress, BackendItem, Protocol, UpstreamGroup};

impl RouteTable {
    /// Route `path` on a host to a set of backends.
    ///
    /// A new location is bound to an equivalent existing upstream or a
    /// fresh one. An existing location keeps its upstream and gains the
    /// backends it lacks, provided protocol and source root match.
    pub fn register_route(
        &mut self,
        host_key: &HostKey,
        path: &str,
        items: Vec<BackendItem>,
        options: &RouteOptions,
    ) -> TableResult<RouteWrite> {
        let result = self.register_route_unrepaired(host_key, path, items, options);
        self.repair_indices();
        result
    }

    fn register_route_unrepaired(
        &mut self,
        host_key: &HostKey,
        path: &str,
        items: Vec<BackendItem>,
        options: &RouteOptions,
    ) -> TableResult<RouteWrite> {
        let path = normalize_path(path)?;
        let Some(host) = self.hosts.get(host_key) else {
            return Err(TableError::UnknownHost(host_key.clone()));
        };
        let items = dedup_items(items, options.protocol);
        if items.is_empty() {
            return Err(TableError::EmptyBackendSet { path });
        }
        let source_root = options.source_root.as_deref().and_then(normalize_root);

        let existing = host
            .locations
            .get(&path)
            .and_then(|location| location.upstream.clone())
            .filter(|reference| self.upstreams.contains_key(&reference.name));

        let Some(current) = existing else {
            let addresses: BTreeSet<&BackendAddress> = items.iter().map(|item| &item.address).collect();
            let name = match self.find_equivalent(&addresses, options.protocol, None) {
                Some(name) => name,
                None => {
                    let name = self.allocate_upstream_name();
                    let group = UpstreamGroup::new(name.clone(), options.load_balancing, options.protocol, items);
                    self.upstreams.insert(name.clone(), group);
                    name
                }
            };

            let reference = UpstreamRef {
                name: name.clone(),
                protocol: options.protocol,
                source_root,
            };
            self.bind_location(host_key, &path, reference, &options.proxy_directives);
            tracing::debug!(host = %host_key, path = %path, upstream = %name, "Route created");
            return Ok(RouteWrite {
                path,
                upstream: name,
                action: RouteAction::Created,
            });
        };

        if current.protocol != options.protocol {
            return Err(TableError::RouteConflict {
                path,
                reason: format!(
                    "bound with protocol {}, requested {}",
                    current.protocol, options.protocol
                ),
            });
        }
        if current.source_root != source_root {
            return Err(TableError::RouteConflict {
                path,
                reason: format!(
                    "bound with source root {:?}, requested {:?}",
                    current.source_root, source_root
                ),
            });
        }

        let missing: Vec<BackendItem> = items
            .into_iter()
            .filter(|item| {
                !self
                    .upstream_index
                    .get(&item.address)
                    .is_some_and(|users| users.contains_key(&current.name))
            })
            .collect();

        self.merge_location_directives(host_key, &path, &options.proxy_directives);

        if missing.is_empty() {
            return Ok(RouteWrite {
                path,
                upstream: current.name,
                action: RouteAction::Unchanged,
            });
        }

        let mut merged = self.upstreams[&current.name].items.clone();
        merged.extend(missing);
        let name = self.rebind_location(host_key, &path, &current.name, merged);
        tracing::debug!(host = %host_key, path = %path, upstream = %name, "Route merged");
        Ok(RouteWrite {
            path,
            upstream: name,
            action: RouteAction::Merged,
        })
    }

    /// Remove a route, or one backend from it.
    ///
    /// Without `backend` the location is deleted outright. With it, the
    /// backend leaves the location's upstream; if that empties the
    /// upstream, every location bound to it is deleted too.
    ///
    /// Returns `false` when nothing matched.
    pub fn remove_route(
        &mut self,
        host_key: &HostKey,
        path: &str,
        backend: Option<&BackendAddress>,
    ) -> TableResult<bool> {
        let result = self.remove_route_unrepaired(host_key, path, backend);
        self.repair_indices();
        result
    }

    fn remove_route_unrepaired(
        &mut self,
        host_key: &HostKey,
        path: &str,
        backend: Option<&BackendAddress>,
    ) -> TableResult<bool> {
        let Some(location) = self.hosts.get(host_key).and_then(|host| host.locations.get(path)) else {
            return Ok(false);
        };
        let reference = location.upstream.clone();

        let Some(address) = backend else {
            if let Some(host) = self.hosts.get_mut(host_key) {
                host.locations.remove(path);
            }
            if let Some(reference) = reference {
                self.release_location(host_key, path, &reference.name);
            }
            tracing::debug!(host = %host_key, path = %path, "Route removed");
            return Ok(true);
        };

        let Some(reference) = reference else {
            return Ok(false);
        };
        let Some(group) = self.upstreams.get(&reference.name) else {
            return Ok(false);
        };
        let address = address.clone().normalized(reference.protocol);
        if !group.contains(&address) {
            return Ok(false);
        }

        let remaining: Vec<BackendItem> = group
            .items
            .iter()
            .filter(|item| item.address != address)
            .cloned()
            .collect();

        if remaining.is_empty() {
            let removed = self.cascade_delete_upstream(&reference.name);
            tracing::info!(
                upstream = %reference.name,
                locations = removed,
                backend = %address,
                "Last backend removed, upstream deleted"
            );
        } else {
            self.rebind_location(host_key, path, &reference.name, remaining);
        }
        Ok(true)
    }

    /// Name of an existing group of `protocol` whose address set equals `addresses`.
    pub(crate) fn find_equivalent(
        &self,
        addresses: &BTreeSet<&BackendAddress>,
        protocol: Protocol,
        exclude: Option<&str>,
    ) -> Option<String> {
        let first = addresses.iter().next()?;
        let candidates = self.upstream_index.get(*first)?;
        candidates
            .keys()
            .filter(|name| Some(name.as_str()) != exclude)
            .find(|name| {
                self.upstreams
                    .get(name.as_str())
                    .is_some_and(|group| group.protocol == protocol && group.addresses() == *addresses)
            })
            .cloned()
    }

    /// Give one location a new item set without disturbing other referrers.
    ///
    /// Returns the name of the upstream the location ends up bound to.
    fn rebind_location(
        &mut self,
        host_key: &HostKey,
        path: &str,
        current: &str,
        items: Vec<BackendItem>,
    ) -> String {
        let shared = self.referrer_count(current) > 1;
        let protocol = self.upstreams[current].protocol;
        let addresses: BTreeSet<&BackendAddress> = items.iter().map(|item| &item.address).collect();

        if let Some(existing) = self.find_equivalent(&addresses, protocol, Some(current)) {
            self.point_location(host_key, path, &existing);
            if !shared {
                self.upstreams.remove(current);
            }
            return existing;
        }

        if shared {
            let name = self.allocate_upstream_name();
            let mut clone = self.upstreams[current].clone();
            clone.name = name.clone();
            clone.items = items;
            self.upstreams.insert(name.clone(), clone);
            self.point_location(host_key, path, &name);
            tracing::debug!(from = %current, to = %name, path = %path, "Shared upstream split");
            return name;
        }

        if let Some(group) = self.upstreams.get_mut(current) {
            group.items = items;
        }
        current.to_string()
    }

    /// Delete an upstream and every location bound to it, across all hosts.
    fn cascade_delete_upstream(&mut self, name: &str) -> usize {
        self.upstreams.remove(name);
        let mut removed = 0;
        for (key, host) in &mut self.hosts {
            host.locations.retain(|path, location| {
                let bound = location
                    .upstream
                    .as_ref()
                    .is_some_and(|reference| reference.name == name);
                if bound {
                    tracing::debug!(host = %key, path = %path, upstream = %name, "Cascade-deleting location");
                    removed += 1;
                }
                !bound
            });
        }
        self.host_index.remove(name);
        removed
    }

    fn bind_location(&mut self, host_key: &HostKey, path: &str, reference: UpstreamRef, directives: &[Directive]) {
        if let Some(host) = self.hosts.get_mut(host_key) {
            let location = host.locations.entry(path.to_string()).or_default();
            location.upstream = Some(reference);
            append_missing(&mut location.proxy_directives, directives);
        }
    }

    fn point_location(&mut self, host_key: &HostKey, path: &str, upstream: &str) {
        let reference = self
            .hosts
            .get_mut(host_key)
            .and_then(|host| host.locations.get_mut(path))
            .and_then(|location| location.upstream.as_mut());
        if let Some(reference) = reference {
            reference.name = upstream.to_string();
        }
    }

    fn merge_location_directives(&mut self, host_key: &HostKey, path: &str, directives: &[Directive]) {
        let location = self
            .hosts
            .get_mut(host_key)
            .and_then(|host| host.locations.get_mut(path));
        if let Some(location) = location {
            append_missing(&mut location.proxy_directives, directives);
        }
    }
}

fn append_missing(target: &mut Vec<Directive>, directives: &[Directive]) {
    for directive in directives {
        if !target.contains(directive) {
            target.push(directive.clone());
        }
    }
}

fn normalize_path(path: &str) -> TableResult<String> {
    let path = path.trim();
    if !path.starts_with('/') || path.contains(char::is_whitespace) {
        return Err(TableError::InvalidPath(path.to_string()));
    }
    Ok(path.to_string())
}

/// Source roots are absolute; an empty root means none.
fn normalize_root(root: &str) -> Option<String> {
    let root = root.trim();
    if root.is_empty() {
        None
    } else if root.starts_with('/') {
        Some(root.to_string())
    } else {
        Some(format!("/{}", root))
    }
}
