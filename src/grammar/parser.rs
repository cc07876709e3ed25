//! Configuration text → route table.
//!
//! # Responsibilities
//! - Collect `upstream NAME { ... }` and `server { ... }` blocks at any depth
//! - Reconstruct hosts, locations and upstream bindings
//! - Skip (never fail on) fragments the model cannot hold
//!
//! # Design Decisions
//! - Best-effort: a hand-edited file yields whatever it validly describes
//! - First occurrence wins for duplicate upstream names, host keys and paths
//! - An upstream takes the protocol of the first `proxy_pass` naming it
//! - Upstreams without a usable `server` line are dropped; equivalent ones
//!   are folded into the first and their `proxy_pass` references rewired

use std::collections::{BTreeMap, HashMap};

use crate::grammar::scanner::{scan, Node};
use crate::table::host::{Directive, HostKey, Interface, LocationEntry, UpstreamRef, VirtualHost};
use crate::table::policy::ListenerPolicy;
use crate::table::route_table::RouteTable;
use crate::table::upstream::{BackendAddress, BackendItem, LoadBalancing, Protocol, UpstreamGroup};

/// Parse configuration text into a route table.
pub fn parse(text: &str, policy: &ListenerPolicy) -> RouteTable {
    let nodes = scan(text);

    let mut upstream_blocks = Vec::new();
    let mut server_blocks = Vec::new();
    collect_blocks(&nodes, &mut upstream_blocks, &mut server_blocks);

    let mut upstreams = BTreeMap::new();
    let mut order = Vec::new();
    for (name, children) in upstream_blocks {
        if upstreams.contains_key(name) {
            tracing::debug!(upstream = %name, "Skipping duplicate upstream block");
            continue;
        }
        let group = parse_upstream(name, children);
        if group.items.is_empty() {
            tracing::debug!(upstream = %name, "Skipping upstream block without servers");
            continue;
        }
        order.push(name.to_string());
        upstreams.insert(name.to_string(), group);
    }

    let mut hosts = BTreeMap::new();
    let mut claimed: HashMap<String, Protocol> = HashMap::new();
    for children in server_blocks {
        if let Some(host) = parse_server(children, policy, &upstreams, &hosts) {
            for reference in host.locations.values().filter_map(|l| l.upstream.as_ref()) {
                claimed.entry(reference.name.clone()).or_insert(reference.protocol);
            }
            hosts.insert(host.key(), host);
        }
    }

    for (name, group) in upstreams.iter_mut() {
        if let Some(protocol) = claimed.get(name) {
            group.protocol = *protocol;
        }
        group.normalize_ports();
    }
    fold_equivalent(&mut upstreams, &order, &mut hosts);

    RouteTable::from_parts(upstreams, hosts)
}

/// Merge each upstream into the first equivalent one, in file order.
fn fold_equivalent(
    upstreams: &mut BTreeMap<String, UpstreamGroup>,
    order: &[String],
    hosts: &mut BTreeMap<HostKey, VirtualHost>,
) {
    let mut kept: Vec<&String> = Vec::new();
    let mut aliases: HashMap<String, String> = HashMap::new();
    for name in order {
        let Some(group) = upstreams.get(name) else {
            continue;
        };
        let target = kept
            .iter()
            .find(|first| upstreams.get(first.as_str()).is_some_and(|first| first.is_equivalent(group)))
            .copied();
        match target {
            Some(first) => {
                tracing::debug!(upstream = %name, into = %first, "Folding equivalent upstream block");
                aliases.insert(name.clone(), first.clone());
            }
            None => kept.push(name),
        }
    }
    if aliases.is_empty() {
        return;
    }

    for alias in aliases.keys() {
        upstreams.remove(alias);
    }
    for host in hosts.values_mut() {
        for location in host.locations.values_mut() {
            if let Some(reference) = location.upstream.as_mut() {
                if let Some(target) = aliases.get(&reference.name) {
                    reference.name = target.clone();
                }
            }
        }
    }
}

type Children<'a> = &'a [Node];

fn collect_blocks<'a>(
    nodes: &'a [Node],
    upstreams: &mut Vec<(&'a str, Children<'a>)>,
    servers: &mut Vec<Children<'a>>,
) {
    for node in nodes {
        let Node::Block { name, args, children } = node else {
            continue;
        };
        match name.as_str() {
            "upstream" => match args.first() {
                Some(upstream) => upstreams.push((upstream.as_str(), children)),
                None => tracing::debug!("Skipping upstream block without a name"),
            },
            "server" => servers.push(children),
            _ => collect_blocks(children, upstreams, servers),
        }
    }
}

fn parse_upstream(name: &str, children: &[Node]) -> UpstreamGroup {
    let mut load_balancing = None;
    let mut items = Vec::new();

    for node in children {
        let Node::Directive { name: directive, args } = node else {
            continue;
        };
        if directive == "server" {
            match parse_server_line(args) {
                Some(item) => items.push(item),
                None => tracing::debug!(upstream = %name, line = ?args, "Skipping malformed server line"),
            }
        } else if args.is_empty() && load_balancing.is_none() {
            load_balancing = Some(LoadBalancing::from_directive(directive));
        }
    }

    UpstreamGroup::new(name, load_balancing.unwrap_or_default(), Protocol::Plain, items)
}

/// `HOST[:PORT] [weight=N] [other params...]`
fn parse_server_line(args: &[String]) -> Option<BackendItem> {
    let (address, params) = args.split_first()?;
    let address = BackendAddress::parse(address)?;

    let mut weight = 1;
    for param in params {
        if let Some(value) = param.strip_prefix("weight=") {
            weight = value.parse::<u32>().ok().filter(|w| *w >= 1)?;
        }
    }
    Some(BackendItem::new(address).with_weight(weight))
}

fn parse_server(
    children: &[Node],
    policy: &ListenerPolicy,
    upstreams: &BTreeMap<String, UpstreamGroup>,
    hosts: &BTreeMap<HostKey, VirtualHost>,
) -> Option<VirtualHost> {
    let mut host = VirtualHost::new(String::new(), Vec::new());
    let mut location_blocks = Vec::new();

    for node in children {
        match node {
            Node::Directive { name, args } => match name.as_str() {
                "listen" => match Interface::parse_listen(args) {
                    Some(interface) => host.interfaces.push(interface),
                    None => tracing::debug!(line = ?args, "Skipping malformed listen line"),
                },
                "server_name" => host.hostname = args.join(" "),
                "ssl_certificate" => host.certificate = Some(args.join(" ")),
                "ssl_certificate_key" => host.certificate_key = Some(args.join(" ")),
                _ => host.set_extra_directive(name.as_str(), args.join(" ")),
            },
            Node::Block { name, args, children } if name == "location" => {
                location_blocks.push((args.join(" "), children));
            }
            Node::Block { name, .. } => {
                tracing::debug!(block = %name, "Skipping unsupported block inside server");
            }
        }
    }

    if host.hostname.is_empty() || host.interfaces.is_empty() {
        tracing::debug!(hostname = %host.hostname, "Skipping server block without hostname or listen lines");
        return None;
    }
    let key = host.key();
    if hosts.contains_key(&key) {
        tracing::debug!(host = %key, "Skipping duplicate server block");
        return None;
    }
    if host.is_reserved() {
        tracing::debug!(host = %key, "Skipping reserved hostname");
        return None;
    }
    if let Err(reason) = policy.check_host(&host) {
        tracing::debug!(host = %key, reason = %reason, "Skipping server block violating listener policy");
        return None;
    }

    for (path, children) in location_blocks {
        if path.is_empty() || host.locations.contains_key(&path) {
            tracing::debug!(host = %key, path = %path, "Skipping unnamed or duplicate location");
            continue;
        }
        let location = parse_location(&path, children, upstreams);
        host.locations.insert(path, location);
    }

    Some(host)
}

fn parse_location(path: &str, children: &[Node], upstreams: &BTreeMap<String, UpstreamGroup>) -> LocationEntry {
    let mut location = LocationEntry::default();

    for node in children {
        let Node::Directive { name, args } = node else {
            tracing::debug!(path = %path, "Skipping nested block inside location");
            continue;
        };
        if name == "proxy_pass" && location.upstream.is_none() {
            let target = args.join(" ");
            match parse_proxy_pass(&target) {
                Some(reference) if upstreams.contains_key(&reference.name) => {
                    location.upstream = Some(reference);
                }
                _ => tracing::debug!(path = %path, target = %target, "Dropping proxy_pass to unknown upstream"),
            }
            continue;
        }
        location.proxy_directives.push(Directive::new(name.as_str(), args.join(" ")));
    }
    location
}

/// `PROTOCOL://UPSTREAM[/ROOT]`
pub(crate) fn parse_proxy_pass(target: &str) -> Option<UpstreamRef> {
    let (scheme, rest) = target.split_once("://")?;
    let protocol = Protocol::from_scheme(scheme)?;
    let (name, root) = match rest.find('/') {
        Some(i) => (&rest[..i], Some(rest[i..].to_string())),
        None => (rest, None),
    };
    if name.is_empty() {
        return None;
    }
    Some(UpstreamRef {
        name: name.to_string(),
        protocol,
        source_root: root,
    })
}
