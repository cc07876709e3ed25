//! Route table → configuration text.
//!
//! Output is deterministic: upstreams by name, hosts by key, locations
//! longest-first. Parsing the output and serializing again yields the same
//! bytes.

use std::fmt::Write as _;

use crate::grammar::GrammarError;
use crate::table::host::VirtualHost;
use crate::table::route_table::RouteTable;
use crate::table::upstream::UpstreamGroup;

const HEADER: &str = "# Managed by proxy-control. Manual edits are preserved only where modelled.\n";
const INDENT: &str = "    ";

/// Render the whole table. An empty table has no valid rendering.
pub fn serialize(table: &RouteTable) -> Result<String, GrammarError> {
    if table.is_empty() {
        return Err(GrammarError::EmptyTable);
    }

    let mut out = String::from(HEADER);
    for group in table.upstreams().values() {
        out.push('\n');
        write_upstream(&mut out, group);
    }
    for host in table.virtual_hosts().values() {
        out.push('\n');
        write_server(&mut out, host);
    }
    Ok(out)
}

fn write_upstream(out: &mut String, group: &UpstreamGroup) {
    let _ = writeln!(out, "upstream {} {{", group.name);
    if let Some(directive) = group.load_balancing.directive() {
        let _ = writeln!(out, "{INDENT}{directive};");
    }
    for item in &group.items {
        if item.weight == 1 {
            let _ = writeln!(out, "{INDENT}server {};", item.address);
        } else {
            let _ = writeln!(out, "{INDENT}server {} weight={};", item.address, item.weight);
        }
    }
    out.push_str("}\n");
}

fn write_server(out: &mut String, host: &VirtualHost) {
    out.push_str("server {\n");
    for interface in &host.interfaces {
        let _ = writeln!(out, "{INDENT}listen {};", interface.listen_args());
    }
    let _ = writeln!(out, "{INDENT}server_name {};", host.hostname);
    if let Some(certificate) = &host.certificate {
        let _ = writeln!(out, "{INDENT}ssl_certificate {certificate};");
    }
    if let Some(key) = &host.certificate_key {
        let _ = writeln!(out, "{INDENT}ssl_certificate_key {key};");
    }
    for directive in &host.extra_directives {
        let _ = writeln!(out, "{INDENT}{directive}");
    }

    for (path, location) in host.ordered_locations() {
        let _ = writeln!(out, "\n{INDENT}location {path} {{");
        if let Some(reference) = &location.upstream {
            let _ = writeln!(out, "{INDENT}{INDENT}proxy_pass {};", reference.proxy_pass());
        }
        for directive in &location.proxy_directives {
            let _ = writeln!(out, "{INDENT}{INDENT}{directive}");
        }
        let _ = writeln!(out, "{INDENT}}}");
    }
    out.push_str("}\n");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grammar::parse;
    use crate::table::host::{Directive, Interface};
    use crate::table::policy::ListenerPolicy;
    use crate::table::types::RouteOptions;
    use crate::table::upstream::{BackendAddress, BackendItem, LoadBalancing};

    fn sample_table() -> RouteTable {
        let policy = ListenerPolicy::default();
        let mut table = RouteTable::new();
        let mut host = VirtualHost::new("a.example", vec![Interface::plain(80), Interface::encrypted(443)]);
        host.certificate = Some("/etc/certs/a.example.crt".into());
        host.certificate_key = Some("/etc/certs/a.example.key".into());
        host.set_extra_directive("client_max_body_size", "8m");
        let key = host.key();
        table.register_virtual_host(host, &policy).unwrap();

        let options = RouteOptions {
            load_balancing: LoadBalancing::LeastConnections,
            source_root: Some("/api".into()),
            proxy_directives: vec![Directive::new("proxy_set_header", "Host $host")],
            ..RouteOptions::default()
        };
        let items = vec![
            BackendItem::new(BackendAddress::new("10.0.0.1", Some(8080))).with_weight(3),
            BackendItem::new(BackendAddress::new("10.0.0.2", None)),
        ];
        table.register_route(&key, "/api", items, &options).unwrap();
        table
            .register_route(
                &key,
                "/",
                vec![BackendItem::new(BackendAddress::new("10.0.0.9", None))],
                &RouteOptions::default(),
            )
            .unwrap();
        table
    }

    #[test]
    fn test_empty_table_is_rejected() {
        assert!(matches!(serialize(&RouteTable::new()), Err(GrammarError::EmptyTable)));
    }

    #[test]
    fn test_rendering() {
        let text = serialize(&sample_table()).unwrap();
        let expected = "\
# Managed by proxy-control. Manual edits are preserved only where modelled.

upstream upstream_1 {
    least_conn;
    server 10.0.0.1:8080 weight=3;
    server 10.0.0.2;
}

upstream upstream_2 {
    server 10.0.0.9;
}

server {
    listen 80;
    listen 443 ssl;
    server_name a.example;
    ssl_certificate /etc/certs/a.example.crt;
    ssl_certificate_key /etc/certs/a.example.key;
    client_max_body_size 8m;

    location /api {
        proxy_pass http://upstream_1/api;
        proxy_set_header Host $host;
    }

    location / {
        proxy_pass http://upstream_2;
    }
}
";
        assert_eq!(text, expected);
    }

    #[test]
    fn test_output_is_a_fixed_point() {
        let policy = ListenerPolicy::default();
        let first = serialize(&sample_table()).unwrap();
        let reparsed = parse(&first, &policy);
        assert!(reparsed.same_routes(&sample_table()));
        assert_eq!(serialize(&reparsed).unwrap(), first);
    }

    #[test]
    fn test_host_without_locations() {
        let mut table = RouteTable::new();
        table
            .register_virtual_host(
                VirtualHost::new("b.example", vec![Interface::plain(8080).with_address("127.0.0.1")]),
                &ListenerPolicy::default(),
            )
            .unwrap();
        let text = serialize(&table).unwrap();
        assert!(text.contains("    listen 127.0.0.1:8080;\n    server_name b.example;\n}\n"));
    }
}
