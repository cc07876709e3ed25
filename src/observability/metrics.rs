//! Metrics collection and exposition.
//!
//! # Metrics
//! - `route_table_mutations_total` (counter): table operations by `op`, `outcome`
//! - `proxy_restarts_total` (counter): supervisor restarts by `outcome`
//! - `config_reloads_total` (counter): watcher re-reads by `outcome`
//! - `route_table_hosts` (gauge): virtual hosts after the last cycle
//! - `route_table_upstreams` (gauge): upstream groups after the last cycle
//!
//! # Design Decisions
//! - Recording goes through the `metrics` facade and is a no-op until an
//!   exporter is installed, so the CLI never pays for it
//! - Only the long-running daemon installs the Prometheus exporter

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};
use std::net::SocketAddr;

use crate::table::TableSummary;

/// Install the Prometheus exporter with an HTTP scrape listener.
pub fn init_metrics(address: SocketAddr) -> Result<(), BuildError> {
    PrometheusBuilder::new().with_http_listener(address).install()?;
    tracing::info!(address = %address, "Metrics endpoint started");
    Ok(())
}

fn outcome(ok: bool) -> &'static str {
    if ok {
        "success"
    } else {
        "failure"
    }
}

pub fn record_mutation(op: &'static str, ok: bool) {
    metrics::counter!("route_table_mutations_total", "op" => op, "outcome" => outcome(ok)).increment(1);
}

pub fn record_restart(ok: bool) {
    metrics::counter!("proxy_restarts_total", "outcome" => outcome(ok)).increment(1);
}

pub fn record_reload(ok: bool) {
    metrics::counter!("config_reloads_total", "outcome" => outcome(ok)).increment(1);
}

pub fn record_table_size(summary: &TableSummary) {
    metrics::gauge!("route_table_hosts").set(summary.hosts as f64);
    metrics::gauge!("route_table_upstreams").set(summary.upstreams as f64);
}
