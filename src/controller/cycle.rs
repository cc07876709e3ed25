//! The read → mutate → write → reread → restart cycle.
//!
//! # Responsibilities
//! - Load the managed proxy file into a route table
//! - Apply one logical change and persist it (or delete the file when the
//!   table became empty)
//! - Optionally restart the proxy daemon and confirm it is running
//!
//! # Design Decisions
//! - Synchronous and single-writer; callers serialize cycles
//! - A cycle whose mutation changes nothing writes nothing and restarts nothing
//! - No rollback on restart failure; `.bak` keeps the previous file and a
//!   byte-identical round trip can be required before restarting

use std::io;
use std::path::Path;

use crate::config::schema::ControlConfig;
use crate::controller::service::{host_descriptors, provider_backends, RouteRegistration, ServiceEntry, ServiceIdentity};
use crate::controller::storage::ByteStorage;
use crate::controller::supervisor::ProcessSupervisor;
use crate::controller::types::{ControlError, ControlResult, CycleReport, HostRequest, TlsMaterial};
use crate::grammar::{parse, serialize};
use crate::observability::metrics;
use crate::table::host::{HostKey, VirtualHost};
use crate::table::policy::ListenerPolicy;
use crate::table::route_table::RouteTable;
use crate::table::types::{RouteOptions, RouteWrite, TableError};
use crate::table::upstream::{BackendAddress, BackendItem};

/// Read and parse a proxy file. A missing file is an empty table.
pub fn read_table_from<S: ByteStorage + ?Sized>(
    storage: &S,
    path: &Path,
    policy: &ListenerPolicy,
) -> ControlResult<RouteTable> {
    let read_error = |source: io::Error| ControlError::ConfigRead {
        path: path.to_path_buf(),
        source,
    };

    let Some(bytes) = storage.read(path).map_err(read_error)? else {
        tracing::debug!(path = ?path, "Proxy file absent; starting from an empty table");
        return Ok(RouteTable::new());
    };
    let text = String::from_utf8(bytes).map_err(|e| read_error(io::Error::new(io::ErrorKind::InvalidData, e)))?;
    Ok(parse(&text, policy))
}

/// Drives route table changes against one managed proxy file.
pub struct ProxyController<S, P> {
    config: ControlConfig,
    storage: S,
    supervisor: P,
}

impl<S: ByteStorage, P: ProcessSupervisor> ProxyController<S, P> {
    pub fn new(config: ControlConfig, storage: S, supervisor: P) -> Self {
        Self {
            config,
            storage,
            supervisor,
        }
    }

    pub fn config(&self) -> &ControlConfig {
        &self.config
    }

    pub fn storage(&self) -> &S {
        &self.storage
    }

    pub fn supervisor(&self) -> &P {
        &self.supervisor
    }

    fn config_path(&self) -> &Path {
        &self.config.proxy.config_path
    }

    fn policy(&self) -> &ListenerPolicy {
        &self.config.listener_policy
    }

    pub fn read_table(&self) -> ControlResult<RouteTable> {
        read_table_from(&self.storage, self.config_path(), self.policy())
    }

    /// The text the current table renders to; `EmptyTable` when there is none.
    pub fn render(&self) -> ControlResult<String> {
        Ok(serialize(&self.read_table()?)?)
    }

    /// Persist a table. An empty table deletes the file.
    pub fn write_table(&self, table: &RouteTable) -> ControlResult<()> {
        let path = self.config_path();
        let write_error = |source: io::Error| ControlError::ConfigWrite {
            path: path.to_path_buf(),
            source,
        };

        if table.is_empty() {
            self.backup_existing()?;
            self.storage.remove(path).map_err(write_error)?;
            tracing::info!(path = ?path, "Route table is empty; proxy file removed");
            return Ok(());
        }

        let text = serialize(table)?;
        self.backup_existing()?;
        self.storage.write(path, text.as_bytes()).map_err(write_error)
    }

    fn backup_existing(&self) -> ControlResult<()> {
        if !self.config.proxy.backup {
            return Ok(());
        }
        let path = self.config_path();
        let Some(previous) = self.storage.read(path).map_err(|source| ControlError::ConfigRead {
            path: path.to_path_buf(),
            source,
        })?
        else {
            return Ok(());
        };

        let backup = self.config.proxy.backup_path();
        self.storage
            .write(&backup, &previous)
            .map_err(|source| ControlError::ConfigWrite { path: backup, source })
    }

    /// Run one full cycle around `mutate`.
    pub fn apply<T>(
        &self,
        op: &'static str,
        mutate: impl FnOnce(&mut RouteTable) -> ControlResult<T>,
    ) -> ControlResult<CycleReport<T>> {
        let mut table = self.read_table()?;
        let before = table.clone();

        let value = match mutate(&mut table) {
            Ok(value) => value,
            Err(e) => {
                metrics::record_mutation(op, false);
                return Err(e);
            }
        };
        metrics::record_mutation(op, true);

        if table.same_routes(&before) {
            tracing::debug!(op, "Routes unchanged; proxy file left untouched");
            return Ok(CycleReport {
                value,
                changed: false,
                restarted: false,
                summary: table.summary(),
            });
        }

        self.write_table(&table)?;
        let reread = self.read_table()?;

        let violations = reread.check_invariants();
        if !violations.is_empty() {
            tracing::warn!(op, violations = ?violations, "Re-read route table is inconsistent");
        }
        let summary = reread.summary();
        metrics::record_table_size(&summary);
        tracing::info!(
            op,
            path = ?self.config_path(),
            hosts = summary.hosts,
            upstreams = summary.upstreams,
            locations = summary.locations,
            "Route table written"
        );

        let mut restarted = false;
        if self.config.supervisor.enabled {
            if self.config.supervisor.require_stable_roundtrip {
                self.verify_round_trip(&reread)?;
            }
            self.restart()?;
            restarted = true;
        }

        Ok(CycleReport {
            value,
            changed: true,
            restarted,
            summary,
        })
    }

    fn verify_round_trip(&self, reread: &RouteTable) -> ControlResult<()> {
        if reread.is_empty() {
            return Ok(());
        }
        let path = self.config_path();
        let on_disk = self.storage.read(path).map_err(|source| ControlError::ConfigRead {
            path: path.to_path_buf(),
            source,
        })?;
        let rendered = serialize(reread)?;
        if on_disk.as_deref() != Some(rendered.as_bytes()) {
            return Err(ControlError::UnstableRoundTrip {
                path: path.to_path_buf(),
            });
        }
        Ok(())
    }

    /// Stop, start and confirm the proxy daemon.
    ///
    /// A failing stop is tolerated (the daemon may not be running).
    pub fn restart(&self) -> ControlResult<()> {
        if let Err(e) = self.supervisor.stop() {
            tracing::warn!(error = %e, "Stopping proxy failed; starting anyway");
        }

        // A failing start or status command means the daemon is not confirmed running.
        let status = self
            .supervisor
            .start()
            .and_then(|_| self.supervisor.status())
            .map_err(|e| {
                metrics::record_restart(false);
                tracing::error!(error = %e, "Proxy restart command failed");
                ControlError::RestartFailed { status: e.to_string() }
            })?;

        if status.trim() != self.config.supervisor.running_status {
            metrics::record_restart(false);
            tracing::error!(status = %status, "Proxy did not report running after restart");
            return Err(ControlError::RestartFailed { status });
        }

        metrics::record_restart(true);
        tracing::info!("Proxy restarted");
        Ok(())
    }

    // Virtual hosts

    pub fn register_virtual_host(&self, request: HostRequest) -> ControlResult<CycleReport<bool>> {
        self.apply("register_virtual_host", |table| self.add_host(table, request))
    }

    /// Register many hosts; failures are logged and skipped.
    pub fn register_virtual_hosts(&self, requests: Vec<HostRequest>) -> ControlResult<CycleReport<Vec<HostKey>>> {
        self.apply("register_virtual_hosts", |table| {
            let mut applied = Vec::new();
            for request in requests {
                let key = request.key();
                match self.add_host(table, request) {
                    Ok(true) => applied.push(key),
                    Ok(false) => {}
                    Err(e) => tracing::warn!(host = %key, error = %e, "Skipping virtual host"),
                }
            }
            Ok(applied)
        })
    }

    pub fn remove_virtual_host(&self, key: &HostKey) -> ControlResult<CycleReport<bool>> {
        self.apply("remove_virtual_host", |table| Ok(table.remove_virtual_host(key)))
    }

    pub fn remove_virtual_hosts(&self, keys: &[HostKey]) -> ControlResult<CycleReport<Vec<HostKey>>> {
        self.apply("remove_virtual_hosts", |table| Ok(table.remove_virtual_hosts(keys)))
    }

    fn add_host(&self, table: &mut RouteTable, request: HostRequest) -> ControlResult<bool> {
        let mut host = VirtualHost::new(request.hostname, request.interfaces);
        for directive in request.extra_directives {
            host.set_extra_directive(directive.name, directive.value);
        }
        if table.virtual_host(&host.key()).is_some() {
            return Ok(false);
        }
        table.validate_virtual_host(&host, self.policy())?;

        host.certificate = self.materialize(&host, request.certificate, "crt")?;
        host.certificate_key = self.materialize(&host, request.certificate_key, "key")?;
        Ok(table.register_virtual_host(host, self.policy())?)
    }

    fn materialize(
        &self,
        host: &VirtualHost,
        material: Option<TlsMaterial>,
        extension: &str,
    ) -> ControlResult<Option<String>> {
        match material {
            None => Ok(None),
            Some(TlsMaterial::Path(path)) => Ok(Some(path)),
            Some(TlsMaterial::Inline(content)) => {
                let path = self
                    .config
                    .proxy
                    .certificate_dir()
                    .join(format!("{}.{}", host.primary_hostname(), extension));
                self.storage
                    .write(&path, content.as_bytes())
                    .map_err(|source| ControlError::ConfigWrite {
                        path: path.clone(),
                        source,
                    })?;
                tracing::debug!(path = ?path, "TLS material written");
                Ok(Some(path.display().to_string()))
            }
        }
    }

    // Routes

    pub fn register_route(
        &self,
        key: &HostKey,
        path: &str,
        items: Vec<BackendItem>,
        options: &RouteOptions,
    ) -> ControlResult<CycleReport<RouteWrite>> {
        self.apply("register_route", |table| Ok(table.register_route(key, path, items, options)?))
    }

    pub fn remove_route(
        &self,
        key: &HostKey,
        path: &str,
        backend: Option<&BackendAddress>,
    ) -> ControlResult<CycleReport<bool>> {
        self.apply("remove_route", |table| Ok(table.remove_route(key, path, backend)?))
    }

    // Services

    /// Route a service's providers through a host.
    pub fn register_service(&self, key: &HostKey, entry: &ServiceEntry) -> ControlResult<CycleReport<RouteRegistration>> {
        self.apply("register_service", |table| self.route_service(table, key, entry))
    }

    /// Route many services; failures are logged and skipped.
    pub fn register_services(
        &self,
        key: &HostKey,
        entries: &[ServiceEntry],
    ) -> ControlResult<CycleReport<Vec<RouteRegistration>>> {
        self.apply("register_services", |table| {
            let mut registered = Vec::new();
            for entry in entries {
                match self.route_service(table, key, entry) {
                    Ok(registration) => registered.push(registration),
                    Err(e) => tracing::warn!(service = %entry.identity.name, error = %e, "Skipping service"),
                }
            }
            Ok(registered)
        })
    }

    /// Remove the versioned route of each service. Returns removed paths.
    pub fn remove_services(&self, key: &HostKey, identities: &[ServiceIdentity]) -> ControlResult<CycleReport<Vec<String>>> {
        let prefix = &self.config.routing.route_prefix;
        self.apply("remove_services", |table| {
            let mut removed = Vec::new();
            for identity in identities {
                let path = identity.route_path(prefix);
                match table.remove_route(key, &path, None) {
                    Ok(true) => removed.push(path),
                    Ok(false) => tracing::debug!(path = %path, "Service route not present"),
                    Err(e) => tracing::warn!(path = %path, error = %e, "Skipping service removal"),
                }
            }
            Ok(removed)
        })
    }

    fn route_service(&self, table: &mut RouteTable, key: &HostKey, entry: &ServiceEntry) -> ControlResult<RouteRegistration> {
        let routing = &self.config.routing;
        let identity = &entry.identity;
        let versioned = identity.route_path(&routing.route_prefix);

        let backends = provider_backends(identity, &entry.providers)
            .ok_or_else(|| TableError::EmptyBackendSet { path: versioned.clone() })?;
        let options = RouteOptions {
            load_balancing: routing.load_balancing,
            protocol: backends.protocol,
            source_root: backends.root.clone(),
            proxy_directives: Vec::new(),
        };

        let mut paths = vec![versioned];
        let default = identity.default_path(&routing.route_prefix);
        if routing.default_path && !paths.contains(&default) {
            paths.push(default);
        }

        let mut written = Vec::new();
        let mut first_error = None;
        for path in paths {
            match table.register_route(key, &path, backends.items.clone(), &options) {
                Ok(write) => written.push(write.path),
                Err(e) => {
                    tracing::warn!(path = %path, error = %e, "Service path not routed");
                    first_error.get_or_insert(e);
                }
            }
        }
        if written.is_empty() {
            if let Some(e) = first_error {
                return Err(e.into());
            }
        }

        let providers = match (table.virtual_host(key), written.first()) {
            (Some(host), Some(path)) => host_descriptors(host, path),
            _ => Vec::new(),
        };
        Ok(RouteRegistration {
            identity: identity.clone(),
            paths: written,
            providers,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::storage::MemoryStorage;
    use crate::controller::supervisor::SupervisorError;
    use crate::table::host::Interface;
    use std::path::PathBuf;

    struct NoSupervisor;

    impl ProcessSupervisor for NoSupervisor {
        fn stop(&self) -> Result<(), SupervisorError> {
            Err(SupervisorError::NotConfigured("stop"))
        }
        fn start(&self) -> Result<(), SupervisorError> {
            Err(SupervisorError::NotConfigured("start"))
        }
        fn status(&self) -> Result<String, SupervisorError> {
            Err(SupervisorError::NotConfigured("status"))
        }
    }

    fn controller(storage: MemoryStorage) -> ProxyController<MemoryStorage, NoSupervisor> {
        let mut config = ControlConfig::default();
        config.proxy.config_path = PathBuf::from("/etc/proxy/routes.conf");
        ProxyController::new(config, storage, NoSupervisor)
    }

    #[test]
    fn test_missing_file_reads_empty() {
        let table = controller(MemoryStorage::new()).read_table().unwrap();
        assert!(table.is_empty());
    }

    #[test]
    fn test_render_empty_table_is_error() {
        let err = controller(MemoryStorage::new()).render().unwrap_err();
        assert!(matches!(err, ControlError::EmptyTable));
    }

    #[test]
    fn test_non_utf8_file_is_read_error() {
        let storage = MemoryStorage::with_file("/etc/proxy/routes.conf", vec![0xff, 0xfe]);
        let err = controller(storage).read_table().unwrap_err();
        assert!(matches!(err, ControlError::ConfigRead { .. }));
    }

    #[test]
    fn test_unchanged_cycle_writes_nothing() {
        let ctl = controller(MemoryStorage::new());
        let report = ctl.apply("noop", |_| Ok(())).unwrap();
        assert!(!report.changed);
        assert!(ctl.storage().paths().is_empty());
    }

    #[test]
    fn test_failed_mutation_writes_nothing() {
        let ctl = controller(MemoryStorage::new());
        let key = HostKey::compute(&[Interface::plain(80)], "a.example");
        let err = ctl
            .register_route(&key, "/x", vec![], &RouteOptions::default())
            .unwrap_err();
        assert!(matches!(err, ControlError::Table(TableError::UnknownHost(_))));
        assert!(ctl.storage().paths().is_empty());
    }

    #[test]
    fn test_disabled_supervisor_is_not_called() {
        let ctl = controller(MemoryStorage::new());
        let report = ctl
            .register_virtual_host(HostRequest::new("a.example", vec![Interface::plain(80)]))
            .unwrap();
        assert!(report.value);
        assert!(report.changed);
        assert!(!report.restarted);
        assert_eq!(report.summary.hosts, 1);
    }
}
