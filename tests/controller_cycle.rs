//! Full controller cycles against in-memory storage and a scripted supervisor.

use std::io;
use std::path::{Path, PathBuf};

use proxy_control::controller::{
    ByteStorage, ControlError, HostRequest, MemoryStorage, ProviderDescriptor, ProxyController, ServiceEntry,
    ServiceIdentity, TlsMaterial,
};
use proxy_control::table::{BackendAddress, Interface, Protocol};

mod common;
use common::{backend, control_config, controller, key, plain_route, ScriptedSupervisor, CONFIG_PATH};

fn file(ctl: &ProxyController<MemoryStorage, ScriptedSupervisor>, path: &str) -> Option<String> {
    ctl.storage()
        .read(Path::new(path))
        .unwrap()
        .map(|bytes| String::from_utf8(bytes).unwrap())
}

fn backup_path() -> String {
    format!("{}.bak", CONFIG_PATH)
}

#[test]
fn test_cycle_writes_and_restarts() {
    let ctl = controller(MemoryStorage::new(), ScriptedSupervisor::running());
    let report = ctl
        .register_virtual_host(HostRequest::new("a.example", vec![Interface::plain(80)]))
        .unwrap();
    assert!(report.value && report.changed && report.restarted);
    assert_eq!(ctl.supervisor().calls(), vec!["stop", "start", "status"]);

    let report = ctl
        .register_route(&key("a.example"), "/svc", vec![backend("10.0.0.1")], &plain_route(Some("/svc")))
        .unwrap();
    assert_eq!(report.summary.upstreams, 1);

    let text = file(&ctl, CONFIG_PATH).unwrap();
    assert!(text.contains(&format!("proxy_pass http://{}/svc;", report.value.upstream)));

    let table = ctl.read_table().unwrap();
    assert!(table.location_upstream(&key("a.example"), "/svc").is_some());
}

#[test]
fn test_unchanged_cycle_skips_write_and_restart() {
    let ctl = controller(MemoryStorage::new(), ScriptedSupervisor::running());
    let request = HostRequest::new("a.example", vec![Interface::plain(80)]);
    ctl.register_virtual_host(request.clone()).unwrap();
    let calls = ctl.supervisor().calls().len();

    let report = ctl.register_virtual_host(request).unwrap();
    assert!(!report.value);
    assert!(!report.changed);
    assert!(!report.restarted);
    assert_eq!(ctl.supervisor().calls().len(), calls);
}

#[test]
fn test_restart_failure_keeps_written_file() {
    let ctl = controller(MemoryStorage::new(), ScriptedSupervisor::reporting("stopped"));
    let err = ctl
        .register_virtual_host(HostRequest::new("a.example", vec![Interface::plain(80)]))
        .unwrap_err();

    match err {
        ControlError::RestartFailed { status } => assert_eq!(status, "stopped"),
        other => panic!("unexpected error: {}", other),
    }
    assert!(file(&ctl, CONFIG_PATH).unwrap().contains("server_name a.example;"));
}

#[test]
fn test_start_failure_is_reported_as_restart_failure() {
    let mut supervisor = ScriptedSupervisor::running();
    supervisor.fail_start = true;
    let ctl = controller(MemoryStorage::new(), supervisor);
    let err = ctl
        .register_virtual_host(HostRequest::new("a.example", vec![Interface::plain(80)]))
        .unwrap_err();
    match err {
        ControlError::RestartFailed { status } => assert!(status.contains("bind failed"), "{}", status),
        other => panic!("unexpected error: {}", other),
    }
    assert_eq!(ctl.supervisor().calls(), vec!["stop", "start"]);
    assert!(file(&ctl, CONFIG_PATH).is_some());
}

#[test]
fn test_failing_status_command_is_reported_as_restart_failure() {
    let mut supervisor = ScriptedSupervisor::running();
    supervisor.fail_status = true;
    let ctl = controller(MemoryStorage::new(), supervisor);
    let err = ctl
        .register_virtual_host(HostRequest::new("a.example", vec![Interface::plain(80)]))
        .unwrap_err();
    assert!(matches!(err, ControlError::RestartFailed { .. }), "{:?}", err);
    assert_eq!(ctl.supervisor().calls(), vec!["stop", "start", "status"]);
    assert!(file(&ctl, CONFIG_PATH).unwrap().contains("server_name a.example;"));
}

#[test]
fn test_stop_failure_is_tolerated() {
    let mut supervisor = ScriptedSupervisor::running();
    supervisor.fail_stop = true;
    let ctl = controller(MemoryStorage::new(), supervisor);
    let report = ctl.restart();
    assert!(report.is_ok());
    assert_eq!(ctl.supervisor().calls(), vec!["stop", "start", "status"]);
}

#[test]
fn test_empty_table_deletes_file_and_keeps_backup() {
    let ctl = controller(MemoryStorage::new(), ScriptedSupervisor::running());
    ctl.register_virtual_host(HostRequest::new("a.example", vec![Interface::plain(80)]))
        .unwrap();
    let written = file(&ctl, CONFIG_PATH).unwrap();

    let report = ctl.remove_virtual_host(&key("a.example")).unwrap();
    assert!(report.value);
    assert_eq!(report.summary.hosts, 0);
    assert!(file(&ctl, CONFIG_PATH).is_none());
    assert_eq!(file(&ctl, &backup_path()), Some(written));
}

#[test]
fn test_backup_holds_previous_version() {
    let ctl = controller(MemoryStorage::new(), ScriptedSupervisor::running());
    ctl.register_virtual_host(HostRequest::new("a.example", vec![Interface::plain(80)]))
        .unwrap();
    assert!(file(&ctl, &backup_path()).is_none());
    let first = file(&ctl, CONFIG_PATH).unwrap();

    ctl.register_virtual_host(HostRequest::new("b.example", vec![Interface::plain(80)]))
        .unwrap();
    assert_eq!(file(&ctl, &backup_path()), Some(first));
}

#[test]
fn test_inline_certificates_are_materialized() {
    let ctl = controller(MemoryStorage::new(), ScriptedSupervisor::running());
    let mut request = HostRequest::new("secure.example www.secure.example", vec![Interface::encrypted(443)]);
    request.certificate = Some(TlsMaterial::Inline("-----BEGIN CERTIFICATE-----".into()));
    request.certificate_key = Some(TlsMaterial::Path("/etc/keys/secure.key".into()));
    ctl.register_virtual_host(request).unwrap();

    assert_eq!(
        file(&ctl, "/etc/proxy/secure.example.crt").as_deref(),
        Some("-----BEGIN CERTIFICATE-----")
    );
    let text = file(&ctl, CONFIG_PATH).unwrap();
    assert!(text.contains("    ssl_certificate /etc/proxy/secure.example.crt;\n"));
    assert!(text.contains("    ssl_certificate_key /etc/keys/secure.key;\n"));
}

#[test]
fn test_rejected_host_writes_no_certificate() {
    let ctl = controller(MemoryStorage::new(), ScriptedSupervisor::running());
    let mut request = HostRequest::new("bad.example", vec![Interface::plain(443)]);
    request.certificate = Some(TlsMaterial::Inline("pem".into()));

    let err = ctl.register_virtual_host(request).unwrap_err();
    assert!(matches!(err, ControlError::Table(_)));
    assert!(ctl.storage().paths().is_empty());
}

#[test]
fn test_batch_host_registration_returns_applied_subset() {
    let ctl = controller(MemoryStorage::new(), ScriptedSupervisor::running());
    let report = ctl
        .register_virtual_hosts(vec![
            HostRequest::new("a.example", vec![Interface::plain(80)]),
            HostRequest::new("localhost", vec![Interface::plain(80)]),
            HostRequest::new("b.example", vec![Interface::encrypted(80)]),
            HostRequest::new("c.example", vec![Interface::plain(80)]),
        ])
        .unwrap();
    assert_eq!(report.value, vec![key("a.example"), key("c.example")]);
    assert_eq!(report.summary.hosts, 2);

    let removed = ctl
        .remove_virtual_hosts(&[key("a.example"), key("missing.example")])
        .unwrap();
    assert_eq!(removed.value, vec![key("a.example")]);
}

#[test]
fn test_service_registration_and_removal() {
    let ctl = controller(MemoryStorage::new(), ScriptedSupervisor::running());
    ctl.register_virtual_host(HostRequest::new("gw.example", vec![Interface::plain(80), Interface::encrypted(443)]))
        .unwrap();
    let host = proxy_control::table::HostKey::compute(
        &[Interface::plain(80), Interface::encrypted(443)],
        "gw.example",
    );

    let mut provider = ProviderDescriptor::new(Protocol::Plain, "10.0.0.1", Some(8080));
    provider.root = Some("/billing".into());
    let entry = ServiceEntry {
        identity: ServiceIdentity::new("shop", "billing", "invoices", Some("v2")),
        providers: vec![provider, ProviderDescriptor::new(Protocol::Plain, "10.0.0.2", Some(8080))],
    };

    let report = ctl.register_service(&host, &entry).unwrap();
    let registration = report.value;
    assert_eq!(
        registration.paths,
        vec!["/shop/billing/invoices/v2".to_string(), "/shop/billing/invoices".to_string()]
    );
    assert_eq!(registration.providers.len(), 2);
    assert_eq!(registration.providers[0].host, "gw.example");
    assert_eq!(registration.providers[0].root.as_deref(), Some("/shop/billing/invoices/v2"));
    // the second provider has no root, so only the first is routed
    assert_eq!(report.summary.upstreams, 1);
    assert_eq!(report.summary.backends, 1);

    let removed = ctl.remove_services(&host, &[entry.identity.clone()]).unwrap();
    assert_eq!(removed.value, vec!["/shop/billing/invoices/v2".to_string()]);
    let table = ctl.read_table().unwrap();
    assert!(table.location_upstream(&host, "/shop/billing/invoices").is_some());
    assert!(table.location_upstream(&host, "/shop/billing/invoices/v2").is_none());
}

#[test]
fn test_service_batch_skips_failures() {
    let ctl = controller(MemoryStorage::new(), ScriptedSupervisor::running());
    ctl.register_virtual_host(HostRequest::new("gw.example", vec![Interface::plain(80)]))
        .unwrap();
    let entries = vec![
        ServiceEntry {
            identity: ServiceIdentity::new("a", "m", "empty", None),
            providers: Vec::new(),
        },
        ServiceEntry {
            identity: ServiceIdentity::new("a", "m", "ok", None),
            providers: vec![ProviderDescriptor::new(Protocol::Plain, "10.0.0.5", None)],
        },
    ];
    let report = ctl.register_services(&key("gw.example"), &entries).unwrap();
    assert_eq!(report.value.len(), 1);
    assert_eq!(report.value[0].paths, vec!["/a/m/ok".to_string()]);
}

#[test]
fn test_remove_single_backend_through_controller() {
    let ctl = controller(MemoryStorage::new(), ScriptedSupervisor::running());
    ctl.register_virtual_host(HostRequest::new("a.example", vec![Interface::plain(80)]))
        .unwrap();
    ctl.register_route(
        &key("a.example"),
        "/svc",
        vec![backend("10.0.0.1"), backend("10.0.0.2:8080")],
        &plain_route(None),
    )
    .unwrap();

    let report = ctl
        .remove_route(&key("a.example"), "/svc", Some(&BackendAddress::new("10.0.0.2", Some(8080))))
        .unwrap();
    assert!(report.value);
    let text = file(&ctl, CONFIG_PATH).unwrap();
    assert!(text.contains("server 10.0.0.1;"));
    assert!(!text.contains("10.0.0.2"));
}

/// Storage that appends a comment to every write, as a hand editor might.
struct AnnotatingStorage(MemoryStorage);

impl ByteStorage for AnnotatingStorage {
    fn read(&self, path: &Path) -> io::Result<Option<Vec<u8>>> {
        self.0.read(path)
    }

    fn write(&self, path: &Path, bytes: &[u8]) -> io::Result<()> {
        let mut annotated = bytes.to_vec();
        annotated.extend_from_slice(b"# touched\n");
        self.0.write(path, &annotated)
    }

    fn exists(&self, path: &Path) -> bool {
        self.0.exists(path)
    }

    fn remove(&self, path: &Path) -> io::Result<()> {
        self.0.remove(path)
    }
}

#[test]
fn test_unstable_round_trip_blocks_restart() {
    let ctl = ProxyController::new(
        control_config(),
        AnnotatingStorage(MemoryStorage::new()),
        ScriptedSupervisor::running(),
    );
    let err = ctl
        .register_virtual_host(HostRequest::new("a.example", vec![Interface::plain(80)]))
        .unwrap_err();
    assert!(matches!(err, ControlError::UnstableRoundTrip { .. }));
    assert!(ctl.supervisor().calls().is_empty());
    assert!(ctl.storage().0.exists(&PathBuf::from(CONFIG_PATH)));
}

#[test]
fn test_fs_storage_cycle() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = control_config();
    config.proxy.config_path = dir.path().join("routes.conf");
    config.supervisor.enabled = false;
    let ctl = ProxyController::new(config, proxy_control::controller::FsStorage, ScriptedSupervisor::running());

    ctl.register_virtual_host(HostRequest::new("a.example", vec![Interface::plain(80)]))
        .unwrap();
    assert!(dir.path().join("routes.conf").exists());

    ctl.remove_virtual_host(&key("a.example")).unwrap();
    assert!(!dir.path().join("routes.conf").exists());
    assert!(dir.path().join("routes.conf.bak").exists());
    assert!(ctl.supervisor().calls().is_empty());
}
