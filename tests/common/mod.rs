//! Shared utilities for route table and controller tests.

use std::cell::RefCell;
use std::path::PathBuf;

use proxy_control::config::schema::ControlConfig;
use proxy_control::controller::{MemoryStorage, ProcessSupervisor, ProxyController, SupervisorError};
use proxy_control::table::{
    BackendAddress, BackendItem, HostKey, Interface, ListenerPolicy, Protocol, RouteOptions, RouteTable, VirtualHost,
};

#[allow(dead_code)]
pub const CONFIG_PATH: &str = "/etc/proxy/routes.conf";

/// Supervisor that records calls and answers from a script.
#[allow(dead_code)]
pub struct ScriptedSupervisor {
    pub calls: RefCell<Vec<&'static str>>,
    pub status: String,
    pub fail_stop: bool,
    pub fail_start: bool,
    pub fail_status: bool,
}

#[allow(dead_code)]
impl ScriptedSupervisor {
    pub fn running() -> Self {
        Self::reporting("running")
    }

    pub fn reporting(status: &str) -> Self {
        Self {
            calls: RefCell::new(Vec::new()),
            status: status.to_string(),
            fail_stop: false,
            fail_start: false,
            fail_status: false,
        }
    }

    pub fn calls(&self) -> Vec<&'static str> {
        self.calls.borrow().clone()
    }
}

impl ProcessSupervisor for ScriptedSupervisor {
    fn stop(&self) -> Result<(), SupervisorError> {
        self.calls.borrow_mut().push("stop");
        if self.fail_stop {
            return Err(SupervisorError::CommandFailed {
                command: "stop".into(),
                code: Some(1),
                stderr: "not running".into(),
            });
        }
        Ok(())
    }

    fn start(&self) -> Result<(), SupervisorError> {
        self.calls.borrow_mut().push("start");
        if self.fail_start {
            return Err(SupervisorError::CommandFailed {
                command: "start".into(),
                code: Some(1),
                stderr: "bind failed".into(),
            });
        }
        Ok(())
    }

    fn status(&self) -> Result<String, SupervisorError> {
        self.calls.borrow_mut().push("status");
        if self.fail_status {
            return Err(SupervisorError::CommandFailed {
                command: "status".into(),
                code: Some(3),
                stderr: String::new(),
            });
        }
        Ok(self.status.clone())
    }
}

/// Settings pointing at `CONFIG_PATH` with the supervisor enabled.
#[allow(dead_code)]
pub fn control_config() -> ControlConfig {
    let mut config = ControlConfig::default();
    config.proxy.config_path = PathBuf::from(CONFIG_PATH);
    config.supervisor.enabled = true;
    config
}

#[allow(dead_code)]
pub fn controller(
    storage: MemoryStorage,
    supervisor: ScriptedSupervisor,
) -> ProxyController<MemoryStorage, ScriptedSupervisor> {
    ProxyController::new(control_config(), storage, supervisor)
}

#[allow(dead_code)]
pub fn policy() -> ListenerPolicy {
    ListenerPolicy::default()
}

/// Plain host on port 80.
#[allow(dead_code)]
pub fn plain_host(hostname: &str) -> VirtualHost {
    VirtualHost::new(hostname, vec![Interface::plain(80)])
}

#[allow(dead_code)]
pub fn key(hostname: &str) -> HostKey {
    plain_host(hostname).key()
}

/// `host[:port]`, weight 1.
#[allow(dead_code)]
pub fn backend(address: &str) -> BackendItem {
    BackendItem::new(BackendAddress::parse(address).unwrap())
}

#[allow(dead_code)]
pub fn backends(addresses: &[&str]) -> Vec<BackendItem> {
    addresses.iter().map(|a| backend(a)).collect()
}

#[allow(dead_code)]
pub fn plain_route(root: Option<&str>) -> RouteOptions {
    RouteOptions {
        protocol: Protocol::Plain,
        source_root: root.map(String::from),
        ..RouteOptions::default()
    }
}

/// Table with the given plain hosts registered.
#[allow(dead_code)]
pub fn table_with_hosts(hostnames: &[&str]) -> RouteTable {
    let mut table = RouteTable::new();
    for hostname in hostnames {
        table
            .register_virtual_host(plain_host(hostname), &policy())
            .unwrap();
    }
    table
}
