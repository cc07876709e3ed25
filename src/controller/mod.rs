//! Proxy controller subsystem.
//!
//! # Data Flow
//! ```text
//! caller (CLI, service registry)
//!     → ProxyController::<op>
//!     → apply(op, mutation):
//!         storage.read → grammar::parse → RouteTable
//!         → mutation (table::*)
//!         → unchanged? stop here
//!         → .bak copy → grammar::serialize → storage.write
//!           (or storage.remove when no hosts remain)
//!         → storage.read → grammar::parse (normalized table)
//!         → supervisor: stop → start → status == running_status
//! ```
//!
//! # Design Decisions
//! - Storage and supervisor are traits so cycles run against memory in tests
//! - Batch operations never fail as a whole; items are logged and skipped
//! - A failed restart is reported but not rolled back

pub mod cycle;
pub mod service;
pub mod storage;
pub mod supervisor;
pub mod types;

pub use cycle::{read_table_from, ProxyController};
pub use service::{ProviderDescriptor, RouteRegistration, ServiceEntry, ServiceIdentity};
pub use storage::{ByteStorage, FsStorage, MemoryStorage};
pub use supervisor::{CommandSupervisor, ProcessSupervisor, SupervisorError};
pub use types::{ControlError, ControlResult, CycleReport, HostRequest, TlsMaterial};
