//! Route table subsystem.
//!
//! # Data Flow
//! ```text
//! grammar::parse (file text)
//!     → RouteTable::from_parts (forward maps)
//!     → repair_indices (upstream index + host index)
//!
//! Mutation (one logical change):
//!     register_virtual_host / remove_virtual_host
//!     register_route  → dedup → create | union-merge
//!     remove_route    → in place | copy-on-write split | cascade delete
//!     → repair_indices
//!     → grammar::serialize
//! ```
//!
//! # Invariants (hold after every public operation)
//! - no two upstreams have the same backend address set
//! - host keys are unique; re-registering a key is a no-op
//! - upstream index lists exactly the (address, upstream) pairs present
//! - host index lists exactly the (upstream, host, paths) bindings present
//! - every location binding names an existing upstream
//! - listeners obey the configured listener policy
//!
//! # Design Decisions
//! - Single writer, no internal locking; callers serialize access
//! - Per-item failures are `TableError`s; batches log and continue

pub mod host;
pub mod index;
pub mod mutation;
pub mod policy;
pub mod route_table;
pub mod types;
pub mod upstream;

pub use host::{Directive, HostKey, Interface, LocationEntry, UpstreamRef, VirtualHost};
pub use policy::ListenerPolicy;
pub use route_table::RouteTable;
pub use types::{RouteAction, RouteOptions, RouteWrite, TableError, TableResult, TableSummary};
pub use upstream::{BackendAddress, BackendItem, LoadBalancing, Protocol, UpstreamGroup};
