//! Reverse-proxy control plane.
//!
//! Keeps a relational model of virtual hosts, upstream groups and location
//! bindings in sync with the proxy's nginx-style configuration file.

pub mod config;
pub mod controller;
pub mod grammar;
pub mod observability;
pub mod table;

pub use config::schema::ControlConfig;
pub use controller::{ControlError, ProxyController};
pub use table::RouteTable;
