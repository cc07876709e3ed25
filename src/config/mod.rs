//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! settings file (TOML)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → ControlConfig (validated, immutable)
//!     → passed by value/reference to the controller and binaries
//!
//! Managed proxy file changes (daemon only):
//!     watcher.rs detects change
//!     → controller::read_table_from re-parses
//!     → RouteTable sent over mpsc to the consumer
//! ```
//!
//! # Design Decisions
//! - Settings are immutable once loaded; changes require a restart
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod schema;
pub mod validation;
pub mod watcher;

pub use loader::{load_config, ConfigError};
pub use schema::{ControlConfig, ListenerPolicy, ObservabilityConfig, RoutingConfig, SupervisorConfig};
pub use validation::{validate_config, ValidationError};
