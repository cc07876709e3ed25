//! Configuration grammar: the nginx-style subset the proxy reads.
//!
//! # Data Flow
//! ```text
//! file text
//!     → scanner::scan   (tokens → nested statement tree)
//!     → parser::parse   (upstream/server blocks → RouteTable)
//!
//! RouteTable
//!     → serializer::serialize (deterministic text, fixed point under re-parse)
//! ```
//!
//! # Design Decisions
//! - Parsing never fails; anything outside the model is skipped and logged
//!   at debug level
//! - Serializing a table without hosts is an error; callers delete the file
//!   instead

pub mod parser;
pub mod scanner;
pub mod serializer;

pub use parser::parse;
pub use serializer::serialize;

use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum GrammarError {
    #[error("Route table has no virtual hosts; nothing to render")]
    EmptyTable,
}
