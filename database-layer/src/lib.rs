//! Persistence layer for the audit platform.
//!
//! Owns the relational schema (`audit_log`, `audit_integrity_log`,
//! `audit_retention_policy`, `pseudonym_mapping`, `alerts`) and the
//! transactional contract the pipeline demands: event insert is a single
//! transaction, persisted events are never mutated except by sanctioned
//! pseudonymization (which re-seals the hash in the same transaction), and
//! archived events are read-only.

pub mod audit_log;
pub mod connection;
pub mod error;
pub mod integrity;
pub mod models;
pub mod retention;
pub mod schema;

pub use audit_log::*;
pub use connection::*;
pub use error::*;
pub use integrity::*;
pub use models::*;
pub use retention::*;
