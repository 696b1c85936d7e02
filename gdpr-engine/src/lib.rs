//! GDPR compliance engine.
//!
//! Data subject access exports (JSON/CSV/XML), pseudonymization with
//! referential integrity through the durable pseudonym registry,
//! retention-policy-driven archival and deletion, and right-to-be-forgotten
//! erasure that preserves compliance-critical audit trails.
//!
//! Every engine operation is itself recorded as an audit event
//! (`gdpr.data.export`, `gdpr.data.pseudonymize`, `gdpr.retention.apply`,
//! `gdpr.data.delete`), and operations on the same data subject are
//! serialized through a per-principal advisory lock.

pub mod engine;
pub mod error;
pub mod export;
pub mod pseudonym;

pub use engine::*;
pub use error::*;
pub use export::*;
pub use pseudonym::*;
