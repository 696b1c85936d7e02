//! Threshold-driven alerting over the audit event stream.
//!
//! The monitor watches processed events through a sliding window and raises
//! alerts when rules fire (repeated login failures, dead-letter depth,
//! integrity mismatches). The store enforces organizational isolation: every
//! read path filters by `organization_id`, and cross-organization access
//! fails with `Forbidden`.

pub mod error;
pub mod monitor;
pub mod store;
pub mod types;

pub use error::*;
pub use monitor::*;
pub use store::*;
pub use types::*;
