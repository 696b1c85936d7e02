//! Shared error taxonomy for the audit platform.
//!
//! Components surface structured errors upward; only the worker's top level
//! and the CLI entry points decide between log-and-continue, dead-letter, or
//! exit. Every error crossing a crate boundary carries its kind, the original
//! message, the request/correlation ids, and a small masked metadata map.

pub mod sanitization;
pub mod types;

pub use sanitization::*;
pub use types::*;
