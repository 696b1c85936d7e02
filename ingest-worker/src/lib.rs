//! Ingestion worker: dequeues audit events, validates them, seals their
//! integrity hash, persists them, and routes unprocessable events to the
//! dead-letter stream.
//!
//! Per-job state machine: received → validated → hashed → persisted → acked;
//! any step can fail into nack or dead-letter depending on the error kind.
//! Concurrency is bounded by a semaphore sized from configuration, and
//! shutdown drains in-flight jobs before force-releasing the rest.

pub mod health;
pub mod metrics;
pub mod worker;

pub use health::*;
pub use metrics::*;
pub use worker::*;
