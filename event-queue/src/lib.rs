//! Durable work queue for audit event ingestion.
//!
//! At-least-once delivery: a claimed job that is not acknowledged within its
//! visibility timeout is re-delivered, so consumers must be idempotent with
//! respect to the job's idempotency key. After `max_retries` negative
//! acknowledgements a job moves to the dead-letter stream with its last error
//! preserved.

pub mod error;
pub mod queue;

pub use error::*;
pub use queue::*;
