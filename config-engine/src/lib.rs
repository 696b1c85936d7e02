//! Configuration core: load, validate, hot-reload, encrypted-at-rest
//! storage, and change history.
//!
//! The live snapshot is published atomically; readers always see a coherent
//! configuration. Only fields listed in `hotReloadConfig.reloadableFields` may be
//! mutated at runtime; everything else requires a restart. Validation
//! failures are fatal at startup (exit code 2).

pub mod engine;
pub mod error;
pub mod model;
pub mod secure;
pub mod validation;

pub use engine::*;
pub use error::*;
pub use model::*;
pub use secure::*;
pub use validation::*;
