//! Observability module providing structured logging.
//!
//! Initializes `tracing-subscriber` with a configurable output format
//! (pretty, compact, JSON) and an environment-aware filter.

mod tracing_init;

pub use tracing_init::*;
