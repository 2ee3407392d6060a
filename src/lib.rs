// src/lib.rs
// Public library surface for the daemon, the backup CLI and integration tests.

pub mod api;
pub mod backup;
pub mod config;
pub mod metrics;
pub mod ratelimit;
pub mod store;

// Fetch -> dedupe -> fan-out
pub mod dispatch;
pub mod ingest;
pub mod notify;
pub mod pipeline;
pub mod scheduler;

pub use crate::api::router;
pub use crate::ingest::types::{Quake, QuakeProvider, SourceKind};
