#[macro_use]
mod log_macros;

pub mod error;
pub mod firehose;
pub mod ingest;
pub mod lifecycle;
pub mod metrics;
pub mod query_store;
pub mod scheduler;
pub mod snapshot_store;
pub mod tracing_init;
