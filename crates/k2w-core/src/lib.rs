//! k2w core - streaming event fan-out from Kafka to dual sinks
//!
//! This library consumes JSON business events (orders, inventory changes,
//! user activity) from Kafka and durably persists each one twice:
//!
//! - a time-partitioned object store, one JSON file per event
//! - an append-only warehouse table per event type, schema-enforced
//!
//! The flow is decode -> route -> fan out: malformed payloads are counted
//! and dropped at the decoder, recognized event types get their own lane
//! with a fixed table schema, and unrecognized types are dropped silently.

pub mod config;
pub mod decode;
pub mod error;
pub mod event;
pub mod health;
pub mod kafka;
pub mod metrics;
pub mod path;
pub mod pipeline;
pub mod route;
pub mod schema;
pub mod sink;

// Re-export commonly used types
pub use config::Config;
pub use decode::Decoder;
pub use error::{DecodeError, EventError, QueueError, WriteError};
pub use error::{Error, Result};
pub use event::Event;
pub use metrics::PipelineMetrics;
pub use pipeline::{Pipeline, PipelineState};
pub use route::Lane;
pub use schema::TableSchema;
