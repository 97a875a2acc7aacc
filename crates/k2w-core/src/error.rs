//! Error types for the k2w core library.
//!
//! Uses hierarchical domain-specific errors following the thiserror pattern.

use thiserror::Error;

/// Result type alias for k2w operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Top-level error type for k2w.
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Decode error (malformed payload)
    #[error("Decode error: {0}")]
    Decode(#[from] DecodeError),

    /// Queue-related error
    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),

    /// Sink write error
    #[error("Write error: {0}")]
    Write(#[from] WriteError),

    /// Event invariant violation
    #[error("Event error: {0}")]
    Event(#[from] EventError),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Shutdown requested
    #[error("Shutdown requested")]
    Shutdown,
}

/// Errors raised while decoding a raw queue payload into an event.
///
/// Both variants are recovered locally: the invalid-message counter is
/// incremented, the payload is logged, and the message is dropped. A decode
/// failure never propagates past the worker that hit it.
#[derive(Error, Debug)]
pub enum DecodeError {
    /// Payload is not valid UTF-8 JSON with an object at the top level.
    #[error("Malformed payload ({reason}): {preview:?}")]
    Malformed {
        /// Why the payload was rejected
        reason: String,
        /// Truncated payload excerpt for the log line
        preview: String,
    },

    /// Any other failure during decode or enrichment.
    #[error("Unexpected decode failure ({reason}): {preview:?}")]
    Unexpected {
        /// Underlying failure description
        reason: String,
        /// Truncated payload excerpt for the log line
        preview: String,
    },
}

/// Queue (Kafka) errors.
#[derive(Error, Debug)]
pub enum QueueError {
    /// Failed to connect to broker
    #[error("Connection failed to {broker}: {message}")]
    ConnectionFailed { broker: String, message: String },

    /// Subscription / consumer group error
    #[error("Subscribe failed: {0}")]
    Subscribe(String),

    /// Poll error
    #[error("Poll failed: {0}")]
    Poll(String),

    /// Offset commit failed
    #[error("Offset commit failed: {0}")]
    OffsetCommit(String),

    /// Partition assignment error
    #[error("Partition assignment error: {0}")]
    PartitionAssignment(String),
}

/// Sink write errors.
#[derive(Error, Debug)]
pub enum WriteError {
    /// A row does not satisfy the table's declared schema.
    ///
    /// Deterministic: retrying the same event cannot succeed.
    #[error("Schema violation in {table}.{field}: {reason}")]
    SchemaViolation {
        table: String,
        field: String,
        reason: String,
    },

    /// Object store write failed
    #[error("Object write to {path} failed: {source}")]
    Object {
        path: String,
        #[source]
        source: object_store::Error,
    },

    /// Warehouse append or table operation failed
    #[error("Warehouse operation on {table} failed: {message}")]
    Warehouse { table: String, message: String },
}

impl WriteError {
    /// Whether retrying the write could succeed.
    ///
    /// Schema violations are terminal; object-store and warehouse failures
    /// are assumed transient and left to queue redelivery.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, WriteError::SchemaViolation { .. })
    }
}

/// Event invariant violations.
///
/// These indicate a bug upstream (the decoder stamps every event), so they
/// fail loudly rather than being skipped.
#[derive(Error, Debug)]
pub enum EventError {
    /// Event has no ingestion_time field
    #[error("Event is missing ingestion_time")]
    MissingIngestionTime,

    /// ingestion_time is present but not a parsable timestamp
    #[error("Unparsable ingestion_time {value:?}: {reason}")]
    BadIngestionTime { value: String, reason: String },
}

// Conversion implementations for external error types

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

impl From<toml::de::Error> for Error {
    fn from(err: toml::de::Error) -> Self {
        Error::Config(err.to_string())
    }
}
