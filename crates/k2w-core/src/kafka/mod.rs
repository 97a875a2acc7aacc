//! Kafka source: consumer with exponential backoff and offset watermarking.

mod consumer;
mod offset;

pub use consumer::{PollOutcome, QueueConsumer, QueueConsumerBuilder, RawMessage, RetryConfig};
pub use offset::CompletedOffsets;
