//! Kafka consumer with exponential backoff.
//!
//! Uses CooperativeSticky assignment for minimal rebalance disruption and
//! manual commits: offsets are only committed from the pipeline's completion
//! watermark, never automatically.
//!
//! Backoff formula: min(max_delay, base_delay * 2^attempt) + jitter

use crate::config::KafkaConfig;
use crate::error::{Error, QueueError, Result};
use rdkafka::consumer::{Consumer, StreamConsumer};
use rdkafka::message::{BorrowedMessage, Message};
use rdkafka::{ClientConfig, TopicPartitionList};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Configuration for exponential backoff retry behavior.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Base delay for first retry (default: 100ms)
    pub base_delay: Duration,
    /// Maximum delay cap (default: 30s)
    pub max_delay: Duration,
    /// Maximum number of retries (default: 10)
    pub max_retries: u32,
    /// Whether to add jitter to delays (default: true)
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(30),
            max_retries: 10,
            jitter: true,
        }
    }
}

impl RetryConfig {
    /// Disable jitter (for testing).
    pub fn without_jitter(mut self) -> Self {
        self.jitter = false;
        self
    }

    /// Calculate the backoff delay for a given attempt.
    ///
    /// Uses exponential backoff: min(max_delay, base_delay * 2^attempt),
    /// optionally with ±25% jitter to avoid thundering herds.
    pub fn calculate_delay(&self, attempt: u32) -> Duration {
        let base_ms = self.base_delay.as_millis() as u64;
        let max_ms = self.max_delay.as_millis() as u64;

        let delay_ms = base_ms.saturating_mul(1u64 << attempt.min(20));
        let capped_delay_ms = delay_ms.min(max_ms);

        let final_delay_ms = if self.jitter {
            let jitter_range = capped_delay_ms / 4;
            let jitter = (std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .unwrap_or_default()
                .subsec_nanos() as u64)
                % (jitter_range * 2 + 1);
            capped_delay_ms.saturating_sub(jitter_range) + jitter
        } else {
            capped_delay_ms
        };

        Duration::from_millis(final_delay_ms)
    }
}

/// A raw queue message: opaque payload plus enqueue metadata.
#[derive(Debug, Clone)]
pub struct RawMessage {
    /// Message payload (may be absent for tombstones)
    pub payload: Option<Vec<u8>>,

    /// Message key
    pub key: Option<Vec<u8>>,

    /// Topic name
    pub topic: String,

    /// Partition number
    pub partition: i32,

    /// Offset within the partition
    pub offset: i64,

    /// Broker timestamp (milliseconds since epoch)
    pub timestamp: i64,
}

impl RawMessage {
    /// The payload bytes, empty if absent.
    pub fn payload_bytes(&self) -> &[u8] {
        self.payload.as_deref().unwrap_or(&[])
    }
}

/// Result of a poll with backoff information.
#[derive(Debug)]
pub enum PollOutcome {
    /// Successfully received a message.
    Message(RawMessage),
    /// Poll timed out (no messages available).
    Timeout,
    /// Poll failed with an error and a backoff recommendation.
    Error {
        /// The error that occurred.
        error: Error,
        /// Recommended backoff before the next attempt.
        backoff: Duration,
    },
}

/// Builder for creating a queue consumer.
pub struct QueueConsumerBuilder {
    config: KafkaConfig,
    retry_config: RetryConfig,
}

impl QueueConsumerBuilder {
    /// Create a new consumer builder.
    pub fn new(config: KafkaConfig) -> Self {
        Self {
            config,
            retry_config: RetryConfig::default(),
        }
    }

    /// Set custom retry configuration.
    pub fn with_retry_config(mut self, retry_config: RetryConfig) -> Self {
        self.retry_config = retry_config;
        self
    }

    /// Build the consumer and subscribe to the configured topic.
    pub fn build(self) -> Result<QueueConsumer> {
        let mut client_config = ClientConfig::new();

        client_config
            .set("bootstrap.servers", self.config.bootstrap_servers.join(","))
            .set("group.id", &self.config.consumer_group)
            // Manual commits only - the pipeline commits from its watermark
            .set("enable.auto.commit", "false")
            .set(
                "auto.offset.reset",
                match self.config.auto_offset_reset {
                    crate::config::OffsetReset::Earliest => "earliest",
                    crate::config::OffsetReset::Latest => "latest",
                },
            )
            .set(
                "session.timeout.ms",
                self.config.session_timeout_ms.to_string(),
            )
            .set(
                "heartbeat.interval.ms",
                self.config.heartbeat_interval_ms.to_string(),
            )
            // max.poll.interval.ms must exceed the slowest sink write
            .set(
                "max.poll.interval.ms",
                self.config.max_poll_interval_ms.to_string(),
            )
            .set("partition.assignment.strategy", "cooperative-sticky")
            .set("enable.auto.offset.store", "false");

        if let Some(ref protocol) = self.config.security.protocol {
            client_config.set("security.protocol", protocol);
        }
        if let Some(ref mechanism) = self.config.security.sasl_mechanism {
            client_config.set("sasl.mechanism", mechanism);
        }
        if let Some(ref username) = self.config.security.sasl_username {
            client_config.set("sasl.username", username);
        }
        if let Some(ref password) = self.config.security.sasl_password {
            client_config.set("sasl.password", password);
        }
        if let Some(ref path) = self.config.security.ssl_ca_location {
            client_config.set("ssl.ca.location", path.to_string_lossy().as_ref());
        }
        if let Some(ref path) = self.config.security.ssl_cert_location {
            client_config.set("ssl.certificate.location", path.to_string_lossy().as_ref());
        }
        if let Some(ref path) = self.config.security.ssl_key_location {
            client_config.set("ssl.key.location", path.to_string_lossy().as_ref());
        }

        let consumer: StreamConsumer = client_config.create().map_err(|e| {
            Error::Queue(QueueError::ConnectionFailed {
                broker: self.config.bootstrap_servers.join(","),
                message: e.to_string(),
            })
        })?;

        consumer
            .subscribe(&[&self.config.topic])
            .map_err(|e| Error::Queue(QueueError::Subscribe(e.to_string())))?;

        info!(
            topic = %self.config.topic,
            group = %self.config.consumer_group,
            servers = %self.config.bootstrap_servers.join(","),
            "Kafka consumer subscribed"
        );

        Ok(QueueConsumer {
            consumer: Arc::new(consumer),
            topic: self.config.topic,
            retry_config: self.retry_config,
            consecutive_failures: AtomicU32::new(0),
        })
    }
}

/// Queue consumer with exponential backoff on poll and commit failures.
pub struct QueueConsumer {
    consumer: Arc<StreamConsumer>,
    topic: String,
    retry_config: RetryConfig,
    consecutive_failures: AtomicU32,
}

impl QueueConsumer {
    /// Poll for the next message with a timeout.
    pub async fn poll(&self, timeout: Duration) -> Option<Result<RawMessage>> {
        use futures::StreamExt;

        let stream = self.consumer.stream();
        tokio::pin!(stream);

        match tokio::time::timeout(timeout, stream.next()).await {
            Ok(Some(Ok(msg))) => Some(Ok(Self::convert_message(&msg))),
            Ok(Some(Err(e))) => Some(Err(Error::Queue(QueueError::Poll(e.to_string())))),
            Ok(None) => None,
            Err(_) => None, // Timeout
        }
    }

    /// Poll with automatic backoff bookkeeping on errors.
    pub async fn poll_with_backoff(&self, timeout: Duration) -> PollOutcome {
        match self.poll(timeout).await {
            Some(Ok(msg)) => {
                self.consecutive_failures.store(0, Ordering::Relaxed);
                PollOutcome::Message(msg)
            }
            Some(Err(e)) => {
                let failures = self.consecutive_failures.fetch_add(1, Ordering::Relaxed) + 1;
                let backoff = self.retry_config.calculate_delay(failures);
                warn!(
                    failures = failures,
                    backoff_ms = backoff.as_millis(),
                    error = %e,
                    "Poll error, backing off"
                );
                PollOutcome::Error { error: e, backoff }
            }
            None => PollOutcome::Timeout,
        }
    }

    /// Convert a borrowed message to an owned RawMessage.
    fn convert_message(msg: &BorrowedMessage) -> RawMessage {
        RawMessage {
            payload: msg.payload().map(|v| v.to_vec()),
            key: msg.key().map(|k| k.to_vec()),
            topic: msg.topic().to_string(),
            partition: msg.partition(),
            offset: msg.offset(),
            timestamp: msg.timestamp().to_millis().unwrap_or(0),
        }
    }

    /// Commit watermark offsets for multiple partitions.
    ///
    /// Commits offset + 1 per Kafka convention (the committed offset is the
    /// next offset to read).
    pub async fn commit_offsets(&self, offsets: &[(String, i32, i64)]) -> Result<()> {
        let mut tpl = TopicPartitionList::new();

        for (topic, partition, offset) in offsets {
            tpl.add_partition_offset(topic, *partition, rdkafka::Offset::Offset(offset + 1))
                .map_err(|e| Error::Queue(QueueError::OffsetCommit(e.to_string())))?;
        }

        self.consumer
            .commit(&tpl, rdkafka::consumer::CommitMode::Async)
            .map_err(|e| Error::Queue(QueueError::OffsetCommit(e.to_string())))?;

        debug!(offsets = ?offsets, "Offsets committed");
        Ok(())
    }

    /// Commit offsets, retrying with exponential backoff on failure.
    pub async fn commit_offsets_with_retry(&self, offsets: &[(String, i32, i64)]) -> Result<()> {
        let mut attempt = 0;

        loop {
            match self.commit_offsets(offsets).await {
                Ok(()) => {
                    self.consecutive_failures.store(0, Ordering::Relaxed);
                    return Ok(());
                }
                Err(e) => {
                    attempt += 1;
                    if attempt >= self.retry_config.max_retries {
                        warn!(
                            attempt = attempt,
                            max_retries = self.retry_config.max_retries,
                            error = %e,
                            "Offset commit failed after max retries"
                        );
                        return Err(e);
                    }

                    let delay = self.retry_config.calculate_delay(attempt);
                    warn!(
                        attempt = attempt,
                        delay_ms = delay.as_millis(),
                        error = %e,
                        "Offset commit failed, retrying with backoff"
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    /// Get the topic name.
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Get the retry configuration.
    pub fn retry_config(&self) -> &RetryConfig {
        &self.retry_config
    }
}
