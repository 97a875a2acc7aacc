//! Pipeline orchestration.
//!
//! Wires consumer -> decoder -> router -> {object sink, warehouse sink} and
//! owns the lifecycle: `Created -> Running -> Draining -> Stopped`. Each
//! message is processed end-to-end by an independent worker task; there is
//! no ordering dependency between messages and no cross-event locking. The
//! two sink writes for one event run concurrently and may complete in
//! either order, or one may fail while the other succeeds.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::broadcast;
use tokio::task::JoinSet;
use tracing::{debug, error, info, trace, warn};

use crate::config::Config;
use crate::decode::Decoder;
use crate::error::{Result, WriteError};
use crate::event::Event;
use crate::health::HealthCheck;
use crate::kafka::{CompletedOffsets, PollOutcome, QueueConsumer, QueueConsumerBuilder, RawMessage};
use crate::metrics::PipelineMetrics;
use crate::route::Lane;
use crate::schema::TableSchema;
use crate::sink::{ObjectSink, WarehouseSink};

/// Lifecycle state of the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    /// Constructed, not yet consuming
    Created,
    /// Consuming and fanning out
    Running,
    /// Stop signal received, finishing in-flight work
    Draining,
    /// Terminal
    Stopped,
}

/// Sink coordinates for one routed lane.
struct LaneBinding {
    event_type: &'static str,
    table: &'static str,
    schema: Arc<TableSchema>,
}

/// Everything a worker task needs, shared behind one Arc.
struct WorkerContext {
    decoder: Decoder,
    object_sink: ObjectSink,
    warehouse_sink: WarehouseSink,
    order: LaneBinding,
    inventory: LaneBinding,
    user_activity: LaneBinding,
    metrics: Arc<PipelineMetrics>,
    health: Arc<HealthCheck>,
    offsets: CompletedOffsets,
}

impl WorkerContext {
    fn binding(&self, lane: Lane) -> Option<&LaneBinding> {
        match lane {
            Lane::Order => Some(&self.order),
            Lane::Inventory => Some(&self.inventory),
            Lane::UserActivity => Some(&self.user_activity),
            Lane::Unrouted => None,
        }
    }
}

/// The streaming fan-out pipeline.
pub struct Pipeline {
    config: Config,
    consumer: QueueConsumer,
    ctx: Arc<WorkerContext>,
    shutdown_tx: broadcast::Sender<()>,
    state: PipelineState,
}

impl Pipeline {
    /// Construct the pipeline: validate config, build both sinks and the
    /// consumer, and probe the warehouse. Any failure here aborts startup -
    /// the pipeline never starts partially wired.
    pub async fn new(config: Config) -> Result<Self> {
        config.validate()?;

        let metrics = Arc::new(PipelineMetrics::new());
        let health = Arc::new(HealthCheck::new());
        health.register("kafka");
        health.register("object_store");
        health.register("warehouse");

        let object_sink = ObjectSink::from_config(&config.object_store)?;
        health.mark_healthy("object_store");

        let warehouse_sink = WarehouseSink::from_config(&config.warehouse)?;
        warehouse_sink.probe("order_events").await?;
        health.mark_healthy("warehouse");

        let consumer = QueueConsumerBuilder::new(config.kafka.clone()).build()?;
        health.mark_healthy("kafka");

        let ctx = Arc::new(WorkerContext {
            decoder: Decoder::new(Arc::clone(&metrics)),
            object_sink,
            warehouse_sink,
            order: LaneBinding {
                event_type: "order",
                table: "order_events",
                schema: Arc::new(TableSchema::order()),
            },
            inventory: LaneBinding {
                event_type: "inventory",
                table: "inventory_events",
                schema: Arc::new(TableSchema::inventory()),
            },
            user_activity: LaneBinding {
                event_type: "user_activity",
                table: "user_activity_events",
                schema: Arc::new(TableSchema::user_activity()),
            },
            metrics,
            health,
            offsets: CompletedOffsets::new(),
        });

        let (shutdown_tx, _) = broadcast::channel(1);

        Ok(Self {
            config,
            consumer,
            ctx,
            shutdown_tx,
            state: PipelineState::Created,
        })
    }

    /// Run until the shutdown signal fires, then drain.
    pub async fn run(&mut self) -> Result<()> {
        self.state = PipelineState::Running;
        info!(
            topic = %self.config.kafka.topic,
            base_path = %self.ctx.object_sink.base_path(),
            max_in_flight = self.config.pipeline.max_in_flight,
            "Pipeline running"
        );

        let mut shutdown_rx = self.shutdown_tx.subscribe();
        let mut workers: JoinSet<()> = JoinSet::new();
        let poll_timeout = Duration::from_millis(self.config.kafka.poll_timeout_ms);
        let mut commit_timer = tokio::time::interval(Duration::from_secs(
            self.config.pipeline.commit_interval_seconds,
        ));
        commit_timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            // Reap finished workers without blocking
            while workers.try_join_next().is_some() {}

            // Backpressure: at capacity, wait for a slot instead of polling
            if workers.len() >= self.config.pipeline.max_in_flight {
                tokio::select! {
                    _ = shutdown_rx.recv() => break,
                    _ = workers.join_next() => {}
                }
                continue;
            }

            tokio::select! {
                _ = shutdown_rx.recv() => break,

                _ = commit_timer.tick() => {
                    self.commit_watermarks().await;
                }

                outcome = self.consumer.poll_with_backoff(poll_timeout) => {
                    match outcome {
                        PollOutcome::Message(msg) => {
                            self.ctx.health.mark_healthy("kafka");
                            self.ctx.metrics.record_message();
                            self.ctx
                                .offsets
                                .observe(&msg.topic, msg.partition, msg.offset);

                            let ctx = Arc::clone(&self.ctx);
                            workers.spawn(async move {
                                process_message(ctx, msg).await;
                            });
                        }
                        PollOutcome::Timeout => {}
                        PollOutcome::Error { error, backoff } => {
                            self.ctx
                                .health
                                .mark_unhealthy("kafka", &format!("Poll failed: {}", error));
                            tokio::select! {
                                _ = shutdown_rx.recv() => break,
                                _ = tokio::time::sleep(backoff) => {}
                            }
                        }
                    }
                }
            }
        }

        self.drain(&mut workers).await;
        Ok(())
    }

    /// Finish in-flight work within the drain timeout, then stop.
    async fn drain(&mut self, workers: &mut JoinSet<()>) {
        self.state = PipelineState::Draining;
        info!(in_flight = workers.len(), "Pipeline draining");

        let deadline = Duration::from_secs(self.config.pipeline.drain_timeout_seconds);
        let drained = tokio::time::timeout(deadline, async {
            while workers.join_next().await.is_some() {}
        })
        .await;

        if drained.is_err() {
            warn!(
                abandoned = workers.len(),
                "Drain timeout exceeded, abandoning in-flight work to queue redelivery"
            );
            workers.abort_all();
            while workers.join_next().await.is_some() {}
        }

        self.commit_watermarks().await;

        self.state = PipelineState::Stopped;
        let snapshot = self.ctx.metrics.snapshot();
        info!(
            messages = snapshot.messages_total,
            invalid_messages = snapshot.invalid_messages_total,
            object_writes = snapshot.object_writes_total,
            warehouse_rows = snapshot.warehouse_rows_total,
            "Pipeline stopped"
        );
    }

    /// Commit watermarks that advanced since the last commit.
    async fn commit_watermarks(&self) {
        let pending = self.ctx.offsets.pending_commits();
        if pending.is_empty() {
            return;
        }

        match self.consumer.commit_offsets_with_retry(&pending).await {
            Ok(()) => {
                for (topic, partition, offset) in &pending {
                    self.ctx.offsets.mark_committed(topic, *partition, *offset);
                }
                self.ctx.metrics.record_offset_commit();
                self.ctx.health.mark_healthy("kafka");
            }
            Err(e) => {
                error!(error = %e, "Watermark commit failed");
                self.ctx
                    .health
                    .mark_degraded("kafka", &format!("Offset commit failing: {}", e));
            }
        }
    }

    /// Current lifecycle state.
    pub fn state(&self) -> PipelineState {
        self.state
    }

    /// Shared metrics handle.
    pub fn metrics(&self) -> Arc<PipelineMetrics> {
        Arc::clone(&self.ctx.metrics)
    }

    /// Shared health handle.
    pub fn health(&self) -> Arc<HealthCheck> {
        Arc::clone(&self.ctx.health)
    }

    /// Sender that triggers a graceful drain.
    pub fn shutdown_signal(&self) -> broadcast::Sender<()> {
        self.shutdown_tx.clone()
    }
}

/// Process one message end-to-end and settle its offset.
async fn process_message(ctx: Arc<WorkerContext>, msg: RawMessage) {
    ctx.metrics.worker_started();
    let settled = handle_message(&ctx, &msg).await;
    if settled {
        ctx.offsets.complete(&msg.topic, msg.partition, msg.offset);
    }
    // Unsettled offsets stay outstanding and hold the commit watermark, so
    // the queue redelivers them after a restart or rebalance.
    ctx.metrics.worker_finished();
}

/// Decode, route, and fan out one message.
///
/// Returns whether the offset may be acknowledged: true for success and for
/// terminal outcomes (decode failure, unrouted type, schema violation),
/// false when a retryable sink failure should leave it to redelivery.
async fn handle_message(ctx: &WorkerContext, msg: &RawMessage) -> bool {
    let event = match ctx.decoder.decode(msg.payload_bytes()) {
        Ok(event) => event,
        // Counted and logged by the decoder; the payload is dropped
        Err(_) => return true,
    };
    ctx.metrics.record_decoded();

    let lane = Lane::classify(&event);
    ctx.metrics.record_routed(lane);

    let Some(binding) = ctx.binding(lane) else {
        trace!(
            event_type = event.event_type().unwrap_or("<missing>"),
            "No lane for event type, dropping"
        );
        return true;
    };

    let at = match event.ingestion_datetime() {
        Ok(at) => at,
        Err(e) => {
            // The decoder stamps every event; reaching this is a bug
            error!(error = %e, "Invariant violation: event has no usable ingestion_time");
            return true;
        }
    };

    let key = ctx.object_sink.key_for(binding.event_type, at);

    let object_write = async {
        let start = Instant::now();
        let result = ctx.object_sink.write_object(&key, &event).await;
        (result, start.elapsed())
    };

    let warehouse_write = async {
        let start = Instant::now();
        let result = ctx
            .warehouse_sink
            .append_batch(binding.table, &binding.schema, std::slice::from_ref(&event))
            .await;
        (result, start.elapsed())
    };

    // Independent writes: either may finish first, either may fail alone
    let ((object_result, object_elapsed), (warehouse_result, warehouse_elapsed)) =
        tokio::join!(object_write, warehouse_write);

    let mut retryable_failure = false;

    match object_result {
        Ok(()) => {
            ctx.metrics.record_object_write(object_elapsed);
            ctx.health.mark_healthy("object_store");
        }
        Err(e) => {
            ctx.metrics.record_object_write_error();
            ctx.health
                .mark_degraded("object_store", &format!("Write failed: {}", e));
            error!(
                error = %e,
                key = %key,
                payload = %payload_excerpt(&event),
                "Object write failed"
            );
            retryable_failure |= e.is_retryable();
        }
    }

    match warehouse_result {
        Ok(()) => {
            ctx.metrics.record_warehouse_append(1, warehouse_elapsed);
            ctx.health.mark_healthy("warehouse");
        }
        Err(e) => {
            ctx.metrics.record_warehouse_write_error();
            if let WriteError::SchemaViolation { .. } = e {
                ctx.metrics.record_schema_violation();
                warn!(
                    error = %e,
                    table = binding.table,
                    payload = %payload_excerpt(&event),
                    "Event rejected by schema"
                );
            } else {
                ctx.health
                    .mark_degraded("warehouse", &format!("Append failed: {}", e));
                error!(
                    error = %e,
                    table = binding.table,
                    payload = %payload_excerpt(&event),
                    "Warehouse append failed"
                );
            }
            retryable_failure |= e.is_retryable();
        }
    }

    if !retryable_failure {
        debug!(
            event_type = binding.event_type,
            offset = msg.offset,
            "Event fanned out"
        );
    }

    !retryable_failure
}

/// Compact event excerpt for failure log lines.
fn payload_excerpt(event: &Event) -> String {
    let text = serde_json::to_string(event.fields()).unwrap_or_default();
    if text.chars().count() > 256 {
        let mut excerpt: String = text.chars().take(256).collect();
        excerpt.push_str("...");
        excerpt
    } else {
        text
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_transitions_order() {
        // The state machine is linear; Stopped is terminal
        let states = [
            PipelineState::Created,
            PipelineState::Running,
            PipelineState::Draining,
            PipelineState::Stopped,
        ];
        for window in states.windows(2) {
            assert_ne!(window[0], window[1]);
        }
    }
}
