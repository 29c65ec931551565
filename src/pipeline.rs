//! Generate -> dispatch -> persist loop.
//!
//! The producer runs as an async task paced by a fixed interval. The consumer
//! owns the [`PersistenceWriter`] on a blocking thread so store I/O never
//! stalls the runtime or the analytics path. A `watch` shutdown signal stops
//! the producer between iterations; the consumer then drains what is queued.

use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use serde::Serialize;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use uuid::Uuid;

use crate::backoff::ReconnectBackoff;
use crate::config::{GeneratorConfig, WriterConfig};
use crate::dispatch::{self, ChannelSender, TickSource};
use crate::error::DispatchError;
use crate::generator::TickGenerator;
use crate::store::StoreConnector;
use crate::writer::{PersistenceWriter, WriteOutcome};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ProducerSummary {
    pub iterations: usize,
    pub generated: usize,
    pub dispatched: usize,
    pub dispatch_failures: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ConsumerSummary {
    /// Deliveries taken from the source, requeued ones included.
    pub received: usize,
    pub written: usize,
    pub skipped: usize,
    pub failed: usize,
    pub paused: usize,
    pub redelivered: usize,
    pub dropped: usize,
    pub abandoned: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct IngestSummary {
    pub run_id: Uuid,
    pub producer: ProducerSummary,
    pub consumer: ConsumerSummary,
    pub connected_at_exit: bool,
}

#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub interval: Duration,
    pub iterations: Option<usize>,
    pub channel_capacity: usize,
    pub max_redeliveries: u32,
    pub disconnected_pause: Duration,
    pub reconnect_initial: Duration,
    pub reconnect_max: Duration,
}

impl PipelineSettings {
    pub fn from_config(generator: &GeneratorConfig, writer: &WriterConfig) -> Self {
        Self {
            interval: Duration::from_millis(generator.interval_ms),
            iterations: generator.iterations,
            channel_capacity: writer.channel_capacity,
            max_redeliveries: writer.max_redeliveries,
            disconnected_pause: Duration::from_millis(writer.disconnected_pause_ms),
            reconnect_initial: Duration::from_millis(writer.reconnect_initial_ms),
            reconnect_max: Duration::from_millis(writer.reconnect_max_ms),
        }
    }
}

/// Drive `generator` at a fixed cadence until `iterations` is reached, the
/// generator is exhausted, the dispatcher closes, or shutdown is signalled.
pub async fn run_producer<G: TickGenerator>(
    mut generator: G,
    sink: ChannelSender,
    interval: Duration,
    iterations: Option<usize>,
    mut shutdown: watch::Receiver<bool>,
) -> ProducerSummary {
    let mut summary = ProducerSummary::default();
    let mut shutdown_live = true;
    let mut ticker = tokio::time::interval(interval.max(Duration::from_millis(1)));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        if *shutdown.borrow() {
            tracing::info!("Producer stopping on shutdown signal");
            break;
        }
        if iterations.is_some_and(|limit| summary.iterations >= limit) {
            break;
        }

        tokio::select! {
            _ = ticker.tick() => {}
            changed = shutdown.changed(), if shutdown_live => {
                // Sender gone: nobody can signal shutdown any more.
                shutdown_live = changed.is_ok();
                continue;
            }
        }
        summary.iterations += 1;

        let Some(tick) = generator.next_tick() else {
            if generator.is_exhausted() {
                tracing::info!("Tick source exhausted");
                break;
            }
            continue;
        };
        summary.generated += 1;
        tracing::debug!(symbol = %tick.symbol, price = tick.price, "Tick generated");

        match sink.send_async(tick).await {
            Ok(()) => summary.dispatched += 1,
            Err(DispatchError::Closed) => {
                summary.dispatch_failures += 1;
                tracing::warn!("Dispatcher closed, producer exiting");
                break;
            }
            Err(e) => {
                summary.dispatch_failures += 1;
                tracing::warn!(error = %e, "Tick dispatch failed");
            }
        }
    }
    summary
}

/// Persist everything `source` delivers until it closes. Blocking.
///
/// Acts as the reconnect policy: while the writer is disconnected a reconnect
/// is attempted whenever `backoff` says one is due. Ticks the writer paused on
/// are requeued without spending their redelivery budget; ticks whose write
/// failed are nacked.
pub fn run_consumer<C, S>(
    writer: &mut PersistenceWriter<C>,
    source: &mut S,
    backoff: &mut ReconnectBackoff,
    shutdown: &watch::Receiver<bool>,
) -> ConsumerSummary
where
    C: StoreConnector,
    S: TickSource,
{
    let mut summary = ConsumerSummary::default();

    while let Some(envelope) = source.receive() {
        summary.received += 1;

        if !writer.is_connected() {
            if *shutdown.borrow() {
                summary.abandoned += 1;
                continue;
            }
            let now = Instant::now();
            if backoff.is_due(now) {
                if writer.reconnect() {
                    backoff.record_success();
                } else {
                    let wait = backoff.record_failure(now);
                    tracing::warn!(
                        failures = backoff.failures(),
                        retry_in_ms = wait.as_millis() as u64,
                        "Store reconnect failed"
                    );
                }
            }
        }

        match writer.process(&envelope.tick) {
            Ok(WriteOutcome::Written) => summary.written += 1,
            Ok(WriteOutcome::Skipped) => summary.skipped += 1,
            Ok(WriteOutcome::Paused) => {
                summary.paused += 1;
                source.requeue(envelope);
            }
            Err(e) => {
                summary.failed += 1;
                if e.is_connection_lost() {
                    backoff.record_failure(Instant::now());
                }
                if source.nack(envelope) {
                    summary.redelivered += 1;
                } else {
                    summary.dropped += 1;
                }
            }
        }
    }

    if summary.abandoned > 0 {
        tracing::warn!(
            abandoned = summary.abandoned,
            "Shutdown while disconnected, queued ticks were not persisted"
        );
    }
    summary
}

/// Run one ingest session end to end and report what happened.
pub async fn run_ingest<G, C>(
    generator: G,
    connector: C,
    settings: PipelineSettings,
    shutdown: watch::Receiver<bool>,
) -> Result<IngestSummary>
where
    G: TickGenerator,
    C: StoreConnector + 'static,
{
    let run_id = Uuid::new_v4();
    tracing::info!(
        %run_id,
        store = %connector.describe(),
        interval_ms = settings.interval.as_millis() as u64,
        iterations = ?settings.iterations,
        "Starting ingest"
    );

    let (sink, mut source) = dispatch::channel(settings.channel_capacity, settings.max_redeliveries);

    let consumer_shutdown = shutdown.clone();
    let disconnected_pause = settings.disconnected_pause;
    let mut backoff = ReconnectBackoff::new(settings.reconnect_initial, settings.reconnect_max);
    let consumer = tokio::task::spawn_blocking(move || {
        let mut writer = PersistenceWriter::new(connector, disconnected_pause);
        if !writer.is_connected() {
            tracing::warn!("Writer starting disconnected, ticks will be paused until reconnect");
        }
        let summary = run_consumer(&mut writer, &mut source, &mut backoff, &consumer_shutdown);
        let connected = writer.is_connected();
        writer.disconnect();
        (summary, connected)
    });

    let producer = run_producer(
        generator,
        sink,
        settings.interval,
        settings.iterations,
        shutdown,
    )
    .await;

    let (consumer, connected_at_exit) = consumer.await.context("consumer task failed")?;

    tracing::info!(
        %run_id,
        generated = producer.generated,
        written = consumer.written,
        skipped = consumer.skipped,
        failed = consumer.failed,
        dropped = consumer.dropped,
        "Ingest finished"
    );

    Ok(IngestSummary {
        run_id,
        producer,
        consumer,
        connected_at_exit,
    })
}
