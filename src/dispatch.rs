//! At-least-once delivery between producers and the persistence consumer.
//!
//! A successful `send` means the tick is queued and will be handed to the
//! consumer at least once. Envelopes the consumer could not persist are
//! `nack`ed and redelivered ahead of fresh traffic, so the same tick may reach
//! the writer more than once; idempotent storage absorbs the duplicates.
//! Envelopes that were never attempted (store down) are `requeue`d instead and
//! do not spend the redelivery budget.

use std::collections::VecDeque;

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

use crate::error::DispatchError;
use crate::model::tick::{DeliveryEnvelope, Tick};

pub trait TickSink: Send {
    fn send(&self, tick: Tick) -> Result<(), DispatchError>;
}

pub trait TickSource: Send {
    /// Blocks until an envelope is available. `None` once every sender is gone
    /// and nothing is left to redeliver.
    fn receive(&mut self) -> Option<DeliveryEnvelope>;

    /// Hand an undelivered envelope back for redelivery. Returns `false` when
    /// the redelivery budget is spent and the envelope was discarded.
    fn nack(&mut self, envelope: DeliveryEnvelope) -> bool;

    /// Put back an envelope that was not attempted. Keeps its attempt count.
    fn requeue(&mut self, envelope: DeliveryEnvelope);
}

/// Bounded in-process dispatcher. Per-producer FIFO.
pub fn channel(capacity: usize, max_redeliveries: u32) -> (ChannelSender, ChannelReceiver) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (
        ChannelSender { tx },
        ChannelReceiver {
            rx,
            redeliveries: VecDeque::new(),
            max_redeliveries,
        },
    )
}

#[derive(Debug, Clone)]
pub struct ChannelSender {
    tx: mpsc::Sender<DeliveryEnvelope>,
}

impl ChannelSender {
    /// Waits for capacity instead of failing when the queue is full.
    pub async fn send_async(&self, tick: Tick) -> Result<(), DispatchError> {
        self.tx
            .send(DeliveryEnvelope::new(tick))
            .await
            .map_err(|_| DispatchError::Closed)
    }
}

impl TickSink for ChannelSender {
    fn send(&self, tick: Tick) -> Result<(), DispatchError> {
        self.tx
            .try_send(DeliveryEnvelope::new(tick))
            .map_err(|e| match e {
                TrySendError::Full(_) => DispatchError::Full,
                TrySendError::Closed(_) => DispatchError::Closed,
            })
    }
}

#[derive(Debug)]
pub struct ChannelReceiver {
    rx: mpsc::Receiver<DeliveryEnvelope>,
    redeliveries: VecDeque<DeliveryEnvelope>,
    max_redeliveries: u32,
}

impl ChannelReceiver {
    pub fn pending_redeliveries(&self) -> usize {
        self.redeliveries.len()
    }

    /// Non-blocking variant of [`TickSource::receive`].
    pub fn try_receive(&mut self) -> Option<DeliveryEnvelope> {
        self.redeliveries
            .pop_front()
            .or_else(|| self.rx.try_recv().ok())
    }
}

impl TickSource for ChannelReceiver {
    fn receive(&mut self) -> Option<DeliveryEnvelope> {
        if let Some(envelope) = self.redeliveries.pop_front() {
            return Some(envelope);
        }
        self.rx.blocking_recv()
    }

    fn nack(&mut self, mut envelope: DeliveryEnvelope) -> bool {
        if envelope.attempt > self.max_redeliveries {
            tracing::error!(
                symbol = %envelope.tick.symbol,
                observed_at = %envelope.tick.observed_at,
                attempts = envelope.attempt,
                "Redelivery budget exhausted, discarding tick"
            );
            return false;
        }
        envelope.attempt += 1;
        tracing::debug!(
            symbol = %envelope.tick.symbol,
            attempt = envelope.attempt,
            "Tick queued for redelivery"
        );
        self.redeliveries.push_back(envelope);
        true
    }

    fn requeue(&mut self, envelope: DeliveryEnvelope) {
        self.redeliveries.push_front(envelope);
    }
}
