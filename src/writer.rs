use std::time::Duration;

use crate::error::WriteError;
use crate::model::tick::Tick;
use crate::store::{StoreConnector, TickStore};

/// `Disconnected -> Connecting -> Connected -> (Writing <-> Connected) -> Disconnected`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionPhase {
    Disconnected,
    Connecting,
    Connected,
    Writing,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConnectionState {
    pub connected: bool,
    pub last_error: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    /// The tick is now durably stored.
    Written,
    /// A row with the same natural key already existed.
    Skipped,
    /// Not connected; nothing was attempted.
    Paused,
}

/// Consumes ticks and stores each one at most once.
///
/// Connection failures never escape as panics or process exits: the writer
/// marks itself disconnected and `process` short-circuits (after a bounded
/// pause) until [`PersistenceWriter::reconnect`] succeeds.
pub struct PersistenceWriter<C: StoreConnector> {
    connector: C,
    store: Option<C::Store>,
    phase: ConnectionPhase,
    state: ConnectionState,
    disconnected_pause: Duration,
}

impl<C: StoreConnector> PersistenceWriter<C> {
    pub fn new(connector: C, disconnected_pause: Duration) -> Self {
        let mut writer = Self {
            connector,
            store: None,
            phase: ConnectionPhase::Disconnected,
            state: ConnectionState::default(),
            disconnected_pause,
        };
        writer.reconnect();
        writer
    }

    /// Attempt to (re)establish the store connection. No-op when already connected.
    pub fn reconnect(&mut self) -> bool {
        if self.store.is_some() {
            return true;
        }
        self.phase = ConnectionPhase::Connecting;
        let target = self.connector.describe();
        match self.connector.connect() {
            Ok(store) => {
                tracing::info!(store = %target, "Tick store connected");
                self.store = Some(store);
                self.phase = ConnectionPhase::Connected;
                self.state = ConnectionState {
                    connected: true,
                    last_error: None,
                };
                true
            }
            Err(e) => {
                tracing::error!(store = %target, error = %e, "Tick store connection failed");
                self.mark_disconnected(e.to_string());
                false
            }
        }
    }

    pub fn process(&mut self, tick: &Tick) -> Result<WriteOutcome, WriteError> {
        let Some(store) = self.store.as_mut() else {
            std::thread::sleep(self.disconnected_pause);
            return Ok(WriteOutcome::Paused);
        };

        self.phase = ConnectionPhase::Writing;
        let result = store.upsert_if_absent(tick);
        let healthy = store.is_healthy();
        self.phase = ConnectionPhase::Connected;

        match result {
            Ok(true) => {
                tracing::info!(
                    symbol = %tick.symbol,
                    observed_at = %tick.observed_at,
                    price = tick.price,
                    volume = tick.volume,
                    "Tick written"
                );
                Ok(WriteOutcome::Written)
            }
            Ok(false) => {
                tracing::debug!(
                    symbol = %tick.symbol,
                    observed_at = %tick.observed_at,
                    "Duplicate tick skipped"
                );
                Ok(WriteOutcome::Skipped)
            }
            Err(e) if e.is_connection_failure() || !healthy => {
                tracing::error!(symbol = %tick.symbol, error = %e, "Tick write failed, connection lost");
                self.mark_disconnected(e.to_string());
                Err(WriteError::ConnectionLost(e))
            }
            Err(e) => {
                tracing::error!(symbol = %tick.symbol, error = %e, "Tick write failed");
                self.state.last_error = Some(e.to_string());
                Err(WriteError::Store(e))
            }
        }
    }

    /// Drop the connection, e.g. on shutdown.
    pub fn disconnect(&mut self) {
        if self.store.take().is_some() {
            tracing::info!("Tick store disconnected");
        }
        self.phase = ConnectionPhase::Disconnected;
        self.state.connected = false;
    }

    pub fn is_connected(&self) -> bool {
        self.state.connected
    }

    pub fn state(&self) -> &ConnectionState {
        &self.state
    }

    pub fn phase(&self) -> ConnectionPhase {
        self.phase
    }

    pub fn store_mut(&mut self) -> Option<&mut C::Store> {
        self.store.as_mut()
    }

    fn mark_disconnected(&mut self, error: String) {
        self.store = None;
        self.phase = ConnectionPhase::Disconnected;
        self.state = ConnectionState {
            connected: false,
            last_error: Some(error),
        };
    }
}
