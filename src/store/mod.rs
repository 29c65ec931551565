//! Durable tick table.
//!
//! The `(symbol, observed_at)` uniqueness constraint lives in the backend schema,
//! so concurrent or retried writers stay correct without any application-side
//! check-then-insert.

use std::collections::BTreeSet;

use thiserror::Error;

use crate::config::{StoreBackend, StoreConfig};
use crate::model::tick::Tick;

pub mod postgres;
pub mod sqlite;

pub use self::postgres::{PostgresConnector, PostgresTickStore};
pub use self::sqlite::{SqliteConnector, SqliteTickStore};

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("{backend} store unreachable: {reason}")]
    Connect {
        backend: &'static str,
        reason: String,
    },

    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("postgres error: {0}")]
    Postgres(#[from] ::postgres::Error),

    #[error("invalid stored row: {0}")]
    Decode(String),
}

impl StoreError {
    /// True when the failure means the connection itself is gone, not just the statement.
    pub fn is_connection_failure(&self) -> bool {
        match self {
            Self::Connect { .. } => true,
            Self::Postgres(e) => e.is_closed(),
            Self::Sqlite(_) | Self::Decode(_) => false,
        }
    }
}

pub trait TickStore: Send {
    /// Insert the tick unless a row with the same natural key exists.
    /// Returns `true` when a row was inserted. Atomic: no partial row on error.
    fn upsert_if_absent(&mut self, tick: &Tick) -> Result<bool, StoreError>;

    /// All ticks, optionally restricted to `symbols`, ordered by timestamp ascending.
    fn query_all(&mut self, symbols: Option<&BTreeSet<String>>) -> Result<Vec<Tick>, StoreError>;

    fn is_healthy(&mut self) -> bool {
        true
    }
}

/// Opens store connections. Held by the writer so it can reconnect.
pub trait StoreConnector: Send {
    type Store: TickStore;

    fn connect(&self) -> Result<Self::Store, StoreError>;

    fn describe(&self) -> String;
}

/// Connector chosen at runtime from configuration.
#[derive(Debug, Clone)]
pub enum AnyConnector {
    Postgres(PostgresConnector),
    Sqlite(SqliteConnector),
}

impl AnyConnector {
    pub fn from_config(cfg: &StoreConfig) -> Self {
        match cfg.backend {
            StoreBackend::Postgres => Self::Postgres(PostgresConnector::from_config(cfg)),
            StoreBackend::Sqlite => Self::Sqlite(SqliteConnector::new(&cfg.sqlite_path)),
        }
    }
}

pub enum AnyStore {
    Postgres(PostgresTickStore),
    Sqlite(SqliteTickStore),
}

impl StoreConnector for AnyConnector {
    type Store = AnyStore;

    fn connect(&self) -> Result<AnyStore, StoreError> {
        match self {
            Self::Postgres(c) => c.connect().map(AnyStore::Postgres),
            Self::Sqlite(c) => c.connect().map(AnyStore::Sqlite),
        }
    }

    fn describe(&self) -> String {
        match self {
            Self::Postgres(c) => c.describe(),
            Self::Sqlite(c) => c.describe(),
        }
    }
}

impl TickStore for AnyStore {
    fn upsert_if_absent(&mut self, tick: &Tick) -> Result<bool, StoreError> {
        match self {
            Self::Postgres(s) => s.upsert_if_absent(tick),
            Self::Sqlite(s) => s.upsert_if_absent(tick),
        }
    }

    fn query_all(&mut self, symbols: Option<&BTreeSet<String>>) -> Result<Vec<Tick>, StoreError> {
        match self {
            Self::Postgres(s) => s.query_all(symbols),
            Self::Sqlite(s) => s.query_all(symbols),
        }
    }

    fn is_healthy(&mut self) -> bool {
        match self {
            Self::Postgres(s) => s.is_healthy(),
            Self::Sqlite(s) => s.is_healthy(),
        }
    }
}
