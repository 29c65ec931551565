use thiserror::Error;

use crate::store::StoreError;

/// A single inbound record could not be turned into a [`Tick`](crate::model::tick::Tick).
#[derive(Error, Debug, Clone, PartialEq)]
pub enum InputError {
    #[error("malformed record: {0}")]
    Malformed(String),

    #[error("invalid timestamp '{0}'")]
    InvalidTimestamp(String),

    #[error("empty symbol")]
    EmptySymbol,

    #[error("invalid price {0}")]
    InvalidPrice(f64),

    #[error("invalid volume {0}")]
    InvalidVolume(i64),
}

/// A write reached the store but did not commit. The transaction is rolled back.
#[derive(Error, Debug)]
pub enum WriteError {
    #[error("write failed: {0}")]
    Store(#[source] StoreError),

    #[error("connection lost during write: {0}")]
    ConnectionLost(#[source] StoreError),
}

impl WriteError {
    pub fn is_connection_lost(&self) -> bool {
        matches!(self, Self::ConnectionLost(_))
    }
}

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchError {
    #[error("dispatcher closed")]
    Closed,

    #[error("dispatcher full")]
    Full,
}
