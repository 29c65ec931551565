use chrono::{DateTime, NaiveDateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};

use crate::error::InputError;

/// One timestamped price/volume observation. `(symbol, observed_at)` is the natural key.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Tick {
    pub symbol: String,
    pub observed_at: DateTime<Utc>,
    pub price: f64,
    pub volume: i64,
}

impl Tick {
    /// Timestamps are truncated to microseconds, the finest resolution the stores keep.
    pub fn new(symbol: impl Into<String>, observed_at: DateTime<Utc>, price: f64, volume: i64) -> Self {
        Self {
            symbol: symbol.into(),
            observed_at: observed_at.trunc_subsecs(6),
            price,
            volume,
        }
    }

    pub fn natural_key(&self) -> (&str, DateTime<Utc>) {
        (&self.symbol, self.observed_at)
    }
}

/// Wire form of a tick as supplied by external producers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawTick {
    pub symbol: String,
    pub timestamp: String,
    pub price: f64,
    pub volume: i64,
}

impl RawTick {
    /// Parse one JSON object into a raw record.
    pub fn from_json(line: &str) -> Result<Self, InputError> {
        serde_json::from_str(line).map_err(|e| InputError::Malformed(e.to_string()))
    }
}

impl TryFrom<RawTick> for Tick {
    type Error = InputError;

    fn try_from(raw: RawTick) -> Result<Self, Self::Error> {
        let symbol = raw.symbol.trim().to_ascii_uppercase();
        if symbol.is_empty() {
            return Err(InputError::EmptySymbol);
        }
        if !raw.price.is_finite() || raw.price < 0.0 {
            return Err(InputError::InvalidPrice(raw.price));
        }
        if raw.volume < 0 {
            return Err(InputError::InvalidVolume(raw.volume));
        }
        let observed_at = parse_timestamp(&raw.timestamp)?;
        Ok(Tick::new(symbol, observed_at, raw.price, raw.volume))
    }
}

impl From<&Tick> for RawTick {
    fn from(tick: &Tick) -> Self {
        Self {
            symbol: tick.symbol.clone(),
            timestamp: tick.observed_at.to_rfc3339(),
            price: tick.price,
            volume: tick.volume,
        }
    }
}

const NAIVE_FORMATS: [&str; 2] = ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"];

/// Parse an ISO-8601-like timestamp. Offset-aware values are converted to UTC;
/// naive values are taken as UTC.
pub fn parse_timestamp(s: &str) -> Result<DateTime<Utc>, InputError> {
    let trimmed = s.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(trimmed) {
        return Ok(dt.with_timezone(&Utc));
    }
    for fmt in NAIVE_FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(trimmed, fmt) {
            return Ok(naive.and_utc());
        }
    }
    Err(InputError::InvalidTimestamp(s.to_string()))
}

/// A tick in transit across the dispatcher. `attempt` counts deliveries and is
/// not part of the tick's identity.
#[derive(Debug, Clone, PartialEq)]
pub struct DeliveryEnvelope {
    pub tick: Tick,
    pub attempt: u32,
}

impl DeliveryEnvelope {
    pub fn new(tick: Tick) -> Self {
        Self { tick, attempt: 1 }
    }

    pub fn into_tick(self) -> Tick {
        self.tick
    }
}
