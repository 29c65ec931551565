use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::DateTime;
use rusqlite::{params, params_from_iter, Connection};

use super::{StoreConnector, StoreError, TickStore};
use crate::model::tick::Tick;

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Embedded backend. Timestamps are stored as unix microseconds so that
/// ordering and the uniqueness constraint compare exact instants.
const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS ticks (
    symbol TEXT NOT NULL,
    observed_at INTEGER NOT NULL,
    price REAL NOT NULL,
    volume INTEGER NOT NULL,
    UNIQUE (symbol, observed_at)
);
"#;

#[derive(Debug, Clone)]
pub struct SqliteConnector {
    path: PathBuf,
}

impl SqliteConnector {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }
}

impl StoreConnector for SqliteConnector {
    type Store = SqliteTickStore;

    fn connect(&self) -> Result<SqliteTickStore, StoreError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| StoreError::Connect {
                    backend: "sqlite",
                    reason: format!("{}: {}", parent.display(), e),
                })?;
            }
        }
        let conn = Connection::open(&self.path).map_err(|e| StoreError::Connect {
            backend: "sqlite",
            reason: format!("{}: {}", self.path.display(), e),
        })?;
        SqliteTickStore::from_connection(conn)
    }

    fn describe(&self) -> String {
        format!("sqlite://{}", self.path.display())
    }
}

pub struct SqliteTickStore {
    conn: Connection,
}

impl SqliteTickStore {
    pub fn from_connection(conn: Connection) -> Result<Self, StoreError> {
        conn.busy_timeout(BUSY_TIMEOUT)?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self { conn })
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    pub fn count(&self) -> Result<u64, StoreError> {
        let n: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM ticks", [], |row| row.get(0))?;
        Ok(n as u64)
    }
}

impl TickStore for SqliteTickStore {
    fn upsert_if_absent(&mut self, tick: &Tick) -> Result<bool, StoreError> {
        let tx = self.conn.transaction()?;
        let inserted = tx.execute(
            r#"
            INSERT INTO ticks (symbol, observed_at, price, volume)
            VALUES (?1, ?2, ?3, ?4)
            ON CONFLICT (symbol, observed_at) DO NOTHING
            "#,
            params![
                tick.symbol,
                tick.observed_at.timestamp_micros(),
                tick.price,
                tick.volume,
            ],
        )?;
        tx.commit()?;
        Ok(inserted == 1)
    }

    fn query_all(&mut self, symbols: Option<&BTreeSet<String>>) -> Result<Vec<Tick>, StoreError> {
        let mut sql = String::from("SELECT symbol, observed_at, price, volume FROM ticks");
        let wanted: Vec<&String> = symbols.map(|s| s.iter().collect()).unwrap_or_default();
        if symbols.is_some() {
            if wanted.is_empty() {
                return Ok(Vec::new());
            }
            let placeholders = vec!["?"; wanted.len()].join(", ");
            sql.push_str(&format!(" WHERE symbol IN ({})", placeholders));
        }
        sql.push_str(" ORDER BY observed_at ASC, symbol ASC");

        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(params_from_iter(wanted.iter()), |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, i64>(1)?,
                row.get::<_, f64>(2)?,
                row.get::<_, i64>(3)?,
            ))
        })?;

        let mut ticks = Vec::new();
        for row in rows {
            let (symbol, micros, price, volume) = row?;
            let observed_at = DateTime::from_timestamp_micros(micros)
                .ok_or_else(|| StoreError::Decode(format!("timestamp {} out of range", micros)))?;
            ticks.push(Tick::new(symbol, observed_at, price, volume));
        }
        Ok(ticks)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn tick(symbol: &str, sec: u32, price: f64, volume: i64) -> Tick {
        Tick::new(
            symbol,
            Utc.with_ymd_and_hms(2024, 1, 2, 10, 0, sec).unwrap(),
            price,
            volume,
        )
    }

    #[test]
    fn duplicate_natural_key_is_not_inserted() {
        let mut store = SqliteTickStore::open_in_memory().unwrap();
        assert!(store.upsert_if_absent(&tick("AAPL", 1, 10.0, 100)).unwrap());
        assert!(!store.upsert_if_absent(&tick("AAPL", 1, 99.0, 5)).unwrap());
        assert_eq!(store.count().unwrap(), 1);

        let all = store.query_all(None).unwrap();
        assert!((all[0].price - 10.0).abs() < f64::EPSILON);
    }

    #[test]
    fn same_timestamp_different_symbol_is_distinct() {
        let mut store = SqliteTickStore::open_in_memory().unwrap();
        assert!(store.upsert_if_absent(&tick("AAPL", 1, 10.0, 100)).unwrap());
        assert!(store.upsert_if_absent(&tick("MSFT", 1, 20.0, 100)).unwrap());
        assert_eq!(store.count().unwrap(), 2);
    }

    #[test]
    fn query_orders_by_timestamp_not_insertion() {
        let mut store = SqliteTickStore::open_in_memory().unwrap();
        store.upsert_if_absent(&tick("AAPL", 30, 3.0, 1)).unwrap();
        store.upsert_if_absent(&tick("MSFT", 10, 1.0, 1)).unwrap();
        store.upsert_if_absent(&tick("GOOG", 20, 2.0, 1)).unwrap();

        let symbols: Vec<String> = store
            .query_all(None)
            .unwrap()
            .into_iter()
            .map(|t| t.symbol)
            .collect();
        assert_eq!(symbols, vec!["MSFT", "GOOG", "AAPL"]);
    }

    #[test]
    fn query_filters_by_symbol_set() {
        let mut store = SqliteTickStore::open_in_memory().unwrap();
        store.upsert_if_absent(&tick("AAPL", 1, 1.0, 1)).unwrap();
        store.upsert_if_absent(&tick("MSFT", 2, 1.0, 1)).unwrap();
        store.upsert_if_absent(&tick("GOOG", 3, 1.0, 1)).unwrap();

        let filter: BTreeSet<String> = ["AAPL".to_string(), "GOOG".to_string()].into();
        let got = store.query_all(Some(&filter)).unwrap();
        assert_eq!(got.len(), 2);
        assert!(got.iter().all(|t| t.symbol != "MSFT"));

        let empty = BTreeSet::new();
        assert!(store.query_all(Some(&empty)).unwrap().is_empty());
    }
}
