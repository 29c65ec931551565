#![allow(dead_code)]

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};

use tickflow::model::tick::Tick;
use tickflow::store::{StoreConnector, StoreError, TickStore};

#[derive(Debug, Default)]
struct Faults {
    /// Remaining `connect` calls that fail.
    connect_failures: usize,
    /// Remaining writes that fail as a statement error.
    write_failures: usize,
    /// Drop the connection on the write that would make this many rows.
    drop_at_rows: Option<usize>,
    connects: usize,
}

/// In-memory tick table shared by every store it hands out, with injectable
/// faults.
#[derive(Clone, Default)]
pub struct MemoryConnector {
    rows: Arc<Mutex<BTreeMap<(String, DateTime<Utc>), Tick>>>,
    faults: Arc<Mutex<Faults>>,
}

impl MemoryConnector {
    pub fn fail_connects(&self, n: usize) {
        self.faults.lock().unwrap().connect_failures = n;
    }

    pub fn fail_writes(&self, n: usize) {
        self.faults.lock().unwrap().write_failures = n;
    }

    /// Lose the connection once `rows` rows are stored, on the next write.
    pub fn drop_connection_after(&self, rows: usize) {
        self.faults.lock().unwrap().drop_at_rows = Some(rows);
    }

    pub fn connects(&self) -> usize {
        self.faults.lock().unwrap().connects
    }

    pub fn row_count(&self) -> usize {
        self.rows.lock().unwrap().len()
    }
}

pub struct MemoryStore {
    shared: MemoryConnector,
    /// Cleared when this connection is lost; later calls keep failing.
    alive: bool,
}

impl StoreConnector for MemoryConnector {
    type Store = MemoryStore;

    fn connect(&self) -> Result<MemoryStore, StoreError> {
        let mut faults = self.faults.lock().unwrap();
        faults.connects += 1;
        if faults.connect_failures > 0 {
            faults.connect_failures -= 1;
            return Err(StoreError::Connect {
                backend: "memory",
                reason: "connection refused".to_string(),
            });
        }
        Ok(MemoryStore {
            shared: self.clone(),
            alive: true,
        })
    }

    fn describe(&self) -> String {
        "memory://ticks".to_string()
    }
}

impl TickStore for MemoryStore {
    fn upsert_if_absent(&mut self, tick: &Tick) -> Result<bool, StoreError> {
        let lost = || StoreError::Connect {
            backend: "memory",
            reason: "connection reset".to_string(),
        };
        if !self.alive {
            return Err(lost());
        }
        let mut rows = self.shared.rows.lock().unwrap();
        let mut faults = self.shared.faults.lock().unwrap();
        if faults.drop_at_rows == Some(rows.len()) {
            faults.drop_at_rows = None;
            self.alive = false;
            return Err(lost());
        }
        if faults.write_failures > 0 {
            faults.write_failures -= 1;
            return Err(StoreError::Decode("injected write failure".to_string()));
        }
        let key = (tick.symbol.clone(), tick.observed_at);
        if rows.contains_key(&key) {
            return Ok(false);
        }
        rows.insert(key, tick.clone());
        Ok(true)
    }

    fn query_all(&mut self, symbols: Option<&BTreeSet<String>>) -> Result<Vec<Tick>, StoreError> {
        let mut ticks: Vec<Tick> = self
            .shared
            .rows
            .lock()
            .unwrap()
            .values()
            .filter(|t| symbols.map_or(true, |s| s.contains(&t.symbol)))
            .cloned()
            .collect();
        ticks.sort_by(|a, b| {
            a.observed_at
                .cmp(&b.observed_at)
                .then_with(|| a.symbol.cmp(&b.symbol))
        });
        Ok(ticks)
    }

    fn is_healthy(&mut self) -> bool {
        self.alive
    }
}
