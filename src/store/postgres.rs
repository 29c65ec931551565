use std::collections::BTreeSet;
use std::time::Duration;

use ::postgres::{Client, NoTls};
use chrono::NaiveDateTime;

use super::{StoreConnector, StoreError, TickStore};
use crate::config::StoreConfig;
use crate::model::tick::Tick;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS ticks (
    symbol TEXT NOT NULL,
    observed_at TIMESTAMP NOT NULL,
    price DOUBLE PRECISION NOT NULL,
    volume BIGINT NOT NULL,
    UNIQUE (symbol, observed_at)
);
"#;

/// Connection parameters. The password is resolved from the environment
/// variable named by `password_env` when the connector is built.
#[derive(Clone)]
pub struct PostgresConnector {
    host: String,
    port: u16,
    database: String,
    user: String,
    password: Option<String>,
    connect_timeout: Duration,
}

impl std::fmt::Debug for PostgresConnector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PostgresConnector")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("database", &self.database)
            .field("user", &self.user)
            .field("password", &self.password.as_ref().map(|_| "***"))
            .finish()
    }
}

impl PostgresConnector {
    pub fn from_config(cfg: &StoreConfig) -> Self {
        Self {
            host: cfg.host.clone(),
            port: cfg.port,
            database: cfg.database.clone(),
            user: cfg.user.clone(),
            password: cfg.resolve_password(),
            connect_timeout: Duration::from_millis(cfg.connect_timeout_ms),
        }
    }
}

impl StoreConnector for PostgresConnector {
    type Store = PostgresTickStore;

    fn connect(&self) -> Result<PostgresTickStore, StoreError> {
        let mut pg = ::postgres::Config::new();
        pg.host(&self.host)
            .port(self.port)
            .dbname(&self.database)
            .user(&self.user)
            .connect_timeout(self.connect_timeout);
        if let Some(password) = &self.password {
            pg.password(password);
        }

        let mut client = pg.connect(NoTls).map_err(|e| StoreError::Connect {
            backend: "postgres",
            reason: e.to_string(),
        })?;
        client.batch_execute(SCHEMA)?;
        Ok(PostgresTickStore { client })
    }

    fn describe(&self) -> String {
        format!(
            "postgres://{}@{}:{}/{}",
            self.user, self.host, self.port, self.database
        )
    }
}

pub struct PostgresTickStore {
    client: Client,
}

impl TickStore for PostgresTickStore {
    fn upsert_if_absent(&mut self, tick: &Tick) -> Result<bool, StoreError> {
        let mut tx = self.client.transaction()?;
        let inserted = tx.execute(
            r#"
            INSERT INTO ticks (symbol, observed_at, price, volume)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (symbol, observed_at) DO NOTHING
            "#,
            &[
                &tick.symbol,
                &tick.observed_at.naive_utc(),
                &tick.price,
                &tick.volume,
            ],
        )?;
        tx.commit()?;
        Ok(inserted == 1)
    }

    fn query_all(&mut self, symbols: Option<&BTreeSet<String>>) -> Result<Vec<Tick>, StoreError> {
        let rows = match symbols {
            Some(set) => {
                let wanted: Vec<String> = set.iter().cloned().collect();
                self.client.query(
                    r#"
                    SELECT symbol, observed_at, price, volume
                    FROM ticks
                    WHERE symbol = ANY($1)
                    ORDER BY observed_at ASC, symbol ASC
                    "#,
                    &[&wanted],
                )?
            }
            None => self.client.query(
                r#"
                SELECT symbol, observed_at, price, volume
                FROM ticks
                ORDER BY observed_at ASC, symbol ASC
                "#,
                &[],
            )?,
        };

        let mut ticks = Vec::with_capacity(rows.len());
        for row in rows {
            let observed_at: NaiveDateTime = row.try_get(1)?;
            ticks.push(Tick::new(
                row.try_get::<_, String>(0)?,
                observed_at.and_utc(),
                row.try_get(2)?,
                row.try_get(3)?,
            ));
        }
        Ok(ticks)
    }

    fn is_healthy(&mut self) -> bool {
        !self.client.is_closed()
    }
}
