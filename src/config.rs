use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::analytics::{AnalyticsOptions, ModelKind, RankMethod, Scaling};

pub const DEFAULT_CONFIG_PATH: &str = "config/default.toml";

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub store: StoreConfig,
    #[serde(default)]
    pub generator: GeneratorConfig,
    #[serde(default)]
    pub writer: WriterConfig,
    #[serde(default)]
    pub analytics: AnalyticsConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    Postgres,
    Sqlite,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StoreConfig {
    pub backend: StoreBackend,
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub database: String,
    #[serde(default)]
    pub user: String,
    /// Name of the environment variable holding the password; never the password itself.
    #[serde(default)]
    pub password_env: Option<String>,
    #[serde(default = "default_sqlite_path")]
    pub sqlite_path: PathBuf,
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
}

impl StoreConfig {
    pub fn resolve_password(&self) -> Option<String> {
        self.password_env
            .as_deref()
            .and_then(|name| std::env::var(name).ok())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct GeneratorConfig {
    #[serde(default = "default_symbols")]
    pub symbols: Vec<String>,
    #[serde(default = "default_price_min")]
    pub price_min: f64,
    #[serde(default = "default_price_max")]
    pub price_max: f64,
    #[serde(default = "default_volume_min")]
    pub volume_min: i64,
    #[serde(default = "default_volume_max")]
    pub volume_max: i64,
    #[serde(default)]
    pub seed: Option<u64>,
    #[serde(default = "default_interval_ms")]
    pub interval_ms: u64,
    #[serde(default)]
    pub iterations: Option<usize>,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            symbols: default_symbols(),
            price_min: default_price_min(),
            price_max: default_price_max(),
            volume_min: default_volume_min(),
            volume_max: default_volume_max(),
            seed: None,
            interval_ms: default_interval_ms(),
            iterations: None,
        }
    }
}

impl GeneratorConfig {
    /// Upper-cased, trimmed, de-duplicated symbols in configured order.
    pub fn normalized_symbols(&self) -> Vec<String> {
        let mut out: Vec<String> = Vec::new();
        for sym in &self.symbols {
            let s = sym.trim().to_ascii_uppercase();
            if !s.is_empty() && !out.iter().any(|v| v == &s) {
                out.push(s);
            }
        }
        out
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct WriterConfig {
    #[serde(default = "default_disconnected_pause_ms")]
    pub disconnected_pause_ms: u64,
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
    #[serde(default = "default_max_redeliveries")]
    pub max_redeliveries: u32,
    #[serde(default = "default_reconnect_initial_ms")]
    pub reconnect_initial_ms: u64,
    #[serde(default = "default_reconnect_max_ms")]
    pub reconnect_max_ms: u64,
}

impl Default for WriterConfig {
    fn default() -> Self {
        Self {
            disconnected_pause_ms: default_disconnected_pause_ms(),
            channel_capacity: default_channel_capacity(),
            max_redeliveries: default_max_redeliveries(),
            reconnect_initial_ms: default_reconnect_initial_ms(),
            reconnect_max_ms: default_reconnect_max_ms(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AnalyticsConfig {
    #[serde(default)]
    pub scaling: Scaling,
    #[serde(default)]
    pub model: ModelKind,
    #[serde(default)]
    pub rank_method: RankMethod,
    #[serde(default = "default_volatility_window")]
    pub volatility_window: usize,
    #[serde(default = "default_min_model_rows")]
    pub min_model_rows: usize,
    #[serde(default = "default_clusters")]
    pub clusters: usize,
    #[serde(default)]
    pub seed: u64,
    #[serde(default = "default_max_iterations")]
    pub max_iterations: usize,
    #[serde(default = "default_n_init")]
    pub n_init: usize,
}

impl Default for AnalyticsConfig {
    fn default() -> Self {
        Self {
            scaling: Scaling::default(),
            model: ModelKind::default(),
            rank_method: RankMethod::default(),
            volatility_window: default_volatility_window(),
            min_model_rows: default_min_model_rows(),
            clusters: default_clusters(),
            seed: 0,
            max_iterations: default_max_iterations(),
            n_init: default_n_init(),
        }
    }
}

impl AnalyticsConfig {
    pub fn to_options(&self) -> AnalyticsOptions {
        AnalyticsOptions {
            symbols: None,
            scaling: self.scaling,
            model: self.model,
            rank_method: self.rank_method,
            volatility_window: self.volatility_window,
            min_model_rows: self.min_model_rows,
            clusters: self.clusters,
            seed: self.seed,
            max_iterations: self.max_iterations,
            n_init: self.n_init,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_level")]
    pub level: String,
    #[serde(default)]
    pub file: Option<PathBuf>,
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_level(),
            file: None,
            json: false,
        }
    }
}

fn default_host() -> String {
    "localhost".to_string()
}
fn default_port() -> u16 {
    5432
}
fn default_sqlite_path() -> PathBuf {
    PathBuf::from("data/ticks.sqlite")
}
fn default_connect_timeout_ms() -> u64 {
    5_000
}
fn default_symbols() -> Vec<String> {
    vec!["AAPL".to_string(), "MSFT".to_string(), "GOOG".to_string()]
}
fn default_price_min() -> f64 {
    150.0
}
fn default_price_max() -> f64 {
    350.0
}
fn default_volume_min() -> i64 {
    1_000
}
fn default_volume_max() -> i64 {
    50_000
}
fn default_interval_ms() -> u64 {
    500
}
fn default_disconnected_pause_ms() -> u64 {
    1_000
}
fn default_channel_capacity() -> usize {
    256
}
fn default_max_redeliveries() -> u32 {
    3
}
fn default_reconnect_initial_ms() -> u64 {
    1_000
}
fn default_reconnect_max_ms() -> u64 {
    60_000
}
fn default_volatility_window() -> usize {
    2
}
fn default_min_model_rows() -> usize {
    5
}
fn default_clusters() -> usize {
    3
}
fn default_max_iterations() -> usize {
    300
}
fn default_n_init() -> usize {
    10
}
fn default_level() -> String {
    "info".to_string()
}

impl Config {
    pub fn load() -> Result<Self> {
        Self::load_from_path(DEFAULT_CONFIG_PATH)
    }

    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self> {
        dotenvy::dotenv().ok();

        let path = path.as_ref();
        let config_str = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        let config = Self::from_toml_str(&config_str)
            .with_context(|| format!("failed to parse {}", path.display()))?;
        Ok(config)
    }

    pub fn from_toml_str(s: &str) -> Result<Self> {
        let config: Config = toml::from_str(s).context("invalid toml")?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let g = &self.generator;
        if g.normalized_symbols().is_empty() {
            bail!("generator.symbols must contain at least one symbol");
        }
        if !(g.price_min.is_finite() && g.price_max.is_finite()) || g.price_min > g.price_max {
            bail!(
                "generator.price_min ({}) must not exceed generator.price_max ({})",
                g.price_min,
                g.price_max
            );
        }
        if g.volume_min < 0 || g.volume_min > g.volume_max {
            bail!(
                "generator volume range [{}, {}] is invalid",
                g.volume_min,
                g.volume_max
            );
        }
        if self.writer.channel_capacity == 0 {
            bail!("writer.channel_capacity must be > 0");
        }
        if self.analytics.volatility_window < 2 {
            bail!("analytics.volatility_window must be >= 2");
        }
        if self.analytics.clusters == 0 {
            bail!("analytics.clusters must be > 0");
        }
        if self.store.backend == StoreBackend::Postgres && self.store.database.trim().is_empty() {
            bail!("store.database is required for the postgres backend");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_sqlite_config_uses_defaults() {
        let config = Config::from_toml_str(
            r#"
[store]
backend = "sqlite"
sqlite_path = "data/test.sqlite"
"#,
        )
        .unwrap();
        assert_eq!(config.store.backend, StoreBackend::Sqlite);
        assert_eq!(config.generator.symbols.len(), 3);
        assert_eq!(config.generator.interval_ms, 500);
        assert_eq!(config.analytics.volatility_window, 2);
        assert_eq!(config.analytics.rank_method, RankMethod::Dense);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn normalized_symbols_dedup_and_uppercase() {
        let cfg = GeneratorConfig {
            symbols: vec![
                "aapl".to_string(),
                "MSFT".to_string(),
                "AAPL".to_string(),
                "  ".to_string(),
            ],
            ..GeneratorConfig::default()
        };
        assert_eq!(
            cfg.normalized_symbols(),
            vec!["AAPL".to_string(), "MSFT".to_string()]
        );
    }

    #[test]
    fn password_is_resolved_from_named_env_var() {
        std::env::set_var("TICKFLOW_TEST_PG_PASSWORD", "hunter2");
        let cfg = StoreConfig {
            backend: StoreBackend::Postgres,
            host: default_host(),
            port: 5432,
            database: "ticks".to_string(),
            user: "postgres".to_string(),
            password_env: Some("TICKFLOW_TEST_PG_PASSWORD".to_string()),
            sqlite_path: default_sqlite_path(),
            connect_timeout_ms: 100,
        };
        assert_eq!(cfg.resolve_password().as_deref(), Some("hunter2"));
    }
}
