//! Derived per-symbol features over the tick table.
//!
//! [`analyze`] is a pure function: the same ticks and options always give the
//! same report, and nothing (scalers, cluster centers, fits) survives the call.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::model::tick::Tick;

pub mod kmeans;
pub mod rank;
pub mod regression;
pub mod scaling;
pub mod volatility;

pub use self::kmeans::{KMeans, KMeansFit};
pub use self::rank::{rank_descending, RankMethod};
pub use self::regression::{fit_linear, LinearFit};
pub use self::scaling::Scaling;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ModelKind {
    #[default]
    None,
    Clustering,
    Regression,
}

impl std::str::FromStr for ModelKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "none" => Ok(Self::None),
            "clustering" | "kmeans" | "k-means" => Ok(Self::Clustering),
            "regression" | "linear" => Ok(Self::Regression),
            other => Err(format!(
                "unknown model '{}', expected none|clustering|regression",
                other
            )),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AnalyticsOptions {
    /// Restrict to these symbols. `None` keeps every symbol.
    pub symbols: Option<BTreeSet<String>>,
    pub scaling: Scaling,
    pub model: ModelKind,
    pub rank_method: RankMethod,
    pub volatility_window: usize,
    pub min_model_rows: usize,
    pub clusters: usize,
    pub seed: u64,
    pub max_iterations: usize,
    pub n_init: usize,
}

impl Default for AnalyticsOptions {
    fn default() -> Self {
        Self {
            symbols: None,
            scaling: Scaling::None,
            model: ModelKind::None,
            rank_method: RankMethod::Dense,
            volatility_window: 2,
            min_model_rows: 5,
            clusters: 3,
            seed: 0,
            max_iterations: 300,
            n_init: 10,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnalyticsRow {
    #[serde(flatten)]
    pub tick: Tick,
    pub volume_rank: u32,
    pub volatility: f64,
    pub scaled_price: Option<f64>,
    pub scaled_volatility: Option<f64>,
    pub cluster_id: Option<usize>,
    pub predicted_price: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClusterStats {
    pub cluster_id: usize,
    pub centroid: f64,
    pub mean: f64,
    pub min: f64,
    pub max: f64,
    pub count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClusterSummary {
    pub k: usize,
    pub inertia: f64,
    pub iterations: usize,
    pub clusters: Vec<ClusterStats>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RegressionFeature {
    ScaledVolatility,
    Volatility,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RegressionSummary {
    pub feature: RegressionFeature,
    #[serde(flatten)]
    pub fit: LinearFit,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ModelStatus {
    NotApplied,
    InsufficientData { rows: usize, required: usize },
    Clustered(ClusterSummary),
    Regressed(RegressionSummary),
}

impl ModelStatus {
    pub fn metrics(&self) -> BTreeMap<String, f64> {
        let mut out = BTreeMap::new();
        match self {
            Self::NotApplied => {}
            Self::InsufficientData { rows, required } => {
                out.insert("rows".to_string(), *rows as f64);
                out.insert("required".to_string(), *required as f64);
            }
            Self::Clustered(summary) => {
                out.insert("k".to_string(), summary.k as f64);
                out.insert("inertia".to_string(), summary.inertia);
                out.insert("iterations".to_string(), summary.iterations as f64);
                for c in &summary.clusters {
                    out.insert(format!("centroid_{}", c.cluster_id), c.centroid);
                    out.insert(format!("count_{}", c.cluster_id), c.count as f64);
                }
            }
            Self::Regressed(summary) => {
                out.insert("slope".to_string(), summary.fit.slope);
                out.insert("intercept".to_string(), summary.fit.intercept);
                out.insert("r_squared".to_string(), summary.fit.r_squared);
                out.insert("samples".to_string(), summary.fit.samples as f64);
            }
        }
        out
    }

    pub fn is_insufficient_data(&self) -> bool {
        matches!(self, Self::InsufficientData { .. })
    }
}

impl std::fmt::Display for ModelStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotApplied => write!(f, "model not applied"),
            Self::InsufficientData { rows, required } => write!(
                f,
                "insufficient data: {} rows, at least {} required",
                rows, required
            ),
            Self::Clustered(s) => write!(
                f,
                "clustering complete: k={} inertia={:.4}",
                s.k, s.inertia
            ),
            Self::Regressed(s) => write!(
                f,
                "regression complete: slope={:.6} intercept={:.4} r2={:.4}",
                s.fit.slope, s.fit.intercept, s.fit.r_squared
            ),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnalyticsReport {
    pub rows: Vec<AnalyticsRow>,
    pub status: ModelStatus,
    pub summary: String,
    pub metrics: BTreeMap<String, f64>,
}

/// Filter, rank, compute volatility, scale and optionally fit a model.
///
/// Rows come back ordered by `(observed_at, symbol)`.
pub fn analyze(ticks: &[Tick], options: &AnalyticsOptions) -> AnalyticsReport {
    let mut selected: Vec<&Tick> = ticks
        .iter()
        .filter(|t| {
            options
                .symbols
                .as_ref()
                .map_or(true, |set| set.contains(&t.symbol))
        })
        .collect();
    selected.sort_by(|a, b| {
        a.observed_at
            .cmp(&b.observed_at)
            .then_with(|| a.symbol.cmp(&b.symbol))
    });

    let mut rows: Vec<AnalyticsRow> = selected
        .iter()
        .map(|t| AnalyticsRow {
            tick: (*t).clone(),
            volume_rank: 0,
            volatility: 0.0,
            scaled_price: None,
            scaled_volatility: None,
            cluster_id: None,
            predicted_price: None,
        })
        .collect();

    annotate_per_symbol(&mut rows, options);
    apply_scaling(&mut rows, options.scaling);
    let status = apply_model(&mut rows, options);

    let summary = status.to_string();
    let metrics = status.metrics();
    tracing::debug!(rows = rows.len(), status = %summary, "Analytics computed");
    AnalyticsReport {
        rows,
        status,
        summary,
        metrics,
    }
}

fn annotate_per_symbol(rows: &mut [AnalyticsRow], options: &AnalyticsOptions) {
    let mut by_symbol: BTreeMap<String, Vec<usize>> = BTreeMap::new();
    for (i, row) in rows.iter().enumerate() {
        by_symbol.entry(row.tick.symbol.clone()).or_default().push(i);
    }

    for indices in by_symbol.values() {
        let volumes: Vec<i64> = indices.iter().map(|&i| rows[i].tick.volume).collect();
        let prices: Vec<f64> = indices.iter().map(|&i| rows[i].tick.price).collect();
        let ranks = rank_descending(&volumes, options.rank_method);
        let vols = volatility::rolling_volatility(&prices, options.volatility_window);
        for (pos, &i) in indices.iter().enumerate() {
            rows[i].volume_rank = ranks[pos];
            rows[i].volatility = vols[pos];
        }
    }
}

fn apply_scaling(rows: &mut [AnalyticsRow], method: Scaling) {
    let prices: Vec<f64> = rows.iter().map(|r| r.tick.price).collect();
    match method {
        Scaling::None => {}
        Scaling::MinMax => {
            for (row, v) in rows.iter_mut().zip(scaling::min_max(&prices)) {
                row.scaled_price = Some(v);
            }
        }
        Scaling::ZScore => {
            let vols: Vec<f64> = rows.iter().map(|r| r.volatility).collect();
            let scaled_prices = scaling::z_score(&prices);
            let scaled_vols = scaling::z_score(&vols);
            for ((row, p), v) in rows.iter_mut().zip(scaled_prices).zip(scaled_vols) {
                row.scaled_price = Some(p);
                row.scaled_volatility = Some(v);
            }
        }
    }
}

fn apply_model(rows: &mut [AnalyticsRow], options: &AnalyticsOptions) -> ModelStatus {
    if options.model == ModelKind::None {
        return ModelStatus::NotApplied;
    }
    if rows.len() < options.min_model_rows || rows.is_empty() {
        return ModelStatus::InsufficientData {
            rows: rows.len(),
            required: options.min_model_rows.max(1),
        };
    }

    match options.model {
        ModelKind::None => ModelStatus::NotApplied,
        ModelKind::Clustering => cluster_prices(rows, options),
        ModelKind::Regression => regress_price(rows),
    }
}

fn cluster_prices(rows: &mut [AnalyticsRow], options: &AnalyticsOptions) -> ModelStatus {
    let prices: Vec<f64> = rows.iter().map(|r| r.tick.price).collect();
    let model = KMeans {
        k: options.clusters,
        seed: options.seed,
        n_init: options.n_init,
        max_iterations: options.max_iterations,
    };
    let Some(fit) = model.fit(&prices) else {
        return ModelStatus::InsufficientData {
            rows: rows.len(),
            required: options.min_model_rows.max(1),
        };
    };

    for (row, &label) in rows.iter_mut().zip(&fit.labels) {
        row.cluster_id = Some(label);
    }

    let clusters = fit
        .centroids
        .iter()
        .enumerate()
        .map(|(id, &centroid)| {
            let members: Vec<f64> = rows
                .iter()
                .filter(|r| r.cluster_id == Some(id))
                .map(|r| r.tick.price)
                .collect();
            let count = members.len();
            let mean = if count > 0 {
                members.iter().sum::<f64>() / count as f64
            } else {
                centroid
            };
            ClusterStats {
                cluster_id: id,
                centroid,
                mean,
                min: members.iter().copied().fold(f64::INFINITY, f64::min),
                max: members.iter().copied().fold(f64::NEG_INFINITY, f64::max),
                count,
            }
        })
        .collect();

    ModelStatus::Clustered(ClusterSummary {
        k: fit.centroids.len(),
        inertia: fit.inertia,
        iterations: fit.iterations,
        clusters,
    })
}

fn regress_price(rows: &mut [AnalyticsRow]) -> ModelStatus {
    let scaled: Option<Vec<f64>> = rows.iter().map(|r| r.scaled_volatility).collect();
    let (feature, x) = match scaled {
        Some(x) => (RegressionFeature::ScaledVolatility, x),
        None => (
            RegressionFeature::Volatility,
            rows.iter().map(|r| r.volatility).collect(),
        ),
    };
    let y: Vec<f64> = rows.iter().map(|r| r.tick.price).collect();

    let Some(fit) = fit_linear(&x, &y) else {
        return ModelStatus::InsufficientData {
            rows: rows.len(),
            required: 1,
        };
    };
    for (row, xi) in rows.iter_mut().zip(&x) {
        row.predicted_price = Some(fit.predict(*xi));
    }
    ModelStatus::Regressed(RegressionSummary { feature, fit })
}
