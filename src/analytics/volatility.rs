/// Percent change against the previous value. The first value and any value
/// following a zero have no defined change.
pub fn pct_changes(prices: &[f64]) -> Vec<Option<f64>> {
    let mut out = Vec::with_capacity(prices.len());
    for (i, &p) in prices.iter().enumerate() {
        let change = if i == 0 {
            None
        } else {
            let prev = prices[i - 1];
            let c = (p - prev) / prev;
            (prev != 0.0 && c.is_finite()).then_some(c)
        };
        out.push(change);
    }
    out
}

/// Rolling sample standard deviation over the trailing `window` changes.
/// Positions without a full window of defined changes yield 0.
pub fn rolling_std(changes: &[Option<f64>], window: usize) -> Vec<f64> {
    if window < 2 {
        return vec![0.0; changes.len()];
    }
    (0..changes.len())
        .map(|i| {
            if i + 1 < window {
                return 0.0;
            }
            let slice = &changes[i + 1 - window..=i];
            let values: Option<Vec<f64>> = slice.iter().copied().collect();
            values.map(|v| sample_std(&v)).unwrap_or(0.0)
        })
        .collect()
}

/// Rolling volatility of a price series ordered by time.
pub fn rolling_volatility(prices: &[f64], window: usize) -> Vec<f64> {
    rolling_std(&pct_changes(prices), window)
}

fn sample_std(values: &[f64]) -> f64 {
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let var = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (n - 1.0);
    var.sqrt()
}
