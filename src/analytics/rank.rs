use serde::{Deserialize, Serialize};

/// How tied volumes are ranked. Rank 1 is always the largest volume.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RankMethod {
    /// Ties share a rank; the next distinct value takes the next integer.
    #[default]
    Dense,
    /// Ties share the lowest rank; gaps follow (1, 1, 3).
    Min,
    /// No ties; earlier rows win.
    Ordinal,
}

impl std::str::FromStr for RankMethod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "dense" => Ok(Self::Dense),
            "min" => Ok(Self::Min),
            "ordinal" => Ok(Self::Ordinal),
            other => Err(format!(
                "unknown rank method '{}', expected dense|min|ordinal",
                other
            )),
        }
    }
}

/// Rank `values` descending.
pub fn rank_descending(values: &[i64], method: RankMethod) -> Vec<u32> {
    match method {
        RankMethod::Dense => {
            let mut distinct: Vec<i64> = values.to_vec();
            distinct.sort_unstable_by(|a, b| b.cmp(a));
            distinct.dedup();
            values
                .iter()
                .map(|v| {
                    let pos = distinct.partition_point(|d| d > v);
                    pos as u32 + 1
                })
                .collect()
        }
        RankMethod::Min => {
            let mut sorted: Vec<i64> = values.to_vec();
            sorted.sort_unstable_by(|a, b| b.cmp(a));
            values
                .iter()
                .map(|v| sorted.partition_point(|d| d > v) as u32 + 1)
                .collect()
        }
        RankMethod::Ordinal => {
            let mut order: Vec<usize> = (0..values.len()).collect();
            order.sort_by(|&a, &b| values[b].cmp(&values[a]).then(a.cmp(&b)));
            let mut ranks = vec![0u32; values.len()];
            for (rank, idx) in order.into_iter().enumerate() {
                ranks[idx] = rank as u32 + 1;
            }
            ranks
        }
    }
}
