use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// One-dimensional k-means (Lloyd's algorithm with k-means++ seeding).
///
/// Deterministic for a given seed: restarts draw from a single seeded RNG and
/// the lowest-inertia run wins. Labels are renumbered so that cluster 0 has
/// the smallest centroid.
#[derive(Debug, Clone, Copy)]
pub struct KMeans {
    pub k: usize,
    pub seed: u64,
    pub n_init: usize,
    pub max_iterations: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct KMeansFit {
    pub labels: Vec<usize>,
    pub centroids: Vec<f64>,
    pub inertia: f64,
    pub iterations: usize,
}

impl KMeans {
    /// `None` for empty input. The effective k never exceeds the number of
    /// distinct values.
    pub fn fit(&self, values: &[f64]) -> Option<KMeansFit> {
        if values.is_empty() || self.k == 0 {
            return None;
        }
        let mut distinct = values.to_vec();
        distinct.sort_by(f64::total_cmp);
        distinct.dedup();
        let k = self.k.min(distinct.len());

        let mut rng = StdRng::seed_from_u64(self.seed);
        let mut best: Option<KMeansFit> = None;
        for _ in 0..self.n_init.max(1) {
            let seeds = plus_plus_init(values, k, &mut rng);
            let run = lloyd(values, seeds, self.max_iterations.max(1));
            if best.as_ref().map_or(true, |b| run.inertia < b.inertia) {
                best = Some(run);
            }
        }
        best.map(relabel_by_centroid)
    }
}

fn plus_plus_init(values: &[f64], k: usize, rng: &mut StdRng) -> Vec<f64> {
    let mut centers = Vec::with_capacity(k);
    centers.push(values[rng.gen_range(0..values.len())]);
    while centers.len() < k {
        let d2: Vec<f64> = values
            .iter()
            .map(|v| nearest(&centers, *v).1)
            .collect();
        let total: f64 = d2.iter().sum();
        let next = if total > 0.0 {
            let mut target = rng.gen::<f64>() * total;
            let mut pick = values.len() - 1;
            for (i, d) in d2.iter().enumerate() {
                if *d > 0.0 && target < *d {
                    pick = i;
                    break;
                }
                target -= d;
            }
            values[pick]
        } else {
            // Every value already coincides with a center.
            break;
        };
        centers.push(next);
    }
    centers
}

fn lloyd(values: &[f64], mut centroids: Vec<f64>, max_iterations: usize) -> KMeansFit {
    let mut labels = vec![usize::MAX; values.len()];
    let mut iterations = 0;
    for _ in 0..max_iterations {
        iterations += 1;
        let mut changed = false;
        for (i, v) in values.iter().enumerate() {
            let (c, _) = nearest(&centroids, *v);
            if labels[i] != c {
                labels[i] = c;
                changed = true;
            }
        }

        let mut sums = vec![0.0; centroids.len()];
        let mut counts = vec![0usize; centroids.len()];
        for (v, &c) in values.iter().zip(&labels) {
            sums[c] += v;
            counts[c] += 1;
        }
        for (c, centroid) in centroids.iter_mut().enumerate() {
            // An empty cluster keeps its previous centroid.
            if counts[c] > 0 {
                *centroid = sums[c] / counts[c] as f64;
            }
        }

        if !changed {
            break;
        }
    }

    let inertia = values
        .iter()
        .zip(&labels)
        .map(|(v, &c)| (v - centroids[c]).powi(2))
        .sum();
    KMeansFit {
        labels,
        centroids,
        inertia,
        iterations,
    }
}

fn nearest(centers: &[f64], v: f64) -> (usize, f64) {
    let mut best = (0, f64::INFINITY);
    for (i, c) in centers.iter().enumerate() {
        let d = (v - c).powi(2);
        if d < best.1 {
            best = (i, d);
        }
    }
    best
}

fn relabel_by_centroid(fit: KMeansFit) -> KMeansFit {
    let mut order: Vec<usize> = (0..fit.centroids.len()).collect();
    order.sort_by(|&a, &b| fit.centroids[a].total_cmp(&fit.centroids[b]));
    let mut new_label = vec![0; order.len()];
    for (new, &old) in order.iter().enumerate() {
        new_label[old] = new;
    }
    KMeansFit {
        labels: fit.labels.iter().map(|&l| new_label[l]).collect(),
        centroids: order.iter().map(|&old| fit.centroids[old]).collect(),
        inertia: fit.inertia,
        iterations: fit.iterations,
    }
}
