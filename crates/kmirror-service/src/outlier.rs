use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use kmirror_models::Candle;

pub const FEATURE_COUNT: usize = 4;

/// Per-candle feature vector for the outlier layer: range and body as a
/// percent of close, body-to-range ratio, and log volume.
pub fn candle_features(candle: &Candle) -> [f64; FEATURE_COUNT] {
    let price = if candle.close != 0.0 { candle.close } else { 1.0 };
    let range = candle.high - candle.low;
    let body = candle.close - candle.open;
    let body_ratio = if range != 0.0 { body.abs() / range } else { 0.0 };
    sanitize([
        range / price * 100.0,
        body.abs() / price * 100.0,
        body_ratio,
        (1.0 + candle.volume.max(0.0)).ln(),
    ])
}

fn sanitize(mut features: [f64; FEATURE_COUNT]) -> [f64; FEATURE_COUNT] {
    for value in &mut features {
        if !value.is_finite() {
            *value = 0.0;
        }
    }
    features
}

enum Node {
    Split {
        dim: usize,
        threshold: f64,
        left: Box<Node>,
        right: Box<Node>,
    },
    Leaf {
        size: usize,
    },
}

/// Isolation forest over small fixed-size feature vectors.
///
/// Trees are grown on random subsamples with uniform random axis/threshold
/// splits; anomalous points isolate in fewer splits, giving them shorter
/// average path lengths and higher scores.
pub struct IsolationForest {
    trees: Vec<Node>,
    sample_size: usize,
}

const SUBSAMPLE: usize = 256;

impl IsolationForest {
    pub fn fit(data: &[[f64; FEATURE_COUNT]], n_trees: usize, seed: u64) -> Self {
        let sample_size = data.len().min(SUBSAMPLE);
        let max_depth = (sample_size.max(2) as f64).log2().ceil() as usize;
        let mut rng = StdRng::seed_from_u64(seed);

        let trees = (0..n_trees.max(1))
            .map(|_| {
                let mut sample: Vec<usize> = (0..sample_size)
                    .map(|_| rng.gen_range(0..data.len()))
                    .collect();
                sample.dedup();
                build_tree(data, &sample, 0, max_depth, &mut rng)
            })
            .collect();

        Self { trees, sample_size }
    }

    /// Anomaly score in (0, 1]; higher isolates faster.
    pub fn score(&self, point: &[f64; FEATURE_COUNT]) -> f64 {
        let mean_path: f64 = self
            .trees
            .iter()
            .map(|tree| path_length(tree, point, 0))
            .sum::<f64>()
            / self.trees.len() as f64;
        let normalizer = average_path_length(self.sample_size);
        if normalizer <= 0.0 {
            return 0.5;
        }
        2f64.powf(-mean_path / normalizer)
    }
}

fn build_tree(
    data: &[[f64; FEATURE_COUNT]],
    indices: &[usize],
    depth: usize,
    max_depth: usize,
    rng: &mut StdRng,
) -> Node {
    if indices.len() <= 1 || depth >= max_depth {
        return Node::Leaf {
            size: indices.len(),
        };
    }

    // Pick a dimension that still varies within this partition.
    let mut dims: Vec<usize> = (0..FEATURE_COUNT).collect();
    while !dims.is_empty() {
        let pick = rng.gen_range(0..dims.len());
        let dim = dims.swap_remove(pick);
        let min = indices
            .iter()
            .map(|&i| data[i][dim])
            .fold(f64::INFINITY, f64::min);
        let max = indices
            .iter()
            .map(|&i| data[i][dim])
            .fold(f64::NEG_INFINITY, f64::max);
        if max <= min {
            continue;
        }
        let threshold = rng.gen_range(min..max);
        let (left, right): (Vec<usize>, Vec<usize>) =
            indices.iter().partition(|&&i| data[i][dim] < threshold);
        if left.is_empty() || right.is_empty() {
            continue;
        }
        return Node::Split {
            dim,
            threshold,
            left: Box::new(build_tree(data, &left, depth + 1, max_depth, rng)),
            right: Box::new(build_tree(data, &right, depth + 1, max_depth, rng)),
        };
    }

    // Every dimension is constant here; nothing left to isolate.
    Node::Leaf {
        size: indices.len(),
    }
}

fn path_length(node: &Node, point: &[f64; FEATURE_COUNT], depth: usize) -> f64 {
    match node {
        Node::Leaf { size } => depth as f64 + average_path_length(*size),
        Node::Split {
            dim,
            threshold,
            left,
            right,
        } => {
            if point[*dim] < *threshold {
                path_length(left, point, depth + 1)
            } else {
                path_length(right, point, depth + 1)
            }
        }
    }
}

/// Expected path length of an unsuccessful BST search over `n` points.
fn average_path_length(n: usize) -> f64 {
    match n {
        0 | 1 => 0.0,
        2 => 1.0,
        _ => {
            let n = n as f64;
            const EULER_MASCHERONI: f64 = 0.577_215_664_901_532_9;
            2.0 * ((n - 1.0).ln() + EULER_MASCHERONI) - 2.0 * (n - 1.0) / n
        }
    }
}

/// Flag roughly `contamination * len` points as outliers, highest scores
/// first. Returns a parallel boolean mask.
pub fn detect_outliers(
    data: &[[f64; FEATURE_COUNT]],
    contamination: f64,
    n_trees: usize,
    seed: u64,
) -> Vec<bool> {
    let mut mask = vec![false; data.len()];
    if data.is_empty() {
        return mask;
    }
    let flag_count = ((data.len() as f64) * contamination).round() as usize;
    if flag_count == 0 {
        return mask;
    }

    let forest = IsolationForest::fit(data, n_trees, seed);
    let mut scored: Vec<(usize, f64)> = data
        .iter()
        .enumerate()
        .map(|(i, point)| (i, forest.score(point)))
        .collect();
    scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));

    for (index, _) in scored.into_iter().take(flag_count) {
        mask[index] = true;
    }
    mask
}

#[cfg(test)]
mod tests {
    use super::*;

    fn uniform_features(count: usize) -> Vec<[f64; FEATURE_COUNT]> {
        // Mild deterministic wiggle around a common point.
        (0..count)
            .map(|i| {
                let w = (i % 7) as f64 * 0.01;
                [0.5 + w, 0.25 + w / 2.0, 0.5, 4.6 + w]
            })
            .collect()
    }

    #[test]
    fn extreme_point_is_flagged() {
        let mut data = uniform_features(200);
        data[120] = [50.0, 30.0, 0.95, 12.0];

        let mask = detect_outliers(&data, 0.02, 100, 42);
        assert!(mask[120], "the extreme point must be among the outliers");
        assert_eq!(mask.iter().filter(|&&m| m).count(), 4);
    }

    #[test]
    fn contamination_bounds_flag_count() {
        let data = uniform_features(100);
        let mask = detect_outliers(&data, 0.05, 50, 42);
        assert_eq!(mask.iter().filter(|&&m| m).count(), 5);
    }

    #[test]
    fn deterministic_for_fixed_seed() {
        let mut data = uniform_features(150);
        data[10] = [20.0, 10.0, 0.9, 10.0];
        let a = detect_outliers(&data, 0.02, 100, 42);
        let b = detect_outliers(&data, 0.02, 100, 42);
        assert_eq!(a, b);
    }

    #[test]
    fn empty_and_tiny_inputs() {
        assert!(detect_outliers(&[], 0.02, 10, 42).is_empty());
        let tiny = uniform_features(5);
        let mask = detect_outliers(&tiny, 0.02, 10, 42);
        assert!(mask.iter().all(|&m| !m), "2% of 5 rounds to zero flags");
    }

    #[test]
    fn features_are_scale_free_and_finite() {
        let candle = Candle::new(60_000, 100.0, 110.0, 95.0, 105.0, 1_000.0);
        let f = candle_features(&candle);
        assert!((f[0] - 15.0 / 105.0 * 100.0).abs() < 1e-9);
        assert!(f.iter().all(|v| v.is_finite()));

        let degenerate = Candle::new(60_000, 0.0, 0.0, 0.0, 0.0, 0.0);
        let f = candle_features(&degenerate);
        assert!(f.iter().all(|v| v.is_finite()));
    }
}
