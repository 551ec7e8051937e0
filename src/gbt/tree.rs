//! Regression-tree construction for the boosting layer.
//!
//! Exact greedy split search over sorted feature values, second-order
//! gain with L1/L2 regularisation, and deterministic row/column
//! subsampling seeded from the boosting iteration so repeated training
//! runs are reproducible.

use serde::{Deserialize, Serialize};

use super::{BoosterParams, DenseMatrix};

/// A single fitted regression tree. Leaf weights are already scaled by
/// the learning rate, so scoring is a plain sum over the ensemble.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct RegressionTree {
    nodes: Vec<Node>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
enum Node {
    Split {
        feature: usize,
        threshold: f32,
        left: usize,
        right: usize,
    },
    Leaf {
        weight: f32,
    },
}

impl RegressionTree {
    /// Evaluate the tree on a dense row. NaN values route left.
    pub fn score(&self, row: &[f32]) -> f32 {
        let mut index = 0;
        loop {
            match &self.nodes[index] {
                Node::Leaf { weight } => return *weight,
                Node::Split {
                    feature,
                    threshold,
                    left,
                    right,
                } => {
                    let value = row.get(*feature).copied().unwrap_or(0.0);
                    index = if value < *threshold || value.is_nan() {
                        *left
                    } else {
                        *right
                    };
                }
            }
        }
    }
}

/// Fit one tree to the given gradients and hessians.
pub(crate) fn grow(
    train: &DenseMatrix,
    grad: &[f64],
    hess: &[f64],
    params: &BoosterParams,
    iteration: u64,
) -> RegressionTree {
    let rows = sample_rows(train.num_rows(), params.subsample, iteration);
    let features = sample_features(train.num_cols(), params.colsample_bytree, iteration);

    let mut builder = TreeBuilder {
        train,
        grad,
        hess,
        params,
        features,
        nodes: Vec::new(),
    };
    builder.build(&rows, 0);
    RegressionTree {
        nodes: builder.nodes,
    }
}

struct TreeBuilder<'a> {
    train: &'a DenseMatrix,
    grad: &'a [f64],
    hess: &'a [f64],
    params: &'a BoosterParams,
    features: Vec<usize>,
    nodes: Vec<Node>,
}

struct SplitCandidate {
    feature: usize,
    threshold: f32,
    gain: f64,
}

impl TreeBuilder<'_> {
    /// Build the subtree for `rows`, returning its node index.
    fn build(&mut self, rows: &[usize], depth: u32) -> usize {
        let (sum_grad, sum_hess) = self.sums(rows);

        if depth >= self.params.max_depth || rows.len() < 2 {
            return self.push_leaf(sum_grad, sum_hess);
        }

        let Some(split) = self.best_split(rows, sum_grad, sum_hess) else {
            return self.push_leaf(sum_grad, sum_hess);
        };

        let (left_rows, right_rows): (Vec<usize>, Vec<usize>) = rows.iter().copied().partition(|&r| {
            let value = self.value(r, split.feature);
            value < split.threshold || value.is_nan()
        });
        if left_rows.is_empty() || right_rows.is_empty() {
            return self.push_leaf(sum_grad, sum_hess);
        }

        let index = self.nodes.len();
        self.nodes.push(Node::Leaf { weight: 0.0 }); // placeholder until children exist
        let left = self.build(&left_rows, depth + 1);
        let right = self.build(&right_rows, depth + 1);
        self.nodes[index] = Node::Split {
            feature: split.feature,
            threshold: split.threshold,
            left,
            right,
        };
        index
    }

    fn best_split(&self, rows: &[usize], sum_grad: f64, sum_hess: f64) -> Option<SplitCandidate> {
        let parent_score = score(sum_grad, sum_hess, self.params);
        let mut best: Option<SplitCandidate> = None;

        for &feature in &self.features {
            let mut ordered: Vec<(f32, f64, f64)> = rows
                .iter()
                .map(|&r| (self.value(r, feature), self.grad[r], self.hess[r]))
                .collect();
            ordered.sort_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(std::cmp::Ordering::Equal));

            let mut left_grad = 0.0;
            let mut left_hess = 0.0;
            for window in 0..ordered.len() - 1 {
                let (value, g, h) = ordered[window];
                left_grad += g;
                left_hess += h;

                let next_value = ordered[window + 1].0;
                if next_value <= value {
                    continue; // no boundary between equal values
                }

                let right_grad = sum_grad - left_grad;
                let right_hess = sum_hess - left_hess;
                if left_hess < self.params.min_child_weight
                    || right_hess < self.params.min_child_weight
                {
                    continue;
                }

                let gain = 0.5
                    * (score(left_grad, left_hess, self.params)
                        + score(right_grad, right_hess, self.params)
                        - parent_score)
                    - self.params.gamma;
                if gain <= 0.0 {
                    continue;
                }

                if best.as_ref().map_or(true, |b| gain > b.gain) {
                    best = Some(SplitCandidate {
                        feature,
                        threshold: midpoint(value, next_value),
                        gain,
                    });
                }
            }
        }
        best
    }

    fn push_leaf(&mut self, sum_grad: f64, sum_hess: f64) -> usize {
        let weight = leaf_weight(sum_grad, sum_hess, self.params) * self.params.eta;
        let index = self.nodes.len();
        self.nodes.push(Node::Leaf {
            weight: weight as f32,
        });
        index
    }

    fn sums(&self, rows: &[usize]) -> (f64, f64) {
        rows.iter()
            .fold((0.0, 0.0), |(g, h), &r| (g + self.grad[r], h + self.hess[r]))
    }

    fn value(&self, row: usize, feature: usize) -> f32 {
        self.train.row(row)[feature]
    }
}

/// Structure score `G^2 / (H + lambda)` with L1 thresholding on `G`.
fn score(sum_grad: f64, sum_hess: f64, params: &BoosterParams) -> f64 {
    let g = threshold_l1(sum_grad, params.alpha);
    (g * g) / (sum_hess + params.lambda)
}

/// Optimal leaf weight `-G / (H + lambda)` before learning-rate scaling.
fn leaf_weight(sum_grad: f64, sum_hess: f64, params: &BoosterParams) -> f64 {
    let g = threshold_l1(sum_grad, params.alpha);
    -g / (sum_hess + params.lambda)
}

fn threshold_l1(grad: f64, alpha: f64) -> f64 {
    if grad > alpha {
        grad - alpha
    } else if grad < -alpha {
        grad + alpha
    } else {
        0.0
    }
}

fn midpoint(lower: f32, upper: f32) -> f32 {
    let mid = lower + (upper - lower) / 2.0;
    if mid > lower {
        mid
    } else {
        upper
    }
}

/// Deterministic row subsample for one boosting iteration. Falls back to
/// every row when the sample would otherwise be empty.
fn sample_rows(num_rows: usize, subsample: f64, iteration: u64) -> Vec<usize> {
    if subsample >= 1.0 {
        return (0..num_rows).collect();
    }
    let sampled: Vec<usize> = (0..num_rows)
        .filter(|&r| unit_hash(iteration, 0x526f77 ^ r as u64) < subsample)
        .collect();
    if sampled.is_empty() {
        (0..num_rows).collect()
    } else {
        sampled
    }
}

/// Deterministic column subsample for one boosting iteration.
fn sample_features(num_cols: usize, colsample: f64, iteration: u64) -> Vec<usize> {
    if colsample >= 1.0 {
        return (0..num_cols).collect();
    }
    let sampled: Vec<usize> = (0..num_cols)
        .filter(|&c| unit_hash(iteration, 0x436f6c ^ c as u64) < colsample)
        .collect();
    if sampled.is_empty() {
        (0..num_cols).collect()
    } else {
        sampled
    }
}

/// splitmix64 mapped into [0, 1).
fn unit_hash(iteration: u64, salt: u64) -> f64 {
    let mut x = iteration
        .wrapping_mul(0x9E3779B97F4A7C15)
        .wrapping_add(salt)
        .wrapping_add(0x9E3779B97F4A7C15);
    x = (x ^ (x >> 30)).wrapping_mul(0xBF58476D1CE4E5B9);
    x = (x ^ (x >> 27)).wrapping_mul(0x94D049BB133111EB);
    x ^= x >> 31;
    (x >> 11) as f64 / (1u64 << 53) as f64
}
