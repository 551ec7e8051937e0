//! Gradient-boosted regression trees.
//!
//! A small in-crate boosting layer: dense training matrices, boosters that
//! add one regression tree per boosting step, and byte-level snapshots for
//! cloning an ensemble. The model layer ([`crate::model`]) wraps this the
//! way it would wrap an external boosting library: any error here aborts
//! the current operation and leaves the caller's state untouched.
//!
//! Targets are expected in log space (the model layer trains on
//! `ln(max(1, cardinality))`), so the trees regress small, well-conditioned
//! values.

mod tree;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use tree::RegressionTree;

/// Errors produced by the boosting layer.
#[derive(Error, Debug)]
pub enum GbtError {
    /// Training matrix with no rows
    #[error("empty training matrix")]
    EmptyMatrix,

    /// A row whose width differs from the matrix width
    #[error("row width mismatch: expected {expected}, got {got}")]
    RowWidth { expected: usize, got: usize },

    /// Label vector whose length differs from the row count
    #[error("label count mismatch: {labels} labels for {rows} rows")]
    LabelCount { labels: usize, rows: usize },

    /// Input whose width differs from the booster's feature count
    #[error("feature width mismatch: booster expects {expected}, got {got}")]
    FeatureWidth { expected: usize, got: usize },

    /// Boosting step invoked without labels
    #[error("training matrix has no labels")]
    MissingLabels,

    /// Snapshot bytes that do not decode to a booster
    #[error("snapshot decode error: {0}")]
    Snapshot(String),
}

/// Training objective for the booster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Objective {
    /// Mean-oriented squared-error regression
    SquaredError,
    /// Median-oriented absolute-error regression
    AbsoluteError,
}

impl Objective {
    /// Parse an objective name (`reg:squarederror`, `reg:absoluteerror`).
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "reg:squarederror" => Some(Self::SquaredError),
            "reg:absoluteerror" => Some(Self::AbsoluteError),
            _ => None,
        }
    }

    /// Canonical objective name.
    pub fn name(&self) -> &'static str {
        match self {
            Self::SquaredError => "reg:squarederror",
            Self::AbsoluteError => "reg:absoluteerror",
        }
    }

    /// First-order gradient and hessian of the loss at `predicted` for `label`.
    fn gradient(&self, predicted: f64, label: f64) -> (f64, f64) {
        match self {
            Self::SquaredError => (predicted - label, 1.0),
            // Constant hessian keeps the absolute-error update stable for
            // the small batches used in online training.
            Self::AbsoluteError => {
                let diff = predicted - label;
                if diff > 0.0 {
                    (1.0, 1.0)
                } else if diff < 0.0 {
                    (-1.0, 1.0)
                } else {
                    (0.0, 1.0)
                }
            }
        }
    }
}

/// Scalar hyperparameters of a booster, fixed at creation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BoosterParams {
    /// Maximum tree depth
    pub max_depth: u32,
    /// Shrinkage applied to each tree's leaf weights
    pub eta: f64,
    /// Fraction of rows sampled per tree
    pub subsample: f64,
    /// Fraction of columns sampled per tree
    pub colsample_bytree: f64,
    /// Minimum hessian sum on each side of a split
    pub min_child_weight: f64,
    /// L2 regularisation on leaf weights
    pub lambda: f64,
    /// L1 regularisation on leaf weights
    pub alpha: f64,
    /// Minimum loss reduction required to make a split
    pub gamma: f64,
    /// Training objective
    pub objective: Objective,
}

impl Default for BoosterParams {
    fn default() -> Self {
        Self {
            max_depth: 6,
            eta: 0.1,
            subsample: 0.8,
            colsample_bytree: 0.8,
            min_child_weight: 3.0,
            lambda: 1.0,
            alpha: 0.0,
            gamma: 0.0,
            objective: Objective::AbsoluteError,
        }
    }
}

/// A dense row-major training or prediction matrix.
#[derive(Debug, Clone)]
pub struct DenseMatrix {
    num_rows: usize,
    num_cols: usize,
    values: Vec<f32>,
    labels: Vec<f32>,
}

impl DenseMatrix {
    /// Build a matrix from equal-width rows. The width is taken from the
    /// first row; every other row must match it.
    pub fn from_rows(rows: &[Vec<f64>]) -> Result<Self, GbtError> {
        let Some(first) = rows.first() else {
            return Err(GbtError::EmptyMatrix);
        };
        let num_cols = first.len();
        let mut values = Vec::with_capacity(rows.len() * num_cols);
        for row in rows {
            if row.len() != num_cols {
                return Err(GbtError::RowWidth {
                    expected: num_cols,
                    got: row.len(),
                });
            }
            values.extend(row.iter().map(|&v| v as f32));
        }
        Ok(Self {
            num_rows: rows.len(),
            num_cols,
            values,
            labels: Vec::new(),
        })
    }

    /// Attach regression labels, one per row.
    pub fn with_labels(mut self, labels: &[f64]) -> Result<Self, GbtError> {
        if labels.len() != self.num_rows {
            return Err(GbtError::LabelCount {
                labels: labels.len(),
                rows: self.num_rows,
            });
        }
        self.labels = labels.iter().map(|&l| l as f32).collect();
        Ok(self)
    }

    /// Number of rows.
    pub fn num_rows(&self) -> usize {
        self.num_rows
    }

    /// Number of columns.
    pub fn num_cols(&self) -> usize {
        self.num_cols
    }

    fn row(&self, index: usize) -> &[f32] {
        let start = index * self.num_cols;
        &self.values[start..start + self.num_cols]
    }

    fn label(&self, index: usize) -> f32 {
        self.labels[index]
    }

    fn has_labels(&self) -> bool {
        self.labels.len() == self.num_rows
    }
}

/// An additive ensemble of regression trees.
///
/// Boosting steps mutate the booster in place; prediction is read-only.
/// Concurrent use is coordinated by the caller (the model layer keeps the
/// active booster behind its predict lock).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Booster {
    params: BoosterParams,
    num_features: usize,
    trees: Vec<RegressionTree>,
}

impl Booster {
    /// Create an empty booster over a training matrix. The matrix fixes
    /// the feature width for the booster's lifetime.
    pub fn create(train: &DenseMatrix, params: BoosterParams) -> Result<Self, GbtError> {
        if train.num_rows() == 0 {
            return Err(GbtError::EmptyMatrix);
        }
        Ok(Self {
            params,
            num_features: train.num_cols(),
            trees: Vec::new(),
        })
    }

    /// Run one boosting step: fit a tree to the gradients of the current
    /// ensemble on `train` and append it. `iteration` must be unique and
    /// monotonically increasing across the booster's lifetime; it seeds
    /// the deterministic row/column subsampling.
    pub fn update_one_iter(&mut self, iteration: u64, train: &DenseMatrix) -> Result<(), GbtError> {
        if train.num_cols() != self.num_features {
            return Err(GbtError::FeatureWidth {
                expected: self.num_features,
                got: train.num_cols(),
            });
        }
        if !train.has_labels() {
            return Err(GbtError::MissingLabels);
        }

        let num_rows = train.num_rows();
        let mut grad = vec![0.0f64; num_rows];
        let mut hess = vec![0.0f64; num_rows];
        for i in 0..num_rows {
            let margin = self.margin(train.row(i));
            let (g, h) = self.params.objective.gradient(margin, train.label(i) as f64);
            grad[i] = g;
            hess[i] = h;
        }

        let tree = tree::grow(train, &grad, &hess, &self.params, iteration);
        self.trees.push(tree);
        Ok(())
    }

    /// Predict a single dense row.
    pub fn predict_one(&self, row: &[f64]) -> Result<f64, GbtError> {
        if row.len() != self.num_features {
            return Err(GbtError::FeatureWidth {
                expected: self.num_features,
                got: row.len(),
            });
        }
        let row: Vec<f32> = row.iter().map(|&v| v as f32).collect();
        Ok(self.margin(&row))
    }

    /// Predict every row of a dense matrix.
    pub fn predict_matrix(&self, matrix: &DenseMatrix) -> Result<Vec<f64>, GbtError> {
        if matrix.num_cols() != self.num_features {
            return Err(GbtError::FeatureWidth {
                expected: self.num_features,
                got: matrix.num_cols(),
            });
        }
        Ok((0..matrix.num_rows())
            .map(|i| self.margin(matrix.row(i)))
            .collect())
    }

    fn margin(&self, row: &[f32]) -> f64 {
        self.trees.iter().map(|t| t.score(row) as f64).sum()
    }

    /// Number of trees in the ensemble.
    pub fn num_trees(&self) -> usize {
        self.trees.len()
    }

    /// Feature width the booster was created with.
    pub fn num_features(&self) -> usize {
        self.num_features
    }

    /// Serialize the booster to a byte snapshot.
    pub fn to_bytes(&self) -> Result<Vec<u8>, GbtError> {
        serde_json::to_vec(self).map_err(|e| GbtError::Snapshot(e.to_string()))
    }

    /// Restore a booster from a byte snapshot.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, GbtError> {
        serde_json::from_slice(bytes).map_err(|e| GbtError::Snapshot(e.to_string()))
    }
}
