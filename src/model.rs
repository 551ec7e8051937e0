//! The boosting model singleton.
//!
//! One gradient-boosted ensemble per engine process, shared by every
//! session. Reads go to the *active* booster under the predict lock;
//! incremental training mutates a *shadow* booster cloned from the active
//! one via a byte snapshot, so predictions stay unblocked for the whole
//! training step. The shadow is promoted by a brief swap under both locks
//! every `swap_every` successful updates.
//!
//! Labels are `ln(max(1, actual))`; predictions exponentiate back and
//! clamp to >= 1. A prediction of 0 always means "unavailable, use the
//! engine's estimate".

use once_cell::sync::Lazy;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tracing::{error, info};

use crate::buffer::TrainingSample;
use crate::config::ModelConfig;
use crate::features::vector::FEATURE_VECTOR_SIZE;
use crate::gbt::{Booster, DenseMatrix, GbtError};

/// Minimum sample count for a training update.
pub const MIN_UPDATE_SAMPLES: usize = 10;

#[derive(Default)]
struct TrainingState {
    /// Shadow booster; rebuilt from an active-booster snapshot when absent.
    booster: Option<Booster>,
    /// Trees in the shadow booster.
    num_trees: u64,
    /// Successful updates since construction or reset.
    total_updates: u64,
    /// Boosting iterations issued so far; monotone across the process so
    /// every tree receives a unique iteration id.
    iterations_issued: u64,
}

static GLOBAL_MODEL: Lazy<BoostingModel> =
    Lazy::new(|| BoostingModel::new(ModelConfig::from_env()));

/// Singleton gradient-boosted-trees cardinality model.
pub struct BoostingModel {
    config: ModelConfig,
    /// Predict lock; owns the active booster (single-row inference on a
    /// booster is not concurrency-safe).
    active: Mutex<Option<Booster>>,
    /// Train lock; owns the shadow booster and training counters.
    training: Mutex<TrainingState>,
    /// Trees in the active booster (published at swap).
    num_trees: AtomicU64,
    total_updates: AtomicU64,
    initialized: AtomicBool,
}

impl BoostingModel {
    /// Build a model with the given configuration and bootstrap the
    /// dummy booster.
    pub fn new(config: ModelConfig) -> Self {
        let model = Self {
            config,
            active: Mutex::new(None),
            training: Mutex::new(TrainingState::default()),
            num_trees: AtomicU64::new(0),
            total_updates: AtomicU64::new(0),
            initialized: AtomicBool::new(false),
        };
        {
            let mut active = model.active.lock();
            model.bootstrap_into(&mut active);
        }
        model
    }

    /// The process-wide model, configured from the environment on first
    /// use.
    pub fn global() -> &'static BoostingModel {
        &GLOBAL_MODEL
    }

    /// The configuration the model was built with.
    pub fn config(&self) -> &ModelConfig {
        &self.config
    }

    /// Train the initial one-tree booster on a single zero row so the
    /// ensemble learns the feature width. Callers hold the active lock.
    fn bootstrap_into(&self, active: &mut Option<Booster>) {
        *active = None;
        self.num_trees.store(0, Ordering::Release);
        self.initialized.store(false, Ordering::Release);

        match bootstrap_booster(&self.config) {
            Ok(booster) => {
                *active = Some(booster);
                self.num_trees.store(1, Ordering::Release);
                self.initialized.store(true, Ordering::Release);
            }
            Err(e) => {
                error!("[RL BOOSTING] failed to initialize booster: {e}");
            }
        }
    }

    /// Whether the model can produce predictions. The first tree is the
    /// bootstrap dummy, so readiness requires more than one tree.
    pub fn is_ready(&self) -> bool {
        self.initialized.load(Ordering::Acquire) && self.num_trees.load(Ordering::Acquire) > 1
    }

    /// Trees in the active ensemble.
    pub fn num_trees(&self) -> u64 {
        self.num_trees.load(Ordering::Acquire)
    }

    /// Successful incremental updates since construction or reset.
    pub fn total_updates(&self) -> u64 {
        self.total_updates.load(Ordering::Acquire)
    }

    /// Predict a cardinality from a feature vector. Returns 0 when the
    /// model is unready, the vector has the wrong width, or the booster
    /// fails; otherwise a finite value >= 1.
    pub fn predict(&self, features: &[f64]) -> f64 {
        if features.len() != FEATURE_VECTOR_SIZE {
            return 0.0;
        }
        if !self.is_ready() {
            return 0.0;
        }

        let raw = {
            let active = self.active.lock();
            let Some(booster) = active.as_ref() else {
                return 0.0;
            };
            match booster.predict_one(features) {
                Ok(raw) => raw,
                Err(e) => {
                    error!("[RL BOOSTING] prediction failed: {e}");
                    return 0.0;
                }
            }
        };

        let log_cardinality = raw.max(0.0);
        log_cardinality.exp().max(1.0)
    }

    /// Predict cardinalities for a batch of feature vectors. Returns an
    /// empty vector when the model is unready or the batch is malformed.
    pub fn predict_batch(&self, rows: &[Vec<f64>]) -> Vec<f64> {
        if rows.is_empty() || !self.is_ready() {
            return Vec::new();
        }
        if rows.iter().any(|row| row.len() != FEATURE_VECTOR_SIZE) {
            return Vec::new();
        }
        let matrix = match DenseMatrix::from_rows(rows) {
            Ok(matrix) => matrix,
            Err(e) => {
                error!("[RL BOOSTING] batch matrix construction failed: {e}");
                return Vec::new();
            }
        };

        let raw = {
            let active = self.active.lock();
            let Some(booster) = active.as_ref() else {
                return Vec::new();
            };
            match booster.predict_matrix(&matrix) {
                Ok(raw) => raw,
                Err(e) => {
                    error!("[RL BOOSTING] batch prediction failed: {e}");
                    return Vec::new();
                }
            }
        };

        raw.into_iter()
            .map(|log_cardinality| log_cardinality.max(0.0).exp().max(1.0))
            .collect()
    }

    /// Incrementally train on recent samples. No-op below
    /// [`MIN_UPDATE_SAMPLES`]; silently no-op once the tree budget is
    /// exhausted. Library failures abort the update and leave the
    /// ensemble untouched.
    pub fn update_incremental(&self, samples: &[TrainingSample]) {
        if samples.len() < MIN_UPDATE_SAMPLES {
            return;
        }
        let usable: Vec<&TrainingSample> = samples
            .iter()
            .filter(|s| s.features.len() == FEATURE_VECTOR_SIZE)
            .collect();
        if usable.len() < MIN_UPDATE_SAMPLES {
            return;
        }

        let mut training = self.training.lock();

        if training.booster.is_none() {
            // Clone the active ensemble through a snapshot; the predict
            // lock is held only for the serialization itself.
            let snapshot = {
                let active = self.active.lock();
                match active.as_ref() {
                    Some(booster) => match booster.to_bytes() {
                        Ok(bytes) => bytes,
                        Err(e) => {
                            error!("[RL BOOSTING] snapshot failed: {e}");
                            return;
                        }
                    },
                    None => return,
                }
            };
            match Booster::from_bytes(&snapshot) {
                Ok(booster) => {
                    training.num_trees = booster.num_trees() as u64;
                    training.booster = Some(booster);
                }
                Err(e) => {
                    error!("[RL BOOSTING] snapshot restore failed: {e}");
                    return;
                }
            }
        }

        if training.num_trees >= self.config.max_total_trees {
            // Budget exhausted: publish the final shadow if it is ahead,
            // then keep absorbing samples without training.
            self.promote_if_ahead(&mut training);
            return;
        }

        let matrix = match training_matrix(&usable) {
            Ok(matrix) => matrix,
            Err(e) => {
                error!("[RL BOOSTING] training matrix construction failed: {e}");
                return;
            }
        };

        let mut booster = training.booster.take().expect("shadow booster present");
        let mut added = 0u64;
        let mut failed = false;
        for _ in 0..self.config.trees_per_update {
            if training.num_trees + added >= self.config.max_total_trees {
                break;
            }
            let iteration = training.iterations_issued + added;
            if let Err(e) = booster.update_one_iter(iteration, &matrix) {
                error!("[RL BOOSTING] training iteration failed: {e}");
                failed = true;
                break;
            }
            added += 1;
        }
        training.booster = Some(booster);

        if added == 0 {
            if failed {
                // Discard the partially configured shadow; predictions
                // continue on the intact active booster.
                training.booster = None;
                training.num_trees = 0;
            }
            return;
        }

        training.num_trees += added;
        training.iterations_issued += added;
        training.total_updates += 1;
        self.total_updates.store(training.total_updates, Ordering::Release);

        let avg_q_error =
            usable.iter().map(|s| s.q_error).sum::<f64>() / usable.len() as f64;
        info!(
            "[RL BOOSTING] Incremental update #{}: trained on {} samples, total trees={}, avg Q-error={:.6}",
            training.total_updates,
            usable.len(),
            training.num_trees,
            avg_q_error
        );

        if training.total_updates % self.config.swap_every == 0 {
            self.swap_active(&mut training);
        }
    }

    /// Promote the shadow booster: brief predict-lock acquisition, pointer
    /// swap, old active dropped, shadow cleared for the next clone.
    fn swap_active(&self, training: &mut TrainingState) {
        let Some(shadow) = training.booster.take() else {
            return;
        };
        let shadow_trees = training.num_trees;
        {
            let mut active = self.active.lock();
            let retiring = active.replace(shadow);
            self.num_trees.store(shadow_trees, Ordering::Release);
            drop(active);
            drop(retiring);
        }
        training.num_trees = 0;
    }

    fn promote_if_ahead(&self, training: &mut TrainingState) {
        if training.booster.is_some() && training.num_trees > self.num_trees.load(Ordering::Acquire)
        {
            self.swap_active(training);
        }
    }

    /// Reset to the freshly bootstrapped state (emergency recovery).
    pub fn reset(&self) {
        let mut training = self.training.lock();
        let mut active = self.active.lock();
        *training = TrainingState::default();
        self.total_updates.store(0, Ordering::Release);
        self.bootstrap_into(&mut active);
    }
}

fn bootstrap_booster(config: &ModelConfig) -> Result<Booster, GbtError> {
    let zero_row = vec![vec![0.0; FEATURE_VECTOR_SIZE]];
    let matrix = DenseMatrix::from_rows(&zero_row)?.with_labels(&[0.0])?;
    let mut booster = Booster::create(&matrix, config.booster_params())?;
    booster.update_one_iter(0, &matrix)?;
    Ok(booster)
}

fn training_matrix(samples: &[&TrainingSample]) -> Result<DenseMatrix, GbtError> {
    let rows: Vec<Vec<f64>> = samples.iter().map(|s| s.features.clone()).collect();
    let labels: Vec<f64> = samples
        .iter()
        .map(|s| (s.actual_cardinality.max(1) as f64).ln())
        .collect();
    DenseMatrix::from_rows(&rows)?.with_labels(&labels)
}
