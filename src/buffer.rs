//! Sliding-window buffer of training samples.
//!
//! Joins predictions made at plan time with actual cardinalities observed
//! at execution time. The post-query collector appends one sample per
//! reconciled operator; training pulls the most recent window.

use std::collections::VecDeque;

use once_cell::sync::Lazy;
use parking_lot::Mutex;

use crate::features::vector::FEATURE_VECTOR_SIZE;

/// Window capacity of the process-wide buffer.
pub const DEFAULT_WINDOW_SIZE: usize = 200;

/// One reconciled observation.
#[derive(Debug, Clone)]
pub struct TrainingSample {
    pub features: Vec<f64>,
    pub actual_cardinality: u64,
    pub predicted_cardinality: u64,
    /// max(a, p) / min(a, p) with both operands clamped to >= 1
    pub q_error: f64,
}

impl TrainingSample {
    pub fn new(features: Vec<f64>, actual_cardinality: u64, predicted_cardinality: u64) -> Self {
        let q_error = q_error(predicted_cardinality, actual_cardinality);
        Self {
            features,
            actual_cardinality,
            predicted_cardinality,
            q_error,
        }
    }
}

/// Q-error between a prediction and an actual cardinality.
pub fn q_error(predicted: u64, actual: u64) -> f64 {
    let p = predicted.max(1) as f64;
    let a = actual.max(1) as f64;
    (a / p).max(p / a)
}

static GLOBAL_BUFFER: Lazy<TrainingBuffer> = Lazy::new(|| TrainingBuffer::new(DEFAULT_WINDOW_SIZE));

/// Bounded FIFO of training samples. One append per operator per query,
/// so a single lock is enough.
pub struct TrainingBuffer {
    window: usize,
    samples: Mutex<VecDeque<TrainingSample>>,
}

impl TrainingBuffer {
    pub fn new(window: usize) -> Self {
        Self {
            window: window.max(1),
            samples: Mutex::new(VecDeque::new()),
        }
    }

    /// The process-wide buffer instance.
    pub fn global() -> &'static TrainingBuffer {
        &GLOBAL_BUFFER
    }

    /// Append a sample, evicting the oldest when over capacity. Samples
    /// with the wrong vector width, and samples where neither a prediction
    /// nor an actual exists, are dropped; returns whether the sample was
    /// accepted.
    pub fn add(&self, sample: TrainingSample) -> bool {
        if sample.features.len() != FEATURE_VECTOR_SIZE {
            return false;
        }
        if sample.actual_cardinality == 0 && sample.predicted_cardinality == 0 {
            return false;
        }
        let mut samples = self.samples.lock();
        samples.push_back(sample);
        while samples.len() > self.window {
            samples.pop_front();
        }
        true
    }

    /// Copy of the last up-to-`n` samples in insertion order.
    pub fn recent_samples(&self, n: usize) -> Vec<TrainingSample> {
        let samples = self.samples.lock();
        let skip = samples.len().saturating_sub(n);
        samples.iter().skip(skip).cloned().collect()
    }

    /// Number of buffered samples.
    pub fn len(&self) -> usize {
        self.samples.lock().len()
    }

    /// Whether the buffer is empty.
    pub fn is_empty(&self) -> bool {
        self.samples.lock().is_empty()
    }

    /// Drop all samples.
    pub fn clear(&self) {
        self.samples.lock().clear();
    }
}
