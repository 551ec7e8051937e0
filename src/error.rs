//! Error types for the cinder cardinality estimator.
//!
//! The estimator never propagates errors into the host engine: prediction
//! failures surface as a 0 prediction (callers fall back to the engine's
//! native estimate) and training failures degrade to no-ops. The error
//! types here are used internally and at the crate's own API boundary.

use thiserror::Error;

use crate::gbt::GbtError;

/// The primary error type for cinder operations.
#[derive(Error, Debug)]
pub enum CinderError {
    /// Invalid configuration value
    #[error("Configuration error: {message}")]
    Config { message: String },

    /// Failure inside the boosted-trees layer
    #[error("Model error: {message}")]
    Model { message: String },

    /// Feature vector with an unexpected width
    #[error("Feature vector shape mismatch: expected {expected}, got {got}")]
    ShapeMismatch { expected: usize, got: usize },

    /// Plan traversal or plan construction error
    #[error("Planning error: {message}")]
    Plan { message: String },

    /// Internal error (bug in the estimator)
    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl CinderError {
    /// Create a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Create a model error.
    pub fn model(message: impl Into<String>) -> Self {
        Self::Model {
            message: message.into(),
        }
    }

    /// Create a planning error.
    pub fn plan(message: impl Into<String>) -> Self {
        Self::Plan {
            message: message.into(),
        }
    }

    /// Create an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }
}

impl From<GbtError> for CinderError {
    fn from(err: GbtError) -> Self {
        Self::Model {
            message: err.to_string(),
        }
    }
}

/// Result type alias for cinder operations.
pub type Result<T> = std::result::Result<T, CinderError>;
