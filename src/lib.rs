//! Cinder - Online Learned Cardinality Estimation for Analytical Engines
//!
//! Cinder sits beside a columnar analytical query engine and predicts the
//! output row count of every intermediate operator with an online
//! gradient-boosted-trees model. Predictions made at plan time are
//! reconciled with the row counts observed at execution time, and the
//! model retrains incrementally at query boundaries - improving
//! join-order and join-algorithm decisions without changing the
//! surrounding planner's architecture.
//!
//! # Pipeline
//!
//! 1. During logical optimization the engine deposits scan, filter, and
//!    join statistics (HLL distinct counts, TDOM, selectivity formula
//!    inputs) into the [`features::collector::FeatureCollector`].
//! 2. [`features::extract_features`] + [`features::vector::features_to_vector`]
//!    turn an operator into a fixed-width numeric vector.
//! 3. The [`model::BoostingModel`] singleton serves single-row inference
//!    on the planning path from an *active* booster and trains a *shadow*
//!    booster at query boundaries, swapping them atomically.
//! 4. The [`physical_planner::PhysicalPlanner`] attaches an
//!    [`plan::OperatorRlState`] (vector, prediction, engine baseline) to
//!    every materialised operator.
//! 5. The [`tracker::ExecutionTracker`] accumulates actual output rows
//!    during execution.
//! 6. The [`feedback::PostQueryCollector`] pairs predictions with actuals,
//!    fills the [`buffer::TrainingBuffer`] sliding window, and triggers an
//!    incremental update.
//!
//! # Deployment modes
//!
//! *Observe-only*: predictions are recorded on physical operators for
//! training, while planning keeps the engine's native estimates.
//! *Optimizer-coupled*: [`planning::CardinalityRewriter`] additionally
//! overwrites `estimated_cardinality` on logical operators before
//! physical planning, preserving the engine baseline on every node.
//!
//! # Example
//!
//! ```rust
//! use cinder::plan::{ComparisonKind, JoinCondition, JoinKind, LogicalOperator};
//! use cinder::physical_planner::PhysicalPlanner;
//! use cinder::tracker::ExecutionTracker;
//! use cinder::feedback::PostQueryCollector;
//!
//! // Plan a two-table join (the engine normally builds this).
//! let plan = LogicalOperator::join(
//!     JoinKind::Inner,
//!     vec![JoinCondition::new("o_custkey", ComparisonKind::Equal, "c_custkey")],
//!     LogicalOperator::get("orders", 1_500_000),
//!     LogicalOperator::get("customer", 150_000),
//! )
//! .with_estimate(1_500_000);
//!
//! // Physical planning attaches observe-only RL state.
//! let physical = PhysicalPlanner::with_global_model().create_plan(&plan);
//!
//! // Execution reports actual row counts...
//! let tracker = ExecutionTracker::new();
//! tracker.start_operator(&physical);
//! tracker.end_operator(&physical, 1_430_112);
//!
//! // ...and the post-query pass feeds the model.
//! PostQueryCollector::global().collect(&physical);
//! ```

pub mod buffer;
pub mod config;
pub mod error;
pub mod features;
pub mod feedback;
pub mod gbt;
pub mod model;
pub mod physical_planner;
pub mod plan;
pub mod planning;
pub mod sketch;
pub mod tracker;

// Re-export commonly used types
pub use buffer::{TrainingBuffer, TrainingSample};
pub use config::ModelConfig;
pub use error::{CinderError, Result};
pub use features::collector::FeatureCollector;
pub use features::vector::{features_to_vector, FEATURE_VECTOR_SIZE};
pub use features::{extract_features, OperatorFeatures};
pub use feedback::PostQueryCollector;
pub use model::BoostingModel;
pub use physical_planner::PhysicalPlanner;
pub use planning::CardinalityRewriter;
pub use tracker::ExecutionTracker;

/// Commonly used imports.
pub mod prelude {
    pub use crate::buffer::{TrainingBuffer, TrainingSample};
    pub use crate::error::{CinderError, Result};
    pub use crate::features::collector::FeatureCollector;
    pub use crate::features::{extract_features, OperatorFeatures};
    pub use crate::feedback::PostQueryCollector;
    pub use crate::model::BoostingModel;
    pub use crate::physical_planner::PhysicalPlanner;
    pub use crate::plan::{
        ComparisonKind, JoinCondition, JoinKind, LogicalOperator, PhysicalOperator,
    };
    pub use crate::planning::CardinalityRewriter;
    pub use crate::tracker::ExecutionTracker;
}
