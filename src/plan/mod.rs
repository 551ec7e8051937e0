//! Minimal plan representation the estimator reads and annotates.
//!
//! The host engine owns parsing, binding, and the full operator
//! implementations; the estimator only needs the operator shapes it
//! extracts features from and the cardinality fields it reconciles.

pub mod logical;
pub mod physical;

pub use logical::{
    ComparisonKind, FilterConstant, FilterExpr, FilterKind, JoinCondition, JoinKind,
    LogicalOperator, LogicalOperatorKind, OperatorId,
};
pub use physical::{OperatorRlState, PhysicalOperator, PhysicalOperatorKind};
