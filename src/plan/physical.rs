//! Physical operators and the per-operator RL state.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use super::logical::OperatorId;

/// Kind of a materialised physical operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PhysicalOperatorKind {
    TableScan,
    Filter,
    Projection,
    HashAggregate,
    Order,
    Limit,
    TopN,
    Union,
    CrossProduct,
    HashJoin,
    NestedLoopJoin,
    BlockwiseNlJoin,
    PiecewiseMergeJoin,
    IEJoin,
    ResultCollector,
    Other,
}

impl PhysicalOperatorKind {
    /// Display name of the operator.
    pub fn name(&self) -> &'static str {
        match self {
            Self::TableScan => "TABLE_SCAN",
            Self::Filter => "FILTER",
            Self::Projection => "PROJECTION",
            Self::HashAggregate => "HASH_GROUP_BY",
            Self::Order => "ORDER_BY",
            Self::Limit => "LIMIT",
            Self::TopN => "TOP_N",
            Self::Union => "UNION",
            Self::CrossProduct => "CROSS_PRODUCT",
            Self::HashJoin => "HASH_JOIN",
            Self::NestedLoopJoin => "NESTED_LOOP_JOIN",
            Self::BlockwiseNlJoin => "BLOCKWISE_NL_JOIN",
            Self::PiecewiseMergeJoin => "PIECEWISE_MERGE_JOIN",
            Self::IEJoin => "IE_JOIN",
            Self::ResultCollector => "RESULT_COLLECTOR",
            Self::Other => "OTHER",
        }
    }
}

/// RL state attached to a physical operator at plan time.
///
/// Owns the feature vector and the prediction made during planning so the
/// post-query collector can pair them with the actual row count. A
/// `predicted_cardinality` of 0 means the model declined to predict.
#[derive(Debug)]
pub struct OperatorRlState {
    pub feature_vector: Vec<f64>,
    pub predicted_cardinality: u64,
    pub baseline_cardinality: u64,
    /// Set when the estimator attempted a prediction for this operator.
    pub has_prediction: bool,
    rows_emitted: AtomicU64,
    collected: AtomicBool,
}

impl OperatorRlState {
    pub fn new(
        feature_vector: Vec<f64>,
        predicted_cardinality: u64,
        baseline_cardinality: u64,
    ) -> Self {
        Self {
            feature_vector,
            predicted_cardinality,
            baseline_cardinality,
            has_prediction: true,
            rows_emitted: AtomicU64::new(0),
            collected: AtomicBool::new(false),
        }
    }

    /// Accumulate rows emitted at runtime. Called from worker threads.
    pub fn add_rows(&self, rows: u64) {
        self.rows_emitted.fetch_add(rows, Ordering::Relaxed);
    }

    /// Total rows emitted so far.
    pub fn actual_cardinality(&self) -> u64 {
        self.rows_emitted.load(Ordering::Relaxed)
    }

    /// Mark this state as collected; returns true exactly once.
    pub fn mark_collected(&self) -> bool {
        !self.collected.swap(true, Ordering::AcqRel)
    }

    /// Whether the post-query collector already consumed this state.
    pub fn is_collected(&self) -> bool {
        self.collected.load(Ordering::Acquire)
    }
}

/// A node of the physical plan. The operator exclusively owns its RL
/// state; the state holds no back-references.
#[derive(Debug)]
pub struct PhysicalOperator {
    pub op_id: OperatorId,
    pub kind: PhysicalOperatorKind,
    pub estimated_cardinality: u64,
    pub children: Vec<PhysicalOperator>,
    pub rl_state: Option<OperatorRlState>,
}

impl PhysicalOperator {
    pub fn new(kind: PhysicalOperatorKind, estimated_cardinality: u64) -> Self {
        Self {
            op_id: OperatorId::next(),
            kind,
            estimated_cardinality,
            children: Vec::new(),
            rl_state: None,
        }
    }

    /// Attach children, builder style.
    pub fn with_children(mut self, children: Vec<PhysicalOperator>) -> Self {
        self.children = children;
        self
    }

    /// Display name of the operator.
    pub fn name(&self) -> &'static str {
        self.kind.name()
    }
}
