//! Physical plan construction with observe-only RL attachment.
//!
//! Builds physical operators from the logical plan, picking join
//! algorithms from the condition shapes, and attaches an
//! [`OperatorRlState`] to every materialised operator: the feature
//! vector, the model's observe-only prediction, and the engine baseline.
//! Planning decisions here never depend on the prediction;
//! `estimated_cardinality` flows through unchanged.

use crate::features::{extract_features, OperatorFeatures};
use crate::model::BoostingModel;
use crate::plan::{
    JoinCondition, JoinKind, LogicalOperator, LogicalOperatorKind, OperatorRlState,
    PhysicalOperator, PhysicalOperatorKind,
};
use crate::planning::predict_observed;

/// Inputs below this cardinality disable range-join algorithms in favor
/// of nested-loop execution.
pub const NESTED_LOOP_JOIN_THRESHOLD: u64 = 5;

/// Below this cardinality a piecewise merge join beats an IE join.
pub const MERGE_JOIN_THRESHOLD: u64 = 1000;

/// Builds the physical plan and attaches RL state along the way.
pub struct PhysicalPlanner<'a> {
    model: &'a BoostingModel,
}

impl<'a> PhysicalPlanner<'a> {
    pub fn new(model: &'a BoostingModel) -> Self {
        Self { model }
    }

    /// Planner over the process-wide model.
    pub fn with_global_model() -> PhysicalPlanner<'static> {
        PhysicalPlanner::new(BoostingModel::global())
    }

    /// Materialise the plan rooted at `op`.
    pub fn create_plan(&self, op: &LogicalOperator) -> PhysicalOperator {
        match &op.kind {
            LogicalOperatorKind::Join { join_kind, conditions } => {
                self.plan_comparison_join(op, *join_kind, conditions)
            }
            _ => {
                let children: Vec<PhysicalOperator> =
                    op.children.iter().map(|child| self.create_plan(child)).collect();

                let mut features = extract_features(op);
                if features.child_cardinality == 0 {
                    if let Some(child) = children.first() {
                        features.child_cardinality = child.estimated_cardinality;
                    }
                }

                let kind = physical_kind(&op.kind);
                let mut physical =
                    PhysicalOperator::new(kind, op.estimated_cardinality).with_children(children);
                self.attach_rl_state(&mut physical, op, &features);
                physical
            }
        }
    }

    /// Join planning mirrors the engine's algorithm selection: equality
    /// conditions hash, range conditions merge or IE-join, everything
    /// else nested-loops, and an empty condition list degenerates to a
    /// cross product.
    fn plan_comparison_join(
        &self,
        op: &LogicalOperator,
        join_kind: JoinKind,
        conditions: &[JoinCondition],
    ) -> PhysicalOperator {
        let left = self.create_plan(&op.children[0]);
        let right = self.create_plan(&op.children[1]);

        let features = extract_features(op);

        let kind = select_join_algorithm(
            join_kind,
            conditions,
            left.estimated_cardinality,
            right.estimated_cardinality,
        );
        let mut physical = PhysicalOperator::new(kind, op.estimated_cardinality)
            .with_children(vec![left, right]);
        self.attach_rl_state(&mut physical, op, &features);
        physical
    }

    /// Compute the observe-only prediction and attach the RL state. The
    /// prediction stays 0 when the model declines; the baseline is the
    /// engine's native estimate even when planning overwrote the working
    /// value.
    fn attach_rl_state(
        &self,
        physical: &mut PhysicalOperator,
        op: &LogicalOperator,
        features: &OperatorFeatures,
    ) {
        let baseline = op.baseline_cardinality.unwrap_or(op.estimated_cardinality);
        let prediction = predict_observed(self.model, features);
        let vector = crate::features::vector::features_to_vector(features);
        physical.rl_state = Some(OperatorRlState::new(vector, prediction, baseline));
    }
}

fn physical_kind(kind: &LogicalOperatorKind) -> PhysicalOperatorKind {
    match kind {
        LogicalOperatorKind::Get { .. } => PhysicalOperatorKind::TableScan,
        LogicalOperatorKind::Filter { .. } => PhysicalOperatorKind::Filter,
        LogicalOperatorKind::Aggregate { .. } => PhysicalOperatorKind::HashAggregate,
        LogicalOperatorKind::Projection => PhysicalOperatorKind::Projection,
        LogicalOperatorKind::TopN { .. } => PhysicalOperatorKind::TopN,
        LogicalOperatorKind::Order => PhysicalOperatorKind::Order,
        LogicalOperatorKind::Limit { .. } => PhysicalOperatorKind::Limit,
        LogicalOperatorKind::Union => PhysicalOperatorKind::Union,
        LogicalOperatorKind::Other { .. } => PhysicalOperatorKind::Other,
        // Joins are handled by plan_comparison_join.
        LogicalOperatorKind::Join { .. } => PhysicalOperatorKind::HashJoin,
    }
}

fn nested_loop_supported(join_kind: JoinKind, conditions: &[JoinCondition]) -> bool {
    !conditions.is_empty() && join_kind != JoinKind::Mark
}

fn select_join_algorithm(
    join_kind: JoinKind,
    conditions: &[JoinCondition],
    left_cardinality: u64,
    right_cardinality: u64,
) -> PhysicalOperatorKind {
    if conditions.is_empty() {
        return PhysicalOperatorKind::CrossProduct;
    }

    let has_equality = conditions.iter().any(|c| c.is_equality());
    let range_count = conditions.iter().filter(|c| c.is_range()).count();
    let mut can_merge = range_count > 0;
    let mut can_iejoin = range_count >= 2;

    match join_kind {
        JoinKind::Semi | JoinKind::Anti | JoinKind::Mark => {
            can_merge = can_merge && conditions.len() == 1;
            can_iejoin = false;
        }
        _ => {}
    }

    if has_equality {
        return PhysicalOperatorKind::HashJoin;
    }

    if left_cardinality < NESTED_LOOP_JOIN_THRESHOLD
        || right_cardinality < NESTED_LOOP_JOIN_THRESHOLD
    {
        can_iejoin = false;
        can_merge = false;
    }
    if can_merge
        && can_iejoin
        && (left_cardinality < MERGE_JOIN_THRESHOLD || right_cardinality < MERGE_JOIN_THRESHOLD)
    {
        can_iejoin = false;
    }

    if can_iejoin {
        return PhysicalOperatorKind::IEJoin;
    }
    if can_merge {
        return PhysicalOperatorKind::PiecewiseMergeJoin;
    }
    if nested_loop_supported(join_kind, conditions) {
        return PhysicalOperatorKind::NestedLoopJoin;
    }
    PhysicalOperatorKind::BlockwiseNlJoin
}
