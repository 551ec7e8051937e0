//! Post-query reconciliation and training trigger.
//!
//! After result materialisation the collector walks the physical plan,
//! pairs every RL-attached operator's plan-time prediction with the
//! actual row count accumulated during execution, pushes the samples
//! into the training buffer, and runs one incremental model update.
//! Nothing here can fail a query: malformed samples are dropped and
//! training failures are absorbed by the model layer.

use tracing::debug;

use crate::buffer::{TrainingBuffer, TrainingSample};
use crate::model::{BoostingModel, MIN_UPDATE_SAMPLES};
use crate::plan::{PhysicalOperator, PhysicalOperatorKind};
use crate::planning;

/// Samples pulled from the buffer for each post-query update.
pub const TRAINING_BATCH_SIZE: usize = 500;

/// Pairs predictions with actuals and triggers incremental training.
pub struct PostQueryCollector<'a> {
    buffer: &'a TrainingBuffer,
    model: &'a BoostingModel,
}

impl<'a> PostQueryCollector<'a> {
    pub fn new(buffer: &'a TrainingBuffer, model: &'a BoostingModel) -> Self {
        Self { buffer, model }
    }

    /// Collector over the process-wide buffer and model.
    pub fn global() -> PostQueryCollector<'static> {
        PostQueryCollector::new(TrainingBuffer::global(), BoostingModel::global())
    }

    /// Run the post-query pass over an executed plan.
    pub fn collect(&self, root: &PhysicalOperator) {
        // The engine wraps the plan in a result collector; the real tree
        // hangs below it.
        let plan_root = if root.kind == PhysicalOperatorKind::ResultCollector {
            root.children.first().unwrap_or(root)
        } else {
            root
        };

        self.collect_recursive(plan_root);

        let recent = self.buffer.recent_samples(TRAINING_BATCH_SIZE);
        if recent.len() >= MIN_UPDATE_SAMPLES {
            self.model.update_incremental(&recent);
        }

        planning::reset_thread_caches();
    }

    fn collect_recursive(&self, op: &PhysicalOperator) {
        if let Some(state) = &op.rl_state {
            if state.has_prediction {
                let actual = state.actual_cardinality();
                // Unreconciled operators (cancelled queries) and empty
                // observations never enter the buffer. The collected flag
                // keeps re-walked plans from producing duplicates.
                if (actual > 0 || state.predicted_cardinality > 0) && state.mark_collected() {
                    let sample = TrainingSample::new(
                        state.feature_vector.clone(),
                        actual,
                        state.predicted_cardinality,
                    );
                    if !self.buffer.add(sample) {
                        debug!(
                            "{}: dropped malformed training sample (vector width {})",
                            op.name(),
                            state.feature_vector.len()
                        );
                    }
                }
            }
        }

        for child in &op.children {
            self.collect_recursive(child);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ModelConfig;
    use crate::features::vector::FEATURE_VECTOR_SIZE;
    use crate::plan::OperatorRlState;

    fn attached_op(
        kind: PhysicalOperatorKind,
        predicted: u64,
        actual: u64,
    ) -> PhysicalOperator {
        let mut op = PhysicalOperator::new(kind, predicted.max(1));
        let state = OperatorRlState::new(vec![0.5; FEATURE_VECTOR_SIZE], predicted, 100);
        state.add_rows(actual);
        op.rl_state = Some(state);
        op
    }

    fn test_collector_parts() -> (TrainingBuffer, BoostingModel) {
        (
            TrainingBuffer::new(64),
            BoostingModel::new(ModelConfig::default()),
        )
    }

    #[test]
    fn test_collect_pairs_prediction_with_actual() {
        let (buffer, model) = test_collector_parts();
        let collector = PostQueryCollector::new(&buffer, &model);

        let scan = attached_op(PhysicalOperatorKind::TableScan, 1000, 1200);
        let filter = attached_op(PhysicalOperatorKind::Filter, 80, 95)
            .with_children(vec![scan]);

        collector.collect(&filter);

        assert_eq!(buffer.len(), 2);
        let samples = buffer.recent_samples(10);
        assert_eq!(samples[0].predicted_cardinality, 80);
        assert_eq!(samples[0].actual_cardinality, 95);
        assert_eq!(samples[1].predicted_cardinality, 1000);
        assert_eq!(samples[1].actual_cardinality, 1200);
    }

    #[test]
    fn test_result_collector_root_is_unwrapped() {
        let (buffer, model) = test_collector_parts();
        let collector = PostQueryCollector::new(&buffer, &model);

        let scan = attached_op(PhysicalOperatorKind::TableScan, 10, 10);
        let root = PhysicalOperator::new(PhysicalOperatorKind::ResultCollector, 0)
            .with_children(vec![scan]);

        collector.collect(&root);
        assert_eq!(buffer.len(), 1);
    }

    #[test]
    fn test_unreconciled_operator_dropped() {
        let (buffer, model) = test_collector_parts();
        let collector = PostQueryCollector::new(&buffer, &model);

        // Prediction 0 and no rows observed (cancelled mid-flight).
        let op = attached_op(PhysicalOperatorKind::HashJoin, 0, 0);
        collector.collect(&op);
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_repeat_walk_does_not_duplicate() {
        let (buffer, model) = test_collector_parts();
        let collector = PostQueryCollector::new(&buffer, &model);

        let op = attached_op(PhysicalOperatorKind::HashJoin, 50, 40);
        collector.collect(&op);
        collector.collect(&op);
        assert_eq!(buffer.len(), 1);
        assert!(op.rl_state.as_ref().unwrap().is_collected());
    }

    #[test]
    fn test_enough_samples_trigger_training() {
        let (buffer, model) = test_collector_parts();
        let collector = PostQueryCollector::new(&buffer, &model);

        // Nine operators: below the gate, no training.
        for i in 0..9 {
            let op = attached_op(PhysicalOperatorKind::HashJoin, 10 + i, 20 + i);
            collector.collect(&op);
        }
        assert_eq!(model.total_updates(), 0);

        // The tenth sample crosses the gate.
        let op = attached_op(PhysicalOperatorKind::HashJoin, 99, 120);
        collector.collect(&op);
        assert_eq!(model.total_updates(), 1);
    }

    #[test]
    fn test_operator_without_state_is_skipped() {
        let (buffer, model) = test_collector_parts();
        let collector = PostQueryCollector::new(&buffer, &model);

        let bare = PhysicalOperator::new(PhysicalOperatorKind::Projection, 10);
        collector.collect(&bare);
        assert!(buffer.is_empty());
    }
}
