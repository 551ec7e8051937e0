//! Planning-path prediction surfaces.
//!
//! Two consumers ask the model for cardinalities during planning:
//!
//! - [`CardinalityRewriter`], the optional optimizer-coupled visitor that
//!   overwrites `estimated_cardinality` on logical operators (preserving
//!   the engine's baseline), backed by a per-thread cache bounded per
//!   query;
//! - the join-predictor callback installed into the feature collector,
//!   which serves the optimizer's join enumeration and memoises per
//!   relation set in a per-thread LRU.
//!
//! Both caches are per-thread to keep the planner hot path lock-free;
//! validity is gated by generation counters so global resets invalidate
//! them lazily on next touch.

use std::cell::RefCell;
use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use lru::LruCache;
use tracing::debug;

use crate::features::collector::FeatureCollector;
use crate::features::vector::features_to_vector;
use crate::features::{extract_features, OperatorFeatures};
use crate::model::BoostingModel;
use crate::plan::LogicalOperator;

/// Predictions per query on the planning path; beyond this the rewriter
/// falls back to the engine baseline.
pub const PLANNING_CACHE_CAP: usize = 300;

/// Entries in the per-thread join-predictor cache.
const PREDICTOR_CACHE_CAP: usize = 4096;

static NEXT_QUERY_ID: AtomicU64 = AtomicU64::new(1);

/// Allocate an id for the next planned query.
pub fn next_query_id() -> u64 {
    NEXT_QUERY_ID.fetch_add(1, Ordering::Relaxed)
}

struct PlanningCache {
    query_id: u64,
    predictions: HashMap<String, u64>,
    prediction_count: usize,
    cap_logged: bool,
}

impl PlanningCache {
    fn empty() -> Self {
        Self {
            query_id: 0,
            predictions: HashMap::new(),
            prediction_count: 0,
            cap_logged: false,
        }
    }

    fn revalidate(&mut self, query_id: u64) {
        if self.query_id != query_id {
            self.query_id = query_id;
            self.predictions.clear();
            self.prediction_count = 0;
            self.cap_logged = false;
        }
    }
}

thread_local! {
    static PLANNING_CACHE: RefCell<PlanningCache> = RefCell::new(PlanningCache::empty());
    static PREDICTOR_CACHE: RefCell<Option<(u64, LruCache<String, f64>)>> =
        const { RefCell::new(None) };
}

/// Cache key for a planning prediction: operator kind plus the identity
/// and filter/comparison signature that distinguish repeated shapes
/// within one query.
fn planning_cache_key(features: &OperatorFeatures) -> String {
    let mut key = String::with_capacity(128);
    key.push_str(&features.operator_kind);
    key.push('|');
    if features.is_table_scan() {
        key.push_str(&features.table_name);
        key.push('|');
        key.push_str(&features.filter_kinds.len().to_string());
        key.push('|');
        for comparison in &features.comparison_kinds {
            key.push_str(&comparison.to_string());
            key.push(',');
        }
    } else if let Some(join_kind) = features.join_kind {
        key.push_str(&join_kind.to_string());
        key.push('|');
        key.push_str(&features.join_relation_set);
        key.push('|');
        if let Some(comparison) = features.join_comparison {
            key.push_str(&comparison.to_string());
        }
    } else if features.is_standalone_filter() {
        key.push_str(&features.filter_kinds.len().to_string());
        key.push('|');
        for comparison in &features.comparison_kinds {
            key.push_str(&comparison.to_string());
            key.push(',');
        }
    } else if features.is_aggregate() {
        key.push_str(&features.num_group_by_columns.to_string());
        key.push('|');
        key.push_str(&features.num_aggregate_functions.to_string());
        key.push('|');
        key.push_str(&features.num_grouping_sets.to_string());
    }
    key
}

/// Planning-path prediction with the per-thread, per-query cache.
/// Returns 0 when no prediction is available (unready model, cache cap
/// reached, or model decline); callers fall back to the engine estimate.
pub fn predict_planning_cardinality(
    model: &BoostingModel,
    query_id: u64,
    features: &OperatorFeatures,
) -> u64 {
    PLANNING_CACHE.with(|cache| {
        let mut cache = cache.borrow_mut();
        cache.revalidate(query_id);

        if cache.prediction_count >= PLANNING_CACHE_CAP {
            if !cache.cap_logged {
                debug!(
                    "planning prediction cap reached ({PLANNING_CACHE_CAP}), falling back to engine estimates"
                );
                cache.cap_logged = true;
            }
            return 0;
        }

        let key = planning_cache_key(features);
        if let Some(&cached) = cache.predictions.get(&key) {
            return cached;
        }

        let vector = features_to_vector(features);
        let prediction = model.predict(&vector);
        if prediction <= 0.0 {
            return 0;
        }
        let result = prediction as u64;
        cache.predictions.insert(key, result);
        cache.prediction_count += 1;
        result
    })
}

/// Observe-only prediction for the physical-attachment path. No cache,
/// no fallback: 0 means the model declined.
pub fn predict_observed(model: &BoostingModel, features: &OperatorFeatures) -> u64 {
    let vector = features_to_vector(features);
    let prediction = model.predict(&vector);
    if prediction <= 0.0 {
        0
    } else {
        prediction as u64
    }
}

/// Reset this thread's planning cache. Called at query boundaries.
pub fn reset_thread_caches() {
    PLANNING_CACHE.with(|cache| {
        *cache.borrow_mut() = PlanningCache::empty();
    });
    PREDICTOR_CACHE.with(|cache| {
        *cache.borrow_mut() = None;
    });
}

/// Install the join-subset predictor into the feature collector. The
/// optimizer's join enumeration calls it through
/// [`FeatureCollector::predict_cardinality`]; results are memoised per
/// canonical relation-set string in a per-thread LRU whose validity is
/// gated by the collector's prediction-cache generation.
pub fn install_join_predictor() {
    FeatureCollector::global().register_predictor(Arc::new(|join_features| {
        let model = BoostingModel::global();
        if !model.is_ready() {
            return 0.0;
        }

        let generation = FeatureCollector::global().prediction_cache_generation();
        let cache_key = join_features.join_relation_set.clone();

        let cached = PREDICTOR_CACHE.with(|cache| {
            let mut cache = cache.borrow_mut();
            match cache.as_mut() {
                Some((cached_generation, entries)) if *cached_generation == generation => {
                    entries.get(&cache_key).copied()
                }
                _ => {
                    *cache = Some((
                        generation,
                        LruCache::new(NonZeroUsize::new(PREDICTOR_CACHE_CAP).expect("nonzero cap")),
                    ));
                    None
                }
            }
        });
        if let Some(prediction) = cached {
            return prediction;
        }

        let features = OperatorFeatures::from_join_features(join_features);
        let vector = features_to_vector(&features);
        let prediction = model.predict(&vector);

        PREDICTOR_CACHE.with(|cache| {
            let mut cache = cache.borrow_mut();
            if let Some((cached_generation, entries)) = cache.as_mut() {
                if *cached_generation == generation {
                    entries.put(cache_key, prediction);
                }
            }
        });
        prediction
    }));
}

/// Post-order visitor that overwrites logical estimates with RL
/// predictions (optimizer-coupled mode). The engine's native estimate is
/// preserved in `baseline_cardinality` the first time a node is touched;
/// nodes where no prediction is available keep the engine estimate.
pub struct CardinalityRewriter<'a> {
    model: &'a BoostingModel,
    query_id: u64,
}

impl<'a> CardinalityRewriter<'a> {
    pub fn new(model: &'a BoostingModel, query_id: u64) -> Self {
        Self { model, query_id }
    }

    /// Rewriter over the process-wide model for a fresh query id.
    pub fn for_next_query() -> CardinalityRewriter<'static> {
        CardinalityRewriter::new(BoostingModel::global(), next_query_id())
    }

    /// Rewrite the plan rooted at `op`, children first.
    pub fn rewrite(&self, op: &mut LogicalOperator) {
        for child in &mut op.children {
            self.rewrite(child);
        }
        self.apply(op);
    }

    fn apply(&self, op: &mut LogicalOperator) {
        if op.baseline_cardinality.is_none() && op.has_estimated_cardinality {
            op.baseline_cardinality = Some(op.estimated_cardinality);
        }

        let mut features = extract_features(op);
        if features.child_cardinality == 0 {
            if let Some(child) = op.children.first() {
                features.child_cardinality = child.estimated_cardinality;
            }
        }

        let prediction = predict_planning_cardinality(self.model, self.query_id, &features);
        let effective = if prediction > 0 {
            prediction
        } else {
            features.estimated_cardinality
        };
        op.estimated_cardinality = effective.max(1);
        op.has_estimated_cardinality = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::TrainingSample;
    use crate::config::ModelConfig;
    use crate::features::collector::JoinFeatures;
    use crate::features::vector::FEATURE_VECTOR_SIZE;
    use crate::plan::{ComparisonKind, JoinCondition, JoinKind};

    fn trained_model() -> BoostingModel {
        let config = ModelConfig {
            swap_every: 1,
            ..ModelConfig::default()
        };
        let model = BoostingModel::new(config);
        let samples: Vec<TrainingSample> = (0..32)
            .map(|i| {
                let mut features = vec![0.0; FEATURE_VECTOR_SIZE];
                features[1] = 1.0;
                features[34] = (i % 6) as f64;
                TrainingSample::new(features, 500 + i, 0)
            })
            .collect();
        model.update_incremental(&samples);
        assert!(model.is_ready());
        model
    }

    fn two_table_join() -> LogicalOperator {
        let left = LogicalOperator::get("orders", 1_500_000);
        let right = LogicalOperator::get("customer", 150_000);
        LogicalOperator::join(
            JoinKind::Inner,
            vec![JoinCondition::new(
                "o_custkey",
                ComparisonKind::Equal,
                "c_custkey",
            )],
            left,
            right,
        )
        .with_estimate(1_500_000)
    }

    #[test]
    fn test_rewriter_preserves_baseline() {
        let model = trained_model();
        let rewriter = CardinalityRewriter::new(&model, next_query_id());
        let mut plan = two_table_join();

        rewriter.rewrite(&mut plan);

        assert_eq!(plan.baseline_cardinality, Some(1_500_000));
        assert!(plan.has_estimated_cardinality);
        assert!(plan.estimated_cardinality >= 1);
        assert_eq!(plan.children[0].baseline_cardinality, Some(1_500_000));
        assert_eq!(plan.children[1].baseline_cardinality, Some(150_000));
        assert!(plan.children.iter().all(|c| c.has_estimated_cardinality));
    }

    #[test]
    fn test_rewriter_second_pass_keeps_original_baseline() {
        let model = trained_model();
        let mut plan = two_table_join();

        CardinalityRewriter::new(&model, next_query_id()).rewrite(&mut plan);
        let baseline_after_first = plan.baseline_cardinality;
        assert_eq!(baseline_after_first, Some(1_500_000));

        // The overwritten estimate must not leak into the baseline on a
        // second pass.
        CardinalityRewriter::new(&model, next_query_id()).rewrite(&mut plan);
        assert_eq!(plan.baseline_cardinality, baseline_after_first);
    }

    #[test]
    fn test_unready_model_leaves_engine_estimates() {
        let model = BoostingModel::new(ModelConfig::default());
        let rewriter = CardinalityRewriter::new(&model, next_query_id());
        let mut plan = two_table_join();

        rewriter.rewrite(&mut plan);

        assert_eq!(plan.estimated_cardinality, 1_500_000);
        assert_eq!(plan.baseline_cardinality, Some(1_500_000));
    }

    #[test]
    fn test_planning_cache_caps_per_query() {
        let model = trained_model();
        let query_id = next_query_id();

        for i in 0..(PLANNING_CACHE_CAP + 50) {
            let features = OperatorFeatures {
                operator_kind: "COMPARISON_JOIN".into(),
                join_kind: Some(JoinKind::Inner),
                join_relation_set: format!("[rel_{i}]"),
                ..OperatorFeatures::default()
            };
            let prediction = predict_planning_cardinality(&model, query_id, &features);
            if i < PLANNING_CACHE_CAP {
                assert!(prediction >= 1, "prediction missing at {i}");
            } else {
                assert_eq!(prediction, 0, "cap not enforced at {i}");
            }
        }

        // A new query id resets the budget.
        let features = OperatorFeatures {
            operator_kind: "COMPARISON_JOIN".into(),
            join_kind: Some(JoinKind::Inner),
            join_relation_set: "[fresh]".into(),
            ..OperatorFeatures::default()
        };
        assert!(predict_planning_cardinality(&model, next_query_id(), &features) >= 1);
        reset_thread_caches();
    }

    #[test]
    fn test_planning_cache_hits_identical_shapes() {
        let model = trained_model();
        let query_id = next_query_id();
        let features = OperatorFeatures {
            operator_kind: "COMPARISON_JOIN".into(),
            join_kind: Some(JoinKind::Inner),
            join_relation_set: "[dup]".into(),
            ..OperatorFeatures::default()
        };
        let first = predict_planning_cardinality(&model, query_id, &features);
        let second = predict_planning_cardinality(&model, query_id, &features);
        assert_eq!(first, second);
        reset_thread_caches();
    }

    #[test]
    fn test_join_predictor_roundtrip() {
        install_join_predictor();
        let join_features = JoinFeatures {
            join_relation_set: "[t0, t1]".into(),
            num_relations: 2,
            left_relation_card: 1000,
            right_relation_card: 1000,
            numerator: 1_000_000.0,
            denominator: 1000.0,
            ..JoinFeatures::default()
        };
        // The global model may or may not be trained here; the callback
        // contract is a finite, non-negative prediction either way.
        let prediction = FeatureCollector::global().predict_cardinality(&join_features);
        assert!(prediction >= 0.0);
        assert!(prediction.is_finite());

        // Memoised: a second call returns the identical value.
        let again = FeatureCollector::global().predict_cardinality(&join_features);
        assert_eq!(prediction, again);
        reset_thread_caches();
    }
}
