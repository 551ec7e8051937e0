//! Process-wide feature registry populated during logical optimization.
//!
//! The optimizer's statistics-propagation phase knows things the logical
//! operator no longer carries by the time features are extracted (HLL
//! distinct counts, TDOM values, selectivity numerators/denominators), so
//! it deposits them here keyed by operator identity. Joins are also keyed
//! by canonical relation-set string and by estimated cardinality, because
//! the operator identity can differ between optimizer stages.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use once_cell::sync::Lazy;
use parking_lot::Mutex;

use crate::plan::{ComparisonKind, FilterKind, JoinKind, OperatorId};

/// Hard per-map entry bound. The collector is scoped to a query, so an
/// overflowing map is wholly cleared rather than evicted.
const MAP_CAPACITY_LIMIT: usize = 500;

/// Callback supplying join-subset cardinality predictions to the
/// optimizer's cost model.
pub type PredictorCallback = Arc<dyn Fn(&JoinFeatures) -> f64 + Send + Sync>;

/// Scan-side statistics for one base table access.
#[derive(Debug, Clone)]
pub struct TableScanFeatures {
    pub table_name: String,
    pub base_cardinality: u64,
    /// column name -> HLL distinct count
    pub column_distinct_counts: HashMap<String, u64>,
    pub num_table_filters: u64,
    pub filter_kinds: Vec<FilterKind>,
    pub comparison_kinds: Vec<ComparisonKind>,
    pub filter_column_ids: Vec<u64>,
    pub filter_selectivity: f64,
    pub used_default_selectivity: bool,
    pub cardinality_after_default_selectivity: u64,
    pub final_cardinality: u64,
}

impl Default for TableScanFeatures {
    fn default() -> Self {
        Self {
            table_name: String::new(),
            base_cardinality: 0,
            column_distinct_counts: HashMap::new(),
            num_table_filters: 0,
            filter_kinds: Vec::new(),
            comparison_kinds: Vec::new(),
            filter_column_ids: Vec::new(),
            filter_selectivity: 1.0,
            used_default_selectivity: false,
            cardinality_after_default_selectivity: 0,
            final_cardinality: 0,
        }
    }
}

/// Join-side statistics from the cardinality estimator's formula inputs.
#[derive(Debug, Clone)]
pub struct JoinFeatures {
    pub join_kind: JoinKind,
    /// Canonical string naming the base relations under this join subtree
    pub join_relation_set: String,
    pub num_relations: u64,
    pub left_relation_card: u64,
    pub right_relation_card: u64,
    pub left_denominator: f64,
    pub right_denominator: f64,
    pub comparison: Option<ComparisonKind>,
    pub tdom_value: u64,
    pub tdom_from_hll: bool,
    pub extra_ratio: f64,
    /// Product of input cardinalities
    pub numerator: f64,
    /// TDOM-based denominator
    pub denominator: f64,
    pub estimated_cardinality: u64,
}

impl Default for JoinFeatures {
    fn default() -> Self {
        Self {
            join_kind: JoinKind::Inner,
            join_relation_set: String::new(),
            num_relations: 0,
            left_relation_card: 0,
            right_relation_card: 0,
            left_denominator: 1.0,
            right_denominator: 1.0,
            comparison: None,
            tdom_value: 0,
            tdom_from_hll: false,
            extra_ratio: 1.0,
            numerator: 0.0,
            denominator: 1.0,
            estimated_cardinality: 0,
        }
    }
}

/// Standalone-filter statistics: comparison kinds plus a summary of the
/// constants compared against.
#[derive(Debug, Clone, Default)]
pub struct FilterFeatures {
    pub comparison_kinds: Vec<ComparisonKind>,
    pub constant_count: u64,
    pub numeric_constant_log_mean: f64,
    pub string_length_log_mean: f64,
}

#[derive(Default)]
struct CollectorState {
    table_scan_features: HashMap<OperatorId, TableScanFeatures>,
    join_features: HashMap<OperatorId, JoinFeatures>,
    join_features_by_relation_set: HashMap<String, JoinFeatures>,
    join_features_by_estimate: HashMap<u64, JoinFeatures>,
    filter_features: HashMap<OperatorId, FilterFeatures>,
    predictor: Option<PredictorCallback>,
}

static GLOBAL_COLLECTOR: Lazy<FeatureCollector> = Lazy::new(FeatureCollector::new);

/// Process-wide feature registry. One mutex guards the maps; the
/// registered predictor is always invoked outside the lock.
pub struct FeatureCollector {
    state: Mutex<CollectorState>,
    /// Bumped by `clear_prediction_cache`; per-thread predictor caches
    /// revalidate against it lazily.
    prediction_cache_generation: AtomicU64,
}

impl FeatureCollector {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(CollectorState::default()),
            prediction_cache_generation: AtomicU64::new(1),
        }
    }

    /// The process-wide collector instance.
    pub fn global() -> &'static FeatureCollector {
        &GLOBAL_COLLECTOR
    }

    pub fn add_table_scan_features(&self, op_id: OperatorId, features: TableScanFeatures) {
        let mut state = self.state.lock();
        if state.table_scan_features.len() > MAP_CAPACITY_LIMIT {
            state.table_scan_features.clear();
        }
        state.table_scan_features.insert(op_id, features);
    }

    pub fn add_join_features(&self, op_id: OperatorId, features: JoinFeatures) {
        let mut state = self.state.lock();
        if state.join_features.len() > MAP_CAPACITY_LIMIT {
            state.join_features.clear();
        }
        state.join_features.insert(op_id, features);
    }

    /// Register join features under the canonical relation-set string and,
    /// when an estimate exists, under that estimate as well.
    pub fn add_join_features_by_relation_set(&self, features: JoinFeatures) {
        let mut state = self.state.lock();
        if state.join_features_by_relation_set.len() > MAP_CAPACITY_LIMIT {
            state.join_features_by_relation_set.clear();
            state.join_features_by_estimate.clear();
        }
        if features.estimated_cardinality > 0 {
            state
                .join_features_by_estimate
                .insert(features.estimated_cardinality, features.clone());
        }
        state
            .join_features_by_relation_set
            .insert(features.join_relation_set.clone(), features);
    }

    pub fn add_filter_features(&self, op_id: OperatorId, features: FilterFeatures) {
        let mut state = self.state.lock();
        if state.filter_features.len() > MAP_CAPACITY_LIMIT {
            state.filter_features.clear();
        }
        state.filter_features.insert(op_id, features);
    }

    pub fn table_scan_features(&self, op_id: OperatorId) -> Option<TableScanFeatures> {
        self.state.lock().table_scan_features.get(&op_id).cloned()
    }

    pub fn join_features(&self, op_id: OperatorId) -> Option<JoinFeatures> {
        self.state.lock().join_features.get(&op_id).cloned()
    }

    pub fn join_features_by_relation_set(&self, relation_set: &str) -> Option<JoinFeatures> {
        self.state
            .lock()
            .join_features_by_relation_set
            .get(relation_set)
            .cloned()
    }

    pub fn join_features_by_estimate(&self, estimated_cardinality: u64) -> Option<JoinFeatures> {
        self.state
            .lock()
            .join_features_by_estimate
            .get(&estimated_cardinality)
            .cloned()
    }

    pub fn filter_features(&self, op_id: OperatorId) -> Option<FilterFeatures> {
        self.state.lock().filter_features.get(&op_id).cloned()
    }

    /// Drop all collected features and invalidate prediction caches.
    pub fn clear(&self) {
        let mut state = self.state.lock();
        state.table_scan_features.clear();
        state.join_features.clear();
        state.join_features_by_relation_set.clear();
        state.join_features_by_estimate.clear();
        state.filter_features.clear();
        drop(state);
        self.clear_prediction_cache();
    }

    /// Invalidate per-thread predictor caches without touching the maps.
    pub fn clear_prediction_cache(&self) {
        self.prediction_cache_generation
            .fetch_add(1, Ordering::Release);
    }

    /// Current prediction-cache generation.
    pub fn prediction_cache_generation(&self) -> u64 {
        self.prediction_cache_generation.load(Ordering::Acquire)
    }

    /// Install the callback the optimizer's join enumeration consults.
    pub fn register_predictor(&self, callback: PredictorCallback) {
        self.state.lock().predictor = Some(callback);
    }

    /// Predict the cardinality of a join subset via the registered
    /// callback; 0 when none is installed. Callers must not hold the
    /// collector lock: the callback runs outside it.
    pub fn predict_cardinality(&self, features: &JoinFeatures) -> f64 {
        let predictor = self.state.lock().predictor.clone();
        match predictor {
            Some(callback) => callback(features),
            None => 0.0,
        }
    }
}

impl Default for FeatureCollector {
    fn default() -> Self {
        Self::new()
    }
}
