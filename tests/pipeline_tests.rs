//! End-to-end pipeline tests: plan, attach, execute, collect, retrain.
//!
//! Each test builds its own model and buffer so the scenarios stay
//! independent; the feature collector is shared process-wide, exactly as
//! in production, with per-test operator ids keeping entries disjoint.

use cinder::buffer::TrainingBuffer;
use cinder::config::ModelConfig;
use cinder::features::collector::{FeatureCollector, JoinFeatures};
use cinder::features::vector::{
    CONTEXT_BLOCK_OFFSET, FEATURE_VECTOR_SIZE, JOIN_BLOCK_OFFSET,
};
use cinder::features::extract_features;
use cinder::features_to_vector;
use cinder::feedback::PostQueryCollector;
use cinder::model::BoostingModel;
use cinder::physical_planner::PhysicalPlanner;
use cinder::plan::{
    ComparisonKind, FilterConstant, FilterExpr, JoinCondition, JoinKind, LogicalOperator,
    PhysicalOperator,
};
use cinder::planning::{next_query_id, predict_planning_cardinality, CardinalityRewriter};
use cinder::sketch::{tdom_from_sketches, HyperLogLog};
use cinder::tracker::ExecutionTracker;

/// A two-table inner equi-join with collector-backed join statistics.
fn two_table_join(orders_rows: u64, customer_rows: u64) -> LogicalOperator {
    let orders = LogicalOperator::get("orders", orders_rows);
    let customer = LogicalOperator::get("customer", customer_rows);
    let join = LogicalOperator::join(
        JoinKind::Inner,
        vec![JoinCondition::new(
            "o_custkey",
            ComparisonKind::Equal,
            "c_custkey",
        )],
        orders,
        customer,
    )
    .with_estimate(orders_rows.max(1));

    FeatureCollector::global().add_join_features(
        join.op_id,
        JoinFeatures {
            join_relation_set: format!("[orders, customer]#{}", join.op_id.raw()),
            num_relations: 2,
            left_relation_card: orders_rows,
            right_relation_card: customer_rows,
            comparison: Some(ComparisonKind::Equal),
            tdom_value: customer_rows.max(1),
            tdom_from_hll: true,
            numerator: orders_rows as f64 * customer_rows as f64,
            denominator: customer_rows.max(1) as f64,
            estimated_cardinality: orders_rows.max(1),
            ..JoinFeatures::default()
        },
    );
    join
}

/// Drive one simulated execution: register every operator, then report
/// its synthetic actual output.
fn execute(tracker: &ExecutionTracker, op: &PhysicalOperator, actual_for: &dyn Fn(&PhysicalOperator) -> u64) {
    tracker.start_operator(op);
    for child in &op.children {
        execute(tracker, child, actual_for);
    }
    tracker.end_operator(op, actual_for(op));
}

/// Scenario A: observe-only cold start. The first query attaches a zero
/// prediction with the engine baseline; after ten queries the model has
/// real trees and predicts >= 1.
#[test]
fn scenario_observe_only_cold_start() {
    let model = BoostingModel::new(ModelConfig::default());
    let buffer = TrainingBuffer::new(200);
    let planner = PhysicalPlanner::new(&model);
    let collector = PostQueryCollector::new(&buffer, &model);

    // Cold start: the model must decline and attachment still happen.
    let first = two_table_join(1_500_000, 150_000);
    let first_physical = planner.create_plan(&first);
    let state = first_physical.rl_state.as_ref().expect("state attached");
    assert_eq!(state.predicted_cardinality, 0);
    assert_eq!(state.baseline_cardinality, 1_500_000);
    assert_eq!(state.feature_vector.len(), FEATURE_VECTOR_SIZE);

    let tracker = ExecutionTracker::new();
    execute(&tracker, &first_physical, &|op| {
        op.estimated_cardinality / 2 + 7
    });
    collector.collect(&first_physical);
    assert_eq!(buffer.len(), 3); // join + two scans

    for i in 0..9 {
        let plan = two_table_join(1_500_000 + i * 1000, 150_000);
        let physical = planner.create_plan(&plan);
        let tracker = ExecutionTracker::new();
        execute(&tracker, &physical, &|op| op.estimated_cardinality / 2 + 7);
        collector.collect(&physical);
    }

    assert!(model.num_trees() > 1, "trees={}", model.num_trees());
    assert!(model.is_ready());

    let plan = two_table_join(1_500_000, 150_000);
    let features = extract_features(&plan);
    let prediction = model.predict(&features_to_vector(&features));
    assert!(prediction >= 1.0);
    assert!(prediction.is_finite());
}

/// Scenario B: two structurally identical filters whose literals differ
/// produce vectors that differ only in the constant-summary slots.
#[test]
fn scenario_feature_stability_across_constants() {
    let build = |price: f64, comment: &str| {
        let scan = LogicalOperator::get("orders", 1_000_000);
        LogicalOperator::filter(
            vec![
                FilterExpr::comparison(
                    "o_totalprice",
                    ComparisonKind::GreaterThan,
                    FilterConstant::Numeric(price),
                ),
                FilterExpr::comparison(
                    "o_comment",
                    ComparisonKind::NotEqual,
                    FilterConstant::Text(comment.into()),
                ),
            ],
            scan,
        )
        .with_estimate(330_000)
    };

    let a = features_to_vector(&extract_features(&build(100.0, "promo")));
    let b = features_to_vector(&extract_features(&build(250_000.0, "extraordinary pending deposits")));

    assert_eq!(a.len(), FEATURE_VECTOR_SIZE);
    let differing: Vec<usize> = (0..FEATURE_VECTOR_SIZE).filter(|&i| a[i] != b[i]).collect();
    assert!(!differing.is_empty());
    // Only the numeric and string-length log-means move.
    assert_eq!(
        differing,
        vec![CONTEXT_BLOCK_OFFSET + 2, CONTEXT_BLOCK_OFFSET + 3]
    );
}

/// Scenario C: sentinel side cardinalities derive from sqrt(numerator);
/// the vector stays finite.
#[test]
fn scenario_invalid_side_cardinalities() {
    let left = LogicalOperator::get("wide", 0);
    let right = LogicalOperator::get("deep", 0);
    let join = LogicalOperator::join(
        JoinKind::Inner,
        vec![JoinCondition::new("a", ComparisonKind::Equal, "b")],
        left,
        right,
    );

    FeatureCollector::global().add_join_features(
        join.op_id,
        JoinFeatures {
            join_relation_set: format!("[wide, deep]#{}", join.op_id.raw()),
            num_relations: 2,
            left_relation_card: u64::MAX,
            right_relation_card: u64::MAX,
            numerator: 9.0e12,
            denominator: 3.0e6,
            tdom_value: 3_000_000,
            ..JoinFeatures::default()
        },
    );

    let features = extract_features(&join);
    assert_eq!(features.left_cardinality, 3_000_000); // sqrt(9e12)
    assert_eq!(features.right_cardinality, 3_000_000);

    let vector = features_to_vector(&features);
    assert!(vector.iter().all(|v| v.is_finite()));
    assert!((vector[JOIN_BLOCK_OFFSET] - 3.0e6f64.ln()).abs() < 1e-9);
}

/// Scenario D: optimizer-coupled mode. After a training epoch the
/// rewriter replaces estimates with RL predictions while the engine
/// baseline survives on every node.
#[test]
fn scenario_optimizer_coupled_rewrite() {
    let model = BoostingModel::new(ModelConfig {
        swap_every: 1,
        ..ModelConfig::default()
    });
    let buffer = TrainingBuffer::new(200);
    let planner = PhysicalPlanner::new(&model);
    let collector = PostQueryCollector::new(&buffer, &model);

    // One training epoch from observed executions.
    for i in 0..6 {
        let plan = two_table_join(1_234_567 + i, 98_765);
        let physical = planner.create_plan(&plan);
        let tracker = ExecutionTracker::new();
        execute(&tracker, &physical, &|op| op.estimated_cardinality * 3 + 11);
        collector.collect(&physical);
    }
    assert!(model.is_ready());

    let mut plan = two_table_join(1_234_567, 98_765);
    let query_id = next_query_id();
    CardinalityRewriter::new(&model, query_id).rewrite(&mut plan);

    // Baselines: preserved engine values on every node.
    assert_eq!(plan.baseline_cardinality, Some(1_234_567));
    assert_eq!(plan.children[0].baseline_cardinality, Some(1_234_567));
    assert_eq!(plan.children[1].baseline_cardinality, Some(98_765));

    // The working estimate on the join now comes from the model: the
    // per-query planning cache returns the identical prediction for the
    // same shape.
    let features = extract_features(&plan);
    let cached = predict_planning_cardinality(&model, query_id, &features);
    assert!(cached >= 1);
    assert_eq!(plan.estimated_cardinality, cached);
    assert_ne!(plan.estimated_cardinality, 1_234_567);
}

/// Scenario E: concurrent sessions. Trees grow monotonically, the buffer
/// never exceeds its window, and shutdown is clean.
#[test]
fn scenario_concurrent_sessions() {
    let model = BoostingModel::new(ModelConfig {
        trees_per_update: 2,
        swap_every: 2,
        max_total_trees: 50,
        ..ModelConfig::default()
    });
    let buffer = TrainingBuffer::new(200);

    std::thread::scope(|scope| {
        for thread_index in 0..16 {
            let model = &model;
            let buffer = &buffer;
            scope.spawn(move || {
                let planner = PhysicalPlanner::new(model);
                let collector = PostQueryCollector::new(buffer, model);
                let mut last_seen_trees = 0;
                for i in 0..25 {
                    let rows = 10_000 + thread_index * 97 + i * 13;
                    let plan = two_table_join(rows, 1000);
                    let physical = planner.create_plan(&plan);
                    let tracker = ExecutionTracker::new();
                    execute(&tracker, &physical, &|op| op.estimated_cardinality + 1);
                    tracker.finalize();
                    collector.collect(&physical);

                    let trees = model.num_trees();
                    assert!(trees >= last_seen_trees, "tree count regressed");
                    last_seen_trees = trees;
                    assert!(buffer.len() <= 200);
                }
            });
        }
    });

    assert!(model.num_trees() > 1);
    assert!(model.num_trees() <= 50);
    assert!(buffer.len() <= 200);

    // Late predictions still come from a live, consistent ensemble.
    let plan = two_table_join(10_000, 1000);
    let prediction = model.predict(&features_to_vector(&extract_features(&plan)));
    assert!(prediction >= 1.0);
}

/// Scenario F: tree-budget exhaustion. Updates become no-ops and
/// predictions stay well-defined.
#[test]
fn scenario_tree_budget_exhaustion() {
    let model = BoostingModel::new(ModelConfig {
        max_total_trees: 5,
        trees_per_update: 1,
        swap_every: 1,
        ..ModelConfig::default()
    });
    let buffer = TrainingBuffer::new(200);
    let planner = PhysicalPlanner::new(&model);
    let collector = PostQueryCollector::new(&buffer, &model);

    for i in 0..8 {
        let plan = two_table_join(5000 + i, 500);
        let physical = planner.create_plan(&plan);
        let tracker = ExecutionTracker::new();
        execute(&tracker, &physical, &|op| op.estimated_cardinality + 3);
        collector.collect(&physical);
    }

    assert_eq!(model.num_trees(), 5);
    let updates_at_cap = model.total_updates();

    for i in 0..4 {
        let plan = two_table_join(9000 + i, 500);
        let physical = planner.create_plan(&plan);
        let tracker = ExecutionTracker::new();
        execute(&tracker, &physical, &|op| op.estimated_cardinality + 3);
        collector.collect(&physical);
    }

    assert_eq!(model.num_trees(), 5);
    assert_eq!(model.total_updates(), updates_at_cap);
    let prediction = model.predict(&features_to_vector(&extract_features(&two_table_join(
        5000, 500,
    ))));
    assert!(prediction >= 1.0);
    assert!(prediction.is_finite());
}

/// Q-error is recorded per collected sample with both operands clamped.
#[test]
fn collected_samples_carry_q_error() {
    let model = BoostingModel::new(ModelConfig::default());
    let buffer = TrainingBuffer::new(50);
    let planner = PhysicalPlanner::new(&model);
    let collector = PostQueryCollector::new(&buffer, &model);

    let plan = two_table_join(4000, 400);
    let physical = planner.create_plan(&plan);
    let tracker = ExecutionTracker::new();
    execute(&tracker, &physical, &|op| op.estimated_cardinality * 2);
    collector.collect(&physical);

    for sample in buffer.recent_samples(50) {
        let p = sample.predicted_cardinality.max(1) as f64;
        let a = sample.actual_cardinality.max(1) as f64;
        assert_eq!(sample.q_error, (a / p).max(p / a));
        assert!(sample.q_error >= 1.0);
    }
}

/// Every operator kind vectorises to the fixed width.
#[test]
fn all_operator_kinds_vectorise_to_fixed_width() {
    let scan = LogicalOperator::get("lineitem", 6_000_000);
    let filter = LogicalOperator::filter(
        vec![FilterExpr::comparison(
            "l_quantity",
            ComparisonKind::LessThan,
            FilterConstant::Numeric(24.0),
        )],
        scan,
    )
    .with_estimate(2_000_000);
    let join = LogicalOperator::join(
        JoinKind::Left,
        vec![JoinCondition::new(
            "l_orderkey",
            ComparisonKind::Equal,
            "o_orderkey",
        )],
        filter,
        LogicalOperator::get("orders", 1_500_000),
    )
    .with_estimate(2_000_000);
    let aggregate = LogicalOperator::aggregate(
        vec!["l_returnflag".into(), "l_linestatus".into()],
        vec!["sum".into(), "avg".into(), "count".into()],
        join,
    )
    .with_estimate(6);
    let top_n = LogicalOperator::top_n(100, aggregate).with_estimate(6);

    let mut stack = vec![&top_n];
    while let Some(op) = stack.pop() {
        let vector = features_to_vector(&extract_features(op));
        assert_eq!(vector.len(), FEATURE_VECTOR_SIZE);
        assert!(vector.iter().all(|v| v.is_finite()));
        stack.extend(op.children.iter());
    }
}

/// HLL sketches feed TDOM derivation for join statistics.
#[test]
fn sketches_supply_join_tdom() {
    let mut orders_keys = HyperLogLog::default_precision();
    let mut lineitem_keys = HyperLogLog::default_precision();
    for i in 0..10_000i64 {
        orders_keys.add_i64(i);
    }
    for i in 0..40_000i64 {
        lineitem_keys.add_i64(i % 10_000);
    }

    let (tdom, from_hll) = tdom_from_sketches(&orders_keys, &lineitem_keys);
    assert!(from_hll);
    let error = (tdom as f64 - 10_000.0).abs() / 10_000.0;
    assert!(error < 0.05, "tdom {tdom}");

    let join = two_table_join(40_000, 10_000);
    let features = extract_features(&join);
    assert!(features.tdom_from_hll);
    assert!(features.tdom_value > 0);
}
