//! Per-operator feature extraction.
//!
//! [`extract_features`] turns a logical operator plus the collector's
//! statistics into an [`OperatorFeatures`] bag; [`vector::features_to_vector`]
//! turns the bag into the fixed-width numeric vector the model consumes.

pub mod collector;
pub mod vector;

use std::collections::HashMap;

use collector::{FeatureCollector, JoinFeatures};

use crate::plan::{
    ComparisonKind, FilterConstant, FilterExpr, FilterKind, JoinKind, LogicalOperator,
    LogicalOperatorKind,
};

/// Feature bag for a single operator. Only the fields matching the
/// operator's kind are populated; the rest keep their neutral defaults.
#[derive(Debug, Clone)]
pub struct OperatorFeatures {
    pub operator_kind: String,
    pub operator_name: String,
    /// The engine's estimate for this operator at extraction time
    pub estimated_cardinality: u64,

    // Table scan
    pub table_name: String,
    pub base_table_cardinality: u64,
    pub column_distinct_counts: HashMap<String, u64>,
    pub num_table_filters: u64,
    pub final_cardinality: u64,
    pub filter_selectivity: f64,
    pub used_default_selectivity: bool,
    pub cardinality_after_default_selectivity: u64,
    pub filter_column_ids: Vec<u64>,

    // Filters
    pub filter_kinds: Vec<FilterKind>,
    pub comparison_kinds: Vec<ComparisonKind>,
    pub child_cardinality: u64,
    pub filter_constant_count: u64,
    pub filter_constant_numeric_log_mean: f64,
    pub filter_constant_string_log_mean: f64,

    // Join
    pub join_kind: Option<JoinKind>,
    pub join_condition_count: u64,
    pub join_equality_condition_count: u64,
    pub left_cardinality: u64,
    pub right_cardinality: u64,
    pub tdom_value: u64,
    pub tdom_from_hll: bool,
    pub join_relation_set: String,
    pub num_relations: u64,
    pub left_denominator: f64,
    pub right_denominator: f64,
    pub join_comparison: Option<ComparisonKind>,
    pub extra_ratio: f64,
    pub numerator: f64,
    pub denominator: f64,

    // Aggregate
    pub num_group_by_columns: u64,
    pub num_aggregate_functions: u64,
    pub num_grouping_sets: u64,
}

impl Default for OperatorFeatures {
    fn default() -> Self {
        Self {
            operator_kind: String::new(),
            operator_name: String::new(),
            estimated_cardinality: 0,
            table_name: String::new(),
            base_table_cardinality: 0,
            column_distinct_counts: HashMap::new(),
            num_table_filters: 0,
            final_cardinality: 0,
            filter_selectivity: 1.0,
            used_default_selectivity: false,
            cardinality_after_default_selectivity: 0,
            filter_column_ids: Vec::new(),
            filter_kinds: Vec::new(),
            comparison_kinds: Vec::new(),
            child_cardinality: 0,
            filter_constant_count: 0,
            filter_constant_numeric_log_mean: 0.0,
            filter_constant_string_log_mean: 0.0,
            join_kind: None,
            join_condition_count: 0,
            join_equality_condition_count: 0,
            left_cardinality: 0,
            right_cardinality: 0,
            tdom_value: 0,
            tdom_from_hll: false,
            join_relation_set: String::new(),
            num_relations: 0,
            left_denominator: 1.0,
            right_denominator: 1.0,
            join_comparison: None,
            extra_ratio: 1.0,
            numerator: 0.0,
            denominator: 1.0,
            num_group_by_columns: 0,
            num_aggregate_functions: 0,
            num_grouping_sets: 0,
        }
    }
}

impl OperatorFeatures {
    /// Whether the operator is a base table scan.
    pub fn is_table_scan(&self) -> bool {
        !self.table_name.is_empty()
    }

    /// Whether the operator is a join.
    pub fn is_join(&self) -> bool {
        self.join_kind.is_some()
    }

    /// Whether the operator is a standalone filter.
    pub fn is_standalone_filter(&self) -> bool {
        !self.filter_kinds.is_empty() && self.table_name.is_empty()
    }

    /// Whether the operator is an aggregation.
    pub fn is_aggregate(&self) -> bool {
        self.num_group_by_columns > 0 || self.num_aggregate_functions > 0
    }

    /// Build join features for the model from the cost model's join
    /// formula inputs. Relation cardinalities reported as 0 or as the max
    /// sentinel are invalid for complex join subsets; both sides then
    /// derive from sqrt(numerator), since the numerator is the product of
    /// the input cardinalities.
    pub fn from_join_features(join: &JoinFeatures) -> Self {
        let mut features = Self {
            operator_kind: "COMPARISON_JOIN".into(),
            operator_name: "COMPARISON_JOIN".into(),
            estimated_cardinality: join.estimated_cardinality,
            join_kind: Some(join.join_kind),
            join_relation_set: join.join_relation_set.clone(),
            num_relations: join.num_relations,
            left_denominator: join.left_denominator,
            right_denominator: join.right_denominator,
            join_comparison: join.comparison,
            tdom_value: join.tdom_value,
            tdom_from_hll: join.tdom_from_hll,
            extra_ratio: join.extra_ratio,
            numerator: join.numerator,
            denominator: join.denominator,
            ..Self::default()
        };
        let (left, right) =
            normalize_side_cardinalities(join.left_relation_card, join.right_relation_card, join.numerator);
        features.left_cardinality = left;
        features.right_cardinality = right;
        features
    }

    /// Multi-line diagnostic rendering of the collected features.
    pub fn summary(&self) -> String {
        let mut out = String::new();
        out.push_str("========== OPERATOR FEATURES ==========\n");
        out.push_str(&format!("Operator Kind: {}\n", self.operator_kind));
        out.push_str(&format!(
            "Engine Estimated Cardinality: {}\n",
            self.estimated_cardinality
        ));

        if self.is_table_scan() {
            out.push_str("----- table scan -----\n");
            out.push_str(&format!("Table Name: {}\n", self.table_name));
            out.push_str(&format!(
                "Base Table Cardinality: {}\n",
                self.base_table_cardinality
            ));
            for (column, distinct) in &self.column_distinct_counts {
                out.push_str(&format!(
                    "Column: {column} | Distinct Count (HLL): {distinct}\n"
                ));
            }
            if self.num_table_filters > 0 {
                out.push_str(&format!(
                    "Number of table filters: {}\n",
                    self.num_table_filters
                ));
                for kind in &self.filter_kinds {
                    out.push_str(&format!("Filter Kind: {kind}\n"));
                }
                for comparison in &self.comparison_kinds {
                    out.push_str(&format!("Comparison Kind: {comparison}\n"));
                }
                if self.used_default_selectivity {
                    out.push_str(&format!(
                        "Cardinality after default selectivity: {}\n",
                        self.cardinality_after_default_selectivity
                    ));
                }
            }
            if self.final_cardinality > 0 {
                out.push_str(&format!(
                    "Final Cardinality (after filters): {}\n",
                    self.final_cardinality
                ));
                out.push_str(&format!(
                    "Filter Selectivity Ratio: {:.6}\n",
                    self.filter_selectivity
                ));
            }
        }

        if let Some(join_kind) = self.join_kind {
            out.push_str("----- join -----\n");
            if !self.join_relation_set.is_empty() {
                out.push_str(&format!("Join Relation Set: {}\n", self.join_relation_set));
                out.push_str(&format!(
                    "Number of relations in join: {}\n",
                    self.num_relations
                ));
            }
            out.push_str(&format!("Join Kind: {join_kind}\n"));
            out.push_str(&format!("Left Cardinality: {}\n", self.left_cardinality));
            out.push_str(&format!("Right Cardinality: {}\n", self.right_cardinality));
            if let Some(comparison) = self.join_comparison {
                out.push_str(&format!("Comparison Kind: {comparison}\n"));
            }
            if self.tdom_value > 0 {
                out.push_str(&format!(
                    "TDOM value: {} (from HLL: {})\n",
                    self.tdom_value, self.tdom_from_hll
                ));
            }
            if self.numerator > 0.0 && self.denominator > 0.0 {
                out.push_str(&format!(
                    "Numerator: {:.1} | Denominator: {:.1} | Formula Estimate: {:.1}\n",
                    self.numerator,
                    self.denominator,
                    self.numerator / self.denominator
                ));
            }
        }

        if self.is_aggregate() {
            out.push_str("----- aggregate -----\n");
            out.push_str(&format!(
                "GROUP BY columns: {} | aggregate functions: {} | grouping sets: {}\n",
                self.num_group_by_columns, self.num_aggregate_functions, self.num_grouping_sets
            ));
        }

        if self.is_standalone_filter() {
            out.push_str("----- filter -----\n");
            let kinds: Vec<String> = self.filter_kinds.iter().map(|k| k.to_string()).collect();
            out.push_str(&format!("Filter Kinds: {}\n", kinds.join(", ")));
            out.push_str(&format!("Child Cardinality: {}\n", self.child_cardinality));
        }

        out.push_str("=======================================\n");
        out
    }
}

/// Repair invalid side cardinalities (0 or the max sentinel) by splitting
/// the numerator evenly across both sides.
fn normalize_side_cardinalities(left: u64, right: u64, numerator: f64) -> (u64, u64) {
    let invalid = |v: u64| v == 0 || v == u64::MAX;
    if invalid(left) || invalid(right) {
        if numerator > 0.0 {
            let side = numerator.sqrt().max(1.0) as u64;
            (side, side)
        } else {
            (1, 1)
        }
    } else {
        (left, right)
    }
}

/// Summarise the constants a filter compares against: count, log-mean of
/// numeric constants, log-mean of string lengths.
fn summarize_filter_constants(predicates: &[FilterExpr]) -> (u64, f64, f64) {
    let mut count = 0u64;
    let mut numeric_log_sum = 0.0;
    let mut numeric_count = 0u64;
    let mut string_log_sum = 0.0;
    let mut string_count = 0u64;

    for predicate in predicates {
        match &predicate.constant {
            Some(FilterConstant::Numeric(value)) => {
                count += 1;
                numeric_count += 1;
                numeric_log_sum += value.abs().max(1.0).ln();
            }
            Some(FilterConstant::Text(text)) => {
                count += 1;
                string_count += 1;
                string_log_sum += (text.len() as f64).max(1.0).ln();
            }
            None => {}
        }
    }

    let numeric_log_mean = if numeric_count > 0 {
        numeric_log_sum / numeric_count as f64
    } else {
        0.0
    };
    let string_log_mean = if string_count > 0 {
        string_log_sum / string_count as f64
    } else {
        0.0
    };
    (count, numeric_log_mean, string_log_mean)
}

/// Extract the feature bag for a logical operator, merging the operator's
/// direct fields with whatever the collector recorded for it.
pub fn extract_features(op: &LogicalOperator) -> OperatorFeatures {
    let collector = FeatureCollector::global();
    let mut features = OperatorFeatures {
        operator_kind: op.kind.name().to_string(),
        operator_name: op.kind.name().to_string(),
        estimated_cardinality: op.estimated_cardinality,
        ..OperatorFeatures::default()
    };

    match &op.kind {
        LogicalOperatorKind::Get {
            table_name,
            base_cardinality,
        } => {
            features.table_name = table_name.clone();
            features.base_table_cardinality = *base_cardinality;
            if let Some(scan) = collector.table_scan_features(op.op_id) {
                features.table_name = scan.table_name;
                features.base_table_cardinality = scan.base_cardinality;
                features.column_distinct_counts = scan.column_distinct_counts;
                features.num_table_filters = scan.num_table_filters;
                features.final_cardinality = scan.final_cardinality;
                features.filter_selectivity = scan.filter_selectivity;
                features.used_default_selectivity = scan.used_default_selectivity;
                features.cardinality_after_default_selectivity =
                    scan.cardinality_after_default_selectivity;
                features.filter_kinds = scan.filter_kinds;
                features.comparison_kinds = scan.comparison_kinds;
                features.filter_column_ids = scan.filter_column_ids;
            }
        }
        LogicalOperatorKind::Filter { predicates } => {
            features.filter_kinds = predicates.iter().map(|p| p.kind).collect();
            features.comparison_kinds = predicates.iter().filter_map(|p| p.comparison).collect();
            let (count, numeric_log_mean, string_log_mean) =
                summarize_filter_constants(predicates);
            features.filter_constant_count = count;
            features.filter_constant_numeric_log_mean = numeric_log_mean;
            features.filter_constant_string_log_mean = string_log_mean;
            if let Some(child) = op.children.first() {
                features.child_cardinality = child.estimated_cardinality;
            }
            if let Some(filter) = collector.filter_features(op.op_id) {
                features.comparison_kinds = filter.comparison_kinds;
                if filter.constant_count > 0 {
                    features.filter_constant_count = filter.constant_count;
                    features.filter_constant_numeric_log_mean = filter.numeric_constant_log_mean;
                    features.filter_constant_string_log_mean = filter.string_length_log_mean;
                }
            }
        }
        LogicalOperatorKind::Join {
            join_kind,
            conditions,
        } => {
            features.join_kind = Some(*join_kind);
            features.join_condition_count = conditions.len() as u64;
            features.join_equality_condition_count =
                conditions.iter().filter(|c| c.is_equality()).count() as u64;
            if let Some(condition) = conditions.first() {
                features.join_comparison = Some(condition.comparison);
            }
            if op.children.len() >= 2 {
                features.left_cardinality = op.children[0].estimated_cardinality;
                features.right_cardinality = op.children[1].estimated_cardinality;
            }

            // Operator identity can change between optimizer stages;
            // fall back to the estimate-keyed map.
            let join_features = collector.join_features(op.op_id).or_else(|| {
                if op.estimated_cardinality > 0 {
                    collector.join_features_by_estimate(op.estimated_cardinality)
                } else {
                    None
                }
            });
            if let Some(join) = join_features {
                features.tdom_value = join.tdom_value;
                features.tdom_from_hll = join.tdom_from_hll;
                features.join_relation_set = join.join_relation_set;
                features.num_relations = join.num_relations;
                features.left_denominator = join.left_denominator;
                features.right_denominator = join.right_denominator;
                if join.comparison.is_some() {
                    features.join_comparison = join.comparison;
                }
                features.extra_ratio = join.extra_ratio;
                features.numerator = join.numerator;
                features.denominator = join.denominator;
                let (left, right) = normalize_side_cardinalities(
                    if features.left_cardinality > 0 {
                        features.left_cardinality
                    } else {
                        join.left_relation_card
                    },
                    if features.right_cardinality > 0 {
                        features.right_cardinality
                    } else {
                        join.right_relation_card
                    },
                    join.numerator,
                );
                features.left_cardinality = left;
                features.right_cardinality = right;
            }
        }
        LogicalOperatorKind::Aggregate {
            group_columns,
            aggregate_functions,
            grouping_sets,
        } => {
            features.num_group_by_columns = group_columns.len() as u64;
            features.num_aggregate_functions = aggregate_functions.len() as u64;
            features.num_grouping_sets = *grouping_sets as u64;
        }
        // Other operators carry only the basic info.
        _ => {}
    }

    features
}
