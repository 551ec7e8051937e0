//! Fixed-width feature vectorisation.
//!
//! The layout is a positional public contract: block offsets are fixed,
//! blocks that do not apply stay zero, and every block pads to its
//! declared width. Training samples, single-row predictions, and batch
//! predictions all share this layout.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use super::OperatorFeatures;
use crate::plan::{ComparisonKind, JoinKind};

/// Total vector width.
pub const FEATURE_VECTOR_SIZE: usize = 80;

const OP_KIND_WIDTH: usize = 10;
const GET_BLOCK_WIDTH: usize = 24;
const JOIN_BLOCK_WIDTH: usize = 27;
const AGGREGATE_BLOCK_WIDTH: usize = 4;
const FILTER_BLOCK_WIDTH: usize = 2;
const CONTEXT_BLOCK_WIDTH: usize = 13;

/// Offset of the operator one-hot block.
pub const OP_KIND_OFFSET: usize = 0;
/// Offset of the table-scan block.
pub const GET_BLOCK_OFFSET: usize = OP_KIND_OFFSET + OP_KIND_WIDTH;
/// Offset of the join block.
pub const JOIN_BLOCK_OFFSET: usize = GET_BLOCK_OFFSET + GET_BLOCK_WIDTH;
/// Offset of the aggregate block.
pub const AGGREGATE_BLOCK_OFFSET: usize = JOIN_BLOCK_OFFSET + JOIN_BLOCK_WIDTH;
/// Offset of the standalone-filter block.
pub const FILTER_BLOCK_OFFSET: usize = AGGREGATE_BLOCK_OFFSET + AGGREGATE_BLOCK_WIDTH;
/// Offset of the context block (baseline estimate + constant summary).
pub const CONTEXT_BLOCK_OFFSET: usize = FILTER_BLOCK_OFFSET + FILTER_BLOCK_WIDTH;

const _: () = assert!(CONTEXT_BLOCK_OFFSET + CONTEXT_BLOCK_WIDTH == FEATURE_VECTOR_SIZE);

/// ln(x) for positive x, 0 otherwise.
pub fn safe_log(value: f64) -> f64 {
    if value > 0.0 {
        value.ln()
    } else {
        0.0
    }
}

fn safe_log_u64(value: u64) -> f64 {
    safe_log(value as f64)
}

fn comparison_one_hot(out: &mut [f64], offset: usize, comparisons: &[ComparisonKind]) {
    for comparison in comparisons {
        let slot = match comparison {
            ComparisonKind::Equal => 0,
            ComparisonKind::LessThan => 1,
            ComparisonKind::GreaterThan => 2,
            ComparisonKind::LessThanOrEqual => 3,
            ComparisonKind::GreaterThanOrEqual => 4,
            ComparisonKind::NotEqual => 5,
        };
        out[offset + slot] = 1.0;
    }
}

/// Hash of the table name normalized to [0, 1).
fn table_name_hash(name: &str) -> f64 {
    let mut hasher = DefaultHasher::new();
    name.hash(&mut hasher);
    (hasher.finish() % 10_000) as f64 / 10_000.0
}

/// Deterministic, side-effect-free vectorisation of a feature bag.
pub fn features_to_vector(features: &OperatorFeatures) -> Vec<f64> {
    let mut out = vec![0.0; FEATURE_VECTOR_SIZE];

    // Operator one-hot: GET, JOIN, FILTER, AGGREGATE, then reserved slots
    // for PROJECTION, TOP_N, ORDER_BY, LIMIT, UNION, with OTHER last.
    if features.is_table_scan() {
        out[OP_KIND_OFFSET] = 1.0;
    } else if features.is_join() {
        out[OP_KIND_OFFSET + 1] = 1.0;
    } else if features.is_standalone_filter() {
        out[OP_KIND_OFFSET + 2] = 1.0;
    } else if features.is_aggregate() {
        out[OP_KIND_OFFSET + 3] = 1.0;
    } else {
        out[OP_KIND_OFFSET + 9] = 1.0;
    }

    if features.is_table_scan() {
        let mut idx = GET_BLOCK_OFFSET;
        out[idx] = table_name_hash(&features.table_name);
        idx += 1;
        out[idx] = safe_log_u64(features.base_table_cardinality);
        idx += 1;
        out[idx] = features.num_table_filters as f64;
        idx += 1;
        out[idx] = features.filter_selectivity;
        idx += 1;
        out[idx] = if features.used_default_selectivity { 1.0 } else { 0.0 };
        idx += 1;
        out[idx] = features.filter_kinds.len() as f64;
        idx += 1;
        out[idx] = features.column_distinct_counts.len() as f64;
        idx += 1;

        if !features.column_distinct_counts.is_empty() && features.base_table_cardinality > 0 {
            let base = features.base_table_cardinality as f64;
            let mut ratio_sum = 0.0;
            let mut log_sum = 0.0;
            let mut min_ratio = 1.0f64;
            let mut max_ratio = 0.0f64;
            let mut min_distinct = features.base_table_cardinality;
            let mut max_distinct = 0u64;
            let mut high_card_cols = 0u64;
            let mut low_card_cols = 0u64;
            for &distinct in features.column_distinct_counts.values() {
                let ratio = distinct as f64 / base;
                ratio_sum += ratio;
                log_sum += (distinct as f64).max(1.0).ln();
                min_ratio = min_ratio.min(ratio);
                max_ratio = max_ratio.max(ratio);
                min_distinct = min_distinct.min(distinct);
                max_distinct = max_distinct.max(distinct);
                if ratio > 0.5 {
                    high_card_cols += 1;
                }
                if ratio < 0.05 {
                    low_card_cols += 1;
                }
            }
            let columns = features.column_distinct_counts.len() as f64;
            out[idx] = ratio_sum / columns;
            out[idx + 1] = max_ratio;
            out[idx + 2] = min_ratio;
            out[idx + 3] = log_sum / columns;
            out[idx + 4] = high_card_cols as f64;
            out[idx + 5] = low_card_cols as f64;
            out[idx + 6] = safe_log_u64(min_distinct);
            out[idx + 7] = safe_log_u64(max_distinct);
        }
        idx += 8;

        comparison_one_hot(&mut out, idx, &features.comparison_kinds);
        // Remaining GET slots stay zero (reserved).
    }

    if features.is_join() {
        let mut idx = JOIN_BLOCK_OFFSET;
        let left = features.left_cardinality as f64;
        let right = features.right_cardinality as f64;
        out[idx] = safe_log_u64(features.left_cardinality);
        idx += 1;
        out[idx] = safe_log_u64(features.right_cardinality);
        idx += 1;
        out[idx] = safe_log_u64(features.tdom_value);
        idx += 1;
        out[idx] = if features.tdom_from_hll { 1.0 } else { 0.0 };
        idx += 1;

        if let Some(join_kind) = features.join_kind {
            let slot = match join_kind {
                JoinKind::Inner => Some(0),
                JoinKind::Left => Some(1),
                JoinKind::Right => Some(2),
                JoinKind::Semi => Some(3),
                JoinKind::Anti => Some(4),
                JoinKind::Mark | JoinKind::Outer => None,
            };
            if let Some(slot) = slot {
                out[idx + slot] = 1.0;
            }
        }
        idx += 5;

        if let Some(comparison) = features.join_comparison {
            comparison_one_hot(&mut out, idx, &[comparison]);
        }
        idx += 6;

        out[idx] = safe_log(features.extra_ratio);
        idx += 1;
        out[idx] = safe_log(features.numerator.max(1.0));
        idx += 1;
        out[idx] = safe_log(features.denominator.max(1.0));
        idx += 1;
        out[idx] = features.num_relations as f64;
        idx += 1;
        out[idx] = safe_log(features.left_denominator.max(1.0));
        idx += 1;
        out[idx] = safe_log(features.right_denominator.max(1.0));
        idx += 1;

        // Derived selectivity features separating highly selective joins
        // from cross-product-like ones.
        let cross_product = left * right;
        let selectivity_factor = if features.denominator > 0.0 {
            cross_product / features.denominator
        } else {
            1.0
        };
        out[idx] = safe_log(selectivity_factor.max(1.0));
        idx += 1;

        let tdom_ratio = if left > 0.0 && right > 0.0 && features.tdom_value > 0 {
            features.tdom_value as f64 / ((left + right) / 2.0)
        } else {
            0.0
        };
        out[idx] = tdom_ratio;
        idx += 1;

        let selectivity_ratio = if features.numerator > 0.0 {
            features.denominator / features.numerator
        } else {
            1.0
        };
        out[idx] = safe_log(selectivity_ratio.max(1.0));
        idx += 1;

        let size_imbalance = if left > 0.0 && right > 0.0 {
            left.max(right) / left.min(right)
        } else {
            1.0
        };
        out[idx] = safe_log(size_imbalance.max(1.0));
        idx += 1;

        out[idx] = if features.tdom_value > 0 && features.tdom_value < 1000 {
            1.0
        } else {
            0.0
        };
        idx += 1;

        let expected_output = if features.numerator > 0.0 && features.denominator > 0.0 {
            features.numerator / features.denominator
        } else {
            0.0
        };
        out[idx] = safe_log(expected_output.max(1.0));
    }

    if features.is_aggregate() {
        let idx = AGGREGATE_BLOCK_OFFSET;
        out[idx] = safe_log_u64(features.estimated_cardinality);
        out[idx + 1] = features.num_group_by_columns as f64;
        out[idx + 2] = features.num_aggregate_functions as f64;
        out[idx + 3] = features.num_grouping_sets as f64;
    }

    if features.is_standalone_filter() {
        let idx = FILTER_BLOCK_OFFSET;
        out[idx] = safe_log_u64(features.child_cardinality);
        out[idx + 1] = features.filter_kinds.len() as f64;
    }

    // Context: the engine's own estimate plus the filter-constant summary.
    let idx = CONTEXT_BLOCK_OFFSET;
    out[idx] = safe_log_u64(features.estimated_cardinality);
    out[idx + 1] = features.filter_constant_count as f64;
    out[idx + 2] = features.filter_constant_numeric_log_mean;
    out[idx + 3] = features.filter_constant_string_log_mean;

    out
}
