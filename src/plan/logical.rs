//! Logical operators as seen by the estimator.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Process-unique identity for an operator. Feature-collector maps are
/// keyed by this id; it survives moves of the owning operator and stays
/// stable across optimizer stages that keep the node alive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OperatorId(u64);

static NEXT_OPERATOR_ID: AtomicU64 = AtomicU64::new(1);

impl OperatorId {
    /// Allocate the next unique id.
    pub fn next() -> Self {
        Self(NEXT_OPERATOR_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Raw id value.
    pub fn raw(&self) -> u64 {
        self.0
    }
}

/// Comparison applied by a filter predicate or join condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ComparisonKind {
    Equal,
    LessThan,
    GreaterThan,
    LessThanOrEqual,
    GreaterThanOrEqual,
    NotEqual,
}

impl ComparisonKind {
    /// True for the four range comparisons.
    pub fn is_range(&self) -> bool {
        matches!(
            self,
            Self::LessThan | Self::GreaterThan | Self::LessThanOrEqual | Self::GreaterThanOrEqual
        )
    }
}

impl fmt::Display for ComparisonKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Equal => "EQUAL",
            Self::LessThan => "LESSTHAN",
            Self::GreaterThan => "GREATERTHAN",
            Self::LessThanOrEqual => "LESSTHANOREQUALTO",
            Self::GreaterThanOrEqual => "GREATERTHANOREQUALTO",
            Self::NotEqual => "NOTEQUAL",
        };
        write!(f, "{name}")
    }
}

/// Join variant of a comparison join.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JoinKind {
    Inner,
    Left,
    Right,
    Semi,
    Anti,
    Mark,
    Outer,
}

impl fmt::Display for JoinKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Inner => "INNER",
            Self::Left => "LEFT",
            Self::Right => "RIGHT",
            Self::Semi => "SEMI",
            Self::Anti => "ANTI",
            Self::Mark => "MARK",
            Self::Outer => "OUTER",
        };
        write!(f, "{name}")
    }
}

/// Shape of a filter expression node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FilterKind {
    ConjunctionAnd,
    ConjunctionOr,
    ConstantComparison,
    IsNull,
    IsNotNull,
    Between,
    Like,
    Other,
}

impl fmt::Display for FilterKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::ConjunctionAnd => "CONJUNCTION_AND",
            Self::ConjunctionOr => "CONJUNCTION_OR",
            Self::ConstantComparison => "CONSTANT_COMPARISON",
            Self::IsNull => "IS_NULL",
            Self::IsNotNull => "IS_NOT_NULL",
            Self::Between => "BETWEEN",
            Self::Like => "LIKE",
            Self::Other => "OTHER",
        };
        write!(f, "{name}")
    }
}

/// Literal constant compared against in a filter predicate.
#[derive(Debug, Clone, PartialEq)]
pub enum FilterConstant {
    Numeric(f64),
    Text(String),
}

/// One filter predicate in flattened form.
#[derive(Debug, Clone)]
pub struct FilterExpr {
    pub kind: FilterKind,
    pub comparison: Option<ComparisonKind>,
    pub column: Option<String>,
    pub constant: Option<FilterConstant>,
}

impl FilterExpr {
    /// A constant comparison on `column`.
    pub fn comparison(
        column: impl Into<String>,
        comparison: ComparisonKind,
        constant: FilterConstant,
    ) -> Self {
        Self {
            kind: FilterKind::ConstantComparison,
            comparison: Some(comparison),
            column: Some(column.into()),
            constant: Some(constant),
        }
    }

    /// A bare conjunction node.
    pub fn conjunction_and() -> Self {
        Self {
            kind: FilterKind::ConjunctionAnd,
            comparison: None,
            column: None,
            constant: None,
        }
    }
}

/// One condition of a comparison join.
#[derive(Debug, Clone)]
pub struct JoinCondition {
    pub comparison: ComparisonKind,
    pub left_column: String,
    pub right_column: String,
}

impl JoinCondition {
    pub fn new(
        left_column: impl Into<String>,
        comparison: ComparisonKind,
        right_column: impl Into<String>,
    ) -> Self {
        Self {
            comparison,
            left_column: left_column.into(),
            right_column: right_column.into(),
        }
    }

    /// True for equality conditions.
    pub fn is_equality(&self) -> bool {
        self.comparison == ComparisonKind::Equal
    }

    /// True for range conditions.
    pub fn is_range(&self) -> bool {
        self.comparison.is_range()
    }
}

/// Kind-specific payload of a logical operator.
#[derive(Debug, Clone)]
pub enum LogicalOperatorKind {
    /// Base table scan
    Get {
        table_name: String,
        base_cardinality: u64,
    },
    /// Standalone filter
    Filter { predicates: Vec<FilterExpr> },
    /// Comparison join
    Join {
        join_kind: JoinKind,
        conditions: Vec<JoinCondition>,
    },
    /// Aggregation / GROUP BY
    Aggregate {
        group_columns: Vec<String>,
        aggregate_functions: Vec<String>,
        grouping_sets: usize,
    },
    Projection,
    TopN { limit: u64 },
    Order,
    Limit { fetch: u64 },
    Union,
    Other { name: String },
}

impl LogicalOperatorKind {
    /// Stable kind name used in cache keys and diagnostics.
    pub fn name(&self) -> &str {
        match self {
            Self::Get { .. } => "GET",
            Self::Filter { .. } => "FILTER",
            Self::Join { .. } => "COMPARISON_JOIN",
            Self::Aggregate { .. } => "AGGREGATE_AND_GROUP_BY",
            Self::Projection => "PROJECTION",
            Self::TopN { .. } => "TOP_N",
            Self::Order => "ORDER_BY",
            Self::Limit { .. } => "LIMIT",
            Self::Union => "UNION",
            Self::Other { name } => name,
        }
    }
}

/// A node of the logical plan.
///
/// `estimated_cardinality` is the working estimate consumed by downstream
/// planning. When the optimizer-coupled hook overwrites it, the engine's
/// native estimate is preserved in `baseline_cardinality` the first time.
#[derive(Debug, Clone)]
pub struct LogicalOperator {
    pub op_id: OperatorId,
    pub kind: LogicalOperatorKind,
    pub children: Vec<LogicalOperator>,
    pub estimated_cardinality: u64,
    pub has_estimated_cardinality: bool,
    pub baseline_cardinality: Option<u64>,
}

impl LogicalOperator {
    /// Create an operator with no estimate yet.
    pub fn new(kind: LogicalOperatorKind, children: Vec<LogicalOperator>) -> Self {
        Self {
            op_id: OperatorId::next(),
            kind,
            children,
            estimated_cardinality: 0,
            has_estimated_cardinality: false,
            baseline_cardinality: None,
        }
    }

    /// Set the engine's estimate for this node.
    pub fn with_estimate(mut self, estimated_cardinality: u64) -> Self {
        self.estimated_cardinality = estimated_cardinality;
        self.has_estimated_cardinality = true;
        self
    }

    /// Base table scan.
    pub fn get(table_name: impl Into<String>, base_cardinality: u64) -> Self {
        Self::new(
            LogicalOperatorKind::Get {
                table_name: table_name.into(),
                base_cardinality,
            },
            Vec::new(),
        )
        .with_estimate(base_cardinality)
    }

    /// Filter over a child.
    pub fn filter(predicates: Vec<FilterExpr>, child: LogicalOperator) -> Self {
        Self::new(LogicalOperatorKind::Filter { predicates }, vec![child])
    }

    /// Comparison join over two children.
    pub fn join(
        join_kind: JoinKind,
        conditions: Vec<JoinCondition>,
        left: LogicalOperator,
        right: LogicalOperator,
    ) -> Self {
        Self::new(
            LogicalOperatorKind::Join {
                join_kind,
                conditions,
            },
            vec![left, right],
        )
    }

    /// Aggregation over a child.
    pub fn aggregate(
        group_columns: Vec<String>,
        aggregate_functions: Vec<String>,
        child: LogicalOperator,
    ) -> Self {
        Self::new(
            LogicalOperatorKind::Aggregate {
                group_columns,
                aggregate_functions,
                grouping_sets: 1,
            },
            vec![child],
        )
    }

    /// Top-N over a child.
    pub fn top_n(limit: u64, child: LogicalOperator) -> Self {
        Self::new(LogicalOperatorKind::TopN { limit }, vec![child])
    }

    /// Display name of the operator kind.
    pub fn name(&self) -> &str {
        self.kind.name()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_operator_ids_are_unique() {
        let a = LogicalOperator::get("lineitem", 6_000_000);
        let b = LogicalOperator::get("lineitem", 6_000_000);
        assert_ne!(a.op_id, b.op_id);
    }

    #[test]
    fn test_get_carries_base_estimate() {
        let scan = LogicalOperator::get("orders", 1_500_000);
        assert!(scan.has_estimated_cardinality);
        assert_eq!(scan.estimated_cardinality, 1_500_000);
        assert!(scan.baseline_cardinality.is_none());
    }

    #[test]
    fn test_join_condition_classification() {
        let eq = JoinCondition::new("l_orderkey", ComparisonKind::Equal, "o_orderkey");
        assert!(eq.is_equality());
        assert!(!eq.is_range());

        let range = JoinCondition::new("l_shipdate", ComparisonKind::LessThan, "o_orderdate");
        assert!(range.is_range());
    }

    #[test]
    fn test_kind_names() {
        let join = LogicalOperator::join(
            JoinKind::Inner,
            vec![],
            LogicalOperator::get("a", 10),
            LogicalOperator::get("b", 10),
        );
        assert_eq!(join.name(), "COMPARISON_JOIN");
        assert_eq!(ComparisonKind::LessThanOrEqual.to_string(), "LESSTHANOREQUALTO");
        assert_eq!(JoinKind::Semi.to_string(), "SEMI");
        assert_eq!(FilterKind::ConjunctionAnd.to_string(), "CONJUNCTION_AND");
    }
}
