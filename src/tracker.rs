//! Execution-time row accounting.
//!
//! Worker threads report operator output counts here. A small per-thread
//! cache of `(operator, stats)` pairs keeps the hot path lock-free; its
//! validity is gated by a `(tracker_id, generation)` pair so a `reset`
//! invalidates stale caches lazily on next touch rather than chasing
//! every thread.

use std::cell::RefCell;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

use crate::buffer::q_error;
use crate::plan::{OperatorId, PhysicalOperator};

/// Per-thread cache entries; linear scan stays cheap because a pipeline
/// only touches a handful of operators.
const THREAD_CACHE_CAP: usize = 64;

static NEXT_TRACKER_ID: AtomicU64 = AtomicU64::new(1);

/// Accumulated runtime statistics for one physical operator.
#[derive(Debug)]
pub struct OperatorRunStats {
    pub operator_name: &'static str,
    pub estimated_cardinality: u64,
    actual_rows: AtomicU64,
}

impl OperatorRunStats {
    fn new(operator_name: &'static str, estimated_cardinality: u64) -> Self {
        Self {
            operator_name,
            estimated_cardinality,
            actual_rows: AtomicU64::new(0),
        }
    }

    fn add_actual_rows(&self, rows: u64) {
        self.actual_rows.fetch_add(rows, Ordering::Relaxed);
    }

    /// Rows observed so far.
    pub fn actual_rows(&self) -> u64 {
        self.actual_rows.load(Ordering::Relaxed)
    }
}

struct ThreadCache {
    tracker_id: u64,
    generation: u64,
    entries: Vec<(OperatorId, Arc<OperatorRunStats>)>,
}

thread_local! {
    static THREAD_CACHE: RefCell<ThreadCache> = RefCell::new(ThreadCache {
        tracker_id: 0,
        generation: 0,
        entries: Vec::new(),
    });
}

/// Thread-safe per-operator accumulator of actual output rows.
pub struct ExecutionTracker {
    tracker_id: u64,
    generation: AtomicU64,
    enabled: bool,
    stats: Mutex<HashMap<OperatorId, Arc<OperatorRunStats>>>,
}

impl ExecutionTracker {
    pub fn new() -> Self {
        Self {
            tracker_id: NEXT_TRACKER_ID.fetch_add(1, Ordering::Relaxed),
            generation: AtomicU64::new(1),
            enabled: true,
            stats: Mutex::new(HashMap::new()),
        }
    }

    /// Register an operator on first touch. Subsequent calls are
    /// satisfied from the thread-local cache without locking.
    pub fn start_operator(&self, op: &PhysicalOperator) {
        if !self.enabled {
            return;
        }
        let generation = self.generation.load(Ordering::Acquire);
        THREAD_CACHE.with(|cache| {
            let mut cache = cache.borrow_mut();
            self.revalidate(&mut cache, generation);
            if cache.entries.iter().any(|(id, _)| *id == op.op_id) {
                return;
            }

            let stats = {
                let mut global = self.stats.lock();
                global
                    .entry(op.op_id)
                    .or_insert_with(|| {
                        Arc::new(OperatorRunStats::new(op.name(), op.estimated_cardinality))
                    })
                    .clone()
            };
            if cache.entries.len() < THREAD_CACHE_CAP {
                cache.entries.push((op.op_id, stats));
            }
        });
    }

    /// Record `actual_rows` emitted by the operator. Also feeds the
    /// operator's attached RL state so the post-query collector can pair
    /// the count with the plan-time prediction.
    pub fn end_operator(&self, op: &PhysicalOperator, actual_rows: u64) {
        if !self.enabled || actual_rows == 0 {
            return;
        }
        if let Some(state) = &op.rl_state {
            state.add_rows(actual_rows);
        }

        let generation = self.generation.load(Ordering::Acquire);
        THREAD_CACHE.with(|cache| {
            let mut cache = cache.borrow_mut();
            self.revalidate(&mut cache, generation);
            if let Some((_, stats)) = cache.entries.iter().find(|(id, _)| *id == op.op_id) {
                stats.add_actual_rows(actual_rows);
                return;
            }

            let stats = {
                let global = self.stats.lock();
                global.get(&op.op_id).cloned()
            };
            if let Some(stats) = stats {
                stats.add_actual_rows(actual_rows);
                if cache.entries.len() < THREAD_CACHE_CAP {
                    cache.entries.push((op.op_id, stats));
                }
            }
        });
    }

    fn revalidate(&self, cache: &mut ThreadCache, generation: u64) {
        if cache.tracker_id != self.tracker_id || cache.generation != generation {
            cache.tracker_id = self.tracker_id;
            cache.generation = generation;
            cache.entries.clear();
        }
    }

    /// Per-operator accuracy report at query end. Only does work when
    /// debug logging is active.
    pub fn finalize(&self) {
        if !self.enabled || !tracing::enabled!(tracing::Level::DEBUG) {
            return;
        }
        let stats = self.stats.lock();
        for entry in stats.values() {
            let actual = entry.actual_rows();
            if actual > 0 && entry.estimated_cardinality > 0 {
                debug!(
                    "{}: actual={} estimated={} q-error={:.3}",
                    entry.operator_name,
                    actual,
                    entry.estimated_cardinality,
                    q_error(entry.estimated_cardinality, actual)
                );
            }
        }
    }

    /// Snapshot of an operator's stats.
    pub fn operator_stats(&self, op_id: OperatorId) -> Option<Arc<OperatorRunStats>> {
        self.stats.lock().get(&op_id).cloned()
    }

    /// Number of registered operators.
    pub fn len(&self) -> usize {
        self.stats.lock().len()
    }

    /// Whether no operators are registered.
    pub fn is_empty(&self) -> bool {
        self.stats.lock().is_empty()
    }

    /// Drop all stats and invalidate per-thread caches on next touch.
    pub fn reset(&self) {
        if !self.enabled {
            return;
        }
        self.generation.fetch_add(1, Ordering::Release);
        self.stats.lock().clear();
    }
}

impl Default for ExecutionTracker {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::{OperatorRlState, PhysicalOperatorKind};

    fn scan_op(estimate: u64) -> PhysicalOperator {
        PhysicalOperator::new(PhysicalOperatorKind::TableScan, estimate)
    }

    #[test]
    fn test_start_then_end_accumulates() {
        let tracker = ExecutionTracker::new();
        let op = scan_op(1000);

        tracker.start_operator(&op);
        tracker.end_operator(&op, 400);
        tracker.end_operator(&op, 250);

        let stats = tracker.operator_stats(op.op_id).unwrap();
        assert_eq!(stats.actual_rows(), 650);
        assert_eq!(stats.estimated_cardinality, 1000);
    }

    #[test]
    fn test_zero_rows_ignored() {
        let tracker = ExecutionTracker::new();
        let op = scan_op(10);
        tracker.start_operator(&op);
        tracker.end_operator(&op, 0);
        assert_eq!(tracker.operator_stats(op.op_id).unwrap().actual_rows(), 0);
    }

    #[test]
    fn test_end_feeds_rl_state() {
        let tracker = ExecutionTracker::new();
        let mut op = scan_op(100);
        op.rl_state = Some(OperatorRlState::new(vec![0.0; 4], 50, 100));

        tracker.start_operator(&op);
        tracker.end_operator(&op, 77);

        assert_eq!(op.rl_state.as_ref().unwrap().actual_cardinality(), 77);
    }

    #[test]
    fn test_reset_invalidates_and_clears() {
        let tracker = ExecutionTracker::new();
        let op = scan_op(100);
        tracker.start_operator(&op);
        tracker.end_operator(&op, 10);
        assert_eq!(tracker.len(), 1);

        tracker.reset();
        assert!(tracker.is_empty());

        // The stale thread cache must not resurrect the old entry: an end
        // without a start is dropped after reset.
        tracker.end_operator(&op, 10);
        assert!(tracker.operator_stats(op.op_id).is_none());

        // A fresh start works and accumulates from zero.
        tracker.start_operator(&op);
        tracker.end_operator(&op, 5);
        assert_eq!(tracker.operator_stats(op.op_id).unwrap().actual_rows(), 5);
    }

    #[test]
    fn test_concurrent_accumulation() {
        let tracker = ExecutionTracker::new();
        let op = scan_op(1_000_000);
        tracker.start_operator(&op);

        std::thread::scope(|scope| {
            for _ in 0..8 {
                scope.spawn(|| {
                    for _ in 0..1000 {
                        tracker.end_operator(&op, 3);
                    }
                });
            }
        });

        assert_eq!(
            tracker.operator_stats(op.op_id).unwrap().actual_rows(),
            8 * 1000 * 3
        );
    }

    #[test]
    fn test_two_trackers_do_not_share_cache() {
        let a = ExecutionTracker::new();
        let b = ExecutionTracker::new();
        let op = scan_op(10);

        a.start_operator(&op);
        a.end_operator(&op, 5);
        // Same thread, different tracker: the cache revalidates and b
        // sees nothing until its own start.
        b.end_operator(&op, 7);
        assert!(b.operator_stats(op.op_id).is_none());
        assert_eq!(a.operator_stats(op.op_id).unwrap().actual_rows(), 5);
    }
}
