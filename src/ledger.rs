//! Spend accounting across orchestration runs.
//!
//! Tracks cumulative cost per task id for the life of the process. Costs are
//! integer cents, so long-running aggregation never drifts.
//!
//! Thread-safe: counters live in a sharded [`DashMap`]; each increment holds
//! only its shard's write lock, so concurrent runs never lose updates and
//! runs for different tasks rarely contend.

use std::collections::HashMap;

use dashmap::DashMap;

/// Process-wide spend ledger keyed by task id.
///
/// Entries only grow. They are cleared solely by [`BudgetLedger::reset`],
/// which the orchestrator never calls on its own.
///
/// # Panics
///
/// This type and its methods never panic.
#[derive(Debug, Default)]
pub struct BudgetLedger {
    per_task: DashMap<String, u64>,
}

impl BudgetLedger {
    /// Create an empty ledger.
    pub fn new() -> Self {
        Self::default()
    }

    /// Atomically add `cents` to `task_id`'s running total.
    ///
    /// Saturates at `u64::MAX` rather than wrapping.
    ///
    /// # Returns
    ///
    /// The task's total after the increment.
    pub fn add_cost(&self, task_id: &str, cents: u64) -> u64 {
        let mut entry = self.per_task.entry(task_id.to_string()).or_insert(0);
        let total = entry.saturating_add(cents);
        *entry = total;
        total
    }

    /// Cumulative cents recorded for `task_id` (zero if never seen).
    pub fn total_for(&self, task_id: &str) -> u64 {
        self.per_task.get(task_id).map_or(0, |v| *v)
    }

    /// Sum across every task.
    pub fn grand_total(&self) -> u64 {
        self.per_task
            .iter()
            .fold(0_u64, |acc, entry| acc.saturating_add(*entry.value()))
    }

    /// Point-in-time copy of every task's total.
    pub fn summary(&self) -> HashMap<String, u64> {
        self.per_task
            .iter()
            .map(|entry| (entry.key().clone(), *entry.value()))
            .collect()
    }

    /// Clear every counter.
    ///
    /// Administrative only: test isolation or billing rollover.
    pub fn reset(&self) {
        let tasks = self.per_task.len();
        self.per_task.clear();
        tracing::info!(tasks, "budget ledger reset");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_add_cost_accumulates_per_task() {
        let ledger = BudgetLedger::new();
        assert_eq!(ledger.add_cost("email", 3), 3);
        assert_eq!(ledger.add_cost("email", 4), 7);
        ledger.add_cost("calendar", 2);
        assert_eq!(ledger.total_for("email"), 7);
        assert_eq!(ledger.total_for("calendar"), 2);
    }

    #[test]
    fn test_unknown_task_totals_zero() {
        assert_eq!(BudgetLedger::new().total_for("nope"), 0);
    }

    #[test]
    fn test_grand_total_sums_tasks() {
        let ledger = BudgetLedger::new();
        ledger.add_cost("a", 5);
        ledger.add_cost("b", 6);
        assert_eq!(ledger.grand_total(), 11);
    }

    #[test]
    fn test_zero_cost_still_registers_task() {
        let ledger = BudgetLedger::new();
        ledger.add_cost("free", 0);
        assert_eq!(ledger.summary().get("free"), Some(&0));
    }

    #[test]
    fn test_add_cost_saturates() {
        let ledger = BudgetLedger::new();
        ledger.add_cost("big", u64::MAX);
        assert_eq!(ledger.add_cost("big", 10), u64::MAX);
    }

    #[test]
    fn test_reset_clears_everything() {
        let ledger = BudgetLedger::new();
        ledger.add_cost("a", 5);
        ledger.reset();
        assert_eq!(ledger.grand_total(), 0);
        assert!(ledger.summary().is_empty());
    }

    #[test]
    fn test_concurrent_increments_are_not_lost() {
        let ledger = Arc::new(BudgetLedger::new());
        let handles: Vec<_> = (0..8)
            .map(|t| {
                let ledger = Arc::clone(&ledger);
                std::thread::spawn(move || {
                    for _ in 0..1000 {
                        ledger.add_cost("shared", 1);
                        ledger.add_cost(&format!("own-{t}"), 1);
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().expect("test: thread join");
        }
        assert_eq!(ledger.total_for("shared"), 8000);
        assert_eq!(ledger.grand_total(), 16_000);
    }
}
