//! Per-run mutable state of a task engine.

use agentx_core::error::{Error, Result};
use serde_json::Value;

use crate::result::StepOutcome;

/// Results so far plus the step budget.
///
/// A context lives for exactly one `start()` call, so concurrent runs of the
/// same engine never share state.
#[derive(Debug)]
pub struct ExecutionContext {
    results: Vec<StepOutcome>,
    n_steps: usize,
    max_steps: usize,
}

impl ExecutionContext {
    pub fn new(max_steps: usize) -> Self {
        Self {
            results: Vec::new(),
            n_steps: 0,
            max_steps,
        }
    }

    /// Fail if another step would exceed the budget.
    pub fn check_budget(&self) -> Result<()> {
        if self.n_steps >= self.max_steps {
            return Err(Error::StepLimitExceeded {
                max_steps: self.max_steps,
            });
        }
        Ok(())
    }

    /// Append an outcome and count it as one step.
    pub fn record(&mut self, outcome: StepOutcome) {
        self.results.push(outcome);
        self.n_steps += 1;
    }

    /// The most recently produced entry.
    pub fn last_result(&self) -> Option<&StepOutcome> {
        self.results.last()
    }

    /// What `$prev` resolves against right now.
    pub fn reference_root(&self) -> Option<Value> {
        self.last_result().map(StepOutcome::reference_root)
    }

    pub fn n_steps(&self) -> usize {
        self.n_steps
    }

    pub fn max_steps(&self) -> usize {
        self.max_steps
    }

    pub fn results(&self) -> &[StepOutcome] {
        &self.results
    }

    pub fn into_results(self) -> Vec<StepOutcome> {
        self.results
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::result::StepResult;
    use serde_json::json;

    #[test]
    fn budget_is_checked_before_each_step() {
        let mut ctx = ExecutionContext::new(2);
        assert!(ctx.check_budget().is_ok());
        ctx.record(StepOutcome::Step(StepResult::ok("a", json!(1))));
        assert!(ctx.check_budget().is_ok());
        ctx.record(StepOutcome::Step(StepResult::ok("b", json!(2))));
        assert!(matches!(
            ctx.check_budget(),
            Err(Error::StepLimitExceeded { max_steps: 2 })
        ));
        assert_eq!(ctx.n_steps(), 2);
    }

    #[test]
    fn zero_budget_admits_nothing() {
        assert!(ExecutionContext::new(0).check_budget().is_err());
    }

    #[test]
    fn reference_root_tracks_last_result() {
        let mut ctx = ExecutionContext::new(10);
        assert!(ctx.reference_root().is_none());
        ctx.record(StepOutcome::Step(StepResult::ok("a", json!({"name": "X"}))));
        assert_eq!(ctx.reference_root(), Some(json!({"name": "X"})));
    }
}
