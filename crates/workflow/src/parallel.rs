//! Parallel blocks: concurrent fan-out, joined in plan order.

use std::time::Instant;

use agentx_core::error::Result;
use agentx_core::event::{DomainEvent, emit};
use futures::future::join_all;
use tracing::debug;

use crate::context::ExecutionContext;
use crate::executor::StepExecutor;
use crate::plan::Step;
use crate::result::{ParallelResult, StepOutcome};

/// Runs the members of a parallel block concurrently.
///
/// Every member resolves `$prev` against the same snapshot, the result
/// in place before the block started. Member failures are captured
/// individually; siblings always run to completion.
pub struct ParallelCoordinator<'a> {
    executor: &'a StepExecutor,
}

impl<'a> ParallelCoordinator<'a> {
    pub fn new(executor: &'a StepExecutor) -> Self {
        Self { executor }
    }

    /// Run the block and record it as a single step.
    pub async fn run(&self, steps: &[Step], ctx: &mut ExecutionContext) -> Result<ParallelResult> {
        ctx.check_budget()?;
        let root = ctx.reference_root();

        let started = Instant::now();
        let results = join_all(
            steps
                .iter()
                .map(|step| self.executor.invoke(step, root.as_ref())),
        )
        .await;
        let duration_ms = started.elapsed().as_millis() as u64;

        let block = ParallelResult::from_results(results);
        debug!(
            members = steps.len(),
            successes = block.successes.len(),
            failures = block.failures.len(),
            duration_ms,
            "Parallel block completed"
        );
        emit(
            self.executor.event_bus(),
            DomainEvent::ParallelBlockCompleted {
                successes: block.successes.len(),
                failures: block.failures.len(),
                duration_ms,
                timestamp: chrono::Utc::now(),
            },
        );

        ctx.record(StepOutcome::Parallel(block.clone()));
        Ok(block)
    }
}
