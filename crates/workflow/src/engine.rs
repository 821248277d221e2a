//! The task engine — a deterministic plan interpreter.
//!
//! Runs an optional inline code block, then a [`Plan`] instruction by
//! instruction: sequential steps one after another, parallel blocks as
//! concurrent fan-outs joined in plan order. Operation failures are recorded
//! as data; only a malformed plan or an exhausted step budget fails the run.

use std::sync::Arc;
use std::time::Instant;

use agentx_config::EngineConfig;
use agentx_core::error::{HandlerError, Result};
use agentx_core::event::{DomainEvent, EventBus, emit};
use agentx_core::handler::{Handler, Operation};
use agentx_core::runner::{RunInput, Runner};
use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::code;
use crate::context::ExecutionContext;
use crate::executor::StepExecutor;
use crate::parallel::ParallelCoordinator;
use crate::plan::{Instruction, Plan};
use crate::result::{StepOutcome, StepResult};

/// Operation name recorded for the inline code block.
pub const CODE_STEP: &str = "code";

pub struct TaskEngine {
    name: String,
    plan: Plan,
    code: Option<String>,
    executor: StepExecutor,
    event_bus: Option<Arc<EventBus>>,
    max_steps: usize,
}

impl std::fmt::Debug for TaskEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskEngine")
            .field("name", &self.name)
            .field("plan", &self.plan)
            .field("code", &self.code)
            .field("max_steps", &self.max_steps)
            .finish_non_exhaustive()
    }
}

impl TaskEngine {
    pub const DEFAULT_MAX_STEPS: usize = 100;

    pub fn new(plan: Plan) -> Self {
        Self {
            name: "task_engine".into(),
            plan,
            code: None,
            executor: StepExecutor::new(),
            event_bus: None,
            max_steps: Self::DEFAULT_MAX_STEPS,
        }
    }

    /// Build from the persisted JSON plan form.
    pub fn from_json(plan: &str) -> Result<Self> {
        Ok(Self::new(Plan::from_json(plan)?))
    }

    /// Build with limits taken from configuration.
    pub fn from_config(plan: Plan, config: &EngineConfig) -> Self {
        Self::new(plan).with_max_steps(config.max_steps)
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Operations not found among the injected tools are looked up here.
    pub fn with_handler(mut self, handler: Arc<dyn Handler>) -> Self {
        self.executor = self.executor.with_handler(handler);
        self
    }

    /// Inject a standalone operation. Shadows a handler operation of the same name.
    pub fn with_tool(mut self, name: impl Into<String>, operation: Operation) -> Self {
        self.executor = self.executor.with_tool(name, operation);
        self
    }

    /// Inline code block run before the plan. Its bindings are the first
    /// step's `$prev`.
    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }

    pub fn with_max_steps(mut self, max_steps: usize) -> Self {
        self.max_steps = max_steps;
        self
    }

    pub fn with_event_bus(mut self, bus: Arc<EventBus>) -> Self {
        self.executor = self.executor.with_event_bus(Arc::clone(&bus));
        self.event_bus = Some(bus);
        self
    }

    pub fn plan(&self) -> &Plan {
        &self.plan
    }

    pub fn max_steps(&self) -> usize {
        self.max_steps
    }

    /// Execute the code block and the plan, returning one entry for the code
    /// block (when present) followed by one per instruction.
    ///
    /// The prompt, prior results and memory in `input` are accepted for
    /// interface parity with LLM-driven engines and are not used.
    pub async fn start(&self, input: RunInput) -> Result<Vec<StepOutcome>> {
        info!(
            engine = %self.name,
            instructions = self.plan.len(),
            max_steps = self.max_steps,
            conversation_id = %input.conversation_id,
            "Starting task engine"
        );

        let executor = &self.executor;
        let mut ctx = ExecutionContext::new(self.max_steps);

        if let Some(source) = &self.code {
            ctx.check_budget()?;
            let started = Instant::now();
            let source = source.clone();
            let outcome = tokio::task::spawn_blocking(move || code::execute(&source))
                .await
                .map_err(|e| HandlerError::WorkerFailed {
                    operation: CODE_STEP.into(),
                    reason: e.to_string(),
                })
                .and_then(|run| run.map_err(|e| HandlerError::failed(CODE_STEP, e)));
            let result = match outcome {
                Ok(bindings) => StepResult::ok(CODE_STEP, Value::Object(bindings)),
                Err(e) => {
                    warn!(engine = %self.name, error = %e, "Code block failed");
                    StepResult::failed(CODE_STEP, &e)
                }
            };
            emit(
                self.event_bus.as_ref(),
                DomainEvent::StepCompleted {
                    operation: CODE_STEP.into(),
                    success: result.success,
                    duration_ms: started.elapsed().as_millis() as u64,
                    timestamp: chrono::Utc::now(),
                },
            );
            ctx.record(StepOutcome::Step(result));
        }

        for instruction in self.plan.instructions() {
            match instruction {
                Instruction::Sequential(step) => {
                    executor.execute(step, &mut ctx).await?;
                }
                Instruction::Parallel(steps) => {
                    ParallelCoordinator::new(executor).run(steps, &mut ctx).await?;
                }
            }
        }

        debug!(engine = %self.name, steps = ctx.n_steps(), "Task engine finished");
        Ok(ctx.into_results())
    }
}

#[async_trait]
impl Runner for TaskEngine {
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&self, input: RunInput) -> Result<Vec<Value>> {
        let outcomes = self.start(input).await?;
        Ok(outcomes.iter().map(StepOutcome::to_value).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use agentx_core::error::Error;
    use agentx_core::handler::{OperationDescriptor, OperationRegistry, ParamType};
    use serde_json::json;

    use crate::plan::Step;

    fn weather() -> Arc<dyn Handler> {
        Arc::new(
            OperationRegistry::new("weather")
                .with_blocking(
                    OperationDescriptor::new("fetch_weather", "Weather for a city")
                        .param("city", ParamType::String),
                    |params| {
                        let city = params.get("city").and_then(Value::as_str).unwrap_or("?");
                        Ok(json!({"city": city, "temp": 18}))
                    },
                )
                .with_async(
                    OperationDescriptor::new("fetch_news", "News on a topic")
                        .param("topic", ParamType::String),
                    |params| async move {
                        let topic = params.get("topic").cloned().unwrap_or(Value::Null);
                        Ok(json!({"headline": format!("{} news", topic.as_str().unwrap_or("?"))}))
                    },
                )
                .with_blocking(OperationDescriptor::new("combine", "Merge inputs"), |params| {
                    Ok(Value::Object(params))
                }),
        )
    }

    #[tokio::test]
    async fn runs_parallel_then_sequential() {
        let engine = TaskEngine::from_json(
            r#"[
                [ {"fetch_weather": {"city": "SF"}}, {"fetch_news": {"topic": "AI"}} ],
                {"combine": {"weather": "$prev.fetch_weather", "headline": "$prev.fetch_news.headline"}}
            ]"#,
        )
        .unwrap()
        .with_handler(weather());

        let results = engine.start(RunInput::default()).await.unwrap();
        assert_eq!(results.len(), 2);

        let block = results[0].as_parallel().unwrap();
        assert_eq!(block.successes.len(), 2);

        let combined = results[1].as_step().unwrap();
        assert_eq!(combined.result["weather"], json!({"city": "SF", "temp": 18}));
        assert_eq!(combined.result["headline"], "AI news");
    }

    #[tokio::test]
    async fn code_block_appends_bindings() {
        let engine = TaskEngine::new(Plan::default()).with_code("x = 2 + 3\ny = x * 2");
        let results = engine.start(RunInput::default()).await.unwrap();
        assert_eq!(results.len(), 1);
        let step = results[0].as_step().unwrap();
        assert_eq!(step.operation, CODE_STEP);
        assert_eq!(step.result, json!({"x": 5, "y": 10}));
    }

    #[tokio::test]
    async fn first_step_sees_code_bindings() {
        let engine = TaskEngine::new(
            Plan::default().then(Step::new("fetch_weather").param("city", "$prev.city")),
        )
        .with_handler(weather())
        .with_code("city = 'Oslo'");
        let results = engine.start(RunInput::default()).await.unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[1].as_step().unwrap().result["city"], "Oslo");
    }

    #[tokio::test]
    async fn failing_code_block_is_recorded() {
        let engine = TaskEngine::new(Plan::default()).with_code("import os");
        let results = engine.start(RunInput::default()).await.unwrap();
        let step = results[0].as_step().unwrap();
        assert!(!step.success);
        assert!(step.error.as_deref().unwrap().contains("not allowed"));
    }

    #[tokio::test]
    async fn oversized_code_block_fails_and_plan_continues() {
        let engine = TaskEngine::new(Plan::default().then(Step::new("combine").param("n", 1)))
            .with_handler(weather())
            .with_code("a = [range(10000)]\nb = [a] * 10000");
        let results = engine.start(RunInput::default()).await.unwrap();
        assert_eq!(results.len(), 2);

        let code = results[0].as_step().unwrap();
        assert!(!code.success);
        assert!(code.error.as_deref().unwrap().contains("limit exceeded"));
        assert_eq!(results[1].as_step().unwrap().result, json!({"n": 1}));
    }

    #[tokio::test]
    async fn budget_counts_blocks_and_code() {
        let plan = Plan::default()
            .parallel(vec![Step::new("fetch_weather"), Step::new("fetch_news")])
            .then(Step::new("combine"));
        let fits = TaskEngine::new(plan.clone())
            .with_handler(weather())
            .with_max_steps(2);
        assert_eq!(fits.start(RunInput::default()).await.unwrap().len(), 2);

        let over = TaskEngine::new(plan)
            .with_handler(weather())
            .with_code("x = 1")
            .with_max_steps(2);
        let err = over.start(RunInput::default()).await.unwrap_err();
        assert!(matches!(err, Error::StepLimitExceeded { max_steps: 2 }));
    }

    #[tokio::test]
    async fn injected_tool_without_handler() {
        let engine = TaskEngine::new(Plan::default().then(Step::new("ping")))
            .with_tool("ping", Operation::blocking(|_| Ok(json!("pong"))));
        let results = engine.run(RunInput::default()).await.unwrap();
        assert_eq!(results[0]["ping"]["result"], "pong");
    }

    #[tokio::test]
    async fn concurrent_runs_do_not_share_state() {
        let engine = Arc::new(
            TaskEngine::new(Plan::default().then(Step::new("combine").param("n", 1)))
                .with_handler(weather())
                .with_max_steps(1),
        );
        let (a, b) = tokio::join!(
            engine.start(RunInput::default()),
            engine.start(RunInput::default())
        );
        assert_eq!(a.unwrap().len(), 1);
        assert_eq!(b.unwrap().len(), 1);
    }

    #[test]
    fn from_config_applies_limit() {
        let engine = TaskEngine::from_config(Plan::default(), &EngineConfig { max_steps: 7 });
        assert_eq!(engine.max_steps(), 7);
    }
}
