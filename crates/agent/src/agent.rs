//! Agent — a goal-driven wrapper around engines with an LLM-judged retry loop.
//!
//! Each attempt runs the agent's execution plan once, then asks the LLM
//! whether the collected results satisfy the goal. The first satisfied
//! verdict ends the loop; after `max_retry` unsatisfied attempts the agent
//! gives up, either quietly (`Ok(None)`) or with a stop signal for the
//! containing pipe.

use std::sync::{Arc, Mutex};

use agentx_config::AppConfig;
use agentx_core::error::{Error, Result, StopSignal};
use agentx_core::event::{DomainEvent, EventBus, emit};
use agentx_core::goal::GoalResult;
use agentx_core::message::Message;
use agentx_core::prompt::display_value;
use agentx_core::provider::{Provider, ProviderRequest, Usage};
use agentx_core::runner::{RunInput, Runner};
use async_trait::async_trait;
use chrono::Utc;
use futures::future::join_all;
use serde_json::{Value, json};
use tracing::{debug, info, warn};

use crate::plan::PlanItem;

const GOAL_CHECK_PROMPT: &str = "You judge whether a goal has been achieved. \
Reply with a single JSON object and nothing else, exactly of the form \
{\"reason\": string, \"result\": any, \"is_goal_satisfied\": true|false}. \
`result` distils the outcome relevant to the goal. \
`is_goal_satisfied` must be the JSON literal true or false.";

pub struct Agent {
    name: String,

    /// What the agent is trying to achieve; judged after every attempt
    goal: String,

    plan: Vec<PlanItem<Arc<dyn Runner>>>,

    /// The LLM that judges goal satisfaction
    provider: Arc<dyn Provider>,
    model: String,

    max_retry: u32,

    /// Raise a stop signal instead of returning `None` on exhaustion
    stop_on_unsatisfied: bool,

    event_bus: Option<Arc<EventBus>>,

    /// Tokens spent across every run of this agent
    spent: Mutex<Usage>,
}

impl Agent {
    pub const DEFAULT_MAX_RETRY: u32 = 3;

    pub fn new(
        name: impl Into<String>,
        goal: impl Into<String>,
        provider: Arc<dyn Provider>,
    ) -> Self {
        Self {
            name: name.into(),
            goal: goal.into(),
            plan: Vec::new(),
            provider,
            model: agentx_config::LlmConfig::default().model,
            max_retry: Self::DEFAULT_MAX_RETRY,
            stop_on_unsatisfied: false,
            event_bus: None,
            spent: Mutex::new(Usage::default()),
        }
    }

    /// Create an agent with retry, stop and model settings from configuration.
    pub fn from_config(
        name: impl Into<String>,
        goal: impl Into<String>,
        provider: Arc<dyn Provider>,
        config: &AppConfig,
    ) -> Self {
        Self::new(name, goal, provider)
            .with_model(config.llm.model.clone())
            .with_max_retry(config.agent.max_retry)
            .with_stop_on_unsatisfied(config.pipe.stop_on_unsatisfied)
    }

    /// Append a unit that runs on its own.
    pub fn with_unit(mut self, unit: Arc<dyn Runner>) -> Self {
        self.plan.push(PlanItem::Sequential(unit));
        self
    }

    /// Append a group of units that run concurrently.
    pub fn with_parallel(mut self, units: Vec<Arc<dyn Runner>>) -> Self {
        self.plan.push(PlanItem::Parallel(units));
        self
    }

    pub fn with_plan(mut self, plan: Vec<PlanItem<Arc<dyn Runner>>>) -> Self {
        self.plan = plan;
        self
    }

    /// Set the number of attempts. At least one attempt is always made.
    pub fn with_max_retry(mut self, max_retry: u32) -> Self {
        self.max_retry = max_retry.max(1);
        self
    }

    pub fn with_stop_on_unsatisfied(mut self, stop: bool) -> Self {
        self.stop_on_unsatisfied = stop;
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_event_bus(mut self, bus: Arc<EventBus>) -> Self {
        self.event_bus = Some(bus);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn goal(&self) -> &str {
        &self.goal
    }

    pub fn max_retry(&self) -> u32 {
        self.max_retry
    }

    /// Tokens spent by every run so far, goal checks and units included.
    pub fn total_usage(&self) -> Usage {
        self.spent.lock().map(|u| *u).unwrap_or_default()
    }

    /// Run attempts until the goal is judged satisfied or retries run out.
    pub async fn execute(&self, input: RunInput) -> Result<Option<GoalResult>> {
        let baseline = self.units_usage();
        let mut usage = Usage::default();
        let mut last: Option<GoalResult> = None;

        for attempt in 1..=self.max_retry {
            info!(agent = %self.name, attempt, max_retry = self.max_retry, "Starting attempt");

            let results = self.run_plan(&input).await?;
            let verdict = self.check_goal(&input, &results, &mut usage).await?;
            let satisfied = verdict.as_ref().is_some_and(|g| g.is_goal_satisfied);

            emit(
                self.event_bus.as_ref(),
                DomainEvent::GoalChecked {
                    agent: self.name.clone(),
                    attempt,
                    satisfied,
                    timestamp: Utc::now(),
                },
            );

            if satisfied {
                info!(agent = %self.name, attempt, "Goal satisfied");
                self.finish(attempt, true, usage, &baseline);
                return Ok(verdict);
            }
            debug!(agent = %self.name, attempt, "Goal not satisfied");
            if verdict.is_some() {
                last = verdict;
            }
        }

        warn!(
            agent = %self.name,
            attempts = self.max_retry,
            "Goal not satisfied after all attempts"
        );
        self.finish(self.max_retry, false, usage, &baseline);

        if self.stop_on_unsatisfied {
            return Err(Error::Stop(StopSignal {
                agent: self.name.clone(),
                attempts: self.max_retry,
                last,
            }));
        }
        Ok(None)
    }

    /// Run the plan once and report the raw outputs as a satisfied result,
    /// without consulting the LLM.
    pub async fn execute_unverified(&self, input: RunInput) -> Result<GoalResult> {
        let baseline = self.units_usage();
        let results = self.run_plan(&input).await?;
        self.finish(1, true, Usage::default(), &baseline);
        Ok(GoalResult {
            reason: "goal verification skipped".into(),
            result: Value::Array(results),
            is_goal_satisfied: true,
        })
    }

    /// One pass over the execution plan.
    ///
    /// Sequential units see everything collected so far as `pre_result`.
    /// Parallel groups all see the same input and are joined before the
    /// plan continues.
    pub async fn run_plan(&self, input: &RunInput) -> Result<Vec<Value>> {
        let mut results = Vec::new();

        for item in &self.plan {
            let unit_input = with_prior_results(input, &results);
            match item {
                PlanItem::Sequential(unit) => {
                    results.extend(self.run_unit(unit, unit_input).await?);
                }
                PlanItem::Parallel(units) => {
                    let outputs = join_all(
                        units
                            .iter()
                            .map(|unit| self.run_unit(unit, unit_input.clone())),
                    )
                    .await;
                    for output in outputs {
                        results.extend(output?);
                    }
                }
            }
        }
        Ok(results)
    }

    /// Run one unit. Non-fatal failures become a record in the results so
    /// the goal check can see them.
    async fn run_unit(&self, unit: &Arc<dyn Runner>, input: RunInput) -> Result<Vec<Value>> {
        match unit.run(input).await {
            Ok(outputs) => Ok(outputs),
            Err(e) if e.is_fatal() || e.as_stop().is_some() => Err(e),
            Err(e) => {
                warn!(agent = %self.name, unit = %unit.name(), error = %e, "Unit failed");
                Ok(vec![json!({"unit": unit.name(), "error": e.to_string()})])
            }
        }
    }

    /// Ask the LLM to judge the attempt. A reply that is not a valid goal
    /// result counts as unsatisfied.
    async fn check_goal(
        &self,
        input: &RunInput,
        results: &[Value],
        usage: &mut Usage,
    ) -> Result<Option<GoalResult>> {
        let rendered = serde_json::to_string_pretty(results)?;
        let mut prompt = format!(
            "Goal: {}\n\nQuery: {}\n\nResults:\n{}",
            self.goal, input.input_prompt, rendered
        );
        if let Some(pre_result) = input.pre_result.as_deref().filter(|p| !p.is_empty()) {
            prompt.push_str(&format!("\n\nEarlier conclusions:\n{pre_result}"));
        }

        let mut request = ProviderRequest::chat(
            self.model.clone(),
            vec![Message::system(GOAL_CHECK_PROMPT), Message::user(prompt)],
        );
        request.temperature = 0.0;

        let response = self.provider.complete(request).await?;
        if let Some(spent) = &response.usage {
            usage.add(spent);
        }

        match GoalResult::parse(&response.message.content) {
            Ok(goal) => Ok(Some(goal)),
            Err(e) => {
                warn!(agent = %self.name, error = %e, "Goal check reply rejected");
                Ok(None)
            }
        }
    }

    /// Lifetime usage of every unit in the plan.
    fn units_usage(&self) -> Usage {
        let mut usage = Usage::default();
        for unit in self.plan.iter().flat_map(PlanItem::units) {
            usage.add(&unit.usage());
        }
        usage
    }

    /// Report this run's usage: the goal checks plus what the units spent
    /// since `baseline` was taken.
    fn finish(&self, attempts: u32, satisfied: bool, mut usage: Usage, baseline: &Usage) {
        usage.add(&self.units_usage().since(baseline));
        if let Ok(mut spent) = self.spent.lock() {
            spent.add(&usage);
        }
        emit(
            self.event_bus.as_ref(),
            DomainEvent::AgentFinished {
                agent: self.name.clone(),
                attempts,
                satisfied,
                usage,
                timestamp: Utc::now(),
            },
        );
    }
}

/// Extend `pre_result` with the outputs collected so far.
fn with_prior_results(input: &RunInput, results: &[Value]) -> RunInput {
    if results.is_empty() {
        return input.clone();
    }
    let rendered = results
        .iter()
        .map(display_value)
        .collect::<Vec<_>>()
        .join("\n");
    let pre_result = match input.pre_result.as_deref() {
        Some(earlier) if !earlier.is_empty() => format!("{earlier}\n{rendered}"),
        _ => rendered,
    };
    input.clone().with_pre_result(Some(pre_result))
}

/// An agent nests inside another agent's plan as a unit whose output is
/// its goal result (nothing when the goal was not met).
#[async_trait]
impl Runner for Agent {
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&self, input: RunInput) -> Result<Vec<Value>> {
        Ok(self
            .execute(input)
            .await?
            .map(serde_json::to_value)
            .transpose()?
            .into_iter()
            .collect())
    }

    fn usage(&self) -> Usage {
        self.total_usage()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::Engine;
    use crate::test_helpers::*;
    use agentx_core::handler::{OperationDescriptor, OperationRegistry};
    use agentx_core::Handler;
    use agentx_workflow::{Plan, Step, TaskEngine};

    fn lookup_handler() -> Arc<dyn Handler> {
        Arc::new(OperationRegistry::new("lookup").with_blocking(
            OperationDescriptor::new("lookup", "Look something up"),
            |_| Ok(json!({"answer": 42})),
        ))
    }

    fn task_unit() -> Arc<dyn Runner> {
        Arc::new(
            TaskEngine::new(Plan::default().then(Step::new("lookup")))
                .with_handler(lookup_handler())
                .with_name("tasks"),
        )
    }

    #[tokio::test]
    async fn returns_first_satisfied_verdict() {
        let provider = Arc::new(SequentialMockProvider::new(vec![
            goal_reply(false, "not yet", json!(null)),
            goal_reply(true, "found it", json!(42)),
        ]));
        let agent = Agent::new("finder", "find the answer", provider.clone())
            .with_unit(task_unit())
            .with_max_retry(3);

        let goal = agent.execute(RunInput::new("what is it?")).await.unwrap().unwrap();
        assert!(goal.is_goal_satisfied);
        assert_eq!(goal.result, 42);
        assert_eq!(provider.call_count(), 2);
    }

    #[tokio::test]
    async fn exhausts_exactly_max_retry_attempts() {
        let provider = Arc::new(SequentialMockProvider::repeating_text(
            r#"{"reason": "no", "result": null, "is_goal_satisfied": false}"#,
            10,
        ));
        let agent = Agent::new("stubborn", "impossible", provider.clone())
            .with_unit(task_unit())
            .with_max_retry(4);

        assert!(agent.execute(RunInput::new("try")).await.unwrap().is_none());
        assert_eq!(provider.call_count(), 4);
    }

    #[tokio::test]
    async fn single_retry_runs_engine_once() {
        let handler_provider = Arc::new(SequentialMockProvider::new(vec![
            make_tool_call_response(vec![make_tool_call("lookup", json!({}))]),
            make_tool_call_response(vec![make_tool_call("lookup", json!({}))]),
        ]));
        let engine = Arc::new(Engine::new(lookup_handler(), handler_provider.clone()));
        let judge = Arc::new(SequentialMockProvider::repeating_text(
            r#"{"reason": "no", "result": null, "is_goal_satisfied": false}"#,
            2,
        ));
        let agent = Agent::new("once", "never satisfied", judge.clone())
            .with_unit(engine)
            .with_max_retry(1);

        assert!(agent.execute(RunInput::new("go")).await.unwrap().is_none());
        assert_eq!(handler_provider.call_count(), 1);
        assert_eq!(judge.call_count(), 1);
    }

    #[tokio::test]
    async fn malformed_verdict_consumes_a_retry() {
        let provider = Arc::new(SequentialMockProvider::new(vec![
            make_text_response("I think it worked!"),
            goal_reply(true, "ok", json!("done")),
        ]));
        let agent = Agent::new("a", "g", provider.clone()).with_unit(task_unit());
        let goal = agent.execute(RunInput::new("q")).await.unwrap().unwrap();
        assert_eq!(goal.result, "done");
        assert_eq!(provider.call_count(), 2);
    }

    #[tokio::test]
    async fn stop_signal_carries_last_verdict() {
        let provider = Arc::new(SequentialMockProvider::new(vec![
            goal_reply(false, "missing data", json!({"partial": true})),
            make_text_response("garbage"),
        ]));
        let agent = Agent::new("strict", "g", provider)
            .with_unit(task_unit())
            .with_max_retry(2)
            .with_stop_on_unsatisfied(true);

        let err = agent.execute(RunInput::new("q")).await.unwrap_err();
        let signal = err.as_stop().unwrap();
        assert_eq!(signal.agent, "strict");
        assert_eq!(signal.attempts, 2);
        assert_eq!(signal.last.as_ref().unwrap().reason, "missing data");
    }

    #[tokio::test]
    async fn non_fatal_unit_errors_are_recorded() {
        let failing_engine = Arc::new(
            Engine::new(
                lookup_handler(),
                Arc::new(SequentialMockProvider::new(vec![make_tool_call_response(vec![
                    make_tool_call("missing_tool", json!({})),
                ])])),
            )
            .with_name("flaky"),
        );
        let agent = Agent::new("a", "g", Arc::new(SequentialMockProvider::new(vec![])))
            .with_parallel(vec![failing_engine, task_unit()]);

        let results = agent.run_plan(&RunInput::new("q")).await.unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0]["unit"], "flaky");
        assert!(results[0]["error"].as_str().unwrap().contains("missing_tool"));
        assert_eq!(results[1]["lookup"]["result"]["answer"], 42);
    }

    #[tokio::test]
    async fn fatal_unit_errors_abort() {
        let empty = Arc::new(Engine::new(
            Arc::new(OperationRegistry::new("empty")),
            Arc::new(SequentialMockProvider::new(vec![])),
        ));
        let agent = Agent::new("a", "g", Arc::new(SequentialMockProvider::new(vec![])))
            .with_unit(empty);
        let err = agent.execute(RunInput::new("q")).await.unwrap_err();
        assert!(matches!(err, Error::InvalidHandler(_)));
    }

    #[tokio::test]
    async fn sequential_units_see_prior_outputs() {
        let second_provider = Arc::new(SequentialMockProvider::new(vec![make_text_response("done")]));
        let second = Arc::new(Engine::new(lookup_handler(), second_provider.clone()));
        let agent = Agent::new("a", "g", Arc::new(SequentialMockProvider::new(vec![])))
            .with_unit(task_unit())
            .with_unit(second);

        agent.run_plan(&RunInput::new("q")).await.unwrap();
        let prompt = &second_provider.requests()[0].messages[1].content;
        assert!(prompt.contains("\"answer\":42"));
    }

    #[tokio::test]
    async fn unverified_run_reports_raw_outputs() {
        let agent = Agent::new("a", "g", Arc::new(SequentialMockProvider::new(vec![])))
            .with_unit(task_unit());
        let goal = agent.execute_unverified(RunInput::new("q")).await.unwrap();
        assert!(goal.is_goal_satisfied);
        assert_eq!(goal.result[0]["lookup"]["result"]["answer"], 42);
    }

    #[tokio::test]
    async fn reports_usage_when_finished() {
        let bus = Arc::new(EventBus::new(16));
        let mut rx = bus.subscribe();
        let provider = Arc::new(SequentialMockProvider::new(vec![goal_reply(true, "ok", json!(1))]));
        let agent = Agent::new("a", "g", provider)
            .with_unit(task_unit())
            .with_event_bus(bus);
        agent.execute(RunInput::new("q")).await.unwrap();

        let mut finished = None;
        while let Ok(event) = rx.try_recv() {
            if let DomainEvent::AgentFinished { usage, satisfied, .. } = event.as_ref() {
                finished = Some((*usage, *satisfied));
            }
        }
        let (usage, satisfied) = finished.unwrap();
        assert!(satisfied);
        assert_eq!(usage.total_tokens, 15);
    }

    #[tokio::test]
    async fn repeated_runs_report_their_own_usage() {
        let bus = Arc::new(EventBus::new(16));
        let mut rx = bus.subscribe();
        let engine_provider = Arc::new(SequentialMockProvider::new(vec![
            make_tool_call_response(vec![make_tool_call("lookup", json!({}))]),
            make_tool_call_response(vec![make_tool_call("lookup", json!({}))]),
        ]));
        let engine = Arc::new(Engine::new(lookup_handler(), engine_provider));
        let judge = Arc::new(SequentialMockProvider::new(vec![
            goal_reply(true, "ok", json!(1)),
            goal_reply(true, "ok", json!(2)),
        ]));
        let agent = Agent::new("twice", "g", judge)
            .with_unit(engine)
            .with_event_bus(bus);

        agent.execute(RunInput::new("first")).await.unwrap();
        agent.execute(RunInput::new("second")).await.unwrap();

        let mut reported = Vec::new();
        while let Ok(event) = rx.try_recv() {
            if let DomainEvent::AgentFinished { usage, .. } = event.as_ref() {
                reported.push(usage.total_tokens);
            }
        }
        assert_eq!(reported, vec![30, 30]);
        assert_eq!(agent.total_usage().total_tokens, 60);
        assert_eq!(Runner::usage(&agent).total_tokens, 60);
    }

    #[tokio::test]
    async fn nested_agent_usage_is_not_counted_twice() {
        let inner_judge = Arc::new(SequentialMockProvider::new(vec![
            goal_reply(true, "ok", json!(1)),
            goal_reply(true, "ok", json!(2)),
        ]));
        let inner = Arc::new(Agent::new("inner", "g", inner_judge).with_unit(task_unit()));
        let outer_judge = Arc::new(SequentialMockProvider::new(vec![
            goal_reply(true, "ok", json!(1)),
            goal_reply(true, "ok", json!(2)),
        ]));
        let outer = Agent::new("outer", "g", outer_judge).with_unit(inner);

        outer.execute(RunInput::new("first")).await.unwrap();
        assert_eq!(outer.total_usage().total_tokens, 30);
        outer.execute(RunInput::new("second")).await.unwrap();
        assert_eq!(outer.total_usage().total_tokens, 60);
    }
}
