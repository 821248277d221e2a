//! AgentXPipe — ordered composition of agents.
//!
//! Every agent (or concurrent group of agents) sees the conclusions of the
//! agents before it, rendered one per line, as its `pre_result`. With a
//! memory backend attached, relevant history is recalled before each stage
//! and every new conclusion is persisted.

use std::sync::Arc;

use agentx_config::AppConfig;
use agentx_core::error::{Error, Result};
use agentx_core::event::{DomainEvent, EventBus, emit};
use agentx_core::goal::GoalResult;
use agentx_core::memory::{MemoryBackend, MemoryEntry, MemoryQuery};
use agentx_core::message::{ConversationId, Role};
use agentx_core::prompt::display_value;
use agentx_core::runner::RunInput;
use chrono::Utc;
use futures::future::join_all;
use tracing::{debug, info, warn};

use crate::agent::Agent;
use crate::plan::PlanItem;

pub struct AgentXPipe {
    plan: Vec<PlanItem<Arc<Agent>>>,

    /// Optional memory backend for recall and persistence
    memory: Option<Arc<dyn MemoryBackend>>,

    /// Maximum memories to recall per stage
    recall_limit: usize,

    /// Halt on the first agent stop signal
    stop_on_unsatisfied: bool,

    event_bus: Option<Arc<EventBus>>,
}

impl Default for AgentXPipe {
    fn default() -> Self {
        Self::new()
    }
}

impl AgentXPipe {
    pub fn new() -> Self {
        Self {
            plan: Vec::new(),
            memory: None,
            recall_limit: 5,
            stop_on_unsatisfied: false,
            event_bus: None,
        }
    }

    /// Create a pipe with stop policy, recall limit and memory backend from
    /// configuration.
    pub fn from_config(config: &AppConfig) -> Self {
        let mut pipe = Self::new()
            .with_stop_on_unsatisfied(config.pipe.stop_on_unsatisfied)
            .with_recall_limit(config.pipe.recall_limit);
        pipe.memory = agentx_memory::from_config(&config.memory);
        pipe
    }

    pub fn with_agent(mut self, agent: Arc<Agent>) -> Self {
        self.plan.push(PlanItem::Sequential(agent));
        self
    }

    /// Append a group of agents that run concurrently.
    pub fn with_parallel(mut self, agents: Vec<Arc<Agent>>) -> Self {
        self.plan.push(PlanItem::Parallel(agents));
        self
    }

    pub fn with_memory(mut self, memory: Arc<dyn MemoryBackend>) -> Self {
        self.memory = Some(memory);
        self
    }

    pub fn with_recall_limit(mut self, limit: usize) -> Self {
        self.recall_limit = limit;
        self
    }

    pub fn with_stop_on_unsatisfied(mut self, stop: bool) -> Self {
        self.stop_on_unsatisfied = stop;
        self
    }

    pub fn with_event_bus(mut self, bus: Arc<EventBus>) -> Self {
        self.event_bus = Some(bus);
        self
    }

    /// Run every stage in order and return the collected goal results.
    ///
    /// With `verify_goal == false` agents run their plan once and report
    /// the raw outputs without an LLM judgment. When stopping is enabled
    /// and an agent gives up, the results gathered so far are returned,
    /// including that agent's last verdict if it produced one.
    pub async fn flow(
        &self,
        query: &str,
        verify_goal: bool,
        conversation_id: Option<ConversationId>,
    ) -> Result<Vec<GoalResult>> {
        let conversation_id = conversation_id.unwrap_or_default();
        info!(
            stages = self.plan.len(),
            verify_goal,
            conversation_id = %conversation_id,
            "Starting pipe"
        );

        let mut results: Vec<GoalResult> = Vec::new();
        let mut completed_agents = 0;

        for item in &self.plan {
            let input = RunInput::new(query)
                .with_pre_result(render_prior(&results))
                .with_conversation(conversation_id.clone())
                .with_memory(self.recall(query, &conversation_id).await);

            let outcomes = join_all(
                item.units()
                    .iter()
                    .map(|agent| run_agent(agent, input.clone(), verify_goal)),
            )
            .await;

            let mut halted_by = None;
            for outcome in outcomes {
                completed_agents += 1;
                let goal = match outcome {
                    Ok(Some(goal)) => goal,
                    Ok(None) => continue,
                    Err(Error::Stop(signal)) => {
                        warn!(agent = %signal.agent, "Agent raised a stop signal");
                        if self.stop_on_unsatisfied && halted_by.is_none() {
                            halted_by = Some(signal.agent.clone());
                        }
                        match signal.last {
                            Some(last) => last,
                            None => continue,
                        }
                    }
                    Err(e) => return Err(e),
                };
                self.remember(&goal, &conversation_id).await;
                results.push(goal);
            }

            if let Some(agent) = halted_by {
                info!(agent = %agent, completed_agents, "Pipe halted early");
                emit(
                    self.event_bus.as_ref(),
                    DomainEvent::PipeHalted {
                        agent,
                        completed_agents,
                        timestamp: Utc::now(),
                    },
                );
                return Ok(results);
            }
        }

        debug!(results = results.len(), "Pipe finished");
        Ok(results)
    }

    async fn recall(&self, query: &str, conversation_id: &ConversationId) -> Vec<MemoryEntry> {
        let Some(memory) = &self.memory else {
            return vec![];
        };
        let mut search = MemoryQuery::new(query);
        search.limit = self.recall_limit;
        search.conversation_id = Some(conversation_id.to_string());

        match memory.search(search).await {
            Ok(entries) => {
                if !entries.is_empty() {
                    debug!(count = entries.len(), "Recalled memories for context");
                }
                entries
            }
            Err(e) => {
                warn!("Memory recall failed: {e}");
                vec![]
            }
        }
    }

    async fn remember(&self, goal: &GoalResult, conversation_id: &ConversationId) {
        let Some(memory) = &self.memory else {
            return;
        };
        let entry = MemoryEntry::new(Role::Assistant, display_value(&goal.result))
            .in_conversation(conversation_id.to_string())
            .with_reason(goal.reason.clone());
        if let Err(e) = memory.store(entry).await {
            warn!("Failed to persist pipe result: {e}");
        }
    }
}

async fn run_agent(agent: &Agent, input: RunInput, verify_goal: bool) -> Result<Option<GoalResult>> {
    if verify_goal {
        agent.execute(input).await
    } else {
        agent.execute_unverified(input).await.map(Some)
    }
}

/// Render earlier conclusions, one summary line per result.
fn render_prior(results: &[GoalResult]) -> Option<String> {
    if results.is_empty() {
        return None;
    }
    Some(
        results
            .iter()
            .map(GoalResult::summary_line)
            .collect::<Vec<_>>()
            .join("\n"),
    )
}
