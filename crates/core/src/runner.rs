//! Runner trait — the unit an agent schedules.
//!
//! Both the LLM-bound `Engine` and the plan-driven `TaskEngine` implement
//! it, so an agent's execution plan can mix them freely.

use async_trait::async_trait;
use serde_json::Value;

use crate::error::Result;
use crate::memory::MemoryEntry;
use crate::message::ConversationId;
use crate::prompt::PromptVars;
use crate::provider::Usage;

/// Everything a unit receives for one run.
#[derive(Debug, Clone, Default)]
pub struct RunInput {
    /// The user's instruction or query
    pub input_prompt: String,

    /// Rendered outputs of earlier units or agents
    pub pre_result: Option<String>,

    /// Recalled conversation memory
    pub old_memory: Vec<MemoryEntry>,

    pub conversation_id: ConversationId,

    /// Extra keyword substitutions for prompt templates
    pub extra: PromptVars,
}

impl RunInput {
    pub fn new(input_prompt: impl Into<String>) -> Self {
        Self {
            input_prompt: input_prompt.into(),
            ..Self::default()
        }
    }

    pub fn with_pre_result(mut self, pre_result: Option<String>) -> Self {
        self.pre_result = pre_result;
        self
    }

    pub fn with_conversation(mut self, conversation_id: ConversationId) -> Self {
        self.conversation_id = conversation_id;
        self
    }

    pub fn with_memory(mut self, old_memory: Vec<MemoryEntry>) -> Self {
        self.old_memory = old_memory;
        self
    }
}

/// An executable unit inside an agent's plan.
#[async_trait]
pub trait Runner: Send + Sync {
    /// Name used in logs and in recorded unit errors.
    fn name(&self) -> &str;

    /// Run once and return the ordered outputs.
    async fn run(&self, input: RunInput) -> Result<Vec<Value>>;

    /// Tokens spent by this unit so far. Units that never call an LLM
    /// report zero.
    fn usage(&self) -> Usage {
        Usage::default()
    }
}
