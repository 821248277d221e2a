//! Engine — one handler, one LLM, one prompt template.
//!
//! The engine renders the instruction through its template, offers the
//! handler's operations to the LLM as tools, and dispatches whatever tool
//! calls come back into the handler. A reply without tool calls is taken
//! as the result verbatim.

use std::sync::{Arc, Mutex};

use agentx_config::LlmConfig;
use agentx_core::error::{Error, HandlerError, Result};
use agentx_core::handler::Handler;
use agentx_core::memory::format_memories;
use agentx_core::prompt::{OutputParser, PromptTemplate, PromptVars, SimplePromptTemplate};
use agentx_core::provider::{Provider, ProviderRequest, ToolDefinition, Usage};
use agentx_core::runner::{RunInput, Runner};
use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, info};

pub struct Engine {
    name: String,

    /// The capability object whose operations are offered as tools
    handler: Arc<dyn Handler>,

    /// The LLM provider to use
    provider: Arc<dyn Provider>,

    template: Arc<dyn PromptTemplate>,

    /// Restrict the offered tools to these operation names
    allowed: Option<Vec<String>>,

    output_parser: Option<Arc<dyn OutputParser>>,

    model: String,
    temperature: f32,
    max_tokens: Option<u32>,

    /// Tokens spent across all runs
    usage: Mutex<Usage>,
}

impl Engine {
    pub fn new(handler: Arc<dyn Handler>, provider: Arc<dyn Provider>) -> Self {
        let defaults = LlmConfig::default();
        Self {
            name: format!("engine:{}", handler.name()),
            handler,
            provider,
            template: Arc::new(SimplePromptTemplate::default()),
            allowed: None,
            output_parser: None,
            model: defaults.model,
            temperature: defaults.temperature,
            max_tokens: Some(defaults.max_tokens),
            usage: Mutex::new(Usage::default()),
        }
    }

    /// Create an engine using the configured model settings.
    pub fn from_config(
        handler: Arc<dyn Handler>,
        provider: Arc<dyn Provider>,
        config: &LlmConfig,
    ) -> Self {
        Self::new(handler, provider)
            .with_model(config.model.clone())
            .with_temperature(config.temperature)
            .with_max_tokens(config.max_tokens)
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_template(mut self, template: Arc<dyn PromptTemplate>) -> Self {
        self.template = template;
        self
    }

    /// Offer only the named operations to the LLM.
    pub fn with_allowed_operations<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.allowed = Some(names.into_iter().map(Into::into).collect());
        self
    }

    pub fn with_output_parser(mut self, parser: Arc<dyn OutputParser>) -> Self {
        self.output_parser = Some(parser);
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    /// Tool definitions offered to the LLM, after the allow-list.
    pub fn tools(&self) -> Vec<ToolDefinition> {
        let tools = self.handler.definitions();
        match &self.allowed {
            Some(allowed) => tools
                .into_iter()
                .filter(|tool| allowed.iter().any(|name| name == &tool.name))
                .collect(),
            None => tools,
        }
    }

    /// Tokens spent across all runs of this engine.
    pub fn total_usage(&self) -> Usage {
        self.usage.lock().map(|u| *u).unwrap_or_default()
    }

    fn prompt_vars(input: &RunInput) -> PromptVars {
        let mut vars = input.extra.clone();
        vars.insert(
            "pre_result".into(),
            Value::String(input.pre_result.clone().unwrap_or_default()),
        );
        vars.insert(
            "memory".into(),
            Value::String(format_memories(&input.old_memory)),
        );
        vars.insert(
            "conversation_id".into(),
            Value::String(input.conversation_id.to_string()),
        );
        vars
    }

    /// Run one LLM round and dispatch the chosen tool calls.
    ///
    /// Fails with [`Error::InvalidHandler`] before contacting the LLM when
    /// no operation is on offer.
    pub async fn start(&self, input: RunInput) -> Result<Vec<Value>> {
        let tools = self.tools();
        if tools.is_empty() {
            return Err(Error::InvalidHandler(self.handler.name().to_string()));
        }

        let operations = tools.clone();
        let messages = self
            .template
            .render(&input.input_prompt, &Self::prompt_vars(&input));
        let request = ProviderRequest {
            model: self.model.clone(),
            messages,
            temperature: self.temperature,
            max_tokens: self.max_tokens,
            tools,
        };

        info!(
            engine = %self.name,
            tools = request.tools.len(),
            conversation_id = %input.conversation_id,
            "Requesting tool selection"
        );
        let response = self.provider.complete(request).await?;
        if let Some(usage) = &response.usage {
            if let Ok(mut total) = self.usage.lock() {
                total.add(usage);
            }
        }

        let calls = response.message.tool_calls;
        let mut results = Vec::with_capacity(calls.len().max(1));
        if calls.is_empty() {
            debug!(engine = %self.name, "No tool calls, using reply text");
            results.push(Value::String(response.message.content));
        }

        for call in &calls {
            if !operations.iter().any(|op| op.name == call.name) {
                return Err(HandlerError::NotFound(call.name.clone()).into());
            }
            let operation = self
                .handler
                .operation(&call.name)
                .ok_or_else(|| HandlerError::NotFound(call.name.clone()))?;
            let params = call.parsed_arguments().map_err(|reason| {
                HandlerError::InvalidArguments {
                    operation: call.name.clone(),
                    reason,
                }
            })?;

            debug!(engine = %self.name, operation = %call.name, "Dispatching tool call");
            results.push(operation.invoke(&call.name, params).await?);
        }

        Ok(match &self.output_parser {
            Some(parser) => parser.parse(results),
            None => results,
        })
    }
}

#[async_trait]
impl Runner for Engine {
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&self, input: RunInput) -> Result<Vec<Value>> {
        self.start(input).await
    }

    fn usage(&self) -> Usage {
        self.total_usage()
    }
}
