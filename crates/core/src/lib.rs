//! # AgentX Core
//!
//! Domain types, traits, and error definitions for the AgentX orchestration
//! framework. Every collaborator the orchestration core talks to is a trait
//! here: LLM providers, capability handlers, prompt templates, memory
//! backends and schedulable units. Implementations live in their respective
//! crates (or in the embedding application).

pub mod error;
pub mod event;
pub mod goal;
pub mod handler;
pub mod memory;
pub mod message;
pub mod prompt;
pub mod provider;
pub mod runner;

// Re-export key types at crate root for ergonomics
pub use error::{Error, HandlerError, MemoryError, PlanError, ProviderError, Result, StopSignal};
pub use event::{DomainEvent, EventBus};
pub use goal::{GoalParseError, GoalResult};
pub use handler::{
    Handler, Operation, OperationDescriptor, OperationRegistry, OperationResult, ParamSpec,
    ParamType, Params,
};
pub use memory::{MemoryBackend, MemoryEntry, MemoryQuery};
pub use message::{ConversationId, Message, MessageToolCall, Role};
pub use prompt::{OutputParser, PromptTemplate, PromptVars, SimplePromptTemplate};
pub use provider::{Provider, ProviderRequest, ProviderResponse, ToolDefinition, Usage};
pub use runner::{RunInput, Runner};
