//! LLM-bound execution for AgentX.
//!
//! Three layers, each composing the one below:
//!
//! 1. [`Engine`] — asks the LLM to pick operations of one handler and
//!    invokes them.
//! 2. [`Agent`] — runs a plan of units (engines, task engines, nested
//!    agents) and retries until an LLM judge says the goal is satisfied.
//! 3. [`AgentXPipe`] — chains agents, feeding each one the conclusions of
//!    the ones before it, with optional memory recall and persistence.

pub mod agent;
pub mod engine;
pub mod pipe;
pub mod plan;

#[cfg(test)]
mod test_helpers;

pub use agent::Agent;
pub use engine::Engine;
pub use pipe::AgentXPipe;
pub use plan::PlanItem;
