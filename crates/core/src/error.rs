//! Error types for the AgentX domain.
//!
//! Uses `thiserror` for ergonomic error definitions.
//! Each bounded context has its own error variant.
//!
//! Two families matter to the orchestration core:
//! - **fatal** errors (malformed plans, exhausted step budgets, handlers with
//!   no operations) abort the whole run and always cross component
//!   boundaries as `Err`;
//! - **recoverable** operation failures never do: they are captured as data
//!   in a `StepResult` by the workflow executor.

use thiserror::Error;

use crate::goal::GoalResult;

/// The top-level error type for all AgentX operations.
#[derive(Debug, Error)]
pub enum Error {
    // --- Provider errors ---
    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    // --- Handler errors ---
    #[error("Handler error: {0}")]
    Handler(#[from] HandlerError),

    // --- Memory errors ---
    #[error("Memory error: {0}")]
    Memory(#[from] MemoryError),

    // --- Plan shape errors ---
    #[error("Invalid plan: {0}")]
    Plan(#[from] PlanError),

    // --- Execution budget ---
    #[error("Step limit exceeded: the run reached max_steps = {max_steps}")]
    StepLimitExceeded { max_steps: usize },

    // --- Capability errors ---
    #[error("Invalid handler '{0}': it exposes no callable operations")]
    InvalidHandler(String),

    // --- Pipe control ---
    #[error("{0}")]
    Stop(StopSignal),

    // --- Configuration errors ---
    #[error("Configuration error: {message}")]
    Config { message: String },

    // --- Serialization ---
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // --- Generic ---
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Whether this error must abort the surrounding run.
    ///
    /// Agents record non-fatal unit errors as data for the goal check and
    /// only propagate the fatal ones.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Error::Plan(_)
                | Error::StepLimitExceeded { .. }
                | Error::InvalidHandler(_)
                | Error::Config { .. }
        )
    }

    /// The stop signal carried by this error, if it is one.
    pub fn as_stop(&self) -> Option<&StopSignal> {
        match self {
            Error::Stop(signal) => Some(signal),
            _ => None,
        }
    }
}

/// Result type alias using our Error.
pub type Result<T> = std::result::Result<T, Error>;

/// Raised by an Agent that exhausted its retries while configured to halt
/// the containing pipe. Carries the last goal judgment, if any parsed.
#[derive(Debug, Clone)]
pub struct StopSignal {
    /// Name of the agent that gave up.
    pub agent: String,
    /// Attempts performed before giving up.
    pub attempts: u32,
    /// The last goal judgment produced, if any attempt yielded valid JSON.
    pub last: Option<GoalResult>,
}

impl std::fmt::Display for StopSignal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Agent '{}' stopped after {} attempt(s) without satisfying its goal",
            self.agent, self.attempts
        )?;
        if let Some(last) = &self.last {
            write!(f, ": {}", last.reason)?;
        }
        Ok(())
    }
}

// --- Bounded context errors ---

#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    #[error("API request failed: {message} (status: {status_code})")]
    ApiError {
        status_code: u16,
        message: String,
    },

    #[error("Rate limited by provider, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("Model not found: {0}")]
    ModelNotFound(String),

    #[error("Provider not configured: {0}")]
    NotConfigured(String),

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Network error: {0}")]
    Network(String),
}

#[derive(Debug, Clone, Error)]
pub enum HandlerError {
    #[error("Method '{0}' not found")]
    NotFound(String),

    #[error("Operation '{operation}' failed: {reason}")]
    ExecutionFailed { operation: String, reason: String },

    #[error("Invalid arguments for '{operation}': {reason}")]
    InvalidArguments { operation: String, reason: String },

    #[error("Worker thread for '{operation}' did not complete: {reason}")]
    WorkerFailed { operation: String, reason: String },
}

impl HandlerError {
    /// Shorthand for an operation failure.
    pub fn failed(operation: impl Into<String>, reason: impl std::fmt::Display) -> Self {
        HandlerError::ExecutionFailed {
            operation: operation.into(),
            reason: reason.to_string(),
        }
    }
}

#[derive(Debug, Error)]
pub enum MemoryError {
    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Query failed: {0}")]
    QueryFailed(String),
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum PlanError {
    #[error("plan must be a JSON array of instructions, found {found}")]
    NotAnArray { found: String },

    #[error("instruction {position} must be an object or an array, found {found}")]
    InvalidInstruction { position: String, found: String },

    #[error("step {position} must have exactly one operation key, found {keys}")]
    NotSingleKey { position: String, keys: usize },

    #[error("parameters of '{operation}' at {position} must be an object, found {found}")]
    InvalidParams {
        position: String,
        operation: String,
        found: String,
    },

    #[error("parallel block {position} may only contain steps")]
    NestedParallel { position: String },

    #[error("plan is not valid JSON: {0}")]
    Parse(String),
}

/// Render an error and its `source()` chain, one cause per line.
pub fn render_chain(err: &(dyn std::error::Error + 'static)) -> String {
    let mut out = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        out.push_str("\n  caused by: ");
        out.push_str(&cause.to_string());
        source = cause.source();
    }
    out
}
