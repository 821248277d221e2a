//! Task engine — deterministic, LLM-free execution of declarative plans.
//!
//! A plan is an ordered list of instructions. Each instruction invokes one
//! operation (sequential step) or several concurrently (parallel block);
//! string parameters can bind to the previous instruction's output with
//! `$prev` references. An optional inline code block, written in a closed
//! expression language, runs before the first instruction.

pub mod code;
pub mod context;
pub mod engine;
pub mod executor;
pub mod parallel;
pub mod plan;
pub mod reference;
pub mod result;

pub use code::CodeError;
pub use context::ExecutionContext;
pub use engine::{CODE_STEP, TaskEngine};
pub use executor::StepExecutor;
pub use parallel::ParallelCoordinator;
pub use plan::{Instruction, Plan, Step};
pub use reference::{Reference, resolve_params, resolve_value};
pub use result::{ParallelResult, StepOutcome, StepResult};
