//! Step and parallel-block outcomes.
//!
//! A failed operation is data, never an `Err`: it lands in the run's result
//! list as a [`StepResult`] with `success == false`, and the run carries on.

use std::collections::BTreeMap;

use agentx_core::error::{HandlerError, render_chain};
use serde::ser::SerializeMap;
use serde::{Serialize, Serializer};
use serde_json::{Map, Value};

/// The outcome of a single operation invocation.
///
/// Serializes keyed by operation name:
/// `{"greet": {"success": true, "result": ..., "error": null, "traceback": null}}`.
#[derive(Debug, Clone, PartialEq)]
pub struct StepResult {
    pub operation: String,
    pub success: bool,
    pub result: Value,
    pub error: Option<String>,
    pub traceback: Option<String>,
}

impl StepResult {
    pub fn ok(operation: impl Into<String>, result: Value) -> Self {
        Self {
            operation: operation.into(),
            success: true,
            result,
            error: None,
            traceback: None,
        }
    }

    pub fn failed(operation: impl Into<String>, err: &HandlerError) -> Self {
        Self {
            operation: operation.into(),
            success: false,
            result: Value::Null,
            error: Some(err.to_string()),
            traceback: Some(render_chain(err)),
        }
    }

    /// The body without the operation-name key.
    pub fn body(&self) -> Value {
        serde_json::json!({
            "success": self.success,
            "result": self.result,
            "error": self.error,
            "traceback": self.traceback,
        })
    }
}

impl Serialize for StepResult {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(1))?;
        map.serialize_entry(&self.operation, &self.body())?;
        map.end()
    }
}

/// The joined outcome of a parallel block.
///
/// `parallel_map` holds one entry per member (its result, or null on
/// failure); `successes` and `failures` partition the members.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ParallelResult {
    pub parallel_results: Vec<StepResult>,
    pub parallel_map: Map<String, Value>,
    pub successes: Map<String, Value>,
    pub failures: BTreeMap<String, String>,
}

impl ParallelResult {
    /// Index member results. On duplicate operation names the last member
    /// in plan order wins.
    pub fn from_results(parallel_results: Vec<StepResult>) -> Self {
        let mut parallel_map = Map::new();
        let mut successes = Map::new();
        let mut failures = BTreeMap::new();

        for step in &parallel_results {
            if step.success {
                parallel_map.insert(step.operation.clone(), step.result.clone());
                successes.insert(step.operation.clone(), step.result.clone());
                failures.remove(&step.operation);
            } else {
                parallel_map.insert(step.operation.clone(), Value::Null);
                successes.remove(&step.operation);
                failures.insert(
                    step.operation.clone(),
                    step.error.clone().unwrap_or_default(),
                );
            }
        }

        Self {
            parallel_results,
            parallel_map,
            successes,
            failures,
        }
    }
}

/// One entry in a task engine's result list.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum StepOutcome {
    Step(StepResult),
    Parallel(ParallelResult),
}

impl StepOutcome {
    /// The object `$prev` references resolve against: the parallel map for
    /// a parallel block, otherwise the step's result (null on failure).
    pub fn reference_root(&self) -> Value {
        match self {
            StepOutcome::Step(step) => step.result.clone(),
            StepOutcome::Parallel(block) => Value::Object(block.parallel_map.clone()),
        }
    }

    pub fn as_step(&self) -> Option<&StepResult> {
        match self {
            StepOutcome::Step(step) => Some(step),
            StepOutcome::Parallel(_) => None,
        }
    }

    pub fn as_parallel(&self) -> Option<&ParallelResult> {
        match self {
            StepOutcome::Parallel(block) => Some(block),
            StepOutcome::Step(_) => None,
        }
    }

    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn step_result_serializes_keyed_by_operation() {
        let step = StepResult::ok("greet", json!({"greeting": "Hello X!"}));
        assert_eq!(
            serde_json::to_value(&step).unwrap(),
            json!({"greet": {
                "success": true,
                "result": {"greeting": "Hello X!"},
                "error": null,
                "traceback": null,
            }})
        );
    }

    #[test]
    fn failed_step_keeps_message_and_traceback() {
        let step = StepResult::failed("fetch", &HandlerError::NotFound("fetch".into()));
        assert!(!step.success);
        assert_eq!(step.result, Value::Null);
        assert_eq!(step.error.as_deref(), Some("Method 'fetch' not found"));
        assert!(step.traceback.is_some());
    }

    #[test]
    fn parallel_result_partitions_members() {
        let block = ParallelResult::from_results(vec![
            StepResult::ok("a", json!(1)),
            StepResult::failed("b", &HandlerError::failed("b", "boom")),
            StepResult::ok("c", json!({"k": "v"})),
        ]);
        assert_eq!(block.parallel_map.len(), 3);
        assert_eq!(block.parallel_map["b"], Value::Null);
        assert_eq!(block.successes.len(), 2);
        assert_eq!(block.failures["b"], "Operation 'b' failed: boom");

        let root = StepOutcome::Parallel(block).reference_root();
        assert_eq!(root["c"]["k"], "v");
    }

    #[test]
    fn duplicate_members_last_one_wins() {
        let block = ParallelResult::from_results(vec![
            StepResult::failed("a", &HandlerError::failed("a", "first")),
            StepResult::ok("a", json!("second")),
        ]);
        assert_eq!(block.parallel_map["a"], "second");
        assert!(block.failures.is_empty());
        assert_eq!(block.parallel_results.len(), 2);
    }

    #[test]
    fn outcome_serializes_untagged() {
        let outcome = StepOutcome::Parallel(ParallelResult::from_results(vec![StepResult::ok(
            "a",
            json!(1),
        )]));
        let value = outcome.to_value();
        assert_eq!(value["parallel_map"]["a"], 1);
        assert_eq!(value["parallel_results"][0]["a"]["success"], true);
    }
}
