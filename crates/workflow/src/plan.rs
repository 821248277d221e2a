//! Plans — ordered instructions for the task engine.
//!
//! Persisted form is a JSON array where each element is either a
//! single-key object (a sequential step) or an array of single-key objects
//! (a parallel block):
//!
//! ```json
//! [
//!   [ {"fetch_weather": {"city": "SF"}}, {"fetch_news": {"topic": "AI"}} ],
//!   {"combine": {"weather": "$prev.fetch_weather", "news": "$prev.fetch_news"}}
//! ]
//! ```
//!
//! Shapes are validated once, when the plan is built; a plan value that
//! exists is well-formed.

use agentx_core::error::PlanError;
use agentx_core::handler::Params;
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;

/// One operation invocation: `{operation: {param: value, ...}}`.
#[derive(Debug, Clone, PartialEq)]
pub struct Step {
    pub operation: String,
    pub params: Params,
}

impl Step {
    pub fn new(operation: impl Into<String>) -> Self {
        Self {
            operation: operation.into(),
            params: Params::new(),
        }
    }

    /// Add a parameter.
    pub fn param(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.params.insert(name.into(), value.into());
        self
    }

    fn from_value(value: &Value, position: String) -> Result<Self, PlanError> {
        let Value::Object(map) = value else {
            return Err(PlanError::InvalidInstruction {
                position,
                found: kind_of(value).into(),
            });
        };
        if map.len() != 1 {
            return Err(PlanError::NotSingleKey {
                position,
                keys: map.len(),
            });
        }
        let Some((operation, params)) = map.iter().next() else {
            return Err(PlanError::NotSingleKey { position, keys: 0 });
        };
        let params = match params {
            Value::Object(params) => params.clone(),
            Value::Null => Params::new(),
            other => {
                return Err(PlanError::InvalidParams {
                    position,
                    operation: operation.clone(),
                    found: kind_of(other).into(),
                });
            }
        };
        Ok(Self {
            operation: operation.clone(),
            params,
        })
    }
}

impl Serialize for Step {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(1))?;
        map.serialize_entry(&self.operation, &self.params)?;
        map.end()
    }
}

/// A sequential step or a parallel block.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Instruction {
    Sequential(Step),
    Parallel(Vec<Step>),
}

impl Instruction {
    /// Number of steps this instruction invokes.
    pub fn width(&self) -> usize {
        match self {
            Instruction::Sequential(_) => 1,
            Instruction::Parallel(steps) => steps.len(),
        }
    }
}

/// An ordered sequence of instructions.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct Plan {
    instructions: Vec<Instruction>,
}

impl Plan {
    pub fn new(instructions: Vec<Instruction>) -> Self {
        Self { instructions }
    }

    /// Append a sequential step.
    pub fn then(mut self, step: Step) -> Self {
        self.instructions.push(Instruction::Sequential(step));
        self
    }

    /// Append a parallel block.
    pub fn parallel(mut self, steps: Vec<Step>) -> Self {
        self.instructions.push(Instruction::Parallel(steps));
        self
    }

    pub fn instructions(&self) -> &[Instruction] {
        &self.instructions
    }

    pub fn len(&self) -> usize {
        self.instructions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instructions.is_empty()
    }

    /// Total number of operation invocations across all instructions.
    pub fn step_count(&self) -> usize {
        self.instructions.iter().map(Instruction::width).sum()
    }

    /// Parse the persisted JSON form.
    pub fn from_json(text: &str) -> Result<Self, PlanError> {
        let value: Value =
            serde_json::from_str(text).map_err(|e| PlanError::Parse(e.to_string()))?;
        Self::from_value(&value)
    }

    /// Validate and convert a JSON value.
    pub fn from_value(value: &Value) -> Result<Self, PlanError> {
        let Value::Array(items) = value else {
            return Err(PlanError::NotAnArray {
                found: kind_of(value).into(),
            });
        };

        let mut instructions = Vec::with_capacity(items.len());
        for (i, item) in items.iter().enumerate() {
            let instruction = match item {
                Value::Array(block) => {
                    let mut steps = Vec::with_capacity(block.len());
                    for (j, step) in block.iter().enumerate() {
                        let position = format!("instruction {i}, step {j}");
                        if step.is_array() {
                            return Err(PlanError::NestedParallel { position });
                        }
                        steps.push(Step::from_value(step, position)?);
                    }
                    Instruction::Parallel(steps)
                }
                Value::Object(_) => {
                    Instruction::Sequential(Step::from_value(item, format!("instruction {i}"))?)
                }
                other => {
                    return Err(PlanError::InvalidInstruction {
                        position: format!("instruction {i}"),
                        found: kind_of(other).into(),
                    });
                }
            };
            instructions.push(instruction);
        }
        Ok(Self { instructions })
    }

    /// The persisted JSON form.
    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

impl<'de> Deserialize<'de> for Plan {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        Plan::from_value(&value).map_err(serde::de::Error::custom)
    }
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
