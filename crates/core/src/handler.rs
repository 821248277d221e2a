//! Handler trait — the abstraction over capability objects.
//!
//! A handler exposes a discoverable set of named operations (its "tools").
//! Each operation has a descriptor (name, description, typed parameters)
//! used to build the JSON schema sent to the LLM, and a callable that takes
//! a keyword-parameter map and returns a JSON value.
//!
//! Operations are registered once, up front, in an [`OperationRegistry`];
//! nothing is reflected per call.

use std::collections::BTreeMap;
use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::HandlerError;
use crate::provider::ToolDefinition;

/// Keyword parameters passed to an operation.
pub type Params = serde_json::Map<String, Value>;

/// What an operation returns.
pub type OperationResult = std::result::Result<Value, HandlerError>;

/// The closed set of semantic parameter types a handler author may declare.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParamType {
    String,
    Integer,
    Number,
    Boolean,
    Array,
    Object,
}

impl ParamType {
    /// The JSON-schema type name.
    pub fn as_str(self) -> &'static str {
        match self {
            ParamType::String => "string",
            ParamType::Integer => "integer",
            ParamType::Number => "number",
            ParamType::Boolean => "boolean",
            ParamType::Array => "array",
            ParamType::Object => "object",
        }
    }
}

/// One declared parameter of an operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParamSpec {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: ParamType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub required: bool,
}

/// Describes one callable operation of a handler.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationDescriptor {
    pub name: String,
    pub description: String,
    #[serde(default)]
    pub params: Vec<ParamSpec>,
}

impl OperationDescriptor {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            params: Vec::new(),
        }
    }

    /// Declare a required parameter.
    pub fn param(mut self, name: impl Into<String>, kind: ParamType) -> Self {
        self.params.push(ParamSpec {
            name: name.into(),
            kind,
            description: None,
            required: true,
        });
        self
    }

    /// Declare an optional parameter.
    pub fn optional_param(mut self, name: impl Into<String>, kind: ParamType) -> Self {
        self.params.push(ParamSpec {
            name: name.into(),
            kind,
            description: None,
            required: false,
        });
        self
    }

    /// Attach a description to the most recently declared parameter.
    pub fn describe(mut self, description: impl Into<String>) -> Self {
        if let Some(last) = self.params.last_mut() {
            last.description = Some(description.into());
        }
        self
    }

    /// Build the JSON schema for this operation's parameters.
    pub fn param_schema(&self) -> Value {
        let mut properties = serde_json::Map::new();
        let mut required = Vec::new();
        for spec in &self.params {
            let mut property = serde_json::Map::new();
            property.insert("type".into(), Value::String(spec.kind.as_str().into()));
            if let Some(description) = &spec.description {
                property.insert("description".into(), Value::String(description.clone()));
            }
            properties.insert(spec.name.clone(), Value::Object(property));
            if spec.required {
                required.push(Value::String(spec.name.clone()));
            }
        }
        serde_json::json!({
            "type": "object",
            "properties": properties,
            "required": required,
        })
    }

    /// Convert into the tool definition sent to the LLM.
    pub fn to_definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.name.clone(),
            description: self.description.clone(),
            parameters: self.param_schema(),
        }
    }
}

type AsyncFn = dyn Fn(Params) -> BoxFuture<'static, OperationResult> + Send + Sync;
type BlockingFn = dyn Fn(Params) -> OperationResult + Send + Sync;

/// A registered callable.
///
/// Blocking operations are dispatched to tokio's blocking pool so they never
/// stall the scheduler; async operations are awaited in place.
#[derive(Clone)]
pub enum Operation {
    Async(Arc<AsyncFn>),
    Blocking(Arc<BlockingFn>),
}

impl Operation {
    /// Wrap an async closure.
    pub fn from_async<F, Fut>(f: F) -> Self
    where
        F: Fn(Params) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = OperationResult> + Send + 'static,
    {
        Operation::Async(Arc::new(move |params| Box::pin(f(params))))
    }

    /// Wrap a synchronous (possibly blocking) closure.
    pub fn blocking<F>(f: F) -> Self
    where
        F: Fn(Params) -> OperationResult + Send + Sync + 'static,
    {
        Operation::Blocking(Arc::new(f))
    }

    /// Invoke the operation with resolved keyword parameters.
    pub async fn invoke(&self, name: &str, params: Params) -> OperationResult {
        match self {
            Operation::Async(f) => AssertUnwindSafe(f(params))
                .catch_unwind()
                .await
                .map_err(|panic| HandlerError::WorkerFailed {
                    operation: name.to_string(),
                    reason: panic_reason(panic.as_ref()),
                })?,
            Operation::Blocking(f) => {
                let f = Arc::clone(f);
                tokio::task::spawn_blocking(move || f(params))
                    .await
                    .map_err(|e| HandlerError::WorkerFailed {
                        operation: name.to_string(),
                        reason: e.to_string(),
                    })?
            }
        }
    }
}

fn panic_reason(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        format!("panicked: {message}")
    } else if let Some(message) = panic.downcast_ref::<String>() {
        format!("panicked: {message}")
    } else {
        "panicked".to_string()
    }
}

impl std::fmt::Debug for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Operation::Async(_) => f.write_str("Operation::Async"),
            Operation::Blocking(_) => f.write_str("Operation::Blocking"),
        }
    }
}

/// The capability-object contract.
///
/// Handlers are shared (`Arc<dyn Handler>`) across engines and may be
/// invoked concurrently; each implementation owns its own internal
/// synchronisation.
pub trait Handler: Send + Sync {
    /// A human-readable name (used in logs and errors).
    fn name(&self) -> &str;

    /// Every operation this handler exposes.
    fn list_operations(&self) -> Vec<OperationDescriptor>;

    /// Look up an operation by name.
    fn operation(&self, name: &str) -> Option<Operation>;

    /// Tool definitions for every operation (sent to the LLM).
    fn definitions(&self) -> Vec<ToolDefinition> {
        self.list_operations()
            .iter()
            .map(OperationDescriptor::to_definition)
            .collect()
    }
}

/// A handler assembled from explicitly registered operations.
pub struct OperationRegistry {
    name: String,
    operations: BTreeMap<String, (OperationDescriptor, Operation)>,
}

impl OperationRegistry {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            operations: BTreeMap::new(),
        }
    }

    /// Register an operation. Replaces any existing operation with the same name.
    pub fn register(&mut self, descriptor: OperationDescriptor, operation: Operation) {
        self.operations
            .insert(descriptor.name.clone(), (descriptor, operation));
    }

    /// Builder form of [`register`](Self::register).
    pub fn with_operation(mut self, descriptor: OperationDescriptor, operation: Operation) -> Self {
        self.register(descriptor, operation);
        self
    }

    /// Register an async closure.
    pub fn with_async<F, Fut>(self, descriptor: OperationDescriptor, f: F) -> Self
    where
        F: Fn(Params) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = OperationResult> + Send + 'static,
    {
        self.with_operation(descriptor, Operation::from_async(f))
    }

    /// Register a blocking closure.
    pub fn with_blocking<F>(self, descriptor: OperationDescriptor, f: F) -> Self
    where
        F: Fn(Params) -> OperationResult + Send + Sync + 'static,
    {
        self.with_operation(descriptor, Operation::blocking(f))
    }

    /// List all registered operation names.
    pub fn names(&self) -> Vec<&str> {
        self.operations.keys().map(String::as_str).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }

    /// Invoke an operation by name.
    pub async fn invoke(&self, name: &str, params: Params) -> OperationResult {
        let operation = self
            .operation(name)
            .ok_or_else(|| HandlerError::NotFound(name.to_string()))?;
        operation.invoke(name, params).await
    }
}

impl Handler for OperationRegistry {
    fn name(&self) -> &str {
        &self.name
    }

    fn list_operations(&self) -> Vec<OperationDescriptor> {
        self.operations
            .values()
            .map(|(descriptor, _)| descriptor.clone())
            .collect()
    }

    fn operation(&self, name: &str) -> Option<Operation> {
        self.operations.get(name).map(|(_, op)| op.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn greeter() -> OperationRegistry {
        OperationRegistry::new("greeter")
            .with_blocking(
                OperationDescriptor::new("greet", "Greet someone by name")
                    .param("name", ParamType::String)
                    .describe("Who to greet"),
                |params| {
                    let name = params.get("name").and_then(Value::as_str).unwrap_or("nobody");
                    Ok(json!({ "greeting": format!("Hello {name}!") }))
                },
            )
            .with_async(
                OperationDescriptor::new("get_name", "Return a name"),
                |_params| async { Ok(json!({ "name": "X" })) },
            )
    }

    #[test]
    fn schema_lists_required_params() {
        let descriptor = OperationDescriptor::new("search", "Search things")
            .param("query", ParamType::String)
            .optional_param("limit", ParamType::Integer);
        let schema = descriptor.param_schema();
        assert_eq!(schema["type"], "object");
        assert_eq!(schema["properties"]["query"]["type"], "string");
        assert_eq!(schema["properties"]["limit"]["type"], "integer");
        assert_eq!(schema["required"], json!(["query"]));
    }

    #[test]
    fn registry_lists_operations_sorted() {
        let registry = greeter();
        assert_eq!(registry.names(), vec!["get_name", "greet"]);
        let defs = registry.definitions();
        assert_eq!(defs.len(), 2);
        assert_eq!(defs[1].parameters["properties"]["name"]["description"], "Who to greet");
    }

    #[tokio::test]
    async fn invokes_blocking_and_async_operations() {
        let registry = greeter();
        let mut params = Params::new();
        params.insert("name".into(), json!("X"));
        let greeting = registry.invoke("greet", params).await.unwrap();
        assert_eq!(greeting, json!({ "greeting": "Hello X!" }));

        let name = registry.invoke("get_name", Params::new()).await.unwrap();
        assert_eq!(name["name"], "X");
    }

    #[tokio::test]
    async fn missing_operation_is_not_found() {
        let err = greeter().invoke("nope", Params::new()).await.unwrap_err();
        assert_eq!(err.to_string(), "Method 'nope' not found");
    }

    #[tokio::test]
    async fn panicking_blocking_operation_is_contained() {
        let registry = OperationRegistry::new("fragile").with_blocking(
            OperationDescriptor::new("explode", "Always panics"),
            |_params| panic!("kaboom"),
        );
        let err = registry.invoke("explode", Params::new()).await.unwrap_err();
        assert!(matches!(err, HandlerError::WorkerFailed { .. }));
    }

    #[tokio::test]
    async fn panicking_async_operation_is_contained() {
        let registry = OperationRegistry::new("fragile").with_async(
            OperationDescriptor::new("first_item", "First element of an empty list"),
            |_params| async move {
                let items: Vec<Value> = Vec::new();
                Ok(items[0].clone())
            },
        );
        match registry.invoke("first_item", Params::new()).await {
            Err(HandlerError::WorkerFailed { operation, reason }) => {
                assert_eq!(operation, "first_item");
                assert!(reason.contains("index out of bounds"), "{reason}");
            }
            other => panic!("expected a worker failure, got {other:?}"),
        }
    }
}
