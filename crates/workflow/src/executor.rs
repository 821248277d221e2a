//! Step execution: operation lookup, parameter binding, invocation.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use agentx_core::error::{HandlerError, Result};
use agentx_core::event::{DomainEvent, EventBus, emit};
use agentx_core::handler::{Handler, Operation};
use serde_json::Value;
use tracing::{debug, warn};

use crate::context::ExecutionContext;
use crate::plan::Step;
use crate::reference::resolve_params;
use crate::result::{StepOutcome, StepResult};

/// Invokes plan steps against injected tools and an optional handler.
///
/// Injected tools shadow handler operations of the same name.
#[derive(Default, Clone)]
pub struct StepExecutor {
    handler: Option<Arc<dyn Handler>>,
    tools: HashMap<String, Operation>,
    event_bus: Option<Arc<EventBus>>,
}

impl StepExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_handler(mut self, handler: Arc<dyn Handler>) -> Self {
        self.handler = Some(handler);
        self
    }

    pub fn with_tool(mut self, name: impl Into<String>, operation: Operation) -> Self {
        self.tools.insert(name.into(), operation);
        self
    }

    pub fn with_event_bus(mut self, bus: Arc<EventBus>) -> Self {
        self.event_bus = Some(bus);
        self
    }

    pub(crate) fn event_bus(&self) -> Option<&Arc<EventBus>> {
        self.event_bus.as_ref()
    }

    fn lookup(&self, name: &str) -> Option<Operation> {
        self.tools
            .get(name)
            .cloned()
            .or_else(|| self.handler.as_ref().and_then(|h| h.operation(name)))
    }

    /// Resolve parameters against `root` and invoke the step.
    ///
    /// Never fails: a missing operation or a failing call becomes a
    /// `StepResult` with `success == false`.
    pub async fn invoke(&self, step: &Step, root: Option<&Value>) -> StepResult {
        let Some(operation) = self.lookup(&step.operation) else {
            warn!(operation = %step.operation, "Operation not found");
            return StepResult::failed(&step.operation, &HandlerError::NotFound(step.operation.clone()));
        };

        let params = resolve_params(&step.params, root);
        match operation.invoke(&step.operation, params).await {
            Ok(value) => StepResult::ok(&step.operation, value),
            Err(e) => {
                warn!(operation = %step.operation, error = %e, "Operation failed");
                StepResult::failed(&step.operation, &e)
            }
        }
    }

    /// Execute one sequential step, recording its result in the context.
    pub async fn execute(&self, step: &Step, ctx: &mut ExecutionContext) -> Result<StepResult> {
        ctx.check_budget()?;
        let root = ctx.reference_root();

        let started = Instant::now();
        let result = self.invoke(step, root.as_ref()).await;
        let duration_ms = started.elapsed().as_millis() as u64;

        debug!(
            operation = %step.operation,
            success = result.success,
            duration_ms,
            step = ctx.n_steps() + 1,
            "Step completed"
        );
        emit(
            self.event_bus.as_ref(),
            DomainEvent::StepCompleted {
                operation: step.operation.clone(),
                success: result.success,
                duration_ms,
                timestamp: chrono::Utc::now(),
            },
        );

        ctx.record(StepOutcome::Step(result.clone()));
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use agentx_core::handler::{OperationDescriptor, OperationRegistry, ParamType};
    use serde_json::json;

    fn greeter() -> Arc<dyn Handler> {
        Arc::new(
            OperationRegistry::new("greeter")
                .with_blocking(OperationDescriptor::new("get_name", "Return a name"), |_| {
                    Ok(json!({"name": "X"}))
                })
                .with_blocking(
                    OperationDescriptor::new("greet", "Greet").param("name", ParamType::String),
                    |params| {
                        let name = params
                            .get("name")
                            .and_then(Value::as_str)
                            .ok_or_else(|| HandlerError::failed("greet", "name is required"))?;
                        Ok(json!({"greeting": format!("Hello {name}!")}))
                    },
                ),
        )
    }

    #[tokio::test]
    async fn sequential_steps_bind_prev() {
        let executor = StepExecutor::new().with_handler(greeter());
        let mut ctx = ExecutionContext::new(10);

        executor.execute(&Step::new("get_name"), &mut ctx).await.unwrap();
        let greeting = executor
            .execute(&Step::new("greet").param("name", "$prev.name"), &mut ctx)
            .await
            .unwrap();

        assert!(greeting.success);
        assert_eq!(greeting.result, json!({"greeting": "Hello X!"}));
        assert_eq!(ctx.n_steps(), 2);
    }

    #[tokio::test]
    async fn missing_operation_is_recorded_not_raised() {
        let executor = StepExecutor::new().with_handler(greeter());
        let mut ctx = ExecutionContext::new(10);
        let result = executor.execute(&Step::new("fetch"), &mut ctx).await.unwrap();
        assert!(!result.success);
        assert_eq!(result.error.as_deref(), Some("Method 'fetch' not found"));
        assert_eq!(ctx.results().len(), 1);
    }

    #[tokio::test]
    async fn failing_operation_is_recorded() {
        let executor = StepExecutor::new().with_handler(greeter());
        let mut ctx = ExecutionContext::new(10);
        let result = executor.execute(&Step::new("greet"), &mut ctx).await.unwrap();
        assert!(!result.success);
        assert!(result.error.unwrap().contains("name is required"));
    }

    #[tokio::test]
    async fn injected_tools_shadow_handler() {
        let executor = StepExecutor::new()
            .with_handler(greeter())
            .with_tool("get_name", Operation::blocking(|_| Ok(json!({"name": "Tool"}))));
        let result = executor.invoke(&Step::new("get_name"), None).await;
        assert_eq!(result.result["name"], "Tool");
    }

    #[tokio::test]
    async fn budget_exhaustion_is_fatal() {
        let executor = StepExecutor::new().with_handler(greeter());
        let mut ctx = ExecutionContext::new(1);
        executor.execute(&Step::new("get_name"), &mut ctx).await.unwrap();
        let err = executor.execute(&Step::new("get_name"), &mut ctx).await.unwrap_err();
        assert!(err.is_fatal());
        assert_eq!(ctx.n_steps(), 1);
    }

    #[tokio::test]
    async fn publishes_step_events() {
        let bus = Arc::new(EventBus::new(8));
        let mut rx = bus.subscribe();
        let executor = StepExecutor::new().with_handler(greeter()).with_event_bus(bus);
        let mut ctx = ExecutionContext::new(10);
        executor.execute(&Step::new("get_name"), &mut ctx).await.unwrap();

        match rx.recv().await.unwrap().as_ref() {
            DomainEvent::StepCompleted { operation, success, .. } => {
                assert_eq!(operation, "get_name");
                assert!(success);
            }
            other => panic!("unexpected event {other:?}"),
        }
    }
}
