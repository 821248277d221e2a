//! `agentx plan` — Plan validation and dry runs.

use std::path::Path;
use std::sync::Arc;

use agentx_config::AppConfig;
use agentx_core::handler::{Handler, Operation, OperationDescriptor, Params};
use agentx_core::runner::RunInput;
use agentx_workflow::{Instruction, Plan, StepOutcome, TaskEngine};
use serde_json::Value;
use tracing::info;

/// Answers every operation with its resolved parameters.
///
/// Lets plan authors inspect `$prev` wiring without live handlers.
pub struct EchoHandler;

impl Handler for EchoHandler {
    fn name(&self) -> &str {
        "echo"
    }

    fn list_operations(&self) -> Vec<OperationDescriptor> {
        vec![]
    }

    fn operation(&self, _name: &str) -> Option<Operation> {
        Some(Operation::blocking(|params: Params| Ok(Value::Object(params))))
    }
}

fn load(file: &Path) -> Result<Plan, Box<dyn std::error::Error>> {
    let text = std::fs::read_to_string(file)
        .map_err(|e| format!("Failed to read {}: {e}", file.display()))?;
    Ok(Plan::from_json(&text)?)
}

pub async fn validate(file: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let plan = match load(file) {
        Ok(plan) => plan,
        Err(e) => {
            println!("❌ {e}");
            return Err(e);
        }
    };

    let blocks = plan
        .instructions()
        .iter()
        .filter(|i| matches!(i, Instruction::Parallel(_)))
        .count();

    println!("✅ Plan is valid: {}", file.display());
    println!("   Instructions:    {}", plan.len());
    println!("   Steps:           {}", plan.step_count());
    println!("   Parallel blocks: {blocks}");
    Ok(())
}

pub async fn run(
    file: &Path,
    dry_run: bool,
    code: Option<String>,
    max_steps: Option<usize>,
) -> Result<(), Box<dyn std::error::Error>> {
    if !dry_run {
        return Err("no handlers are registered from the command line; pass --dry-run".into());
    }

    let plan = load(file)?;
    info!(file = %file.display(), instructions = plan.len(), "Dry-running plan");
    let config = AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?;
    let history = dry_run_plan(plan, &config, code, max_steps).await?;
    println!("{}", serde_json::to_string_pretty(&history)?);
    Ok(())
}

/// Run `plan` against the echo handler and return the result history.
pub async fn dry_run_plan(
    plan: Plan,
    config: &AppConfig,
    code: Option<String>,
    max_steps: Option<usize>,
) -> agentx_core::Result<Value> {
    let mut engine = TaskEngine::from_config(plan, &config.engine)
        .with_name("dry-run")
        .with_handler(Arc::new(EchoHandler));
    if let Some(code) = code {
        engine = engine.with_code(code);
    }
    if let Some(max_steps) = max_steps {
        engine = engine.with_max_steps(max_steps);
    }

    let outcomes = engine.start(RunInput::new("dry run")).await?;
    Ok(Value::Array(outcomes.iter().map(StepOutcome::to_value).collect()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use agentx_core::Error;
    use serde_json::json;

    #[tokio::test]
    async fn dry_run_echoes_resolved_params() {
        let plan = Plan::from_json(
            r#"[
                {"fetch": {"city": "Paris"}},
                {"report": {"where": "$prev.city", "note": "city=$prev.city"}}
            ]"#,
        )
        .unwrap();

        let history = dry_run_plan(plan, &AppConfig::default(), None, None).await.unwrap();
        assert_eq!(history[0]["fetch"]["result"], json!({"city": "Paris"}));
        assert_eq!(
            history[1]["report"]["result"],
            json!({"where": "Paris", "note": "city=Paris"})
        );
    }

    #[tokio::test]
    async fn dry_run_runs_code_first() {
        let plan = Plan::from_json(r#"[{"show": {"total": "$prev.total"}}]"#).unwrap();
        let code = Some("total = sum([1, 2, 3])".to_string());

        let history = dry_run_plan(plan, &AppConfig::default(), code, None).await.unwrap();
        assert_eq!(history[0]["code"]["result"]["total"], 6);
        assert_eq!(history[1]["show"]["result"]["total"], 6);
    }

    #[tokio::test]
    async fn dry_run_respects_step_override() {
        let plan = Plan::from_json(r#"[{"a": {}}, {"b": {}}]"#).unwrap();
        let err = dry_run_plan(plan, &AppConfig::default(), None, Some(1))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::StepLimitExceeded { max_steps: 1 }));
    }

    #[tokio::test]
    async fn validate_rejects_malformed_plan() {
        let dir = tempfile::tempdir().unwrap();
        let bad = dir.path().join("bad.json");
        std::fs::write(&bad, r#"[{"a": {}, "b": {}}]"#).unwrap();
        assert!(validate(&bad).await.is_err());

        let good = dir.path().join("good.json");
        std::fs::write(&good, r#"[{"a": {}}, [{"b": {}}, {"c": {}}]]"#).unwrap();
        assert!(validate(&good).await.is_ok());
    }
}
