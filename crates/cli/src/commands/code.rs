//! `agentx code` — Evaluate an inline code block.

pub fn run(source: &str) -> Result<(), Box<dyn std::error::Error>> {
    let bindings = agentx_workflow::code::execute(source)?;
    println!(
        "{}",
        serde_json::to_string_pretty(&serde_json::Value::Object(bindings))?
    );
    Ok(())
}
