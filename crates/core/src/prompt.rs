//! Prompt-template and output-parser collaborators.
//!
//! A template turns a raw instruction plus keyword substitutions into the
//! ordered message list sent to the provider. Engines pass `pre_result`,
//! `memory` and `conversation_id` as substitutions; templates decide how to
//! present them.

use serde_json::Value;

use crate::message::Message;

/// Keyword substitutions available to a template.
pub type PromptVars = serde_json::Map<String, Value>;

/// Renders an instruction into provider messages.
pub trait PromptTemplate: Send + Sync {
    fn render(&self, instruction: &str, vars: &PromptVars) -> Vec<Message>;
}

/// Post-processes the ordered per-tool-call results of an engine run.
pub trait OutputParser: Send + Sync {
    fn parse(&self, results: Vec<Value>) -> Vec<Value>;
}

impl<F> OutputParser for F
where
    F: Fn(Vec<Value>) -> Vec<Value> + Send + Sync,
{
    fn parse(&self, results: Vec<Value>) -> Vec<Value> {
        self(results)
    }
}

/// Default template: a system prompt followed by one user message.
///
/// `{key}` placeholders in either part are replaced with the matching
/// variable. Non-empty `pre_result` and `memory` variables are appended to
/// the user message as their own sections.
#[derive(Debug, Clone)]
pub struct SimplePromptTemplate {
    system: String,
}

impl SimplePromptTemplate {
    pub fn new(system: impl Into<String>) -> Self {
        Self {
            system: system.into(),
        }
    }
}

impl Default for SimplePromptTemplate {
    fn default() -> Self {
        Self::new(
            "You are a precise assistant. Use the available tools to carry out the \
             user's instruction. Call a tool whenever one applies.",
        )
    }
}

impl PromptTemplate for SimplePromptTemplate {
    fn render(&self, instruction: &str, vars: &PromptVars) -> Vec<Message> {
        let mut user = substitute(instruction, vars);

        for (key, title) in [("pre_result", "Previous results"), ("memory", "Relevant history")] {
            if let Some(section) = vars.get(key).map(display_value).filter(|s| !s.is_empty()) {
                user.push_str(&format!("\n\n## {title}\n{section}"));
            }
        }

        vec![
            Message::system(substitute(&self.system, vars)),
            Message::user(user),
        ]
    }
}

/// Replace `{key}` placeholders; unknown keys stay verbatim.
pub fn substitute(template: &str, vars: &PromptVars) -> String {
    let mut out = template.to_string();
    for (key, value) in vars {
        let placeholder = format!("{{{key}}}");
        if out.contains(&placeholder) {
            out = out.replace(&placeholder, &display_value(value));
        }
    }
    out
}

/// Render a JSON value for humans: strings without quotes, null as empty.
pub fn display_value(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::Role;
    use serde_json::json;

    fn vars(pairs: &[(&str, Value)]) -> PromptVars {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn substitutes_known_placeholders_only() {
        let v = vars(&[("city", json!("SF")), ("days", json!(3))]);
        assert_eq!(
            substitute("Weather in {city} for {days} days, {unit}", &v),
            "Weather in SF for 3 days, {unit}"
        );
    }

    #[test]
    fn renders_system_and_user_with_sections() {
        let template = SimplePromptTemplate::new("Conversation {conversation_id}");
        let v = vars(&[
            ("conversation_id", json!("c-1")),
            ("pre_result", json!("reason: ok")),
            ("memory", json!("")),
        ]);
        let messages = template.render("Summarise", &v);
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].role, Role::System);
        assert_eq!(messages[0].content, "Conversation c-1");
        assert!(messages[1].content.starts_with("Summarise"));
        assert!(messages[1].content.contains("## Previous results\nreason: ok"));
        assert!(!messages[1].content.contains("Relevant history"));
    }

    #[test]
    fn closures_are_output_parsers() {
        let parser = |results: Vec<Value>| results.into_iter().rev().collect::<Vec<_>>();
        assert_eq!(parser.parse(vec![json!(1), json!(2)]), vec![json!(2), json!(1)]);
    }
}
