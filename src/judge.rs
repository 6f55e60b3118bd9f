use crate::config::JudgeConfig;
use crate::llm::{ChatClient, parse_json_lenient};
use crate::models::JudgeVerdict;
use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;

/// Maximum number of characters kept from an unstructured judge reply
pub const RATIONALE_LIMIT: usize = 500;

/// Inputs of a single judge call
#[derive(Debug, Clone, Copy)]
pub struct JudgeRequest<'a> {
    pub question: &'a str,
    pub expected_answer: &'a str,
    pub predicted_answer: &'a str,
    pub company: &'a str,
}

/// Secondary model that grades an agent answer against the expected one.
///
/// Returns the raw reply text; it is interpreted by [`parse_verdict`].
#[async_trait]
pub trait Judge: Send + Sync {
    async fn judge(&self, request: JudgeRequest<'_>) -> Result<String>;

    /// Grading instructions, persisted with the run report
    fn rubric(&self) -> Option<&str> {
        None
    }

    fn model(&self) -> Option<&str> {
        None
    }
}

/// Judge backed by a chat completion model
pub struct LlmJudge {
    client: ChatClient,
    rubric: String,
}

impl LlmJudge {
    pub fn new(client: ChatClient, rubric: String) -> Self {
        Self { client, rubric }
    }

    pub fn from_config(config: &JudgeConfig) -> Result<Self> {
        Ok(Self::new(ChatClient::from_env(config.settings())?, config.rubric.clone()))
    }

    fn system_prompt(&self) -> String {
        format!(
            "{}\n\nStrictly output a compact JSON object with keys pass (boolean) and rationale (string).",
            self.rubric
        )
    }

    fn build_prompt(request: &JudgeRequest<'_>) -> String {
        format!(
            "Company: {}\nQuestion: {}\nExpected answer (ground truth): {}\nPredicted answer: {}\n\nEvaluate factual alignment. Do not nitpick wording.",
            request.company, request.question, request.expected_answer, request.predicted_answer
        )
    }
}

#[async_trait]
impl Judge for LlmJudge {
    async fn judge(&self, request: JudgeRequest<'_>) -> Result<String> {
        self.client
            .complete(&self.system_prompt(), &Self::build_prompt(&request))
            .await
    }

    fn rubric(&self) -> Option<&str> {
        Some(&self.rubric)
    }

    fn model(&self) -> Option<&str> {
        Some(self.client.model())
    }
}

/// Truthiness of a JSON value: null, false, 0, "" and empty containers are false
fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(items) => !items.is_empty(),
        Value::Object(map) => !map.is_empty(),
    }
}

/// Interpret a judge reply. Never fails: JSON objects are read directly,
/// anything else is scanned for "pass" without "fail".
pub fn parse_verdict(raw: &str) -> JudgeVerdict {
    let text = raw.trim();

    if let Some(Value::Object(data)) = parse_json_lenient(text) {
        let pass = data.get("pass").is_some_and(truthy);
        let rationale = match data.get("rationale") {
            Some(Value::String(s)) => s.clone(),
            Some(Value::Null) | None => String::new(),
            Some(other) => other.to_string(),
        };
        return JudgeVerdict { pass, rationale };
    }

    let lowered = text.to_lowercase();
    JudgeVerdict {
        pass: lowered.contains("pass") && !lowered.contains("fail"),
        rationale: text.chars().take(RATIONALE_LIMIT).collect(),
    }
}
