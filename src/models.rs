use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One evaluation case derived from a dataset record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvalItem {
    /// Report key; not required to be unique
    pub id: String,
    pub company: String,
    pub question: String,
    pub expected_answer: String,
}

/// Answer produced by an agent for a single item
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AgentResult {
    pub answer: String,
    #[serde(default)]
    pub citations: Vec<String>,
    #[serde(default)]
    pub assumptions: Vec<String>,
}

impl AgentResult {
    pub fn from_answer(answer: impl Into<String>) -> Self {
        Self {
            answer: answer.into(),
            ..Self::default()
        }
    }
}

/// Pass/fail decision returned by the judge model
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JudgeVerdict {
    pub pass: bool,
    pub rationale: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutcomeStatus {
    Success,
    Error,
}

/// Recorded result of evaluating one item, produced whether or not the agent failed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemOutcome {
    pub id: String,
    pub company: String,
    pub question: String,
    pub expected_answer: String,
    pub answer: String,
    pub citation_count: usize,
    pub status: OutcomeStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    /// `None` when judging is disabled or the judge call failed
    pub judge: Option<JudgeVerdict>,
    /// Wall-clock time spent on the agent and judge calls
    pub duration_ms: u64,
}

impl ItemOutcome {
    pub fn success(item: &EvalItem, result: AgentResult, judge: Option<JudgeVerdict>, duration_ms: u64) -> Self {
        Self {
            id: item.id.clone(),
            company: item.company.clone(),
            question: item.question.clone(),
            expected_answer: item.expected_answer.clone(),
            citation_count: result.citations.len(),
            answer: result.answer,
            status: OutcomeStatus::Success,
            error_message: None,
            judge,
            duration_ms,
        }
    }

    pub fn failure(item: &EvalItem, cause: String, duration_ms: u64) -> Self {
        Self {
            id: item.id.clone(),
            company: item.company.clone(),
            question: item.question.clone(),
            expected_answer: item.expected_answer.clone(),
            answer: format!("ERROR: {}", cause),
            citation_count: 0,
            status: OutcomeStatus::Error,
            error_message: Some(cause),
            judge: None,
            duration_ms,
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == OutcomeStatus::Success
    }
}

/// Run-level operational and quality metrics
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunMetrics {
    pub total_items: usize,
    pub successful_items: usize,
    pub failed_items: usize,
    /// successful_items / total_items, 0 when there are no items
    pub success_rate: f64,
    /// Items carrying a verdict; failed judge calls are not counted
    pub judged_items: usize,
    pub judge_passes: usize,
    /// judge_passes / judged_items, 0 when nothing was judged
    pub judge_pass_rate: f64,
    pub mean_latency_ms: f64,
}

/// Parameters describing a run, handed to the report sink
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunParams {
    pub run_name: String,
    pub agent_version: String,
    pub dataset: String,
    pub model: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub judge_model: Option<String>,
    pub max_workers: usize,
}

/// Named text persisted alongside a run (prompt, rubric)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Artifact {
    pub name: String,
    pub content: String,
}

/// Everything a completed run produced
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub params: RunParams,
    pub metrics: RunMetrics,
    pub outcomes: Vec<ItemOutcome>,
    #[serde(default)]
    pub artifacts: Vec<Artifact>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item() -> EvalItem {
        EvalItem {
            id: "7".to_string(),
            company: "Acme".to_string(),
            question: "Who founded Acme?".to_string(),
            expected_answer: "Wile E.".to_string(),
        }
    }

    #[test]
    fn test_failure_outcome_shape() {
        let outcome = ItemOutcome::failure(&item(), "timeout".to_string(), 12);
        assert_eq!(outcome.status, OutcomeStatus::Error);
        assert_eq!(outcome.answer, "ERROR: timeout");
        assert_eq!(outcome.error_message.as_deref(), Some("timeout"));
        assert_eq!(outcome.citation_count, 0);
        assert!(outcome.judge.is_none());
    }

    #[test]
    fn test_success_outcome_counts_citations() {
        let result = AgentResult {
            answer: "Wile E.".to_string(),
            citations: vec!["a".to_string(), "b".to_string()],
            assumptions: vec![],
        };
        let outcome = ItemOutcome::success(&item(), result, None, 3);
        assert!(outcome.is_success());
        assert_eq!(outcome.citation_count, 2);
        assert_eq!(outcome.answer, "Wile E.");
    }

    #[test]
    fn test_status_serializes_lowercase() {
        let outcome = ItemOutcome::failure(&item(), "boom".to_string(), 0);
        let json = serde_json::to_value(&outcome).unwrap();
        assert_eq!(json["status"], "error");
        assert!(json["judge"].is_null());
    }
}
