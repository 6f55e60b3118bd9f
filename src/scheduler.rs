use crate::agent::Agent;
use crate::judge::{Judge, JudgeRequest, parse_verdict};
use crate::models::{EvalItem, ItemOutcome, JudgeVerdict};
use futures::FutureExt;
use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Instant;
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

pub const DEFAULT_MAX_WORKERS: usize = 8;

/// Never more workers than items, never more than the cap
pub fn worker_count(cap: usize, item_count: usize) -> usize {
    cap.max(1).min(item_count)
}

pub struct Scheduler {
    max_workers: usize,
    progress_every: usize,
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_WORKERS, 10)
    }
}

impl Scheduler {
    pub fn new(max_workers: usize, progress_every: usize) -> Self {
        Self {
            max_workers: max_workers.max(1),
            progress_every: progress_every.max(1),
        }
    }

    /// Evaluate every item, returning outcomes in completion order
    pub async fn run(
        &self,
        items: Vec<EvalItem>,
        agent: Arc<dyn Agent>,
        judge: Option<Arc<dyn Judge>>,
    ) -> Vec<ItemOutcome> {
        let total = items.len();
        let workers = worker_count(self.max_workers, total);
        if workers == 0 {
            return Vec::new();
        }
        info!(items = total, workers, "starting evaluation");

        let (work_tx, work_rx) = mpsc::channel(total);
        for item in items {
            // capacity equals the item count, so this never waits
            if work_tx.send(item).await.is_err() {
                break;
            }
        }
        drop(work_tx);

        let work_rx = Arc::new(Mutex::new(work_rx));
        let (outcome_tx, mut outcome_rx) = mpsc::unbounded_channel();
        let completed = Arc::new(AtomicUsize::new(0));

        let mut pool = JoinSet::new();
        for worker in 0..workers {
            let work_rx = Arc::clone(&work_rx);
            let outcome_tx = outcome_tx.clone();
            let agent = Arc::clone(&agent);
            let judge = judge.clone();
            let completed = Arc::clone(&completed);
            let progress_every = self.progress_every;

            pool.spawn(async move {
                loop {
                    let next = work_rx.lock().await.recv().await;
                    let Some(item) = next else { break };

                    let evaluation = evaluate_item(&item, agent.as_ref(), judge.as_deref());
                    let outcome = isolate(&item, evaluation).await;
                    if outcome_tx.send(outcome).is_err() {
                        break;
                    }

                    let done = completed.fetch_add(1, Ordering::SeqCst) + 1;
                    if done % progress_every == 0 {
                        info!(completed = done, total, "evaluation progress");
                    }
                }
                debug!(worker, "worker finished");
            });
        }
        drop(outcome_tx);

        let mut outcomes = Vec::with_capacity(total);
        while let Some(outcome) = outcome_rx.recv().await {
            outcomes.push(outcome);
        }

        while let Some(joined) = pool.join_next().await {
            if let Err(err) = joined {
                error!(error = %err, "evaluation worker terminated abnormally");
            }
        }

        if outcomes.len() != total {
            error!(outcomes = outcomes.len(), total, "outcome count does not match submitted items");
        }
        outcomes
    }
}

fn elapsed_ms(started: Instant) -> u64 {
    started.elapsed().as_millis() as u64
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Await an item's evaluation so that a panic anywhere in it still yields
/// one error outcome for the item
async fn isolate<F>(item: &EvalItem, evaluation: F) -> ItemOutcome
where
    F: Future<Output = ItemOutcome>,
{
    let started = Instant::now();
    match AssertUnwindSafe(evaluation).catch_unwind().await {
        Ok(outcome) => outcome,
        Err(payload) => {
            let cause = format!("evaluation panicked: {}", panic_message(payload));
            error!(item_id = %item.id, error = %cause, "item evaluation aborted");
            ItemOutcome::failure(item, cause, elapsed_ms(started))
        }
    }
}

/// Run the agent, then the judge if one is given, for a single item
pub async fn evaluate_item(item: &EvalItem, agent: &dyn Agent, judge: Option<&dyn Judge>) -> ItemOutcome {
    let started = Instant::now();

    let invocation = AssertUnwindSafe(agent.evaluate(&item.company, &item.question))
        .catch_unwind()
        .await;

    let result = match invocation {
        Ok(Ok(result)) => result,
        Ok(Err(err)) => {
            let cause = format!("{:#}", err);
            warn!(item_id = %item.id, error = %cause, "agent invocation failed");
            return ItemOutcome::failure(item, cause, elapsed_ms(started));
        }
        Err(payload) => {
            let cause = format!("agent panicked: {}", panic_message(payload));
            warn!(item_id = %item.id, error = %cause, "agent invocation failed");
            return ItemOutcome::failure(item, cause, elapsed_ms(started));
        }
    };

    let verdict = match judge {
        Some(judge) => judge_answer(item, &result.answer, judge).await,
        None => None,
    };

    ItemOutcome::success(item, result, verdict, elapsed_ms(started))
}

async fn judge_answer(item: &EvalItem, answer: &str, judge: &dyn Judge) -> Option<JudgeVerdict> {
    let request = JudgeRequest {
        question: &item.question,
        expected_answer: &item.expected_answer,
        predicted_answer: answer,
        company: &item.company,
    };

    match AssertUnwindSafe(judge.judge(request)).catch_unwind().await {
        Ok(Ok(raw)) => Some(parse_verdict(&raw)),
        Ok(Err(err)) => {
            let cause = format!("{:#}", err);
            warn!(item_id = %item.id, error = %cause, "judge invocation failed");
            None
        }
        Err(payload) => {
            warn!(item_id = %item.id, error = %panic_message(payload), "judge panicked");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{AgentResult, OutcomeStatus};
    use anyhow::{Result, bail};
    use async_trait::async_trait;
    use std::collections::HashSet;
    use std::time::Duration;

    fn items(count: usize) -> Vec<EvalItem> {
        (1..=count)
            .map(|i| EvalItem {
                id: i.to_string(),
                company: format!("Company {}", i),
                question: format!("Question {}", i),
                expected_answer: format!("Answer {}", i),
            })
            .collect()
    }

    /// Succeeds with the expected answer, failing or panicking for selected ids
    struct ScriptedAgent {
        fail_ids: Vec<&'static str>,
        panic_ids: Vec<&'static str>,
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
        delay: Duration,
    }

    impl ScriptedAgent {
        fn new() -> Self {
            Self {
                fail_ids: vec![],
                panic_ids: vec![],
                in_flight: AtomicUsize::new(0),
                max_in_flight: AtomicUsize::new(0),
                delay: Duration::from_millis(0),
            }
        }
    }

    #[async_trait]
    impl Agent for ScriptedAgent {
        async fn evaluate(&self, company: &str, question: &str) -> Result<AgentResult> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);

            let id = question.trim_start_matches("Question ");
            if self.fail_ids.contains(&id) {
                bail!("upstream 503 for {}", company);
            }
            if self.panic_ids.contains(&id) {
                panic!("agent blew up on {}", id);
            }
            Ok(AgentResult {
                answer: format!("Answer {}", id),
                citations: vec!["https://example.com".to_string()],
                assumptions: vec![],
            })
        }
    }

    /// Replies with a fixed text, or fails, recording the answers it saw
    struct FixedJudge {
        reply: Option<&'static str>,
        seen: std::sync::Mutex<Vec<String>>,
    }

    impl FixedJudge {
        fn replying(reply: &'static str) -> Self {
            Self {
                reply: Some(reply),
                seen: std::sync::Mutex::new(Vec::new()),
            }
        }

        fn failing() -> Self {
            Self {
                reply: None,
                seen: std::sync::Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl Judge for FixedJudge {
        async fn judge(&self, request: JudgeRequest<'_>) -> Result<String> {
            self.seen.lock().unwrap().push(request.predicted_answer.to_string());
            match self.reply {
                Some(reply) => Ok(reply.to_string()),
                None => bail!("judge quota exhausted"),
            }
        }
    }

    #[test]
    fn test_worker_count_bounds() {
        assert_eq!(worker_count(8, 10), 8);
        assert_eq!(worker_count(8, 3), 3);
        assert_eq!(worker_count(8, 0), 0);
        assert_eq!(worker_count(0, 5), 1);
    }

    #[tokio::test]
    async fn test_all_items_succeed() {
        let scheduler = Scheduler::new(8, 10);
        let outcomes = scheduler.run(items(10), Arc::new(ScriptedAgent::new()), None).await;

        assert_eq!(outcomes.len(), 10);
        assert!(outcomes.iter().all(|o| o.status == OutcomeStatus::Success));
        assert!(outcomes.iter().all(|o| o.citation_count == 1 && o.judge.is_none()));
        let ids: HashSet<&str> = outcomes.iter().map(|o| o.id.as_str()).collect();
        assert_eq!(ids.len(), 10);
    }

    #[tokio::test]
    async fn test_agent_failure_is_isolated_to_its_item() {
        let mut agent = ScriptedAgent::new();
        agent.fail_ids = vec!["3"];
        let scheduler = Scheduler::new(8, 10);

        let outcomes = scheduler.run(items(5), Arc::new(agent), None).await;

        assert_eq!(outcomes.len(), 5);
        let failed: Vec<&ItemOutcome> = outcomes.iter().filter(|o| !o.is_success()).collect();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].id, "3");
        assert_eq!(failed[0].answer, "ERROR: upstream 503 for Company 3");
        assert_eq!(failed[0].error_message.as_deref(), Some("upstream 503 for Company 3"));
        assert_eq!(failed[0].citation_count, 0);
    }

    #[tokio::test]
    async fn test_agent_panic_becomes_error_outcome() {
        let mut agent = ScriptedAgent::new();
        agent.panic_ids = vec!["2"];
        let scheduler = Scheduler::new(2, 10);

        let outcomes = scheduler.run(items(4), Arc::new(agent), None).await;

        assert_eq!(outcomes.len(), 4);
        let failed = outcomes.iter().find(|o| o.id == "2").unwrap();
        assert_eq!(failed.status, OutcomeStatus::Error);
        assert!(failed.answer.contains("agent blew up on 2"));
    }

    #[tokio::test]
    async fn test_panic_outside_agent_call_still_yields_outcome() {
        let batch = items(1);
        let item = &batch[0];
        let exploding = async { Option::<ItemOutcome>::None.expect("outcome construction failed") };

        let outcome = isolate(item, exploding).await;

        assert_eq!(outcome.id, "1");
        assert_eq!(outcome.status, OutcomeStatus::Error);
        assert_eq!(outcome.answer, "ERROR: evaluation panicked: outcome construction failed");
    }

    #[tokio::test]
    async fn test_isolate_passes_through_completed_outcome() {
        let batch = items(1);
        let item = &batch[0];
        let outcome = isolate(item, evaluate_item(item, &ScriptedAgent::new(), None)).await;
        assert!(outcome.is_success());
        assert_eq!(outcome.answer, "Answer 1");
    }

    #[tokio::test]
    async fn test_concurrency_never_exceeds_cap() {
        let mut agent = ScriptedAgent::new();
        agent.delay = Duration::from_millis(20);
        let agent = Arc::new(agent);
        let scheduler = Scheduler::new(3, 100);

        let outcomes = scheduler.run(items(12), agent.clone(), None).await;

        assert_eq!(outcomes.len(), 12);
        let peak = agent.max_in_flight.load(Ordering::SeqCst);
        assert!(peak <= 3, "peak concurrency was {}", peak);
        assert!(peak >= 2, "expected parallel execution, peak was {}", peak);
    }

    #[tokio::test]
    async fn test_empty_items_produce_no_outcomes() {
        let scheduler = Scheduler::default();
        let outcomes = scheduler.run(Vec::new(), Arc::new(ScriptedAgent::new()), None).await;
        assert!(outcomes.is_empty());
    }

    #[tokio::test]
    async fn test_judge_sees_agent_answer() {
        let judge = Arc::new(FixedJudge::replying(r#"{"pass": true, "rationale": "same"}"#));
        let scheduler = Scheduler::new(4, 10);

        let outcomes = scheduler.run(items(3), Arc::new(ScriptedAgent::new()), Some(judge.clone() as Arc<dyn Judge>)).await;

        assert!(outcomes.iter().all(|o| o.judge.as_ref().is_some_and(|v| v.pass)));
        let mut seen = judge.seen.lock().unwrap().clone();
        seen.sort();
        assert_eq!(seen, vec!["Answer 1", "Answer 2", "Answer 3"]);
    }

    #[tokio::test]
    async fn test_judge_failure_leaves_status_untouched() {
        let judge = Arc::new(FixedJudge::failing());
        let scheduler = Scheduler::new(4, 10);

        let outcomes = scheduler.run(items(3), Arc::new(ScriptedAgent::new()), Some(judge as Arc<dyn Judge>)).await;

        assert_eq!(outcomes.len(), 3);
        assert!(outcomes.iter().all(|o| o.is_success() && o.judge.is_none()));
    }

    #[tokio::test]
    async fn test_failed_agent_is_not_judged() {
        let mut agent = ScriptedAgent::new();
        agent.fail_ids = vec!["1"];
        let judge = Arc::new(FixedJudge::replying("pass"));

        let outcome = evaluate_item(&items(1)[0], &agent, Some(judge.as_ref() as &dyn Judge)).await;

        assert_eq!(outcome.status, OutcomeStatus::Error);
        assert!(outcome.judge.is_none());
        assert!(judge.seen.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unstructured_judge_reply_uses_heuristic() {
        let judge = FixedJudge::replying("I think this should pass the check");
        let outcome = evaluate_item(&items(1)[0], &ScriptedAgent::new(), Some(&judge as &dyn Judge)).await;

        let verdict = outcome.judge.unwrap();
        assert!(verdict.pass);
        assert_eq!(verdict.rationale, "I think this should pass the check");
    }
}
