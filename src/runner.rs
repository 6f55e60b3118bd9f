use crate::agent::AgentRegistry;
use crate::config::Config;
use crate::dataset::{dataset_identifier, load_eval_items};
use crate::error::EvalError;
use crate::judge::{Judge, LlmJudge};
use crate::metrics::aggregate;
use crate::models::{Artifact, RunParams, RunReport};
use crate::scheduler::{Scheduler, worker_count};
use crate::sink::ReportSink;
use chrono::Utc;
use std::sync::Arc;
use tracing::{error, info, warn};

/// Main runner that orchestrates an evaluation run
pub struct Runner {
    config: Config,
    registry: AgentRegistry,
    judge: Option<Arc<dyn Judge>>,
    sink: Option<Box<dyn ReportSink>>,
}

impl Runner {
    /// Create a runner resolving the configured agent version in `registry`
    pub fn new(config: Config, registry: AgentRegistry) -> Self {
        Self {
            config,
            registry,
            judge: None,
            sink: None,
        }
    }

    /// Use this judge instead of building one from the judge configuration
    #[cfg(test)]
    pub fn with_judge(mut self, judge: Arc<dyn Judge>) -> Self {
        self.judge = Some(judge);
        self
    }

    /// Persist the report through `sink` once the run completes
    pub fn with_sink(mut self, sink: Box<dyn ReportSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Resolve the judge for this run. A judge that cannot be set up leaves
    /// every item unjudged rather than failing the run.
    fn resolve_judge(&self) -> Option<Arc<dyn Judge>> {
        if let Some(judge) = &self.judge {
            return Some(Arc::clone(judge));
        }
        if !self.config.judge.enabled {
            return None;
        }

        match LlmJudge::from_config(&self.config.judge) {
            Ok(judge) => Some(Arc::new(judge)),
            Err(err) => {
                let cause = format!("{:#}", err);
                warn!(error = %cause, "judge unavailable, items will not be judged");
                None
            }
        }
    }

    fn artifacts(&self, judge: Option<&dyn Judge>) -> Vec<Artifact> {
        let mut artifacts = vec![Artifact {
            name: "prompt".to_string(),
            content: self.config.agent.system_prompt.clone(),
        }];
        if let Some(rubric) = judge.and_then(|j| j.rubric()) {
            artifacts.push(Artifact {
                name: "rubric".to_string(),
                content: rubric.to_string(),
            });
        }
        artifacts
    }

    /// Run the configured evaluation.
    ///
    /// Only a missing dataset or an unusable agent version abort the run;
    /// per-item failures are recorded in the outcomes and sink failures are logged.
    pub async fn run(&self) -> Result<RunReport, EvalError> {
        let config = &self.config;
        let started_at = Utc::now();

        let items = load_eval_items(&config.datasets)?;
        let agent = self.registry.build(&config.version, &config.agent)?;
        let judge = self.resolve_judge();

        let max_workers = worker_count(config.max_workers, items.len());
        info!(items = items.len(), version = %config.version, max_workers, "processing items");

        let scheduler = Scheduler::new(config.max_workers, config.progress_every);
        let outcomes = scheduler.run(items, agent, judge.clone()).await;
        let metrics = aggregate(&outcomes);

        let report = RunReport {
            params: RunParams {
                run_name: config.effective_run_name(),
                agent_version: config.version.clone(),
                dataset: dataset_identifier(&config.datasets),
                model: config.agent.model.clone(),
                judge_model: judge.as_deref().and_then(|j| j.model()).map(str::to_string),
                max_workers,
            },
            metrics,
            outcomes,
            artifacts: self.artifacts(judge.as_deref()),
            started_at,
            finished_at: Utc::now(),
        };

        if let Some(sink) = &self.sink {
            if let Err(err) = sink.persist(&report) {
                error!(error = %err, "failed to persist run report");
            }
        }

        Self::log_summary(&report);
        Ok(report)
    }

    fn log_summary(report: &RunReport) {
        let metrics = &report.metrics;
        info!(completed = metrics.total_items, "evaluation finished");
        info!("Success rate: {:.1}%", metrics.success_rate * 100.0);
        if metrics.successful_items > 0 {
            info!("Successful evaluations: {}", metrics.successful_items);
        }
        if metrics.failed_items > 0 {
            info!("Failed evaluations: {}", metrics.failed_items);
        }
        if metrics.judged_items > 0 {
            info!("Judge pass rate: {:.1}% over {} judged items", metrics.judge_pass_rate * 100.0, metrics.judged_items);
        }
    }
}
