use crate::error::SinkError;
use crate::models::{RunMetrics, RunParams, RunReport};
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::info;

/// Destination for a completed run. Failures are reported to the caller,
/// which logs them without affecting the run's result.
pub trait ReportSink: Send + Sync {
    fn persist(&self, report: &RunReport) -> Result<(), SinkError>;
}

/// Writes metrics, per-item results and artifact texts into a directory
pub struct FileSink {
    output_dir: PathBuf,
}

#[derive(Serialize)]
struct MetricsFile<'a> {
    params: &'a RunParams,
    metrics: &'a RunMetrics,
    started_at: String,
    finished_at: String,
}

impl FileSink {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
        }
    }

    fn metrics_path(&self, params: &RunParams) -> PathBuf {
        self.output_dir.join(format!("metrics_{}.json", params.agent_version))
    }

    fn results_path(&self, params: &RunParams) -> PathBuf {
        self.output_dir
            .join(format!("results_{}_{}.jsonl", params.agent_version, params.dataset))
    }

    /// Ensure the output directory exists
    fn ensure_directory_exists(&self) -> Result<(), SinkError> {
        std::fs::create_dir_all(&self.output_dir).map_err(|source| SinkError::Io {
            path: self.output_dir.clone(),
            source,
        })
    }

    fn write_file(path: &Path, content: &str) -> Result<(), SinkError> {
        std::fs::write(path, content).map_err(|source| SinkError::Io {
            path: path.to_path_buf(),
            source,
        })
    }

    /// One JSON object per line, in collection order
    fn serialize_results(report: &RunReport) -> Result<String, SinkError> {
        let mut lines = String::new();
        for outcome in &report.outcomes {
            lines.push_str(&serde_json::to_string(outcome)?);
            lines.push('\n');
        }
        Ok(lines)
    }
}

impl ReportSink for FileSink {
    fn persist(&self, report: &RunReport) -> Result<(), SinkError> {
        self.ensure_directory_exists()?;

        let metrics = MetricsFile {
            params: &report.params,
            metrics: &report.metrics,
            started_at: report.started_at.to_rfc3339(),
            finished_at: report.finished_at.to_rfc3339(),
        };
        let metrics_path = self.metrics_path(&report.params);
        Self::write_file(&metrics_path, &serde_json::to_string_pretty(&metrics)?)?;

        let results_path = self.results_path(&report.params);
        Self::write_file(&results_path, &Self::serialize_results(report)?)?;

        for artifact in &report.artifacts {
            let path = self
                .output_dir
                .join(format!("{}_{}.txt", artifact.name, report.params.agent_version));
            Self::write_file(&path, &artifact.content)?;
        }

        info!(path = %self.output_dir.display(), "run report stored");
        Ok(())
    }
}
