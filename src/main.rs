use clap::Parser;
use std::path::PathBuf;
use tracing::Level;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, fmt};

mod agent;
mod config;
mod dataset;
mod error;
mod judge;
mod llm;
mod metrics;
mod models;
mod output;
mod runner;
mod scheduler;
mod sink;

use crate::agent::AgentRegistry;
use crate::config::Config;
use crate::output::OutputFormat;
use crate::runner::Runner;
use crate::sink::FileSink;

/// Agent evaluation harness - run an agent over a question dataset and score the answers
#[derive(Parser, Debug)]
#[command(author, about, long_about = None)]
struct Args {
    /// Path to the TOML run configuration file
    run_file: PathBuf,

    /// Output format: plain or json
    #[arg(short, long, default_value = "plain")]
    output: OutputFormat,

    /// Verbose output - debug logging for each item
    #[arg(short, long)]
    verbose: bool,

    /// Emit log lines as JSON
    #[arg(long)]
    log_json: bool,

    /// Print dataset statistics and exit
    #[arg(long)]
    stats: bool,

    /// Agent version to evaluate
    #[arg(long = "version")]
    agent_version: Option<String>,

    /// Dataset file, may be repeated; replaces the configured datasets
    #[arg(long = "dataset")]
    datasets: Vec<PathBuf>,

    /// Enable the judge
    #[arg(long)]
    judge: bool,

    #[arg(long)]
    run_name: Option<String>,

    #[arg(long)]
    max_workers: Option<usize>,
}

impl Args {
    /// Apply command line overrides on top of the file configuration
    fn apply_overrides(&self, config: &mut Config) -> anyhow::Result<()> {
        if let Some(version) = &self.agent_version {
            config.version = version.clone();
        }
        if !self.datasets.is_empty() {
            config.datasets = self.datasets.clone();
        }
        if self.judge {
            config.judge.enabled = true;
        }
        if let Some(run_name) = &self.run_name {
            config.run_name = Some(run_name.clone());
        }
        if let Some(max_workers) = self.max_workers {
            config.max_workers = max_workers;
        }
        config.validate()
    }
}

/// Initialise the global subscriber. `RUST_LOG` takes precedence over `level`.
/// Logs go to stderr so stdout carries only the report.
fn init_tracing(json: bool, level: Level) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.as_str()));

    if json {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt::layer().with_target(false).with_writer(std::io::stderr).json())
            .try_init()
            .ok();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
            .try_init()
            .ok();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let level = if args.verbose { Level::DEBUG } else { Level::INFO };
    init_tracing(args.log_json, level);

    let mut config = Config::from_file(&args.run_file)?;
    args.apply_overrides(&mut config)?;

    if args.stats {
        let stats = dataset::dataset_stats(&config.datasets)?;
        output::print_stats(&stats, args.output);
        return Ok(());
    }

    let output_dir = config.output_dir.clone();
    let mut runner = Runner::new(config, AgentRegistry::with_defaults());
    if let Some(dir) = output_dir {
        runner = runner.with_sink(Box::new(FileSink::new(dir)));
    }
    let report = runner.run().await?;

    output::print_report(&report, args.output);

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn config_file() -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        write!(
            file,
            r#"
datasets = ["data/company_qa.jsonl"]

[agent]
model = "gpt-4o-mini"
"#
        )
        .unwrap();
        file
    }

    #[test]
    fn test_overrides_replace_file_values() {
        let file = config_file();
        let path = file.path().to_str().unwrap();
        let args = Args::try_parse_from([
            "agent-eval-harness",
            path,
            "--version",
            "v002",
            "--dataset",
            "a.jsonl",
            "--dataset",
            "b.jsonl",
            "--judge",
            "--run-name",
            "nightly",
            "--max-workers",
            "3",
        ])
        .unwrap();

        let mut config = Config::from_file(&args.run_file).unwrap();
        args.apply_overrides(&mut config).unwrap();

        assert_eq!(config.version, "v002");
        assert_eq!(config.datasets, vec![PathBuf::from("a.jsonl"), PathBuf::from("b.jsonl")]);
        assert!(config.judge.enabled);
        assert_eq!(config.effective_run_name(), "nightly");
        assert_eq!(config.max_workers, 3);
    }

    #[test]
    fn test_no_overrides_keep_file_values() {
        let file = config_file();
        let path = file.path().to_str().unwrap();
        let args = Args::try_parse_from(["agent-eval-harness", path, "-o", "json"]).unwrap();

        let mut config = Config::from_file(&args.run_file).unwrap();
        args.apply_overrides(&mut config).unwrap();

        assert_eq!(config.version, "v001");
        assert_eq!(config.datasets, vec![PathBuf::from("data/company_qa.jsonl")]);
        assert!(!config.judge.enabled);
        assert!(matches!(args.output, OutputFormat::Json));
    }

    #[test]
    fn test_zero_workers_override_is_rejected() {
        let file = config_file();
        let path = file.path().to_str().unwrap();
        let args =
            Args::try_parse_from(["agent-eval-harness", path, "--max-workers", "0"]).unwrap();

        let mut config = Config::from_file(&args.run_file).unwrap();
        assert!(args.apply_overrides(&mut config).is_err());
    }
}
