use crate::dataset::{DatasetStats, DatasetStatus};
use crate::models::{OutcomeStatus, RunReport};
use clap::ValueEnum;
use serde::{Deserialize, Serialize};

/// Output format options
#[derive(Debug, Clone, Copy, ValueEnum, Serialize, Deserialize)]
pub enum OutputFormat {
    Plain,
    Json,
}

/// Print a run report in the specified format
pub fn print_report(report: &RunReport, format: OutputFormat) {
    match format {
        OutputFormat::Plain => print_plain(report),
        OutputFormat::Json => print_json(report),
    }
}

/// Print dataset statistics in the specified format
pub fn print_stats(stats: &DatasetStats, format: OutputFormat) {
    match format {
        OutputFormat::Plain => print_stats_plain(stats),
        OutputFormat::Json => print_json(stats),
    }
}

fn format_plain(report: &RunReport) -> String {
    let params = &report.params;
    let metrics = &report.metrics;
    let mut out = String::new();

    out.push_str(&format!("=== {} ===\n\n", params.run_name));
    out.push_str(&format!("Agent version: {}\n", params.agent_version));
    out.push_str(&format!("Dataset:       {}\n", params.dataset));
    out.push_str(&format!("Model:         {}\n", params.model));
    if let Some(judge_model) = &params.judge_model {
        out.push_str(&format!("Judge model:   {}\n", judge_model));
    }
    out.push_str(&format!("Workers:       {}\n\n", params.max_workers));

    out.push_str("📊 METRICS\n");
    out.push_str("----------\n");
    out.push_str(&format!("{:<18} {:>10}\n", "Total items", metrics.total_items));
    out.push_str(&format!("{:<18} {:>10}\n", "Successful", metrics.successful_items));
    out.push_str(&format!("{:<18} {:>10}\n", "Failed", metrics.failed_items));
    out.push_str(&format!("{:<18} {:>9.1}%\n", "Success rate", metrics.success_rate * 100.0));
    out.push_str(&format!("{:<18} {:>10}\n", "Judged", metrics.judged_items));
    out.push_str(&format!("{:<18} {:>9.1}%\n", "Judge pass rate", metrics.judge_pass_rate * 100.0));
    out.push_str(&format!("{:<18} {:>8.1}ms\n\n", "Mean latency", metrics.mean_latency_ms));

    out.push_str("📝 DETAILED RESULTS\n");
    out.push_str("-------------------\n");
    if report.outcomes.is_empty() {
        out.push_str("No items evaluated.\n");
    }
    for outcome in &report.outcomes {
        let status = match outcome.status {
            OutcomeStatus::Success => "ok",
            OutcomeStatus::Error => "error",
        };
        out.push_str(&format!("[{}] {} ({})\n", status, outcome.id, outcome.company));
        out.push_str(&format!("Question: {}\n", outcome.question));
        out.push_str(&format!("Expected: {}\n", outcome.expected_answer));
        out.push_str(&format!("Answer:   {}\n", outcome.answer));
        if let Some(verdict) = &outcome.judge {
            let label = if verdict.pass { "pass" } else { "fail" };
            out.push_str(&format!("Judge:    {} - {}\n", label, verdict.rationale));
        }
        out.push('\n');
    }

    out
}

fn print_plain(report: &RunReport) {
    print!("{}", format_plain(report));
}

fn format_stats_plain(stats: &DatasetStats) -> String {
    let mut out = String::new();
    out.push_str(&format!("{:<40} {:>8} {:>10}\n", "Dataset", "Items", "Companies"));
    out.push_str(&format!("{}\n", "-".repeat(60)));
    for dataset in &stats.datasets {
        match dataset.status {
            DatasetStatus::Ok => out.push_str(&format!(
                "{:<40} {:>8} {:>10}\n",
                dataset.path,
                dataset.item_count,
                dataset.companies.len()
            )),
            DatasetStatus::NotFound => {
                out.push_str(&format!("{:<40} {:>19}\n", dataset.path, "not found"))
            }
        }
    }
    out.push_str(&format!("{}\n", "-".repeat(60)));
    out.push_str(&format!(
        "{:<40} {:>8} {:>10}\n",
        "Total", stats.total_items, stats.total_companies
    ));
    out
}

fn print_stats_plain(stats: &DatasetStats) {
    print!("{}", format_stats_plain(stats));
}

/// Print any serializable value as pretty JSON
fn print_json<T: Serialize + ?Sized>(value: &T) {
    match serde_json::to_string_pretty(value) {
        Ok(json) => println!("{}", json),
        Err(e) => eprintln!("Error serializing results to JSON: {}", e),
    }
}
