use crate::models::{ItemOutcome, RunMetrics};

fn ratio(numerator: usize, denominator: usize) -> f64 {
    if denominator == 0 {
        0.0
    } else {
        numerator as f64 / denominator as f64
    }
}

/// Reduce per-item outcomes to run-level metrics
pub fn aggregate(outcomes: &[ItemOutcome]) -> RunMetrics {
    let total_items = outcomes.len();
    let successful_items = outcomes.iter().filter(|o| o.is_success()).count();

    let verdicts: Vec<bool> = outcomes
        .iter()
        .filter_map(|o| o.judge.as_ref().map(|v| v.pass))
        .collect();
    let judge_passes = verdicts.iter().filter(|pass| **pass).count();

    let mean_latency_ms = if total_items == 0 {
        0.0
    } else {
        outcomes.iter().map(|o| o.duration_ms as f64).sum::<f64>() / total_items as f64
    };

    RunMetrics {
        total_items,
        successful_items,
        failed_items: total_items - successful_items,
        success_rate: ratio(successful_items, total_items),
        judged_items: verdicts.len(),
        judge_passes,
        judge_pass_rate: ratio(judge_passes, verdicts.len()),
        mean_latency_ms,
    }
}
