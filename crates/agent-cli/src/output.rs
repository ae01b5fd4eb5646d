//! Terminal tables

use agent_stock::{AnalysisReport, BatchStats, BatchSummary, CacheStats};
use comfy_table::{Cell, ContentArrangement, Table};
use std::path::Path;

fn table(header: &[&str]) -> Table {
    let mut table = Table::new();
    table
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(header.iter().map(|h| Cell::new(*h)));
    table
}

fn score(value: Option<f64>) -> String {
    value.map_or_else(|| "-".to_string(), |s| format!("{s:.1}"))
}

pub fn reports_table(reports: &[AnalysisReport]) -> Table {
    let mut table = table(&[
        "Ticker", "Company", "Outcome", "Rating", "Score", "Quality", "Deepened", "Source",
    ]);
    for report in reports {
        table.add_row(vec![
            Cell::new(report.ticker()),
            Cell::new(report.request().company()),
            Cell::new(report.outcome()),
            Cell::new(report.rating()),
            Cell::new(score(report.overall_score())),
            Cell::new(format!("{:.2}", report.data_quality())),
            Cell::new(if report.deepened() { "yes" } else { "no" }),
            Cell::new(if report.from_cache() { "cache" } else { "fresh" }),
        ]);
    }
    table
}

pub fn failures_table(summary: &BatchSummary) -> Table {
    let mut table = table(&["#", "Ticker", "Company", "Reason"]);
    for failure in summary.failures() {
        table.add_row(vec![
            Cell::new(failure.index + 1),
            Cell::new(&failure.ticker),
            Cell::new(&failure.company),
            Cell::new(&failure.reason),
        ]);
    }
    for request in summary.skipped() {
        table.add_row(vec![
            Cell::new("-"),
            Cell::new(request.ticker()),
            Cell::new(request.company()),
            Cell::new("skipped after cancellation"),
        ]);
    }
    table
}

pub fn stats_table(stats: &BatchStats) -> Table {
    let mut table = table(&["Metric", "Value"]);
    table.add_row(vec![Cell::new("Total"), Cell::new(stats.total)]);
    table.add_row(vec![Cell::new("Succeeded"), Cell::new(stats.succeeded)]);
    table.add_row(vec![Cell::new("Failed"), Cell::new(stats.failed)]);
    table.add_row(vec![Cell::new("Skipped"), Cell::new(stats.skipped)]);
    table.add_row(vec![
        Cell::new("Success rate"),
        Cell::new(format!("{:.1}%", stats.success_rate * 100.0)),
    ]);
    table.add_row(vec![
        Cell::new("Average score"),
        Cell::new(score(stats.average_score)),
    ]);
    for (rating, count) in &stats.rating_distribution {
        table.add_row(vec![Cell::new(format!("Rated {rating}")), Cell::new(count)]);
    }
    if let Some(top) = stats.top_performers.first() {
        table.add_row(vec![
            Cell::new("Top performer"),
            Cell::new(format!("{} ({:.1})", top.ticker, top.score)),
        ]);
    }
    table
}

pub fn cache_table(path: &Path, stats: &CacheStats) -> Table {
    let mut table = table(&["Cache", "Value"]);
    table.add_row(vec![Cell::new("File"), Cell::new(path.display())]);
    table.add_row(vec![Cell::new("Entries"), Cell::new(stats.entries)]);
    table.add_row(vec![Cell::new("Hits"), Cell::new(stats.hits)]);
    table.add_row(vec![Cell::new("Misses"), Cell::new(stats.misses)]);
    table.add_row(vec![Cell::new("Evictions"), Cell::new(stats.evictions)]);
    table.add_row(vec![
        Cell::new("Hit rate"),
        Cell::new(format!("{:.1}%", stats.hit_rate() * 100.0)),
    ]);
    table
}

#[cfg(test)]
mod tests {
    use super::*;
    use agent_core::{AnalysisRequest, Stage, StageResult, StageStatus};
    use agent_stock::{ExecutionStrategy, ItemOutcome};
    use serde_json::json;

    fn done(ticker: &str, score: f64) -> AnalysisReport {
        AnalysisReport::completed(
            AnalysisRequest::for_ticker(ticker),
            vec![StageResult::completed(
                Stage::Fundamental,
                StageStatus::Ok,
                json!({ "score": score }),
                0.9,
            )],
            0.9,
            false,
        )
    }

    #[test]
    fn test_reports_table_lists_each_report() {
        let rendered = reports_table(&[done("AAPL", 88.0), done("MSFT", 50.0)]).to_string();
        assert!(rendered.contains("AAPL"));
        assert!(rendered.contains("88.0"));
        assert!(rendered.contains("MSFT"));
        assert!(rendered.contains("fresh"));
    }

    #[test]
    fn test_failures_table_includes_skipped() {
        let summary = BatchSummary::assemble(
            "run",
            ExecutionStrategy::Parallel,
            chrono::Utc::now(),
            1,
            true,
            vec![
                (
                    AnalysisRequest::for_ticker("ZZZZ"),
                    ItemOutcome::Rejected("unknown ticker".to_string()),
                ),
                (AnalysisRequest::for_ticker("NVDA"), ItemOutcome::Skipped),
            ],
        );
        let rendered = failures_table(&summary).to_string();
        assert!(rendered.contains("unknown ticker"));
        assert!(rendered.contains("skipped after cancellation"));
    }
}
