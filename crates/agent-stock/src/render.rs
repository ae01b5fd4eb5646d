//! Report renderers
//!
//! Renderers turn a finished [`AnalysisReport`] or [`BatchSummary`] into a
//! document on disk and return its path. They sit outside the orchestration
//! state machine and are invoked once per completed run.

use crate::error::{Result, StockError};
use crate::report::AnalysisReport;
use crate::summary::BatchSummary;
use minijinja::Environment;
use serde_json::json;
use std::fs::OpenOptions;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use tracing::info;

const REPORT_TEMPLATE: &str = r"# {{ company }} ({{ ticker }})

| | |
|---|---|
| Outcome | {{ outcome }} |
| Rating | {{ rating }} |
| Overall score | {{ score }} |
| Data quality | {{ quality }} |
| Depth | {{ depth }} |
| Deepened | {{ deepened }} |
| Generated | {{ generated_at }} |
{% if reason %}
> Aborted: {{ reason }}
{% endif %}{% if recommendation %}
## Recommendation

{{ recommendation }}
{% endif %}
## Stages

| Stage | Status | Score | Quality | Attempts | Elapsed (ms) | Failure |
|---|---|---|---|---|---|---|
{% for s in stages %}| {{ s.stage }} | {{ s.status }} | {{ s.score }} | {{ s.quality }} | {{ s.attempts }} | {{ s.elapsed_ms }} | {{ s.failure }} |
{% endfor %}";

const SUMMARY_TEMPLATE: &str = r"# Batch analysis {{ run_id }}

| | |
|---|---|
| Strategy | {{ strategy }} |
| Requests | {{ stats.total }} |
| Succeeded | {{ stats.succeeded }} |
| Failed | {{ stats.failed }} |
| Skipped | {{ stats.skipped }} |
| Success rate | {{ success_rate }} |
| Average score | {{ average_score }} |
| Waves | {{ waves }} |
| Cancelled | {{ cancelled }} |

## Reports

| Ticker | Company | Rating | Score | Quality |
|---|---|---|---|---|
{% for r in reports %}| {{ r.ticker }} | {{ r.company }} | {{ r.rating }} | {{ r.score }} | {{ r.quality }} |
{% endfor %}{% if failures %}
## Failures

| # | Ticker | Reason |
|---|---|---|
{% for f in failures %}| {{ f.index + 1 }} | {{ f.ticker }} | {{ f.reason }} |
{% endfor %}{% endif %}
## Rating distribution

{% for rating, count in ratings %}- {{ rating }}: {{ count }}
{% endfor %}";

/// Converts finished runs into documents
pub trait ReportRenderer: Send + Sync {
    /// Write one report; returns the written path
    fn render_report(&self, report: &AnalysisReport) -> Result<PathBuf>;

    /// Write one batch summary; returns the written path
    fn render_summary(&self, summary: &BatchSummary) -> Result<PathBuf>;
}

fn fmt_score(score: Option<f64>) -> String {
    score.map_or_else(|| "n/a".to_string(), |s| format!("{s:.1}"))
}

fn report_stem(report: &AnalysisReport) -> String {
    format!(
        "{}_{}",
        report.ticker().replace('.', "_"),
        report.generated_at().format("%Y%m%d_%H%M%S")
    )
}

fn summary_stem(summary: &BatchSummary) -> String {
    let short_id: String = summary.run_id().chars().take(8).collect();
    format!(
        "batch_{}_{}",
        short_id,
        summary.finished_at().format("%Y%m%d_%H%M%S")
    )
}

/// Writes `{stem}.{ext}` under `dir`, never replacing an existing file.
/// A taken name gets a numeric suffix: `{stem}_2.{ext}`, `{stem}_3.{ext}`, ...
fn write_file(dir: &Path, stem: &str, ext: &str, contents: &[u8]) -> Result<PathBuf> {
    std::fs::create_dir_all(dir)?;
    let mut attempt = 1u32;
    loop {
        let file_name = if attempt == 1 {
            format!("{stem}.{ext}")
        } else {
            format!("{stem}_{attempt}.{ext}")
        };
        let path = dir.join(file_name);
        match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(mut file) => {
                file.write_all(contents)?;
                info!(path = %path.display(), "wrote report");
                return Ok(path);
            }
            Err(e) if e.kind() == ErrorKind::AlreadyExists => attempt += 1,
            Err(e) => return Err(e.into()),
        }
    }
}

/// Markdown documents rendered from MiniJinja templates
pub struct MarkdownRenderer {
    output_dir: PathBuf,
    env: Environment<'static>,
}

impl MarkdownRenderer {
    pub fn new(output_dir: impl Into<PathBuf>) -> Result<Self> {
        let mut env = Environment::new();
        env.add_template("report", REPORT_TEMPLATE)?;
        env.add_template("summary", SUMMARY_TEMPLATE)?;
        Ok(Self {
            output_dir: output_dir.into(),
            env,
        })
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// Render a report to a string without touching the filesystem
    pub fn report_markdown(&self, report: &AnalysisReport) -> Result<String> {
        let stages: Vec<_> = report
            .stages()
            .iter()
            .map(|s| {
                json!({
                    "stage": s.stage.as_str(),
                    "status": format!("{:?}", s.status).to_lowercase(),
                    "score": fmt_score(s.score()),
                    "quality": format!("{:.2}", s.data_quality),
                    "attempts": s.attempts,
                    "elapsed_ms": s.elapsed_ms,
                    "failure": s.failure.as_ref().map(ToString::to_string).unwrap_or_default(),
                })
            })
            .collect();

        let ctx = json!({
            "company": report.request().company(),
            "ticker": report.ticker(),
            "outcome": report.outcome().to_string(),
            "rating": report.rating().label(),
            "score": fmt_score(report.overall_score()),
            "quality": format!("{:.2}", report.data_quality()),
            "depth": report.request().depth().as_str(),
            "deepened": report.deepened(),
            "generated_at": report.generated_at().to_rfc3339(),
            "reason": report.reason(),
            "recommendation": report.recommendation(),
            "stages": stages,
        });

        self.env
            .get_template("report")?
            .render(ctx)
            .map_err(|e| StockError::RenderError(format!("report {}: {e}", report.ticker())))
    }

    /// Render a batch summary to a string without touching the filesystem
    pub fn summary_markdown(&self, summary: &BatchSummary) -> Result<String> {
        let stats = summary.stats();
        let reports: Vec<_> = summary
            .reports()
            .iter()
            .map(|r| {
                json!({
                    "ticker": r.ticker(),
                    "company": r.request().company(),
                    "rating": r.rating().label(),
                    "score": fmt_score(r.overall_score()),
                    "quality": format!("{:.2}", r.data_quality()),
                })
            })
            .collect();
        let ratings: Vec<_> = stats
            .rating_distribution
            .iter()
            .map(|(rating, count)| (rating.label(), *count))
            .collect();

        let ctx = json!({
            "run_id": summary.run_id(),
            "strategy": summary.strategy().to_string(),
            "stats": &stats,
            "success_rate": format!("{:.1}%", stats.success_rate * 100.0),
            "average_score": fmt_score(stats.average_score),
            "waves": summary.waves_executed(),
            "cancelled": summary.is_cancelled(),
            "reports": reports,
            "failures": summary.failures(),
            "ratings": ratings,
        });

        self.env
            .get_template("summary")?
            .render(ctx)
            .map_err(|e| StockError::RenderError(format!("summary {}: {e}", summary.run_id())))
    }
}

impl ReportRenderer for MarkdownRenderer {
    fn render_report(&self, report: &AnalysisReport) -> Result<PathBuf> {
        let markdown = self.report_markdown(report)?;
        write_file(
            &self.output_dir,
            &report_stem(report),
            "md",
            markdown.as_bytes(),
        )
    }

    fn render_summary(&self, summary: &BatchSummary) -> Result<PathBuf> {
        let markdown = self.summary_markdown(summary)?;
        write_file(
            &self.output_dir,
            &summary_stem(summary),
            "md",
            markdown.as_bytes(),
        )
    }
}

/// Pretty-printed JSON export
pub struct JsonRenderer {
    output_dir: PathBuf,
}

impl JsonRenderer {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
        }
    }
}

impl ReportRenderer for JsonRenderer {
    fn render_report(&self, report: &AnalysisReport) -> Result<PathBuf> {
        let bytes = serde_json::to_vec_pretty(report)?;
        write_file(&self.output_dir, &report_stem(report), "json", &bytes)
    }

    fn render_summary(&self, summary: &BatchSummary) -> Result<PathBuf> {
        let bytes = serde_json::to_vec_pretty(&json!({
            "summary": summary,
            "stats": summary.stats(),
        }))?;
        write_file(
            &self.output_dir,
            &summary_stem(summary),
            "json",
            &bytes,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::summary::{ExecutionStrategy, ItemOutcome};
    use agent_core::{AnalysisRequest, Stage, StageResult, StageStatus};
    use chrono::Utc;

    fn sample_report() -> AnalysisReport {
        AnalysisReport::completed(
            AnalysisRequest::new("Apple Inc.", "AAPL"),
            vec![
                StageResult::completed(
                    Stage::Fundamental,
                    StageStatus::Ok,
                    json!({"score": 82.0}),
                    0.9,
                ),
                StageResult::completed(
                    Stage::Decision,
                    StageStatus::Ok,
                    json!({"recommendation": "Buy on weakness"}),
                    0.9,
                ),
            ],
            0.9,
            false,
        )
    }

    fn sample_summary() -> BatchSummary {
        let bad = AnalysisRequest::for_ticker("BAD");
        BatchSummary::assemble(
            "0123456789abcdef",
            ExecutionStrategy::Parallel,
            Utc::now(),
            1,
            false,
            vec![
                (AnalysisRequest::new("Apple Inc.", "AAPL"), ItemOutcome::Finished(sample_report())),
                (bad, ItemOutcome::Rejected("malformed ticker".to_string())),
            ],
        )
    }

    #[test]
    fn test_report_markdown() {
        let renderer = MarkdownRenderer::new("unused").unwrap();
        let markdown = renderer.report_markdown(&sample_report()).unwrap();

        assert!(markdown.starts_with("# Apple Inc. (AAPL)"));
        assert!(markdown.contains("| Rating | Buy |"));
        assert!(markdown.contains("| Overall score | 82.0 |"));
        assert!(markdown.contains("Buy on weakness"));
        assert!(markdown.contains("| fundamental | ok |"));
        assert!(!markdown.contains("Aborted:"));
    }

    #[test]
    fn test_aborted_report_markdown_shows_reason() {
        let report = AnalysisReport::aborted(
            AnalysisRequest::for_ticker("ZZZZ"),
            vec![],
            "unknown ticker",
            false,
        );
        let renderer = MarkdownRenderer::new("unused").unwrap();
        let markdown = renderer.report_markdown(&report).unwrap();

        assert!(markdown.contains("> Aborted: unknown ticker"));
        assert!(markdown.contains("| Rating | Unavailable |"));
    }

    #[test]
    fn test_summary_markdown() {
        let renderer = MarkdownRenderer::new("unused").unwrap();
        let markdown = renderer.summary_markdown(&sample_summary()).unwrap();

        assert!(markdown.contains("# Batch analysis 0123456789abcdef"));
        assert!(markdown.contains("| Succeeded | 1 |"));
        assert!(markdown.contains("| 2 | BAD | malformed ticker |"));
        assert!(markdown.contains("- Buy: 1"));
    }

    #[test]
    fn test_markdown_renderer_writes_files() {
        let dir = tempfile::tempdir().unwrap();
        let renderer = MarkdownRenderer::new(dir.path().join("reports")).unwrap();

        let path = renderer.render_report(&sample_report()).unwrap();
        assert!(path.starts_with(dir.path().join("reports")));
        assert_eq!(path.extension().unwrap(), "md");
        assert!(
            path.file_name()
                .unwrap()
                .to_string_lossy()
                .starts_with("AAPL_")
        );

        let path = renderer.render_summary(&sample_summary()).unwrap();
        assert!(
            path.file_name()
                .unwrap()
                .to_string_lossy()
                .starts_with("batch_01234567_")
        );
    }

    #[test]
    fn test_json_renderer_round_trips_report() {
        let dir = tempfile::tempdir().unwrap();
        let renderer = JsonRenderer::new(dir.path());

        let report = sample_report();
        let path = renderer.render_report(&report).unwrap();
        let restored: AnalysisReport =
            serde_json::from_slice(&std::fs::read(path).unwrap()).unwrap();
        assert_eq!(restored, report);

        let path = renderer.render_summary(&sample_summary()).unwrap();
        let value: serde_json::Value =
            serde_json::from_slice(&std::fs::read(path).unwrap()).unwrap();
        assert_eq!(value["stats"]["succeeded"], 1);
        assert_eq!(value["stats"]["failed"], 1);
    }

    #[test]
    fn test_same_ticker_twice_keeps_both_reports() {
        let dir = tempfile::tempdir().unwrap();
        let renderer = JsonRenderer::new(dir.path());
        let report = sample_report();

        let first = renderer.render_report(&report).unwrap();
        let second = renderer.render_report(&report).unwrap();

        assert_ne!(first, second);
        assert!(first.exists());
        assert!(second.exists());
        assert!(
            second
                .file_name()
                .unwrap()
                .to_string_lossy()
                .ends_with("_2.json")
        );
    }
}
