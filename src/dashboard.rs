//! Terminal rendering of replay snapshots.
//!
//! Progress snapshots print a single status line; the final snapshot of a
//! run prints the numeric widgets and the result tables selected by
//! [`DashboardConfig`]. The `render_*` functions return plain text so they
//! can be checked without a terminal; styling is applied only when printing.

use console::{style, Term};

use crate::config::DashboardConfig;
use crate::replay::accumulator::{PlannerEvent, PlannerStepSummary, QueryOutcome, RunSummary};
use crate::replay::{Snapshot, SnapshotReceiver};
use crate::telemetry::reader::RunRow;

const CELL_WIDTH: usize = 48;

pub struct Dashboard {
    config: DashboardConfig,
    term: Term,
}

impl Dashboard {
    pub fn new(config: DashboardConfig) -> Self {
        Self {
            config,
            term: Term::stdout(),
        }
    }

    /// Render snapshots until the sender is dropped. Returns the last one.
    pub async fn consume(&self, mut snapshots: SnapshotReceiver) -> Option<Snapshot> {
        let mut last = None;
        while let Some(snapshot) = snapshots.recv().await {
            self.present(&snapshot);
            last = Some(snapshot);
        }
        last
    }

    pub fn present(&self, snapshot: &Snapshot) {
        let status = if snapshot.status.starts_with("Error:") {
            style(&snapshot.status).red().bold()
        } else if snapshot.complete {
            style(&snapshot.status).green().bold()
        } else {
            style(&snapshot.status).cyan()
        };
        self.line(&status.to_string());

        if !snapshot.complete {
            return;
        }

        self.section("Latency");
        self.line(&render_stats(&snapshot.summary, &self.config));

        if self.config.show_latency_series && !snapshot.latency_series.is_empty() {
            self.section("Latency series");
            self.line(&render_latency_series(&snapshot.latency_series));
        }

        if !snapshot.outcomes.is_empty() {
            self.section("Results");
            self.line(&render_outcome_table(&snapshot.outcomes));
        }

        if self.config.show_planner_table && !snapshot.planner_events.is_empty() {
            if self.config.aggregate_planner_steps {
                self.section("Planner summary");
                self.line(&render_planner_summary(&snapshot.planner_summary));
            } else {
                self.section("Planner steps");
                self.line(&render_planner_table(&snapshot.planner_events));
            }
        }
    }

    fn section(&self, title: &str) {
        self.line(&format!("\n{}", style(title).bold().underlined()));
    }

    fn line(&self, text: &str) {
        if let Err(e) = self.term.write_line(text) {
            tracing::debug!("dashboard write failed: {e}");
        }
    }
}

pub fn render_stats(summary: &RunSummary, config: &DashboardConfig) -> String {
    let mut lines = vec![
        format!("  queries    {}", summary.count),
        format!("  mean       {:.3}s", summary.mean),
        format!("  median     {:.3}s", summary.median),
        format!("  max        {:.3}s", summary.max),
        format!("  min        {:.3}s", summary.min),
        format!("  deviation  {:.3}s", summary.std_dev),
    ];
    if config.show_correlation {
        let correlation = summary
            .correlation
            .map(|c| format!("{c:.3}"))
            .unwrap_or_else(|| "n/a".into());
        lines.push(format!("  length/latency correlation  {correlation}"));
    }
    lines.join("\n")
}

pub fn render_latency_series(series: &[(u64, f64)]) -> String {
    let max = series.iter().map(|(_, t)| *t).fold(0.0_f64, f64::max);
    series
        .iter()
        .map(|(serial, t)| {
            let width = if max > 0.0 {
                ((t / max) * 40.0).round() as usize
            } else {
                0
            };
            format!("  {serial:>4} {:<40} {t:.3}s", "#".repeat(width))
        })
        .collect::<Vec<_>>()
        .join("\n")
}

pub fn render_outcome_table(outcomes: &[QueryOutcome]) -> String {
    let rows = outcomes
        .iter()
        .map(|o| {
            vec![
                o.serial.to_string(),
                truncate(&o.query),
                truncate(&o.response),
                format!("{:.3}", o.elapsed_seconds),
                o.response_length.to_string(),
            ]
        })
        .collect::<Vec<_>>();
    render_table(&["Serial", "Query", "Response", "Time", "CharLen"], &rows)
}

pub fn render_planner_table(events: &[PlannerEvent]) -> String {
    let rows = events
        .iter()
        .map(|e| {
            vec![
                e.serial.to_string(),
                truncate(&e.query),
                e.step_kind.clone(),
                truncate(&e.thought),
                truncate(&e.tool),
                truncate(&e.arguments),
            ]
        })
        .collect::<Vec<_>>();
    render_table(
        &["Serial", "Query", "Step", "Thought", "Tool", "Arguments"],
        &rows,
    )
}

pub fn render_planner_summary(summary: &[PlannerStepSummary]) -> String {
    let rows = summary
        .iter()
        .map(|s| {
            vec![
                truncate(&s.query),
                s.steps.to_string(),
                s.planner.clone(),
                s.tools.clone(),
            ]
        })
        .collect::<Vec<_>>();
    render_table(&["Query", "Steps", "Planner", "Tools"], &rows)
}

pub fn render_run_list(runs: &[RunRow]) -> String {
    let rows = runs
        .iter()
        .map(|r| {
            vec![
                r.run_id.clone(),
                r.started_at.clone(),
                r.end_state.clone().unwrap_or_else(|| "running".into()),
                r.outcome_count.to_string(),
                r.session_id.clone().unwrap_or_default(),
            ]
        })
        .collect::<Vec<_>>();
    render_table(&["Run", "Started", "End", "Rows", "Conversation"], &rows)
}

fn render_table(header: &[&str], rows: &[Vec<String>]) -> String {
    let mut widths: Vec<usize> = header.iter().map(|h| h.chars().count()).collect();
    for row in rows {
        for (i, cell) in row.iter().enumerate() {
            widths[i] = widths[i].max(cell.chars().count());
        }
    }

    let mut out = Vec::with_capacity(rows.len() + 2);
    out.push(format_row(header.iter().copied(), &widths));
    out.push(
        widths
            .iter()
            .map(|w| "-".repeat(*w))
            .collect::<Vec<_>>()
            .join("-+-"),
    );
    for row in rows {
        out.push(format_row(row.iter().map(String::as_str), &widths));
    }
    out.join("\n")
}

fn format_row<'a>(cells: impl Iterator<Item = &'a str>, widths: &[usize]) -> String {
    cells
        .zip(widths)
        .map(|(cell, &w)| format!("{cell:<w$}"))
        .collect::<Vec<_>>()
        .join(" | ")
        .trim_end()
        .to_string()
}

/// Single-line cell text, cut to a fixed width.
fn truncate(text: &str) -> String {
    let flat: String = text
        .chars()
        .map(|c| if c == '\n' || c == '\r' { ' ' } else { c })
        .collect();
    if flat.chars().count() <= CELL_WIDTH {
        return flat;
    }
    let mut cut: String = flat.chars().take(CELL_WIDTH - 3).collect();
    cut.push_str("...");
    cut
}
