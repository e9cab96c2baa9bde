//! Per-run result tables and the summary statistics derived from them.

use serde::{Deserialize, Serialize};

/// One row per submitted query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryOutcome {
    pub serial: u64,
    pub query: String,
    pub response: String,
    pub elapsed_seconds: f64,
    pub session_id: String,
    pub response_length: usize,
}

impl QueryOutcome {
    /// `response_length` is derived from `response`, never supplied.
    pub fn new(
        serial: u64,
        query: impl Into<String>,
        response: impl Into<String>,
        elapsed_seconds: f64,
        session_id: impl Into<String>,
    ) -> Self {
        let response = response.into();
        let response_length = response.chars().count();
        Self {
            serial,
            query: query.into(),
            response,
            elapsed_seconds,
            session_id: session_id.into(),
            response_length,
        }
    }
}

/// One row per planner telemetry event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlannerEvent {
    pub serial: u64,
    pub query: String,
    pub step_kind: String,
    pub thought: String,
    pub tool: String,
    pub tool_type: String,
    pub arguments: String,
}

/// Descriptive statistics over `elapsed_seconds`.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct RunSummary {
    pub count: usize,
    pub mean: f64,
    pub median: f64,
    pub max: f64,
    pub min: f64,
    /// Population standard deviation.
    pub std_dev: f64,
    /// Pearson correlation of response length against latency; `None` when
    /// undefined (fewer than two rows or a constant column).
    pub correlation: Option<f64>,
}

impl RunSummary {
    pub fn compute(outcomes: &[QueryOutcome]) -> Self {
        if outcomes.is_empty() {
            return Self::default();
        }
        let times: Vec<f64> = outcomes.iter().map(|o| o.elapsed_seconds).collect();
        let n = times.len() as f64;
        let mean = times.iter().sum::<f64>() / n;
        let variance = times.iter().map(|t| (t - mean).powi(2)).sum::<f64>() / n;
        let lengths: Vec<f64> = outcomes.iter().map(|o| o.response_length as f64).collect();

        Self {
            count: outcomes.len(),
            mean,
            median: median(&times),
            max: times.iter().copied().fold(f64::NEG_INFINITY, f64::max),
            min: times.iter().copied().fold(f64::INFINITY, f64::min),
            std_dev: variance.sqrt(),
            correlation: pearson(&lengths, &times),
        }
    }
}

fn median(data: &[f64]) -> f64 {
    let mut sorted = data.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));

    let n = sorted.len();
    if n == 0 {
        return 0.0;
    }
    if n % 2 == 0 {
        (sorted[n / 2 - 1] + sorted[n / 2]) / 2.0
    } else {
        sorted[n / 2]
    }
}

fn pearson(xs: &[f64], ys: &[f64]) -> Option<f64> {
    if xs.len() < 2 || xs.len() != ys.len() {
        return None;
    }
    let n = xs.len() as f64;
    let mean_x = xs.iter().sum::<f64>() / n;
    let mean_y = ys.iter().sum::<f64>() / n;
    let mut cov = 0.0;
    let mut var_x = 0.0;
    let mut var_y = 0.0;
    for (x, y) in xs.iter().zip(ys) {
        let dx = x - mean_x;
        let dy = y - mean_y;
        cov += dx * dy;
        var_x += dx * dx;
        var_y += dy * dy;
    }
    if var_x == 0.0 || var_y == 0.0 {
        return None;
    }
    Some(cov / (var_x.sqrt() * var_y.sqrt()))
}

/// Planner steps grouped per query, in first-seen order.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlannerStepSummary {
    pub query: String,
    pub steps: usize,
    /// Step kinds in arrival order joined by `>>`.
    pub planner: String,
    /// Distinct non-empty tools joined by `, `.
    pub tools: String,
}

pub fn summarize_planner_steps(events: &[PlannerEvent]) -> Vec<PlannerStepSummary> {
    let mut groups: Vec<(String, Vec<&PlannerEvent>)> = Vec::new();
    for event in events {
        match groups.iter_mut().find(|(q, _)| *q == event.query) {
            Some((_, group)) => group.push(event),
            None => groups.push((event.query.clone(), vec![event])),
        }
    }
    groups
        .into_iter()
        .map(|(query, group)| {
            let planner = group
                .iter()
                .map(|e| e.step_kind.as_str())
                .collect::<Vec<_>>()
                .join(">>");
            let mut tools: Vec<&str> = Vec::new();
            for e in &group {
                if !e.tool.is_empty() && !tools.contains(&e.tool.as_str()) {
                    tools.push(&e.tool);
                }
            }
            PlannerStepSummary {
                query,
                steps: group.len(),
                planner,
                tools: tools.join(", "),
            }
        })
        .collect()
}

/// Append-only result tables for one run.
#[derive(Debug, Clone, Default)]
pub struct ResultAccumulator {
    outcomes: Vec<QueryOutcome>,
    planner_events: Vec<PlannerEvent>,
}

impl ResultAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an outcome with the next serial.
    pub fn push_outcome(
        &mut self,
        query: &str,
        response: &str,
        elapsed_seconds: f64,
        session_id: &str,
    ) -> &QueryOutcome {
        let serial = self.outcomes.len() as u64 + 1;
        self.outcomes.push(QueryOutcome::new(
            serial,
            query,
            response,
            elapsed_seconds,
            session_id,
        ));
        &self.outcomes[self.outcomes.len() - 1]
    }

    /// Append a planner event with the next serial from its own counter.
    pub fn push_planner_event(
        &mut self,
        query: &str,
        fields: crate::telemetry::planner::PlannerFields,
    ) -> &PlannerEvent {
        let serial = self.planner_events.len() as u64 + 1;
        self.planner_events.push(PlannerEvent {
            serial,
            query: query.to_string(),
            step_kind: fields.step_kind,
            thought: fields.thought,
            tool: fields.tool,
            tool_type: fields.tool_type,
            arguments: fields.arguments,
        });
        &self.planner_events[self.planner_events.len() - 1]
    }

    pub fn outcomes(&self) -> &[QueryOutcome] {
        &self.outcomes
    }

    pub fn planner_events(&self) -> &[PlannerEvent] {
        &self.planner_events
    }

    pub fn summary(&self) -> RunSummary {
        RunSummary::compute(&self.outcomes)
    }

    pub fn planner_summary(&self) -> Vec<PlannerStepSummary> {
        summarize_planner_steps(&self.planner_events)
    }

    pub fn is_empty(&self) -> bool {
        self.outcomes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::telemetry::planner::PlannerFields;

    fn approx(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    fn fields(kind: &str, tool: &str) -> PlannerFields {
        PlannerFields {
            step_kind: kind.into(),
            tool: tool.into(),
            ..PlannerFields::default()
        }
    }

    #[test]
    fn serials_are_contiguous_and_lengths_derived() {
        let mut acc = ResultAccumulator::new();
        for (i, reply) in ["a", "héllo", ""].iter().enumerate() {
            let row = acc.push_outcome("q", reply, 1.0, "s");
            assert_eq!(row.serial, i as u64 + 1);
            assert_eq!(row.response_length, reply.chars().count());
        }
        assert_eq!(acc.outcomes()[1].response_length, 5);
    }

    #[test]
    fn planner_serial_is_independent() {
        let mut acc = ResultAccumulator::new();
        acc.push_outcome("q1", "r", 1.0, "s");
        acc.push_outcome("q2", "r", 1.0, "s");
        let ev = acc.push_planner_event("q2", fields("DynamicPlanStepFinished", "t"));
        assert_eq!(ev.serial, 1);
    }

    #[test]
    fn empty_summary_is_zero() {
        let summary = ResultAccumulator::new().summary();
        assert_eq!(summary, RunSummary::default());
        assert_eq!(summary.correlation, None);
    }

    #[test]
    fn single_row_has_no_correlation() {
        let mut acc = ResultAccumulator::new();
        acc.push_outcome("q", "abc", 2.5, "s");
        let s = acc.summary();
        assert_eq!(s.count, 1);
        assert!(approx(s.mean, 2.5));
        assert!(approx(s.median, 2.5));
        assert!(approx(s.std_dev, 0.0));
        assert_eq!(s.correlation, None);
    }

    #[test]
    fn statistics_over_several_rows() {
        let mut acc = ResultAccumulator::new();
        acc.push_outcome("q1", "a", 1.0, "s");
        acc.push_outcome("q2", "aa", 2.0, "s");
        acc.push_outcome("q3", "aaa", 3.0, "s");
        acc.push_outcome("q4", "aaaa", 4.0, "s");
        let s = acc.summary();
        assert!(approx(s.mean, 2.5));
        assert!(approx(s.median, 2.5));
        assert!(approx(s.max, 4.0));
        assert!(approx(s.min, 1.0));
        assert!(approx(s.std_dev, 1.25f64.sqrt()));
        assert!(approx(s.correlation.unwrap(), 1.0));
    }

    #[test]
    fn negative_correlation() {
        let mut acc = ResultAccumulator::new();
        acc.push_outcome("q1", "aaa", 1.0, "s");
        acc.push_outcome("q2", "a", 3.0, "s");
        assert!(approx(acc.summary().correlation.unwrap(), -1.0));
    }

    #[test]
    fn constant_lengths_leave_correlation_undefined() {
        let mut acc = ResultAccumulator::new();
        acc.push_outcome("q1", "same", 1.0, "s");
        acc.push_outcome("q2", "same", 3.0, "s");
        assert_eq!(acc.summary().correlation, None);
    }

    #[test]
    fn summary_is_idempotent() {
        let mut acc = ResultAccumulator::new();
        acc.push_outcome("q1", "x", 0.7, "s");
        acc.push_outcome("q2", "xyz", 1.9, "s");
        acc.push_outcome("q3", "xy", 1.1, "s");
        assert_eq!(acc.summary(), acc.summary());
    }

    #[test]
    fn planner_summary_groups_by_query() {
        let mut acc = ResultAccumulator::new();
        acc.push_planner_event("q1", fields("DynamicPlanReceived", ""));
        acc.push_planner_event("q1", fields("DynamicPlanStepTriggered", "calc"));
        acc.push_planner_event("q2", fields("DynamicPlanStepTriggered", "search"));
        acc.push_planner_event("q1", fields("DynamicPlanStepFinished", "calc"));

        let summary = acc.planner_summary();
        assert_eq!(summary.len(), 2);
        assert_eq!(summary[0].query, "q1");
        assert_eq!(summary[0].steps, 3);
        assert_eq!(
            summary[0].planner,
            "DynamicPlanReceived>>DynamicPlanStepTriggered>>DynamicPlanStepFinished"
        );
        assert_eq!(summary[0].tools, "calc");
        assert_eq!(summary[1].tools, "search");
    }
}
