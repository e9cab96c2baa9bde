use super::accumulator::{
    PlannerEvent, PlannerStepSummary, QueryOutcome, ResultAccumulator, RunSummary,
};
use serde::Serialize;
use tokio::sync::mpsc;

/// Point-in-time copy of a run, handed to the renderer.
#[derive(Debug, Clone, Serialize)]
pub struct Snapshot {
    /// Whether a new run may be started from the host.
    pub run_control_enabled: bool,
    pub status: String,
    pub summary: RunSummary,
    pub outcomes: Vec<QueryOutcome>,
    /// `(serial, elapsed_seconds)` pairs for latency plots.
    pub latency_series: Vec<(u64, f64)>,
    pub planner_events: Vec<PlannerEvent>,
    pub planner_summary: Vec<PlannerStepSummary>,
    /// Set on the last snapshot of a run.
    pub complete: bool,
}

impl Snapshot {
    pub fn capture(
        results: &ResultAccumulator,
        status: impl Into<String>,
        run_control_enabled: bool,
        complete: bool,
    ) -> Self {
        Self {
            run_control_enabled,
            status: status.into(),
            summary: results.summary(),
            outcomes: results.outcomes().to_vec(),
            latency_series: results
                .outcomes()
                .iter()
                .map(|o| (o.serial, o.elapsed_seconds))
                .collect(),
            planner_events: results.planner_events().to_vec(),
            planner_summary: results.planner_summary(),
            complete,
        }
    }
}

/// Sending half used by the replay loop.
pub type SnapshotSender = mpsc::Sender<Snapshot>;
pub type SnapshotReceiver = mpsc::Receiver<Snapshot>;

pub fn snapshot_channel(capacity: usize) -> (SnapshotSender, SnapshotReceiver) {
    mpsc::channel(capacity.max(1))
}
