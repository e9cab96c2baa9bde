use crate::replay::accumulator::{PlannerEvent, QueryOutcome};
use crate::replay::RunEnd;

/// Receives every row the replay loop appends, in append order.
///
/// Called synchronously from the loop; implementations must not block.
pub trait ReplayObserver: Send + Sync {
    fn on_outcome(&self, outcome: &QueryOutcome);

    fn on_planner_event(&self, event: &PlannerEvent);

    fn on_run_end(&self, _end: &RunEnd) {}
}

/// Emits one structured log line per appended row.
#[derive(Debug, Default)]
pub struct LogObserver;

impl ReplayObserver for LogObserver {
    fn on_outcome(&self, outcome: &QueryOutcome) {
        tracing::info!(
            serial = outcome.serial,
            elapsed_seconds = outcome.elapsed_seconds,
            response_length = outcome.response_length,
            "query answered"
        );
    }

    fn on_planner_event(&self, event: &PlannerEvent) {
        tracing::debug!(
            serial = event.serial,
            step_kind = %event.step_kind,
            tool = %event.tool,
            "planner step"
        );
    }

    fn on_run_end(&self, end: &RunEnd) {
        tracing::info!(end = ?end, "run finished");
    }
}
