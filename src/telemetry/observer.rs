use crate::observability::ReplayObserver;
use crate::replay::accumulator::{PlannerEvent, QueryOutcome};
use crate::replay::RunEnd;
use crate::telemetry::store::{
    OutcomeRecord, PlannerEventRecord, RunArchiveStore, RunEndRecord, RunRecord, WriteOp,
};
use parking_lot::Mutex;
use std::path::Path;
use std::sync::Arc;

/// Observer that archives every appended row under a fresh run id.
pub struct ArchiveObserver {
    store: Arc<RunArchiveStore>,
    run_id: String,
    session_id: Mutex<Option<String>>,
}

impl ArchiveObserver {
    /// Register a new run in the archive.
    pub fn start(store: Arc<RunArchiveStore>, input_path: &Path) -> Self {
        let run_id = uuid::Uuid::new_v4().to_string();
        let (started_at, started_epoch_ms) = now_ts();
        store.submit(WriteOp::RunStarted(RunRecord {
            run_id: run_id.clone(),
            started_at,
            started_epoch_ms,
            input_path: input_path.display().to_string(),
        }));
        Self {
            store,
            run_id,
            session_id: Mutex::new(None),
        }
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }
}

fn now_ts() -> (String, i64) {
    let now = chrono::Utc::now();
    (now.to_rfc3339(), now.timestamp_millis())
}

fn end_state(end: &RunEnd) -> &'static str {
    match end {
        RunEnd::Completed => "completed",
        RunEnd::Sentinel { .. } => "sentinel",
        RunEnd::EndOfConversation { .. } => "end_of_conversation",
        RunEnd::Failed { .. } => "failed",
    }
}

impl ReplayObserver for ArchiveObserver {
    fn on_outcome(&self, outcome: &QueryOutcome) {
        {
            let mut session = self.session_id.lock();
            if session.is_none() {
                *session = Some(outcome.session_id.clone());
            }
        }
        let (ts, ts_epoch_ms) = now_ts();
        self.store.submit(WriteOp::Outcome(Box::new(OutcomeRecord {
            run_id: self.run_id.clone(),
            ts,
            ts_epoch_ms,
            outcome: outcome.clone(),
        })));
    }

    fn on_planner_event(&self, event: &PlannerEvent) {
        let (ts, ts_epoch_ms) = now_ts();
        self.store
            .submit(WriteOp::PlannerEvent(Box::new(PlannerEventRecord {
                run_id: self.run_id.clone(),
                ts,
                ts_epoch_ms,
                event: event.clone(),
            })));
    }

    fn on_run_end(&self, end: &RunEnd) {
        let (ended_at, _) = now_ts();
        let status = match end {
            RunEnd::Failed { message } => message.clone(),
            RunEnd::Sentinel { checkpoint } => checkpoint.display().to_string(),
            RunEnd::EndOfConversation {
                checkpoint: Some(path),
            } => path.display().to_string(),
            _ => String::new(),
        };
        self.store.submit(WriteOp::RunEnded(RunEndRecord {
            run_id: self.run_id.clone(),
            ended_at,
            session_id: self.session_id.lock().clone(),
            end_state: end_state(end).into(),
            status,
        }));
    }
}
