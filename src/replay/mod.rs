//! Query replay loop.
//!
//! Reads the query file, opens one agent session, submits every query in
//! order and records one [`QueryOutcome`](accumulator::QueryOutcome) per
//! query plus any planner telemetry. A [`Snapshot`] is pushed after each
//! query; the last snapshot of a run re-enables run control, whether the run
//! completed, hit a sentinel, was ended by the agent, or failed.
//!
//! Failures are never propagated out of [`ReplayLoop::run`]: they become
//! the status of the final snapshot and [`RunEnd::Failed`]. Nothing is
//! retried and no checkpoint is written on failure.

pub mod accumulator;
pub mod input;
pub mod snapshot;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use futures::StreamExt;
use tracing::{debug, error, info, warn};

use crate::agent::{Activity, ActivityType, AgentClient};
use crate::checkpoint::CheckpointWriter;
use crate::config::{Config, MalformedTelemetryPolicy};
use crate::error::{BenchError, Result};
use crate::observability::ReplayObserver;
use crate::telemetry::planner::PlannerStep;

use accumulator::ResultAccumulator;
use input::{QueryFile, QueryLine};
pub use snapshot::{snapshot_channel, Snapshot, SnapshotReceiver, SnapshotSender};

#[derive(Debug, Clone)]
pub struct RunOptions {
    pub output_dir: PathBuf,
    pub malformed_telemetry: MalformedTelemetryPolicy,
    pub checkpoint_on_end_of_conversation: bool,
}

impl RunOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            output_dir: config.output_dir(),
            malformed_telemetry: config.run.malformed_telemetry,
            checkpoint_on_end_of_conversation: config.run.checkpoint_on_end_of_conversation,
        }
    }
}

/// How a run ended.
#[derive(Debug, Clone, PartialEq)]
pub enum RunEnd {
    /// Input exhausted.
    Completed,
    /// `exit`/`quit` line reached; the checkpoint was written.
    Sentinel { checkpoint: PathBuf },
    /// The agent ended the conversation.
    EndOfConversation { checkpoint: Option<PathBuf> },
    Failed { message: String },
}

impl RunEnd {
    pub fn is_success(&self) -> bool {
        !matches!(self, Self::Failed { .. })
    }

    pub fn checkpoint(&self) -> Option<&Path> {
        match self {
            Self::Sentinel { checkpoint } => Some(checkpoint),
            Self::EndOfConversation { checkpoint } => checkpoint.as_deref(),
            _ => None,
        }
    }
}

/// Final state of a run, handed off to the caller.
#[derive(Debug)]
pub struct RunReport {
    pub session_id: Option<String>,
    pub total_lines: usize,
    pub end: RunEnd,
    pub results: ResultAccumulator,
}

enum QueryResult {
    Answered,
    EndOfConversation,
}

#[derive(Default)]
struct RunState {
    results: ResultAccumulator,
    session_id: Option<String>,
    total_lines: usize,
}

pub struct ReplayLoop {
    client: Arc<dyn AgentClient>,
    options: RunOptions,
    checkpoints: CheckpointWriter,
    observers: Vec<Arc<dyn ReplayObserver>>,
}

impl ReplayLoop {
    pub fn new(client: Arc<dyn AgentClient>, options: RunOptions) -> Self {
        let checkpoints = CheckpointWriter::new(options.output_dir.clone());
        Self {
            client,
            options,
            checkpoints,
            observers: Vec::new(),
        }
    }

    pub fn with_observer(mut self, observer: Arc<dyn ReplayObserver>) -> Self {
        self.observers.push(observer);
        self
    }

    /// Replay every query in `input`. Always returns a report; failures are
    /// reported through [`RunEnd::Failed`] and the final snapshot.
    pub async fn run(&self, input: &Path, snapshots: &SnapshotSender) -> RunReport {
        let mut state = RunState::default();
        emit(
            snapshots,
            Snapshot::capture(&state.results, "Starting run", false, false),
        )
        .await;

        let end = match self.drive(input, &mut state, snapshots).await {
            Ok(end) => end,
            Err(e) => {
                error!(error = %e, rows = state.results.outcomes().len(), "run failed");
                RunEnd::Failed {
                    message: e.to_string(),
                }
            }
        };

        let status = final_status(&end, &state);
        emit(
            snapshots,
            Snapshot::capture(&state.results, status, true, true),
        )
        .await;
        for observer in &self.observers {
            observer.on_run_end(&end);
        }

        RunReport {
            session_id: state.session_id,
            total_lines: state.total_lines,
            end,
            results: state.results,
        }
    }

    async fn drive(
        &self,
        input: &Path,
        state: &mut RunState,
        snapshots: &SnapshotSender,
    ) -> Result<RunEnd> {
        let file = QueryFile::load(input)?;
        state.total_lines = file.total_lines();

        let session_id = self.open_session().await?;
        state.session_id = Some(session_id.clone());
        info!(session_id = %session_id, total_lines = state.total_lines, "session opened");

        for line in file.iter() {
            let query = match line {
                QueryLine::Blank => continue,
                QueryLine::Sentinel => {
                    info!("exit requested");
                    let path = self
                        .checkpoints
                        .write(state.results.outcomes(), &session_id)?;
                    return Ok(RunEnd::Sentinel { checkpoint: path });
                }
                QueryLine::Query(q) => q,
            };
            info!(query = %query, "submitting query");

            match self.ask(query, &session_id, &mut state.results).await? {
                QueryResult::Answered => {}
                QueryResult::EndOfConversation => {
                    info!("end of conversation");
                    let checkpoint = if self.options.checkpoint_on_end_of_conversation {
                        Some(
                            self.checkpoints
                                .write(state.results.outcomes(), &session_id)?,
                        )
                    } else {
                        None
                    };
                    return Ok(RunEnd::EndOfConversation { checkpoint });
                }
            }

            let status = format!(
                "Processing {} of {} records.",
                state.results.outcomes().len(),
                state.total_lines
            );
            emit(
                snapshots,
                Snapshot::capture(&state.results, status, false, false),
            )
            .await;
        }

        Ok(RunEnd::Completed)
    }

    /// Consume the start stream; the session id is taken from the last
    /// activity that carries one, else from the client's hint.
    async fn open_session(&self) -> Result<String> {
        let start = self.client.start_conversation().await?;
        let mut activities = start.activities;
        let mut session_id = None;

        while let Some(activity) = activities.next().await {
            let activity = activity.map_err(|e| BenchError::session(e.to_string()))?;
            if let Some(text) = activity.text.as_deref() {
                info!(text = %text, "suggested action");
            }
            log_suggestions(&activity);
            if let Some(id) = activity.conversation_id() {
                session_id = Some(id.to_string());
            }
        }

        session_id
            .or(start.conversation_id_hint)
            .ok_or_else(|| BenchError::session("agent did not report a conversation id"))
    }

    async fn ask(
        &self,
        query: &str,
        session_id: &str,
        results: &mut ResultAccumulator,
    ) -> Result<QueryResult> {
        let started = Instant::now();
        let mut replies = self.client.ask_question(query, session_id).await?;
        let mut response = String::new();

        while let Some(reply) = replies.next().await {
            let reply = reply?;
            match &reply.activity_type {
                ActivityType::Event => self.record_telemetry(query, &reply, results)?,
                ActivityType::Message => {
                    if let Some(text) = &reply.text {
                        debug!(text = %text, "agent reply");
                        response = text.clone();
                    }
                    log_suggestions(&reply);
                }
                ActivityType::EndOfConversation => return Ok(QueryResult::EndOfConversation),
                ActivityType::Other(kind) => debug!(kind = %kind, "ignoring activity"),
            }
        }

        let elapsed = started.elapsed().as_secs_f64();
        let outcome = results.push_outcome(query, &response, elapsed, session_id);
        for observer in &self.observers {
            observer.on_outcome(outcome);
        }
        Ok(QueryResult::Answered)
    }

    fn record_telemetry(
        &self,
        query: &str,
        reply: &Activity,
        results: &mut ResultAccumulator,
    ) -> Result<()> {
        debug!(value_type = ?reply.value_type, "telemetry event");
        let step = match PlannerStep::from_activity(reply) {
            Ok(step) => step,
            Err(e) => match self.options.malformed_telemetry {
                MalformedTelemetryPolicy::Skip => {
                    warn!(error = %e, "skipping malformed telemetry");
                    return Ok(());
                }
                MalformedTelemetryPolicy::Abort => return Err(e),
            },
        };
        match step.fields() {
            Some(fields) => {
                let event = results.push_planner_event(query, fields);
                for observer in &self.observers {
                    observer.on_planner_event(event);
                }
            }
            None => debug!(kind = %step.kind(), "ignoring unknown telemetry"),
        }
        Ok(())
    }
}

fn log_suggestions(activity: &Activity) {
    for title in activity.suggestion_titles() {
        info!(title = %title, "suggested follow-up");
    }
}

fn final_status(end: &RunEnd, state: &RunState) -> String {
    match end {
        RunEnd::Completed => format!(
            "Completed {} of {} records.",
            state.results.outcomes().len(),
            state.total_lines
        ),
        RunEnd::Sentinel { checkpoint } => {
            format!("Exit requested. Results saved to {}.", checkpoint.display())
        }
        RunEnd::EndOfConversation {
            checkpoint: Some(path),
        } => format!("End of conversation. Results saved to {}.", path.display()),
        RunEnd::EndOfConversation { checkpoint: None } => "End of conversation.".into(),
        RunEnd::Failed { message } => format!("Error: {message}"),
    }
}

/// The consumer may have gone away; the run continues regardless.
async fn emit(snapshots: &SnapshotSender, snapshot: Snapshot) {
    if snapshots.send(snapshot).await.is_err() {
        debug!("snapshot receiver dropped");
    }
}
