//! Drives the replay loop end to end against a scripted in-memory agent.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use futures::stream;
use parking_lot::Mutex;
use serde_json::json;
use tempfile::TempDir;

use copilot_bench::agent::{Activity, ActivityStream, AgentClient, ConversationStart};
use copilot_bench::checkpoint::read_checkpoint;
use copilot_bench::config::MalformedTelemetryPolicy;
use copilot_bench::observability::ReplayObserver;
use copilot_bench::replay::accumulator::{PlannerEvent, QueryOutcome};
use copilot_bench::replay::{snapshot_channel, ReplayLoop, RunEnd, RunOptions, Snapshot};
use copilot_bench::{BenchError, Result};

enum Reply {
    Activities(Vec<Activity>),
    Fail(&'static str),
}

struct ScriptedAgent {
    greeting: Vec<Activity>,
    replies: Mutex<VecDeque<Reply>>,
    asked: Mutex<Vec<String>>,
}

impl ScriptedAgent {
    fn new(replies: Vec<Reply>) -> Self {
        Self {
            greeting: vec![Activity::message("Hello, how can I help?")
                .with_conversation("conv-1")
                .with_suggestions(["Check order status"])],
            replies: Mutex::new(replies.into()),
            asked: Mutex::new(Vec::new()),
        }
    }

    fn asked(&self) -> Vec<String> {
        self.asked.lock().clone()
    }
}

fn stream_of(activities: Vec<Activity>) -> ActivityStream {
    Box::pin(stream::iter(activities.into_iter().map(Ok)))
}

#[async_trait]
impl AgentClient for ScriptedAgent {
    async fn start_conversation(&self) -> Result<ConversationStart> {
        Ok(ConversationStart {
            conversation_id_hint: None,
            activities: stream_of(self.greeting.clone()),
        })
    }

    async fn ask_question(&self, query: &str, conversation_id: &str) -> Result<ActivityStream> {
        assert_eq!(conversation_id, "conv-1");
        self.asked.lock().push(query.to_string());
        match self.replies.lock().pop_front() {
            Some(Reply::Activities(activities)) => Ok(stream_of(activities)),
            Some(Reply::Fail(message)) => Err(BenchError::transport(message)),
            None => Ok(stream_of(vec![Activity::message("ok")])),
        }
    }
}

#[derive(Default)]
struct RecordingObserver {
    outcomes: Mutex<Vec<u64>>,
    planner_events: Mutex<Vec<String>>,
    ends: Mutex<Vec<RunEnd>>,
}

impl ReplayObserver for RecordingObserver {
    fn on_outcome(&self, outcome: &QueryOutcome) {
        self.outcomes.lock().push(outcome.serial);
    }

    fn on_planner_event(&self, event: &PlannerEvent) {
        self.planner_events.lock().push(event.step_kind.clone());
    }

    fn on_run_end(&self, end: &RunEnd) {
        self.ends.lock().push(end.clone());
    }
}

struct Harness {
    dir: TempDir,
    input: PathBuf,
}

impl Harness {
    fn new(queries: &str) -> Self {
        let dir = TempDir::new().unwrap();
        let input = dir.path().join("input.txt");
        std::fs::write(&input, queries).unwrap();
        Self { dir, input }
    }

    fn output_dir(&self) -> PathBuf {
        self.dir.path().join("out")
    }

    fn options(&self) -> RunOptions {
        RunOptions {
            output_dir: self.output_dir(),
            malformed_telemetry: MalformedTelemetryPolicy::Skip,
            checkpoint_on_end_of_conversation: false,
        }
    }

    fn checkpoints(&self) -> Vec<PathBuf> {
        match std::fs::read_dir(self.output_dir()) {
            Ok(entries) => entries.map(|e| e.unwrap().path()).collect(),
            Err(_) => Vec::new(),
        }
    }
}

async fn run_collecting(
    replay: &ReplayLoop,
    input: &Path,
) -> (copilot_bench::RunReport, Vec<Snapshot>) {
    let (tx, mut rx) = snapshot_channel(64);
    let report = replay.run(input, &tx).await;
    drop(tx);
    let mut snapshots = Vec::new();
    while let Some(snapshot) = rx.recv().await {
        snapshots.push(snapshot);
    }
    (report, snapshots)
}

#[tokio::test]
async fn sentinel_stops_run_and_writes_one_checkpoint() {
    let harness = Harness::new("hello\nworld\nexit\nnever sent\n");
    let agent = Arc::new(ScriptedAgent::new(vec![
        Reply::Activities(vec![Activity::message("hi there")]),
        Reply::Activities(vec![Activity::message("round"), Activity::message("world!")]),
    ]));
    let replay = ReplayLoop::new(agent.clone(), harness.options());

    let (report, snapshots) = run_collecting(&replay, &harness.input).await;

    assert_eq!(agent.asked(), vec!["hello", "world"]);
    assert_eq!(report.session_id.as_deref(), Some("conv-1"));
    assert_eq!(report.total_lines, 4);

    let outcomes = report.results.outcomes();
    assert_eq!(outcomes.len(), 2);
    assert_eq!(outcomes[0].serial, 1);
    assert_eq!(outcomes[1].response, "world!", "last message wins");
    assert_eq!(outcomes[1].response_length, 6);

    let checkpoint = match &report.end {
        RunEnd::Sentinel { checkpoint } => checkpoint.clone(),
        other => panic!("expected sentinel, got {other:?}"),
    };
    assert_eq!(harness.checkpoints(), vec![checkpoint.clone()]);
    let name = checkpoint.file_name().unwrap().to_string_lossy().to_string();
    assert!(name.starts_with("conv-1_") && name.ends_with(".csv"));
    assert_eq!(read_checkpoint(&checkpoint).unwrap(), outcomes.to_vec());

    let statuses: Vec<&str> = snapshots.iter().map(|s| s.status.as_str()).collect();
    assert_eq!(statuses[0], "Starting run");
    assert!(statuses.contains(&"Processing 1 of 4 records."));
    assert!(statuses.contains(&"Processing 2 of 4 records."));
    let last = snapshots.last().unwrap();
    assert!(last.complete && last.run_control_enabled);
    assert!(last.status.starts_with("Exit requested. Results saved to"));
    assert!(snapshots[..snapshots.len() - 1]
        .iter()
        .all(|s| !s.run_control_enabled));
}

#[tokio::test]
async fn blank_lines_are_skipped_and_no_checkpoint_without_sentinel() {
    let harness = Harness::new("\n  first  \n\n\nsecond\n");
    let agent = Arc::new(ScriptedAgent::new(Vec::new()));
    let replay = ReplayLoop::new(agent.clone(), harness.options());

    let (report, snapshots) = run_collecting(&replay, &harness.input).await;

    assert_eq!(agent.asked(), vec!["first", "second"]);
    assert_eq!(report.end, RunEnd::Completed);
    let serials: Vec<u64> = report.results.outcomes().iter().map(|o| o.serial).collect();
    assert_eq!(serials, vec![1, 2]);
    assert!(harness.checkpoints().is_empty());
    assert_eq!(
        snapshots.last().unwrap().status,
        "Completed 2 of 5 records."
    );
}

#[tokio::test]
async fn empty_input_yields_zero_summary() {
    let harness = Harness::new("\n\n");
    let agent = Arc::new(ScriptedAgent::new(Vec::new()));
    let replay = ReplayLoop::new(agent.clone(), harness.options());

    let (report, snapshots) = run_collecting(&replay, &harness.input).await;

    assert!(agent.asked().is_empty());
    assert!(report.results.is_empty());
    let summary = snapshots.last().unwrap().summary;
    assert_eq!(summary.count, 0);
    assert_eq!(summary.mean, 0.0);
    assert_eq!(summary.max, 0.0);
    assert_eq!(summary.correlation, None);
}

#[tokio::test]
async fn planner_events_are_recorded_against_their_query() {
    let harness = Harness::new("what is 2+2\n");
    let agent = Arc::new(ScriptedAgent::new(vec![Reply::Activities(vec![
        Activity::event(
            "DynamicPlanReceived",
            json!({"toolDefinitions": [{"displayName": "Calc", "description": "math"}]}),
        ),
        Activity::event(
            "DynamicPlanStepTriggered",
            json!({"thought": "use calculator", "taskDialogId": "tool-1", "type": "action"}),
        ),
        Activity::event(
            "DynamicPlanStepBindUpdate",
            json!({"taskDialogId": "tool-1", "arguments": {"expr": "2+2"}}),
        ),
        Activity::event("SomethingElse", json!({})),
        Activity::message("4"),
    ])]));
    let observer = Arc::new(RecordingObserver::default());
    let replay = ReplayLoop::new(agent, harness.options()).with_observer(observer.clone());

    let (report, _) = run_collecting(&replay, &harness.input).await;

    let events = report.results.planner_events();
    assert_eq!(events.len(), 3, "unknown kinds are not recorded");
    assert!(events.iter().all(|e| e.query == "what is 2+2"));

    let triggered = &events[1];
    assert_eq!(triggered.step_kind, "DynamicPlanStepTriggered");
    assert_eq!(triggered.thought, "use calculator");
    assert_eq!(triggered.tool, "tool-1");
    assert_eq!(triggered.tool_type, "action");
    assert_eq!(events[2].arguments, r#"{"expr":"2+2"}"#);
    assert_eq!(
        events[0].thought,
        "displayName: Calc, description: math"
    );

    assert_eq!(observer.outcomes.lock().clone(), vec![1]);
    assert_eq!(observer.planner_events.lock().len(), 3);
    assert_eq!(observer.ends.lock().clone(), vec![RunEnd::Completed]);
    assert_eq!(report.results.planner_summary()[0].tools, "tool-1");
}

#[tokio::test]
async fn transport_failure_keeps_earlier_rows_and_reports_error() {
    let harness = Harness::new("one\ntwo\nthree\n");
    let agent = Arc::new(ScriptedAgent::new(vec![
        Reply::Activities(vec![Activity::message("first answer")]),
        Reply::Fail("connection reset"),
    ]));
    let observer = Arc::new(RecordingObserver::default());
    let replay = ReplayLoop::new(agent.clone(), harness.options()).with_observer(observer.clone());

    let (report, snapshots) = run_collecting(&replay, &harness.input).await;

    assert_eq!(agent.asked(), vec!["one", "two"]);
    assert_eq!(report.results.outcomes().len(), 1);
    assert!(!report.end.is_success());
    assert!(harness.checkpoints().is_empty());

    let last = snapshots.last().unwrap();
    assert!(last.status.starts_with("Error:"));
    assert!(last.status.contains("connection reset"));
    assert!(last.run_control_enabled);
    assert_eq!(last.outcomes.len(), 1);
    assert_eq!(last.summary.count, 1);
    let answered = report.results.outcomes()[0].elapsed_seconds;
    assert_eq!(last.summary.mean, answered);
    assert_eq!(last.summary.max, answered);
    assert_eq!(last.latency_series, vec![(1, answered)]);
    assert!(matches!(observer.ends.lock()[0], RunEnd::Failed { .. }));
}

#[tokio::test]
async fn end_of_conversation_stops_without_checkpoint_by_default() {
    let harness = Harness::new("one\ntwo\nthree\n");
    let agent = Arc::new(ScriptedAgent::new(vec![
        Reply::Activities(vec![Activity::message("fine")]),
        Reply::Activities(vec![
            Activity::message("goodbye"),
            Activity::end_of_conversation(),
        ]),
    ]));
    let replay = ReplayLoop::new(agent.clone(), harness.options());

    let (report, snapshots) = run_collecting(&replay, &harness.input).await;

    assert_eq!(agent.asked(), vec!["one", "two"]);
    assert_eq!(report.end, RunEnd::EndOfConversation { checkpoint: None });
    assert!(report.end.is_success());
    assert_eq!(
        report.results.outcomes().len(),
        1,
        "the interrupted query gets no row"
    );
    assert!(harness.checkpoints().is_empty());
    assert_eq!(snapshots.last().unwrap().status, "End of conversation.");
}

#[tokio::test]
async fn end_of_conversation_can_write_checkpoint() {
    let harness = Harness::new("one\ntwo\n");
    let agent = Arc::new(ScriptedAgent::new(vec![
        Reply::Activities(vec![Activity::message("fine")]),
        Reply::Activities(vec![Activity::end_of_conversation()]),
    ]));
    let mut options = harness.options();
    options.checkpoint_on_end_of_conversation = true;
    let replay = ReplayLoop::new(agent, options);

    let (report, _) = run_collecting(&replay, &harness.input).await;

    let checkpoint = report.end.checkpoint().unwrap().to_path_buf();
    assert_eq!(harness.checkpoints(), vec![checkpoint.clone()]);
    assert_eq!(read_checkpoint(&checkpoint).unwrap().len(), 1);
}

fn malformed_reply() -> Reply {
    Reply::Activities(vec![
        Activity::event("DynamicPlanStepTriggered", json!({"thought": "no id"})),
        Activity::message("answer"),
    ])
}

#[tokio::test]
async fn malformed_telemetry_is_skipped_by_default() {
    let harness = Harness::new("q\n");
    let agent = Arc::new(ScriptedAgent::new(vec![malformed_reply()]));
    let replay = ReplayLoop::new(agent, harness.options());

    let (report, _) = run_collecting(&replay, &harness.input).await;

    assert_eq!(report.end, RunEnd::Completed);
    assert!(report.results.planner_events().is_empty());
    assert_eq!(report.results.outcomes()[0].response, "answer");
}

#[tokio::test]
async fn malformed_telemetry_aborts_when_configured() {
    let harness = Harness::new("q\n");
    let agent = Arc::new(ScriptedAgent::new(vec![malformed_reply()]));
    let mut options = harness.options();
    options.malformed_telemetry = MalformedTelemetryPolicy::Abort;
    let replay = ReplayLoop::new(agent, options);

    let (report, _) = run_collecting(&replay, &harness.input).await;

    match &report.end {
        RunEnd::Failed { message } => assert!(message.contains("taskDialogId")),
        other => panic!("expected failure, got {other:?}"),
    }
    assert!(report.results.outcomes().is_empty());
}

#[tokio::test]
async fn missing_input_file_fails_before_session() {
    let harness = Harness::new("");
    let agent = Arc::new(ScriptedAgent::new(Vec::new()));
    let replay = ReplayLoop::new(agent.clone(), harness.options());

    let missing = harness.dir.path().join("missing.txt");
    let (report, snapshots) = run_collecting(&replay, &missing).await;

    assert!(agent.asked().is_empty());
    assert!(report.session_id.is_none());
    match &report.end {
        RunEnd::Failed { message } => assert!(message.contains("missing.txt")),
        other => panic!("expected failure, got {other:?}"),
    }
    assert!(snapshots.last().unwrap().status.starts_with("Error:"));
}
