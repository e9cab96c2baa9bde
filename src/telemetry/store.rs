use crate::replay::accumulator::{PlannerEvent, QueryOutcome};
use crate::telemetry::schema;
use anyhow::{Context, Result};
use rusqlite::Connection;
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, SyncSender, TrySendError};
use std::thread;
use std::time::Duration;

pub const DB_FILE: &str = "runs.db";

/// Row for the `runs` table, written when a run starts.
#[derive(Debug, Clone)]
pub struct RunRecord {
    pub run_id: String,
    pub started_at: String,
    pub started_epoch_ms: i64,
    pub input_path: String,
}

/// Completion details for a run.
#[derive(Debug, Clone)]
pub struct RunEndRecord {
    pub run_id: String,
    pub ended_at: String,
    pub session_id: Option<String>,
    pub end_state: String,
    pub status: String,
}

/// An outcome row tagged with its run.
#[derive(Debug, Clone)]
pub struct OutcomeRecord {
    pub run_id: String,
    pub ts: String,
    pub ts_epoch_ms: i64,
    pub outcome: QueryOutcome,
}

/// A planner event row tagged with its run.
#[derive(Debug, Clone)]
pub struct PlannerEventRecord {
    pub run_id: String,
    pub ts: String,
    pub ts_epoch_ms: i64,
    pub event: PlannerEvent,
}

/// Operations the writer thread can perform.
pub enum WriteOp {
    RunStarted(RunRecord),
    Outcome(Box<OutcomeRecord>),
    PlannerEvent(Box<PlannerEventRecord>),
    RunEnded(RunEndRecord),
    Shutdown,
}

/// Run archive backed by a dedicated SQLite writer thread.
pub struct RunArchiveStore {
    sender: Option<SyncSender<WriteOp>>,
    join_handle: Option<thread::JoinHandle<()>>,
    db_path: PathBuf,
}

impl RunArchiveStore {
    /// Open (or create) the archive at `db_dir/runs.db`.
    pub fn open(db_dir: &Path, buffer_capacity: usize) -> Result<Self> {
        std::fs::create_dir_all(db_dir)
            .with_context(|| format!("creating archive dir: {}", db_dir.display()))?;

        let db_path = db_dir.join(DB_FILE);
        let conn = Connection::open(&db_path)
            .with_context(|| format!("opening archive db: {}", db_path.display()))?;

        conn.execute_batch(schema::PRAGMAS)
            .context("archive PRAGMA setup")?;
        conn.execute_batch(schema::RUNS_DDL).context("runs DDL")?;
        conn.execute_batch(schema::QUERY_OUTCOMES_DDL)
            .context("query_outcomes DDL")?;
        conn.execute_batch(schema::PLANNER_EVENTS_DDL)
            .context("planner_events DDL")?;

        let (tx, rx) = mpsc::sync_channel::<WriteOp>(buffer_capacity.max(1));

        let handle = thread::Builder::new()
            .name("archive-writer".into())
            .spawn(move || writer_loop(conn, rx))
            .context("spawning archive writer thread")?;

        Ok(Self {
            sender: Some(tx),
            join_handle: Some(handle),
            db_path,
        })
    }

    /// Non-blocking submit. Drops with a warning if the channel is full.
    pub fn submit(&self, op: WriteOp) {
        if let Some(ref sender) = self.sender {
            if let Err(TrySendError::Full(_)) = sender.try_send(op) {
                tracing::warn!("archive channel full, dropping record");
            }
        }
    }

    /// Path to the underlying database file.
    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    /// Graceful shutdown: signal the writer thread and wait for it to finish.
    pub fn shutdown(&mut self) {
        if let Some(sender) = self.sender.take() {
            let _ = sender.try_send(WriteOp::Shutdown);
            // Dropping the sender lets the writer see a disconnect even when
            // the Shutdown message did not fit.
            drop(sender);
        }
        if let Some(handle) = self.join_handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for RunArchiveStore {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Writer thread main loop: batches writes in transactions.
fn writer_loop(conn: Connection, rx: mpsc::Receiver<WriteOp>) {
    let mut batch: Vec<WriteOp> = Vec::with_capacity(16);

    loop {
        match rx.recv() {
            Ok(WriteOp::Shutdown) | Err(_) => break,
            Ok(op) => batch.push(op),
        }

        while batch.len() < 16 {
            match rx.try_recv() {
                Ok(WriteOp::Shutdown) | Err(mpsc::TryRecvError::Disconnected) => {
                    flush_batch(&conn, &batch);
                    return;
                }
                Ok(op) => batch.push(op),
                Err(mpsc::TryRecvError::Empty) => break,
            }
        }

        // A lone row usually precedes more from the same query; wait briefly.
        if batch.len() == 1 {
            match rx.recv_timeout(Duration::from_millis(250)) {
                Ok(WriteOp::Shutdown) => {
                    flush_batch(&conn, &batch);
                    return;
                }
                Ok(op) => batch.push(op),
                Err(_) => {}
            }
        }

        flush_batch(&conn, &batch);
        batch.clear();
    }
}

fn flush_batch(conn: &Connection, batch: &[WriteOp]) {
    if batch.is_empty() {
        return;
    }
    if let Err(e) = conn.execute_batch("BEGIN") {
        tracing::error!("archive BEGIN failed: {e}");
        return;
    }
    for op in batch {
        let result = match op {
            WriteOp::RunStarted(run) => insert_run(conn, run),
            WriteOp::Outcome(rec) => insert_outcome(conn, rec),
            WriteOp::PlannerEvent(rec) => insert_planner_event(conn, rec),
            WriteOp::RunEnded(end) => update_run_end(conn, end),
            WriteOp::Shutdown => Ok(()),
        };
        if let Err(e) = result {
            tracing::error!("archive write failed: {e}");
        }
    }
    if let Err(e) = conn.execute_batch("COMMIT") {
        tracing::error!("archive COMMIT failed: {e}");
    }
}

fn insert_run(conn: &Connection, r: &RunRecord) -> Result<()> {
    conn.execute(
        "INSERT OR IGNORE INTO runs (run_id, started_at, started_epoch_ms, input_path)
         VALUES (?1, ?2, ?3, ?4)",
        rusqlite::params![r.run_id, r.started_at, r.started_epoch_ms, r.input_path],
    )?;
    Ok(())
}

fn update_run_end(conn: &Connection, e: &RunEndRecord) -> Result<()> {
    conn.execute(
        "UPDATE runs SET ended_at = ?2, session_id = COALESCE(?3, session_id),
                         end_state = ?4, status = ?5
         WHERE run_id = ?1",
        rusqlite::params![e.run_id, e.ended_at, e.session_id, e.end_state, e.status],
    )?;
    Ok(())
}

fn insert_outcome(conn: &Connection, r: &OutcomeRecord) -> Result<()> {
    let o = &r.outcome;
    conn.execute(
        "INSERT INTO query_outcomes (
            run_id, ts, ts_epoch_ms, session_id, serial, query, response,
            elapsed_seconds, response_length
        ) VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9)",
        rusqlite::params![
            r.run_id,
            r.ts,
            r.ts_epoch_ms,
            o.session_id,
            i64::try_from(o.serial).unwrap_or(i64::MAX),
            o.query,
            o.response,
            o.elapsed_seconds,
            i64::try_from(o.response_length).unwrap_or(i64::MAX),
        ],
    )?;
    Ok(())
}

fn insert_planner_event(conn: &Connection, r: &PlannerEventRecord) -> Result<()> {
    let e = &r.event;
    conn.execute(
        "INSERT INTO planner_events (
            run_id, ts, ts_epoch_ms, serial, query, step_kind, thought, tool,
            tool_type, arguments
        ) VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10)",
        rusqlite::params![
            r.run_id,
            r.ts,
            r.ts_epoch_ms,
            i64::try_from(e.serial).unwrap_or(i64::MAX),
            e.query,
            e.step_kind,
            e.thought,
            e.tool,
            e.tool_type,
            e.arguments,
        ],
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn outcome_record(run_id: &str, serial: u64) -> WriteOp {
        WriteOp::Outcome(Box::new(OutcomeRecord {
            run_id: run_id.into(),
            ts: "2026-01-01T00:00:00Z".into(),
            ts_epoch_ms: 1_767_225_600_000,
            outcome: QueryOutcome::new(serial, "hello", "hi", 0.5, "conv-1"),
        }))
    }

    fn count(db: &Path, table: &str) -> i64 {
        let conn = Connection::open(db).unwrap();
        conn.query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |r| r.get(0))
            .unwrap()
    }

    #[test]
    fn store_open_and_insert_outcome() {
        let tmp = TempDir::new().unwrap();
        let store = RunArchiveStore::open(tmp.path(), 10).unwrap();
        store.submit(outcome_record("run-1", 1));
        let db = store.db_path().to_path_buf();
        drop(store);

        assert_eq!(count(&db, "query_outcomes"), 1);
    }

    #[test]
    fn run_end_updates_run_row() {
        let tmp = TempDir::new().unwrap();
        let store = RunArchiveStore::open(tmp.path(), 10).unwrap();
        store.submit(WriteOp::RunStarted(RunRecord {
            run_id: "run-1".into(),
            started_at: "2026-01-01T00:00:00Z".into(),
            started_epoch_ms: 1,
            input_path: "data/input.txt".into(),
        }));
        store.submit(WriteOp::RunEnded(RunEndRecord {
            run_id: "run-1".into(),
            ended_at: "2026-01-01T00:01:00Z".into(),
            session_id: Some("conv-1".into()),
            end_state: "completed".into(),
            status: "Completed 0 of 0 records.".into(),
        }));
        drop(store);

        let conn = Connection::open(tmp.path().join(DB_FILE)).unwrap();
        let (session, state): (String, String) = conn
            .query_row(
                "SELECT session_id, end_state FROM runs WHERE run_id = 'run-1'",
                [],
                |r| Ok((r.get(0)?, r.get(1)?)),
            )
            .unwrap();
        assert_eq!(session, "conv-1");
        assert_eq!(state, "completed");
    }

    #[test]
    fn store_backpressure_does_not_panic() {
        let tmp = TempDir::new().unwrap();
        let store = RunArchiveStore::open(tmp.path(), 2).unwrap();
        for serial in 1..=20 {
            store.submit(outcome_record("run-1", serial));
        }
        drop(store);
    }
}
