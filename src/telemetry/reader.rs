use crate::replay::accumulator::{PlannerEvent, QueryOutcome};
use anyhow::{Context, Result};
use rusqlite::Connection;
use std::path::Path;

/// A read-only view of the run archive.
///
/// Opens a separate read-only SQLite connection so that reads don't
/// interfere with a writer thread (WAL mode allows this).
pub struct ArchiveReader {
    conn: Connection,
}

/// One archived run, newest first in listings.
#[derive(Debug, Clone, serde::Serialize)]
pub struct RunRow {
    pub run_id: String,
    pub started_at: String,
    pub input_path: String,
    pub session_id: Option<String>,
    pub ended_at: Option<String>,
    pub end_state: Option<String>,
    pub status: Option<String>,
    pub outcome_count: i64,
}

impl ArchiveReader {
    /// Open a read-only connection to the archive database.
    pub fn open(db_path: &Path) -> Result<Self> {
        let conn = Connection::open_with_flags(
            db_path,
            rusqlite::OpenFlags::SQLITE_OPEN_READ_ONLY | rusqlite::OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
        .with_context(|| format!("opening archive db read-only: {}", db_path.display()))?;
        Ok(Self { conn })
    }

    pub fn list_runs(&self, limit: usize) -> Result<Vec<RunRow>> {
        let mut stmt = self.conn.prepare(
            "SELECT r.run_id, r.started_at, r.input_path, r.session_id, r.ended_at,
                    r.end_state, r.status,
                    (SELECT COUNT(*) FROM query_outcomes q WHERE q.run_id = r.run_id)
             FROM runs r
             ORDER BY r.started_epoch_ms DESC
             LIMIT ?1",
        )?;
        let rows = stmt.query_map(rusqlite::params![limit as i64], |row| {
            Ok(RunRow {
                run_id: row.get(0)?,
                started_at: row.get(1)?,
                input_path: row.get(2)?,
                session_id: row.get(3)?,
                ended_at: row.get(4)?,
                end_state: row.get(5)?,
                status: row.get(6)?,
                outcome_count: row.get(7)?,
            })
        })?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .context("reading runs")
    }

    /// Most recently started run, if any.
    pub fn latest_run_id(&self) -> Result<Option<String>> {
        Ok(self.list_runs(1)?.into_iter().next().map(|r| r.run_id))
    }

    /// Outcome rows of a run in serial order.
    pub fn export_outcomes(&self, run_id: &str) -> Result<Vec<QueryOutcome>> {
        let mut stmt = self.conn.prepare(
            "SELECT serial, query, response, elapsed_seconds, session_id, response_length
             FROM query_outcomes
             WHERE run_id = ?1
             ORDER BY serial ASC",
        )?;
        let rows = stmt.query_map([run_id], |row| {
            Ok(QueryOutcome {
                serial: row.get::<_, i64>(0)?.max(0) as u64,
                query: row.get(1)?,
                response: row.get(2)?,
                elapsed_seconds: row.get(3)?,
                session_id: row.get(4)?,
                response_length: row.get::<_, i64>(5)?.max(0) as usize,
            })
        })?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .with_context(|| format!("reading outcomes for run {run_id}"))
    }

    /// Planner events of a run in serial order.
    pub fn export_planner_events(&self, run_id: &str) -> Result<Vec<PlannerEvent>> {
        let mut stmt = self.conn.prepare(
            "SELECT serial, query, step_kind, thought, tool, tool_type, arguments
             FROM planner_events
             WHERE run_id = ?1
             ORDER BY serial ASC",
        )?;
        let rows = stmt.query_map([run_id], |row| {
            Ok(PlannerEvent {
                serial: row.get::<_, i64>(0)?.max(0) as u64,
                query: row.get(1)?,
                step_kind: row.get(2)?,
                thought: row.get(3)?,
                tool: row.get(4)?,
                tool_type: row.get(5)?,
                arguments: row.get(6)?,
            })
        })?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .with_context(|| format!("reading planner events for run {run_id}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::telemetry::store::{
        OutcomeRecord, PlannerEventRecord, RunArchiveStore, RunRecord, WriteOp, DB_FILE,
    };
    use tempfile::TempDir;

    fn seed(store: &RunArchiveStore, run_id: &str, started: i64, rows: u64) {
        store.submit(WriteOp::RunStarted(RunRecord {
            run_id: run_id.into(),
            started_at: format!("t{started}"),
            started_epoch_ms: started,
            input_path: "data/input.txt".into(),
        }));
        for serial in (1..=rows).rev() {
            store.submit(WriteOp::Outcome(Box::new(OutcomeRecord {
                run_id: run_id.into(),
                ts: "t".into(),
                ts_epoch_ms: started,
                outcome: QueryOutcome::new(serial, format!("q{serial}"), "ok", 0.25, "c"),
            })));
        }
    }

    #[test]
    fn reader_lists_runs_newest_first() {
        let tmp = TempDir::new().unwrap();
        let store = RunArchiveStore::open(tmp.path(), 64).unwrap();
        seed(&store, "old", 1_000, 1);
        seed(&store, "new", 2_000, 3);
        drop(store);

        let reader = ArchiveReader::open(&tmp.path().join(DB_FILE)).unwrap();
        let runs = reader.list_runs(10).unwrap();
        assert_eq!(runs.len(), 2);
        assert_eq!(runs[0].run_id, "new");
        assert_eq!(runs[0].outcome_count, 3);
        assert_eq!(reader.latest_run_id().unwrap().as_deref(), Some("new"));
    }

    #[test]
    fn reader_exports_rows_in_serial_order() {
        let tmp = TempDir::new().unwrap();
        let store = RunArchiveStore::open(tmp.path(), 64).unwrap();
        seed(&store, "run", 1_000, 3);
        store.submit(WriteOp::PlannerEvent(Box::new(PlannerEventRecord {
            run_id: "run".into(),
            ts: "t".into(),
            ts_epoch_ms: 1_000,
            event: PlannerEvent {
                serial: 1,
                query: "q1".into(),
                step_kind: "DynamicPlanStepBindUpdate".into(),
                thought: String::new(),
                tool: "tool-9".into(),
                tool_type: String::new(),
                arguments: r#"{"x":1}"#.into(),
            },
        })));
        drop(store);

        let reader = ArchiveReader::open(&tmp.path().join(DB_FILE)).unwrap();
        let outcomes = reader.export_outcomes("run").unwrap();
        let serials: Vec<u64> = outcomes.iter().map(|o| o.serial).collect();
        assert_eq!(serials, vec![1, 2, 3]);
        assert_eq!(outcomes[0].response_length, 2);

        let events = reader.export_planner_events("run").unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].arguments, r#"{"x":1}"#);
        assert!(reader.export_outcomes("missing").unwrap().is_empty());
    }
}
