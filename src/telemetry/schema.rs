// DDL constants for the run archive database.

pub const RUNS_DDL: &str = "\
CREATE TABLE IF NOT EXISTS runs (
    run_id              TEXT    PRIMARY KEY,
    started_at          TEXT    NOT NULL,
    started_epoch_ms    INTEGER NOT NULL,
    input_path          TEXT    NOT NULL,
    session_id          TEXT,
    ended_at            TEXT,
    end_state           TEXT,
    status              TEXT
);
CREATE INDEX IF NOT EXISTS idx_runs_started ON runs(started_epoch_ms);
";

pub const QUERY_OUTCOMES_DDL: &str = "\
CREATE TABLE IF NOT EXISTS query_outcomes (
    id                  INTEGER PRIMARY KEY AUTOINCREMENT,
    run_id              TEXT    NOT NULL,
    ts                  TEXT    NOT NULL,
    ts_epoch_ms         INTEGER NOT NULL,
    session_id          TEXT    NOT NULL,
    serial              INTEGER NOT NULL,
    query               TEXT    NOT NULL,
    response            TEXT    NOT NULL,
    elapsed_seconds     REAL    NOT NULL,
    response_length     INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_qo_run   ON query_outcomes(run_id, serial);
CREATE INDEX IF NOT EXISTS idx_qo_epoch ON query_outcomes(ts_epoch_ms);
";

pub const PLANNER_EVENTS_DDL: &str = "\
CREATE TABLE IF NOT EXISTS planner_events (
    id                  INTEGER PRIMARY KEY AUTOINCREMENT,
    run_id              TEXT    NOT NULL,
    ts                  TEXT    NOT NULL,
    ts_epoch_ms         INTEGER NOT NULL,
    serial              INTEGER NOT NULL,
    query               TEXT    NOT NULL,
    step_kind           TEXT    NOT NULL,
    thought             TEXT    NOT NULL,
    tool                TEXT    NOT NULL,
    tool_type           TEXT    NOT NULL,
    arguments           TEXT    NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_pe_run  ON planner_events(run_id, serial);
CREATE INDEX IF NOT EXISTS idx_pe_kind ON planner_events(step_kind);
";

pub const PRAGMAS: &str = "\
PRAGMA journal_mode = WAL;
PRAGMA synchronous  = NORMAL;
PRAGMA cache_size   = -1000;
PRAGMA temp_store   = MEMORY;
";

#[cfg(test)]
mod tests {
    use super::*;
    use rusqlite::Connection;

    #[test]
    fn ddl_executes_on_in_memory_db() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(PRAGMAS).unwrap();
        conn.execute_batch(RUNS_DDL).unwrap();
        conn.execute_batch(QUERY_OUTCOMES_DDL).unwrap();
        conn.execute_batch(PLANNER_EVENTS_DDL).unwrap();
    }

    #[test]
    fn ddl_is_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        for _ in 0..2 {
            conn.execute_batch(RUNS_DDL).unwrap();
            conn.execute_batch(QUERY_OUTCOMES_DDL).unwrap();
            conn.execute_batch(PLANNER_EVENTS_DDL).unwrap();
        }
    }
}
