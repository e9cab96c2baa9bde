//! CSV checkpoint of the query-outcome table.
//!
//! Files are named `<sessionId>_<YYYY-MM-DD_HH-MM-SS>.csv` and are never
//! overwritten: a name collision is reported as an error.

use crate::error::{BenchError, Result};
use crate::replay::accumulator::QueryOutcome;
use chrono::{DateTime, Local};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

pub const HEADER: [&str; 6] = [
    "Serial",
    "Query",
    "Response",
    "Time",
    "ConversationId",
    "CharLen",
];

pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d_%H-%M-%S";

/// `<sessionId>_<timestamp>.csv`; path separators in the id are replaced.
pub fn checkpoint_file_name(session_id: &str, at: DateTime<Local>) -> String {
    let safe_id: String = session_id
        .chars()
        .map(|c| if matches!(c, '/' | '\\') { '_' } else { c })
        .collect();
    format!("{safe_id}_{}.csv", at.format(TIMESTAMP_FORMAT))
}

#[derive(Debug, Clone)]
pub struct CheckpointWriter {
    output_dir: PathBuf,
}

impl CheckpointWriter {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
        }
    }

    /// Write `outcomes` using the current local time for the file name.
    pub fn write(&self, outcomes: &[QueryOutcome], session_id: &str) -> Result<PathBuf> {
        self.write_at(outcomes, session_id, Local::now())
    }

    pub fn write_at(
        &self,
        outcomes: &[QueryOutcome],
        session_id: &str,
        at: DateTime<Local>,
    ) -> Result<PathBuf> {
        let path = self
            .output_dir
            .join(checkpoint_file_name(session_id, at));
        let fail = |message: String| BenchError::Checkpoint {
            path: path.clone(),
            message,
        };

        std::fs::create_dir_all(&self.output_dir)
            .map_err(|e| fail(format!("creating output directory: {e}")))?;

        let mut file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::AlreadyExists => fail("file already exists".into()),
                _ => fail(e.to_string()),
            })?;
        file.write_all(render_csv(outcomes).as_bytes())
            .and_then(|()| file.sync_all())
            .map_err(|e| fail(e.to_string()))?;

        tracing::info!(path = %path.display(), rows = outcomes.len(), "checkpoint written");
        Ok(path)
    }
}

pub fn render_csv(outcomes: &[QueryOutcome]) -> String {
    let mut out = HEADER.join(",");
    out.push('\n');
    for o in outcomes {
        let fields = [
            o.serial.to_string(),
            escape_field(&o.query),
            escape_field(&o.response),
            o.elapsed_seconds.to_string(),
            escape_field(&o.session_id),
            o.response_length.to_string(),
        ];
        out.push_str(&fields.join(","));
        out.push('\n');
    }
    out
}

fn escape_field(value: &str) -> String {
    if value.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

/// Read a checkpoint back into outcome rows.
pub fn read_checkpoint(path: &Path) -> Result<Vec<QueryOutcome>> {
    let fail = |message: String| BenchError::Checkpoint {
        path: path.to_path_buf(),
        message,
    };
    let text = std::fs::read_to_string(path).map_err(|e| fail(e.to_string()))?;
    let mut records = parse_csv(&text).map_err(fail)?.into_iter();

    let header = records.next().ok_or_else(|| fail("empty file".into()))?;
    if header != HEADER {
        return Err(fail(format!("unexpected header: {}", header.join(","))));
    }

    records
        .enumerate()
        .map(|(i, record)| {
            let line = i + 2;
            let [serial, query, response, time, session_id, len]: [String; 6] =
                record.try_into().map_err(|r: Vec<String>| {
                    fail(format!("row {line}: expected 6 fields, found {}", r.len()))
                })?;
            let bad = |col: &str, value: &str| fail(format!("row {line}: invalid {col} {value:?}"));
            Ok(QueryOutcome {
                serial: serial.parse().map_err(|_| bad("Serial", &serial))?,
                elapsed_seconds: time.parse().map_err(|_| bad("Time", &time))?,
                response_length: len.parse().map_err(|_| bad("CharLen", &len))?,
                query,
                response,
                session_id,
            })
        })
        .collect()
}

fn parse_csv(text: &str) -> std::result::Result<Vec<Vec<String>>, String> {
    let mut records = Vec::new();
    let mut record = Vec::new();
    let mut field = String::new();
    let mut in_quotes = false;
    let mut chars = text.chars().peekable();

    while let Some(c) = chars.next() {
        if in_quotes {
            match c {
                '"' if chars.peek() == Some(&'"') => {
                    chars.next();
                    field.push('"');
                }
                '"' => in_quotes = false,
                _ => field.push(c),
            }
            continue;
        }
        match c {
            '"' if field.is_empty() => in_quotes = true,
            ',' => record.push(std::mem::take(&mut field)),
            '\r' if chars.peek() == Some(&'\n') => {}
            '\n' => {
                record.push(std::mem::take(&mut field));
                records.push(std::mem::take(&mut record));
            }
            _ => field.push(c),
        }
    }
    if in_quotes {
        return Err("unterminated quoted field".into());
    }
    if !field.is_empty() || !record.is_empty() {
        record.push(field);
        records.push(record);
    }
    Ok(records)
}
