use crate::error::{BenchError, Result};
use std::path::Path;

/// Lines that end a run instead of being submitted.
pub const SENTINELS: [&str; 2] = ["exit", "quit"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryLine<'a> {
    Blank,
    Sentinel,
    Query(&'a str),
}

impl<'a> QueryLine<'a> {
    pub fn parse(raw: &'a str) -> Self {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            Self::Blank
        } else if SENTINELS.contains(&trimmed) {
            Self::Sentinel
        } else {
            Self::Query(trimmed)
        }
    }
}

/// A query file read in one buffered pass, so the line count is known
/// before the first query is sent.
#[derive(Debug, Clone, Default)]
pub struct QueryFile {
    lines: Vec<String>,
}

impl QueryFile {
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path).map_err(|source| BenchError::Input {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(Self::from_text(&contents))
    }

    pub fn from_text(text: &str) -> Self {
        Self {
            lines: text.lines().map(str::to_string).collect(),
        }
    }

    pub fn total_lines(&self) -> usize {
        self.lines.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = QueryLine<'_>> {
        self.lines.iter().map(|l| QueryLine::parse(l))
    }
}
