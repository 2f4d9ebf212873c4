//! Append-only record journal
//!
//! Each table is a JSON-lines file under the journal directory:
//! - one record per line, appended and flushed as it is produced
//! - records are never rewritten; corrections are new records
//! - replay skips lines that fail to decode

use crate::error::JournalError;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{debug, warn};

/// Journal tables
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Table {
    Snapshots,
    Decisions,
    Executions,
    Predictions,
    Evaluations,
    Instances,
}

impl Table {
    fn file_name(&self) -> &'static str {
        match self {
            Table::Snapshots => "snapshots.jsonl",
            Table::Decisions => "decisions.jsonl",
            Table::Executions => "executions.jsonl",
            Table::Predictions => "predictions.jsonl",
            Table::Evaluations => "evaluations.jsonl",
            Table::Instances => "instances.jsonl",
        }
    }
}

/// Append-only store shared by all components
#[derive(Debug)]
pub struct Journal {
    dir: Option<PathBuf>,
    write_lock: Mutex<()>,
}

impl Journal {
    /// A journal that accepts and discards every record
    pub fn disabled() -> Self {
        Self {
            dir: None,
            write_lock: Mutex::new(()),
        }
    }

    /// Open (creating if needed) a journal rooted at `dir`
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, JournalError> {
        let dir = dir.into();
        fs::create_dir_all(&dir).map_err(|source| JournalError::Io {
            path: dir.display().to_string(),
            source,
        })?;
        debug!(path = %dir.display(), "Opened journal");
        Ok(Self {
            dir: Some(dir),
            write_lock: Mutex::new(()),
        })
    }

    pub fn is_enabled(&self) -> bool {
        self.dir.is_some()
    }

    pub fn dir(&self) -> Option<&Path> {
        self.dir.as_deref()
    }

    /// Append one record to `table`
    pub fn append<T: Serialize>(&self, table: Table, record: &T) -> Result<(), JournalError> {
        let Some(path) = self.path(table) else {
            return Ok(());
        };

        let mut line = serde_json::to_vec(record)?;
        line.push(b'\n');

        let _guard = self.write_lock.lock().unwrap_or_else(|e| e.into_inner());
        let io_err = |source| JournalError::Io {
            path: path.display().to_string(),
            source,
        };
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(io_err)?;
        file.write_all(&line).map_err(io_err)?;
        file.flush().map_err(io_err)?;
        Ok(())
    }

    /// Read every decodable record of `table` in append order
    pub fn replay<T: DeserializeOwned>(&self, table: Table) -> Result<Vec<T>, JournalError> {
        let Some(path) = self.path(table) else {
            return Ok(Vec::new());
        };
        if !path.exists() {
            return Ok(Vec::new());
        }

        let file = File::open(&path).map_err(|source| JournalError::Io {
            path: path.display().to_string(),
            source,
        })?;

        let mut records = Vec::new();
        for (line_no, line) in BufReader::new(file).lines().enumerate() {
            let line = line.map_err(|source| JournalError::Io {
                path: path.display().to_string(),
                source,
            })?;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str(&line) {
                Ok(record) => records.push(record),
                Err(e) => warn!(
                    path = %path.display(),
                    line = line_no + 1,
                    error = %e,
                    "Skipping malformed journal record"
                ),
            }
        }
        Ok(records)
    }

    fn path(&self, table: Table) -> Option<PathBuf> {
        self.dir.as_ref().map(|d| d.join(table.file_name()))
    }
}
