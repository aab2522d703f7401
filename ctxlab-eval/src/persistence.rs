//! JSON reports and run history on disk.

use std::path::Path;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use crate::batch::{BatchReport, BatchSummary};
use crate::error::{EvalError, Result};

/// Write `report` as pretty-printed JSON, creating parent directories.
pub fn write_json_report<T: Serialize>(path: impl AsRef<Path>, report: &T) -> Result<()> {
    let path = path.as_ref();
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(|e| EvalError::io(parent, e))?;
    }
    let json = serde_json::to_string_pretty(report)?;
    std::fs::write(path, json).map_err(|e| EvalError::io(path, e))?;
    info!(path = %path.display(), "wrote report");
    Ok(())
}

/// Read a JSON report written by [`write_json_report`].
pub fn read_json_report<T: DeserializeOwned>(path: impl AsRef<Path>) -> Result<T> {
    let path = path.as_ref();
    let text = std::fs::read_to_string(path).map_err(|e| EvalError::io(path, e))?;
    Ok(serde_json::from_str(&text)?)
}

/// One finished batch run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunRecord {
    /// Unique run identifier.
    pub run_id: Uuid,
    /// Technique evaluated.
    pub technique: String,
    /// When the run started.
    pub started_at: DateTime<Utc>,
    /// When the run finished.
    pub finished_at: DateTime<Utc>,
    /// Counts and aggregates.
    pub summary: BatchSummary,
}

impl RunRecord {
    /// Record a finished batch under a fresh run id.
    pub fn from_report(report: &BatchReport) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            technique: report.summary.technique.clone(),
            started_at: report.started_at,
            finished_at: report.finished_at,
            summary: report.summary.clone(),
        }
    }
}

/// Chronological list of runs, persisted as one JSON file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunHistory {
    runs: Vec<RunRecord>,
}

impl RunHistory {
    /// Create an empty history.
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a history file; a missing file is an empty history.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Ok(Self::new());
        }
        read_json_report(path)
    }

    /// Save the history as pretty JSON.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        write_json_report(path, self)
    }

    /// Append a run, returning its id.
    pub fn record(&mut self, run: RunRecord) -> Uuid {
        let run_id = run.run_id;
        self.runs.push(run);
        run_id
    }

    /// Every run, oldest first.
    pub fn runs(&self) -> &[RunRecord] {
        &self.runs
    }

    /// Runs of one technique, oldest first.
    pub fn for_technique<'a>(&'a self, technique: &'a str) -> impl Iterator<Item = &'a RunRecord> {
        self.runs.iter().filter(move |r| r.technique == technique)
    }

    /// The most recent run of `technique`.
    pub fn latest(&self, technique: &str) -> Option<&RunRecord> {
        self.runs.iter().rev().find(|r| r.technique == technique)
    }

    /// Look a run up by id.
    pub fn get(&self, run_id: Uuid) -> Option<&RunRecord> {
        self.runs.iter().find(|r| r.run_id == run_id)
    }
}
