//! Build summary reporting.
//!
//! One `summary.json` per invocation under the reports directory, carrying
//! per-task status and the failing task when the build did not succeed.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Schema version for summary.json
pub const SCHEMA_VERSION: u32 = 1;

/// Schema identifier
pub const SCHEMA_ID: &str = "modlane/summary@1";

/// Terminal status of one task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    /// Ran to completion
    Succeeded,
    /// Ran and failed
    Failed,
    /// Not run because an upstream task failed or the build was cancelled
    Skipped,
}

/// Overall build status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BuildStatus {
    Succeeded,
    Failed,
    Cancelled,
}

/// Outcome of one task
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskReport {
    pub name: String,
    pub status: TaskStatus,
    pub duration_ms: u64,
    /// Failure cause, present only for failed tasks
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// The build summary artifact (summary.json)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildSummary {
    pub schema_version: u32,
    pub schema_id: String,
    pub build_id: String,
    pub goal: String,
    pub version: String,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub status: BuildStatus,
    /// Name of the originating failed task, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failed_task: Option<String>,
    pub tasks: Vec<TaskReport>,
}

impl BuildSummary {
    pub fn new(
        build_id: String,
        goal: String,
        version: String,
        started_at: DateTime<Utc>,
        status: BuildStatus,
        failed_task: Option<String>,
        tasks: Vec<TaskReport>,
    ) -> Self {
        let duration_ms = (Utc::now() - started_at).num_milliseconds().max(0) as u64;
        Self {
            schema_version: SCHEMA_VERSION,
            schema_id: SCHEMA_ID.to_string(),
            build_id,
            goal,
            version,
            started_at,
            duration_ms,
            status,
            failed_task,
            tasks,
        }
    }

    /// Write summary.json into the reports directory
    pub fn write(&self, reports_dir: &Path) -> io::Result<PathBuf> {
        fs::create_dir_all(reports_dir)?;
        let path = reports_dir.join("summary.json");
        let json = serde_json::to_string_pretty(self)?;
        fs::write(&path, json)?;
        Ok(path)
    }
}
