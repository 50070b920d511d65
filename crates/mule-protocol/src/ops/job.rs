//! run_job operation types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// run_job request payload.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunJobRequest {
    #[serde(rename = "buildID", alias = "build_id")]
    pub build_id: String,
    /// Script that runs the job.
    pub script: String,
    /// Job identifier, exported to the script as `TEST`.
    #[serde(rename = "jobID", alias = "job", alias = "job_id")]
    pub job_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workspace: Option<String>,
}

/// Outcome of one job.
///
/// Created once after the script completes; consumers only ever see it
/// by shared reference or by value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobResult {
    #[serde(rename = "buildID")]
    pub build_id: String,
    #[serde(rename = "job")]
    pub job_id: String,
    pub stdout: String,
    pub stderr: String,
    pub retcode: i32,
    #[serde(rename = "timeStarted")]
    pub started_at: DateTime<Utc>,
    #[serde(rename = "timeFinished")]
    pub finished_at: DateTime<Utc>,
}

impl JobResult {
    /// Whether the job script exited with code 0.
    pub fn passed(&self) -> bool {
        self.retcode == 0
    }

    /// Wall-clock duration in milliseconds.
    pub fn duration_ms(&self) -> i64 {
        (self.finished_at - self.started_at).num_milliseconds()
    }
}
