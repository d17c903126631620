use serde::{Deserialize, Serialize};

use crate::domain::JobId;

/// Body returned by the submit route.
///
/// Current backends answer with `jobId`; the legacy review API answers with
/// both an upload `job_id` and the `paper_id` that its status routes expect.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SubmitJobResponse {
    #[serde(rename = "jobId", default, skip_serializing_if = "Option::is_none")]
    pub job_id_camel: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub paper_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job_id: Option<String>,
}

impl SubmitJobResponse {
    pub fn into_job_id(self) -> Option<JobId> {
        self.job_id_camel
            .or(self.paper_id)
            .or(self.job_id)
            .map(|raw| raw.trim().to_string())
            .filter(|raw| !raw.is_empty())
            .map(JobId)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RemoteJobStatus {
    Processing,
    #[serde(alias = "completed")]
    Complete,
    Failed,
    #[serde(other)]
    Unknown,
}

/// Body returned by the status route.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobStatusResponse {
    pub status: RemoteJobStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub progress: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// FastAPI-style backends report failures under `detail`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RemoteJobState {
    Running,
    Completed,
    Failed,
}

/// Normalized answer of a single status poll.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PollStatus {
    pub state: RemoteJobState,
    pub progress: Option<u8>,
    pub reason: Option<String>,
}

impl PollStatus {
    pub fn running(progress: Option<u8>) -> Self {
        Self {
            state: RemoteJobState::Running,
            progress,
            reason: None,
        }
    }

    pub fn completed() -> Self {
        Self {
            state: RemoteJobState::Completed,
            progress: Some(100),
            reason: None,
        }
    }

    pub fn failed(reason: impl Into<String>) -> Self {
        Self {
            state: RemoteJobState::Failed,
            progress: None,
            reason: Some(reason.into()),
        }
    }
}

impl From<JobStatusResponse> for PollStatus {
    fn from(value: JobStatusResponse) -> Self {
        let state = match value.status {
            RemoteJobStatus::Complete => RemoteJobState::Completed,
            RemoteJobStatus::Failed => RemoteJobState::Failed,
            // Unrecognized labels are intermediate stages of a running job.
            RemoteJobStatus::Processing | RemoteJobStatus::Unknown => RemoteJobState::Running,
        };
        Self {
            state,
            progress: value.progress.and_then(normalize_progress),
            reason: value
                .reason
                .filter(|reason| !reason.trim().is_empty())
                .or(value.detail),
        }
    }
}

fn normalize_progress(raw: f64) -> Option<u8> {
    if !raw.is_finite() {
        return None;
    }
    Some(raw.round().clamp(0.0, 100.0) as u8)
}
