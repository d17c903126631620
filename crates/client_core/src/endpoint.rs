use async_trait::async_trait;
use shared::{
    domain::JobId,
    error::{ErrorCode, JobError},
    protocol::PollStatus,
};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EndpointError {
    #[error("request rejected: {0}")]
    Validation(String),
    #[error("job not found: {0}")]
    NotFound(String),
    #[error("transport failure: {0}")]
    Transport(String),
}

impl EndpointError {
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::Validation(_) => ErrorCode::Validation,
            Self::NotFound(_) => ErrorCode::NotFound,
            Self::Transport(_) => ErrorCode::Transport,
        }
    }
}

impl From<EndpointError> for JobError {
    fn from(value: EndpointError) -> Self {
        let code = value.code();
        Self::new(code, value.to_string())
    }
}

/// Document handed to the submit operation.
#[derive(Debug, Clone)]
pub struct DocumentUpload {
    pub filename: String,
    pub mime_type: Option<String>,
    pub bytes: Vec<u8>,
}

impl DocumentUpload {
    pub fn new(filename: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            filename: filename.into(),
            mime_type: None,
            bytes,
        }
    }

    pub fn with_mime_type(mut self, mime_type: impl Into<String>) -> Self {
        self.mime_type = Some(mime_type.into());
        self
    }

    pub fn mime_type_or_default(&self) -> &str {
        self.mime_type
            .as_deref()
            .unwrap_or("application/octet-stream")
    }

    pub(crate) fn missing_part(&self) -> Option<&'static str> {
        if self.filename.trim().is_empty() {
            Some("document has no file name")
        } else if self.bytes.is_empty() {
            Some("document is empty")
        } else {
            None
        }
    }
}

/// Remote side of the job lifecycle. All three operations are idempotent.
#[async_trait]
pub trait StatusEndpoint: Send + Sync {
    async fn submit(&self, document: &DocumentUpload) -> Result<JobId, EndpointError>;
    async fn poll(&self, job_id: &JobId) -> Result<PollStatus, EndpointError>;
    async fn fetch(&self, job_id: &JobId) -> Result<serde_json::Value, EndpointError>;
}
