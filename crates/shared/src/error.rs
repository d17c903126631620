use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    Validation,
    Transport,
    NotFound,
    Timeout,
    ResultUnavailable,
    JobFailed,
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Validation => "validation",
            Self::Transport => "transport",
            Self::NotFound => "not_found",
            Self::Timeout => "timeout",
            Self::ResultUnavailable => "result_unavailable",
            Self::JobFailed => "job_failed",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("{code}: {message}")]
pub struct JobError {
    pub code: ErrorCode,
    pub message: String,
}

impl JobError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_uses_wire_names() {
        let error = JobError::new(ErrorCode::ResultUnavailable, "report missing");
        assert_eq!(error.to_string(), "result_unavailable: report missing");

        let wire = serde_json::to_value(ErrorCode::NotFound).expect("serialize");
        assert_eq!(wire, serde_json::json!(ErrorCode::NotFound.to_string()));
    }
}
