//! Terminal rendering of controller events.

use std::io::{self, Write};

use client_core::JobEvent;
use shared::{
    domain::{Job, JobPhase},
    error::{ErrorCode, JobError},
};

const STATUS_MESSAGES: [&str; 5] = [
    "Reviewing your paper with focused academic rigor.",
    "Cross-checking methods, citations, and clarity.",
    "Synthesizing reviewer feedback into a final verdict.",
    "Validating novelty against existing literature.",
    "Almost done. Preparing your report now.",
];

pub struct ProgressRenderer<W: Write> {
    out: W,
}

impl<W: Write> ProgressRenderer<W> {
    pub fn new(out: W) -> Self {
        Self { out }
    }

    pub fn render(&mut self, event: &JobEvent) -> io::Result<()> {
        match event {
            JobEvent::StateChanged(job) => writeln!(self.out, "{}", describe(job)),
            JobEvent::Warning(warning) => writeln!(self.out, "warning: {}", warning.message),
        }
    }

    pub fn prompt(&mut self, question: &str) -> io::Result<()> {
        write!(self.out, "{question} [y/N] ")?;
        self.out.flush()
    }
}

/// One status line for a job snapshot.
pub fn describe(job: &Job) -> String {
    let job_label = job
        .job_id
        .as_ref()
        .map(|id| format!(" {id}"))
        .unwrap_or_default();
    match job.phase {
        JobPhase::Idle => "ready for a new document".to_string(),
        JobPhase::Submitting => format!("[{:>3}%] uploading document", job.progress),
        JobPhase::Polling => format!(
            "[{:>3}%] job{job_label}: {}",
            job.progress,
            STATUS_MESSAGES[job.poll_attempt as usize % STATUS_MESSAGES.len()]
        ),
        JobPhase::Completed if job.result.is_some() => {
            format!("[100%] review complete for job{job_label}; report received")
        }
        JobPhase::Completed => format!("[100%] review complete for job{job_label}"),
        JobPhase::Failed => match &job.last_error {
            Some(error) => format!("review failed: {}", failure_summary(error)),
            None => "review failed".to_string(),
        },
    }
}

pub fn failure_summary(error: &JobError) -> String {
    let detail = &error.message;
    match error.code {
        ErrorCode::Validation => format!("the server rejected the document ({detail})"),
        ErrorCode::Transport => format!("failed to reach the review service ({detail})"),
        ErrorCode::NotFound => format!("the review service lost track of the job ({detail})"),
        ErrorCode::Timeout => format!("the review did not finish in time ({detail})"),
        ErrorCode::JobFailed => format!("the review process failed ({detail})"),
        ErrorCode::ResultUnavailable => format!("the report could not be downloaded ({detail})"),
    }
}
