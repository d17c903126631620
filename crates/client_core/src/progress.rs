//! Progress synthesis for jobs whose backend does not always report a figure.
//!
//! Everything here is pure: the controller feeds in the poll attempt, the
//! optional server value and the last published progress, and gets back the
//! next value to publish.

use sha2::{Digest, Sha256};
use shared::domain::JobId;

/// Synthesized progress never reaches this value; only a completion signal does.
pub const COMPLETE_PROGRESS: u8 = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProgressConfig {
    /// Shown as soon as a submission starts, before any poll settles.
    pub initial_offset: u8,
    pub base_step: u8,
    pub jitter_span: u8,
    pub cap_before_completion: u8,
}

impl Default for ProgressConfig {
    fn default() -> Self {
        Self {
            initial_offset: 10,
            base_step: 16,
            jitter_span: 10,
            cap_before_completion: 95,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ProgressSynthesizer {
    config: ProgressConfig,
}

impl ProgressSynthesizer {
    pub fn new(mut config: ProgressConfig) -> Self {
        config.cap_before_completion = config.cap_before_completion.min(COMPLETE_PROGRESS - 1);
        config.initial_offset = config.initial_offset.min(config.cap_before_completion);
        Self { config }
    }

    pub fn config(&self) -> ProgressConfig {
        self.config
    }

    pub fn initial(&self) -> u8 {
        self.config.initial_offset
    }

    pub fn estimate(&self, poll_attempt: u32, jitter: u8) -> u8 {
        let jitter = match self.config.jitter_span {
            0 => 0,
            span => u32::from(jitter % span),
        };
        let raw = u32::from(self.config.initial_offset)
            .saturating_add(u32::from(self.config.base_step).saturating_mul(poll_attempt))
            .saturating_add(jitter);
        raw.min(u32::from(self.config.cap_before_completion)) as u8
    }

    /// Next progress value; never lower than `previous`.
    pub fn next(
        &self,
        poll_attempt: u32,
        server_progress: Option<u8>,
        previous: u8,
        jitter: u8,
    ) -> u8 {
        let candidate = match server_progress {
            Some(reported) => reported.min(COMPLETE_PROGRESS),
            None => self.estimate(poll_attempt, jitter),
        };
        candidate.max(previous)
    }
}

impl Default for ProgressSynthesizer {
    fn default() -> Self {
        Self::new(ProgressConfig::default())
    }
}

/// Deterministic per-job jitter in `0..span`.
pub fn jitter_for(job_id: &JobId, poll_attempt: u32, span: u8) -> u8 {
    if span == 0 {
        return 0;
    }
    let mut hasher = Sha256::new();
    hasher.update(job_id.as_str().as_bytes());
    hasher.update(poll_attempt.to_le_bytes());
    let digest = hasher.finalize();
    digest[0] % span
}

#[cfg(test)]
#[path = "tests/progress_tests.rs"]
mod tests;
