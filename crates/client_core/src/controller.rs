//! Job lifecycle controller: submit, poll until terminal, fetch the result.
//!
//! State lives behind one mutex that is never held across an endpoint call.
//! Every submission and reset bumps a generation counter; a response is only
//! applied when the generation it was issued under is still current, so
//! replies that settle after a reset cannot touch the next job.

use std::{
    sync::{Arc, Weak},
    time::Duration,
};

use chrono::Utc;
use shared::{
    domain::{Job, JobId, JobPhase},
    error::{ErrorCode, JobError},
    protocol::RemoteJobState,
};
use thiserror::Error;
use tokio::{
    sync::{broadcast, Mutex},
    task::JoinHandle,
    time::Instant,
};
use tracing::{debug, info, warn};

use crate::{
    endpoint::{DocumentUpload, EndpointError, StatusEndpoint},
    progress::{jitter_for, ProgressConfig, ProgressSynthesizer, COMPLETE_PROGRESS},
};

const EVENT_CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Clone)]
pub struct ControllerConfig {
    /// Delay between the settlement of one poll and the start of the next.
    pub poll_interval: Duration,
    pub max_consecutive_failures: u32,
    /// Stall protection: polling gives up once this much time has passed.
    /// Durations past the clock's range mean no deadline.
    pub max_poll_duration: Duration,
    pub progress: ProgressConfig,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(2000),
            max_consecutive_failures: 3,
            max_poll_duration: Duration::from_secs(600),
            progress: ProgressConfig::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum JobEvent {
    /// Sent once per settled change of the job snapshot.
    StateChanged(Job),
    /// Non-fatal problems that do not change the job phase.
    Warning(JobError),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SubmitRejected {
    #[error("invalid document: {0}")]
    InvalidInput(String),
    #[error("a job is already {phase}")]
    AlreadyInProgress { phase: JobPhase },
}

struct ControllerState {
    job: Job,
    generation: u64,
    poll_task: Option<JoinHandle<()>>,
}

impl ControllerState {
    fn cancel_poll_task(&mut self) {
        if let Some(task) = self.poll_task.take() {
            task.abort();
        }
    }

    fn is_current(&self, generation: u64, phase: JobPhase) -> bool {
        self.generation == generation && self.job.phase == phase
    }
}

enum PollCycle {
    Continue,
    Stop,
}

pub struct JobController {
    endpoint: Arc<dyn StatusEndpoint>,
    config: ControllerConfig,
    synthesizer: ProgressSynthesizer,
    inner: Mutex<ControllerState>,
    events: broadcast::Sender<JobEvent>,
}

impl JobController {
    pub fn new(endpoint: Arc<dyn StatusEndpoint>, config: ControllerConfig) -> Arc<Self> {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Arc::new(Self {
            endpoint,
            synthesizer: ProgressSynthesizer::new(config.progress),
            config,
            inner: Mutex::new(ControllerState {
                job: Job::default(),
                generation: 0,
                poll_task: None,
            }),
            events,
        })
    }

    pub async fn state(&self) -> Job {
        self.inner.lock().await.job.clone()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<JobEvent> {
        self.events.subscribe()
    }

    /// Starts a new job. Failures of the job itself are reported through
    /// state, only precondition violations come back as errors.
    pub async fn submit(self: &Arc<Self>, document: DocumentUpload) -> Result<(), SubmitRejected> {
        if let Some(reason) = document.missing_part() {
            return Err(SubmitRejected::InvalidInput(reason.to_string()));
        }

        let generation = {
            let mut guard = self.inner.lock().await;
            if guard.job.phase.is_active() {
                return Err(SubmitRejected::AlreadyInProgress {
                    phase: guard.job.phase,
                });
            }
            guard.cancel_poll_task();
            guard.generation += 1;
            guard.job = Job {
                phase: JobPhase::Submitting,
                progress: self.synthesizer.initial(),
                submitted_at: Some(Utc::now()),
                ..Job::default()
            };
            self.publish(&guard.job);
            guard.generation
        };

        info!(
            filename = %document.filename,
            bytes = document.bytes.len(),
            generation,
            "submitting document"
        );
        let outcome = self.endpoint.submit(&document).await;

        let mut guard = self.inner.lock().await;
        if !guard.is_current(generation, JobPhase::Submitting) {
            debug!(generation, "discarding stale submit response");
            return Ok(());
        }

        match outcome {
            Ok(job_id) => {
                let jitter = jitter_for(&job_id, 0, self.synthesizer.config().jitter_span);
                guard.job.progress = self.synthesizer.next(0, None, guard.job.progress, jitter);
                info!(%job_id, "job accepted; polling for status");
                guard.job.job_id = Some(job_id);
                guard.job.phase = JobPhase::Polling;
                self.publish(&guard.job);
                guard.poll_task = Some(self.spawn_poll_loop(generation));
            }
            Err(err) => {
                self.fail(&mut guard, err.into());
            }
        }
        Ok(())
    }

    /// Returns to `Idle` from any phase, cancelling pending polls.
    pub async fn reset(&self) {
        let mut guard = self.inner.lock().await;
        guard.cancel_poll_task();
        guard.generation += 1;
        if guard.job == Job::default() {
            return;
        }
        debug!(generation = guard.generation, "job reset");
        guard.job = Job::default();
        self.publish(&guard.job);
    }

    /// Fetches the result again for a completed job whose first fetch failed.
    pub async fn retry_result_fetch(&self) {
        let (generation, job_id) = {
            let guard = self.inner.lock().await;
            if guard.job.phase != JobPhase::Completed || guard.job.result.is_some() {
                return;
            }
            match guard.job.job_id.clone() {
                Some(job_id) => (guard.generation, job_id),
                None => return,
            }
        };
        let outcome = self.endpoint.fetch(&job_id).await;
        self.apply_result(generation, &job_id, outcome).await;
    }

    fn spawn_poll_loop(self: &Arc<Self>, generation: u64) -> JoinHandle<()> {
        let controller: Weak<Self> = Arc::downgrade(self);
        let deadline = Instant::now().checked_add(self.config.max_poll_duration);
        tokio::spawn(async move {
            let mut consecutive_failures = 0u32;
            loop {
                let Some(controller) = controller.upgrade() else {
                    return;
                };
                let cycle = controller
                    .poll_once(generation, deadline, &mut consecutive_failures)
                    .await;
                if let PollCycle::Stop = cycle {
                    return;
                }
                let interval = controller.config.poll_interval;
                drop(controller);
                tokio::time::sleep(interval).await;
            }
        })
    }

    async fn poll_once(
        self: &Arc<Self>,
        generation: u64,
        deadline: Option<Instant>,
        consecutive_failures: &mut u32,
    ) -> PollCycle {
        let (job_id, attempt) = {
            let mut guard = self.inner.lock().await;
            if !guard.is_current(generation, JobPhase::Polling) {
                return PollCycle::Stop;
            }
            if deadline.is_some_and(|deadline| Instant::now() >= deadline) {
                let error = self.stall_error();
                self.fail(&mut guard, error);
                return PollCycle::Stop;
            }
            let Some(job_id) = guard.job.job_id.clone() else {
                return PollCycle::Stop;
            };
            guard.job.poll_attempt += 1;
            (job_id, guard.job.poll_attempt)
        };

        let request = self.endpoint.poll(&job_id);
        let outcome = match deadline {
            Some(deadline) => tokio::time::timeout_at(deadline, request).await,
            None => Ok(request.await),
        };
        if self.is_abandoned() {
            debug!(%job_id, attempt, "controller dropped; ignoring poll response");
            return PollCycle::Stop;
        }

        let mut guard = self.inner.lock().await;
        if !guard.is_current(generation, JobPhase::Polling) {
            debug!(%job_id, attempt, "discarding stale poll response");
            return PollCycle::Stop;
        }
        let Ok(outcome) = outcome else {
            let error = self.stall_error();
            self.fail(&mut guard, error);
            return PollCycle::Stop;
        };

        match outcome {
            Ok(status) => {
                *consecutive_failures = 0;
                match status.state {
                    RemoteJobState::Running => {
                        let jitter =
                            jitter_for(&job_id, attempt, self.synthesizer.config().jitter_span);
                        let next = self.synthesizer.next(
                            attempt,
                            status.progress,
                            guard.job.progress,
                            jitter,
                        );
                        if next != guard.job.progress {
                            guard.job.progress = next;
                            self.publish(&guard.job);
                        }
                        PollCycle::Continue
                    }
                    RemoteJobState::Completed => {
                        info!(%job_id, attempt, "job completed");
                        guard.job.phase = JobPhase::Completed;
                        guard.job.progress = COMPLETE_PROGRESS;
                        guard.job.finished_at = Some(Utc::now());
                        self.publish(&guard.job);
                        drop(guard);
                        let outcome = self.endpoint.fetch(&job_id).await;
                        if self.is_abandoned() {
                            debug!(%job_id, "controller dropped; ignoring result");
                            return PollCycle::Stop;
                        }
                        self.apply_result(generation, &job_id, outcome).await;
                        PollCycle::Stop
                    }
                    RemoteJobState::Failed => {
                        let reason = status
                            .reason
                            .filter(|reason| !reason.trim().is_empty())
                            .unwrap_or_else(|| "analysis job failed".to_string());
                        self.fail(&mut guard, JobError::new(ErrorCode::JobFailed, reason));
                        PollCycle::Stop
                    }
                }
            }
            Err(EndpointError::NotFound(detail)) => {
                // The backend has not indexed the job yet.
                *consecutive_failures = 0;
                debug!(%job_id, attempt, %detail, "job not visible yet");
                PollCycle::Continue
            }
            Err(err) => {
                *consecutive_failures += 1;
                warn!(
                    %job_id,
                    attempt,
                    consecutive_failures = *consecutive_failures,
                    error = %err,
                    "status poll failed"
                );
                if *consecutive_failures >= self.config.max_consecutive_failures.max(1) {
                    self.fail(&mut guard, err.into());
                    PollCycle::Stop
                } else {
                    PollCycle::Continue
                }
            }
        }
    }

    async fn apply_result(
        &self,
        generation: u64,
        job_id: &JobId,
        outcome: Result<serde_json::Value, EndpointError>,
    ) {
        let mut guard = self.inner.lock().await;
        if !guard.is_current(generation, JobPhase::Completed) {
            debug!(%job_id, "discarding stale result");
            return;
        }
        match outcome {
            Ok(result) => {
                guard.job.result = Some(result);
                self.publish(&guard.job);
            }
            Err(err) => {
                warn!(%job_id, error = %err, "job finished but its result is unavailable");
                let _ = self.events.send(JobEvent::Warning(JobError::new(
                    ErrorCode::ResultUnavailable,
                    format!("result for job {job_id} is unavailable: {err}"),
                )));
            }
        }
    }

    /// Only the poll task still holds the controller; its owner is gone.
    fn is_abandoned(self: &Arc<Self>) -> bool {
        Arc::strong_count(self) == 1
    }

    fn stall_error(&self) -> JobError {
        JobError::new(
            ErrorCode::Timeout,
            format!(
                "job did not finish within {}s",
                self.config.max_poll_duration.as_secs()
            ),
        )
    }

    fn fail(&self, state: &mut ControllerState, error: JobError) {
        warn!(
            job_id = ?state.job.job_id,
            code = ?error.code,
            message = %error.message,
            "job failed"
        );
        state.job.phase = JobPhase::Failed;
        state.job.last_error = Some(error);
        state.job.finished_at = Some(Utc::now());
        self.publish(&state.job);
    }

    fn publish(&self, job: &Job) {
        let _ = self.events.send(JobEvent::StateChanged(job.clone()));
    }
}

impl Drop for JobController {
    fn drop(&mut self) {
        self.inner.get_mut().cancel_poll_task();
    }
}

#[cfg(test)]
#[path = "tests/controller_tests.rs"]
mod tests;
