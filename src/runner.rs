use std::fmt::{Display, Formatter};
use std::time::Duration;

use cassa_print_job::Job;
use cassa_print_shutdown_signal::{has_fired, ShutdownSignal};
use getset::Getters;
use thiserror::Error;
use tracing::{error, info, warn};

use crate::builder::WorkerOptions;
use crate::dispatch::{DispatchClient, DispatchError, TOOL_UNAVAILABLE_REASON};
use crate::errors::CassaPrintError;
use crate::sql::claim_jobs::{Claim, ClaimStrategy, LockSettings};
use crate::sql::finalize_job::JobOutcome;
use crate::store::JobStore;

/// Drains the print queue in batches.
///
/// A run claims a batch, prints it job by job and exits. Several workers
/// may run at the same time, claims never overlap.
#[derive(Getters)]
#[getset(get = "pub")]
pub struct Worker {
    /// Unique identifier for this worker instance
    pub(crate) worker_id: String,
    pub(crate) store: JobStore,
    pub(crate) dispatch: DispatchClient,
    pub(crate) batch_limit: i64,
    pub(crate) max_attempts: i32,
    /// Sleep between two dispatched jobs
    pub(crate) pause: Duration,
    /// Jobs are marked sent without printing
    pub(crate) dry_run: bool,
    pub(crate) claim_strategy: ClaimStrategy,
    pub(crate) lock: LockSettings,
    /// Stops a run between two jobs
    pub(crate) shutdown_signal: ShutdownSignal,
}

/// Errors that abort a run. The binary exits with status 1 on these.
#[derive(Error, Debug)]
pub enum WorkerRuntimeError {
    #[error("Could not claim jobs : '{0}'")]
    ClaimJobs(#[source] CassaPrintError),
    #[error("Unexpected error occured while processing job : '{0}'")]
    ReleaseJob(#[from] ReleaseJobError),
    #[error("Could not return unprocessed jobs : '{0}'")]
    ReturnJobs(#[source] CassaPrintError),
}

/// Error that occurs when the outcome of a job cannot be written.
#[derive(Error, Debug)]
#[error("Failed to release job '{job_id}'. {source}")]
pub struct ReleaseJobError {
    job_id: i64,
    #[source]
    source: CassaPrintError,
}

impl ReleaseJobError {
    pub fn job_id(&self) -> i64 {
        self.job_id
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// No eligible job was pending
    NothingToDo,
    /// The claim lock could not be taken, the next run will retry
    LockUnavailable,
    /// A batch was claimed and handled
    Processed,
}

/// What one run did with the jobs it claimed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunSummary {
    pub outcome: RunOutcome,
    pub claimed: usize,
    pub sent: usize,
    pub failed: usize,
    /// Handed back because the print command is missing
    pub reverted: usize,
    /// Handed back after a local failure before printing
    pub deferred: usize,
    /// Handed back untouched on shutdown
    pub returned: usize,
}

impl RunSummary {
    fn new(outcome: RunOutcome, claimed: usize) -> Self {
        Self {
            outcome,
            claimed,
            sent: 0,
            failed: 0,
            reverted: 0,
            deferred: 0,
            returned: 0,
        }
    }

    fn record(&mut self, step: JobStep) {
        match step {
            JobStep::Sent | JobStep::Simulated => self.sent += 1,
            JobStep::Failed | JobStep::InvalidQueue => self.failed += 1,
            JobStep::Reverted => self.reverted += 1,
            JobStep::Deferred => self.deferred += 1,
        }
    }
}

impl Display for RunSummary {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self.outcome {
            RunOutcome::NothingToDo => write!(f, "no pending jobs"),
            RunOutcome::LockUnavailable => write!(f, "could not acquire lock"),
            RunOutcome::Processed => write!(
                f,
                "claimed={} sent={} failed={} reverted={} deferred={} returned={}",
                self.claimed, self.sent, self.failed, self.reverted, self.deferred, self.returned
            ),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum JobStep {
    Sent,
    Simulated,
    Failed,
    InvalidQueue,
    Reverted,
    Deferred,
}

impl JobStep {
    /// Whether a printer was (or would have been) driven for this job.
    fn pauses(&self) -> bool {
        matches!(
            self,
            JobStep::Sent | JobStep::Simulated | JobStep::Failed | JobStep::Deferred
        )
    }
}

impl Worker {
    /// Creates a new `WorkerOptions` builder with default settings.
    pub fn options() -> WorkerOptions {
        WorkerOptions::default()
    }

    /// Claims one batch and handles it, job by job in creation order.
    ///
    /// Each job outcome is committed on its own, so an error returned here
    /// leaves the jobs handled so far as they are. Jobs not reached yet go
    /// back to `pending` before the error is returned.
    #[tracing::instrument(skip_all, fields(worker_id = %self.worker_id))]
    pub async fn run_once(&self) -> Result<RunSummary, WorkerRuntimeError> {
        let tool_available = self.dry_run || self.dispatch.is_available();
        if !tool_available {
            warn!(
                binary = %self.dispatch.binary().display(),
                "Print command unavailable, claimed jobs will be handed back"
            );
        }

        let claim = self
            .store
            .claim_batch(
                self.batch_limit,
                self.max_attempts,
                self.claim_strategy,
                &self.lock,
            )
            .await
            .map_err(WorkerRuntimeError::ClaimJobs)?;

        let jobs = match claim {
            Claim::LockUnavailable => {
                warn!(retries = self.lock.retries, "Could not acquire lock, exiting");
                return Ok(RunSummary::new(RunOutcome::LockUnavailable, 0));
            }
            Claim::Claimed(jobs) if jobs.is_empty() => {
                info!("No pending jobs");
                return Ok(RunSummary::new(RunOutcome::NothingToDo, 0));
            }
            Claim::Claimed(jobs) => jobs,
        };

        info!(count = jobs.len(), dry_run = self.dry_run, "Claimed jobs");
        let mut summary = RunSummary::new(RunOutcome::Processed, jobs.len());

        for (index, job) in jobs.iter().enumerate() {
            if has_fired(&self.shutdown_signal) {
                let remaining = &jobs[index..];
                warn!(remaining = remaining.len(), "Shutdown requested, returning unprocessed jobs");
                self.store
                    .return_jobs(remaining)
                    .await
                    .map_err(WorkerRuntimeError::ReturnJobs)?;
                summary.returned = remaining.len();
                break;
            }

            let step = match self.process_job(job, tool_available).await {
                Ok(step) => step,
                Err(e) => {
                    // The failed job stays `processing` until an operator reprints it.
                    let remaining = &jobs[index + 1..];
                    if let Err(return_error) = self.store.return_jobs(remaining).await {
                        error!(
                            remaining = remaining.len(),
                            error = %return_error,
                            "Could not return unprocessed jobs"
                        );
                    }
                    return Err(e.into());
                }
            };
            summary.record(step);

            if step.pauses() && index + 1 < jobs.len() {
                self.sleep_between_jobs().await;
            }
        }

        info!(%summary, "Run complete");
        Ok(summary)
    }

    async fn process_job(&self, job: &Job, tool_available: bool) -> Result<JobStep, ReleaseJobError> {
        let job_id = *job.id();

        let queue = match job.queue() {
            Ok(queue) => queue,
            Err(e) => {
                warn!(job_id, error = %e, "Refusing to print job");
                let outcome = JobOutcome::Failed(format!("invalid queue name: {}", job.queue_name()));
                self.release(job_id, &outcome).await?;
                return Ok(JobStep::InvalidQueue);
            }
        };

        if self.dry_run {
            info!(
                job_id,
                queue_name = %queue,
                payload_len = job.payload().len(),
                "Dry run, marking job as sent"
            );
            self.release(job_id, &JobOutcome::Sent).await?;
            return Ok(JobStep::Simulated);
        }

        if !tool_available {
            self.revert(job_id).await?;
            return Ok(JobStep::Reverted);
        }

        match self.dispatch.send(&queue, job.payload()).await {
            Ok(result) if result.success => {
                info!(job_id, queue_name = %queue, "Job printed");
                self.release(job_id, &JobOutcome::Sent).await?;
                Ok(JobStep::Sent)
            }
            Ok(result) => {
                let message = result.failure_message();
                if *job.attempts() >= self.max_attempts {
                    error!(job_id, queue_name = %queue, output = %message, attempts = job.attempts(), "Job max attempts reached");
                } else {
                    warn!(job_id, queue_name = %queue, output = %message, attempts = job.attempts(), "Print failed");
                }
                self.release(job_id, &JobOutcome::Failed(message)).await?;
                Ok(JobStep::Failed)
            }
            Err(DispatchError::ToolUnavailable) => {
                self.revert(job_id).await?;
                Ok(JobStep::Reverted)
            }
            Err(e) => {
                warn!(job_id, queue_name = %queue, error = %e, "Could not hand job to the print command");
                self.release(job_id, &JobOutcome::Deferred(e.to_string()))
                    .await?;
                Ok(JobStep::Deferred)
            }
        }
    }

    async fn release(&self, job_id: i64, outcome: &JobOutcome) -> Result<(), ReleaseJobError> {
        self.store
            .finalize(job_id, outcome)
            .await
            .map_err(|source| ReleaseJobError { job_id, source })
    }

    async fn revert(&self, job_id: i64) -> Result<(), ReleaseJobError> {
        self.store
            .revert_to_pending(job_id, TOOL_UNAVAILABLE_REASON)
            .await
            .map_err(|source| ReleaseJobError { job_id, source })
    }

    async fn sleep_between_jobs(&self) {
        if self.pause.is_zero() {
            return;
        }

        tokio::select! {
            _ = tokio::time::sleep(self.pause) => {}
            _ = self.shutdown_signal.clone() => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_summary_counts_steps() {
        let mut summary = RunSummary::new(RunOutcome::Processed, 6);
        for step in [
            JobStep::Sent,
            JobStep::Simulated,
            JobStep::Failed,
            JobStep::InvalidQueue,
            JobStep::Reverted,
            JobStep::Deferred,
        ] {
            summary.record(step);
        }

        assert_eq!(summary.sent, 2);
        assert_eq!(summary.failed, 2);
        assert_eq!(summary.reverted, 1);
        assert_eq!(summary.deferred, 1);
        assert_eq!(
            summary.to_string(),
            "claimed=6 sent=2 failed=2 reverted=1 deferred=1 returned=0"
        );
    }

    #[test]
    fn test_invalid_and_reverted_jobs_do_not_pause() {
        assert!(!JobStep::InvalidQueue.pauses());
        assert!(!JobStep::Reverted.pauses());
        assert!(JobStep::Simulated.pauses());
        assert!(JobStep::Failed.pauses());
    }

    #[test]
    fn test_summary_display_without_batch() {
        assert_eq!(
            RunSummary::new(RunOutcome::LockUnavailable, 0).to_string(),
            "could not acquire lock"
        );
        assert_eq!(
            RunSummary::new(RunOutcome::NothingToDo, 0).to_string(),
            "no pending jobs"
        );
    }
}
