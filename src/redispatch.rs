use std::time::Duration;

use cassa_print_job::{InvalidQueueName, JobState};
use chrono::Utc;
use thiserror::Error;
use tracing::{info, warn};

use crate::dispatch::{DispatchClient, DispatchError, TOOL_UNAVAILABLE_REASON};
use crate::errors::CassaPrintError;
use crate::sql::finalize_job::JobOutcome;
use crate::store::JobStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Admin,
    Operator,
}

/// Identity of whoever triggers an operator action, established by the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthContext {
    pub username: String,
    pub role: Role,
}

impl AuthContext {
    pub fn admin(username: &str) -> Self {
        Self {
            username: username.into(),
            role: Role::Admin,
        }
    }

    pub fn operator(username: &str) -> Self {
        Self {
            username: username.into(),
            role: Role::Operator,
        }
    }

    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RedispatchOutcome {
    /// The stored payload was printed again
    Sent { job_id: i64, attempts: i32 },
}

#[derive(Error, Debug)]
pub enum RedispatchError {
    #[error("Only administrators can reprint a job")]
    Forbidden,
    #[error("Job {0} does not exist")]
    NotFound(i64),
    #[error("Print command is not available, job left untouched")]
    DispatchUnavailable,
    #[error("Job has an unprintable destination: {0}")]
    InvalidQueueName(#[from] InvalidQueueName),
    #[error("Job {0} is being printed right now")]
    AlreadyProcessing(i64),
    #[error("Print failed: {0}")]
    PrintFailed(String),
    #[error(transparent)]
    Store(#[from] CassaPrintError),
}

/// How long a job may stay `processing` before an operator can take it over.
pub const DEFAULT_STALE_AFTER: Duration = Duration::from_secs(10 * 60);

/// Prints the stored payload of `job_id` again on operator request.
///
/// Whatever the job state and attempt count, except a job that was claimed
/// less than [`DEFAULT_STALE_AFTER`] ago and may still be printing.
pub async fn redispatch_job(
    auth: &AuthContext,
    store: &JobStore,
    dispatch: &DispatchClient,
    job_id: i64,
) -> Result<RedispatchOutcome, RedispatchError> {
    redispatch_job_with_stale_after(auth, store, dispatch, job_id, DEFAULT_STALE_AFTER).await
}

/// [`redispatch_job`] with a custom age after which a `processing` job is
/// considered abandoned by a crashed or killed run.
#[tracing::instrument(skip(auth, store, dispatch), fields(username = %auth.username))]
pub async fn redispatch_job_with_stale_after(
    auth: &AuthContext,
    store: &JobStore,
    dispatch: &DispatchClient,
    job_id: i64,
    stale_after: Duration,
) -> Result<RedispatchOutcome, RedispatchError> {
    if !auth.is_admin() {
        warn!("Redispatch refused to non administrator");
        return Err(RedispatchError::Forbidden);
    }

    let job = store
        .get_job(job_id)
        .await?
        .ok_or(RedispatchError::NotFound(job_id))?;

    if !dispatch.is_available() {
        return Err(RedispatchError::DispatchUnavailable);
    }

    if *job.state() == JobState::Processing {
        if !job.is_stale(stale_after, Utc::now()) {
            return Err(RedispatchError::AlreadyProcessing(job_id));
        }
        warn!(job_id, locked_at = ?job.locked_at(), "Taking over a job abandoned in processing");
    }

    let queue = match job.queue() {
        Ok(queue) => queue,
        Err(e) => {
            store
                .finalize(job_id, &JobOutcome::Failed(format!("invalid queue name: {}", e.0)))
                .await?;
            return Err(e.into());
        }
    };

    let job = store
        .reclaim_one(job_id, stale_after)
        .await?
        .ok_or(RedispatchError::AlreadyProcessing(job_id))?;

    let result = match dispatch.send(&queue, job.payload()).await {
        Ok(result) => result,
        Err(DispatchError::ToolUnavailable) => {
            store.revert_to_pending(job_id, TOOL_UNAVAILABLE_REASON).await?;
            return Err(RedispatchError::DispatchUnavailable);
        }
        Err(e) => {
            let message = e.to_string();
            store
                .finalize(job_id, &JobOutcome::Failed(message.clone()))
                .await?;
            return Err(RedispatchError::PrintFailed(message));
        }
    };

    if result.success {
        store.finalize(job_id, &JobOutcome::Sent).await?;
        info!(job_id, queue_name = %queue, attempts = job.attempts(), "Job reprinted");
        Ok(RedispatchOutcome::Sent {
            job_id,
            attempts: *job.attempts(),
        })
    } else {
        let message = result.failure_message();
        store
            .finalize(job_id, &JobOutcome::Failed(message.clone()))
            .await?;
        warn!(job_id, queue_name = %queue, output = %message, "Reprint failed");
        Err(RedispatchError::PrintFailed(message))
    }
}
