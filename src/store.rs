use std::time::Duration;

use cassa_print_job::{Job, PrintStatus};
use getset::Getters;
use sqlx::PgPool;

use crate::errors::Result;
use crate::sql::claim_jobs::{claim_job, claim_jobs, Claim, ClaimStrategy, LockSettings};
use crate::sql::count_by_state::count_by_state;
use crate::sql::finalize_job::{finalize_job, JobOutcome};
use crate::sql::get_job::get_job;
use crate::sql::insert_job::insert_job;
use crate::sql::return_jobs::{return_jobs, revert_to_pending};

/// Durable print queue backed by the `jobs` table.
///
/// Every call runs on its own pooled connection and commits on return, so
/// the state written for one job never waits on the rest of a batch.
#[derive(Clone, Debug, Getters)]
#[getset(get = "pub")]
pub struct JobStore {
    pg_pool: PgPool,
    escaped_schema: String,
}

impl JobStore {
    /// `escaped_schema` must already be quoted, see [`crate::utils::escape_identifier`].
    pub fn new(pg_pool: PgPool, escaped_schema: String) -> Self {
        Self {
            pg_pool,
            escaped_schema,
        }
    }

    pub async fn insert(&self, order_id: i64, queue_name: &str, payload: &str) -> Result<Job> {
        insert_job(
            &self.pg_pool,
            &self.escaped_schema,
            order_id,
            queue_name,
            payload,
        )
        .await
    }

    /// Claims up to `limit` pending jobs with fewer than `max_attempts` attempts, oldest first.
    pub async fn claim_batch(
        &self,
        limit: i64,
        max_attempts: i32,
        strategy: ClaimStrategy,
        lock: &LockSettings,
    ) -> Result<Claim> {
        claim_jobs(
            &self.pg_pool,
            &self.escaped_schema,
            limit,
            max_attempts,
            strategy,
            lock,
        )
        .await
    }

    /// Claims `job_id` unless it is already `processing`. `None` when unknown or busy.
    pub async fn claim_one(&self, job_id: i64) -> Result<Option<Job>> {
        claim_job(&self.pg_pool, &self.escaped_schema, job_id, None).await
    }

    /// Like [`JobStore::claim_one`], also taking over a `processing` job claimed at least `stale_after` ago.
    pub async fn reclaim_one(&self, job_id: i64, stale_after: Duration) -> Result<Option<Job>> {
        claim_job(&self.pg_pool, &self.escaped_schema, job_id, Some(stale_after)).await
    }

    pub async fn finalize(&self, job_id: i64, outcome: &JobOutcome) -> Result<()> {
        finalize_job(&self.pg_pool, &self.escaped_schema, job_id, outcome).await
    }

    pub async fn revert_to_pending(&self, job_id: i64, reason: &str) -> Result<()> {
        revert_to_pending(&self.pg_pool, &self.escaped_schema, job_id, reason).await
    }

    pub async fn return_jobs(&self, jobs: &[Job]) -> Result<()> {
        return_jobs(&self.pg_pool, &self.escaped_schema, jobs).await
    }

    pub async fn count_by_state(&self, order_id: i64) -> Result<PrintStatus> {
        count_by_state(&self.pg_pool, &self.escaped_schema, order_id).await
    }

    pub async fn get_job(&self, job_id: i64) -> Result<Option<Job>> {
        get_job(&self.pg_pool, &self.escaped_schema, job_id).await
    }
}
