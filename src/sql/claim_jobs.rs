use std::fmt::{Display, Formatter};
use std::str::FromStr;
use std::time::Duration;

use cassa_print_job::Job;
use indoc::formatdoc;
use sqlx::{query, query_as, query_scalar, PgExecutor, PgPool, Postgres, Transaction};
use thiserror::Error;
use tracing::{debug, warn};

use crate::errors::Result;

/// Key of the advisory lock serializing claims when `skip locked` is not usable.
pub const CLAIM_LOCK_NAME: &str = "comande_worker_lock";

/// SQLSTATE codes meaning the server did not accept `for update skip locked`.
const SYNTAX_ERROR: &str = "42601";
const FEATURE_NOT_SUPPORTED: &str = "0A000";

/// How concurrent claimers keep out of each other's way.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ClaimStrategy {
    /// Row locks with `skip locked`, falling back to the advisory lock if the server rejects them
    #[default]
    Auto,
    /// Row locks with `skip locked` only
    SkipLocked,
    /// Always serialize claims behind [`CLAIM_LOCK_NAME`]
    AdvisoryLock,
}

impl ClaimStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            ClaimStrategy::Auto => "auto",
            ClaimStrategy::SkipLocked => "skip-locked",
            ClaimStrategy::AdvisoryLock => "advisory-lock",
        }
    }
}

impl Display for ClaimStrategy {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Error, Debug, PartialEq, Eq)]
#[error("Unknown claim strategy '{0}', expected one of auto, skip-locked, advisory-lock")]
pub struct UnknownClaimStrategy(pub String);

impl FromStr for ClaimStrategy {
    type Err = UnknownClaimStrategy;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "auto" => Ok(ClaimStrategy::Auto),
            "skip-locked" => Ok(ClaimStrategy::SkipLocked),
            "advisory-lock" => Ok(ClaimStrategy::AdvisoryLock),
            other => Err(UnknownClaimStrategy(other.to_string())),
        }
    }
}

/// Bounds on the advisory lock path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockSettings {
    /// Acquisition attempts before giving up
    pub retries: u32,
    /// How long a single attempt may wait for the lock
    pub lock_timeout: Duration,
    /// Sleep after the first failed attempt, doubled after each further one
    pub backoff_base: Duration,
}

impl Default for LockSettings {
    fn default() -> Self {
        Self {
            retries: 3,
            lock_timeout: Duration::from_secs(2),
            backoff_base: Duration::from_secs(1),
        }
    }
}

/// Result of a batch claim.
#[derive(Debug)]
pub enum Claim {
    /// Jobs now in `processing`, in creation order. May be empty.
    Claimed(Vec<Job>),
    /// Every advisory lock attempt failed, nothing was touched.
    LockUnavailable,
}

/// Delay to wait after failed attempt number `attempt` (1-based).
pub fn backoff_delay(base: Duration, attempt: u32) -> Duration {
    let exponent = attempt.saturating_sub(1).min(16);
    base.saturating_mul(1u32 << exponent)
}

fn is_skip_locked_unsupported(error: &sqlx::Error) -> bool {
    match error {
        sqlx::Error::Database(e) => matches!(
            e.code().as_deref(),
            Some(SYNTAX_ERROR) | Some(FEATURE_NOT_SUPPORTED)
        ),
        _ => false,
    }
}

/// Claims up to `limit` pending jobs that still have attempts left.
///
/// Claimed rows are `processing` with their attempt counter incremented once
/// this returns, and two concurrent callers never get the same job.
#[tracing::instrument(skip(pool, escaped_schema, lock), err, fields(otel.kind="client", db.system="postgresql"))]
pub async fn claim_jobs(
    pool: &PgPool,
    escaped_schema: &str,
    limit: i64,
    max_attempts: i32,
    strategy: ClaimStrategy,
    lock: &LockSettings,
) -> Result<Claim> {
    if strategy != ClaimStrategy::AdvisoryLock {
        match claim_skip_locked(pool, escaped_schema, limit, max_attempts).await {
            Ok(jobs) => return Ok(Claim::Claimed(jobs)),
            Err(e) if strategy == ClaimStrategy::Auto && is_skip_locked_unsupported(&e) => {
                warn!(error = %e, "Server rejected skip locked, claiming behind the advisory lock");
            }
            Err(e) => return Err(e.into()),
        }
    }

    claim_with_advisory_lock(pool, escaped_schema, limit, max_attempts, lock).await
}

async fn claim_skip_locked(
    pool: &PgPool,
    escaped_schema: &str,
    limit: i64,
    max_attempts: i32,
) -> std::result::Result<Vec<Job>, sqlx::Error> {
    let sql = formatdoc!(
        r#"
            select id from {escaped_schema}.jobs
                where state = 'pending'
                and coalesce(attempts, 0) < $1::int
                order by created_at asc, id asc
                limit $2::bigint
                for update
                skip locked
        "#
    );

    let mut tx = pool.begin().await?;
    let ids: Vec<i64> = query_scalar(&sql)
        .bind(max_attempts)
        .bind(limit)
        .fetch_all(tx.as_mut())
        .await?;

    let jobs = mark_processing(tx.as_mut(), escaped_schema, &ids).await?;
    tx.commit().await?;

    Ok(jobs)
}

async fn claim_with_advisory_lock(
    pool: &PgPool,
    escaped_schema: &str,
    limit: i64,
    max_attempts: i32,
    lock: &LockSettings,
) -> Result<Claim> {
    let sql = formatdoc!(
        r#"
            select id from {escaped_schema}.jobs
                where state = 'pending'
                and coalesce(attempts, 0) < $1::int
                order by created_at asc, id asc
                limit $2::bigint
                for update
        "#
    );

    for attempt in 1..=lock.retries.max(1) {
        let mut tx = pool.begin().await?;

        if let Err(e) = acquire_claim_lock(&mut tx, lock.lock_timeout).await {
            if let Err(rollback_error) = tx.rollback().await {
                debug!(error = %rollback_error, "Rollback after failed lock attempt failed");
            }
            let delay = backoff_delay(lock.backoff_base, attempt);
            warn!(
                attempt,
                retries = lock.retries,
                error = %e,
                delay_ms = delay.as_millis() as u64,
                "Could not acquire claim lock"
            );
            tokio::time::sleep(delay).await;
            continue;
        }

        let ids: Vec<i64> = query_scalar(&sql)
            .bind(max_attempts)
            .bind(limit)
            .fetch_all(tx.as_mut())
            .await?;
        let jobs = mark_processing(tx.as_mut(), escaped_schema, &ids).await?;
        // Commit releases the transaction scoped lock.
        tx.commit().await?;

        return Ok(Claim::Claimed(jobs));
    }

    Ok(Claim::LockUnavailable)
}

/// Takes the claim lock waiting at most `lock_timeout`.
///
/// The timeout only covers the advisory lock: the previous setting is put
/// back once it is held, so row locks taken afterwards wait as usual.
async fn acquire_claim_lock(
    tx: &mut Transaction<'_, Postgres>,
    lock_timeout: Duration,
) -> std::result::Result<(), sqlx::Error> {
    let previous_timeout: String = query_scalar("select current_setting('lock_timeout')")
        .fetch_one(tx.as_mut())
        .await?;
    query("select set_config('lock_timeout', $1::text, true)")
        .bind(format!("{}ms", lock_timeout.as_millis().max(1)))
        .execute(tx.as_mut())
        .await?;
    query("select pg_advisory_xact_lock(hashtextextended($1::text, 0))")
        .bind(CLAIM_LOCK_NAME)
        .execute(tx.as_mut())
        .await?;
    query("select set_config('lock_timeout', $1::text, true)")
        .bind(previous_timeout)
        .execute(tx.as_mut())
        .await?;

    Ok(())
}

async fn mark_processing<'e>(
    executor: impl PgExecutor<'e>,
    escaped_schema: &str,
    ids: &[i64],
) -> std::result::Result<Vec<Job>, sqlx::Error> {
    if ids.is_empty() {
        return Ok(vec![]);
    }

    let sql = formatdoc!(
        r#"
            update {escaped_schema}.jobs
                set
                    state = 'processing',
                    attempts = coalesce(attempts, 0) + 1,
                    locked_at = now()
                where id = any($1::bigint[])
                returning *
        "#
    );

    let mut jobs: Vec<Job> = query_as(&sql).bind(ids).fetch_all(executor).await?;
    jobs.sort_by(|a, b| (a.created_at(), a.id()).cmp(&(b.created_at(), b.id())));

    Ok(jobs)
}

/// Claims one given job, unless someone is already processing it.
///
/// With `stale_after`, a `processing` job claimed at least that long ago is
/// taken over, so a job left behind by a crashed run can be printed again.
/// Ignores the attempt budget: callers are the order-time inline path, which
/// just inserted the job, and operator redispatch.
#[tracing::instrument(skip(executor, escaped_schema), err, fields(otel.kind="client", db.system="postgresql"))]
pub async fn claim_job<'e>(
    executor: impl PgExecutor<'e>,
    escaped_schema: &str,
    job_id: i64,
    stale_after: Option<Duration>,
) -> Result<Option<Job>> {
    let sql = formatdoc!(
        r#"
            update {escaped_schema}.jobs
                set
                    state = 'processing',
                    attempts = coalesce(attempts, 0) + 1,
                    locked_at = now()
                where id = $1::bigint
                and (
                    state <> 'processing'
                    or (
                        $2::float8 is not null
                        and coalesce(locked_at, '-infinity'::timestamptz) <= now() - make_interval(secs => $2::float8)
                    )
                )
                returning *
        "#
    );

    let job = query_as(&sql)
        .bind(job_id)
        .bind(stale_after.map(|age| age.as_secs_f64()))
        .fetch_optional(executor)
        .await?;
    Ok(job)
}
