use cassa_print_job::Job;
use indoc::formatdoc;
use sqlx::{query, PgExecutor};

use crate::errors::Result;

/// Puts a claimed job back to `pending` and gives its attempt back.
#[tracing::instrument(skip(executor, escaped_schema), err, fields(otel.kind="client", db.system="postgresql"))]
pub async fn revert_to_pending<'e>(
    executor: impl PgExecutor<'e>,
    escaped_schema: &str,
    job_id: i64,
    reason: &str,
) -> Result<()> {
    let sql = formatdoc!(
        r#"
            update {escaped_schema}.jobs
                set
                    state = 'pending',
                    attempts = greatest(0, coalesce(attempts, 0) - 1),
                    last_error = $2::text,
                    locked_at = null
                where id = $1::bigint
        "#
    );

    query(&sql)
        .bind(job_id)
        .bind(reason)
        .execute(executor)
        .await?;

    Ok(())
}

/// Hands back jobs that were claimed but never attempted, e.g. on shutdown.
pub async fn return_jobs<'e>(
    executor: impl PgExecutor<'e>,
    escaped_schema: &str,
    jobs: &[Job],
) -> Result<()> {
    if jobs.is_empty() {
        return Ok(());
    }

    let job_ids: Vec<i64> = jobs.iter().map(|j| *j.id()).collect();

    let sql = formatdoc!(
        r#"
            update {escaped_schema}.jobs
                set
                    state = 'pending',
                    attempts = greatest(0, coalesce(attempts, 0) - 1),
                    locked_at = null
                where id = any($1::bigint[])
                and state = 'processing'
        "#
    );

    query(&sql).bind(&job_ids).execute(executor).await?;

    Ok(())
}
