use indoc::formatdoc;
use sqlx::{query, PgExecutor};

use crate::errors::Result;

/// How a claimed job ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    /// The print command accepted the job
    Sent,
    /// The print failed or the job cannot be printed, `error` until redispatched
    Failed(String),
    /// Local infrastructure failed before the printer was reached, back to `pending`
    Deferred(String),
}

#[tracing::instrument(skip(executor, escaped_schema), err, fields(otel.kind="client", db.system="postgresql"))]
pub async fn finalize_job<'e>(
    executor: impl PgExecutor<'e>,
    escaped_schema: &str,
    job_id: i64,
    outcome: &JobOutcome,
) -> Result<()> {
    match outcome {
        JobOutcome::Sent => {
            let sql = formatdoc!(
                r#"
                    update {escaped_schema}.jobs
                        set state = 'sent', last_error = null, sent_at = now(), locked_at = null
                        where id = $1::bigint
                "#
            );
            query(&sql).bind(job_id).execute(executor).await?;
        }
        JobOutcome::Failed(message) => {
            let sql = formatdoc!(
                r#"
                    update {escaped_schema}.jobs
                        set state = 'error', last_error = $2::text, locked_at = null
                        where id = $1::bigint
                "#
            );
            query(&sql)
                .bind(job_id)
                .bind(message)
                .execute(executor)
                .await?;
        }
        JobOutcome::Deferred(message) => {
            let sql = formatdoc!(
                r#"
                    update {escaped_schema}.jobs
                        set state = 'pending', last_error = $2::text, locked_at = null
                        where id = $1::bigint
                "#
            );
            query(&sql)
                .bind(job_id)
                .bind(message)
                .execute(executor)
                .await?;
        }
    }

    Ok(())
}
