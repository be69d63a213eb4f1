use cassa_print_job::Job;
use indoc::formatdoc;
use sqlx::{query_as, PgExecutor};
use tracing::debug;

use crate::errors::Result;

/// Stores a new `pending` job for `order_id`.
#[tracing::instrument(skip(executor, escaped_schema, payload), err, fields(otel.kind="client", db.system="postgresql"))]
pub async fn insert_job<'e>(
    executor: impl PgExecutor<'e>,
    escaped_schema: &str,
    order_id: i64,
    queue_name: &str,
    payload: &str,
) -> Result<Job> {
    let sql = formatdoc!(
        r#"
            insert into {escaped_schema}.jobs (order_id, queue_name, payload, state, attempts)
                values ($1::bigint, $2::text, $3::text, 'pending', 0)
                returning *
        "#
    );

    let job: Job = query_as(&sql)
        .bind(order_id)
        .bind(queue_name)
        .bind(payload)
        .fetch_one(executor)
        .await?;

    debug!(
        job_id = job.id(),
        order_id,
        queue_name,
        payload_len = payload.len(),
        "Job added to queue"
    );

    Ok(job)
}
