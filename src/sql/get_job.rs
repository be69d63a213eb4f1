use cassa_print_job::Job;
use indoc::formatdoc;
use sqlx::{query_as, PgExecutor};

use crate::errors::Result;

pub async fn get_job<'e>(
    executor: impl PgExecutor<'e>,
    escaped_schema: &str,
    job_id: i64,
) -> Result<Option<Job>> {
    let sql = formatdoc!(
        r#"
            select * from {escaped_schema}.jobs where id = $1::bigint
        "#
    );

    let job = query_as(&sql).bind(job_id).fetch_optional(executor).await?;
    Ok(job)
}
