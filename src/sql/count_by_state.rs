use cassa_print_job::PrintStatus;
use indoc::formatdoc;
use sqlx::{query_as, PgExecutor};

use crate::errors::Result;

/// Counts the jobs of one order by reportable state. `processing` rows are ignored.
pub async fn count_by_state<'e>(
    executor: impl PgExecutor<'e>,
    escaped_schema: &str,
    order_id: i64,
) -> Result<PrintStatus> {
    let sql = formatdoc!(
        r#"
            select
                count(*) filter (where state = 'sent') as sent,
                count(*) filter (where state = 'pending') as pending,
                count(*) filter (where state = 'error') as error
            from {escaped_schema}.jobs
            where order_id = $1::bigint
        "#
    );

    let (sent, pending, error): (i64, i64, i64) =
        query_as(&sql).bind(order_id).fetch_one(executor).await?;

    Ok(PrintStatus {
        sent,
        pending,
        error,
    })
}
