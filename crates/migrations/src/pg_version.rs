use sqlx::{query, PgExecutor, Row};

use crate::MigrateError;

/// Oldest server release with every feature the job store relies on.
const MIN_SERVER_VERSION_NUM: u32 = 120000;

/// Fetches the server version and checks it against [`check_postgres_version`].
pub async fn fetch_and_check_postgres_version<'e, E>(executor: E) -> Result<u32, MigrateError>
where
    E: PgExecutor<'e>,
{
    let row = query("select current_setting('server_version_num') as server_version_num")
        .fetch_one(executor)
        .await?;
    let version_string: String = row.try_get("server_version_num")?;

    check_postgres_version(&version_string)
}

/// `hashtextextended` (advisory lock key) and `skip locked` both need 12+.
pub fn check_postgres_version(version_string: &str) -> Result<u32, MigrateError> {
    let version = version_string.parse::<u32>()?;

    if version < MIN_SERVER_VERSION_NUM {
        return Err(MigrateError::IncompatibleVersion(version));
    }

    Ok(version)
}
