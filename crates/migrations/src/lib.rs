pub mod pg_version;
pub mod sql;

use indoc::formatdoc;
use pg_version::{check_postgres_version, fetch_and_check_postgres_version};
use sql::CASSA_MIGRATIONS;
use sqlx::{query, query_as, Acquire, Error as SqlxError, FromRow, PgExecutor, Postgres};
use thiserror::Error;
use tracing::{info, warn};

/// SQLSTATE raised when the migrations table does not exist yet.
const UNDEFINED_TABLE: &str = "42P01";

#[derive(Error, Debug)]
pub enum MigrateError {
    #[error("Error occured while parsing postgres version: {0}")]
    ParseVersionError(#[from] std::num::ParseIntError),
    #[error("cassa_print requires PostgreSQL v12.0 or greater (detected `server_version_num` = {0})")]
    IncompatibleVersion(u32),
    #[error("Database is using cassa_print schema revision {latest_migration} which includes breaking migration {latest_breaking_migration}, but this build only supports up to revision {highest_migration}")]
    IncompatibleRevision {
        latest_migration: i32,
        latest_breaking_migration: i32,
        highest_migration: u32,
    },
    #[error("Error occured while migrating: {0}")]
    SqlError(#[from] sqlx::Error),
}

/// Creates the schema and its `migrations` bookkeeping table.
async fn install_schema<'e, E>(executor: E, escaped_schema: &str) -> Result<(), MigrateError>
where
    E: PgExecutor<'e> + Acquire<'e, Database = Postgres> + Clone,
{
    let version = fetch_and_check_postgres_version(executor.clone()).await?;
    info!(pg_version = version, schema = escaped_schema, "Installing cassa_print schema");

    let create_schema_query = formatdoc!(
        r#"
            create schema if not exists {escaped_schema};
        "#
    );

    let create_migration_table_query = formatdoc!(
        r#"
            create table {escaped_schema}.migrations (
                id int primary key,
                ts timestamptz default now() not null,
                breaking boolean not null default false
            );
        "#
    );

    let mut tx = executor.begin().await?;
    query(&create_schema_query).execute(tx.as_mut()).await?;
    query(&create_migration_table_query)
        .execute(tx.as_mut())
        .await?;
    tx.commit().await?;

    Ok(())
}

#[derive(FromRow, Default)]
pub struct LastMigration {
    server_version_num: String,
    id: Option<i32>,
    biggest_breaking_id: Option<i32>,
}

/// Returns the last migration applied to the schema, installing the schema on first run.
async fn get_last_migration<'e, E>(
    executor: &E,
    escaped_schema: &str,
) -> Result<LastMigration, MigrateError>
where
    E: PgExecutor<'e> + Acquire<'e, Database = Postgres> + Send + Sync + Clone,
{
    let migrations_status_query = formatdoc!(
        r#"
            select current_setting('server_version_num') as server_version_num,
            (select id from {escaped_schema}.migrations order by id desc limit 1) as id,
            (select id from {escaped_schema}.migrations where breaking is true order by id desc limit 1) as biggest_breaking_id;
        "#
    );
    let last_migration_query_result = query_as::<_, LastMigration>(&migrations_status_query)
        .fetch_one(executor.clone())
        .await;

    match last_migration_query_result {
        Err(SqlxError::Database(e)) if e.code().as_deref() == Some(UNDEFINED_TABLE) => {
            install_schema(executor.clone(), escaped_schema).await?;
            let server_version_num = fetch_and_check_postgres_version(executor.clone())
                .await?
                .to_string();
            Ok(LastMigration {
                server_version_num,
                ..Default::default()
            })
        }
        Err(e) => Err(MigrateError::SqlError(e)),
        Ok(row) => Ok(row),
    }
}

impl LastMigration {
    fn is_before_number(&self, migration_number: u32) -> bool {
        match self.id.and_then(|id| u32::try_from(id).ok()) {
            Some(id) => migration_number > id,
            None => true,
        }
    }
}

/// Brings the job store schema up to date.
///
/// Each migration runs in its own transaction together with its bookkeeping
/// row, so a failure leaves the schema at the previous revision.
pub async fn migrate<'e, E>(executor: E, escaped_schema: &str) -> Result<(), MigrateError>
where
    E: PgExecutor<'e> + Acquire<'e, Database = Postgres> + Send + Sync + Clone,
{
    let last_migration = get_last_migration(&executor, escaped_schema).await?;

    check_postgres_version(&last_migration.server_version_num)?;
    let latest_migration = last_migration.id;
    let latest_breaking_migration = last_migration.biggest_breaking_id;

    let mut highest_migration = 0;
    let mut migrated = false;
    for migration in CASSA_MIGRATIONS.iter() {
        let migration_number = migration.migration_number();
        highest_migration = highest_migration.max(migration_number);

        if last_migration.is_before_number(migration_number) {
            migrated = true;
            info!(
                migration_number,
                migration_name = migration.name(),
                is_breaking_migration = migration.is_breaking(),
                "Running migration {}",
                migration.name(),
            );
            let mut tx = executor.clone().begin().await?;
            migration.execute(&mut tx, escaped_schema).await?;
            let sql =
                format!("insert into {escaped_schema}.migrations (id, breaking) values ($1, $2)");
            query(&sql)
                .bind(migration_number as i32)
                .bind(migration.is_breaking())
                .execute(tx.as_mut())
                .await?;

            tx.commit().await?;
        }
    }

    if migrated {
        info!("Migrations complete");
    }

    if let Some(latest_breaking_migration) = latest_breaking_migration {
        if highest_migration < latest_breaking_migration as u32 {
            return Err(MigrateError::IncompatibleRevision {
                latest_migration: latest_migration.unwrap_or(0),
                latest_breaking_migration,
                highest_migration,
            });
        }
    }

    if let Some(latest_migration) = latest_migration {
        if highest_migration < latest_migration as u32 {
            warn!(
                latest_migration,
                highest_migration,
                "Database schema is at revision {}, newer than the {} revisions this build knows about. Attempting to continue regardless.",
                latest_migration,
                highest_migration,
            );
        }
    }

    Ok(())
}
