use cassa_print_migrations::{migrate, sql::m000001::M000001_MIGRATION, MigrateError};
use helpers::with_test_db;
use sqlx::query;

mod helpers;

#[tokio::test]
async fn migration_install_schema_and_second_migration_does_not_harm() {
    with_test_db(|test_db| async move {
        query("drop schema if exists cassa cascade")
            .execute(&test_db.test_pool)
            .await
            .unwrap();

        migrate(&test_db.test_pool, "cassa")
            .await
            .expect("Failed to migrate");

        let migrations = test_db.get_migrations().await;
        assert_eq!(migrations.len(), 2);
        assert_eq!(migrations[0].id, 1);
        assert!(!migrations[1].breaking);

        test_db.add_jobs(&["cucina"]).await;
        let jobs = test_db.get_jobs().await;
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].queue_name(), "cucina");

        for _ in 0..3 {
            migrate(&test_db.test_pool, "cassa")
                .await
                .expect("Failed to migrate");
        }

        let jobs = test_db.get_jobs().await;
        assert_eq!(jobs.len(), 1);
        assert_eq!(test_db.get_migrations().await.len(), 2);
    })
    .await;
}

#[tokio::test]
async fn migration_takes_over_from_partially_migrated_schema() {
    with_test_db(|test_db| async move {
        let initial_stmts = &[
            "drop schema if exists cassa cascade",
            "create schema cassa",
            "create table cassa.migrations(id int primary key, ts timestamptz default now() not null, breaking boolean default false not null)",
            "insert into cassa.migrations (id) values (1)",
        ];

        let mut tx = test_db.test_pool.begin().await.unwrap();
        for stmt in initial_stmts {
            query(stmt).execute(tx.as_mut()).await.unwrap();
        }
        M000001_MIGRATION
            .execute(&mut tx, "cassa")
            .await
            .expect("Failed to execute migration");
        tx.commit().await.unwrap();

        migrate(&test_db.test_pool, "cassa")
            .await
            .expect("Failed to migrate");

        let migrations = test_db.get_migrations().await;
        assert_eq!(
            migrations.iter().map(|m| m.id).collect::<Vec<_>>(),
            vec![1, 2]
        );

        test_db.add_jobs(&["bar"]).await;
        assert_eq!(test_db.get_jobs().await.len(), 1);
    })
    .await;
}

#[tokio::test]
async fn aborts_if_database_is_more_up_to_date_than_current_build() {
    with_test_db(|test_db| async move {
        query("insert into cassa.migrations (id, ts, breaking) values (999999, '2026-01-19T10:31:00Z', true)")
            .execute(&test_db.test_pool)
            .await
            .unwrap();

        let migration_result = migrate(&test_db.test_pool, "cassa").await;

        assert!(
            matches!(
                migration_result,
                Err(MigrateError::IncompatibleRevision { latest_migration, latest_breaking_migration, highest_migration })
                if latest_migration == 999999 && latest_breaking_migration == 999999 && highest_migration == 2
            ),
            "Expected migration to abort because the database is ahead of this build"
        );
    })
    .await;
}

#[tokio::test]
async fn queue_name_cannot_be_changed_once_stored() {
    with_test_db(|test_db| async move {
        let jobs = test_db.add_jobs(&["cucina"]).await;

        let result = query("update cassa.jobs set queue_name = 'bar' where id = $1")
            .bind(jobs[0].id())
            .execute(&test_db.test_pool)
            .await;

        let error = result.expect_err("queue name update should be rejected");
        let code = error
            .as_database_error()
            .and_then(|e| e.code())
            .map(|code| code.into_owned());
        assert_eq!(code.as_deref(), Some("CPQNI"));

        query("update cassa.jobs set attempts = 1 where id = $1")
            .bind(jobs[0].id())
            .execute(&test_db.test_pool)
            .await
            .expect("other columns stay writable");
    })
    .await;
}

#[tokio::test]
async fn sent_jobs_cannot_keep_an_error() {
    with_test_db(|test_db| async move {
        let jobs = test_db.add_jobs(&["cucina"]).await;

        let result = query("update cassa.jobs set state = 'sent', last_error = 'boom' where id = $1")
            .bind(jobs[0].id())
            .execute(&test_db.test_pool)
            .await;

        assert!(result.is_err());
    })
    .await;
}
