#![allow(dead_code)]

use std::os::unix::fs::PermissionsExt;
use std::path::PathBuf;
use std::time::Duration;

use cassa_print::{
    manual_shutdown, DispatchClient, Job, JobStore, PrintOptions, PrintOrchestrator, WorkerOptions,
};
use cassa_print_migrations::migrate;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgConnectOptions;
use sqlx::{FromRow, PgPool};
use tokio::sync::OnceCell;
use tokio::task::LocalSet;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

pub const SCHEMA: &str = "cassa";

#[derive(FromRow, Debug)]
pub struct Migration {
    pub id: i32,
    pub ts: DateTime<Utc>,
    pub breaking: bool,
}

#[derive(FromRow, Debug)]
pub struct OrderRecord {
    pub id: i64,
    pub customer_name: String,
    pub covers: i32,
    pub cover_charge_cents: i64,
    pub discount_cents: i64,
    pub total_cents: i64,
    pub staff: bool,
}

/// Ids of the reference data created by [`TestDatabase::seed_menu`].
#[derive(Debug, Clone, Copy)]
pub struct Menu {
    pub table_id: i32,
    /// Department printing on `cucina`
    pub pizza: i32,
    pub lasagne: i32,
    /// Department printing on `bar`
    pub spritz: i32,
    /// Department without a printer
    pub bread: i32,
    /// Department whose printer name is not a valid queue
    pub grappa: i32,
}

#[derive(Clone, Debug)]
pub struct TestDatabase {
    pub source_pool: PgPool,
    pub test_pool: PgPool,
    pub name: String,
}

impl TestDatabase {
    async fn drop(&self) {
        self.test_pool.close().await;
        sqlx::query(&format!("DROP DATABASE {} WITH (FORCE)", self.name))
            .execute(&self.source_pool)
            .await
            .expect("Failed to drop test database");
    }

    pub fn store(&self) -> JobStore {
        JobStore::new(self.test_pool.clone(), SCHEMA.to_string())
    }

    /// Worker options for tests: no pause between jobs and a shutdown signal
    /// that never fires.
    pub fn create_worker_options(&self) -> WorkerOptions {
        let (_trigger, never) = manual_shutdown();
        WorkerOptions::default()
            .pg_pool(self.test_pool.clone())
            .schema(SCHEMA)
            .pause(Duration::ZERO)
            .shutdown_signal(never)
    }

    pub fn orchestrator(&self, dispatch: DispatchClient) -> PrintOrchestrator {
        PrintOrchestrator::new(self.store(), dispatch, PrintOptions::default())
    }

    pub async fn get_jobs(&self) -> Vec<Job> {
        sqlx::query_as("select * from cassa.jobs order by id asc")
            .fetch_all(&self.test_pool)
            .await
            .expect("Failed to get jobs")
    }

    pub async fn get_migrations(&self) -> Vec<Migration> {
        sqlx::query_as("select * from cassa.migrations order by id asc")
            .fetch_all(&self.test_pool)
            .await
            .expect("Failed to get migrations")
    }

    pub async fn get_order(&self, order_id: i64) -> Option<OrderRecord> {
        sqlx::query_as(
            r#"
                select id, customer_name, covers, cover_charge_cents, discount_cents, total_cents, staff
                    from cassa.orders
                    where id = $1
            "#,
        )
        .bind(order_id)
        .fetch_optional(&self.test_pool)
        .await
        .expect("Failed to get order")
    }

    /// Inserts a bare order so jobs have something to point to.
    pub async fn create_order(&self) -> i64 {
        sqlx::query_scalar("insert into cassa.orders (customer_name) values ('Test') returning id")
            .fetch_one(&self.test_pool)
            .await
            .expect("Failed to create order")
    }

    /// Adds one pending job per queue name, in the given order.
    pub async fn add_jobs(&self, queue_names: &[&str]) -> Vec<Job> {
        let order_id = self.create_order().await;
        let store = self.store();
        let mut jobs = Vec::with_capacity(queue_names.len());
        for (i, queue_name) in queue_names.iter().enumerate() {
            let job = store
                .insert(order_id, queue_name, &format!("ticket {i} for {queue_name}"))
                .await
                .expect("Failed to add job");
            jobs.push(job);
        }
        jobs
    }

    pub async fn set_attempts(&self, job_id: i64, attempts: i32) {
        sqlx::query("update cassa.jobs set attempts = $2 where id = $1")
            .bind(job_id)
            .bind(attempts)
            .execute(&self.test_pool)
            .await
            .expect("Failed to set attempts");
    }

    pub async fn set_state(&self, job_id: i64, state: &str, last_error: Option<&str>) {
        sqlx::query("update cassa.jobs set state = $2, last_error = $3 where id = $1")
            .bind(job_id)
            .bind(state)
            .bind(last_error)
            .execute(&self.test_pool)
            .await
            .expect("Failed to set state");
    }

    /// `sent` jobs carry no error and only `error` or `pending` jobs carry one.
    pub async fn assert_error_invariant(&self) {
        let violations: i64 = sqlx::query_scalar(
            r#"
                select count(*) from cassa.jobs
                    where (state = 'sent' and last_error is not null)
                    or (last_error is not null and state not in ('error', 'pending'))
            "#,
        )
        .fetch_one(&self.test_pool)
        .await
        .expect("Failed to check jobs");
        assert_eq!(violations, 0, "jobs violate the last_error invariant");
    }

    pub async fn set_cover_charge(&self, cents: i64) {
        sqlx::query(
            r#"
                insert into cassa.settings (key, value) values ('cover_charge', $1)
                    on conflict (key) do update set value = excluded.value
            "#,
        )
        .bind(cents.to_string())
        .execute(&self.test_pool)
        .await
        .expect("Failed to set cover charge");
    }

    pub async fn seed_menu(&self) -> Menu {
        let department = |name: &'static str, queue: Option<&'static str>| {
            let pool = self.test_pool.clone();
            async move {
                sqlx::query_scalar::<_, i32>(
                    "insert into cassa.departments (name, queue_name) values ($1, $2) returning id",
                )
                .bind(name)
                .bind(queue)
                .fetch_one(&pool)
                .await
                .expect("Failed to insert department")
            }
        };
        let cucina = department("Cucina", Some(" cucina ")).await;
        let bar = department("Bar", Some("bar")).await;
        let forno = department("Forno", None).await;
        let distillati = department("Distillati", Some("bar grappe!")).await;

        let product = |description: &'static str, price_cents: i64, department_id: i32| {
            let pool = self.test_pool.clone();
            async move {
                sqlx::query_scalar::<_, i32>(
                    r#"
                        insert into cassa.products (description, price_cents, department_id)
                            values ($1, $2, $3)
                            returning id
                    "#,
                )
                .bind(description)
                .bind(price_cents)
                .bind(department_id)
                .fetch_one(&pool)
                .await
                .expect("Failed to insert product")
            }
        };

        let table_id: i32 =
            sqlx::query_scalar("insert into cassa.dining_tables (name) values ('Terrazza 4') returning id")
                .fetch_one(&self.test_pool)
                .await
                .expect("Failed to insert table");

        Menu {
            table_id,
            pizza: product("Pizza Margherita", 800, cucina).await,
            lasagne: product("Lasagne\nal forno", 1100, cucina).await,
            spritz: product("Spritz", 500, bar).await,
            bread: product("Pane", 150, forno).await,
            grappa: product("Grappa", 400, distillati).await,
        }
    }
}

pub async fn create_test_database() -> TestDatabase {
    let db_url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set");
    let mut pg_conn_options: PgConnectOptions =
        db_url.parse().expect("Failed to parse DATABASE_URL");
    pg_conn_options = pg_conn_options.application_name("__test_cassa_print");

    let pg_pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(4)
        .connect_with(pg_conn_options.clone())
        .await
        .expect("Failed to connect to database");

    let db_id = uuid::Uuid::now_v7();
    let db_name = format!("__test_cassa_print_{}", db_id.simple());

    sqlx::query(&format!("CREATE DATABASE {}", db_name))
        .execute(&pg_pool)
        .await
        .expect("Failed to create test database");

    let test_options = pg_conn_options.database(&db_name);

    let test_pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(6)
        .connect_with(test_options)
        .await
        .expect("Failed to connect to test database");

    migrate(&test_pool, SCHEMA)
        .await
        .expect("Failed to migrate test database");

    TestDatabase {
        source_pool: pg_pool,
        test_pool,
        name: db_name,
    }
}

pub async fn with_test_db<F, Fut>(test_fn: F)
where
    F: FnOnce(TestDatabase) -> Fut + 'static,
    Fut: std::future::Future<Output = ()>,
{
    let local_set = LocalSet::new();

    local_set
        .run_until(async move {
            let test_db = create_test_database().await;
            let test_db_2 = test_db.clone();

            let result = tokio::task::spawn_local(async move {
                test_fn(test_db_2).await;
            })
            .await;

            test_db.drop().await;
            result.expect("Test failed");
        })
        .await;
}

/// A stand-in for `lp` that records every call and exits with a fixed status.
pub struct FakeLp {
    dir: tempfile::TempDir,
    pub path: PathBuf,
}

impl FakeLp {
    pub fn new(exit_code: i32, output: &str) -> Self {
        let dir = tempfile::tempdir().expect("Failed to create temp dir");
        let path = dir.path().join("lp");
        let calls = dir.path().join("calls.log");
        let payloads = dir.path().join("payloads.log");

        let script = format!(
            "#!/bin/sh\n\
             printf '%s %s\\n' \"$1\" \"$2\" >> '{calls}'\n\
             cat \"$3\" >> '{payloads}'\n\
             echo '{output}'\n\
             exit {exit_code}\n",
            calls = calls.display(),
            payloads = payloads.display(),
        );
        std::fs::write(&path, script).expect("Failed to write fake lp");
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755))
            .expect("Failed to make fake lp executable");

        Self { dir, path }
    }

    pub fn succeeding() -> Self {
        Self::new(0, "request id is fake-1 (1 file(s))")
    }

    pub fn failing(output: &str) -> Self {
        Self::new(1, output)
    }

    pub fn client(&self) -> DispatchClient {
        DispatchClient::new(&self.path, Duration::from_secs(5))
    }

    /// Queue of every call, in call order.
    pub fn queues(&self) -> Vec<String> {
        std::fs::read_to_string(self.dir.path().join("calls.log"))
            .unwrap_or_default()
            .lines()
            .map(|line| line.trim_start_matches("-d ").to_string())
            .collect()
    }

    /// Every payload received, concatenated.
    pub fn payloads(&self) -> String {
        std::fs::read_to_string(self.dir.path().join("payloads.log")).unwrap_or_default()
    }
}

/// A client whose print command cannot be found.
pub fn missing_lp() -> DispatchClient {
    DispatchClient::new("/nonexistent/cassa_print/lp", Duration::from_secs(1))
}

pub async fn enable_logs() {
    static ONCE: OnceCell<()> = OnceCell::const_new();

    ONCE.get_or_init(|| async {
        let fmt_layer = tracing_subscriber::fmt::layer();
        // Log level set to debug except for sqlx set at warn (to not show all sql requests)
        let filter_layer = EnvFilter::try_new("debug,sqlx=warn").unwrap();

        tracing_subscriber::registry()
            .with(filter_layer)
            .with(fmt_layer)
            .init();
    })
    .await;
}
