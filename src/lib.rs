//! Print-job queue and dispatcher of a restaurant point of sale.
//!
//! Orders produce printable jobs ("comande") stored in PostgreSQL. The
//! [`PrintOrchestrator`] tries to print them as soon as the order is saved and
//! the [`Worker`] (the `comande_worker` binary) picks up whatever is left.
//!
//! ```no_run
//! use cassa_print::{save_order, DispatchClient, JobStore, NewOrder, NewOrderItem, PrintOptions, PrintOrchestrator};
//!
//! # async fn example(pg_pool: sqlx::PgPool) -> Result<(), Box<dyn std::error::Error>> {
//! let store = JobStore::new(pg_pool, "cassa".to_string());
//! let orchestrator = PrintOrchestrator::new(store, DispatchClient::default(), PrintOptions::default());
//!
//! let saved = save_order(
//!     &orchestrator,
//!     NewOrder {
//!         customer_name: "Rossi".to_string(),
//!         table_id: Some(4),
//!         covers: 2,
//!         discount_cents: 0,
//!         staff: false,
//!         items: vec![NewOrderItem {
//!             product_id: 1,
//!             quantity: 2,
//!             unit_price_cents: 750,
//!             description: Some("Margherita".to_string()),
//!         }],
//!     },
//! )
//! .await?;
//! println!("order {} saved, print status {:?}", saved.order_id, saved.print_status);
//! # Ok(())
//! # }
//! ```

pub mod builder;
pub mod dispatch;
pub mod errors;
pub mod orchestrator;
pub mod order;
pub mod redispatch;
pub mod render;
pub mod runner;
pub mod sql;
pub mod store;
pub mod utils;

pub use crate::builder::{WorkerBuildError, WorkerOptions};
pub use crate::dispatch::{command_args, DispatchClient, DispatchError, DispatchResult};
pub use crate::errors::CassaPrintError;
pub use crate::orchestrator::{OrderContext, OrderLine, PrintOptions, PrintOrchestrator};
pub use crate::order::{save_order, NewOrder, NewOrderItem, OrderSaved, SaveOrderError};
pub use crate::redispatch::{
    redispatch_job, redispatch_job_with_stale_after, AuthContext, RedispatchError,
    RedispatchOutcome,
};
pub use crate::runner::{RunOutcome, RunSummary, Worker, WorkerRuntimeError};
pub use crate::sql::claim_jobs::{Claim, ClaimStrategy, LockSettings};
pub use crate::sql::finalize_job::JobOutcome;
pub use crate::store::JobStore;
pub use cassa_print_job::*;
pub use cassa_print_shutdown_signal::{manual_shutdown, ShutdownSignal, ShutdownTrigger};
