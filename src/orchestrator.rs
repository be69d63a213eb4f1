use cassa_print_job::{Job, PrintStatus, QueueName};
use chrono::{DateTime, Local};
use tracing::{debug, error, info, warn};

use crate::dispatch::{DispatchClient, DispatchError, TOOL_UNAVAILABLE_REASON};
use crate::errors::Result;
use crate::render::{render_department_ticket, render_receipt};
use crate::sql::finalize_job::JobOutcome;
use crate::sql::orders::{get_department_items, get_table_name, DepartmentItem};
use crate::store::JobStore;

pub const DEFAULT_RECEIPT_QUEUE: &str = "cassa";
pub const DEFAULT_VENUE_NAME: &str = "BRES & BARACA RISTORANTE";
/// Table name printed when the order has no table or it cannot be read.
pub const UNKNOWN_TABLE: &str = "N/A";

/// Where and how order-time printing happens.
#[derive(Debug, Clone)]
pub struct PrintOptions {
    /// Printer of the customer receipt, `None` to skip the receipt
    receipt_queue: Option<QueueName>,
    /// Header line of the receipt
    venue_name: String,
}

impl Default for PrintOptions {
    fn default() -> Self {
        Self {
            receipt_queue: QueueName::parse(DEFAULT_RECEIPT_QUEUE).ok(),
            venue_name: DEFAULT_VENUE_NAME.to_string(),
        }
    }
}

impl PrintOptions {
    pub fn receipt_queue(mut self, value: Option<QueueName>) -> Self {
        self.receipt_queue = value;
        self
    }

    pub fn venue_name(mut self, value: &str) -> Self {
        self.venue_name = value.into();
        self
    }
}

/// One line of a committed order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderLine {
    pub description: String,
    pub quantity: i32,
    pub unit_price_cents: i64,
}

impl OrderLine {
    pub fn line_total_cents(&self) -> i64 {
        self.unit_price_cents * i64::from(self.quantity)
    }
}

/// A committed order as the print layer sees it. Money is in cents.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderContext {
    pub order_id: i64,
    pub customer_name: String,
    pub table_id: Option<i32>,
    pub covers: i32,
    /// Charge per cover
    pub cover_charge_cents: i64,
    pub discount_cents: i64,
    /// Authoritative total stored with the order
    pub total_cents: i64,
    pub items: Vec<OrderLine>,
}

impl OrderContext {
    pub fn covers_total_cents(&self) -> i64 {
        i64::from(self.covers) * self.cover_charge_cents
    }
}

/// Prints everything an order needs right after it is committed.
///
/// The receipt is fire and forget. Department tickets become jobs first, so
/// whatever cannot be printed now is left for the queue worker.
#[derive(Debug)]
pub struct PrintOrchestrator {
    store: JobStore,
    dispatch: DispatchClient,
    options: PrintOptions,
}

impl PrintOrchestrator {
    pub fn new(store: JobStore, dispatch: DispatchClient, options: PrintOptions) -> Self {
        Self {
            store,
            dispatch,
            options,
        }
    }

    pub fn store(&self) -> &JobStore {
        &self.store
    }

    /// Prints the receipt and department tickets of `order`.
    ///
    /// Never fails: problems are logged and the print state of the order is
    /// returned when it can still be read.
    #[tracing::instrument(skip_all, fields(order_id = order.order_id))]
    pub async fn print_order(&self, order: &OrderContext) -> Option<PrintStatus> {
        let table_name = self.resolve_table_name(order).await;
        let printed_at = Local::now();

        self.print_receipt(order, &table_name, &printed_at).await;

        if let Err(e) = self
            .print_department_tickets(order, &table_name, &printed_at)
            .await
        {
            error!(error = %e, "Could not queue department tickets");
        }

        match self.store.count_by_state(order.order_id).await {
            Ok(status) => Some(status),
            Err(e) => {
                warn!(error = %e, "Print status unavailable");
                None
            }
        }
    }

    async fn resolve_table_name(&self, order: &OrderContext) -> String {
        let Some(table_id) = order.table_id else {
            return UNKNOWN_TABLE.to_string();
        };

        match get_table_name(self.store.pg_pool(), self.store.escaped_schema(), table_id).await {
            Ok(Some(name)) => name,
            Ok(None) => UNKNOWN_TABLE.to_string(),
            Err(e) => {
                warn!(table_id, error = %e, "Could not read table name");
                UNKNOWN_TABLE.to_string()
            }
        }
    }

    async fn print_receipt(&self, order: &OrderContext, table_name: &str, printed_at: &DateTime<Local>) {
        let Some(queue) = &self.options.receipt_queue else {
            return;
        };

        if !self.dispatch.is_available() {
            warn!(queue_name = %queue, "Print command unavailable, receipt not printed");
            return;
        }

        let payload = render_receipt(&self.options.venue_name, order, table_name, printed_at);
        match self.dispatch.send(queue, &payload).await {
            Ok(result) if result.success => {
                info!(queue_name = %queue, "Receipt printed");
            }
            Ok(result) => {
                error!(
                    queue_name = %queue,
                    exit_code = ?result.exit_code,
                    output = %result.raw_output,
                    "Receipt print failed"
                );
            }
            Err(e) => {
                error!(queue_name = %queue, error = %e, "Receipt print failed");
            }
        }
    }

    async fn print_department_tickets(
        &self,
        order: &OrderContext,
        table_name: &str,
        printed_at: &DateTime<Local>,
    ) -> Result<()> {
        let items = get_department_items(
            self.store.pg_pool(),
            self.store.escaped_schema(),
            order.order_id,
        )
        .await?;

        for group in group_by_queue(&items) {
            let queue = match QueueName::parse(group.queue_name) {
                Ok(queue) => queue,
                Err(e) => {
                    warn!(error = %e, "Skipping department ticket");
                    continue;
                }
            };

            let payload = render_department_ticket(
                group.department_name,
                order,
                table_name,
                &group.items,
                printed_at,
            );

            let job = match self.store.insert(order.order_id, queue.as_str(), &payload).await {
                Ok(job) => job,
                Err(e) => {
                    error!(queue_name = %queue, error = %e, "Could not store department ticket");
                    continue;
                }
            };

            if let Err(e) = self.dispatch_inline(&job, &queue).await {
                error!(job_id = job.id(), queue_name = %queue, error = %e, "Inline dispatch failed");
            }
        }

        Ok(())
    }

    /// Tries to print a freshly stored job now instead of waiting for the worker.
    async fn dispatch_inline(&self, job: &Job, queue: &QueueName) -> Result<()> {
        if !self.dispatch.is_available() {
            debug!(job_id = job.id(), "Print command unavailable, job left pending");
            return Ok(());
        }

        let Some(job) = self.store.claim_one(*job.id()).await? else {
            debug!(job_id = job.id(), "Job already claimed elsewhere");
            return Ok(());
        };

        let outcome = match self.dispatch.send(queue, job.payload()).await {
            Ok(result) if result.success => JobOutcome::Sent,
            Ok(result) => JobOutcome::Failed(result.failure_message()),
            Err(DispatchError::ToolUnavailable) => {
                self.store
                    .revert_to_pending(*job.id(), TOOL_UNAVAILABLE_REASON)
                    .await?;
                return Ok(());
            }
            Err(e) => JobOutcome::Failed(e.to_string()),
        };

        match &outcome {
            JobOutcome::Sent => info!(job_id = job.id(), queue_name = %queue, "Department ticket printed"),
            _ => warn!(job_id = job.id(), queue_name = %queue, outcome = ?outcome, "Department ticket not printed"),
        }

        self.store.finalize(*job.id(), &outcome).await
    }
}

struct QueueGroup<'a> {
    queue_name: &'a str,
    department_name: &'a str,
    items: Vec<&'a DepartmentItem>,
}

/// Splits items already sorted by queue into one group per queue. The first
/// department seen on a queue names its ticket.
fn group_by_queue(items: &[DepartmentItem]) -> Vec<QueueGroup<'_>> {
    let mut groups: Vec<QueueGroup<'_>> = Vec::new();

    for item in items {
        match groups.last_mut() {
            Some(group) if group.queue_name == item.queue_name() => group.items.push(item),
            _ => groups.push(QueueGroup {
                queue_name: item.queue_name(),
                department_name: item.department_name(),
                items: vec![item],
            }),
        }
    }

    groups
}
