use cassa_print_job::PrintStatus;
use serde::Serialize;
use thiserror::Error;
use tracing::info;

use crate::errors::CassaPrintError;
use crate::orchestrator::{OrderContext, OrderLine, PrintOrchestrator};
use crate::sql::orders::{get_cover_charge_cents, insert_order, insert_order_item, OrderRow};

/// Receipt description used when the till sent none.
pub const UNKNOWN_PRODUCT: &str = "Prodotto Sconosciuto";

pub const MAX_CUSTOMER_NAME_CHARS: usize = 100;
pub const MAX_QUANTITY: i32 = 9_999;
pub const MAX_UNIT_PRICE_CENTS: i64 = 9_999_999;
pub const MAX_COVERS: i32 = 999;
pub const MAX_DISCOUNT_CENTS: i64 = 99_999_999;
pub const MAX_TOTAL_CENTS: i64 = 99_999_999;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewOrderItem {
    pub product_id: i32,
    pub quantity: i32,
    pub unit_price_cents: i64,
    pub description: Option<String>,
}

/// An order as entered at the till. Totals are computed on save.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewOrder {
    pub customer_name: String,
    pub table_id: Option<i32>,
    pub covers: i32,
    pub discount_cents: i64,
    /// Staff meals are free
    pub staff: bool,
    pub items: Vec<NewOrderItem>,
}

/// Amounts of an order, in cents.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OrderTotals {
    pub subtotal_cents: i64,
    pub cover_charge_cents: i64,
    pub covers_total_cents: i64,
    pub discount_cents: i64,
    pub total_cents: i64,
}

/// Computes the totals of `order` with a per-cover charge of `cover_charge_cents`.
///
/// Staff orders have no cover charge, no discount and a zero total. Other
/// totals never go below zero. Amounts that do not fit the till's range
/// are refused instead of wrapping.
pub fn compute_totals(
    order: &NewOrder,
    cover_charge_cents: i64,
) -> Result<OrderTotals, SaveOrderError> {
    let subtotal_cents = order
        .items
        .iter()
        .try_fold(0i64, |acc, item| {
            item.unit_price_cents
                .checked_mul(i64::from(item.quantity))
                .and_then(|line| acc.checked_add(line))
        })
        .ok_or(SaveOrderError::TotalOutOfRange)?;

    if order.staff {
        return Ok(OrderTotals {
            subtotal_cents,
            ..Default::default()
        });
    }

    let covers_total_cents = i64::from(order.covers)
        .checked_mul(cover_charge_cents)
        .ok_or(SaveOrderError::TotalOutOfRange)?;
    let total_cents = subtotal_cents
        .checked_add(covers_total_cents)
        .map(|gross| gross.saturating_sub(order.discount_cents).max(0))
        .filter(|total| *total <= MAX_TOTAL_CENTS)
        .ok_or(SaveOrderError::TotalOutOfRange)?;

    Ok(OrderTotals {
        subtotal_cents,
        cover_charge_cents,
        covers_total_cents,
        discount_cents: order.discount_cents,
        total_cents,
    })
}

/// Response of a successful save. `print_status` is left out when it could not be read.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OrderSaved {
    pub order_id: i64,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub print_status: Option<PrintStatus>,
}

#[derive(Error, Debug)]
pub enum SaveOrderError {
    #[error("Order has no items")]
    EmptyOrder,
    #[error("Customer name is longer than 100 characters")]
    CustomerNameTooLong,
    #[error("Invalid line for product {product_id}: quantity must be 1 to 9999 and price at most 99999.99")]
    InvalidItem { product_id: i32 },
    #[error("Covers must be between 0 and 999")]
    InvalidCovers,
    #[error("Discount must be between 0 and 999999.99")]
    InvalidDiscount,
    #[error("Order total must be between 0 and 999999.99")]
    TotalOutOfRange,
    #[error("Could not save order: {0}")]
    Store(#[from] CassaPrintError),
}

impl From<sqlx::Error> for SaveOrderError {
    fn from(value: sqlx::Error) -> Self {
        SaveOrderError::Store(value.into())
    }
}

fn validate(order: &NewOrder) -> Result<(), SaveOrderError> {
    if order.items.is_empty() {
        return Err(SaveOrderError::EmptyOrder);
    }
    if order.customer_name.chars().count() > MAX_CUSTOMER_NAME_CHARS {
        return Err(SaveOrderError::CustomerNameTooLong);
    }
    if !(0..=MAX_COVERS).contains(&order.covers) {
        return Err(SaveOrderError::InvalidCovers);
    }
    if !(0..=MAX_DISCOUNT_CENTS).contains(&order.discount_cents) {
        return Err(SaveOrderError::InvalidDiscount);
    }
    if let Some(item) = order.items.iter().find(|item| {
        !(1..=MAX_QUANTITY).contains(&item.quantity)
            || !(0..=MAX_UNIT_PRICE_CENTS).contains(&item.unit_price_cents)
    }) {
        return Err(SaveOrderError::InvalidItem {
            product_id: item.product_id,
        });
    }
    Ok(())
}

/// Persists `order` and its lines in one transaction, then prints it.
///
/// Once the transaction is committed the order is saved: printing problems
/// only show up in the returned `print_status`.
#[tracing::instrument(skip_all, fields(customer_name = %order.customer_name, items = order.items.len()))]
pub async fn save_order(
    orchestrator: &PrintOrchestrator,
    order: NewOrder,
) -> Result<OrderSaved, SaveOrderError> {
    validate(&order)?;

    let store = orchestrator.store();
    let escaped_schema = store.escaped_schema();
    let mut tx = store.pg_pool().begin().await?;

    let cover_charge_cents = if order.staff {
        0
    } else {
        get_cover_charge_cents(tx.as_mut(), escaped_schema).await?
    };
    let totals = compute_totals(&order, cover_charge_cents)?;

    let order_id = insert_order(
        tx.as_mut(),
        escaped_schema,
        &OrderRow {
            customer_name: &order.customer_name,
            table_id: order.table_id,
            covers: order.covers,
            cover_charge_cents: totals.cover_charge_cents,
            discount_cents: totals.discount_cents,
            total_cents: totals.total_cents,
            staff: order.staff,
        },
    )
    .await?;

    for item in &order.items {
        insert_order_item(
            tx.as_mut(),
            escaped_schema,
            order_id,
            item.product_id,
            item.quantity,
            item.unit_price_cents,
            item.description.as_deref(),
        )
        .await?;
    }

    tx.commit().await?;
    info!(order_id, total_cents = totals.total_cents, "Order saved");

    let context = OrderContext {
        order_id,
        customer_name: order.customer_name,
        table_id: order.table_id,
        covers: order.covers,
        cover_charge_cents: totals.cover_charge_cents,
        discount_cents: totals.discount_cents,
        total_cents: totals.total_cents,
        items: order
            .items
            .into_iter()
            .map(|item| OrderLine {
                description: item
                    .description
                    .unwrap_or_else(|| UNKNOWN_PRODUCT.to_string()),
                quantity: item.quantity,
                unit_price_cents: item.unit_price_cents,
            })
            .collect(),
    };

    let print_status = orchestrator.print_order(&context).await;

    Ok(OrderSaved {
        order_id,
        message: "Ordine salvato con successo".to_string(),
        print_status,
    })
}
