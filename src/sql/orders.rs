use getset::Getters;
use indoc::formatdoc;
use sqlx::{query, query_scalar, FromRow, PgExecutor};
use tracing::warn;

use crate::errors::Result;

/// Settings key holding the per-cover charge in cents.
pub const COVER_CHARGE_KEY: &str = "cover_charge";

/// A line of an order joined to the department that prepares it.
#[derive(FromRow, Getters, Debug, Clone, PartialEq, Eq)]
#[getset(get = "pub")]
pub struct DepartmentItem {
    description: String,
    quantity: i32,
    department_name: String,
    /// Trimmed printer queue of the department, never blank
    queue_name: String,
}

impl DepartmentItem {
    pub fn new(
        description: impl Into<String>,
        quantity: i32,
        department_name: impl Into<String>,
        queue_name: impl Into<String>,
    ) -> Self {
        Self {
            description: description.into(),
            quantity,
            department_name: department_name.into(),
            queue_name: queue_name.into(),
        }
    }
}

pub async fn get_table_name<'e>(
    executor: impl PgExecutor<'e>,
    escaped_schema: &str,
    table_id: i32,
) -> Result<Option<String>> {
    let sql = formatdoc!(
        r#"
            select name from {escaped_schema}.dining_tables where id = $1::int
        "#
    );

    let name = query_scalar(&sql)
        .bind(table_id)
        .fetch_optional(executor)
        .await?;
    Ok(name)
}

/// Items of `order_id` whose department prints somewhere, grouped by queue.
pub async fn get_department_items<'e>(
    executor: impl PgExecutor<'e>,
    escaped_schema: &str,
    order_id: i64,
) -> Result<Vec<DepartmentItem>> {
    let sql = formatdoc!(
        r#"
            select
                products.description,
                order_items.quantity,
                departments.name as department_name,
                btrim(departments.queue_name) as queue_name
            from {escaped_schema}.order_items as order_items
                join {escaped_schema}.products as products on order_items.product_id = products.id
                join {escaped_schema}.departments as departments on products.department_id = departments.id
            where order_items.order_id = $1::bigint
            and departments.queue_name is not null
            and btrim(departments.queue_name) <> ''
            order by btrim(departments.queue_name), departments.name, order_items.id
        "#
    );

    let items = sqlx::query_as(&sql)
        .bind(order_id)
        .fetch_all(executor)
        .await?;
    Ok(items)
}

/// Per-cover charge in cents, 0 when unset or unreadable.
pub async fn get_cover_charge_cents<'e>(
    executor: impl PgExecutor<'e>,
    escaped_schema: &str,
) -> Result<i64> {
    let sql = formatdoc!(
        r#"
            select value from {escaped_schema}.settings where key = $1::text
        "#
    );

    let value: Option<String> = query_scalar(&sql)
        .bind(COVER_CHARGE_KEY)
        .fetch_optional(executor)
        .await?;

    let Some(value) = value else {
        return Ok(0);
    };

    match value.trim().parse::<i64>() {
        Ok(cents) if cents >= 0 => Ok(cents),
        _ => {
            warn!(value = %value, "Ignoring unreadable cover charge setting");
            Ok(0)
        }
    }
}

/// Order columns as persisted, totals already computed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderRow<'a> {
    pub customer_name: &'a str,
    pub table_id: Option<i32>,
    pub covers: i32,
    pub cover_charge_cents: i64,
    pub discount_cents: i64,
    pub total_cents: i64,
    pub staff: bool,
}

pub async fn insert_order<'e>(
    executor: impl PgExecutor<'e>,
    escaped_schema: &str,
    order: &OrderRow<'_>,
) -> Result<i64> {
    let sql = formatdoc!(
        r#"
            insert into {escaped_schema}.orders
                (customer_name, table_id, covers, cover_charge_cents, discount_cents, total_cents, staff)
                values ($1::text, $2::int, $3::int, $4::bigint, $5::bigint, $6::bigint, $7::boolean)
                returning id
        "#
    );

    let order_id = query_scalar(&sql)
        .bind(order.customer_name)
        .bind(order.table_id)
        .bind(order.covers)
        .bind(order.cover_charge_cents)
        .bind(order.discount_cents)
        .bind(order.total_cents)
        .bind(order.staff)
        .fetch_one(executor)
        .await?;
    Ok(order_id)
}

pub async fn insert_order_item<'e>(
    executor: impl PgExecutor<'e>,
    escaped_schema: &str,
    order_id: i64,
    product_id: i32,
    quantity: i32,
    unit_price_cents: i64,
    description: Option<&str>,
) -> Result<()> {
    let sql = formatdoc!(
        r#"
            insert into {escaped_schema}.order_items
                (order_id, product_id, quantity, unit_price_cents, description)
                values ($1::bigint, $2::int, $3::int, $4::bigint, $5::text)
        "#
    );

    query(&sql)
        .bind(order_id)
        .bind(product_id)
        .bind(quantity)
        .bind(unit_price_cents)
        .bind(description)
        .execute(executor)
        .await?;
    Ok(())
}
