use indoc::indoc;

use super::CassaMigration;

/// Order entry tables read by the print orchestrator.
pub const M000001_MIGRATION: CassaMigration = CassaMigration {
    name: "m000001",
    is_breaking: false,
    stmts: &[
        indoc! {r#"
            create table :CASSA_SCHEMA.departments (
                id serial primary key,
                name text not null,
                queue_name text
            );
        "#},
        indoc! {r#"
            create table :CASSA_SCHEMA.products (
                id serial primary key,
                description text not null,
                price_cents bigint not null default 0 check (price_cents >= 0),
                department_id int not null references :CASSA_SCHEMA.departments on delete restrict
            );
        "#},
        indoc! {r#"
            create table :CASSA_SCHEMA.dining_tables (
                id serial primary key,
                name text not null
            );
        "#},
        indoc! {r#"
            create table :CASSA_SCHEMA.settings (
                key text primary key,
                value text not null
            );
        "#},
        indoc! {r#"
            create table :CASSA_SCHEMA.orders (
                id bigserial primary key,
                customer_name text not null,
                table_id int references :CASSA_SCHEMA.dining_tables on delete set null,
                covers int not null default 0 check (covers >= 0),
                cover_charge_cents bigint not null default 0,
                discount_cents bigint not null default 0,
                total_cents bigint not null default 0 check (total_cents >= 0),
                staff boolean not null default false,
                created_at timestamptz not null default now()
            );
        "#},
        indoc! {r#"
            create table :CASSA_SCHEMA.order_items (
                id bigserial primary key,
                order_id bigint not null references :CASSA_SCHEMA.orders on delete cascade,
                product_id int not null references :CASSA_SCHEMA.products on delete restrict,
                quantity int not null check (quantity > 0),
                unit_price_cents bigint not null check (unit_price_cents >= 0),
                description text
            );
        "#},
        indoc! {r#"
            create index order_items_order_id_idx on :CASSA_SCHEMA.order_items (order_id);
        "#},
    ],
};
