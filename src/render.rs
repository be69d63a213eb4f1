//! Plain-text layouts for the 34 column receipt and kitchen printers.

use chrono::{DateTime, TimeZone};

use crate::orchestrator::OrderContext;
use crate::sql::orders::DepartmentItem;

const WIDTH: usize = 34;
const TIMESTAMP_FORMAT: &str = "%d/%m/%Y %H:%M:%S";

fn rule(c: char) -> String {
    std::iter::repeat(c).take(WIDTH).collect()
}

/// Formats minor units as `units.cents`, e.g. `1250` as `12.50`.
pub fn format_cents(cents: i64) -> String {
    let sign = if cents < 0 { "-" } else { "" };
    let abs = cents.unsigned_abs();
    format!("{sign}{}.{:02}", abs / 100, abs % 100)
}

/// Customer receipt printed at the till.
///
/// The total line shows the stored `total_cents`, not a sum recomputed from
/// the item lines.
pub fn render_receipt<Tz: TimeZone>(
    venue_name: &str,
    order: &OrderContext,
    table_name: &str,
    printed_at: &DateTime<Tz>,
) -> String
where
    Tz::Offset: std::fmt::Display,
{
    let equals = rule('=');
    let dashes = rule('-');
    let mut out = String::new();

    out.push_str(&format!("{equals}\n"));
    out.push_str(&format!("{venue_name:^WIDTH$}\n"));
    out.push_str(&format!("{equals}\n\n"));
    out.push_str("           RICEVUTA CLIENTE       \n\n");
    out.push_str(&format!("  Ordine N.: #{:06}\n", order.order_id));
    out.push_str(&format!("  Data/Ora: {}\n\n", printed_at.format(TIMESTAMP_FORMAT)));
    out.push_str(&format!("{dashes}\n"));
    out.push_str(&format!("  Cliente: {}\n", order.customer_name));
    out.push_str(&format!("  Tavolo: {table_name}\n"));
    out.push_str(&format!("  Coperti: {}\n", order.covers));
    out.push_str(&format!("{equals}\n\n"));

    let mut subtotal_cents = 0i64;
    for line in &order.items {
        let line_cents = line.line_total_cents();
        subtotal_cents += line_cents;
        out.push_str(&format!(
            " {:>2} x {:<21.21} {:>7}\n",
            line.quantity,
            line.description,
            format_cents(line_cents)
        ));
    }

    out.push_str(&format!("\n{dashes}\n"));
    out.push_str(&format!("{:<24} {:>7} EUR\n", "Subtotale:", format_cents(subtotal_cents)));

    let covers_cents = order.covers_total_cents();
    if covers_cents > 0 {
        let label = format!(
            "Coperti ({} x {}):",
            order.covers,
            format_cents(order.cover_charge_cents)
        );
        out.push_str(&format!("{label:<24} {:>7} EUR\n", format_cents(covers_cents)));
    }

    if order.discount_cents > 0 {
        out.push_str(&format!(
            "{:<24} -{:>6} EUR\n",
            "Sconto:",
            format_cents(order.discount_cents)
        ));
    }

    out.push_str(&format!("{equals}\n"));
    out.push_str(&format!(
        "{:<24} {:>7} EUR\n",
        "** TOTALE **",
        format_cents(order.total_cents)
    ));
    out.push_str(&format!("{equals}\n\n"));
    out.push_str("      Grazie per la Visita!       \n");
    out.push_str("          Arrivederci!            \n\n");
    out.push_str("            * * *                 \n\n\n");

    out
}

/// Ticket for one preparation department ("comanda").
pub fn render_department_ticket<Tz: TimeZone>(
    department_name: &str,
    order: &OrderContext,
    table_name: &str,
    items: &[&DepartmentItem],
    printed_at: &DateTime<Tz>,
) -> String
where
    Tz::Offset: std::fmt::Display,
{
    let equals = rule('=');
    let dashes = rule('-');
    let mut out = String::new();

    out.push_str(&format!(
        "\n  *** COMANDA {} ***  \n\n",
        department_name.to_uppercase()
    ));
    out.push_str(&format!("{equals}\n"));
    out.push_str(&format!("  Ordine: #{:06}\n", order.order_id));
    out.push_str(&format!("  Tavolo: {table_name}\n"));
    out.push_str(&format!("{dashes}\n"));
    out.push_str(&format!("  Cliente: {}\n", order.customer_name));
    out.push_str(&format!("  Coperti: {}\n", order.covers));
    out.push_str(&format!("{equals}\n\n"));

    for item in items {
        let description = item.description().replace("\r\n", " ").replace('\n', " ");
        out.push_str(&format!(" [{:>2}] {}\n", item.quantity(), description));
    }

    out.push_str(&format!("\n{equals}\n"));
    out.push_str(&format!("  Inviato: {}\n", printed_at.format(TIMESTAMP_FORMAT)));
    out.push_str(&format!("{equals}\n\n\n"));

    out
}
