use comfy_table::{Attribute, Cell, Color, Table};
use serde::Serialize;

use crate::highlight::HighlightRules;
use crate::model::{HexColor, OrderGroup};
use crate::output::format_currency;
use crate::pipeline::RunReport;
use crate::render::date_portion;

/// One row of the order listing.
#[derive(Debug, Clone, Serialize)]
pub struct OrderSummary {
    pub order_id: String,
    pub date: String,
    pub customer: String,
    pub items: usize,
    pub total: f64,
}

impl OrderSummary {
    pub fn from_group(group: &OrderGroup) -> Self {
        let first = group.first();
        Self {
            order_id: group.order_id.clone(),
            date: date_portion(first.created_at.as_deref()),
            customer: first.billing_name.as_deref().unwrap_or_default().trim().to_string(),
            items: group.records.len(),
            total: group.totals().total,
        }
    }
}

fn swatch(color: &HexColor) -> Cell {
    let rgb = color.rgb();
    Cell::new("      ").bg(Color::Rgb {
        r: (rgb >> 16) as u8,
        g: (rgb >> 8) as u8,
        b: rgb as u8,
    })
}

pub fn orders_table(orders: &[OrderSummary]) -> Table {
    let mut table = Table::new();
    table.set_header(vec![
        Cell::new("Order"),
        Cell::new("Date"),
        Cell::new("Customer"),
        Cell::new("Items"),
        Cell::new("Total"),
    ]);
    for order in orders {
        table.add_row(vec![
            Cell::new(&order.order_id),
            Cell::new(&order.date),
            Cell::new(&order.customer),
            Cell::new(order.items),
            Cell::new(format_currency(order.total)),
        ]);
    }
    let grand: f64 = orders.iter().map(|o| o.total).sum();
    table.add_row(vec![
        Cell::new(format!("{} orders", orders.len())).add_attribute(Attribute::Bold),
        Cell::new(""),
        Cell::new(""),
        Cell::new(orders.iter().map(|o| o.items).sum::<usize>()).add_attribute(Attribute::Bold),
        Cell::new(format_currency(grand)).add_attribute(Attribute::Bold),
    ]);
    table
}

pub fn rules_table(rules: &HighlightRules) -> Table {
    let mut table = Table::new();
    table.set_header(vec![
        Cell::new("#"),
        Cell::new("Matches"),
        Cell::new("Color"),
        Cell::new(""),
    ]);
    for (i, (text, color)) in rules.iter().enumerate() {
        table.add_row(vec![
            Cell::new(i + 1),
            Cell::new(text),
            Cell::new(format!("#{color}")),
            swatch(color),
        ]);
    }
    table
}

pub fn run_table(report: &RunReport) -> Table {
    let mut table = Table::new();
    table.set_header(vec![Cell::new("Run"), Cell::new("")]);
    table.add_row(vec![Cell::new("Invoices"), Cell::new(report.invoices)]);
    table.add_row(vec![Cell::new("Line items"), Cell::new(report.line_items)]);
    let highlighted = Cell::new(report.highlighted_rows);
    let highlighted = if report.highlighted_rows > 0 {
        highlighted.fg(Color::Rgb { r: 4, g: 120, b: 87 })
    } else {
        highlighted
    };
    table.add_row(vec![Cell::new("Highlighted rows"), highlighted]);
    table.add_row(vec![
        Cell::new("Grand total").add_attribute(Attribute::Bold),
        Cell::new(format_currency(report.grand_total)).add_attribute(Attribute::Bold),
    ]);
    table.add_row(vec![Cell::new("Output"), Cell::new(report.output.display())]);
    table
}
