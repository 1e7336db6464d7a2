//! Turns one order group into a format-neutral invoice document.

use std::rc::Rc;
use std::sync::LazyLock;

use chrono::DateTime;
use regex::Regex;
use tracing::debug;

use crate::grid::{CellRef, CellValue, HAlign, NumberFormat, VAlign};
use crate::highlight::HighlightRules;
use crate::model::{
    InvoiceDocument, InvoiceHeader, Margins, OrderGroup, OrderRecord, PageSetup,
    PlacedAmount, PlacedImage, RenderedLine, TotalKind, coerce_number,
};
use crate::settings::Layout;
use crate::template::Template;

/// Values an export writes for an empty cell.
const MISSING_PLACEHOLDERS: [&str; 2] = ["nan", "null"];

/// Label phrases tried in order for each total.
const TOTAL_LABELS: [(TotalKind, &[&str]); 3] = [
    (TotalKind::Subtotal, &["subtotal"]),
    (TotalKind::Tax, &["sales tax", "tax"]),
    (TotalKind::Total, &["total paid"]),
];

static DECIMAL_ZIP_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^(\d+)\.0+$").unwrap());

/// Trimmed text, or `None` for blanks and placeholders.
fn present(raw: Option<&str>) -> Option<&str> {
    let s = raw?.trim();
    let placeholder = MISSING_PLACEHOLDERS.iter().any(|p| s.eq_ignore_ascii_case(p));
    (!s.is_empty() && !placeholder).then_some(s)
}

/// Calendar date of a created-at value.
pub fn date_portion(created_at: Option<&str>) -> String {
    let Some(raw) = created_at.map(str::trim).filter(|s| !s.is_empty()) else {
        return String::new();
    };
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return dt.date_naive().format("%Y-%m-%d").to_string();
    }
    raw.split_whitespace().next().unwrap_or_default().to_string()
}

/// `12345.0` → `12345`. Anything else is kept as written.
pub fn normalize_zip(raw: Option<&str>) -> String {
    let Some(zip) = present(raw) else {
        return String::new();
    };
    match DECIMAL_ZIP_RE.captures(zip) {
        Some(caps) => caps[1].to_string(),
        None => zip.to_string(),
    }
}

pub fn street_line(record: &OrderRecord) -> String {
    let address1 = record.billing_address1.as_deref().unwrap_or_default().trim();
    match present(record.billing_address2.as_deref()) {
        Some(address2) => format!("{address1}, {address2}"),
        None => address1.to_string(),
    }
}

/// `city, province zip` without dangling separators.
pub fn city_line(record: &OrderRecord) -> String {
    let city = present(record.billing_city.as_deref());
    let zip = normalize_zip(record.billing_zip.as_deref());
    let region: Vec<&str> = [present(record.billing_province.as_deref()), Some(zip.as_str())]
        .into_iter()
        .flatten()
        .filter(|s| !s.is_empty())
        .collect();
    let region = region.join(" ");

    match (city, region.is_empty()) {
        (Some(city), false) => format!("{city}, {region}"),
        (Some(city), true) => city.to_string(),
        (None, _) => region,
    }
}

pub fn build_header(group: &OrderGroup) -> InvoiceHeader {
    let first = group.first();
    InvoiceHeader {
        order_label: format!("Order {}", group.order_id),
        order_date: date_portion(first.created_at.as_deref()),
        billing_name: first.billing_name.as_deref().unwrap_or_default().trim().to_string(),
        street: street_line(first),
        city_line: city_line(first),
    }
}

pub fn build_line(record: &OrderRecord, rules: &HighlightRules) -> RenderedLine {
    let raw_quantity = record.quantity.as_deref().map(str::trim).filter(|s| !s.is_empty());
    let quantity_number = coerce_number(raw_quantity);
    let quantity = match (raw_quantity, quantity_number) {
        (_, Some(n)) => Some(CellValue::Number(n)),
        (Some(text), None) => Some(CellValue::Text(text.to_string())),
        (None, None) => None,
    };

    let description = record.item_name.clone().unwrap_or_default();
    let unit_price = coerce_number(record.item_price.as_deref()).unwrap_or(0.0);
    let line_total = quantity_number.unwrap_or(0.0) * unit_price;
    let fill = rules.match_color(&description).cloned();

    RenderedLine {
        quantity,
        description,
        sku: record.item_sku.clone().unwrap_or_default(),
        unit_price,
        line_total,
        fill,
    }
}

/// Per-template rendering state shared by every invoice of a run.
pub struct InvoiceRenderer<'a> {
    template: &'a Template,
    rules: &'a HighlightRules,
    layout: &'a Layout,
    images: Rc<[PlacedImage]>,
}

impl<'a> InvoiceRenderer<'a> {
    pub fn new(
        template: &'a Template,
        rules: &'a HighlightRules,
        layout: &'a Layout,
        images: Rc<[PlacedImage]>,
    ) -> Self {
        Self { template, rules, layout, images }
    }

    pub fn render(&self, group: &OrderGroup) -> InvoiceDocument {
        let layout = self.layout;
        let mut sheet = self.template.invoice.clone();

        let header = build_header(group);
        sheet.set(layout.order_label, header.order_label.as_str());
        sheet.set(layout.order_date, header.order_date.as_str());
        sheet.set(layout.billing_name, header.billing_name.as_str());
        sheet.set(layout.street, header.street.as_str()).wrap = true;
        sheet.set(layout.city_line, header.city_line.as_str());

        let first_row = layout.first_item_row.saturating_sub(1);
        let columns = [
            layout.quantity_column.0,
            layout.description_column.0,
            layout.unit_price_column.0,
            layout.line_total_column.0,
        ];
        let mut lines = Vec::with_capacity(group.records.len());
        let mut row_heights = Vec::with_capacity(group.records.len());

        for (offset, record) in group.records.iter().enumerate() {
            let row = first_row + offset as u32;
            let line = build_line(record, self.rules);
            let [qty_col, desc_col, unit_col, total_col] = columns.map(|c| CellRef::new(row, c));

            match &line.quantity {
                Some(q) => {
                    sheet.set(qty_col, q.clone());
                }
                None => {
                    sheet.style_mut(qty_col);
                }
            }
            sheet.set(desc_col, line.description.as_str());
            sheet.set(unit_col, line.unit_price).number_format = Some(NumberFormat::Currency);
            sheet.set(total_col, line.line_total).number_format = Some(NumberFormat::Currency);

            for at in [qty_col, unit_col, total_col] {
                let style = sheet.style_mut(at);
                style.align = Some(HAlign::Center);
                style.valign = Some(VAlign::Center);
                style.fill = line.fill.clone();
            }
            let style = sheet.style_mut(desc_col);
            style.align = Some(HAlign::Left);
            style.wrap = true;
            style.valign = Some(VAlign::Center);
            style.fill = line.fill.clone();

            row_heights.push((row, layout.row_height));
            lines.push(line);
        }
        let next_row = first_row + group.records.len() as u32;

        let totals = group.totals();
        let mut placed = Vec::new();
        for (kind, needles) in TOTAL_LABELS {
            let amount = match kind {
                TotalKind::Subtotal => totals.subtotal,
                TotalKind::Tax => totals.taxes,
                TotalKind::Total => totals.total,
            };
            match sheet.place_beside_label(layout.totals_region, needles, amount) {
                Some((cell, style)) => {
                    style.number_format = Some(NumberFormat::Currency);
                    placed.push(PlacedAmount { kind, cell, amount });
                }
                None => debug!(order = %group.order_id, label = needles[0], "totals label not found"),
            }
        }

        // 1-based row counts, as a spreadsheet shows them
        let last_row = (next_row + 1)
            .max(layout.min_print_rows)
            .max(sheet.last_used_row().map_or(0, |r| r + 1));
        let last_row = last_row.saturating_sub(1);
        let start_col = layout.print_start_column.0;
        // template sizes first so configured ones win
        let mut column_widths = sheet.geometry.column_widths.clone();
        column_widths.extend(layout.column_widths());
        let mut heights = sheet.geometry.row_heights.clone();
        heights.extend(row_heights);
        let page = PageSetup {
            print_first: CellRef::new(0, start_col),
            print_last: CellRef::new(last_row, sheet.rightmost_used_col(start_col, last_row)),
            fit_width: 1,
            margins: Margins::default(),
            center_horizontally: true,
            column_widths,
            row_heights: heights,
        };

        InvoiceDocument {
            order_id: group.order_id.clone(),
            title: format!("Invoice_{}", group.order_id),
            header,
            lines,
            totals,
            placed,
            sheet,
            page,
            images: self.images.to_vec(),
        }
    }
}

/// Sum of declared totals across documents.
pub fn grand_total(documents: &[InvoiceDocument]) -> f64 {
    documents.iter().map(|d| d.totals.total).sum()
}
