use std::fmt;
use std::rc::Rc;

use serde::{Deserialize, Serialize};

use crate::grid::{CellRef, CellValue, Grid};

/// Six uppercase hex digits, no `#`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct HexColor(String);

impl HexColor {
    /// Accepts exactly six hex digits, with or without a leading `#`.
    pub fn parse(spec: &str) -> Option<Self> {
        let digits = spec.trim();
        let digits = digits.strip_prefix('#').unwrap_or(digits);
        (digits.len() == 6 && digits.chars().all(|c| c.is_ascii_hexdigit()))
            .then(|| HexColor(digits.to_ascii_uppercase()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn rgb(&self) -> u32 {
        u32::from_str_radix(&self.0, 16).unwrap_or(0)
    }
}

impl fmt::Display for HexColor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Lenient numeric read: trimmed, finite, otherwise `None`.
pub fn coerce_number(raw: Option<&str>) -> Option<f64> {
    raw.and_then(|s| s.trim().parse::<f64>().ok())
        .filter(|n| n.is_finite())
}

/// One line item row of the export. Empty cells are `None`.
#[derive(Debug, Clone, Default, Serialize)]
pub struct OrderRecord {
    pub order_id: String,
    pub created_at: Option<String>,
    pub billing_name: Option<String>,
    pub billing_address1: Option<String>,
    pub billing_address2: Option<String>,
    pub billing_city: Option<String>,
    pub billing_province: Option<String>,
    pub billing_zip: Option<String>,
    pub quantity: Option<String>,
    pub item_name: Option<String>,
    pub item_price: Option<String>,
    pub item_sku: Option<String>,
    pub subtotal: Option<String>,
    pub shipping: Option<String>,
    pub taxes: Option<String>,
    pub total: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct OrderTotals {
    pub subtotal: f64,
    pub shipping: f64,
    pub taxes: f64,
    pub total: f64,
}

impl OrderTotals {
    /// Declared amounts; `total` falls back to the sum only when it is unusable.
    pub fn from_record(record: &OrderRecord) -> Self {
        let subtotal = coerce_number(record.subtotal.as_deref()).unwrap_or(0.0);
        let shipping = coerce_number(record.shipping.as_deref()).unwrap_or(0.0);
        let taxes = coerce_number(record.taxes.as_deref()).unwrap_or(0.0);
        let total = coerce_number(record.total.as_deref()).unwrap_or(subtotal + shipping + taxes);
        Self { subtotal, shipping, taxes, total }
    }
}

/// All records sharing one order id, in file order. Never empty.
#[derive(Debug, Clone, Serialize)]
pub struct OrderGroup {
    pub order_id: String,
    pub records: Vec<OrderRecord>,
}

impl OrderGroup {
    pub fn first(&self) -> &OrderRecord {
        &self.records[0]
    }

    pub fn totals(&self) -> OrderTotals {
        OrderTotals::from_record(self.first())
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct InvoiceHeader {
    pub order_label: String,
    pub order_date: String,
    pub billing_name: String,
    pub street: String,
    pub city_line: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct RenderedLine {
    /// Quantity as written: numeric when it parses, raw text otherwise.
    pub quantity: Option<CellValue>,
    pub description: String,
    pub sku: String,
    pub unit_price: f64,
    pub line_total: f64,
    pub fill: Option<HexColor>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum TotalKind {
    Subtotal,
    Tax,
    Total,
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct PlacedAmount {
    pub kind: TotalKind,
    pub cell: CellRef,
    pub amount: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Margins {
    pub left: f64,
    pub right: f64,
    pub top: f64,
    pub bottom: f64,
}

impl Default for Margins {
    fn default() -> Self {
        Self { left: 0.25, right: 0.25, top: 0.4, bottom: 0.4 }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PageSetup {
    pub print_first: CellRef,
    pub print_last: CellRef,
    /// Pages wide; height is left unconstrained.
    pub fit_width: u16,
    pub margins: Margins,
    pub center_horizontally: bool,
    pub column_widths: Vec<(u16, f64)>,
    pub row_heights: Vec<(u32, f64)>,
}

/// An image placed on an invoice. Bytes are shared with the image cache.
#[derive(Debug, Clone)]
pub struct PlacedImage {
    pub name: String,
    pub data: Rc<[u8]>,
    pub anchor: CellRef,
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone)]
pub struct InvoiceDocument {
    pub order_id: String,
    pub title: String,
    pub header: InvoiceHeader,
    pub lines: Vec<RenderedLine>,
    pub totals: OrderTotals,
    pub placed: Vec<PlacedAmount>,
    pub sheet: Grid,
    pub page: PageSetup,
    pub images: Vec<PlacedImage>,
}

impl InvoiceDocument {
    pub fn placed(&self, kind: TotalKind) -> Option<&PlacedAmount> {
        self.placed.iter().find(|p| p.kind == kind)
    }

    pub fn highlighted_rows(&self) -> usize {
        self.lines.iter().filter(|l| l.fill.is_some()).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hex_color_accepts_prefixed_and_bare_digits() {
        assert_eq!(HexColor::parse("#ff0000").unwrap().as_str(), "FF0000");
        assert_eq!(HexColor::parse("ff0000").unwrap().as_str(), "FF0000");
        assert_eq!(HexColor::parse(" 87ceeb ").unwrap().rgb(), 0x87CEEB);
        assert!(HexColor::parse("#fff").is_none());
        assert!(HexColor::parse("gg0000").is_none());
    }

    #[test]
    fn coercion_rejects_text_and_non_finite() {
        assert_eq!(coerce_number(Some(" 12.5 ")), Some(12.5));
        assert_eq!(coerce_number(Some("abc")), None);
        assert_eq!(coerce_number(Some("nan")), None);
        assert_eq!(coerce_number(Some("")), None);
        assert_eq!(coerce_number(None), None);
    }

    #[test]
    fn totals_fall_back_only_when_declared_total_is_unusable() {
        let mut record = OrderRecord {
            subtotal: Some("10".into()),
            shipping: Some("5".into()),
            taxes: None,
            total: Some("99".into()),
            ..Default::default()
        };
        let totals = OrderTotals::from_record(&record);
        assert_eq!(totals.taxes, 0.0);
        assert_eq!(totals.total, 99.0);

        record.total = Some("n/a".into());
        assert_eq!(OrderTotals::from_record(&record).total, 15.0);
    }
}
