//! Order export loading: header normalization, schema check, grouping.

use std::cmp::Ordering;
use std::io::Read;
use std::path::Path;

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use clap::ValueEnum;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{InvoiceError, Result};
use crate::model::{OrderGroup, OrderRecord};

pub const REQUIRED_COLUMNS: [&str; 16] = [
    "order id",
    "created at",
    "billing name",
    "billing address1",
    "billing address2",
    "billing city",
    "billing province",
    "billing zip",
    "lineitem quantity",
    "lineitem name",
    "lineitem price",
    "lineitem sku",
    "subtotal",
    "shipping",
    "taxes",
    "total",
];

pub fn normalize_column(name: &str) -> String {
    name.trim_start_matches('\u{feff}').trim().to_lowercase()
}

/// Read the export at `path` into groups, in first-seen order.
pub fn load_orders(path: &Path) -> Result<Vec<OrderGroup>> {
    let reader = csv::ReaderBuilder::new()
        .flexible(true)
        .from_path(path)
        .map_err(|source| InvoiceError::Csv { path: path.to_path_buf(), source })?;
    let groups = parse_orders(reader, path)?;
    info!(path = %path.display(), orders = groups.len(), "loaded orders");
    Ok(groups)
}

/// Same as [`load_orders`] over any reader; `path` is only used in errors.
pub fn read_orders<R: Read>(input: R, path: &Path) -> Result<Vec<OrderGroup>> {
    let reader = csv::ReaderBuilder::new().flexible(true).from_reader(input);
    parse_orders(reader, path)
}

fn parse_orders<R: Read>(mut reader: csv::Reader<R>, path: &Path) -> Result<Vec<OrderGroup>> {
    let csv_err = |source| InvoiceError::Csv { path: path.to_path_buf(), source };

    let headers: Vec<String> = reader
        .headers()
        .map_err(csv_err)?
        .iter()
        .map(normalize_column)
        .collect();

    let mut missing = Vec::new();
    let mut index = [0usize; REQUIRED_COLUMNS.len()];
    for (slot, column) in index.iter_mut().zip(REQUIRED_COLUMNS) {
        match headers.iter().position(|h| h == column) {
            Some(pos) => *slot = pos,
            None => missing.push(column.to_string()),
        }
    }
    if !missing.is_empty() {
        return Err(InvoiceError::Schema { missing });
    }

    let mut groups: IndexMap<String, Vec<OrderRecord>> = IndexMap::new();
    for (line, row) in reader.records().enumerate() {
        let row = row.map_err(csv_err)?;
        let cell = |i: usize| {
            row.get(index[i])
                .filter(|s| !s.is_empty())
                .map(str::to_string)
        };

        let order_id = cell(0).map(|s| s.trim().to_string()).unwrap_or_default();
        if order_id.is_empty() {
            debug!(line = line + 2, "skipping row without order id");
            continue;
        }

        let record = OrderRecord {
            order_id: order_id.clone(),
            created_at: cell(1),
            billing_name: cell(2),
            billing_address1: cell(3),
            billing_address2: cell(4),
            billing_city: cell(5),
            billing_province: cell(6),
            billing_zip: cell(7),
            quantity: cell(8),
            item_name: cell(9),
            item_price: cell(10),
            item_sku: cell(11),
            subtotal: cell(12),
            shipping: cell(13),
            taxes: cell(14),
            total: cell(15),
        };
        groups.entry(order_id).or_default().push(record);
    }

    Ok(groups
        .into_iter()
        .map(|(order_id, records)| OrderGroup { order_id, records })
        .collect())
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum SortKey {
    /// Keep the order ids in the order they first appear
    #[default]
    None,
    OrderId,
    Date,
    Customer,
    Total,
}

/// Parse the export's created-at value. Unknown formats yield `None`.
pub fn parse_created_at(raw: &str) -> Option<NaiveDateTime> {
    let raw = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.naive_local());
    }
    if let Ok(dt) = DateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S %z") {
        return Some(dt.naive_local());
    }
    for fmt in ["%m/%d/%Y %H:%M", "%Y-%m-%d %H:%M:%S"] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(raw, fmt) {
            return Some(dt);
        }
    }
    ["%m/%d/%Y", "%Y-%m-%d"]
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(raw, fmt).ok())
        .and_then(|d| d.and_hms_opt(0, 0, 0))
}

fn compare_order_ids(a: &str, b: &str) -> Ordering {
    let numeric = |s: &str| s.trim_start_matches('#').parse::<u64>().ok();
    match (numeric(a), numeric(b)) {
        (Some(x), Some(y)) => x.cmp(&y),
        _ => a.cmp(b),
    }
}

/// Present values first, ascending; missing ones keep their relative order at the end.
fn some_first<T: Ord>(a: Option<T>, b: Option<T>) -> Ordering {
    match (a, b) {
        (Some(x), Some(y)) => x.cmp(&y),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

/// Stable sort; `SortKey::None` leaves first-seen order untouched.
pub fn sort_groups(groups: &mut [OrderGroup], key: SortKey) {
    match key {
        SortKey::None => {}
        SortKey::OrderId => groups.sort_by(|a, b| compare_order_ids(&a.order_id, &b.order_id)),
        SortKey::Date => groups.sort_by(|a, b| {
            let date = |g: &OrderGroup| g.first().created_at.as_deref().and_then(parse_created_at);
            some_first(date(a), date(b))
        }),
        SortKey::Customer => groups.sort_by_cached_key(|g| {
            g.first()
                .billing_name
                .as_deref()
                .unwrap_or_default()
                .trim()
                .to_lowercase()
        }),
        SortKey::Total => groups.sort_by(|a, b| a.totals().total.total_cmp(&b.totals().total)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const HEADER: &str = "Order ID, Created At ,Billing Name,Billing Address1,Billing Address2,Billing City,\
Billing Province,Billing Zip,Lineitem Quantity,Lineitem Name,Lineitem Price,Lineitem SKU,Subtotal,Shipping,Taxes,Total,Notes";

    fn parse(body: &str) -> Result<Vec<OrderGroup>> {
        let data = format!("{HEADER}\n{body}");
        read_orders(data.as_bytes(), Path::new("orders.csv"))
    }

    #[test]
    fn groups_preserve_first_seen_order() {
        let groups = parse(
            "1002,2024-03-01 10:00:00 -0500,Ann,1 Elm,,Portland,OR,97201,1,Fern,5,F1,5,0,0,5,\n\
             1001,2024-02-01,Bob,2 Oak,,Salem,OR,97301,2,Moss,3,M1,6,0,0,6,\n\
             1002,,,,,,,,3,Oak Tree,10,T1,,,,,\n",
        )
        .unwrap();

        let ids: Vec<_> = groups.iter().map(|g| g.order_id.as_str()).collect();
        assert_eq!(ids, ["1002", "1001"]);
        assert_eq!(groups[0].records.len(), 2);
        assert_eq!(groups[0].records[1].item_name.as_deref(), Some("Oak Tree"));
        assert_eq!(groups[0].first().billing_name.as_deref(), Some("Ann"));
        assert_eq!(groups[0].first().billing_address2, None);
    }

    #[test]
    fn missing_columns_are_all_reported() {
        let data = "order id,created at,billing name\n1,2024-01-01,Ann\n";
        let err = read_orders(data.as_bytes(), Path::new("orders.csv")).unwrap_err();
        match &err {
            InvoiceError::Schema { missing } => {
                assert_eq!(missing.len(), 13);
                assert!(missing.contains(&"total".to_string()));
                assert!(missing.contains(&"taxes".to_string()));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(err.to_string().contains("total"));
    }

    #[test]
    fn header_bom_and_padding_are_normalized() {
        assert_eq!(normalize_column("\u{feff} Order ID "), "order id");
    }

    #[test]
    fn rows_without_order_id_and_short_rows_are_tolerated() {
        let groups = parse(",x,,,,,,,1,Stray,1,S,1,0,0,1,\n7,2024-01-01,Cy\n").unwrap();
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].order_id, "7");
        assert_eq!(groups[0].first().total, None);
    }

    #[test]
    fn parses_common_created_at_formats() {
        assert!(parse_created_at("3/5/2024 14:22").is_some());
        assert!(parse_created_at("3/5/2024").is_some());
        assert!(parse_created_at("2024-03-05T14:22:10Z").is_some());
        assert!(parse_created_at("2024-03-05 14:22:10 -0500").is_some());
        assert!(parse_created_at("yesterday").is_none());
    }

    #[test]
    fn sorts_by_requested_key() {
        let mut groups = parse(
            "#10,2024-03-01,bob,,,,,,1,A,1,,,,,30,\n\
             #9,,Ann,,,,,,1,B,1,,,,,10,\n\
             #11,2024-01-01,carl,,,,,,1,C,1,,,,,20,\n",
        )
        .unwrap();

        sort_groups(&mut groups, SortKey::OrderId);
        let ids: Vec<_> = groups.iter().map(|g| g.order_id.clone()).collect();
        assert_eq!(ids, ["#9", "#10", "#11"]);

        sort_groups(&mut groups, SortKey::Date);
        let ids: Vec<_> = groups.iter().map(|g| g.order_id.clone()).collect();
        assert_eq!(ids, ["#11", "#10", "#9"]);

        sort_groups(&mut groups, SortKey::Customer);
        assert_eq!(groups[0].order_id, "#9");

        sort_groups(&mut groups, SortKey::Total);
        let ids: Vec<_> = groups.iter().map(|g| g.order_id.clone()).collect();
        assert_eq!(ids, ["#9", "#11", "#10"]);
    }
}
