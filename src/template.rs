use std::path::{Path, PathBuf};

use calamine::{Data, Range, Reader, open_workbook_auto};
use tracing::{debug, info};

use crate::error::{InvoiceError, Result};
use crate::grid::{CellRef, CellValue, Grid, NumberFormat};
use crate::highlight::{HighlightRules, RULE_SHEETS};
use crate::styles::apply_sheet_format;

/// The template workbook: layout sheet plus optional rules sheet.
#[derive(Debug, Clone)]
pub struct Template {
    pub path: PathBuf,
    pub layout_sheet: String,
    pub sheet_names: Vec<String>,
    pub invoice: Grid,
    pub rules: Option<Grid>,
}

impl Template {
    pub fn load(path: &Path, layout_sheet: &str) -> Result<Self> {
        let mut workbook = open_workbook_auto(path).map_err(|source| InvoiceError::Workbook {
            path: path.to_path_buf(),
            source,
        })?;
        let sheet_names = workbook.sheet_names().to_vec();

        if !sheet_names.iter().any(|n| n == layout_sheet) {
            return Err(InvoiceError::Template {
                path: path.to_path_buf(),
                sheet: layout_sheet.to_string(),
            });
        }

        let mut read_grid = |name: &str| {
            workbook
                .worksheet_range(name)
                .map(|range| range_to_grid(&range))
                .map_err(|source| InvoiceError::Workbook { path: path.to_path_buf(), source })
        };

        let mut invoice = read_grid(layout_sheet)?;
        let rules = match RULE_SHEETS.iter().find(|s| sheet_names.iter().any(|n| n == *s)) {
            Some(name) => Some(read_grid(*name)?),
            None => None,
        };
        apply_sheet_format(path, layout_sheet, &mut invoice);

        info!(
            path = %path.display(),
            sheets = sheet_names.len(),
            has_rules = rules.is_some(),
            "loaded template"
        );
        Ok(Self {
            path: path.to_path_buf(),
            layout_sheet: layout_sheet.to_string(),
            sheet_names,
            invoice,
            rules,
        })
    }

    /// Rules from the first rules sheet found; empty when there is none.
    pub fn highlight_rules(&self) -> HighlightRules {
        let Some(sheet) = &self.rules else {
            debug!("template has no rules sheet, highlighting disabled");
            return HighlightRules::new();
        };
        let last_row = sheet.last_used_row().unwrap_or(0);
        HighlightRules::from_rows((1..=last_row).map(|row| {
            (
                sheet.text(CellRef::new(row, 0)),
                sheet.text(CellRef::new(row, 1)),
            )
        }))
    }

    /// Key for per-template caches.
    pub fn identity(&self) -> PathBuf {
        self.path.canonicalize().unwrap_or_else(|_| self.path.clone())
    }
}

fn data_to_value(data: &Data) -> Option<(CellValue, Option<NumberFormat>)> {
    let value = match data {
        Data::String(s) => CellValue::Text(s.clone()),
        Data::Float(f) => CellValue::Number(*f),
        Data::Int(i) => CellValue::Number(*i as f64),
        Data::Bool(b) => CellValue::Bool(*b),
        Data::DateTime(dt) => return Some((CellValue::Number(dt.as_f64()), Some(NumberFormat::Date))),
        Data::DateTimeIso(s) | Data::DurationIso(s) => CellValue::Text(s.clone()),
        _ => return None,
    };
    Some((value, None))
}

/// Copy a calamine range into a grid at absolute sheet coordinates.
fn range_to_grid(range: &Range<Data>) -> Grid {
    let mut grid = Grid::new();
    let (row0, col0) = range.start().unwrap_or((0, 0));
    for (row, col, data) in range.used_cells() {
        let Some((value, format)) = data_to_value(data) else {
            continue;
        };
        let at = CellRef::new(row0 + row as u32, (col0 as usize + col) as u16);
        grid.set(at, value).number_format = format;
    }
    grid
}
