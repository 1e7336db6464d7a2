//! Sparse 2D cell grid used as the format-neutral sheet model.
//!
//! Coordinates are 0-based (`row`, `col`) like `rust_xlsxwriter`; A1 notation
//! is only used at the edges (configuration, logging, tests).

use std::collections::BTreeMap;
use std::fmt;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::InvoiceError;
use crate::model::HexColor;

static A1_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\$?([A-Za-z]{1,3})\$?([0-9]{1,7})$").unwrap());

/// Last column Excel can address (`XFD`).
pub const MAX_COL: u16 = 16_383;

/// Column index from letters: `A` → 0, `Z` → 25, `AA` → 26.
fn column_from_letters(letters: &str) -> Option<u16> {
    if letters.is_empty() || letters.len() > 3 {
        return None;
    }
    let mut idx: u32 = 0;
    for ch in letters.chars() {
        let ch = ch.to_ascii_uppercase();
        if !ch.is_ascii_uppercase() {
            return None;
        }
        idx = idx.checked_mul(26)?.checked_add(ch as u32 - 'A' as u32 + 1)?;
    }
    idx.checked_sub(1)
        .and_then(|i| u16::try_from(i).ok())
        .filter(|&i| i <= MAX_COL)
}

/// Column letters from index: 0 → `A`, 26 → `AA`.
pub fn column_letters(col: u16) -> String {
    let mut n = u32::from(col) + 1;
    let mut s = String::new();
    while n > 0 {
        let r = ((n - 1) % 26) as u8;
        s.insert(0, (b'A' + r) as char);
        n = (n - 1) / 26;
    }
    s
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct CellRef {
    pub row: u32,
    pub col: u16,
}

impl CellRef {
    pub const fn new(row: u32, col: u16) -> Self {
        Self { row, col }
    }

    /// Parse `B2`, `$B$2` or `b2`.
    pub fn parse(a1: &str) -> Option<Self> {
        let caps = A1_RE.captures(a1.trim())?;
        let col = column_from_letters(&caps[1])?;
        let row: u32 = caps[2].parse().ok()?;
        Some(Self::new(row.checked_sub(1)?, col))
    }

    pub fn shifted_right(self, cols: u16) -> Self {
        Self::new(self.row, self.col.saturating_add(cols))
    }
}

impl fmt::Display for CellRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", column_letters(self.col), self.row + 1)
    }
}

impl TryFrom<String> for CellRef {
    type Error = InvoiceError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value).ok_or(InvoiceError::CellRef(value))
    }
}

impl From<CellRef> for String {
    fn from(value: CellRef) -> Self {
        value.to_string()
    }
}

/// A bare column (`C`) in configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Column(pub u16);

impl TryFrom<String> for Column {
    type Error = InvoiceError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        column_from_letters(value.trim())
            .map(Column)
            .ok_or(InvoiceError::CellRef(value))
    }
}

impl From<Column> for String {
    fn from(value: Column) -> Self {
        column_letters(value.0)
    }
}

/// Inclusive rectangle, written `H30:L55`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Region {
    pub first: CellRef,
    pub last: CellRef,
}

impl Region {
    pub fn new(first: CellRef, last: CellRef) -> Self {
        Self {
            first: CellRef::new(first.row.min(last.row), first.col.min(last.col)),
            last: CellRef::new(first.row.max(last.row), first.col.max(last.col)),
        }
    }

    pub fn contains(&self, at: CellRef) -> bool {
        (self.first.row..=self.last.row).contains(&at.row)
            && (self.first.col..=self.last.col).contains(&at.col)
    }
}

impl TryFrom<String> for Region {
    type Error = InvoiceError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        let parsed = value
            .split_once(':')
            .and_then(|(a, b)| Some(Region::new(CellRef::parse(a)?, CellRef::parse(b)?)));
        parsed.ok_or(InvoiceError::CellRef(value))
    }
}

impl From<Region> for String {
    fn from(value: Region) -> Self {
        format!("{}:{}", value.first, value.last)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum CellValue {
    Text(String),
    Number(f64),
    Bool(bool),
}

impl CellValue {
    /// Text as a label scan sees it. Integral numbers print without a fraction.
    pub fn as_text(&self) -> String {
        match self {
            CellValue::Text(s) => s.clone(),
            CellValue::Number(n) if n.fract() == 0.0 && n.abs() < 1e15 => format!("{}", *n as i64),
            CellValue::Number(n) => n.to_string(),
            CellValue::Bool(b) => b.to_string(),
        }
    }

    pub fn is_blank(&self) -> bool {
        matches!(self, CellValue::Text(s) if s.trim().is_empty())
    }
}

impl From<&str> for CellValue {
    fn from(value: &str) -> Self {
        CellValue::Text(value.to_string())
    }
}

impl From<String> for CellValue {
    fn from(value: String) -> Self {
        CellValue::Text(value)
    }
}

impl From<f64> for CellValue {
    fn from(value: f64) -> Self {
        CellValue::Number(value)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum NumberFormat {
    Currency,
    Date,
    /// One of Excel's built-in formats, by id.
    Builtin(u8),
    /// A format code carried over from the template.
    Custom(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum HAlign {
    Left,
    Center,
    Right,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum VAlign {
    Top,
    Center,
    Bottom,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct FontStyle {
    pub name: Option<String>,
    pub size: Option<f64>,
    pub bold: bool,
    pub italic: bool,
    pub underline: bool,
    pub color: Option<HexColor>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum BorderLine {
    Thin,
    Medium,
    Thick,
    Dashed,
    Dotted,
    Double,
    Hair,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Borders {
    pub left: Option<BorderLine>,
    pub right: Option<BorderLine>,
    pub top: Option<BorderLine>,
    pub bottom: Option<BorderLine>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CellStyle {
    pub fill: Option<HexColor>,
    pub number_format: Option<NumberFormat>,
    pub font: Option<FontStyle>,
    pub borders: Borders,
    pub wrap: bool,
    pub align: Option<HAlign>,
    pub valign: Option<VAlign>,
}

impl CellStyle {
    pub fn is_plain(&self) -> bool {
        *self == CellStyle::default()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct GridCell {
    pub value: Option<CellValue>,
    pub style: CellStyle,
}

/// Sheet-level layout that travels with the cells.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SheetGeometry {
    pub merges: Vec<Region>,
    /// Widths in character units.
    pub column_widths: Vec<(u16, f64)>,
    /// Heights in points.
    pub row_heights: Vec<(u32, f64)>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Grid {
    cells: BTreeMap<CellRef, GridCell>,
    pub geometry: SheetGeometry,
}

impl Grid {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, at: CellRef, value: impl Into<CellValue>) -> &mut CellStyle {
        let cell = self.cells.entry(at).or_default();
        cell.value = Some(value.into());
        &mut cell.style
    }

    pub fn style_mut(&mut self, at: CellRef) -> &mut CellStyle {
        &mut self.cells.entry(at).or_default().style
    }

    pub fn get(&self, at: CellRef) -> Option<&GridCell> {
        self.cells.get(&at)
    }

    pub fn value(&self, at: CellRef) -> Option<&CellValue> {
        self.cells.get(&at).and_then(|c| c.value.as_ref())
    }

    /// Trimmed cell text, empty for blank or missing cells.
    pub fn text(&self, at: CellRef) -> String {
        self.value(at)
            .map(|v| v.as_text().trim().to_string())
            .unwrap_or_default()
    }

    /// Cells in row-major order.
    pub fn iter(&self) -> impl Iterator<Item = (CellRef, &GridCell)> {
        self.cells.iter().map(|(at, cell)| (*at, cell))
    }

    fn is_used(cell: &GridCell) -> bool {
        cell.value.as_ref().is_some_and(|v| !v.is_blank())
    }

    /// Last row holding a non-blank value.
    pub fn last_used_row(&self) -> Option<u32> {
        self.cells
            .iter()
            .filter(|(_, c)| Self::is_used(c))
            .map(|(at, _)| at.row)
            .max()
    }

    /// Rightmost non-blank column within rows `0..=max_row`, never left of `min_col`.
    pub fn rightmost_used_col(&self, min_col: u16, max_row: u32) -> u16 {
        self.cells
            .iter()
            .filter(|(at, c)| at.row <= max_row && Self::is_used(c))
            .map(|(at, _)| at.col)
            .fold(min_col, u16::max)
    }

    /// First cell in `region`, row-major, whose lowercased text contains `needle`.
    pub fn find_label(&self, region: Region, needle: &str) -> Option<CellRef> {
        let needle = needle.to_lowercase();
        self.cells
            .range(region.first..=region.last)
            .filter(|(at, _)| region.contains(**at))
            .find(|(_, cell)| {
                cell.value
                    .as_ref()
                    .is_some_and(|v| v.as_text().trim().to_lowercase().contains(&needle))
            })
            .map(|(at, _)| *at)
    }

    /// Search-and-place: write `value` to the right of the first label matching
    /// any of `needles` (tried in order). Returns the written cell.
    pub fn place_beside_label(
        &mut self,
        region: Region,
        needles: &[&str],
        value: impl Into<CellValue>,
    ) -> Option<(CellRef, &mut CellStyle)> {
        let label = needles
            .iter()
            .find_map(|needle| self.find_label(region, needle))?;
        let target = label.shifted_right(1);
        Some((target, self.set(target, value)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_a1_references() {
        assert_eq!(CellRef::parse("B2"), Some(CellRef::new(1, 1)));
        assert_eq!(CellRef::parse("$h$37"), Some(CellRef::new(36, 7)));
        assert_eq!(CellRef::parse("AA10"), Some(CellRef::new(9, 26)));
        assert_eq!(CellRef::parse("B0"), None);
        assert_eq!(CellRef::parse("12"), None);
        assert_eq!(CellRef::new(0, 5).to_string(), "F1");
        assert_eq!(column_letters(27), "AB");
        assert_eq!(CellRef::parse("XFD1"), Some(CellRef::new(0, MAX_COL)));
        assert_eq!(CellRef::parse("XFE1"), None);
    }

    #[test]
    fn overlong_column_letters_are_rejected() {
        assert_eq!(Column::try_from("c".to_string()).unwrap(), Column(2));
        for bad in ["ZZZZZZZ", "ZZZZ", "", "C1"] {
            let err = Column::try_from(bad.to_string()).unwrap_err();
            assert!(matches!(err, InvoiceError::CellRef(ref s) if s == bad));
        }
    }

    #[test]
    fn shifts_anchor_right() {
        let anchor = CellRef::parse("F1").unwrap().shifted_right(4);
        assert_eq!(anchor.to_string(), "J1");
    }

    #[test]
    fn region_is_normalized_and_inclusive() {
        let region = Region::try_from("L55:H30".to_string()).unwrap();
        assert_eq!(String::from(region), "H30:L55");
        assert!(region.contains(CellRef::parse("H30").unwrap()));
        assert!(region.contains(CellRef::parse("L55").unwrap()));
        assert!(!region.contains(CellRef::parse("M40").unwrap()));
        assert!(!region.contains(CellRef::parse("G40").unwrap()));
    }

    #[test]
    fn finds_label_by_case_insensitive_containment() {
        let mut grid = Grid::new();
        let region = Region::try_from("H30:L55".to_string()).unwrap();
        grid.set(CellRef::parse("H37").unwrap(), "Subtotal:");
        grid.set(CellRef::parse("H38").unwrap(), "  Sales Tax ");
        grid.set(CellRef::parse("C38").unwrap(), "tax outside region");

        assert_eq!(grid.find_label(region, "SUBTOTAL"), CellRef::parse("H37"));
        assert_eq!(grid.find_label(region, "tax"), CellRef::parse("H38"));
        assert_eq!(grid.find_label(region, "total paid"), None);
    }

    #[test]
    fn places_value_beside_first_matching_needle() {
        let mut grid = Grid::new();
        let region = Region::try_from("H30:L55".to_string()).unwrap();
        grid.set(CellRef::parse("H38").unwrap(), "Tax");

        let (at, _) = grid
            .place_beside_label(region, &["sales tax", "tax"], 1.5)
            .unwrap();
        assert_eq!(at.to_string(), "I38");
        assert_eq!(grid.value(at), Some(&CellValue::Number(1.5)));

        assert!(grid.place_beside_label(region, &["total paid"], 9.0).is_none());
    }

    #[test]
    fn extent_ignores_blank_cells() {
        let mut grid = Grid::new();
        grid.set(CellRef::parse("B2").unwrap(), "Order");
        grid.set(CellRef::parse("I39").unwrap(), 12.0);
        grid.set(CellRef::parse("Z80").unwrap(), "   ");

        assert_eq!(grid.last_used_row(), Some(38));
        assert_eq!(grid.rightmost_used_col(1, 38), 8);
        assert_eq!(grid.rightmost_used_col(1, 10), 1);
    }
}
