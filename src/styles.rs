//! Template formatting: cell formats from `xl/styles.xml`, plus merges and
//! column/row sizes from the sheet part.

use std::collections::HashMap;
use std::path::Path;

use quick_xml::events::{BytesStart, Event};
use tracing::{debug, info};

use crate::grid::{BorderLine, Borders, CellRef, CellStyle, FontStyle, Grid, HAlign, NumberFormat, Region, SheetGeometry, VAlign, MAX_COL};
use crate::model::HexColor;
use crate::ooxml::{Package, XmlSource, attr, xml_reader};

/// `FFRRGGBB` or `RRGGBB`. Theme and indexed colors are not resolved.
fn argb(raw: &str) -> Option<HexColor> {
    let digits = if raw.len() == 8 { raw.get(2..)? } else { raw };
    HexColor::parse(digits)
}

/// `<b/>`, `<b val="1"/>` and `<b val="0"/>`.
fn flag(e: &BytesStart<'_>, reader: &XmlSource<'_>) -> bool {
    attr(e, reader, b"val").is_none_or(|v| v != "0" && v != "false")
}

fn border_line(style: &str) -> Option<BorderLine> {
    match style {
        "thin" => Some(BorderLine::Thin),
        "medium" | "mediumDashed" | "mediumDashDot" | "mediumDashDotDot" => Some(BorderLine::Medium),
        "thick" => Some(BorderLine::Thick),
        "dashed" | "dashDot" | "dashDotDot" | "slantDashDot" => Some(BorderLine::Dashed),
        "dotted" => Some(BorderLine::Dotted),
        "double" => Some(BorderLine::Double),
        "hair" => Some(BorderLine::Hair),
        _ => None,
    }
}

fn h_align(value: &str) -> Option<HAlign> {
    match value {
        "left" => Some(HAlign::Left),
        "center" | "centerContinuous" => Some(HAlign::Center),
        "right" => Some(HAlign::Right),
        _ => None,
    }
}

fn v_align(value: &str) -> Option<VAlign> {
    match value {
        "top" => Some(VAlign::Top),
        "center" => Some(VAlign::Center),
        "bottom" => Some(VAlign::Bottom),
        _ => None,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Section {
    Other,
    NumFmts,
    Fonts,
    Fills,
    Borders,
    CellXfs,
}

#[derive(Debug, Default)]
struct RawXf {
    num_fmt: u32,
    font: usize,
    fill: usize,
    border: usize,
    wrap: bool,
    align: Option<HAlign>,
    valign: Option<VAlign>,
}

struct StyleParser {
    section: Section,
    num_fmts: HashMap<u32, String>,
    fonts: Vec<FontStyle>,
    fills: Vec<Option<HexColor>>,
    solid: bool,
    borders: Vec<Borders>,
    xfs: Vec<RawXf>,
}

impl StyleParser {
    fn new() -> Self {
        Self {
            section: Section::Other,
            num_fmts: HashMap::new(),
            fonts: Vec::new(),
            fills: Vec::new(),
            solid: false,
            borders: Vec::new(),
            xfs: Vec::new(),
        }
    }

    fn open(&mut self, e: &BytesStart<'_>, reader: &XmlSource<'_>, has_children: bool) {
        let value = |key: &[u8]| attr(e, reader, key);
        let index = |key: &[u8]| value(key).and_then(|v| v.parse::<usize>().ok()).unwrap_or(0);
        let name = e.local_name();

        match (self.section, name.as_ref()) {
            (_, b"numFmts") if has_children => self.section = Section::NumFmts,
            (_, b"fonts") if has_children => self.section = Section::Fonts,
            (_, b"fills") if has_children => self.section = Section::Fills,
            (_, b"borders") if has_children => self.section = Section::Borders,
            (_, b"cellXfs") if has_children => self.section = Section::CellXfs,

            (Section::NumFmts, b"numFmt") => {
                let id = value(b"numFmtId").and_then(|v| v.parse().ok());
                if let (Some(id), Some(code)) = (id, value(b"formatCode")) {
                    self.num_fmts.insert(id, code);
                }
            }

            (Section::Fonts, b"font") => self.fonts.push(FontStyle::default()),
            (Section::Fonts, child) => {
                let Some(font) = self.fonts.last_mut() else { return };
                match child {
                    b"b" => font.bold = flag(e, reader),
                    b"i" => font.italic = flag(e, reader),
                    b"u" => font.underline = value(b"val").is_none_or(|v| v != "none"),
                    b"sz" => font.size = value(b"val").and_then(|v| v.parse().ok()),
                    b"color" => font.color = value(b"rgb").as_deref().and_then(argb),
                    b"name" => font.name = value(b"val"),
                    _ => {}
                }
            }

            (Section::Fills, b"fill") => self.fills.push(None),
            (Section::Fills, b"patternFill") => {
                self.solid = value(b"patternType").as_deref() == Some("solid");
            }
            (Section::Fills, b"fgColor") if self.solid => {
                if let Some(fill) = self.fills.last_mut() {
                    *fill = value(b"rgb").as_deref().and_then(argb);
                }
            }

            (Section::Borders, b"border") => self.borders.push(Borders::default()),
            (Section::Borders, side @ (b"left" | b"start" | b"right" | b"end" | b"top" | b"bottom")) => {
                let Some(border) = self.borders.last_mut() else { return };
                let line = value(b"style").as_deref().and_then(border_line);
                match side {
                    b"left" | b"start" => border.left = line,
                    b"right" | b"end" => border.right = line,
                    b"top" => border.top = line,
                    _ => border.bottom = line,
                }
            }

            (Section::CellXfs, b"xf") => self.xfs.push(RawXf {
                num_fmt: value(b"numFmtId").and_then(|v| v.parse().ok()).unwrap_or(0),
                font: index(b"fontId"),
                fill: index(b"fillId"),
                border: index(b"borderId"),
                ..RawXf::default()
            }),
            (Section::CellXfs, b"alignment") => {
                let Some(xf) = self.xfs.last_mut() else { return };
                xf.wrap = value(b"wrapText").is_some_and(|v| v == "1" || v == "true");
                xf.align = value(b"horizontal").as_deref().and_then(h_align);
                xf.valign = value(b"vertical").as_deref().and_then(v_align);
            }
            _ => {}
        }
    }

    fn close(&mut self, name: &[u8]) {
        if matches!(name, b"numFmts" | b"fonts" | b"fills" | b"borders" | b"cellXfs") {
            self.section = Section::Other;
        }
    }

    fn number_format(&self, id: u32) -> Option<NumberFormat> {
        if let Some(code) = self.num_fmts.get(&id) {
            return Some(NumberFormat::Custom(code.clone()));
        }
        match id {
            0 => None,
            id => u8::try_from(id).ok().map(NumberFormat::Builtin),
        }
    }

    /// One resolved style per `cellXfs` entry, indexed like a cell's `s`.
    fn finish(self) -> Vec<CellStyle> {
        self.xfs
            .iter()
            .map(|xf| CellStyle {
                fill: self.fills.get(xf.fill).cloned().flatten(),
                number_format: self.number_format(xf.num_fmt),
                // font 0 is the workbook default
                font: (xf.font != 0).then(|| self.fonts.get(xf.font).cloned()).flatten(),
                borders: self.borders.get(xf.border).copied().unwrap_or_default(),
                wrap: xf.wrap,
                align: xf.align,
                valign: xf.valign,
            })
            .collect()
    }
}

fn parse_styles(xml: &str) -> Vec<CellStyle> {
    let mut parser = StyleParser::new();
    let mut reader = xml_reader(xml);
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => parser.open(&e, &reader, true),
            Ok(Event::Empty(e)) => parser.open(&e, &reader, false),
            Ok(Event::End(e)) => parser.close(e.local_name().as_ref()),
            Ok(Event::Eof) | Err(_) => break,
            _ => {}
        }
        buf.clear();
    }

    parser.finish()
}

/// Stored column width → characters, inverting the padding Excel adds.
fn width_in_chars(stored: f64) -> f64 {
    let pixels = (stored * 7.0).round();
    let chars = if pixels <= 12.0 { pixels / 12.0 } else { (pixels - 5.0) / 7.0 };
    (chars * 100.0).round() / 100.0
}

fn is_true(value: Option<String>) -> bool {
    value.is_some_and(|v| v == "1" || v == "true")
}

#[derive(Debug, Default)]
struct SheetFormat {
    /// Cells with a non-default `s` index.
    styled: Vec<(CellRef, usize)>,
    geometry: SheetGeometry,
}

fn parse_sheet_format(xml: &str) -> SheetFormat {
    let mut format = SheetFormat::default();
    let mut reader = xml_reader(xml);
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e) | Event::Empty(e)) => {
                let value = |key: &[u8]| attr(&e, &reader, key);
                match e.local_name().as_ref() {
                    b"col" if is_true(value(b"customWidth")) => {
                        let min: Option<u16> = value(b"min").and_then(|v| v.parse().ok());
                        let max: Option<u16> = value(b"max").and_then(|v| v.parse().ok());
                        let width: Option<f64> = value(b"width").and_then(|v| v.parse().ok());
                        if let (Some(min), Some(max), Some(width)) = (min, max, width) {
                            let chars = width_in_chars(width);
                            let last = max.min(MAX_COL + 1);
                            for col in min.max(1)..=last {
                                format.geometry.column_widths.push((col - 1, chars));
                            }
                        }
                    }
                    b"row" if is_true(value(b"customHeight")) => {
                        let row: Option<u32> = value(b"r").and_then(|v| v.parse().ok());
                        let height: Option<f64> = value(b"ht").and_then(|v| v.parse().ok());
                        if let (Some(row), Some(height)) = (row.and_then(|r| r.checked_sub(1)), height) {
                            format.geometry.row_heights.push((row, height));
                        }
                    }
                    b"c" => {
                        let at = value(b"r").as_deref().and_then(CellRef::parse);
                        let xf = value(b"s").and_then(|v| v.parse::<usize>().ok()).unwrap_or(0);
                        if let (Some(at), true) = (at, xf > 0) {
                            format.styled.push((at, xf));
                        }
                    }
                    b"mergeCell" => {
                        if let Some(region) = value(b"ref").and_then(|r| Region::try_from(r).ok()) {
                            format.geometry.merges.push(region);
                        }
                    }
                    _ => {}
                }
            }
            Ok(Event::Eof) | Err(_) => break,
            _ => {}
        }
        buf.clear();
    }

    format
}

/// Copy the formats, merges and sizes of `sheet` in the XLSX at `path` onto
/// `grid`. Workbooks that are not XLSX packages are left as they are.
pub fn apply_sheet_format(path: &Path, sheet: &str, grid: &mut Grid) {
    let Some(mut package) = Package::open(path) else {
        debug!(path = %path.display(), "template is not a zip package, no formatting carried over");
        return;
    };
    let Some(sheet_xml) = package.sheet_part(sheet).and_then(|part| package.read_text(&part)) else {
        debug!(sheet, "sheet part not found, no formatting carried over");
        return;
    };
    let styles_part = package
        .related_part("xl/workbook.xml", "styles")
        .unwrap_or_else(|| "xl/styles.xml".to_string());
    let styles = package
        .read_text(&styles_part)
        .map(|xml| parse_styles(&xml))
        .unwrap_or_default();

    let format = parse_sheet_format(&sheet_xml);
    let mut applied = 0;
    for (at, xf) in format.styled {
        let Some(style) = styles.get(xf).filter(|s| !s.is_plain()) else {
            continue;
        };
        let cell = grid.style_mut(at);
        let detected = cell.number_format.take();
        *cell = style.clone();
        if cell.number_format.is_none() {
            cell.number_format = detected;
        }
        applied += 1;
    }

    info!(
        sheet,
        styled_cells = applied,
        merges = format.geometry.merges.len(),
        "carried over template formatting"
    );
    grid.geometry = format.geometry;
}

#[cfg(test)]
mod tests {
    use rust_xlsxwriter::{Format, FormatBorder, Workbook};

    use super::*;

    const STYLES: &str = r#"<styleSheet xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main">
        <numFmts count="1"><numFmt numFmtId="164" formatCode="&quot;$&quot;#,##0.00"/></numFmts>
        <fonts count="2">
            <font><sz val="11"/><name val="Calibri"/></font>
            <font><b/><i val="0"/><u/><sz val="14"/><color rgb="FF1F4E78"/><name val="Georgia"/></font>
        </fonts>
        <fills count="3">
            <fill><patternFill patternType="none"/></fill>
            <fill><patternFill patternType="gray125"/></fill>
            <fill><patternFill patternType="solid"><fgColor rgb="FFFFFF00"/><bgColor indexed="64"/></patternFill></fill>
        </fills>
        <borders count="2">
            <border><left/><right/><top/><bottom/><diagonal/></border>
            <border><left style="thin"><color auto="1"/></left><right style="medium"/><top/><bottom style="double"/></border>
        </borders>
        <cellStyleXfs count="1"><xf numFmtId="0" fontId="1" fillId="2" borderId="1"/></cellStyleXfs>
        <cellXfs count="3">
            <xf numFmtId="0" fontId="0" fillId="0" borderId="0" xfId="0"/>
            <xf numFmtId="164" fontId="1" fillId="2" borderId="1" xfId="0" applyFont="1">
                <alignment horizontal="right" vertical="top" wrapText="1"/>
            </xf>
            <xf numFmtId="14" fontId="0" fillId="1" borderId="0" xfId="0"/>
        </cellXfs>
        <dxfs count="1"><dxf><font><b/></font><fill><patternFill><bgColor rgb="FFFF0000"/></patternFill></fill></dxf></dxfs>
    </styleSheet>"#;

    #[test]
    fn resolves_cell_xfs_against_fonts_fills_and_borders() {
        let styles = parse_styles(STYLES);
        assert_eq!(styles.len(), 3);
        assert!(styles[0].is_plain());

        let styled = &styles[1];
        let font = styled.font.as_ref().unwrap();
        assert!(font.bold && font.underline && !font.italic);
        assert_eq!(font.size, Some(14.0));
        assert_eq!(font.name.as_deref(), Some("Georgia"));
        assert_eq!(font.color, HexColor::parse("1F4E78"));
        assert_eq!(styled.fill, HexColor::parse("FFFF00"));
        assert_eq!(styled.number_format, Some(NumberFormat::Custom("\"$\"#,##0.00".to_string())));
        assert_eq!(
            styled.borders,
            Borders {
                left: Some(BorderLine::Thin),
                right: Some(BorderLine::Medium),
                top: None,
                bottom: Some(BorderLine::Double),
            }
        );
        assert_eq!((styled.wrap, styled.align, styled.valign), (true, Some(HAlign::Right), Some(VAlign::Top)));

        // gray125 is not a solid fill
        assert_eq!(styles[2].fill, None);
        assert_eq!(styles[2].number_format, Some(NumberFormat::Builtin(14)));
    }

    #[test]
    fn reads_sheet_geometry_and_styled_cells() {
        let xml = r#"<worksheet xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main">
            <cols><col min="2" max="3" width="20.7109375" customWidth="1"/><col min="4" max="4" width="30"/></cols>
            <sheetData>
                <row r="1" ht="30" customHeight="1"><c r="B1" s="1" t="s"><v>0</v></c><c r="C1" s="1"/><c r="D1"/></row>
                <row r="2" ht="15"><c r="B2" s="0"/></row>
            </sheetData>
            <mergeCells count="2"><mergeCell ref="B1:G1"/><mergeCell ref="bogus"/></mergeCells>
        </worksheet>"#;
        let format = parse_sheet_format(xml);

        assert_eq!(format.styled, [(CellRef::new(0, 1), 1), (CellRef::new(0, 2), 1)]);
        assert_eq!(format.geometry.column_widths, [(1, 20.0), (2, 20.0)]);
        assert_eq!(format.geometry.row_heights, [(0, 30.0)]);
        assert_eq!(format.geometry.merges.len(), 1);
        assert_eq!(String::from(format.geometry.merges[0]), "B1:G1");
    }

    #[test]
    fn carries_formatting_from_a_written_workbook() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("styled.xlsx");

        let mut workbook = Workbook::new();
        let sheet = workbook.add_worksheet();
        sheet.set_name("Invoice").unwrap();
        let header = Format::new().set_bold().set_border(FormatBorder::Thin);
        sheet.merge_range(0, 1, 0, 6, "Plant Nursery", &header).unwrap();
        sheet.write_string_with_format(3, 1, "Paid", &Format::new().set_background_color(0xFFFF00)).unwrap();
        sheet.set_column_width(7, 16).unwrap();
        sheet.set_row_height(0, 30).unwrap();
        workbook.save(&path).unwrap();

        let mut grid = Grid::new();
        grid.set(CellRef::new(0, 1), "Plant Nursery");
        apply_sheet_format(&path, "Invoice", &mut grid);

        let b1 = grid.get(CellRef::new(0, 1)).unwrap();
        assert_eq!(b1.value, Some("Plant Nursery".into()));
        assert!(b1.style.font.as_ref().is_some_and(|f| f.bold));
        assert_eq!(b1.style.borders.top, Some(BorderLine::Thin));
        // the rest of the merged range keeps its border too
        assert_eq!(grid.get(CellRef::new(0, 6)).unwrap().style.borders.right, Some(BorderLine::Thin));
        assert_eq!(grid.get(CellRef::new(3, 1)).unwrap().style.fill, HexColor::parse("FFFF00"));

        assert_eq!(grid.geometry.merges.len(), 1);
        assert_eq!(String::from(grid.geometry.merges[0]), "B1:G1");
        assert_eq!(grid.geometry.column_widths, [(7, 16.0)]);
        assert_eq!(grid.geometry.row_heights, [(0, 30.0)]);
    }

    #[test]
    fn non_package_workbooks_are_left_alone() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("plain.csv");
        std::fs::write(&path, "a,b\n").unwrap();

        let mut grid = Grid::new();
        grid.set(CellRef::new(0, 0), "a");
        let before = grid.clone();
        apply_sheet_format(&path, "Invoice", &mut grid);
        assert_eq!(grid, before);
    }
}
