use std::collections::HashSet;
use std::fs;
use std::path::Path;

use rust_xlsxwriter::{Format, FormatAlign, FormatBorder, FormatPattern, FormatUnderline, Image, Workbook, Worksheet};
use tracing::{debug, info};

use crate::error::{InvoiceError, Result};
use crate::grid::{BorderLine, CellStyle, CellValue, HAlign, NumberFormat, VAlign};
use crate::model::InvoiceDocument;

const CURRENCY_FORMAT: &str = "\"$\"#,##0.00";
const DATE_FORMAT: &str = "yyyy-mm-dd";
const MAX_TITLE_LEN: usize = 31;
const INVALID_TITLE_CHARS: [char; 7] = ['[', ']', ':', '*', '?', '/', '\\'];

/// At most `len` characters, never starting or ending with an apostrophe.
fn cut_title(title: &str, len: usize) -> String {
    let cut: String = title.chars().take(len).collect();
    cut.trim_matches('\'').to_string()
}

fn clean_title(title: &str) -> String {
    let cleaned: String = title
        .chars()
        .map(|c| if INVALID_TITLE_CHARS.contains(&c) { '_' } else { c })
        .collect();
    let cleaned = cut_title(cleaned.trim_matches('\''), MAX_TITLE_LEN);
    if cleaned.trim().is_empty() { "Invoice".to_string() } else { cleaned }
}

/// Excel-safe, unique sheet titles. Names in `reserved` are never handed out.
pub fn sheet_titles<'a>(titles: impl IntoIterator<Item = &'a str>, reserved: &[&str]) -> Vec<String> {
    let mut taken: HashSet<String> = reserved.iter().map(|s| s.to_lowercase()).collect();
    let mut out = Vec::new();
    for title in titles {
        let base = clean_title(title);
        let mut candidate = base.clone();
        let mut n = 2;
        while taken.contains(&candidate.to_lowercase()) {
            let suffix = format!("_{n}");
            let keep = MAX_TITLE_LEN - suffix.len();
            candidate = format!("{}{suffix}", cut_title(&base, keep));
            n += 1;
        }
        taken.insert(candidate.to_lowercase());
        out.push(candidate);
    }
    out
}

fn border(line: BorderLine) -> FormatBorder {
    match line {
        BorderLine::Thin => FormatBorder::Thin,
        BorderLine::Medium => FormatBorder::Medium,
        BorderLine::Thick => FormatBorder::Thick,
        BorderLine::Dashed => FormatBorder::Dashed,
        BorderLine::Dotted => FormatBorder::Dotted,
        BorderLine::Double => FormatBorder::Double,
        BorderLine::Hair => FormatBorder::Hair,
    }
}

fn cell_format(style: &CellStyle) -> Format {
    let mut format = Format::new();
    match &style.number_format {
        Some(NumberFormat::Currency) => format = format.set_num_format(CURRENCY_FORMAT),
        Some(NumberFormat::Date) => format = format.set_num_format(DATE_FORMAT),
        Some(NumberFormat::Builtin(id)) => format = format.set_num_format_index(*id),
        Some(NumberFormat::Custom(code)) => format = format.set_num_format(code),
        None => {}
    }
    if let Some(font) = &style.font {
        if let Some(name) = &font.name {
            format = format.set_font_name(name);
        }
        if let Some(size) = font.size {
            format = format.set_font_size(size);
        }
        if let Some(color) = &font.color {
            format = format.set_font_color(color.rgb());
        }
        if font.bold {
            format = format.set_bold();
        }
        if font.italic {
            format = format.set_italic();
        }
        if font.underline {
            format = format.set_underline(FormatUnderline::Single);
        }
    }
    let b = style.borders;
    if let Some(line) = b.left {
        format = format.set_border_left(border(line));
    }
    if let Some(line) = b.right {
        format = format.set_border_right(border(line));
    }
    if let Some(line) = b.top {
        format = format.set_border_top(border(line));
    }
    if let Some(line) = b.bottom {
        format = format.set_border_bottom(border(line));
    }
    if let Some(fill) = &style.fill {
        format = format
            .set_background_color(fill.rgb())
            .set_pattern(FormatPattern::Solid);
    }
    if style.wrap {
        format = format.set_text_wrap();
    }
    match style.align {
        Some(HAlign::Left) => format = format.set_align(FormatAlign::Left),
        Some(HAlign::Center) => format = format.set_align(FormatAlign::Center),
        Some(HAlign::Right) => format = format.set_align(FormatAlign::Right),
        None => {}
    }
    match style.valign {
        Some(VAlign::Top) => format = format.set_align(FormatAlign::Top),
        Some(VAlign::Center) => format = format.set_align(FormatAlign::VerticalCenter),
        Some(VAlign::Bottom) => format = format.set_align(FormatAlign::Bottom),
        None => {}
    }
    format
}

fn write_document(sheet: &mut Worksheet, doc: &InvoiceDocument) -> Result<()> {
    // merged ranges first: merging blanks the range, the cells below refill it
    for region in &doc.sheet.geometry.merges {
        if region.first == region.last {
            continue;
        }
        let format = doc
            .sheet
            .get(region.first)
            .map(|cell| cell_format(&cell.style))
            .unwrap_or_else(Format::new);
        sheet.merge_range(region.first.row, region.first.col, region.last.row, region.last.col, "", &format)?;
    }
    for (at, cell) in doc.sheet.iter() {
        let format = cell_format(&cell.style);
        match &cell.value {
            Some(CellValue::Number(n)) => {
                sheet.write_number_with_format(at.row, at.col, *n, &format)?;
            }
            Some(CellValue::Bool(b)) => {
                sheet.write_boolean_with_format(at.row, at.col, *b, &format)?;
            }
            Some(CellValue::Text(s)) if !s.is_empty() => {
                sheet.write_string_with_format(at.row, at.col, s, &format)?;
            }
            _ if !cell.style.is_plain() => {
                sheet.write_blank(at.row, at.col, &format)?;
            }
            _ => {}
        }
    }

    let page = &doc.page;
    for &(col, width) in &page.column_widths {
        sheet.set_column_width(col, width)?;
    }
    for &(row, height) in &page.row_heights {
        sheet.set_row_height(row, height)?;
    }
    sheet.set_print_area(
        page.print_first.row,
        page.print_first.col,
        page.print_last.row,
        page.print_last.col,
    )?;
    sheet.set_print_fit_to_pages(page.fit_width, 0);
    let m = page.margins;
    sheet.set_margins(m.left, m.right, m.top, m.bottom, 0.3, 0.3);
    sheet.set_print_center_horizontally(page.center_horizontally);

    for image in &doc.images {
        let picture = Image::new_from_buffer(&image.data)?
            .set_scale_to_size(image.width, image.height, false)
            .set_alt_text(&image.name);
        sheet.insert_image(image.anchor.row, image.anchor.col, &picture)?;
    }
    Ok(())
}

/// Serialize every document into one workbook, in memory.
pub fn build_workbook(documents: &[InvoiceDocument], reserved: &[&str]) -> Result<Vec<u8>> {
    let mut workbook = Workbook::new();
    let titles = sheet_titles(documents.iter().map(|d| d.title.as_str()), reserved);
    for (doc, title) in documents.iter().zip(&titles) {
        let sheet = workbook.add_worksheet();
        sheet.set_name(title)?;
        write_document(sheet, doc)?;
        debug!(order = %doc.order_id, sheet = %title, "added worksheet");
    }
    Ok(workbook.save_to_buffer()?)
}

/// Build the workbook and write it to `path` in one call.
pub fn write_workbook(documents: &[InvoiceDocument], reserved: &[&str], path: &Path) -> Result<()> {
    let bytes = build_workbook(documents, reserved)?;
    fs::write(path, &bytes).map_err(|source| InvoiceError::Output {
        path: path.to_path_buf(),
        source,
    })?;
    info!(path = %path.display(), sheets = documents.len(), bytes = bytes.len(), "wrote workbook");
    Ok(())
}
