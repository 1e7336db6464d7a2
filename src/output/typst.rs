//! PDF rendering: every invoice into one Typst source, compiled out of process.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use serde::Serialize;
use tera::{Context, Tera, Value};
use tracing::info;

use super::{format_currency, run_program};
use crate::error::{InvoiceError, Result};
use crate::images::sniff_extension;
use crate::model::{InvoiceDocument, InvoiceHeader};
use crate::settings::Footer;

const TEMPLATE_NAME: &str = "invoices.typ";
const DEFAULT_TEMPLATE: &str = include_str!("../../templates/invoices.typ.tera");

#[derive(Serialize)]
struct LineContext {
    quantity: String,
    description: String,
    sku: String,
    unit_price: String,
    line_total: String,
    /// A Typst fill expression: `rgb("#RRGGBB")` or `none`.
    fill: String,
}

#[derive(Serialize)]
struct InvoiceContext<'a> {
    header: &'a InvoiceHeader,
    lines: Vec<LineContext>,
    subtotal: String,
    shipping: String,
    taxes: String,
    total: String,
}

#[derive(Serialize)]
struct DocumentContext<'a> {
    invoices: Vec<InvoiceContext<'a>>,
    footer: &'a Footer,
    logo: Option<String>,
    logo_width_pt: u32,
}

fn escape_typst(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for ch in raw.chars() {
        match ch {
            '\\' => out.push_str("\\\\"),
            '"' => out.push_str("\\\""),
            '\n' => out.push_str("\\n"),
            '\r' => {}
            c => out.push(c),
        }
    }
    out
}

/// Tera filter: make a value safe inside a Typst string literal.
fn typst_str(value: &Value, _: &HashMap<String, Value>) -> tera::Result<Value> {
    let raw = match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    };
    Ok(Value::String(escape_typst(&raw)))
}

fn invoice_context(doc: &InvoiceDocument) -> InvoiceContext<'_> {
    let lines = doc
        .lines
        .iter()
        .map(|line| LineContext {
            quantity: line.quantity.as_ref().map(|q| q.as_text()).unwrap_or_default(),
            description: line.description.clone(),
            sku: line.sku.clone(),
            unit_price: format_currency(line.unit_price),
            line_total: format_currency(line.line_total),
            fill: match &line.fill {
                Some(color) => format!("rgb(\"#{color}\")"),
                None => "none".to_string(),
            },
        })
        .collect();
    InvoiceContext {
        header: &doc.header,
        lines,
        subtotal: format_currency(doc.totals.subtotal),
        shipping: format_currency(doc.totals.shipping),
        taxes: format_currency(doc.totals.taxes),
        total: format_currency(doc.totals.total),
    }
}

fn engine() -> Result<Tera> {
    let mut tera = Tera::default();
    tera.add_raw_template(TEMPLATE_NAME, DEFAULT_TEMPLATE)?;
    tera.register_filter("typst_str", typst_str);
    Ok(tera)
}

/// Typst source for all documents; `logo` is a path relative to the source file.
pub fn render_source(documents: &[InvoiceDocument], footer: &Footer, logo: Option<&str>) -> Result<String> {
    let logo_width_px = documents
        .first()
        .and_then(|d| d.images.first())
        .map_or(400, |img| img.width);
    let data = DocumentContext {
        invoices: documents.iter().map(invoice_context).collect(),
        footer,
        logo: logo.map(str::to_string),
        // 96 px per inch, 72 pt per inch
        logo_width_pt: logo_width_px * 3 / 4,
    };
    let context = Context::from_serialize(&data)?;
    Ok(engine()?.render(TEMPLATE_NAME, &context)?)
}

/// Write `<output>.typ` (plus the logo next to it) and compile it to `output`.
pub fn write_pdf(documents: &[InvoiceDocument], footer: &Footer, typst: &str, output: &Path) -> Result<PathBuf> {
    let output_err = |path: &Path| {
        let path = path.to_path_buf();
        move |source: std::io::Error| InvoiceError::Output { path, source }
    };
    let dir = output.parent().filter(|p| !p.as_os_str().is_empty()).unwrap_or(Path::new("."));
    let stem = output
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| "invoices".to_string());

    let logo = match documents.first().and_then(|d| d.images.first()) {
        Some(image) => {
            let name = format!("{stem}_logo.{}", sniff_extension(&image.data));
            let path = dir.join(&name);
            fs::write(&path, &image.data).map_err(output_err(&path))?;
            Some(name)
        }
        None => None,
    };

    let source = render_source(documents, footer, logo.as_deref())?;
    let typ_path = output.with_extension("typ");
    fs::write(&typ_path, source).map_err(output_err(&typ_path))?;

    run_program(typst, Command::new(typst).arg("compile").arg(&typ_path).arg(output))?;
    info!(path = %output.display(), invoices = documents.len(), "compiled pdf");
    Ok(output.to_path_buf())
}

#[cfg(test)]
mod tests {
    use std::rc::Rc;

    use super::*;
    use crate::grid::{CellRef, CellValue, Grid};
    use crate::model::{HexColor, Margins, OrderTotals, PageSetup, PlacedImage, RenderedLine};

    fn document(id: &str, description: &str, fill: Option<&str>) -> InvoiceDocument {
        InvoiceDocument {
            order_id: id.to_string(),
            title: format!("Invoice_{id}"),
            header: InvoiceHeader {
                order_label: format!("Order {id}"),
                order_date: "2024-03-05".into(),
                billing_name: "Ann \"Fern\" Lee".into(),
                street: "1 Elm St".into(),
                city_line: "Portland, OR 97201".into(),
            },
            lines: vec![RenderedLine {
                quantity: Some(CellValue::Number(2.0)),
                description: description.to_string(),
                sku: String::new(),
                unit_price: 7.5,
                line_total: 15.0,
                fill: fill.and_then(HexColor::parse),
            }],
            totals: OrderTotals { subtotal: 15.0, shipping: 0.0, taxes: 0.0, total: 15.0 },
            placed: Vec::new(),
            sheet: Grid::new(),
            page: PageSetup {
                print_first: CellRef::new(0, 1),
                print_last: CellRef::new(39, 8),
                fit_width: 1,
                margins: Margins::default(),
                center_horizontally: true,
                column_widths: Vec::new(),
                row_heights: Vec::new(),
            },
            images: Vec::new(),
        }
    }

    #[test]
    fn escapes_typst_string_literals() {
        assert_eq!(escape_typst(r#"a "b" \c"#), r#"a \"b\" \\c"#);
        assert_eq!(escape_typst("line\r\nnext"), "line\\nnext");
    }

    #[test]
    fn renders_one_page_per_invoice_with_fills() {
        let docs = [
            document("1001", "Oak Tree", Some("FF0000")),
            document("1002", "Sword Fern", None),
        ];
        let source = render_source(&docs, &Footer::default(), None).unwrap();

        assert_eq!(source.matches("#pagebreak()").count(), 1);
        assert!(source.contains(r#"#"Order 1001""#));
        assert!(source.contains(r#"Ann \"Fern\" Lee"#));
        assert!(source.contains(r##"table.cell(fill: rgb("#FF0000"))[#"Oak Tree"]"##));
        assert!(source.contains(r#"table.cell(fill: none)[#"Sword Fern"]"#));
        assert!(source.contains("$15.00"));
        assert!(source.contains("Happy planting!"));
        assert!(!source.contains("image("));
    }

    #[test]
    fn logo_is_referenced_when_present() {
        let mut doc = document("1", "Moss", None);
        doc.images.push(PlacedImage {
            name: "logo.png".into(),
            data: Rc::from(vec![0u8; 4]),
            anchor: CellRef::new(0, 9),
            width: 400,
            height: 200,
        });
        let source = render_source(&[doc], &Footer::default(), Some("out_logo.png")).unwrap();
        assert!(source.contains(r#"image("out_logo.png", width: 300pt)"#));
    }

    #[test]
    fn missing_typst_binary_fails_after_writing_source() {
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("invoices.pdf");
        let err = write_pdf(
            &[document("1", "Moss", None)],
            &Footer::default(),
            "order-invoices-no-typst-here",
            &output,
        )
        .unwrap_err();
        assert!(matches!(err, InvoiceError::Converter { .. }));
        assert!(dir.path().join("invoices.typ").exists());
        assert!(!output.exists());
    }
}
