//! The batch run: orders + template in, one artifact out.

use std::path::PathBuf;

use indicatif::{ProgressBar, ProgressStyle};
use tracing::{info, warn};

use crate::error::Result;
use crate::highlight::RULE_SHEETS;
use crate::images::ImageCache;
use crate::model::{InvoiceDocument, OrderGroup};
use crate::orders::{load_orders, sort_groups};
use crate::output::{convert, typst, xlsx};
use crate::render::{InvoiceRenderer, grand_total};
use crate::settings::{OutputFormat, Settings};
use crate::template::Template;

#[derive(Debug, Clone, Copy, Default)]
pub struct RunOptions {
    /// Convert the finished workbook to PDF with the office suite.
    pub convert_pdf: bool,
    pub quiet: bool,
}

#[derive(Debug, Clone)]
pub struct RunReport {
    pub invoices: usize,
    pub line_items: usize,
    pub highlighted_rows: usize,
    pub grand_total: f64,
    pub output: PathBuf,
    pub pdf: Option<PathBuf>,
}

fn progress_bar(len: usize, quiet: bool) -> ProgressBar {
    if quiet {
        return ProgressBar::hidden();
    }
    let pb = ProgressBar::new(len as u64);
    let style = ProgressStyle::with_template(
        "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} invoices",
    )
    .unwrap_or_else(|_| ProgressStyle::default_bar())
    .progress_chars("#>-");
    pb.set_style(style);
    pb
}

/// Render every group in memory. Nothing is written here.
pub fn render_invoices(
    groups: &[OrderGroup],
    template: &Template,
    settings: &Settings,
    quiet: bool,
) -> Vec<InvoiceDocument> {
    let rules = template.highlight_rules();
    info!(rules = rules.len(), "highlight rules ready");

    let mut cache = ImageCache::new();
    let images = cache.images_for(template, &settings.layout, &settings.logo);
    let renderer = InvoiceRenderer::new(template, &rules, &settings.layout, images);

    let pb = progress_bar(groups.len(), quiet);
    let documents: Vec<_> = groups
        .iter()
        .map(|group| {
            pb.set_message(group.order_id.clone());
            let doc = renderer.render(group);
            pb.inc(1);
            doc
        })
        .collect();
    pb.finish_and_clear();
    documents
}

pub fn generate(settings: &Settings, options: RunOptions) -> Result<RunReport> {
    let status = |msg: &str| {
        if !options.quiet {
            println!("{msg}");
        }
    };

    status("📊 Loading order data...");
    let mut groups = load_orders(&settings.orders)?;
    sort_groups(&mut groups, settings.sort);

    status("📋 Loading Excel template...");
    let template = Template::load(&settings.template, &settings.layout.sheet)?;

    status(&format!("Processing {} orders...", groups.len()));
    let documents = render_invoices(&groups, &template, settings, options.quiet);

    let output = match settings.format {
        OutputFormat::Xlsx => {
            status("💾 Saving Excel file...");
            let mut reserved: Vec<&str> = template.sheet_names.iter().map(String::as_str).collect();
            reserved.extend(RULE_SHEETS);
            xlsx::write_workbook(&documents, &reserved, &settings.output)?;
            status(&format!("✅ Saved {}", settings.output.display()));
            settings.output.clone()
        }
        OutputFormat::Pdf => {
            let path = settings.output.with_extension("pdf");
            status("🔨 Compiling PDF...");
            typst::write_pdf(&documents, &settings.footer, &settings.converters.typst, &path)?;
            status(&format!("✅ PDF Generated: {}", path.display()));
            path
        }
    };

    let pdf = match (settings.format, options.convert_pdf) {
        (OutputFormat::Xlsx, true) => {
            status(&format!("🖨️  Converting {} to PDF...", output.display()));
            Some(convert::workbook_to_pdf(&settings.converters.office, &output)?)
        }
        (OutputFormat::Pdf, true) => {
            warn!("--pdf ignored, output is already a PDF");
            None
        }
        (_, false) => None,
    };

    Ok(RunReport {
        invoices: documents.len(),
        line_items: documents.iter().map(|d| d.lines.len()).sum(),
        highlighted_rows: documents.iter().map(InvoiceDocument::highlighted_rows).sum(),
        grand_total: grand_total(&documents),
        output,
        pdf,
    })
}
